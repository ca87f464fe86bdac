//! テンプレート展開機能
//!
//! Teraを使用して環境変数の値やPodマニフェストのテンプレート展開を行います。
//! `{{ VAR }}` に加えて `{{.VAR}}` 形式のフィールド参照も受け付けます。

use crate::error::{CoreError, Result};
use tera::{Context, Tera};
use tracing::debug;

/// テンプレートプロセッサ
pub struct TemplateProcessor {
    tera: Tera,
    context: Context,
}

impl TemplateProcessor {
    /// 新しいテンプレートプロセッサを作成
    pub fn new() -> Self {
        Self {
            tera: Tera::default(),
            context: Context::new(),
        }
    }

    /// 変数を追加
    pub fn add_variable(&mut self, key: impl Into<String>, value: serde_json::Value) {
        self.context.insert(key.into(), &value);
    }

    /// 文字列変数をまとめて追加
    pub fn add_variables<I, K, V>(&mut self, variables: I)
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        for (key, value) in variables {
            self.context
                .insert(key.into(), &serde_json::Value::String(value.into()));
        }
    }

    /// プロセスの環境変数をすべて追加
    pub fn add_env_variables(&mut self) {
        let mut count = 0;
        for (key, value) in std::env::vars() {
            self.context.insert(key, &serde_json::Value::String(value));
            count += 1;
        }
        debug!(env_var_count = count, "Added process environment to template context");
    }

    /// 文字列をテンプレートとして展開
    pub fn render_str(&mut self, template: &str) -> Result<String> {
        let template = normalize_field_access(template);
        self.tera
            .render_str(&template, &self.context)
            .map_err(|e| CoreError::TemplateRenderError(extract_tera_error_detail(&e)))
    }
}

impl Default for TemplateProcessor {
    fn default() -> Self {
        Self::new()
    }
}

/// 環境変数テンプレートを展開
///
/// 参照できるのはプロセスの環境変数のみ。未定義の変数はエラーになります。
pub fn expand_env_template(template: &str) -> Result<String> {
    if !has_template_syntax(template) {
        return Ok(template.to_string());
    }

    let mut processor = TemplateProcessor::new();
    processor.add_env_variables();
    processor.render_str(template)
}

fn has_template_syntax(s: &str) -> bool {
    s.contains("{{") || s.contains("{%") || s.contains("{#")
}

/// `{{.VAR}}` を `{{ VAR}}` に書き換える
fn normalize_field_access(template: &str) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(pos) = rest.find("{{") {
        let (head, tail) = rest.split_at(pos + 2);
        out.push_str(head);

        let trimmed = tail.trim_start();
        match trimmed.strip_prefix('.') {
            Some(field) if field.starts_with(|c: char| c.is_ascii_alphabetic() || c == '_') => {
                out.push(' ');
                rest = field;
            }
            _ => rest = tail,
        }
    }

    out.push_str(rest);
    out
}

/// Teraのエラーチェーンから詳細メッセージを組み立てる
fn extract_tera_error_detail(e: &tera::Error) -> String {
    use std::error::Error;

    let mut details = vec![e.to_string()];
    let mut source = e.source();
    while let Some(err) = source {
        details.push(err.to_string());
        source = err.source();
    }

    // 最も内側のエラーが一番具体的（未定義変数など）
    details.pop().unwrap_or_default()
}
