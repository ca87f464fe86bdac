//! ビルド時環境変数の解決
//!
//! ユーザー定義の環境変数（テンプレート展開あり）と、
//! ターゲットイメージから生成される環境変数をマージします。

use crate::error::{CoreError, Result};
use crate::image::ImageReference;
use crate::template::expand_env_template;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const IMAGE_REPO: &str = "IMAGE_REPO";
pub const IMAGE_NAME: &str = "IMAGE_NAME";
pub const IMAGE_TAG: &str = "IMAGE_TAG";

/// 環境変数エントリ
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvVar {
    pub name: String,
    pub value: String,
}

impl EnvVar {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// イメージ参照から IMAGE_REPO / IMAGE_NAME / IMAGE_TAG を生成
pub fn generate_env_from_image(image: &str) -> Result<Vec<EnvVar>> {
    let reference = ImageReference::parse(image)?;
    Ok(vec![
        EnvVar::new(IMAGE_REPO, reference.repository),
        EnvVar::new(IMAGE_NAME, reference.name),
        EnvVar::new(IMAGE_TAG, reference.tag),
    ])
}

/// 環境変数を評価してマージ
///
/// 優先順位:
/// 1. ユーザー定義の変数（定義順を維持、値が空でも生成値を抑止、
///    同名の重複は最後の値を採用）
/// 2. 生成された変数（値が空のものは除外、名前順で末尾に追加）
pub fn evaluate_env(declared: &[EnvVar], generated: &[EnvVar]) -> Result<Vec<EnvVar>> {
    let mut additional: BTreeMap<&str, &str> = generated
        .iter()
        .map(|e| (e.name.as_str(), e.value.as_str()))
        .collect();

    let mut evaluated: Vec<EnvVar> = Vec::with_capacity(declared.len() + additional.len());
    for var in declared {
        let value = expand_env_template(&var.value).map_err(|e| CoreError::Template {
            name: var.name.clone(),
            message: e.to_string(),
        })?;

        // 同名の宣言は後のものが勝つ（位置は最初の宣言のまま）
        match evaluated.iter_mut().find(|e| e.name == var.name) {
            Some(existing) => existing.value = value,
            None => evaluated.push(EnvVar::new(var.name.clone(), value)),
        }
        additional.remove(var.name.as_str());
    }

    evaluated.extend(
        additional
            .into_iter()
            .filter(|(_, value)| !value.is_empty())
            .map(|(name, value)| EnvVar::new(name, value)),
    );

    Ok(evaluated)
}
