use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error(
        "設定ファイルが見つかりません。以下の場所を確認してください:\n\
        - カレントディレクトリ: podflow.local.kdl, podflow.kdl, .podflow.kdl\n\
        - ./.podflow/ ディレクトリ\n\
        - ~/.config/podflow/podflow.kdl\n\
        または PODFLOW_CONFIG 環境変数で直接指定できます"
    )]
    ProjectFileNotFound,

    #[error("設定ファイルの読み込みに失敗しました: {0}")]
    Core(#[from] podflow_core::CoreError),

    #[error("IO エラー: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ConfigError>;
