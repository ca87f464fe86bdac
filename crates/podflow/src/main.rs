mod commands;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "podflow")]
#[command(about = "クラスタ内の使い捨てPodでコンテナイメージをビルド", long_about = None)]
struct Cli {
    /// 詳細なログを表示
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// ビルドPodでイメージをビルドしてダイジェストを表示
    Build(commands::build::BuildArgs),
    /// バージョン情報を表示
    Version,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // ログは stderr に出し、stdout はビルドログと結果に使う
    let default_level = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .init();

    match cli.command {
        Commands::Version => {
            println!("podflow {}", env!("CARGO_PKG_VERSION"));
        }
        Commands::Build(args) => {
            commands::build::handle(args).await?;
        }
    }

    Ok(())
}
