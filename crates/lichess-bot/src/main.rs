use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use log::{info, warn};
use tokio::sync::watch;

use lichess_bot::book::OpeningBook;
use lichess_bot::challenge::ChallengePolicy;
use lichess_bot::config::BotConfig;
use lichess_bot::lichess::{GameService, LichessClient};
use lichess_bot::time_budget::TimeBudget;
use lichess_bot::{DispatcherSettings, SessionDispatcher};

/// Lichess BOT クライアント。
///
/// 設定ファイルの値はコマンドライン引数で上書きできる。
#[derive(Parser, Debug)]
#[command(author, version, about = "Play on lichess.org with a local UCI engine")]
struct Cli {
    /// TOML config file (optional; every field has a default)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Path to the UCI engine executable
    #[arg(long)]
    engine: Option<PathBuf>,

    /// File containing the Lichess API token
    #[arg(long)]
    token_file: Option<PathBuf>,

    /// Polyglot opening book (.bin)
    #[arg(long, conflicts_with = "no_book")]
    book: Option<PathBuf>,

    /// Ignore any opening book from the config file
    #[arg(long, default_value_t = false)]
    no_book: bool,

    /// Log level when RUST_LOG is not set
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Upgrade the account to a BOT account before connecting (irreversible)
    #[arg(long, default_value_t = false)]
    upgrade_account: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(&cli.log_level))
        .init();

    let mut config = match &cli.config {
        Some(path) => BotConfig::load(path)?,
        None => BotConfig::default(),
    };
    if let Some(engine) = cli.engine {
        config.engine.path = engine;
    }
    if let Some(token_file) = cli.token_file {
        config.lichess.token_file = token_file;
    }
    if cli.no_book {
        config.book.path = None;
    } else if let Some(book) = cli.book {
        config.book.path = Some(book);
    }

    let token = config.lichess.read_token()?;
    let client = LichessClient::new(&config.lichess.base_url, token)
        .context("failed to build the HTTP client")?;
    if cli.upgrade_account {
        client.upgrade_to_bot().await.context("failed to upgrade the account")?;
        info!("account upgraded to BOT");
    }

    let book = match &config.book.path {
        Some(path) => Some(Arc::new(OpeningBook::load(path)?)),
        None => None,
    };
    let policy = ChallengePolicy::from_config(&config.challenge)?;
    let settings = DispatcherSettings {
        engine: config.engine.to_settings(),
        time_budget: Arc::new(TimeBudget::from_config(&config.time)),
        book,
        book_seed: config.book.seed,
        restart_backoff: config.lichess.restart_backoff(),
        max_session_restarts: config.lichess.max_session_restarts,
    };
    if !settings.engine.path.exists() {
        warn!("engine {} does not exist yet", settings.engine.path.display());
    }

    let client = Arc::new(client);
    let dispatcher = SessionDispatcher::new(client.clone(), client, policy, settings);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("interrupted, shutting down");
                let _ = shutdown_tx.send(true);
            }
            Err(e) => {
                // 送信側を落とすと停止扱いになるので保持し続ける
                warn!("cannot listen for Ctrl-C: {e}");
                std::future::pending::<()>().await;
            }
        }
    });

    dispatcher.run(shutdown_rx).await;
    Ok(())
}
