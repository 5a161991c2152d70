use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use log::info;

use lichess_bot::book::{BookSelector, OpeningBook};
use lichess_bot::config::BotConfig;
use lichess_bot::engine::EngineClient;
use lichess_bot::selfplay::{Contestant, DEFAULT_MAX_PLIES, MatchConfig, run_match};

/// 2 つの UCI エンジンを交互の先後で指し合わせ、勝敗を集計する。
#[derive(Parser, Debug)]
#[command(author, version, about = "Let two UCI engines play each other")]
struct Cli {
    /// TOML config file; engine options and the book path are taken from it
    #[arg(long)]
    config: Option<PathBuf>,

    /// First engine (defaults to the configured engine path)
    #[arg(short = 'a', long)]
    engine_a: Option<PathBuf>,

    /// Second engine (defaults to the configured engine path)
    #[arg(short = 'b', long)]
    engine_b: Option<PathBuf>,

    /// Number of games to run
    #[arg(short = 'n', long, default_value_t = 1, value_parser = clap::value_parser!(u32).range(1..))]
    games: u32,

    /// Search time per move in milliseconds
    #[arg(short = 't', long, default_value_t = 500, value_parser = clap::value_parser!(u64).range(1..))]
    movetime_ms: u64,

    /// Maximum plies per game before it is scored as a draw
    #[arg(long, default_value_t = DEFAULT_MAX_PLIES)]
    max_plies: u32,

    /// Starting position (FEN); standard start when omitted
    #[arg(long)]
    fen: Option<String>,

    /// Polyglot opening book (.bin)
    #[arg(long, conflicts_with = "no_book")]
    book: Option<PathBuf>,

    /// Play every move with the engines
    #[arg(long, default_value_t = false)]
    no_book: bool,

    /// Seed for book draws
    #[arg(long)]
    seed: Option<u64>,

    /// Log level when RUST_LOG is not set
    #[arg(long, default_value = "info")]
    log_level: String,
}

fn engine_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(&cli.log_level))
        .init();

    let config = match &cli.config {
        Some(path) => BotConfig::load(path)?,
        None => BotConfig::default(),
    };
    let book_path = if cli.no_book {
        None
    } else {
        cli.book.or(config.book.path.clone())
    };
    let book = match &book_path {
        Some(path) => Some(Arc::new(
            OpeningBook::load(path).with_context(|| format!("cannot use book {}", path.display()))?,
        )),
        None => None,
    };
    let seed = cli.seed.or(config.book.seed);

    let contestant = |path: Option<PathBuf>, label: &str, seed: Option<u64>| {
        let mut settings = config.engine.to_settings();
        if let Some(path) = path {
            settings.path = path;
        }
        let name = format!("{} ({label})", engine_name(&settings.path));
        let selector = book.as_ref().map(|book| BookSelector::new(Arc::clone(book), seed));
        Contestant::new(name.clone(), EngineClient::new(settings, name), selector)
    };
    // 同じ seed だと両者が同じ定跡を引くのでずらす
    let mut a = contestant(cli.engine_a, "a", seed);
    let mut b = contestant(cli.engine_b, "b", seed.map(|s| s.wrapping_add(1)));

    let match_config = MatchConfig {
        games: cli.games,
        movetime: Duration::from_millis(cli.movetime_ms),
        max_plies: cli.max_plies,
        start_fen: cli.fen,
    };
    info!(
        "{} vs {}: {} games, {} ms per move, book {}",
        a.name,
        b.name,
        match_config.games,
        cli.movetime_ms,
        if book.is_some() { "on" } else { "off" }
    );

    let stats = run_match(&mut a, &mut b, &match_config).await?;
    info!(
        "final: {} vs {}: {stats} score {:.3} {}",
        a.name,
        b.name,
        stats.score_a().unwrap_or(0.0),
        serde_json::to_string(&stats)?
    );
    Ok(())
}
