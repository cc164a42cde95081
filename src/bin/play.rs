//! Interactive terminal game.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use pacman_lockstep::constants::RESULT_SCREEN_MS;
use pacman_lockstep::engine::{Game, GameOptions};
use pacman_lockstep::loader::DirectoryLoader;
use pacman_lockstep::terminal::{KeyboardInput, TerminalGuard, TerminalRenderer};
use pacman_lockstep::types::LevelOutcome;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Cli {
    /// Directory holding `<n>.lvl` files and their scripts.
    level_dir: PathBuf,
    #[arg(long)]
    seed: Option<u32>,
    /// Where `debug.log` is written.
    #[arg(long, default_value = ".")]
    log_dir: PathBuf,
    #[arg(long, default_value_t = RESULT_SCREEN_MS)]
    pause_ms: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let _log_guard = setup_logging(&cli.log_dir)?;

    let options = GameOptions {
        seed: cli.seed.unwrap_or_else(rand::random),
        result_pause: Duration::from_millis(cli.pause_ms),
        tempo_override: None,
    };
    let game = Game::new(
        Arc::new(DirectoryLoader::new(&cli.level_dir)),
        Arc::new(TerminalRenderer),
        Arc::new(KeyboardInput),
        options,
    )
    .with_context(|| format!("cannot start game from {}", cli.level_dir.display()))?;

    let summary = {
        let _terminal = TerminalGuard::enter().context("cannot take over the terminal")?;
        game.run().await?
    };

    tracing::info!(?summary, "game over");
    println!(
        "{} with {} points after {} of {} levels",
        match summary.outcome {
            LevelOutcome::NextLevel | LevelOutcome::BranchWon => "Won",
            LevelOutcome::Quit => "Caught",
            _ => "Quit",
        },
        summary.score,
        summary.levels_cleared,
        summary.level_count
    );
    Ok(())
}

/// File-only logging: the terminal belongs to the renderer.
fn setup_logging(log_dir: &Path) -> Result<WorkerGuard> {
    std::fs::create_dir_all(log_dir)
        .with_context(|| format!("cannot create log dir {}", log_dir.display()))?;
    let file_appender = tracing_appender::rolling::never(log_dir, "debug.log");
    let (writer, guard) = tracing_appender::non_blocking(file_appender);

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("pacman_lockstep=debug,info"));
    let file_layer = tracing_subscriber::fmt::layer()
        .with_writer(writer)
        .with_ansi(false);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        .init();
    tracing::info!(log = %log_dir.join("debug.log").display(), "logging initialized");
    Ok(guard)
}
