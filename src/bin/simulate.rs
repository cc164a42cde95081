use std::collections::HashSet;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use pacman_lockstep::engine::{Game, GameOptions, RunSummary};
use pacman_lockstep::frontend::{LogRenderer, Renderer, ScriptedInput};
use pacman_lockstep::loader::DirectoryLoader;
use pacman_lockstep::types::{DisplayMode, Frame, GLYPH_PACMAN};
use serde::Serialize;
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Cli {
    level_dir: PathBuf,
    #[arg(long)]
    seed: Option<u32>,
    /// Overrides every level's TEMPO; 0 runs turns back to back.
    #[arg(long)]
    tempo_ms: Option<u64>,
    /// Keys fed to a keyboard-driven player, one per turn (`.` = no key).
    /// The player quits once they run out.
    #[arg(long, default_value = "")]
    keys: String,
    #[arg(long)]
    run_id: Option<String>,
    #[arg(long)]
    summary_out: Option<PathBuf>,
}

#[derive(Clone, Debug, Serialize)]
struct AnomalyRecord {
    level: usize,
    frame: usize,
    message: String,
}

#[derive(Clone, Debug, Serialize)]
struct SimulationReport {
    #[serde(rename = "runId")]
    run_id: String,
    seed: u32,
    #[serde(rename = "startedAt")]
    started_at: String,
    #[serde(rename = "finishedAt")]
    finished_at: String,
    #[serde(rename = "durationMs")]
    duration_ms: i64,
    frames: usize,
    anomalies: Vec<String>,
    #[serde(rename = "anomalyRecords")]
    anomaly_records: Vec<AnomalyRecord>,
    #[serde(flatten)]
    summary: RunSummary,
}

#[derive(Debug, Default)]
struct AnomalyLog {
    frames: usize,
    anomalies: Vec<String>,
    records: Vec<AnomalyRecord>,
    seen: HashSet<String>,
}

/// Headless renderer that checks every frame it is handed.
#[derive(Debug, Default)]
struct CheckingRenderer {
    log: Mutex<AnomalyLog>,
}

impl CheckingRenderer {
    fn take(&self) -> AnomalyLog {
        std::mem::take(&mut *self.log.lock().unwrap_or_else(|poisoned| poisoned.into_inner()))
    }
}

impl Renderer for CheckingRenderer {
    fn render(&self, frame: &Frame, mode: DisplayMode) {
        LogRenderer.render(frame, mode);
        let mut log = self.log.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        log.frames += 1;
        let index = log.frames;
        for message in collect_frame_anomalies(frame) {
            warn!(level = frame.level, frame = index, %message, "anomaly detected");
            let AnomalyLog {
                anomalies,
                records,
                seen,
                ..
            } = &mut *log;
            push_anomaly(anomalies, records, seen, frame.level, index, message);
        }
    }
}

fn collect_frame_anomalies(frame: &Frame) -> Vec<String> {
    let mut anomalies = Vec::new();
    if frame.rows.len() != frame.height.max(0) as usize {
        anomalies.push(format!(
            "frame has {} rows for height {}",
            frame.rows.len(),
            frame.height
        ));
    }
    for (y, row) in frame.rows.iter().enumerate() {
        let width = row.chars().count();
        if width != frame.width.max(0) as usize {
            anomalies.push(format!("row {y} has {width} cells for width {}", frame.width));
        }
    }
    let players = frame.count(GLYPH_PACMAN);
    if players > 1 {
        anomalies.push(format!("{players} player cells on the board"));
    }
    if (players == 1) != frame.alive {
        anomalies.push(format!(
            "player alive={} but {players} player cells",
            frame.alive
        ));
    }
    anomalies
}

fn push_anomaly(
    anomalies: &mut Vec<String>,
    records: &mut Vec<AnomalyRecord>,
    seen: &mut HashSet<String>,
    level: usize,
    frame: usize,
    message: String,
) {
    records.push(AnomalyRecord {
        level,
        frame,
        message: message.clone(),
    });
    if seen.insert(message.clone()) {
        anomalies.push(message);
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    setup_logging();

    let seed = cli.seed.unwrap_or_else(rand::random);
    let started_at = chrono::Utc::now();
    let run_id = cli
        .run_id
        .clone()
        .unwrap_or_else(|| default_run_id(seed, started_at.timestamp_millis()));
    info!(%run_id, seed, dir = %cli.level_dir.display(), "run started");

    let renderer = Arc::new(CheckingRenderer::default());
    let options = GameOptions {
        seed,
        result_pause: Duration::ZERO,
        tempo_override: cli.tempo_ms.map(Duration::from_millis),
    };
    let game = Game::new(
        Arc::new(DirectoryLoader::new(&cli.level_dir)),
        renderer.clone(),
        Arc::new(ScriptedInput::parse(&cli.keys).quit_when_exhausted()),
        options,
    )
    .with_context(|| format!("cannot load levels from {}", cli.level_dir.display()))?;

    let summary = game.run().await?;
    let finished_at = chrono::Utc::now();
    let log = renderer.take();
    let report = build_report(run_id.clone(), seed, started_at, finished_at, log, summary);

    println!("{}", serde_json::to_string(&report)?);

    if let Some(path) = cli.summary_out.as_ref() {
        if let Err(err) = write_summary(path, &report) {
            error!(%run_id, path = %path.display(), %err, "summary write failed");
            std::process::exit(2);
        }
        info!(%run_id, path = %path.display(), "summary written");
    }

    info!(
        %run_id,
        outcome = ?report.summary.outcome,
        score = report.summary.score,
        anomalies = report.anomaly_records.len(),
        "run finished"
    );
    if !report.anomalies.is_empty() {
        std::process::exit(1);
    }
    Ok(())
}

/// JSON lines on stderr so stdout carries only the report.
fn setup_logging() {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .json()
        .with_env_filter(env_filter)
        .with_writer(io::stderr)
        .init();
}

fn default_run_id(seed: u32, timestamp_ms: i64) -> String {
    format!("sim-{seed}-{timestamp_ms}")
}

fn build_report(
    run_id: String,
    seed: u32,
    started_at: chrono::DateTime<chrono::Utc>,
    finished_at: chrono::DateTime<chrono::Utc>,
    log: AnomalyLog,
    summary: RunSummary,
) -> SimulationReport {
    SimulationReport {
        run_id,
        seed,
        started_at: started_at.to_rfc3339(),
        finished_at: finished_at.to_rfc3339(),
        duration_ms: (finished_at - started_at).num_milliseconds().max(0),
        frames: log.frames,
        anomalies: log.anomalies,
        anomaly_records: log.records,
        summary,
    }
}

fn write_summary(path: &Path, report: &SimulationReport) -> io::Result<()> {
    let text = serde_json::to_string_pretty(report).map_err(io::Error::other)?;
    std::fs::write(path, text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use pacman_lockstep::types::LevelOutcome;

    fn frame(rows: &[&str], alive: bool) -> Frame {
        Frame {
            level: 1,
            width: rows.first().map(|r| r.len() as i32).unwrap_or(0),
            height: rows.len() as i32,
            rows: rows.iter().map(|r| r.to_string()).collect(),
            score: 0,
            alive,
            branch: false,
        }
    }

    fn summary() -> RunSummary {
        RunSummary {
            outcome: LevelOutcome::NextLevel,
            score: 4,
            levels_cleared: 2,
            level_count: 2,
            last_level: 2,
            completed: true,
            branches: 0,
            branch: false,
        }
    }

    #[test]
    fn default_run_id_contains_seed_and_timestamp() {
        assert_eq!(default_run_id(42, 123456789), "sim-42-123456789");
    }

    #[test]
    fn consistent_frames_have_no_anomalies() {
        assert!(collect_frame_anomalies(&frame(&["C o", "XM@"], true)).is_empty());
        assert!(collect_frame_anomalies(&frame(&["  o", "XM@"], false)).is_empty());
    }

    #[test]
    fn duplicated_or_missing_player_is_flagged() {
        assert_eq!(collect_frame_anomalies(&frame(&["C C"], true)).len(), 2);
        assert_eq!(collect_frame_anomalies(&frame(&["   "], true)).len(), 1);
    }

    #[test]
    fn report_flattens_summary_fields() {
        let start = chrono::Utc.timestamp_millis_opt(1_000).single().expect("valid time");
        let end = chrono::Utc.timestamp_millis_opt(3_500).single().expect("valid time");
        let report = build_report("sim-1-1".to_string(), 1, start, end, AnomalyLog::default(), summary());
        assert_eq!(report.duration_ms, 2_500);
        let value = serde_json::to_value(&report).expect("report serializes");
        assert_eq!(value["outcome"], "next_level");
        assert_eq!(value["levels_cleared"], 2);
        assert_eq!(value["runId"], "sim-1-1");
    }

    #[test]
    fn write_summary_returns_error_when_parent_does_not_exist() {
        let target = std::env::temp_dir()
            .join(format!("pacman-lockstep-missing-{}", chrono::Utc::now().timestamp_millis()))
            .join("summary.json");
        let report = build_report(
            "sim-1-1".to_string(),
            1,
            chrono::Utc::now(),
            chrono::Utc::now(),
            AnomalyLog::default(),
            summary(),
        );
        assert!(write_summary(&target, &report).is_err());
    }

    #[test]
    fn push_anomaly_keeps_records_and_deduplicates_summary_messages() {
        let mut anomalies = Vec::new();
        let mut records = Vec::new();
        let mut seen = HashSet::new();
        push_anomaly(&mut anomalies, &mut records, &mut seen, 1, 10, "same".to_string());
        push_anomaly(&mut anomalies, &mut records, &mut seen, 1, 11, "same".to_string());
        assert_eq!(anomalies.len(), 1);
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].frame, 11);
    }

    #[test]
    fn checking_renderer_counts_frames() {
        let renderer = CheckingRenderer::default();
        renderer.render(&frame(&["C "], true), DisplayMode::Menu);
        renderer.render(&frame(&["CC"], true), DisplayMode::Menu);
        let log = renderer.take();
        assert_eq!(log.frames, 2);
        assert_eq!(log.records.len(), 1);
        assert_eq!(log.records[0].frame, 2);
    }
}
