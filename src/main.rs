use std::collections::HashMap;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use chrono::Utc;
use clap::{Parser, Subcommand};
use log::info;

use keysprint::config::Config;
use keysprint::engine::weak_keys::{aggregate_weak_keys, apply_adaptive_weights};
use keysprint::event::{CommandQueue, SessionCommand, read_input_log};
use keysprint::session::result::SprintSetResult;
use keysprint::session::sprint::{SprintPhase, SprintSession};
use keysprint::session::text::Passages;
use keysprint::store::json_store::JsonStore;
use keysprint::store::state::AppState;

#[derive(Parser)]
#[command(
    name = "keysprint",
    version,
    about = "Typing sprint measurement with IME-aware input and weak-key tracking"
)]
struct Cli {
    #[arg(long, global = true, help = "Path to config.toml")]
    config: Option<PathBuf>,

    #[arg(long, global = true, help = "Directory holding the persisted document")]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Replay a JSON-lines input log through a sprint.
    Replay {
        log: PathBuf,

        #[arg(long, help = "Do not persist the updated document")]
        dry_run: bool,
    },
    /// Show persisted weak keys with their adaptive weights.
    WeakKeys,
}

fn main() -> Result<()> {
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .parse_default_env()
        .init();

    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };
    let data_dir = cli
        .data_dir
        .clone()
        .unwrap_or_else(|| PathBuf::from(&config.data_dir));
    let store = JsonStore::with_base_dir(data_dir)?;

    match cli.command {
        Command::Replay { log, dry_run } => replay(&config, &store, &log, dry_run),
        Command::WeakKeys => weak_keys(&config, &store),
    }
}

fn replay(config: &Config, store: &JsonStore, log_path: &Path, dry_run: bool) -> Result<()> {
    let file =
        File::open(log_path).with_context(|| format!("opening {}", log_path.display()))?;
    let events = read_input_log(BufReader::new(file))?;
    let Some(first) = events.first().map(|e| e.at) else {
        bail!("{} contains no input events", log_path.display());
    };
    let last = events.iter().map(|e| e.at).max().unwrap_or(first);

    let state = AppState::from_storage(store.load());
    let goal = state.settings.goal_wpm();
    let plan = config.plan();
    let text = Passages::new(config.passages.clone());
    let mut session =
        SprintSession::new(plan, text, state).with_lesson_id(config.lesson_id.clone());
    session.start(first);

    let tail_ms = (plan.set_length_ms * plan.set_count as u64) as i64;
    let mut queue = CommandQueue::replay(events, config.tick_interval_ms, tail_ms);
    let mut printed = 0;

    while let Some(command) = queue.next() {
        match command {
            SessionCommand::Input(input) => {
                session.handle_input(&input);
            }
            SessionCommand::Tick(now) => {
                session.tick(now);
            }
        }
        for result in &session.results()[printed..] {
            print_set(result, plan.set_count);
        }
        printed = session.results().len();
        if session.phase() == SprintPhase::SessionComplete {
            break;
        }
    }

    match session.summary() {
        Some(summary) => {
            println!(
                "session {}: {:.1} gross wpm, {:.1} net wpm, {:.1}% accuracy, {} keystrokes, {} errors",
                summary.session_id,
                summary.gross_wpm,
                summary.net_wpm,
                summary.accuracy,
                summary.total_keystrokes,
                summary.error_count
            );
            let goal_met = summary.gross_wpm >= goal as f64;
            println!("goal {goal} wpm: {}", if goal_met { "met" } else { "missed" });
            for stat in summary.weak_keys.iter().take(config.adaptive_top_n) {
                println!(
                    "  {:>4}  {} misses  {:.1}%",
                    stat.key, stat.miss_count, stat.accuracy
                );
            }
        }
        None => {
            let live = session.live_metrics(last);
            println!(
                "sprint incomplete at set {}: {:.1} wpm, {:.1}% accuracy{}",
                session.set_index() + 1,
                live.wpm,
                live.accuracy,
                if live.meets_goal(Some(goal)) { " (on goal)" } else { "" }
            );
        }
    }

    if dry_run {
        return Ok(());
    }
    let state = session.into_store();
    store.save(&state.to_storage())?;
    info!("saved progress to {}", store.base_dir().display());
    Ok(())
}

fn print_set(result: &SprintSetResult, set_count: usize) {
    let m = &result.metrics;
    println!(
        "set {}/{}: {:.1} wpm, {:.1} cpm, {:.1} kpm, {:.1}% accuracy, {} errors, best combo {}",
        result.set_index + 1,
        set_count,
        m.wpm,
        m.cpm,
        m.kpm,
        m.accuracy,
        m.errors,
        m.combo
    );
}

fn weak_keys(config: &Config, store: &JsonStore) -> Result<()> {
    let state = AppState::from_storage(store.load());
    let stats = &state.progress.weak_keys;
    if stats.is_empty() {
        println!("no weak keys recorded yet");
        return Ok(());
    }

    let now = Utc::now().timestamp_millis();
    let aggregation = aggregate_weak_keys(&[], Some(stats.as_slice()), Some(now));
    let base: HashMap<String, f64> = stats.iter().map(|s| (s.key.clone(), 1.0)).collect();
    let weights =
        apply_adaptive_weights(&base, &aggregation.weighted_scores, config.adaptive_top_n);

    let mut rows: Vec<_> = stats
        .iter()
        .map(|s| (s, weights.get(&s.key).copied().unwrap_or(1.0)))
        .collect();
    rows.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.key.cmp(&b.0.key)));

    for (stat, weight) in rows {
        let last = stat
            .last_practiced_at
            .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{:>4}  weight {:.2}  {} misses  {:.1}%  streak {}  last {}",
            stat.key, weight, stat.miss_count, stat.accuracy, stat.streak, last
        );
    }
    Ok(())
}
