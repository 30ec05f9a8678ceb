use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Result, bail};
use clap::{Parser, Subcommand};
use tracing::warn;

use vocabr::analytics::TracingSink;
use vocabr::app::{App, DASHBOARD_CATEGORY};
use vocabr::catalog::{StaticCatalog, WordCatalog};
use vocabr::clock::SystemClock;
use vocabr::config::Config;
use vocabr::event::{AppEvent, EventHandler};
use vocabr::session::lifecycle::{ReconciliationTrigger, TriggerOutcome};
use vocabr::store::json_store::JsonFileBackend;

#[derive(Parser)]
#[command(name = "vocabr", version, about = "Adaptive vocabulary practice with durable sessions")]
struct Cli {
    #[arg(long, help = "Directory holding the session snapshot")]
    data_dir: Option<PathBuf>,

    #[arg(short, long, help = "Category to practice (or \"dashboard\")")]
    category: Option<String>,

    #[arg(short, long, help = "Number of words per batch")]
    batch_size: Option<usize>,

    #[arg(long, help = "Seed for the random fallback sampler")]
    seed: Option<u64>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Progress summary and goals
    Status,
    /// Print the current batch
    Next,
    /// Record one answer
    Answer {
        word_id: u32,
        #[arg(long, conflicts_with = "wrong")]
        correct: bool,
        #[arg(long)]
        wrong: bool,
    },
    /// Interactive practice loop
    Practice,
    /// Discard the stored session and start over
    Reset,
    /// Print the stored snapshot as JSON
    Export,
    /// List available categories
    Categories,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();

    let mut config = Config::load().unwrap_or_else(|err| {
        warn!(%err, "config unreadable, using defaults");
        Config::default()
    });
    if let Some(dir) = &cli.data_dir {
        config.data_dir = dir.to_string_lossy().to_string();
    }
    if let Some(batch_size) = cli.batch_size {
        config.batch_size = batch_size;
    }
    if cli.seed.is_some() {
        config.shuffle_seed = cli.seed;
    }
    config.validate();

    let catalog: Arc<dyn WordCatalog> = Arc::new(StaticCatalog::load());

    if let Some(Command::Categories) = cli.command {
        for category in catalog.categories() {
            println!("{category} ({} words)", catalog.words_by_category(&category).len());
        }
        println!("{DASHBOARD_CATEGORY} (mixed)");
        return Ok(());
    }

    let backend = JsonFileBackend::with_base_dir(config.data_path())?;
    let snapshot_path = backend.snapshot_path();
    let mut app = App::new(
        config,
        catalog,
        Box::new(backend),
        Arc::new(SystemClock),
        Box::new(TracingSink),
    );

    if let Some(category) = &cli.category {
        app.select_category(category)?;
    }

    match cli.command.unwrap_or(Command::Next) {
        Command::Status => print_status(&app),
        Command::Next => print_batch(&app),
        Command::Answer {
            word_id,
            correct,
            wrong,
        } => {
            if correct == wrong {
                bail!("pass exactly one of --correct or --wrong");
            }
            let outcome = app.answer(word_id, correct)?;
            println!(
                "word {word_id}: mastery {:.2} after {} views",
                outcome.entry.mastery_score, outcome.entry.times_seen
            );
            if outcome.regenerated {
                println!("new batch ready (session {})", app.session_number());
            }
        }
        Command::Practice => run_practice(&mut app, &snapshot_path)?,
        Command::Reset => {
            app.start_new_session()?;
            println!("started a new session");
        }
        Command::Export => {
            println!("{}", serde_json::to_string_pretty(app.snapshot())?);
        }
        Command::Categories => {}
    }

    if app.shutdown() == TriggerOutcome::FlushFailed {
        bail!("could not save the session");
    }
    Ok(())
}

fn print_status(app: &App) {
    let summary = app.summary();
    println!("category:   {}", app.active_category());
    println!("session:    {}", app.session_number());
    println!("completed:  {}", summary.completed_words);
    println!(
        "accuracy:   {}% ({} remembered, {} forgotten, {} excluded)",
        summary.accuracy, summary.remembered, summary.forgotten, summary.excluded
    );
    println!("streak:     {} (best {})", summary.streak, summary.best_streak);
    println!("today:      {} sessions", summary.daily_session_count);
    for goal in &summary.goals {
        println!(
            "goal {:?}: {}/{} ({:.0}%){}",
            goal.kind,
            goal.current,
            goal.target,
            goal.ratio * 100.0,
            if goal.completed { " done" } else { "" }
        );
    }
}

fn print_batch(app: &App) {
    if let Some(info) = app.session_info() {
        println!(
            "session {} [{:?}, {}] new {} / review {}, exhaustion {:.2}{}",
            app.session_number(),
            info.strategy,
            info.difficulty_tier,
            info.new_word_count,
            info.review_word_count,
            info.exhaustion_level,
            if info.degraded { " (fallback)" } else { "" }
        );
    } else {
        println!("session {}", app.session_number());
    }
    for (i, word) in app.batch().iter().enumerate() {
        let marker = if i == app.cursor() { ">" } else { " " };
        println!("{marker} {:>4}  {:<14} {}", word.id, word.text, word.difficulty);
    }
}

fn prompt(app: &App) -> Result<()> {
    match app.current_word() {
        Some(word) => print!("[{}/{}] {} (y/n/q) > ", app.cursor() + 1, app.batch().len(), word.text),
        None => print!("(no words available, q to quit) > "),
    }
    io::stdout().flush()?;
    Ok(())
}

fn run_practice(app: &mut App, snapshot_path: &std::path::Path) -> Result<()> {
    let events = EventHandler::new(Duration::from_millis(250), Some(snapshot_path));
    prompt(app)?;

    loop {
        match events.next()? {
            AppEvent::Input(line) => {
                let line = line.trim();
                match line {
                    "q" | "quit" => break,
                    "y" | "n" => {
                        if let Some(word) = app.current_word() {
                            let id = word.id;
                            let outcome = app.answer(id, line == "y")?;
                            if outcome.regenerated {
                                println!("-- new batch, session {} --", app.session_number());
                            }
                        }
                    }
                    "s" | "status" => print_status(app),
                    "b" | "batch" => print_batch(app),
                    _ => {
                        if let Some(category) = line.strip_prefix("c ") {
                            if let Err(err) = app.select_category(category.trim()) {
                                println!("{err}");
                            }
                        } else if !line.is_empty() {
                            println!("y = knew it, n = did not, s = status, b = batch, c <category>, q = quit");
                        }
                    }
                }
                // Each prompt cycle is a focus: pick up progress from other writers.
                if let TriggerOutcome::Reconciled(groups) =
                    app.handle_trigger(ReconciliationTrigger::Focus)
                {
                    println!("-- merged {} groups from another session --", groups.len());
                }
                prompt(app)?;
            }
            AppEvent::Trigger(trigger) => {
                if let TriggerOutcome::Reconciled(groups) = app.handle_trigger(trigger) {
                    println!();
                    println!("-- merged {} groups from another session --", groups.len());
                    prompt(app)?;
                }
            }
            AppEvent::Eof => break,
        }
    }
    println!();
    Ok(())
}
