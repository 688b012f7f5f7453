#![forbid(unsafe_code)]

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tokio::sync::mpsc;

use mathometer::config::ExperimentConfig;
use mathometer::plan::{build_session_plan, PlanOptions};
use mathometer::progress::{ProgressStore, SqliteProgressStore, Subject};
use mathometer::record::{DirRecordSink, ParamsSnapshot, RecordSink};
use mathometer::response::{KEY_LEFT, KEY_RIGHT};
use mathometer::session::{
    run_session, spawn_scripted_responder, AutoOperator, SessionDeps, SessionOutcome,
};
use mathometer::trial::SimulatedMediaPlayer;
use mathometer::{content, IntervalFrameSync};

#[derive(Parser)]
#[command(name = "mathometer", version, about = "MathOMeter experiment core CLI")]
struct Cli {
    /// Path to the progress database.
    #[arg(long, default_value = "mathometer_progress.sqlite")]
    progress_db: PathBuf,
    /// Optional experiment config JSON; defaults apply when omitted.
    #[arg(long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build the subject's session plan and write the params snapshot
    Plan {
        #[arg(long)]
        subject: u32,
        #[arg(long, default_value = "data/all_sentences_info.json")]
        sentences: PathBuf,
        #[arg(long, default_value = "data/sentence_to_character.json")]
        associations: PathBuf,
        #[arg(long, default_value = "out")]
        out: PathBuf,
        /// Seed for reproducible stimulus ordering
        #[arg(long)]
        seed: Option<u64>,
    },
    /// Run a full headless session with a scripted responder
    Simulate {
        #[arg(long)]
        subject: u32,
        #[arg(long, default_value = "data/all_sentences_info.json")]
        sentences: PathBuf,
        #[arg(long, default_value = "data/sentence_to_character.json")]
        associations: PathBuf,
        #[arg(long, default_value = "out")]
        out: PathBuf,
        #[arg(long)]
        seed: Option<u64>,
        /// Duration multiplier; 0.01 compresses a session ~100x
        #[arg(long, default_value_t = 0.01)]
        time_scale: f64,
        /// Seconds between scripted key presses (before time scaling)
        #[arg(long, default_value_t = 2.0)]
        respond_every_s: f64,
    },
    /// Show or reset a subject's stored progress
    Progress {
        #[arg(long)]
        subject: u32,
        #[arg(long)]
        reset: bool,
    },
}

fn load_config(path: Option<&PathBuf>) -> Result<ExperimentConfig, Box<dyn std::error::Error>> {
    match path {
        Some(path) => Ok(ExperimentConfig::load(path)?),
        None => Ok(ExperimentConfig::default()),
    }
}

fn parse_subject(n: u32) -> Result<Subject, Box<dyn std::error::Error>> {
    Subject::new(n).ok_or_else(|| "subject number must be >= 1".into())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = load_config(cli.config.as_ref())?;

    match cli.command {
        Commands::Plan {
            subject,
            sentences,
            associations,
            out,
            seed,
        } => {
            let subject = parse_subject(subject)?;
            let store = SqliteProgressStore::new(&cli.progress_db)?;
            let sentences = content::load_sentences(&sentences)?;
            let associations = content::load_associations(&associations)?;
            let plan = build_session_plan(
                &store,
                subject,
                &sentences,
                &associations,
                &config,
                &PlanOptions { rng_seed: seed },
            )
            .await?;

            let sink = DirRecordSink::new(&out)?;
            sink.record_params(&ParamsSnapshot::from_plan(&plan))?;
            println!(
                "subject {} plan: run order {:?}, last completed run {}",
                subject.key(),
                plan.run_order,
                plan.last_run_completed
            );
        }
        Commands::Simulate {
            subject,
            sentences,
            associations,
            out,
            seed,
            time_scale,
            respond_every_s,
        } => {
            let subject = parse_subject(subject)?;
            let mut config = config;
            config.time_scale = time_scale;
            config.validate()?;

            let store = Arc::new(SqliteProgressStore::new(&cli.progress_db)?);
            let sentences = content::load_sentences(&sentences)?;
            let associations = content::load_associations(&associations)?;
            let plan = build_session_plan(
                store.as_ref(),
                subject,
                &sentences,
                &associations,
                &config,
                &PlanOptions { rng_seed: seed },
            )
            .await?;

            let (tx, rx) = mpsc::channel(64);
            spawn_scripted_responder(
                tx,
                config.scaled(respond_every_s),
                vec![KEY_RIGHT, KEY_LEFT],
            );

            let deps = SessionDeps {
                store,
                sink: Arc::new(DirRecordSink::new(&out)?),
                player: Arc::new(SimulatedMediaPlayer::from_config(&config)),
                operator: Arc::new(AutoOperator),
                frame_sync: Arc::new(IntervalFrameSync::new(config.frame_period())),
                input_rx: rx,
            };

            match run_session(deps, &plan, &config).await? {
                SessionOutcome::AlreadyComplete => {
                    println!("subject {} has already completed all runs", subject.key());
                }
                SessionOutcome::Completed { runs_executed } => {
                    println!(
                        "subject {}: {} run(s) executed, records in {}",
                        subject.key(),
                        runs_executed,
                        out.display()
                    );
                }
            }
        }
        Commands::Progress { subject, reset } => {
            let subject = parse_subject(subject)?;
            let store = SqliteProgressStore::new(&cli.progress_db)?;
            if reset {
                store.reset(subject).await?;
                println!("subject {} progress cleared", subject.key());
                return Ok(());
            }
            match store.load(subject).await? {
                None => println!(
                    "subject {}: no stored progress in {}",
                    subject.key(),
                    store.path().display()
                ),
                Some(record) => {
                    println!(
                        "subject {}: run order {:?}, last completed run {} ({})",
                        subject.key(),
                        record.run_order,
                        record.last_run_completed,
                        store.path().display()
                    );
                }
            }
        }
    }

    Ok(())
}
