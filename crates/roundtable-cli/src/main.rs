//! Roundtable operator CLI
//!
//! Loads a worker roster, binds each worker to a simulated executor, and
//! drives the dispatcher or a consensus round. Output is JSON on stdout;
//! logs go to stderr.
//!
//! # Usage
//!
//! ```bash
//! # Route (and optionally run) a task
//! roundtable --roster demos/roster.toml route --capability code_review --execute
//!
//! # Ask every worker and vote
//! roundtable --roster demos/roster.toml roundtable "Ship it?" --algorithm weighted
//!
//! # Inspect
//! roundtable --roster demos/roster.toml workers --capability code_review
//! RUST_LOG=roundtable=debug roundtable --roster demos/roster.toml health
//! ```

mod roster;

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tokio::task::JoinSet;
use tracing::{info, warn};

use roundtable::{
    Config, Dispatcher, DispatcherStatistics, Priority, Roundtable, RoundtableOptions,
    SharedDispatcher, TaskRequest, TieBreakRule, WorkerStatus,
};
use roster::Roster;

/// Command-line arguments
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Worker roster (TOML)
    #[arg(long, default_value = "roster.toml")]
    roster: PathBuf,

    /// Dispatcher and roundtable configuration (TOML, ROUNDTABLE_* env overrides apply)
    #[arg(long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Pick the best worker for a task
    Route {
        /// Task content
        #[arg(default_value = "")]
        content: String,

        /// Required capability
        #[arg(long)]
        capability: Option<String>,

        /// low, normal, high or critical
        #[arg(long, default_value = "normal")]
        priority: Priority,

        /// Time box (and latency filter) in milliseconds
        #[arg(long)]
        max_response_ms: Option<u64>,

        /// Run the task on the selected worker
        #[arg(long, default_value_t = false)]
        execute: bool,

        /// Dispatch this many copies concurrently (implies --execute)
        #[arg(long, default_value_t = 1)]
        repeat: usize,
    },

    /// Ask several workers the same question and vote
    Roundtable {
        /// Question put to every worker
        content: String,

        /// Worker ids (comma separated); defaults to the whole roster
        #[arg(long, value_delimiter = ',')]
        workers: Vec<String>,

        /// majority, weighted or borda
        #[arg(long)]
        algorithm: Option<String>,

        /// confidence, chair or random
        #[arg(long)]
        tie_break: Option<String>,

        /// Worker whose vote decides ties under the chair rule
        #[arg(long)]
        chair: Option<String>,

        /// Seed for the random tie-break rule
        #[arg(long)]
        seed: Option<u64>,

        /// Fraction of workers that must vote, in (0, 1]
        #[arg(long)]
        quorum: Option<f64>,

        /// Per-worker timeout in milliseconds
        #[arg(long)]
        timeout_ms: Option<u64>,

        /// Vote weight as worker=weight (repeatable)
        #[arg(long = "weight", value_parser = parse_weight)]
        weights: Vec<(String, f64)>,
    },

    /// Show one worker's profile
    Status {
        worker_id: String,
    },

    /// List workers
    Workers {
        #[arg(long)]
        capability: Option<String>,

        /// available, busy, offline, error or maintenance
        #[arg(long)]
        status: Option<WorkerStatus>,
    },

    /// Show dispatcher statistics
    Stats,

    /// Run a health check
    Health,
}

fn parse_weight(raw: &str) -> Result<(String, f64), String> {
    let (id, weight) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected worker=weight, got {raw}"))?;
    let weight: f64 = weight
        .trim()
        .parse()
        .map_err(|e| format!("bad weight for {id}: {e}"))?;
    Ok((id.trim().to_string(), weight))
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn load_config(path: Option<&PathBuf>) -> Result<Config> {
    match path {
        Some(path) => Config::load(path)
            .with_context(|| format!("Failed to load config {}", path.display())),
        None => {
            let mut config = Config::default();
            config.apply_env();
            config.validate()?;
            Ok(config)
        }
    }
}

fn build_dispatcher(config: &Config, roster: &Roster) -> Result<SharedDispatcher> {
    let dispatcher = Dispatcher::new(config.dispatcher.clone()).shared();
    for spec in &roster.workers {
        dispatcher
            .register(spec.profile(), spec.executor())
            .with_context(|| format!("Failed to register worker {}", spec.id))?;
    }
    info!(workers = roster.workers.len(), "Roster loaded");
    Ok(dispatcher)
}

#[derive(Serialize)]
struct RouteReport<T: Serialize> {
    outcomes: Vec<T>,
    statistics: DispatcherStatistics,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let args = Args::parse();
    let config = load_config(args.config.as_ref())?;
    let roster = Roster::load(&args.roster)?;
    let dispatcher = build_dispatcher(&config, &roster)?;

    match args.command {
        Command::Route {
            content,
            capability,
            priority,
            max_response_ms,
            execute,
            repeat,
        } => {
            let make_task = || {
                let mut task = TaskRequest::new(content.clone()).with_priority(priority);
                if let Some(capability) = &capability {
                    task = task.with_capability(capability.clone());
                }
                if let Some(ms) = max_response_ms {
                    task = task.with_max_response_time(Duration::from_millis(ms));
                }
                task
            };

            if !execute && repeat <= 1 {
                return print_json(&dispatcher.route(&make_task()));
            }

            // Each copy gets its own task id
            let mut join_set = JoinSet::new();
            for index in 0..repeat.max(1) {
                let dispatcher = dispatcher.clone();
                let task = make_task();
                join_set.spawn(async move { (index, dispatcher.dispatch(task).await) });
            }

            let mut outcomes = Vec::with_capacity(repeat);
            while let Some(res) = join_set.join_next().await {
                match res {
                    Ok(outcome) => outcomes.push(outcome),
                    Err(e) => warn!(error = %e, "Dispatch task panicked"),
                }
            }
            outcomes.sort_by_key(|(index, _)| *index);

            print_json(&RouteReport {
                outcomes: outcomes.into_iter().map(|(_, o)| o).collect(),
                statistics: dispatcher.get_statistics(),
            })
        }

        Command::Roundtable {
            content,
            workers,
            algorithm,
            tie_break,
            chair,
            seed,
            quorum,
            timeout_ms,
            weights,
        } => {
            let mut round_config = config.roundtable.clone();
            if let Some(algorithm) = algorithm {
                round_config.algorithm = algorithm;
            }
            if let Some(tie_break) = tie_break {
                round_config.tie_break = tie_break;
            }
            if chair.is_some() {
                round_config.chair = chair;
            }
            if let Some(seed) = seed {
                round_config.random_seed = seed;
            }
            if let Some(quorum) = quorum {
                round_config.quorum_ratio = quorum;
            }
            if let Some(ms) = timeout_ms {
                round_config.timeout_ms = ms;
            }

            let mut options = RoundtableOptions::from_config(&round_config)?;
            for (worker_id, weight) in weights {
                options = options.with_weight(worker_id, weight);
            }

            let worker_ids = if workers.is_empty() {
                roster.ids()
            } else {
                workers
            };
            if worker_ids.is_empty() {
                bail!("Roster {} has no workers", args.roster.display());
            }

            let roundtable = Roundtable::new(dispatcher, &round_config);
            let report = roundtable
                .execute_roundtable(&TaskRequest::new(content), &worker_ids, &options)
                .await?;
            describe_round(&options);
            print_json(&report)
        }

        Command::Status { worker_id } => match dispatcher.get_worker_status(&worker_id) {
            Some(profile) => print_json(&profile),
            None => bail!("Unknown worker: {worker_id}"),
        },

        Command::Workers { capability, status } => {
            print_json(&dispatcher.list_workers(capability.as_deref(), status))
        }

        Command::Stats => print_json(&dispatcher.get_statistics()),

        Command::Health => {
            let report = dispatcher.health_check();
            if !report.healthy {
                warn!(
                    online = report.online_workers,
                    available = report.available_workers,
                    stale = report.stale_workers.len(),
                    "Dispatcher unhealthy"
                );
            }
            print_json(&report)
        }
    }
}

fn describe_round(options: &RoundtableOptions) {
    let rule = match &options.tie_break {
        TieBreakRule::Confidence => "confidence".to_string(),
        TieBreakRule::Chair { worker_id } => format!("chair ({worker_id})"),
        TieBreakRule::Random { seed } => format!("random (seed {seed})"),
    };
    info!(
        algorithm = %options.algorithm,
        tie_break = %rule,
        quorum_ratio = options.quorum_ratio,
        timeout_ms = options.timeout.as_millis() as u64,
        "Round parameters"
    );
}
