//! # taxosync CLI (`taxo`)
//!
//! ## Usage
//!
//! ```bash
//! taxo --config ./config/taxo.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `taxo init` | Create the SQLite database and the registry directory |
//! | `taxo sync` | Refresh the content store from the remote (count-verified) |
//! | `taxo train` | Train or retrain the (channel, algorithm) models |
//! | `taxo classify` | Suggest a taxonomy label for a stored or ad-hoc entry |
//! | `taxo label <id>` | Record a human correction |
//! | `taxo confirm <id>` | Accept the latest suggestion |
//! | `taxo status` | Store, registry, and feedback overview |
//!
//! ## Exit status
//!
//! | Code | Meaning |
//! |------|---------|
//! | 0 | success |
//! | 1 | any other failure |
//! | 3 | sync integrity check failed; store untouched |
//! | 4 | a model artifact could not be written; previous artifact kept |

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use taxosync::cancel::CancelFlag;
use taxosync::classify::EnsembleClassifier;
use taxosync::config::{self, Config, TrainingMode};
use taxosync::content_store::ContentStore;
use taxosync::error::exit_code;
use taxosync::feedback::CorrectionFeedback;
use taxosync::progress::ProgressMode;
use taxosync::registry::ModelRegistry;
use taxosync::training::{self, KeyOutcome, TrainRequest};
use taxosync::{db, migrate, status, sync};
use taxosync_core::ensemble::TaxonomySuggestion;
use taxosync_core::{Algorithm, Channel, ContentEntry};

/// taxosync: count-verified content sync and ensemble taxonomy classification.
#[derive(Parser)]
#[command(name = "taxo", version)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/taxo.toml")]
    config: PathBuf,

    /// Progress output on stderr: `auto`, `off`, `human`, or `json`.
    #[arg(long, global = true, default_value = "auto")]
    progress: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema and registry directory. Idempotent.
    Init,

    /// Refresh the content store from the configured remote.
    ///
    /// The store is replaced only when the number of fetched entries equals
    /// the number the remote declared. On mismatch the store is untouched
    /// and the command exits with status 3.
    Sync {
        /// Fetch and verify, but do not write the store.
        #[arg(long)]
        dry_run: bool,

        #[arg(long)]
        json: bool,
    },

    /// Train models from the content store and human labels.
    Train {
        /// `production` (all examples, persisted) or `validation` (holdout
        /// accuracy, persisted only with --save). Defaults to the config.
        #[arg(long)]
        mode: Option<String>,

        /// Restrict to these channels (repeatable).
        #[arg(long = "channel")]
        channels: Vec<String>,

        /// Restrict to these algorithms (repeatable).
        #[arg(long = "algorithm")]
        algorithms: Vec<String>,

        /// Persist validation-mode models.
        #[arg(long)]
        save: bool,

        #[arg(long)]
        json: bool,
    },

    /// Suggest a taxonomy label.
    ///
    /// Either `--id` of a stored entry, or free text via `--title`,
    /// `--description`, and `--tags`.
    Classify {
        #[arg(long, conflicts_with_all = ["title", "description", "tags"])]
        id: Option<String>,

        #[arg(long)]
        title: Option<String>,

        #[arg(long)]
        description: Option<String>,

        /// Comma-separated tags.
        #[arg(long, value_delimiter = ',')]
        tags: Vec<String>,

        /// Do not write audit records or lifecycle state.
        #[arg(long)]
        no_record: bool,

        #[arg(long)]
        json: bool,
    },

    /// Record a human label for an entry.
    Label {
        id: String,

        #[arg(long)]
        label: String,

        /// Channel(s) the label applies to (repeatable, or `all`).
        #[arg(long = "channel", default_value = "all")]
        channels: Vec<String>,
    },

    /// Accept the latest suggestion for an entry as its label.
    Confirm { id: String },

    /// Show store, registry, and feedback status.
    Status {
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    if let Err(err) = run(cli).await {
        eprintln!("Error: {:#}", err);
        std::process::exit(exit_code(&err));
    }
}

async fn run(cli: Cli) -> Result<()> {
    let cfg = config::load_config(&cli.config)?;
    let progress = cli.progress.parse::<ProgressMode>()?.reporter();
    let cancel = CancelFlag::new();
    cancel.install_ctrl_c();

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            ModelRegistry::open(&cfg.registry.dir)?;
            println!("Database initialized successfully.");
        }
        Commands::Sync { dry_run, json } => {
            let info = sync::run_sync(&cfg, dry_run, cancel, progress.as_ref()).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&info)?);
            } else {
                println!(
                    "{} {} / {} entries over {} page(s): {} added, {} changed, {} unchanged, {} removed{}",
                    if info.dry_run { "Verified" } else { "Synced" },
                    info.fetched_count,
                    info.declared_count,
                    info.pages,
                    info.added,
                    info.changed,
                    info.unchanged,
                    info.removed,
                    if info.dry_run {
                        " (dry run, store not written)"
                    } else if !info.written {
                        " (store already up to date)"
                    } else {
                        ""
                    }
                );
            }
        }
        Commands::Train {
            mode,
            channels,
            algorithms,
            save,
            json,
        } => {
            let mut request = TrainRequest::all(&cfg);
            if let Some(mode) = mode {
                request.mode = mode.parse::<TrainingMode>()?;
            }
            if !channels.is_empty() {
                request.channels = parse_channels(&channels)?;
            }
            if !algorithms.is_empty() {
                request.algorithms = algorithms
                    .iter()
                    .map(|a| a.parse::<Algorithm>())
                    .collect::<Result<_>>()?;
            }
            request.save = save;

            let report = training::run_train(&cfg, &request, cancel, progress.as_ref()).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                println!("Training ({})", report.mode);
                for k in &report.keys {
                    let outcome = match &k.outcome {
                        KeyOutcome::Trained {
                            accuracy,
                            persisted,
                        } => format!(
                            "trained{}{}",
                            accuracy
                                .map(|a| format!("  accuracy {:.1}%", a * 100.0))
                                .unwrap_or_default(),
                            if *persisted { "" } else { "  (not saved)" }
                        ),
                        KeyOutcome::Skipped { reason } => format!("skipped: {}", reason),
                    };
                    println!(
                        "  {:<30} {:>5} ex {:>3} cls   {}",
                        k.key().to_string(),
                        k.examples,
                        k.classes,
                        outcome
                    );
                }
                let skipped = report.skipped().count();
                if skipped > 0 {
                    println!(
                        "  warning: {} key(s) skipped; their previous artifacts stay active",
                        skipped
                    );
                }
                if report.consumed_entries > 0 {
                    println!("  {} labeled entr(ies) consumed", report.consumed_entries);
                }
            }
        }
        Commands::Classify {
            id,
            title,
            description,
            tags,
            no_record,
            json,
        } => {
            let entry = resolve_entry(&cfg, id, title, description, tags)?;
            let registry = ModelRegistry::open(&cfg.registry.dir)?;
            let classifier = EnsembleClassifier::new(&registry, &cfg);
            let suggestion = if no_record {
                classifier.classify(&entry)
            } else {
                let pool = db::open(&cfg).await?;
                let s = classifier.classify_and_record(&pool, &entry).await?;
                pool.close().await;
                s
            };
            if json {
                println!("{}", serde_json::to_string_pretty(&suggestion)?);
            } else {
                print_suggestion(&suggestion);
            }
        }
        Commands::Label {
            id,
            label,
            channels,
        } => {
            let channels = parse_channels(&channels)?;
            let pool = db::open(&cfg).await?;
            let fb = CorrectionFeedback::new(pool.clone(), ContentStore::from_config(&cfg));
            let written = fb.correct(&id, &channels, &label).await?;
            println!(
                "Labeled {} as '{}' on {} channel(s); state {}",
                id,
                label.trim(),
                written.len(),
                fb.state(&id).await?
            );
            pool.close().await;
        }
        Commands::Confirm { id } => {
            let pool = db::open(&cfg).await?;
            let fb = CorrectionFeedback::new(pool.clone(), ContentStore::from_config(&cfg));
            let written = fb.confirm(&id).await?;
            let label = written.first().map(|l| l.label.as_str()).unwrap_or_default();
            println!("Confirmed {} as '{}'", id, label);
            pool.close().await;
        }
        Commands::Status { json } => {
            status::run_status(&cfg, json).await?;
        }
    }

    Ok(())
}

fn parse_channels(values: &[String]) -> Result<Vec<Channel>> {
    if values.iter().any(|v| v == "all") {
        return Ok(Channel::ALL.to_vec());
    }
    let mut out: Vec<Channel> = Vec::new();
    for v in values {
        let c: Channel = v.parse()?;
        if !out.contains(&c) {
            out.push(c);
        }
    }
    Ok(out)
}

fn resolve_entry(
    cfg: &Config,
    id: Option<String>,
    title: Option<String>,
    description: Option<String>,
    tags: Vec<String>,
) -> Result<ContentEntry> {
    if let Some(id) = id {
        let catalog = ContentStore::from_config(cfg).load_or_default()?;
        return catalog
            .get(&id)
            .cloned()
            .with_context(|| format!("No entry '{}' in the content store", id));
    }
    let title = title.unwrap_or_default();
    let description = description.unwrap_or_default();
    let tags: Vec<String> = tags
        .iter()
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
        .collect();
    Ok(ContentEntry::from_text(&title, &description, &tags))
}

fn print_suggestion(s: &TaxonomySuggestion) {
    println!(
        "{}  {}  confidence {:.3}  ({}{})",
        s.content_id,
        s.label,
        s.confidence,
        s.decision.as_str(),
        if s.low_confidence { ", low confidence" } else { "" }
    );
    for c in &s.channels {
        let votes: Vec<String> = c
            .votes
            .iter()
            .map(|v| match &v.prediction {
                Some(p) => format!("{}={} {:.2}", v.algorithm, p.label, p.confidence),
                None => format!("{}=-", v.algorithm),
            })
            .collect();
        println!(
            "  {:<12} {:<20} {:.3}  [{}]",
            c.channel.as_str(),
            c.label.as_deref().unwrap_or("-"),
            c.confidence,
            votes.join(", ")
        );
    }
}
