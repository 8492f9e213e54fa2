//! Store, registry, and feedback overview for `taxo status`.
//!
//! Answers "is the cache complete, which models are active, and how much
//! human feedback is waiting for the next retrain".

use std::collections::BTreeMap;

use anyhow::Result;
use serde::Serialize;

use taxosync_core::ModelKey;

use crate::audit;
use crate::config::{Config, TrainingMode};
use crate::content_store::ContentStore;
use crate::db;
use crate::feedback;
use crate::lifecycle_store;
use crate::registry::{artifact_path, ModelRegistry};

#[derive(Debug, Serialize)]
pub struct ArtifactStatus {
    pub key: String,
    pub mode: TrainingMode,
    pub training_set_size: usize,
    pub trained_at: i64,
    pub accuracy: Option<f64>,
    pub bytes: u64,
}

#[derive(Debug, Serialize)]
pub struct StatusReport {
    pub store_path: String,
    pub store_bytes: u64,
    pub entries: usize,
    pub declared_count: usize,
    pub last_sync: Option<i64>,
    pub artifacts: Vec<ArtifactStatus>,
    pub missing_models: Vec<String>,
    pub labels: i64,
    pub suggestions: i64,
    pub records: i64,
    pub states: BTreeMap<String, i64>,
}

impl StatusReport {
    /// Whether the cached store holds every declared entry.
    pub fn store_complete(&self) -> bool {
        self.entries == self.declared_count
    }
}

pub async fn collect(config: &Config) -> Result<StatusReport> {
    let store = ContentStore::from_config(config);
    let catalog = store.load_or_default()?;
    let store_bytes = std::fs::metadata(store.path()).map(|m| m.len()).unwrap_or(0);

    let registry = ModelRegistry::open(&config.registry.dir)?;
    let artifacts = registry
        .artifacts()
        .iter()
        .map(|a| ArtifactStatus {
            key: a.key.to_string(),
            mode: a.mode,
            training_set_size: a.training_set_size,
            trained_at: a.trained_at.timestamp(),
            accuracy: a.accuracy,
            bytes: std::fs::metadata(artifact_path(registry.dir(), &a.key))
                .map(|m| m.len())
                .unwrap_or(0),
        })
        .collect();
    let missing_models = ModelKey::all()
        .iter()
        .filter(|k| registry.get(k).is_none())
        .map(|k| k.to_string())
        .collect();

    let pool = db::open(config).await?;
    let report = StatusReport {
        store_path: store.path().display().to_string(),
        store_bytes,
        entries: catalog.len(),
        declared_count: catalog.declared_count,
        last_sync: catalog.updated_at.map(|t| t.timestamp()),
        artifacts,
        missing_models,
        labels: feedback::label_count(&pool).await?,
        suggestions: audit::suggestion_count(&pool).await?,
        records: audit::record_count(&pool).await?,
        states: lifecycle_store::counts(&pool).await?,
    };
    pool.close().await;
    Ok(report)
}

/// Run the status command: collect and print a summary.
pub async fn run_status(config: &Config, json: bool) -> Result<()> {
    let report = collect(config).await?;
    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!("taxosync status");
    println!("===============");
    println!();
    println!("  Store:       {}", report.store_path);
    println!("  Size:        {}", format_bytes(report.store_bytes));
    println!(
        "  Entries:     {} / {} declared{}",
        report.entries,
        report.declared_count,
        if report.store_complete() { "" } else { "  (incomplete)" }
    );
    println!(
        "  Last sync:   {}",
        report
            .last_sync
            .map(format_ts_relative)
            .unwrap_or_else(|| "never".to_string())
    );

    println!();
    println!("  Models:      {} / 9 active", report.artifacts.len());
    if !report.artifacts.is_empty() {
        println!(
            "  {:<32} {:<11} {:>8} {:>9} {:>9}   {}",
            "KEY", "MODE", "EXAMPLES", "ACCURACY", "SIZE", "TRAINED"
        );
        println!("  {}", "-".repeat(88));
        for a in &report.artifacts {
            println!(
                "  {:<32} {:<11} {:>8} {:>9} {:>9}   {}",
                a.key,
                a.mode,
                a.training_set_size,
                a.accuracy
                    .map(|x| format!("{:.1}%", x * 100.0))
                    .unwrap_or_else(|| "-".to_string()),
                format_bytes(a.bytes),
                format_ts_relative(a.trained_at)
            );
        }
    }
    if !report.missing_models.is_empty() {
        println!("  Untrained:   {}", report.missing_models.join(", "));
    }

    println!();
    println!("  Labels:      {}", report.labels);
    println!("  Suggestions: {}", report.suggestions);
    println!("  Records:     {}", report.records);
    if !report.states.is_empty() {
        println!("  By state:");
        for (state, n) in &report.states {
            println!("    {:<18} {:>6}", state, n);
        }
    }
    println!();
    Ok(())
}

/// Format a byte count as a human-readable string.
fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}

/// Relative age such as "3 hours ago"; falls back to a date after 30 days.
fn format_ts_relative(ts: i64) -> String {
    let delta = chrono::Utc::now().timestamp() - ts;
    let plural = |n: i64| if n == 1 { "" } else { "s" };
    match delta {
        d if d < 0 => format_ts_iso(ts),
        d if d < 60 => "just now".to_string(),
        d if d < 3600 => format!("{} min{} ago", d / 60, plural(d / 60)),
        d if d < 86400 => format!("{} hour{} ago", d / 3600, plural(d / 3600)),
        d if d < 86400 * 30 => format!("{} day{} ago", d / 86400, plural(d / 86400)),
        _ => format_ts_iso(ts),
    }
}

fn format_ts_iso(ts: i64) -> String {
    chrono::DateTime::from_timestamp(ts, 0)
        .map(|dt| dt.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| ts.to_string())
}
