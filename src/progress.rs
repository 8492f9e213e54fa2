//! Sync and training progress reporting.
//!
//! Progress goes to **stderr** so stdout stays parseable (`taxo classify
//! --json`). Human mode is the default on a TTY; otherwise progress is off
//! unless JSON lines are requested.

use std::io::Write;

/// A single progress event.
#[derive(Clone, Debug)]
pub enum ProgressEvent {
    /// One remote page enumerated.
    Fetching {
        source: String,
        page: usize,
        fetched: usize,
        declared: usize,
    },
    /// One (channel, algorithm) training task finished or was skipped.
    Training {
        key: String,
        n: usize,
        total: usize,
        outcome: &'static str,
    },
}

/// Reports progress. Implementations write to stderr (human or JSON).
pub trait ProgressReporter: Send + Sync {
    fn report(&self, event: ProgressEvent);
}

/// Human-friendly progress: `sync file:dump.json  page 3  1,200 / 5,000 items`.
pub struct StderrProgress;

impl ProgressReporter for StderrProgress {
    fn report(&self, event: ProgressEvent) {
        let line = match &event {
            ProgressEvent::Fetching {
                source,
                page,
                fetched,
                declared,
            } => format!(
                "sync {}  page {}  {} / {} items\n",
                source,
                page,
                format_number(*fetched as u64),
                format_number(*declared as u64)
            ),
            ProgressEvent::Training {
                key,
                n,
                total,
                outcome,
            } => format!("train [{}/{}] {}  {}\n", n, total, key, outcome),
        };
        let mut err = std::io::stderr().lock();
        let _ = err.write_all(line.as_bytes());
        let _ = err.flush();
    }
}

/// Machine-readable progress: one JSON object per line on stderr.
pub struct JsonProgress;

impl ProgressReporter for JsonProgress {
    fn report(&self, event: ProgressEvent) {
        if let Ok(line) = serde_json::to_string(&event.to_json()) {
            let mut err = std::io::stderr().lock();
            let _ = writeln!(err, "{}", line);
            let _ = err.flush();
        }
    }
}

impl ProgressEvent {
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            ProgressEvent::Fetching {
                source,
                page,
                fetched,
                declared,
            } => serde_json::json!({
                "phase": "fetching",
                "source": source,
                "page": page,
                "fetched": fetched,
                "declared": declared
            }),
            ProgressEvent::Training {
                key,
                n,
                total,
                outcome,
            } => serde_json::json!({
                "phase": "training",
                "key": key,
                "done": n,
                "total": total,
                "outcome": outcome
            }),
        }
    }
}

/// No-op reporter when progress is disabled.
pub struct NoProgress;

impl ProgressReporter for NoProgress {
    fn report(&self, _event: ProgressEvent) {}
}

pub(crate) fn format_number(n: u64) -> String {
    let digits = n.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    out
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ProgressMode {
    Off,
    Human,
    Json,
}

impl ProgressMode {
    /// Human progress when stderr is a TTY, otherwise off.
    pub fn default_for_tty() -> Self {
        if atty::is(atty::Stream::Stderr) {
            ProgressMode::Human
        } else {
            ProgressMode::Off
        }
    }

    pub fn reporter(self) -> Box<dyn ProgressReporter> {
        match self {
            ProgressMode::Off => Box::new(NoProgress),
            ProgressMode::Human => Box::new(StderrProgress),
            ProgressMode::Json => Box::new(JsonProgress),
        }
    }
}

impl std::str::FromStr for ProgressMode {
    type Err = anyhow::Error;

    /// `auto` resolves against the current stderr.
    fn from_str(s: &str) -> anyhow::Result<Self> {
        match s {
            "auto" => Ok(Self::default_for_tty()),
            "off" | "none" => Ok(ProgressMode::Off),
            "human" => Ok(ProgressMode::Human),
            "json" => Ok(ProgressMode::Json),
            other => anyhow::bail!(
                "Unknown progress mode: '{}'. Must be auto, off, human, or json.",
                other
            ),
        }
    }
}
