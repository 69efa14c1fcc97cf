//! Load progress reporting.
//!
//! Reports observable progress during `archie load` so users see the arXiv
//! query running and how many papers have been embedded and stored so far.
//! Progress is emitted on **stderr** so stdout keeps only the load summary.

use std::io::Write;

/// A single progress event for `load`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LoadProgressEvent {
    /// The paper source is being queried. Total unknown.
    Fetching { topic: String, category: String },
    /// A batch has been embedded and upserted: `loaded` of `total` papers.
    Loading { loaded: u64, total: u64 },
}

/// Reports load progress. Implementations write to stderr (human or JSON).
pub trait LoadProgressReporter: Send + Sync {
    /// Emit a progress event. Called from the ingestion pipeline.
    fn report(&self, event: LoadProgressEvent);
}

/// Human-friendly progress on stderr: "...Loaded 1,200 / 2,000 papers into the collection".
pub struct StderrProgress;

impl LoadProgressReporter for StderrProgress {
    fn report(&self, event: LoadProgressEvent) {
        let line = match &event {
            LoadProgressEvent::Fetching { topic, category } => {
                format!("Querying arXiv for '{}' in {}...\n", topic, category)
            }
            LoadProgressEvent::Loading { loaded, total } => format!(
                "...Loaded {} / {} papers into the collection\n",
                format_number(*loaded),
                format_number(*total)
            ),
        };
        let mut stderr = std::io::stderr().lock();
        let _ = stderr.write_all(line.as_bytes());
        let _ = stderr.flush();
    }
}

/// Machine-readable progress: one JSON object per line on stderr.
pub struct JsonProgress;

impl LoadProgressReporter for JsonProgress {
    fn report(&self, event: LoadProgressEvent) {
        let obj = match &event {
            LoadProgressEvent::Fetching { topic, category } => serde_json::json!({
                "event": "progress",
                "phase": "fetching",
                "topic": topic,
                "category": category
            }),
            LoadProgressEvent::Loading { loaded, total } => serde_json::json!({
                "event": "progress",
                "phase": "loading",
                "loaded": loaded,
                "total": total
            }),
        };
        if let Ok(line) = serde_json::to_string(&obj) {
            let mut stderr = std::io::stderr().lock();
            let _ = writeln!(stderr, "{}", line);
            let _ = stderr.flush();
        }
    }
}

/// No-op reporter when progress is disabled.
pub struct NoProgress;

impl LoadProgressReporter for NoProgress {
    fn report(&self, _event: LoadProgressEvent) {}
}

pub fn format_number(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::with_capacity(s.len() + (s.len() - 1) / 3);
    for (i, c) in s.chars().rev().enumerate() {
        if i > 0 && i % 3 == 0 {
            result.push(',');
        }
        result.push(c);
    }
    result.chars().rev().collect()
}

/// Progress mode for the CLI: off, human (stderr), or JSON (stderr).
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, clap::ValueEnum)]
pub enum ProgressMode {
    Off,
    #[default]
    Human,
    Json,
}

impl ProgressMode {
    /// Build a reporter for this mode. Caller passes it to the ingestion pipeline.
    pub fn reporter(&self) -> Box<dyn LoadProgressReporter> {
        match self {
            ProgressMode::Off => Box::new(NoProgress),
            ProgressMode::Human => Box::new(StderrProgress),
            ProgressMode::Json => Box::new(JsonProgress),
        }
    }
}
