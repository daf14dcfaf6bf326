//! Sync progress reporting.
//!
//! Reports observable progress during `quaff sync` so users see which page
//! is being fetched and how far mapping has got. Progress is emitted on
//! **stderr** so stdout remains parseable for scripts.

use std::io::{IsTerminal, Write};

/// A single progress event for sync.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SyncProgressEvent {
    /// A page request is about to be sent.
    Fetching { alias: String, page: u64 },
    /// Item `n` of the current page's `total` has been mapped.
    Mapping { alias: String, n: u64, total: u64 },
    /// The endpoint pass ended.
    Finished {
        alias: String,
        written: u64,
        failed: u64,
    },
}

/// Reports sync progress. Implementations write to stderr (human or JSON).
pub trait SyncProgressReporter: Send + Sync {
    /// Emit a progress event. Called from the endpoint sync loop.
    fn report(&self, event: SyncProgressEvent);
}

/// Human-friendly progress on stderr: "sync list:items  mapping  12 / 50 items".
pub struct StderrProgress;

impl SyncProgressReporter for StderrProgress {
    fn report(&self, event: SyncProgressEvent) {
        let line = match &event {
            SyncProgressEvent::Fetching { alias, page } => {
                format!("sync {}  fetching page {}\n", alias, page)
            }
            SyncProgressEvent::Mapping { alias, n, total } => format!(
                "sync {}  mapping  {} / {} items\n",
                alias,
                format_number(*n),
                format_number(*total)
            ),
            SyncProgressEvent::Finished {
                alias,
                written,
                failed,
            } => format!(
                "sync {}  done  {} written, {} failed\n",
                alias,
                format_number(*written),
                format_number(*failed)
            ),
        };
        let mut stderr = std::io::stderr().lock();
        let _ = stderr.write_all(line.as_bytes());
        let _ = stderr.flush();
    }
}

/// Machine-readable progress: one JSON object per line on stderr.
pub struct JsonProgress;

impl JsonProgress {
    fn to_json(event: &SyncProgressEvent) -> serde_json::Value {
        match event {
            SyncProgressEvent::Fetching { alias, page } => serde_json::json!({
                "event": "progress",
                "alias": alias,
                "phase": "fetching",
                "page": page
            }),
            SyncProgressEvent::Mapping { alias, n, total } => serde_json::json!({
                "event": "progress",
                "alias": alias,
                "phase": "mapping",
                "n": n,
                "total": total
            }),
            SyncProgressEvent::Finished {
                alias,
                written,
                failed,
            } => serde_json::json!({
                "event": "finished",
                "alias": alias,
                "written": written,
                "failed": failed
            }),
        }
    }
}

impl SyncProgressReporter for JsonProgress {
    fn report(&self, event: SyncProgressEvent) {
        if let Ok(line) = serde_json::to_string(&Self::to_json(&event)) {
            let mut stderr = std::io::stderr().lock();
            let _ = writeln!(stderr, "{}", line);
            let _ = stderr.flush();
        }
    }
}

/// No-op reporter when progress is disabled.
pub struct NoProgress;

impl SyncProgressReporter for NoProgress {
    fn report(&self, _event: SyncProgressEvent) {}
}

fn format_number(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::with_capacity(s.len() + (s.len() - 1) / 3);
    let chars: Vec<char> = s.chars().rev().collect();
    for (i, c) in chars.iter().enumerate() {
        if i > 0 && i % 3 == 0 {
            result.push(',');
        }
        result.push(*c);
    }
    result.chars().rev().collect()
}

/// Progress mode for the CLI: off, human (stderr), or JSON (stderr).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ProgressMode {
    Off,
    Human,
    Json,
}

impl ProgressMode {
    /// Default: human progress when stderr is a TTY, otherwise off.
    pub fn default_for_tty() -> Self {
        if std::io::stderr().is_terminal() {
            ProgressMode::Human
        } else {
            ProgressMode::Off
        }
    }

    /// Build a reporter for this mode.
    pub fn reporter(&self) -> Box<dyn SyncProgressReporter> {
        match self {
            ProgressMode::Off => Box::new(NoProgress),
            ProgressMode::Human => Box::new(StderrProgress),
            ProgressMode::Json => Box::new(JsonProgress),
        }
    }
}
