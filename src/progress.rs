//! Batch ingestion progress reporting.
//!
//! Reports observable progress during `dynarag batch` so users see how many
//! chunks are done, how many failed, and whether the run was cancelled.
//! Progress is emitted on **stderr** so stdout remains parseable for scripts.

use std::io::{IsTerminal, Write};

/// A single progress event for a batch.
#[derive(Clone, Debug)]
pub enum BatchProgressEvent {
    /// The batch is starting with `total` chunks.
    Started { total: usize },
    /// One chunk finished, successfully or not.
    ChunkDone {
        file_path: String,
        ok: bool,
        completed: usize,
        failed: usize,
        total: usize,
    },
    /// All launched chunks have finished.
    Finished {
        completed: usize,
        failed: usize,
        total: usize,
        cancelled: bool,
    },
}

/// Reports batch progress. Implementations write to stderr (human or JSON).
pub trait BatchProgressReporter: Send + Sync {
    /// Emit a progress event. Called from the batch coordinator.
    fn report(&self, event: BatchProgressEvent);
}

/// Human-friendly progress on stderr: "batch  1,234 / 5,000 chunks  (2 failed)".
pub struct StderrProgress;

impl BatchProgressReporter for StderrProgress {
    fn report(&self, event: BatchProgressEvent) {
        let line = match &event {
            BatchProgressEvent::Started { total } => {
                format!("batch  starting  {} chunks\n", format_number(*total as u64))
            }
            BatchProgressEvent::ChunkDone {
                completed,
                failed,
                total,
                ..
            } => format!(
                "batch  {} / {} chunks  ({} failed)\n",
                format_number((*completed + *failed) as u64),
                format_number(*total as u64),
                format_number(*failed as u64)
            ),
            BatchProgressEvent::Finished {
                completed,
                failed,
                total,
                cancelled,
            } => format!(
                "batch  done  {} ok, {} failed, {} total{}\n",
                format_number(*completed as u64),
                format_number(*failed as u64),
                format_number(*total as u64),
                if *cancelled { "  (cancelled)" } else { "" }
            ),
        };
        let mut stderr = std::io::stderr().lock();
        let _ = stderr.write_all(line.as_bytes());
        let _ = stderr.flush();
    }
}

/// Machine-readable progress: one JSON object per line on stderr.
pub struct JsonProgress;

impl BatchProgressReporter for JsonProgress {
    fn report(&self, event: BatchProgressEvent) {
        let obj = match &event {
            BatchProgressEvent::Started { total } => serde_json::json!({
                "event": "started",
                "total": total
            }),
            BatchProgressEvent::ChunkDone {
                file_path,
                ok,
                completed,
                failed,
                total,
            } => serde_json::json!({
                "event": "chunk",
                "file_path": file_path,
                "ok": ok,
                "completed": completed,
                "failed": failed,
                "total": total
            }),
            BatchProgressEvent::Finished {
                completed,
                failed,
                total,
                cancelled,
            } => serde_json::json!({
                "event": "finished",
                "completed": completed,
                "failed": failed,
                "total": total,
                "cancelled": cancelled
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

impl BatchProgressReporter for NoProgress {
    fn report(&self, _event: BatchProgressEvent) {}
}

fn format_number(n: u64) -> String {
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
#[derive(Clone, Copy, Debug, Eq, PartialEq, clap::ValueEnum)]
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
    pub fn reporter(&self) -> Box<dyn BatchProgressReporter> {
        match self {
            ProgressMode::Off => Box::new(NoProgress),
            ProgressMode::Human => Box::new(StderrProgress),
            ProgressMode::Json => Box::new(JsonProgress),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_number_comma() {
        assert_eq!(format_number(0), "0");
        assert_eq!(format_number(999), "999");
        assert_eq!(format_number(1000), "1,000");
        assert_eq!(format_number(1_234_567), "1,234,567");
    }
}
