//! Progress stream parser.
//!
//! Pure transform over the decoded build/pull event sequence: computes a
//! percentage from the progress counters, maps known status strings to
//! display text and de-duplicates repeated per-layer updates. An event
//! carrying an error field always raises; it is never swallowed.

use std::collections::HashSet;

use serde::Deserialize;

use crate::constants::{FORMAT_GRAY, FORMAT_RESET};
use crate::error::{EngineError, Result};

/// One decoded event from a newline-delimited JSON build/pull/push stream.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProgressEvent {
    pub status: Option<String>,
    pub id: Option<String>,
    #[serde(rename = "progressDetail")]
    pub progress_detail: Option<ProgressCounts>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProgressCounts {
    pub current: Option<i64>,
    pub total: Option<i64>,
}

/// Rendered form of one event.
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressUpdate {
    pub percent: u8,
    pub display: String,
    pub id: Option<String>,
    /// True when this (layer, status) pair was already reported.
    pub repeat: bool,
}

/// Stateful fold over a finite event sequence. State is only the set of
/// seen layer/status pairs used for de-duplication.
#[derive(Debug, Default)]
pub struct ProgressParser {
    seen: HashSet<String>,
}

impl ProgressParser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn parse(&mut self, event: &ProgressEvent) -> Result<ProgressUpdate> {
        if let Some(message) = &event.error {
            return Err(EngineError::Stream(message.clone()));
        }

        let status = event.status.as_deref().unwrap_or("");
        let percent = event
            .progress_detail
            .as_ref()
            .and_then(|counts| match (counts.current, counts.total) {
                (Some(current), Some(total)) if total > 0 => {
                    Some((current as f64 / total as f64 * 100.0) as u8)
                }
                _ => None,
            })
            .unwrap_or(0);

        let key = format!("{}:{}", event.id.as_deref().unwrap_or(""), status);
        let repeat = !self.seen.insert(key);

        Ok(ProgressUpdate {
            percent,
            display: display_status(status).to_string(),
            id: event.id.clone(),
            repeat,
        })
    }
}

/// Fixed lookup from engine status strings to display text; unknown
/// statuses pass through unchanged.
fn display_status(status: &str) -> &str {
    match status {
        "Downloading" => "Downloading layer",
        "Download complete" => "Layer downloaded",
        "Extracting" => "Extracting layer",
        "Pull complete" => "Layer pulled",
        "Already exists" => "Layer already exists",
        "Pushing" => "Pushing layer",
        "Pushed" => "Layer pushed",
        "Waiting" => "Waiting for layer",
        other => other,
    }
}

/// Print one update. Repeated zero-progress updates for a layer are
/// suppressed; progressing layers keep reporting their percentage.
pub fn render(update: &ProgressUpdate) {
    if update.display.is_empty() || (update.repeat && update.percent == 0) {
        return;
    }
    match &update.id {
        Some(id) if update.percent > 0 => println!(
            "{}{}{} {} {}%",
            FORMAT_GRAY, id, FORMAT_RESET, update.display, update.percent
        ),
        Some(id) => println!("{}{}{} {}", FORMAT_GRAY, id, FORMAT_RESET, update.display),
        None => println!("{}", update.display),
    }
}
