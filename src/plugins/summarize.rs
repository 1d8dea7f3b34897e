//! Summarization collaborator boundary.
//!
//! The core hands a payload of changed files, markers, and the caller's note
//! to a `Summarizer` and gets back free text. Any provider error or timeout
//! degrades to the empty-summary sentinel; a capture is never lost because
//! summarization failed. The call always runs before the store lock is
//! taken, so a slow provider cannot block other writers.

use crate::core::changes::{ChangeStatus, FileChange};
use crate::core::error::RecapError;
use crate::core::markers::Marker;
use crate::core::output;
use serde::{Deserialize, Serialize};
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SummaryPayload {
    pub files_changed: Vec<FileChange>,
    pub markers: Vec<Marker>,
    pub message: Option<String>,
}

pub trait Summarizer: Send + 'static {
    fn summarize(&self, payload: &SummaryPayload) -> Result<String, RecapError>;
}

/// Deterministic fallback used when no external provider is configured.
/// Builds a single factual sentence from the payload.
pub struct RuleBasedSummarizer;

impl Summarizer for RuleBasedSummarizer {
    fn summarize(&self, payload: &SummaryPayload) -> Result<String, RecapError> {
        if payload.files_changed.is_empty() {
            return Ok("No code changes detected; session captured for tracking.".to_string());
        }

        let added = payload
            .files_changed
            .iter()
            .filter(|f| f.status == ChangeStatus::Added)
            .count();
        let deleted = payload
            .files_changed
            .iter()
            .filter(|f| f.status == ChangeStatus::Deleted)
            .count();
        let modified = payload.files_changed.len() - added - deleted;

        let mut parts = Vec::new();
        if modified > 0 {
            parts.push(format!("modified {} file(s)", modified));
        }
        if added > 0 {
            parts.push(format!("added {} file(s)", added));
        }
        if deleted > 0 {
            parts.push(format!("deleted {} file(s)", deleted));
        }

        let names: Vec<&str> = payload
            .files_changed
            .iter()
            .take(3)
            .map(|f| f.path.as_str())
            .collect();
        let mut summary = format!("Worked on {}: {}", names.join(", "), parts.join(", "));
        if !payload.markers.is_empty() {
            summary.push_str(&format!(
                "; left {} open marker(s)",
                payload.markers.len()
            ));
        }
        summary.push('.');
        Ok(summary)
    }
}

/// Run the summarizer on a worker thread with an upper bound on wall time.
///
/// Returns the empty sentinel on timeout or provider error, reporting the
/// degradation as a warning. The provider thread is detached on timeout; it
/// holds no store handles, so an eventual late result is simply dropped.
pub fn summarize_with_timeout<S: Summarizer>(
    summarizer: S,
    payload: SummaryPayload,
    timeout: Duration,
) -> String {
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        let result = summarizer.summarize(&payload);
        let _ = tx.send(result);
    });

    match rx.recv_timeout(timeout) {
        Ok(Ok(summary)) => summary,
        Ok(Err(e)) => {
            output::warn(&format!(
                "{}; capturing with empty summary",
                RecapError::SummarizationUnavailable(e.to_string())
            ));
            String::new()
        }
        Err(_) => {
            output::warn(&format!(
                "{}; capturing with empty summary",
                RecapError::SummarizationUnavailable(format!(
                    "timed out after {}s",
                    timeout.as_secs()
                ))
            ));
            String::new()
        }
    }
}
