//! Capture pipeline: change extraction, marker scanning, summarization, and
//! the final append into the project's capsule store.

use crate::core::changes;
use crate::core::config::RecapConfig;
use crate::core::error::RecapError;
use crate::core::markers;
use crate::core::store::Store;
use crate::plugins::capsule::{Capsule, CapsuleDraft, CapsuleStore};
use crate::plugins::registry::Registry;
use crate::plugins::summarize::{
    RuleBasedSummarizer, SummaryPayload, summarize_with_timeout,
};
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Default)]
pub struct CaptureOptions {
    pub tags: Vec<String>,
    pub message: Option<String>,
    pub no_summary: bool,
    pub timeout_secs: Option<u64>,
}

/// Initialize tracking for a project: verify the version-control context,
/// create the store, and register the workspace machine-wide.
pub fn start(project_root: &Path) -> Result<Store, RecapError> {
    if !changes::is_tracked(project_root) {
        return Err(RecapError::NotATrackedProject {
            path: project_root.to_path_buf(),
        });
    }
    let store = Store::project(project_root);
    CapsuleStore::open(&store).init()?;
    Registry::open()?.register(project_root)?;
    Ok(store)
}

/// Capture the current working state as a new immutable capsule.
///
/// The summarizer runs before the store lock is taken; only id allocation
/// and the durable append happen inside the critical section. An empty
/// change-set still captures: the capsule is sparsely informative, never
/// silently dropped.
pub fn capture(
    project_root: &Path,
    config: &RecapConfig,
    opts: &CaptureOptions,
) -> Result<Capsule, RecapError> {
    let store = Store::project(project_root);
    let capsule_store = CapsuleStore::open(&store);
    if !capsule_store.is_initialized() {
        return Err(RecapError::NotFound(format!(
            "no capsule store in project {}. Run `recap start` first.",
            project_root.display()
        )));
    }

    let baseline = capsule_store.last_reference()?;
    let change_set = changes::extract(project_root, baseline.as_ref())?;
    let found_markers = markers::extract_markers(&change_set, &config.marker_keywords)?;

    let summary = if opts.no_summary {
        String::new()
    } else {
        let payload = SummaryPayload {
            files_changed: change_set.files.clone(),
            markers: found_markers.clone(),
            message: opts.message.clone(),
        };
        let timeout = Duration::from_secs(opts.timeout_secs.unwrap_or(config.summary_timeout_secs));
        summarize_with_timeout(RuleBasedSummarizer, payload, timeout)
    };

    let draft = CapsuleDraft {
        summary,
        message: opts.message.clone(),
        tags: opts.tags.clone(),
        files_changed: change_set.files,
        markers: found_markers,
        reference: change_set.current,
    };
    capsule_store.append_new(draft)
}
