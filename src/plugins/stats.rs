//! Analytics over one project's capsule log.
//!
//! Purely derived and recomputed on demand; there is no cached state to
//! invalidate. An empty store produces a zeroed report, never an error.

use crate::core::error::RecapError;
use crate::plugins::capsule::CapsuleStore;
use chrono::{Datelike, Timelike};
use rustc_hash::FxHashMap;
use serde::Serialize;

#[derive(Debug, Clone, Serialize, Default)]
pub struct StatsReport {
    pub session_count: u64,
    pub files_changed_total: u64,
    pub lines_added_total: u64,
    pub lines_removed_total: u64,
    pub marker_count: u64,
    /// path -> number of capsules touching it, descending by count.
    pub per_file_change_count: Vec<(String, u64)>,
    /// tag -> usage count, descending by count.
    pub tag_distribution: Vec<(String, u64)>,
    /// Sessions per (weekday 0=Mon .. 6=Sun, hour 0..23).
    pub activity_by_weekday_hour: [[u64; 24]; 7],
}

pub fn stats(capsule_store: &CapsuleStore) -> Result<StatsReport, RecapError> {
    let capsules = capsule_store.read_log()?;

    let mut report = StatsReport {
        session_count: capsules.len() as u64,
        ..Default::default()
    };
    let mut file_counts: FxHashMap<String, u64> = FxHashMap::default();
    let mut tag_counts: FxHashMap<String, u64> = FxHashMap::default();

    for capsule in &capsules {
        report.files_changed_total += capsule.files_changed.len() as u64;
        report.lines_added_total += capsule.lines_added();
        report.lines_removed_total += capsule.lines_removed();
        report.marker_count += capsule.markers.len() as u64;

        for fc in &capsule.files_changed {
            *file_counts.entry(fc.path.clone()).or_default() += 1;
        }
        for tag in &capsule.tags {
            *tag_counts.entry(tag.clone()).or_default() += 1;
        }

        let weekday = capsule.created_at.weekday().num_days_from_monday() as usize;
        let hour = capsule.created_at.hour() as usize;
        report.activity_by_weekday_hour[weekday][hour] += 1;
    }

    report.per_file_change_count = sorted_desc(file_counts);
    report.tag_distribution = sorted_desc(tag_counts);
    Ok(report)
}

fn sorted_desc(counts: FxHashMap<String, u64>) -> Vec<(String, u64)> {
    let mut out: Vec<(String, u64)> = counts.into_iter().collect();
    out.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
    out
}
