//! Change extraction: structured working-tree deltas since a baseline.
//!
//! All version-control access goes through the `git` binary. recap never
//! computes diffs from raw bytes itself; a project without a usable git
//! history fails extraction with `NotATrackedProject`.

use crate::core::error::RecapError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::process::Command;

/// Upper bound on captured diff text per file. Oversized diffs are truncated
/// for storage; marker extraction still sees the retained prefix.
pub const MAX_DIFF_BYTES: usize = 64 * 1024;

/// Opaque pointer into version-control history, used as the baseline for the
/// next capture. Tagged so baseline handling is pattern-matched, never
/// string-sniffed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum VcsReference {
    Commit { id: String },
    WorkingTree { as_of: DateTime<Utc> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeStatus {
    Added,
    Modified,
    Deleted,
}

/// Per-file change record. Line counts are `None` for binary files, where
/// line-oriented counts are undefined.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileChange {
    pub path: String,
    pub status: ChangeStatus,
    pub lines_added: Option<u64>,
    pub lines_removed: Option<u64>,
}

/// Raw unified-diff text for one changed file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileDiff {
    pub path: String,
    pub hunks: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangeSet {
    pub files: Vec<FileChange>,
    pub diffs: Vec<FileDiff>,
    /// Reference captured at extraction time; becomes the next baseline.
    pub current: VcsReference,
}

impl ChangeSet {
    /// No differences since the baseline. Still yields a valid (sparsely
    /// informative) capsule if the caller proceeds.
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

fn run_git(root: &Path, args: &[&str]) -> Result<String, RecapError> {
    let dir = root.to_str().unwrap_or(".");
    let mut cmd_args = vec!["-C", dir];
    cmd_args.extend_from_slice(args);
    let output = Command::new("git")
        .args(&cmd_args)
        .output()
        .map_err(RecapError::IoError)?;
    if !output.status.success() {
        return Err(RecapError::ValidationError(format!(
            "git {} failed: {}",
            args.join(" "),
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }
    Ok(String::from_utf8_lossy(&output.stdout).trim_end().to_string())
}

pub fn is_tracked(root: &Path) -> bool {
    run_git(root, &["rev-parse", "--is-inside-work-tree"])
        .map(|out| out.trim() == "true")
        .unwrap_or(false)
}

/// Resolve the reference that describes the repository right now: the HEAD
/// commit id, or a working-tree token when no commit exists yet.
pub fn current_reference(root: &Path) -> Result<VcsReference, RecapError> {
    if !is_tracked(root) {
        return Err(RecapError::NotATrackedProject {
            path: root.to_path_buf(),
        });
    }
    match run_git(root, &["rev-parse", "HEAD"]) {
        Ok(id) => Ok(VcsReference::Commit { id }),
        Err(_) => Ok(VcsReference::WorkingTree { as_of: Utc::now() }),
    }
}

/// Enumerate files differing between the baseline and the current working
/// tree, including uncommitted and untracked changes.
pub fn extract(root: &Path, baseline: Option<&VcsReference>) -> Result<ChangeSet, RecapError> {
    if !is_tracked(root) {
        return Err(RecapError::NotATrackedProject {
            path: root.to_path_buf(),
        });
    }

    let head = run_git(root, &["rev-parse", "HEAD"]).ok();
    let base: Option<String> = match baseline {
        Some(VcsReference::Commit { id }) => Some(id.clone()),
        // First capture or a working-tree baseline: diff against HEAD when
        // one exists, untracked enumeration only otherwise.
        _ => head.clone(),
    };

    let mut files: Vec<FileChange> = Vec::new();
    let mut diffs: Vec<FileDiff> = Vec::new();

    if let Some(base) = &base {
        for (path, status) in name_status(root, base)? {
            files.push(FileChange {
                path,
                status,
                lines_added: None,
                lines_removed: None,
            });
        }
        for (path, added, removed) in numstat(root, base)? {
            if let Some(fc) = files.iter_mut().find(|f| f.path == path) {
                fc.lines_added = added;
                fc.lines_removed = removed;
            }
        }
        for fc in &files {
            if fc.status == ChangeStatus::Deleted {
                continue;
            }
            // Binary files carry status only; there is no line diff to scan.
            if fc.lines_added.is_none() && fc.lines_removed.is_none() {
                continue;
            }
            let text = run_git(root, &["diff", base, "--", &fc.path])?;
            diffs.push(FileDiff {
                path: fc.path.clone(),
                hunks: truncate_utf8(&text, MAX_DIFF_BYTES),
            });
        }
    }

    for path in untracked_files(root)? {
        if files.iter().any(|f| f.path == path) {
            continue;
        }
        let (change, diff) = untracked_entry(root, &path);
        files.push(change);
        if let Some(diff) = diff {
            diffs.push(diff);
        }
    }

    files.sort_by(|a, b| a.path.cmp(&b.path));
    diffs.sort_by(|a, b| a.path.cmp(&b.path));

    let current = match head {
        Some(id) => VcsReference::Commit { id },
        None => VcsReference::WorkingTree { as_of: Utc::now() },
    };

    Ok(ChangeSet {
        files,
        diffs,
        current,
    })
}

fn name_status(root: &Path, base: &str) -> Result<Vec<(String, ChangeStatus)>, RecapError> {
    let out = run_git(root, &["diff", "--name-status", base])?;
    let mut entries = Vec::new();
    for line in out.lines() {
        let mut cols = line.split('\t');
        let Some(code) = cols.next() else { continue };
        // Renames and copies report "R100\told\tnew"; the new path is last.
        let Some(path) = cols.last().filter(|p| !p.is_empty()) else {
            continue;
        };
        let status = match code.chars().next() {
            Some('A') => ChangeStatus::Added,
            Some('D') => ChangeStatus::Deleted,
            _ => ChangeStatus::Modified,
        };
        entries.push((path.to_string(), status));
    }
    Ok(entries)
}

#[allow(clippy::type_complexity)]
fn numstat(root: &Path, base: &str) -> Result<Vec<(String, Option<u64>, Option<u64>)>, RecapError> {
    let out = run_git(root, &["diff", "--numstat", base])?;
    let mut entries = Vec::new();
    for line in out.lines() {
        let cols: Vec<&str> = line.splitn(3, '\t').collect();
        if cols.len() != 3 {
            continue;
        }
        // "-" in either column marks a binary file.
        let added = cols[0].parse::<u64>().ok();
        let removed = cols[1].parse::<u64>().ok();
        entries.push((cols[2].to_string(), added, removed));
    }
    Ok(entries)
}

fn untracked_files(root: &Path) -> Result<Vec<String>, RecapError> {
    let out = run_git(root, &["ls-files", "--others", "--exclude-standard"])?;
    Ok(out
        .lines()
        .map(|l| l.to_string())
        .filter(|p| !p.is_empty() && !p.starts_with(".recap/"))
        .collect())
}

/// Untracked files have no committed baseline; the whole file is the
/// addition. A synthetic single-hunk diff keeps marker scanning uniform.
fn untracked_entry(root: &Path, path: &str) -> (FileChange, Option<FileDiff>) {
    let full = root.join(path);
    match fs::read_to_string(&full) {
        Ok(content) => {
            let line_count = content.lines().count() as u64;
            let mut hunks = format!("@@ -0,0 +1,{} @@\n", line_count);
            for line in content.lines() {
                hunks.push('+');
                hunks.push_str(line);
                hunks.push('\n');
            }
            (
                FileChange {
                    path: path.to_string(),
                    status: ChangeStatus::Added,
                    lines_added: Some(line_count),
                    lines_removed: Some(0),
                },
                Some(FileDiff {
                    path: path.to_string(),
                    hunks: truncate_utf8(&hunks, MAX_DIFF_BYTES),
                }),
            )
        }
        // Unreadable as text: record with status only.
        Err(_) => (
            FileChange {
                path: path.to_string(),
                status: ChangeStatus::Added,
                lines_added: None,
                lines_removed: None,
            },
            None,
        ),
    }
}

fn truncate_utf8(s: &str, max_bytes: usize) -> String {
    if s.len() <= max_bytes {
        return s.to_string();
    }
    let mut end = max_bytes;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    s[..end].to_string()
}
