//! Workspace registry: the machine-wide catalogue of tracked projects.
//!
//! The registry is a JSONL event log (`~/.recap/data/workspaces.jsonl`) of
//! register/remove events, folded into a path set on read. Capsule counts
//! and last-activity timestamps are always recomputed from each project's
//! store at call time; the registry never trusts its own derived numbers.

use crate::core::error::RecapError;
use crate::core::output;
use crate::core::schemas;
use crate::core::store::{PROJECT_DIR_NAME, Store};
use crate::core::time;
use crate::plugins::capsule::{Capsule, CapsuleStore};
use chrono::{DateTime, Utc};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{self, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

#[derive(Serialize, Deserialize, Debug, Clone)]
struct RegistryEvent {
    ts: String,
    event_id: String,
    event_type: String, // "register" | "remove"
    root_path: PathBuf,
}

#[derive(Debug, Clone, Serialize)]
pub struct WorkspaceInfo {
    pub root_path: PathBuf,
    pub capsule_count: u64,
    pub last_activity: Option<DateTime<Utc>>,
}

/// Result of a bounded-depth discovery walk. Partial results are first-class:
/// unreadable subtrees are reported as warnings, never as a failure of the
/// whole call.
#[derive(Debug, Clone)]
pub struct DiscoveryOutcome {
    pub found: Vec<PathBuf>,
    pub warnings: Vec<String>,
}

pub struct Registry {
    log_path: PathBuf,
}

impl Registry {
    pub fn open() -> Result<Self, RecapError> {
        let store = Store::user()?;
        fs::create_dir_all(&store.root).map_err(RecapError::IoError)?;
        Ok(Registry {
            log_path: store.root.join(schemas::REGISTRY_LOG_NAME),
        })
    }

    /// Idempotent: re-registering a path keeps a single entry.
    pub fn register(&self, root_path: &Path) -> Result<(), RecapError> {
        self.append_event("register", root_path)
    }

    /// Explicit removal; never a side effect of queries.
    pub fn remove(&self, root_path: &Path) -> Result<(), RecapError> {
        self.append_event("remove", root_path)
    }

    fn append_event(&self, event_type: &str, root_path: &Path) -> Result<(), RecapError> {
        let ev = RegistryEvent {
            ts: time::now_rfc3339(),
            event_id: time::new_event_id(),
            event_type: event_type.to_string(),
            root_path: root_path.to_path_buf(),
        };
        let mut f = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.log_path)
            .map_err(RecapError::IoError)?;
        writeln!(f, "{}", serde_json::to_string(&ev).unwrap()).map_err(RecapError::IoError)?;
        f.sync_all().map_err(RecapError::IoError)?;
        Ok(())
    }

    /// Fold the event log into the current set of registered roots.
    pub fn registered_roots(&self) -> Result<Vec<PathBuf>, RecapError> {
        if !self.log_path.is_file() {
            return Ok(Vec::new());
        }
        let f = OpenOptions::new()
            .read(true)
            .open(&self.log_path)
            .map_err(RecapError::IoError)?;
        let reader = BufReader::new(f);
        let mut live: BTreeMap<PathBuf, bool> = BTreeMap::new();
        for (idx, line) in reader.lines().enumerate() {
            let line = line.map_err(RecapError::IoError)?;
            if line.trim().is_empty() {
                continue;
            }
            let ev: RegistryEvent =
                serde_json::from_str(&line).map_err(|e| RecapError::StoreCorrupt {
                    path: self.log_path.clone(),
                    detail: format!("unparseable registry event at line {}: {}", idx + 1, e),
                })?;
            match ev.event_type.as_str() {
                "register" => {
                    live.insert(ev.root_path, true);
                }
                "remove" => {
                    live.insert(ev.root_path, false);
                }
                other => {
                    return Err(RecapError::StoreCorrupt {
                        path: self.log_path.clone(),
                        detail: format!(
                            "unknown registry event type '{}' at line {}",
                            other,
                            idx + 1
                        ),
                    });
                }
            }
        }
        Ok(live
            .into_iter()
            .filter_map(|(path, alive)| alive.then_some(path))
            .collect())
    }

    /// Registered workspaces with stats recomputed from each store.
    /// Stores that no longer open are dropped with a warning diagnostic.
    pub fn list(&self) -> Result<Vec<WorkspaceInfo>, RecapError> {
        let mut out = Vec::new();
        for root in self.registered_roots()? {
            let store = Store::project(&root);
            let capsule_store = CapsuleStore::open(&store);
            if !capsule_store.is_initialized() {
                output::warn(&format!(
                    "dropping workspace {}: store is missing or was deleted externally",
                    root.display()
                ));
                continue;
            }
            match (capsule_store.count(), capsule_store.last_activity()) {
                (Ok(capsule_count), Ok(last_activity)) => out.push(WorkspaceInfo {
                    root_path: root,
                    capsule_count,
                    last_activity,
                }),
                (Err(e), _) | (_, Err(e)) => {
                    output::warn(&format!(
                        "dropping workspace {}: {}",
                        root.display(),
                        e
                    ));
                }
            }
        }
        Ok(out)
    }

    /// Walk the scan roots looking for initialized project stores, register
    /// every hit, and return what was found plus any unreadable subtrees.
    pub fn discover(
        &self,
        scan_roots: &[PathBuf],
        max_depth: usize,
    ) -> Result<DiscoveryOutcome, RecapError> {
        let mut outcome = DiscoveryOutcome {
            found: Vec::new(),
            warnings: Vec::new(),
        };
        for scan_root in scan_roots {
            if !scan_root.is_dir() {
                continue;
            }
            walk(scan_root, max_depth, &mut outcome);
        }
        outcome.found.sort();
        outcome.found.dedup();
        for root in &outcome.found {
            self.register(root)?;
        }
        Ok(outcome)
    }
}

fn walk(dir: &Path, depth_left: usize, outcome: &mut DiscoveryOutcome) {
    // A tracked project is a leaf for discovery purposes; never descend into
    // one looking for nested projects.
    if dir.join(PROJECT_DIR_NAME).join("data").is_dir() {
        outcome.found.push(dir.to_path_buf());
        return;
    }
    if depth_left == 0 {
        return;
    }
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            outcome
                .warnings
                .push(format!("{}: {}", dir.display(), e));
            return;
        }
    };
    for entry in entries {
        let Ok(entry) = entry else { continue };
        let path = entry.path();
        if !path.is_dir() {
            continue;
        }
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if name.starts_with('.') {
            continue;
        }
        walk(&path, depth_left - 1, outcome);
    }
}

/// Fan a keyword search out across every registered store. Per-store failure
/// isolation: one corrupt store reports its error alongside the other
/// projects' results instead of aborting the aggregate.
pub fn search_all(
    registry: &Registry,
    keyword: &str,
) -> Result<Vec<(PathBuf, Result<Vec<Capsule>, RecapError>)>, RecapError> {
    let roots = registry.registered_roots()?;
    let mut results: Vec<(PathBuf, Result<Vec<Capsule>, RecapError>)> = roots
        .into_par_iter()
        .map(|root| {
            let store = Store::project(&root);
            let result = CapsuleStore::open(&store).search(keyword);
            (root, result)
        })
        .collect();
    results.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(results)
}

/// Assemble the capsule subset sent as context to the external ask/summarize
/// collaborator: the latest `limit` capsules, optionally keyword-filtered.
pub fn select_context(
    capsule_store: &CapsuleStore,
    keyword: Option<&str>,
    limit: usize,
) -> Result<Vec<Capsule>, RecapError> {
    let mut capsules = match keyword {
        Some(kw) => capsule_store.search(kw)?,
        None => {
            let mut all = capsule_store.list(&Default::default())?;
            all.reverse();
            all
        }
    };
    capsules.truncate(limit);
    Ok(capsules)
}
