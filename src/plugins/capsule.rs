//! Capsule model and per-project store.
//!
//! A capsule is an immutable record of one captured session. The store is an
//! append-only JSONL log (`capsules.jsonl`, source of truth) plus a SQLite
//! index (`capsules.db`) for id, time-range, tag, and keyword queries. The
//! index is a cache: whenever it disagrees with the log it is rebuilt from
//! the log before any query runs.

use crate::core::broker::DbBroker;
use crate::core::changes::{FileChange, VcsReference};
use crate::core::db;
use crate::core::error::RecapError;
use crate::core::markers::Marker;
use crate::core::schemas;
use crate::core::store::Store;
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, params};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs::{self, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Capsule {
    pub id: u64,
    pub created_at: DateTime<Utc>,
    pub summary: String,
    pub message: Option<String>,
    pub tags: Vec<String>,
    pub files_changed: Vec<FileChange>,
    pub markers: Vec<Marker>,
    pub reference: VcsReference,
    pub content_hash: String,
}

/// Everything a capsule holds except the store-allocated identity.
#[derive(Debug, Clone)]
pub struct CapsuleDraft {
    pub summary: String,
    pub message: Option<String>,
    pub tags: Vec<String>,
    pub files_changed: Vec<FileChange>,
    pub markers: Vec<Marker>,
    pub reference: VcsReference,
}

impl CapsuleDraft {
    /// Seal the draft into an immutable capsule. Tags are deduplicated and
    /// sorted; the content hash covers every field.
    fn seal(mut self, id: u64, created_at: DateTime<Utc>) -> Capsule {
        self.tags.sort();
        self.tags.dedup();
        let mut capsule = Capsule {
            id,
            created_at,
            summary: self.summary,
            message: self.message,
            tags: self.tags,
            files_changed: self.files_changed,
            markers: self.markers,
            reference: self.reference,
            content_hash: String::new(),
        };
        capsule.content_hash = capsule.computed_hash_hex();
        capsule
    }
}

/// Hash input: the capsule with its hash field blanked.
#[derive(Serialize)]
struct CanonicalCapsule<'a> {
    id: u64,
    created_at: &'a DateTime<Utc>,
    summary: &'a str,
    message: &'a Option<String>,
    tags: &'a [String],
    files_changed: &'a [FileChange],
    markers: &'a [Marker],
    reference: &'a VcsReference,
}

impl Capsule {
    pub fn computed_hash_hex(&self) -> String {
        let canonical = CanonicalCapsule {
            id: self.id,
            created_at: &self.created_at,
            summary: &self.summary,
            message: &self.message,
            tags: &self.tags,
            files_changed: &self.files_changed,
            markers: &self.markers,
            reference: &self.reference,
        };
        let bytes = serde_json::to_vec(&canonical).expect("capsule serializes");
        let mut hasher = Sha256::new();
        hasher.update(&bytes);
        format!("{:x}", hasher.finalize())
    }

    pub fn lines_added(&self) -> u64 {
        self.files_changed
            .iter()
            .filter_map(|f| f.lines_added)
            .sum()
    }

    pub fn lines_removed(&self) -> u64 {
        self.files_changed
            .iter()
            .filter_map(|f| f.lines_removed)
            .sum()
    }
}

#[derive(Debug, Clone, Default)]
pub struct ListFilter {
    /// Inclusive lower bound on `created_at`.
    pub since: Option<DateTime<Utc>>,
    /// Inclusive upper bound on `created_at`.
    pub until: Option<DateTime<Utc>>,
    /// Keep capsules whose tag set intersects this set. Empty = no filter.
    pub tags: Vec<String>,
}

/// Per-project capsule store handle.
pub struct CapsuleStore {
    store: Store,
}

impl CapsuleStore {
    pub fn open(store: &Store) -> Self {
        CapsuleStore {
            store: store.clone(),
        }
    }

    pub fn log_path(&self) -> PathBuf {
        db::capsule_log_path(&self.store.root)
    }

    pub fn db_path(&self) -> PathBuf {
        db::capsule_db_path(&self.store.root)
    }

    fn display_root(&self) -> PathBuf {
        self.store.display_root().to_path_buf()
    }

    /// Create the store directory, an empty log, and the index schema.
    pub fn init(&self) -> Result<(), RecapError> {
        fs::create_dir_all(&self.store.root).map_err(RecapError::IoError)?;
        if !self.log_path().exists() {
            fs::write(self.log_path(), "").map_err(RecapError::IoError)?;
        }
        let broker = DbBroker::new(&self.store.root);
        broker.with_conn(&self.db_path(), "recap", "capsule.init", |conn| {
            ensure_schema(conn)?;
            Ok(())
        })
    }

    pub fn is_initialized(&self) -> bool {
        self.log_path().is_file()
    }

    /// Append a pre-sealed capsule. Fails with `DuplicateId` unless the id is
    /// strictly greater than the store's current maximum.
    pub fn append(&self, capsule: &Capsule) -> Result<(), RecapError> {
        let broker = DbBroker::new(&self.store.root);
        broker.with_write_txn(&self.db_path(), "recap", "capsule.append", |conn| {
            ensure_schema(conn)?;
            self.reindex_if_stale(conn)?;
            let max_id = max_id(conn)?;
            if capsule.id <= max_id {
                return Err(RecapError::DuplicateId {
                    path: self.display_root(),
                    id: capsule.id,
                });
            }
            self.append_locked(conn, capsule)
        })
    }

    /// Allocate the next id and append in one critical section. This is the
    /// capture path: the summarizer has already run by the time we get here,
    /// so the lock is held only for allocation-through-flush.
    pub fn append_new(&self, draft: CapsuleDraft) -> Result<Capsule, RecapError> {
        let broker = DbBroker::new(&self.store.root);
        broker.with_write_txn(&self.db_path(), "recap", "capsule.append", |conn| {
            ensure_schema(conn)?;
            self.reindex_if_stale(conn)?;
            let id = max_id(conn)? + 1;
            let capsule = draft.clone().seal(id, Utc::now());
            self.append_locked(conn, &capsule)?;
            Ok(capsule)
        })
    }

    /// Durably write the log line, then mirror it into the index. The log
    /// write is flushed and synced before this returns; the surrounding
    /// transaction commit publishes the index row.
    fn append_locked(&self, conn: &Connection, capsule: &Capsule) -> Result<(), RecapError> {
        let line = serde_json::to_string(capsule).expect("capsule serializes");
        let mut f = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.log_path())
            .map_err(RecapError::IoError)?;
        writeln!(f, "{}", line).map_err(RecapError::IoError)?;
        f.flush().map_err(RecapError::IoError)?;
        f.sync_all().map_err(RecapError::IoError)?;

        insert_capsule(conn, capsule, &line)?;
        bump_indexed_lines(conn, 1)?;
        Ok(())
    }

    pub fn get(&self, id: u64) -> Result<Capsule, RecapError> {
        self.with_fresh_index("capsule.get", |conn| {
            let payload: Option<String> = conn
                .query_row(
                    "SELECT payload FROM capsules WHERE id = ?1",
                    params![id as i64],
                    |row| row.get(0),
                )
                .optional()
                .map_err(RecapError::RusqliteError)?;
            match payload {
                Some(p) => self.parse_payload(&p),
                None => Err(RecapError::NotFound(format!(
                    "capsule {} in project {}",
                    id,
                    self.display_root().display()
                ))),
            }
        })
    }

    /// All capsules matching the filter, ascending id order.
    pub fn list(&self, filter: &ListFilter) -> Result<Vec<Capsule>, RecapError> {
        let since = filter.since.map(|t| t.timestamp());
        let until = filter.until.map(|t| t.timestamp());
        let tags = filter.tags.clone();
        self.with_fresh_index("capsule.list", |conn| {
            let mut stmt = conn.prepare(
                "SELECT payload FROM capsules
                 WHERE (?1 IS NULL OR created_at_unix >= ?1)
                   AND (?2 IS NULL OR created_at_unix <= ?2)
                 ORDER BY id ASC",
            )?;
            let payloads: Vec<String> = stmt
                .query_map(params![since, until], |row| row.get(0))?
                .collect::<Result<_, _>>()
                .map_err(RecapError::RusqliteError)?;
            let mut out = Vec::with_capacity(payloads.len());
            for p in payloads {
                let capsule = self.parse_payload(&p)?;
                if !tags.is_empty() && !capsule.tags.iter().any(|t| tags.contains(t)) {
                    continue;
                }
                out.push(capsule);
            }
            Ok(out)
        })
    }

    /// Case-insensitive substring match over summary, message, and tags.
    /// Most recent first: recency is the relevance signal for a developer's
    /// own history.
    pub fn search(&self, keyword: &str) -> Result<Vec<Capsule>, RecapError> {
        let needle = keyword.to_lowercase();
        self.with_fresh_index("capsule.search", |conn| {
            let mut stmt = conn.prepare(
                "SELECT payload FROM capsules ORDER BY created_at_unix DESC, id DESC",
            )?;
            let payloads: Vec<String> = stmt
                .query_map([], |row| row.get(0))?
                .collect::<Result<_, _>>()
                .map_err(RecapError::RusqliteError)?;
            let mut out = Vec::new();
            for p in payloads {
                let capsule = self.parse_payload(&p)?;
                let hit = capsule.summary.to_lowercase().contains(&needle)
                    || capsule
                        .message
                        .as_deref()
                        .map(|m| m.to_lowercase().contains(&needle))
                        .unwrap_or(false)
                    || capsule.tags.iter().any(|t| t.to_lowercase().contains(&needle));
                if hit {
                    out.push(capsule);
                }
            }
            Ok(out)
        })
    }

    /// Baseline for the next capture: the reference of the newest capsule.
    pub fn last_reference(&self) -> Result<Option<VcsReference>, RecapError> {
        self.with_fresh_index("capsule.last_reference", |conn| {
            let payload: Option<String> = conn
                .query_row(
                    "SELECT payload FROM capsules ORDER BY id DESC LIMIT 1",
                    [],
                    |row| row.get(0),
                )
                .optional()
                .map_err(RecapError::RusqliteError)?;
            match payload {
                Some(p) => Ok(Some(self.parse_payload(&p)?.reference)),
                None => Ok(None),
            }
        })
    }

    pub fn count(&self) -> Result<u64, RecapError> {
        self.with_fresh_index("capsule.count", |conn| {
            let n: i64 = conn.query_row("SELECT COUNT(*) FROM capsules", [], |row| row.get(0))?;
            Ok(n as u64)
        })
    }

    pub fn last_activity(&self) -> Result<Option<DateTime<Utc>>, RecapError> {
        self.with_fresh_index("capsule.last_activity", |conn| {
            let ts: Option<String> = conn
                .query_row(
                    "SELECT created_at FROM capsules ORDER BY id DESC LIMIT 1",
                    [],
                    |row| row.get(0),
                )
                .optional()
                .map_err(RecapError::RusqliteError)?;
            Ok(ts.and_then(|t| {
                DateTime::parse_from_rfc3339(&t)
                    .ok()
                    .map(|d| d.with_timezone(&Utc))
            }))
        })
    }

    /// Rebuild the index from the log unconditionally.
    pub fn rebuild(&self) -> Result<u64, RecapError> {
        let broker = DbBroker::new(&self.store.root);
        broker.with_write_txn(&self.db_path(), "recap", "capsule.rebuild", |conn| {
            ensure_schema(conn)?;
            self.reindex(conn)
        })
    }

    /// Remove capsules created strictly before `cutoff`. Deletion is an
    /// explicit destructive operation: the log is rewritten atomically
    /// (tmp + rename) and the index rebuilt from the surviving records.
    pub fn cleanup_before(
        &self,
        cutoff: DateTime<Utc>,
        dry_run: bool,
    ) -> Result<u64, RecapError> {
        let capsules = self.read_log()?;
        let (old, kept): (Vec<_>, Vec<_>) =
            capsules.into_iter().partition(|c| c.created_at < cutoff);
        if dry_run || old.is_empty() {
            return Ok(old.len() as u64);
        }

        let broker = DbBroker::new(&self.store.root);
        broker.with_write_txn(&self.db_path(), "recap", "capsule.cleanup", |conn| {
            ensure_schema(conn)?;
            let tmp = self.store.root.join(".capsules.jsonl.tmp");
            let mut f = OpenOptions::new()
                .create(true)
                .write(true)
                .truncate(true)
                .open(&tmp)
                .map_err(RecapError::IoError)?;
            for capsule in &kept {
                writeln!(f, "{}", serde_json::to_string(capsule).expect("capsule serializes"))
                    .map_err(RecapError::IoError)?;
            }
            f.flush().map_err(RecapError::IoError)?;
            f.sync_all().map_err(RecapError::IoError)?;
            fs::rename(&tmp, self.log_path()).map_err(RecapError::IoError)?;

            self.reindex(conn)?;
            Ok(old.len() as u64)
        })
    }

    /// Parse and verify the whole log. Source of truth for rebuilds and for
    /// the analytics engine.
    pub fn read_log(&self) -> Result<Vec<Capsule>, RecapError> {
        let path = self.log_path();
        if !path.is_file() {
            return Err(RecapError::NotFound(format!(
                "no capsule store in project {}. Run `recap start` first.",
                self.display_root().display()
            )));
        }
        let f = OpenOptions::new()
            .read(true)
            .open(&path)
            .map_err(RecapError::IoError)?;
        let reader = BufReader::new(f);
        let mut out = Vec::new();
        for (idx, line) in reader.lines().enumerate() {
            let line = line.map_err(RecapError::IoError)?;
            if line.trim().is_empty() {
                continue;
            }
            let capsule: Capsule = serde_json::from_str(&line).map_err(|e| {
                RecapError::StoreCorrupt {
                    path: self.display_root(),
                    detail: format!("unparseable record at {}:{}: {}", path.display(), idx + 1, e),
                }
            })?;
            if capsule.content_hash != capsule.computed_hash_hex() {
                return Err(RecapError::StoreCorrupt {
                    path: self.display_root(),
                    detail: format!(
                        "content hash mismatch for capsule {} at {}:{}",
                        capsule.id,
                        path.display(),
                        idx + 1
                    ),
                });
            }
            out.push(capsule);
        }
        Ok(out)
    }

    fn parse_payload(&self, payload: &str) -> Result<Capsule, RecapError> {
        serde_json::from_str(payload).map_err(|e| RecapError::StoreCorrupt {
            path: self.display_root(),
            detail: format!("unparseable index payload: {}", e),
        })
    }

    /// Read-only entry point: open a connection, heal the index if the log
    /// has drifted (external edits, crashed writer), then run the query.
    fn with_fresh_index<F, R>(&self, op: &str, f: F) -> Result<R, RecapError>
    where
        F: FnOnce(&Connection) -> Result<R, RecapError>,
    {
        let broker = DbBroker::new(&self.store.root);
        broker.with_conn(&self.db_path(), "recap", op, |conn| {
            ensure_schema(conn)?;
            conn.execute_batch("BEGIN IMMEDIATE;")?;
            let healed = self.reindex_if_stale(conn);
            match healed {
                Ok(()) => {
                    conn.execute_batch("COMMIT;")?;
                }
                Err(e) => {
                    let _ = conn.execute_batch("ROLLBACK;");
                    return Err(e);
                }
            }
            f(conn)
        })
    }

    /// Detect drift between the log and the index. A record-count mismatch
    /// or a tail record the index disagrees with triggers a rebuild from the
    /// log; a tail record that fails to parse or hash-verify is corruption
    /// and surfaces instead of being silently repaired.
    fn reindex_if_stale(&self, conn: &Connection) -> Result<(), RecapError> {
        let (actual, last_line) = self.log_tail()?;
        let indexed = indexed_lines(conn)?;
        if indexed != actual {
            self.reindex(conn)?;
            return Ok(());
        }
        let Some(line) = last_line else {
            return Ok(());
        };

        let tail: Capsule =
            serde_json::from_str(&line).map_err(|e| RecapError::StoreCorrupt {
                path: self.display_root(),
                detail: format!(
                    "unparseable record at {}:{}: {}",
                    self.log_path().display(),
                    actual,
                    e
                ),
            })?;
        if tail.content_hash != tail.computed_hash_hex() {
            return Err(RecapError::StoreCorrupt {
                path: self.display_root(),
                detail: format!(
                    "content hash mismatch for capsule {} at {}:{}",
                    tail.id,
                    self.log_path().display(),
                    actual
                ),
            });
        }

        let row: Option<(i64, String)> = conn
            .query_row(
                "SELECT id, content_hash FROM capsules ORDER BY id DESC LIMIT 1",
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()
            .map_err(RecapError::RusqliteError)?;
        let in_sync = matches!(
            row,
            Some((id, ref hash)) if id as u64 == tail.id && *hash == tail.content_hash
        );
        if !in_sync {
            self.reindex(conn)?;
        }
        Ok(())
    }

    fn reindex(&self, conn: &Connection) -> Result<u64, RecapError> {
        conn.execute("DELETE FROM capsule_tags", [])?;
        conn.execute("DELETE FROM capsules", [])?;
        let capsules = self.read_log()?;
        for capsule in &capsules {
            let line = serde_json::to_string(capsule).expect("capsule serializes");
            insert_capsule(conn, capsule, &line)?;
        }
        set_indexed_lines(conn, capsules.len() as u64)?;
        Ok(capsules.len() as u64)
    }

    /// Record count and last non-empty line of the log, without parsing the
    /// whole file.
    fn log_tail(&self) -> Result<(u64, Option<String>), RecapError> {
        let path = self.log_path();
        if !path.is_file() {
            return Ok((0, None));
        }
        let f = OpenOptions::new()
            .read(true)
            .open(&path)
            .map_err(RecapError::IoError)?;
        let reader = BufReader::new(f);
        let mut count = 0u64;
        let mut last = None;
        for line in reader.lines() {
            let line = line.map_err(RecapError::IoError)?;
            if !line.trim().is_empty() {
                count += 1;
                last = Some(line);
            }
        }
        Ok((count, last))
    }
}

fn ensure_schema(conn: &Connection) -> Result<(), RecapError> {
    conn.execute(schemas::CAPSULE_DB_SCHEMA_META, [])?;
    conn.execute(schemas::CAPSULE_DB_SCHEMA_CAPSULES, [])?;
    conn.execute(schemas::CAPSULE_DB_SCHEMA_TAGS, [])?;
    conn.execute(schemas::CAPSULE_DB_SCHEMA_INDEX_CREATED, [])?;
    conn.execute(schemas::CAPSULE_DB_SCHEMA_INDEX_TAG, [])?;
    conn.execute(
        "INSERT INTO meta(key, value) VALUES('schema_version', ?1)
         ON CONFLICT(key) DO UPDATE SET value=excluded.value",
        [schemas::CAPSULE_SCHEMA_VERSION.to_string()],
    )?;
    Ok(())
}

fn max_id(conn: &Connection) -> Result<u64, RecapError> {
    let id: i64 = conn.query_row("SELECT COALESCE(MAX(id), 0) FROM capsules", [], |row| {
        row.get(0)
    })?;
    Ok(id as u64)
}

fn insert_capsule(conn: &Connection, capsule: &Capsule, payload: &str) -> Result<(), RecapError> {
    conn.execute(
        "INSERT INTO capsules(id, created_at, created_at_unix, summary, message,
                              files_changed, marker_count, content_hash, payload)
         VALUES(?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        params![
            capsule.id as i64,
            capsule.created_at.to_rfc3339(),
            capsule.created_at.timestamp(),
            capsule.summary,
            capsule.message,
            capsule.files_changed.len() as i64,
            capsule.markers.len() as i64,
            capsule.content_hash,
            payload,
        ],
    )?;
    for tag in &capsule.tags {
        conn.execute(
            "INSERT OR IGNORE INTO capsule_tags(capsule_id, tag) VALUES(?1, ?2)",
            params![capsule.id as i64, tag],
        )?;
    }
    Ok(())
}

fn indexed_lines(conn: &Connection) -> Result<u64, RecapError> {
    let value: Option<String> = conn
        .query_row(
            "SELECT value FROM meta WHERE key = 'indexed_lines'",
            [],
            |row| row.get(0),
        )
        .optional()
        .map_err(RecapError::RusqliteError)?;
    Ok(value.and_then(|v| v.parse().ok()).unwrap_or(0))
}

fn set_indexed_lines(conn: &Connection, n: u64) -> Result<(), RecapError> {
    conn.execute(
        "INSERT INTO meta(key, value) VALUES('indexed_lines', ?1)
         ON CONFLICT(key) DO UPDATE SET value=excluded.value",
        [n.to_string()],
    )?;
    Ok(())
}

fn bump_indexed_lines(conn: &Connection, by: u64) -> Result<(), RecapError> {
    let current = indexed_lines(conn)?;
    set_indexed_lines(conn, current + by)
}

/// Markdown export of a capsule slice, newest last (chronological reading
/// order for a session journal).
pub fn export_markdown(project_name: &str, capsules: &[Capsule]) -> String {
    let mut md = String::new();
    md.push_str("# recap session history\n\n");
    md.push_str(&format!("**Project:** {}\n", project_name));
    md.push_str(&format!(
        "**Exported:** {}\n",
        Utc::now().format("%Y-%m-%d %H:%M:%S")
    ));
    md.push_str(&format!("**Total sessions:** {}\n\n---\n\n", capsules.len()));

    for capsule in capsules {
        md.push_str(&format!("## Session {}\n\n", capsule.id));
        md.push_str(&format!(
            "**Date:** {}\n\n",
            capsule.created_at.format("%B %d, %Y at %H:%M:%S")
        ));
        let summary = if capsule.summary.is_empty() {
            "No summary"
        } else {
            &capsule.summary
        };
        md.push_str(&format!("**Summary:** {}\n\n", summary));
        if let Some(message) = &capsule.message {
            md.push_str(&format!("**Note:** {}\n\n", message));
        }
        if !capsule.tags.is_empty() {
            md.push_str(&format!("**Tags:** {}\n\n", capsule.tags.join(", ")));
        }
        if !capsule.files_changed.is_empty() {
            md.push_str(&format!(
                "**Changed files:** ({})\n",
                capsule.files_changed.len()
            ));
            for fc in &capsule.files_changed {
                match (fc.lines_added, fc.lines_removed) {
                    (Some(a), Some(r)) => {
                        md.push_str(&format!("- `{}` (+{} -{})\n", fc.path, a, r))
                    }
                    _ => md.push_str(&format!("- `{}` (binary, {:?})\n", fc.path, fc.status)),
                }
            }
            md.push('\n');
        }
        if !capsule.markers.is_empty() {
            md.push_str(&format!("**Markers:** ({})\n", capsule.markers.len()));
            for m in &capsule.markers {
                md.push_str(&format!("- `{}:{}` - {}\n", m.file, m.line, m.text));
            }
            md.push('\n');
        }
        md.push_str("---\n\n");
    }
    md
}
