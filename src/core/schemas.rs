//! Centralized database schema definitions for recap's stores.
//!
//! Two stores exist on a machine:
//! 1. capsules.db: per-project index over the capsule log (time + tag queries).
//! 2. the user-level registry, which is a plain JSONL event log with no index.
//!
//! The SQLite database is always a cache. The JSONL log next to it is the
//! source of truth, and the index is rebuilt from the log whenever the two
//! disagree.

pub const CAPSULE_DB_NAME: &str = "capsules.db";
pub const CAPSULE_LOG_NAME: &str = "capsules.jsonl";
pub const REGISTRY_LOG_NAME: &str = "workspaces.jsonl";

pub const CAPSULE_SCHEMA_VERSION: u32 = 2;

pub const CAPSULE_DB_SCHEMA_META: &str = "
    CREATE TABLE IF NOT EXISTS meta (
        key TEXT PRIMARY KEY,
        value TEXT NOT NULL
    )
";

pub const CAPSULE_DB_SCHEMA_CAPSULES: &str = "
    CREATE TABLE IF NOT EXISTS capsules (
        id INTEGER PRIMARY KEY,
        created_at TEXT NOT NULL,
        created_at_unix INTEGER NOT NULL, -- range queries; RFC3339 text is for humans
        summary TEXT NOT NULL,
        message TEXT,
        files_changed INTEGER NOT NULL,
        marker_count INTEGER NOT NULL,
        content_hash TEXT NOT NULL,
        payload TEXT NOT NULL -- full capsule JSON, identical to the log line
    )
";

pub const CAPSULE_DB_SCHEMA_TAGS: &str = "
    CREATE TABLE IF NOT EXISTS capsule_tags (
        capsule_id INTEGER NOT NULL,
        tag TEXT NOT NULL,
        PRIMARY KEY (capsule_id, tag),
        FOREIGN KEY(capsule_id) REFERENCES capsules(id)
    )
";

pub const CAPSULE_DB_SCHEMA_INDEX_CREATED: &str =
    "CREATE INDEX IF NOT EXISTS idx_capsules_created_at ON capsules(created_at_unix)";

pub const CAPSULE_DB_SCHEMA_INDEX_TAG: &str =
    "CREATE INDEX IF NOT EXISTS idx_capsule_tags_tag ON capsule_tags(tag)";
