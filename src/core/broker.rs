use crate::core::db;
use crate::core::error;
use crate::core::time;
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// The DB Broker is the single entry point for store mutations.
/// It serializes writers and records every brokered operation in an
/// append-only audit log next to the store.
pub struct DbBroker {
    audit_log_path: PathBuf,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct BrokerEvent {
    pub ts: String,
    pub event_id: String,
    pub actor: String,
    pub op: String,
    pub db_id: String,
    pub status: String,
}

impl DbBroker {
    pub fn new(root: &Path) -> Self {
        Self {
            audit_log_path: root.join("broker.events.jsonl"),
        }
    }

    /// Execute a closure with a serialized connection to the specified DB.
    pub fn with_conn<F, R>(
        &self,
        db_path: &Path,
        actor: &str,
        op_name: &str,
        f: F,
    ) -> Result<R, error::RecapError>
    where
        F: FnOnce(&Connection) -> Result<R, error::RecapError>,
    {
        // In-process serialization; cross-process writers are serialized by
        // the SQLite write lock taken in with_write_txn.
        static DB_LOCK: Mutex<()> = Mutex::new(());
        let _lock = DB_LOCK.lock().unwrap();

        let db_id = db_path
            .file_name()
            .unwrap_or_default()
            .to_string_lossy()
            .to_string();
        let conn = db::db_connect(&db_path.to_string_lossy())?;

        let result = f(&conn);

        let status = if result.is_ok() { "success" } else { "error" };
        self.log_event(actor, op_name, &db_id, status)?;

        result
    }

    /// Like `with_conn`, but the closure runs inside an IMMEDIATE transaction.
    ///
    /// BEGIN IMMEDIATE takes the database write lock up front, so a second
    /// appender (same process or another one) blocks until the first commit.
    /// The closure must perform every step of the critical section, including
    /// the durable log append, before returning.
    pub fn with_write_txn<F, R>(
        &self,
        db_path: &Path,
        actor: &str,
        op_name: &str,
        f: F,
    ) -> Result<R, error::RecapError>
    where
        F: FnOnce(&Connection) -> Result<R, error::RecapError>,
    {
        self.with_conn(db_path, actor, op_name, |conn| {
            conn.execute_batch("BEGIN IMMEDIATE;")?;
            match f(conn) {
                Ok(out) => {
                    conn.execute_batch("COMMIT;")?;
                    Ok(out)
                }
                Err(e) => {
                    let _ = conn.execute_batch("ROLLBACK;");
                    Err(e)
                }
            }
        })
    }

    fn log_event(
        &self,
        actor: &str,
        op: &str,
        db_id: &str,
        status: &str,
    ) -> Result<(), error::RecapError> {
        use std::fs::OpenOptions;
        use std::io::Write;

        let ev = BrokerEvent {
            ts: time::now_rfc3339(),
            event_id: time::new_event_id(),
            actor: actor.to_string(),
            op: op.to_string(),
            db_id: db_id.to_string(),
            status: status.to_string(),
        };

        let mut f = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.audit_log_path)
            .map_err(error::RecapError::IoError)?;

        writeln!(f, "{}", serde_json::to_string(&ev).unwrap())
            .map_err(error::RecapError::IoError)?;
        Ok(())
    }
}
