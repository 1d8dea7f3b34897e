//! Store abstraction for recap's state management.
//!
//! Two store types exist: Project (one per tracked repository, holds the
//! capsule log) and User (machine-wide, holds the workspace registry and
//! configuration).

use crate::core::error::RecapError;
use std::env;
use std::path::{Path, PathBuf};

/// Name of the hidden directory that marks a tracked project.
pub const PROJECT_DIR_NAME: &str = ".recap";

/// Store type discriminator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreKind {
    /// User store: machine-wide state at `~/.recap/data/`
    User,
    /// Project store: per-repository state at `<root>/.recap/data/`
    Project,
}

/// Store handle for a recap state directory.
///
/// `root` is the data directory itself (`.../.recap/data`), not the project
/// root. `project_root` is only set for Project stores and is the store's
/// identity key in the registry.
#[derive(Debug, Clone)]
pub struct Store {
    pub kind: StoreKind,
    pub root: PathBuf,
    pub project_root: Option<PathBuf>,
}

impl Store {
    pub fn project(project_root: &Path) -> Self {
        Store {
            kind: StoreKind::Project,
            root: project_root.join(PROJECT_DIR_NAME).join("data"),
            project_root: Some(project_root.to_path_buf()),
        }
    }

    pub fn user() -> Result<Self, RecapError> {
        Ok(Store {
            kind: StoreKind::User,
            root: user_home()?.join("data"),
            project_root: None,
        })
    }

    /// Path reported in user-facing errors: the project root when we have
    /// one, the data directory otherwise.
    pub fn display_root(&self) -> &Path {
        self.project_root.as_deref().unwrap_or(&self.root)
    }
}

/// User-level recap directory (`~/.recap`). `RECAP_HOME` overrides it so
/// tests can point the registry at a tempdir.
pub fn user_home() -> Result<PathBuf, RecapError> {
    if let Ok(dir) = env::var("RECAP_HOME") {
        return Ok(PathBuf::from(dir));
    }
    let home = env::var("HOME").map_err(RecapError::EnvVarError)?;
    Ok(PathBuf::from(home).join(PROJECT_DIR_NAME))
}

/// Walk upward from `start_dir` to the nearest directory containing `.recap`.
pub fn find_project_root(start_dir: &Path) -> Result<PathBuf, RecapError> {
    let mut current_dir = PathBuf::from(start_dir);
    loop {
        if current_dir.join(PROJECT_DIR_NAME).exists() {
            return Ok(current_dir);
        }
        if !current_dir.pop() {
            return Err(RecapError::NotFound(
                "'.recap' directory not found in current or parent directories. Run `recap start` first."
                    .to_string(),
            ));
        }
    }
}
