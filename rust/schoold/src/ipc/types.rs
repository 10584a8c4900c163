use std::cell::Cell;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use anyhow::Context;
use rusqlite::Connection;
use serde::Deserialize;
use tracing::info;

use crate::db;
use crate::identity::IdentityStore;
use crate::ids::UuidIds;
use crate::store::{DeletePolicy, DomainStore};

#[derive(Debug, Deserialize, Clone)]
pub struct Request {
    pub id: String,
    pub method: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

pub struct AppState {
    pub workspace: Option<PathBuf>,
    pub db: Option<Connection>,
    pub store: DomainStore,
    pub identity: IdentityStore,
    /// Set by the store's change listener; the router saves and clears it.
    pub dirty: Rc<Cell<bool>>,
}

impl AppState {
    pub fn new(policy: DeletePolicy) -> Self {
        let dirty = Rc::new(Cell::new(false));
        let mut store = DomainStore::new(UuidIds).with_policy(policy);
        {
            let dirty = dirty.clone();
            store.subscribe(move |_, _| dirty.set(true));
        }
        Self {
            workspace: None,
            db: None,
            store,
            identity: IdentityStore::new(),
            dirty,
        }
    }

    /// Opens (or creates) the workspace database and replaces the in-memory
    /// state with what it holds. On failure the current workspace, its
    /// connection and the in-memory state are left as they were.
    pub fn open_workspace(&mut self, path: &Path) -> anyhow::Result<()> {
        let conn = db::open_db(path)
            .with_context(|| format!("failed to open workspace {}", path.to_string_lossy()))?;
        let loaded = db::load_state(&conn).context("failed to load workspace state")?;
        self.store.replace_state(loaded);
        self.dirty.set(false);
        self.workspace = Some(path.to_path_buf());
        self.db = Some(conn);
        info!(
            workspace = %path.to_string_lossy(),
            grades = self.store.grades().len(),
            students = self.store.students().len(),
            "workspace opened"
        );
        Ok(())
    }

    /// Drops the workspace entirely; later mutations stay in memory only.
    pub fn close_workspace(&mut self) {
        self.db = None;
        self.workspace = None;
    }
}
