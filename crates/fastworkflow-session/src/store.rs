use std::path::{Path, PathBuf};
use std::sync::Mutex;

use rusqlite::Connection;
use serde_json::Map;
use tracing::{debug, instrument};

use fastworkflow_registry::WorkflowContext;

use crate::error::{Result, SessionError};
use crate::workflow::Workflow;

/// Thread-safe persistence for workflow instance rows.
///
/// Wraps a single SQLite connection in a `Mutex`; the per-user lock in the
/// session runtime already serializes writes for one workflow.
pub struct WorkflowStore {
    db: Mutex<Connection>,
}

impl WorkflowStore {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;
        init_db(&conn)?;
        Ok(Self { db: Mutex::new(conn) })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        init_db(&conn)?;
        Ok(Self { db: Mutex::new(conn) })
    }

    /// Load a workflow row by id.
    #[instrument(skip(self))]
    pub fn get(&self, id: &str) -> Result<Option<Workflow>> {
        let db = self.db.lock().unwrap();
        match db.query_row(
            "SELECT id, folderpath, parent_id, is_complete, context_json
             FROM workflows WHERE id = ?1",
            rusqlite::params![id],
            row_to_workflow,
        ) {
            Ok(wf) => Ok(Some(wf)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(SessionError::Database(e)),
        }
    }

    /// Write pending state changes to disk if the workflow is dirty.
    pub fn flush(&self, workflow: &mut Workflow) -> Result<()> {
        if !workflow.is_dirty() {
            return Ok(());
        }
        self.save(workflow)?;
        workflow.mark_clean();
        Ok(())
    }

    /// Upsert the workflow row unconditionally.
    #[instrument(skip(self, workflow), fields(id = %WorkflowContext::id(workflow)))]
    pub fn save(&self, workflow: &Workflow) -> Result<()> {
        let context_json = serde_json::to_string(workflow.context())?;
        let now = chrono::Utc::now().to_rfc3339();
        let db = self.db.lock().unwrap();
        db.execute(
            "INSERT INTO workflows (id, folderpath, parent_id, is_complete, context_json, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)
             ON CONFLICT(id) DO UPDATE SET
                 is_complete = excluded.is_complete,
                 context_json = excluded.context_json,
                 updated_at = excluded.updated_at",
            rusqlite::params![
                WorkflowContext::id(workflow),
                workflow.folderpath().display().to_string(),
                workflow.parent_id(),
                workflow.is_complete() as i64,
                context_json,
                now,
            ],
        )?;
        debug!("workflow row saved");
        Ok(())
    }

    pub fn delete(&self, id: &str) -> Result<()> {
        let db = self.db.lock().unwrap();
        let rows = db.execute("DELETE FROM workflows WHERE id = ?1", rusqlite::params![id])?;
        if rows == 0 {
            return Err(SessionError::NotFound { id: id.to_string() });
        }
        Ok(())
    }
}

fn init_db(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS workflows (
            id           TEXT PRIMARY KEY,
            folderpath   TEXT NOT NULL,
            parent_id    TEXT,
            is_complete  INTEGER NOT NULL DEFAULT 0,
            context_json TEXT NOT NULL,
            created_at   TEXT NOT NULL,
            updated_at   TEXT NOT NULL
        );",
    )
}

fn row_to_workflow(row: &rusqlite::Row<'_>) -> rusqlite::Result<Workflow> {
    let id: String = row.get(0)?;
    let folderpath: String = row.get(1)?;
    let parent_id: Option<String> = row.get(2)?;
    let is_complete: i64 = row.get(3)?;
    let context_json: String = row.get(4)?;
    let context: Map<String, serde_json::Value> =
        serde_json::from_str(&context_json).unwrap_or_default();
    Ok(Workflow::from_parts(
        id,
        PathBuf::from(folderpath),
        parent_id,
        is_complete != 0,
        context,
    ))
}
