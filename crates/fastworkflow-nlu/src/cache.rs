use std::path::{Path, PathBuf};
use std::sync::Mutex;

use rusqlite::Connection;
use tracing::debug;

use fastworkflow_core::error::{FastworkflowError, Result};

/// Cosine similarity of two dense vectors; 0.0 when either is empty or
/// dimensions differ.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    if a.is_empty() || a.len() != b.len() {
        return 0.0;
    }
    let mut dot = 0f64;
    let mut norm_a = 0f64;
    let mut norm_b = 0f64;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += (*x as f64) * (*y as f64);
        norm_a += (*x as f64) * (*x as f64);
        norm_b += (*y as f64) * (*y as f64);
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}

/// Per-workflow utterance cache: `(utterance, label)` entries with stored
/// embeddings, plus the clarification flag and suggested-command list.
///
/// The flag is an opaque hint for the cache layer (1 = ambiguous suggestions
/// stored, 2 = misclassification); the pipeline stage in the workflow
/// context stays authoritative.
pub struct UtteranceCache {
    db: Mutex<Connection>,
    path: PathBuf,
}

impl UtteranceCache {
    /// Open (creating if needed) the cache db under the workflow's
    /// `___convo_info/` directory.
    pub fn open(convo_info_dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(convo_info_dir)?;
        let path = convo_info_dir.join("cache.db");
        let conn = Connection::open(&path)
            .map_err(|e| FastworkflowError::Database(e.to_string()))?;
        init_db(&conn).map_err(|e| FastworkflowError::Database(e.to_string()))?;
        Ok(Self {
            db: Mutex::new(conn),
            path,
        })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| FastworkflowError::Database(e.to_string()))?;
        init_db(&conn).map_err(|e| FastworkflowError::Database(e.to_string()))?;
        Ok(Self {
            db: Mutex::new(conn),
            path: PathBuf::new(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Insert an `(utterance, label)` entry with its embedding. Returns the
    /// insertion counter value used for this utterance.
    pub fn store_utterance(&self, utterance: &str, label: &str, embedding: &[f32]) -> Result<i64> {
        let blob = embedding_to_blob(embedding);
        let db = self.db.lock().unwrap();
        db.execute(
            "INSERT INTO utterances (utterance, label, embedding) VALUES (?1, ?2, ?3)",
            rusqlite::params![utterance, label, blob],
        )
        .map_err(|e| FastworkflowError::Database(e.to_string()))?;
        let id = db.last_insert_rowid();
        debug!(utterance, label, id, "utterance cached");
        Ok(id)
    }

    /// Best cached label by cosine similarity against the query embedding;
    /// `None` when the best similarity is below `threshold`.
    pub fn match_embedding(&self, query: &[f32], threshold: f64) -> Result<Option<(String, f64)>> {
        let db = self.db.lock().unwrap();
        let mut stmt = db
            .prepare("SELECT label, embedding FROM utterances")
            .map_err(|e| FastworkflowError::Database(e.to_string()))?;
        let rows = stmt
            .query_map([], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, Vec<u8>>(1)?))
            })
            .map_err(|e| FastworkflowError::Database(e.to_string()))?;

        let mut best: Option<(String, f64)> = None;
        for row in rows.flatten() {
            let (label, blob) = row;
            let embedding = blob_to_embedding(&blob);
            let similarity = cosine_similarity(query, &embedding);
            match &best {
                Some((_, s)) if similarity <= *s => {}
                _ => best = Some((label, similarity)),
            }
        }
        Ok(best.filter(|(_, s)| *s >= threshold))
    }

    pub fn entry_count(&self) -> Result<i64> {
        let db = self.db.lock().unwrap();
        db.query_row("SELECT COUNT(*) FROM utterances", [], |row| row.get(0))
            .map_err(|e| FastworkflowError::Database(e.to_string()))
    }

    /// Persist suggested commands for the constrained selection, with the
    /// flag recording why (1 = ambiguous, 2 = misclassified).
    pub fn store_suggested_commands(&self, commands: &[String], flag: u8) -> Result<()> {
        let json = serde_json::to_string(commands)?;
        let db = self.db.lock().unwrap();
        db.execute(
            "INSERT INTO cache_meta (key, value) VALUES ('suggested_commands', ?1)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            rusqlite::params![json],
        )
        .map_err(|e| FastworkflowError::Database(e.to_string()))?;
        db.execute(
            "INSERT INTO cache_meta (key, value) VALUES ('flag', ?1)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            rusqlite::params![flag.to_string()],
        )
        .map_err(|e| FastworkflowError::Database(e.to_string()))?;
        Ok(())
    }

    pub fn suggested_commands(&self) -> Result<Vec<String>> {
        let db = self.db.lock().unwrap();
        let value: Option<String> = db
            .query_row(
                "SELECT value FROM cache_meta WHERE key = 'suggested_commands'",
                [],
                |row| row.get(0),
            )
            .map(Some)
            .or_else(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => Ok(None),
                other => Err(FastworkflowError::Database(other.to_string())),
            })?;
        match value {
            Some(json) => Ok(serde_json::from_str(&json)?),
            None => Ok(Vec::new()),
        }
    }

    pub fn flag(&self) -> Result<u8> {
        let db = self.db.lock().unwrap();
        let value: Option<String> = db
            .query_row("SELECT value FROM cache_meta WHERE key = 'flag'", [], |row| {
                row.get(0)
            })
            .map(Some)
            .or_else(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => Ok(None),
                other => Err(FastworkflowError::Database(other.to_string())),
            })?;
        Ok(value.and_then(|v| v.parse().ok()).unwrap_or(0))
    }
}

fn init_db(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS utterances (
            id        INTEGER PRIMARY KEY AUTOINCREMENT,
            utterance TEXT NOT NULL,
            label     TEXT NOT NULL,
            embedding BLOB NOT NULL
        );
        CREATE TABLE IF NOT EXISTS cache_meta (
            key   TEXT PRIMARY KEY,
            value TEXT NOT NULL
        );",
    )
}

fn embedding_to_blob(embedding: &[f32]) -> Vec<u8> {
    let mut blob = Vec::with_capacity(embedding.len() * 4);
    for v in embedding {
        blob.extend_from_slice(&v.to_le_bytes());
    }
    blob
}

fn blob_to_embedding(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cosine_similarity_bounds() {
        let a = [1.0f32, 0.0];
        let b = [1.0f32, 0.0];
        let c = [0.0f32, 1.0];
        assert!((cosine_similarity(&a, &b) - 1.0).abs() < 1e-9);
        assert_eq!(cosine_similarity(&a, &c), 0.0);
        assert_eq!(cosine_similarity(&a, &[]), 0.0);
    }

    #[test]
    fn store_and_match_roundtrip() {
        let cache = UtteranceCache::open_in_memory().unwrap();
        cache
            .store_utterance("set the current user to unsh", "User/set_current_user", &[1.0, 0.0, 0.0])
            .unwrap();
        cache
            .store_utterance("show my orders", "get_order_details", &[0.0, 1.0, 0.0])
            .unwrap();

        let hit = cache.match_embedding(&[0.9, 0.1, 0.0], 0.85).unwrap();
        assert_eq!(hit.unwrap().0, "User/set_current_user");

        // Below the threshold → no hit.
        let miss = cache.match_embedding(&[0.5, 0.5, 0.0], 0.95).unwrap();
        assert!(miss.is_none());
    }

    #[test]
    fn suggested_commands_and_flag_roundtrip() {
        let cache = UtteranceCache::open_in_memory().unwrap();
        assert_eq!(cache.flag().unwrap(), 0);
        assert!(cache.suggested_commands().unwrap().is_empty());

        cache
            .store_suggested_commands(
                &["User/set_current_user".into(), "User/set_user_status".into()],
                1,
            )
            .unwrap();
        assert_eq!(cache.flag().unwrap(), 1);
        assert_eq!(cache.suggested_commands().unwrap().len(), 2);
    }

    #[test]
    fn empty_cache_matches_nothing() {
        let cache = UtteranceCache::open_in_memory().unwrap();
        assert!(cache.match_embedding(&[1.0], 0.1).unwrap().is_none());
        assert_eq!(cache.entry_count().unwrap(), 0);
    }
}
