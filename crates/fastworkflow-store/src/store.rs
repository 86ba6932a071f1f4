use std::path::Path;
use std::sync::Mutex;

use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use fastworkflow_core::types::ConversationTurn;

use crate::error::{Result, StoreError};

/// A persisted conversation: topic, summary, and the ordered turn log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationRecord {
    pub topic: String,
    pub summary: String,
    /// Unix milliseconds.
    pub created_at: i64,
    pub updated_at: i64,
    pub turns: Vec<ConversationTurn>,
}

/// Listing row for `GET /conversations`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationSummary {
    pub conversation_id: i64,
    pub topic: String,
    pub summary: String,
    pub created_at: i64,
    pub updated_at: i64,
}

/// Per-user conversation persistence: a monotonic id counter under `meta`
/// and one `conv:<id>` record per conversation, backed by
/// `<user_id>.db` in the conversations directory.
pub struct ConversationStore {
    db: Mutex<Connection>,
    user_id: String,
}

impl ConversationStore {
    pub fn open(base_dir: &Path, user_id: &str) -> Result<Self> {
        std::fs::create_dir_all(base_dir)?;
        let path = base_dir.join(format!("{user_id}.db"));
        let conn = Connection::open(path)?;
        init_db(&conn)?;
        Ok(Self {
            db: Mutex::new(conn),
            user_id: user_id.to_string(),
        })
    }

    pub fn open_in_memory(user_id: &str) -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        init_db(&conn)?;
        Ok(Self {
            db: Mutex::new(conn),
            user_id: user_id.to_string(),
        })
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn last_conversation_id(&self) -> Result<Option<i64>> {
        let db = self.db.lock().unwrap();
        last_id(&db)
    }

    /// Durably increment the id counter and return the reserved id without
    /// creating a conversation row. Ids increase monotonically per user.
    #[instrument(skip(self), fields(user_id = %self.user_id))]
    pub fn reserve_next_id(&self) -> Result<i64> {
        let db = self.db.lock().unwrap();
        let next = last_id(&db)?.unwrap_or(0) + 1;
        db.execute(
            "INSERT INTO meta (key, value) VALUES ('last_conversation_id', ?1)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            rusqlite::params![next.to_string()],
        )?;
        debug!(conversation_id = next, "conversation id reserved");
        Ok(next)
    }

    /// Create the conversation with placeholder topic/summary, or update the
    /// turns of an existing one. Used for incremental saves after every
    /// turn; topic/summary generation happens at rotation.
    #[instrument(skip(self, turns), fields(user_id = %self.user_id, turn_count = turns.len()))]
    pub fn save_turns(&self, conversation_id: i64, turns: &[ConversationTurn]) -> Result<()> {
        let turns_json = serde_json::to_string(turns)?;
        let now = chrono::Utc::now().timestamp_millis();
        let db = self.db.lock().unwrap();
        db.execute(
            "INSERT INTO conversations (conv_id, topic, summary, created_at, updated_at, turns_json)
             VALUES (?1, '', '', ?2, ?2, ?3)
             ON CONFLICT(conv_id) DO UPDATE SET
                 turns_json = excluded.turns_json,
                 updated_at = excluded.updated_at",
            rusqlite::params![conversation_id, now, turns_json],
        )?;
        Ok(())
    }

    /// Finalize a conversation: set its topic (unique per user after
    /// case/whitespace normalization) and summary, preserving the turns.
    pub fn update_topic_summary(
        &self,
        conversation_id: i64,
        topic: &str,
        summary: &str,
    ) -> Result<()> {
        let db = self.db.lock().unwrap();
        let exists: bool = db
            .query_row(
                "SELECT 1 FROM conversations WHERE conv_id = ?1",
                rusqlite::params![conversation_id],
                |_| Ok(true),
            )
            .unwrap_or(false);
        if !exists {
            return Err(StoreError::NotFound { id: conversation_id });
        }

        let unique_topic = ensure_unique_topic(&db, conversation_id, topic)?;
        let now = chrono::Utc::now().timestamp_millis();
        db.execute(
            "UPDATE conversations SET topic = ?1, summary = ?2, updated_at = ?3
             WHERE conv_id = ?4",
            rusqlite::params![unique_topic, summary, now, conversation_id],
        )?;
        Ok(())
    }

    pub fn get(&self, conversation_id: i64) -> Result<Option<ConversationRecord>> {
        let db = self.db.lock().unwrap();
        match db.query_row(
            "SELECT topic, summary, created_at, updated_at, turns_json
             FROM conversations WHERE conv_id = ?1",
            rusqlite::params![conversation_id],
            row_to_record,
        ) {
            Ok(record) => Ok(Some(record)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(StoreError::Database(e)),
        }
    }

    /// Case/whitespace-insensitive topic lookup.
    pub fn get_by_topic(&self, topic: &str) -> Result<Option<(i64, ConversationRecord)>> {
        let normalized = normalize_topic(topic);
        let matched = {
            let db = self.db.lock().unwrap();
            let mut stmt = db.prepare("SELECT conv_id, topic FROM conversations")?;
            let rows = stmt.query_map([], |row| {
                Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?))
            })?;
            let found = rows
                .flatten()
                .find(|(_, candidate)| normalize_topic(candidate) == normalized)
                .map(|(conv_id, _)| conv_id);
            found
        };
        match matched {
            Some(conv_id) => Ok(self.get(conv_id)?.map(|record| (conv_id, record))),
            None => Ok(None),
        }
    }

    /// Most recently updated conversations first, up to `limit`.
    pub fn list(&self, limit: usize) -> Result<Vec<ConversationSummary>> {
        let db = self.db.lock().unwrap();
        let mut stmt = db.prepare(
            "SELECT conv_id, topic, summary, created_at, updated_at
             FROM conversations
             ORDER BY updated_at DESC
             LIMIT ?1",
        )?;
        let rows = stmt.query_map(rusqlite::params![limit as i64], |row| {
            Ok(ConversationSummary {
                conversation_id: row.get(0)?,
                topic: row.get(1)?,
                summary: row.get(2)?,
                created_at: row.get(3)?,
                updated_at: row.get(4)?,
            })
        })?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    /// All conversations with the user id attached, for the admin dump.
    pub fn dump_all(&self) -> Result<Vec<serde_json::Value>> {
        let db = self.db.lock().unwrap();
        let mut stmt = db.prepare(
            "SELECT conv_id, topic, summary, created_at, updated_at, turns_json
             FROM conversations ORDER BY conv_id",
        )?;
        let rows = stmt.query_map([], |row| {
            let conv_id: i64 = row.get(0)?;
            let record = row_to_record_at(row, 1)?;
            Ok((conv_id, record))
        })?;
        let mut out = Vec::new();
        for row in rows.flatten() {
            let (conv_id, record) = row;
            let mut value = serde_json::to_value(&record)?;
            if let Some(map) = value.as_object_mut() {
                map.insert("user_id".to_string(), serde_json::json!(self.user_id));
                map.insert("conversation_id".to_string(), serde_json::json!(conv_id));
            }
            out.push(value);
        }
        Ok(out)
    }
}

fn init_db(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS meta (
            key   TEXT PRIMARY KEY,
            value TEXT NOT NULL
        );
        CREATE TABLE IF NOT EXISTS conversations (
            conv_id    INTEGER PRIMARY KEY,
            topic      TEXT NOT NULL DEFAULT '',
            summary    TEXT NOT NULL DEFAULT '',
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL,
            turns_json TEXT NOT NULL
        );",
    )
}

fn last_id(conn: &Connection) -> Result<Option<i64>> {
    match conn.query_row(
        "SELECT value FROM meta WHERE key = 'last_conversation_id'",
        [],
        |row| row.get::<_, String>(0),
    ) {
        Ok(value) => Ok(value.parse().ok()),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(StoreError::Database(e)),
    }
}

pub(crate) fn normalize_topic(topic: &str) -> String {
    topic.trim().to_lowercase()
}

/// Append `" N"` with the smallest N ≥ 1 until the topic no longer collides
/// with another conversation's topic (normalized comparison).
fn ensure_unique_topic(conn: &Connection, conversation_id: i64, candidate: &str) -> Result<String> {
    let mut stmt = conn.prepare("SELECT topic FROM conversations WHERE conv_id != ?1")?;
    let existing: Vec<String> = stmt
        .query_map(rusqlite::params![conversation_id], |row| {
            row.get::<_, String>(0)
        })?
        .filter_map(|r| r.ok())
        .map(|t| normalize_topic(&t))
        .collect();

    let mut final_topic = candidate.to_string();
    let mut suffix = 0usize;
    while existing.contains(&normalize_topic(&final_topic)) {
        suffix += 1;
        final_topic = format!("{candidate} {suffix}");
    }
    Ok(final_topic)
}

fn row_to_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<ConversationRecord> {
    row_to_record_at(row, 0)
}

fn row_to_record_at(row: &rusqlite::Row<'_>, offset: usize) -> rusqlite::Result<ConversationRecord> {
    let turns_json: String = row.get(offset + 4)?;
    Ok(ConversationRecord {
        topic: row.get(offset)?,
        summary: row.get(offset + 1)?,
        created_at: row.get(offset + 2)?,
        updated_at: row.get(offset + 3)?,
        turns: serde_json::from_str(&turns_json).unwrap_or_default(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn turn(summary: &str) -> ConversationTurn {
        ConversationTurn {
            summary: summary.to_string(),
            traces: Vec::new(),
            feedback: None,
        }
    }

    #[test]
    fn reserved_ids_are_monotonic() {
        let store = ConversationStore::open_in_memory("alice").unwrap();
        assert_eq!(store.last_conversation_id().unwrap(), None);
        assert_eq!(store.reserve_next_id().unwrap(), 1);
        assert_eq!(store.reserve_next_id().unwrap(), 2);
        assert_eq!(store.last_conversation_id().unwrap(), Some(2));
    }

    #[test]
    fn save_turns_roundtrip() {
        let store = ConversationStore::open_in_memory("alice").unwrap();
        let id = store.reserve_next_id().unwrap();
        let turns = vec![turn("first"), turn("second")];
        store.save_turns(id, &turns).unwrap();

        let record = store.get(id).unwrap().unwrap();
        assert_eq!(record.turns.len(), 2);
        assert_eq!(record.turns[0].summary, "first");
        // Placeholder topic until rotation generates one.
        assert_eq!(record.topic, "");
    }

    #[test]
    fn topic_uniqueness_appends_smallest_suffix() {
        let store = ConversationStore::open_in_memory("alice").unwrap();
        for expected in ["Trip planning", "Trip planning 1", "Trip planning 2"] {
            let id = store.reserve_next_id().unwrap();
            store.save_turns(id, &[turn("t")]).unwrap();
            store
                .update_topic_summary(id, "Trip planning", "a summary")
                .unwrap();
            assert_eq!(store.get(id).unwrap().unwrap().topic, expected);
        }
        // Case/whitespace-normalized comparison also collides.
        let id = store.reserve_next_id().unwrap();
        store.save_turns(id, &[turn("t")]).unwrap();
        store.update_topic_summary(id, "trip PLANNING", "s").unwrap();
        assert_eq!(store.get(id).unwrap().unwrap().topic, "trip PLANNING 3");
    }

    #[test]
    fn list_orders_by_updated_at_desc() {
        let store = ConversationStore::open_in_memory("alice").unwrap();
        let first = store.reserve_next_id().unwrap();
        store.save_turns(first, &[turn("a")]).unwrap();
        let second = store.reserve_next_id().unwrap();
        store.save_turns(second, &[turn("b")]).unwrap();
        // Touch the first again so it becomes most recent.
        std::thread::sleep(std::time::Duration::from_millis(5));
        store.save_turns(first, &[turn("a"), turn("a2")]).unwrap();

        let listed = store.list(10).unwrap();
        assert_eq!(listed[0].conversation_id, first);
        assert_eq!(listed[1].conversation_id, second);
        assert_eq!(store.list(1).unwrap().len(), 1);
    }

    #[test]
    fn topic_lookup_is_normalized() {
        let store = ConversationStore::open_in_memory("alice").unwrap();
        let id = store.reserve_next_id().unwrap();
        store.save_turns(id, &[turn("t")]).unwrap();
        store.update_topic_summary(id, "Weekend Plans", "s").unwrap();

        let (found_id, record) = store.get_by_topic("  weekend plans ").unwrap().unwrap();
        assert_eq!(found_id, id);
        assert_eq!(record.topic, "Weekend Plans");
        assert!(store.get_by_topic("unknown").unwrap().is_none());
    }

    #[test]
    fn dump_includes_user_and_id() {
        let store = ConversationStore::open_in_memory("alice").unwrap();
        let id = store.reserve_next_id().unwrap();
        store.save_turns(id, &[turn("t")]).unwrap();

        let dumped = store.dump_all().unwrap();
        assert_eq!(dumped.len(), 1);
        assert_eq!(dumped[0]["user_id"], "alice");
        assert_eq!(dumped[0]["conversation_id"], id);
    }

    #[test]
    fn feedback_on_turns_survives_roundtrip() {
        let store = ConversationStore::open_in_memory("alice").unwrap();
        let id = store.reserve_next_id().unwrap();
        let mut turns = vec![turn("t")];
        turns[0].feedback = Some(serde_json::json!({"binary_or_numeric_score": 1}));
        store.save_turns(id, &turns).unwrap();

        let record = store.get(id).unwrap().unwrap();
        assert_eq!(
            record.turns[0].feedback,
            Some(serde_json::json!({"binary_or_numeric_score": 1}))
        );
    }

    #[test]
    fn update_topic_on_missing_conversation_errors() {
        let store = ConversationStore::open_in_memory("alice").unwrap();
        assert!(matches!(
            store.update_topic_summary(42, "t", "s"),
            Err(StoreError::NotFound { id: 42 })
        ));
    }
}
