use std::sync::Mutex;

use parley_core::{ActionType, Address, ThreadId};
use rusqlite::types::Type;
use rusqlite::{Connection, OptionalExtension};
use tracing::{debug, instrument};

use crate::db::init_db;
use crate::error::{Result, SessionError};
use crate::types::{Conversation, ConversationMessage, NewMessage, Role, TurnRecord};

const CONVERSATION_COLUMNS: &str = "address, thread_id, action_type, message_count, last_agent,
     risk_level, risk_score, external_user_id, last_activity_at, created_at, updated_at";

/// Thread-safe system of record for conversations and their history.
///
/// Wraps a single SQLite connection in a `Mutex`, like every other
/// persistent subsystem of the gateway.
pub struct ConversationStore {
    db: Mutex<Connection>,
}

impl ConversationStore {
    /// Wrap an open connection, creating the schema if needed.
    pub fn new(conn: Connection) -> Result<Self> {
        init_db(&conn)?;
        Ok(Self {
            db: Mutex::new(conn),
        })
    }

    /// Look up the conversation for an address.
    #[instrument(skip(self), fields(address = %address))]
    pub fn get(&self, address: &Address) -> Result<Option<Conversation>> {
        let db = self.db.lock().unwrap();
        let conversation = db
            .query_row(
                &format!("SELECT {CONVERSATION_COLUMNS} FROM conversations WHERE address = ?1"),
                [address.as_str()],
                row_to_conversation,
            )
            .optional()?;
        Ok(conversation)
    }

    /// Look up the conversation whose *current* thread is `thread_id`.
    #[instrument(skip(self), fields(thread = %thread_id))]
    pub fn get_by_thread(&self, thread_id: &ThreadId) -> Result<Option<Conversation>> {
        let db = self.db.lock().unwrap();
        let conversation = db
            .query_row(
                &format!("SELECT {CONVERSATION_COLUMNS} FROM conversations WHERE thread_id = ?1"),
                [thread_id.as_str()],
                row_to_conversation,
            )
            .optional()?;
        Ok(conversation)
    }

    /// Return the conversation for `address`, creating it on first contact.
    ///
    /// The bool is `true` when this call created the row.
    #[instrument(skip(self), fields(address = %address))]
    pub fn get_or_create(&self, address: &Address) -> Result<(Conversation, bool)> {
        if let Some(existing) = self.get(address)? {
            return Ok((existing, false));
        }

        let now = chrono::Utc::now().to_rfc3339();
        let thread_id = ThreadId::new();
        let db = self.db.lock().unwrap();
        let inserted = db.execute(
            "INSERT OR IGNORE INTO conversations
             (address, thread_id, action_type, last_activity_at, created_at, updated_at)
             VALUES (?1, ?2, 'chat', ?3, ?3, ?3)",
            rusqlite::params![address.as_str(), thread_id.as_str(), now],
        )?;

        // Read back: another caller may have inserted first.
        let conversation = db.query_row(
            &format!("SELECT {CONVERSATION_COLUMNS} FROM conversations WHERE address = ?1"),
            [address.as_str()],
            row_to_conversation,
        )?;
        if inserted == 1 {
            debug!(thread = %conversation.thread_id, "conversation created");
        }
        Ok((conversation, inserted == 1))
    }

    /// Start a new session for `address`: fresh thread id, zeroed counter,
    /// default mode. Creates the conversation if it does not exist.
    #[instrument(skip(self), fields(address = %address))]
    pub fn reset(&self, address: &Address) -> Result<Conversation> {
        let now = chrono::Utc::now().to_rfc3339();
        let thread_id = ThreadId::new();
        let db = self.db.lock().unwrap();
        db.execute(
            "INSERT INTO conversations
             (address, thread_id, action_type, last_activity_at, created_at, updated_at)
             VALUES (?1, ?2, 'chat', ?3, ?3, ?3)
             ON CONFLICT(address) DO UPDATE SET
                thread_id     = excluded.thread_id,
                action_type   = 'chat',
                message_count = 0,
                updated_at    = excluded.updated_at",
            rusqlite::params![address.as_str(), thread_id.as_str(), now],
        )?;
        let conversation = db.query_row(
            &format!("SELECT {CONVERSATION_COLUMNS} FROM conversations WHERE address = ?1"),
            [address.as_str()],
            row_to_conversation,
        )?;
        debug!(thread = %conversation.thread_id, "conversation reset");
        Ok(conversation)
    }

    /// Set the interaction mode of the conversation currently on `thread_id`.
    #[instrument(skip(self), fields(thread = %thread_id, mode = %action_type))]
    pub fn set_action_type(&self, thread_id: &ThreadId, action_type: ActionType) -> Result<()> {
        let now = chrono::Utc::now().to_rfc3339();
        let db = self.db.lock().unwrap();
        let rows_changed = db.execute(
            "UPDATE conversations SET action_type = ?1, updated_at = ?2 WHERE thread_id = ?3",
            rusqlite::params![action_type.as_str(), now, thread_id.as_str()],
        )?;
        if rows_changed == 0 {
            return Err(SessionError::NotFound {
                key: thread_id.to_string(),
            });
        }
        Ok(())
    }

    /// Link the conversation to a user of the external profile store.
    pub fn set_external_user_id(&self, address: &Address, user_id: &str) -> Result<()> {
        let now = chrono::Utc::now().to_rfc3339();
        let db = self.db.lock().unwrap();
        let rows_changed = db.execute(
            "UPDATE conversations SET external_user_id = ?1, updated_at = ?2 WHERE address = ?3",
            rusqlite::params![user_id, now, address.as_str()],
        )?;
        if rows_changed == 0 {
            return Err(SessionError::NotFound {
                key: address.to_string(),
            });
        }
        Ok(())
    }

    /// Persist a completed turn: the user message, the agent reply, and the
    /// conversation metadata, in one transaction.
    ///
    /// Counters only move when the turn ran on the conversation's current
    /// thread, so a reset that lands mid-turn keeps the new session at zero.
    #[instrument(skip(self, turn), fields(address = %address, thread = %turn.thread_id))]
    pub fn record_turn(&self, address: &Address, turn: &TurnRecord) -> Result<()> {
        let now = chrono::Utc::now().to_rfc3339();
        let mut db = self.db.lock().unwrap();
        let tx = db.transaction()?;
        for (role, content, agent) in [
            (Role::User, &turn.user_text, None),
            (Role::Assistant, &turn.reply_text, turn.agent_id.as_deref()),
        ] {
            tx.execute(
                "INSERT INTO conversation_messages
                 (address, thread_id, role, content, agent_id, metadata, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, NULL, ?6)",
                rusqlite::params![
                    address.as_str(),
                    turn.thread_id.as_str(),
                    role.as_str(),
                    content,
                    agent,
                    now
                ],
            )?;
        }
        let rows_changed = tx.execute(
            "UPDATE conversations SET
                message_count    = message_count + CASE WHEN thread_id = ?1 THEN 2 ELSE 0 END,
                last_agent       = COALESCE(?2, last_agent),
                risk_level       = COALESCE(?3, risk_level),
                risk_score       = COALESCE(?4, risk_score),
                last_activity_at = ?5,
                updated_at       = ?5
             WHERE address = ?6",
            rusqlite::params![
                turn.thread_id.as_str(),
                turn.agent_id,
                turn.risk_level,
                turn.risk_score,
                now,
                address.as_str()
            ],
        )?;
        if rows_changed == 0 {
            return Err(SessionError::NotFound {
                key: address.to_string(),
            });
        }
        tx.commit()?;
        Ok(())
    }

    /// Append one history row. Returns its id.
    #[instrument(skip(self, message), fields(address = %message.address, role = %message.role))]
    pub fn save_message(&self, message: &NewMessage) -> Result<i64> {
        let now = chrono::Utc::now().to_rfc3339();
        let metadata = message
            .metadata
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        let db = self.db.lock().unwrap();
        db.execute(
            "INSERT INTO conversation_messages
             (address, thread_id, role, content, agent_id, metadata, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            rusqlite::params![
                message.address.as_str(),
                message.thread_id.as_str(),
                message.role.as_str(),
                message.content,
                message.agent_id,
                metadata,
                now
            ],
        )?;
        Ok(db.last_insert_rowid())
    }

    /// Add `by` to the message counter and touch the activity timestamp.
    #[instrument(skip(self), fields(address = %address))]
    pub fn increment_message_count(&self, address: &Address, by: u32) -> Result<()> {
        let now = chrono::Utc::now().to_rfc3339();
        let db = self.db.lock().unwrap();
        let rows_changed = db.execute(
            "UPDATE conversations SET
                message_count    = message_count + ?1,
                last_activity_at = ?2,
                updated_at       = ?2
             WHERE address = ?3",
            rusqlite::params![by, now, address.as_str()],
        )?;
        if rows_changed == 0 {
            return Err(SessionError::NotFound {
                key: address.to_string(),
            });
        }
        Ok(())
    }

    /// The latest `limit` history rows for an address, oldest first.
    #[instrument(skip(self), fields(address = %address, limit))]
    pub fn recent_messages(
        &self,
        address: &Address,
        limit: usize,
    ) -> Result<Vec<ConversationMessage>> {
        let db = self.db.lock().unwrap();
        let mut stmt = db.prepare(
            "SELECT id, address, thread_id, role, content, agent_id, metadata, created_at
             FROM conversation_messages
             WHERE address = ?1
             ORDER BY id DESC
             LIMIT ?2",
        )?;
        let rows = stmt.query_map(
            rusqlite::params![address.as_str(), limit as i64],
            row_to_message,
        )?;
        let mut messages = rows.collect::<std::result::Result<Vec<_>, _>>()?;
        messages.reverse();
        Ok(messages)
    }
}

fn conversion_error<E>(idx: usize, err: E) -> rusqlite::Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(err))
}

/// Map a SQLite row to a `Conversation`.
fn row_to_conversation(row: &rusqlite::Row<'_>) -> rusqlite::Result<Conversation> {
    let address: String = row.get(0)?;
    let address = Address::parse(&address).map_err(|e| conversion_error(0, e))?;
    let action_type: String = row.get(2)?;
    let action_type = action_type
        .parse::<ActionType>()
        .map_err(|e| conversion_error(2, e))?;

    Ok(Conversation {
        address,
        thread_id: ThreadId(row.get(1)?),
        action_type,
        message_count: row.get::<_, i64>(3)? as u32,
        last_agent: row.get(4)?,
        risk_level: row.get(5)?,
        risk_score: row.get(6)?,
        external_user_id: row.get(7)?,
        last_activity_at: row.get(8)?,
        created_at: row.get(9)?,
        updated_at: row.get(10)?,
    })
}

fn row_to_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<ConversationMessage> {
    let address: String = row.get(1)?;
    let address = Address::parse(&address).map_err(|e| conversion_error(1, e))?;
    let role: String = row.get(3)?;
    let role = role.parse::<Role>().map_err(|e| {
        conversion_error(3, std::io::Error::new(std::io::ErrorKind::InvalidData, e))
    })?;
    let metadata: Option<String> = row.get(6)?;
    let metadata = metadata
        .map(|m| serde_json::from_str(&m))
        .transpose()
        .map_err(|e| conversion_error(6, e))?;

    Ok(ConversationMessage {
        id: row.get(0)?,
        address,
        thread_id: ThreadId(row.get(2)?),
        role,
        content: row.get(4)?,
        agent_id: row.get(5)?,
        metadata,
        created_at: row.get(7)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> ConversationStore {
        ConversationStore::new(Connection::open_in_memory().unwrap()).unwrap()
    }

    fn addr(s: &str) -> Address {
        Address::parse(s).unwrap()
    }

    fn turn(thread_id: &ThreadId) -> TurnRecord {
        TurnRecord {
            thread_id: thread_id.clone(),
            user_text: "Quiero una cita".into(),
            reply_text: "¿Para qué día?".into(),
            agent_id: Some("scheduler".into()),
            risk_level: Some("low".into()),
            risk_score: Some(0.1),
        }
    }

    #[test]
    fn get_or_create_is_idempotent() {
        let store = store();
        let (first, created) = store.get_or_create(&addr("34600111222")).unwrap();
        assert!(created);
        assert!(first.is_new());
        assert_eq!(first.action_type, ActionType::Chat);

        let (second, created) = store.get_or_create(&addr("+34 600-111-222")).unwrap();
        assert!(!created);
        assert_eq!(first.thread_id, second.thread_id);
    }

    #[test]
    fn reset_mints_new_thread_and_zeroes_counter() {
        let store = store();
        let a = addr("34600111222");
        let (conv, _) = store.get_or_create(&a).unwrap();
        store.record_turn(&a, &turn(&conv.thread_id)).unwrap();
        store
            .set_action_type(&conv.thread_id, ActionType::ProcessData)
            .unwrap();

        let reset = store.reset(&a).unwrap();
        assert_ne!(reset.thread_id, conv.thread_id);
        assert_eq!(reset.message_count, 0);
        assert_eq!(reset.action_type, ActionType::Chat);
        assert_eq!(reset.created_at, conv.created_at);
        // last agent survives a reset
        assert_eq!(reset.last_agent.as_deref(), Some("scheduler"));
    }

    #[test]
    fn reset_creates_missing_conversation() {
        let store = store();
        let conv = store.reset(&addr("34600999888")).unwrap();
        assert!(conv.is_new());
        assert!(store.get(&addr("34600999888")).unwrap().is_some());
    }

    #[test]
    fn record_turn_persists_both_messages_and_metadata() {
        let store = store();
        let a = addr("34600111222");
        let (conv, _) = store.get_or_create(&a).unwrap();
        store.record_turn(&a, &turn(&conv.thread_id)).unwrap();

        let conv = store.get(&a).unwrap().unwrap();
        assert_eq!(conv.message_count, 2);
        assert_eq!(conv.risk_level.as_deref(), Some("low"));
        assert_eq!(conv.risk_score, Some(0.1));

        let history = store.recent_messages(&a, 10).unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].role, Role::User);
        assert_eq!(history[1].role, Role::Assistant);
        assert_eq!(history[1].agent_id.as_deref(), Some("scheduler"));
    }

    #[test]
    fn turn_on_superseded_thread_does_not_count() {
        let store = store();
        let a = addr("34600111222");
        let (old, _) = store.get_or_create(&a).unwrap();
        store.reset(&a).unwrap();
        store.record_turn(&a, &turn(&old.thread_id)).unwrap();
        assert_eq!(store.get(&a).unwrap().unwrap().message_count, 0);
    }

    #[test]
    fn set_action_type_by_thread() {
        let store = store();
        let (conv, _) = store.get_or_create(&addr("34600111222")).unwrap();
        store
            .set_action_type(&conv.thread_id, ActionType::QueryData)
            .unwrap();
        let found = store.get_by_thread(&conv.thread_id).unwrap().unwrap();
        assert_eq!(found.action_type, ActionType::QueryData);

        let err = store
            .set_action_type(&ThreadId::from("missing"), ActionType::Chat)
            .unwrap_err();
        assert!(matches!(err, SessionError::NotFound { .. }));
    }

    #[test]
    fn external_user_id_is_linked_and_survives_reset() {
        let store = store();
        let a = addr("34600111222");
        assert!(matches!(
            store.set_external_user_id(&a, "patient-42").unwrap_err(),
            SessionError::NotFound { .. }
        ));

        store.get_or_create(&a).unwrap();
        store.set_external_user_id(&a, "patient-42").unwrap();
        assert_eq!(
            store.get(&a).unwrap().unwrap().external_user_id.as_deref(),
            Some("patient-42")
        );

        let reset = store.reset(&a).unwrap();
        assert_eq!(reset.external_user_id.as_deref(), Some("patient-42"));
    }

    #[test]
    fn save_message_keeps_metadata() {
        let store = store();
        let a = addr("34600111222");
        let (conv, _) = store.get_or_create(&a).unwrap();
        store
            .save_message(&NewMessage {
                address: a.clone(),
                thread_id: conv.thread_id.clone(),
                role: Role::System,
                content: "Recordatorio de cita".into(),
                agent_id: None,
                metadata: Some(serde_json::json!({ "proactive": true, "source": "manual" })),
            })
            .unwrap();
        store.increment_message_count(&a, 1).unwrap();

        let history = store.recent_messages(&a, 5).unwrap();
        assert_eq!(history[0].role, Role::System);
        assert_eq!(history[0].metadata.as_ref().unwrap()["proactive"], true);
        assert_eq!(store.get(&a).unwrap().unwrap().message_count, 1);
    }

    #[test]
    fn recent_messages_returns_latest_in_order() {
        let store = store();
        let a = addr("34600111222");
        let (conv, _) = store.get_or_create(&a).unwrap();
        for _ in 0..3 {
            store.record_turn(&a, &turn(&conv.thread_id)).unwrap();
        }
        let history = store.recent_messages(&a, 3).unwrap();
        assert_eq!(history.len(), 3);
        assert!(history.windows(2).all(|w| w[0].id < w[1].id));
        assert_eq!(history[2].role, Role::Assistant);
    }

    #[test]
    fn increment_unknown_address_is_not_found() {
        let store = store();
        assert!(matches!(
            store.increment_message_count(&addr("1234"), 1),
            Err(SessionError::NotFound { .. })
        ));
    }
}
