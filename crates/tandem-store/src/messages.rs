use tracing::instrument;

use tandem_core::ids::{AgentId, MessageId, SessionId};
use tandem_core::messages::Message;

use crate::database::Database;
use crate::error::StoreError;
use crate::row_helpers;

/// Append-only message history shared by every agent in a session.
pub trait MessageStore: Send + Sync {
    /// Append a message; returns its sequence number within the session.
    fn append(&self, message: &Message) -> Result<i64, StoreError>;
    fn list(&self, session_id: &SessionId) -> Result<Vec<Message>, StoreError>;
    fn list_by_agent(&self, session_id: &SessionId, agent_id: &AgentId) -> Result<Vec<Message>, StoreError>;
}

const SELECT_MESSAGE: &str =
    "SELECT id, session_id, agent_id, parent_agent_id, role, content, created_at FROM messages";

#[derive(Clone)]
pub struct MessageRepo {
    db: Database,
}

impl MessageRepo {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    fn query(&self, sql: &str, params: &[&dyn rusqlite::types::ToSql]) -> Result<Vec<Message>, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(sql)?;
            let mut rows = stmt.query(params)?;
            let mut results = Vec::new();
            while let Some(row) = rows.next()? {
                results.push(row_to_message(row)?);
            }
            Ok(results)
        })
    }
}

impl MessageStore for MessageRepo {
    #[instrument(skip(self, message), fields(session_id = %message.session_id, agent_id = %message.agent_id))]
    fn append(&self, message: &Message) -> Result<i64, StoreError> {
        self.db.with_conn(|conn| {
            // Sequence assignment and insert happen under the connection lock.
            let sequence: i64 = conn.query_row(
                "SELECT COALESCE(MAX(sequence), 0) + 1 FROM messages WHERE session_id = ?1",
                [message.session_id.as_str()],
                |row| row.get(0),
            )?;
            conn.execute(
                "INSERT INTO messages (id, session_id, sequence, agent_id, parent_agent_id, role, content, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                rusqlite::params![
                    message.id.as_str(),
                    message.session_id.as_str(),
                    sequence,
                    message.agent_id.as_str(),
                    message.parent_agent_id.as_ref().map(AgentId::as_str),
                    message.role.to_string(),
                    message.content,
                    message.created_at,
                ],
            )?;
            Ok(sequence)
        })
    }

    #[instrument(skip(self), fields(session_id = %session_id))]
    fn list(&self, session_id: &SessionId) -> Result<Vec<Message>, StoreError> {
        self.query(
            &format!("{SELECT_MESSAGE} WHERE session_id = ?1 ORDER BY sequence ASC"),
            &[&session_id.as_str()],
        )
    }

    #[instrument(skip(self), fields(session_id = %session_id, agent_id = %agent_id))]
    fn list_by_agent(&self, session_id: &SessionId, agent_id: &AgentId) -> Result<Vec<Message>, StoreError> {
        self.query(
            &format!("{SELECT_MESSAGE} WHERE session_id = ?1 AND agent_id = ?2 ORDER BY sequence ASC"),
            &[&session_id.as_str(), &agent_id.as_str()],
        )
    }
}

fn row_to_message(row: &rusqlite::Row<'_>) -> Result<Message, StoreError> {
    let role_raw: String = row_helpers::get(row, 4, "messages", "role")?;

    Ok(Message {
        id: MessageId::from_raw(row_helpers::get::<String>(row, 0, "messages", "id")?),
        session_id: SessionId::from_raw(row_helpers::get::<String>(row, 1, "messages", "session_id")?),
        agent_id: AgentId::from_raw(row_helpers::get::<String>(row, 2, "messages", "agent_id")?),
        parent_agent_id: row_helpers::get_opt::<String>(row, 3, "messages", "parent_agent_id")?
            .map(AgentId::from_raw),
        role: row_helpers::parse_enum(&role_raw, "messages", "role")?,
        content: row_helpers::get(row, 5, "messages", "content")?,
        created_at: row_helpers::get(row, 6, "messages", "created_at")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sessions::SessionRepo;
    use tandem_core::messages::Role;

    fn setup() -> (MessageRepo, SessionId) {
        let db = Database::in_memory().unwrap();
        let session = SessionRepo::new(db.clone()).create(None).unwrap();
        (MessageRepo::new(db), session.id)
    }

    #[test]
    fn append_assigns_increasing_sequence() {
        let (repo, sid) = setup();
        let first = repo
            .append(&Message::new(sid.clone(), AgentId::from("coder"), Role::User, "hi"))
            .unwrap();
        let second = repo
            .append(&Message::new(sid.clone(), AgentId::from("coder"), Role::Assistant, "hello"))
            .unwrap();
        assert_eq!(first, 1);
        assert_eq!(second, 2);
    }

    #[test]
    fn list_preserves_append_order() {
        let (repo, sid) = setup();
        for (agent, text) in [("coder", "one"), ("docs", "two"), ("coder", "three")] {
            repo.append(&Message::new(sid.clone(), AgentId::from(agent), Role::Assistant, text))
                .unwrap();
        }
        let contents: Vec<String> = repo.list(&sid).unwrap().into_iter().map(|m| m.content).collect();
        assert_eq!(contents, vec!["one", "two", "three"]);
    }

    #[test]
    fn list_by_agent_filters() {
        let (repo, sid) = setup();
        repo.append(&Message::new(sid.clone(), AgentId::from("coder"), Role::Assistant, "a"))
            .unwrap();
        repo.append(
            &Message::new(sid.clone(), AgentId::from("task"), Role::Assistant, "b")
                .with_parent(Some(AgentId::from("coder"))),
        )
        .unwrap();

        let task = repo.list_by_agent(&sid, &AgentId::from("task")).unwrap();
        assert_eq!(task.len(), 1);
        assert_eq!(task[0].parent_agent_id, Some(AgentId::from("coder")));
        assert_eq!(task[0].role, Role::Assistant);
    }

    #[test]
    fn append_to_unknown_session_fails() {
        let (repo, _) = setup();
        let result = repo.append(&Message::new(
            SessionId::from_raw("sess_missing"),
            AgentId::from("coder"),
            Role::User,
            "hi",
        ));
        assert!(matches!(result, Err(StoreError::Database(_))));
    }

    #[test]
    fn sequences_are_per_session() {
        let db = Database::in_memory().unwrap();
        let sessions = SessionRepo::new(db.clone());
        let a = sessions.create(None).unwrap().id;
        let b = sessions.create(None).unwrap().id;
        let repo = MessageRepo::new(db);

        repo.append(&Message::new(a.clone(), AgentId::from("coder"), Role::User, "x")).unwrap();
        let seq_b = repo.append(&Message::new(b, AgentId::from("coder"), Role::User, "y")).unwrap();
        assert_eq!(seq_b, 1);
    }
}
