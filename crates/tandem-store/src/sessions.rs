use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::instrument;

use tandem_core::ids::{AgentId, SessionId};

use crate::database::Database;
use crate::error::StoreError;
use crate::row_helpers;

/// Which agent a session is on and the order agents were visited.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionAgentState {
    pub session_id: SessionId,
    pub active_agent_id: AgentId,
    pub agent_history: Vec<AgentId>,
}

/// Agent-state persistence consumed by the session coordinator.
pub trait SessionStore: Send + Sync {
    /// Fails with `NotFound` when the session has never recorded an agent.
    fn load_agent_state(&self, session_id: &SessionId) -> Result<SessionAgentState, StoreError>;

    fn update_agent_state(
        &self,
        session_id: &SessionId,
        active_agent_id: &AgentId,
        agent_history_json: &str,
    ) -> Result<(), StoreError>;
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SessionRow {
    pub id: SessionId,
    pub title: Option<String>,
    pub active_agent_id: Option<AgentId>,
    pub agent_history: Vec<AgentId>,
    pub created_at: String,
    pub updated_at: String,
}

const SELECT_SESSION: &str =
    "SELECT id, title, active_agent_id, agent_history, created_at, updated_at FROM sessions";

#[derive(Clone)]
pub struct SessionRepo {
    db: Database,
}

impl SessionRepo {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Create a new session with no agent state yet.
    #[instrument(skip(self))]
    pub fn create(&self, title: Option<&str>) -> Result<SessionRow, StoreError> {
        let id = SessionId::new();
        let now = Utc::now().to_rfc3339();

        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO sessions (id, title, agent_history, created_at, updated_at)
                 VALUES (?1, ?2, '[]', ?3, ?4)",
                rusqlite::params![id.as_str(), title, now, now],
            )?;

            Ok(SessionRow {
                id,
                title: title.map(str::to_owned),
                active_agent_id: None,
                agent_history: Vec::new(),
                created_at: now.clone(),
                updated_at: now,
            })
        })
    }

    /// Get a session by ID.
    #[instrument(skip(self), fields(session_id = %id))]
    pub fn get(&self, id: &SessionId) -> Result<SessionRow, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!("{SELECT_SESSION} WHERE id = ?1"))?;
            let mut rows = stmt.query([id.as_str()])?;
            match rows.next()? {
                Some(row) => row_to_session(row),
                None => Err(StoreError::NotFound(format!("session {id}"))),
            }
        })
    }

    /// List sessions, newest first.
    #[instrument(skip(self))]
    pub fn list(&self, limit: u32, offset: u32) -> Result<Vec<SessionRow>, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "{SELECT_SESSION} ORDER BY created_at DESC, id DESC LIMIT ?1 OFFSET ?2"
            ))?;
            let mut rows = stmt.query(rusqlite::params![limit, offset])?;
            let mut results = Vec::new();
            while let Some(row) = rows.next()? {
                results.push(row_to_session(row)?);
            }
            Ok(results)
        })
    }

    /// Update session title.
    #[instrument(skip(self), fields(session_id = %session_id))]
    pub fn update_title(&self, session_id: &SessionId, title: &str) -> Result<(), StoreError> {
        self.db.with_conn(|conn| {
            let now = Utc::now().to_rfc3339();
            let changed = conn.execute(
                "UPDATE sessions SET title = ?1, updated_at = ?2 WHERE id = ?3",
                rusqlite::params![title, now, session_id.as_str()],
            )?;
            if changed == 0 {
                return Err(StoreError::NotFound(format!("session {session_id}")));
            }
            Ok(())
        })
    }

    /// Delete a session and its messages.
    #[instrument(skip(self), fields(session_id = %session_id))]
    pub fn delete(&self, session_id: &SessionId) -> Result<(), StoreError> {
        self.db.with_conn(|conn| {
            conn.execute("DELETE FROM messages WHERE session_id = ?1", [session_id.as_str()])?;
            conn.execute("DELETE FROM sessions WHERE id = ?1", [session_id.as_str()])?;
            Ok(())
        })
    }
}

impl SessionStore for SessionRepo {
    #[instrument(skip(self), fields(session_id = %session_id))]
    fn load_agent_state(&self, session_id: &SessionId) -> Result<SessionAgentState, StoreError> {
        let row = self.get(session_id)?;
        let active_agent_id = row
            .active_agent_id
            .ok_or_else(|| StoreError::NotFound(format!("agent state for session {session_id}")))?;
        Ok(SessionAgentState {
            session_id: row.id,
            active_agent_id,
            agent_history: row.agent_history,
        })
    }

    #[instrument(skip(self, agent_history_json), fields(session_id = %session_id, active = %active_agent_id))]
    fn update_agent_state(
        &self,
        session_id: &SessionId,
        active_agent_id: &AgentId,
        agent_history_json: &str,
    ) -> Result<(), StoreError> {
        // Reject garbage before it reaches the column.
        let _: Vec<AgentId> = serde_json::from_str(agent_history_json)?;

        self.db.with_conn(|conn| {
            let now = Utc::now().to_rfc3339();
            let changed = conn.execute(
                "UPDATE sessions SET active_agent_id = ?1, agent_history = ?2, updated_at = ?3 WHERE id = ?4",
                rusqlite::params![active_agent_id.as_str(), agent_history_json, now, session_id.as_str()],
            )?;
            if changed == 0 {
                return Err(StoreError::NotFound(format!("session {session_id}")));
            }
            Ok(())
        })
    }
}

fn row_to_session(row: &rusqlite::Row<'_>) -> Result<SessionRow, StoreError> {
    let history_raw: String = row_helpers::get(row, 3, "sessions", "agent_history")?;

    Ok(SessionRow {
        id: SessionId::from_raw(row_helpers::get::<String>(row, 0, "sessions", "id")?),
        title: row_helpers::get_opt(row, 1, "sessions", "title")?,
        active_agent_id: row_helpers::get_opt::<String>(row, 2, "sessions", "active_agent_id")?
            .map(AgentId::from_raw),
        agent_history: row_helpers::parse_json(&history_raw, "sessions", "agent_history")?,
        created_at: row_helpers::get(row, 4, "sessions", "created_at")?,
        updated_at: row_helpers::get(row, 5, "sessions", "updated_at")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup() -> SessionRepo {
        SessionRepo::new(Database::in_memory().unwrap())
    }

    #[test]
    fn create_session() {
        let repo = setup();
        let session = repo.create(Some("refactor")).unwrap();
        assert!(session.id.as_str().starts_with("sess_"));
        assert_eq!(session.title.as_deref(), Some("refactor"));
        assert!(session.active_agent_id.is_none());
        assert!(session.agent_history.is_empty());
    }

    #[test]
    fn get_session() {
        let repo = setup();
        let session = repo.create(None).unwrap();
        let fetched = repo.get(&session.id).unwrap();
        assert_eq!(fetched.id, session.id);
        assert!(fetched.title.is_none());
    }

    #[test]
    fn get_nonexistent_fails() {
        let repo = setup();
        let result = repo.get(&SessionId::from_raw("sess_nonexistent"));
        assert!(matches!(result, Err(StoreError::NotFound(_))));
    }

    #[test]
    fn fresh_session_has_no_agent_state() {
        let repo = setup();
        let session = repo.create(None).unwrap();
        let result = repo.load_agent_state(&session.id);
        assert!(matches!(result, Err(StoreError::NotFound(_))));
    }

    #[test]
    fn agent_state_round_trips() {
        let repo = setup();
        let session = repo.create(None).unwrap();
        repo.update_agent_state(&session.id, &AgentId::from("docs"), r#"["coder","docs"]"#)
            .unwrap();

        let state = repo.load_agent_state(&session.id).unwrap();
        assert_eq!(state.active_agent_id.as_str(), "docs");
        assert_eq!(state.agent_history, vec![AgentId::from("coder"), AgentId::from("docs")]);
    }

    #[test]
    fn update_agent_state_unknown_session() {
        let repo = setup();
        let result = repo.update_agent_state(&SessionId::from_raw("sess_missing"), &AgentId::from("coder"), "[]");
        assert!(matches!(result, Err(StoreError::NotFound(_))));
    }

    #[test]
    fn update_agent_state_rejects_bad_json() {
        let repo = setup();
        let session = repo.create(None).unwrap();
        let result = repo.update_agent_state(&session.id, &AgentId::from("coder"), "{not json");
        assert!(matches!(result, Err(StoreError::Serialization(_))));
    }

    #[test]
    fn corrupt_history_is_reported() {
        let db = Database::in_memory().unwrap();
        let repo = SessionRepo::new(db.clone());
        let session = repo.create(None).unwrap();
        db.with_conn(|conn| {
            conn.execute(
                "UPDATE sessions SET active_agent_id = 'coder', agent_history = 'oops' WHERE id = ?1",
                [session.id.as_str()],
            )?;
            Ok(())
        })
        .unwrap();

        let result = repo.load_agent_state(&session.id);
        assert!(matches!(result, Err(StoreError::CorruptRow { column: "agent_history", .. })));
    }

    #[test]
    fn list_sessions_pagination() {
        let repo = setup();
        for _ in 0..5 {
            repo.create(None).unwrap();
        }
        assert_eq!(repo.list(2, 0).unwrap().len(), 2);
        assert_eq!(repo.list(2, 2).unwrap().len(), 2);
        assert_eq!(repo.list(2, 4).unwrap().len(), 1);
    }

    #[test]
    fn update_title() {
        let repo = setup();
        let session = repo.create(None).unwrap();
        repo.update_title(&session.id, "My Session").unwrap();
        let fetched = repo.get(&session.id).unwrap();
        assert_eq!(fetched.title.as_deref(), Some("My Session"));
    }

    #[test]
    fn delete_session() {
        let repo = setup();
        let session = repo.create(None).unwrap();
        repo.delete(&session.id).unwrap();
        assert!(repo.get(&session.id).is_err());
    }
}
