//! Settings type definitions.
//!
//! Field names are camelCase on disk. Every field has a default, so partial
//! JSON files are accepted.

use std::collections::HashSet;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tandem_core::agent::AgentDescriptor;

use crate::errors::{Result, SettingsError};

/// Root settings type.
///
/// ```json
/// {
///   "logLevel": "debug",
///   "agents": [{ "name": "Reviewer", "subagents": { "allowed": ["task"] } }]
/// }
/// ```
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TandemSettings {
    /// `trace`, `debug`, `info`, `warn` or `error`.
    pub log_level: String,
    /// Persist warn+ logs to `log_db_path`.
    pub log_to_sqlite: bool,
    pub log_db_path: String,
    pub database_path: String,
    /// Agent descriptors. Replaces the built-ins entirely when present.
    pub agents: Vec<AgentDescriptor>,
    /// Artificial latency for the echo worker, in milliseconds.
    pub echo_delay_ms: u64,
}

impl Default for TandemSettings {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_to_sqlite: true,
            log_db_path: "~/.tandem/logs.db".to_string(),
            database_path: "~/.tandem/tandem.db".to_string(),
            agents: vec![AgentDescriptor::builtin_coder(), AgentDescriptor::builtin_task()],
            echo_delay_ms: 0,
        }
    }
}

impl TandemSettings {
    pub fn tracing_level(&self) -> tracing::Level {
        self.log_level.parse().unwrap_or(tracing::Level::INFO)
    }

    pub fn resolved_database_path(&self) -> PathBuf {
        expand_home(&self.database_path)
    }

    pub fn resolved_log_db_path(&self) -> PathBuf {
        expand_home(&self.log_db_path)
    }

    /// Descriptors with ids filled in from names. Duplicate or empty ids are
    /// rejected.
    pub fn agent_descriptors(&self) -> Result<Vec<AgentDescriptor>> {
        let mut seen = HashSet::new();
        let mut out = Vec::with_capacity(self.agents.len());
        for descriptor in &self.agents {
            let descriptor = descriptor.clone().normalized();
            if descriptor.id.is_empty() {
                return Err(SettingsError::InvalidValue("agent has neither id nor name".into()));
            }
            if !seen.insert(descriptor.id.clone()) {
                return Err(SettingsError::InvalidValue(format!(
                    "duplicate agent id: {}",
                    descriptor.id
                )));
            }
            out.push(descriptor);
        }
        Ok(out)
    }
}

/// Expand a leading `~/` against `$HOME`.
pub fn expand_home(path: &str) -> PathBuf {
    match path.strip_prefix("~/") {
        Some(rest) => home_dir().join(rest),
        None => PathBuf::from(path),
    }
}

pub(crate) fn home_dir() -> PathBuf {
    PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string()))
}
