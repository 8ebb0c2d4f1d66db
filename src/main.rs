//! # tandem
//!
//! Command-line front end for the session agent coordinator. Every command
//! opens the session store, rehydrates the session's manager and applies one
//! operation, so agent selection survives between invocations.

#![deny(unsafe_code)]

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use futures::StreamExt;

use tandem_core::ids::{AgentId, SessionId};
use tandem_engine::{AgentRegistry, EchoWorkerFactory, ManagerError, ManagerPool};
use tandem_settings::TandemSettings;
use tandem_store::{Database, MessageRepo, SessionRepo};
use tandem_telemetry::{init_telemetry, LogQuery, SqliteLogSink, TelemetryConfig};

/// Multi-agent session coordinator.
#[derive(Parser, Debug)]
#[command(name = "tandem", about = "Switch, cycle and delegate between agents within a session")]
struct Cli {
    /// Path to the SQLite database (overrides settings).
    #[arg(long, global = true)]
    db_path: Option<PathBuf>,

    /// Settings file (defaults to ~/.tandem/settings.json).
    #[arg(long, global = true)]
    settings: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
enum Command {
    /// List enabled agents.
    Agents,
    /// Create a session and print its id.
    NewSession {
        #[arg(long)]
        title: Option<String>,
    },
    /// List recent sessions.
    Sessions {
        #[arg(long, default_value = "20")]
        limit: u32,
    },
    /// Set a session's title.
    Rename { session: String, title: String },
    /// Delete a session and its messages.
    Delete { session: String },
    /// Show the active agent and visit history.
    Status { session: String },
    /// Make an agent active.
    Switch { session: String, agent: String },
    /// Move to the next (or previous) agent.
    Cycle {
        session: String,
        #[arg(long)]
        reverse: bool,
    },
    /// Send a prompt to the active agent.
    Run {
        session: String,
        #[arg(required = true, num_args = 1..)]
        content: Vec<String>,
    },
    /// Have `parent` hand a prompt to one of its sub-agents.
    Delegate {
        session: String,
        parent: String,
        #[arg(long)]
        sub: Option<String>,
        #[arg(required = true, num_args = 1..)]
        content: Vec<String>,
    },
    /// Print the session's messages.
    Messages {
        session: String,
        #[arg(long)]
        agent: Option<String>,
    },
    /// Show persisted warnings and errors, newest first.
    Logs {
        #[arg(long)]
        session: Option<String>,
        #[arg(long)]
        agent: Option<String>,
        /// `WARN` or `ERROR`.
        #[arg(long)]
        level: Option<String>,
        #[arg(long, default_value = "50")]
        limit: u32,
    },
}

struct App {
    sessions: SessionRepo,
    pool: ManagerPool,
    logs: Option<Arc<SqliteLogSink>>,
}

impl App {
    fn new(db: Database, settings: &TandemSettings, logs: Option<Arc<SqliteLogSink>>) -> Result<Self> {
        let registry = Arc::new(AgentRegistry::new(settings.agent_descriptors()?));
        let sessions = SessionRepo::new(db.clone());
        let messages = Arc::new(MessageRepo::new(db));
        let factory = Arc::new(EchoWorkerFactory::new(
            messages.clone(),
            Duration::from_millis(settings.echo_delay_ms),
        ));
        let pool = ManagerPool::new(registry, Arc::new(sessions.clone()), messages, factory);
        Ok(Self { sessions, pool, logs })
    }

    /// Run one command and return the lines to print.
    async fn execute(&self, command: Command) -> Result<Vec<String>> {
        match command {
            Command::Agents => Ok(self
                .pool
                .registry()
                .descriptors()
                .map(|d| format!("{}\t{}\t{}", d.id, d.model.tier, d.description))
                .collect()),
            Command::NewSession { title } => {
                let session = self.sessions.create(title.as_deref())?;
                Ok(vec![session.id.to_string()])
            }
            Command::Sessions { limit } => Ok(self
                .sessions
                .list(limit, 0)?
                .into_iter()
                .map(|s| {
                    let active = s.active_agent_id.map(|a| a.to_string()).unwrap_or_else(|| "-".into());
                    format!("{}\t{}\t{}", s.id, active, s.title.unwrap_or_default())
                })
                .collect()),
            Command::Rename { session, title } => {
                let session_id = self.existing_session(&session)?;
                self.sessions.update_title(&session_id, &title)?;
                Ok(vec![format!("{session_id}\t{title}")])
            }
            Command::Delete { session } => {
                let session_id = self.existing_session(&session)?;
                let _ = self.pool.close(&session_id);
                self.sessions.delete(&session_id)?;
                Ok(vec![format!("deleted {session_id}")])
            }
            Command::Status { session } => {
                let manager = self.manager(&session)?;
                let history: Vec<String> = manager.agent_history().iter().map(ToString::to_string).collect();
                Ok(vec![
                    format!("active: {}", manager.active_agent_id()),
                    format!("history: {}", history.join(" > ")),
                ])
            }
            Command::Switch { session, agent } => {
                let manager = self.manager(&session)?;
                tolerate_persistence(manager.switch_agent(&AgentId::from_raw(agent)))?;
                Ok(vec![manager.active_agent_id().to_string()])
            }
            Command::Cycle { session, reverse } => {
                let manager = self.manager(&session)?;
                let result = if reverse {
                    manager.cycle_previous()
                } else {
                    manager.cycle_next()
                };
                tolerate_persistence(result.map(|_| ()))?;
                Ok(vec![manager.active_agent_id().to_string()])
            }
            Command::Run { session, content } => {
                let manager = self.manager(&session)?;
                let stream = manager.run(content.join(" "), Vec::new()).await?;
                collect_events(stream).await
            }
            Command::Delegate {
                session,
                parent,
                sub,
                content,
            } => {
                let manager = self.manager(&session)?;
                let sub = sub.map(AgentId::from_raw);
                let stream = manager
                    .run_as(&AgentId::from_raw(parent), sub.as_ref(), content.join(" "), Vec::new())
                    .await?;
                collect_events(stream).await
            }
            Command::Messages { session, agent } => {
                let manager = self.manager(&session)?;
                let messages = match agent {
                    Some(agent) => manager.messages_by_agent(&AgentId::from_raw(agent))?,
                    None => manager.messages()?,
                };
                Ok(messages
                    .into_iter()
                    .map(|m| match m.parent_agent_id {
                        Some(parent) => format!("{} ({} via {}): {}", m.role, m.agent_id, parent, m.content),
                        None => format!("{} ({}): {}", m.role, m.agent_id, m.content),
                    })
                    .collect())
            }
            Command::Logs {
                session,
                agent,
                level,
                limit,
            } => {
                let Some(sink) = &self.logs else {
                    bail!("log persistence is disabled (logToSqlite = false)");
                };
                let records = sink
                    .query(&LogQuery {
                        level: level.map(|l| l.to_uppercase()),
                        session_id: session,
                        agent_id: agent,
                        limit: Some(limit),
                    })
                    .context("failed to query logs")?;
                Ok(records
                    .into_iter()
                    .map(|r| {
                        format!(
                            "{}\t{}\t{}\t{}\t{}",
                            r.timestamp,
                            r.level,
                            r.session_id.as_deref().unwrap_or("-"),
                            r.agent_id.as_deref().unwrap_or("-"),
                            r.message
                        )
                    })
                    .collect())
            }
        }
    }

    fn existing_session(&self, session: &str) -> Result<SessionId> {
        let session_id = SessionId::from_raw(session);
        match self.sessions.get(&session_id) {
            Ok(_) => Ok(session_id),
            Err(e) if e.is_not_found() => bail!("unknown session: {session}"),
            Err(e) => Err(e.into()),
        }
    }

    fn manager(&self, session: &str) -> Result<Arc<tandem_engine::Manager>> {
        let session_id = self.existing_session(session)?;
        Ok(self.pool.get_or_create(&session_id)?)
    }
}

/// A switch that only failed to persist still happened.
fn tolerate_persistence(result: Result<(), ManagerError>) -> Result<()> {
    match result {
        Err(e) if !e.is_fatal() => {
            eprintln!("warning: {e}");
            Ok(())
        }
        other => Ok(other?),
    }
}

async fn collect_events(mut stream: tandem_core::WorkerEventStream) -> Result<Vec<String>> {
    let mut lines = Vec::new();
    while let Some(event) = stream.next().await {
        lines.push(serde_json::to_string(&event).context("failed to encode event")?);
    }
    Ok(lines)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let settings = match &cli.settings {
        Some(path) => tandem_settings::load_settings_from_path(path),
        None => tandem_settings::load_settings(),
    }
    .context("failed to load settings")?;

    let telemetry = init_telemetry(TelemetryConfig {
        log_level: settings.tracing_level(),
        log_to_sqlite: settings.log_to_sqlite,
        log_db_path: settings.resolved_log_db_path(),
    });

    let db_path = cli.db_path.clone().unwrap_or_else(|| settings.resolved_database_path());
    let db = Database::open(&db_path)
        .with_context(|| format!("failed to open database: {}", db_path.display()))?;
    tracing::debug!(path = %db_path.display(), "database ready");

    let app = App::new(db, &settings, telemetry.logs())?;
    let result = app.execute(cli.command).await;
    app.pool.shutdown();

    for line in result? {
        println!("{line}");
    }
    Ok(())
}
