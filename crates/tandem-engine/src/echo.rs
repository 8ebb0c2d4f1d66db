//! In-process worker that answers every prompt with `"[<agent>] <prompt>"`.
//!
//! Used by the CLI and by tests to exercise the full dispatch path without a
//! model provider.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::{broadcast, mpsc};
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use tandem_core::agent::AgentDescriptor;
use tandem_core::errors::WorkerError;
use tandem_core::events::WorkerEvent;
use tandem_core::ids::{AgentId, RunId, SessionId};
use tandem_core::messages::{Message, Role};
use tandem_core::worker::{AgentWorker, Attachment, ModelInfo, RunContext, WorkerEventStream, WorkerFactory};
use tandem_store::MessageStore;

const EVENT_CHANNEL_CAPACITY: usize = 256;

pub struct EchoWorker {
    descriptor: Arc<AgentDescriptor>,
    messages: Arc<dyn MessageStore>,
    delay: Duration,
    /// In-flight runs by session.
    active: Arc<DashMap<SessionId, CancellationToken>>,
    events: broadcast::Sender<WorkerEvent>,
}

impl EchoWorker {
    pub fn new(descriptor: Arc<AgentDescriptor>, messages: Arc<dyn MessageStore>, delay: Duration) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            descriptor,
            messages,
            delay,
            active: Arc::new(DashMap::new()),
            events,
        }
    }

    pub fn reply_for(agent_id: &AgentId, content: &str) -> String {
        format!("[{agent_id}] {content}")
    }
}

/// Forwards each event to the run's stream and to subscribers.
struct Emitter {
    stream: mpsc::Sender<WorkerEvent>,
    broadcast: broadcast::Sender<WorkerEvent>,
}

impl Emitter {
    async fn emit(&self, event: WorkerEvent) {
        let _ = self.broadcast.send(event.clone());
        // The caller may drop the stream early; the run still finishes.
        let _ = self.stream.send(event).await;
    }
}

#[async_trait]
impl AgentWorker for EchoWorker {
    fn agent_id(&self) -> &AgentId {
        &self.descriptor.id
    }

    async fn run(
        &self,
        ctx: RunContext,
        content: String,
        _attachments: Vec<Attachment>,
    ) -> Result<WorkerEventStream, WorkerError> {
        let cancel = CancellationToken::new();
        match self.active.entry(ctx.session_id.clone()) {
            dashmap::mapref::entry::Entry::Occupied(_) => {
                return Err(WorkerError::SessionBusy(ctx.session_id.to_string()));
            }
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                let _ = slot.insert(cancel.clone());
            }
        }

        let parent = ctx.parent_agent_id().cloned();
        let prompt = Message::new(ctx.session_id.clone(), ctx.agent_id.clone(), Role::User, content.clone())
            .with_parent(parent.clone());
        if let Err(e) = self.messages.append(&prompt) {
            let _ = self.active.remove(&ctx.session_id);
            return Err(WorkerError::Internal(e.to_string()));
        }

        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let emitter = Emitter {
            stream: tx,
            broadcast: self.events.clone(),
        };
        let messages = Arc::clone(&self.messages);
        let active = Arc::clone(&self.active);
        let delay = self.delay;

        let _ = tokio::spawn(async move {
            let RunContext { session_id, agent_id, .. } = ctx;
            let run_id = RunId::new();
            emitter
                .emit(WorkerEvent::RunStarted {
                    session_id: session_id.clone(),
                    agent_id: agent_id.clone(),
                    run_id: run_id.clone(),
                    parent_agent_id: parent.clone(),
                })
                .await;

            let cancelled = tokio::select! {
                biased;
                () = cancel.cancelled() => true,
                () = tokio::time::sleep(delay) => false,
            };
            if cancelled {
                let _ = active.remove(&session_id);
                debug!(session_id = %session_id, agent_id = %agent_id, "echo run cancelled");
                emitter
                    .emit(WorkerEvent::RunCancelled { session_id, agent_id, run_id })
                    .await;
                return;
            }

            let reply_text = EchoWorker::reply_for(&agent_id, &content);
            emitter
                .emit(WorkerEvent::TextDelta {
                    session_id: session_id.clone(),
                    agent_id: agent_id.clone(),
                    delta: reply_text.clone(),
                })
                .await;

            let reply = Message::new(session_id.clone(), agent_id.clone(), Role::Assistant, reply_text)
                .with_parent(parent);
            let stored = messages.append(&reply);
            let _ = active.remove(&session_id);

            match stored {
                Ok(_) => {
                    emitter
                        .emit(WorkerEvent::MessageStored {
                            session_id: session_id.clone(),
                            agent_id: agent_id.clone(),
                            message_id: reply.id,
                        })
                        .await;
                    emitter
                        .emit(WorkerEvent::RunComplete { session_id, agent_id, run_id })
                        .await;
                }
                Err(e) => {
                    warn!(session_id = %session_id, agent_id = %agent_id, error = %e, "failed to store echo reply");
                    emitter
                        .emit(WorkerEvent::RunFailed {
                            session_id,
                            agent_id,
                            run_id,
                            error: e.to_string(),
                        })
                        .await;
                }
            }
        });

        Ok(Box::pin(ReceiverStream::new(rx)))
    }

    fn cancel(&self, session_id: &SessionId) {
        if let Some(token) = self.active.get(session_id) {
            token.cancel();
        }
    }

    fn cancel_all(&self) {
        for entry in self.active.iter() {
            entry.value().cancel();
        }
    }

    fn is_busy(&self) -> bool {
        !self.active.is_empty()
    }

    fn is_session_busy(&self, session_id: &SessionId) -> bool {
        self.active.contains_key(session_id)
    }

    fn subscribe(&self) -> broadcast::Receiver<WorkerEvent> {
        self.events.subscribe()
    }

    fn model(&self) -> ModelInfo {
        let binding = &self.descriptor.model;
        ModelInfo {
            tier: binding.tier,
            provider: binding.provider.clone().unwrap_or_else(|| "echo".to_string()),
            model: binding.model.clone().unwrap_or_else(|| format!("echo-{}", binding.tier)),
        }
    }
}

/// Builds an [`EchoWorker`] per descriptor.
pub struct EchoWorkerFactory {
    messages: Arc<dyn MessageStore>,
    delay: Duration,
}

impl EchoWorkerFactory {
    pub fn new(messages: Arc<dyn MessageStore>, delay: Duration) -> Self {
        Self { messages, delay }
    }
}

#[async_trait]
impl WorkerFactory for EchoWorkerFactory {
    async fn build(&self, descriptor: Arc<AgentDescriptor>) -> Result<Arc<dyn AgentWorker>, WorkerError> {
        Ok(Arc::new(EchoWorker::new(descriptor, Arc::clone(&self.messages), self.delay)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use tandem_store::{Database, MessageRepo, SessionRepo};
    use tandem_core::worker::DelegationContext;

    fn setup(delay: Duration) -> (EchoWorker, Arc<MessageRepo>, SessionId) {
        let db = Database::in_memory().unwrap();
        let session = SessionRepo::new(db.clone()).create(None).unwrap();
        let messages = Arc::new(MessageRepo::new(db));
        let worker = EchoWorker::new(
            Arc::new(AgentDescriptor::new("coder", "Coder")),
            messages.clone(),
            delay,
        );
        (worker, messages, session.id)
    }

    #[tokio::test]
    async fn run_streams_events_in_order() {
        let (worker, messages, sid) = setup(Duration::ZERO);
        let stream = worker
            .run(RunContext::direct(sid.clone(), AgentId::from("coder")), "hello".into(), vec![])
            .await
            .unwrap();
        let events: Vec<WorkerEvent> = stream.collect().await;
        let types: Vec<&str> = events.iter().map(WorkerEvent::event_type).collect();
        assert_eq!(types, vec!["run_started", "text_delta", "message_stored", "run_complete"]);

        let stored = messages.list(&sid).unwrap();
        assert_eq!(stored.len(), 2);
        assert_eq!(stored[0].role, Role::User);
        assert_eq!(stored[1].content, "[coder] hello");
        assert!(!worker.is_session_busy(&sid));
    }

    #[tokio::test]
    async fn delegated_run_records_parent() {
        let (worker, messages, sid) = setup(Duration::ZERO);
        let ctx = RunContext::delegated(DelegationContext {
            parent_agent_id: AgentId::from("coder"),
            sub_agent_id: AgentId::from("task"),
            session_id: sid.clone(),
        });
        let events: Vec<WorkerEvent> = worker.run(ctx, "find it".into(), vec![]).await.unwrap().collect().await;
        assert!(events.iter().all(|e| e.agent_id().as_str() == "task"));

        let stored = messages.list_by_agent(&sid, &AgentId::from("task")).unwrap();
        assert_eq!(stored.len(), 2);
        assert!(stored.iter().all(|m| m.parent_agent_id == Some(AgentId::from("coder"))));
        assert_eq!(stored[1].content, "[task] find it");
    }

    #[tokio::test]
    async fn cancel_ends_run_without_reply() {
        let (worker, messages, sid) = setup(Duration::from_secs(30));
        let stream = worker
            .run(RunContext::direct(sid.clone(), AgentId::from("coder")), "slow".into(), vec![])
            .await
            .unwrap();
        assert!(worker.is_busy());
        assert!(worker.is_session_busy(&sid));

        worker.cancel(&sid);
        let events: Vec<WorkerEvent> = stream.collect().await;
        assert_eq!(events.last().map(WorkerEvent::event_type), Some("run_cancelled"));
        assert!(!worker.is_session_busy(&sid));
        assert_eq!(messages.list(&sid).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn second_run_on_busy_session_rejected() {
        let (worker, _messages, sid) = setup(Duration::from_secs(30));
        let _first = worker
            .run(RunContext::direct(sid.clone(), AgentId::from("coder")), "one".into(), vec![])
            .await
            .unwrap();
        let second = worker
            .run(RunContext::direct(sid.clone(), AgentId::from("coder")), "two".into(), vec![])
            .await;
        assert!(matches!(second, Err(WorkerError::SessionBusy(_))));
        worker.cancel_all();
    }

    #[tokio::test]
    async fn subscribers_see_every_event() {
        let (worker, _messages, sid) = setup(Duration::ZERO);
        let mut rx = worker.subscribe();
        let _events: Vec<WorkerEvent> = worker
            .run(RunContext::direct(sid, AgentId::from("coder")), "hi".into(), vec![])
            .await
            .unwrap()
            .collect()
            .await;

        let mut seen = Vec::new();
        while let Ok(evt) = rx.try_recv() {
            seen.push(evt.event_type());
        }
        assert_eq!(seen.len(), 4);
        assert_eq!(seen.last(), Some(&"run_complete"));
    }

    #[test]
    fn model_info_defaults_to_echo() {
        let (worker, _messages, _sid) = setup(Duration::ZERO);
        let info = worker.model();
        assert_eq!(info.provider, "echo");
        assert_eq!(info.model, "echo-large");
    }

    #[tokio::test]
    async fn unknown_session_fails_before_streaming() {
        let (worker, _messages, _sid) = setup(Duration::ZERO);
        let result = worker
            .run(RunContext::direct(SessionId::from_raw("sess_missing"), AgentId::from("coder")), "x".into(), vec![])
            .await;
        assert!(matches!(result, Err(WorkerError::Internal(_))));
        assert!(!worker.is_busy());
    }
}
