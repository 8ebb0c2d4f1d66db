pub mod agent;
pub mod errors;
pub mod events;
pub mod ids;
pub mod messages;
pub mod worker;

pub use agent::{AgentDescriptor, CapabilitySet, ModelBinding, ModelTier, SubagentPolicy};
pub use errors::WorkerError;
pub use events::WorkerEvent;
pub use ids::{AgentId, MessageId, RunId, SessionId};
pub use worker::{AgentWorker, Attachment, DelegationContext, ModelInfo, RunContext, WorkerEventStream, WorkerFactory};
