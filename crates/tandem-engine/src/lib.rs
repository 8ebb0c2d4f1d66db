//! Per-session multi-agent coordination.
//!
//! A [`Manager`] owns one session's active-agent selection and its lazily
//! built workers; a [`ManagerPool`] hands out one manager per session.

pub mod cycling;
pub mod echo;
pub mod error;
pub mod manager;
pub mod pool;
pub mod registry;
mod state;
pub mod workers;

#[cfg(test)]
mod testing;

pub use cycling::Direction;
pub use echo::{EchoWorker, EchoWorkerFactory};
pub use error::ManagerError;
pub use manager::Manager;
pub use pool::ManagerPool;
pub use registry::AgentRegistry;
