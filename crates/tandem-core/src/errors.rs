/// Errors reported by an agent worker or its factory.
#[derive(Clone, Debug, thiserror::Error)]
pub enum WorkerError {
    #[error("worker setup failed: {0}")]
    Setup(String),
    #[error("session {0} is already running on this worker")]
    SessionBusy(String),
    #[error("request cancelled")]
    Cancelled,
    #[error("provider error: {0}")]
    Provider(String),
    #[error("{0}")]
    Internal(String),
}

impl WorkerError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// Short classification string for logging.
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::Setup(_) => "setup",
            Self::SessionBusy(_) => "session_busy",
            Self::Cancelled => "cancelled",
            Self::Provider(_) => "provider",
            Self::Internal(_) => "internal",
        }
    }
}
