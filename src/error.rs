use thiserror::Error;

/// Top-level failure domain for the engine and its collaborators.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("parse error: {0}")]
    Parse(String),

    #[error("provider error ({platform}): {message}")]
    Provider {
        platform: String,
        message: String,
        transient: bool,
    },

    #[error("budget exceeded: would cost ${would_cost:.4}, remaining ${remaining:.4}")]
    BudgetExceeded { would_cost: f64, remaining: f64 },

    #[error("cancelled")]
    Cancelled,

    #[error("checkpoint I/O error: {0}")]
    CheckpointIo(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl EngineError {
    pub fn parse(msg: impl Into<String>) -> Self {
        Self::Parse(msg.into())
    }

    pub fn provider_transient(platform: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Provider {
            platform: platform.into(),
            message: message.into(),
            transient: true,
        }
    }

    pub fn provider_permanent(platform: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Provider {
            platform: platform.into(),
            message: message.into(),
            transient: false,
        }
    }

    pub fn budget_exceeded(would_cost: f64, remaining: f64) -> Self {
        Self::BudgetExceeded {
            would_cost,
            remaining,
        }
    }

    pub fn checkpoint_io(msg: impl Into<String>) -> Self {
        Self::CheckpointIo(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Whether this error should be retried by the caller.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Provider { transient: true, .. })
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;
