use thiserror::Error;

#[derive(Debug, Error)]
pub enum SimError {
    #[error("failed to allocate {resource}: {reason}")]
    ResourceExhaustion { resource: String, reason: String },

    #[error("protocol violation in {component}: {detail}")]
    ProtocolViolation { component: String, detail: String },

    #[error("channel `{0}` is closed")]
    ChannelClosed(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("{0}")]
    Usage(String),

    #[error("task failed: {0}")]
    Task(#[from] tokio::task::JoinError),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed configuration file: {0}")]
    Json(#[from] serde_json::Error),
}

impl SimError {
    pub fn exhausted(resource: impl Into<String>, reason: impl Into<String>) -> Self {
        SimError::ResourceExhaustion {
            resource: resource.into(),
            reason: reason.into(),
        }
    }

    pub fn violation(component: impl Into<String>, detail: impl Into<String>) -> Self {
        SimError::ProtocolViolation {
            component: component.into(),
            detail: detail.into(),
        }
    }
}

pub type SimResult<T> = Result<T, SimError>;
