use crate::effects::{EffectKind, SessionId};

/// Result alias that carries the custom [`SoundEngineError`] type.
pub type Result<T> = std::result::Result<T, SoundEngineError>;

/// Common error type for the core crate.
#[derive(Debug, thiserror::Error)]
pub enum SoundEngineError {
    /// The audio subsystem could not allocate an effect sink for a session.
    #[error("failed to bind {effect} for session {session}: {reason}")]
    ResourceBind {
        effect: EffectKind,
        session: SessionId,
        reason: String,
    },
    /// A parameter write into a bound sink was rejected.
    #[error("failed to write {effect} parameter: {reason}")]
    SinkWrite { effect: EffectKind, reason: String },
    /// Volume or settings could not be read from the host.
    #[error("configuration read failed: {0}")]
    ConfigurationRead(String),
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("{0}")]
    Message(String),
    /// Wrapper around standard IO errors.
    #[error("{0}")]
    Io(#[from] std::io::Error),
    #[error("{0}")]
    Json(#[from] serde_json::Error),
}

impl SoundEngineError {
    /// Creates a new error that simply wraps the provided message.
    pub fn msg<T: Into<String>>(msg: T) -> Self {
        Self::Message(msg.into())
    }

    pub fn sink_write(effect: EffectKind, reason: impl Into<String>) -> Self {
        Self::SinkWrite {
            effect,
            reason: reason.into(),
        }
    }

    pub fn configuration_read(reason: impl Into<String>) -> Self {
        Self::ConfigurationRead(reason.into())
    }
}

impl From<&str> for SoundEngineError {
    fn from(value: &str) -> Self {
        Self::msg(value)
    }
}

impl From<String> for SoundEngineError {
    fn from(value: String) -> Self {
        Self::Message(value)
    }
}
