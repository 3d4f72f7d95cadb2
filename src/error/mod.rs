//! Error types for tendril.

use thiserror::Error;

/// Primary error type for all tendril operations.
#[derive(Error, Debug)]
pub enum TendrilError {
    #[error("Not found: {kind} {id}")]
    NotFound { kind: &'static str, id: String },

    #[error("Already exists: {kind} {id}")]
    AlreadyExists { kind: &'static str, id: String },

    #[error("Corrupt message tree: walk from {message_id} exceeded {limit} steps")]
    CorruptTree { message_id: String, limit: usize },

    #[error("Run already active for message {0}")]
    DuplicateRun(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Upstream error: {0}")]
    Upstream(String),

    #[error("Stream idle timeout after {0}ms")]
    Timeout(u64),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),
}

/// Broad error category for routing recovery logic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    NotFound,
    Conflict,
    Corruption,
    Upstream,
    Storage,
    Configuration,
    Timeout,
    Serialization,
    Invalid,
}

impl TendrilError {
    pub fn chat_not_found(id: impl Into<String>) -> Self {
        Self::NotFound {
            kind: "chat",
            id: id.into(),
        }
    }

    pub fn message_not_found(id: impl Into<String>) -> Self {
        Self::NotFound {
            kind: "message",
            id: id.into(),
        }
    }

    /// Classify this error into a category.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::NotFound { .. } => ErrorCategory::NotFound,
            Self::AlreadyExists { .. } | Self::DuplicateRun(_) => ErrorCategory::Conflict,
            Self::CorruptTree { .. } => ErrorCategory::Corruption,
            Self::Upstream(_) => ErrorCategory::Upstream,
            Self::Storage(_) | Self::Io(_) => ErrorCategory::Storage,
            Self::Configuration(_) | Self::ConfigParse(_) => ErrorCategory::Configuration,
            Self::Timeout(_) => ErrorCategory::Timeout,
            Self::Serialization(_) => ErrorCategory::Serialization,
            Self::InvalidArgument(_) | Self::InvalidState(_) => ErrorCategory::Invalid,
        }
    }

    /// Whether re-invoking the failed operation may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.category(),
            ErrorCategory::Upstream | ErrorCategory::Timeout | ErrorCategory::Storage
        )
    }
}

/// Convenience alias.
pub type Result<T> = std::result::Result<T, TendrilError>;
