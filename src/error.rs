use thiserror::Error;

/// Errors produced by the PTS core.
///
/// Variants map onto the failure classes the route layer needs to tell apart;
/// see [`PtsError::kind`].
#[derive(Error, Debug)]
pub enum PtsError {
    /// Malformed envelope, or the controller flagged the whole request as failed.
    #[error("Protocol error: {message}")]
    Protocol {
        message: String,
        data: Option<serde_json::Value>,
    },

    /// The controller rejected the digest credentials twice in a row.
    #[error("Authentication error: {0}")]
    Authentication(String),

    /// Non-401 HTTP status from the controller.
    #[error("HTTP error {status}: {body}")]
    Http { status: u16, body: String },

    /// Connection failure, DNS failure, broken body, ...
    #[error("Network error: {0}")]
    Network(String),

    /// Request exceeded the configured timeout.
    #[error("Timeout")]
    Timeout,

    /// Reconciliation operation on a pump without a pending transaction.
    #[error("No pending transaction for pump {pump}")]
    NotFound { pump: u32 },

    /// Caller supplied an invalid identifier or value.
    #[error("Validation error: {0}")]
    Validation(String),

    /// The controller answered `JSONPTS_ERROR_NOT_FOUND` to a single command.
    #[error("{command} is not configured on the controller")]
    NotConfigured { command: String },

    /// A pending transaction already exists for the pump.
    #[error("Pump {pump} already has a pending transaction")]
    Conflict { pump: u32 },

    /// Push payload signature missing or wrong.
    #[error("Signature error: {0}")]
    Signature(String),

    /// The persistence collaborator failed to store a record.
    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Coarse classification used to pick a user-facing status code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Device unreachable or misbehaving (503).
    Unavailable,
    /// Missing pending transaction (404).
    NotFound,
    /// Bad input (400).
    BadRequest,
    /// Anything else (500).
    Internal,
}

impl PtsError {
    pub fn protocol(message: impl Into<String>) -> Self {
        PtsError::Protocol {
            message: message.into(),
            data: None,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            PtsError::Protocol { .. }
            | PtsError::Authentication(_)
            | PtsError::Http { .. }
            | PtsError::Network(_)
            | PtsError::Timeout
            | PtsError::NotConfigured { .. } => ErrorKind::Unavailable,
            PtsError::NotFound { .. } => ErrorKind::NotFound,
            PtsError::Validation(_) | PtsError::Conflict { .. } | PtsError::Signature(_) => {
                ErrorKind::BadRequest
            }
            PtsError::Persistence(_) | PtsError::Serialization(_) => ErrorKind::Internal,
        }
    }

    /// Errors that will not go away on the next poll without operator action.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            PtsError::Authentication(_) | PtsError::Protocol { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, PtsError>;
