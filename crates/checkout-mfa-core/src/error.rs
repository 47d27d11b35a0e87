use thiserror::Error;

/// Checkout MFA gate errors.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum GateError {
    /// Missing or malformed configuration. Fatal at initialization.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Transaction context failed validation; no remote call was made.
    #[error("invalid transaction context field '{field}': {reason}")]
    Validation { field: &'static str, reason: String },

    /// The MFA service answered with a non-success HTTP status.
    #[error("MFA service returned HTTP {status}: {body}")]
    Transport { status: u16, body: String },

    /// The request could not complete (unreachable host, refused, timed out).
    #[error("MFA service unreachable: {0}")]
    Network(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    /// A challenge was requested but no decision has been recorded yet.
    #[error("no decision recorded for this session")]
    NoDecision,
}

impl GateError {
    pub fn validation(field: &'static str, reason: impl Into<String>) -> Self {
        Self::Validation {
            field,
            reason: reason.into(),
        }
    }

    /// Field name carried by a validation failure.
    pub fn field(&self) -> Option<&'static str> {
        match self {
            Self::Validation { field, .. } => Some(field),
            _ => None,
        }
    }

    /// True for failures of the remote call itself (as opposed to local rejections).
    pub fn is_remote(&self) -> bool {
        matches!(
            self,
            Self::Transport { .. } | Self::Network(_) | Self::Serialization(_)
        )
    }
}

impl From<serde_json::Error> for GateError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

/// Result type for gate operations.
pub type GateResult<T> = Result<T, GateError>;
