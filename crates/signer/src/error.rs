use thiserror::Error;

/// Errors raised while building or signing a transaction envelope.
#[derive(Debug, Error)]
pub enum SignerError {
    #[error("invalid private key: {0}")]
    InvalidPrivateKey(String),

    #[error("invalid transaction field `{field}`: {reason}")]
    InvalidField { field: &'static str, reason: String },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl SignerError {
    pub(crate) fn invalid_field(field: &'static str, reason: impl Into<String>) -> Self {
        SignerError::InvalidField {
            field,
            reason: reason.into(),
        }
    }
}
