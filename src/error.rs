// ⚠️ Error taxonomy for the engine and its collaborators
//
// Validation and total provider failure surface to callers. Everything else
// (normalization misses, degenerate projections) degrades to well-defined
// "no data" results and never reaches this type.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, EngineError>;

#[derive(Debug, Error)]
pub enum EngineError {
    /// Malformed or disallowed query parameter
    #[error("invalid parameter `{param}`: {message}")]
    Validation { param: &'static str, message: String },

    /// Every provider in the chain failed
    #[error("no record provider available ({})", attempts.join("; "))]
    UpstreamUnavailable { attempts: Vec<String> },

    /// No usable historical or projected value
    #[error("insufficient data: {0}")]
    InsufficientData(String),

    /// Mapping rule rejected at load time
    #[error("invalid mapping rule `{canonical_name}`: {reason}")]
    InvalidRule {
        canonical_name: String,
        reason: String,
    },
}

impl EngineError {
    pub fn validation(param: &'static str, message: impl Into<String>) -> Self {
        EngineError::Validation {
            param,
            message: message.into(),
        }
    }

    /// Name of the offending parameter for validation failures
    pub fn param(&self) -> Option<&'static str> {
        match self {
            EngineError::Validation { param, .. } => Some(param),
            _ => None,
        }
    }
}

/// Failure of a single record provider. Absorbed by the provider chain.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("{provider}: not configured")]
    NotConfigured { provider: &'static str },

    #[error("{provider}: request failed: {message}")]
    Request {
        provider: &'static str,
        message: String,
    },

    #[error("{provider}: unexpected response: {message}")]
    BadResponse {
        provider: &'static str,
        message: String,
    },

    #[error("{provider}: database error: {source}")]
    Database {
        provider: &'static str,
        #[source]
        source: rusqlite::Error,
    },

    #[error("{provider}: {source}")]
    Io {
        provider: &'static str,
        #[source]
        source: std::io::Error,
    },
}
