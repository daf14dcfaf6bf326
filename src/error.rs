//! Error types for the quaff pipeline.
//!
//! Every failure the pipeline can surface is one variant of [`QuaffError`].
//! Store implementations and the CLI work in `anyhow`; their errors are
//! wrapped into [`QuaffError::Persistence`] where they cross into the
//! sync loop.

use thiserror::Error;

/// Result type for pipeline operations.
pub type QuaffResult<T> = Result<T, QuaffError>;

/// Errors that can occur while resolving, fetching, decoding, or mapping.
#[derive(Error, Debug)]
pub enum QuaffError {
    /// Network or native I/O failure while fetching a page.
    #[error("transport error for {uri}: {message}")]
    Transport {
        /// Sanitised URI that was being fetched.
        uri: String,
        /// Underlying failure.
        message: String,
    },

    /// A specific transport backend could not be constructed.
    #[error("transport '{name}' unusable: {reason}")]
    BadTransport {
        /// Registry key of the backend.
        name: String,
        /// Why it could not be built.
        reason: String,
    },

    /// Requested, default, and fallback transports all failed to build.
    #[error("unable to create a transport '{requested}' after also trying default '{default}' and fallback '{fallback}'")]
    NoTransportAvailable {
        /// Transport requested by the endpoint (may be empty).
        requested: String,
        /// Configured default transport.
        default: String,
        /// Configured fallback transport.
        fallback: String,
    },

    /// None of the response content types matched a configured signature.
    #[error("unknown content type: {0}")]
    UnknownContentType(String),

    /// The configured item path was not present in the decoded payload.
    #[error("item path '{0}' not found in response")]
    ItemPathNotFound(String),

    /// The response body could not be decoded.
    #[error("failed to decode {kind} response: {message}")]
    ResponseDecode {
        /// Logical content type (`json`, `xml`, `html`).
        kind: String,
        /// Parser message.
        message: String,
    },

    /// A value could not be mapped onto an entity.
    #[error("mapping error: {0}")]
    Mapping(String),

    /// No field map is configured for the model/endpoint pair.
    #[error("no field map for model '{model}' on endpoint '{alias}'")]
    NoFieldMap {
        /// Model name.
        model: String,
        /// Endpoint alias.
        alias: String,
    },

    /// The endpoint declares no model to map into.
    #[error("endpoint '{0}' has no model class")]
    NoModelClass(String),

    /// No endpoint or api is configured for an alias.
    #[error("unknown endpoint '{0}'")]
    UnknownEndpoint(String),

    /// A query parameter failed its validation spec.
    #[error("invalid parameter '{name}': {reason}")]
    InvalidParam {
        /// Parameter name.
        name: String,
        /// What was wrong with it.
        reason: String,
    },

    /// The requested mapping is not supported.
    #[error("unsupported: {0}")]
    Unsupported(String),

    /// The entity store rejected an operation.
    #[error("persistence error: {0}")]
    Persistence(#[source] anyhow::Error),

    /// Invalid configuration.
    #[error("configuration error: {0}")]
    Config(String),

    /// The pass was cancelled or ran past its deadline.
    #[error("sync cancelled")]
    Cancelled,
}

impl QuaffError {
    /// Creates a transport error.
    pub fn transport(uri: impl Into<String>, message: impl ToString) -> Self {
        Self::Transport {
            uri: uri.into(),
            message: message.to_string(),
        }
    }

    /// Creates a decode error for a logical content type.
    pub fn decode(kind: impl Into<String>, message: impl ToString) -> Self {
        Self::ResponseDecode {
            kind: kind.into(),
            message: message.to_string(),
        }
    }

    /// Returns true for configuration errors surfaced before any network call.
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            QuaffError::NoModelClass(_)
                | QuaffError::NoTransportAvailable { .. }
                | QuaffError::UnknownEndpoint(_)
                | QuaffError::InvalidParam { .. }
                | QuaffError::Config(_)
        )
    }

    /// Returns true if the error ends the current endpoint pass.
    ///
    /// Only per-item persistence failures are recovered inside the loop.
    pub fn is_fatal_for_pass(&self) -> bool {
        !matches!(self, QuaffError::Persistence(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_errors() {
        assert!(QuaffError::NoModelClass("list:entries".into()).is_config_error());
        assert!(QuaffError::UnknownEndpoint("x".into()).is_config_error());
        assert!(!QuaffError::transport("https://x", "reset").is_config_error());
    }

    #[test]
    fn persistence_is_the_only_recoverable_error() {
        assert!(!QuaffError::Persistence(anyhow::anyhow!("disk full")).is_fatal_for_pass());
        assert!(QuaffError::ItemPathNotFound("data.items".into()).is_fatal_for_pass());
        assert!(QuaffError::Cancelled.is_fatal_for_pass());
    }

    #[test]
    fn error_display() {
        let err = QuaffError::NoTransportAvailable {
            requested: "curl".into(),
            default: "http".into(),
            fallback: "file".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("curl"));
        assert!(msg.contains("fallback 'file'"));
    }
}
