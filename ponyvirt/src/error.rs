//! Error types for domain and registry operations.
//!
//! Backend failures arrive as [`BackendError`] values carrying the backend's
//! own error code. They are interpreted in exactly one place,
//! [`BackendError::translate`]; everything else propagates errors untouched.

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur while managing domains.
#[derive(Error, Debug)]
pub enum Error {
    /// The domain no longer resolves. Callers must look it up again.
    #[error("Domain not found: {domain} (during {operation})")]
    NoDomain {
        domain: String,
        operation: &'static str,
    },

    /// The requested transition is illegal in the domain's current state.
    #[error("Invalid operation '{operation}' for domain {domain} in its current state")]
    InvalidOperation {
        domain: String,
        operation: &'static str,
    },

    /// All virtio disk slots (vda..vdz) are in use.
    #[error("No free disk slots left on domain {domain}")]
    SlotsExhausted { domain: String },

    /// The backend returned a document this crate cannot interpret.
    #[error("Malformed configuration of domain {domain} (during {operation}): {source}")]
    MalformedConfig {
        domain: String,
        operation: &'static str,
        #[source]
        source: DocumentError,
    },

    /// The live configuration has no device of the requested kind.
    #[error("Domain {domain} has no {device}")]
    DeviceNotFound {
        domain: String,
        device: &'static str,
    },

    /// The domain template could not be read.
    #[error("Failed to load domain template {path}: {source}")]
    Template {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Any other backend failure, passed through with its diagnostic.
    #[error("Backend error during {operation} on {domain}: {source}")]
    Backend {
        domain: String,
        operation: &'static str,
        #[source]
        source: BackendError,
    },
}

/// Result type alias for domain operations.
pub type Result<T> = std::result::Result<T, Error>;

/// A configuration document or fragment that cannot be read or written.
///
/// Produced by the codec, which does not know which domain a document
/// belongs to; [`DocumentError::in_domain`] attaches that context.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{0}")]
pub struct DocumentError(pub String);

impl DocumentError {
    pub(crate) fn new(msg: impl fmt::Display) -> Self {
        DocumentError(msg.to_string())
    }

    /// Wrap as [`Error::MalformedConfig`] for `domain` and `operation`.
    pub fn in_domain(self, domain: &str, operation: &'static str) -> Error {
        Error::MalformedConfig {
            domain: domain.to_string(),
            operation,
            source: self,
        }
    }
}

/// Result type alias for codec operations.
pub type DocumentResult<T> = std::result::Result<T, DocumentError>;

/// Backend-native error classification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ErrorCode {
    /// Operation not valid for the domain's current state.
    OperationInvalid,
    /// The domain does not exist (any more).
    NoDomain,
    /// Any other backend code, by its symbolic name.
    Other(String),
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorCode::OperationInvalid => f.write_str("OperationInvalid"),
            ErrorCode::NoDomain => f.write_str("NoDomain"),
            ErrorCode::Other(name) => f.write_str(name),
        }
    }
}

/// An error reported by a [`Backend`](crate::Backend) call.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message} (code {code})")]
pub struct BackendError {
    pub code: ErrorCode,
    pub message: String,
}

impl BackendError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// Map a backend error onto the crate's error taxonomy.
    ///
    /// This is the only place backend codes are interpreted.
    pub fn translate(self, domain: &str, operation: &'static str) -> Error {
        match self.code {
            ErrorCode::OperationInvalid => Error::InvalidOperation {
                domain: domain.to_string(),
                operation,
            },
            ErrorCode::NoDomain => Error::NoDomain {
                domain: domain.to_string(),
                operation,
            },
            ErrorCode::Other(_) => Error::Backend {
                domain: domain.to_string(),
                operation,
                source: self,
            },
        }
    }
}

/// Result type alias for raw backend calls.
pub type BackendResult<T> = std::result::Result<T, BackendError>;
