//! Domain error type.

use thiserror::Error;

/// Result alias used across the simulator crates.
pub type Result<T> = std::result::Result<T, Error>;

/// Error kinds surfaced by the enrollment core.
#[derive(Debug, Error)]
pub enum Error {
    /// Missing profile, keychain item, or payload reference.
    #[error("not found: {0}")]
    NotFound(String),

    /// Malformed or contradictory input (empty profile, duplicate MDM
    /// payload, server URL mismatch).
    #[error("validation failed: {0}")]
    Validation(String),

    /// Declared but unimplemented behavior (non-RSA key, non-mTLS MDM
    /// authentication, unknown subject OID).
    #[error("unsupported: {0}")]
    Unsupported(String),

    /// A persisted cross-reference does not resolve.
    #[error("broken reference: {0}")]
    BrokenReference(String),

    /// The SCEP or MDM server returned a non-success protocol status.
    #[error("enrollment rejected with status {status}: {reason}")]
    EnrollmentRejected { status: String, reason: String },

    /// Network or protocol failure from an external collaborator.
    #[error("transport error: {0}")]
    Transport(String),

    /// Persistence layer failure.
    #[error("storage error: {0}")]
    Storage(String),

    /// Key generation, encoding, or signing failure.
    #[error("crypto error: {0}")]
    Crypto(String),

    /// The profile document failed to parse.
    #[error("profile parse error: {0}")]
    Parse(#[from] plist::Error),
}

impl Error {
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn unsupported(msg: impl Into<String>) -> Self {
        Self::Unsupported(msg.into())
    }

    pub fn broken_reference(msg: impl Into<String>) -> Self {
        Self::BrokenReference(msg.into())
    }

    pub fn transport(msg: impl Into<String>) -> Self {
        Self::Transport(msg.into())
    }

    pub fn storage(err: impl std::fmt::Display) -> Self {
        Self::Storage(err.to_string())
    }

    pub fn crypto(err: impl std::fmt::Display) -> Self {
        Self::Crypto(err.to_string())
    }

    /// True for the Not-Found kind only.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}
