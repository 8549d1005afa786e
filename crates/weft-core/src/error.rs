//! Error types shared by both halves of the control plane.
//!
//! One enum, one variant per failure kind the public operations can surface.
//! Storage and codec errors are folded in at the boundary so callers only
//! ever match on these kinds.

use std::time::Duration;

use crate::storage::StoreError;

/// Failure kinds surfaced by control-plane operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CoreError {
    /// A peer, account, or setup key is unknown
    #[error("not found: {0}")]
    NotFound(String),

    /// A peer public key is already registered
    #[error("already exists: {0}")]
    AlreadyExists(String),

    /// The caller is not authorized; for login this triggers registration
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// A setup key is expired, revoked, or over its usage limit
    #[error("failed precondition: {0}")]
    FailedPrecondition(String),

    /// Malformed input: public key, setup key UUID, or CIDR
    #[error("invalid argument: {0}")]
    Invalid(String),

    /// Storage failure or protocol violation
    #[error("internal: {0}")]
    Internal(String),

    /// A connection attempt did not complete within its deadline
    #[error("timed out after {elapsed:?}")]
    Timeout {
        /// How long the operation was given
        elapsed: Duration,
    },

    /// No host address remains in the account network
    #[error("address pool exhausted: {0}")]
    Exhausted(String),
}

impl CoreError {
    /// Returns true if retrying the same operation may succeed.
    ///
    /// Connection deadlines are transient by nature. Everything else either
    /// reflects persistent state (`NotFound`, `AlreadyExists`, `Exhausted`)
    /// or a bug on one side of the wire.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    /// Stable machine-readable kind, used on the management wire.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "not_found",
            Self::AlreadyExists(_) => "already_exists",
            Self::PermissionDenied(_) => "permission_denied",
            Self::FailedPrecondition(_) => "failed_precondition",
            Self::Invalid(_) => "invalid",
            Self::Internal(_) => "internal",
            Self::Timeout { .. } => "timeout",
            Self::Exhausted(_) => "exhausted",
        }
    }

    /// Rebuild an error from its wire form.
    ///
    /// Unknown kinds collapse to `Internal`; a peer speaking a newer protocol
    /// must not be able to crash an older one.
    #[must_use]
    pub fn from_wire(kind: &str, message: &str) -> Self {
        let message = message.to_string();
        match kind {
            "not_found" => Self::NotFound(message),
            "already_exists" => Self::AlreadyExists(message),
            "permission_denied" => Self::PermissionDenied(message),
            "failed_precondition" => Self::FailedPrecondition(message),
            "invalid" => Self::Invalid(message),
            "exhausted" => Self::Exhausted(message),
            _ => Self::Internal(message),
        }
    }
}

impl From<StoreError> for CoreError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(what) => Self::NotFound(what),
            StoreError::Internal(what) => Self::Internal(what),
        }
    }
}

impl From<weft_proto::ProtocolError> for CoreError {
    fn from(err: weft_proto::ProtocolError) -> Self {
        Self::Invalid(err.to_string())
    }
}
