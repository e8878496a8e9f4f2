//! Error taxonomy shared by the whole workspace. `RemoteError` is what a
//! `client` implementation returns (§6's "remote client contract"); every
//! other crate deals in `ReconcileError`, which classifies and wraps it.

use snafu::Snafu;

use crate::resource::{ProjectState, ResourceKind};

/// The small, closed tagging scheme the remote client contract returns
/// errors under. The retry manager's classification (§4.7) depends on this
/// tagging rather than string matching.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RemoteErrorKind {
    Transient,
    Unauthorized,
    Forbidden,
    NotFound,
    Conflict,
    InvalidRequest,
    Internal,
}

/// An error surfaced by a remote-client implementation (HTTP, gRPC, or the
/// in-crate mock), tagged per §6.
#[derive(Clone, Debug, Snafu)]
#[snafu(display("{kind:?} calling remote control-plane: {message}"))]
pub struct RemoteError {
    pub kind: RemoteErrorKind,
    pub message: String,
}

impl RemoteError {
    pub fn new(kind: RemoteErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn transient(message: impl Into<String>) -> Self {
        Self::new(RemoteErrorKind::Transient, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(RemoteErrorKind::NotFound, message)
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(RemoteErrorKind::Conflict, message)
    }
}

/// The core error taxonomy from §7, one variant per error kind. Every
/// variant that wraps a lower-level error does so via `snafu`'s
/// `context_selector` pattern so call sites read `Foo { field }.fail()?`
/// rather than hand-built `From` impls.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum ReconcileError {
    #[snafu(display("operation cancelled"))]
    Cancelled,

    #[snafu(display("operation '{operation}' timed out after {elapsed:?}"))]
    Timeout {
        operation: String,
        elapsed: std::time::Duration,
    },

    #[snafu(display("transient error calling the remote control-plane: {source}"))]
    Transient { source: RemoteError },

    #[snafu(display("unauthorized: {source}"))]
    Unauthorized { source: RemoteError },

    #[snafu(display("forbidden: {source}"))]
    Forbidden { source: RemoteError },

    #[snafu(display("{kind:?} '{name}' not found"))]
    NotFound { kind: ResourceKind, name: String },

    #[snafu(display("{kind:?} '{name}' already exists (conflict)"))]
    Conflict { kind: ResourceKind, name: String },

    #[snafu(display("invalid request: {message}"))]
    InvalidRequest { message: String },

    #[snafu(display(
        "resource '{resource}' depends on '{missing_target}', which is not in the resource set"
    ))]
    InvalidDependency {
        resource: String,
        missing_target: String,
    },

    #[snafu(display("circular dependency detected: {}", path.join(" -> ")))]
    CircularDependency { path: Vec<String> },

    #[snafu(display(
        "quota exceeded for {kind:?}: requested {requested}, limit {limit}"
    ))]
    QuotaExceeded {
        kind: ResourceKind,
        requested: usize,
        limit: usize,
    },

    #[snafu(display("circuit open for ({op_type:?}, {kind:?})"))]
    CircuitOpen {
        op_type: crate::operation::OperationType,
        kind: ResourceKind,
    },

    #[snafu(display("validation failed: {message}"))]
    ValidationFailed { message: String },

    #[snafu(display("manual intervention aborted the operation: {reason}"))]
    ManualAbort { reason: String },

    #[snafu(display("internal error: {message}"))]
    Internal { message: String },

    #[snafu(display(
        "discovery for project '{project_id}' failed with {} underlying error(s)",
        sources.len()
    ))]
    DiscoveryFailed {
        project_id: String,
        sources: Vec<ReconcileError>,
        /// Whatever state the discovery pass did manage to gather before
        /// hitting these errors, so a caller can decide whether a partial
        /// result is still good enough to act on.
        partial_state: ProjectState,
    },

    #[snafu(display("duplicate {kind} resource name/identity: {name}"))]
    DuplicateResourceName { kind: ResourceKind, name: String },
}

impl ReconcileError {
    /// Classify a `RemoteError` the way §7's propagation policy requires.
    /// `kind` is the resource kind the call that produced `err` was acting
    /// on, so `NotFound`/`Conflict` report the resource that actually
    /// failed rather than a fixed stand-in.
    pub fn from_remote(err: RemoteError, kind: ResourceKind) -> Self {
        match err.kind {
            RemoteErrorKind::Transient => Transient { source: err }.build(),
            RemoteErrorKind::Unauthorized => Unauthorized { source: err }.build(),
            RemoteErrorKind::Forbidden => Forbidden { source: err }.build(),
            RemoteErrorKind::NotFound => NotFound {
                kind,
                name: err.message,
            }
            .build(),
            RemoteErrorKind::Conflict => Conflict {
                kind,
                name: err.message,
            }
            .build(),
            RemoteErrorKind::InvalidRequest => InvalidRequest {
                message: err.message,
            }
            .build(),
            RemoteErrorKind::Internal => Internal {
                message: err.message,
            }
            .build(),
        }
    }

    /// Whether the retry manager should treat this as retryable transient
    /// failure, per §4.7's error classification.
    pub fn is_transient(&self) -> bool {
        matches!(self, ReconcileError::Transient { .. })
    }

    /// Whether §4.6's stop-or-continue policy treats this as immediately
    /// fatal, regardless of remaining retries.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ReconcileError::Unauthorized { .. }
                | ReconcileError::Forbidden { .. }
                | ReconcileError::InvalidRequest { .. }
                | ReconcileError::ValidationFailed { .. }
        )
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, ReconcileError::Conflict { .. })
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, ReconcileError::NotFound { .. })
    }

    /// Substring classification layered on top of the tag-based
    /// `is_transient` for errors whose `RemoteError` was only loosely
    /// tagged by the client (§4.7).
    pub fn looks_transient(&self) -> bool {
        if self.is_transient() {
            return true;
        }
        const MARKERS: &[&str] = &[
            "timeout",
            "connection refused",
            "rate limit",
            "throttling",
            "service unavailable",
            "internal server error",
        ];
        let message = self.to_string().to_lowercase();
        MARKERS.iter().any(|marker| message.contains(marker))
    }

    /// Whether this error indicates the remote side needs a human to
    /// intervene (quota/billing/maintenance) rather than a plain retry
    /// (§4.7).
    pub fn looks_manual(&self) -> bool {
        const MARKERS: &[&str] = &[
            "quota exceeded",
            "payment required",
            "maintenance",
            "cluster busy",
        ];
        let message = self.to_string().to_lowercase();
        MARKERS.iter().any(|marker| message.contains(marker))
    }
}
