// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error types for dogu-core.
//!
//! Every failure the engine can observe maps onto one [`Error`] variant. The
//! classification helpers ([`Error::is_not_found`], [`Error::is_conflict`],
//! [`Error::is_permanent`], [`Error::retry_after`]) drive the requeue policy.

use std::time::Duration;

use thiserror::Error;

/// Result type using the engine [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// Engine errors.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// The requested object does not exist.
    #[error("{kind} '{name}' not found")]
    NotFound {
        /// Object kind.
        kind: String,
        /// Object name.
        name: String,
    },

    /// An object with the same key already exists.
    #[error("{kind} '{name}' already exists")]
    AlreadyExists {
        /// Object kind.
        kind: String,
        /// Object name.
        name: String,
    },

    /// A concurrent writer changed the object between read and write.
    #[error("Conflict writing {kind} '{name}': the object has been modified")]
    Conflict {
        /// Object kind.
        kind: String,
        /// Object name.
        name: String,
    },

    /// The object store backend failed.
    #[error("Store error during '{operation}': {details}")]
    Store {
        /// The operation that failed.
        operation: String,
        /// Error details.
        details: String,
    },

    /// JSON serialization/deserialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The declared configuration is invalid. Retrying without a spec change
    /// cannot succeed.
    #[error("Invalid {field}: {message}")]
    Validation {
        /// The field that failed validation.
        field: String,
        /// The validation error message.
        message: String,
    },

    /// The requested mutation is not allowed for the object's current state.
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// A volume claim has not reached its requested capacity yet.
    #[error("Volume claim '{claim}' not yet resized: requested {requested}, capacity {capacity}")]
    NotYetResized {
        /// Claim name.
        claim: String,
        /// Requested size.
        requested: String,
        /// Currently reported capacity.
        capacity: String,
        /// How long to wait before polling again.
        wait: Duration,
    },

    /// An external collaborator (registry, config store, ...) failed.
    #[error("{service} failed: {message}")]
    Service {
        /// Collaborator name.
        service: &'static str,
        /// Error details.
        message: String,
    },

    /// A named pipeline step failed.
    #[error("Step '{step}' failed: {source}")]
    Step {
        /// The failing step.
        step: &'static str,
        /// The underlying error.
        #[source]
        source: Box<Error>,
    },

    /// An object is missing a required metadata field.
    #[error("Missing object key: {0}")]
    MissingObjectKey(&'static str),

    /// A persisted workflow state is not registered with the executor.
    #[error("Unknown workflow state '{0}'")]
    UnknownWorkflowState(String),
}

impl Error {
    /// Create a not-found error.
    pub fn not_found(kind: impl Into<String>, name: impl Into<String>) -> Self {
        Self::NotFound {
            kind: kind.into(),
            name: name.into(),
        }
    }

    /// Create a conflict error.
    pub fn conflict(kind: impl Into<String>, name: impl Into<String>) -> Self {
        Self::Conflict {
            kind: kind.into(),
            name: name.into(),
        }
    }

    /// Create a validation error.
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Create a store backend error.
    pub fn store(operation: impl Into<String>, details: impl ToString) -> Self {
        Self::Store {
            operation: operation.into(),
            details: details.to_string(),
        }
    }

    /// Create a collaborator failure.
    pub fn service(service: &'static str, message: impl Into<String>) -> Self {
        Self::Service {
            service,
            message: message.into(),
        }
    }

    /// Wrap this error with the name of the step that produced it.
    pub fn in_step(self, step: &'static str) -> Self {
        match self {
            // Keep the innermost step name.
            Self::Step { .. } => self,
            other => Self::Step {
                step,
                source: Box::new(other),
            },
        }
    }

    /// Innermost error, unwrapping step context.
    pub fn root(&self) -> &Error {
        match self {
            Self::Step { source, .. } => source.root(),
            other => other,
        }
    }

    /// Whether the error means "the object does not exist".
    pub fn is_not_found(&self) -> bool {
        matches!(self.root(), Self::NotFound { .. })
    }

    /// Whether the error is an optimistic-concurrency conflict.
    pub fn is_conflict(&self) -> bool {
        matches!(self.root(), Self::Conflict { .. })
    }

    /// Whether the error cannot be fixed by retrying without an external change.
    pub fn is_permanent(&self) -> bool {
        matches!(
            self.root(),
            Self::Validation { .. } | Self::Forbidden(_) | Self::UnknownWorkflowState(_)
        )
    }

    /// Explicit wait requested by the error, if any.
    pub fn retry_after(&self) -> Option<Duration> {
        match self.root() {
            Self::NotYetResized { wait, .. } => Some(*wait),
            _ => None,
        }
    }

    /// Machine-readable code, used as a short label in events and logs.
    pub fn code(&self) -> &'static str {
        match self.root() {
            Self::NotFound { .. } => "NOT_FOUND",
            Self::AlreadyExists { .. } => "ALREADY_EXISTS",
            Self::Conflict { .. } => "CONFLICT",
            Self::Store { .. } => "STORE_ERROR",
            Self::Json(_) => "JSON_ERROR",
            Self::Validation { .. } => "VALIDATION_ERROR",
            Self::Forbidden(_) => "FORBIDDEN",
            Self::NotYetResized { .. } => "NOT_YET_RESIZED",
            Self::Service { .. } => "SERVICE_ERROR",
            Self::MissingObjectKey(_) => "MISSING_OBJECT_KEY",
            Self::UnknownWorkflowState(_) => "UNKNOWN_WORKFLOW_STATE",
            Self::Step { .. } => "STEP_FAILED",
        }
    }
}
