// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Error types for the agent operator.
//!
//! This module provides specialized error types for:
//! - Platform API operations (object reads and writes against the API server)
//! - Feature registration and configuration
//! - Reconciliation invariants (immutable workload names, ownership rules)
//!
//! Every error falls in one of three classes (see [`ErrorClass`]) which decide
//! how the top-level reconcile loop reacts: transient errors are retried after
//! a short requeue without touching status, validation and invariant errors
//! are surfaced in the owner's status conditions.

use thiserror::Error;

/// How the reconcile loop treats an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Not found or write conflict; retried after a short requeue.
    Transient,
    /// Invalid user configuration; surfaced in status, retried on the default schedule.
    Validation,
    /// Broken operator invariant; surfaced in status, repeats until the spec is fixed.
    Invariant,
}

/// Errors returned by the platform API port.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PlatformError {
    /// Object does not exist (HTTP 404)
    #[error("{kind} '{name}' not found")]
    NotFound {
        /// Object kind
        kind: String,
        /// `namespace/name` or `name` of the object
        name: String,
    },

    /// Object already exists on create (HTTP 409)
    #[error("{kind} '{name}' already exists")]
    AlreadyExists {
        /// Object kind
        kind: String,
        /// `namespace/name` or `name` of the object
        name: String,
    },

    /// Object was modified concurrently (HTTP 409 on update)
    #[error("conflict writing {kind} '{name}': the object has been modified")]
    Conflict {
        /// Object kind
        kind: String,
        /// `namespace/name` or `name` of the object
        name: String,
    },

    /// Any other API server failure
    #[error("API error {code} on {kind} '{name}': {message}")]
    Api {
        /// Object kind
        kind: String,
        /// `namespace/name` or `name` of the object
        name: String,
        /// HTTP status code returned by the API server
        code: u16,
        /// Message returned by the API server
        message: String,
    },

    /// Object could not be converted to or from its wire representation
    #[error("failed to convert {kind} '{name}': {reason}")]
    Serialization {
        /// Object kind
        kind: String,
        /// `namespace/name` or `name` of the object
        name: String,
        /// Serializer error message
        reason: String,
    },
}

impl PlatformError {
    /// Returns true if the object was not found.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Returns true if the write lost a race with another writer.
    #[must_use]
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. } | Self::AlreadyExists { .. })
    }
}

/// Errors raised by features and the pod template managers.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FeatureError {
    /// The same feature id was registered twice
    #[error("feature '{feature}' is already registered")]
    DuplicateRegistration {
        /// Feature id
        feature: String,
    },

    /// Two configuration sources that exclude each other are both set
    #[error("{feature}: '{first}' and '{second}' cannot be set at the same time")]
    MutuallyExclusiveConfig {
        /// Feature or spec section reporting the error
        feature: String,
        /// First field
        first: String,
        /// Second field
        second: String,
    },

    /// A configuration field holds a value the feature does not accept
    #[error("{feature}: {reason}")]
    InvalidConfig {
        /// Feature id
        feature: String,
        /// What is wrong with the value
        reason: String,
    },

    /// Embedded configuration could not be serialized
    #[error("{feature}: failed to serialize configuration: {reason}")]
    Serialization {
        /// Feature id
        feature: String,
        /// Serializer error message
        reason: String,
    },

    /// A merge function refused to combine two entries with the same identity
    #[error("cannot merge '{key}': {reason}")]
    MergeConflict {
        /// Identity of the entry (env var name, volume name, ...)
        key: String,
        /// Explanation from the merge function
        reason: String,
    },
}

/// Composite error returned by the reconcilers.
#[derive(Error, Debug, Clone)]
pub enum OperatorError {
    /// Platform API failure
    #[error(transparent)]
    Platform(#[from] PlatformError),

    /// Feature configuration failure
    #[error(transparent)]
    Feature(#[from] FeatureError),

    /// A workload name changed after the workload was created
    #[error("{component} workload cannot be renamed once created (current '{current}', desired '{desired}')")]
    ImmutableRename {
        /// Component name
        component: String,
        /// Name recorded in status
        current: String,
        /// Name computed from the spec
        desired: String,
    },

    /// Owner reference requested on an object that cannot carry one
    #[error("cannot attach owner reference to {kind} '{name}': {reason}")]
    OwnerReference {
        /// Object kind
        kind: String,
        /// Object name
        name: String,
        /// Why the reference is not allowed
        reason: String,
    },

    /// The owner resource lacks metadata the reconciler depends on
    #[error("owner is missing {field}")]
    MissingOwnerMetadata {
        /// Missing metadata field
        field: String,
    },

    /// Generic error for failures that don't fit other categories
    #[error("reconcile failed: {0}")]
    Generic(String),
}

impl OperatorError {
    /// Returns the class deciding how the reconcile loop reacts to this error.
    #[must_use]
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::Platform(
                PlatformError::NotFound { .. }
                | PlatformError::AlreadyExists { .. }
                | PlatformError::Conflict { .. },
            ) => ErrorClass::Transient,
            // Any other API failure, 5xx included, is reported in status
            Self::Platform(PlatformError::Api { .. } | PlatformError::Serialization { .. })
            | Self::Feature(
                FeatureError::MutuallyExclusiveConfig { .. }
                | FeatureError::InvalidConfig { .. }
                | FeatureError::Serialization { .. }
                | FeatureError::MergeConflict { .. },
            )
            | Self::Generic(_) => ErrorClass::Validation,
            Self::Feature(FeatureError::DuplicateRegistration { .. })
            | Self::ImmutableRename { .. }
            | Self::OwnerReference { .. }
            | Self::MissingOwnerMetadata { .. } => ErrorClass::Invariant,
        }
    }

    /// Returns true if this error is transient and the pass should simply be retried.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        self.class() == ErrorClass::Transient
    }

    /// Returns the status condition reason code for this error.
    #[must_use]
    pub fn status_reason(&self) -> &'static str {
        match self {
            Self::Platform(PlatformError::NotFound { .. }) => "NotFound",
            Self::Platform(PlatformError::AlreadyExists { .. }) => "AlreadyExists",
            Self::Platform(PlatformError::Conflict { .. }) => "Conflict",
            Self::Platform(PlatformError::Api { .. }) => "ApiError",
            Self::Platform(PlatformError::Serialization { .. }) => "SerializationFailed",
            Self::Feature(FeatureError::DuplicateRegistration { .. }) => "DuplicateFeature",
            Self::Feature(
                FeatureError::MutuallyExclusiveConfig { .. } | FeatureError::InvalidConfig { .. },
            ) => "InvalidConfiguration",
            Self::Feature(FeatureError::Serialization { .. }) => "SerializationFailed",
            Self::Feature(FeatureError::MergeConflict { .. }) => "MergeConflict",
            Self::ImmutableRename { .. } => "ImmutableRename",
            Self::OwnerReference { .. } => "InvalidOwnerReference",
            Self::MissingOwnerMetadata { .. } => "InvalidOwner",
            Self::Generic(_) => "ReconcileFailed",
        }
    }
}

// Conversion from anyhow::Error for call sites built on anyhow
impl From<anyhow::Error> for OperatorError {
    fn from(err: anyhow::Error) -> Self {
        Self::Generic(err.to_string())
    }
}

/// Result alias used across the reconcilers.
pub type Result<T, E = OperatorError> = std::result::Result<T, E>;

#[cfg(test)]
#[path = "errors_tests.rs"]
mod errors_tests;
