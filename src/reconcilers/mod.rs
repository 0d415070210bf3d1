// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Reconciliation of `DatadogAgent` resources.
//!
//! # Reconciliation Architecture
//!
//! The operator follows the standard Kubernetes controller pattern:
//!
//! 1. **Watch** - the controller runtime calls [`Reconciler::reconcile`] at
//!    least once per change, never concurrently for the same owner
//! 2. **Reconcile** - build the desired objects of every component from the
//!    owner spec and the enabled features
//! 3. **Update** - create, update or delete platform objects so they match
//! 4. **Status** - report the outcome in the owner status
//!
//! # Modules
//!
//! - [`datadogagent`] - top-level pass over the three components
//! - [`protocol`] - per-component protocol shared by the component reconcilers
//! - [`agent`], [`clusteragent`], [`clusterchecksrunner`] - component descriptions
//! - [`workload`] - hash-based create/update/delete of one workload
//! - [`overrides`] - `spec.override` application
//! - [`status`] - condition helpers and the status updater

pub mod agent;
pub mod clusteragent;
pub mod clusterchecksrunner;
pub mod datadogagent;
pub mod overrides;
pub mod protocol;
pub mod status;
pub mod workload;

pub use datadogagent::{ReconcileOptions, ReconcileOutcome, Reconciler};

use std::time::Duration;

/// Delay after which a pass wants to be called again, if any.
///
/// Merging keeps the earliest request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Requeue(Option<Duration>);

impl Requeue {
    /// No particular request; the default period applies.
    #[must_use]
    pub fn none() -> Self {
        Self(None)
    }

    #[must_use]
    pub fn after_secs(secs: u64) -> Self {
        Self(Some(Duration::from_secs(secs)))
    }

    /// Keep the earliest of two requests.
    #[must_use]
    pub fn merge(self, other: Requeue) -> Self {
        match (self.0, other.0) {
            (Some(a), Some(b)) => Self(Some(a.min(b))),
            (a, b) => Self(a.or(b)),
        }
    }

    #[must_use]
    pub fn duration(self) -> Option<Duration> {
        self.0
    }
}

#[cfg(test)]
#[path = "mod_tests.rs"]
mod mod_tests;
