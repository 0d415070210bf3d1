// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Shared context for the `DatadogAgent` controller.
//!
//! The controller runtime hands an `Arc<Context>` to every reconcile call.
//! It carries:
//! - the Kubernetes client used for watches
//! - the [`Reconciler`] bound to the cluster platform adapter
//! - the readiness flag served on `/readyz`

use crate::crd::DatadogAgent;
use crate::errors::Result;
use crate::feature::default_registry;
use crate::platform::cluster::KubePlatform;
use crate::reconcilers::{ReconcileOptions, Reconciler};
use kube::{Api, Client, Resource};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Shared context passed to the controller.
pub struct Context {
    /// Kubernetes client for watches
    pub client: Client,

    /// Reconciler writing through the cluster platform adapter
    pub reconciler: Reconciler,

    /// Namespace the operator is restricted to, `None` for the whole cluster
    pub watch_namespace: Option<String>,

    /// Set once the first pass completed
    pub readiness: Readiness,
}

impl Context {
    /// Build the context for a controller watching `watch_namespace`.
    ///
    /// # Errors
    ///
    /// Returns an error if the feature registry cannot be built.
    pub fn new(client: Client, options: ReconcileOptions, watch_namespace: Option<String>) -> Result<Self> {
        let platform = Arc::new(KubePlatform::new(client.clone()));
        Ok(Self {
            client,
            reconciler: Reconciler::new(platform, default_registry()?, options),
            watch_namespace,
            readiness: Readiness::default(),
        })
    }

    /// API handle for `K`, scoped to the watched namespace when there is one.
    #[must_use]
    pub fn api<K>(&self) -> Api<K>
    where
        K: Resource<Scope = k8s_openapi::NamespaceResourceScope>,
        <K as Resource>::DynamicType: Default,
    {
        match &self.watch_namespace {
            Some(namespace) => Api::namespaced(self.client.clone(), namespace),
            None => Api::all(self.client.clone()),
        }
    }

    /// API handle for the owners.
    #[must_use]
    pub fn owners(&self) -> Api<DatadogAgent> {
        self.api::<DatadogAgent>()
    }
}

/// Readiness flag shared between the controller and the health server.
#[derive(Debug, Clone, Default)]
pub struct Readiness(Arc<AtomicBool>);

impl Readiness {
    pub fn mark_ready(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
#[path = "context_tests.rs"]
mod context_tests;
