// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Common test utilities for integration tests

#![allow(dead_code)]

use dd_operator::crd::{DatadogAgent, DatadogAgentSpec};
use dd_operator::feature::default_registry;
use dd_operator::platform::memory::InMemoryPlatform;
use dd_operator::reconcilers::{ReconcileOptions, ReconcileOutcome, Reconciler};
use k8s_openapi::api::core::v1::Namespace;
use kube::api::{Api, DeleteParams, ObjectMeta, PostParams};
use kube::client::Client;
use kube::ResourceExt;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Passes after which a scenario is expected to have converged.
pub const MAX_PASSES: usize = 5;

/// Build a persisted-looking owner.
pub fn owner(namespace: &str, name: &str, spec: DatadogAgentSpec) -> DatadogAgent {
    let mut dda = DatadogAgent::new(name, spec);
    dda.metadata = ObjectMeta {
        name: Some(name.to_string()),
        namespace: Some(namespace.to_string()),
        uid: Some(format!("uid-{namespace}-{name}")),
        generation: Some(1),
        ..ObjectMeta::default()
    };
    dda
}

/// In-memory platform plus a reconciler bound to it.
pub struct Harness {
    pub platform: Arc<InMemoryPlatform>,
    pub reconciler: Reconciler,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_options(ReconcileOptions::default())
    }

    pub fn with_options(options: ReconcileOptions) -> Self {
        let platform = Arc::new(InMemoryPlatform::new());
        let reconciler = Reconciler::new(
            platform.clone(),
            default_registry().expect("default registry"),
            options,
        );
        Self { platform, reconciler }
    }

    /// Run one pass and feed the written status back into `dda`.
    pub async fn pass(&self, dda: &mut DatadogAgent) -> ReconcileOutcome {
        let outcome = self.reconciler.reconcile(dda).await.expect("reconcile pass");
        dda.status = self
            .platform
            .owner_status(&dda.namespace().unwrap_or_default(), &dda.name_any())
            .await;
        outcome
    }

    /// Run passes until one asks for the default requeue.
    pub async fn converge(&self, dda: &mut DatadogAgent) -> ReconcileOutcome {
        let default_requeue = self.reconciler.options().default_requeue;
        for _ in 0..MAX_PASSES {
            let outcome = self.pass(dda).await;
            if outcome.requeue_after >= default_requeue {
                return outcome;
            }
        }
        panic!("{} did not converge in {MAX_PASSES} passes", dda.name_any());
    }
}

// ============================================================================
// Live cluster helpers
// ============================================================================

/// Get a Kubernetes client or skip the test if not in a cluster
pub async fn get_kube_client_or_skip() -> Option<Client> {
    match Client::try_default().await {
        Ok(client) => {
            println!("✓ Successfully connected to Kubernetes cluster");
            Some(client)
        }
        Err(e) => {
            eprintln!("⊘ Skipping integration test: not running in Kubernetes cluster: {e}");
            None
        }
    }
}

/// Create a test namespace
pub async fn create_test_namespace(client: &Client, name: &str) -> Result<(), Box<dyn std::error::Error>> {
    let namespaces: Api<Namespace> = Api::all(client.clone());

    let mut labels = BTreeMap::new();
    labels.insert("test".to_string(), "integration".to_string());
    labels.insert("managed-by".to_string(), "dd-operator-test".to_string());

    let namespace = Namespace {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            labels: Some(labels),
            ..ObjectMeta::default()
        },
        ..Namespace::default()
    };

    match namespaces.create(&PostParams::default(), &namespace).await {
        Ok(_) => {
            println!("Created test namespace: {name}");
            Ok(())
        }
        Err(kube::Error::Api(ae)) if ae.code == 409 => {
            println!("Test namespace already exists: {name}");
            Ok(())
        }
        Err(e) => Err(Box::new(e)),
    }
}

/// Cleanup test namespace
pub async fn cleanup_test_namespace(client: &Client, name: &str) -> Result<(), Box<dyn std::error::Error>> {
    let namespaces: Api<Namespace> = Api::all(client.clone());

    match namespaces.delete(name, &DeleteParams::default()).await {
        Ok(_) => {
            println!("Deleted test namespace: {name}");
            Ok(())
        }
        Err(kube::Error::Api(ae)) if ae.code == 404 => Ok(()),
        Err(e) => Err(Box::new(e)),
    }
}
