// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Dry-run rendering of a `DatadogAgent` manifest.
//!
//! The owner is reconciled against an [`InMemoryPlatform`] until a pass asks
//! for no early requeue, then every stored object is printed as one
//! multi-document YAML stream, ordered by kind, namespace and name.

use crate::crd::DatadogAgent;
use crate::feature::default_registry;
use crate::platform::memory::InMemoryPlatform;
use crate::reconcilers::{ReconcileOptions, Reconciler};
use anyhow::{Context as _, Result};
use kube::ResourceExt;
use std::sync::Arc;
use tracing::{debug, info};

/// Passes run before giving up on a stable result.
pub const MAX_RENDER_PASSES: usize = 5;

const DEFAULT_NAMESPACE: &str = "default";
const DRY_RUN_UID: &str = "00000000-0000-0000-0000-000000000000";

/// Parse a `DatadogAgent` manifest and fill the metadata the API server
/// would have set.
///
/// # Errors
///
/// Returns an error if the YAML is not a `DatadogAgent`.
pub fn load_owner(manifest: &str) -> Result<DatadogAgent> {
    let mut owner: DatadogAgent = serde_yaml::from_str(manifest).context("failed to parse DatadogAgent manifest")?;
    if owner.metadata.name.as_deref().unwrap_or_default().is_empty() {
        anyhow::bail!("DatadogAgent manifest has no metadata.name");
    }
    if owner.metadata.namespace.is_none() {
        owner.metadata.namespace = Some(DEFAULT_NAMESPACE.to_string());
    }
    if owner.metadata.uid.is_none() {
        owner.metadata.uid = Some(DRY_RUN_UID.to_string());
    }
    if owner.metadata.generation.is_none() {
        owner.metadata.generation = Some(1);
    }
    Ok(owner)
}

/// Reconcile `owner` in memory and return the resulting objects as YAML.
///
/// # Errors
///
/// Returns the reconcile error, or an error if an object cannot be encoded.
pub async fn render(mut owner: DatadogAgent, options: ReconcileOptions) -> Result<String> {
    let platform = Arc::new(InMemoryPlatform::new());
    let reconciler = Reconciler::new(platform.clone(), default_registry()?, options);
    let namespace = owner.namespace().unwrap_or_default();
    let name = owner.name_any();

    for pass in 1..=MAX_RENDER_PASSES {
        let outcome = reconciler.reconcile(&owner).await?;
        owner.status = Some(outcome.status);
        debug!(pass, requeue_secs = outcome.requeue_after.as_secs(), "Dry-run pass finished");
        if outcome.requeue_after >= options.default_requeue {
            break;
        }
    }

    let objects = platform.all_objects().await;
    info!(namespace = %namespace, name = %name, objects = objects.len(), "Rendered DatadogAgent");

    let mut documents = Vec::with_capacity(objects.len());
    for (key, mut object) in objects {
        object.metadata.uid = None;
        object.metadata.resource_version = None;
        let yaml = serde_yaml::to_string(&object).with_context(|| format!("failed to encode {} {key}", key.kind))?;
        documents.push(yaml);
    }
    Ok(documents
        .iter()
        .map(|doc| format!("---\n{doc}"))
        .collect::<String>())
}

#[cfg(test)]
#[path = "render_tests.rs"]
mod render_tests;
