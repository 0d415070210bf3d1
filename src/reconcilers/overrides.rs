// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Per-component override blocks (`spec.override.<component>`).
//!
//! Overrides are applied to the pod template after every feature ran and
//! before the workload is hashed, so they always have the last word on the
//! values they set.

use crate::component::Component;
use crate::constants::{
    DEFAULT_AGENT_IMAGE_NAME, DEFAULT_AGENT_IMAGE_TAG, DEFAULT_CLUSTER_AGENT_IMAGE_NAME,
    DEFAULT_CLUSTER_AGENT_IMAGE_TAG, DEFAULT_REGISTRY,
};
use crate::crd::{AgentImageConfig, ComponentOverride, DatadogAgentSpec};
use k8s_openapi::api::core::v1::{Container, EnvVar, PodSpec, PodTemplateSpec};
use kube::api::ObjectMeta;
use std::collections::BTreeMap;

fn default_image(component: Component) -> (&'static str, &'static str) {
    match component {
        Component::ClusterAgent => (DEFAULT_CLUSTER_AGENT_IMAGE_NAME, DEFAULT_CLUSTER_AGENT_IMAGE_TAG),
        Component::NodeAgent | Component::ClusterChecksRunner => {
            (DEFAULT_AGENT_IMAGE_NAME, DEFAULT_AGENT_IMAGE_TAG)
        }
    }
}

fn image_override(component: Component, spec: &DatadogAgentSpec) -> Option<&AgentImageConfig> {
    component.override_of(spec).and_then(|o| o.image.as_ref())
}

/// Image tag of the component, also used as its version label.
#[must_use]
pub fn image_tag(component: Component, spec: &DatadogAgentSpec) -> String {
    image_override(component, spec)
        .and_then(|i| i.tag.as_deref())
        .filter(|t| !t.is_empty())
        .unwrap_or(default_image(component).1)
        .to_string()
}

/// Full image reference of the component.
///
/// A name already carrying a tag or digest is used as is. A name containing
/// `/` is taken as a complete path and gets the tag appended. Any other name
/// is prefixed with `global.registry`, or the default registry.
///
/// # Example
///
/// ```rust
/// use dd_operator::component::Component;
/// use dd_operator::crd::DatadogAgentSpec;
/// use dd_operator::reconcilers::overrides::image_reference;
///
/// let image = image_reference(Component::ClusterAgent, &DatadogAgentSpec::default());
/// assert_eq!(image, "gcr.io/datadoghq/cluster-agent:7.60.0");
/// ```
#[must_use]
pub fn image_reference(component: Component, spec: &DatadogAgentSpec) -> String {
    let name = image_override(component, spec)
        .and_then(|i| i.name.as_deref())
        .filter(|n| !n.is_empty())
        .unwrap_or(default_image(component).0);
    let tag = image_tag(component, spec);

    let last = name.rsplit('/').next().unwrap_or(name);
    if last.contains(':') || last.contains('@') {
        return name.to_string();
    }
    if name.contains('/') {
        return format!("{name}:{tag}");
    }

    let registry = spec
        .global
        .as_ref()
        .and_then(|g| g.registry.as_deref())
        .filter(|r| !r.is_empty())
        .unwrap_or(DEFAULT_REGISTRY);
    format!("{registry}/{name}:{tag}")
}

/// Insert `env`, replacing any variable with the same name.
fn upsert_env(container: &mut Container, env: &EnvVar) {
    let envs = container.env.get_or_insert_with(Vec::new);
    match envs.iter_mut().find(|e| e.name == env.name) {
        Some(existing) => *existing = env.clone(),
        None => envs.push(env.clone()),
    }
}

/// Apply an override block to a built pod template.
///
/// Environment variables replace same-named ones set by features. Per
/// container settings are ignored for containers the pod does not have.
pub fn apply_to_template(template: &mut PodTemplateSpec, over: &ComponentOverride) {
    let meta = template.metadata.get_or_insert_with(ObjectMeta::default);
    if !over.labels.is_empty() {
        meta.labels
            .get_or_insert_with(BTreeMap::new)
            .extend(over.labels.clone());
    }
    if !over.annotations.is_empty() {
        meta.annotations
            .get_or_insert_with(BTreeMap::new)
            .extend(over.annotations.clone());
    }

    let pod = template.spec.get_or_insert_with(PodSpec::default);
    for container in &mut pod.containers {
        for env in &over.env {
            upsert_env(container, env);
        }
        if let Some(container_override) = over.containers.get(&container.name) {
            for env in &container_override.env {
                upsert_env(container, env);
            }
            if !container_override.args.is_empty() {
                container.args = Some(container_override.args.clone());
            }
        }
    }

    if !over.node_selector.is_empty() {
        pod.node_selector
            .get_or_insert_with(BTreeMap::new)
            .extend(over.node_selector.clone());
    }
    if let Some(priority_class) = over.priority_class_name.as_deref().filter(|p| !p.is_empty()) {
        pod.priority_class_name = Some(priority_class.to_string());
    }
}

#[cfg(test)]
#[path = "overrides_tests.rs"]
mod overrides_tests;
