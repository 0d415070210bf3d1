// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Shared fixtures for unit tests.

use crate::crd::{DatadogAgent, DatadogAgentSpec};
use crate::podtemplate::{ContainerTarget, PodTemplateChange, PodTemplateChanges};
use k8s_openapi::api::core::v1::EnvVar;
use kube::api::ObjectMeta;

/// UID given to owners built by [`owner`].
pub const OWNER_UID: &str = "0f4a1c2e-8d7b-4e5f-9a6b-3c2d1e0f9a8b";

/// Build a persisted-looking `DatadogAgent` named `name` in `namespace`.
pub fn owner(namespace: &str, name: &str) -> DatadogAgent {
    owner_with_spec(namespace, name, DatadogAgentSpec::default())
}

/// Same as [`owner`] with a custom spec.
pub fn owner_with_spec(namespace: &str, name: &str, spec: DatadogAgentSpec) -> DatadogAgent {
    let mut dda = DatadogAgent::new(name, spec);
    dda.metadata = ObjectMeta {
        name: Some(name.to_string()),
        namespace: Some(namespace.to_string()),
        uid: Some(OWNER_UID.to_string()),
        generation: Some(1),
        ..ObjectMeta::default()
    };
    dda
}

/// First env var named `name` among `changes`, with the container it targets.
pub fn env_change<'a>(
    changes: &'a PodTemplateChanges,
    name: &str,
) -> Option<(&'a ContainerTarget, &'a EnvVar)> {
    changes.iter().find_map(|change| match change {
        PodTemplateChange::AddEnvVar { target, env, .. } if env.name == name => Some((target, env)),
        _ => None,
    })
}

/// Plain value of the env var named `name` among `changes`.
pub fn env_value<'a>(changes: &'a PodTemplateChanges, name: &str) -> Option<&'a str> {
    env_change(changes, name).and_then(|(_, env)| env.value.as_deref())
}

/// Value of the annotation `key` among `changes`.
pub fn annotation_value<'a>(changes: &'a PodTemplateChanges, key: &str) -> Option<&'a str> {
    changes.iter().find_map(|change| match change {
        PodTemplateChange::AddAnnotation { key: k, value, .. } if k == key => Some(value.as_str()),
        _ => None,
    })
}

/// Target naming `container`.
pub fn named(container: &str) -> ContainerTarget {
    ContainerTarget::Named(container.to_string())
}
