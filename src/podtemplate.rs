// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Pod template managers.
//!
//! Features never touch a pod template directly. Each `manage_*` call of a
//! feature returns a [`PodTemplateChanges`] list of pure instructions (add an
//! environment variable, a volume, a mount, a port, an annotation, a
//! capability), and [`PodTemplateManagers`] applies them to the template the
//! reconciler owns for the pass.
//!
//! # Conflict resolution
//!
//! Every entry has an identity:
//!
//! | Entry          | Identity                        |
//! |----------------|---------------------------------|
//! | env var        | container + variable name       |
//! | volume         | volume name                     |
//! | volume mount   | container + mount path          |
//! | container port | container + port name           |
//! | annotation     | annotation key                  |
//! | label          | label key                       |
//!
//! Adding an entry whose identity is already present keeps the existing entry
//! unless the instruction carries a [`MergeFn`], in which case the merge
//! function decides the final value from `(current, proposed)`.
//!
//! # Example
//!
//! ```rust
//! use dd_operator::podtemplate::{append_space_separated, PodTemplateChanges, PodTemplateManagers};
//! use k8s_openapi::api::core::v1::{Container, PodSpec, PodTemplateSpec};
//!
//! let template = PodTemplateSpec {
//!     spec: Some(PodSpec {
//!         containers: vec![Container { name: "agent".to_string(), ..Container::default() }],
//!         ..PodSpec::default()
//!     }),
//!     ..PodTemplateSpec::default()
//! };
//! let mut managers = PodTemplateManagers::new(template);
//!
//! let mut changes = PodTemplateChanges::new();
//! changes.add_env_var("DD_IGNORE_AUTOCONF", "kubernetes_apiserver");
//! changes.add_env_var_with_merge("DD_IGNORE_AUTOCONF", "kubernetes_state", append_space_separated);
//! managers.apply(changes).unwrap();
//!
//! let env = &managers.template().spec.as_ref().unwrap().containers[0].env;
//! assert_eq!(
//!     env.as_ref().unwrap()[0].value.as_deref(),
//!     Some("kubernetes_apiserver kubernetes_state")
//! );
//! ```

use crate::errors::FeatureError;
use k8s_openapi::api::core::v1::{
    Capabilities, Container, ContainerPort, EnvVar, PodSpec, PodTemplateSpec, SecurityContext,
    Volume, VolumeMount,
};
use std::collections::BTreeMap;
use tracing::debug;

/// Decides the value kept when two entries share an identity.
///
/// Called with `(current, proposed)`.
pub type MergeFn<T> = fn(&T, &T) -> Result<T, FeatureError>;

/// Keep the entry already in the template.
///
/// # Errors
///
/// Never fails.
pub fn prefer_current<T: Clone>(current: &T, _proposed: &T) -> Result<T, FeatureError> {
    Ok(current.clone())
}

/// Replace the entry already in the template.
///
/// # Errors
///
/// Never fails.
pub fn prefer_proposed<T: Clone>(_current: &T, proposed: &T) -> Result<T, FeatureError> {
    Ok(proposed.clone())
}

/// Append the proposed value to the current one, space separated.
///
/// Words already present in the current value are not repeated.
///
/// # Errors
///
/// Returns [`FeatureError::MergeConflict`] when either variable is sourced
/// from `valueFrom`, which cannot be concatenated.
pub fn append_space_separated(current: &EnvVar, proposed: &EnvVar) -> Result<EnvVar, FeatureError> {
    if current.value_from.is_some() || proposed.value_from.is_some() {
        return Err(FeatureError::MergeConflict {
            key: current.name.clone(),
            reason: "cannot append to a variable sourced from valueFrom".to_string(),
        });
    }

    let mut words: Vec<&str> = current.value.as_deref().unwrap_or_default().split_whitespace().collect();
    for word in proposed.value.as_deref().unwrap_or_default().split_whitespace() {
        if !words.contains(&word) {
            words.push(word);
        }
    }

    Ok(EnvVar {
        name: current.name.clone(),
        value: Some(words.join(" ")),
        value_from: None,
    })
}

/// Refuse any second entry with the same identity.
///
/// # Errors
///
/// Returns [`FeatureError::MergeConflict`] unless both entries are equal.
pub fn error_on_conflict<T: Clone + PartialEq + std::fmt::Debug>(
    current: &T,
    proposed: &T,
) -> Result<T, FeatureError> {
    if current == proposed {
        Ok(current.clone())
    } else {
        Err(FeatureError::MergeConflict {
            key: format!("{current:?}"),
            reason: "an entry with the same identity is already set".to_string(),
        })
    }
}

/// Containers an instruction applies to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContainerTarget {
    /// Every container of the pod
    All,
    /// Only the named container; a no-op when the pod has no such container
    Named(String),
}

impl ContainerTarget {
    fn matches(&self, container: &Container) -> bool {
        match self {
            Self::All => true,
            Self::Named(name) => &container.name == name,
        }
    }
}

/// A single pod template mutation.
#[derive(Debug, Clone)]
pub enum PodTemplateChange {
    AddEnvVar {
        target: ContainerTarget,
        env: EnvVar,
        merge: Option<MergeFn<EnvVar>>,
    },
    AddVolume {
        volume: Volume,
        merge: Option<MergeFn<Volume>>,
    },
    AddVolumeMount {
        target: ContainerTarget,
        mount: VolumeMount,
        merge: Option<MergeFn<VolumeMount>>,
    },
    AddPort {
        target: ContainerTarget,
        port: ContainerPort,
        merge: Option<MergeFn<ContainerPort>>,
    },
    AddAnnotation {
        key: String,
        value: String,
        merge: Option<MergeFn<String>>,
    },
    AddLabel {
        key: String,
        value: String,
    },
    AddCapabilities {
        target: ContainerTarget,
        capabilities: Vec<String>,
    },
}

/// Ordered list of pod template mutations produced by one feature call.
#[derive(Debug, Clone, Default)]
pub struct PodTemplateChanges {
    changes: Vec<PodTemplateChange>,
}

impl PodTemplateChanges {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.changes.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &PodTemplateChange> {
        self.changes.iter()
    }

    pub fn push(&mut self, change: PodTemplateChange) -> &mut Self {
        self.changes.push(change);
        self
    }

    /// Append every change of `other`.
    pub fn extend(&mut self, other: PodTemplateChanges) -> &mut Self {
        self.changes.extend(other.changes);
        self
    }

    /// Plain `name=value` variable on every container.
    pub fn add_env_var(&mut self, name: &str, value: &str) -> &mut Self {
        self.add_env(ContainerTarget::All, plain_env(name, value), None)
    }

    /// Plain `name=value` variable on one container.
    pub fn add_env_var_to_container(&mut self, container: &str, name: &str, value: &str) -> &mut Self {
        self.add_env(
            ContainerTarget::Named(container.to_string()),
            plain_env(name, value),
            None,
        )
    }

    /// Plain variable on every container, merged with an existing one.
    pub fn add_env_var_with_merge(
        &mut self,
        name: &str,
        value: &str,
        merge: MergeFn<EnvVar>,
    ) -> &mut Self {
        self.add_env(ContainerTarget::All, plain_env(name, value), Some(merge))
    }

    /// Arbitrary variable (including `valueFrom`).
    pub fn add_env(
        &mut self,
        target: ContainerTarget,
        env: EnvVar,
        merge: Option<MergeFn<EnvVar>>,
    ) -> &mut Self {
        self.push(PodTemplateChange::AddEnvVar { target, env, merge })
    }

    pub fn add_volume(&mut self, volume: Volume) -> &mut Self {
        self.push(PodTemplateChange::AddVolume {
            volume,
            merge: None,
        })
    }

    pub fn add_volume_mount_to_container(&mut self, container: &str, mount: VolumeMount) -> &mut Self {
        self.push(PodTemplateChange::AddVolumeMount {
            target: ContainerTarget::Named(container.to_string()),
            mount,
            merge: None,
        })
    }

    pub fn add_port_to_container(&mut self, container: &str, port: ContainerPort) -> &mut Self {
        self.push(PodTemplateChange::AddPort {
            target: ContainerTarget::Named(container.to_string()),
            port,
            merge: None,
        })
    }

    pub fn add_annotation(&mut self, key: &str, value: &str) -> &mut Self {
        self.push(PodTemplateChange::AddAnnotation {
            key: key.to_string(),
            value: value.to_string(),
            merge: None,
        })
    }

    pub fn add_label(&mut self, key: &str, value: &str) -> &mut Self {
        self.push(PodTemplateChange::AddLabel {
            key: key.to_string(),
            value: value.to_string(),
        })
    }

    /// Linux capabilities added to the security context of one container.
    pub fn add_capabilities_to_container(&mut self, container: &str, capabilities: &[&str]) -> &mut Self {
        self.push(PodTemplateChange::AddCapabilities {
            target: ContainerTarget::Named(container.to_string()),
            capabilities: capabilities.iter().map(|c| (*c).to_string()).collect(),
        })
    }
}

impl IntoIterator for PodTemplateChanges {
    type Item = PodTemplateChange;
    type IntoIter = std::vec::IntoIter<PodTemplateChange>;

    fn into_iter(self) -> Self::IntoIter {
        self.changes.into_iter()
    }
}

fn plain_env(name: &str, value: &str) -> EnvVar {
    EnvVar {
        name: name.to_string(),
        value: Some(value.to_string()),
        value_from: None,
    }
}

/// Owns the pod template of one component for the duration of a pass and
/// applies feature instructions to it.
#[derive(Debug, Clone, Default)]
pub struct PodTemplateManagers {
    template: PodTemplateSpec,
}

impl PodTemplateManagers {
    #[must_use]
    pub fn new(template: PodTemplateSpec) -> Self {
        Self { template }
    }

    #[must_use]
    pub fn template(&self) -> &PodTemplateSpec {
        &self.template
    }

    #[must_use]
    pub fn into_template(self) -> PodTemplateSpec {
        self.template
    }

    /// Apply every change in order.
    ///
    /// # Errors
    ///
    /// Returns the first error raised by a merge function. Changes applied
    /// before the failure stay in the template, which the caller discards.
    pub fn apply(&mut self, changes: PodTemplateChanges) -> Result<(), FeatureError> {
        for change in changes {
            self.apply_one(change)?;
        }
        Ok(())
    }

    fn pod_spec(&mut self) -> &mut PodSpec {
        self.template.spec.get_or_insert_with(PodSpec::default)
    }

    fn apply_one(&mut self, change: PodTemplateChange) -> Result<(), FeatureError> {
        match change {
            PodTemplateChange::AddEnvVar { target, env, merge } => {
                for container in self.containers(&target) {
                    let envs = container.env.get_or_insert_with(Vec::new);
                    let name = env.name.clone();
                    upsert(envs, env.clone(), |e| e.name == name, merge, &name)?;
                }
            }
            PodTemplateChange::AddVolume { volume, merge } => {
                let volumes = self.pod_spec().volumes.get_or_insert_with(Vec::new);
                let name = volume.name.clone();
                upsert(volumes, volume, |v| v.name == name, merge, &name)?;
            }
            PodTemplateChange::AddVolumeMount {
                target,
                mount,
                merge,
            } => {
                for container in self.containers(&target) {
                    let mounts = container.volume_mounts.get_or_insert_with(Vec::new);
                    let path = mount.mount_path.clone();
                    upsert(mounts, mount.clone(), |m| m.mount_path == path, merge, &path)?;
                }
            }
            PodTemplateChange::AddPort {
                target,
                port,
                merge,
            } => {
                for container in self.containers(&target) {
                    let ports = container.ports.get_or_insert_with(Vec::new);
                    let name = port.name.clone().unwrap_or_default();
                    upsert(
                        ports,
                        port.clone(),
                        |p| p.name.as_deref().unwrap_or_default() == name,
                        merge,
                        &name,
                    )?;
                }
            }
            PodTemplateChange::AddAnnotation { key, value, merge } => {
                let annotations = self
                    .template
                    .metadata
                    .get_or_insert_with(Default::default)
                    .annotations
                    .get_or_insert_with(BTreeMap::new);
                insert_keyed(annotations, key, value, merge)?;
            }
            PodTemplateChange::AddLabel { key, value } => {
                let labels = self
                    .template
                    .metadata
                    .get_or_insert_with(Default::default)
                    .labels
                    .get_or_insert_with(BTreeMap::new);
                insert_keyed(labels, key, value, None)?;
            }
            PodTemplateChange::AddCapabilities {
                target,
                capabilities,
            } => {
                for container in self.containers(&target) {
                    let added = container
                        .security_context
                        .get_or_insert_with(SecurityContext::default)
                        .capabilities
                        .get_or_insert_with(Capabilities::default)
                        .add
                        .get_or_insert_with(Vec::new);
                    for capability in &capabilities {
                        if !added.contains(capability) {
                            added.push(capability.clone());
                        }
                    }
                }
            }
        }
        Ok(())
    }

    fn containers(&mut self, target: &ContainerTarget) -> impl Iterator<Item = &mut Container> + '_ {
        let target = target.clone();
        self.pod_spec()
            .containers
            .iter_mut()
            .filter(move |c| target.matches(c))
    }
}

/// Insert `item`, resolving an identity clash with `merge` or by keeping the
/// current entry.
fn upsert<T, F>(
    items: &mut Vec<T>,
    item: T,
    same_identity: F,
    merge: Option<MergeFn<T>>,
    key: &str,
) -> Result<(), FeatureError>
where
    F: Fn(&T) -> bool,
{
    match items.iter().position(same_identity) {
        None => items.push(item),
        Some(index) => match merge {
            Some(merge) => items[index] = merge(&items[index], &item)?,
            None => debug!(key = %key, "Entry already present, keeping current value"),
        },
    }
    Ok(())
}

fn insert_keyed(
    map: &mut BTreeMap<String, String>,
    key: String,
    value: String,
    merge: Option<MergeFn<String>>,
) -> Result<(), FeatureError> {
    match (map.get(&key).cloned(), merge) {
        (None, _) => {
            map.insert(key, value);
        }
        (Some(current), Some(merge)) => {
            let merged = merge(&current, &value)?;
            map.insert(key, merged);
        }
        (Some(_), None) => debug!(key = %key, "Entry already present, keeping current value"),
    }
    Ok(())
}

#[cfg(test)]
#[path = "podtemplate_tests.rs"]
mod podtemplate_tests;
