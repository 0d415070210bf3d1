// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Node agent component.
//!
//! Runs as a `DaemonSet`, or as an `ExtendedDaemonSet` when the operator is
//! started with `--extended-daemonset`. Switching between the two deletes the
//! workload of the previous kind before the new one is created.
//!
//! The pod holds the core `agent` container plus the trace and process agent
//! containers requested by features. When the only requested container is
//! `unprivileged-single-agent`, the pod is that single container instead and
//! features are asked for their single-container instructions.

use super::protocol::{field_env, spec_value, ComponentReconciler};
use crate::component::{Component, ComponentNames};
use crate::constants::{
    CORE_AGENT_CONTAINER, PROCESS_AGENT_CONTAINER, TRACE_AGENT_CONTAINER,
    UNPRIVILEGED_SINGLE_AGENT_CONTAINER,
};
use crate::crd::DatadogAgent;
use crate::errors::Result;
use crate::feature::{Feature, RequiredComponent};
use crate::labels::{AGENT_PROVIDER, LEGACY_PROVIDER};
use crate::platform::ObjectKind;
use crate::podtemplate::PodTemplateChanges;
use k8s_openapi::api::apps::v1::{DaemonSetSpec, DaemonSetUpdateStrategy, RollingUpdateDaemonSet};
use k8s_openapi::api::core::v1::{
    Container, EmptyDirVolumeSource, PodSpec, PodTemplateSpec, SecurityContext, Volume, VolumeMount,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use serde_json::{json, Value};
use std::collections::BTreeMap;

const CONFIG_VOLUME: &str = "config";
const CONFIG_PATH: &str = "/etc/datadog-agent";
const ROLLING_UPDATE_MAX_UNAVAILABLE: &str = "10%";

/// Reconciler of the node agent.
#[derive(Debug, Clone, Copy, Default)]
pub struct AgentReconciler {
    /// Run the node agent as an `ExtendedDaemonSet`.
    pub extended_daemonset: bool,
}

impl AgentReconciler {
    #[must_use]
    pub fn new(extended_daemonset: bool) -> Self {
        Self { extended_daemonset }
    }
}

fn agent_container(name: &str, image: &str, command: &[&str]) -> Container {
    Container {
        name: name.to_string(),
        image: Some(image.to_string()),
        command: Some(command.iter().map(|c| (*c).to_string()).collect()),
        env: Some(vec![field_env("DD_KUBERNETES_KUBELET_HOST", "status.hostIP")]),
        volume_mounts: Some(vec![VolumeMount {
            name: CONFIG_VOLUME.to_string(),
            mount_path: CONFIG_PATH.to_string(),
            ..VolumeMount::default()
        }]),
        ..Container::default()
    }
}

fn multi_container_pod(required: &RequiredComponent, image: &str) -> Vec<Container> {
    let mut containers = vec![agent_container(CORE_AGENT_CONTAINER, image, &["agent", "run"])];
    if required.containers.iter().any(|c| c == TRACE_AGENT_CONTAINER) {
        containers.push(agent_container(
            TRACE_AGENT_CONTAINER,
            image,
            &["trace-agent", "-config=/etc/datadog-agent/datadog.yaml"],
        ));
    }
    if required.containers.iter().any(|c| c == PROCESS_AGENT_CONTAINER) {
        containers.push(agent_container(
            PROCESS_AGENT_CONTAINER,
            image,
            &["process-agent", "--cfgpath=/etc/datadog-agent/datadog.yaml"],
        ));
    }
    containers
}

fn single_container_pod(image: &str) -> Vec<Container> {
    let mut container = agent_container(UNPRIVILEGED_SINGLE_AGENT_CONTAINER, image, &["agent", "run"]);
    container.security_context = Some(SecurityContext {
        run_as_non_root: Some(true),
        ..SecurityContext::default()
    });
    vec![container]
}

impl ComponentReconciler for AgentReconciler {
    fn component(&self) -> Component {
        Component::NodeAgent
    }

    fn workload_kind(&self) -> ObjectKind {
        if self.extended_daemonset {
            ObjectKind::ExtendedDaemonSet
        } else {
            ObjectKind::DaemonSet
        }
    }

    fn retired_kinds(&self) -> Vec<ObjectKind> {
        if self.extended_daemonset {
            vec![ObjectKind::DaemonSet]
        } else {
            vec![ObjectKind::ExtendedDaemonSet]
        }
    }

    fn pod_template(
        &self,
        _owner: &DatadogAgent,
        required: &RequiredComponent,
        names: &ComponentNames,
        image: &str,
    ) -> PodTemplateSpec {
        let containers = if required.single_container_strategy_enabled() {
            single_container_pod(image)
        } else {
            multi_container_pod(required, image)
        };
        PodTemplateSpec {
            metadata: None,
            spec: Some(PodSpec {
                service_account_name: Some(names.service_account.clone()),
                containers,
                volumes: Some(vec![Volume {
                    name: CONFIG_VOLUME.to_string(),
                    empty_dir: Some(EmptyDirVolumeSource::default()),
                    ..Volume::default()
                }]),
                ..PodSpec::default()
            }),
        }
    }

    fn manage_feature(&self, feature: &dyn Feature, required: &RequiredComponent) -> Result<PodTemplateChanges> {
        if required.single_container_strategy_enabled() {
            feature.manage_single_container_node_agent()
        } else {
            feature.manage_node_agent()
        }
    }

    fn workload_labels(&self) -> BTreeMap<String, String> {
        BTreeMap::from([(AGENT_PROVIDER.to_string(), LEGACY_PROVIDER.to_string())])
    }

    fn workload_spec(
        &self,
        template: PodTemplateSpec,
        selector: BTreeMap<String, String>,
        _replicas: Option<i32>,
    ) -> Result<Value> {
        if self.extended_daemonset {
            return Ok(json!({
                "selector": { "matchLabels": selector },
                "template": spec_value(ObjectKind::ExtendedDaemonSet, &template)?,
                "strategy": {
                    "rollingUpdate": { "maxUnavailable": ROLLING_UPDATE_MAX_UNAVAILABLE },
                },
            }));
        }

        let spec = DaemonSetSpec {
            selector: LabelSelector {
                match_labels: Some(selector),
                ..LabelSelector::default()
            },
            template,
            update_strategy: Some(DaemonSetUpdateStrategy {
                type_: Some("RollingUpdate".to_string()),
                rolling_update: Some(RollingUpdateDaemonSet {
                    max_unavailable: Some(IntOrString::String(ROLLING_UPDATE_MAX_UNAVAILABLE.to_string())),
                    ..RollingUpdateDaemonSet::default()
                }),
            }),
            ..DaemonSetSpec::default()
        };
        spec_value(ObjectKind::DaemonSet, &spec)
    }
}

#[cfg(test)]
#[path = "agent_tests.rs"]
mod agent_tests;
