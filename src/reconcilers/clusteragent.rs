// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Cluster agent component: a `Deployment` exposing the agent API on port
//! 5005, guarded by a disruption budget keeping one pod available.
//!
//! The `Service` in front of it is queued by the `default` feature.

use super::protocol::{deployment_spec, queue_disruption_budget, ComponentReconciler, DisruptionBudget};
use crate::component::{Component, ComponentNames};
use crate::constants::{
    CLUSTER_AGENT_CONTAINER, CLUSTER_AGENT_PDB_MIN_AVAILABLE, CLUSTER_AGENT_PORT, CLUSTER_AGENT_PORT_NAME,
    DEFAULT_CLUSTER_AGENT_REPLICAS,
};
use crate::crd::DatadogAgent;
use crate::errors::Result;
use crate::feature::{Feature, RequiredComponent};
use crate::managers::ResourceManagers;
use crate::platform::ObjectKind;
use crate::podtemplate::PodTemplateChanges;
use k8s_openapi::api::core::v1::{Container, ContainerPort, PodSpec, PodTemplateSpec};
use serde_json::Value;
use std::collections::BTreeMap;

/// Reconciler of the cluster agent.
#[derive(Debug, Clone, Copy, Default)]
pub struct ClusterAgentReconciler;

impl ComponentReconciler for ClusterAgentReconciler {
    fn component(&self) -> Component {
        Component::ClusterAgent
    }

    fn workload_kind(&self) -> ObjectKind {
        ObjectKind::Deployment
    }

    fn pod_template(
        &self,
        _owner: &DatadogAgent,
        _required: &RequiredComponent,
        names: &ComponentNames,
        image: &str,
    ) -> PodTemplateSpec {
        PodTemplateSpec {
            metadata: None,
            spec: Some(PodSpec {
                service_account_name: Some(names.service_account.clone()),
                containers: vec![Container {
                    name: CLUSTER_AGENT_CONTAINER.to_string(),
                    image: Some(image.to_string()),
                    ports: Some(vec![ContainerPort {
                        name: Some(CLUSTER_AGENT_PORT_NAME.to_string()),
                        container_port: CLUSTER_AGENT_PORT,
                        protocol: Some("TCP".to_string()),
                        ..ContainerPort::default()
                    }]),
                    ..Container::default()
                }],
                ..PodSpec::default()
            }),
        }
    }

    fn manage_feature(&self, feature: &dyn Feature, _required: &RequiredComponent) -> Result<PodTemplateChanges> {
        feature.manage_cluster_agent()
    }

    fn default_replicas(&self) -> Option<i32> {
        Some(DEFAULT_CLUSTER_AGENT_REPLICAS)
    }

    fn workload_spec(
        &self,
        template: PodTemplateSpec,
        selector: BTreeMap<String, String>,
        replicas: Option<i32>,
    ) -> Result<Value> {
        deployment_spec(template, selector, replicas)
    }

    fn manage_dependencies(
        &self,
        owner: &DatadogAgent,
        names: &ComponentNames,
        managers: &mut ResourceManagers,
    ) -> Result<()> {
        queue_disruption_budget(
            managers,
            Component::ClusterAgent,
            owner,
            names,
            DisruptionBudget::MinAvailable(CLUSTER_AGENT_PDB_MIN_AVAILABLE),
        )
    }
}
