// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Cluster checks runner component.
//!
//! Runners execute the checks the cluster agent dispatches, so the component
//! is removed whenever the cluster agent is not deployed, whatever features
//! ask for.

use super::protocol::{
    deployment_spec, field_env, queue_disruption_budget, ComponentReconciler, DisruptionBudget,
};
use crate::component::{Component, ComponentNames};
use crate::constants::{
    CLUSTER_CHECKS_RUNNER_CONTAINER, CLUSTER_CHECKS_RUNNER_PDB_MAX_UNAVAILABLE,
    DEFAULT_CLUSTER_CHECKS_RUNNER_REPLICAS,
};
use crate::crd::DatadogAgent;
use crate::errors::Result;
use crate::feature::{Feature, RequiredComponent, RequiredComponents};
use crate::managers::ResourceManagers;
use crate::platform::ObjectKind;
use crate::podtemplate::PodTemplateChanges;
use k8s_openapi::api::core::v1::{Container, EnvVar, PodSpec, PodTemplateSpec};
use serde_json::Value;
use std::collections::BTreeMap;

/// Reconciler of the cluster checks runner.
#[derive(Debug, Clone, Copy, Default)]
pub struct ClusterChecksRunnerReconciler;

impl ComponentReconciler for ClusterChecksRunnerReconciler {
    fn component(&self) -> Component {
        Component::ClusterChecksRunner
    }

    fn workload_kind(&self) -> ObjectKind {
        ObjectKind::Deployment
    }

    fn force_delete(&self, owner: &DatadogAgent, required: &RequiredComponents) -> bool {
        let cluster_agent = Component::ClusterAgent;
        cluster_agent.disabled_by_override(&owner.spec)
            || (!required.cluster_agent.is_enabled() && cluster_agent.override_of(&owner.spec).is_none())
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
                    name: CLUSTER_CHECKS_RUNNER_CONTAINER.to_string(),
                    image: Some(image.to_string()),
                    command: Some(vec!["agent".to_string(), "run".to_string()]),
                    env: Some(vec![
                        EnvVar {
                            name: "DD_CLC_RUNNER_ENABLED".to_string(),
                            value: Some("true".to_string()),
                            value_from: None,
                        },
                        field_env("DD_CLC_RUNNER_HOST", "status.podIP"),
                    ]),
                    ..Container::default()
                }],
                ..PodSpec::default()
            }),
        }
    }

    fn manage_feature(&self, feature: &dyn Feature, _required: &RequiredComponent) -> Result<PodTemplateChanges> {
        feature.manage_cluster_checks_runner()
    }

    fn default_replicas(&self) -> Option<i32> {
        Some(DEFAULT_CLUSTER_CHECKS_RUNNER_REPLICAS)
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
            Component::ClusterChecksRunner,
            owner,
            names,
            DisruptionBudget::MaxUnavailable(CLUSTER_CHECKS_RUNNER_PDB_MAX_UNAVAILABLE),
        )
    }
}
