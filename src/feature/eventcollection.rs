// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! The `event_collection` feature.
//!
//! The elected cluster agent leader watches Kubernetes events and keeps its
//! resume token in a config map named after the owner.

use super::rbac::{leader_election_resource_name, leader_election_rules, named_rule, rule};
use super::rbac::{CORE_API_GROUP, GET, LIST, UPDATE, WATCH};
use super::{Feature, FeatureId, RequiredComponent, RequiredComponents};
use crate::component::Component;
use crate::constants::CLUSTER_AGENT_CONTAINER;
use crate::crd::DatadogAgent;
use crate::errors::Result;
use crate::managers::ResourceManagers;
use crate::podtemplate::PodTemplateChanges;
use k8s_openapi::api::rbac::v1::PolicyRule;
use kube::ResourceExt;

pub const DD_COLLECT_KUBERNETES_EVENTS: &str = "DD_COLLECT_KUBERNETES_EVENTS";
pub const DD_LEADER_ELECTION: &str = "DD_LEADER_ELECTION";
pub const DD_LEADER_LEASE_NAME: &str = "DD_LEADER_LEASE_NAME";
pub const DD_CLUSTER_AGENT_TOKEN_NAME: &str = "DD_CLUSTER_AGENT_TOKEN_NAME";

/// Config map holding the event watch resume token.
#[must_use]
pub fn event_token_config_map_name(owner_name: &str) -> String {
    format!("{owner_name}-token")
}

/// Build a fresh `event_collection` feature.
#[must_use]
pub fn build() -> Box<dyn Feature> {
    Box::<EventCollectionFeature>::default()
}

#[derive(Debug, Default)]
pub struct EventCollectionFeature {
    enabled: bool,
    owner_name: String,
    owner_namespace: String,
    service_account: String,
}

/// Rules the cluster agent needs to collect events.
#[must_use]
pub fn event_collection_rules(owner_name: &str) -> Vec<PolicyRule> {
    let token = event_token_config_map_name(owner_name);
    let mut rules = leader_election_rules(owner_name);
    rules.push(rule(CORE_API_GROUP, &["events"], &[GET, LIST, WATCH]));
    rules.push(named_rule(CORE_API_GROUP, &["configmaps"], &[&token], &[GET, UPDATE]));
    rules
}

impl Feature for EventCollectionFeature {
    fn id(&self) -> FeatureId {
        FeatureId::EventCollection
    }

    fn configure(&mut self, owner: &DatadogAgent) -> Result<RequiredComponents> {
        self.enabled = owner
            .spec
            .features
            .as_ref()
            .and_then(|f| f.event_collection.as_ref())
            .and_then(|e| e.collect_kubernetes_events)
            .unwrap_or(false);
        if !self.enabled {
            return Ok(RequiredComponents::default());
        }

        self.owner_name = owner.name_any();
        self.owner_namespace = owner.namespace().unwrap_or_default();
        self.service_account = Component::ClusterAgent.service_account_name(&self.owner_name, &owner.spec);

        Ok(RequiredComponents {
            cluster_agent: RequiredComponent::required(&[CLUSTER_AGENT_CONTAINER]),
            ..RequiredComponents::default()
        })
    }

    fn manage_dependencies(
        &self,
        managers: &mut ResourceManagers,
        components: &RequiredComponents,
    ) -> Result<()> {
        if !self.enabled || !components.cluster_agent.is_enabled() {
            return Ok(());
        }
        let component = Component::ClusterAgent;
        managers.rbac().add_cluster_policy_rules_by_component(
            &self.owner_namespace,
            &component.cluster_rbac_resource_name(&self.owner_namespace, &self.owner_name),
            &self.service_account,
            event_collection_rules(&self.owner_name),
            component,
        )
    }

    fn manage_cluster_agent(&self) -> Result<PodTemplateChanges> {
        let mut changes = PodTemplateChanges::new();
        if !self.enabled {
            return Ok(changes);
        }
        changes
            .add_env_var_to_container(CLUSTER_AGENT_CONTAINER, DD_COLLECT_KUBERNETES_EVENTS, "true")
            .add_env_var_to_container(CLUSTER_AGENT_CONTAINER, DD_LEADER_ELECTION, "true")
            .add_env_var_to_container(
                CLUSTER_AGENT_CONTAINER,
                DD_LEADER_LEASE_NAME,
                &leader_election_resource_name(&self.owner_name),
            )
            .add_env_var_to_container(
                CLUSTER_AGENT_CONTAINER,
                DD_CLUSTER_AGENT_TOKEN_NAME,
                &event_token_config_map_name(&self.owner_name),
            );
        Ok(changes)
    }
}

#[cfg(test)]
#[path = "eventcollection_tests.rs"]
mod eventcollection_tests;
