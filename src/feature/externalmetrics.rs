// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! The `external_metrics` feature.
//!
//! The cluster agent serves the `external.metrics.k8s.io` API to the HPA
//! controller. The feature queues:
//!
//! - the metrics `Service` in front of the cluster agent pods
//! - the `v1beta1.external.metrics.k8s.io` `APIService` pointing at it
//! - cluster agent rules to read autoscalers and serve `DatadogMetric` objects
//! - the `system:auth-delegator` binding and the apiserver authentication
//!   reader binding in `kube-system`
//! - the metrics reader role bound to the HPA controller service account
//!
//! Everything is tracked for the cluster agent and goes away with it.

use super::rbac::{
    named_rule, rule, AUTOSCALING_API_GROUP, CORE_API_GROUP, CREATE, DATADOG_API_GROUP, DELETE,
    GET, KUBE_SYSTEM_NAMESPACE, LIST, UPDATE, WATCH,
};
use super::{Feature, FeatureId, RequiredComponent, RequiredComponents};
use crate::component::Component;
use crate::constants::{CLUSTER_AGENT_CONTAINER, CLUSTER_AGENT_SUFFIX};
use crate::crd::DatadogAgent;
use crate::errors::Result;
use crate::labels::selector_labels;
use crate::managers::ResourceManagers;
use crate::platform::ObjectKind;
use crate::podtemplate::PodTemplateChanges;
use k8s_openapi::api::core::v1::{ContainerPort, Service, ServicePort, ServiceSpec};
use k8s_openapi::api::rbac::v1::PolicyRule;
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use k8s_openapi::kube_aggregator::pkg::apis::apiregistration::v1::{
    APIService, APIServiceSpec, ServiceReference,
};
use kube::api::ObjectMeta;
use kube::ResourceExt;

pub const DD_EXTERNAL_METRICS_PROVIDER_ENABLED: &str = "DD_EXTERNAL_METRICS_PROVIDER_ENABLED";
pub const DD_EXTERNAL_METRICS_PROVIDER_PORT: &str = "DD_EXTERNAL_METRICS_PROVIDER_PORT";
pub const DD_EXTERNAL_METRICS_PROVIDER_USE_DATADOGMETRIC_CRD: &str =
    "DD_EXTERNAL_METRICS_PROVIDER_USE_DATADOGMETRIC_CRD";
pub const DD_EXTERNAL_METRICS_PROVIDER_WPA_CONTROLLER: &str = "DD_EXTERNAL_METRICS_PROVIDER_WPA_CONTROLLER";
pub const DD_EXTERNAL_METRICS_PROVIDER_ENDPOINT: &str = "DD_EXTERNAL_METRICS_PROVIDER_ENDPOINT";

pub const DEFAULT_PORT: i32 = 8443;
pub const PORT_NAME: &str = "metricsapi";

pub const EXTERNAL_METRICS_API_GROUP: &str = "external.metrics.k8s.io";
pub const EXTERNAL_METRICS_API_VERSION: &str = "v1beta1";

/// Name of the `APIService`; fixed by the aggregation layer.
pub const API_SERVICE_NAME: &str = "v1beta1.external.metrics.k8s.io";

/// Config map the cluster agent keeps its metric values in.
pub const CUSTOM_METRICS_CONFIG_MAP: &str = "datadog-custom-metrics";

pub const AUTH_DELEGATOR_CLUSTER_ROLE: &str = "system:auth-delegator";
pub const APISERVER_AUTH_READER_ROLE: &str = "extension-apiserver-authentication-reader";

/// Service account the HPA controller reads external metrics with.
pub const HPA_CONTROLLER_SERVICE_ACCOUNT: &str = "horizontal-pod-autoscaler";

const API_SERVICE_PRIORITY: i32 = 100;

/// Name of the metrics `Service`.
#[must_use]
pub fn metrics_service_name(owner_name: &str) -> String {
    format!("{owner_name}-cluster-agent-metrics-server")
}

/// Name of the `system:auth-delegator` cluster role binding.
#[must_use]
pub fn auth_delegator_binding_name(owner_namespace: &str, owner_name: &str) -> String {
    format!(
        "{}-auth-delegator",
        Component::ClusterAgent.cluster_rbac_resource_name(owner_namespace, owner_name)
    )
}

/// Name of the cluster role letting the HPA controller read external metrics.
#[must_use]
pub fn metrics_reader_name(owner_namespace: &str, owner_name: &str) -> String {
    format!(
        "{}-metrics-reader",
        Component::ClusterAgent.cluster_rbac_resource_name(owner_namespace, owner_name)
    )
}

/// Name of the role binding granting the apiserver authentication reader role.
#[must_use]
pub fn apiserver_auth_binding_name(owner_namespace: &str, owner_name: &str) -> String {
    format!(
        "{}-apiserver",
        Component::ClusterAgent.cluster_rbac_resource_name(owner_namespace, owner_name)
    )
}

/// Cluster rules of the cluster agent serving external metrics.
#[must_use]
pub fn cluster_agent_cluster_rules(use_datadog_metrics: bool, wpa_controller: bool) -> Vec<PolicyRule> {
    let mut rules = vec![
        rule(EXTERNAL_METRICS_API_GROUP, &["*"], &[GET, LIST, WATCH]),
        rule(AUTOSCALING_API_GROUP, &["horizontalpodautoscalers"], &[LIST, WATCH]),
    ];
    if use_datadog_metrics {
        rules.push(rule(DATADOG_API_GROUP, &["datadogmetrics"], &[LIST, WATCH, CREATE, DELETE]));
        rules.push(rule(DATADOG_API_GROUP, &["datadogmetrics/status"], &[UPDATE]));
    }
    if wpa_controller {
        rules.push(rule(DATADOG_API_GROUP, &["watermarkpodautoscalers"], &[GET, LIST, WATCH]));
    }
    rules
}

/// Namespaced rules of the cluster agent serving external metrics.
#[must_use]
pub fn cluster_agent_rules() -> Vec<PolicyRule> {
    vec![named_rule(
        CORE_API_GROUP,
        &["configmaps"],
        &[CUSTOM_METRICS_CONFIG_MAP],
        &[GET, UPDATE],
    )]
}

/// Rules of the metrics reader role.
#[must_use]
pub fn metrics_reader_rules() -> Vec<PolicyRule> {
    vec![rule(EXTERNAL_METRICS_API_GROUP, &["*"], &[GET, LIST, WATCH])]
}

/// Build a fresh `external_metrics` feature.
#[must_use]
pub fn build() -> Box<dyn Feature> {
    Box::<ExternalMetricsFeature>::default()
}

#[derive(Debug, Default)]
pub struct ExternalMetricsFeature {
    enabled: bool,
    use_datadog_metrics: bool,
    wpa_controller: bool,
    register_api_service: bool,
    port: i32,
    endpoint_url: Option<String>,
    owner_name: String,
    owner_namespace: String,
    service_account: String,
}

impl ExternalMetricsFeature {
    fn service(&self) -> Service {
        Service {
            metadata: ObjectMeta {
                name: Some(metrics_service_name(&self.owner_name)),
                namespace: Some(self.owner_namespace.clone()),
                ..ObjectMeta::default()
            },
            spec: Some(ServiceSpec {
                type_: Some("ClusterIP".to_string()),
                selector: Some(selector_labels(&self.owner_name, CLUSTER_AGENT_SUFFIX)),
                ports: Some(vec![ServicePort {
                    name: Some(PORT_NAME.to_string()),
                    port: self.port,
                    target_port: Some(IntOrString::Int(self.port)),
                    protocol: Some("TCP".to_string()),
                    ..ServicePort::default()
                }]),
                ..ServiceSpec::default()
            }),
            ..Service::default()
        }
    }

    fn api_service(&self) -> APIService {
        APIService {
            metadata: ObjectMeta {
                name: Some(API_SERVICE_NAME.to_string()),
                ..ObjectMeta::default()
            },
            spec: Some(APIServiceSpec {
                service: Some(ServiceReference {
                    name: Some(metrics_service_name(&self.owner_name)),
                    namespace: Some(self.owner_namespace.clone()),
                    port: Some(self.port),
                }),
                group: Some(EXTERNAL_METRICS_API_GROUP.to_string()),
                version: Some(EXTERNAL_METRICS_API_VERSION.to_string()),
                insecure_skip_tls_verify: Some(true),
                group_priority_minimum: API_SERVICE_PRIORITY,
                version_priority: API_SERVICE_PRIORITY,
                ca_bundle: None,
            }),
            status: None,
        }
    }
}

impl Feature for ExternalMetricsFeature {
    fn id(&self) -> FeatureId {
        FeatureId::ExternalMetrics
    }

    fn configure(&mut self, owner: &DatadogAgent) -> Result<RequiredComponents> {
        let Some(config) = owner
            .spec
            .features
            .as_ref()
            .and_then(|f| f.external_metrics_server.as_ref())
            .filter(|e| e.enabled.unwrap_or(false))
        else {
            return Ok(RequiredComponents::default());
        };

        self.enabled = true;
        self.use_datadog_metrics = config.use_datadog_metrics.unwrap_or(true);
        self.wpa_controller = config.wpa_controller.unwrap_or(false);
        self.register_api_service = config.register_api_service.unwrap_or(true);
        self.port = config.port.unwrap_or(DEFAULT_PORT);
        self.endpoint_url = config.endpoint_url.clone().filter(|u| !u.is_empty());
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
        let ns = self.owner_namespace.as_str();

        let key = managers.store_mut().add_or_update(ObjectKind::Service, &self.service())?;
        managers.track(component, key);

        let mut rbac = managers.rbac();
        rbac.add_cluster_policy_rules_by_component(
            ns,
            &component.cluster_rbac_resource_name(ns, &self.owner_name),
            &self.service_account,
            cluster_agent_cluster_rules(self.use_datadog_metrics, self.wpa_controller),
            component,
        )?;
        rbac.add_policy_rules_by_component(
            ns,
            &component.rbac_resource_name(&self.owner_name),
            &self.service_account,
            cluster_agent_rules(),
            component,
        )?;
        rbac.add_cluster_role_binding_by_component(
            ns,
            &auth_delegator_binding_name(ns, &self.owner_name),
            &self.service_account,
            AUTH_DELEGATOR_CLUSTER_ROLE,
            component,
        )?;
        rbac.add_role_binding_by_component(
            KUBE_SYSTEM_NAMESPACE,
            &apiserver_auth_binding_name(ns, &self.owner_name),
            ns,
            &self.service_account,
            APISERVER_AUTH_READER_ROLE,
            component,
        )?;

        if !self.register_api_service {
            return Ok(());
        }
        managers.rbac().add_cluster_policy_rules_by_component(
            KUBE_SYSTEM_NAMESPACE,
            &metrics_reader_name(ns, &self.owner_name),
            HPA_CONTROLLER_SERVICE_ACCOUNT,
            metrics_reader_rules(),
            component,
        )?;
        let key = managers
            .store_mut()
            .add_or_update(ObjectKind::ApiService, &self.api_service())?;
        managers.track(component, key);
        Ok(())
    }

    fn manage_cluster_agent(&self) -> Result<PodTemplateChanges> {
        let mut changes = PodTemplateChanges::new();
        if !self.enabled {
            return Ok(changes);
        }
        changes
            .add_env_var_to_container(CLUSTER_AGENT_CONTAINER, DD_EXTERNAL_METRICS_PROVIDER_ENABLED, "true")
            .add_env_var_to_container(
                CLUSTER_AGENT_CONTAINER,
                DD_EXTERNAL_METRICS_PROVIDER_PORT,
                &self.port.to_string(),
            )
            .add_env_var_to_container(
                CLUSTER_AGENT_CONTAINER,
                DD_EXTERNAL_METRICS_PROVIDER_USE_DATADOGMETRIC_CRD,
                &self.use_datadog_metrics.to_string(),
            )
            .add_env_var_to_container(
                CLUSTER_AGENT_CONTAINER,
                DD_EXTERNAL_METRICS_PROVIDER_WPA_CONTROLLER,
                &self.wpa_controller.to_string(),
            )
            .add_port_to_container(
                CLUSTER_AGENT_CONTAINER,
                ContainerPort {
                    name: Some(PORT_NAME.to_string()),
                    container_port: self.port,
                    protocol: Some("TCP".to_string()),
                    ..ContainerPort::default()
                },
            );
        if let Some(url) = &self.endpoint_url {
            changes.add_env_var_to_container(CLUSTER_AGENT_CONTAINER, DD_EXTERNAL_METRICS_PROVIDER_ENDPOINT, url);
        }
        Ok(changes)
    }
}

#[cfg(test)]
#[path = "externalmetrics_tests.rs"]
mod externalmetrics_tests;
