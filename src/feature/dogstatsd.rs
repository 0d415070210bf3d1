// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! The `dogstatsd` feature.
//!
//! Always on: exposes the UDP `DogStatsD` listener of the node agent, optionally
//! on a host port.

use super::{node_agent_container, Feature, FeatureId, RequiredComponent, RequiredComponents};
use crate::constants::{DOGSTATSD_PORT, DOGSTATSD_PORT_NAME};
use crate::crd::DatadogAgent;
use crate::errors::Result;
use crate::podtemplate::PodTemplateChanges;
use k8s_openapi::api::core::v1::ContainerPort;

pub const DD_DOGSTATSD_NON_LOCAL_TRAFFIC: &str = "DD_DOGSTATSD_NON_LOCAL_TRAFFIC";
pub const DD_DOGSTATSD_ORIGIN_DETECTION: &str = "DD_DOGSTATSD_ORIGIN_DETECTION";

/// Build a fresh `dogstatsd` feature.
#[must_use]
pub fn build() -> Box<dyn Feature> {
    Box::<DogstatsdFeature>::default()
}

#[derive(Debug, Default)]
pub struct DogstatsdFeature {
    container: &'static str,
    host_port: Option<i32>,
    origin_detection: bool,
}

impl DogstatsdFeature {
    fn node_agent_changes(&self) -> PodTemplateChanges {
        let mut changes = PodTemplateChanges::new();
        changes.add_port_to_container(
            self.container,
            ContainerPort {
                name: Some(DOGSTATSD_PORT_NAME.to_string()),
                container_port: DOGSTATSD_PORT,
                host_port: self.host_port,
                protocol: Some("UDP".to_string()),
                ..ContainerPort::default()
            },
        );
        if self.host_port.is_some() {
            changes.add_env_var_to_container(self.container, DD_DOGSTATSD_NON_LOCAL_TRAFFIC, "true");
        }
        if self.origin_detection {
            changes.add_env_var_to_container(self.container, DD_DOGSTATSD_ORIGIN_DETECTION, "true");
        }
        changes
    }
}

impl Feature for DogstatsdFeature {
    fn id(&self) -> FeatureId {
        FeatureId::Dogstatsd
    }

    fn configure(&mut self, owner: &DatadogAgent) -> Result<RequiredComponents> {
        let config = owner.spec.features.as_ref().and_then(|f| f.dogstatsd.as_ref());

        self.container = node_agent_container(owner);
        self.host_port = config
            .and_then(|c| c.host_port_config.as_ref())
            .filter(|h| h.enabled.unwrap_or(false))
            .map(|h| h.port.unwrap_or(DOGSTATSD_PORT));
        self.origin_detection = config
            .and_then(|c| c.origin_detection_enabled)
            .unwrap_or(false);

        Ok(RequiredComponents {
            agent: RequiredComponent::required(&[self.container]),
            ..RequiredComponents::default()
        })
    }

    fn manage_node_agent(&self) -> Result<PodTemplateChanges> {
        Ok(self.node_agent_changes())
    }

    fn manage_single_container_node_agent(&self) -> Result<PodTemplateChanges> {
        Ok(self.node_agent_changes())
    }
}

#[cfg(test)]
#[path = "dogstatsd_tests.rs"]
mod dogstatsd_tests;
