// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Config map manager.

use super::ResourceManagers;
use crate::component::Component;
use crate::errors::Result;
use crate::platform::ObjectKind;
use k8s_openapi::api::core::v1::ConfigMap;
use kube::api::ObjectMeta;
use std::collections::BTreeMap;

/// Borrowing view of [`ResourceManagers`] for generated config maps.
pub struct ConfigMapManager<'a> {
    managers: &'a mut ResourceManagers,
}

impl<'a> ConfigMapManager<'a> {
    pub(super) fn new(managers: &'a mut ResourceManagers) -> Self {
        Self { managers }
    }

    /// Queue the config map `namespace/name` holding `data`, replacing any
    /// config map queued under the same name.
    ///
    /// # Errors
    ///
    /// Returns an error if the store rejects the object.
    pub fn add_config_map(
        &mut self,
        name: &str,
        namespace: &str,
        data: BTreeMap<String, String>,
    ) -> Result<()> {
        self.managers
            .store_mut()
            .add_or_update(ObjectKind::ConfigMap, &config_map(name, namespace, data, None))
            .map(|_| ())
    }

    /// Queue a config map carrying `annotations`, typically a checksum of
    /// the user configuration it was generated from.
    ///
    /// # Errors
    ///
    /// Returns an error if the store rejects the object.
    pub fn add_annotated_config_map(
        &mut self,
        name: &str,
        namespace: &str,
        data: BTreeMap<String, String>,
        annotations: BTreeMap<String, String>,
    ) -> Result<()> {
        self.managers
            .store_mut()
            .add_or_update(
                ObjectKind::ConfigMap,
                &config_map(name, namespace, data, Some(annotations).filter(|a| !a.is_empty())),
            )
            .map(|_| ())
    }

    /// Same as [`ConfigMapManager::add_config_map`], tracked for `component`.
    ///
    /// # Errors
    ///
    /// Returns an error if the store rejects the object.
    pub fn add_config_map_by_component(
        &mut self,
        name: &str,
        namespace: &str,
        data: BTreeMap<String, String>,
        component: Component,
    ) -> Result<()> {
        let key = self
            .managers
            .store_mut()
            .add_or_update(ObjectKind::ConfigMap, &config_map(name, namespace, data, None))?;
        self.managers.track(component, key);
        Ok(())
    }
}

fn config_map(
    name: &str,
    namespace: &str,
    data: BTreeMap<String, String>,
    annotations: Option<BTreeMap<String, String>>,
) -> ConfigMap {
    ConfigMap {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            annotations,
            ..ObjectMeta::default()
        },
        data: Some(data),
        ..ConfigMap::default()
    }
}
