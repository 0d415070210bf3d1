// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Resource managers handed to features and component reconcilers.
//!
//! Features request auxiliary objects through these managers instead of the
//! platform API:
//!
//! - [`store::DependencyStore`] - generic upsert store keyed by kind and identity
//! - [`rbac::RbacManager`] - service accounts, roles and bindings with rule merging
//! - [`configmap::ConfigMapManager`] - generated config maps
//!
//! Objects queued on behalf of a component are tracked so that they can be
//! dropped when the component goes away, which lets the store cleanup delete
//! them from the platform.

pub mod configmap;
pub mod equality;
pub mod rbac;
pub mod store;

use crate::component::Component;
use crate::crd::DatadogAgent;
use crate::errors::Result;
use crate::platform::{ObjectKey, ObjectKind};
use configmap::ConfigMapManager;
use rbac::RbacManager;
use std::collections::{BTreeMap, BTreeSet};
use store::DependencyStore;

/// Every manager of one pass, sharing a single [`DependencyStore`].
#[derive(Debug, Clone)]
pub struct ResourceManagers {
    store: DependencyStore,
    by_component: BTreeMap<Component, BTreeSet<ObjectKey>>,
}

impl ResourceManagers {
    /// Fresh managers for `owner`.
    ///
    /// # Errors
    ///
    /// Returns an error if the owner has no UID.
    pub fn new(owner: &DatadogAgent) -> Result<Self> {
        Ok(Self {
            store: DependencyStore::new(owner)?,
            by_component: BTreeMap::new(),
        })
    }

    #[must_use]
    pub fn store(&self) -> &DependencyStore {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut DependencyStore {
        &mut self.store
    }

    pub fn rbac(&mut self) -> RbacManager<'_> {
        RbacManager::new(self)
    }

    pub fn config_maps(&mut self) -> ConfigMapManager<'_> {
        ConfigMapManager::new(self)
    }

    /// Remember that `key` was queued for `component`.
    pub fn track(&mut self, component: Component, key: ObjectKey) {
        self.by_component.entry(component).or_default().insert(key);
    }

    /// Keys queued for `component`.
    #[must_use]
    pub fn tracked(&self, component: Component) -> Vec<ObjectKey> {
        self.by_component
            .get(&component)
            .map(|keys| keys.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Drop every object of `kinds` queued for `component`.
    ///
    /// Returns the number of objects removed from the store.
    pub fn delete_by_component(&mut self, component: Component, kinds: &[ObjectKind]) -> usize {
        let Some(keys) = self.by_component.get_mut(&component) else {
            return 0;
        };
        let doomed: Vec<ObjectKey> = keys
            .iter()
            .filter(|key| kinds.contains(&key.kind))
            .cloned()
            .collect();

        let mut removed = 0;
        for key in doomed {
            keys.remove(&key);
            if self.store.delete_key(&key) {
                removed += 1;
            }
        }
        removed
    }

    /// Drop every object queued for `component`.
    pub fn delete_component(&mut self, component: Component) -> usize {
        self.delete_by_component(component, &ObjectKind::ALL)
    }
}
