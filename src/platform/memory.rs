// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! In-process [`PlatformClient`].
//!
//! Keeps objects in a map guarded by a `tokio::sync::RwLock` and mimics the
//! API server behaviors the reconcilers rely on:
//!
//! - `uid` and `resourceVersion` are assigned on create and bumped on update
//! - an update carrying a stale `resourceVersion` fails with a conflict
//! - Services get a `clusterIP` on create, which cannot change afterwards
//!
//! Writes are counted so tests can assert idempotence, and status write
//! conflicts can be injected.

use super::{ObjectKey, ObjectKind, PlatformClient};
use crate::constants::KIND_DATADOG_AGENT;
use crate::crd::{DatadogAgent, DatadogAgentStatus};
use crate::errors::PlatformError;
use async_trait::async_trait;
use kube::api::DynamicObject;
use kube::ResourceExt;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

/// Number of writes performed against an [`InMemoryPlatform`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriteCounters {
    pub creates: usize,
    pub updates: usize,
    pub deletes: usize,
    pub status_writes: usize,
}

impl WriteCounters {
    /// Creates plus updates.
    #[must_use]
    pub fn mutations(&self) -> usize {
        self.creates + self.updates
    }
}

#[derive(Default)]
struct State {
    objects: BTreeMap<ObjectKey, DynamicObject>,
    statuses: BTreeMap<(String, String), DatadogAgentStatus>,
    counters: WriteCounters,
    next_id: u64,
    injected_status_conflicts: usize,
}

impl State {
    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }
}

/// Platform adapter keeping every object in memory.
#[derive(Clone, Default)]
pub struct InMemoryPlatform {
    state: Arc<RwLock<State>>,
}

impl InMemoryPlatform {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Store an object as if something else created it. Not counted.
    pub async fn seed(&self, kind: ObjectKind, object: DynamicObject) {
        let mut state = self.state.write().await;
        let stored = persist(&mut state, kind, object);
        state.objects.insert(ObjectKey::of(kind, &stored), stored);
    }

    /// Snapshot of one object.
    pub async fn object(&self, kind: ObjectKind, namespace: &str, name: &str) -> Option<DynamicObject> {
        self.state
            .read()
            .await
            .objects
            .get(&ObjectKey::new(kind, namespace, name))
            .cloned()
    }

    /// Snapshot of every object of `kind`.
    pub async fn objects(&self, kind: ObjectKind) -> Vec<DynamicObject> {
        self.state
            .read()
            .await
            .objects
            .iter()
            .filter(|(key, _)| key.kind == kind)
            .map(|(_, object)| object.clone())
            .collect()
    }

    /// Snapshot of every stored object with its key.
    pub async fn all_objects(&self) -> Vec<(ObjectKey, DynamicObject)> {
        self.state
            .read()
            .await
            .objects
            .iter()
            .map(|(key, object)| (key.clone(), object.clone()))
            .collect()
    }

    /// Replace the payload of a stored object in place, bypassing version checks.
    ///
    /// Returns false when the object does not exist.
    pub async fn mutate<F>(&self, key: &ObjectKey, f: F) -> bool
    where
        F: FnOnce(&mut DynamicObject),
    {
        let mut state = self.state.write().await;
        match state.objects.get_mut(key) {
            Some(object) => {
                f(object);
                true
            }
            None => false,
        }
    }

    /// Last status written for the owner `namespace/name`.
    pub async fn owner_status(&self, namespace: &str, name: &str) -> Option<DatadogAgentStatus> {
        self.state
            .read()
            .await
            .statuses
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
    }

    /// Make the next `count` status writes fail with a conflict.
    pub async fn inject_status_conflicts(&self, count: usize) {
        self.state.write().await.injected_status_conflicts = count;
    }

    pub async fn counters(&self) -> WriteCounters {
        self.state.read().await.counters
    }

    pub async fn reset_counters(&self) {
        self.state.write().await.counters = WriteCounters::default();
    }
}

/// Assign server-side fields to a new object.
fn persist(state: &mut State, kind: ObjectKind, mut object: DynamicObject) -> DynamicObject {
    let id = state.next_id();
    object.metadata.uid = Some(format!("00000000-0000-0000-0000-{id:012}"));
    object.metadata.resource_version = Some(id.to_string());
    if !kind.is_namespaced() {
        object.metadata.namespace = None;
    }
    if kind == ObjectKind::Service && object.data["spec"]["clusterIP"].is_null() {
        object.data["spec"]["clusterIP"] =
            serde_json::Value::String(format!("10.96.{}.{}", (id >> 8) & 0xff, id & 0xff));
    }
    object
}

fn not_found(key: &ObjectKey) -> PlatformError {
    PlatformError::NotFound {
        kind: key.kind.to_string(),
        name: key.to_string(),
    }
}

#[async_trait]
impl PlatformClient for InMemoryPlatform {
    async fn get(&self, key: &ObjectKey) -> Result<Option<DynamicObject>, PlatformError> {
        Ok(self.state.read().await.objects.get(key).cloned())
    }

    async fn create(
        &self,
        kind: ObjectKind,
        object: &DynamicObject,
    ) -> Result<DynamicObject, PlatformError> {
        let key = ObjectKey::of(kind, object);
        let mut state = self.state.write().await;
        if state.objects.contains_key(&key) {
            return Err(PlatformError::AlreadyExists {
                kind: kind.to_string(),
                name: key.to_string(),
            });
        }

        let stored = persist(&mut state, kind, object.clone());
        state.objects.insert(key.clone(), stored.clone());
        state.counters.creates += 1;
        debug!(kind = %kind, object = %key, "Created object in memory");
        Ok(stored)
    }

    async fn update(
        &self,
        kind: ObjectKind,
        object: &DynamicObject,
    ) -> Result<DynamicObject, PlatformError> {
        let key = ObjectKey::of(kind, object);
        let mut state = self.state.write().await;
        let version = state.next_id();

        let current = state.objects.get(&key).ok_or_else(|| not_found(&key))?;
        if object
            .metadata
            .resource_version
            .as_ref()
            .is_some_and(|rv| Some(rv) != current.metadata.resource_version.as_ref())
        {
            return Err(PlatformError::Conflict {
                kind: kind.to_string(),
                name: key.to_string(),
            });
        }
        if kind == ObjectKind::Service {
            let live_ip = &current.data["spec"]["clusterIP"];
            let new_ip = &object.data["spec"]["clusterIP"];
            if !new_ip.is_null() && new_ip != live_ip {
                return Err(PlatformError::Api {
                    kind: kind.to_string(),
                    name: key.to_string(),
                    code: 422,
                    message: "spec.clusterIP: Invalid value: field is immutable".to_string(),
                });
            }
        }

        let mut stored = object.clone();
        stored.metadata.uid.clone_from(&current.metadata.uid);
        stored.metadata.resource_version = Some(version.to_string());
        if kind == ObjectKind::Service && stored.data["spec"]["clusterIP"].is_null() {
            stored.data["spec"]["clusterIP"] = current.data["spec"]["clusterIP"].clone();
        }

        state.objects.insert(key.clone(), stored.clone());
        state.counters.updates += 1;
        debug!(kind = %kind, object = %key, "Updated object in memory");
        Ok(stored)
    }

    async fn delete(&self, key: &ObjectKey) -> Result<(), PlatformError> {
        let mut state = self.state.write().await;
        state.objects.remove(key).ok_or_else(|| not_found(key))?;
        state.counters.deletes += 1;
        debug!(kind = %key.kind, object = %key, "Deleted object in memory");
        Ok(())
    }

    async fn list(
        &self,
        kind: ObjectKind,
        namespace: Option<&str>,
        labels: &BTreeMap<String, String>,
    ) -> Result<Vec<DynamicObject>, PlatformError> {
        let state = self.state.read().await;
        Ok(state
            .objects
            .iter()
            .filter(|(key, _)| key.kind == kind)
            .filter(|(key, _)| namespace.is_none_or(|ns| !kind.is_namespaced() || key.namespace == ns))
            .filter(|(_, object)| {
                let live = object.labels();
                labels.iter().all(|(k, v)| live.get(k) == Some(v))
            })
            .map(|(_, object)| object.clone())
            .collect())
    }

    async fn patch_owner_status(
        &self,
        owner: &DatadogAgent,
        status: &DatadogAgentStatus,
    ) -> Result<(), PlatformError> {
        let namespace = owner.namespace().unwrap_or_default();
        let name = owner.name_any();
        let mut state = self.state.write().await;

        if state.injected_status_conflicts > 0 {
            state.injected_status_conflicts -= 1;
            return Err(PlatformError::Conflict {
                kind: KIND_DATADOG_AGENT.to_string(),
                name: format!("{namespace}/{name}"),
            });
        }

        state.statuses.insert((namespace, name), status.clone());
        state.counters.status_writes += 1;
        Ok(())
    }
}

#[cfg(test)]
#[path = "memory_tests.rs"]
mod memory_tests;
