// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Dependency store.
//!
//! Features and component reconcilers queue the auxiliary objects they need
//! (service accounts, RBAC, config maps, secrets, services, disruption
//! budgets) here during a pass. At the end of the pass the top-level loop
//! calls [`DependencyStore::apply`] to converge the platform towards the
//! queued objects, then [`DependencyStore::cleanup`] to delete objects a
//! previous pass queued and this one did not.
//!
//! Every queued object is stamped with:
//!
//! - the default label set
//! - `operator.datadoghq.com/managed-by-store=true`, the label cleanup lists by
//! - `app.kubernetes.io/part-of`, the encoded owner identity
//! - a controller owner reference, when the object lives in the owner namespace
//! - the content-hash annotation over the rest of the object

use super::equality::is_equal;
use crate::constants::MD5_SPEC_HASH_ANNOTATION;
use crate::crd::DatadogAgent;
use crate::errors::{OperatorError, PlatformError, Result};
use crate::hashing::{content_hash, set_hash_annotation};
use crate::labels::{default_labels, K8S_PART_OF, MANAGED_BY_STORE, MANAGED_BY_STORE_VALUE};
use crate::metrics::{record_resource_created, record_resource_deleted, record_resource_updated};
use crate::ownership::{
    is_attributed_to, merge_owner_references, owner_reference, ownership_for, part_of_value,
    set_controller_reference, Ownership,
};
use crate::platform::{from_dynamic, to_dynamic, ObjectKey, ObjectKind, PlatformClient};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::api::DynamicObject;
use kube::core::TypeMeta;
use kube::{Resource, ResourceExt};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

/// Kinds the store manages. Workloads are handled by the component reconcilers.
pub const STORE_KINDS: [ObjectKind; 10] = [
    ObjectKind::ServiceAccount,
    ObjectKind::ConfigMap,
    ObjectKind::Secret,
    ObjectKind::ClusterRole,
    ObjectKind::ClusterRoleBinding,
    ObjectKind::Role,
    ObjectKind::RoleBinding,
    ObjectKind::Service,
    ObjectKind::ApiService,
    ObjectKind::PodDisruptionBudget,
];

/// What [`DependencyStore::apply`] changed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ApplyOutcome {
    pub created: usize,
    pub updated: usize,
}

impl ApplyOutcome {
    /// Returns true when at least one object was created or updated.
    #[must_use]
    pub fn mutated(&self) -> bool {
        self.created + self.updated > 0
    }
}

/// Desired auxiliary objects of one owner for one pass.
#[derive(Debug, Clone)]
pub struct DependencyStore {
    owner: DatadogAgent,
    owner_name: String,
    owner_namespace: String,
    part_of: String,
    owner_ref: OwnerReference,
    objects: BTreeMap<ObjectKey, DynamicObject>,
}

impl DependencyStore {
    /// Create an empty store for `owner`.
    ///
    /// # Errors
    ///
    /// Returns [`OperatorError::MissingOwnerMetadata`] if the owner has no UID.
    pub fn new(owner: &DatadogAgent) -> Result<Self> {
        Ok(Self {
            owner_ref: owner_reference(owner)?,
            owner_name: owner.name_any(),
            owner_namespace: owner.namespace().unwrap_or_default(),
            part_of: part_of_value(owner),
            owner: owner.clone(),
            objects: BTreeMap::new(),
        })
    }

    /// Namespace of the owner, used for objects queued without one.
    #[must_use]
    pub fn owner_namespace(&self) -> &str {
        &self.owner_namespace
    }

    /// Queue a typed object, replacing any object with the same identity.
    ///
    /// # Errors
    ///
    /// Returns an error if the object has no name, cannot be converted, or is
    /// already controlled by another owner.
    pub fn add_or_update<K>(&mut self, kind: ObjectKind, object: &K) -> Result<ObjectKey>
    where
        K: Resource<DynamicType = ()> + Serialize,
    {
        self.add_or_update_dynamic(kind, to_dynamic(object)?)
    }

    /// Queue a dynamic object, replacing any object with the same identity.
    ///
    /// # Errors
    ///
    /// Same as [`DependencyStore::add_or_update`].
    pub fn add_or_update_dynamic(
        &mut self,
        kind: ObjectKind,
        mut object: DynamicObject,
    ) -> Result<ObjectKey> {
        let name = object
            .metadata
            .name
            .clone()
            .filter(|n| !n.is_empty())
            .ok_or_else(|| OperatorError::Generic(format!("{kind} queued without a name")))?;

        if kind.is_namespaced() {
            if object.metadata.namespace.as_deref().unwrap_or_default().is_empty() {
                object.metadata.namespace = Some(self.owner_namespace.clone());
            }
        } else {
            object.metadata.namespace = None;
        }
        if object.types.is_none() {
            let resource = kind.api_resource();
            object.types = Some(TypeMeta {
                api_version: resource.api_version,
                kind: resource.kind,
            });
        }

        let mut labels = default_labels(&self.owner_name, &self.part_of, "", "");
        labels.extend(object.metadata.labels.take().unwrap_or_default());
        labels.insert(MANAGED_BY_STORE.to_string(), MANAGED_BY_STORE_VALUE.to_string());
        labels.insert(K8S_PART_OF.to_string(), self.part_of.clone());
        object.metadata.labels = Some(labels);

        let key = ObjectKey::of(kind, &object);
        if ownership_for(kind, &key.namespace, &self.owner_namespace) == Ownership::OwnsDirectly {
            set_controller_reference(&mut object.metadata, self.owner_ref.clone())?;
        }

        let mut annotations = object.metadata.annotations.take().unwrap_or_default();
        annotations.remove(MD5_SPEC_HASH_ANNOTATION);
        let hash = content_hash(&serde_json::json!({
            "data": object.data,
            "labels": object.metadata.labels,
            "annotations": annotations,
        }))
        .map_err(|e| PlatformError::Serialization {
            kind: kind.to_string(),
            name: name.clone(),
            reason: e.to_string(),
        })?;
        set_hash_annotation(&mut annotations, &hash);
        object.metadata.annotations = Some(annotations);

        debug!(kind = %kind, object = %key, "Queued object in dependency store");
        self.objects.insert(key.clone(), object);
        Ok(key)
    }

    /// Queued object with this identity.
    #[must_use]
    pub fn get(&self, kind: ObjectKind, namespace: &str, name: &str) -> Option<&DynamicObject> {
        self.objects.get(&ObjectKey::new(kind, namespace, name))
    }

    /// Typed copy of a queued object, or a new object carrying only the
    /// identity when nothing is queued yet.
    ///
    /// # Errors
    ///
    /// Returns an error if the queued object does not convert to `K`.
    pub fn get_or_create<K>(&self, kind: ObjectKind, namespace: &str, name: &str) -> Result<K>
    where
        K: Resource<DynamicType = ()> + DeserializeOwned + Default,
    {
        if let Some(existing) = self.get(kind, namespace, name) {
            return Ok(from_dynamic(existing)?);
        }

        let mut object = K::default();
        object.meta_mut().name = Some(name.to_string());
        if kind.is_namespaced() {
            let namespace = if namespace.is_empty() {
                &self.owner_namespace
            } else {
                namespace
            };
            object.meta_mut().namespace = Some(namespace.to_string());
        }
        Ok(object)
    }

    /// Drop a queued object. Returns false when nothing was queued.
    pub fn delete(&mut self, kind: ObjectKind, namespace: &str, name: &str) -> bool {
        self.objects
            .remove(&ObjectKey::new(kind, namespace, name))
            .is_some()
    }

    /// Drop a queued object by key.
    pub fn delete_key(&mut self, key: &ObjectKey) -> bool {
        self.objects.remove(key).is_some()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.objects.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// Every queued object, ordered by key.
    pub fn iter(&self) -> impl Iterator<Item = (&ObjectKey, &DynamicObject)> {
        self.objects.iter()
    }

    /// Converge the platform towards the queued objects.
    ///
    /// Kinds are applied in [`ObjectKind::ALL`] order so that service accounts
    /// and roles exist before the bindings referencing them. Every object is
    /// attempted even when an earlier one failed.
    ///
    /// # Errors
    ///
    /// Returns the first error encountered.
    pub async fn apply(&self, platform: &dyn PlatformClient) -> Result<ApplyOutcome> {
        let mut outcome = ApplyOutcome::default();
        let mut errors: Vec<OperatorError> = Vec::new();

        for kind in ObjectKind::ALL {
            for (key, desired) in self.objects.iter().filter(|(key, _)| key.kind == kind) {
                match apply_one(platform, key, desired).await {
                    Ok(Applied::Created) => outcome.created += 1,
                    Ok(Applied::Updated) => outcome.updated += 1,
                    Ok(Applied::Unchanged) => {}
                    Err(e) => {
                        warn!(kind = %kind, object = %key, error = %e, "Failed to apply object");
                        errors.push(e.into());
                    }
                }
            }
        }

        match errors.into_iter().next() {
            Some(first) => Err(first),
            None => Ok(outcome),
        }
    }

    /// Delete objects created by a previous pass that this pass no longer queued.
    ///
    /// Only objects carrying the store label and attributable to the owner
    /// through the relation their kind uses are deleted. Objects already gone
    /// are ignored.
    ///
    /// # Errors
    ///
    /// Returns the first list or delete error encountered.
    pub async fn cleanup(&self, platform: &dyn PlatformClient) -> Result<usize> {
        let mut selector = BTreeMap::new();
        selector.insert(MANAGED_BY_STORE.to_string(), MANAGED_BY_STORE_VALUE.to_string());

        let mut deleted = 0;
        let mut errors: Vec<OperatorError> = Vec::new();

        for kind in STORE_KINDS {
            let live = match platform.list(kind, None, &selector).await {
                Ok(live) => live,
                Err(e) => {
                    errors.push(e.into());
                    continue;
                }
            };

            for object in live {
                let key = ObjectKey::of(kind, &object);
                if self.objects.contains_key(&key) {
                    continue;
                }
                let ownership = ownership_for(kind, &key.namespace, &self.owner_namespace);
                if !is_attributed_to(ownership, &object.metadata, &self.owner) {
                    continue;
                }

                match platform.delete(&key).await {
                    Ok(()) => {
                        info!(kind = %kind, object = %key, "Deleted object no longer needed");
                        record_resource_deleted(kind.kind());
                        deleted += 1;
                    }
                    Err(e) if e.is_not_found() => {}
                    Err(e) => errors.push(e.into()),
                }
            }
        }

        match errors.into_iter().next() {
            Some(first) => Err(first),
            None => Ok(deleted),
        }
    }
}

enum Applied {
    Created,
    Updated,
    Unchanged,
}

async fn apply_one(
    platform: &dyn PlatformClient,
    key: &ObjectKey,
    desired: &DynamicObject,
) -> std::result::Result<Applied, PlatformError> {
    let Some(live) = platform.get(key).await? else {
        platform.create(key.kind, desired).await?;
        info!(kind = %key.kind, object = %key, "Created object");
        record_resource_created(key.kind.kind());
        return Ok(Applied::Created);
    };

    if is_equal(key.kind, &live, desired) {
        return Ok(Applied::Unchanged);
    }

    platform
        .update(key.kind, &merge_for_update(key.kind, &live, desired))
        .await?;
    info!(kind = %key.kind, object = %key, "Updated object");
    record_resource_updated(key.kind.kind());
    Ok(Applied::Updated)
}

/// Desired object carrying the live version, the live metadata entries it
/// does not set, and the fields the platform assigned.
fn merge_for_update(kind: ObjectKind, live: &DynamicObject, desired: &DynamicObject) -> DynamicObject {
    let mut updated = desired.clone();
    updated
        .metadata
        .resource_version
        .clone_from(&live.metadata.resource_version);
    updated.metadata.uid.clone_from(&live.metadata.uid);

    let mut labels = live.metadata.labels.clone().unwrap_or_default();
    labels.extend(desired.metadata.labels.clone().unwrap_or_default());
    updated.metadata.labels = Some(labels);

    let mut annotations = live.metadata.annotations.clone().unwrap_or_default();
    annotations.extend(desired.metadata.annotations.clone().unwrap_or_default());
    updated.metadata.annotations = Some(annotations);

    if let Some(owners) = merge_owner_references(
        live.metadata.owner_references.as_ref(),
        desired.metadata.owner_references.as_ref(),
    ) {
        updated.metadata.owner_references = Some(owners);
    }

    if kind == ObjectKind::Service {
        for field in ["clusterIP", "clusterIPs"] {
            let assigned = &live.data["spec"][field];
            if !assigned.is_null() && updated.data["spec"][field].is_null() {
                updated.data["spec"][field] = assigned.clone();
            }
        }
    }

    updated
}

#[cfg(test)]
#[path = "store_tests.rs"]
mod store_tests;
