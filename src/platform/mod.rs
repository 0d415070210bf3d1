// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Platform API port.
//!
//! The reconcilers never talk to the API server directly. Every read and
//! write goes through [`PlatformClient`], with objects crossing the boundary
//! as [`DynamicObject`]s tagged by a closed [`ObjectKind`].
//!
//! Two adapters are provided:
//!
//! - [`cluster::KubePlatform`] - backed by `kube::Api<DynamicObject>`
//! - [`memory::InMemoryPlatform`] - an in-process object map used by tests
//!   and by `--dry-run`

pub mod cluster;
pub mod memory;

use crate::constants::{API_GROUP, EDS_API_VERSION, EDS_PLURAL, KIND_EXTENDED_DAEMONSET};
use crate::crd::{DatadogAgent, DatadogAgentStatus};
use crate::errors::PlatformError;
use async_trait::async_trait;
use k8s_openapi::api::apps::v1::{DaemonSet, Deployment};
use k8s_openapi::api::core::v1::{ConfigMap, Secret, Service, ServiceAccount};
use k8s_openapi::api::policy::v1::PodDisruptionBudget;
use k8s_openapi::api::rbac::v1::{ClusterRole, ClusterRoleBinding, Role, RoleBinding};
use k8s_openapi::kube_aggregator::pkg::apis::apiregistration::v1::APIService;
use kube::api::{ApiResource, DynamicObject, GroupVersionKind};
use kube::{Resource, ResourceExt};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;

/// Kinds of objects the operator manages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ObjectKind {
    Deployment,
    DaemonSet,
    ExtendedDaemonSet,
    Service,
    ServiceAccount,
    ConfigMap,
    Secret,
    Role,
    RoleBinding,
    ClusterRole,
    ClusterRoleBinding,
    PodDisruptionBudget,
    ApiService,
}

impl ObjectKind {
    /// Every managed kind, in the order the dependency store applies them.
    pub const ALL: [ObjectKind; 13] = [
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
        ObjectKind::Deployment,
        ObjectKind::DaemonSet,
        ObjectKind::ExtendedDaemonSet,
    ];

    /// Returns false for cluster-scoped kinds.
    #[must_use]
    pub fn is_namespaced(self) -> bool {
        !matches!(self, Self::ClusterRole | Self::ClusterRoleBinding | Self::ApiService)
    }

    /// The `kind` field value of objects of this kind.
    #[must_use]
    pub fn kind(self) -> &'static str {
        match self {
            Self::Deployment => "Deployment",
            Self::DaemonSet => "DaemonSet",
            Self::ExtendedDaemonSet => KIND_EXTENDED_DAEMONSET,
            Self::Service => "Service",
            Self::ServiceAccount => "ServiceAccount",
            Self::ConfigMap => "ConfigMap",
            Self::Secret => "Secret",
            Self::Role => "Role",
            Self::RoleBinding => "RoleBinding",
            Self::ClusterRole => "ClusterRole",
            Self::ClusterRoleBinding => "ClusterRoleBinding",
            Self::PodDisruptionBudget => "PodDisruptionBudget",
            Self::ApiService => "APIService",
        }
    }

    /// API resource used to build dynamic `Api` handles.
    #[must_use]
    pub fn api_resource(self) -> ApiResource {
        match self {
            Self::Deployment => ApiResource::erase::<Deployment>(&()),
            Self::DaemonSet => ApiResource::erase::<DaemonSet>(&()),
            Self::ExtendedDaemonSet => ApiResource::from_gvk_with_plural(
                &GroupVersionKind::gvk(API_GROUP, EDS_API_VERSION, KIND_EXTENDED_DAEMONSET),
                EDS_PLURAL,
            ),
            Self::Service => ApiResource::erase::<Service>(&()),
            Self::ServiceAccount => ApiResource::erase::<ServiceAccount>(&()),
            Self::ConfigMap => ApiResource::erase::<ConfigMap>(&()),
            Self::Secret => ApiResource::erase::<Secret>(&()),
            Self::Role => ApiResource::erase::<Role>(&()),
            Self::RoleBinding => ApiResource::erase::<RoleBinding>(&()),
            Self::ClusterRole => ApiResource::erase::<ClusterRole>(&()),
            Self::ClusterRoleBinding => ApiResource::erase::<ClusterRoleBinding>(&()),
            Self::PodDisruptionBudget => ApiResource::erase::<PodDisruptionBudget>(&()),
            Self::ApiService => ApiResource::erase::<APIService>(&()),
        }
    }
}

impl fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.kind())
    }
}

/// Identity of a managed object: kind, namespace and name.
///
/// The namespace is always empty for cluster-scoped kinds.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectKey {
    pub kind: ObjectKind,
    pub namespace: String,
    pub name: String,
}

impl ObjectKey {
    /// Build a key, dropping the namespace for cluster-scoped kinds.
    #[must_use]
    pub fn new(kind: ObjectKind, namespace: &str, name: &str) -> Self {
        Self {
            kind,
            namespace: if kind.is_namespaced() {
                namespace.to_string()
            } else {
                String::new()
            },
            name: name.to_string(),
        }
    }

    /// Key of an existing dynamic object.
    #[must_use]
    pub fn of(kind: ObjectKind, object: &DynamicObject) -> Self {
        Self::new(
            kind,
            object.namespace().as_deref().unwrap_or_default(),
            &object.name_any(),
        )
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.namespace.is_empty() {
            f.write_str(&self.name)
        } else {
            write!(f, "{}/{}", self.namespace, self.name)
        }
    }
}

/// Everything the reconcilers need from the API server.
#[async_trait]
pub trait PlatformClient: Send + Sync {
    /// Fetch an object; `Ok(None)` when it does not exist.
    async fn get(&self, key: &ObjectKey) -> Result<Option<DynamicObject>, PlatformError>;

    /// Create an object and return the persisted copy.
    async fn create(
        &self,
        kind: ObjectKind,
        object: &DynamicObject,
    ) -> Result<DynamicObject, PlatformError>;

    /// Replace an object. The `resourceVersion` carried by `object` is used
    /// for optimistic concurrency.
    async fn update(
        &self,
        kind: ObjectKind,
        object: &DynamicObject,
    ) -> Result<DynamicObject, PlatformError>;

    /// Delete an object. Returns [`PlatformError::NotFound`] if it is gone.
    async fn delete(&self, key: &ObjectKey) -> Result<(), PlatformError>;

    /// List objects of `kind` carrying every label of `labels`.
    ///
    /// `namespace` of `None` lists across all namespaces.
    async fn list(
        &self,
        kind: ObjectKind,
        namespace: Option<&str>,
        labels: &BTreeMap<String, String>,
    ) -> Result<Vec<DynamicObject>, PlatformError>;

    /// Write the status subresource of the owner.
    ///
    /// Fails with [`PlatformError::Conflict`] when the owner changed since it
    /// was read.
    async fn patch_owner_status(
        &self,
        owner: &DatadogAgent,
        status: &DatadogAgentStatus,
    ) -> Result<(), PlatformError>;
}

/// Convert a typed resource into a [`DynamicObject`].
///
/// # Errors
///
/// Returns [`PlatformError::Serialization`] if the object does not serialize
/// into a Kubernetes object shape.
pub fn to_dynamic<K>(object: &K) -> Result<DynamicObject, PlatformError>
where
    K: Resource<DynamicType = ()> + Serialize,
{
    let value = serde_json::to_value(object).map_err(|e| serialization_error::<K>(object, &e))?;
    serde_json::from_value(value).map_err(|e| serialization_error::<K>(object, &e))
}

/// Convert a [`DynamicObject`] back into a typed resource.
///
/// # Errors
///
/// Returns [`PlatformError::Serialization`] if the payload does not match `K`.
pub fn from_dynamic<K>(object: &DynamicObject) -> Result<K, PlatformError>
where
    K: Resource<DynamicType = ()> + DeserializeOwned,
{
    let into_error = |e: serde_json::Error| PlatformError::Serialization {
        kind: K::kind(&()).to_string(),
        name: object.name_any(),
        reason: e.to_string(),
    };
    let value = serde_json::to_value(object).map_err(into_error)?;
    serde_json::from_value(value).map_err(into_error)
}

fn serialization_error<K>(object: &K, err: &serde_json::Error) -> PlatformError
where
    K: Resource<DynamicType = ()>,
{
    PlatformError::Serialization {
        kind: K::kind(&()).to_string(),
        name: object.meta().name.clone().unwrap_or_default(),
        reason: err.to_string(),
    }
}

#[cfg(test)]
#[path = "mod_tests.rs"]
mod mod_tests;
