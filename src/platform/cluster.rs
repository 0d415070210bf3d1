// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! [`PlatformClient`] backed by the Kubernetes API server.

use super::{ObjectKey, ObjectKind, PlatformClient};
use crate::constants::{KIND_DATADOG_AGENT, OPERATOR_NAME};
use crate::crd::{DatadogAgent, DatadogAgentStatus};
use crate::errors::PlatformError;
use async_trait::async_trait;
use kube::api::{DeleteParams, DynamicObject, ListParams, Patch, PatchParams, PostParams};
use kube::client::Client;
use kube::{Api, ResourceExt};
use serde_json::json;
use std::collections::BTreeMap;
use tracing::debug;

/// Write operation an API error happened on; decides how HTTP 409 is read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Verb {
    Read,
    Create,
    Update,
    Delete,
}

fn write_params() -> PostParams {
    PostParams {
        field_manager: Some(OPERATOR_NAME.to_string()),
        ..PostParams::default()
    }
}

/// Platform adapter talking to a live cluster.
#[derive(Clone)]
pub struct KubePlatform {
    client: Client,
}

impl KubePlatform {
    #[must_use]
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn api(&self, kind: ObjectKind, namespace: Option<&str>) -> Api<DynamicObject> {
        let resource = kind.api_resource();
        match namespace {
            Some(ns) if kind.is_namespaced() => {
                Api::namespaced_with(self.client.clone(), ns, &resource)
            }
            _ => Api::all_with(self.client.clone(), &resource),
        }
    }

    fn api_for_key(&self, key: &ObjectKey) -> Api<DynamicObject> {
        self.api(key.kind, Some(key.namespace.as_str()))
    }
}

#[async_trait]
impl PlatformClient for KubePlatform {
    async fn get(&self, key: &ObjectKey) -> Result<Option<DynamicObject>, PlatformError> {
        self.api_for_key(key)
            .get_opt(&key.name)
            .await
            .map_err(|e| map_kube_error(e, key.kind.kind(), &key.to_string(), Verb::Read))
    }

    async fn create(
        &self,
        kind: ObjectKind,
        object: &DynamicObject,
    ) -> Result<DynamicObject, PlatformError> {
        let key = ObjectKey::of(kind, object);
        debug!(kind = %kind, object = %key, "Creating object");
        self.api_for_key(&key)
            .create(&write_params(), object)
            .await
            .map_err(|e| map_kube_error(e, kind.kind(), &key.to_string(), Verb::Create))
    }

    async fn update(
        &self,
        kind: ObjectKind,
        object: &DynamicObject,
    ) -> Result<DynamicObject, PlatformError> {
        let key = ObjectKey::of(kind, object);
        debug!(kind = %kind, object = %key, "Replacing object");
        self.api_for_key(&key)
            .replace(&key.name, &write_params(), object)
            .await
            .map_err(|e| map_kube_error(e, kind.kind(), &key.to_string(), Verb::Update))
    }

    async fn delete(&self, key: &ObjectKey) -> Result<(), PlatformError> {
        debug!(kind = %key.kind, object = %key, "Deleting object");
        self.api_for_key(key)
            .delete(&key.name, &DeleteParams::background())
            .await
            .map(|_| ())
            .map_err(|e| map_kube_error(e, key.kind.kind(), &key.to_string(), Verb::Delete))
    }

    async fn list(
        &self,
        kind: ObjectKind,
        namespace: Option<&str>,
        labels: &BTreeMap<String, String>,
    ) -> Result<Vec<DynamicObject>, PlatformError> {
        let params = ListParams::default().labels(&label_selector(labels));
        let list = self
            .api(kind, namespace)
            .list(&params)
            .await
            .map_err(|e| map_kube_error(e, kind.kind(), namespace.unwrap_or("*"), Verb::Read))?;
        Ok(list.items)
    }

    async fn patch_owner_status(
        &self,
        owner: &DatadogAgent,
        status: &DatadogAgentStatus,
    ) -> Result<(), PlatformError> {
        let namespace = owner.namespace().unwrap_or_default();
        let name = owner.name_any();
        let api: Api<DatadogAgent> = Api::namespaced(self.client.clone(), &namespace);

        let mut patch = json!({ "status": status });
        // resourceVersion turns the merge patch into a conditional write
        if let Some(version) = owner.resource_version() {
            patch["metadata"] = json!({ "resourceVersion": version });
        }

        let params = PatchParams {
            field_manager: Some(OPERATOR_NAME.to_string()),
            ..PatchParams::default()
        };
        api.patch_status(&name, &params, &Patch::Merge(&patch))
            .await
            .map(|_| ())
            .map_err(|e| {
                map_kube_error(
                    e,
                    KIND_DATADOG_AGENT,
                    &format!("{namespace}/{name}"),
                    Verb::Update,
                )
            })
    }
}

/// Render a label map as an equality-based selector (`k1=v1,k2=v2`).
#[must_use]
pub fn label_selector(labels: &BTreeMap<String, String>) -> String {
    labels
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join(",")
}

/// Map a `kube` client error onto the platform error taxonomy.
///
/// HTTP 404 is always `NotFound`. HTTP 409 means the name is taken on
/// create, and a stale `resourceVersion` on every other verb.
pub(crate) fn map_kube_error(err: kube::Error, kind: &str, name: &str, verb: Verb) -> PlatformError {
    let kind = kind.to_string();
    let name = name.to_string();
    match err {
        kube::Error::Api(api_err) => match (api_err.code, verb) {
            (404, _) => PlatformError::NotFound { kind, name },
            (409, Verb::Create) => PlatformError::AlreadyExists { kind, name },
            (409, _) => PlatformError::Conflict { kind, name },
            (code, _) => PlatformError::Api {
                kind,
                name,
                code,
                message: api_err.message,
            },
        },
        kube::Error::SerdeError(e) => PlatformError::Serialization {
            kind,
            name,
            reason: e.to_string(),
        },
        other => PlatformError::Api {
            kind,
            name,
            code: 503,
            message: other.to_string(),
        },
    }
}

#[cfg(test)]
#[path = "cluster_tests.rs"]
mod cluster_tests;
