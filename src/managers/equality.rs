// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Per-kind equality between a live object and the desired one.
//!
//! - `Role` / `ClusterRole`: rule lists
//! - `RoleBinding` / `ClusterRoleBinding`: `roleRef` and subjects
//! - every other kind: the content-hash annotation
//!
//! For every kind, the labels, annotations and owner references the operator
//! sets must also be present on the live object, so metadata drift on RBAC
//! objects is corrected like on any other object.

use crate::hashing::hash_annotation;
use crate::platform::ObjectKind;
use k8s_openapi::api::rbac::v1::{PolicyRule, RoleRef, Subject};
use kube::api::DynamicObject;
use serde::de::DeserializeOwned;
use std::collections::BTreeMap;

/// Returns true when `live` already matches `desired` and no update is needed.
#[must_use]
pub fn is_equal(kind: ObjectKind, live: &DynamicObject, desired: &DynamicObject) -> bool {
    if !metadata_is_subset(live, desired) {
        return false;
    }

    match kind {
        ObjectKind::Role | ObjectKind::ClusterRole => {
            field::<Vec<PolicyRule>>(live, "rules") == field::<Vec<PolicyRule>>(desired, "rules")
        }
        ObjectKind::RoleBinding | ObjectKind::ClusterRoleBinding => {
            field::<RoleRef>(live, "roleRef") == field::<RoleRef>(desired, "roleRef")
                && field::<Vec<Subject>>(live, "subjects")
                    == field::<Vec<Subject>>(desired, "subjects")
        }
        _ => {
            let desired_hash = hash_annotation(desired.metadata.annotations.as_ref());
            desired_hash.is_some()
                && hash_annotation(live.metadata.annotations.as_ref()) == desired_hash
        }
    }
}

/// Labels, annotations and owner references of `desired` are all on `live`.
fn metadata_is_subset(live: &DynamicObject, desired: &DynamicObject) -> bool {
    let empty = BTreeMap::new();
    let is_subset = |live: Option<&BTreeMap<String, String>>,
                     desired: Option<&BTreeMap<String, String>>| {
        let live = live.unwrap_or(&empty);
        desired
            .unwrap_or(&empty)
            .iter()
            .all(|(k, v)| live.get(k) == Some(v))
    };

    let owners_present = desired
        .metadata
        .owner_references
        .as_deref()
        .unwrap_or_default()
        .iter()
        .all(|wanted| {
            live.metadata
                .owner_references
                .as_deref()
                .unwrap_or_default()
                .iter()
                .any(|r| r.uid == wanted.uid)
        });

    is_subset(
        live.metadata.labels.as_ref(),
        desired.metadata.labels.as_ref(),
    ) && is_subset(
        live.metadata.annotations.as_ref(),
        desired.metadata.annotations.as_ref(),
    ) && owners_present
}

/// Decode one top-level field, treating a missing or malformed one as default.
fn field<T: DeserializeOwned + Default>(object: &DynamicObject, name: &str) -> T {
    object
        .data
        .get(name)
        .filter(|v| !v.is_null())
        .and_then(|v| serde_json::from_value(v.clone()).ok())
        .unwrap_or_default()
}

#[cfg(test)]
#[path = "equality_tests.rs"]
mod equality_tests;
