// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Ownership codec.
//!
//! Managed objects are tied to their `DatadogAgent` in one of two ways:
//!
//! - [`Ownership::OwnsDirectly`]: a controller owner reference, used for
//!   namespaced objects living in the owner's namespace. The platform garbage
//!   collector removes them when the owner is deleted.
//! - [`Ownership::PartOfEncoded`]: the `app.kubernetes.io/part-of` label holds
//!   the encoded `(namespace, name)` of the owner. Used for cluster-scoped
//!   objects and objects in another namespace, which cannot carry an owner
//!   reference.
//!
//! Cleanup only ever looks at the relation the object family uses.
//!
//! # Part-of encoding
//!
//! Every `-` in the namespace and in the name is doubled, then both halves are
//! joined with a single `-`:
//!
//! ```rust
//! use dd_operator::ownership::{decode_part_of, encode_part_of};
//!
//! assert_eq!(encode_part_of("f-o-o", "bar"), "f--o--o-bar");
//! assert_eq!(
//!     decode_part_of("f--o--o-bar"),
//!     ("f-o-o".to_string(), "bar".to_string())
//! );
//! ```

use crate::crd::DatadogAgent;
use crate::errors::{OperatorError, Result};
use crate::labels::K8S_PART_OF;
use crate::platform::ObjectKind;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};
use kube::{Resource, ResourceExt};
use std::collections::BTreeMap;

/// How a managed object is attributed to its owner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ownership {
    /// Controller owner reference on the object.
    OwnsDirectly,
    /// Encoded owner identity in the `app.kubernetes.io/part-of` label.
    PartOfEncoded,
}

/// Decide which ownership relation an object uses.
///
/// # Arguments
///
/// * `kind` - Kind of the managed object
/// * `object_namespace` - Namespace of the object (ignored for cluster-scoped kinds)
/// * `owner_namespace` - Namespace of the owning `DatadogAgent`
#[must_use]
pub fn ownership_for(kind: ObjectKind, object_namespace: &str, owner_namespace: &str) -> Ownership {
    if kind.is_namespaced() && object_namespace == owner_namespace {
        Ownership::OwnsDirectly
    } else {
        Ownership::PartOfEncoded
    }
}

/// Build the controller owner reference pointing at `owner`.
///
/// # Errors
///
/// Returns [`OperatorError::MissingOwnerMetadata`] if the owner has no UID,
/// which happens when it was never persisted.
pub fn owner_reference(owner: &DatadogAgent) -> Result<OwnerReference> {
    let uid = owner.uid().ok_or_else(|| OperatorError::MissingOwnerMetadata {
        field: "metadata.uid".to_string(),
    })?;

    Ok(OwnerReference {
        api_version: DatadogAgent::api_version(&()).to_string(),
        kind: DatadogAgent::kind(&()).to_string(),
        name: owner.name_any(),
        uid,
        controller: Some(true),
        block_owner_deletion: Some(true),
    })
}

/// Attach `owner_ref` as controller reference on `meta`.
///
/// An existing reference with the same UID is replaced, other non-controller
/// references are kept.
///
/// # Errors
///
/// Returns [`OperatorError::OwnerReference`] if the object is already
/// controlled by a different owner.
pub fn set_controller_reference(meta: &mut ObjectMeta, owner_ref: OwnerReference) -> Result<()> {
    let refs = meta.owner_references.get_or_insert_with(Vec::new);

    if let Some(other) = refs
        .iter()
        .find(|r| r.controller == Some(true) && r.uid != owner_ref.uid)
    {
        return Err(OperatorError::OwnerReference {
            kind: owner_ref.kind.clone(),
            name: meta.name.clone().unwrap_or_default(),
            reason: format!("already controlled by {} '{}'", other.kind, other.name),
        });
    }

    refs.retain(|r| r.uid != owner_ref.uid);
    refs.push(owner_ref);
    Ok(())
}

/// Live owner references with the desired ones laid over them by UID.
///
/// References set by other controllers or users survive an update. Returns
/// `None` when neither side carries any.
#[must_use]
pub fn merge_owner_references(
    live: Option<&Vec<OwnerReference>>,
    desired: Option<&Vec<OwnerReference>>,
) -> Option<Vec<OwnerReference>> {
    let mut owners = live.cloned().unwrap_or_default();
    for wanted in desired.into_iter().flatten() {
        owners.retain(|r| r.uid != wanted.uid);
        owners.push(wanted.clone());
    }
    (!owners.is_empty()).then_some(owners)
}

/// Returns true when `meta` carries an owner reference with `owner_uid`.
#[must_use]
pub fn is_owned_by(meta: &ObjectMeta, owner_uid: &str) -> bool {
    meta.owner_references
        .as_ref()
        .is_some_and(|refs| refs.iter().any(|r| r.uid == owner_uid))
}

/// Encode `(namespace, name)` into a single label value.
#[must_use]
pub fn encode_part_of(namespace: &str, name: &str) -> String {
    format!("{}-{}", namespace.replace('-', "--"), name.replace('-', "--"))
}

/// Decode a part-of label value into `(namespace, name)`.
///
/// The split point is the first `-` that is neither preceded nor followed by
/// another `-`. When there is none, an empty pair is returned and the object
/// must be treated as unattributable.
#[must_use]
pub fn decode_part_of(value: &str) -> (String, String) {
    let bytes = value.as_bytes();
    let split = (0..bytes.len()).find(|&i| {
        bytes[i] == b'-'
            && (i == 0 || bytes[i - 1] != b'-')
            && (i + 1 == bytes.len() || bytes[i + 1] != b'-')
    });

    match split {
        Some(i) => (
            value[..i].replace("--", "-"),
            value[i + 1..].replace("--", "-"),
        ),
        None => (String::new(), String::new()),
    }
}

/// Part-of label value of `owner`.
#[must_use]
pub fn part_of_value(owner: &DatadogAgent) -> String {
    encode_part_of(&owner.namespace().unwrap_or_default(), &owner.name_any())
}

/// Returns true when the part-of label of an object decodes to `owner`.
#[must_use]
pub fn is_part_of(labels: &BTreeMap<String, String>, owner: &DatadogAgent) -> bool {
    let Some(value) = labels.get(K8S_PART_OF) else {
        return false;
    };
    let (namespace, name) = decode_part_of(value);
    !name.is_empty()
        && namespace == owner.namespace().unwrap_or_default()
        && name == owner.name_any()
}

/// Returns true when the object is attributable to `owner` through the
/// relation its family uses.
#[must_use]
pub fn is_attributed_to(
    ownership: Ownership,
    meta: &ObjectMeta,
    owner: &DatadogAgent,
) -> bool {
    match ownership {
        Ownership::OwnsDirectly => owner
            .uid()
            .is_some_and(|uid| is_owned_by(meta, &uid)),
        Ownership::PartOfEncoded => meta
            .labels
            .as_ref()
            .is_some_and(|labels| is_part_of(labels, owner)),
    }
}

#[cfg(test)]
#[path = "ownership_tests.rs"]
mod ownership_tests;
