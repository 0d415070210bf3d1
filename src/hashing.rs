// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Content-hash change detection.
//!
//! The desired state of a managed object is reduced to an MD5 digest of its
//! canonical JSON serialization and stored in the
//! `agent.datadoghq.com/agentspechash` annotation. A later pass compares the
//! digest of the freshly built object with the annotation on the live object
//! to decide whether an update is needed.
//!
//! Canonical serialization goes through [`serde_json::Value`], whose objects
//! are ordered maps, so the digest does not depend on field or key order.
//! The digest is only a change detector, never an identity or security
//! primitive.

use crate::constants::{
    CHECKSUM_ANNOTATION_PREFIX, CHECKSUM_ANNOTATION_SUFFIX, MD5_SPEC_HASH_ANNOTATION,
};
use md5::{Digest, Md5};
use serde::Serialize;
use std::collections::BTreeMap;

/// Compute the MD5 hex digest of the canonical serialization of `value`.
///
/// # Errors
///
/// Returns an error if `value` cannot be serialized to JSON.
pub fn content_hash<T: Serialize + ?Sized>(value: &T) -> Result<String, serde_json::Error> {
    let canonical = serde_json::to_value(value)?;
    let bytes = serde_json::to_vec(&canonical)?;
    Ok(format!("{:x}", Md5::digest(&bytes)))
}

/// Hash of a workload: its spec together with the labels it carries.
///
/// Labels are included so that a label-only change on the desired object is
/// propagated to the live one.
///
/// # Errors
///
/// Returns an error if the spec cannot be serialized to JSON.
pub fn workload_hash<T: Serialize + ?Sized>(
    spec: &T,
    labels: &BTreeMap<String, String>,
) -> Result<String, serde_json::Error> {
    content_hash(&serde_json::json!({
        "spec": spec,
        "labels": labels,
    }))
}

/// Stamp `hash` on an annotation map.
pub fn set_hash_annotation(annotations: &mut BTreeMap<String, String>, hash: &str) {
    annotations.insert(MD5_SPEC_HASH_ANNOTATION.to_string(), hash.to_string());
}

/// Read the hash annotation of an object, if present.
#[must_use]
pub fn hash_annotation(annotations: Option<&BTreeMap<String, String>>) -> Option<&str> {
    annotations
        .and_then(|a| a.get(MD5_SPEC_HASH_ANNOTATION))
        .map(String::as_str)
}

/// Returns true when the annotations carry exactly `hash`.
#[must_use]
pub fn is_same_hash(hash: &str, annotations: Option<&BTreeMap<String, String>>) -> bool {
    hash_annotation(annotations) == Some(hash)
}

/// Annotation key carrying the checksum of a feature's custom configuration.
///
/// Format: `checksum/<feature-id>-custom-config`.
#[must_use]
pub fn checksum_annotation_key(feature_id: &str) -> String {
    format!("{CHECKSUM_ANNOTATION_PREFIX}/{feature_id}-{CHECKSUM_ANNOTATION_SUFFIX}")
}

#[cfg(test)]
#[path = "hashing_tests.rs"]
mod hashing_tests;
