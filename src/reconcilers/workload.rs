// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Create, update and delete protocol for one component workload.
//!
//! A pass hands [`reconcile_workload`] the freshly built desired object. The
//! workload spec and labels are reduced to a content hash stored in the
//! `agent.datadoghq.com/agentspechash` annotation, then:
//!
//! | Live object                     | Action                                     |
//! |---------------------------------|--------------------------------------------|
//! | missing                         | create                                     |
//! | different pod selector          | delete, the next pass creates it again     |
//! | hash annotation matches         | nothing                                    |
//! | hash annotation differs         | overwrite spec, merge labels/annotations   |
//!
//! Pod selectors are immutable on the platform side, which is why a selector
//! change goes through a delete.

use crate::component::Component;
use crate::constants::OPERATOR_KEY_MARKER;
use crate::crd::ComponentStatus;
use crate::errors::{OperatorError, PlatformError, Result};
use crate::hashing::{hash_annotation, is_same_hash, set_hash_annotation, workload_hash};
use crate::metrics::{record_resource_created, record_resource_deleted, record_resource_updated};
use crate::ownership::merge_owner_references;
use crate::platform::{ObjectKey, ObjectKind, PlatformClient};
use crate::status_reasons::{
    STATE_FAILED, STATE_PROGRESSING, STATE_RUNNING, STATE_UPDATING, SUMMARY_CREATE_SUCCEEDED,
    SUMMARY_DELETED_FOR_RECREATE, SUMMARY_UPDATE_SUCCEEDED, SUMMARY_UP_TO_DATE,
};
use chrono::Utc;
use kube::api::DynamicObject;
use serde_json::Value;
use std::collections::BTreeMap;
use tracing::{debug, info};

/// What [`reconcile_workload`] did to the live object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkloadAction {
    Created,
    Updated,
    Unchanged,
    DeletedForRecreate,
}

impl WorkloadAction {
    /// Short summary recorded in the component condition.
    #[must_use]
    pub fn summary(self) -> &'static str {
        match self {
            Self::Created => SUMMARY_CREATE_SUCCEEDED,
            Self::Updated => SUMMARY_UPDATE_SUCCEEDED,
            Self::Unchanged => SUMMARY_UP_TO_DATE,
            Self::DeletedForRecreate => SUMMARY_DELETED_FOR_RECREATE,
        }
    }

    /// Returns true when the platform was written to.
    #[must_use]
    pub fn mutated(self) -> bool {
        !matches!(self, Self::Unchanged)
    }
}

/// Desired workload of one component for this pass.
#[derive(Debug, Clone)]
pub struct DesiredWorkload {
    pub kind: ObjectKind,
    /// Complete object; its `data.spec` is the workload spec.
    pub object: DynamicObject,
    /// Keep `spec.replicas` of the live object on update.
    pub keep_live_replicas: bool,
}

/// Result of [`reconcile_workload`].
#[derive(Debug, Clone)]
pub struct WorkloadOutcome {
    pub action: WorkloadAction,
    /// Object as stored after the action; `None` once deleted.
    pub live: Option<DynamicObject>,
    pub hash: String,
}

/// Converge the live workload towards `desired`.
///
/// # Errors
///
/// Returns an error if the desired spec cannot be hashed or a platform call
/// fails.
pub async fn reconcile_workload(
    platform: &dyn PlatformClient,
    desired: DesiredWorkload,
) -> Result<WorkloadOutcome> {
    let DesiredWorkload {
        kind,
        mut object,
        keep_live_replicas,
    } = desired;
    let key = ObjectKey::of(kind, &object);

    let labels = object.metadata.labels.clone().unwrap_or_default();
    let hash = workload_hash(&object.data["spec"], &labels).map_err(|e| PlatformError::Serialization {
        kind: kind.to_string(),
        name: key.to_string(),
        reason: e.to_string(),
    })?;
    set_hash_annotation(
        object.metadata.annotations.get_or_insert_with(BTreeMap::new),
        &hash,
    );

    let Some(live) = platform.get(&key).await? else {
        let created = platform.create(kind, &object).await?;
        info!(kind = %kind, workload = %key, hash = %hash, "Created workload");
        record_resource_created(kind.kind());
        return Ok(WorkloadOutcome {
            action: WorkloadAction::Created,
            live: Some(created),
            hash,
        });
    };

    if live.data["spec"]["selector"] != object.data["spec"]["selector"] {
        info!(kind = %kind, workload = %key, "Pod selector changed, deleting workload to recreate it");
        delete_workload(platform, &key).await?;
        return Ok(WorkloadOutcome {
            action: WorkloadAction::DeletedForRecreate,
            live: None,
            hash,
        });
    }

    if is_same_hash(&hash, live.metadata.annotations.as_ref()) {
        debug!(kind = %kind, workload = %key, "Workload up to date");
        return Ok(WorkloadOutcome {
            action: WorkloadAction::Unchanged,
            live: Some(live),
            hash,
        });
    }

    let mut updated = live.clone();
    let mut spec = object.data["spec"].clone();
    let live_replicas = &live.data["spec"]["replicas"];
    if keep_live_replicas && !live_replicas.is_null() {
        if let Some(fields) = spec.as_object_mut() {
            fields.insert("replicas".to_string(), live_replicas.clone());
        }
    }
    updated.data["spec"] = spec;
    updated.metadata.labels = Some(merge_operator_keys(
        object.metadata.labels.as_ref(),
        live.metadata.labels.as_ref(),
    ));
    updated.metadata.annotations = Some(merge_operator_keys(
        object.metadata.annotations.as_ref(),
        live.metadata.annotations.as_ref(),
    ));
    updated.metadata.owner_references = merge_owner_references(
        live.metadata.owner_references.as_ref(),
        object.metadata.owner_references.as_ref(),
    );

    let stored = platform.update(kind, &updated).await?;
    info!(
        kind = %kind,
        workload = %key,
        previous_hash = hash_annotation(live.metadata.annotations.as_ref()).unwrap_or_default(),
        hash = %hash,
        "Updated workload"
    );
    record_resource_updated(kind.kind());
    Ok(WorkloadOutcome {
        action: WorkloadAction::Updated,
        live: Some(stored),
        hash,
    })
}

/// Delete a workload. Returns false when it was already gone.
///
/// # Errors
///
/// Returns any platform error other than not found.
pub async fn delete_workload(platform: &dyn PlatformClient, key: &ObjectKey) -> Result<bool> {
    match platform.delete(key).await {
        Ok(()) => {
            info!(kind = %key.kind, workload = %key, "Deleted workload");
            record_resource_deleted(key.kind.kind());
            Ok(true)
        }
        Err(e) if e.is_not_found() => Ok(false),
        Err(e) => Err(e.into()),
    }
}

/// Refuse to rename a workload that status says was already created.
///
/// # Errors
///
/// Returns [`OperatorError::ImmutableRename`] when the recorded name differs
/// from `desired`.
pub fn check_rename(component: Component, status: Option<&ComponentStatus>, desired: &str) -> Result<()> {
    match status.and_then(|s| s.workload_name.as_deref()) {
        Some(current) if !current.is_empty() && current != desired => Err(OperatorError::ImmutableRename {
            component: component.to_string(),
            current: current.to_string(),
            desired: desired.to_string(),
        }),
        _ => Ok(()),
    }
}

/// Desired map plus the live entries whose key contains `datadoghq.com`.
#[must_use]
pub fn merge_operator_keys(
    desired: Option<&BTreeMap<String, String>>,
    live: Option<&BTreeMap<String, String>>,
) -> BTreeMap<String, String> {
    let mut merged = desired.cloned().unwrap_or_default();
    for (key, value) in live.into_iter().flatten() {
        if key.contains(OPERATOR_KEY_MARKER) && !merged.contains_key(key) {
            merged.insert(key.clone(), value.clone());
        }
    }
    merged
}

// ============================================================================
// Component status
// ============================================================================

fn count(status: &Value, field: &str) -> i32 {
    status[field]
        .as_i64()
        .and_then(|v| i32::try_from(v).ok())
        .unwrap_or(0)
}

/// Rollout counts of a live workload: desired, current, ready, available, up to date.
fn rollout_counts(kind: ObjectKind, live: &DynamicObject) -> [i32; 5] {
    let status = &live.data["status"];
    match kind {
        ObjectKind::DaemonSet => [
            count(status, "desiredNumberScheduled"),
            count(status, "currentNumberScheduled"),
            count(status, "numberReady"),
            count(status, "numberAvailable"),
            count(status, "updatedNumberScheduled"),
        ],
        ObjectKind::ExtendedDaemonSet => [
            count(status, "desired"),
            count(status, "current"),
            count(status, "ready"),
            count(status, "available"),
            count(status, "upToDate"),
        ],
        _ => [
            count(&live.data["spec"], "replicas"),
            count(status, "replicas"),
            count(status, "readyReplicas"),
            count(status, "availableReplicas"),
            count(status, "updatedReplicas"),
        ],
    }
}

fn replica_failure(live: &DynamicObject) -> bool {
    live.data["status"]["conditions"]
        .as_array()
        .into_iter()
        .flatten()
        .any(|c| c["type"] == "ReplicaFailure" && c["status"] == "True")
}

fn rollout_state(kind: ObjectKind, live: &DynamicObject, counts: [i32; 5]) -> &'static str {
    let [desired, current, ready, _, up_to_date] = counts;
    if kind == ObjectKind::Deployment {
        if replica_failure(live) {
            STATE_FAILED
        } else if up_to_date != current {
            STATE_UPDATING
        } else if ready == 0 {
            STATE_PROGRESSING
        } else {
            STATE_RUNNING
        }
    } else if up_to_date != desired {
        STATE_UPDATING
    } else if ready == 0 && desired != 0 {
        STATE_PROGRESSING
    } else {
        STATE_RUNNING
    }
}

/// Component status after a workload action.
///
/// `lastUpdate` only moves when the action wrote to the platform.
#[must_use]
pub fn component_status(
    kind: ObjectKind,
    name: &str,
    outcome: &WorkloadOutcome,
    previous: Option<&ComponentStatus>,
) -> ComponentStatus {
    let last_update = if outcome.action.mutated() {
        Some(Utc::now().to_rfc3339())
    } else {
        previous.and_then(|p| p.last_update.clone())
    };
    let generated_token = previous.and_then(|p| p.generated_token.clone());

    let Some(live) = &outcome.live else {
        return ComponentStatus {
            state: STATE_PROGRESSING.to_string(),
            status: outcome.action.summary().to_string(),
            workload_name: Some(name.to_string()),
            workload_kind: Some(kind.to_string()),
            last_update,
            generated_token,
            ..ComponentStatus::default()
        };
    };

    let counts = rollout_counts(kind, live);
    let [desired, current, ready, available, up_to_date] = counts;
    let state = rollout_state(kind, live, counts);
    ComponentStatus {
        desired,
        current,
        ready,
        available,
        up_to_date,
        state: state.to_string(),
        status: format!("{state} ({desired}/{ready}/{up_to_date})"),
        current_hash: hash_annotation(live.metadata.annotations.as_ref()).map(str::to_string),
        workload_name: Some(name.to_string()),
        workload_kind: Some(kind.to_string()),
        last_update,
        generated_token,
    }
}

#[cfg(test)]
#[path = "workload_tests.rs"]
mod workload_tests;
