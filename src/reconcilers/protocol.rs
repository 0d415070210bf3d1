// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Reconciliation protocol shared by the three component reconcilers.
//!
//! A component reconciler only describes its component: workload kind, base
//! pod template, which feature hook feeds it, and how the workload spec is
//! laid out. [`reconcile_component`] drives the rest of the pass:
//!
//! 1. decide whether the component exists at all (requirements, overrides)
//! 2. refuse renames of an already created workload
//! 3. build the pod template from the base template, every feature and the
//!    override block
//! 4. queue component dependencies (disruption budgets)
//! 5. delete a workload of a retired kind and come back later, or
//! 6. converge the workload through [`reconcile_workload`] and record status
//!
//! A component that is not required is removed: workload deleted, queued
//! dependencies dropped so the store cleanup deletes them, status cleared.

use super::overrides::{apply_to_template, image_reference, image_tag};
use super::status::DatadogAgentStatusUpdater;
use super::workload::{
    check_rename, component_status, delete_workload, reconcile_workload, DesiredWorkload,
    WorkloadAction, WorkloadOutcome,
};
use super::Requeue;
use crate::component::{Component, ComponentNames};
use crate::constants::{KIND_DATADOG_AGENT, MUTATION_REQUEUE_SECS, STRATEGY_SWAP_REQUEUE_SECS};
use crate::crd::DatadogAgent;
use crate::errors::{PlatformError, Result};
use crate::feature::{Feature, RequiredComponent, RequiredComponents};
use crate::labels::{default_labels, selector_labels};
use crate::managers::ResourceManagers;
use crate::metrics::record_reconciliation_requeue;
use crate::ownership::{owner_reference, part_of_value, set_controller_reference};
use crate::platform::{ObjectKey, ObjectKind, PlatformClient};
use crate::podtemplate::{PodTemplateChanges, PodTemplateManagers};
use crate::status_reasons::{REASON_COMPONENT_FAILED, REASON_COMPONENT_SUCCEEDED, STATUS_FALSE, STATUS_TRUE};
use k8s_openapi::api::apps::v1::DeploymentSpec;
use k8s_openapi::api::core::v1::{EnvVar, EnvVarSource, ObjectFieldSelector, PodTemplateSpec};
use k8s_openapi::api::policy::v1::{PodDisruptionBudget, PodDisruptionBudgetSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::api::{DynamicObject, ObjectMeta};
use kube::ResourceExt;
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::iter;
use tracing::{debug, info};

/// Inputs shared by every component of one pass.
pub struct ComponentContext<'a> {
    pub platform: &'a dyn PlatformClient,
    pub owner: &'a DatadogAgent,
    /// Configured features, in application order.
    pub features: &'a [Box<dyn Feature>],
    /// Union of the feature requirements, overrides included.
    pub required: &'a RequiredComponents,
}

/// Description of one component, consumed by [`reconcile_component`].
pub trait ComponentReconciler: Send + Sync {
    fn component(&self) -> Component;

    /// Kind of the workload running the component.
    fn workload_kind(&self) -> ObjectKind;

    /// Kinds the workload may have been created as before a strategy change.
    fn retired_kinds(&self) -> Vec<ObjectKind> {
        Vec::new()
    }

    /// Returns true when the component must be removed whatever its requirements.
    fn force_delete(&self, _owner: &DatadogAgent, _required: &RequiredComponents) -> bool {
        false
    }

    /// Base pod template, before any feature ran.
    fn pod_template(
        &self,
        owner: &DatadogAgent,
        required: &RequiredComponent,
        names: &ComponentNames,
        image: &str,
    ) -> PodTemplateSpec;

    /// Instructions of `feature` for this component.
    ///
    /// # Errors
    ///
    /// Returns the feature error.
    fn manage_feature(&self, feature: &dyn Feature, required: &RequiredComponent) -> Result<PodTemplateChanges>;

    /// Labels added to the workload metadata on top of the default set.
    fn workload_labels(&self) -> BTreeMap<String, String> {
        BTreeMap::new()
    }

    /// Replica count used when no override sets one.
    fn default_replicas(&self) -> Option<i32> {
        None
    }

    /// Workload `spec` for the final pod template.
    ///
    /// # Errors
    ///
    /// Returns an error if the spec cannot be serialized.
    fn workload_spec(
        &self,
        template: PodTemplateSpec,
        selector: BTreeMap<String, String>,
        replicas: Option<i32>,
    ) -> Result<Value>;

    /// Queue objects the component needs besides what features requested.
    ///
    /// # Errors
    ///
    /// Returns an error if an object cannot be queued.
    fn manage_dependencies(
        &self,
        _owner: &DatadogAgent,
        _names: &ComponentNames,
        _managers: &mut ResourceManagers,
    ) -> Result<()> {
        Ok(())
    }
}

/// Run one pass of the component protocol.
///
/// On failure the component condition is set to `False` with the error
/// message before the error is returned.
///
/// # Errors
///
/// Returns feature, rename and platform errors.
pub async fn reconcile_component(
    reconciler: &dyn ComponentReconciler,
    ctx: &ComponentContext<'_>,
    managers: &mut ResourceManagers,
    status: &mut DatadogAgentStatusUpdater,
) -> Result<Requeue> {
    let component = reconciler.component();
    let result = converge(reconciler, ctx, managers, status).await;
    if let Err(e) = &result {
        status.set_condition(
            component.condition_type(),
            STATUS_FALSE,
            REASON_COMPONENT_FAILED,
            &e.to_string(),
        );
    }
    result
}

async fn converge(
    reconciler: &dyn ComponentReconciler,
    ctx: &ComponentContext<'_>,
    managers: &mut ResourceManagers,
    status: &mut DatadogAgentStatusUpdater,
) -> Result<Requeue> {
    let component = reconciler.component();
    let owner = ctx.owner;
    let spec = &owner.spec;
    let owner_name = owner.name_any();
    let namespace = owner.namespace().unwrap_or_default();
    let names = component.names(&owner_name, spec);
    let required = ctx.required.get(component);

    if reconciler.force_delete(owner, ctx.required) {
        debug!(component = %component, "Component cannot run without the cluster agent");
        return cleanup(reconciler, ctx, &names, managers, status).await;
    }
    if component.disabled_by_override(spec) {
        if required.is_enabled() {
            status.record_override_conflict(component);
        }
        debug!(component = %component, "Component disabled by override");
        return cleanup(reconciler, ctx, &names, managers, status).await;
    }
    if !required.is_enabled() {
        return cleanup(reconciler, ctx, &names, managers, status).await;
    }

    check_rename(component, status.component(component), &names.workload)?;

    let template = build_template(reconciler, ctx, required, &names)?;
    reconciler.manage_dependencies(owner, &names, managers)?;

    let kind = reconciler.workload_kind();
    for retired in reconciler.retired_kinds() {
        let key = ObjectKey::new(retired, &namespace, &names.workload);
        if ctx.platform.get(&key).await?.is_none() {
            continue;
        }
        info!(
            component = %component,
            from = %retired,
            to = %kind,
            workload = %key,
            "Workload kind changed, deleting the previous workload first"
        );
        delete_workload(ctx.platform, &key).await?;
        let outcome = WorkloadOutcome {
            action: WorkloadAction::DeletedForRecreate,
            live: None,
            hash: String::new(),
        };
        record_status(status, component, kind, &names.workload, &outcome);
        record_reconciliation_requeue(KIND_DATADOG_AGENT, "strategy_swap");
        return Ok(Requeue::after_secs(STRATEGY_SWAP_REQUEUE_SECS));
    }

    let replicas_override = component.override_of(spec).and_then(|o| o.replicas);
    let selector = selector_labels(&owner_name, component.suffix());
    let workload_spec = reconciler.workload_spec(
        template,
        selector,
        replicas_override.or_else(|| reconciler.default_replicas()),
    )?;

    let mut labels = default_labels(
        &owner_name,
        &part_of_value(owner),
        component.suffix(),
        &image_tag(component, spec),
    );
    labels.extend(reconciler.workload_labels());

    let mut object = DynamicObject::new(&names.workload, &kind.api_resource()).within(&namespace);
    object.metadata.labels = Some(labels);
    set_controller_reference(&mut object.metadata, owner_reference(owner)?)?;
    object.data = json!({ "spec": workload_spec });

    let outcome = reconcile_workload(
        ctx.platform,
        DesiredWorkload {
            kind,
            object,
            keep_live_replicas: kind == ObjectKind::Deployment && replicas_override.is_none(),
        },
    )
    .await?;
    record_status(status, component, kind, &names.workload, &outcome);

    if outcome.action.mutated() {
        Ok(Requeue::after_secs(MUTATION_REQUEUE_SECS))
    } else {
        Ok(Requeue::none())
    }
}

/// Base template, then features, then the override block.
fn build_template(
    reconciler: &dyn ComponentReconciler,
    ctx: &ComponentContext<'_>,
    required: &RequiredComponent,
    names: &ComponentNames,
) -> Result<PodTemplateSpec> {
    let component = reconciler.component();
    let owner = ctx.owner;
    let spec = &owner.spec;
    let owner_name = owner.name_any();
    let selector = selector_labels(&owner_name, component.suffix());

    let mut base = reconciler.pod_template(owner, required, names, &image_reference(component, spec));
    base.metadata
        .get_or_insert_with(ObjectMeta::default)
        .labels
        .get_or_insert_with(BTreeMap::new)
        .extend(default_labels(
            &owner_name,
            &part_of_value(owner),
            component.suffix(),
            &image_tag(component, spec),
        ));

    let mut pod = PodTemplateManagers::new(base);
    for feature in ctx.features {
        pod.apply(reconciler.manage_feature(feature.as_ref(), required)?)?;
    }

    let mut template = pod.into_template();
    if let Some(over) = component.override_of(spec) {
        apply_to_template(&mut template, over);
    }
    template
        .metadata
        .get_or_insert_with(ObjectMeta::default)
        .labels
        .get_or_insert_with(BTreeMap::new)
        .extend(selector);
    Ok(template)
}

fn record_status(
    status: &mut DatadogAgentStatusUpdater,
    component: Component,
    kind: ObjectKind,
    name: &str,
    outcome: &WorkloadOutcome,
) {
    let previous = status.component(component).cloned();
    status.set_component(
        component,
        Some(component_status(kind, name, outcome, previous.as_ref())),
    );
    status.set_condition(
        component.condition_type(),
        STATUS_TRUE,
        REASON_COMPONENT_SUCCEEDED,
        outcome.action.summary(),
    );
}

/// Remove every trace of a component that should not run.
async fn cleanup(
    reconciler: &dyn ComponentReconciler,
    ctx: &ComponentContext<'_>,
    names: &ComponentNames,
    managers: &mut ResourceManagers,
    status: &mut DatadogAgentStatusUpdater,
) -> Result<Requeue> {
    let component = reconciler.component();
    let namespace = ctx.owner.namespace().unwrap_or_default();

    let mut workload_names = vec![names.workload.clone()];
    if let Some(recorded) = status
        .component(component)
        .and_then(|s| s.workload_name.clone())
        .filter(|n| !n.is_empty() && *n != names.workload)
    {
        workload_names.push(recorded);
    }

    let mut deleted = false;
    for kind in iter::once(reconciler.workload_kind()).chain(reconciler.retired_kinds()) {
        for name in &workload_names {
            deleted |= delete_workload(ctx.platform, &ObjectKey::new(kind, &namespace, name)).await?;
        }
    }
    let dropped = managers.delete_component(component);
    if deleted || dropped > 0 {
        info!(
            component = %component,
            namespace = %namespace,
            dependencies = dropped,
            "Removed component"
        );
    }

    status.set_component(component, None);
    status.remove_condition(component.condition_type());
    Ok(Requeue::none())
}

// ============================================================================
// Helpers shared by the component reconcilers
// ============================================================================

/// Serialize a workload spec.
///
/// # Errors
///
/// Returns [`PlatformError::Serialization`] if serialization fails.
pub fn spec_value<T: Serialize>(kind: ObjectKind, spec: &T) -> Result<Value> {
    serde_json::to_value(spec).map_err(|e| {
        PlatformError::Serialization {
            kind: kind.to_string(),
            name: "spec".to_string(),
            reason: e.to_string(),
        }
        .into()
    })
}

/// `spec` of a `Deployment` running `template`.
///
/// # Errors
///
/// Returns an error if the spec cannot be serialized.
pub fn deployment_spec(
    template: PodTemplateSpec,
    selector: BTreeMap<String, String>,
    replicas: Option<i32>,
) -> Result<Value> {
    let spec = DeploymentSpec {
        replicas,
        selector: LabelSelector {
            match_labels: Some(selector),
            ..LabelSelector::default()
        },
        template,
        ..DeploymentSpec::default()
    };
    spec_value(ObjectKind::Deployment, &spec)
}

/// Environment variable read from a pod field, e.g. `status.hostIP`.
#[must_use]
pub fn field_env(name: &str, field_path: &str) -> EnvVar {
    EnvVar {
        name: name.to_string(),
        value: None,
        value_from: Some(EnvVarSource {
            field_ref: Some(ObjectFieldSelector {
                api_version: None,
                field_path: field_path.to_string(),
            }),
            ..EnvVarSource::default()
        }),
    }
}

/// Disruption budget bound to the component pods.
#[derive(Debug, Clone, Copy)]
pub enum DisruptionBudget {
    MinAvailable(i32),
    MaxUnavailable(i32),
}

/// Queue the disruption budget of `component`, tracked so it goes away with
/// the component.
///
/// # Errors
///
/// Returns an error if the budget cannot be queued.
pub fn queue_disruption_budget(
    managers: &mut ResourceManagers,
    component: Component,
    owner: &DatadogAgent,
    names: &ComponentNames,
    budget: DisruptionBudget,
) -> Result<()> {
    let (min_available, max_unavailable) = match budget {
        DisruptionBudget::MinAvailable(n) => (Some(IntOrString::Int(n)), None),
        DisruptionBudget::MaxUnavailable(n) => (None, Some(IntOrString::Int(n))),
    };
    let pdb = PodDisruptionBudget {
        metadata: ObjectMeta {
            name: Some(names.pdb.clone()),
            namespace: owner.namespace(),
            ..ObjectMeta::default()
        },
        spec: Some(PodDisruptionBudgetSpec {
            min_available,
            max_unavailable,
            selector: Some(LabelSelector {
                match_labels: Some(selector_labels(&owner.name_any(), component.suffix())),
                ..LabelSelector::default()
            }),
            ..PodDisruptionBudgetSpec::default()
        }),
        ..PodDisruptionBudget::default()
    };
    let key = managers
        .store_mut()
        .add_or_update(ObjectKind::PodDisruptionBudget, &pdb)?;
    managers.track(component, key);
    Ok(())
}
