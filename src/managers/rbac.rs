// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! RBAC manager.
//!
//! Accumulates service accounts, roles, cluster roles and their bindings in
//! the dependency store. Several features may add rules to the same role:
//! rules are appended to whatever is already queued, then normalized so the
//! queued object does not depend on feature order.
//!
//! # Rule normalization
//!
//! - `apiGroups`, `resources`, `resourceNames`, `nonResourceURLs` and `verbs`
//!   are sorted and deduplicated
//! - rules targeting the same groups, resources, resource names and URLs are
//!   merged into one rule carrying the union of their verbs
//! - the resulting rules are sorted

use super::ResourceManagers;
use crate::component::Component;
use crate::errors::Result;
use crate::platform::{ObjectKey, ObjectKind};
use k8s_openapi::api::core::v1::ServiceAccount;
use k8s_openapi::api::rbac::v1::{
    ClusterRole, ClusterRoleBinding, PolicyRule, Role, RoleBinding, RoleRef, Subject,
};
use std::collections::{BTreeMap, BTreeSet};

const RBAC_API_GROUP: &str = "rbac.authorization.k8s.io";

/// Borrowing view of [`ResourceManagers`] for RBAC objects.
pub struct RbacManager<'a> {
    managers: &'a mut ResourceManagers,
}

impl<'a> RbacManager<'a> {
    pub(super) fn new(managers: &'a mut ResourceManagers) -> Self {
        Self { managers }
    }

    /// Queue a service account.
    ///
    /// # Errors
    ///
    /// Returns an error if the store rejects the object.
    pub fn add_service_account(&mut self, namespace: &str, name: &str) -> Result<()> {
        self.add_service_account_inner(namespace, name).map(|_| ())
    }

    /// Queue a service account on behalf of `component`.
    ///
    /// # Errors
    ///
    /// Returns an error if the store rejects the object.
    pub fn add_service_account_by_component(
        &mut self,
        namespace: &str,
        name: &str,
        component: Component,
    ) -> Result<()> {
        let key = self.add_service_account_inner(namespace, name)?;
        self.managers.track(component, key);
        Ok(())
    }

    fn add_service_account_inner(
        &mut self,
        namespace: &str,
        name: &str,
    ) -> Result<ObjectKey> {
        let sa: ServiceAccount =
            self.managers
                .store()
                .get_or_create(ObjectKind::ServiceAccount, namespace, name)?;
        self.managers
            .store_mut()
            .add_or_update(ObjectKind::ServiceAccount, &sa)
    }

    /// Add `rules` to the `Role` `role_name` and bind it to the service
    /// account `sa_name` of `namespace`.
    ///
    /// # Errors
    ///
    /// Returns an error if the store rejects either object.
    pub fn add_policy_rules(
        &mut self,
        namespace: &str,
        role_name: &str,
        sa_name: &str,
        rules: Vec<PolicyRule>,
    ) -> Result<()> {
        self.add_policy_rules_inner(namespace, role_name, sa_name, rules, None)
    }

    /// Same as [`RbacManager::add_policy_rules`], tracked for `component`.
    ///
    /// # Errors
    ///
    /// Returns an error if the store rejects either object.
    pub fn add_policy_rules_by_component(
        &mut self,
        namespace: &str,
        role_name: &str,
        sa_name: &str,
        rules: Vec<PolicyRule>,
        component: Component,
    ) -> Result<()> {
        self.add_policy_rules_inner(namespace, role_name, sa_name, rules, Some(component))
    }

    fn add_policy_rules_inner(
        &mut self,
        namespace: &str,
        role_name: &str,
        sa_name: &str,
        rules: Vec<PolicyRule>,
        component: Option<Component>,
    ) -> Result<()> {
        let mut role: Role = self
            .managers
            .store()
            .get_or_create(ObjectKind::Role, namespace, role_name)?;
        let mut merged = role.rules.take().unwrap_or_default();
        merged.extend(rules);
        role.rules = Some(normalize_rules(merged));
        let role_key = self.managers.store_mut().add_or_update(ObjectKind::Role, &role)?;

        let mut binding: RoleBinding =
            self.managers
                .store()
                .get_or_create(ObjectKind::RoleBinding, namespace, role_name)?;
        binding.role_ref = role_ref("Role", role_name);
        add_subject(&mut binding.subjects, service_account_subject(namespace, sa_name));
        let binding_key = self
            .managers
            .store_mut()
            .add_or_update(ObjectKind::RoleBinding, &binding)?;

        if let Some(component) = component {
            self.managers.track(component, role_key);
            self.managers.track(component, binding_key);
        }
        Ok(())
    }

    /// Add `rules` to the `ClusterRole` `role_name` and bind it to the
    /// service account `sa_name` of `namespace`.
    ///
    /// # Errors
    ///
    /// Returns an error if the store rejects either object.
    pub fn add_cluster_policy_rules(
        &mut self,
        namespace: &str,
        role_name: &str,
        sa_name: &str,
        rules: Vec<PolicyRule>,
    ) -> Result<()> {
        self.add_cluster_policy_rules_inner(namespace, role_name, sa_name, rules, None)
    }

    /// Same as [`RbacManager::add_cluster_policy_rules`], tracked for `component`.
    ///
    /// # Errors
    ///
    /// Returns an error if the store rejects either object.
    pub fn add_cluster_policy_rules_by_component(
        &mut self,
        namespace: &str,
        role_name: &str,
        sa_name: &str,
        rules: Vec<PolicyRule>,
        component: Component,
    ) -> Result<()> {
        self.add_cluster_policy_rules_inner(namespace, role_name, sa_name, rules, Some(component))
    }

    fn add_cluster_policy_rules_inner(
        &mut self,
        namespace: &str,
        role_name: &str,
        sa_name: &str,
        rules: Vec<PolicyRule>,
        component: Option<Component>,
    ) -> Result<()> {
        let mut role: ClusterRole =
            self.managers
                .store()
                .get_or_create(ObjectKind::ClusterRole, "", role_name)?;
        let mut merged = role.rules.take().unwrap_or_default();
        merged.extend(rules);
        role.rules = Some(normalize_rules(merged));
        let role_key = self
            .managers
            .store_mut()
            .add_or_update(ObjectKind::ClusterRole, &role)?;

        let mut binding: ClusterRoleBinding =
            self.managers
                .store()
                .get_or_create(ObjectKind::ClusterRoleBinding, "", role_name)?;
        binding.role_ref = role_ref("ClusterRole", role_name);
        add_subject(&mut binding.subjects, service_account_subject(namespace, sa_name));
        let binding_key = self
            .managers
            .store_mut()
            .add_or_update(ObjectKind::ClusterRoleBinding, &binding)?;

        if let Some(component) = component {
            self.managers.track(component, role_key);
            self.managers.track(component, binding_key);
        }
        Ok(())
    }

    /// Bind the existing `ClusterRole` `cluster_role` to the service account
    /// `sa_name` of `namespace`, tracked for `component`.
    ///
    /// # Errors
    ///
    /// Returns an error if the store rejects the binding.
    pub fn add_cluster_role_binding_by_component(
        &mut self,
        namespace: &str,
        binding_name: &str,
        sa_name: &str,
        cluster_role: &str,
        component: Component,
    ) -> Result<()> {
        let mut binding: ClusterRoleBinding =
            self.managers
                .store()
                .get_or_create(ObjectKind::ClusterRoleBinding, "", binding_name)?;
        binding.role_ref = role_ref("ClusterRole", cluster_role);
        add_subject(&mut binding.subjects, service_account_subject(namespace, sa_name));
        let key = self
            .managers
            .store_mut()
            .add_or_update(ObjectKind::ClusterRoleBinding, &binding)?;
        self.managers.track(component, key);
        Ok(())
    }

    /// Bind the existing `Role` `role_name` of `binding_namespace` to the
    /// service account `sa_name` of `sa_namespace`, tracked for `component`.
    ///
    /// # Errors
    ///
    /// Returns an error if the store rejects the binding.
    pub fn add_role_binding_by_component(
        &mut self,
        binding_namespace: &str,
        binding_name: &str,
        sa_namespace: &str,
        sa_name: &str,
        role_name: &str,
        component: Component,
    ) -> Result<()> {
        let mut binding: RoleBinding =
            self.managers
                .store()
                .get_or_create(ObjectKind::RoleBinding, binding_namespace, binding_name)?;
        binding.role_ref = role_ref("Role", role_name);
        add_subject(&mut binding.subjects, service_account_subject(sa_namespace, sa_name));
        let key = self
            .managers
            .store_mut()
            .add_or_update(ObjectKind::RoleBinding, &binding)?;
        self.managers.track(component, key);
        Ok(())
    }

    /// Drop the service accounts queued for `component`.
    pub fn delete_service_account_by_component(&mut self, component: Component) -> usize {
        self.managers
            .delete_by_component(component, &[ObjectKind::ServiceAccount])
    }

    /// Drop the roles and role bindings queued for `component`.
    pub fn delete_role_by_component(&mut self, component: Component) -> usize {
        self.managers
            .delete_by_component(component, &[ObjectKind::Role, ObjectKind::RoleBinding])
    }

    /// Drop the cluster roles and cluster role bindings queued for `component`.
    pub fn delete_cluster_role_by_component(&mut self, component: Component) -> usize {
        self.managers.delete_by_component(
            component,
            &[ObjectKind::ClusterRole, ObjectKind::ClusterRoleBinding],
        )
    }
}

fn role_ref(kind: &str, name: &str) -> RoleRef {
    RoleRef {
        api_group: RBAC_API_GROUP.to_string(),
        kind: kind.to_string(),
        name: name.to_string(),
    }
}

fn service_account_subject(namespace: &str, name: &str) -> Subject {
    Subject {
        api_group: None,
        kind: "ServiceAccount".to_string(),
        name: name.to_string(),
        namespace: Some(namespace.to_string()),
    }
}

fn add_subject(subjects: &mut Option<Vec<Subject>>, subject: Subject) {
    let subjects = subjects.get_or_insert_with(Vec::new);
    if !subjects.contains(&subject) {
        subjects.push(subject);
    }
}

fn sorted(values: Option<Vec<String>>) -> Option<Vec<String>> {
    values
        .map(|v| v.into_iter().collect::<BTreeSet<_>>().into_iter().collect::<Vec<_>>())
        .filter(|v| !v.is_empty())
}

type RuleTarget = (
    Option<Vec<String>>,
    Option<Vec<String>>,
    Option<Vec<String>>,
    Option<Vec<String>>,
);

/// Normalize a rule list as described in the module documentation.
#[must_use]
pub fn normalize_rules(rules: Vec<PolicyRule>) -> Vec<PolicyRule> {
    let mut merged: BTreeMap<RuleTarget, BTreeSet<String>> = BTreeMap::new();
    for rule in rules {
        let target = (
            sorted(rule.api_groups),
            sorted(rule.resources),
            sorted(rule.resource_names),
            sorted(rule.non_resource_urls),
        );
        merged.entry(target).or_default().extend(rule.verbs);
    }

    merged
        .into_iter()
        .map(
            |((api_groups, resources, resource_names, non_resource_urls), verbs)| PolicyRule {
                api_groups,
                resources,
                resource_names,
                non_resource_urls,
                verbs: verbs.into_iter().collect(),
            },
        )
        .collect()
}

#[cfg(test)]
#[path = "rbac_tests.rs"]
mod rbac_tests;
