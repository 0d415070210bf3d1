// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Unit tests for `rbac.rs`

#[cfg(test)]
mod tests {
    use crate::component::Component;
    use crate::managers::rbac::normalize_rules;
    use crate::managers::ResourceManagers;
    use crate::platform::{from_dynamic, ObjectKind};
    use crate::test_helpers::owner;
    use k8s_openapi::api::rbac::v1::{ClusterRole, ClusterRoleBinding, PolicyRule, Role, RoleBinding};

    fn rule(groups: &[&str], resources: &[&str], verbs: &[&str]) -> PolicyRule {
        let owned = |items: &[&str]| items.iter().map(|s| (*s).to_string()).collect::<Vec<_>>();
        PolicyRule {
            api_groups: Some(owned(groups)),
            resources: Some(owned(resources)),
            verbs: owned(verbs),
            ..PolicyRule::default()
        }
    }

    #[test]
    fn test_normalize_merges_verbs_and_sorts() {
        let rules = normalize_rules(vec![
            rule(&[""], &["pods", "nodes"], &["list", "get"]),
            rule(&[""], &["nodes", "pods"], &["watch", "get"]),
            rule(&["apps"], &["deployments"], &["get"]),
        ]);

        assert_eq!(
            rules,
            vec![
                rule(&[""], &["nodes", "pods"], &["get", "list", "watch"]),
                rule(&["apps"], &["deployments"], &["get"]),
            ]
        );
    }

    #[test]
    fn test_normalize_keeps_non_resource_urls_apart() {
        let url_rule = PolicyRule {
            non_resource_urls: Some(vec!["/metrics".to_string()]),
            verbs: vec!["get".to_string()],
            ..PolicyRule::default()
        };
        let rules = normalize_rules(vec![url_rule.clone(), rule(&[""], &["nodes"], &["get"])]);
        assert_eq!(rules.len(), 2);
        assert!(rules.contains(&url_rule));
    }

    #[test]
    fn test_policy_rules_accumulate_across_calls() {
        let mut managers = ResourceManagers::new(&owner("bar", "foo")).unwrap();
        managers
            .rbac()
            .add_policy_rules("bar", "foo-cluster-agent", "foo-cluster-agent", vec![rule(&[""], &["configmaps"], &["get"])])
            .unwrap();
        managers
            .rbac()
            .add_policy_rules("bar", "foo-cluster-agent", "foo-cluster-agent", vec![rule(&[""], &["configmaps"], &["update"])])
            .unwrap();

        let role: Role = from_dynamic(
            managers
                .store()
                .get(ObjectKind::Role, "bar", "foo-cluster-agent")
                .unwrap(),
        )
        .unwrap();
        assert_eq!(
            role.rules.unwrap(),
            vec![rule(&[""], &["configmaps"], &["get", "update"])]
        );

        let binding: RoleBinding = from_dynamic(
            managers
                .store()
                .get(ObjectKind::RoleBinding, "bar", "foo-cluster-agent")
                .unwrap(),
        )
        .unwrap();
        assert_eq!(binding.role_ref.kind, "Role");
        assert_eq!(binding.subjects.unwrap().len(), 1);
    }

    #[test]
    fn test_cluster_policy_rules_bind_service_account() {
        let mut managers = ResourceManagers::new(&owner("bar", "foo")).unwrap();
        managers
            .rbac()
            .add_cluster_policy_rules("bar", "foo-agent", "foo-agent", vec![rule(&[""], &["nodes"], &["get"])])
            .unwrap();

        let role: ClusterRole = from_dynamic(
            managers
                .store()
                .get(ObjectKind::ClusterRole, "", "foo-agent")
                .unwrap(),
        )
        .unwrap();
        assert_eq!(role.rules.unwrap().len(), 1);

        let binding: ClusterRoleBinding = from_dynamic(
            managers
                .store()
                .get(ObjectKind::ClusterRoleBinding, "", "foo-agent")
                .unwrap(),
        )
        .unwrap();
        let subject = &binding.subjects.unwrap()[0];
        assert_eq!(subject.kind, "ServiceAccount");
        assert_eq!(subject.namespace.as_deref(), Some("bar"));
        assert_eq!(binding.role_ref.name, "foo-agent");
    }

    #[test]
    fn test_bindings_to_existing_roles() {
        let mut managers = ResourceManagers::new(&owner("bar", "foo")).unwrap();
        let dca = Component::ClusterAgent;
        {
            let mut rbac = managers.rbac();
            rbac.add_cluster_role_binding_by_component(
                "bar",
                "bar-foo-cluster-agent-auth-delegator",
                "foo-cluster-agent",
                "system:auth-delegator",
                dca,
            )
            .unwrap();
            rbac.add_role_binding_by_component(
                "kube-system",
                "bar-foo-cluster-agent-apiserver",
                "bar",
                "foo-cluster-agent",
                "extension-apiserver-authentication-reader",
                dca,
            )
            .unwrap();
        }

        let binding: ClusterRoleBinding = from_dynamic(
            managers
                .store()
                .get(ObjectKind::ClusterRoleBinding, "", "bar-foo-cluster-agent-auth-delegator")
                .unwrap(),
        )
        .unwrap();
        assert_eq!(binding.role_ref.name, "system:auth-delegator");
        assert_eq!(binding.subjects.unwrap()[0].namespace.as_deref(), Some("bar"));
        assert!(managers
            .store()
            .get(ObjectKind::ClusterRole, "", "system:auth-delegator")
            .is_none());

        let reader: RoleBinding = from_dynamic(
            managers
                .store()
                .get(ObjectKind::RoleBinding, "kube-system", "bar-foo-cluster-agent-apiserver")
                .unwrap(),
        )
        .unwrap();
        assert_eq!(reader.role_ref.kind, "Role");
        assert_eq!(reader.role_ref.name, "extension-apiserver-authentication-reader");

        assert_eq!(managers.rbac().delete_cluster_role_by_component(dca), 1);
        assert_eq!(managers.rbac().delete_role_by_component(dca), 1);
        assert!(managers.store().is_empty());
    }

    #[test]
    fn test_delete_by_component() {
        let mut managers = ResourceManagers::new(&owner("bar", "foo")).unwrap();
        let runner = Component::ClusterChecksRunner;
        {
            let mut rbac = managers.rbac();
            rbac.add_service_account_by_component("bar", "foo-cluster-checks-runner", runner)
                .unwrap();
            rbac.add_cluster_policy_rules_by_component(
                "bar",
                "foo-cluster-checks-runner",
                "foo-cluster-checks-runner",
                vec![rule(&[""], &["nodes"], &["get"])],
                runner,
            )
            .unwrap();
            rbac.add_service_account("bar", "foo-agent").unwrap();
        }
        assert_eq!(managers.store().len(), 4);

        assert_eq!(managers.rbac().delete_cluster_role_by_component(runner), 2);
        assert_eq!(managers.rbac().delete_service_account_by_component(runner), 1);
        assert_eq!(managers.rbac().delete_role_by_component(runner), 0);
        assert_eq!(managers.store().len(), 1);
        assert!(managers
            .store()
            .get(ObjectKind::ServiceAccount, "bar", "foo-agent")
            .is_some());
    }
}
