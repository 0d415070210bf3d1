// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Unit tests for `crd.rs`

#[cfg(test)]
mod tests {
    use crate::crd::{crd_yaml, DatadogAgent, DatadogAgentSpec, DatadogAgentStatus};
    use kube::Resource;

    const EXAMPLE: &str = r#"
apiVersion: datadoghq.com/v2alpha1
kind: DatadogAgent
metadata:
  name: foo
  namespace: bar
spec:
  global:
    clusterName: prod-eu
    credentials:
      apiSecret:
        secretName: datadog-keys
        keyName: api-key
  features:
    clusterChecks:
      enabled: true
      useClusterChecksRunners: true
    kubeStateMetricsCore:
      enabled: true
      conf:
        configData: "init_config:"
  override:
    clusterAgent:
      replicas: 2
      env:
        - name: DD_LOG_LEVEL
          value: debug
"#;

    #[test]
    fn test_deserialize_example() {
        let dda: DatadogAgent = serde_yaml::from_str(EXAMPLE).unwrap();

        let global = dda.spec.global.as_ref().unwrap();
        assert_eq!(global.cluster_name.as_deref(), Some("prod-eu"));
        let secret = global
            .credentials
            .as_ref()
            .and_then(|c| c.api_secret.as_ref())
            .unwrap();
        assert_eq!(secret.secret_name, "datadog-keys");
        assert_eq!(secret.key_name, "api-key");

        let features = dda.spec.features.as_ref().unwrap();
        let cc = features.cluster_checks.as_ref().unwrap();
        assert_eq!(cc.use_cluster_checks_runners, Some(true));
        let ksm = features.kube_state_metrics_core.as_ref().unwrap();
        assert_eq!(
            ksm.conf.as_ref().and_then(|c| c.config_data.as_deref()),
            Some("init_config:")
        );

        let dca = dda.spec.overrides.get("clusterAgent").unwrap();
        assert_eq!(dca.replicas, Some(2));
        assert_eq!(dca.env.len(), 1);
        assert_eq!(dca.env[0].name, "DD_LOG_LEVEL");
    }

    #[test]
    fn test_override_field_name_is_override() {
        let dda: DatadogAgent = serde_yaml::from_str(EXAMPLE).unwrap();
        let value = serde_json::to_value(&dda.spec).unwrap();

        assert!(value.get("override").is_some());
        assert!(value.get("overrides").is_none());
    }

    #[test]
    fn test_empty_spec_serializes_to_empty_object() {
        let value = serde_json::to_value(DatadogAgentSpec::default()).unwrap();
        assert_eq!(value, serde_json::json!({}));
    }

    #[test]
    fn test_status_defaults() {
        let status: DatadogAgentStatus = serde_json::from_value(serde_json::json!({})).unwrap();
        assert!(status.conditions.is_empty());
        assert!(status.cluster_agent.is_none());
    }

    #[test]
    fn test_resource_identity() {
        assert_eq!(DatadogAgent::group(&()), "datadoghq.com");
        assert_eq!(DatadogAgent::version(&()), "v2alpha1");
        assert_eq!(DatadogAgent::kind(&()), "DatadogAgent");
    }

    #[test]
    fn test_crd_yaml_contains_names() {
        let yaml = crd_yaml().unwrap();
        assert!(yaml.contains("datadogagents.datadoghq.com"));
        assert!(yaml.contains("DatadogAgent"));
    }
}
