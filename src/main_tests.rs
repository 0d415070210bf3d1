// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Unit tests for `main.rs` - command line parsing and health probes

#[cfg(test)]
mod tests {
    use crate::{ready, Args, Command, LogFormat};
    use axum::extract::State;
    use axum::http::StatusCode;
    use clap::Parser;
    use dd_operator::context::Readiness;
    use std::time::Duration;

    #[test]
    fn test_defaults() {
        let args = Args::try_parse_from(["dd-operator"]).unwrap();
        assert!(args.command.is_none());
        assert_eq!(args.metrics_addr.port(), 8080);
        assert!(!args.dry_run);

        let options = args.reconcile_options();
        assert!(!options.extended_daemonset);
        assert_eq!(options.default_requeue, Duration::from_secs(args.requeue_secs));
    }

    #[test]
    fn test_flags_feed_reconcile_options() {
        let args = Args::try_parse_from([
            "dd-operator",
            "--extended-daemonset",
            "--requeue-secs",
            "60",
            "--watch-namespace",
            "datadog",
            "--log-format",
            "json",
        ])
        .unwrap();

        let options = args.reconcile_options();
        assert!(options.extended_daemonset);
        assert_eq!(options.default_requeue, Duration::from_secs(60));
        assert_eq!(args.watch_namespace().as_deref(), Some("datadog"));
        assert_eq!(args.log_format, LogFormat::Json);
    }

    #[test]
    fn test_empty_watch_namespace_means_cluster_wide() {
        let args = Args::try_parse_from(["dd-operator", "--watch-namespace", ""]).unwrap();
        assert!(args.watch_namespace().is_none());
    }

    #[test]
    fn test_dry_run_requires_manifest() {
        assert!(Args::try_parse_from(["dd-operator", "--dry-run"]).is_err());

        let args = Args::try_parse_from(["dd-operator", "--dry-run", "--manifest", "dda.yaml"]).unwrap();
        assert!(args.dry_run);
        assert_eq!(args.manifest.unwrap().to_str(), Some("dda.yaml"));
    }

    #[test]
    fn test_completions_subcommand() {
        let args = Args::try_parse_from(["dd-operator", "completions", "bash"]).unwrap();
        assert!(matches!(
            args.command,
            Some(Command::Completions {
                shell: clap_complete::Shell::Bash
            })
        ));
    }

    #[tokio::test]
    async fn test_readyz_follows_readiness() {
        let readiness = Readiness::default();
        assert_eq!(ready(State(readiness.clone())).await, StatusCode::SERVICE_UNAVAILABLE);

        readiness.mark_ready();
        assert_eq!(ready(State(readiness)).await, StatusCode::OK);
    }
}
