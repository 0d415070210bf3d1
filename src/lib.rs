// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

#![allow(unexpected_cfgs)]

//! # dd-operator - Datadog Agent Operator for Kubernetes
//!
//! dd-operator reconciles `DatadogAgent` custom resources into the workloads
//! and supporting objects of a Datadog installation: the node agent, the
//! cluster agent and the cluster checks runner.
//!
//! ## Overview
//!
//! Each reconcile pass:
//!
//! - configures the enabled features from the owner spec
//! - lets features queue dependencies (RBAC, ConfigMaps, Secrets, Services)
//! - builds the pod template of every component from feature instructions
//! - converges workloads by content hash and writes the owner status
//!
//! ## Modules
//!
//! - [`crd`] - `DatadogAgent` custom resource types
//! - [`component`] - naming and metadata of the three components
//! - [`feature`] - feature registry and the built-in features
//! - [`podtemplate`] - pod template change instructions
//! - [`managers`] - dependency store, RBAC and ConfigMap managers
//! - [`reconcilers`] - top-level and per-component reconcilers
//! - [`platform`] - API server port with cluster and in-memory adapters
//! - [`render`] - dry-run rendering of a manifest
//!
//! ## Example
//!
//! ```rust,no_run
//! use dd_operator::crd::{DatadogAgent, DatadogAgentSpec};
//!
//! let dda = DatadogAgent::new("datadog", DatadogAgentSpec::default());
//! assert!(dda.spec.features.is_none());
//! ```

pub mod component;
pub mod constants;
pub mod context;
pub mod crd;
pub mod errors;
pub mod feature;
pub mod hashing;
pub mod labels;
pub mod managers;
pub mod metrics;
pub mod ownership;
pub mod platform;
pub mod podtemplate;
pub mod reconcilers;
pub mod render;
pub mod status_reasons;

#[cfg(test)]
mod test_helpers;
