// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! CRD YAML Generator
//!
//! Generates the `DatadogAgent` CRD YAML from the Rust types defined in
//! src/crd.rs, so deploy/crds/ always matches the code.
//!
//! Usage:
//!   cargo run --bin crdgen [OUTPUT_DIR]
//!
//! The output directory defaults to deploy/crds/.

use dd_operator::crd::crd_yaml;
use std::fs;
use std::path::{Path, PathBuf};

const COPYRIGHT_HEADER: &str = "# Copyright (c) 2025 Erick Bourgeois, firestoned
# SPDX-License-Identifier: MIT
#
# This file is AUTO-GENERATED from src/crd.rs
# DO NOT EDIT MANUALLY - Run `cargo run --bin crdgen` to regenerate
#
";

const DEFAULT_OUTPUT_DIR: &str = "deploy/crds";
const DATADOG_AGENT_CRD_FILE: &str = "datadogagents.crd.yaml";

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let output_dir = std::env::args()
        .nth(1)
        .map_or_else(|| PathBuf::from(DEFAULT_OUTPUT_DIR), PathBuf::from);

    println!("Generating CRD YAML files from src/crd.rs...");
    let path = write_crd(&output_dir)?;
    println!("  ✓ Generated {}", path.display());

    println!("\nNext steps:");
    println!("  1. Review the generated files");
    println!("  2. Deploy with: kubectl apply -f {}", output_dir.display());

    Ok(())
}

fn write_crd(output_dir: &Path) -> Result<PathBuf, Box<dyn std::error::Error>> {
    fs::create_dir_all(output_dir)?;

    let content = format!("{COPYRIGHT_HEADER}{}", crd_yaml()?);

    let output_path = output_dir.join(DATADOG_AGENT_CRD_FILE);
    fs::write(&output_path, content)?;
    Ok(output_path)
}
