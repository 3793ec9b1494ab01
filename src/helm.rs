// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Helm chart installation.
//!
//! The vcluster, ocm and dedicated-backend paths only need one operation from
//! Helm: make sure release `name` of chart `C` exists in namespace `N`. Releases
//! are install-once, like every other sub-resource; an existing release is left
//! untouched.

use crate::config::ChartRef;
use crate::errors::{Error, Result};
use async_trait::async_trait;
use serde::Deserialize;
use tokio::process::Command;
use tracing::{debug, info, instrument};

/// A release to install.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HelmRelease {
    pub name: String,
    pub namespace: String,
    pub chart: ChartRef,
    /// `--set key=value` pairs, in order
    pub values: Vec<(String, String)>,
}

impl HelmRelease {
    /// Arguments passed to `helm upgrade --install`.
    #[must_use]
    pub fn install_args(&self) -> Vec<String> {
        let mut args = vec![
            "upgrade".to_string(),
            "--install".to_string(),
            self.name.clone(),
            self.chart.chart.clone(),
            "--namespace".to_string(),
            self.namespace.clone(),
        ];
        if !self.chart.repo.is_empty() {
            args.push("--repo".to_string());
            args.push(self.chart.repo.clone());
        }
        if !self.chart.version.is_empty() {
            args.push("--version".to_string());
            args.push(self.chart.version.clone());
        }
        for (key, value) in &self.values {
            args.push("--set".to_string());
            args.push(format!("{key}={value}"));
        }
        args
    }
}

/// Ensures Helm releases exist.
#[async_trait]
pub trait ChartInstaller: Send + Sync {
    /// Install `release` unless a release with that name already exists.
    async fn ensure_release(&self, release: &HelmRelease) -> Result<()>;
}

#[derive(Debug, Deserialize)]
struct InstalledChart {
    name: String,
}

/// [`ChartInstaller`] that shells out to the Helm CLI.
#[derive(Clone, Debug)]
pub struct HelmCli {
    bin: String,
}

impl HelmCli {
    #[must_use]
    pub fn new(bin: impl Into<String>) -> Self {
        Self { bin: bin.into() }
    }

    async fn run(&self, release: &str, args: &[String]) -> Result<Vec<u8>> {
        let output = Command::new(&self.bin)
            .args(args)
            .output()
            .await
            .map_err(|e| Error::Helm {
                release: release.to_string(),
                message: format!("failed to run {}: {e}", self.bin),
            })?;
        if !output.status.success() {
            return Err(Error::Helm {
                release: release.to_string(),
                message: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(output.stdout)
    }

    async fn is_installed(&self, name: &str, namespace: &str) -> Result<bool> {
        let args = vec![
            "list".to_string(),
            "--namespace".to_string(),
            namespace.to_string(),
            "--filter".to_string(),
            format!("^{name}$"),
            "--output".to_string(),
            "json".to_string(),
        ];
        let stdout = self.run(name, &args).await?;
        let charts: Vec<InstalledChart> = serde_json::from_slice(&stdout)?;
        Ok(charts.iter().any(|c| c.name == name))
    }
}

#[async_trait]
impl ChartInstaller for HelmCli {
    #[instrument(skip(self, release), fields(release = %release.name, namespace = %release.namespace))]
    async fn ensure_release(&self, release: &HelmRelease) -> Result<()> {
        if self.is_installed(&release.name, &release.namespace).await? {
            debug!("Helm release already installed");
            return Ok(());
        }
        info!(chart = %release.chart.chart, version = %release.chart.version, "Installing Helm release");
        self.run(&release.name, &release.install_args()).await?;
        Ok(())
    }
}

#[cfg(test)]
#[path = "helm_tests.rs"]
mod helm_tests;
