// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Operator configuration.
//!
//! Every setting is a command line flag that can also be set through a `KFLEX_*`
//! environment variable. At startup the operator overlays the optional
//! `kubeflex-config` ConfigMap from its own namespace, which carries the
//! cluster-wide settings shared with the CLI (`domain`, `externalPort`,
//! `isOpenShift`, `exposure`).
//!
//! # Example
//!
//! ```bash
//! KFLEX_DOMAIN=example.com KFLEX_EXPOSURE=gateway kflex --leader-elect
//! ```

use crate::constants::{
    DEFAULT_DOMAIN, DEFAULT_EXTERNAL_PORT, DEFAULT_INGRESS_CLASS, DEFAULT_SYSTEM_NAMESPACE,
    METRICS_SERVER_BIND_ADDRESS,
};
use clap::{Parser, ValueEnum};
use std::collections::BTreeMap;
use tracing::{debug, warn};

/// How control plane API servers are exposed outside the hosting cluster.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum Exposure {
    /// Ingress with SSL passthrough (nginx)
    #[default]
    Ingress,
    /// OpenShift Route with passthrough TLS
    Route,
    /// Gateway API `HTTPRoute` attached to the shared kflex Gateway
    Gateway,
}

impl std::str::FromStr for Exposure {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "ingress" => Ok(Self::Ingress),
            "route" => Ok(Self::Route),
            "gateway" => Ok(Self::Gateway),
            other => Err(format!("unknown exposure mode {other}")),
        }
    }
}

/// Coordinates of a Helm chart.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChartRef {
    /// Repository URL, or empty when `chart` is an OCI reference
    pub repo: String,
    pub chart: String,
    pub version: String,
}

/// Operator settings.
#[derive(Parser, Debug, Clone)]
#[command(
    name = "kflex",
    version,
    about = "Kubernetes operator providing control planes as a resource"
)]
pub struct OperatorConfig {
    /// DNS domain under which control planes are exposed
    #[arg(long, env = "KFLEX_DOMAIN", default_value = DEFAULT_DOMAIN)]
    pub domain: String,

    /// Port of the ingress controller as reachable from outside the cluster
    #[arg(long, env = "KFLEX_EXTERNAL_PORT", default_value_t = DEFAULT_EXTERNAL_PORT)]
    pub external_port: u16,

    /// The hosting cluster is OpenShift (implies Route exposure)
    #[arg(long, env = "KFLEX_OPENSHIFT", default_value_t = false)]
    pub is_openshift: bool,

    /// Exposure mode for control plane API servers
    #[arg(long, env = "KFLEX_EXPOSURE", value_enum, default_value_t = Exposure::Ingress)]
    pub exposure: Exposure,

    /// Ingress class used in Ingress exposure mode
    #[arg(long, env = "KFLEX_INGRESS_CLASS", default_value = DEFAULT_INGRESS_CLASS)]
    pub ingress_class: String,

    /// Namespace the operator runs in
    #[arg(long, env = "KFLEX_SYSTEM_NAMESPACE", default_value = DEFAULT_SYSTEM_NAMESPACE)]
    pub system_namespace: String,

    /// Identity used for leader election
    #[arg(long, env = "POD_NAME", default_value = "kflex-controller")]
    pub pod_name: String,

    /// Only run controllers while holding the leader Lease
    #[arg(long, env = "KFLEX_LEADER_ELECT", default_value_t = false)]
    pub leader_elect: bool,

    /// Bind address of the metrics and health server
    #[arg(long, env = "KFLEX_METRICS_BIND_ADDRESS", default_value = METRICS_SERVER_BIND_ADDRESS)]
    pub metrics_bind_address: String,

    /// Path of the Helm CLI
    #[arg(long, env = "KFLEX_HELM_BIN", default_value = "helm")]
    pub helm_bin: String,

    // ------------------------------------------------------------------
    // Images
    // ------------------------------------------------------------------
    #[arg(long, env = "KFLEX_KINE_IMAGE", default_value = "rancher/kine:v0.13.5")]
    pub kine_image: String,

    #[arg(
        long,
        env = "KFLEX_APISERVER_IMAGE",
        default_value = "registry.k8s.io/kube-apiserver:v1.31.0"
    )]
    pub apiserver_image: String,

    #[arg(
        long,
        env = "KFLEX_CONTROLLER_MANAGER_IMAGE",
        default_value = "registry.k8s.io/kube-controller-manager:v1.31.0"
    )]
    pub controller_manager_image: String,

    #[arg(long, env = "KFLEX_K3S_IMAGE", default_value = "rancher/k3s:v1.31.0-k3s1")]
    pub k3s_image: String,

    /// Image running `kubectl` in the k3s bootstrap job
    #[arg(long, env = "KFLEX_KUBECTL_IMAGE", default_value = "bitnami/kubectl:1.31")]
    pub kubectl_image: String,

    #[arg(
        long,
        env = "KFLEX_CMUPDATE_IMAGE",
        default_value = "ghcr.io/kubestellar/kubeflex/cmupdate:latest"
    )]
    pub cmupdate_image: String,

    // ------------------------------------------------------------------
    // Shared Postgres
    // ------------------------------------------------------------------
    #[arg(
        long,
        env = "KFLEX_POSTGRES_HOST",
        default_value = "postgres-postgresql.kubeflex-system.svc"
    )]
    pub postgres_host: String,

    #[arg(long, env = "KFLEX_POSTGRES_PORT", default_value_t = 5432)]
    pub postgres_port: u16,

    #[arg(long, env = "KFLEX_POSTGRES_USER", default_value = "postgres")]
    pub postgres_user: String,

    /// Secret in the system namespace holding the shared Postgres password
    #[arg(long, env = "KFLEX_POSTGRES_SECRET", default_value = "postgres-postgresql")]
    pub postgres_secret: String,

    // ------------------------------------------------------------------
    // Charts
    // ------------------------------------------------------------------
    #[arg(long, env = "KFLEX_VCLUSTER_CHART_REPO", default_value = "https://charts.loft.sh")]
    pub vcluster_chart_repo: String,

    #[arg(long, env = "KFLEX_VCLUSTER_CHART", default_value = "vcluster")]
    pub vcluster_chart: String,

    #[arg(long, env = "KFLEX_VCLUSTER_CHART_VERSION", default_value = "0.16.4")]
    pub vcluster_chart_version: String,

    #[arg(long, env = "KFLEX_OCM_CHART_REPO", default_value = "")]
    pub ocm_chart_repo: String,

    #[arg(
        long,
        env = "KFLEX_OCM_CHART",
        default_value = "oci://quay.io/kubestellar/multicluster-controlplane-chart"
    )]
    pub ocm_chart: String,

    #[arg(long, env = "KFLEX_OCM_CHART_VERSION", default_value = "0.2.0")]
    pub ocm_chart_version: String,

    #[arg(long, env = "KFLEX_POSTGRES_CHART_REPO", default_value = "")]
    pub postgres_chart_repo: String,

    #[arg(
        long,
        env = "KFLEX_POSTGRES_CHART",
        default_value = "oci://registry-1.docker.io/bitnamicharts/postgresql"
    )]
    pub postgres_chart: String,

    #[arg(long, env = "KFLEX_POSTGRES_CHART_VERSION", default_value = "13.1.5")]
    pub postgres_chart_version: String,
}

impl Default for OperatorConfig {
    fn default() -> Self {
        Self::parse_from(["kflex"])
    }
}

impl OperatorConfig {
    /// Effective exposure mode; OpenShift always uses Routes.
    #[must_use]
    pub fn effective_exposure(&self) -> Exposure {
        if self.is_openshift {
            Exposure::Route
        } else {
            self.exposure
        }
    }

    #[must_use]
    pub fn vcluster_chart_ref(&self) -> ChartRef {
        ChartRef {
            repo: self.vcluster_chart_repo.clone(),
            chart: self.vcluster_chart.clone(),
            version: self.vcluster_chart_version.clone(),
        }
    }

    #[must_use]
    pub fn ocm_chart_ref(&self) -> ChartRef {
        ChartRef {
            repo: self.ocm_chart_repo.clone(),
            chart: self.ocm_chart.clone(),
            version: self.ocm_chart_version.clone(),
        }
    }

    #[must_use]
    pub fn postgres_chart_ref(&self) -> ChartRef {
        ChartRef {
            repo: self.postgres_chart_repo.clone(),
            chart: self.postgres_chart.clone(),
            version: self.postgres_chart_version.clone(),
        }
    }

    /// Overlay cluster-wide settings published in the `kubeflex-config` ConfigMap.
    ///
    /// Unknown keys are ignored. Values that fail to parse are logged and skipped,
    /// keeping the flag value.
    ///
    /// # Arguments
    ///
    /// * `data` - The ConfigMap `data` field
    pub fn apply_config_map(&mut self, data: &BTreeMap<String, String>) {
        if let Some(domain) = data.get("domain").filter(|d| !d.is_empty()) {
            debug!(domain = %domain, "Using domain from ConfigMap");
            self.domain.clone_from(domain);
        }
        if let Some(port) = data.get("externalPort") {
            match port.parse::<u16>() {
                Ok(p) => self.external_port = p,
                Err(e) => warn!(value = %port, error = %e, "Ignoring invalid externalPort"),
            }
        }
        if let Some(v) = data.get("isOpenShift") {
            match v.parse::<bool>() {
                Ok(b) => self.is_openshift = b,
                Err(e) => warn!(value = %v, error = %e, "Ignoring invalid isOpenShift"),
            }
        }
        if let Some(v) = data.get("exposure") {
            match v.parse::<Exposure>() {
                Ok(e) => self.exposure = e,
                Err(e) => warn!(value = %v, error = %e, "Ignoring invalid exposure"),
            }
        }
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod config_tests;
