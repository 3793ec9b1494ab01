// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Shared context for all controllers.
//!
//! All controllers receive an `Arc<Context>` that contains:
//! - the [`ClusterStore`] of the hosting cluster
//! - the [`ChartInstaller`] used by the Helm-based control plane types
//! - the [`RemoteClusterConnector`] used to adopt external clusters
//! - the operator configuration
//!
//! Every collaborator is a trait object so reconcilers can be exercised against
//! in-memory fakes.

use crate::config::OperatorConfig;
use crate::helm::{ChartInstaller, HelmCli};
use crate::remote::{KubeconfigConnector, RemoteClusterConnector};
use crate::store::{ClusterStore, KubeStore};
use kube::Client;
use std::sync::Arc;

/// Shared context passed to all controllers.
#[derive(Clone)]
pub struct Context {
    /// Object access on the hosting cluster
    pub store: Arc<dyn ClusterStore>,

    /// Helm release installer
    pub charts: Arc<dyn ChartInstaller>,

    /// Connector for adopted clusters
    pub remote: Arc<dyn RemoteClusterConnector>,

    /// Operator settings
    pub config: OperatorConfig,
}

impl Context {
    /// Build the production context around a Kubernetes client.
    #[must_use]
    pub fn new(client: Client, config: OperatorConfig) -> Self {
        Self {
            store: Arc::new(KubeStore::new(client)),
            charts: Arc::new(HelmCli::new(config.helm_bin.clone())),
            remote: Arc::new(KubeconfigConnector),
            config,
        }
    }
}
