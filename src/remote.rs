// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Connections to clusters other than the hosting cluster.
//!
//! Adoption of an `external` control plane runs a few calls against the adopted
//! cluster using a bootstrap kubeconfig. The connector turns that kubeconfig into
//! a [`ClusterStore`].

use crate::errors::{Error, Result};
use crate::store::{ClusterStore, KubeStore};
use async_trait::async_trait;
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Client, Config};
use std::sync::Arc;

/// Opens a [`ClusterStore`] for a kubeconfig.
#[async_trait]
pub trait RemoteClusterConnector: Send + Sync {
    /// Connect using the current context of `kubeconfig` (YAML).
    async fn connect(&self, kubeconfig: &str) -> Result<Arc<dyn ClusterStore>>;
}

/// [`RemoteClusterConnector`] building real clients.
#[derive(Clone, Debug, Default)]
pub struct KubeconfigConnector;

#[async_trait]
impl RemoteClusterConnector for KubeconfigConnector {
    async fn connect(&self, kubeconfig: &str) -> Result<Arc<dyn ClusterStore>> {
        let kc = Kubeconfig::from_yaml(kubeconfig)
            .map_err(|e| Error::Kubeconfig(format!("invalid bootstrap kubeconfig: {e}")))?;
        let config = Config::from_custom_kubeconfig(kc, &KubeConfigOptions::default())
            .await
            .map_err(|e| Error::Kubeconfig(format!("unusable bootstrap kubeconfig: {e}")))?;
        let client = Client::try_from(config)?;
        Ok(Arc::new(KubeStore::new(client)))
    }
}
