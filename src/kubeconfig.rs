// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Kubeconfig generation.
//!
//! Every kubeconfig produced here has exactly one cluster, one user and one
//! context, all named after the control plane, with `current-context` set.
//!
//! # Server Selection
//!
//! The server URL is chosen in this order:
//!
//! 1. an explicit override (`extra_dns`), when set
//! 2. the in-cluster Service DNS name, for in-cluster targets
//! 3. `https://<cp>.<domain>:<external port>`

use crate::constants::{CM_KUBECONFIG_KEY, KUBECONFIG_KEY_DEFAULT, KUBECONFIG_KEY_IN_CLUSTER};
use crate::errors::{Error, Result};
use crate::naming;
use crate::pki::{CertKeyPair, Certs};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use kube::config::Kubeconfig;
use serde_json::json;
use std::collections::BTreeMap;

/// Who the kubeconfig is for.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum KubeconfigTarget {
    /// Cluster admin, reaching the API server from outside the hosting cluster
    Admin,
    /// Cluster admin, reaching the API server from pods in the hosting cluster
    AdminInCluster,
    /// `kube-controller-manager` of the control plane
    ControllerManager,
}

impl KubeconfigTarget {
    /// Subject common name and organizations of the client certificate.
    #[must_use]
    pub fn subject(&self) -> (&'static str, &'static [&'static str]) {
        match self {
            Self::Admin | Self::AdminInCluster => ("kubernetes-admin", &["system:masters"]),
            Self::ControllerManager => ("system:kube-controller-manager", &[]),
        }
    }

    /// Data key of the kubeconfig inside its secret.
    #[must_use]
    pub fn secret_key(&self) -> &'static str {
        match self {
            Self::Admin => KUBECONFIG_KEY_DEFAULT,
            Self::AdminInCluster => KUBECONFIG_KEY_IN_CLUSTER,
            Self::ControllerManager => CM_KUBECONFIG_KEY,
        }
    }

    /// Whether the kubeconfig is consumed from inside the hosting cluster.
    #[must_use]
    pub fn is_in_cluster(&self) -> bool {
        matches!(self, Self::AdminInCluster | Self::ControllerManager)
    }
}

/// Inputs for kubeconfig generation of one control plane.
#[derive(Clone, Debug)]
pub struct ConfigGen {
    pub cp_name: String,
    pub namespace: String,
    pub domain: String,
    pub external_port: u16,
    /// Explicit server URL that overrides every other choice
    pub extra_dns: Option<String>,
}

impl ConfigGen {
    #[must_use]
    pub fn new(cp_name: &str, domain: &str, external_port: u16) -> Self {
        Self {
            cp_name: cp_name.to_string(),
            namespace: naming::namespace_for(cp_name),
            domain: domain.to_string(),
            external_port,
            extra_dns: None,
        }
    }

    /// Server URL for `target`.
    #[must_use]
    pub fn server_url(&self, target: KubeconfigTarget) -> String {
        if let Some(server) = self.extra_dns.as_ref().filter(|s| !s.is_empty()) {
            return server.clone();
        }
        if target.is_in_cluster() {
            return naming::in_cluster_apiserver_url(&self.namespace);
        }
        naming::external_url(&self.cp_name, &self.domain, self.external_port)
    }

    /// Issue a client certificate for `target` and build its kubeconfig.
    ///
    /// # Errors
    ///
    /// Returns an error if the certificate cannot be issued.
    pub fn generate(&self, certs: &Certs, target: KubeconfigTarget) -> Result<String> {
        let (cn, orgs) = target.subject();
        let client = certs.issue_client_cert(cn, orgs)?;
        cert_kubeconfig(
            &self.cp_name,
            &self.server_url(target),
            &certs.ca.cert_pem,
            &client,
        )
    }

    /// Secret data of the admin kubeconfig secret.
    ///
    /// Holds two kubeconfigs sharing one client certificate: the default one
    /// through the external endpoint and the in-cluster one through the Service.
    ///
    /// # Errors
    ///
    /// Returns an error if the certificate cannot be issued.
    pub fn admin_secret_data(&self, certs: &Certs) -> Result<BTreeMap<String, String>> {
        let (cn, orgs) = KubeconfigTarget::Admin.subject();
        let client = certs.issue_client_cert(cn, orgs)?;
        let mut data = BTreeMap::new();
        for target in [KubeconfigTarget::Admin, KubeconfigTarget::AdminInCluster] {
            data.insert(
                target.secret_key().to_string(),
                cert_kubeconfig(
                    &self.cp_name,
                    &self.server_url(target),
                    &certs.ca.cert_pem,
                    &client,
                )?,
            );
        }
        Ok(data)
    }
}

fn render(value: &serde_json::Value) -> Result<String> {
    let yaml = serde_yaml::to_string(value)?;
    // Round-trip through the client's own model to catch malformed output early
    Kubeconfig::from_yaml(&yaml).map_err(|e| Error::Kubeconfig(e.to_string()))?;
    Ok(yaml)
}

/// Kubeconfig authenticating with a client certificate.
///
/// # Errors
///
/// Returns an error if the document cannot be serialized.
pub fn cert_kubeconfig(
    name: &str,
    server: &str,
    ca_pem: &str,
    client: &CertKeyPair,
) -> Result<String> {
    render(&json!({
        "apiVersion": "v1",
        "kind": "Config",
        "clusters": [{
            "name": name,
            "cluster": {
                "server": server,
                "certificate-authority-data": BASE64.encode(ca_pem),
            }
        }],
        "users": [{
            "name": name,
            "user": {
                "client-certificate-data": BASE64.encode(&client.cert_pem),
                "client-key-data": BASE64.encode(&client.key_pem),
            }
        }],
        "contexts": [{
            "name": name,
            "context": { "cluster": name, "user": name }
        }],
        "current-context": name,
    }))
}

/// Kubeconfig authenticating with a bearer token.
///
/// # Arguments
///
/// * `name` - Cluster, user and context name
/// * `server` - API server URL
/// * `ca_data` - Raw CA bundle; empty to fall back to the system trust store
/// * `token` - Bearer token
///
/// # Errors
///
/// Returns an error if the document cannot be serialized.
pub fn token_kubeconfig(name: &str, server: &str, ca_data: &[u8], token: &str) -> Result<String> {
    let mut cluster = json!({ "server": server });
    if !ca_data.is_empty() {
        cluster["certificate-authority-data"] = json!(BASE64.encode(ca_data));
    }
    render(&json!({
        "apiVersion": "v1",
        "kind": "Config",
        "clusters": [{ "name": name, "cluster": cluster }],
        "users": [{ "name": name, "user": { "token": token } }],
        "contexts": [{
            "name": name,
            "context": { "cluster": name, "user": name }
        }],
        "current-context": name,
    }))
}

/// Parse a kubeconfig.
///
/// # Errors
///
/// Returns [`Error::Kubeconfig`] if the document is not a kubeconfig.
pub fn parse(yaml: &str) -> Result<Kubeconfig> {
    Kubeconfig::from_yaml(yaml).map_err(|e| Error::Kubeconfig(e.to_string()))
}

/// Server URL and CA bundle of the current context's cluster.
///
/// # Errors
///
/// Returns [`Error::Kubeconfig`] if the current context or its cluster is missing.
pub fn current_cluster(yaml: &str) -> Result<(String, Vec<u8>)> {
    let kc = parse(yaml)?;
    let current = kc
        .current_context
        .clone()
        .ok_or_else(|| Error::Kubeconfig("no current-context".to_string()))?;
    let cluster_name = kc
        .contexts
        .iter()
        .find(|c| c.name == current)
        .and_then(|c| c.context.as_ref())
        .map(|c| c.cluster.clone())
        .ok_or_else(|| Error::Kubeconfig(format!("context {current} not found")))?;
    let cluster = kc
        .clusters
        .iter()
        .find(|c| c.name == cluster_name)
        .and_then(|c| c.cluster.as_ref())
        .ok_or_else(|| Error::Kubeconfig(format!("cluster {cluster_name} not found")))?;
    let server = cluster
        .server
        .clone()
        .ok_or_else(|| Error::Kubeconfig(format!("cluster {cluster_name} has no server")))?;
    let ca = match &cluster.certificate_authority_data {
        Some(data) => BASE64
            .decode(data)
            .map_err(|e| Error::Kubeconfig(format!("invalid certificate-authority-data: {e}")))?,
        None => Vec::new(),
    };
    Ok((server, ca))
}

/// Point every cluster entry of a kubeconfig at `server`, keeping everything else.
///
/// # Errors
///
/// Returns an error if the document is not valid YAML or has no clusters.
pub fn rewrite_server(yaml: &str, server: &str) -> Result<String> {
    let mut doc: serde_yaml::Value = serde_yaml::from_str(yaml)?;
    let clusters = doc
        .get_mut("clusters")
        .and_then(serde_yaml::Value::as_sequence_mut)
        .ok_or_else(|| Error::Kubeconfig("kubeconfig has no clusters".to_string()))?;
    for entry in clusters.iter_mut() {
        if let Some(cluster) = entry
            .get_mut("cluster")
            .and_then(serde_yaml::Value::as_mapping_mut)
        {
            cluster.insert(
                serde_yaml::Value::String("server".to_string()),
                serde_yaml::Value::String(server.to_string()),
            );
        }
    }
    Ok(serde_yaml::to_string(&doc)?)
}

#[cfg(test)]
#[path = "kubeconfig_tests.rs"]
mod kubeconfig_tests;
