// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Derived names and endpoints of a control plane.

use crate::constants::{APISERVER_NAME, APISERVER_SECURE_PORT, NAMESPACE_SUFFIX};

/// Namespace holding every sub-resource of control plane `cp_name`.
#[must_use]
pub fn namespace_for(cp_name: &str) -> String {
    format!("{cp_name}{NAMESPACE_SUFFIX}")
}

/// Logical database name of a control plane on the shared Postgres instance.
///
/// Every character that is not ASCII alphanumeric is replaced with `_`, so one
/// control plane always maps to one database.
#[must_use]
pub fn db_name(cp_name: &str) -> String {
    cp_name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}

/// Externally resolvable host name of a control plane (`<cp>.<domain>`).
#[must_use]
pub fn external_host(cp_name: &str, domain: &str) -> String {
    format!("{cp_name}.{domain}")
}

/// External URL of a control plane as seen through the ingress.
#[must_use]
pub fn external_url(cp_name: &str, domain: &str, port: u16) -> String {
    format!("https://{}:{port}", external_host(cp_name, domain))
}

/// Cluster-local DNS name of a Service.
#[must_use]
pub fn service_dns(service: &str, namespace: &str) -> String {
    format!("{service}.{namespace}.svc")
}

/// In-cluster URL of the embedded API server of a `k8s` control plane.
#[must_use]
pub fn in_cluster_apiserver_url(namespace: &str) -> String {
    format!(
        "https://{}:{APISERVER_SECURE_PORT}",
        service_dns(APISERVER_NAME, namespace)
    )
}

/// DNS names the API server certificate must carry on top of the standard aliases.
///
/// Covers the external host and every form of the in-cluster Service name.
#[must_use]
pub fn apiserver_extra_dns_names(cp_name: &str, domain: &str) -> Vec<String> {
    let ns = namespace_for(cp_name);
    vec![
        external_host(cp_name, domain),
        APISERVER_NAME.to_string(),
        format!("{APISERVER_NAME}.{ns}"),
        service_dns(APISERVER_NAME, &ns),
        format!("{APISERVER_NAME}.{ns}.svc.cluster.local"),
    ]
}

#[cfg(test)]
#[path = "naming_tests.rs"]
mod naming_tests;
