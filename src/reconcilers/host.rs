// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! `host` control planes: the hosting cluster exposed as a control plane.
//!
//! A service account in the control plane namespace is bound to
//! `cluster-admin`, and a kubeconfig is built from its long-lived token. The
//! token controller fills the token secret asynchronously, so building the
//! kubeconfig waits for the projection with a bounded poll.

use crate::constants::{
    ADMIN_KUBECONFIG_SECRET, CA_CERT_KEY, CLUSTER_ADMIN_ROLE, HOST_IN_CLUSTER_SERVER,
    HOST_SERVICE_ACCOUNT, HOST_TOKEN_SECRET, KUBECONFIG_KEY_DEFAULT, KUBECONFIG_KEY_IN_CLUSTER,
    TOKEN_POLL_INTERVAL_SECS, TOKEN_POLL_TIMEOUT_SECS,
};
use crate::context::Context;
use crate::crd::{ControlPlane, SecretReference};
use crate::errors::Result;
use crate::kubeconfig;
use crate::reconcilers::base::{
    ensure, ensure_namespace, secret_value, ControlPlaneProvisioner, Provisioned,
};
use crate::reconcilers::retry::poll_until;
use crate::resources::{
    build_cluster_role_binding, build_secret, build_service_account,
    build_service_account_token_secret,
};
use crate::store::ClusterStore;
use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Secret, ServiceAccount};
use k8s_openapi::api::rbac::v1::ClusterRoleBinding;
use kube::ResourceExt;
use std::collections::BTreeMap;
use std::time::Duration;

const SA_TOKEN_KEY: &str = "token";

/// Provisioner of `host` control planes.
#[derive(Clone, Copy, Debug, Default)]
pub struct HostProvisioner;

#[async_trait]
impl ControlPlaneProvisioner for HostProvisioner {
    async fn provision(&self, ctx: &Context, cp: &ControlPlane) -> Result<Provisioned> {
        let store = ctx.store.as_ref();
        let namespace = ensure_namespace(store, cp).await?;
        let ns = namespace.as_str();

        ensure::<ServiceAccount, _>(store, Some(ns), HOST_SERVICE_ACCOUNT, || {
            Ok(build_service_account(cp, HOST_SERVICE_ACCOUNT, ns))
        })
        .await?;

        ensure::<Secret, _>(store, Some(ns), HOST_TOKEN_SECRET, || {
            Ok(build_service_account_token_secret(
                cp,
                HOST_TOKEN_SECRET,
                ns,
                HOST_SERVICE_ACCOUNT,
            ))
        })
        .await?;

        if secret_value(store, ns, ADMIN_KUBECONFIG_SECRET, KUBECONFIG_KEY_DEFAULT)
            .await?
            .is_none()
        {
            let (token, ca) = wait_for_token(store, ns).await?;
            let config = kubeconfig::token_kubeconfig(&cp.name_any(), HOST_IN_CLUSTER_SERVER, &ca, &token)?;
            ensure::<Secret, _>(store, Some(ns), ADMIN_KUBECONFIG_SECRET, || {
                Ok(build_secret(
                    cp,
                    ADMIN_KUBECONFIG_SECRET,
                    ns,
                    ADMIN_KUBECONFIG_SECRET,
                    BTreeMap::from([
                        (KUBECONFIG_KEY_DEFAULT.to_string(), config.clone()),
                        (KUBECONFIG_KEY_IN_CLUSTER.to_string(), config),
                    ]),
                ))
            })
            .await?;
        }

        let binding = format!("{}-{HOST_SERVICE_ACCOUNT}", cp.name_any());
        ensure::<ClusterRoleBinding, _>(store, None, &binding, || {
            Ok(build_cluster_role_binding(
                Some(cp),
                &binding,
                CLUSTER_ADMIN_ROLE,
                HOST_SERVICE_ACCOUNT,
                ns,
            ))
        })
        .await?;

        Ok(Provisioned {
            secret_ref: SecretReference {
                name: ADMIN_KUBECONFIG_SECRET.to_string(),
                namespace: namespace.clone(),
                key: KUBECONFIG_KEY_DEFAULT.to_string(),
                in_cluster_key: KUBECONFIG_KEY_IN_CLUSTER.to_string(),
            },
            ready: true,
        })
    }
}

/// Wait until the token controller has projected the token and CA into the token secret.
async fn wait_for_token(store: &dyn ClusterStore, namespace: &str) -> Result<(String, Vec<u8>)> {
    poll_until(
        "service account token",
        Duration::from_secs(TOKEN_POLL_INTERVAL_SECS),
        Duration::from_secs(TOKEN_POLL_TIMEOUT_SECS),
        move || async move {
            let token = secret_value(store, namespace, HOST_TOKEN_SECRET, SA_TOKEN_KEY).await?;
            let ca = secret_value(store, namespace, HOST_TOKEN_SECRET, CA_CERT_KEY).await?;
            Ok(token
                .zip(ca)
                .map(|(token, ca)| (String::from_utf8_lossy(&token).into_owned(), ca)))
        },
    )
    .await
}

#[cfg(test)]
#[path = "host_tests.rs"]
mod host_tests;
