// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! `external` control planes: adoption of a pre-existing cluster.
//!
//! Adoption is a one-time credential exchange. The bootstrap kubeconfig named
//! by `spec.bootstrapSecretRef` is used to create a ServiceAccount bound to
//! `cluster-admin` on the adopted cluster and to mint an expiring token for it.
//! The token kubeconfig becomes the control plane's kubeconfig. Once
//! `admin-kubeconfig` exists the exchange is never repeated.
//!
//! The bootstrap secret is removed in a separate step that runs on every pass,
//! so a failed delete is retried after the exchange has completed.

use crate::constants::{
    ADMIN_KUBECONFIG_SECRET, ADOPTED_SERVICE_ACCOUNT, ADOPTED_SERVICE_ACCOUNT_NAMESPACE,
    CLUSTER_ADMIN_ROLE, DEFAULT_ADOPTED_TOKEN_EXPIRATION_SECS, DEFAULT_BOOTSTRAP_SECRET_KEY,
    KUBECONFIG_KEY_DEFAULT,
};
use crate::context::Context;
use crate::crd::{ControlPlane, SecretReference};
use crate::errors::{Error, Result};
use crate::kubeconfig;
use crate::labels::build_labels;
use crate::reconcilers::base::{
    ensure, ensure_namespace, required_secret_value, secret_value, ControlPlaneProvisioner,
    Provisioned,
};
use crate::resources::{build_cluster_role_binding, build_secret};
use crate::store::{api_resource, delete_typed, get_typed, ClusterStore};
use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Secret, ServiceAccount};
use k8s_openapi::api::rbac::v1::ClusterRoleBinding;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::ResourceExt;
use serde_json::json;
use std::collections::BTreeMap;
use tracing::info;

/// Provisioner of `external` control planes.
#[derive(Clone, Copy, Debug, Default)]
pub struct ExternalProvisioner;

#[async_trait]
impl ControlPlaneProvisioner for ExternalProvisioner {
    async fn provision(&self, ctx: &Context, cp: &ControlPlane) -> Result<Provisioned> {
        let store = ctx.store.as_ref();
        let namespace = ensure_namespace(store, cp).await?;
        let secret_ref = SecretReference {
            name: ADMIN_KUBECONFIG_SECRET.to_string(),
            namespace: namespace.clone(),
            key: KUBECONFIG_KEY_DEFAULT.to_string(),
            in_cluster_key: KUBECONFIG_KEY_DEFAULT.to_string(),
        };

        if secret_value(store, &namespace, ADMIN_KUBECONFIG_SECRET, KUBECONFIG_KEY_DEFAULT)
            .await?
            .is_none()
        {
            adopt(ctx, cp, &namespace).await?;
        }
        delete_bootstrap_secret(store, cp).await?;
        Ok(Provisioned {
            secret_ref,
            ready: true,
        })
    }
}

async fn adopt(ctx: &Context, cp: &ControlPlane, namespace: &str) -> Result<()> {
    let store = ctx.store.as_ref();
    let cp_name = cp.name_any();
    let bootstrap = cp
        .spec
        .bootstrap_secret_ref
        .as_ref()
        .ok_or_else(|| Error::MissingBootstrapSecretRef(cp_name.clone()))?;
    let key = bootstrap
        .key
        .as_deref()
        .unwrap_or(DEFAULT_BOOTSTRAP_SECRET_KEY);

    let raw = required_secret_value(store, &bootstrap.namespace, &bootstrap.name, key).await?;
    let bootstrap_kubeconfig = String::from_utf8(raw).map_err(|e| {
        Error::Kubeconfig(format!(
            "bootstrap secret {}/{}: {e}",
            bootstrap.namespace, bootstrap.name
        ))
    })?;
    let (server, ca) = kubeconfig::current_cluster(&bootstrap_kubeconfig)?;

    info!(control_plane = %cp_name, server = %server, "Adopting external cluster");
    let remote = ctx.remote.connect(&bootstrap_kubeconfig).await?;
    let expiration = cp
        .spec
        .adopted_token_expiration_seconds
        .unwrap_or(DEFAULT_ADOPTED_TOKEN_EXPIRATION_SECS);
    let token = mint_admin_token(remote.as_ref(), &cp_name, expiration).await?;

    let adopted = kubeconfig::token_kubeconfig(&cp_name, &server, &ca, &token)?;
    ensure::<Secret, _>(store, Some(namespace), ADMIN_KUBECONFIG_SECRET, || {
        Ok(build_secret(
            cp,
            ADMIN_KUBECONFIG_SECRET,
            namespace,
            ADMIN_KUBECONFIG_SECRET,
            BTreeMap::from([(KUBECONFIG_KEY_DEFAULT.to_string(), adopted)]),
        ))
    })
    .await?;
    Ok(())
}

/// Delete the bootstrap secret if it still exists. Only called once the
/// adopted kubeconfig is stored.
async fn delete_bootstrap_secret(store: &dyn ClusterStore, cp: &ControlPlane) -> Result<()> {
    let Some(bootstrap) = cp.spec.bootstrap_secret_ref.as_ref() else {
        return Ok(());
    };
    if get_typed::<Secret>(store, Some(&bootstrap.namespace), &bootstrap.name)
        .await?
        .is_none()
    {
        return Ok(());
    }
    delete_typed::<Secret>(store, Some(&bootstrap.namespace), &bootstrap.name).await?;
    info!(
        control_plane = %cp.name_any(),
        secret = %format!("{}/{}", bootstrap.namespace, bootstrap.name),
        "Deleted bootstrap secret"
    );
    Ok(())
}

/// Create the adopted identity on the remote cluster and request a token for it.
///
/// Objects on the adopted cluster carry no owner reference; the owner lives on
/// a different cluster.
async fn mint_admin_token(remote: &dyn ClusterStore, cp_name: &str, expiration: i64) -> Result<String> {
    let ns = ADOPTED_SERVICE_ACCOUNT_NAMESPACE;
    ensure::<ServiceAccount, _>(remote, Some(ns), ADOPTED_SERVICE_ACCOUNT, || {
        Ok(ServiceAccount {
            metadata: ObjectMeta {
                name: Some(ADOPTED_SERVICE_ACCOUNT.to_string()),
                namespace: Some(ns.to_string()),
                labels: Some(build_labels(cp_name, ADOPTED_SERVICE_ACCOUNT)),
                ..Default::default()
            },
            ..Default::default()
        })
    })
    .await?;

    ensure::<ClusterRoleBinding, _>(remote, None, ADOPTED_SERVICE_ACCOUNT, || {
        Ok(build_cluster_role_binding(
            None,
            ADOPTED_SERVICE_ACCOUNT,
            CLUSTER_ADMIN_ROLE,
            ADOPTED_SERVICE_ACCOUNT,
            ns,
        ))
    })
    .await?;

    let request = json!({
        "apiVersion": "authentication.k8s.io/v1",
        "kind": "TokenRequest",
        "spec": { "expirationSeconds": expiration },
    });
    let response = remote
        .create_subresource(
            &api_resource::<ServiceAccount>(),
            Some(ns),
            ADOPTED_SERVICE_ACCOUNT,
            "token",
            &request,
        )
        .await?;
    response["status"]["token"]
        .as_str()
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .ok_or_else(|| {
            Error::InvalidObject(format!(
                "token request for {ns}/{ADOPTED_SERVICE_ACCOUNT} returned no token"
            ))
        })
}

#[cfg(test)]
#[path = "external_tests.rs"]
mod external_tests;
