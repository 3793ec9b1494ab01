// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! `k8s` control planes: an embedded `kube-apiserver` backed by kine.
//!
//! ## Module Structure
//!
//! - [`backend`] - Postgres wiring for the kine sidecar
//! - [`secrets`] - Certificate bundle and kubeconfig secrets

pub mod backend;
pub mod secrets;

use crate::constants::{
    ADMIN_KUBECONFIG_SECRET, APISERVER_NAME, APISERVER_SECURE_PORT, CONTROLLER_MANAGER_NAME,
    KUBECONFIG_KEY_DEFAULT, KUBECONFIG_KEY_IN_CLUSTER,
};
use crate::context::Context;
use crate::crd::{ControlPlane, SecretReference};
use crate::errors::Result;
use crate::reconcilers::base::{
    deployment_ready, ensure, ensure_exposure, ensure_namespace, ControlPlaneProvisioner,
    Provisioned,
};
use crate::resources::{
    build_apiserver_deployment, build_controller_manager_deployment, build_service,
};
use async_trait::async_trait;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::Service;
use kube::ResourceExt;
use tracing::debug;

/// Provisioner of `k8s` control planes.
///
/// Pipeline: Namespace, PKI and kubeconfig secrets, backend, API server
/// Deployment, Service, exposure, controller manager Deployment.
#[derive(Clone, Copy, Debug, Default)]
pub struct K8sProvisioner;

#[async_trait]
impl ControlPlaneProvisioner for K8sProvisioner {
    async fn provision(&self, ctx: &Context, cp: &ControlPlane) -> Result<Provisioned> {
        let store = ctx.store.as_ref();
        let config = &ctx.config;

        let namespace = ensure_namespace(store, cp).await?;
        let ns = namespace.as_str();

        if secrets::ensure_pki_secrets(store, cp, ns, config).await?.is_some() {
            debug!(control_plane = %cp.name_any(), "PKI generated on this pass");
        }

        let postgres = backend::ensure_backend(ctx, cp, ns).await?;

        ensure::<Deployment, _>(store, Some(ns), APISERVER_NAME, || {
            Ok(build_apiserver_deployment(cp, ns, config, &postgres))
        })
        .await?;

        ensure::<Service, _>(store, Some(ns), APISERVER_NAME, || {
            Ok(build_service(
                cp,
                APISERVER_NAME,
                ns,
                APISERVER_NAME,
                APISERVER_SECURE_PORT,
                false,
            ))
        })
        .await?;

        ensure_exposure(ctx, cp, ns, APISERVER_NAME, APISERVER_SECURE_PORT).await?;

        ensure::<Deployment, _>(store, Some(ns), CONTROLLER_MANAGER_NAME, || {
            Ok(build_controller_manager_deployment(cp, ns, config))
        })
        .await?;

        Ok(Provisioned {
            secret_ref: SecretReference {
                name: ADMIN_KUBECONFIG_SECRET.to_string(),
                namespace: namespace.clone(),
                key: KUBECONFIG_KEY_DEFAULT.to_string(),
                in_cluster_key: KUBECONFIG_KEY_IN_CLUSTER.to_string(),
            },
            ready: deployment_ready(store, ns, APISERVER_NAME).await?,
        })
    }
}
