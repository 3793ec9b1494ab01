// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! `k3s` control planes: a k3s server running as a StatefulSet.
//!
//! k3s generates its own PKI and kubeconfig inside the server pod. The
//! bootstrap Job execs into the pod, rewrites the server address and writes the
//! kubeconfig and join token into the `k3s-config` secret, which the operator
//! creates empty beforehand so the Job only needs `patch` on secrets.

use crate::constants::{
    K3S_BOOTSTRAP_NAME, K3S_KUBECONFIG_KEY, K3S_KUBECONFIG_KEY_IN_CLUSTER, K3S_KUBECONFIG_SECRET,
    K3S_PORT, K3S_SCRIPTS_CONFIG_MAP, K3S_SERVER_NAME,
};
use crate::context::Context;
use crate::crd::{ControlPlane, SecretReference};
use crate::errors::Result;
use crate::reconcilers::base::{
    ensure, ensure_exposure, ensure_namespace, secret_value, statefulset_ready,
    ControlPlaneProvisioner, Provisioned,
};
use crate::resources::{
    build_k3s_bootstrap_job, build_k3s_scripts_config_map, build_k3s_statefulset, build_role,
    build_role_binding, build_secret, build_service, build_service_account, k3s_bootstrap_rules,
};
use async_trait::async_trait;
use k8s_openapi::api::apps::v1::StatefulSet;
use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::{ConfigMap, Secret, Service, ServiceAccount};
use k8s_openapi::api::rbac::v1::{Role, RoleBinding};
use std::collections::BTreeMap;

/// Provisioner of `k3s` control planes.
#[derive(Clone, Copy, Debug, Default)]
pub struct K3sProvisioner;

#[async_trait]
impl ControlPlaneProvisioner for K3sProvisioner {
    async fn provision(&self, ctx: &Context, cp: &ControlPlane) -> Result<Provisioned> {
        let store = ctx.store.as_ref();
        let config = &ctx.config;
        let namespace = ensure_namespace(store, cp).await?;
        let ns = namespace.as_str();

        ensure::<StatefulSet, _>(store, Some(ns), K3S_SERVER_NAME, || {
            Ok(build_k3s_statefulset(cp, ns, config))
        })
        .await?;

        ensure::<Service, _>(store, Some(ns), K3S_SERVER_NAME, || {
            Ok(build_service(cp, K3S_SERVER_NAME, ns, K3S_SERVER_NAME, K3S_PORT, true))
        })
        .await?;

        ensure_exposure(ctx, cp, ns, K3S_SERVER_NAME, K3S_PORT).await?;

        ensure::<Secret, _>(store, Some(ns), K3S_KUBECONFIG_SECRET, || {
            Ok(build_secret(
                cp,
                K3S_KUBECONFIG_SECRET,
                ns,
                K3S_SERVER_NAME,
                BTreeMap::new(),
            ))
        })
        .await?;

        ensure::<ConfigMap, _>(store, Some(ns), K3S_SCRIPTS_CONFIG_MAP, || {
            Ok(build_k3s_scripts_config_map(cp, ns))
        })
        .await?;

        ensure::<ServiceAccount, _>(store, Some(ns), K3S_BOOTSTRAP_NAME, || {
            Ok(build_service_account(cp, K3S_BOOTSTRAP_NAME, ns))
        })
        .await?;
        ensure::<Role, _>(store, Some(ns), K3S_BOOTSTRAP_NAME, || {
            Ok(build_role(cp, K3S_BOOTSTRAP_NAME, ns, k3s_bootstrap_rules()))
        })
        .await?;
        ensure::<RoleBinding, _>(store, Some(ns), K3S_BOOTSTRAP_NAME, || {
            Ok(build_role_binding(
                cp,
                K3S_BOOTSTRAP_NAME,
                ns,
                K3S_BOOTSTRAP_NAME,
                K3S_BOOTSTRAP_NAME,
            ))
        })
        .await?;

        ensure::<Job, _>(store, Some(ns), K3S_BOOTSTRAP_NAME, || {
            Ok(build_k3s_bootstrap_job(cp, ns, config))
        })
        .await?;

        let has_kubeconfig = secret_value(store, ns, K3S_KUBECONFIG_SECRET, K3S_KUBECONFIG_KEY)
            .await?
            .is_some();
        Ok(Provisioned {
            secret_ref: SecretReference {
                name: K3S_KUBECONFIG_SECRET.to_string(),
                namespace: namespace.clone(),
                key: K3S_KUBECONFIG_KEY.to_string(),
                in_cluster_key: K3S_KUBECONFIG_KEY_IN_CLUSTER.to_string(),
            },
            ready: has_kubeconfig && statefulset_ready(store, ns, K3S_SERVER_NAME).await?,
        })
    }
}

#[cfg(test)]
#[path = "k3s_tests.rs"]
mod k3s_tests;
