// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! `ocm` control planes: the Open Cluster Management multicluster control plane.
//!
//! The chart bakes the hosting cluster's internal address into the
//! `cluster-info` ConfigMap of the new control plane. A short-lived `cmupdate`
//! Job rewrites it with the external URL once the API server is ready.

use crate::config::OperatorConfig;
use crate::constants::{
    CMUPDATE_NAME, OCM_APISERVER_NAME, OCM_APISERVER_PORT, OCM_KUBECONFIG_KEY,
    OCM_KUBECONFIG_KEY_IN_CLUSTER, OCM_KUBECONFIG_SECRET,
};
use crate::context::Context;
use crate::crd::{ControlPlane, SecretReference};
use crate::errors::Result;
use crate::helm::HelmRelease;
use crate::naming;
use crate::reconcilers::base::{
    deployment_ready, ensure, ensure_exposure, ensure_in_cluster_kubeconfig, ensure_namespace,
    ControlPlaneProvisioner, Provisioned,
};
use crate::resources::{
    build_cluster_info_update_job, build_role, build_role_binding, build_service,
    build_service_account, cmupdate_rules, ClusterInfoUpdate,
};
use async_trait::async_trait;
use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::{Service, ServiceAccount};
use k8s_openapi::api::rbac::v1::{Role, RoleBinding};
use kube::ResourceExt;

/// Values every release starts from.
const BASE_CHART_VALUES: &[(&str, &str)] = &[
    ("enableSelfManagement", "false"),
    ("route.enabled", "false"),
    ("nodeport.enabled", "false"),
];

/// Provisioner of `ocm` control planes.
#[derive(Clone, Copy, Debug, Default)]
pub struct OcmProvisioner;

#[async_trait]
impl ControlPlaneProvisioner for OcmProvisioner {
    async fn provision(&self, ctx: &Context, cp: &ControlPlane) -> Result<Provisioned> {
        let store = ctx.store.as_ref();
        let config = &ctx.config;
        let cp_name = cp.name_any();
        let namespace = ensure_namespace(store, cp).await?;
        let ns = namespace.as_str();

        ctx.charts
            .ensure_release(&HelmRelease {
                name: OCM_APISERVER_NAME.to_string(),
                namespace: namespace.clone(),
                chart: config.ocm_chart_ref(),
                values: chart_values(&cp_name, config),
            })
            .await?;

        ensure::<Service, _>(store, Some(ns), OCM_APISERVER_NAME, || {
            Ok(build_service(
                cp,
                OCM_APISERVER_NAME,
                ns,
                OCM_APISERVER_NAME,
                OCM_APISERVER_PORT,
                false,
            ))
        })
        .await?;

        ensure_exposure(ctx, cp, ns, OCM_APISERVER_NAME, OCM_APISERVER_PORT).await?;

        ensure::<ServiceAccount, _>(store, Some(ns), CMUPDATE_NAME, || {
            Ok(build_service_account(cp, CMUPDATE_NAME, ns))
        })
        .await?;
        ensure::<Role, _>(store, Some(ns), CMUPDATE_NAME, || {
            Ok(build_role(cp, CMUPDATE_NAME, ns, cmupdate_rules()))
        })
        .await?;
        ensure::<RoleBinding, _>(store, Some(ns), CMUPDATE_NAME, || {
            Ok(build_role_binding(cp, CMUPDATE_NAME, ns, CMUPDATE_NAME, CMUPDATE_NAME))
        })
        .await?;

        let external_url = naming::external_url(&cp_name, &config.domain, config.external_port);
        ensure::<Job, _>(store, Some(ns), CMUPDATE_NAME, || {
            Ok(build_cluster_info_update_job(
                cp,
                ns,
                config,
                &ClusterInfoUpdate {
                    name: CMUPDATE_NAME,
                    kubeconfig_secret: OCM_KUBECONFIG_SECRET,
                    kubeconfig_key: OCM_KUBECONFIG_KEY,
                    host_container: OCM_APISERVER_NAME,
                    external_url: &external_url,
                },
            ))
        })
        .await?;

        let in_cluster_server = format!(
            "https://{}:{OCM_APISERVER_PORT}",
            naming::service_dns(OCM_APISERVER_NAME, ns)
        );
        let has_kubeconfig = ensure_in_cluster_kubeconfig(
            store,
            ns,
            OCM_KUBECONFIG_SECRET,
            OCM_KUBECONFIG_KEY,
            OCM_KUBECONFIG_KEY_IN_CLUSTER,
            &in_cluster_server,
        )
        .await?;

        Ok(Provisioned {
            secret_ref: SecretReference {
                name: OCM_KUBECONFIG_SECRET.to_string(),
                namespace: namespace.clone(),
                key: OCM_KUBECONFIG_KEY.to_string(),
                in_cluster_key: OCM_KUBECONFIG_KEY_IN_CLUSTER.to_string(),
            },
            ready: has_kubeconfig && deployment_ready(store, ns, OCM_APISERVER_NAME).await?,
        })
    }
}

/// Chart values of one control plane, built fresh from [`BASE_CHART_VALUES`] on every call.
#[must_use]
pub fn chart_values(cp_name: &str, config: &OperatorConfig) -> Vec<(String, String)> {
    let mut values: Vec<(String, String)> = BASE_CHART_VALUES
        .iter()
        .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
        .collect();
    values.push((
        "apiserver.externalHostname".to_string(),
        naming::external_host(cp_name, &config.domain),
    ));
    values.push((
        "apiserver.externalPort".to_string(),
        config.external_port.to_string(),
    ));
    values
}

#[cfg(test)]
#[path = "ocm_tests.rs"]
mod ocm_tests;
