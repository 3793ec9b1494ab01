// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! `vcluster` control planes, installed from the vcluster Helm chart.
//!
//! The chart creates the `vcluster` StatefulSet and the `vc-vcluster`
//! kubeconfig secret. Helm does not know about the control plane, so the
//! StatefulSet gets the control plane owner reference backfilled once it
//! appears, and the kubeconfig secret gets an in-cluster variant.

use crate::config::OperatorConfig;
use crate::constants::{
    VCLUSTER_KUBECONFIG_KEY, VCLUSTER_KUBECONFIG_KEY_IN_CLUSTER, VCLUSTER_KUBECONFIG_SECRET,
    VCLUSTER_NAME, VCLUSTER_PORT,
};
use crate::context::Context;
use crate::crd::{ControlPlane, SecretReference};
use crate::errors::Result;
use crate::helm::HelmRelease;
use crate::naming;
use crate::reconcilers::base::{
    ensure_exposure, ensure_in_cluster_kubeconfig, ensure_namespace, statefulset_ready,
    ControlPlaneProvisioner, Provisioned,
};
use crate::resources::build_owner_references;
use crate::store::{get_typed, replace_typed, ClusterStore};
use async_trait::async_trait;
use k8s_openapi::api::apps::v1::StatefulSet;
use kube::ResourceExt;
use tracing::{debug, info};

/// Provisioner of `vcluster` control planes.
#[derive(Clone, Copy, Debug, Default)]
pub struct VclusterProvisioner;

#[async_trait]
impl ControlPlaneProvisioner for VclusterProvisioner {
    async fn provision(&self, ctx: &Context, cp: &ControlPlane) -> Result<Provisioned> {
        let store = ctx.store.as_ref();
        let namespace = ensure_namespace(store, cp).await?;
        let ns = namespace.as_str();

        ctx.charts
            .ensure_release(&HelmRelease {
                name: VCLUSTER_NAME.to_string(),
                namespace: namespace.clone(),
                chart: ctx.config.vcluster_chart_ref(),
                values: chart_values(&cp.name_any(), ns, &ctx.config),
            })
            .await?;

        ensure_exposure(ctx, cp, ns, VCLUSTER_NAME, VCLUSTER_PORT).await?;

        backfill_owner_reference(store, cp, ns).await?;

        let in_cluster_server = format!(
            "https://{}:{VCLUSTER_PORT}",
            naming::service_dns(VCLUSTER_NAME, ns)
        );
        let has_kubeconfig = ensure_in_cluster_kubeconfig(
            store,
            ns,
            VCLUSTER_KUBECONFIG_SECRET,
            VCLUSTER_KUBECONFIG_KEY,
            VCLUSTER_KUBECONFIG_KEY_IN_CLUSTER,
            &in_cluster_server,
        )
        .await?;

        Ok(Provisioned {
            secret_ref: SecretReference {
                name: VCLUSTER_KUBECONFIG_SECRET.to_string(),
                namespace: namespace.clone(),
                key: VCLUSTER_KUBECONFIG_KEY.to_string(),
                in_cluster_key: VCLUSTER_KUBECONFIG_KEY_IN_CLUSTER.to_string(),
            },
            ready: has_kubeconfig && statefulset_ready(store, ns, VCLUSTER_NAME).await?,
        })
    }
}

/// Chart values of one control plane.
///
/// The syncer certificate must be valid for the external host and the in-cluster
/// Service, and the kubeconfig it writes must point at the external URL.
#[must_use]
pub fn chart_values(cp_name: &str, namespace: &str, config: &OperatorConfig) -> Vec<(String, String)> {
    let args = [
        format!("--tls-san={}", naming::external_host(cp_name, &config.domain)),
        format!(
            "--out-kube-config-server={}",
            naming::external_url(cp_name, &config.domain, config.external_port)
        ),
        format!("--tls-san={}", naming::service_dns(VCLUSTER_NAME, namespace)),
    ];
    let mut values: Vec<(String, String)> = args
        .into_iter()
        .enumerate()
        .map(|(i, arg)| (format!("syncer.extraArgs[{i}]"), arg))
        .collect();
    if config.is_openshift {
        values.push(("openshift.enable".to_string(), "true".to_string()));
        values.push(("securityContext.runAsUser".to_string(), "null".to_string()));
        values.push(("securityContext.runAsGroup".to_string(), "null".to_string()));
    }
    values
}

/// Add the control plane owner reference to the chart's StatefulSet.
///
/// Without it, deleting the control plane would leave the StatefulSet behind
/// until the namespace itself is collected.
async fn backfill_owner_reference(store: &dyn ClusterStore, cp: &ControlPlane, namespace: &str) -> Result<()> {
    let Some(mut sts) = get_typed::<StatefulSet>(store, Some(namespace), VCLUSTER_NAME).await? else {
        debug!(namespace = %namespace, "vcluster StatefulSet not created yet");
        return Ok(());
    };
    let uid = cp.metadata.uid.clone().unwrap_or_default();
    let owners = sts.metadata.owner_references.get_or_insert_with(Vec::new);
    if owners.iter().any(|o| o.uid == uid) {
        return Ok(());
    }
    owners.extend(build_owner_references(cp));
    replace_typed(store, Some(namespace), &sts).await?;
    info!(namespace = %namespace, control_plane = %cp.name_any(), "Backfilled owner reference on vcluster StatefulSet");
    Ok(())
}

#[cfg(test)]
#[path = "vcluster_tests.rs"]
mod vcluster_tests;
