// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! PKI and kubeconfig secrets of a `k8s` control plane.
//!
//! The certificate bundle is generated once. Its secret is written last: the
//! kubeconfig secrets are derived from the in-memory bundle first, so the
//! existence of `k8s-certs` means all three secrets are consistent. A pass that
//! fails in between regenerates everything and overwrites the leftovers.

use crate::config::OperatorConfig;
use crate::constants::{
    ADMIN_KUBECONFIG_SECRET, CERTS_SECRET_NAME, CM_KUBECONFIG_SECRET,
};
use crate::crd::ControlPlane;
use crate::errors::Result;
use crate::kubeconfig::{ConfigGen, KubeconfigTarget};
use crate::naming;
use crate::pki::Certs;
use crate::reconcilers::base::{create_or_replace, ensure};
use crate::resources::build_secret;
use crate::store::{api_resource, ClusterStore};
use k8s_openapi::api::core::v1::Secret;
use kube::ResourceExt;
use std::collections::BTreeMap;
use tracing::{debug, info};

/// Ensure the certificate bundle and both kubeconfig secrets exist.
///
/// Returns the freshly generated bundle, or `None` when it already existed.
///
/// # Errors
///
/// Returns certificate generation errors and API errors.
pub async fn ensure_pki_secrets(
    store: &dyn ClusterStore,
    cp: &ControlPlane,
    namespace: &str,
    config: &OperatorConfig,
) -> Result<Option<Certs>> {
    if store
        .get(&api_resource::<Secret>(), Some(namespace), CERTS_SECRET_NAME)
        .await?
        .is_some()
    {
        debug!(namespace = %namespace, "Certificates already generated");
        return Ok(None);
    }

    let cp_name = cp.name_any();
    info!(control_plane = %cp_name, "Generating certificates");
    let certs = Certs::generate(&naming::apiserver_extra_dns_names(&cp_name, &config.domain))?;
    let gen = ConfigGen::new(&cp_name, &config.domain, config.external_port);

    let admin = build_secret(
        cp,
        ADMIN_KUBECONFIG_SECRET,
        namespace,
        ADMIN_KUBECONFIG_SECRET,
        gen.admin_secret_data(&certs)?,
    );
    create_or_replace(store, Some(namespace), &admin).await?;

    let target = KubeconfigTarget::ControllerManager;
    let cm = build_secret(
        cp,
        CM_KUBECONFIG_SECRET,
        namespace,
        CM_KUBECONFIG_SECRET,
        BTreeMap::from([(
            target.secret_key().to_string(),
            gen.generate(&certs, target)?,
        )]),
    );
    create_or_replace(store, Some(namespace), &cm).await?;

    let data = certs.secret_data();
    ensure::<Secret, _>(store, Some(namespace), CERTS_SECRET_NAME, || {
        Ok(build_secret(cp, CERTS_SECRET_NAME, namespace, CERTS_SECRET_NAME, data))
    })
    .await?;
    Ok(Some(certs))
}

#[cfg(test)]
#[path = "secrets_tests.rs"]
mod secrets_tests;
