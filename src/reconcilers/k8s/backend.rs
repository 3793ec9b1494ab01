// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Postgres backend of a `k8s` control plane.
//!
//! - `shared`: kine connects to the operator-wide Postgres instance. Its
//!   password is copied from the system namespace into the control plane
//!   namespace, where the API server pod can reference it.
//! - `dedicated`: a Postgres chart is installed into the control plane namespace.
//!
//! Either way each control plane gets its own logical database, named after the
//! control plane.

use crate::constants::{
    DEDICATED_POSTGRES_PORT, DEDICATED_POSTGRES_RELEASE, DEDICATED_POSTGRES_SERVICE,
    DEDICATED_POSTGRES_USER, POSTGRES_CREDENTIALS_SECRET, POSTGRES_PASSWORD_KEY,
};
use crate::context::Context;
use crate::crd::{BackendDbType, ControlPlane};
use crate::errors::Result;
use crate::helm::HelmRelease;
use crate::naming;
use crate::reconcilers::base::{ensure, required_secret_value};
use crate::resources::{build_secret, PostgresTarget};
use crate::store::api_resource;
use k8s_openapi::api::core::v1::Secret;
use kube::ResourceExt;
use std::collections::BTreeMap;
use tracing::debug;

/// Provision the backend of `cp` and return where kine should connect.
///
/// # Errors
///
/// Returns an error if the shared password secret is missing, or on API and Helm failures.
pub async fn ensure_backend(
    ctx: &Context,
    cp: &ControlPlane,
    namespace: &str,
) -> Result<PostgresTarget> {
    let database = naming::db_name(&cp.name_any());
    match cp.spec.backend.unwrap_or_default() {
        BackendDbType::Shared => {
            ensure_shared_credentials(ctx, cp, namespace).await?;
            Ok(PostgresTarget {
                host: ctx.config.postgres_host.clone(),
                port: ctx.config.postgres_port,
                user: ctx.config.postgres_user.clone(),
                password_secret: POSTGRES_CREDENTIALS_SECRET.to_string(),
                database,
            })
        }
        BackendDbType::Dedicated => {
            ctx.charts
                .ensure_release(&HelmRelease {
                    name: DEDICATED_POSTGRES_RELEASE.to_string(),
                    namespace: namespace.to_string(),
                    chart: ctx.config.postgres_chart_ref(),
                    values: vec![("auth.database".to_string(), database.clone())],
                })
                .await?;
            Ok(PostgresTarget {
                host: naming::service_dns(DEDICATED_POSTGRES_SERVICE, namespace),
                port: DEDICATED_POSTGRES_PORT,
                user: DEDICATED_POSTGRES_USER.to_string(),
                password_secret: DEDICATED_POSTGRES_SERVICE.to_string(),
                database,
            })
        }
    }
}

async fn ensure_shared_credentials(ctx: &Context, cp: &ControlPlane, namespace: &str) -> Result<()> {
    let store = ctx.store.as_ref();
    if store
        .get(&api_resource::<Secret>(), Some(namespace), POSTGRES_CREDENTIALS_SECRET)
        .await?
        .is_some()
    {
        return Ok(());
    }

    debug!(
        source = %ctx.config.postgres_secret,
        namespace = %ctx.config.system_namespace,
        "Copying shared Postgres credentials"
    );
    let password = required_secret_value(
        store,
        &ctx.config.system_namespace,
        &ctx.config.postgres_secret,
        POSTGRES_PASSWORD_KEY,
    )
    .await?;
    let data = BTreeMap::from([(
        POSTGRES_PASSWORD_KEY.to_string(),
        String::from_utf8_lossy(&password).into_owned(),
    )]);
    ensure::<Secret, _>(store, Some(namespace), POSTGRES_CREDENTIALS_SECRET, || {
        Ok(build_secret(
            cp,
            POSTGRES_CREDENTIALS_SECRET,
            namespace,
            POSTGRES_CREDENTIALS_SECRET,
            data,
        ))
    })
    .await?;
    Ok(())
}

#[cfg(test)]
#[path = "backend_tests.rs"]
mod backend_tests;
