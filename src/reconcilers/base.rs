// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Idempotent sub-resource primitives shared by every control plane type.
//!
//! Every primitive follows the same idiom:
//!
//! 1. **Get** the expected object by name and namespace
//! 2. If it is missing, **build** the desired object and **Create** it
//! 3. Any other error is returned to the caller
//!
//! Existing objects are left untouched: sub-resources are created once and not
//! reconciled against drift. The builder only runs when a create is needed, so
//! expensive inputs (certificates, remote reads) are produced lazily.
//!
//! A create that loses a race with another writer (`AlreadyExists`) counts as
//! "already there".

use crate::config::Exposure;
use crate::context::Context;
use crate::crd::{ControlPlane, SecretReference};
use crate::errors::{Error, Result};
use crate::kubeconfig;
use crate::metrics;
use crate::naming;
use crate::resources::{
    build_gateway, build_gateway_class, build_http_route, build_ingress, build_namespace,
    build_route, gateway_api_resource, gateway_class_api_resource, http_route_api_resource,
    route_api_resource,
};
use crate::store::{api_resource, from_dynamic, get_typed, to_dynamic, ClusterStore};
use async_trait::async_trait;
use k8s_openapi::api::apps::v1::{Deployment, StatefulSet};
use k8s_openapi::api::core::v1::{Namespace, Secret};
use k8s_openapi::api::networking::v1::Ingress;
use k8s_openapi::ByteString;
use kube::api::{ApiResource, DynamicObject};
use kube::{Resource, ResourceExt};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, info};

/// Result of an ensure call.
#[derive(Clone, Debug)]
pub enum Ensured<K> {
    /// The object did not exist and was created by this call
    Created(K),
    /// The object already existed and was left untouched
    Existing(K),
}

impl<K> Ensured<K> {
    #[must_use]
    pub fn into_inner(self) -> K {
        match self {
            Self::Created(obj) | Self::Existing(obj) => obj,
        }
    }

    #[must_use]
    pub fn is_created(&self) -> bool {
        matches!(self, Self::Created(_))
    }

    fn try_map<U>(self, f: impl FnOnce(K) -> Result<U>) -> Result<Ensured<U>> {
        Ok(match self {
            Self::Created(obj) => Ensured::Created(f(obj)?),
            Self::Existing(obj) => Ensured::Existing(f(obj)?),
        })
    }
}

/// Outcome of one run of a type pipeline.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Provisioned {
    /// Where the control plane's kubeconfig lives
    pub secret_ref: SecretReference,
    /// Whether the primary workload reports ready
    pub ready: bool,
}

/// One control plane strategy (`k8s`, `external`, ...).
///
/// Implementations run a fixed, ordered pipeline of ensure steps. The first
/// failing step aborts the pipeline; every step must be safe to re-run.
#[async_trait]
pub trait ControlPlaneProvisioner: Send + Sync {
    /// Drive the sub-resources of `cp` one step closer to the desired state.
    async fn provision(&self, ctx: &Context, cp: &ControlPlane) -> Result<Provisioned>;
}

/// Ensure an untyped object exists.
///
/// # Arguments
///
/// * `store` - Cluster holding the object
/// * `ar` - Resource of the object
/// * `namespace` - Namespace, `None` for cluster-scoped objects
/// * `name` - Object name
/// * `build` - Builds the desired object; only called when a create is needed
///
/// # Errors
///
/// Returns builder errors and API errors other than `NotFound` and `AlreadyExists`.
pub async fn ensure_dynamic<F>(
    store: &dyn ClusterStore,
    ar: &ApiResource,
    namespace: Option<&str>,
    name: &str,
    build: F,
) -> Result<Ensured<DynamicObject>>
where
    F: FnOnce() -> Result<DynamicObject> + Send,
{
    if let Some(existing) = store.get(ar, namespace, name).await? {
        debug!(kind = %ar.kind, namespace = ?namespace, name = %name, "Already exists");
        return Ok(Ensured::Existing(existing));
    }

    let desired = build()?;
    match store.create(ar, namespace, &desired).await {
        Ok(created) => {
            info!(kind = %ar.kind, namespace = ?namespace, name = %name, "Created");
            metrics::record_resource_created(&ar.kind);
            Ok(Ensured::Created(created))
        }
        Err(e) if e.is_already_exists() => {
            debug!(kind = %ar.kind, name = %name, "Created concurrently by another writer");
            store
                .get(ar, namespace, name)
                .await?
                .map(Ensured::Existing)
                .ok_or(e)
        }
        Err(e) => Err(e),
    }
}

/// Ensure a typed object exists. See [`ensure_dynamic`].
///
/// # Errors
///
/// Returns builder errors and API errors other than `NotFound` and `AlreadyExists`.
pub async fn ensure<K, F>(
    store: &dyn ClusterStore,
    namespace: Option<&str>,
    name: &str,
    build: F,
) -> Result<Ensured<K>>
where
    K: Resource<DynamicType = ()> + Serialize + DeserializeOwned + Send,
    F: FnOnce() -> Result<K> + Send,
{
    let ensured = ensure_dynamic(store, &api_resource::<K>(), namespace, name, || {
        to_dynamic(&build()?)
    })
    .await?;
    ensured.try_map(from_dynamic)
}

/// Create `obj`, or replace the existing object of the same name.
///
/// Used where a leftover of an aborted pass must be overwritten.
///
/// # Errors
///
/// Returns API errors, including `Conflict` if the object changed between get and replace.
pub async fn create_or_replace<K>(store: &dyn ClusterStore, namespace: Option<&str>, obj: &K) -> Result<()>
where
    K: Resource<DynamicType = ()> + Serialize + DeserializeOwned + Send + Sync,
{
    let ar = api_resource::<K>();
    let name = obj.meta().name.clone().unwrap_or_default();
    let mut desired = to_dynamic(obj)?;
    match store.get(&ar, namespace, &name).await? {
        Some(existing) => {
            desired.metadata.resource_version = existing.metadata.resource_version;
            info!(kind = %ar.kind, namespace = ?namespace, name = %name, "Replacing");
            store.replace(&ar, namespace, &desired).await?;
        }
        None => {
            info!(kind = %ar.kind, namespace = ?namespace, name = %name, "Creating");
            store.create(&ar, namespace, &desired).await?;
            metrics::record_resource_created(&ar.kind);
        }
    }
    Ok(())
}

/// Ensure the `<cp>-system` namespace exists. Returns its name.
///
/// # Errors
///
/// Returns API errors.
pub async fn ensure_namespace(store: &dyn ClusterStore, cp: &ControlPlane) -> Result<String> {
    let namespace = naming::namespace_for(&cp.name_any());
    ensure::<Namespace, _>(store, None, &namespace, || Ok(build_namespace(cp))).await?;
    Ok(namespace)
}

/// Expose `service:port` outside the hosting cluster at `<cp>.<domain>`.
///
/// The mechanism follows the configured exposure mode. In gateway mode the
/// shared `GatewayClass` and `Gateway` are bootstrapped first.
///
/// # Errors
///
/// Returns API errors.
pub async fn ensure_exposure(
    ctx: &Context,
    cp: &ControlPlane,
    namespace: &str,
    service: &str,
    port: i32,
) -> Result<()> {
    let store = ctx.store.as_ref();
    let host = naming::external_host(&cp.name_any(), &ctx.config.domain);
    match ctx.config.effective_exposure() {
        Exposure::Ingress => {
            ensure::<Ingress, _>(store, Some(namespace), service, || {
                Ok(build_ingress(
                    cp,
                    namespace,
                    service,
                    port,
                    &host,
                    &ctx.config.ingress_class,
                ))
            })
            .await?;
        }
        Exposure::Route => {
            ensure_dynamic(store, &route_api_resource(), Some(namespace), service, || {
                Ok(build_route(cp, namespace, service, port, &host))
            })
            .await?;
        }
        Exposure::Gateway => {
            ensure_gateway(ctx).await?;
            let gateway_namespace = ctx.config.system_namespace.as_str();
            ensure_dynamic(
                store,
                &http_route_api_resource(),
                Some(namespace),
                service,
                || {
                    Ok(build_http_route(
                        cp,
                        namespace,
                        service,
                        port,
                        &host,
                        gateway_namespace,
                    ))
                },
            )
            .await?;
        }
    }
    Ok(())
}

/// One-time bootstrap of the cluster-wide `GatewayClass` and the shared `Gateway`.
async fn ensure_gateway(ctx: &Context) -> Result<()> {
    let store = ctx.store.as_ref();
    let class = build_gateway_class();
    let class_name = class.name_any();
    ensure_dynamic(store, &gateway_class_api_resource(), None, &class_name, || Ok(class)).await?;

    let namespace = ctx.config.system_namespace.as_str();
    let gateway = build_gateway(namespace, &ctx.config.domain, ctx.config.external_port);
    let gateway_name = gateway.name_any();
    ensure_dynamic(
        store,
        &gateway_api_resource(),
        Some(namespace),
        &gateway_name,
        || Ok(gateway),
    )
    .await?;
    Ok(())
}

// ============================================================================
// Observation helpers
// ============================================================================

/// Value of `key` in a secret, `None` if the secret or the key is missing or empty.
///
/// # Errors
///
/// Returns API errors.
pub async fn secret_value(
    store: &dyn ClusterStore,
    namespace: &str,
    name: &str,
    key: &str,
) -> Result<Option<Vec<u8>>> {
    let secret: Option<Secret> = get_typed(store, Some(namespace), name).await?;
    Ok(secret
        .and_then(|s| s.data)
        .and_then(|mut data| data.remove(key))
        .map(|ByteString(bytes)| bytes)
        .filter(|bytes| !bytes.is_empty()))
}

/// Value of `key` in a secret that must exist.
///
/// # Errors
///
/// Returns [`Error::SecretNotFound`] or [`Error::MissingSecretKey`].
pub async fn required_secret_value(
    store: &dyn ClusterStore,
    namespace: &str,
    name: &str,
    key: &str,
) -> Result<Vec<u8>> {
    let secret: Secret = get_typed(store, Some(namespace), name)
        .await?
        .ok_or_else(|| Error::SecretNotFound {
            namespace: namespace.to_string(),
            name: name.to_string(),
        })?;
    secret
        .data
        .and_then(|mut data| data.remove(key))
        .map(|ByteString(bytes)| bytes)
        .filter(|bytes| !bytes.is_empty())
        .ok_or_else(|| Error::MissingSecretKey {
            namespace: namespace.to_string(),
            name: name.to_string(),
            key: key.to_string(),
        })
}

/// Add an in-cluster variant of a kubeconfig to the secret that holds it.
///
/// Copies `key` to `in_cluster_key` with every cluster server replaced by
/// `server`. Returns whether the secret holds a kubeconfig under `key`; the
/// secret is typically written by a chart or job and may not exist yet.
///
/// # Errors
///
/// Returns API errors, or an error if the stored kubeconfig cannot be rewritten.
pub async fn ensure_in_cluster_kubeconfig(
    store: &dyn ClusterStore,
    namespace: &str,
    secret_name: &str,
    key: &str,
    in_cluster_key: &str,
    server: &str,
) -> Result<bool> {
    let Some(mut secret) = get_typed::<Secret>(store, Some(namespace), secret_name).await? else {
        debug!(secret = %secret_name, "Kubeconfig secret not created yet");
        return Ok(false);
    };
    let data = secret.data.get_or_insert_with(Default::default);
    let Some(ByteString(kubeconfig)) = data.get(key).filter(|v| !v.0.is_empty()).cloned() else {
        return Ok(false);
    };
    if data.get(in_cluster_key).is_some_and(|v| !v.0.is_empty()) {
        return Ok(true);
    }

    let yaml = String::from_utf8(kubeconfig)
        .map_err(|e| Error::Kubeconfig(format!("{namespace}/{secret_name}: {e}")))?;
    let rewritten = kubeconfig::rewrite_server(&yaml, server)?;
    data.insert(in_cluster_key.to_string(), ByteString(rewritten.into_bytes()));
    store
        .replace(&api_resource::<Secret>(), Some(namespace), &to_dynamic(&secret)?)
        .await?;
    info!(secret = %secret_name, key = %in_cluster_key, "Added in-cluster kubeconfig");
    Ok(true)
}

/// Whether a Deployment has all its desired replicas ready.
///
/// # Errors
///
/// Returns API errors.
pub async fn deployment_ready(store: &dyn ClusterStore, namespace: &str, name: &str) -> Result<bool> {
    let Some(deployment) = get_typed::<Deployment>(store, Some(namespace), name).await? else {
        return Ok(false);
    };
    let desired = deployment
        .spec
        .and_then(|s| s.replicas)
        .unwrap_or(1)
        .max(1);
    let ready = deployment
        .status
        .and_then(|s| s.ready_replicas)
        .unwrap_or(0);
    Ok(ready >= desired)
}

/// Whether a StatefulSet has all its desired replicas ready.
///
/// # Errors
///
/// Returns API errors.
pub async fn statefulset_ready(store: &dyn ClusterStore, namespace: &str, name: &str) -> Result<bool> {
    let Some(sts) = get_typed::<StatefulSet>(store, Some(namespace), name).await? else {
        return Ok(false);
    };
    let desired = sts.spec.and_then(|s| s.replicas).unwrap_or(1).max(1);
    let ready = sts.status.and_then(|s| s.ready_replicas).unwrap_or(0);
    Ok(ready >= desired)
}

#[cfg(test)]
#[path = "base_tests.rs"]
mod base_tests;
