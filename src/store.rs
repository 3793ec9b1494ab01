// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Cluster access used by every reconciler.
//!
//! Reconcilers never hold a [`kube::Client`] directly. They receive a
//! [`ClusterStore`], which exposes the handful of verbs the pipelines need over
//! untyped objects. [`KubeStore`] implements it on top of the Kubernetes API;
//! unit tests use an in-memory store instead.
//!
//! Typed access is layered on top with [`get_typed`], [`create_typed`] and
//! friends, which erase `K: Resource` into an [`ApiResource`].
//!
//! # Concurrency
//!
//! Status writes carry `metadata.resourceVersion` of the object the reconciler
//! started from, so a write based on a stale object fails with `Conflict` instead
//! of overwriting newer state. The next pass re-reads and tries again.

use crate::errors::{Error, Result};
use async_trait::async_trait;
use kube::api::{
    Api, ApiResource, DeleteParams, DynamicObject, GroupVersionKind, Patch, PatchParams,
    PostParams,
};
use kube::discovery::Scope;
use kube::{Client, Resource};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tracing::debug;

/// Verbs the reconcilers need from a cluster.
///
/// `namespace` is `None` for cluster-scoped resources.
#[async_trait]
pub trait ClusterStore: Send + Sync {
    /// Fetch an object, returning `None` when it does not exist.
    async fn get(
        &self,
        ar: &ApiResource,
        namespace: Option<&str>,
        name: &str,
    ) -> Result<Option<DynamicObject>>;

    /// Create an object. Fails with `AlreadyExists` if it exists.
    async fn create(
        &self,
        ar: &ApiResource,
        namespace: Option<&str>,
        obj: &DynamicObject,
    ) -> Result<DynamicObject>;

    /// Replace the main resource of an object, honoring `metadata.resourceVersion`.
    async fn replace(
        &self,
        ar: &ApiResource,
        namespace: Option<&str>,
        obj: &DynamicObject,
    ) -> Result<DynamicObject>;

    /// Merge-patch the status subresource.
    async fn patch_status(
        &self,
        ar: &ApiResource,
        namespace: Option<&str>,
        name: &str,
        patch: &Value,
    ) -> Result<DynamicObject>;

    /// Server-side apply with a forced field manager.
    async fn apply(
        &self,
        ar: &ApiResource,
        namespace: Option<&str>,
        obj: &DynamicObject,
        field_manager: &str,
    ) -> Result<DynamicObject>;

    /// Delete an object. Deleting a missing object succeeds.
    async fn delete(&self, ar: &ApiResource, namespace: Option<&str>, name: &str) -> Result<()>;

    /// POST to a subresource (e.g. `serviceaccounts/<name>/token`).
    async fn create_subresource(
        &self,
        ar: &ApiResource,
        namespace: Option<&str>,
        name: &str,
        subresource: &str,
        body: &Value,
    ) -> Result<Value>;

    /// Resolve a kind to its resource and scope through discovery.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownKind`] when the API server does not serve the kind.
    async fn resolve(&self, gvk: &GroupVersionKind) -> Result<(ApiResource, bool)>;
}

/// [`ClusterStore`] backed by the Kubernetes API.
#[derive(Clone)]
pub struct KubeStore {
    client: Client,
}

impl KubeStore {
    #[must_use]
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn api(&self, ar: &ApiResource, namespace: Option<&str>) -> Api<DynamicObject> {
        match namespace {
            Some(ns) => Api::namespaced_with(self.client.clone(), ns, ar),
            None => Api::all_with(self.client.clone(), ar),
        }
    }
}

fn object_name(obj: &DynamicObject) -> Result<&str> {
    obj.metadata
        .name
        .as_deref()
        .ok_or_else(|| Error::InvalidObject("metadata.name is required".to_string()))
}

#[async_trait]
impl ClusterStore for KubeStore {
    async fn get(
        &self,
        ar: &ApiResource,
        namespace: Option<&str>,
        name: &str,
    ) -> Result<Option<DynamicObject>> {
        Ok(self.api(ar, namespace).get_opt(name).await?)
    }

    async fn create(
        &self,
        ar: &ApiResource,
        namespace: Option<&str>,
        obj: &DynamicObject,
    ) -> Result<DynamicObject> {
        Ok(self
            .api(ar, namespace)
            .create(&PostParams::default(), obj)
            .await?)
    }

    async fn replace(
        &self,
        ar: &ApiResource,
        namespace: Option<&str>,
        obj: &DynamicObject,
    ) -> Result<DynamicObject> {
        let name = object_name(obj)?;
        Ok(self
            .api(ar, namespace)
            .replace(name, &PostParams::default(), obj)
            .await?)
    }

    async fn patch_status(
        &self,
        ar: &ApiResource,
        namespace: Option<&str>,
        name: &str,
        patch: &Value,
    ) -> Result<DynamicObject> {
        Ok(self
            .api(ar, namespace)
            .patch_status(name, &PatchParams::default(), &Patch::Merge(patch))
            .await?)
    }

    async fn apply(
        &self,
        ar: &ApiResource,
        namespace: Option<&str>,
        obj: &DynamicObject,
        field_manager: &str,
    ) -> Result<DynamicObject> {
        let name = object_name(obj)?;
        Ok(self
            .api(ar, namespace)
            .patch(
                name,
                &PatchParams::apply(field_manager).force(),
                &Patch::Apply(obj),
            )
            .await?)
    }

    async fn delete(&self, ar: &ApiResource, namespace: Option<&str>, name: &str) -> Result<()> {
        match self
            .api(ar, namespace)
            .delete(name, &DeleteParams::default())
            .await
        {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(resp)) if resp.code == 404 => {
                debug!(kind = %ar.kind, name = %name, "Object already deleted");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn create_subresource(
        &self,
        ar: &ApiResource,
        namespace: Option<&str>,
        name: &str,
        subresource: &str,
        body: &Value,
    ) -> Result<Value> {
        Ok(self
            .api(ar, namespace)
            .create_subresource(subresource, name, &PostParams::default(), body)
            .await?)
    }

    async fn resolve(&self, gvk: &GroupVersionKind) -> Result<(ApiResource, bool)> {
        match kube::discovery::pinned_kind(&self.client, gvk).await {
            Ok((ar, caps)) => Ok((ar, caps.scope == Scope::Namespaced)),
            Err(kube::Error::Discovery(e)) => Err(Error::UnknownKind(format!(
                "{}/{} {}: {e}",
                gvk.group, gvk.version, gvk.kind
            ))),
            Err(e) => Err(e.into()),
        }
    }
}

// ============================================================================
// Typed helpers
// ============================================================================

/// [`ApiResource`] of a statically typed resource.
#[must_use]
pub fn api_resource<K>() -> ApiResource
where
    K: Resource<DynamicType = ()>,
{
    ApiResource::erase::<K>(&())
}

/// Convert a typed object into a [`DynamicObject`].
///
/// # Errors
///
/// Returns an error if the object cannot be serialized.
pub fn to_dynamic<K: Serialize>(obj: &K) -> Result<DynamicObject> {
    Ok(serde_json::from_value(serde_json::to_value(obj)?)?)
}

/// Convert a [`DynamicObject`] into a typed object.
///
/// # Errors
///
/// Returns an error if the object does not match `K`.
pub fn from_dynamic<K: DeserializeOwned>(obj: DynamicObject) -> Result<K> {
    Ok(serde_json::from_value(serde_json::to_value(obj)?)?)
}

/// Fetch a typed object, returning `None` when it does not exist.
///
/// # Errors
///
/// Returns an error on API failures other than `NotFound`.
pub async fn get_typed<K>(
    store: &dyn ClusterStore,
    namespace: Option<&str>,
    name: &str,
) -> Result<Option<K>>
where
    K: Resource<DynamicType = ()> + DeserializeOwned,
{
    match store.get(&api_resource::<K>(), namespace, name).await? {
        Some(obj) => Ok(Some(from_dynamic(obj)?)),
        None => Ok(None),
    }
}

/// Create a typed object.
///
/// # Errors
///
/// Returns an error if the object exists or the API call fails.
pub async fn create_typed<K>(store: &dyn ClusterStore, namespace: Option<&str>, obj: &K) -> Result<K>
where
    K: Resource<DynamicType = ()> + Serialize + DeserializeOwned,
{
    let created = store
        .create(&api_resource::<K>(), namespace, &to_dynamic(obj)?)
        .await?;
    from_dynamic(created)
}

/// Replace a typed object.
///
/// # Errors
///
/// Returns an error on conflicts or API failures.
pub async fn replace_typed<K>(
    store: &dyn ClusterStore,
    namespace: Option<&str>,
    obj: &K,
) -> Result<K>
where
    K: Resource<DynamicType = ()> + Serialize + DeserializeOwned,
{
    let replaced = store
        .replace(&api_resource::<K>(), namespace, &to_dynamic(obj)?)
        .await?;
    from_dynamic(replaced)
}

/// Delete a typed object by name.
///
/// # Errors
///
/// Returns an error on API failures other than `NotFound`.
pub async fn delete_typed<K>(
    store: &dyn ClusterStore,
    namespace: Option<&str>,
    name: &str,
) -> Result<()>
where
    K: Resource<DynamicType = ()>,
{
    store.delete(&api_resource::<K>(), namespace, name).await
}
