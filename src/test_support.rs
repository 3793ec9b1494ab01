// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! In-memory collaborators for unit tests.
//!
//! [`FakeStore`] behaves like a minimal API server: it assigns uids and
//! resource versions, rejects duplicate creates with `AlreadyExists`, rejects
//! stale writes with `Conflict`, and records every mutating call so tests can
//! assert on side effects.

use crate::context::Context;
use crate::config::OperatorConfig;
use crate::errors::{Error, Result};
use crate::helm::{ChartInstaller, HelmRelease};
use crate::remote::RemoteClusterConnector;
use crate::store::ClusterStore;
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use kube::api::{ApiResource, DynamicObject, GroupVersionKind};
use serde_json::{json, Value};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

/// Token handed out by the fake `serviceaccounts/token` subresource and SA token secrets.
pub const FAKE_TOKEN: &str = "fake-token";

/// CA bundle the fake token controller projects into SA token secrets.
pub const FAKE_CA: &str = "fake-ca";

const CLUSTER_SCOPED_KINDS: &[&str] = &[
    "Namespace",
    "ClusterRole",
    "ClusterRoleBinding",
    "CustomResourceDefinition",
    "GatewayClass",
    "ControlPlane",
    "PostCreateHook",
    "PersistentVolume",
    "StorageClass",
];

type Key = (String, String, String);

fn key(ar: &ApiResource, namespace: Option<&str>, name: &str) -> Key {
    (
        format!("{}/{}", ar.group, ar.plural),
        namespace.unwrap_or_default().to_string(),
        name.to_string(),
    )
}

fn api_error(code: u16, reason: &str, message: String) -> Error {
    Error::Kube(kube::Error::Api(Box::new(kube::core::Status {
        status: Some(kube::core::response::StatusSummary::Failure),
        message,
        reason: reason.to_string(),
        code,
        metadata: None,
        details: None,
    })))
}

/// A mutating call recorded by [`FakeStore`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Call {
    pub verb: &'static str,
    pub kind: String,
    pub namespace: Option<String>,
    pub name: String,
}

/// Body of a subresource request recorded by [`FakeStore`].
#[derive(Clone, Debug)]
pub struct SubresourceCall {
    pub kind: String,
    pub name: String,
    pub subresource: String,
    pub body: Value,
}

/// In-memory [`ClusterStore`].
#[derive(Default)]
pub struct FakeStore {
    objects: Mutex<BTreeMap<Key, Value>>,
    calls: Mutex<Vec<Call>>,
    subresource_calls: Mutex<Vec<SubresourceCall>>,
    missing_kinds: Mutex<BTreeSet<String>>,
    failing_kinds: Mutex<BTreeMap<String, (u16, String)>>,
    failing_deletes: Mutex<BTreeMap<String, (u16, String)>>,
    project_tokens: AtomicBool,
    version: AtomicU64,
}

impl FakeStore {
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Store that projects `token` and `ca.crt` into SA token secrets on creation.
    #[must_use]
    pub fn with_token_projection() -> Arc<Self> {
        let store = Self::default();
        store.project_tokens.store(true, Ordering::SeqCst);
        Arc::new(store)
    }

    /// Make discovery report `kind` as not served.
    pub fn mark_kind_missing(&self, kind: &str) {
        self.missing_kinds.lock().unwrap().insert(kind.to_string());
    }

    /// Fail every create and apply of `kind` with the given API error.
    pub fn fail_kind(&self, kind: &str, code: u16, reason: &str) {
        self.failing_kinds
            .lock()
            .unwrap()
            .insert(kind.to_string(), (code, reason.to_string()));
    }

    /// Fail the next delete of `kind` with the given API error.
    pub fn fail_next_delete(&self, kind: &str, code: u16, reason: &str) {
        self.failing_deletes
            .lock()
            .unwrap()
            .insert(kind.to_string(), (code, reason.to_string()));
    }

    fn next_version(&self) -> String {
        (self.version.fetch_add(1, Ordering::SeqCst) + 1).to_string()
    }

    fn record(&self, verb: &'static str, ar: &ApiResource, namespace: Option<&str>, name: &str) {
        self.calls.lock().unwrap().push(Call {
            verb,
            kind: ar.kind.clone(),
            namespace: namespace.map(str::to_string),
            name: name.to_string(),
        });
    }

    fn check_failure(&self, ar: &ApiResource, name: &str) -> Result<()> {
        if let Some((code, reason)) = self.failing_kinds.lock().unwrap().get(&ar.kind) {
            return Err(api_error(*code, reason, format!("{} {name}: injected failure", ar.kind)));
        }
        Ok(())
    }

    /// Every recorded mutating call.
    #[must_use]
    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    /// Number of recorded calls with `verb`, optionally filtered by `kind`.
    #[must_use]
    pub fn count(&self, verb: &str, kind: Option<&str>) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.verb == verb && kind.is_none_or(|k| c.kind == k))
            .count()
    }

    /// Forget recorded calls, keeping stored objects.
    pub fn reset_calls(&self) {
        self.calls.lock().unwrap().clear();
        self.subresource_calls.lock().unwrap().clear();
    }

    #[must_use]
    pub fn subresource_calls(&self) -> Vec<SubresourceCall> {
        self.subresource_calls.lock().unwrap().clone()
    }

    /// Stored object as JSON.
    #[must_use]
    pub fn object(&self, ar: &ApiResource, namespace: Option<&str>, name: &str) -> Option<Value> {
        self.objects
            .lock()
            .unwrap()
            .get(&key(ar, namespace, name))
            .cloned()
    }

    /// Whether an object exists.
    #[must_use]
    pub fn contains(&self, ar: &ApiResource, namespace: Option<&str>, name: &str) -> bool {
        self.object(ar, namespace, name).is_some()
    }

    /// Seed an object without recording a call. Returns the stored JSON.
    pub fn seed<K: serde::Serialize>(&self, ar: &ApiResource, namespace: Option<&str>, obj: &K) -> Value {
        let mut value = serde_json::to_value(obj).unwrap();
        value["apiVersion"] = json!(ar.api_version);
        value["kind"] = json!(ar.kind);
        let name = value["metadata"]["name"].as_str().unwrap().to_string();
        if value["metadata"]["uid"].is_null() {
            value["metadata"]["uid"] = json!(format!("uid-{name}"));
        }
        value["metadata"]["resourceVersion"] = json!(self.next_version());
        if value["metadata"]["generation"].is_null() {
            value["metadata"]["generation"] = json!(1);
        }
        self.objects
            .lock()
            .unwrap()
            .insert(key(ar, namespace, &name), value.clone());
        value
    }

    /// Overwrite the status of a stored object, as another controller would.
    pub fn set_status(&self, ar: &ApiResource, namespace: Option<&str>, name: &str, status: Value) {
        let version = self.next_version();
        let mut objects = self.objects.lock().unwrap();
        let obj = objects
            .get_mut(&key(ar, namespace, name))
            .expect("object to update exists");
        obj["status"] = status;
        obj["metadata"]["resourceVersion"] = json!(version);
    }

    /// Overwrite the data of a stored secret-like object.
    pub fn set_data(&self, ar: &ApiResource, namespace: Option<&str>, name: &str, data: &[(&str, &[u8])]) {
        let mut objects = self.objects.lock().unwrap();
        let obj = objects
            .get_mut(&key(ar, namespace, name))
            .expect("object to update exists");
        for (k, v) in data {
            obj["data"][*k] = json!(BASE64.encode(v));
        }
    }

    fn decode(value: Value) -> Result<DynamicObject> {
        Ok(serde_json::from_value(value)?)
    }

    fn encode(ar: &ApiResource, obj: &DynamicObject) -> Result<Value> {
        let mut value = serde_json::to_value(obj)?;
        value["apiVersion"] = json!(ar.api_version);
        value["kind"] = json!(ar.kind);
        Ok(value)
    }
}

/// RFC 7386 JSON merge patch.
pub fn merge_patch(target: &mut Value, patch: &Value) {
    if let Value::Object(patch) = patch {
        if !target.is_object() {
            *target = json!({});
        }
        if let Value::Object(target) = target {
            for (k, v) in patch {
                if v.is_null() {
                    target.remove(k);
                } else {
                    merge_patch(target.entry(k.clone()).or_insert(Value::Null), v);
                }
            }
        }
    } else {
        *target = patch.clone();
    }
}

fn resource_version(value: &Value) -> Option<&str> {
    value["metadata"]["resourceVersion"].as_str()
}

#[async_trait]
impl ClusterStore for FakeStore {
    async fn get(
        &self,
        ar: &ApiResource,
        namespace: Option<&str>,
        name: &str,
    ) -> Result<Option<DynamicObject>> {
        match self.object(ar, namespace, name) {
            Some(value) => Ok(Some(Self::decode(value)?)),
            None => Ok(None),
        }
    }

    async fn create(
        &self,
        ar: &ApiResource,
        namespace: Option<&str>,
        obj: &DynamicObject,
    ) -> Result<DynamicObject> {
        let name = obj.metadata.name.clone().unwrap_or_default();
        self.check_failure(ar, &name)?;
        self.record("create", ar, namespace, &name);
        let k = key(ar, namespace, &name);
        if self.objects.lock().unwrap().contains_key(&k) {
            return Err(api_error(
                409,
                "AlreadyExists",
                format!("{} \"{name}\" already exists", ar.plural),
            ));
        }

        let mut value = Self::encode(ar, obj)?;
        value["metadata"]["uid"] = json!(format!("uid-{name}"));
        value["metadata"]["resourceVersion"] = json!(self.next_version());
        value["metadata"]["generation"] = json!(1);
        if ar.kind == "Secret"
            && value["type"] == "kubernetes.io/service-account-token"
            && self.project_tokens.load(Ordering::SeqCst)
        {
            value["data"] = json!({
                "token": BASE64.encode(FAKE_TOKEN),
                "ca.crt": BASE64.encode(FAKE_CA),
            });
        }
        self.objects.lock().unwrap().insert(k, value.clone());
        Self::decode(value)
    }

    async fn replace(
        &self,
        ar: &ApiResource,
        namespace: Option<&str>,
        obj: &DynamicObject,
    ) -> Result<DynamicObject> {
        let name = obj.metadata.name.clone().unwrap_or_default();
        self.record("replace", ar, namespace, &name);
        let version = self.next_version();
        let mut objects = self.objects.lock().unwrap();
        let stored = objects
            .get_mut(&key(ar, namespace, &name))
            .ok_or_else(|| api_error(404, "NotFound", format!("{} \"{name}\" not found", ar.plural)))?;

        let mut value = Self::encode(ar, obj)?;
        if let Some(rv) = resource_version(&value) {
            if Some(rv) != resource_version(stored) {
                return Err(api_error(409, "Conflict", format!("{} \"{name}\" was modified", ar.plural)));
            }
        }
        let generation = stored["metadata"]["generation"].as_i64().unwrap_or(1);
        let spec_changed = value["spec"] != stored["spec"];
        value["status"] = stored["status"].clone();
        value["metadata"]["uid"] = stored["metadata"]["uid"].clone();
        value["metadata"]["resourceVersion"] = json!(version);
        value["metadata"]["generation"] =
            json!(if spec_changed { generation + 1 } else { generation });
        *stored = value.clone();
        Self::decode(value)
    }

    async fn patch_status(
        &self,
        ar: &ApiResource,
        namespace: Option<&str>,
        name: &str,
        patch: &Value,
    ) -> Result<DynamicObject> {
        self.record("patch_status", ar, namespace, name);
        let version = self.next_version();
        let mut objects = self.objects.lock().unwrap();
        let stored = objects
            .get_mut(&key(ar, namespace, name))
            .ok_or_else(|| api_error(404, "NotFound", format!("{} \"{name}\" not found", ar.plural)))?;
        if let Some(rv) = resource_version(patch) {
            if Some(rv) != resource_version(stored) {
                return Err(api_error(409, "Conflict", format!("{} \"{name}\" was modified", ar.plural)));
            }
        }
        merge_patch(&mut stored["status"], &patch["status"]);
        stored["metadata"]["resourceVersion"] = json!(version);
        Self::decode(stored.clone())
    }

    async fn apply(
        &self,
        ar: &ApiResource,
        namespace: Option<&str>,
        obj: &DynamicObject,
        _field_manager: &str,
    ) -> Result<DynamicObject> {
        let name = obj.metadata.name.clone().unwrap_or_default();
        self.check_failure(ar, &name)?;
        self.record("apply", ar, namespace, &name);
        let version = self.next_version();
        let mut value = Self::encode(ar, obj)?;
        let mut objects = self.objects.lock().unwrap();
        let k = key(ar, namespace, &name);
        match objects.get(&k) {
            Some(stored) => {
                value["metadata"]["uid"] = stored["metadata"]["uid"].clone();
                value["status"] = stored["status"].clone();
            }
            None => value["metadata"]["uid"] = json!(format!("uid-{name}")),
        }
        value["metadata"]["resourceVersion"] = json!(version);
        objects.insert(k, value.clone());
        Self::decode(value)
    }

    async fn delete(&self, ar: &ApiResource, namespace: Option<&str>, name: &str) -> Result<()> {
        self.record("delete", ar, namespace, name);
        if let Some((code, reason)) = self.failing_deletes.lock().unwrap().remove(&ar.kind) {
            return Err(api_error(code, &reason, format!("{} {name}: injected failure", ar.kind)));
        }
        self.objects
            .lock()
            .unwrap()
            .remove(&key(ar, namespace, name));
        Ok(())
    }

    async fn create_subresource(
        &self,
        ar: &ApiResource,
        namespace: Option<&str>,
        name: &str,
        subresource: &str,
        body: &Value,
    ) -> Result<Value> {
        if !self.contains(ar, namespace, name) {
            return Err(api_error(404, "NotFound", format!("{} \"{name}\" not found", ar.plural)));
        }
        self.subresource_calls.lock().unwrap().push(SubresourceCall {
            kind: ar.kind.clone(),
            name: name.to_string(),
            subresource: subresource.to_string(),
            body: body.clone(),
        });
        let mut response = body.clone();
        response["status"] = json!({ "token": FAKE_TOKEN });
        Ok(response)
    }

    async fn resolve(&self, gvk: &GroupVersionKind) -> Result<(ApiResource, bool)> {
        if self.missing_kinds.lock().unwrap().contains(&gvk.kind) {
            return Err(Error::UnknownKind(format!(
                "{}/{} {}",
                gvk.group, gvk.version, gvk.kind
            )));
        }
        let namespaced = !CLUSTER_SCOPED_KINDS.contains(&gvk.kind.as_str());
        Ok((ApiResource::from_gvk(gvk), namespaced))
    }
}

/// [`ChartInstaller`] recording every release it was asked for.
#[derive(Default)]
pub struct FakeCharts {
    releases: Mutex<Vec<HelmRelease>>,
}

impl FakeCharts {
    #[must_use]
    pub fn releases(&self) -> Vec<HelmRelease> {
        self.releases.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChartInstaller for FakeCharts {
    async fn ensure_release(&self, release: &HelmRelease) -> Result<()> {
        self.releases.lock().unwrap().push(release.clone());
        Ok(())
    }
}

/// [`RemoteClusterConnector`] handing out one shared [`FakeStore`].
#[derive(Default)]
pub struct FakeRemote {
    pub store: Arc<FakeStore>,
    kubeconfigs: Mutex<Vec<String>>,
}

impl FakeRemote {
    #[must_use]
    pub fn kubeconfigs(&self) -> Vec<String> {
        self.kubeconfigs.lock().unwrap().clone()
    }
}

#[async_trait]
impl RemoteClusterConnector for FakeRemote {
    async fn connect(&self, kubeconfig: &str) -> Result<Arc<dyn ClusterStore>> {
        self.kubeconfigs.lock().unwrap().push(kubeconfig.to_string());
        Ok(self.store.clone())
    }
}

/// Collaborators of a test [`Context`], kept around for assertions.
pub struct TestHarness {
    pub store: Arc<FakeStore>,
    pub charts: Arc<FakeCharts>,
    pub remote: Arc<FakeRemote>,
    pub ctx: Arc<Context>,
}

impl TestHarness {
    #[must_use]
    pub fn new(store: Arc<FakeStore>) -> Self {
        Self::with_config(store, OperatorConfig::default())
    }

    #[must_use]
    pub fn with_config(store: Arc<FakeStore>, config: OperatorConfig) -> Self {
        let charts = Arc::new(FakeCharts::default());
        let remote = Arc::new(FakeRemote::default());
        let ctx = Arc::new(Context {
            store: store.clone(),
            charts: charts.clone(),
            remote: remote.clone(),
            config,
        });
        Self {
            store,
            charts,
            remote,
            ctx,
        }
    }
}
