// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Custom Resource Definitions (CRDs) for control planes as a resource.
//!
//! This module defines the Kubernetes Custom Resource Definitions used by kflex
//! to provision and adopt Kubernetes-API-compatible control planes declaratively.
//!
//! # Resource Types
//!
//! - [`ControlPlane`] - A control plane backed by one of several strategies
//!   (embedded API server, adopted external cluster, hosting cluster passthrough,
//!   vcluster, OCM or k3s)
//! - [`PostCreateHook`] - A reusable bundle of templated manifests applied once a
//!   control plane becomes ready
//!
//! Both resources are cluster-scoped. Everything a control plane owns lives in the
//! namespace `<name>-system`.
//!
//! # Example: Creating a Control Plane
//!
//! ```rust,no_run
//! use kflex::crd::{BackendDbType, ControlPlaneSpec, ControlPlaneType};
//!
//! let spec = ControlPlaneSpec {
//!     r#type: ControlPlaneType::K8s,
//!     backend: Some(BackendDbType::Shared),
//!     ..Default::default()
//! };
//! ```

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Strategy used to provide the control plane.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ControlPlaneType {
    /// Embedded `kube-apiserver` + `kube-controller-manager` with a kine/Postgres backend
    #[default]
    K8s,
    /// Open Cluster Management multicluster control plane, installed via Helm
    Ocm,
    /// vcluster, installed via Helm
    Vcluster,
    /// The hosting cluster itself
    Host,
    /// A pre-existing cluster adopted through a bootstrap kubeconfig
    External,
    /// A k3s server running as a StatefulSet
    K3s,
}

impl ControlPlaneType {
    /// Wire name of the type, as used in the `spec.type` field.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::K8s => "k8s",
            Self::Ocm => "ocm",
            Self::Vcluster => "vcluster",
            Self::Host => "host",
            Self::External => "external",
            Self::K3s => "k3s",
        }
    }
}

impl std::fmt::Display for ControlPlaneType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Storage backend sharing policy for `k8s` control planes.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum BackendDbType {
    /// One logical database per control plane on the shared Postgres instance
    #[default]
    Shared,
    /// A Postgres instance installed inside the control plane namespace
    Dedicated,
}

/// Invocation of a `PostCreateHook` by a control plane.
#[derive(Clone, Debug, Default, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PostCreateHookUse {
    /// Name of the `PostCreateHook` resource to apply
    pub hook_name: String,

    /// Variable overrides, taking precedence over the hook's default vars
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub vars: BTreeMap<String, String>,
}

/// Reference to a Secret holding a kubeconfig used to adopt an existing cluster.
#[derive(Clone, Debug, Default, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct BootstrapSecretReference {
    /// Secret name
    pub name: String,

    /// Secret namespace
    pub namespace: String,

    /// Data key holding the kubeconfig. Defaults to `kubeconfig`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
}

/// `ControlPlane` declares a desired Kubernetes-API-compatible control plane.
///
/// # Example
///
/// ```yaml
/// apiVersion: tenancy.kflex.kubestellar.org/v1alpha1
/// kind: ControlPlane
/// metadata:
///   name: cp1
/// spec:
///   type: k8s
///   backend: shared
///   postCreateHooks:
///     - hookName: openshift-crds
///       vars:
///         version: "4.14"
/// ```
#[derive(CustomResource, Clone, Debug, Default, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "tenancy.kflex.kubestellar.org",
    version = "v1alpha1",
    kind = "ControlPlane",
    plural = "controlplanes",
    shortname = "cps",
    doc = "ControlPlane is the Schema for the controlplanes API. Each ControlPlane is realized as a set of sub-resources in the namespace <name>-system and exposes a kubeconfig through status.secretRef.",
    printcolumn = r#"{"name":"Synced","type":"string","jsonPath":".status.conditions[?(@.type==\"Synced\")].status"}"#,
    printcolumn = r#"{"name":"Ready","type":"string","jsonPath":".status.conditions[?(@.type==\"Ready\")].status"}"#,
    printcolumn = r#"{"name":"Type","type":"string","jsonPath":".spec.type"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[kube(status = "ControlPlaneStatus")]
#[serde(rename_all = "camelCase")]
pub struct ControlPlaneSpec {
    /// Control plane strategy.
    pub r#type: ControlPlaneType,

    /// Storage backend sharing policy. Only consumed by `k8s` control planes.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backend: Option<BackendDbType>,

    /// Deprecated: use `postCreateHooks`. Migrated automatically.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub post_create_hook: Option<String>,

    /// Deprecated: use `postCreateHooks`. Migrated automatically.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub post_create_hook_vars: Option<BTreeMap<String, String>>,

    /// Ordered list of hooks to apply once the control plane is ready.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub post_create_hooks: Vec<PostCreateHookUse>,

    /// Keep `Ready=False` until every listed hook has been applied.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wait_for_post_create_hooks: Option<bool>,

    /// Kubeconfig of the cluster to adopt. Only consumed by `external` control planes.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bootstrap_secret_ref: Option<BootstrapSecretReference>,

    /// Lifetime of the token requested on the adopted cluster. Defaults to 365 days.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub adopted_token_expiration_seconds: Option<i64>,
}

/// Condition of a kflex resource.
///
/// Conditions form a set keyed by `type`; see [`crate::conditions`] for the
/// upsert and comparison rules.
#[derive(Clone, Debug, Default, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    /// `Ready` or `Synced`.
    pub r#type: String,

    /// `True`, `False` or `Unknown`.
    pub status: String,

    /// Brief CamelCase reason for the condition's last transition.
    pub reason: String,

    /// Human-readable message indicating details about the transition.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub message: String,

    /// Last time the condition was written (RFC3339 format).
    pub last_update_time: String,

    /// Last time `status`, `reason` or `message` changed (RFC3339 format).
    pub last_transition_time: String,
}

/// Pointer to the secret that carries a control plane's kubeconfig.
#[derive(Clone, Debug, Default, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SecretReference {
    pub name: String,
    pub namespace: String,
    /// Data key of the kubeconfig reachable from outside the hosting cluster
    pub key: String,
    /// Data key of the kubeconfig reachable from pods in the hosting cluster
    pub in_cluster_key: String,
}

/// `ControlPlane` status
#[derive(Clone, Debug, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ControlPlaneStatus {
    #[serde(default)]
    pub conditions: Vec<Condition>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub secret_ref: Option<SecretReference>,
    /// Hooks already applied to this control plane, by hook name.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub post_create_hooks: BTreeMap<String, bool>,
}

/// Default value of a template variable of a `PostCreateHook`.
#[derive(Clone, Debug, Default, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
pub struct HookVar {
    pub name: String,
    pub value: String,
}

/// `PostCreateHook` bundles templated manifests applied to a control plane after
/// it becomes ready.
///
/// Templates may reference variables with `{{.Name}}`. The variables
/// `Namespace`, `ControlPlaneName` and `HookName` are always available.
///
/// # Example
///
/// ```yaml
/// apiVersion: tenancy.kflex.kubestellar.org/v1alpha1
/// kind: PostCreateHook
/// metadata:
///   name: hello
/// spec:
///   defaultVars:
///     - name: image
///       value: busybox
///   templates:
///     - apiVersion: batch/v1
///       kind: Job
///       metadata:
///         name: hello-{{.ControlPlaneName}}
///       spec:
///         template:
///           spec:
///             restartPolicy: Never
///             containers:
///               - name: hello
///                 image: "{{.image}}"
/// ```
#[derive(CustomResource, Clone, Debug, Default, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "tenancy.kflex.kubestellar.org",
    version = "v1alpha1",
    kind = "PostCreateHook",
    plural = "postcreatehooks",
    shortname = "pch",
    doc = "PostCreateHook is the Schema for the postcreatehooks API",
    printcolumn = r#"{"name":"Synced","type":"string","jsonPath":".status.conditions[?(@.type==\"Synced\")].status"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[kube(status = "PostCreateHookStatus")]
#[serde(rename_all = "camelCase")]
pub struct PostCreateHookSpec {
    /// Ordered manifests. Each entry is an object or a YAML string.
    #[serde(default)]
    #[schemars(schema_with = "raw_manifest_list")]
    pub templates: Vec<serde_json::Value>,

    /// Default variable values, lowest precedence.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub default_vars: Vec<HookVar>,
}

/// `PostCreateHook` status
#[derive(Clone, Debug, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PostCreateHookStatus {
    #[serde(default)]
    pub conditions: Vec<Condition>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
}

fn raw_manifest_list(_: &mut schemars::SchemaGenerator) -> schemars::Schema {
    schemars::json_schema!({
        "type": "array",
        "items": {
            "x-kubernetes-preserve-unknown-fields": true
        }
    })
}
