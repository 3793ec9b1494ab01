// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Common label and annotation constants used across all reconcilers.
//!
//! This module defines standard Kubernetes labels and kflex-specific labels/annotations
//! to ensure consistency across all resources created by the controller.

use std::collections::BTreeMap;

// ============================================================================
// Kubernetes Standard Labels
// https://kubernetes.io/docs/concepts/overview/working-with-objects/common-labels/
// ============================================================================

/// Standard label for the component name within the architecture (e.g., "kube-apiserver")
pub const K8S_COMPONENT: &str = "app.kubernetes.io/component";

/// Standard label for the tool being used to manage the operation of an application
pub const K8S_MANAGED_BY: &str = "app.kubernetes.io/managed-by";

/// Standard label for the name of the application
pub const K8S_NAME: &str = "app.kubernetes.io/name";

/// Standard label for a unique name identifying the instance of an application
pub const K8S_INSTANCE: &str = "app.kubernetes.io/instance";

/// Standard label for the name of a higher-level application this one is part of
pub const K8S_PART_OF: &str = "app.kubernetes.io/part-of";

// ============================================================================
// Kubernetes Standard Label Values
// ============================================================================

/// Value for `app.kubernetes.io/part-of` indicating this resource is part of kflex
pub const PART_OF_KFLEX: &str = "kubeflex";

/// Value for `app.kubernetes.io/managed-by` on resources created by the operator
pub const MANAGED_BY_KFLEX: &str = "kflex-controller";

// ============================================================================
// kflex-Specific Labels
// ============================================================================

/// Label carrying the owning control plane name on every generated resource
pub const KFLEX_CONTROL_PLANE_LABEL: &str = "tenancy.kflex.kubestellar.org/control-plane";

/// Label carrying the control plane type on every generated resource
pub const KFLEX_TYPE_LABEL: &str = "tenancy.kflex.kubestellar.org/type";

// ============================================================================
// Helm Compatibility (post-create hook objects)
// ============================================================================

/// Value of `app.kubernetes.io/managed-by` that Helm tooling recognizes
pub const HELM_MANAGED_BY: &str = "Helm";

/// Helm release name annotation
pub const HELM_RELEASE_NAME_ANNOTATION: &str = "meta.helm.sh/release-name";

/// Helm release namespace annotation
pub const HELM_RELEASE_NAMESPACE_ANNOTATION: &str = "meta.helm.sh/release-namespace";

/// Builds the standard label set for a sub-resource of a control plane.
///
/// # Arguments
///
/// * `cp_name` - Name of the owning `ControlPlane`
/// * `component` - Component the resource belongs to (e.g., "kube-apiserver")
#[must_use]
pub fn build_labels(cp_name: &str, component: &str) -> BTreeMap<String, String> {
    let mut labels = BTreeMap::new();
    labels.insert(K8S_NAME.into(), component.into());
    labels.insert(K8S_INSTANCE.into(), cp_name.into());
    labels.insert(K8S_COMPONENT.into(), component.into());
    labels.insert(K8S_MANAGED_BY.into(), MANAGED_BY_KFLEX.into());
    labels.insert(K8S_PART_OF.into(), PART_OF_KFLEX.into());
    labels.insert(KFLEX_CONTROL_PLANE_LABEL.into(), cp_name.into());
    labels
}

/// Selector labels for pods of a component (stable subset of [`build_labels`]).
#[must_use]
pub fn selector_labels(cp_name: &str, component: &str) -> BTreeMap<String, String> {
    let mut labels = BTreeMap::new();
    labels.insert(K8S_NAME.into(), component.into());
    labels.insert(K8S_INSTANCE.into(), cp_name.into());
    labels
}
