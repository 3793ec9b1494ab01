// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

#![allow(unexpected_cfgs)]

//! # kflex - Control Planes as a Resource for Kubernetes
//!
//! kflex is a Kubernetes operator written in Rust that provisions and adopts
//! Kubernetes-API-compatible control planes through Custom Resource Definitions (CRDs).
//!
//! ## Overview
//!
//! This library provides the core functionality for the kflex operator, including:
//!
//! - Custom Resource Definitions (CRDs) for control planes and post-create hooks
//! - One reconciliation pipeline per control plane type
//! - PKI and kubeconfig generation for embedded API servers
//! - Templated post-create hooks applied once a control plane is ready
//!
//! ## Modules
//!
//! - [`crd`] - Custom Resource Definition types
//! - [`reconcilers`] - Reconciliation logic for each control plane type
//! - [`context`] - Shared context passed to the controllers
//! - [`store`] - Object access seam over the Kubernetes API
//! - [`pki`] - Certificate authority and leaf certificates
//! - [`kubeconfig`] - Kubeconfig rendering and parsing
//! - [`gotemplate`] - Go template rendering for post-create hooks
//! - [`resources`] - Builders for the objects a control plane owns
//!
//! ## Example
//!
//! ```rust,no_run
//! use kflex::crd::{ControlPlane, ControlPlaneSpec, ControlPlaneType};
//!
//! let cp = ControlPlane::new(
//!     "cp1",
//!     ControlPlaneSpec {
//!         r#type: ControlPlaneType::Vcluster,
//!         ..Default::default()
//!     },
//! );
//! ```
//!
//! ## Features
//!
//! - **Six Strategies** - k8s, ocm, vcluster, k3s, host and external
//! - **Idempotent Pipelines** - Every pass resumes where the last one stopped
//! - **Status Tracking** - `Synced` and `Ready` conditions on the status subresource

pub mod conditions;
pub mod config;
pub mod constants;
pub mod context;
pub mod crd;
pub mod errors;
pub mod gotemplate;
pub mod helm;
pub mod kubeconfig;
pub mod labels;
pub mod metrics;
pub mod naming;
pub mod pki;
pub mod reconcilers;
pub mod remote;
pub mod resources;
pub mod store;

#[cfg(test)]
pub mod test_support;

#[cfg(test)]
mod crd_tests;
