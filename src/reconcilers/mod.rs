// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Kubernetes reconciliation controllers for kflex resources.
//!
//! # Reconciliation Architecture
//!
//! kflex follows the standard Kubernetes controller pattern:
//!
//! 1. **Watch** - Monitor `ControlPlane`s and the objects they own
//! 2. **Reconcile** - Run the pipeline of the control plane type
//! 3. **Status** - Report the outcome through the `Synced` and `Ready` conditions
//!
//! Each control plane type is a [`ControlPlaneProvisioner`]: a fixed, ordered
//! pipeline of idempotent ensure steps from [`base`]. The first failing step
//! aborts the pass; the error is recorded as `Synced=False/ReconcileError` and
//! the controller retries. Re-running a pipeline resumes at the first step whose
//! object is missing.
//!
//! # Available Reconcilers
//!
//! - [`reconcile_control_plane`] - Provisions a `ControlPlane` of any type
//! - [`reconcile_post_create_hook`] - Validates `PostCreateHook` templates
//!
//! ## Control Plane Types
//!
//! - [`k8s`] - Embedded `kube-apiserver` with a kine/Postgres backend
//! - [`ocm`] - Open Cluster Management control plane (Helm)
//! - [`vcluster`] - vcluster (Helm)
//! - [`k3s`] - k3s server StatefulSet
//! - [`host`] - The hosting cluster itself
//! - [`external`] - Adoption of an existing cluster

pub mod base;
pub mod external;
pub mod hooks;
pub mod host;
pub mod k3s;
pub mod k8s;
pub mod ocm;
pub mod retry;
pub mod status;
pub mod vcluster;

pub use base::{ControlPlaneProvisioner, Provisioned};
pub use hooks::reconcile_post_create_hook;

use crate::conditions::{
    available, creating, deleting, find_condition, has_condition_available, reconcile_paused,
    unavailable, waiting_for_post_create_hooks, CONDITION_TYPE_READY,
};
use crate::constants::{
    ERROR_REQUEUE_DURATION_SECS, NOT_READY_REQUEUE_DURATION_SECS, PAUSED_ANNOTATION,
    READY_REQUEUE_DURATION_SECS, TRANSIENT_ERROR_REQUEUE_DURATION_SECS,
};
use crate::context::Context;
use crate::crd::{ControlPlane, ControlPlaneType};
use crate::errors::{Error, Result};
use crate::metrics;
use external::ExternalProvisioner;
use host::HostProvisioner;
use k3s::K3sProvisioner;
use k8s::K8sProvisioner;
use kube::runtime::controller::Action;
use kube::ResourceExt;
use ocm::OcmProvisioner;
use status::{update_status_for_syncing_error, update_status_for_syncing_success, StatusTracker};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info};
use vcluster::VclusterProvisioner;

/// Pipeline of a control plane type.
#[must_use]
pub fn provisioner_for(cp_type: ControlPlaneType) -> &'static dyn ControlPlaneProvisioner {
    match cp_type {
        ControlPlaneType::K8s => &K8sProvisioner,
        ControlPlaneType::Ocm => &OcmProvisioner,
        ControlPlaneType::Vcluster => &VclusterProvisioner,
        ControlPlaneType::Host => &HostProvisioner,
        ControlPlaneType::External => &ExternalProvisioner,
        ControlPlaneType::K3s => &K3sProvisioner,
    }
}

/// Whether reconciliation of `cp` is paused through [`PAUSED_ANNOTATION`].
#[must_use]
pub fn is_paused(cp: &ControlPlane) -> bool {
    cp.annotations()
        .get(PAUSED_ANNOTATION)
        .is_some_and(|v| v.eq_ignore_ascii_case("true"))
}

/// Reconcile one `ControlPlane`.
///
/// # Errors
///
/// Returns the error of the first failing step, after recording it in the
/// `Synced` condition.
pub async fn reconcile_control_plane(cp: Arc<ControlPlane>, ctx: Arc<Context>) -> Result<Action> {
    let start = Instant::now();
    let name = cp.name_any();
    let cp_type = cp.spec.r#type;
    let store = ctx.store.as_ref();
    let mut tracker = StatusTracker::new(&cp);

    if cp.metadata.deletion_timestamp.is_some() {
        debug!(control_plane = %name, "Control plane is being deleted");
        tracker.set_condition(deleting());
        if let Err(e) = tracker.write(store).await {
            debug!(control_plane = %name, error = %e, "Could not record deletion");
        }
        return Ok(Action::await_change());
    }

    if is_paused(&cp) {
        info!(control_plane = %name, "Reconciliation paused");
        tracker.set_condition(reconcile_paused());
        tracker.write(store).await?;
        metrics::record_reconciliation_paused(cp_type.as_str());
        return Ok(Action::await_change());
    }

    info!(control_plane = %name, r#type = %cp_type, "Reconciling ControlPlane");
    match run_pipeline(&ctx, &cp, &mut tracker).await {
        Ok(ready) => {
            metrics::record_reconciliation_success(cp_type.as_str(), start.elapsed());
            if ready {
                debug!(control_plane = %name, "Control plane ready, requeueing in 5 minutes");
                Ok(Action::requeue(Duration::from_secs(READY_REQUEUE_DURATION_SECS)))
            } else {
                debug!(control_plane = %name, "Control plane not ready, requeueing in 15 seconds");
                Ok(Action::requeue(Duration::from_secs(
                    NOT_READY_REQUEUE_DURATION_SECS,
                )))
            }
        }
        Err(e) => {
            error!(control_plane = %name, error = %e, "Failed to reconcile ControlPlane");
            update_status_for_syncing_error(store, &mut tracker, &e).await;
            metrics::record_reconciliation_error(cp_type.as_str(), start.elapsed(), e.is_transient());
            Err(e)
        }
    }
}

/// Run one pass. Returns whether the control plane is ready for use.
async fn run_pipeline(ctx: &Context, cp: &ControlPlane, tracker: &mut StatusTracker) -> Result<bool> {
    let store = ctx.store.as_ref();

    let migrated;
    let cp = match hooks::migrate_legacy_hook(store, cp).await? {
        Some(updated) => {
            tracker.rebase(&updated);
            migrated = updated;
            &migrated
        }
        None => cp,
    };

    if find_condition(&tracker.status.conditions, CONDITION_TYPE_READY).is_none() {
        tracker.set_condition(creating());
        tracker.write(store).await?;
    }

    let provisioned = provisioner_for(cp.spec.r#type).provision(ctx, cp).await?;
    tracker.status.secret_ref = Some(provisioned.secret_ref);
    tracker.set_condition(if provisioned.ready {
        available()
    } else {
        unavailable()
    });

    let mut ready = provisioned.ready;
    if has_condition_available(&tracker.status.conditions) {
        if waits_for_hooks(cp, tracker) {
            tracker.set_condition(waiting_for_post_create_hooks());
        }
        hooks::apply_post_create_hooks(ctx, cp, tracker).await?;
        if waits_for_hooks(cp, tracker) {
            ready = false;
        } else {
            tracker.set_condition(available());
        }
    }

    update_status_for_syncing_success(store, tracker, cp.metadata.generation).await?;
    Ok(ready)
}

fn waits_for_hooks(cp: &ControlPlane, tracker: &StatusTracker) -> bool {
    cp.spec.wait_for_post_create_hooks.unwrap_or(false)
        && !hooks::all_hooks_applied(cp, &tracker.status.post_create_hooks)
}

/// Requeue policy shared by both controllers.
///
/// Transient errors are retried quickly, everything else on the standard schedule.
pub fn error_policy<K>(_obj: Arc<K>, err: &Error, _ctx: Arc<Context>) -> Action {
    if err.is_transient() {
        Action::requeue(Duration::from_secs(TRANSIENT_ERROR_REQUEUE_DURATION_SECS))
    } else {
        Action::requeue(Duration::from_secs(ERROR_REQUEUE_DURATION_SECS))
    }
}

#[cfg(test)]
mod tests;
