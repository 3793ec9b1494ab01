// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Status write protocol shared by every control plane type.
//!
//! A reconcile pass accumulates status changes in a [`StatusTracker`] and
//! writes them with a merge patch on the status subresource. Each patch carries
//! `metadata.resourceVersion` of the object the pass is working from, so a write
//! based on a stale object fails with `Conflict`; the next pass starts from a
//! fresh read. The tracker advances its resource version after each of its own
//! writes.
//!
//! Every pass ends with a status write attempt, but the write is skipped when
//! the status differs from the last written one only in timestamps. A
//! condition's stored `lastUpdateTime` therefore records the last pass that
//! changed the status, not the last pass that ran. Each status write raises a
//! watch event on the `ControlPlane`.

use crate::conditions::{
    are_condition_slices_same, ensure_condition, reconcile_error, reconcile_success,
};
use crate::crd::{Condition, ControlPlane, ControlPlaneStatus};
use crate::errors::{Error, Result};
use crate::store::{api_resource, ClusterStore};
use kube::ResourceExt;
use serde_json::json;
use tracing::{debug, warn};

/// Pending status of one `ControlPlane` during a reconcile pass.
#[derive(Clone, Debug)]
pub struct StatusTracker {
    name: String,
    resource_version: Option<String>,
    written: ControlPlaneStatus,
    /// Status as it should be after this pass
    pub status: ControlPlaneStatus,
}

impl StatusTracker {
    #[must_use]
    pub fn new(cp: &ControlPlane) -> Self {
        let status = cp.status.clone().unwrap_or_default();
        Self {
            name: cp.name_any(),
            resource_version: cp.resource_version(),
            written: status.clone(),
            status,
        }
    }

    /// Upsert a condition.
    pub fn set_condition(&mut self, condition: Condition) {
        ensure_condition(&mut self.status.conditions, condition);
    }

    /// Continue from a newer version of the object, e.g. after a spec update.
    pub fn rebase(&mut self, cp: &ControlPlane) {
        self.resource_version = cp.resource_version();
    }

    /// Whether the pending status differs from the last written one, ignoring timestamps.
    #[must_use]
    pub fn is_dirty(&self) -> bool {
        !are_condition_slices_same(&self.written.conditions, &self.status.conditions)
            || self.written.observed_generation != self.status.observed_generation
            || self.written.secret_ref != self.status.secret_ref
            || self.written.post_create_hooks != self.status.post_create_hooks
    }

    /// Write the pending status if it changed.
    ///
    /// # Errors
    ///
    /// Returns `Conflict` if the object changed since it was read, or any API error.
    pub async fn write(&mut self, store: &dyn ClusterStore) -> Result<()> {
        if !self.is_dirty() {
            debug!(control_plane = %self.name, "Status unchanged, skipping write");
            return Ok(());
        }

        let mut patch = json!({ "status": self.status });
        if let Some(rv) = &self.resource_version {
            patch["metadata"] = json!({ "resourceVersion": rv });
        }
        let updated = store
            .patch_status(&api_resource::<ControlPlane>(), None, &self.name, &patch)
            .await?;
        self.resource_version = updated.metadata.resource_version;
        self.written = self.status.clone();
        debug!(control_plane = %self.name, "Status updated");
        Ok(())
    }
}

/// Record a failed pass as `Synced=False/ReconcileError` and write the status.
///
/// A failure to write is logged and does not replace `err`, which is what the
/// caller reports.
pub async fn update_status_for_syncing_error(
    store: &dyn ClusterStore,
    tracker: &mut StatusTracker,
    err: &Error,
) {
    tracker.set_condition(reconcile_error(err));
    if let Err(write_err) = tracker.write(store).await {
        warn!(
            control_plane = %tracker.name,
            error = %write_err,
            "Failed to record reconcile error in status"
        );
    }
}

/// Record a successful pass as `Synced=True/ReconcileSuccess` and write the status.
///
/// # Errors
///
/// Returns any error from the status write.
pub async fn update_status_for_syncing_success(
    store: &dyn ClusterStore,
    tracker: &mut StatusTracker,
    generation: Option<i64>,
) -> Result<()> {
    tracker.set_condition(reconcile_success());
    tracker.status.observed_generation = generation;
    tracker.write(store).await
}

#[cfg(test)]
#[path = "status_tests.rs"]
mod status_tests;
