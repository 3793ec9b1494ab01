// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Status condition ledger shared by `ControlPlane` and `PostCreateHook`.
//!
//! Conditions form a set keyed by `type`. Two types are in use:
//!
//! - `Synced` - outcome of the last reconcile pass (`ReconcileSuccess`,
//!   `ReconcileError` or `ReconcilePaused`)
//! - `Ready` - observed readiness of the control plane (`Creating`, `Deleting`,
//!   `Available`, `Unavailable` or `WaitingForPostCreateHooks`)
//!
//! Each condition carries two timestamps. `lastUpdateTime` is refreshed on every
//! write. `lastTransitionTime` is refreshed only when `status`, `reason` or
//! `message` change; the message is compared byte for byte.
//!
//! # Example
//!
//! ```rust
//! use kflex::conditions::{ensure_condition, has_condition_available, available, reconcile_success};
//!
//! let mut conditions = Vec::new();
//! ensure_condition(&mut conditions, reconcile_success());
//! ensure_condition(&mut conditions, available());
//! assert_eq!(conditions.len(), 2);
//! assert!(has_condition_available(&conditions));
//! ```

use crate::crd::Condition;
use chrono::Utc;

// ============================================================================
// Condition Types
// ============================================================================

/// Observed readiness of the resource
pub const CONDITION_TYPE_READY: &str = "Ready";

/// Outcome of the last reconcile pass
pub const CONDITION_TYPE_SYNCED: &str = "Synced";

// ============================================================================
// Condition Statuses
// ============================================================================

pub const STATUS_TRUE: &str = "True";
pub const STATUS_FALSE: &str = "False";
pub const STATUS_UNKNOWN: &str = "Unknown";

// ============================================================================
// Condition Reasons
// ============================================================================

/// The control plane is being provisioned for the first time
pub const REASON_CREATING: &str = "Creating";

/// The control plane has a deletion timestamp
pub const REASON_DELETING: &str = "Deleting";

/// The control plane serves requests
pub const REASON_AVAILABLE: &str = "Available";

/// The control plane does not serve requests yet
pub const REASON_UNAVAILABLE: &str = "Unavailable";

/// The control plane serves requests but post-create hooks are still pending
pub const REASON_WAITING_FOR_POST_CREATE_HOOKS: &str = "WaitingForPostCreateHooks";

/// The last reconcile pass completed
pub const REASON_RECONCILE_SUCCESS: &str = "ReconcileSuccess";

/// The last reconcile pass failed; the message carries the error
pub const REASON_RECONCILE_ERROR: &str = "ReconcileError";

/// Reconciliation is paused through annotation
pub const REASON_RECONCILE_PAUSED: &str = "ReconcilePaused";

/// Current time in the RFC3339 format used by condition timestamps.
#[must_use]
pub fn now() -> String {
    Utc::now().to_rfc3339()
}

fn new_condition(condition_type: &str, status: &str, reason: &str, message: &str) -> Condition {
    let ts = now();
    Condition {
        r#type: condition_type.to_string(),
        status: status.to_string(),
        reason: reason.to_string(),
        message: message.to_string(),
        last_update_time: ts.clone(),
        last_transition_time: ts,
    }
}

// ============================================================================
// Factories
// ============================================================================

/// `Ready=False/Creating`
#[must_use]
pub fn creating() -> Condition {
    new_condition(CONDITION_TYPE_READY, STATUS_FALSE, REASON_CREATING, "")
}

/// `Ready=False/Deleting`
#[must_use]
pub fn deleting() -> Condition {
    new_condition(CONDITION_TYPE_READY, STATUS_FALSE, REASON_DELETING, "")
}

/// `Ready=True/Available`
#[must_use]
pub fn available() -> Condition {
    new_condition(CONDITION_TYPE_READY, STATUS_TRUE, REASON_AVAILABLE, "")
}

/// `Ready=False/Unavailable`
#[must_use]
pub fn unavailable() -> Condition {
    new_condition(CONDITION_TYPE_READY, STATUS_FALSE, REASON_UNAVAILABLE, "")
}

/// `Ready=False/WaitingForPostCreateHooks`
#[must_use]
pub fn waiting_for_post_create_hooks() -> Condition {
    new_condition(
        CONDITION_TYPE_READY,
        STATUS_FALSE,
        REASON_WAITING_FOR_POST_CREATE_HOOKS,
        "",
    )
}

/// `Synced=True/ReconcileSuccess`
#[must_use]
pub fn reconcile_success() -> Condition {
    new_condition(
        CONDITION_TYPE_SYNCED,
        STATUS_TRUE,
        REASON_RECONCILE_SUCCESS,
        "",
    )
}

/// `Synced=False/ReconcileError` with the error text as message.
#[must_use]
pub fn reconcile_error(err: &dyn std::fmt::Display) -> Condition {
    new_condition(
        CONDITION_TYPE_SYNCED,
        STATUS_FALSE,
        REASON_RECONCILE_ERROR,
        &err.to_string(),
    )
}

/// `Synced=False/ReconcilePaused`
#[must_use]
pub fn reconcile_paused() -> Condition {
    new_condition(
        CONDITION_TYPE_SYNCED,
        STATUS_FALSE,
        REASON_RECONCILE_PAUSED,
        "",
    )
}

// ============================================================================
// Ledger Operations
// ============================================================================

/// Upsert `condition` into `conditions` by type, stamping it with the current time.
///
/// See [`ensure_condition_at`].
pub fn ensure_condition(conditions: &mut Vec<Condition>, condition: Condition) {
    ensure_condition_at(conditions, condition, &now());
}

/// Upsert `condition` into `conditions` by type at the instant `now`.
///
/// If no condition of the same type exists the new one is appended. Otherwise it
/// replaces the existing one in place, keeping its slot. `lastUpdateTime` is always
/// set to `now`; `lastTransitionTime` keeps the previous value unless `status`,
/// `reason` or `message` differ.
///
/// # Arguments
///
/// * `conditions` - Condition set to update
/// * `condition` - New condition; its timestamps are overwritten
/// * `now` - RFC3339 timestamp of the write
pub fn ensure_condition_at(conditions: &mut Vec<Condition>, mut condition: Condition, now: &str) {
    condition.last_update_time = now.to_string();

    match conditions
        .iter_mut()
        .find(|c| c.r#type == condition.r#type)
    {
        Some(existing) => {
            condition.last_transition_time = if are_conditions_equal(existing, &condition) {
                existing.last_transition_time.clone()
            } else {
                now.to_string()
            };
            *existing = condition;
        }
        None => {
            condition.last_transition_time = now.to_string();
            conditions.push(condition);
        }
    }
}

/// Find a condition by type.
#[must_use]
pub fn find_condition<'a>(conditions: &'a [Condition], condition_type: &str) -> Option<&'a Condition> {
    conditions.iter().find(|c| c.r#type == condition_type)
}

/// True iff a `Ready=True/Available` condition is present.
#[must_use]
pub fn has_condition_available(conditions: &[Condition]) -> bool {
    conditions.iter().any(|c| {
        c.r#type == CONDITION_TYPE_READY
            && c.status == STATUS_TRUE
            && c.reason == REASON_AVAILABLE
    })
}

/// Compare two conditions ignoring both timestamps.
#[must_use]
pub fn are_conditions_equal(a: &Condition, b: &Condition) -> bool {
    a.r#type == b.r#type && a.status == b.status && a.reason == b.reason && a.message == b.message
}

/// Compare two condition sets ignoring order and timestamps.
#[must_use]
pub fn are_condition_slices_same(a: &[Condition], b: &[Condition]) -> bool {
    a.len() == b.len()
        && a.iter().all(|x| b.iter().any(|y| are_conditions_equal(x, y)))
        && b.iter().all(|y| a.iter().any(|x| are_conditions_equal(x, y)))
}

#[cfg(test)]
#[path = "conditions_tests.rs"]
mod conditions_tests;
