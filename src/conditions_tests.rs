// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Unit tests for `conditions.rs`

#[cfg(test)]
mod tests {
    use crate::conditions::*;
    use crate::crd::Condition;

    const T1: &str = "2025-01-01T00:00:00+00:00";
    const T2: &str = "2025-01-01T00:05:00+00:00";
    const T3: &str = "2025-01-01T00:10:00+00:00";

    fn cond(t: &str, status: &str, reason: &str, message: &str) -> Condition {
        Condition {
            r#type: t.to_string(),
            status: status.to_string(),
            reason: reason.to_string(),
            message: message.to_string(),
            last_update_time: String::new(),
            last_transition_time: String::new(),
        }
    }

    #[test]
    fn test_ensure_appends_new_type() {
        let mut conditions = Vec::new();
        ensure_condition_at(&mut conditions, reconcile_success(), T1);
        ensure_condition_at(&mut conditions, unavailable(), T1);

        assert_eq!(conditions.len(), 2);
        assert_eq!(conditions[0].r#type, CONDITION_TYPE_SYNCED);
        assert_eq!(conditions[1].r#type, CONDITION_TYPE_READY);
        assert_eq!(conditions[1].last_transition_time, T1);
    }

    #[test]
    fn test_ensure_replaces_in_place() {
        let mut conditions = Vec::new();
        ensure_condition_at(&mut conditions, creating(), T1);
        ensure_condition_at(&mut conditions, reconcile_success(), T1);

        let c2 = available();
        ensure_condition_at(&mut conditions, c2.clone(), T2);
        ensure_condition_at(&mut conditions, c2.clone(), T3);

        assert_eq!(conditions.len(), 2);
        assert_eq!(conditions[0].r#type, CONDITION_TYPE_READY);
        assert!(are_conditions_equal(&conditions[0], &c2));
    }

    #[test]
    fn test_transition_time_kept_when_unchanged() {
        let mut conditions = Vec::new();
        ensure_condition_at(&mut conditions, available(), T1);
        ensure_condition_at(&mut conditions, available(), T2);

        assert_eq!(conditions[0].last_transition_time, T1);
        assert_eq!(conditions[0].last_update_time, T2);
    }

    #[test]
    fn test_transition_time_bumped_on_status_change() {
        let mut conditions = Vec::new();
        ensure_condition_at(&mut conditions, unavailable(), T1);
        ensure_condition_at(&mut conditions, available(), T2);

        assert_eq!(conditions[0].last_transition_time, T2);
        assert_eq!(conditions[0].last_update_time, T2);
    }

    #[test]
    fn test_transition_time_bumped_on_single_char_message_change() {
        let mut conditions = Vec::new();
        ensure_condition_at(&mut conditions, reconcile_error(&"boom"), T1);
        ensure_condition_at(&mut conditions, reconcile_error(&"boom "), T2);
        assert_eq!(conditions[0].last_transition_time, T2);

        ensure_condition_at(&mut conditions, reconcile_error(&"boom "), T3);
        assert_eq!(conditions[0].last_transition_time, T2);
        assert_eq!(conditions[0].last_update_time, T3);
    }

    #[test]
    fn test_has_condition_available() {
        let mut conditions = Vec::new();
        assert!(!has_condition_available(&conditions));

        ensure_condition(&mut conditions, waiting_for_post_create_hooks());
        assert!(!has_condition_available(&conditions));

        ensure_condition(&mut conditions, available());
        assert!(has_condition_available(&conditions));

        // Ready=True with another reason does not count
        conditions[0].reason = "Other".to_string();
        assert!(!has_condition_available(&conditions));
    }

    #[test]
    fn test_conditions_equal_ignores_timestamps() {
        let mut a = cond("Ready", "True", "Available", "");
        let mut b = a.clone();
        a.last_update_time = T1.to_string();
        a.last_transition_time = T1.to_string();
        b.last_update_time = T3.to_string();
        b.last_transition_time = T2.to_string();
        assert!(are_conditions_equal(&a, &b));

        b.message = "different".to_string();
        assert!(!are_conditions_equal(&a, &b));
    }

    #[test]
    fn test_condition_slices_order_independent() {
        let a = vec![
            cond("Ready", "True", "Available", ""),
            cond("Synced", "True", "ReconcileSuccess", ""),
        ];
        let mut b = a.clone();
        b.reverse();
        b[0].last_update_time = T3.to_string();

        assert!(are_condition_slices_same(&a, &b));
        assert!(are_condition_slices_same(&b, &a));
    }

    #[test]
    fn test_condition_slices_differ_in_size_or_content() {
        let a = vec![cond("Ready", "True", "Available", "")];
        let b = vec![
            cond("Ready", "True", "Available", ""),
            cond("Synced", "True", "ReconcileSuccess", ""),
        ];
        assert!(!are_condition_slices_same(&a, &b));

        let c = vec![cond("Ready", "False", "Unavailable", "")];
        assert!(!are_condition_slices_same(&a, &c));
        assert!(are_condition_slices_same(&[], &[]));
    }

    #[test]
    fn test_factories() {
        let err = reconcile_error(&"secret not found");
        assert_eq!(err.r#type, CONDITION_TYPE_SYNCED);
        assert_eq!(err.status, STATUS_FALSE);
        assert_eq!(err.reason, REASON_RECONCILE_ERROR);
        assert_eq!(err.message, "secret not found");

        assert_eq!(reconcile_paused().reason, REASON_RECONCILE_PAUSED);
        assert_eq!(reconcile_paused().status, STATUS_FALSE);
        assert_eq!(deleting().r#type, CONDITION_TYPE_READY);
        assert_eq!(creating().reason, REASON_CREATING);
        assert_eq!(reconcile_success().status, STATUS_TRUE);
    }

    #[test]
    fn test_find_condition() {
        let mut conditions = Vec::new();
        ensure_condition(&mut conditions, reconcile_success());
        assert!(find_condition(&conditions, CONDITION_TYPE_SYNCED).is_some());
        assert!(find_condition(&conditions, CONDITION_TYPE_READY).is_none());
    }
}
