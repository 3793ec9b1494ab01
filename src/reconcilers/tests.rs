// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! End-to-end reconcile passes against the in-memory store.

#[cfg(test)]
mod tests {
    use crate::conditions::{
        find_condition, CONDITION_TYPE_READY, CONDITION_TYPE_SYNCED, REASON_AVAILABLE,
        REASON_DELETING, REASON_RECONCILE_ERROR, REASON_RECONCILE_PAUSED,
        REASON_RECONCILE_SUCCESS, REASON_UNAVAILABLE, REASON_WAITING_FOR_POST_CREATE_HOOKS,
        STATUS_FALSE, STATUS_TRUE,
    };
    use crate::constants::PAUSED_ANNOTATION;
    use crate::crd::{
        ControlPlane, ControlPlaneSpec, ControlPlaneType, HookVar, PostCreateHook,
        PostCreateHookSpec, PostCreateHookUse,
    };
    use crate::errors::Error;
    use crate::reconcilers::{error_policy, is_paused, provisioner_for, reconcile_control_plane};
    use crate::resources::build_secret;
    use crate::store::api_resource;
    use crate::test_support::{FakeStore, TestHarness};
    use k8s_openapi::api::apps::v1::Deployment;
    use k8s_openapi::api::core::v1::{ConfigMap, Namespace, Secret};
    use kube::runtime::controller::Action;
    use serde_json::json;
    use std::collections::BTreeMap;
    use std::sync::Arc;
    use std::time::Duration;

    // =====================================================
    // Helper Functions
    // =====================================================

    fn seed_control_plane(store: &FakeStore, cp: &ControlPlane) -> Arc<ControlPlane> {
        let stored = store.seed(&api_resource::<ControlPlane>(), None, cp);
        Arc::new(serde_json::from_value(stored).unwrap())
    }

    fn reload(store: &FakeStore, name: &str) -> Arc<ControlPlane> {
        let stored = store
            .object(&api_resource::<ControlPlane>(), None, name)
            .expect("control plane exists");
        Arc::new(serde_json::from_value(stored).unwrap())
    }

    fn control_plane(name: &str, cp_type: ControlPlaneType) -> ControlPlane {
        ControlPlane::new(
            name,
            ControlPlaneSpec {
                r#type: cp_type,
                ..Default::default()
            },
        )
    }

    fn with_hooks(mut cp: ControlPlane, hooks: &[&str], wait: bool) -> ControlPlane {
        cp.spec.post_create_hooks = hooks
            .iter()
            .map(|h| PostCreateHookUse {
                hook_name: (*h).to_string(),
                vars: BTreeMap::new(),
            })
            .collect();
        cp.spec.wait_for_post_create_hooks = Some(wait);
        cp
    }

    fn seed_hook(store: &FakeStore, name: &str) {
        let hook = PostCreateHook::new(
            name,
            PostCreateHookSpec {
                templates: vec![json!({
                    "apiVersion": "v1",
                    "kind": "ConfigMap",
                    "metadata": { "name": "{{.ControlPlaneName}}-{{.HookName}}" },
                    "data": { "color": "{{.color}}" }
                })],
                default_vars: vec![HookVar {
                    name: "color".into(),
                    value: "blue".into(),
                }],
            },
        );
        store.seed(&api_resource::<PostCreateHook>(), None, &hook);
    }

    fn seed_shared_postgres(store: &FakeStore) {
        let owner = ControlPlane::new("unused", ControlPlaneSpec::default());
        let secret = build_secret(
            &owner,
            "postgres-postgresql",
            "kubeflex-system",
            "postgres",
            BTreeMap::from([("postgres-password".to_string(), "pw".to_string())]),
        );
        store.seed(&api_resource::<Secret>(), Some("kubeflex-system"), &secret);
    }

    fn condition(cp: &ControlPlane, condition_type: &str) -> (String, String, String) {
        let status = cp.status.as_ref().expect("status written");
        let c = find_condition(&status.conditions, condition_type).expect("condition present");
        (c.status.clone(), c.reason.clone(), c.message.clone())
    }

    // =====================================================
    // Dispatch
    // =====================================================

    #[test]
    fn test_provisioner_for_every_type() {
        for cp_type in [
            ControlPlaneType::K8s,
            ControlPlaneType::Ocm,
            ControlPlaneType::Vcluster,
            ControlPlaneType::Host,
            ControlPlaneType::External,
            ControlPlaneType::K3s,
        ] {
            let _ = provisioner_for(cp_type);
        }
    }

    #[test]
    fn test_is_paused() {
        let mut cp = control_plane("cp1", ControlPlaneType::Host);
        assert!(!is_paused(&cp));
        cp.metadata.annotations = Some(BTreeMap::from([(
            PAUSED_ANNOTATION.to_string(),
            "false".to_string(),
        )]));
        assert!(!is_paused(&cp));
        cp.metadata.annotations = Some(BTreeMap::from([(
            PAUSED_ANNOTATION.to_string(),
            "true".to_string(),
        )]));
        assert!(is_paused(&cp));
    }

    #[test]
    fn test_error_policy_requeue() {
        let h = TestHarness::new(FakeStore::new());
        let cp = Arc::new(control_plane("cp1", ControlPlaneType::Host));

        let transient = Error::Timeout("service account token".into());
        assert_eq!(
            error_policy(cp.clone(), &transient, h.ctx.clone()),
            Action::requeue(Duration::from_secs(5))
        );
        assert_eq!(
            error_policy(cp, &Error::MissingBootstrapSecretRef("ext".into()), h.ctx.clone()),
            Action::requeue(Duration::from_secs(30))
        );
    }

    // =====================================================
    // k8s Control Plane
    // =====================================================

    #[tokio::test]
    async fn test_k8s_control_plane_happy_path() {
        let h = TestHarness::new(FakeStore::new());
        seed_shared_postgres(&h.store);
        let cp = seed_control_plane(&h.store, &control_plane("cp1", ControlPlaneType::K8s));

        let action = reconcile_control_plane(cp, h.ctx.clone()).await.unwrap();

        assert_eq!(action, Action::requeue(Duration::from_secs(15)));
        assert!(h.store.contains(&api_resource::<Namespace>(), None, "cp1-system"));
        let certs = h
            .store
            .object(&api_resource::<Secret>(), Some("cp1-system"), "k8s-certs")
            .unwrap();
        assert_eq!(certs["data"].as_object().unwrap().len(), 11);
        assert!(h
            .store
            .contains(&api_resource::<Secret>(), Some("cp1-system"), "admin-kubeconfig"));
        assert!(h
            .store
            .contains(&api_resource::<Secret>(), Some("cp1-system"), "cm-kubeconfig"));

        let apiserver = h
            .store
            .object(&api_resource::<Deployment>(), Some("cp1-system"), "kube-apiserver")
            .unwrap();
        let containers: Vec<&str> = apiserver["spec"]["template"]["spec"]["containers"]
            .as_array()
            .unwrap()
            .iter()
            .map(|c| c["name"].as_str().unwrap())
            .collect();
        assert!(containers.contains(&"kine"));
        assert!(containers.contains(&"kube-apiserver"));

        let cp = reload(&h.store, "cp1");
        let (status, reason, _) = condition(&cp, CONDITION_TYPE_SYNCED);
        assert_eq!((status.as_str(), reason.as_str()), (STATUS_TRUE, REASON_RECONCILE_SUCCESS));
        let (_, reason, _) = condition(&cp, CONDITION_TYPE_READY);
        assert_eq!(reason, REASON_UNAVAILABLE);
        let secret_ref = cp.status.as_ref().unwrap().secret_ref.clone().unwrap();
        assert_eq!(secret_ref.name, "admin-kubeconfig");
        assert_eq!(secret_ref.namespace, "cp1-system");
        assert_eq!(cp.status.as_ref().unwrap().observed_generation, Some(1));

        h.store.reset_calls();
        reconcile_control_plane(cp, h.ctx.clone()).await.unwrap();
        assert_eq!(h.store.count("create", None), 0);
        assert_eq!(h.store.count("patch_status", None), 0);
    }

    #[tokio::test]
    async fn test_k8s_control_plane_becomes_available() {
        let h = TestHarness::new(FakeStore::new());
        seed_shared_postgres(&h.store);
        let cp = seed_control_plane(&h.store, &control_plane("cp1", ControlPlaneType::K8s));
        reconcile_control_plane(cp, h.ctx.clone()).await.unwrap();

        h.store.set_status(
            &api_resource::<Deployment>(),
            Some("cp1-system"),
            "kube-apiserver",
            json!({ "replicas": 1, "readyReplicas": 1 }),
        );
        let action = reconcile_control_plane(reload(&h.store, "cp1"), h.ctx.clone())
            .await
            .unwrap();

        assert_eq!(action, Action::requeue(Duration::from_secs(300)));
        let (status, reason, _) = condition(&reload(&h.store, "cp1"), CONDITION_TYPE_READY);
        assert_eq!((status.as_str(), reason.as_str()), (STATUS_TRUE, REASON_AVAILABLE));
    }

    // =====================================================
    // Post-Create Hooks
    // =====================================================

    #[tokio::test]
    async fn test_hooks_applied_once_control_plane_available() {
        let h = TestHarness::new(FakeStore::with_token_projection());
        seed_hook(&h.store, "color");
        let cp = seed_control_plane(
            &h.store,
            &with_hooks(control_plane("cp1", ControlPlaneType::Host), &["color"], false),
        );

        reconcile_control_plane(cp, h.ctx.clone()).await.unwrap();

        let cm = h
            .store
            .object(&api_resource::<ConfigMap>(), Some("cp1-system"), "cp1-color")
            .expect("hook object applied");
        assert_eq!(cm["data"]["color"], "blue");
        let cp = reload(&h.store, "cp1");
        assert_eq!(
            cp.status.as_ref().unwrap().post_create_hooks.get("color"),
            Some(&true)
        );

        h.store.reset_calls();
        reconcile_control_plane(cp, h.ctx.clone()).await.unwrap();
        assert_eq!(h.store.count("apply", None), 0);
    }

    #[tokio::test]
    async fn test_hooks_wait_until_control_plane_available() {
        let h = TestHarness::new(FakeStore::new());
        seed_shared_postgres(&h.store);
        seed_hook(&h.store, "color");
        let cp = seed_control_plane(
            &h.store,
            &with_hooks(control_plane("cp1", ControlPlaneType::K8s), &["color"], false),
        );

        reconcile_control_plane(cp, h.ctx.clone()).await.unwrap();

        assert_eq!(h.store.count("apply", None), 0);
        let cp = reload(&h.store, "cp1");
        assert!(cp.status.as_ref().unwrap().post_create_hooks.is_empty());
    }

    #[tokio::test]
    async fn test_wait_for_hooks_keeps_control_plane_not_ready() {
        let h = TestHarness::new(FakeStore::with_token_projection());
        let cp = seed_control_plane(
            &h.store,
            &with_hooks(control_plane("cp1", ControlPlaneType::Host), &["missing"], true),
        );

        let err = reconcile_control_plane(cp, h.ctx.clone())
            .await
            .expect_err("hook does not exist");

        assert!(matches!(err, Error::HookNotFound(_)));
        let cp = reload(&h.store, "cp1");
        let (status, reason, _) = condition(&cp, CONDITION_TYPE_READY);
        assert_eq!(
            (status.as_str(), reason.as_str()),
            (STATUS_FALSE, REASON_WAITING_FOR_POST_CREATE_HOOKS)
        );
        let (status, reason, _) = condition(&cp, CONDITION_TYPE_SYNCED);
        assert_eq!((status.as_str(), reason.as_str()), (STATUS_FALSE, REASON_RECONCILE_ERROR));

        seed_hook(&h.store, "missing");
        let action = reconcile_control_plane(cp, h.ctx.clone()).await.unwrap();

        assert_eq!(action, Action::requeue(Duration::from_secs(300)));
        let (status, reason, _) = condition(&reload(&h.store, "cp1"), CONDITION_TYPE_READY);
        assert_eq!((status.as_str(), reason.as_str()), (STATUS_TRUE, REASON_AVAILABLE));
    }

    #[tokio::test]
    async fn test_legacy_hook_fields_migrated() {
        let h = TestHarness::new(FakeStore::with_token_projection());
        seed_hook(&h.store, "color");
        let mut cp = control_plane("cp1", ControlPlaneType::Host);
        cp.spec.post_create_hook = Some("color".into());
        cp.spec.post_create_hook_vars =
            Some(BTreeMap::from([("color".to_string(), "red".to_string())]));
        let cp = seed_control_plane(&h.store, &cp);

        reconcile_control_plane(cp, h.ctx.clone()).await.unwrap();

        let cp = reload(&h.store, "cp1");
        assert!(cp.spec.post_create_hook.is_none());
        assert!(cp.spec.post_create_hook_vars.is_none());
        assert_eq!(cp.spec.post_create_hooks.len(), 1);
        assert_eq!(cp.spec.post_create_hooks[0].hook_name, "color");
        assert_eq!(cp.status.as_ref().unwrap().observed_generation, Some(2));
        let cm = h
            .store
            .object(&api_resource::<ConfigMap>(), Some("cp1-system"), "cp1-color")
            .unwrap();
        assert_eq!(cm["data"]["color"], "red");
    }

    // =====================================================
    // Lifecycle
    // =====================================================

    #[tokio::test]
    async fn test_paused_control_plane_is_left_alone() {
        let h = TestHarness::new(FakeStore::new());
        let mut cp = control_plane("cp1", ControlPlaneType::K8s);
        cp.metadata.annotations = Some(BTreeMap::from([(
            PAUSED_ANNOTATION.to_string(),
            "true".to_string(),
        )]));
        let cp = seed_control_plane(&h.store, &cp);

        let action = reconcile_control_plane(cp, h.ctx.clone()).await.unwrap();

        assert_eq!(action, Action::await_change());
        assert_eq!(h.store.count("create", None), 0);
        let (_, reason, _) = condition(&reload(&h.store, "cp1"), CONDITION_TYPE_SYNCED);
        assert_eq!(reason, REASON_RECONCILE_PAUSED);
    }

    #[tokio::test]
    async fn test_deleting_control_plane_is_not_provisioned() {
        let h = TestHarness::new(FakeStore::new());
        let mut cp = serde_json::to_value(control_plane("cp1", ControlPlaneType::K8s)).unwrap();
        cp["metadata"]["deletionTimestamp"] = json!("2025-01-01T00:00:00Z");
        let stored = h.store.seed(&api_resource::<ControlPlane>(), None, &cp);
        let cp = Arc::new(serde_json::from_value::<ControlPlane>(stored).unwrap());

        let action = reconcile_control_plane(cp, h.ctx.clone()).await.unwrap();

        assert_eq!(action, Action::await_change());
        assert_eq!(h.store.count("create", None), 0);
        let (_, reason, _) = condition(&reload(&h.store, "cp1"), CONDITION_TYPE_READY);
        assert_eq!(reason, REASON_DELETING);
    }

    #[tokio::test]
    async fn test_failed_step_recorded_in_synced_condition() {
        let h = TestHarness::new(FakeStore::new());
        let cp = seed_control_plane(&h.store, &control_plane("ext", ControlPlaneType::External));

        let err = reconcile_control_plane(cp, h.ctx.clone())
            .await
            .expect_err("bootstrap reference missing");

        assert!(!err.is_transient());
        let (status, reason, message) = condition(&reload(&h.store, "ext"), CONDITION_TYPE_SYNCED);
        assert_eq!(status, STATUS_FALSE);
        assert_eq!(reason, REASON_RECONCILE_ERROR);
        assert_eq!(message, err.to_string());
    }

    #[tokio::test]
    async fn test_host_control_plane_ready_in_one_pass() {
        let h = TestHarness::new(FakeStore::with_token_projection());
        let cp = seed_control_plane(&h.store, &control_plane("cp1", ControlPlaneType::Host));

        let action = reconcile_control_plane(cp, h.ctx.clone()).await.unwrap();

        assert_eq!(action, Action::requeue(Duration::from_secs(300)));
        let cp = reload(&h.store, "cp1");
        let (status, reason, _) = condition(&cp, CONDITION_TYPE_READY);
        assert_eq!((status.as_str(), reason.as_str()), (STATUS_TRUE, REASON_AVAILABLE));
        let secret_ref = cp.status.as_ref().unwrap().secret_ref.clone().unwrap();
        assert_eq!(secret_ref.in_cluster_key, "kubeconfig-incluster");
    }
}
