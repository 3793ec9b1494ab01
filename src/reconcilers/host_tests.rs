// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Unit tests for `host.rs`

#[cfg(test)]
mod tests {
    use crate::crd::{ControlPlane, ControlPlaneSpec, ControlPlaneType};
    use crate::errors::Error;
    use crate::kubeconfig;
    use crate::reconcilers::base::{secret_value, ControlPlaneProvisioner};
    use crate::reconcilers::host::*;
    use crate::store::api_resource;
    use crate::test_support::{FakeStore, TestHarness, FAKE_CA, FAKE_TOKEN};
    use k8s_openapi::api::core::v1::Secret;
    use k8s_openapi::api::rbac::v1::ClusterRoleBinding;

    fn control_plane() -> ControlPlane {
        let mut cp = ControlPlane::new(
            "hosted",
            ControlPlaneSpec {
                r#type: ControlPlaneType::Host,
                ..Default::default()
            },
        );
        cp.metadata.uid = Some("uid-hosted".into());
        cp
    }

    #[tokio::test]
    async fn test_host_kubeconfig_from_projected_token() {
        let h = TestHarness::new(FakeStore::with_token_projection());
        let cp = control_plane();

        let provisioned = HostProvisioner.provision(&h.ctx, &cp).await.unwrap();

        assert!(provisioned.ready);
        assert_eq!(provisioned.secret_ref.key, "kubeconfig");
        assert_eq!(provisioned.secret_ref.in_cluster_key, "kubeconfig-incluster");

        let yaml = secret_value(h.store.as_ref(), "hosted-system", "admin-kubeconfig", "kubeconfig")
            .await
            .unwrap()
            .map(|b| String::from_utf8(b).unwrap())
            .unwrap();
        let (server, ca) = kubeconfig::current_cluster(&yaml).unwrap();
        assert_eq!(server, "https://kubernetes.default.svc");
        assert_eq!(ca, FAKE_CA.as_bytes());
        assert!(yaml.contains(FAKE_TOKEN));

        let crb = h
            .store
            .object(&api_resource::<ClusterRoleBinding>(), None, "hosted-kubeflex-host")
            .unwrap();
        assert_eq!(crb["roleRef"]["name"], "cluster-admin");
        assert_eq!(crb["subjects"][0]["namespace"], "hosted-system");
        assert_eq!(crb["metadata"]["ownerReferences"][0]["name"], "hosted");
    }

    #[tokio::test]
    async fn test_host_second_pass_creates_nothing() {
        let h = TestHarness::new(FakeStore::with_token_projection());
        let cp = control_plane();

        HostProvisioner.provision(&h.ctx, &cp).await.unwrap();
        h.store.reset_calls();
        HostProvisioner.provision(&h.ctx, &cp).await.unwrap();

        assert_eq!(h.store.count("create", None), 0);
        assert_eq!(h.store.count("replace", None), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_host_token_wait_times_out_then_resumes() {
        let h = TestHarness::new(FakeStore::new());
        let cp = control_plane();

        let err = HostProvisioner
            .provision(&h.ctx, &cp)
            .await
            .expect_err("token never projected");
        assert!(matches!(err, Error::Timeout(_)));
        assert!(err.is_transient());
        assert!(!h
            .store
            .contains(&api_resource::<Secret>(), Some("hosted-system"), "admin-kubeconfig"));

        h.store.set_data(
            &api_resource::<Secret>(),
            Some("hosted-system"),
            "kubeflex-host-token",
            &[("token", b"late-token"), ("ca.crt", b"late-ca")],
        );
        HostProvisioner.provision(&h.ctx, &cp).await.unwrap();

        let yaml = secret_value(h.store.as_ref(), "hosted-system", "admin-kubeconfig", "kubeconfig-incluster")
            .await
            .unwrap()
            .map(|b| String::from_utf8(b).unwrap())
            .unwrap();
        assert!(yaml.contains("late-token"));
        assert_eq!(h.store.count("create", Some("ServiceAccount")), 1);
    }
}
