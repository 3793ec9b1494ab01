// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Unit tests for `crd.rs`

#[cfg(test)]
mod tests {
    use crate::constants::{API_GROUP, API_VERSION, KIND_CONTROL_PLANE, KIND_POST_CREATE_HOOK};
    use crate::crd::*;
    use kube::CustomResourceExt;
    use serde_json::json;
    use std::collections::BTreeMap;

    #[test]
    fn test_control_plane_type_wire_names() {
        for (cp_type, wire) in [
            (ControlPlaneType::K8s, "k8s"),
            (ControlPlaneType::Ocm, "ocm"),
            (ControlPlaneType::Vcluster, "vcluster"),
            (ControlPlaneType::Host, "host"),
            (ControlPlaneType::External, "external"),
            (ControlPlaneType::K3s, "k3s"),
        ] {
            assert_eq!(serde_json::to_value(cp_type).unwrap(), json!(wire));
            assert_eq!(cp_type.to_string(), wire);
            let parsed: ControlPlaneType = serde_json::from_value(json!(wire)).unwrap();
            assert_eq!(parsed, cp_type);
        }
    }

    #[test]
    fn test_unknown_type_rejected() {
        let parsed = serde_json::from_value::<ControlPlaneType>(json!("kind"));
        assert!(parsed.is_err());
    }

    #[test]
    fn test_defaults() {
        assert_eq!(ControlPlaneType::default(), ControlPlaneType::K8s);
        assert_eq!(BackendDbType::default(), BackendDbType::Shared);
    }

    #[test]
    fn test_control_plane_spec_from_yaml() {
        let spec: ControlPlaneSpec = serde_yaml::from_str(
            r"
type: external
bootstrapSecretRef:
  name: cluster1-bootstrap
  namespace: default
adoptedTokenExpirationSeconds: 3600
postCreateHooks:
  - hookName: openshift-crds
    vars:
      version: '4.14'
waitForPostCreateHooks: true
",
        )
        .unwrap();

        assert_eq!(spec.r#type, ControlPlaneType::External);
        let bootstrap = spec.bootstrap_secret_ref.unwrap();
        assert_eq!(bootstrap.name, "cluster1-bootstrap");
        assert!(bootstrap.key.is_none());
        assert_eq!(spec.adopted_token_expiration_seconds, Some(3600));
        assert_eq!(spec.post_create_hooks[0].hook_name, "openshift-crds");
        assert_eq!(spec.post_create_hooks[0].vars["version"], "4.14");
        assert_eq!(spec.wait_for_post_create_hooks, Some(true));
    }

    #[test]
    fn test_legacy_hook_fields_deserialize() {
        let spec: ControlPlaneSpec = serde_json::from_value(json!({
            "type": "k8s",
            "postCreateHook": "hello",
            "postCreateHookVars": { "a": "b" }
        }))
        .unwrap();

        assert_eq!(spec.post_create_hook.as_deref(), Some("hello"));
        assert_eq!(
            spec.post_create_hook_vars,
            Some(BTreeMap::from([("a".to_string(), "b".to_string())]))
        );
        assert!(spec.post_create_hooks.is_empty());
    }

    #[test]
    fn test_status_serialization_omits_empty_fields() {
        let status = ControlPlaneStatus::default();
        let value = serde_json::to_value(&status).unwrap();
        assert_eq!(value, json!({ "conditions": [] }));

        let status = ControlPlaneStatus {
            secret_ref: Some(SecretReference {
                name: "admin-kubeconfig".into(),
                namespace: "cp1-system".into(),
                key: "kubeconfig".into(),
                in_cluster_key: "kubeconfig-incluster".into(),
            }),
            post_create_hooks: BTreeMap::from([("hello".to_string(), true)]),
            observed_generation: Some(3),
            ..Default::default()
        };
        let value = serde_json::to_value(&status).unwrap();
        assert_eq!(value["secretRef"]["inClusterKey"], "kubeconfig-incluster");
        assert_eq!(value["postCreateHooks"]["hello"], true);
        assert_eq!(value["observedGeneration"], 3);
    }

    #[test]
    fn test_post_create_hook_accepts_object_and_string_templates() {
        let spec: PostCreateHookSpec = serde_yaml::from_str(
            r"
templates:
  - apiVersion: v1
    kind: Namespace
    metadata:
      name: '{{.Namespace}}-extra'
  - |
    apiVersion: v1
    kind: ConfigMap
    metadata:
      name: cm
defaultVars:
  - name: image
    value: busybox
",
        )
        .unwrap();

        assert_eq!(spec.templates.len(), 2);
        assert!(spec.templates[0].is_object());
        assert!(spec.templates[1].is_string());
        assert_eq!(spec.default_vars[0].name, "image");
    }

    #[test]
    fn test_control_plane_crd_is_cluster_scoped() {
        let crd = ControlPlane::crd();
        assert_eq!(crd.spec.group, API_GROUP);
        assert_eq!(crd.spec.scope, "Cluster");
        assert_eq!(crd.spec.names.kind, KIND_CONTROL_PLANE);
        assert_eq!(crd.spec.names.plural, "controlplanes");
        assert_eq!(crd.spec.names.short_names, Some(vec!["cps".to_string()]));
        let version = &crd.spec.versions[0];
        assert_eq!(version.name, API_VERSION);
        assert!(version.subresources.as_ref().unwrap().status.is_some());
    }

    #[test]
    fn test_post_create_hook_crd_preserves_templates() {
        let crd = PostCreateHook::crd();
        assert_eq!(crd.spec.names.kind, KIND_POST_CREATE_HOOK);
        assert_eq!(crd.spec.scope, "Cluster");
        let schema = serde_json::to_value(&crd.spec.versions[0].schema).unwrap();
        let templates =
            &schema["openAPIV3Schema"]["properties"]["spec"]["properties"]["templates"];
        assert_eq!(templates["items"]["x-kubernetes-preserve-unknown-fields"], true);
    }
}
