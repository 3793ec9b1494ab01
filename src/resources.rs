// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Kubernetes resource builders for control plane sub-resources.
//!
//! Every function here is pure: it turns a [`ControlPlane`] and the operator
//! configuration into the desired object, with the standard labels and a
//! controller owner reference back to the control plane. The reconcilers decide
//! whether to create it.

use crate::config::OperatorConfig;
use crate::constants::{
    API_GROUP_VERSION, APISERVER_CERT_KEY, APISERVER_KEY_KEY, APISERVER_NAME,
    APISERVER_SECURE_PORT, CA_CERT_KEY, CA_KEY_KEY, CERTS_SECRET_NAME, CM_KUBECONFIG_KEY,
    CM_KUBECONFIG_SECRET, CONTROLLER_MANAGER_NAME, FRONT_PROXY_CA_CERT_KEY,
    FRONT_PROXY_CLIENT_CERT_KEY, FRONT_PROXY_CLIENT_KEY_KEY, GATEWAY_CLASS_NAME,
    GATEWAY_CONTROLLER_NAME, GATEWAY_NAME, K3S_BOOTSTRAP_NAME, K3S_KUBECONFIG_KEY,
    K3S_KUBECONFIG_KEY_IN_CLUSTER, K3S_KUBECONFIG_SECRET, K3S_PORT, K3S_SCRIPTS_CONFIG_MAP,
    K3S_SERVER_NAME, K3S_TOKEN_KEY, KIND_CONTROL_PLANE, KINE_CONTAINER_NAME, KINE_PORT,
    KUBELET_CLIENT_CERT_KEY, KUBELET_CLIENT_KEY_KEY, POSTGRES_PASSWORD_KEY, SA_PRIVATE_KEY_KEY,
    SA_PUBLIC_KEY_KEY, SERVICE_CLUSTER_IP_RANGE,
};
use crate::crd::ControlPlane;
use crate::labels::{build_labels, selector_labels, KFLEX_TYPE_LABEL};
use crate::naming;
use k8s_openapi::api::{
    apps::v1::{Deployment, DeploymentSpec, StatefulSet, StatefulSetSpec},
    batch::v1::{Job, JobSpec},
    core::v1::{
        ConfigMap, ConfigMapVolumeSource, Container, ContainerPort, EmptyDirVolumeSource, EnvVar,
        EnvVarSource, HTTPGetAction, KeyToPath, Namespace, PodSpec, PodTemplateSpec, Probe,
        Secret, SecretKeySelector, SecretVolumeSource, Service, ServiceAccount, ServicePort,
        ServiceSpec, TCPSocketAction, Volume, VolumeMount,
    },
    networking::v1::{
        HTTPIngressPath, HTTPIngressRuleValue, Ingress, IngressBackend, IngressRule,
        IngressServiceBackend, IngressSpec, ServiceBackendPort,
    },
    rbac::v1::{ClusterRoleBinding, PolicyRule, Role, RoleBinding, RoleRef, Subject},
};
use k8s_openapi::apimachinery::pkg::{
    apis::meta::v1::{LabelSelector, ObjectMeta, OwnerReference},
    util::intstr::IntOrString,
};
use k8s_openapi::ByteString;
use kube::api::{ApiResource, DynamicObject, GroupVersionKind};
use kube::ResourceExt;
use serde_json::json;
use std::collections::BTreeMap;
use tracing::debug;

// Embedded bootstrap script for k3s control planes
const K3S_BOOTSTRAP_SCRIPT: &str = include_str!("../templates/k3s-bootstrap.sh");
const K3S_BOOTSTRAP_SCRIPT_FILENAME: &str = "bootstrap.sh";

// Mount points
const PKI_PATH: &str = "/etc/kubernetes/pki";
const CM_KUBECONFIG_PATH: &str = "/etc/kubernetes/kubeconfig";
const K3S_DATA_PATH: &str = "/var/lib/rancher/k3s";
const SCRIPTS_PATH: &str = "/scripts";

// Volume names
const VOLUME_CERTS: &str = "k8s-certs";
const VOLUME_CM_KUBECONFIG: &str = "cm-kubeconfig";
const VOLUME_K3S_DATA: &str = "data";
const VOLUME_SCRIPTS: &str = "scripts";

/// Annotation enabling TLS passthrough on the nginx ingress controller
const NGINX_SSL_PASSTHROUGH_ANNOTATION: &str = "nginx.ingress.kubernetes.io/ssl-passthrough";

/// Env var kine reads the Postgres password from
const POSTGRES_PASSWORD_ENV: &str = "POSTGRES_PASSWORD";

/// Kinds that are not part of `k8s-openapi`.
#[must_use]
pub fn route_api_resource() -> ApiResource {
    ApiResource::from_gvk_with_plural(
        &GroupVersionKind::gvk("route.openshift.io", "v1", "Route"),
        "routes",
    )
}

#[must_use]
pub fn http_route_api_resource() -> ApiResource {
    ApiResource::from_gvk_with_plural(
        &GroupVersionKind::gvk("gateway.networking.k8s.io", "v1", "HTTPRoute"),
        "httproutes",
    )
}

#[must_use]
pub fn gateway_class_api_resource() -> ApiResource {
    ApiResource::from_gvk_with_plural(
        &GroupVersionKind::gvk("gateway.networking.k8s.io", "v1", "GatewayClass"),
        "gatewayclasses",
    )
}

#[must_use]
pub fn gateway_api_resource() -> ApiResource {
    ApiResource::from_gvk_with_plural(
        &GroupVersionKind::gvk("gateway.networking.k8s.io", "v1", "Gateway"),
        "gateways",
    )
}

/// Builds the controller owner reference pointing at a control plane.
///
/// Sub-resources carrying it are garbage collected when the control plane is deleted.
#[must_use]
pub fn build_owner_references(cp: &ControlPlane) -> Vec<OwnerReference> {
    vec![OwnerReference {
        api_version: API_GROUP_VERSION.to_string(),
        kind: KIND_CONTROL_PLANE.to_string(),
        name: cp.name_any(),
        uid: cp.metadata.uid.clone().unwrap_or_default(),
        controller: Some(true),
        block_owner_deletion: Some(true),
    }]
}

fn metadata(cp: &ControlPlane, name: &str, namespace: &str, component: &str) -> ObjectMeta {
    ObjectMeta {
        name: Some(name.to_string()),
        namespace: Some(namespace.to_string()),
        labels: Some(build_labels(&cp.name_any(), component)),
        owner_references: Some(build_owner_references(cp)),
        ..Default::default()
    }
}

/// Source of the Postgres instance kine connects to.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PostgresTarget {
    pub host: String,
    pub port: u16,
    pub user: String,
    /// Secret in the control plane namespace holding the password
    pub password_secret: String,
    /// Logical database of this control plane
    pub database: String,
}

impl PostgresTarget {
    /// Connection string handed to kine. The password is expanded from the env at runtime.
    #[must_use]
    pub fn kine_endpoint(&self) -> String {
        format!(
            "postgres://{}:$({POSTGRES_PASSWORD_ENV})@{}:{}/{}?sslmode=disable",
            self.user, self.host, self.port, self.database
        )
    }
}

// ============================================================================
// Core objects
// ============================================================================

/// Builds the namespace that holds every sub-resource of a control plane.
#[must_use]
pub fn build_namespace(cp: &ControlPlane) -> Namespace {
    let cp_name = cp.name_any();
    let mut labels = build_labels(&cp_name, "namespace");
    labels.insert(KFLEX_TYPE_LABEL.into(), cp.spec.r#type.as_str().into());
    Namespace {
        metadata: ObjectMeta {
            name: Some(naming::namespace_for(&cp_name)),
            labels: Some(labels),
            owner_references: Some(build_owner_references(cp)),
            ..Default::default()
        },
        ..Default::default()
    }
}

/// Builds an opaque secret from string data.
#[must_use]
pub fn build_secret(
    cp: &ControlPlane,
    name: &str,
    namespace: &str,
    component: &str,
    data: BTreeMap<String, String>,
) -> Secret {
    Secret {
        metadata: metadata(cp, name, namespace, component),
        type_: Some("Opaque".to_string()),
        data: Some(
            data.into_iter()
                .map(|(k, v)| (k, ByteString(v.into_bytes())))
                .collect(),
        ),
        ..Default::default()
    }
}

/// Builds a long-lived token secret for a service account.
///
/// The token controller of the hosting cluster populates `token` and `ca.crt`.
#[must_use]
pub fn build_service_account_token_secret(
    cp: &ControlPlane,
    name: &str,
    namespace: &str,
    service_account: &str,
) -> Secret {
    let mut meta = metadata(cp, name, namespace, service_account);
    meta.annotations = Some(BTreeMap::from([(
        "kubernetes.io/service-account.name".to_string(),
        service_account.to_string(),
    )]));
    Secret {
        metadata: meta,
        type_: Some("kubernetes.io/service-account-token".to_string()),
        ..Default::default()
    }
}

#[must_use]
pub fn build_service_account(cp: &ControlPlane, name: &str, namespace: &str) -> ServiceAccount {
    ServiceAccount {
        metadata: metadata(cp, name, namespace, name),
        ..Default::default()
    }
}

/// Builds a namespaced role.
#[must_use]
pub fn build_role(cp: &ControlPlane, name: &str, namespace: &str, rules: Vec<PolicyRule>) -> Role {
    Role {
        metadata: metadata(cp, name, namespace, name),
        rules: Some(rules),
    }
}

/// Builds a role binding granting `role` to a service account of the same namespace.
#[must_use]
pub fn build_role_binding(
    cp: &ControlPlane,
    name: &str,
    namespace: &str,
    role: &str,
    service_account: &str,
) -> RoleBinding {
    RoleBinding {
        metadata: metadata(cp, name, namespace, name),
        role_ref: RoleRef {
            api_group: "rbac.authorization.k8s.io".to_string(),
            kind: "Role".to_string(),
            name: role.to_string(),
        },
        subjects: Some(vec![service_account_subject(service_account, namespace)]),
    }
}

/// Builds a cluster role binding for a service account.
///
/// `owner` is `None` when the binding lives on a different cluster than the
/// control plane, where an owner reference would be dangling.
#[must_use]
pub fn build_cluster_role_binding(
    owner: Option<&ControlPlane>,
    name: &str,
    cluster_role: &str,
    service_account: &str,
    sa_namespace: &str,
) -> ClusterRoleBinding {
    let mut meta = ObjectMeta {
        name: Some(name.to_string()),
        ..Default::default()
    };
    if let Some(cp) = owner {
        meta.labels = Some(build_labels(&cp.name_any(), name));
        meta.owner_references = Some(build_owner_references(cp));
    }
    ClusterRoleBinding {
        metadata: meta,
        role_ref: RoleRef {
            api_group: "rbac.authorization.k8s.io".to_string(),
            kind: "ClusterRole".to_string(),
            name: cluster_role.to_string(),
        },
        subjects: Some(vec![service_account_subject(service_account, sa_namespace)]),
    }
}

fn service_account_subject(name: &str, namespace: &str) -> Subject {
    Subject {
        kind: "ServiceAccount".to_string(),
        name: name.to_string(),
        namespace: Some(namespace.to_string()),
        ..Default::default()
    }
}

fn policy_rule(api_group: &str, resources: &[&str], verbs: &[&str]) -> PolicyRule {
    PolicyRule {
        api_groups: Some(vec![api_group.to_string()]),
        resources: Some(resources.iter().map(|r| (*r).to_string()).collect()),
        verbs: verbs.iter().map(|v| (*v).to_string()).collect(),
        ..Default::default()
    }
}

/// Builds a Service selecting the pods of `component`.
///
/// A headless Service is built when `headless` is true.
#[must_use]
pub fn build_service(
    cp: &ControlPlane,
    name: &str,
    namespace: &str,
    component: &str,
    port: i32,
    headless: bool,
) -> Service {
    Service {
        metadata: metadata(cp, name, namespace, component),
        spec: Some(ServiceSpec {
            selector: Some(selector_labels(&cp.name_any(), component)),
            cluster_ip: headless.then(|| "None".to_string()),
            ports: Some(vec![ServicePort {
                name: Some("https".into()),
                port,
                target_port: Some(IntOrString::Int(port)),
                protocol: Some("TCP".into()),
                ..Default::default()
            }]),
            ..Default::default()
        }),
        ..Default::default()
    }
}

// ============================================================================
// Exposure
// ============================================================================

/// Builds an nginx Ingress with TLS passthrough to `service:port`.
#[must_use]
pub fn build_ingress(
    cp: &ControlPlane,
    namespace: &str,
    service: &str,
    port: i32,
    host: &str,
    ingress_class: &str,
) -> Ingress {
    let mut meta = metadata(cp, service, namespace, service);
    meta.annotations = Some(BTreeMap::from([(
        NGINX_SSL_PASSTHROUGH_ANNOTATION.to_string(),
        "true".to_string(),
    )]));
    Ingress {
        metadata: meta,
        spec: Some(IngressSpec {
            ingress_class_name: Some(ingress_class.to_string()),
            rules: Some(vec![IngressRule {
                host: Some(host.to_string()),
                http: Some(HTTPIngressRuleValue {
                    paths: vec![HTTPIngressPath {
                        path: Some("/".into()),
                        path_type: "Prefix".into(),
                        backend: IngressBackend {
                            service: Some(IngressServiceBackend {
                                name: service.to_string(),
                                port: Some(ServiceBackendPort {
                                    number: Some(port),
                                    ..Default::default()
                                }),
                            }),
                            ..Default::default()
                        },
                    }],
                }),
            }]),
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn dynamic(ar: &ApiResource, meta: ObjectMeta, spec: serde_json::Value) -> DynamicObject {
    let mut obj = DynamicObject::new(meta.name.as_deref().unwrap_or_default(), ar);
    obj.metadata = meta;
    obj.data = json!({ "spec": spec });
    obj
}

/// Builds an OpenShift Route with passthrough TLS to `service:port`.
#[must_use]
pub fn build_route(
    cp: &ControlPlane,
    namespace: &str,
    service: &str,
    port: i32,
    host: &str,
) -> DynamicObject {
    dynamic(
        &route_api_resource(),
        metadata(cp, service, namespace, service),
        json!({
            "host": host,
            "port": { "targetPort": port },
            "to": { "kind": "Service", "name": service, "weight": 100 },
            "tls": {
                "termination": "passthrough",
                "insecureEdgeTerminationPolicy": "None",
            },
            "wildcardPolicy": "None",
        }),
    )
}

/// Builds an `HTTPRoute` attaching `service:port` to the shared kflex Gateway.
#[must_use]
pub fn build_http_route(
    cp: &ControlPlane,
    namespace: &str,
    service: &str,
    port: i32,
    host: &str,
    gateway_namespace: &str,
) -> DynamicObject {
    dynamic(
        &http_route_api_resource(),
        metadata(cp, service, namespace, service),
        json!({
            "parentRefs": [{ "name": GATEWAY_NAME, "namespace": gateway_namespace }],
            "hostnames": [host],
            "rules": [{
                "backendRefs": [{ "name": service, "port": port }],
            }],
        }),
    )
}

/// Builds the cluster-wide `GatewayClass` used in gateway exposure mode.
#[must_use]
pub fn build_gateway_class() -> DynamicObject {
    dynamic(
        &gateway_class_api_resource(),
        ObjectMeta {
            name: Some(GATEWAY_CLASS_NAME.to_string()),
            ..Default::default()
        },
        json!({ "controllerName": GATEWAY_CONTROLLER_NAME }),
    )
}

/// Builds the shared Gateway every control plane route attaches to.
#[must_use]
pub fn build_gateway(namespace: &str, domain: &str, port: u16) -> DynamicObject {
    dynamic(
        &gateway_api_resource(),
        ObjectMeta {
            name: Some(GATEWAY_NAME.to_string()),
            namespace: Some(namespace.to_string()),
            ..Default::default()
        },
        json!({
            "gatewayClassName": GATEWAY_CLASS_NAME,
            "listeners": [{
                "name": "https",
                "hostname": format!("*.{domain}"),
                "port": port,
                "protocol": "HTTPS",
                "tls": { "mode": "Passthrough" },
                "allowedRoutes": { "namespaces": { "from": "All" } },
            }],
        }),
    )
}

// ============================================================================
// k8s control planes
// ============================================================================

fn secret_volume(name: &str, secret: &str, items: Option<Vec<KeyToPath>>) -> Volume {
    Volume {
        name: name.to_string(),
        secret: Some(SecretVolumeSource {
            secret_name: Some(secret.to_string()),
            items,
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn volume_mount(name: &str, path: &str) -> VolumeMount {
    VolumeMount {
        name: name.to_string(),
        mount_path: path.to_string(),
        read_only: Some(true),
        ..Default::default()
    }
}

fn pki(key: &str) -> String {
    format!("{PKI_PATH}/{key}")
}

fn env(name: &str, value: &str) -> EnvVar {
    EnvVar {
        name: name.to_string(),
        value: Some(value.to_string()),
        ..Default::default()
    }
}

fn deployment(
    cp: &ControlPlane,
    name: &str,
    namespace: &str,
    containers: Vec<Container>,
    volumes: Vec<Volume>,
) -> Deployment {
    let cp_name = cp.name_any();
    Deployment {
        metadata: metadata(cp, name, namespace, name),
        spec: Some(DeploymentSpec {
            replicas: Some(1),
            selector: LabelSelector {
                match_labels: Some(selector_labels(&cp_name, name)),
                ..Default::default()
            },
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(build_labels(&cp_name, name)),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    containers,
                    volumes: Some(volumes),
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Builds the API server Deployment of a `k8s` control plane.
///
/// The pod runs kine next to `kube-apiserver`; kine translates the etcd
/// protocol to SQL on the control plane's logical Postgres database.
#[must_use]
pub fn build_apiserver_deployment(
    cp: &ControlPlane,
    namespace: &str,
    config: &OperatorConfig,
    postgres: &PostgresTarget,
) -> Deployment {
    debug!(
        control_plane = %cp.name_any(),
        database = %postgres.database,
        "Building kube-apiserver Deployment"
    );

    let kine = Container {
        name: KINE_CONTAINER_NAME.to_string(),
        image: Some(config.kine_image.clone()),
        command: Some(vec!["kine".into()]),
        args: Some(vec![
            format!("--endpoint={}", postgres.kine_endpoint()),
            format!("--listen-address=127.0.0.1:{KINE_PORT}"),
        ]),
        env: Some(vec![EnvVar {
            name: POSTGRES_PASSWORD_ENV.to_string(),
            value_from: Some(EnvVarSource {
                secret_key_ref: Some(SecretKeySelector {
                    name: postgres.password_secret.clone(),
                    key: POSTGRES_PASSWORD_KEY.to_string(),
                    ..Default::default()
                }),
                ..Default::default()
            }),
            ..Default::default()
        }]),
        ..Default::default()
    };

    let apiserver = Container {
        name: APISERVER_NAME.to_string(),
        image: Some(config.apiserver_image.clone()),
        command: Some(vec![APISERVER_NAME.into()]),
        args: Some(vec![
            "--allow-privileged=true".into(),
            "--authorization-mode=RBAC".into(),
            format!("--client-ca-file={}", pki(CA_CERT_KEY)),
            "--enable-bootstrap-token-auth=true".into(),
            format!("--etcd-servers=http://127.0.0.1:{KINE_PORT}"),
            format!("--kubelet-client-certificate={}", pki(KUBELET_CLIENT_CERT_KEY)),
            format!("--kubelet-client-key={}", pki(KUBELET_CLIENT_KEY_KEY)),
            format!("--proxy-client-cert-file={}", pki(FRONT_PROXY_CLIENT_CERT_KEY)),
            format!("--proxy-client-key-file={}", pki(FRONT_PROXY_CLIENT_KEY_KEY)),
            format!("--requestheader-client-ca-file={}", pki(FRONT_PROXY_CA_CERT_KEY)),
            "--requestheader-allowed-names=front-proxy-client".into(),
            "--requestheader-extra-headers-prefix=X-Remote-Extra-".into(),
            "--requestheader-group-headers=X-Remote-Group".into(),
            "--requestheader-username-headers=X-Remote-User".into(),
            format!("--secure-port={APISERVER_SECURE_PORT}"),
            "--service-account-issuer=https://kubernetes.default.svc.cluster.local".into(),
            format!("--service-account-key-file={}", pki(SA_PUBLIC_KEY_KEY)),
            format!("--service-account-signing-key-file={}", pki(SA_PRIVATE_KEY_KEY)),
            format!("--service-cluster-ip-range={SERVICE_CLUSTER_IP_RANGE}"),
            format!("--tls-cert-file={}", pki(APISERVER_CERT_KEY)),
            format!("--tls-private-key-file={}", pki(APISERVER_KEY_KEY)),
        ]),
        ports: Some(vec![ContainerPort {
            name: Some("https".into()),
            container_port: APISERVER_SECURE_PORT,
            protocol: Some("TCP".into()),
            ..Default::default()
        }]),
        readiness_probe: Some(Probe {
            http_get: Some(HTTPGetAction {
                path: Some("/readyz".into()),
                port: IntOrString::Int(APISERVER_SECURE_PORT),
                scheme: Some("HTTPS".into()),
                ..Default::default()
            }),
            initial_delay_seconds: Some(5),
            period_seconds: Some(10),
            ..Default::default()
        }),
        volume_mounts: Some(vec![volume_mount(VOLUME_CERTS, PKI_PATH)]),
        ..Default::default()
    };

    deployment(
        cp,
        APISERVER_NAME,
        namespace,
        vec![kine, apiserver],
        vec![secret_volume(VOLUME_CERTS, CERTS_SECRET_NAME, None)],
    )
}

/// Builds the controller manager Deployment of a `k8s` control plane.
#[must_use]
pub fn build_controller_manager_deployment(
    cp: &ControlPlane,
    namespace: &str,
    config: &OperatorConfig,
) -> Deployment {
    let kubeconfig = format!("{CM_KUBECONFIG_PATH}/{CM_KUBECONFIG_KEY}");
    let container = Container {
        name: CONTROLLER_MANAGER_NAME.to_string(),
        image: Some(config.controller_manager_image.clone()),
        command: Some(vec![CONTROLLER_MANAGER_NAME.into()]),
        args: Some(vec![
            format!("--authentication-kubeconfig={kubeconfig}"),
            format!("--authorization-kubeconfig={kubeconfig}"),
            format!("--kubeconfig={kubeconfig}"),
            format!("--client-ca-file={}", pki(CA_CERT_KEY)),
            format!("--cluster-signing-cert-file={}", pki(CA_CERT_KEY)),
            format!("--cluster-signing-key-file={}", pki(CA_KEY_KEY)),
            "--controllers=*,bootstrapsigner,tokencleaner".into(),
            "--leader-elect=false".into(),
            format!("--requestheader-client-ca-file={}", pki(FRONT_PROXY_CA_CERT_KEY)),
            format!("--root-ca-file={}", pki(CA_CERT_KEY)),
            format!("--service-account-private-key-file={}", pki(SA_PRIVATE_KEY_KEY)),
            "--use-service-account-credentials=true".into(),
        ]),
        volume_mounts: Some(vec![
            volume_mount(VOLUME_CERTS, PKI_PATH),
            volume_mount(VOLUME_CM_KUBECONFIG, CM_KUBECONFIG_PATH),
        ]),
        ..Default::default()
    };

    deployment(
        cp,
        CONTROLLER_MANAGER_NAME,
        namespace,
        vec![container],
        vec![
            secret_volume(VOLUME_CERTS, CERTS_SECRET_NAME, None),
            secret_volume(
                VOLUME_CM_KUBECONFIG,
                CM_KUBECONFIG_SECRET,
                Some(vec![KeyToPath {
                    key: CM_KUBECONFIG_KEY.to_string(),
                    path: CM_KUBECONFIG_KEY.to_string(),
                    ..Default::default()
                }]),
            ),
        ],
    )
}

// ============================================================================
// k3s control planes
// ============================================================================

/// Builds the k3s server StatefulSet.
#[must_use]
pub fn build_k3s_statefulset(
    cp: &ControlPlane,
    namespace: &str,
    config: &OperatorConfig,
) -> StatefulSet {
    let cp_name = cp.name_any();
    let container = Container {
        name: K3S_SERVER_NAME.to_string(),
        image: Some(config.k3s_image.clone()),
        command: Some(vec!["/bin/k3s".into()]),
        args: Some(vec![
            "server".into(),
            "--disable-agent".into(),
            format!("--https-listen-port={K3S_PORT}"),
            format!(
                "--tls-san={}",
                naming::external_host(&cp_name, &config.domain)
            ),
            format!("--tls-san={}", naming::service_dns(K3S_SERVER_NAME, namespace)),
            "--write-kubeconfig-mode=0644".into(),
        ]),
        ports: Some(vec![ContainerPort {
            name: Some("https".into()),
            container_port: K3S_PORT,
            protocol: Some("TCP".into()),
            ..Default::default()
        }]),
        readiness_probe: Some(Probe {
            tcp_socket: Some(TCPSocketAction {
                port: IntOrString::Int(K3S_PORT),
                ..Default::default()
            }),
            initial_delay_seconds: Some(5),
            period_seconds: Some(10),
            ..Default::default()
        }),
        volume_mounts: Some(vec![VolumeMount {
            name: VOLUME_K3S_DATA.to_string(),
            mount_path: K3S_DATA_PATH.to_string(),
            ..Default::default()
        }]),
        ..Default::default()
    };

    StatefulSet {
        metadata: metadata(cp, K3S_SERVER_NAME, namespace, K3S_SERVER_NAME),
        spec: Some(StatefulSetSpec {
            replicas: Some(1),
            service_name: Some(K3S_SERVER_NAME.to_string()),
            selector: LabelSelector {
                match_labels: Some(selector_labels(&cp_name, K3S_SERVER_NAME)),
                ..Default::default()
            },
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(build_labels(&cp_name, K3S_SERVER_NAME)),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    containers: vec![container],
                    volumes: Some(vec![Volume {
                        name: VOLUME_K3S_DATA.to_string(),
                        empty_dir: Some(EmptyDirVolumeSource::default()),
                        ..Default::default()
                    }]),
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Builds the ConfigMap carrying the k3s bootstrap script.
#[must_use]
pub fn build_k3s_scripts_config_map(cp: &ControlPlane, namespace: &str) -> ConfigMap {
    ConfigMap {
        metadata: metadata(cp, K3S_SCRIPTS_CONFIG_MAP, namespace, K3S_BOOTSTRAP_NAME),
        data: Some(BTreeMap::from([(
            K3S_BOOTSTRAP_SCRIPT_FILENAME.to_string(),
            K3S_BOOTSTRAP_SCRIPT.to_string(),
        )])),
        ..Default::default()
    }
}

/// Rules of the k3s bootstrap job: read the server pod, exec into it, write the kubeconfig secret.
#[must_use]
pub fn k3s_bootstrap_rules() -> Vec<PolicyRule> {
    vec![
        policy_rule("", &["pods"], &["get", "list"]),
        policy_rule("", &["pods/exec"], &["create"]),
        policy_rule("", &["secrets"], &["get", "patch"]),
    ]
}

/// Rules of the cluster-info update job.
#[must_use]
pub fn cmupdate_rules() -> Vec<PolicyRule> {
    vec![
        policy_rule("", &["secrets"], &["get"]),
        policy_rule("", &["services"], &["get"]),
        policy_rule("apps", &["deployments", "statefulsets"], &["get"]),
    ]
}

fn job(
    cp: &ControlPlane,
    name: &str,
    namespace: &str,
    service_account: &str,
    container: Container,
    volumes: Option<Vec<Volume>>,
) -> Job {
    Job {
        metadata: metadata(cp, name, namespace, name),
        spec: Some(JobSpec {
            backoff_limit: Some(6),
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(build_labels(&cp.name_any(), name)),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    service_account_name: Some(service_account.to_string()),
                    restart_policy: Some("OnFailure".into()),
                    containers: vec![container],
                    volumes,
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Builds the job that copies the generated k3s kubeconfig and token into [`K3S_KUBECONFIG_SECRET`].
#[must_use]
pub fn build_k3s_bootstrap_job(
    cp: &ControlPlane,
    namespace: &str,
    config: &OperatorConfig,
) -> Job {
    let cp_name = cp.name_any();
    let container = Container {
        name: K3S_BOOTSTRAP_NAME.to_string(),
        image: Some(config.kubectl_image.clone()),
        command: Some(vec![
            "/bin/bash".into(),
            format!("{SCRIPTS_PATH}/{K3S_BOOTSTRAP_SCRIPT_FILENAME}"),
        ]),
        env: Some(vec![
            env("NAMESPACE", namespace),
            env("SERVER_POD", &format!("{K3S_SERVER_NAME}-0")),
            env("SECRET_NAME", K3S_KUBECONFIG_SECRET),
            env("KUBECONFIG_KEY", K3S_KUBECONFIG_KEY),
            env("KUBECONFIG_IN_CLUSTER_KEY", K3S_KUBECONFIG_KEY_IN_CLUSTER),
            env("TOKEN_KEY", K3S_TOKEN_KEY),
            env(
                "EXTERNAL_URL",
                &naming::external_url(&cp_name, &config.domain, config.external_port),
            ),
            env(
                "IN_CLUSTER_URL",
                &format!(
                    "https://{}:{K3S_PORT}",
                    naming::service_dns(K3S_SERVER_NAME, namespace)
                ),
            ),
        ]),
        volume_mounts: Some(vec![volume_mount(VOLUME_SCRIPTS, SCRIPTS_PATH)]),
        ..Default::default()
    };
    job(
        cp,
        K3S_BOOTSTRAP_NAME,
        namespace,
        K3S_BOOTSTRAP_NAME,
        container,
        Some(vec![Volume {
            name: VOLUME_SCRIPTS.to_string(),
            config_map: Some(ConfigMapVolumeSource {
                name: K3S_SCRIPTS_CONFIG_MAP.to_string(),
                default_mode: Some(0o755),
                ..Default::default()
            }),
            ..Default::default()
        }]),
    )
}

/// Inputs of the cluster-info update job.
#[derive(Clone, Debug)]
pub struct ClusterInfoUpdate<'a> {
    pub name: &'a str,
    pub kubeconfig_secret: &'a str,
    pub kubeconfig_key: &'a str,
    /// Deployment or StatefulSet the job waits for
    pub host_container: &'a str,
    pub external_url: &'a str,
}

/// Builds the `cmupdate` job that publishes the external URL in `kube-public/cluster-info`.
#[must_use]
pub fn build_cluster_info_update_job(
    cp: &ControlPlane,
    namespace: &str,
    config: &OperatorConfig,
    update: &ClusterInfoUpdate<'_>,
) -> Job {
    let container = Container {
        name: update.name.to_string(),
        image: Some(config.cmupdate_image.clone()),
        env: Some(vec![
            env("KUBERNETES_NAMESPACE", namespace),
            env("KUBECONFIG_SECRET", update.kubeconfig_secret),
            env("KUBECONFIG_SECRET_KEY", update.kubeconfig_key),
            env("HOST_CONTAINER", update.host_container),
            env("EXTERNAL_URL", update.external_url),
        ]),
        ..Default::default()
    };
    job(cp, update.name, namespace, update.name, container, None)
}

#[cfg(test)]
#[path = "resources_tests.rs"]
mod resources_tests;
