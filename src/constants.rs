// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Global constants for the kflex operator.
//!
//! This module contains all numeric and string constants used throughout the codebase.
//! Constants are organized by category for easy maintenance.

// ============================================================================
// API Constants
// ============================================================================

/// API group for all kflex CRDs
pub const API_GROUP: &str = "tenancy.kflex.kubestellar.org";

/// API version for all kflex CRDs
pub const API_VERSION: &str = "v1alpha1";

/// Fully qualified API version (group/version)
pub const API_GROUP_VERSION: &str = "tenancy.kflex.kubestellar.org/v1alpha1";

/// Kind name for `ControlPlane` resource
pub const KIND_CONTROL_PLANE: &str = "ControlPlane";

/// Kind name for `PostCreateHook` resource
pub const KIND_POST_CREATE_HOOK: &str = "PostCreateHook";

/// Field manager used for server-side apply and status writes
pub const FIELD_MANAGER: &str = "kflex-controller";

// ============================================================================
// Naming Constants
// ============================================================================

/// Suffix appended to a control plane name to form its namespace
pub const NAMESPACE_SUFFIX: &str = "-system";

/// Default namespace the operator itself runs in
pub const DEFAULT_SYSTEM_NAMESPACE: &str = "kubeflex-system";

/// Name of the optional ConfigMap holding cluster-wide operator settings
pub const OPERATOR_CONFIG_MAP: &str = "kubeflex-config";

/// Default DNS domain under which control planes are exposed
pub const DEFAULT_DOMAIN: &str = "localtest.me";

/// Default externally reachable port of the ingress controller
pub const DEFAULT_EXTERNAL_PORT: u16 = 9443;

/// Annotation that pauses reconciliation of a control plane when set to "true"
pub const PAUSED_ANNOTATION: &str = "tenancy.kflex.kubestellar.org/paused";

// ============================================================================
// Certificate Constants
// ============================================================================

/// RSA modulus size for every generated key
pub const RSA_KEY_BITS: usize = 2048;

/// Certificate validity (10 years)
pub const CERT_VALIDITY_DAYS: i64 = 3650;

/// `NotBefore` back-dating to tolerate clock skew
pub const CERT_BACKDATE_HOURS: i64 = 1;

/// Common name of the generated CA
pub const CA_COMMON_NAME: &str = "kubernetes-ca";

/// Name of the opaque Secret that carries the PKI bundle
pub const CERTS_SECRET_NAME: &str = "k8s-certs";

pub const CA_CERT_KEY: &str = "ca.crt";
pub const CA_KEY_KEY: &str = "ca.key";
pub const APISERVER_CERT_KEY: &str = "apiserver.crt";
pub const APISERVER_KEY_KEY: &str = "apiserver.key";
pub const KUBELET_CLIENT_CERT_KEY: &str = "apiserver-kubelet-client.crt";
pub const KUBELET_CLIENT_KEY_KEY: &str = "apiserver-kubelet-client.key";
pub const FRONT_PROXY_CA_CERT_KEY: &str = "front-proxy-ca.crt";
pub const FRONT_PROXY_CLIENT_CERT_KEY: &str = "front-proxy-client.crt";
pub const FRONT_PROXY_CLIENT_KEY_KEY: &str = "front-proxy-client.key";
pub const SA_PUBLIC_KEY_KEY: &str = "sa.pub";
pub const SA_PRIVATE_KEY_KEY: &str = "sa.key";

// ============================================================================
// Kubeconfig Secret Constants
// ============================================================================

/// Secret holding the admin kubeconfig for `k8s`, `external` and `host` control planes
pub const ADMIN_KUBECONFIG_SECRET: &str = "admin-kubeconfig";

/// Default data key of a kubeconfig secret (external endpoint)
pub const KUBECONFIG_KEY_DEFAULT: &str = "kubeconfig";

/// Data key of the in-cluster kubeconfig variant
pub const KUBECONFIG_KEY_IN_CLUSTER: &str = "kubeconfig-incluster";

/// Secret holding the controller-manager kubeconfig
pub const CM_KUBECONFIG_SECRET: &str = "cm-kubeconfig";

/// Data key of the controller-manager kubeconfig
pub const CM_KUBECONFIG_KEY: &str = "cm.conf";

/// Secret created by the vcluster chart
pub const VCLUSTER_KUBECONFIG_SECRET: &str = "vc-vcluster";

/// Data key written by the vcluster chart
pub const VCLUSTER_KUBECONFIG_KEY: &str = "config";

/// Data key of the in-cluster vcluster kubeconfig produced by the patch step
pub const VCLUSTER_KUBECONFIG_KEY_IN_CLUSTER: &str = "config-incluster";

/// Secret created by the ocm chart
pub const OCM_KUBECONFIG_SECRET: &str = "multicluster-controlplane-kubeconfig";

/// Data key of the ocm kubeconfig
pub const OCM_KUBECONFIG_KEY: &str = "kubeconfig";

/// Data key of the ocm in-cluster kubeconfig
pub const OCM_KUBECONFIG_KEY_IN_CLUSTER: &str = "kubeconfig-incluster";

/// Secret the k3s bootstrap job writes into
pub const K3S_KUBECONFIG_SECRET: &str = "k3s-config";

/// Data key of the k3s kubeconfig pointing at the external endpoint
pub const K3S_KUBECONFIG_KEY: &str = "kubeconfig";

/// Data key of the k3s kubeconfig pointing at the in-cluster service
pub const K3S_KUBECONFIG_KEY_IN_CLUSTER: &str = "kubeconfig-incluster";

/// Data key of the k3s node token extracted by the bootstrap job
pub const K3S_TOKEN_KEY: &str = "token";

// ============================================================================
// Workload Constants
// ============================================================================

/// API server Deployment and Service name for `k8s` control planes
pub const APISERVER_NAME: &str = "kube-apiserver";

/// Secure port of the embedded API server
pub const APISERVER_SECURE_PORT: i32 = 9444;

/// Controller manager Deployment name for `k8s` control planes
pub const CONTROLLER_MANAGER_NAME: &str = "kube-controller-manager";

/// Kine sidecar container name
pub const KINE_CONTAINER_NAME: &str = "kine";

/// Port kine listens on for etcd clients
pub const KINE_PORT: i32 = 2379;

/// Secret (in the control plane namespace) holding the Postgres password for kine
pub const POSTGRES_CREDENTIALS_SECRET: &str = "postgres-credentials";

/// Key of the Postgres password within credential secrets
pub const POSTGRES_PASSWORD_KEY: &str = "postgres-password";

/// Helm release of the Postgres instance of a `dedicated` backend
pub const DEDICATED_POSTGRES_RELEASE: &str = "postgres";

/// Service and Secret created by the dedicated Postgres chart
pub const DEDICATED_POSTGRES_SERVICE: &str = "postgres-postgresql";

/// Port of the dedicated Postgres Service
pub const DEDICATED_POSTGRES_PORT: u16 = 5432;

/// Superuser of the dedicated Postgres instance
pub const DEDICATED_POSTGRES_USER: &str = "postgres";

/// Service CIDR handed to the embedded API server
pub const SERVICE_CLUSTER_IP_RANGE: &str = "10.96.0.0/12";

/// ocm API server Deployment and Service name
pub const OCM_APISERVER_NAME: &str = "multicluster-controlplane";

/// Port exposed by the ocm API server Service
pub const OCM_APISERVER_PORT: i32 = 9443;

/// vcluster StatefulSet and Service name
pub const VCLUSTER_NAME: &str = "vcluster";

/// Port exposed by the vcluster Service
pub const VCLUSTER_PORT: i32 = 443;

/// k3s server StatefulSet and Service name
pub const K3S_SERVER_NAME: &str = "k3s-server";

/// Port the k3s API server listens on
pub const K3S_PORT: i32 = 6443;

/// ConfigMap carrying the k3s bootstrap scripts
pub const K3S_SCRIPTS_CONFIG_MAP: &str = "k3s-scripts";

/// ServiceAccount, Role, RoleBinding and Job name for the k3s bootstrap job
pub const K3S_BOOTSTRAP_NAME: &str = "k3s-bootstrap";

/// ServiceAccount, Role, RoleBinding and Job name for the cluster-info update job
pub const CMUPDATE_NAME: &str = "update-cluster-info";

/// ServiceAccount used to mint the kubeconfig of `host` control planes
pub const HOST_SERVICE_ACCOUNT: &str = "kubeflex-host";

/// Secret holding the long-lived token of the `host` ServiceAccount
pub const HOST_TOKEN_SECRET: &str = "kubeflex-host-token";

/// In-cluster API server address of the hosting cluster
pub const HOST_IN_CLUSTER_SERVER: &str = "https://kubernetes.default.svc";

/// ServiceAccount created on adopted clusters
pub const ADOPTED_SERVICE_ACCOUNT: &str = "kubeflex-adopted";

/// Namespace of the ServiceAccount created on adopted clusters
pub const ADOPTED_SERVICE_ACCOUNT_NAMESPACE: &str = "kube-system";

/// Default lifetime of the token minted on adopted clusters (365 days)
pub const DEFAULT_ADOPTED_TOKEN_EXPIRATION_SECS: i64 = 365 * 24 * 60 * 60;

/// Default key of the kubeconfig inside a bootstrap secret
pub const DEFAULT_BOOTSTRAP_SECRET_KEY: &str = "kubeconfig";

/// ClusterRole bound to the identities this operator mints
pub const CLUSTER_ADMIN_ROLE: &str = "cluster-admin";

// ============================================================================
// Exposure Constants
// ============================================================================

/// Default ingress class
pub const DEFAULT_INGRESS_CLASS: &str = "nginx";

/// GatewayClass created once per hosting cluster in gateway exposure mode
pub const GATEWAY_CLASS_NAME: &str = "kflex";

/// Gateway created once in the system namespace in gateway exposure mode
pub const GATEWAY_NAME: &str = "kflex-gateway";

/// Controller name advertised by the bootstrap GatewayClass
pub const GATEWAY_CONTROLLER_NAME: &str = "gateway.envoyproxy.io/gatewayclass-controller";

// ============================================================================
// Polling Constants
// ============================================================================

/// Interval between polls while waiting for a token or CA to be projected
pub const TOKEN_POLL_INTERVAL_SECS: u64 = 2;

/// Upper bound on waiting for a token or CA to be projected
pub const TOKEN_POLL_TIMEOUT_SECS: u64 = 120;

// ============================================================================
// Controller Requeue Constants
// ============================================================================

/// Requeue interval once a control plane is ready (5 minutes)
pub const READY_REQUEUE_DURATION_SECS: u64 = 300;

/// Requeue interval while a control plane is not ready yet
pub const NOT_READY_REQUEUE_DURATION_SECS: u64 = 15;

/// Requeue duration for transient controller errors
pub const TRANSIENT_ERROR_REQUEUE_DURATION_SECS: u64 = 5;

/// Requeue duration for all other controller errors (30 seconds)
pub const ERROR_REQUEUE_DURATION_SECS: u64 = 30;

// ============================================================================
// Leader Election Constants
// ============================================================================

/// Lease name used for leader election
pub const LEADER_LEASE_NAME: &str = "kflex-controller";

/// Default leader election lease duration (15 seconds)
pub const DEFAULT_LEASE_DURATION_SECS: u64 = 15;

/// Default leader election grace period (2 seconds)
pub const DEFAULT_LEASE_GRACE_SECS: u64 = 2;

// ============================================================================
// Runtime Constants
// ============================================================================

/// Number of worker threads for Tokio runtime
pub const TOKIO_WORKER_THREADS: usize = 4;

// ============================================================================
// Metrics Server Constants
// ============================================================================

/// Default bind address for the metrics and health HTTP server
pub const METRICS_SERVER_BIND_ADDRESS: &str = "0.0.0.0:8080";

/// Path for Prometheus metrics endpoint
pub const METRICS_SERVER_PATH: &str = "/metrics";
