// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Error types for the kflex operator.
//!
//! Reconcile steps return [`Error`]; the dispatcher turns any error into a
//! `Synced=False/ReconcileError` condition carrying `to_string()` of the error,
//! then hands it to the controller's error policy.
//!
//! # Classification
//!
//! - **NotFound** drives create branches and is never surfaced as a failure.
//! - **Transient** errors (server overload, timeouts, connection refused) are
//!   requeued quickly. See [`Error::is_transient`].
//! - Everything else is terminal for the pass and retried on the standard schedule.

use thiserror::Error;

/// API status reasons treated as transient
const TRANSIENT_REASONS: &[&str] = &[
    "InternalError",
    "ServiceUnavailable",
    "Timeout",
    "ServerTimeout",
    "TooManyRequests",
    "UnexpectedServerError",
];

/// HTTP codes treated as transient when the reason is missing
const TRANSIENT_CODES: &[u16] = &[429, 500, 503, 504];

/// Errors raised while reconciling kflex resources.
#[derive(Error, Debug)]
pub enum Error {
    /// Kubernetes API or client error
    #[error(transparent)]
    Kube(#[from] kube::Error),

    /// JSON (de)serialization of an object failed
    #[error(transparent)]
    Json(#[from] serde_json::Error),

    /// YAML (de)serialization of a manifest or kubeconfig failed
    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),

    /// Key or certificate generation failed; no partial bundle is produced
    #[error("certificate generation failed: {0}")]
    Certificate(String),

    /// A kubeconfig could not be built or loaded
    #[error("kubeconfig error: {0}")]
    Kubeconfig(String),

    /// An `external` control plane has no `bootstrapSecretRef`
    #[error("bootstrapSecretRef is required for control plane {0}")]
    MissingBootstrapSecretRef(String),

    /// A referenced secret exists but lacks the expected data key
    #[error("secret {namespace}/{name} has no data key {key}")]
    MissingSecretKey {
        namespace: String,
        name: String,
        key: String,
    },

    /// A referenced secret does not exist
    #[error("secret {namespace}/{name} not found")]
    SecretNotFound { namespace: String, name: String },

    /// A control plane references a `PostCreateHook` that does not exist
    #[error("post create hook {0} not found")]
    HookNotFound(String),

    /// A hook template failed to render or parse
    #[error("template {index} of hook {hook}: {message}")]
    Template {
        hook: String,
        index: usize,
        message: String,
    },

    /// A manifest names a kind the API server does not serve
    #[error("no resource found for {0}")]
    UnknownKind(String),

    /// A manifest lacks `apiVersion`, `kind` or `metadata.name`
    #[error("invalid manifest: {0}")]
    InvalidManifest(String),

    /// The Helm CLI failed
    #[error("helm {release}: {message}")]
    Helm { release: String, message: String },

    /// A bounded wait elapsed before the awaited state appeared
    #[error("timed out waiting for {0}")]
    Timeout(String),

    /// The object handed to a reconciler is missing a required field
    #[error("invalid object: {0}")]
    InvalidObject(String),
}

/// Result alias used throughout the crate
pub type Result<T, E = Error> = std::result::Result<T, E>;

impl Error {
    /// Whether the error is worth a fast retry.
    ///
    /// Transient errors are API errors with one of the server-side overload or
    /// timeout reasons, connection-refused errors anywhere in the source chain,
    /// and bounded waits that elapsed.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Kube(e) => is_transient_kube_error(e),
            Self::Timeout(_) => true,
            _ => false,
        }
    }

    /// Whether the error is an API `NotFound`.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::Kube(kube::Error::Api(resp)) if resp.code == 404)
    }

    /// Whether the error is an API `AlreadyExists`.
    #[must_use]
    pub fn is_already_exists(&self) -> bool {
        matches!(self, Self::Kube(kube::Error::Api(resp)) if resp.code == 409 && resp.reason == "AlreadyExists")
    }

    /// Whether the error is an optimistic-concurrency `Conflict`.
    #[must_use]
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Kube(kube::Error::Api(resp)) if resp.code == 409 && resp.reason == "Conflict")
    }
}

/// Classify a Kubernetes client error as transient.
///
/// # Arguments
///
/// * `err` - The Kubernetes client error to check
///
/// # Returns
///
/// `true` for API errors with a transient reason or code, and for any error whose
/// source chain contains an I/O `ConnectionRefused`
#[must_use]
pub fn is_transient_kube_error(err: &kube::Error) -> bool {
    if let kube::Error::Api(resp) = err {
        if TRANSIENT_REASONS.contains(&resp.reason.as_str()) {
            return true;
        }
        return TRANSIENT_CODES.contains(&resp.code);
    }
    is_connection_refused(err)
}

/// Walk the source chain looking for an I/O `ConnectionRefused`.
#[must_use]
pub fn is_connection_refused(err: &(dyn std::error::Error + 'static)) -> bool {
    let mut current: Option<&(dyn std::error::Error + 'static)> = Some(err);
    while let Some(e) = current {
        if let Some(io) = e.downcast_ref::<std::io::Error>() {
            if io.kind() == std::io::ErrorKind::ConnectionRefused {
                return true;
            }
        }
        current = e.source();
    }
    false
}

#[cfg(test)]
#[path = "errors_tests.rs"]
mod errors_tests;
