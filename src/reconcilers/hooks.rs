// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Post-create hook engine.
//!
//! A `ControlPlane` lists the `PostCreateHook`s to apply once it is available.
//! `status.postCreateHooks` is the completion ledger: a hook marked `true` there
//! is never applied again for that control plane, even if its templates change.
//!
//! ## Applying a hook
//!
//! 1. Variables are layered, lowest to highest precedence: the hook's
//!    `defaultVars`, the control plane's `vars` overrides, then `Namespace`,
//!    `ControlPlaneName` and `HookName`.
//! 2. Each template is rendered as a Go template (see [`crate::gotemplate`]).
//!    Object templates are rendered over their JSON text. Referencing a
//!    variable that is not set is an error.
//! 3. The rendered YAML is resolved through discovery, tagged with Helm
//!    management metadata and server-side applied.
//!
//! A failing hook does not stop the others. It stays unmarked and is retried on
//! the next pass.

use crate::conditions::{
    are_condition_slices_same, ensure_condition, reconcile_error, reconcile_success,
};
use crate::constants::FIELD_MANAGER;
use crate::context::Context;
use crate::crd::{ControlPlane, ControlPlaneSpec, PostCreateHook, PostCreateHookUse};
use crate::errors::{Error, Result};
use crate::gotemplate::{self, TemplateError};
use crate::labels::{
    HELM_MANAGED_BY, HELM_RELEASE_NAMESPACE_ANNOTATION, HELM_RELEASE_NAME_ANNOTATION,
    K8S_MANAGED_BY,
};
use crate::metrics;
use crate::naming;
use crate::reconcilers::status::StatusTracker;
use crate::store::{api_resource, get_typed, replace_typed, ClusterStore};
use kube::api::{DynamicObject, GroupVersionKind};
use kube::runtime::controller::Action;
use kube::ResourceExt;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Variable injected with the control plane namespace
pub const VAR_NAMESPACE: &str = "Namespace";

/// Variable injected with the control plane name
pub const VAR_CONTROL_PLANE_NAME: &str = "ControlPlaneName";

/// Variable injected with the hook name
pub const VAR_HOOK_NAME: &str = "HookName";

// ============================================================================
// Legacy spec migration
// ============================================================================

/// Fold the deprecated `postCreateHook`/`postCreateHookVars` fields into `postCreateHooks`.
///
/// The migrated `spec` is persisted before anything else runs, so the engine only
/// ever sees the list form. Returns the updated object, or `None` if there was
/// nothing to migrate.
///
/// # Errors
///
/// Returns API errors, including `Conflict` if `cp` is stale.
pub async fn migrate_legacy_hook(store: &dyn ClusterStore, cp: &ControlPlane) -> Result<Option<ControlPlane>> {
    let mut migrated = cp.clone();
    if !migrate_spec(&mut migrated.spec) {
        return Ok(None);
    }
    let updated = replace_typed(store, None, &migrated).await?;
    info!(control_plane = %cp.name_any(), "Migrated legacy postCreateHook to postCreateHooks");
    Ok(Some(updated))
}

/// In-memory part of [`migrate_legacy_hook`]. Returns whether `spec` changed.
#[must_use]
pub fn migrate_spec(spec: &mut ControlPlaneSpec) -> bool {
    if spec.post_create_hook.is_none() && spec.post_create_hook_vars.is_none() {
        return false;
    }
    let vars = spec.post_create_hook_vars.take().unwrap_or_default();
    if let Some(name) = spec.post_create_hook.take() {
        if !spec.post_create_hooks.iter().any(|u| u.hook_name == name) {
            spec.post_create_hooks.push(PostCreateHookUse {
                hook_name: name,
                vars,
            });
        }
    }
    true
}

// ============================================================================
// Application
// ============================================================================

/// Whether every hook listed in `spec` is recorded as applied.
#[must_use]
pub fn all_hooks_applied(cp: &ControlPlane, applied: &BTreeMap<String, bool>) -> bool {
    cp.spec
        .post_create_hooks
        .iter()
        .all(|u| applied.get(&u.hook_name).copied().unwrap_or(false))
}

/// Apply every listed hook that is not marked applied yet, then persist the ledger.
///
/// # Errors
///
/// Returns the first hook failure after all hooks were attempted and the ledger
/// was written, or the status write error.
pub async fn apply_post_create_hooks(
    ctx: &Context,
    cp: &ControlPlane,
    tracker: &mut StatusTracker,
) -> Result<()> {
    let cp_name = cp.name_any();
    let pending: Vec<&PostCreateHookUse> = cp
        .spec
        .post_create_hooks
        .iter()
        .filter(|u| {
            !tracker
                .status
                .post_create_hooks
                .get(&u.hook_name)
                .copied()
                .unwrap_or(false)
        })
        .collect();
    if pending.is_empty() {
        return Ok(());
    }

    let mut first_error = None;
    for hook_use in pending {
        match apply_hook(ctx, cp, hook_use).await {
            Ok(count) => {
                info!(control_plane = %cp_name, hook = %hook_use.hook_name, objects = count, "Applied post create hook");
                metrics::record_hook(&hook_use.hook_name, true);
                tracker
                    .status
                    .post_create_hooks
                    .insert(hook_use.hook_name.clone(), true);
            }
            Err(e) => {
                warn!(control_plane = %cp_name, hook = %hook_use.hook_name, error = %e, "Post create hook failed");
                metrics::record_hook(&hook_use.hook_name, false);
                first_error.get_or_insert(e);
            }
        }
    }

    tracker.write(ctx.store.as_ref()).await?;
    first_error.map_or(Ok(()), Err)
}

/// Apply every template of one hook. Returns the number of objects applied.
async fn apply_hook(ctx: &Context, cp: &ControlPlane, hook_use: &PostCreateHookUse) -> Result<usize> {
    let store = ctx.store.as_ref();
    let hook_name = hook_use.hook_name.as_str();
    let hook: PostCreateHook = get_typed(store, None, hook_name)
        .await?
        .ok_or_else(|| Error::HookNotFound(hook_name.to_string()))?;

    let cp_name = cp.name_any();
    let namespace = naming::namespace_for(&cp_name);
    let vars = hook_vars(&hook, &hook_use.vars, &namespace, &cp_name);

    for (index, template) in hook.spec.templates.iter().enumerate() {
        let manifest = render_manifest(hook_name, index, template, &vars)?;
        apply_manifest(store, manifest, hook_name, &namespace).await?;
    }
    Ok(hook.spec.templates.len())
}

/// Template variables of one hook use.
#[must_use]
pub fn hook_vars(
    hook: &PostCreateHook,
    overrides: &BTreeMap<String, String>,
    namespace: &str,
    cp_name: &str,
) -> BTreeMap<String, String> {
    let mut vars: BTreeMap<String, String> = hook
        .spec
        .default_vars
        .iter()
        .map(|v| (v.name.clone(), v.value.clone()))
        .collect();
    vars.extend(overrides.iter().map(|(k, v)| (k.clone(), v.clone())));
    vars.insert(VAR_NAMESPACE.to_string(), namespace.to_string());
    vars.insert(VAR_CONTROL_PLANE_NAME.to_string(), cp_name.to_string());
    vars.insert(VAR_HOOK_NAME.to_string(), hook.name_any());
    vars
}

/// Template text of a hook entry. Object templates are rendered over their
/// JSON encoding, which the YAML parser reads back unchanged.
fn template_source(template: &Value) -> Result<String> {
    match template {
        Value::String(s) => Ok(s.clone()),
        other => Ok(serde_json::to_string(other)?),
    }
}

/// Render template `index` of `hook` into a manifest.
///
/// # Errors
///
/// Returns [`Error::Template`] if rendering or YAML parsing fails, and
/// [`Error::InvalidManifest`] if the result is not a named Kubernetes object.
pub fn render_manifest(
    hook: &str,
    index: usize,
    template: &Value,
    vars: &BTreeMap<String, String>,
) -> Result<DynamicObject> {
    let template_error = |message: String| Error::Template {
        hook: hook.to_string(),
        index,
        message,
    };
    let source = template_source(template)?;
    let rendered =
        gotemplate::render(&source, vars).map_err(|e| template_error(e.to_string()))?;
    let value: Value = serde_yaml::from_str(&rendered).map_err(|e| template_error(e.to_string()))?;
    parse_manifest(value)
}

fn parse_manifest(value: Value) -> Result<DynamicObject> {
    for field in ["apiVersion", "kind"] {
        if !value[field].as_str().is_some_and(|s| !s.is_empty()) {
            return Err(Error::InvalidManifest(format!("missing {field}")));
        }
    }
    if !value["metadata"]["name"].as_str().is_some_and(|s| !s.is_empty()) {
        return Err(Error::InvalidManifest(format!(
            "{} has no metadata.name",
            value["kind"].as_str().unwrap_or_default()
        )));
    }
    Ok(serde_json::from_value(value)?)
}

fn manifest_gvk(obj: &DynamicObject) -> Result<GroupVersionKind> {
    let types = obj
        .types
        .as_ref()
        .ok_or_else(|| Error::InvalidManifest("missing apiVersion or kind".to_string()))?;
    let (group, version) = types
        .api_version
        .split_once('/')
        .unwrap_or(("", types.api_version.as_str()));
    Ok(GroupVersionKind::gvk(group, version, &types.kind))
}

/// Resolve, tag and server-side apply one rendered manifest.
async fn apply_manifest(
    store: &dyn ClusterStore,
    mut obj: DynamicObject,
    hook_name: &str,
    cp_namespace: &str,
) -> Result<()> {
    let gvk = manifest_gvk(&obj)?;
    let (ar, namespaced) = store.resolve(&gvk).await?;
    obj.metadata.namespace = if namespaced {
        Some(
            obj.metadata
                .namespace
                .take()
                .unwrap_or_else(|| cp_namespace.to_string()),
        )
    } else {
        None
    };
    obj.labels_mut()
        .insert(K8S_MANAGED_BY.to_string(), HELM_MANAGED_BY.to_string());
    let annotations = obj.annotations_mut();
    annotations.insert(HELM_RELEASE_NAME_ANNOTATION.to_string(), hook_name.to_string());
    annotations.insert(
        HELM_RELEASE_NAMESPACE_ANNOTATION.to_string(),
        cp_namespace.to_string(),
    );

    let namespace = obj.metadata.namespace.clone();
    debug!(kind = %gvk.kind, name = %obj.name_any(), namespace = ?namespace, hook = %hook_name, "Applying hook object");
    store
        .apply(&ar, namespace.as_deref(), &obj, FIELD_MANAGER)
        .await?;
    Ok(())
}

// ============================================================================
// PostCreateHook validation controller
// ============================================================================

/// Validate the templates of a `PostCreateHook` and report the outcome in its `Synced` condition.
///
/// Templates are rendered with the default vars and placeholder context vars.
/// References to variables only a control plane supplies are not errors here.
///
/// # Errors
///
/// Returns API errors from the status write.
pub async fn reconcile_post_create_hook(hook: Arc<PostCreateHook>, ctx: Arc<Context>) -> Result<Action> {
    let name = hook.name_any();
    let condition = match validate_hook(&hook) {
        Ok(()) => {
            debug!(hook = %name, "Templates valid");
            reconcile_success()
        }
        Err(e) => {
            warn!(hook = %name, error = %e, "Invalid post create hook");
            reconcile_error(&e)
        }
    };

    let status = hook.status.clone().unwrap_or_default();
    let mut conditions = status.conditions.clone();
    ensure_condition(&mut conditions, condition);
    let generation = hook.metadata.generation;
    if are_condition_slices_same(&status.conditions, &conditions)
        && status.observed_generation == generation
    {
        return Ok(Action::await_change());
    }

    let mut patch = json!({
        "status": { "conditions": conditions, "observedGeneration": generation }
    });
    if let Some(rv) = hook.resource_version() {
        patch["metadata"] = json!({ "resourceVersion": rv });
    }
    ctx.store
        .patch_status(&api_resource::<PostCreateHook>(), None, &name, &patch)
        .await?;
    Ok(Action::await_change())
}

/// Check that every template renders and parses into a named object.
///
/// # Errors
///
/// Returns the first invalid template.
pub fn validate_hook(hook: &PostCreateHook) -> Result<()> {
    let name = hook.name_any();
    let vars = hook_vars(hook, &BTreeMap::new(), "validation-system", "validation");
    for (index, template) in hook.spec.templates.iter().enumerate() {
        let source = template_source(template)?;
        match gotemplate::render(&source, &vars) {
            Ok(rendered) => {
                let value: Value = serde_yaml::from_str(&rendered).map_err(|e| Error::Template {
                    hook: name.clone(),
                    index,
                    message: e.to_string(),
                })?;
                parse_manifest(value)?;
            }
            Err(TemplateError::MissingKey(_)) => {
                debug!(hook = %name, index = index, "Template needs control plane vars");
            }
            Err(e) => {
                return Err(Error::Template {
                    hook: name,
                    index,
                    message: e.to_string(),
                })
            }
        }
    }
    Ok(())
}

#[cfg(test)]
#[path = "hooks_tests.rs"]
mod hooks_tests;
