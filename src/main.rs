// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

use anyhow::Result;
use axum::{http::StatusCode, response::IntoResponse, routing::get, Router};
use clap::Parser;
use futures::StreamExt;
use k8s_openapi::api::apps::v1::{Deployment, StatefulSet};
use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::{ConfigMap, Secret};
use kflex::{
    config::OperatorConfig,
    constants::{
        DEFAULT_LEASE_DURATION_SECS, DEFAULT_LEASE_GRACE_SECS, LEADER_LEASE_NAME,
        METRICS_SERVER_PATH, OPERATOR_CONFIG_MAP, TOKIO_WORKER_THREADS,
    },
    context::Context,
    crd::{ControlPlane, PostCreateHook},
    metrics,
    reconcilers::{error_policy, reconcile_control_plane, reconcile_post_create_hook},
};
use kube::{
    runtime::{watcher::Config, Controller},
    Api, Client,
};
use kube_lease_manager::LeaseManagerBuilder;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

fn main() -> Result<()> {
    // Build Tokio runtime with custom thread names
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(TOKIO_WORKER_THREADS)
        .thread_name("kflex-controller")
        .enable_all()
        .build()?;

    runtime.block_on(async_main())
}

async fn async_main() -> Result<()> {
    // Respects RUST_LOG if set, otherwise defaults to INFO level.
    // RUST_LOG_FORMAT=json switches to structured output.
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    let log_format = std::env::var("RUST_LOG_FORMAT").unwrap_or_else(|_| "text".to_string());

    match log_format.to_lowercase().as_str() {
        "json" => {
            tracing_subscriber::fmt()
                .with_env_filter(env_filter)
                .with_file(true)
                .with_line_number(true)
                .with_thread_names(true)
                .with_target(false)
                .json()
                .init();
        }
        _ => {
            tracing_subscriber::fmt()
                .with_env_filter(env_filter)
                .with_file(true)
                .with_line_number(true)
                .with_thread_names(true)
                .with_target(false)
                .with_ansi(true)
                .compact()
                .init();
        }
    }

    let mut config = OperatorConfig::parse();

    info!("Starting kflex controller");
    debug!("Logging initialized with file and line number tracking");

    debug!("Initializing Kubernetes client");
    let client = Client::try_default().await?;
    debug!("Kubernetes client initialized successfully");

    load_operator_config_map(&client, &mut config).await;
    info!(
        domain = %config.domain,
        external_port = config.external_port,
        openshift = config.is_openshift,
        exposure = ?config.effective_exposure(),
        "Operator configuration loaded"
    );

    let bind_address = config.metrics_bind_address.clone();
    let leader_elect = config.leader_elect;
    let namespace = config.system_namespace.clone();
    let pod_name = config.pod_name.clone();
    let ctx = Arc::new(Context::new(client.clone(), config));

    // The metrics server runs on every replica, leader or not
    let metrics_task = tokio::spawn(run_metrics_server(bind_address));

    let leadership = if leader_elect {
        Some(acquire_leadership(client.clone(), &namespace, &pod_name).await?)
    } else {
        info!("Leader election disabled, starting controllers immediately");
        None
    };

    info!("Starting all controllers");

    // Controllers should never exit - if one fails, we log it and exit the main process
    tokio::select! {
        result = run_controlplane_controller(client.clone(), ctx.clone()) => {
            error!("CRITICAL: ControlPlane controller exited unexpectedly: {:?}", result);
            result?;
            anyhow::bail!("ControlPlane controller exited unexpectedly without error")
        }
        result = run_postcreatehook_controller(client.clone(), ctx.clone()) => {
            error!("CRITICAL: PostCreateHook controller exited unexpectedly: {:?}", result);
            result?;
            anyhow::bail!("PostCreateHook controller exited unexpectedly without error")
        }
        () = leadership_lost(leadership) => {
            metrics::record_leader_lost(&pod_name);
            error!("CRITICAL: Leadership lost, shutting down");
            anyhow::bail!("Leadership lost")
        }
        result = metrics_task => {
            error!("CRITICAL: Metrics server exited unexpectedly: {:?}", result);
            result??;
            anyhow::bail!("Metrics server exited unexpectedly without error")
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal, stopping controllers");
            Ok(())
        }
    }
}

/// Overlay settings from the `kubeflex-config` ConfigMap, if present.
async fn load_operator_config_map(client: &Client, config: &mut OperatorConfig) {
    let api = Api::<ConfigMap>::namespaced(client.clone(), &config.system_namespace);
    match api.get_opt(OPERATOR_CONFIG_MAP).await {
        Ok(Some(cm)) => {
            debug!(
                namespace = %config.system_namespace,
                name = OPERATOR_CONFIG_MAP,
                "Applying operator ConfigMap"
            );
            config.apply_config_map(&cm.data.unwrap_or_default());
        }
        Ok(None) => debug!(name = OPERATOR_CONFIG_MAP, "Operator ConfigMap not found, using flags"),
        Err(e) => warn!(error = %e, "Failed to read operator ConfigMap, using flags"),
    }
}

/// Block until this replica holds the leader lease.
async fn acquire_leadership(
    client: Client,
    namespace: &str,
    pod_name: &str,
) -> Result<watch::Receiver<bool>> {
    info!(lease = LEADER_LEASE_NAME, identity = %pod_name, "Waiting for leader lease");
    let manager = LeaseManagerBuilder::new(client, LEADER_LEASE_NAME)
        .with_namespace(namespace)
        .with_identity(pod_name)
        .with_duration(DEFAULT_LEASE_DURATION_SECS)
        .with_grace(DEFAULT_LEASE_GRACE_SECS)
        .build()
        .await?;
    let (mut channel, _task) = manager.watch().await;

    while !*channel.borrow_and_update() {
        channel.changed().await?;
    }
    metrics::record_leader_elected(pod_name);
    info!(lease = LEADER_LEASE_NAME, identity = %pod_name, "Acquired leader lease");
    Ok(channel)
}

/// Resolve once the lease is lost. Never resolves without leader election.
async fn leadership_lost(leadership: Option<watch::Receiver<bool>>) {
    let Some(mut channel) = leadership else {
        return futures::future::pending::<()>().await;
    };
    loop {
        if channel.changed().await.is_err() {
            warn!("Lease manager stopped");
            return;
        }
        if !*channel.borrow_and_update() {
            return;
        }
    }
}

/// Serve `/metrics`, `/healthz` and `/readyz`.
async fn run_metrics_server(bind_address: String) -> Result<()> {
    let app = Router::new()
        .route(METRICS_SERVER_PATH, get(metrics_handler))
        .route("/healthz", get(|| async { "ok" }))
        .route("/readyz", get(|| async { "ok" }));

    let listener = tokio::net::TcpListener::bind(&bind_address).await?;
    info!(address = %bind_address, "Metrics server listening");
    axum::serve(listener, app).await?;
    Ok(())
}

async fn metrics_handler() -> impl IntoResponse {
    match metrics::gather_metrics() {
        Ok(body) => (StatusCode::OK, body),
        Err(e) => {
            error!("Failed to gather metrics: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        }
    }
}

/// Run the `ControlPlane` controller
async fn run_controlplane_controller(client: Client, ctx: Arc<Context>) -> Result<()> {
    info!("Starting ControlPlane controller");
    debug!("Initializing ControlPlane controller with cluster-wide watch");

    let api = Api::<ControlPlane>::all(client.clone());

    // Changes to owned objects (readiness, deletion) trigger a reconcile of the owner
    Controller::new(api, Config::default())
        .owns(Api::<Deployment>::all(client.clone()), Config::default())
        .owns(Api::<StatefulSet>::all(client.clone()), Config::default())
        .owns(Api::<Secret>::all(client.clone()), Config::default())
        .owns(Api::<Job>::all(client), Config::default())
        .run(reconcile_control_plane, error_policy, ctx)
        .for_each(|result| {
            if let Err(e) = result {
                debug!("ControlPlane reconcile failed: {}", e);
            }
            futures::future::ready(())
        })
        .await;

    Ok(())
}

/// Run the `PostCreateHook` controller
async fn run_postcreatehook_controller(client: Client, ctx: Arc<Context>) -> Result<()> {
    info!("Starting PostCreateHook controller");

    let api = Api::<PostCreateHook>::all(client);

    Controller::new(api, Config::default())
        .run(reconcile_post_create_hook, error_policy, ctx)
        .for_each(|_| futures::future::ready(()))
        .await;

    Ok(())
}
