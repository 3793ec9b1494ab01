// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

// Common test utilities for integration tests

#![allow(dead_code)]

use kflex::crd::ControlPlane;
use kube::{
    api::{Api, DeleteParams},
    client::Client,
};
use std::time::Duration;
use tokio::time::sleep;

/// Get a Kubernetes client or skip the test if not in a cluster
pub async fn get_kube_client_or_skip() -> Option<Client> {
    match Client::try_default().await {
        Ok(client) => {
            println!("✓ Successfully connected to Kubernetes cluster");
            Some(client)
        }
        Err(e) => {
            eprintln!("⊘ Skipping integration test: not running in Kubernetes cluster: {e}");
            None
        }
    }
}

/// Status of the condition `condition_type` on a control plane, if any.
pub fn condition_status(cp: &ControlPlane, condition_type: &str) -> Option<String> {
    cp.status
        .as_ref()?
        .conditions
        .iter()
        .find(|c| c.r#type == condition_type)
        .map(|c| c.status.clone())
}

/// Poll a control plane until `condition_type` is `True` or the timeout expires.
pub async fn wait_for_condition(
    client: &Client,
    name: &str,
    condition_type: &str,
    timeout: Duration,
) -> Result<ControlPlane, Box<dyn std::error::Error>> {
    let api: Api<ControlPlane> = Api::all(client.clone());
    let deadline = tokio::time::Instant::now() + timeout;

    loop {
        let cp = api.get(name).await?;
        if condition_status(&cp, condition_type).as_deref() == Some("True") {
            println!("✓ ControlPlane {name} is {condition_type}");
            return Ok(cp);
        }
        if tokio::time::Instant::now() >= deadline {
            return Err(format!(
                "ControlPlane {name} not {condition_type} after {}s",
                timeout.as_secs()
            )
            .into());
        }
        sleep(Duration::from_secs(2)).await;
    }
}

/// Delete a control plane, ignoring `NotFound`.
pub async fn delete_control_plane(client: &Client, name: &str) {
    let api: Api<ControlPlane> = Api::all(client.clone());
    match api.delete(name, &DeleteParams::default()).await {
        Ok(_) => println!("✓ Deleted ControlPlane: {name}"),
        Err(kube::Error::Api(ae)) if ae.code == 404 => {
            println!("  ControlPlane already deleted: {name}");
        }
        Err(e) => eprintln!("⚠ Failed to delete ControlPlane {name}: {e}"),
    }
}
