// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Bounded polling for values that another controller populates.
//!
//! Used while waiting for the token controller to project a service account
//! token. The wait gives up with [`Error::Timeout`], which the controller treats
//! as transient, instead of blocking a worker forever.

use crate::errors::{Error, Result};
use std::future::Future;
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tracing::debug;

/// Poll `check` every `interval` until it yields a value or `timeout` elapses.
///
/// The first check runs immediately. Errors from `check` abort the wait.
///
/// # Arguments
///
/// * `what` - Description used in logs and in the timeout error
/// * `interval` - Delay between checks
/// * `timeout` - Upper bound on the total wait
/// * `check` - Returns `Ok(Some(_))` once the value is available
///
/// # Errors
///
/// Returns [`Error::Timeout`] if no value appeared in time, or the first error
/// returned by `check`.
pub async fn poll_until<T, F, Fut>(
    what: &str,
    interval: Duration,
    timeout: Duration,
    mut check: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Option<T>>>,
{
    let deadline = Instant::now() + timeout;
    let mut attempt = 1u32;
    loop {
        if let Some(value) = check().await? {
            return Ok(value);
        }
        if Instant::now() + interval > deadline {
            return Err(Error::Timeout(format!(
                "{what} not available after {}s",
                timeout.as_secs()
            )));
        }
        debug!(what = %what, attempt = attempt, "Not available yet, polling again");
        attempt += 1;
        sleep(interval).await;
    }
}

#[cfg(test)]
#[path = "retry_tests.rs"]
mod retry_tests;
