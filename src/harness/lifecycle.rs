//! Lifecycle guard for the relay endpoint under test.
//!
//! The suite needs the endpoint to exist before testing and must not leave
//! behind anything it created. The guard tracks whether *this* run created
//! the endpoint and deletes it on cleanup only in that case. Concurrent
//! suites against the same path are not guarded against; behavior is
//! undefined then.

use anyhow::{Context, Result};
use tracing::{debug, info, warn};

use crate::relay::{RelayError, RelayNamespace};

pub struct ResourceLifecycleGuard {
    path: String,
}

impl ResourceLifecycleGuard {
    pub fn new(path: impl Into<String>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Make sure the endpoint exists, creating it when absent.
    ///
    /// Returns whether this run created it. An existence-check failure is
    /// logged and swallowed -- the endpoint is then treated as not
    /// pre-existing and creation is attempted. Creation failures (other than
    /// a concurrent create racing us to it) are real setup errors and
    /// propagate.
    pub async fn ensure_exists(&self, namespace: &dyn RelayNamespace) -> Result<bool> {
        let pre_existing = match namespace.endpoint_exists(&self.path).await {
            Ok(exists) => exists,
            Err(e) => {
                warn!(
                    path = %self.path,
                    error = %e,
                    "endpoint existence check failed, assuming absent"
                );
                false
            }
        };

        if pre_existing {
            info!(path = %self.path, "endpoint pre-exists");
            return Ok(false);
        }

        match namespace.create_endpoint(&self.path).await {
            Ok(()) => {
                info!(path = %self.path, "endpoint created for this run");
                Ok(true)
            }
            Err(RelayError::EndpointExists(_)) => {
                debug!(path = %self.path, "endpoint appeared concurrently");
                Ok(false)
            }
            Err(e) => Err(e).with_context(|| format!("failed to create endpoint '{}'", self.path)),
        }
    }

    /// Delete the endpoint if this run created it. Invoked from the suite's
    /// final block regardless of test outcome; errors here are warnings and
    /// never change the suite's exit code.
    pub async fn cleanup(&self, namespace: &dyn RelayNamespace, created_by_this_run: bool) {
        if !created_by_this_run {
            debug!(path = %self.path, "endpoint pre-existed, leaving it in place");
            return;
        }

        match namespace.delete_endpoint(&self.path).await {
            Ok(()) => info!(path = %self.path, "endpoint deleted"),
            Err(e) => warn!(
                path = %self.path,
                error = %e,
                "failed to delete endpoint created by this run"
            ),
        }
    }
}
