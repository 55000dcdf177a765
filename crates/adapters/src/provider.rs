// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The `FleetProvider` capability: everything the fleet controller needs
//! from the cloud beneath it, abstracted away from any particular SDK.

use async_trait::async_trait;
use cf_core::{InstanceId, Role};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("instance not ready: {0}")]
    NotReady(String),
    #[error("boot command failed: {0}")]
    BootFailed(String),
    #[error("provider rpc failed: {0}")]
    Rpc(String),
    #[error("timed out waiting for instance to reach running")]
    WaitRunningTimedOut,
}

/// One VM as reported by the provider's own bookkeeping (distinct from
/// `cf_core::Instance`, which is the controller's internal view derived
/// from this plus heartbeats).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderInstance {
    pub id: InstanceId,
    pub role: Role,
    pub public_ip: Option<String>,
    pub running: bool,
}

/// A cancellable handle to an in-flight boot command. Dropping it does not
/// cancel the command; callers must call `cancel` explicitly, matching
/// `Cancel()`'s requirement to stop outstanding bootstrap commands.
pub struct BootHandle {
    cancel_tx: Option<tokio::sync::oneshot::Sender<()>>,
    task: tokio::task::JoinHandle<Result<(), ProviderError>>,
}

impl BootHandle {
    pub fn new(
        cancel_tx: tokio::sync::oneshot::Sender<()>,
        task: tokio::task::JoinHandle<Result<(), ProviderError>>,
    ) -> Self {
        Self { cancel_tx: Some(cancel_tx), task }
    }

    pub fn cancel(&mut self) {
        if let Some(tx) = self.cancel_tx.take() {
            let _ = tx.send(());
        }
        self.task.abort();
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Wait for the boot command to finish. Mostly useful in tests; the
    /// fleet controller itself polls `is_finished` from its own tick rather
    /// than blocking the control loop on this.
    pub async fn join(self) -> Result<(), ProviderError> {
        match self.task.await {
            Ok(result) => result,
            Err(e) => Err(ProviderError::Rpc(format!("boot task panicked: {e}"))),
        }
    }
}

/// Everything the fleet controller needs from the cloud: list, start, stop,
/// wait-for-running, and boot-command delivery. A real implementation wraps
/// a provider SDK (EC2, GCE, ...); `LocalFleetProvider` spawns child
/// processes on the controller's own machine for single-box deployments and
/// local development.
#[async_trait]
pub trait FleetProvider: Send + Sync + 'static {
    /// List all instances tagged as belonging to this fleet, across roles.
    async fn list(&self) -> Result<Vec<ProviderInstance>, ProviderError>;

    async fn start(&self, id: &InstanceId) -> Result<(), ProviderError>;

    async fn stop(&self, ids: &[InstanceId]) -> Result<(), ProviderError>;

    /// Block until the instance is provider-confirmed running, or the
    /// timeout elapses. The only intentionally-blocking provider call; used
    /// only during dispatcher bootstrap, before the controller enters its
    /// serving loop.
    async fn wait_running(&self, id: &InstanceId, timeout: Duration) -> Result<(), ProviderError>;

    /// Deliver a boot command to a running instance over the provider's
    /// remote-exec channel. Returns a handle the caller can cancel.
    async fn send_boot(&self, id: &InstanceId, command: &str) -> Result<BootHandle, ProviderError>;
}
