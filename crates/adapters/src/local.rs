// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! `LocalFleetProvider`: instances are child processes on the controller's
//! own machine. Stands in for a cloud SDK in single-box deployments and in
//! integration tests that want a real process tree without a real cloud
//! account, the same role `KubernetesAdapter`/`DockerAdapter` play for
//! agent processes.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use cf_core::{InstanceId, Role};
use parking_lot::Mutex;
use tokio::process::Command;

use crate::provider::{BootHandle, FleetProvider, ProviderError, ProviderInstance};

struct LocalMeta {
    role: Role,
    running: bool,
}

#[derive(Clone)]
pub struct LocalFleetProvider {
    instances: Arc<Mutex<HashMap<InstanceId, LocalMeta>>>,
}

impl LocalFleetProvider {
    pub fn new() -> Self {
        Self { instances: Arc::new(Mutex::new(HashMap::new())) }
    }

    /// Register an instance with the provider before the controller starts
    /// it; mirrors a pre-provisioned VM the real SDK would already know
    /// about from a prior `List()`.
    pub fn register(&self, id: InstanceId, role: Role) {
        self.instances.lock().insert(id, LocalMeta { role, running: false });
    }
}

impl Default for LocalFleetProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl FleetProvider for LocalFleetProvider {
    async fn list(&self) -> Result<Vec<ProviderInstance>, ProviderError> {
        Ok(self
            .instances
            .lock()
            .iter()
            .map(|(id, meta)| ProviderInstance {
                id: id.clone(),
                role: meta.role,
                public_ip: Some("127.0.0.1".to_string()),
                running: meta.running,
            })
            .collect())
    }

    async fn start(&self, id: &InstanceId) -> Result<(), ProviderError> {
        let mut instances = self.instances.lock();
        let meta = instances
            .get_mut(id)
            .ok_or_else(|| ProviderError::Rpc(format!("unknown instance {id}")))?;
        meta.running = true;
        Ok(())
    }

    async fn stop(&self, ids: &[InstanceId]) -> Result<(), ProviderError> {
        let mut instances = self.instances.lock();
        for id in ids {
            if let Some(meta) = instances.get_mut(id) {
                meta.running = false;
            }
        }
        Ok(())
    }

    async fn wait_running(&self, id: &InstanceId, timeout: Duration) -> Result<(), ProviderError> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if self.instances.lock().get(id).is_some_and(|m| m.running) {
                return Ok(());
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(ProviderError::WaitRunningTimedOut);
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }

    async fn send_boot(&self, id: &InstanceId, command: &str) -> Result<BootHandle, ProviderError> {
        if !self.instances.lock().get(id).is_some_and(|m| m.running) {
            return Err(ProviderError::NotReady(id.to_string()));
        }
        let command = command.to_string();
        let id = id.clone();
        let (cancel_tx, mut cancel_rx) = tokio::sync::oneshot::channel();
        let task = tokio::spawn(async move {
            let mut child = Command::new("sh")
                .arg("-c")
                .arg(&command)
                .kill_on_drop(true)
                .spawn()
                .map_err(|e| ProviderError::BootFailed(e.to_string()))?;
            tokio::select! {
                status = child.wait() => {
                    match status {
                        Ok(status) if status.success() => Ok(()),
                        Ok(status) => Err(ProviderError::BootFailed(format!("{id}: exit {status}"))),
                        Err(e) => Err(ProviderError::BootFailed(e.to_string())),
                    }
                }
                _ = &mut cancel_rx => {
                    let _ = child.kill().await;
                    Err(ProviderError::BootFailed(format!("{id}: cancelled")))
                }
            }
        });
        Ok(BootHandle::new(cancel_tx, task))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn list_reflects_registered_instances_and_running_state() {
        let provider = LocalFleetProvider::new();
        let id = InstanceId::new();
        provider.register(id.clone(), Role::Worker);
        assert!(!provider.list().await.unwrap()[0].running);
        provider.start(&id).await.unwrap();
        assert!(provider.list().await.unwrap()[0].running);
        provider.stop(std::slice::from_ref(&id)).await.unwrap();
        assert!(!provider.list().await.unwrap()[0].running);
    }

    #[tokio::test]
    async fn wait_running_times_out_on_a_never_started_instance() {
        let provider = LocalFleetProvider::new();
        let id = InstanceId::new();
        provider.register(id.clone(), Role::Worker);
        let err = provider.wait_running(&id, Duration::from_millis(100)).await.unwrap_err();
        assert!(matches!(err, ProviderError::WaitRunningTimedOut));
    }

    #[tokio::test]
    async fn send_boot_rejects_a_not_running_instance() {
        let provider = LocalFleetProvider::new();
        let id = InstanceId::new();
        provider.register(id.clone(), Role::Worker);
        let err = provider.send_boot(&id, "true").await.unwrap_err();
        assert!(matches!(err, ProviderError::NotReady(_)));
    }

    #[tokio::test]
    async fn send_boot_runs_the_command_and_resolves_on_completion() {
        let provider = LocalFleetProvider::new();
        let id = InstanceId::new();
        provider.register(id.clone(), Role::Worker);
        provider.start(&id).await.unwrap();
        let mut handle = provider.send_boot(&id, "true").await.unwrap();
        for _ in 0..50 {
            if handle.is_finished() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert!(handle.is_finished());
    }
}
