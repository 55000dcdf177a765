// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Deterministic in-memory `FleetProvider` for unit tests: no subprocesses,
//! no sleeping in `wait_running`, boot commands resolve immediately unless
//! told to fail.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use cf_core::{InstanceId, Role};
use parking_lot::Mutex;

use crate::provider::{BootHandle, FleetProvider, ProviderError, ProviderInstance};

#[derive(Default)]
struct FakeState {
    instances: HashMap<InstanceId, ProviderInstance>,
    boot_calls: Vec<InstanceId>,
    fail_boot_for: std::collections::HashSet<InstanceId>,
}

#[derive(Clone, Default)]
pub struct FakeFleetProvider {
    inner: Arc<Mutex<FakeState>>,
}

impl FakeFleetProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, id: InstanceId, role: Role) {
        self.inner.lock().instances.insert(
            id.clone(),
            ProviderInstance { id, role, public_ip: Some("10.0.0.1".to_string()), running: false },
        );
    }

    pub fn set_running(&self, id: &InstanceId, running: bool) {
        if let Some(instance) = self.inner.lock().instances.get_mut(id) {
            instance.running = running;
        }
    }

    pub fn boot_calls(&self) -> Vec<InstanceId> {
        self.inner.lock().boot_calls.clone()
    }

    pub fn fail_next_boot_for(&self, id: InstanceId) {
        self.inner.lock().fail_boot_for.insert(id);
    }
}

#[async_trait]
impl FleetProvider for FakeFleetProvider {
    async fn list(&self) -> Result<Vec<ProviderInstance>, ProviderError> {
        Ok(self.inner.lock().instances.values().cloned().collect())
    }

    async fn start(&self, id: &InstanceId) -> Result<(), ProviderError> {
        let mut state = self.inner.lock();
        let instance =
            state.instances.get_mut(id).ok_or_else(|| ProviderError::Rpc(format!("unknown instance {id}")))?;
        instance.running = true;
        Ok(())
    }

    async fn stop(&self, ids: &[InstanceId]) -> Result<(), ProviderError> {
        let mut state = self.inner.lock();
        for id in ids {
            if let Some(instance) = state.instances.get_mut(id) {
                instance.running = false;
            }
        }
        Ok(())
    }

    async fn wait_running(&self, id: &InstanceId, _timeout: Duration) -> Result<(), ProviderError> {
        if self.inner.lock().instances.get(id).is_some_and(|i| i.running) {
            Ok(())
        } else {
            Err(ProviderError::WaitRunningTimedOut)
        }
    }

    async fn send_boot(&self, id: &InstanceId, _command: &str) -> Result<BootHandle, ProviderError> {
        self.inner.lock().boot_calls.push(id.clone());
        let should_fail = self.inner.lock().fail_boot_for.remove(id);
        let (cancel_tx, _cancel_rx) = tokio::sync::oneshot::channel();
        let id = id.clone();
        let task = tokio::spawn(async move {
            if should_fail {
                Err(ProviderError::BootFailed(format!("{id}: injected failure")))
            } else {
                Ok(())
            }
        });
        Ok(BootHandle::new(cancel_tx, task))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn records_every_boot_attempt() {
        let provider = FakeFleetProvider::new();
        let id = InstanceId::new();
        provider.register(id.clone(), Role::Worker);
        provider.set_running(&id, true);
        provider.send_boot(&id, "echo hi").await.unwrap();
        assert_eq!(provider.boot_calls(), vec![id]);
    }

    #[tokio::test]
    async fn injected_boot_failure_surfaces_on_the_handle() {
        let provider = FakeFleetProvider::new();
        let id = InstanceId::new();
        provider.register(id.clone(), Role::Worker);
        provider.set_running(&id, true);
        provider.fail_next_boot_for(id.clone());
        let handle = provider.send_boot(&id, "echo hi").await.unwrap();
        assert!(handle.join().await.is_err());
    }
}
