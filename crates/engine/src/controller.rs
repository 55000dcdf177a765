// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The fleet controller: desired-state reconciliation against a
//! `FleetProvider`, boot retry, heartbeat-driven liveness, and the
//! autoscaler tick. The instance table is the one piece of state touched
//! from more than one cooperative task in-process (the tick loop and each
//! heartbeat connection handler), so it sits behind a `parking_lot::Mutex`
//! rather than being owned outright — the same pattern the fleet's other
//! adapters use for state shared across connection handlers.

use std::collections::HashMap;
use std::sync::Arc;

use cf_adapters::{BootHandle, FleetProvider, ProviderError};
use cf_core::{Clock, Instance, InstanceId, LifecycleState, ProgramState, Role};
use parking_lot::Mutex;

use crate::autoscaler::{AutoscalerDecision, AutoscalerWindow};
use crate::config::FleetConfig;

/// What the controller wants the caller to do next in response to a
/// reconcile tick: boot commands and provider calls are dispatched by the
/// daemon layer, which owns the actual network/process I/O.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FleetAction {
    StartInstance(InstanceId),
    StopInstances(Vec<InstanceId>),
    SendBoot(InstanceId, String),
}

pub struct FleetController<P, C> {
    provider: Arc<P>,
    clock: C,
    config: FleetConfig,
    instances: Arc<Mutex<HashMap<InstanceId, Instance>>>,
    boot_handles: Mutex<HashMap<InstanceId, BootHandle>>,
    autoscaler: Mutex<AutoscalerWindow>,
    last_sync: Mutex<Option<std::time::Instant>>,
}

impl<P: FleetProvider, C: Clock> FleetController<P, C> {
    pub fn new(provider: Arc<P>, clock: C, config: FleetConfig) -> Self {
        let window_size = config.window_size;
        Self {
            provider,
            clock,
            config,
            instances: Arc::new(Mutex::new(HashMap::new())),
            boot_handles: Mutex::new(HashMap::new()),
            autoscaler: Mutex::new(AutoscalerWindow::new(window_size)),
            last_sync: Mutex::new(None),
        }
    }

    pub fn instances(&self) -> Arc<Mutex<HashMap<InstanceId, Instance>>> {
        self.instances.clone()
    }

    pub fn config(&self) -> &FleetConfig {
        &self.config
    }

    /// Pull the provider's view of the world and fold it into the instance
    /// table: new instances are registered pending, vanished ones dropped.
    pub async fn sync_with_provider(&self) -> Result<(), ProviderError> {
        let observed = self.provider.list().await?;
        let mut table = self.instances.lock();
        let seen: std::collections::HashSet<InstanceId> = observed.iter().map(|o| o.id.clone()).collect();
        table.retain(|id, _| seen.contains(id));
        for o in observed {
            let entry = table.entry(o.id.clone()).or_insert_with(|| Instance::new(o.id.clone(), o.role));
            entry.public_ip = o.public_ip;
            if o.running && entry.lifecycle == LifecycleState::Pending {
                entry.set_lifecycle(LifecycleState::Running);
            }
        }
        *self.last_sync.lock() = Some(std::time::Instant::now());
        Ok(())
    }

    pub fn fleet_sync_due(&self) -> bool {
        match *self.last_sync.lock() {
            None => true,
            Some(t) => t.elapsed() >= self.config.fleet_sync_interval(),
        }
    }

    fn instances_with_role(&self, role: Role) -> Vec<InstanceId> {
        self.instances.lock().values().filter(|i| i.role == role).map(|i| i.id.clone()).collect()
    }

    fn running_with_role(&self, role: Role) -> Vec<InstanceId> {
        self.instances
            .lock()
            .values()
            .filter(|i| i.role == role && i.lifecycle == LifecycleState::Running)
            .map(|i| i.id.clone())
            .collect()
    }

    fn pending_with_role(&self, role: Role) -> Vec<InstanceId> {
        self.instances
            .lock()
            .values()
            .filter(|i| i.role == role && i.lifecycle == LifecycleState::Pending)
            .map(|i| i.id.clone())
            .collect()
    }

    /// A stopped instance of the given role from the pool `sync_with_provider`
    /// already knows about. The provider's VM pool is fixed; the controller
    /// picks among already-provisioned-but-stopped instances rather than
    /// minting new ones.
    fn stopped_with_role(&self, role: Role) -> Option<InstanceId> {
        self.instances
            .lock()
            .values()
            .find(|i| i.role == role && i.lifecycle == LifecycleState::Stopped)
            .map(|i| i.id.clone())
    }

    /// Step 2 of the control loop: make sure exactly one dispatcher is
    /// running or pending, starting one (and blocking until it's running)
    /// if not.
    pub async fn ensure_dispatcher(&self) -> Result<Option<InstanceId>, ProviderError> {
        if !self.running_with_role(Role::Dispatcher).is_empty()
            || !self.pending_with_role(Role::Dispatcher).is_empty()
        {
            return Ok(None);
        }
        let Some(id) = self.stopped_with_role(Role::Dispatcher) else {
            tracing::warn!("no stopped dispatcher instance available in the pool");
            return Ok(None);
        };
        if let Some(instance) = self.instances.lock().get_mut(&id) {
            instance.set_lifecycle(LifecycleState::Pending);
        }
        self.provider.start(&id).await?;
        self.provider
            .wait_running(&id, self.config.start_signal_timeout())
            .await?;
        if let Some(instance) = self.instances.lock().get_mut(&id) {
            instance.set_lifecycle(LifecycleState::Running);
            instance.charge_start_at = Some(self.clock.now());
        }
        Ok(Some(id))
    }

    /// Step 3: make sure at least one worker exists (running or pending).
    /// Non-blocking: marks the instance pending and lets the next reconcile
    /// pick it up once `provider.list()` reports it running.
    pub async fn ensure_worker_target(&self) -> Result<Option<InstanceId>, ProviderError> {
        if !self.running_with_role(Role::Worker).is_empty() || !self.pending_with_role(Role::Worker).is_empty() {
            return Ok(None);
        }
        self.start_worker().await
    }

    /// Start one stopped worker from the pool. Returns `None` if the pool
    /// has no stopped worker left (the original source's "no more worker
    /// instances can be started").
    pub async fn start_worker(&self) -> Result<Option<InstanceId>, ProviderError> {
        let Some(id) = self.stopped_with_role(Role::Worker) else {
            tracing::warn!("no more worker instances can be started");
            return Ok(None);
        };
        if let Some(instance) = self.instances.lock().get_mut(&id) {
            instance.set_lifecycle(LifecycleState::Pending);
            instance.charge_start_at = Some(self.clock.now());
        }
        self.provider.start(&id).await?;
        Ok(Some(id))
    }

    /// Per-instance liveness check (§4.1). Returns the action the daemon
    /// layer should take, if any.
    pub fn check_living(&self, id: &InstanceId, boot_command: &str) -> Option<FleetAction> {
        let mut table = self.instances.lock();
        let instance = table.get_mut(id)?;
        if !matches!(instance.lifecycle, LifecycleState::Running | LifecycleState::Pending) {
            return None;
        }

        let now = self.clock.now();
        if let Some(hb) = instance.last_heartbeat_at {
            if now.duration_since(hb) < self.config.heartbeat_timeout() {
                // A self-reported error survives this pass; it's cleared only
                // by `reap_errored_worker` recycling the instance.
                if instance.program != ProgramState::Error {
                    instance.program = ProgramState::Running;
                }
                return None;
            }
            tracing::warn!(instance = %id, "heartbeat timed out, re-initializing instance");
            instance.last_heartbeat_at = None;
            instance.charge_start_at = None;
            instance.last_start_signal_at = Some(now);
            return Some(FleetAction::StartInstance(id.clone()));
        }

        match instance.last_start_signal_at {
            Some(sent) if now.duration_since(sent) >= self.config.start_signal_timeout() => {
                instance.last_start_signal_at = Some(now);
                Some(FleetAction::SendBoot(id.clone(), boot_command.to_string()))
            }
            Some(_) => None,
            None => {
                instance.last_start_signal_at = Some(now);
                Some(FleetAction::SendBoot(id.clone(), boot_command.to_string()))
            }
        }
    }

    pub fn record_heartbeat(&self, id: &InstanceId) {
        if let Some(instance) = self.instances.lock().get_mut(id) {
            instance.last_heartbeat_at = Some(self.clock.now());
            if instance.charge_start_at.is_none() {
                instance.charge_start_at = Some(self.clock.now());
            }
        }
    }

    /// Same as `record_heartbeat`, but also folds in the program state the
    /// sender reported on this beat — in particular `Error`, which
    /// `check_living`'s liveness pass will not overwrite with `Running`.
    pub fn record_heartbeat_with_state(&self, id: &InstanceId, program_state: ProgramState) {
        if let Some(instance) = self.instances.lock().get_mut(id) {
            instance.last_heartbeat_at = Some(self.clock.now());
            instance.program = program_state;
            if instance.charge_start_at.is_none() {
                instance.charge_start_at = Some(self.clock.now());
            }
        }
    }

    /// Workers currently reporting `programState = error` on their
    /// heartbeats (§7, *Worker exception during classify*).
    pub fn instances_in_error(&self, role: Role) -> Vec<InstanceId> {
        self.instances
            .lock()
            .values()
            .filter(|i| i.role == role && i.program == ProgramState::Error)
            .map(|i| i.id.clone())
            .collect()
    }

    /// Kill and recycle an errored instance: stop it via the provider and
    /// reset its table entry to `Stopped` so it re-enters the pool the next
    /// `ensure_worker_target`/autoscaler pass can pick from.
    pub async fn reap_errored_worker(&self, id: &InstanceId) -> Result<(), ProviderError> {
        self.provider.stop(std::slice::from_ref(id)).await?;
        if let Some(instance) = self.instances.lock().get_mut(id) {
            if instance.lifecycle == LifecycleState::Running {
                instance.set_lifecycle(LifecycleState::Stopping);
                instance.set_lifecycle(LifecycleState::Stopped);
            }
            instance.program = ProgramState::Pending;
            instance.last_heartbeat_at = None;
            instance.last_start_signal_at = None;
            instance.charge_start_at = None;
        }
        Ok(())
    }

    /// Re-init a hung instance after a heartbeat timeout (§4.1, §7): stop
    /// and start its VM again rather than cycling it back to the stopped
    /// pool the way `reap_errored_worker` does for a self-reported error,
    /// since the caller wants this instance back as soon as it re-boots.
    pub async fn reinit_instance(&self, id: &InstanceId) -> Result<(), ProviderError> {
        self.provider.stop(std::slice::from_ref(id)).await?;
        if let Some(instance) = self.instances.lock().get_mut(id) {
            instance.set_lifecycle(LifecycleState::Stopping);
            instance.set_lifecycle(LifecycleState::Stopped);
        }
        self.provider.start(id).await?;
        if let Some(instance) = self.instances.lock().get_mut(id) {
            instance.set_lifecycle(LifecycleState::Pending);
            instance.program = ProgramState::Pending;
            instance.last_heartbeat_at = None;
            instance.last_start_signal_at = None;
            instance.charge_start_at = Some(self.clock.now());
        }
        Ok(())
    }

    /// Track a boot handle so `cancel_all` can abort it later.
    pub fn track_boot(&self, id: InstanceId, handle: BootHandle) {
        self.boot_handles.lock().insert(id, handle);
    }

    /// Issue a boot command through the provider and track the resulting
    /// handle. The one place the daemon layer needs to reach through to
    /// the provider directly, since boot handles live in this table.
    pub async fn send_boot(&self, id: &InstanceId, command: &str) -> Result<(), ProviderError> {
        let handle = self.provider.send_boot(id, command).await?;
        self.track_boot(id.clone(), handle);
        Ok(())
    }

    /// The role of a known instance, if any.
    pub fn role_of(&self, id: &InstanceId) -> Option<Role> {
        self.instances.lock().get(id).map(|i| i.role)
    }

    /// Ids of every known instance, snapshotted so callers can iterate
    /// without holding the table lock across an `.await`.
    pub fn known_instance_ids(&self) -> Vec<InstanceId> {
        self.instances.lock().keys().cloned().collect()
    }

    pub fn observe_dispatcher_heartbeat(
        &self,
        tasks_waiting: u32,
        tasks_running: u32,
        worker_allocation: HashMap<InstanceId, u32>,
    ) {
        self.autoscaler.lock().observe(tasks_waiting, tasks_running, worker_allocation);
    }

    pub fn autoscaler_decision(&self) -> AutoscalerDecision {
        let current_workers = self.running_with_role(Role::Worker).len() + self.pending_with_role(Role::Worker).len();
        self.autoscaler.lock().decide(
            current_workers,
            self.config.max_workers,
            self.config.min_jobs_per_worker,
            self.config.max_jobs_per_worker,
        )
    }

    pub fn workers_running(&self) -> Vec<InstanceId> {
        self.running_with_role(Role::Worker)
    }

    pub fn workers_pending(&self) -> Vec<InstanceId> {
        self.pending_with_role(Role::Worker)
    }

    /// Stop all non-dispatcher instances (dispatcher preserved iff debug
    /// mode) and cancel outstanding boot commands.
    pub async fn cancel(&self) -> Result<(), ProviderError> {
        let to_stop: Vec<InstanceId> = {
            let table = self.instances.lock();
            table
                .values()
                .filter(|i| self.config.debug == false || i.role != Role::Dispatcher)
                .map(|i| i.id.clone())
                .collect()
        };
        for handle in self.boot_handles.lock().values_mut() {
            handle.cancel();
        }
        if !to_stop.is_empty() {
            self.provider.stop(&to_stop).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cf_adapters::FakeFleetProvider;
    use cf_core::FakeClock;

    fn controller() -> FleetController<FakeFleetProvider, FakeClock> {
        FleetController::new(Arc::new(FakeFleetProvider::new()), FakeClock::new(), FleetConfig::default())
    }

    fn running_instance(role: Role) -> (InstanceId, Instance) {
        let id = InstanceId::new();
        let mut i = Instance::new(id.clone(), role);
        assert!(i.set_lifecycle(LifecycleState::Pending));
        assert!(i.set_lifecycle(LifecycleState::Running));
        (id, i)
    }

    #[tokio::test]
    async fn ensure_dispatcher_starts_a_stopped_pool_instance() {
        let provider = FakeFleetProvider::new();
        let id = InstanceId::new();
        provider.register(id.clone(), Role::Dispatcher);
        let c = FleetController::new(Arc::new(provider), FakeClock::new(), FleetConfig::default());
        c.sync_with_provider().await.unwrap();

        let started = c.ensure_dispatcher().await.unwrap();
        assert_eq!(started, Some(id));
        assert_eq!(c.running_with_role(Role::Dispatcher).len(), 1);
    }

    #[tokio::test]
    async fn ensure_dispatcher_is_a_no_op_once_one_is_running() {
        let provider = FakeFleetProvider::new();
        let id = InstanceId::new();
        provider.register(id.clone(), Role::Dispatcher);
        provider.set_running(&id, true);
        let c = FleetController::new(Arc::new(provider), FakeClock::new(), FleetConfig::default());
        c.sync_with_provider().await.unwrap();
        c.ensure_dispatcher().await.unwrap();

        let second = c.ensure_dispatcher().await.unwrap();
        assert!(second.is_none());
        assert_eq!(c.running_with_role(Role::Dispatcher).len(), 1);
    }

    #[tokio::test]
    async fn ensure_dispatcher_is_none_when_pool_has_no_stopped_dispatcher() {
        let c = controller();
        assert_eq!(c.ensure_dispatcher().await.unwrap(), None);
    }

    #[tokio::test]
    async fn ensure_worker_target_returns_none_once_a_worker_exists() {
        let provider = FakeFleetProvider::new();
        let id1 = InstanceId::new();
        let id2 = InstanceId::new();
        provider.register(id1.clone(), Role::Worker);
        provider.register(id2.clone(), Role::Worker);
        let c = FleetController::new(Arc::new(provider), FakeClock::new(), FleetConfig::default());
        c.sync_with_provider().await.unwrap();

        let first = c.ensure_worker_target().await.unwrap();
        assert!(first.is_some());
        assert_eq!(c.ensure_worker_target().await.unwrap(), None);
    }

    #[test]
    fn check_living_sends_boot_on_first_tick_with_no_heartbeat_yet() {
        let c = controller();
        let (id, instance) = running_instance(Role::Worker);
        c.instances.lock().insert(id.clone(), instance);
        let action = c.check_living(&id, "run-worker.sh");
        assert_eq!(action, Some(FleetAction::SendBoot(id, "run-worker.sh".to_string())));
    }

    #[test]
    fn check_living_is_healthy_once_a_recent_heartbeat_is_recorded() {
        let c = controller();
        let (id, instance) = running_instance(Role::Worker);
        c.instances.lock().insert(id.clone(), instance);
        c.record_heartbeat(&id);
        assert_eq!(c.check_living(&id, "run-worker.sh"), None);
    }

    #[test]
    fn check_living_reinits_after_a_heartbeat_timeout() {
        let c = controller();
        let (id, instance) = running_instance(Role::Worker);
        c.instances.lock().insert(id.clone(), instance);
        c.record_heartbeat(&id);
        c.clock.advance(c.config.heartbeat_timeout() + std::time::Duration::from_secs(1));
        let action = c.check_living(&id, "run-worker.sh");
        assert_eq!(action, Some(FleetAction::StartInstance(id)));
    }

    #[tokio::test]
    async fn reinit_instance_restarts_the_vm_and_clears_liveness_state() {
        let provider = FakeFleetProvider::new();
        let id = InstanceId::new();
        provider.register(id.clone(), Role::Worker);
        provider.set_running(&id, true);
        let c = FleetController::new(Arc::new(provider), FakeClock::new(), FleetConfig::default());
        c.sync_with_provider().await.unwrap();
        {
            let mut table = c.instances.lock();
            let instance = table.get_mut(&id).unwrap();
            instance.set_lifecycle(LifecycleState::Pending);
            instance.set_lifecycle(LifecycleState::Running);
        }
        c.record_heartbeat(&id);

        c.reinit_instance(&id).await.unwrap();

        let table = c.instances.lock();
        let instance = table.get(&id).unwrap();
        assert_eq!(instance.lifecycle, LifecycleState::Pending);
        assert_eq!(instance.program, ProgramState::Pending);
        assert!(instance.last_heartbeat_at.is_none());
    }

    #[test]
    fn autoscaler_creates_when_work_arrives_with_no_workers() {
        let c = controller();
        c.observe_dispatcher_heartbeat(1, 0, HashMap::new());
        assert_eq!(c.autoscaler_decision(), AutoscalerDecision::Create);
    }

    #[test]
    fn check_living_does_not_clear_a_self_reported_error() {
        let c = controller();
        let (id, instance) = running_instance(Role::Worker);
        c.instances.lock().insert(id.clone(), instance);
        c.record_heartbeat_with_state(&id, ProgramState::Error);
        assert_eq!(c.check_living(&id, "run-worker.sh"), None);
        assert_eq!(c.instances.lock().get(&id).unwrap().program, ProgramState::Error);
        assert_eq!(c.instances_in_error(Role::Worker), vec![id]);
    }

    #[tokio::test]
    async fn reap_errored_worker_recycles_it_back_to_stopped() {
        let provider = FakeFleetProvider::new();
        let id = InstanceId::new();
        provider.register(id.clone(), Role::Worker);
        provider.set_running(&id, true);
        let c = FleetController::new(Arc::new(provider), FakeClock::new(), FleetConfig::default());
        c.sync_with_provider().await.unwrap();
        {
            let mut table = c.instances.lock();
            let instance = table.get_mut(&id).unwrap();
            instance.set_lifecycle(LifecycleState::Pending);
            instance.set_lifecycle(LifecycleState::Running);
        }
        c.record_heartbeat_with_state(&id, ProgramState::Error);

        c.reap_errored_worker(&id).await.unwrap();

        let table = c.instances.lock();
        let instance = table.get(&id).unwrap();
        assert_eq!(instance.lifecycle, LifecycleState::Stopped);
        assert_eq!(instance.program, ProgramState::Pending);
        assert!(instance.last_heartbeat_at.is_none());
    }
}
