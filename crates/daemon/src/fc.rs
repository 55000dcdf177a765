// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Fleet controller daemon: a TCP heartbeat sink plus the control loop
//! that drives `cf_engine::FleetController` against a real provider.
//! Mirrors the split the teacher's listener/engine pair uses — socket I/O
//! here, state transitions in the engine crate — just with one role
//! instead of many.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::{TcpListener, TcpStream};

use cf_adapters::{FleetProvider, ProviderError};
use cf_core::{Clock, InstanceId, ProgramState, Role};
use cf_engine::{AutoscalerDecision, FleetAction, FleetController};
use cf_wire::{read_packet, write_packet, HeartBeat, InstanceType, Packet, ProtocolError};

#[derive(Debug, thiserror::Error)]
pub enum DaemonError {
    #[error("provider error: {0}")]
    Provider(#[from] ProviderError),
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("connection sent a command where a heartbeat was expected")]
    UnexpectedPacket,
}

/// Boot command templates carry a `{instance_id}` placeholder the command
/// line tools expect as their `self_instance_id` positional argument.
fn render_boot_command(template: &str, id: &InstanceId) -> String {
    template.replace("{instance_id}", id.as_str())
}

fn parse_program_state(s: &str) -> ProgramState {
    match s {
        "running" => ProgramState::Running,
        "error" => ProgramState::Error,
        "stopping" => ProgramState::Stopping,
        _ => ProgramState::Pending,
    }
}

pub struct FleetControllerDaemon<P, C> {
    controller: Arc<FleetController<P, C>>,
    bind_addr: SocketAddr,
    dispatcher_boot_command: String,
    worker_boot_command: String,
}

impl<P: FleetProvider, C: Clock> FleetControllerDaemon<P, C> {
    pub fn new(
        controller: Arc<FleetController<P, C>>,
        bind_addr: SocketAddr,
        dispatcher_boot_command: impl Into<String>,
        worker_boot_command: impl Into<String>,
    ) -> Self {
        Self {
            controller,
            bind_addr,
            dispatcher_boot_command: dispatcher_boot_command.into(),
            worker_boot_command: worker_boot_command.into(),
        }
    }

    /// Run the accept loop and the control loop side by side until one of
    /// them returns. Only the control loop is expected to ever return
    /// (on `Cancel`); the accept loop runs forever.
    pub async fn run(self: Arc<Self>) -> Result<(), DaemonError> {
        let listener = TcpListener::bind(self.bind_addr).await?;
        tracing::info!(addr = %self.bind_addr, "fleet controller listening");
        let accept_handle = {
            let this = Arc::clone(&self);
            tokio::spawn(async move { this.accept_loop(listener).await })
        };

        tokio::select! {
            _ = self.control_loop() => {}
            _ = accept_handle => {}
        }
        Ok(())
    }

    async fn accept_loop(self: Arc<Self>, listener: TcpListener) {
        loop {
            match listener.accept().await {
                Ok((stream, peer)) => {
                    let this = Arc::clone(&self);
                    tokio::spawn(async move {
                        if let Err(e) = this.handle_connection(stream).await {
                            tracing::warn!(peer = %peer, error = %e, "heartbeat connection error");
                        }
                    });
                }
                Err(e) => tracing::error!(error = %e, "accept error"),
            }
        }
    }

    /// One request, one reply: `SubmitHeartbeat` from the public contract.
    async fn handle_connection(&self, mut stream: TcpStream) -> Result<(), DaemonError> {
        let packet = read_packet(&mut stream).await?;
        let Packet::HeartBeat(hb) = packet else { return Err(DaemonError::UnexpectedPacket) };
        let id = InstanceId::from_string(&hb.instance_id);

        let reply = match hb.instance_type {
            InstanceType::Dispatcher => {
                self.controller.record_heartbeat(&id);
                let allocation: HashMap<InstanceId, u32> = hb
                    .worker_allocation
                    .clone()
                    .unwrap_or_default()
                    .into_iter()
                    .map(|(k, v)| (InstanceId::from_string(k), v))
                    .collect();
                self.controller.observe_dispatcher_heartbeat(
                    hb.tasks_waiting.unwrap_or(0),
                    hb.tasks_running.unwrap_or(0),
                    allocation,
                );
                let running = self.controller.workers_running().iter().map(ToString::to_string).collect();
                let pending = self.controller.workers_pending().iter().map(ToString::to_string).collect();
                HeartBeat::controller_reply(hb.time, running, pending)
            }
            InstanceType::Worker => {
                let program_state = hb.program_state.as_deref().map(parse_program_state).unwrap_or(ProgramState::Pending);
                self.controller.record_heartbeat_with_state(&id, program_state);
                HeartBeat::echo(&hb)
            }
            InstanceType::InstanceManager => HeartBeat::echo(&hb),
        };

        write_packet(&mut stream, &Packet::HeartBeat(reply)).await?;
        Ok(())
    }

    async fn control_loop(&self) {
        loop {
            if let Err(e) = self.tick().await {
                tracing::warn!(error = %e, "fleet controller tick failed, continuing");
            }
            tokio::time::sleep(self.controller.config().server_sleep()).await;
        }
    }

    /// One control-loop tick, §4.1 steps 1-5.
    async fn tick(&self) -> Result<(), DaemonError> {
        if self.controller.fleet_sync_due() {
            self.controller.sync_with_provider().await?;
        }

        if let Some(id) = self.controller.ensure_dispatcher().await? {
            let command = render_boot_command(&self.dispatcher_boot_command, &id);
            self.controller.send_boot(&id, &command).await?;
        }
        self.controller.ensure_worker_target().await?;

        for id in self.controller.instances_in_error(Role::Worker) {
            tracing::warn!(instance = %id, "worker reported a classify error, reaping");
            self.controller.reap_errored_worker(&id).await?;
        }

        for id in self.controller.known_instance_ids() {
            let Some(role) = self.controller.role_of(&id) else { continue };
            let template = match role {
                Role::Dispatcher => &self.dispatcher_boot_command,
                Role::Worker => &self.worker_boot_command,
            };
            let command = render_boot_command(template, &id);
            if let Some(action) = self.controller.check_living(&id, &command) {
                self.apply_action(action).await?;
            }
        }

        match self.controller.autoscaler_decision() {
            AutoscalerDecision::None => {}
            AutoscalerDecision::Create => {
                self.controller.start_worker().await?;
            }
            AutoscalerDecision::Kill(id) => {
                tracing::info!(instance = %id, "autoscaler killing an underloaded worker");
                self.controller.reap_errored_worker(&id).await?;
            }
        }

        Ok(())
    }

    async fn apply_action(&self, action: FleetAction) -> Result<(), DaemonError> {
        match action {
            FleetAction::SendBoot(id, command) => self.controller.send_boot(&id, &command).await?,
            FleetAction::StartInstance(id) => {
                self.controller.reinit_instance(&id).await?;
                let template = match self.controller.role_of(&id) {
                    Some(Role::Dispatcher) => &self.dispatcher_boot_command,
                    _ => &self.worker_boot_command,
                };
                let command = render_boot_command(template, &id);
                self.controller.send_boot(&id, &command).await?
            }
            FleetAction::StopInstances(ids) => {
                for id in ids {
                    self.controller.reap_errored_worker(&id).await?;
                }
            }
        }
        Ok(())
    }
}
