// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Worker daemon: the upward heartbeat client that asks the dispatcher for
//! work, the `done` report after each classify, and the processing loop
//! that drives `cf_engine::WorkerRuntime`. Single-owner like the
//! dispatcher, so the runtime sits behind a `tokio::sync::Mutex` that the
//! heartbeat loop and the processing loop both serialize through.

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tokio::sync::Mutex;

use cf_core::{ProgramState, TaskId};
use cf_engine::{Classifier, WorkerRuntime};
use cf_storage::{LogShipper, ObjectStore};
use cf_wire::{Command, ErrorArgs, HeartBeat, Packet, ProtocolError};

use crate::transport::{send_request, TransportError};

#[derive(Debug, thiserror::Error)]
pub enum DaemonError {
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),
    #[error("upward request failed: {0}")]
    Transport(#[from] TransportError),
}

fn now_epoch_ms() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_millis() as u64
}

fn program_state_str(state: ProgramState) -> &'static str {
    match state {
        ProgramState::Pending => "pending",
        ProgramState::Running => "running",
        ProgramState::Error => "error",
        ProgramState::Stopping => "stopping",
    }
}

pub struct WorkerDaemon<S, C> {
    runtime: Mutex<WorkerRuntime<S, C>>,
    log_shipper: LogShipper<S>,
    self_id: String,
    dispatcher_addr: String,
    heartbeat_interval: Duration,
    logging_interval: Duration,
}

impl<S: ObjectStore, C: Classifier> WorkerDaemon<S, C> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<S>,
        files_bucket: impl Into<String>,
        logging_bucket: impl Into<String>,
        classifier: C,
        self_id: impl Into<String>,
        dispatcher_addr: impl Into<String>,
        heartbeat_interval: Duration,
        logging_interval: Duration,
    ) -> Self {
        let self_id = self_id.into();
        let log_shipper = LogShipper::new(Arc::clone(&store), logging_bucket, self_id.clone());
        Self {
            runtime: Mutex::new(WorkerRuntime::new(store, files_bucket, classifier)),
            log_shipper,
            self_id,
            dispatcher_addr: dispatcher_addr.into(),
            heartbeat_interval,
            logging_interval,
        }
    }

    /// Run the heartbeat client, the processing loop, and the log shipper
    /// side by side. None of the three is expected to return under normal
    /// operation.
    pub async fn run(self: Arc<Self>) -> Result<(), DaemonError> {
        let heartbeat = {
            let this = Arc::clone(&self);
            tokio::spawn(async move { this.heartbeat_loop().await })
        };
        let process = {
            let this = Arc::clone(&self);
            tokio::spawn(async move { this.process_loop().await })
        };
        let log_shipping = {
            let this = Arc::clone(&self);
            tokio::spawn(async move { this.log_shipping_loop().await })
        };
        tokio::select! {
            _ = heartbeat => {}
            _ = process => {}
            _ = log_shipping => {}
        }
        Ok(())
    }

    async fn log_shipping_loop(&self) {
        loop {
            tokio::time::sleep(self.logging_interval).await;
            if let Err(e) = self.log_shipper.flush(now_epoch_ms() / 1000).await {
                tracing::warn!(error = %e, "log shipping flush failed, will retry with accumulated buffer");
            }
        }
    }

    async fn heartbeat_loop(&self) {
        loop {
            if let Err(e) = self.send_heartbeat().await {
                tracing::warn!(error = %e, "heartbeat to dispatcher failed, retrying next tick");
            }
            tokio::time::sleep(self.heartbeat_interval).await;
        }
    }

    async fn send_heartbeat(&self) -> Result<(), DaemonError> {
        let (program_state, queue_size, no_hb_task, error) = {
            let runtime = self.runtime.lock().await;
            (runtime.program_state, runtime.queue_size() as u32, runtime.no_hb_task(), runtime.last_error.clone())
        };
        let args = error.map(|e| ErrorArgs { exc: e.exc, trace: e.trace });
        let hb = HeartBeat::worker(
            now_epoch_ms(),
            &self.self_id,
            "running",
            program_state_str(program_state),
            queue_size,
            None,
            no_hb_task,
            args,
        );
        let reply = send_request(&self.dispatcher_addr, &Packet::HeartBeat(hb)).await?;
        self.handle_reply(reply).await;
        Ok(())
    }

    async fn handle_reply(&self, packet: Packet) {
        match packet {
            Packet::HeartBeat(_) => {}
            Packet::Command(cmd) => self.handle_command(cmd).await,
        }
    }

    async fn handle_command(&self, cmd: Command) {
        match cmd.command {
            cf_wire::CommandKind::Task => {
                if let Some(task) = cmd.task {
                    self.runtime.lock().await.enqueue(TaskId::from_string(task));
                }
            }
            cf_wire::CommandKind::Done => {
                self.runtime.lock().await.clear_staged_flag();
            }
            cf_wire::CommandKind::Stop | cf_wire::CommandKind::Kill => {
                tracing::info!("received shutdown command from dispatcher");
            }
        }
    }

    /// When idle and the queue is non-empty, process the head task and
    /// report completion upstream. Loops continuously; each iteration that
    /// finds nothing to do backs off briefly rather than busy-spinning.
    async fn process_loop(&self) {
        loop {
            let has_work = {
                let runtime = self.runtime.lock().await;
                runtime.is_idle() && runtime.queue_size() > 0
            };
            if !has_work {
                tokio::time::sleep(Duration::from_millis(100)).await;
                continue;
            }

            let outcome = {
                let mut runtime = self.runtime.lock().await;
                runtime.process_next(now_epoch_ms()).await
            };

            let Some(outcome) = outcome else { continue };
            if let Err(e) = self.report_outcome(outcome).await {
                tracing::warn!(error = %e, "reporting task completion failed, will retry on next heartbeat");
            }
        }
    }

    async fn report_outcome(
        &self,
        outcome: Result<cf_engine::TaskOutcome, cf_engine::ErrorInfo>,
    ) -> Result<(), DaemonError> {
        let outcome = match outcome {
            Ok(outcome) => outcome,
            Err(e) => {
                self.log_shipper.append_line(&format!("classify_error: exc={} trace={}", e.exc, e.trace));
                // Classify failures surface as `programState = error` on the
                // next heartbeat; there's nothing to report upstream yet.
                return Ok(());
            }
        };
        self.log_shipper.append_line(&format!("task_done: task={} argmax={}", outcome.task_id, outcome.argmax));
        let cmd = Command::done(
            now_epoch_ms(),
            &self.self_id,
            outcome.task_id.as_str(),
            outcome.argmax,
            outcome.task_start_epoch_ms,
            outcome.time_to_download_ms,
            outcome.run_time_ms,
        );
        let reply = send_request(&self.dispatcher_addr, &Packet::Command(cmd)).await?;
        self.handle_reply(reply).await;
        Ok(())
    }
}
