// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Dispatcher daemon: inbound task/heartbeat socket for workers, an
//! upward heartbeat client to the fleet controller, and the benchmark
//! replay source. The engine's `Dispatcher` is single-owner by design, so
//! every connection handler and the replay loop serialize through one
//! `tokio::sync::Mutex` rather than touching it directly.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;

use cf_core::InstanceId;
use cf_engine::{BenchmarkReplay, Dispatcher, DispatcherReply};
use cf_storage::{LogShipper, ObjectStore};
use cf_wire::{read_packet, write_packet, Command, CommandKind, HeartBeat, InstanceType, Packet, ProtocolError};

use crate::transport::{send_request, TransportError};

#[derive(Debug, thiserror::Error)]
pub enum DaemonError {
    #[error("storage error: {0}")]
    Storage(#[from] cf_storage::StorageError),
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("upward heartbeat failed: {0}")]
    Transport(#[from] TransportError),
    #[error("received a packet with no handler")]
    Unhandled,
}

fn now_epoch_ms() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_millis() as u64
}

/// An ack just echoes the heartbeat that prompted it back; a `Task` reply
/// piggy-backs the new assignment as a `task` command.
fn reply_to_heartbeat(hb: &HeartBeat, reply: DispatcherReply) -> Packet {
    match reply {
        DispatcherReply::Ack => Packet::HeartBeat(HeartBeat::echo(hb)),
        DispatcherReply::Task(id) => Packet::Command(Command::task(hb.time, id.as_str())),
    }
}

/// A worker's `done` report is acknowledged the same way a heartbeat is:
/// echo to clear `noHbTask`, or the next staged task.
fn reply_to_done(time: u64, reply: DispatcherReply) -> Packet {
    match reply {
        DispatcherReply::Ack => Packet::Command(Command { time, command: CommandKind::Done, task: None, argmax: None, instance_id: None, task_start: None, time_to_download: None, run_time_task: None }),
        DispatcherReply::Task(id) => Packet::Command(Command::task(time, id.as_str())),
    }
}

pub struct DispatcherDaemon<S> {
    dispatcher: Mutex<Dispatcher<S>>,
    log_shipper: LogShipper<S>,
    self_id: InstanceId,
    bind_addr: SocketAddr,
    fc_addr: String,
    heartbeat_interval: Duration,
    logging_interval: Duration,
}

impl<S: ObjectStore + Send + Sync + 'static> DispatcherDaemon<S> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<S>,
        files_bucket: impl Into<String>,
        logging_bucket: impl Into<String>,
        self_id: InstanceId,
        bind_addr: SocketAddr,
        fc_addr: impl Into<String>,
        heartbeat_interval: Duration,
        logging_interval: Duration,
    ) -> Self {
        let log_shipper = LogShipper::new(Arc::clone(&store), logging_bucket, self_id.as_str());
        Self {
            dispatcher: Mutex::new(Dispatcher::new(store, files_bucket)),
            log_shipper,
            self_id,
            bind_addr,
            fc_addr: fc_addr.into(),
            heartbeat_interval,
            logging_interval,
        }
    }

    pub async fn submit_task(&self, payload: &[u8]) -> Result<cf_core::TaskId, cf_storage::StorageError> {
        let mut d = self.dispatcher.lock().await;
        let id = d.submit_task(payload).await?;
        d.distribute();
        self.log_shipper.append_line(&format!("task_submitted: task={id}"));
        Ok(id)
    }

    /// Feed the benchmark CSV in, one second of virtual clock at a time,
    /// as an alternative to external `SubmitTask` calls.
    pub async fn run_benchmark_replay(&self, mut replay: BenchmarkReplay) -> Result<(), DaemonError> {
        let mut clock: u64 = 0;
        loop {
            for row in replay.due_at(clock) {
                self.submit_task(row.input.as_bytes()).await?;
            }
            if replay.is_exhausted() {
                return Ok(());
            }
            tokio::time::sleep(Duration::from_secs(1)).await;
            clock += 1;
        }
    }

    pub async fn run(self: Arc<Self>) -> Result<(), DaemonError> {
        let listener = TcpListener::bind(self.bind_addr).await?;
        tracing::info!(addr = %self.bind_addr, "dispatcher listening");
        let accept_handle = {
            let this = Arc::clone(&self);
            tokio::spawn(async move { this.accept_loop(listener).await })
        };
        let heartbeat_handle = {
            let this = Arc::clone(&self);
            tokio::spawn(async move { this.heartbeat_loop().await })
        };
        let log_shipping_handle = {
            let this = Arc::clone(&self);
            tokio::spawn(async move { this.log_shipping_loop().await })
        };
        tokio::select! {
            _ = accept_handle => {}
            _ = heartbeat_handle => {}
            _ = log_shipping_handle => {}
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

    async fn accept_loop(self: Arc<Self>, listener: TcpListener) {
        loop {
            match listener.accept().await {
                Ok((stream, peer)) => {
                    let this = Arc::clone(&self);
                    tokio::spawn(async move {
                        if let Err(e) = this.handle_connection(stream).await {
                            tracing::warn!(peer = %peer, error = %e, "worker connection error");
                        }
                    });
                }
                Err(e) => tracing::error!(error = %e, "accept error"),
            }
        }
    }

    async fn handle_connection(&self, mut stream: TcpStream) -> Result<(), DaemonError> {
        let packet = read_packet(&mut stream).await?;
        let reply = match packet {
            Packet::HeartBeat(hb) if hb.instance_type == InstanceType::Worker => {
                let worker = InstanceId::from_string(&hb.instance_id);
                let reply = self.dispatcher.lock().await.on_worker_heartbeat(&worker);
                reply_to_heartbeat(&hb, reply)
            }
            Packet::Command(cmd) if cmd.command == CommandKind::Done => {
                let worker = InstanceId::from_string(cmd.instance_id.as_deref().unwrap_or_default());
                let task_id = cf_core::TaskId::from_string(cmd.task.as_deref().unwrap_or_default());
                let reply = self.dispatcher.lock().await.on_worker_done(&worker, &task_id);
                self.log_shipper.append_line(&format!(
                    "task_finished: worker={worker} task={task_id} argmax={:?}",
                    cmd.argmax
                ));
                reply_to_done(cmd.time, reply)
            }
            _ => return Err(DaemonError::Unhandled),
        };
        write_packet(&mut stream, &reply).await?;
        Ok(())
    }

    async fn heartbeat_loop(&self) {
        loop {
            if let Err(e) = self.send_heartbeat().await {
                tracing::warn!(error = %e, "upward heartbeat to fleet controller failed");
            }
            tokio::time::sleep(self.heartbeat_interval).await;
        }
    }

    async fn send_heartbeat(&self) -> Result<(), DaemonError> {
        let (tasks_waiting, tasks_running, allocation) = {
            let d = self.dispatcher.lock().await;
            (d.tasks_waiting(), d.tasks_running(), d.worker_allocation())
        };
        let allocation_by_string = allocation.into_iter().map(|(k, v)| (k.to_string(), v)).collect();
        let hb = HeartBeat::dispatcher(now_epoch_ms(), self.self_id.as_str(), "running", tasks_waiting, tasks_running, allocation_by_string);
        let reply = send_request(&self.fc_addr, &Packet::HeartBeat(hb)).await?;
        let mut d = self.dispatcher.lock().await;
        if let Packet::HeartBeat(reply) = reply {
            let running: Vec<InstanceId> = reply.workers_running.unwrap_or_default().into_iter().map(InstanceId::from_string).collect();
            let pending: Vec<InstanceId> = reply.workers_pending.unwrap_or_default().into_iter().map(InstanceId::from_string).collect();
            d.reconcile_roster(&running, &pending);
        }
        // The heartbeat loop is this daemon's only recurring tick; re-drain
        // `waiting` here too so reclaimed or still-unassigned tasks reach an
        // idle worker without needing a fresh `SubmitTask`.
        d.distribute();
        Ok(())
    }
}
