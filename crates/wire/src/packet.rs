// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Wire packet types.
//!
//! Every message on the wire is a single UTF-8 JSON object tagged by
//! `packet_type`. A [`HeartBeat`] carries role-specific fields as optional
//! keys (only the sender's role populates them) rather than a nested
//! variant, matching the flat dict the original control plane put on the
//! wire. A [`Command`] carries per-kind payload the same way.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Top-level wire envelope, discriminated by `packet_type`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "packet_type")]
pub enum Packet {
    HeartBeat(HeartBeat),
    Command(Command),
}

/// Role of the sending (or, for `instance_manager`, replying) process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstanceType {
    Dispatcher,
    Worker,
    InstanceManager,
}

cf_core::simple_display! {
    InstanceType {
        Dispatcher => "dispatcher",
        Worker => "worker",
        InstanceManager => "instance_manager",
    }
}

/// Error diagnostics attached to a worker heartbeat after an uncaught
/// exception during classification (§7, *Worker exception during classify*).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ErrorArgs {
    pub exc: String,
    pub trace: String,
}

/// A periodic status message. Role-specific fields are `None` unless the
/// sender's role populates them; see module docs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HeartBeat {
    pub time: u64,
    pub instance_id: String,
    pub instance_type: InstanceType,
    pub instance_state: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub program_state: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpu_usage: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mem_usage: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub queue_size: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_task_start: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub no_hb_task: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub args: Option<ErrorArgs>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tasks_waiting: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tasks_running: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub worker_allocation: Option<HashMap<String, u32>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workers_running: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workers_pending: Option<Vec<String>>,
}

impl HeartBeat {
    pub fn worker(
        time: u64,
        instance_id: impl Into<String>,
        instance_state: impl Into<String>,
        program_state: impl Into<String>,
        queue_size: u32,
        current_task_start: Option<u64>,
        no_hb_task: bool,
        args: Option<ErrorArgs>,
    ) -> Self {
        Self {
            time,
            instance_id: instance_id.into(),
            instance_type: InstanceType::Worker,
            instance_state: instance_state.into(),
            program_state: Some(program_state.into()),
            cpu_usage: None,
            mem_usage: None,
            queue_size: Some(queue_size),
            current_task_start,
            no_hb_task: Some(no_hb_task),
            args,
            tasks_waiting: None,
            tasks_running: None,
            worker_allocation: None,
            workers_running: None,
            workers_pending: None,
        }
    }

    pub fn dispatcher(
        time: u64,
        instance_id: impl Into<String>,
        instance_state: impl Into<String>,
        tasks_waiting: u32,
        tasks_running: u32,
        worker_allocation: HashMap<String, u32>,
    ) -> Self {
        Self {
            time,
            instance_id: instance_id.into(),
            instance_type: InstanceType::Dispatcher,
            instance_state: instance_state.into(),
            program_state: None,
            cpu_usage: None,
            mem_usage: None,
            queue_size: None,
            current_task_start: None,
            no_hb_task: None,
            args: None,
            tasks_waiting: Some(tasks_waiting),
            tasks_running: Some(tasks_running),
            worker_allocation: Some(worker_allocation),
            workers_running: None,
            workers_pending: None,
        }
    }

    /// FC's reply to a dispatcher heartbeat: the authoritative worker roster.
    pub fn controller_reply(
        time: u64,
        workers_running: Vec<String>,
        workers_pending: Vec<String>,
    ) -> Self {
        Self {
            time,
            instance_id: "instance_manager".to_string(),
            instance_type: InstanceType::InstanceManager,
            instance_state: "running".to_string(),
            program_state: None,
            cpu_usage: None,
            mem_usage: None,
            queue_size: None,
            current_task_start: None,
            no_hb_task: None,
            args: None,
            tasks_waiting: None,
            tasks_running: None,
            worker_allocation: None,
            workers_running: Some(workers_running),
            workers_pending: Some(workers_pending),
        }
    }

    /// Plain echo, sent back to any sender the reply isn't meant to carry
    /// control data to (e.g. FC replying to a worker heartbeat).
    pub fn echo(source: &HeartBeat) -> Self {
        source.clone()
    }
}

/// `command` discriminant on a [`Command`] packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandKind {
    Task,
    Done,
    Stop,
    Kill,
}

/// A request/response control message. Payload fields are populated
/// according to `command`; see module docs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Command {
    pub time: u64,
    pub command: CommandKind,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub argmax: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_start: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_to_download: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_time_task: Option<u64>,
}

impl Command {
    pub fn task(time: u64, task: impl Into<String>) -> Self {
        Self {
            time,
            command: CommandKind::Task,
            task: Some(task.into()),
            argmax: None,
            instance_id: None,
            task_start: None,
            time_to_download: None,
            run_time_task: None,
        }
    }

    #[allow(clippy::too_many_arguments)]
    pub fn done(
        time: u64,
        instance_id: impl Into<String>,
        task: impl Into<String>,
        argmax: usize,
        task_start: u64,
        time_to_download: u64,
        run_time_task: u64,
    ) -> Self {
        Self {
            time,
            command: CommandKind::Done,
            task: Some(task.into()),
            argmax: Some(argmax),
            instance_id: Some(instance_id.into()),
            task_start: Some(task_start),
            time_to_download: Some(time_to_download),
            run_time_task: Some(run_time_task),
        }
    }

    pub fn stop(time: u64) -> Self {
        Self {
            time,
            command: CommandKind::Stop,
            task: None,
            argmax: None,
            instance_id: None,
            task_start: None,
            time_to_download: None,
            run_time_task: None,
        }
    }

    pub fn kill(time: u64) -> Self {
        Self {
            time,
            command: CommandKind::Kill,
            task: None,
            argmax: None,
            instance_id: None,
            task_start: None,
            time_to_download: None,
            run_time_task: None,
        }
    }
}

#[cfg(test)]
#[path = "packet_tests.rs"]
mod tests;
