// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The worker: an inbound task FIFO, a classify-and-report processing
//! loop, and heartbeat emission. At-most-one task in flight per worker is
//! a correctness invariant enforced by never popping a new task before the
//! previous `done` is sent.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Instant;

use cf_core::{ProgramState, TaskId};
use cf_storage::ObjectStore;

use crate::classifier::{argmax, Classifier};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorInfo {
    pub exc: String,
    pub trace: String,
}

/// Result of completing a task, ready to be wrapped in a `done` command by
/// the transport layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskOutcome {
    pub task_id: TaskId,
    pub argmax: usize,
    pub task_start_epoch_ms: u64,
    pub time_to_download_ms: u64,
    pub run_time_ms: u64,
}

pub struct WorkerRuntime<S, C> {
    store: Arc<S>,
    files_bucket: String,
    classifier: C,
    queue: VecDeque<TaskId>,
    current: Option<TaskId>,
    pub program_state: ProgramState,
    pub last_error: Option<ErrorInfo>,
    /// Set after staging a task so the worker's own next heartbeat signals
    /// `no_hb_task=true` and doesn't ask the dispatcher for another one.
    has_staged_task: bool,
}

impl<S: ObjectStore, C: Classifier> WorkerRuntime<S, C> {
    pub fn new(store: Arc<S>, files_bucket: impl Into<String>, classifier: C) -> Self {
        Self {
            store,
            files_bucket: files_bucket.into(),
            classifier,
            queue: VecDeque::new(),
            current: None,
            program_state: ProgramState::Pending,
            last_error: None,
            has_staged_task: false,
        }
    }

    pub fn enqueue(&mut self, task_id: TaskId) {
        self.queue.push_back(task_id);
        self.has_staged_task = true;
    }

    pub fn clear_staged_flag(&mut self) {
        self.has_staged_task = false;
    }

    pub fn no_hb_task(&self) -> bool {
        self.has_staged_task || self.current.is_some()
    }

    pub fn queue_size(&self) -> usize {
        self.queue.len()
    }

    pub fn is_idle(&self) -> bool {
        self.current.is_none()
    }

    /// Pop the head of the queue and run it to completion: download,
    /// classify, and return the outcome the caller reports upstream. Never
    /// called again for a new task before the caller has sent the previous
    /// `done` — enforced by `current` staying `Some` across the await.
    pub async fn process_next(&mut self, now_epoch_ms: u64) -> Option<Result<TaskOutcome, ErrorInfo>> {
        if self.current.is_some() {
            return None;
        }
        let task_id = self.queue.pop_front()?;
        self.current = Some(task_id.clone());
        self.program_state = ProgramState::Running;
        self.has_staged_task = false;

        let download_start = Instant::now();
        let download_result = self.store.download_bytes(&self.files_bucket, task_id.as_str()).await;
        let time_to_download_ms = download_start.elapsed().as_millis() as u64;

        let outcome = match download_result {
            Ok(bytes) => {
                let text = String::from_utf8_lossy(&bytes).into_owned();
                let run_start = Instant::now();
                let scores = self.classifier.classify(&text);
                let run_time_ms = run_start.elapsed().as_millis() as u64;
                Ok(TaskOutcome {
                    task_id: task_id.clone(),
                    argmax: argmax(&scores),
                    task_start_epoch_ms: now_epoch_ms,
                    time_to_download_ms,
                    run_time_ms,
                })
            }
            Err(e) => Err(ErrorInfo { exc: "download_failed".to_string(), trace: e.to_string() }),
        };

        match &outcome {
            Ok(_) => {
                self.program_state = ProgramState::Pending;
                self.last_error = None;
            }
            Err(info) => {
                self.program_state = ProgramState::Error;
                self.last_error = Some(info.clone());
            }
        }
        self.current = None;
        Some(outcome)
    }
}
