// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The dispatcher: task pool, per-worker assignment and processing queues,
//! least-loaded distribution, and work stealing. Everything here is
//! touched only from the dispatcher's own loop, so there are no locks —
//! the same single-owner discipline the fleet controller uses for its
//! instance table.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use cf_core::{InstanceId, Task, TaskId, TaskState};
use cf_storage::ObjectStore;

use std::time::Instant;

/// What the dispatcher hands back to a worker, piggy-backed on a heartbeat
/// reply or a `done` acknowledgment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatcherReply {
    /// Nothing to do; the worker's next heartbeat will ask again.
    Ack,
    /// A newly staged task, now sitting in the worker's `processing` slot.
    Task(TaskId),
}

struct WorkerQueues {
    assigned: VecDeque<TaskId>,
    processing: Option<TaskId>,
}

impl WorkerQueues {
    fn empty() -> Self {
        Self { assigned: VecDeque::new(), processing: None }
    }

    fn load(&self) -> usize {
        self.assigned.len() + self.processing.is_some() as usize
    }
}

pub struct Dispatcher<S> {
    store: Arc<S>,
    files_bucket: String,
    tasks: HashMap<TaskId, Task>,
    waiting: VecDeque<TaskId>,
    workers: HashMap<InstanceId, WorkerQueues>,
}

impl<S: ObjectStore> Dispatcher<S> {
    pub fn new(store: Arc<S>, files_bucket: impl Into<String>) -> Self {
        Self {
            store,
            files_bucket: files_bucket.into(),
            tasks: HashMap::new(),
            waiting: VecDeque::new(),
            workers: HashMap::new(),
        }
    }

    /// Upload the payload, mint a task id from it, and enqueue. Returns the
    /// task id, which doubles as the object storage key.
    pub async fn submit_task(&mut self, payload: &[u8]) -> Result<TaskId, cf_storage::StorageError> {
        let id = TaskId::new();
        self.store.upload_bytes(&self.files_bucket, id.as_str(), payload).await?;
        self.tasks.insert(id.clone(), Task::new(id.clone(), Instant::now()));
        self.waiting.push_back(id.clone());
        Ok(id)
    }

    pub fn tasks_waiting(&self) -> u32 {
        (self.waiting.len() + self.workers.values().map(|w| w.assigned.len()).sum::<usize>()) as u32
    }

    pub fn tasks_running(&self) -> u32 {
        self.workers.values().filter(|w| w.processing.is_some()).count() as u32
    }

    pub fn worker_allocation(&self) -> HashMap<InstanceId, u32> {
        self.workers.iter().map(|(id, q)| (id.clone(), q.load() as u32)).collect()
    }

    /// Least-loaded distribution: while there's waiting work and any known
    /// worker, hand the head of the queue to whichever worker currently has
    /// the fewest assigned tasks.
    pub fn distribute(&mut self) {
        while !self.waiting.is_empty() && !self.workers.is_empty() {
            let Some(task_id) = self.waiting.pop_front() else { break };
            let target = self
                .workers
                .iter()
                .min_by_key(|(id, q)| (q.assigned.len(), id.as_str().to_string()))
                .map(|(id, _)| id.clone());
            let Some(target) = target else {
                self.waiting.push_front(task_id);
                break;
            };
            if let Some(task) = self.tasks.get_mut(&task_id) {
                task.state = TaskState::Assigned(target.clone());
            }
            if let Some(q) = self.workers.get_mut(&target) {
                q.assigned.push_back(task_id);
            }
        }
    }

    /// A worker heartbeat with nothing staged is an opportunity to hand it
    /// its next assigned task.
    pub fn on_worker_heartbeat(&mut self, worker: &InstanceId) -> DispatcherReply {
        let Some(queues) = self.workers.get_mut(worker) else { return DispatcherReply::Ack };
        if queues.processing.is_some() {
            return DispatcherReply::Ack;
        }
        match queues.assigned.pop_front() {
            Some(task_id) => {
                queues.processing = Some(task_id.clone());
                if let Some(task) = self.tasks.get_mut(&task_id) {
                    task.state = TaskState::Processing(worker.clone());
                }
                DispatcherReply::Task(task_id)
            }
            None => DispatcherReply::Ack,
        }
    }

    /// A worker reported completion of its current task. Clears the
    /// processing slot, then either stages the worker's next assigned task
    /// or tries to steal one from the busiest peer.
    pub fn on_worker_done(&mut self, worker: &InstanceId, task_id: &TaskId) -> DispatcherReply {
        if let Some(queues) = self.workers.get_mut(worker) {
            if queues.processing.as_ref() == Some(task_id) {
                queues.processing = None;
            }
        }
        self.tasks.remove(task_id);

        let Some(queues) = self.workers.get_mut(worker) else { return DispatcherReply::Ack };
        if let Some(next) = queues.assigned.pop_front() {
            queues.processing = Some(next.clone());
            if let Some(task) = self.tasks.get_mut(&next) {
                task.state = TaskState::Processing(worker.clone());
            }
            return DispatcherReply::Task(next);
        }

        self.try_steal(worker)
    }

    /// Steal one task from the tail of the most-loaded peer's assigned
    /// queue, straight into the idle worker's processing slot. Only fires
    /// if the victim has at least two assigned tasks, so it never leaves
    /// the victim idle immediately after.
    fn try_steal(&mut self, idle_worker: &InstanceId) -> DispatcherReply {
        let victim = self
            .workers
            .iter()
            .filter(|(id, _)| *id != idle_worker)
            .max_by_key(|(id, q)| (q.assigned.len(), id.as_str().to_string()))
            .map(|(id, _)| id.clone());

        let Some(victim) = victim else { return DispatcherReply::Ack };
        let victim_len = self.workers.get(&victim).map_or(0, |q| q.assigned.len());
        if victim_len < 2 {
            return DispatcherReply::Ack;
        }

        let stolen = self.workers.get_mut(&victim).and_then(|q| q.assigned.pop_back());
        let Some(stolen) = stolen else { return DispatcherReply::Ack };

        if let Some(task) = self.tasks.get_mut(&stolen) {
            task.state = TaskState::Processing(idle_worker.clone());
        }
        if let Some(queues) = self.workers.get_mut(idle_worker) {
            queues.processing = Some(stolen.clone());
        }
        DispatcherReply::Task(stolen)
    }

    /// Reconcile the local worker set against the FC's authoritative
    /// roster: reclaim tasks from departed workers, register new ones.
    pub fn reconcile_roster(&mut self, workers_running: &[InstanceId], workers_pending: &[InstanceId]) {
        let live: HashSet<&InstanceId> = workers_running.iter().chain(workers_pending.iter()).collect();

        let departed: Vec<InstanceId> =
            self.workers.keys().filter(|id| !live.contains(id)).cloned().collect();
        for id in departed {
            if let Some(mut queues) = self.workers.remove(&id) {
                if let Some(task_id) = queues.processing.take() {
                    self.reclaim(task_id);
                }
                while let Some(task_id) = queues.assigned.pop_front() {
                    self.reclaim(task_id);
                }
            }
        }

        for id in live {
            self.workers.entry(id.clone()).or_insert_with(WorkerQueues::empty);
        }
    }

    fn reclaim(&mut self, task_id: TaskId) {
        if let Some(task) = self.tasks.get_mut(&task_id) {
            task.state = TaskState::Waiting;
        }
        self.waiting.push_back(task_id);
    }

    #[cfg(any(test, feature = "test-support"))]
    pub fn assigned_len(&self, worker: &InstanceId) -> usize {
        self.workers.get(worker).map_or(0, |q| q.assigned.len())
    }

    #[cfg(any(test, feature = "test-support"))]
    pub fn processing(&self, worker: &InstanceId) -> Option<TaskId> {
        self.workers.get(worker).and_then(|q| q.processing.clone())
    }

    #[cfg(any(test, feature = "test-support"))]
    pub fn waiting_len(&self) -> usize {
        self.waiting.len()
    }

    #[cfg(any(test, feature = "test-support"))]
    pub fn known_task_count(&self) -> usize {
        self.tasks.len()
    }

    /// Force a task straight onto a worker's assigned queue, bypassing
    /// `distribute`'s least-loaded policy. Used to set up an exact
    /// imbalance for work-stealing tests.
    #[cfg(any(test, feature = "test-support"))]
    pub fn force_assign(&mut self, worker: &InstanceId, task_id: TaskId) {
        if let Some(task) = self.tasks.get_mut(&task_id) {
            task.state = TaskState::Assigned(worker.clone());
        }
        self.workers.entry(worker.clone()).or_insert_with(WorkerQueues::empty).assigned.push_back(task_id);
    }
}

#[cfg(test)]
#[path = "dispatcher_tests.rs"]
mod tests;
