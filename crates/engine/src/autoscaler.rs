// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The hysteretic autoscaler: a sliding window of dispatcher-reported load,
//! decided against two thresholds with pending-action guards to prevent
//! oscillation. Pure data in, pure decision out — the fleet controller
//! owns the only mutable instance of the window and applies the decision.

use cf_core::InstanceId;
use std::collections::{HashMap, VecDeque};

#[derive(Debug, Clone, PartialEq)]
pub enum AutoscalerDecision {
    None,
    Create,
    Kill(InstanceId),
}

/// Sliding window of `meanTotalTasks` samples plus the most recently
/// reported worker allocation, fed by each dispatcher heartbeat.
#[derive(Debug, Clone)]
pub struct AutoscalerWindow {
    window_size: usize,
    mean_total_tasks: VecDeque<f64>,
    worker_allocation: HashMap<InstanceId, u32>,
}

impl AutoscalerWindow {
    pub fn new(window_size: usize) -> Self {
        Self {
            window_size: window_size.max(1),
            mean_total_tasks: VecDeque::new(),
            worker_allocation: HashMap::new(),
        }
    }

    /// Record one dispatcher heartbeat's load figures.
    pub fn observe(&mut self, tasks_waiting: u32, tasks_running: u32, worker_allocation: HashMap<InstanceId, u32>) {
        let num_workers = worker_allocation.len();
        let sample = if num_workers > 0 {
            (tasks_waiting + tasks_running) as f64 / num_workers as f64
        } else {
            0.0
        };
        self.mean_total_tasks.push_back(sample);
        while self.mean_total_tasks.len() > self.window_size {
            self.mean_total_tasks.pop_front();
        }
        self.worker_allocation = worker_allocation;
    }

    pub fn has_observations(&self) -> bool {
        !self.mean_total_tasks.is_empty()
    }

    fn mean(&self) -> f64 {
        self.mean_total_tasks.iter().sum::<f64>() / self.mean_total_tasks.len() as f64
    }

    /// Decide the next action given the controller's current worker count
    /// (which may lag `worker_allocation` by one heartbeat while a prior
    /// create/kill is still in flight) and the pool cap.
    pub fn decide(
        &self,
        current_workers: usize,
        max_workers: usize,
        min_jobs_per_worker: f64,
        max_jobs_per_worker: f64,
    ) -> AutoscalerDecision {
        let Some(&latest) = self.mean_total_tasks.back() else {
            return AutoscalerDecision::None;
        };

        let number_of_workers = self.worker_allocation.len();
        if latest > 0.0 && number_of_workers == 0 {
            return AutoscalerDecision::Create;
        }

        let mean = self.mean();

        if mean < min_jobs_per_worker {
            if latest > 0.0 && number_of_workers == 1 {
                return AutoscalerDecision::None;
            }
            if current_workers < number_of_workers {
                return AutoscalerDecision::None;
            }
            let victim = self.worker_allocation.iter().min_by_key(|(_, count)| **count).map(|(id, _)| id.clone());
            return match victim {
                Some(id) => AutoscalerDecision::Kill(id),
                None => AutoscalerDecision::None,
            };
        }

        if mean > max_jobs_per_worker {
            if current_workers == max_workers {
                return AutoscalerDecision::None;
            }
            if current_workers > number_of_workers {
                return AutoscalerDecision::None;
            }
            return AutoscalerDecision::Create;
        }

        AutoscalerDecision::None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn alloc(pairs: &[(&str, u32)]) -> HashMap<InstanceId, u32> {
        pairs.iter().map(|(id, n)| (InstanceId::from_string(*id), *n)).collect()
    }

    #[test]
    fn no_observations_yields_no_decision() {
        let window = AutoscalerWindow::new(2);
        assert_eq!(window.decide(0, 10, 1.0, 5.0), AutoscalerDecision::None);
    }

    #[test]
    fn work_with_no_workers_always_creates() {
        let mut window = AutoscalerWindow::new(2);
        window.observe(1, 0, HashMap::new());
        assert_eq!(window.decide(0, 10, 1.0, 5.0), AutoscalerDecision::Create);
    }

    #[test]
    fn overload_triggers_create_until_cap_or_mean_drops() {
        let mut window = AutoscalerWindow::new(2);
        window.observe(20, 0, alloc(&[("inst-w1", 0)]));
        assert_eq!(window.decide(1, 10, 1.0, 5.0), AutoscalerDecision::Create);
    }

    #[test]
    fn overload_respects_the_pool_cap() {
        let mut window = AutoscalerWindow::new(2);
        window.observe(20, 0, alloc(&[("inst-w1", 20)]));
        assert_eq!(window.decide(1, 1, 1.0, 5.0), AutoscalerDecision::None);
    }

    #[test]
    fn overload_none_while_a_create_is_already_pending() {
        let mut window = AutoscalerWindow::new(2);
        window.observe(20, 0, alloc(&[("inst-w1", 20)]));
        assert_eq!(window.decide(2, 10, 1.0, 5.0), AutoscalerDecision::None);
    }

    #[test]
    fn underload_kills_the_least_loaded_worker() {
        let mut window = AutoscalerWindow::new(2);
        window.observe(0, 1, alloc(&[("inst-w1", 1), ("inst-w2", 0), ("inst-w3", 0)]));
        let decision = window.decide(3, 10, 1.0, 5.0);
        assert!(matches!(decision, AutoscalerDecision::Kill(_)));
    }

    #[test]
    fn underload_spares_the_sole_worker_with_outstanding_work() {
        let mut window = AutoscalerWindow::new(2);
        window.observe(0, 1, alloc(&[("inst-w1", 1)]));
        assert_eq!(window.decide(1, 10, 1.0, 5.0), AutoscalerDecision::None);
    }

    #[test]
    fn underload_none_while_a_kill_is_already_pending() {
        let mut window = AutoscalerWindow::new(2);
        window.observe(0, 0, alloc(&[("inst-w1", 0), ("inst-w2", 0), ("inst-w3", 0)]));
        assert_eq!(window.decide(2, 10, 1.0, 5.0), AutoscalerDecision::None);
    }

    #[test]
    fn window_drops_oldest_sample_beyond_its_size() {
        let mut window = AutoscalerWindow::new(2);
        window.observe(10, 0, alloc(&[("inst-w1", 10)]));
        window.observe(10, 0, alloc(&[("inst-w1", 10)]));
        window.observe(0, 0, alloc(&[("inst-w1", 0)]));
        assert_eq!(window.mean_total_tasks.len(), 2);
    }

    #[test]
    fn balanced_load_is_a_no_op() {
        let mut window = AutoscalerWindow::new(2);
        window.observe(2, 0, alloc(&[("inst-w1", 1), ("inst-w2", 1)]));
        assert_eq!(window.decide(2, 10, 1.0, 5.0), AutoscalerDecision::None);
    }
}
