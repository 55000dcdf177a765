// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Offline task source: a CSV of `(time, input)` rows replayed against a
//! virtual clock, used in place of a live upload channel for benchmarking
//! and for the end-to-end scenarios in the test suite.

use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Clone, Deserialize)]
pub struct BenchmarkRow {
    #[serde(rename = "Time")]
    pub time: u64,
    #[serde(rename = "Input")]
    pub input: String,
}

#[derive(Debug, thiserror::Error)]
pub enum BenchmarkError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),
}

/// Rows sorted by `time`, ready to be drained second-by-second against a
/// virtual clock starting at 0.
pub struct BenchmarkReplay {
    rows: Vec<BenchmarkRow>,
    next: usize,
}

impl BenchmarkReplay {
    pub fn from_path(path: &Path) -> Result<Self, BenchmarkError> {
        let mut reader = csv::Reader::from_path(path)?;
        let mut rows: Vec<BenchmarkRow> =
            reader.deserialize().collect::<Result<Vec<_>, csv::Error>>()?;
        rows.sort_by_key(|r| r.time);
        Ok(Self { rows, next: 0 })
    }

    pub fn from_rows(mut rows: Vec<BenchmarkRow>) -> Self {
        rows.sort_by_key(|r| r.time);
        Self { rows, next: 0 }
    }

    /// Every row whose `time` equals `clock`, consuming them from the
    /// replay. The caller advances `clock` by one per second of wall time
    /// and calls this each tick.
    pub fn due_at(&mut self, clock: u64) -> Vec<BenchmarkRow> {
        let mut due = Vec::new();
        while self.next < self.rows.len() && self.rows[self.next].time == clock {
            due.push(self.rows[self.next].clone());
            self.next += 1;
        }
        due
    }

    pub fn is_exhausted(&self) -> bool {
        self.next >= self.rows.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(time: u64, input: &str) -> BenchmarkRow {
        BenchmarkRow { time, input: input.to_string() }
    }

    #[test]
    fn rows_are_sorted_by_time_regardless_of_input_order() {
        let mut replay = BenchmarkReplay::from_rows(vec![row(3, "c"), row(1, "a"), row(2, "b")]);
        assert_eq!(replay.due_at(1).len(), 1);
        assert_eq!(replay.due_at(2).len(), 1);
        assert_eq!(replay.due_at(3).len(), 1);
        assert!(replay.is_exhausted());
    }

    #[test]
    fn multiple_rows_can_share_a_timestamp() {
        let mut replay = BenchmarkReplay::from_rows(vec![row(0, "a"), row(0, "b")]);
        assert_eq!(replay.due_at(0).len(), 2);
        assert!(replay.is_exhausted());
    }

    #[test]
    fn ticks_with_nothing_due_return_empty() {
        let mut replay = BenchmarkReplay::from_rows(vec![row(5, "a")]);
        assert!(replay.due_at(0).is_empty());
        assert!(!replay.is_exhausted());
        assert_eq!(replay.due_at(5).len(), 1);
    }
}
