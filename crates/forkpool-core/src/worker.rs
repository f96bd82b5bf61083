//! Worker statistics.

use serde::{Deserialize, Serialize};

/// Cumulative per-worker counters, incremented as lifecycle messages arrive.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerStat {
    pub started: u64,
    pub finished: u64,
    pub errored: u64,
    pub fatal: u64,
}

impl WorkerStat {
    /// Number of tasks that reached a terminal state on this worker.
    pub fn completed(&self) -> u64 {
        self.finished + self.errored + self.fatal
    }
}

impl std::ops::Add for WorkerStat {
    type Output = WorkerStat;

    fn add(self, other: WorkerStat) -> WorkerStat {
        WorkerStat {
            started: self.started + other.started,
            finished: self.finished + other.finished,
            errored: self.errored + other.errored,
            fatal: self.fatal + other.fatal,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stat_sum() {
        let a = WorkerStat {
            started: 2,
            finished: 1,
            errored: 1,
            fatal: 0,
        };
        let b = WorkerStat {
            started: 1,
            finished: 0,
            errored: 0,
            fatal: 1,
        };
        let total = a + b;
        assert_eq!(total.started, 3);
        assert_eq!(total.completed(), 3);
    }
}
