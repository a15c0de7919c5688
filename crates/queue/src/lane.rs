//! A single priority lane and its public snapshot.

use std::collections::VecDeque;
use std::fmt;

use ledgerflow_core::Priority;
use serde::Serialize;

/// Read-only view of one lane.
#[derive(Debug, Clone, Serialize)]
pub struct IngestionQueue {
    pub id: String,
    pub priority: Priority,
    pub capacity: usize,
    /// PENDING jobs currently assigned to the lane.
    pub occupancy: usize,
    /// Pending job ids, oldest first.
    pub pending: Vec<String>,
    /// Jobs that exhausted their retries.
    pub dead_letter: Vec<String>,
    pub admitted_total: u64,
    pub rejected_total: u64,
}

impl IngestionQueue {
    /// Occupancy as a fraction of capacity (0.0 - 1.0).
    pub fn utilization(&self) -> f64 {
        if self.capacity == 0 {
            0.0
        } else {
            self.occupancy as f64 / self.capacity as f64
        }
    }
}

impl fmt::Display for IngestionQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "IngestionQueue {{ id: {}, occupancy: {}/{}, dead_letter: {} }}",
            self.id,
            self.occupancy,
            self.capacity,
            self.dead_letter.len()
        )
    }
}

#[derive(Debug)]
pub(crate) struct Lane {
    pub(crate) priority: Priority,
    pub(crate) capacity: usize,
    pub(crate) pending: VecDeque<String>,
    pub(crate) dead_letter: VecDeque<String>,
    pub(crate) admitted_total: u64,
    pub(crate) rejected_total: u64,
}

impl Lane {
    pub(crate) fn new(priority: Priority, capacity: usize) -> Self {
        Self {
            priority,
            capacity,
            pending: VecDeque::new(),
            dead_letter: VecDeque::new(),
            admitted_total: 0,
            rejected_total: 0,
        }
    }

    pub(crate) fn is_full(&self) -> bool {
        self.pending.len() >= self.capacity
    }

    pub(crate) fn snapshot(&self) -> IngestionQueue {
        IngestionQueue {
            id: self.priority.lane_id().to_string(),
            priority: self.priority,
            capacity: self.capacity,
            occupancy: self.pending.len(),
            pending: self.pending.iter().cloned().collect(),
            dead_letter: self.dead_letter.iter().cloned().collect(),
            admitted_total: self.admitted_total,
            rejected_total: self.rejected_total,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_queue_display() {
        let mut lane = Lane::new(Priority::High, 5);
        lane.pending.push_back("job-1".into());
        let display = format!("{}", lane.snapshot());
        assert!(display.contains("high"));
        assert!(display.contains("1/5"));
    }

    #[test]
    fn utilization_ratio() {
        let mut lane = Lane::new(Priority::Low, 4);
        lane.pending.push_back("a".into());
        assert!((lane.snapshot().utilization() - 0.25).abs() < f64::EPSILON);
    }
}
