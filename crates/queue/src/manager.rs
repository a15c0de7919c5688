//! [`QueueManager`]: admission control over the four priority lanes.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use ledgerflow_core::{LaneCapacities, Priority};
use tracing::{debug, warn};

use crate::error::QueueError;
use crate::lane::{IngestionQueue, Lane};

#[derive(Debug)]
struct LaneState {
    lanes: Vec<Lane>,
    /// Pending job id to the lane holding it. Mirrors the lane FIFOs.
    index: HashMap<String, Priority>,
}

impl LaneState {
    fn lane(&mut self, priority: Priority) -> &mut Lane {
        &mut self.lanes[priority.lane_index()]
    }
}

/// Owns the lanes. Each lane's FIFO of pending ids is the single source of
/// truth for occupancy; every mutation happens under one mutex, so admit,
/// dequeue and withdraw are transactional with respect to each other.
#[derive(Debug)]
pub struct QueueManager {
    state: Mutex<LaneState>,
}

impl QueueManager {
    pub fn new(capacities: LaneCapacities) -> Self {
        let lanes = Priority::ALL
            .iter()
            .map(|p| Lane::new(*p, capacities.for_priority(*p)))
            .collect();
        Self {
            state: Mutex::new(LaneState {
                lanes,
                index: HashMap::new(),
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, LaneState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Admit a PENDING job into the lane for `priority`.
    ///
    /// Fails closed: a lane at capacity rejects the job and the caller must
    /// retry later or escalate priority.
    pub fn admit(&self, job_id: &str, priority: Priority) -> Result<(), QueueError> {
        let mut state = self.state();
        if let Some(lane) = state.index.get(job_id) {
            return Err(QueueError::AlreadyQueued {
                job_id: job_id.to_string(),
                lane: *lane,
            });
        }

        let lane = state.lane(priority);
        if lane.is_full() {
            lane.rejected_total += 1;
            warn!(
                job_id = %job_id,
                lane = %priority,
                capacity = lane.capacity,
                "admission rejected: queue full"
            );
            return Err(QueueError::Full {
                lane: priority,
                capacity: lane.capacity,
            });
        }

        lane.pending.push_back(job_id.to_string());
        lane.admitted_total += 1;
        let occupancy = lane.pending.len();
        state.index.insert(job_id.to_string(), priority);
        debug!(job_id = %job_id, lane = %priority, occupancy, "job admitted");
        Ok(())
    }

    /// Pop the oldest admitted job of the lane.
    pub fn next_eligible(&self, priority: Priority) -> Option<String> {
        let mut state = self.state();
        let job_id = state.lane(priority).pending.pop_front()?;
        state.index.remove(&job_id);
        Some(job_id)
    }

    /// Return a popped job to the head of its lane, keeping its turn.
    ///
    /// Used when a job could not be started this tick. Capacity is not
    /// re-checked: the job held this slot a moment ago.
    pub fn requeue_front(&self, priority: Priority, job_id: &str) {
        let mut state = self.state();
        if state.index.contains_key(job_id) {
            return;
        }
        state.lane(priority).pending.push_front(job_id.to_string());
        state.index.insert(job_id.to_string(), priority);
    }

    /// Withdraw a pending job from whichever lane holds it.
    pub fn remove(&self, job_id: &str) -> Option<Priority> {
        let mut state = self.state();
        let priority = state.index.remove(job_id)?;
        let lane = state.lane(priority);
        if let Some(pos) = lane.pending.iter().position(|id| id == job_id) {
            lane.pending.remove(pos);
        }
        Some(priority)
    }

    /// Lane currently holding `job_id`, if it is pending.
    pub fn lane_of(&self, job_id: &str) -> Option<Priority> {
        self.state().index.get(job_id).copied()
    }

    /// Drop ids whose job is no longer PENDING and return occupancy per lane
    /// in lane order.
    pub fn recompute_occupancy(&self, is_pending: impl Fn(&str) -> bool) -> [usize; 4] {
        let mut state = self.state();
        let LaneState { lanes, index } = &mut *state;
        let mut occupancy = [0usize; 4];
        for lane in lanes.iter_mut() {
            let before = lane.pending.len();
            lane.pending.retain(|id| {
                let keep = is_pending(id);
                if !keep {
                    index.remove(id);
                }
                keep
            });
            if lane.pending.len() != before {
                debug!(
                    lane = %lane.priority,
                    dropped = before - lane.pending.len(),
                    "stale entries dropped from lane"
                );
            }
            occupancy[lane.priority.lane_index()] = lane.pending.len();
        }
        occupancy
    }

    /// Park a job in the dead-letter lane companion of `priority`.
    pub fn dead_letter(&self, priority: Priority, job_id: &str) {
        let mut state = self.state();
        let lane = state.lane(priority);
        if !lane.dead_letter.iter().any(|id| id == job_id) {
            lane.dead_letter.push_back(job_id.to_string());
            warn!(job_id = %job_id, lane = %priority, "job moved to dead-letter lane");
        }
    }

    pub fn dead_letters(&self, priority: Priority) -> Vec<String> {
        self.state().lanes[priority.lane_index()]
            .dead_letter
            .iter()
            .cloned()
            .collect()
    }

    pub fn is_dead_lettered(&self, job_id: &str) -> bool {
        self.state()
            .lanes
            .iter()
            .any(|l| l.dead_letter.iter().any(|id| id == job_id))
    }

    /// Forget a job everywhere (pending and dead-letter), e.g. when purged.
    pub fn forget(&self, job_id: &str) {
        let mut state = self.state();
        if let Some(priority) = state.index.remove(job_id) {
            state.lane(priority).pending.retain(|id| id != job_id);
        }
        for lane in state.lanes.iter_mut() {
            lane.dead_letter.retain(|id| id != job_id);
        }
    }

    pub fn occupancy(&self, priority: Priority) -> usize {
        self.state().lanes[priority.lane_index()].pending.len()
    }

    pub fn snapshot(&self, priority: Priority) -> IngestionQueue {
        self.state().lanes[priority.lane_index()].snapshot()
    }

    /// Look a lane up by id (`critical`, `high`, `medium`, `low`).
    pub fn queue(&self, id: &str) -> Result<IngestionQueue, QueueError> {
        Priority::from_lane_id(id)
            .map(|p| self.snapshot(p))
            .ok_or_else(|| QueueError::NotFound(id.to_string()))
    }

    /// All lanes in strict priority order.
    pub fn snapshots(&self) -> Vec<IngestionQueue> {
        self.state().lanes.iter().map(Lane::snapshot).collect()
    }
}
