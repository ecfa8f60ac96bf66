//! Resource pool model shared by every scheduler process

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

/// Format of task start timestamps, both persisted and printed
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Metadata of the task holding a slot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Occupant {
    /// Login name of the user who launched the task
    pub user: String,
    /// Command line of the task
    pub task: Vec<String>,
    /// PID of the task (also its process group id)
    pub pid: u32,
    /// Local time the task was spawned
    pub started_at: NaiveDateTime,
    /// Device handle given to the task
    pub label: String,
}

/// A single exclusive resource tracked by index
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceSlot {
    /// True iff the slot is unassigned
    pub available: bool,
    /// Task holding the slot, once the launcher has recorded it
    pub occupant: Option<Occupant>,
}

impl ResourceSlot {
    /// An unassigned slot
    pub fn free() -> Self {
        Self {
            available: true,
            occupant: None,
        }
    }

    /// A slot claimed without task metadata
    pub fn reserved() -> Self {
        Self {
            available: false,
            occupant: None,
        }
    }

    /// Claimed by an admission (or marked busy) but no task recorded yet
    pub fn is_reserved(&self) -> bool {
        !self.available && self.occupant.is_none()
    }
}

/// The fixed-size, index-addressed pool of slots
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourcePool {
    slots: Vec<ResourceSlot>,
}

impl ResourcePool {
    /// Create a pool of `size` slots with the `busy` indices marked unavailable.
    /// Busy indices outside the pool are ignored.
    pub fn new(size: usize, busy: &[usize]) -> Self {
        let slots = (0..size)
            .map(|i| {
                if busy.contains(&i) {
                    ResourceSlot::reserved()
                } else {
                    ResourceSlot::free()
                }
            })
            .collect();
        Self { slots }
    }

    pub fn from_slots(slots: Vec<ResourceSlot>) -> Self {
        Self { slots }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn slots(&self) -> &[ResourceSlot] {
        &self.slots
    }

    pub fn get(&self, index: usize) -> Option<&ResourceSlot> {
        self.slots.get(index)
    }

    /// Indices of available slots, in index order
    pub fn free_indices(&self) -> Vec<usize> {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, s)| s.available)
            .map(|(i, _)| i)
            .collect()
    }

    /// The availability bit of every slot
    pub fn availability(&self) -> Vec<bool> {
        self.slots.iter().map(|s| s.available).collect()
    }

    /// Mark slots unavailable without task metadata.
    ///
    /// Returns the number of slots that changed.
    pub fn reserve(&mut self, indices: &[usize]) -> usize {
        self.update(indices, |_| ResourceSlot::reserved())
    }

    /// Record the task occupying the slots; they stay unavailable.
    pub fn occupy(&mut self, indices: &[usize], occupant: &Occupant) -> usize {
        self.update(indices, |_| ResourceSlot {
            available: false,
            occupant: Some(occupant.clone()),
        })
    }

    /// Return slots to the free state and clear their occupant.
    ///
    /// Releasing an already free slot changes nothing.
    pub fn release(&mut self, indices: &[usize]) -> usize {
        self.update(indices, |_| ResourceSlot::free())
    }

    fn update<F>(&mut self, indices: &[usize], f: F) -> usize
    where
        F: Fn(&ResourceSlot) -> ResourceSlot,
    {
        let mut changed = 0;
        for &idx in indices {
            if let Some(slot) = self.slots.get_mut(idx) {
                let next = f(slot);
                if *slot != next {
                    *slot = next;
                    changed += 1;
                }
            }
        }
        changed
    }

    /// Read-only view split into occupied and free slots
    pub fn status(&self) -> PoolStatus {
        let mut status = PoolStatus::default();
        for (index, slot) in self.slots.iter().enumerate() {
            if slot.available {
                status.free.push(index);
            } else {
                status.occupied.push(OccupiedSlot {
                    index,
                    occupant: slot.occupant.clone(),
                });
            }
        }
        status
    }
}

/// An unavailable slot as reported by a status query
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OccupiedSlot {
    pub index: usize,
    pub occupant: Option<Occupant>,
}

/// Status report of the pool
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PoolStatus {
    pub occupied: Vec<OccupiedSlot>,
    pub free: Vec<usize>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn occupant(user: &str, pid: u32) -> Occupant {
        Occupant {
            user: user.to_string(),
            task: vec!["run.sh".to_string()],
            pid,
            started_at: NaiveDate::from_ymd_opt(2024, 5, 1)
                .unwrap()
                .and_hms_opt(12, 30, 0)
                .unwrap(),
            label: "cuda1".to_string(),
        }
    }

    #[test]
    fn test_new_pool_marks_busy() {
        let pool = ResourcePool::new(5, &[3, 4, 9]);
        assert_eq!(pool.len(), 5);
        assert_eq!(pool.free_indices(), vec![0, 1, 2]);
        assert!(pool.get(3).unwrap().is_reserved());
    }

    #[test]
    fn test_reserve_and_release_round_trip() {
        let mut pool = ResourcePool::new(4, &[1]);
        let before = pool.availability();

        assert_eq!(pool.reserve(&[0, 2]), 2);
        assert_eq!(pool.free_indices(), vec![3]);

        assert_eq!(pool.release(&[0, 2]), 2);
        assert_eq!(pool.availability(), before);
    }

    #[test]
    fn test_release_is_idempotent() {
        let mut pool = ResourcePool::new(2, &[]);
        pool.occupy(&[1], &occupant("bob", 42));

        assert_eq!(pool.release(&[1]), 1);
        assert_eq!(pool.release(&[1]), 0);
        assert_eq!(pool.get(1), Some(&ResourceSlot::free()));
    }

    #[test]
    fn test_out_of_range_indices_ignored() {
        let mut pool = ResourcePool::new(2, &[]);
        assert_eq!(pool.reserve(&[7]), 0);
        assert_eq!(pool.release(&[7]), 0);
        assert_eq!(pool.free_indices(), vec![0, 1]);
    }

    #[test]
    fn test_status_report() {
        let mut pool = ResourcePool::new(3, &[]);
        pool.occupy(&[1], &occupant("alice", 1234));

        let status = pool.status();
        assert_eq!(status.free, vec![0, 2]);
        assert_eq!(status.occupied.len(), 1);
        assert_eq!(status.occupied[0].index, 1);
        let occ = status.occupied[0].occupant.as_ref().unwrap();
        assert_eq!(occ.user, "alice");
        assert_eq!(occ.pid, 1234);
    }
}
