//! Slot selection policy

use gpusched_core::{GpuschedError, GpuschedResult};
use std::collections::HashSet;

/// What a task asks the pool for
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdmissionRequest {
    count: usize,
    preferred: Vec<usize>,
    forced: Vec<usize>,
}

impl AdmissionRequest {
    /// Build a request for `count` slots.
    ///
    /// `preferred` slots are taken first when free; `forced` slots must all
    /// be free before the task is admitted. Duplicate forced indices collapse.
    pub fn new(count: usize, preferred: Vec<usize>, forced: Vec<usize>) -> GpuschedResult<Self> {
        if count == 0 {
            return Err(GpuschedError::InvalidRequest(
                "at least one GPU must be requested".to_string(),
            ));
        }

        let mut seen = HashSet::new();
        let forced: Vec<usize> = forced.into_iter().filter(|i| seen.insert(*i)).collect();
        if forced.len() > count {
            return Err(GpuschedError::InvalidRequest(format!(
                "{} GPUs forced but only {} requested",
                forced.len(),
                count
            )));
        }

        Ok(Self {
            count,
            preferred,
            forced,
        })
    }

    pub fn count(&self) -> usize {
        self.count
    }

    pub fn preferred(&self) -> &[usize] {
        &self.preferred
    }

    pub fn forced(&self) -> &[usize] {
        &self.forced
    }
}

/// Outcome of one selection attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selection {
    /// Slots to claim, in assignment order
    Assigned(Vec<usize>),
    /// Fewer free slots than requested
    Insufficient,
    /// Enough slots, but not the forced ones
    ForcedUnavailable,
}

/// Move each listed index that is present in `order` to the front.
///
/// The list is walked back to front so the first listed index ends up
/// frontmost. Indices absent from `order` are ignored.
pub fn promote(order: &mut Vec<usize>, indices: &[usize]) {
    for idx in indices.iter().rev() {
        if let Some(pos) = order.iter().position(|i| i == idx) {
            let idx = order.remove(pos);
            order.insert(0, idx);
        }
    }
}

/// The first `forced.len()` entries of `order` are exactly the forced set
pub fn forced_at_front(order: &[usize], forced: &[usize]) -> bool {
    if order.len() < forced.len() {
        return false;
    }
    let front: HashSet<usize> = order[..forced.len()].iter().copied().collect();
    let wanted: HashSet<usize> = forced.iter().copied().collect();
    front == wanted
}

/// Pick slots for `request` out of the currently free indices
pub fn select(free: Vec<usize>, request: &AdmissionRequest) -> Selection {
    if free.len() < request.count {
        return Selection::Insufficient;
    }

    let mut order = free;
    promote(&mut order, &request.preferred);

    if !request.forced.is_empty() {
        promote(&mut order, &request.forced);
        if !forced_at_front(&order, &request.forced) {
            return Selection::ForcedUnavailable;
        }
    }

    order.truncate(request.count);
    Selection::Assigned(order)
}
