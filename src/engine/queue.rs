// src/engine/queue.rs

use std::collections::VecDeque;

use tracing::debug;

use crate::types::JobId;

/// Strict FIFO of jobs waiting for a running slot.
///
/// There is no priority and no capacity limit: submission never blocks, and
/// jobs leave the queue either by admission (front) or by cancellation
/// (anywhere).
#[derive(Debug, Default)]
pub struct AdmissionQueue {
    waiting: VecDeque<JobId>,
}

impl AdmissionQueue {
    pub fn new() -> Self {
        Self {
            waiting: VecDeque::new(),
        }
    }

    pub fn push(&mut self, id: JobId) {
        self.waiting.push_back(id);
        debug!(job_id = %id, queued = self.waiting.len(), "job queued");
    }

    /// Oldest waiting job, if any.
    pub fn pop(&mut self) -> Option<JobId> {
        self.waiting.pop_front()
    }

    /// Remove a job wherever it is. Returns whether it was queued.
    pub fn remove(&mut self, id: JobId) -> bool {
        match self.position(id) {
            Some(idx) => {
                self.waiting.remove(idx);
                true
            }
            None => false,
        }
    }

    pub fn position(&self, id: JobId) -> Option<usize> {
        self.waiting.iter().position(|queued| *queued == id)
    }

    pub fn drain(&mut self) -> Vec<JobId> {
        self.waiting.drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.waiting.len()
    }

    pub fn is_empty(&self) -> bool {
        self.waiting.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pops_in_submission_order() {
        let mut q = AdmissionQueue::new();
        let ids: Vec<_> = (0..3).map(|_| JobId::new()).collect();
        for id in &ids {
            q.push(*id);
        }
        assert_eq!(q.pop(), Some(ids[0]));
        assert_eq!(q.pop(), Some(ids[1]));
        assert_eq!(q.pop(), Some(ids[2]));
        assert!(q.pop().is_none());
    }

    #[test]
    fn remove_from_middle_keeps_order() {
        let mut q = AdmissionQueue::new();
        let ids: Vec<_> = (0..3).map(|_| JobId::new()).collect();
        for id in &ids {
            q.push(*id);
        }
        assert!(q.remove(ids[1]));
        assert!(!q.remove(ids[1]));
        assert_eq!(q.position(ids[2]), Some(1));
        assert_eq!(q.drain(), vec![ids[0], ids[2]]);
        assert!(q.is_empty());
    }
}
