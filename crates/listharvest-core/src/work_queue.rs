//! Shared work queue with single-assignee claims and reclaim support

use std::collections::VecDeque;
use std::sync::Mutex;

/// Lifecycle of one queue slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SlotStatus {
    Queued,
    Assigned,
    Done,
    Abandoned,
}

/// Status and current assignee of a slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotState {
    pub status: SlotStatus,
    pub assignee: Option<usize>,
    /// Set once the slot was handed back after an assignee failure
    pub reclaimed: bool,
}

struct Inner<S> {
    items: Vec<S>,
    states: Vec<SlotState>,
    pending: VecDeque<usize>,
}

/// Work queue distributing items to workers.
///
/// Workers [`claim`](WorkQueue::claim) the next queued item; a claimed
/// item has exactly one assignee until it is completed, reclaimed or
/// abandoned. Reclaimed items go to the front so they are picked up first.
pub struct WorkQueue<S> {
    inner: Mutex<Inner<S>>,
}

impl<S: Clone> WorkQueue<S> {
    /// Create queue from all items, in priority order
    pub fn new(items: Vec<S>) -> Self {
        let states = vec![
            SlotState {
                status: SlotStatus::Queued,
                assignee: None,
                reclaimed: false,
            };
            items.len()
        ];
        let pending = (0..items.len()).collect();
        Self {
            inner: Mutex::new(Inner {
                items,
                states,
                pending,
            }),
        }
    }

    /// Claim the next queued item for `worker`. Returns the slot index and a copy.
    pub fn claim(&self, worker: usize) -> Option<(usize, S)> {
        let mut inner = self.lock();
        while let Some(slot) = inner.pending.pop_front() {
            let state = &mut inner.states[slot];
            if state.status != SlotStatus::Queued {
                continue;
            }
            state.status = SlotStatus::Assigned;
            state.assignee = Some(worker);
            return Some((slot, inner.items[slot].clone()));
        }
        None
    }

    /// Mark a slot finished by its assignee
    pub fn complete(&self, slot: usize) {
        let mut inner = self.lock();
        if let Some(state) = inner.states.get_mut(slot) {
            state.status = SlotStatus::Done;
            state.assignee = None;
        }
    }

    /// Return an unfinished slot to the front of the queue
    pub fn reclaim(&self, slot: usize) {
        let mut inner = self.lock();
        let Some(state) = inner.states.get_mut(slot) else {
            return;
        };
        if state.status != SlotStatus::Assigned {
            return;
        }
        state.status = SlotStatus::Queued;
        state.assignee = None;
        state.reclaimed = true;
        inner.pending.push_front(slot);
    }

    /// Put an interrupted slot back without flagging it as reclaimed
    pub fn release(&self, slot: usize) {
        let mut inner = self.lock();
        let Some(state) = inner.states.get_mut(slot) else {
            return;
        };
        if state.status != SlotStatus::Assigned {
            return;
        }
        state.status = SlotStatus::Queued;
        state.assignee = None;
        inner.pending.push_front(slot);
    }

    /// Mark every slot that was reclaimed but never finished as abandoned.
    /// Returns how many slots were abandoned.
    pub fn abandon_reclaimed(&self) -> usize {
        let mut inner = self.lock();
        let mut abandoned = 0;
        for state in inner.states.iter_mut() {
            if state.reclaimed && state.status != SlotStatus::Done {
                state.status = SlotStatus::Abandoned;
                state.assignee = None;
                abandoned += 1;
            }
        }
        abandoned
    }

    /// Number of items still waiting for an assignee
    pub fn pending(&self) -> usize {
        let inner = self.lock();
        inner
            .pending
            .iter()
            .filter(|&&slot| inner.states[slot].status == SlotStatus::Queued)
            .count()
    }

    pub fn state(&self, slot: usize) -> Option<SlotState> {
        self.lock().states.get(slot).copied()
    }

    /// Consume the queue, returning every item with its final state
    pub fn into_items(self) -> Vec<(S, SlotState)> {
        let inner = self.inner.into_inner().unwrap_or_else(|e| e.into_inner());
        inner.items.into_iter().zip(inner.states).collect()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner<S>> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}
