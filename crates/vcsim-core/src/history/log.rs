//! Bounded, append-only log with sequence numbers.

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

struct LogState<T> {
    items: VecDeque<T>,
    first_seq: u64,
}

impl<T> LogState<T> {
    fn next_seq(&self) -> u64 {
        self.first_seq + self.items.len() as u64
    }

    fn get(&self, seq: u64) -> Option<&T> {
        let offset = usize::try_from(seq.checked_sub(self.first_seq)?).ok()?;
        self.items.get(offset)
    }
}

/// Append-only history keeping the most recent `capacity` items.
///
/// Every item receives a sequence number one greater than its predecessor.
/// Evicting the oldest items never renumbers the rest, so cursors held by
/// collectors stay valid.
pub struct HistoryLog<T> {
    state: Mutex<LogState<T>>,
    appended: Condvar,
    capacity: usize,
}

impl<T: Clone> HistoryLog<T> {
    /// Creates an empty log. A zero capacity is treated as one.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            state: Mutex::new(LogState {
                items: VecDeque::new(),
                first_seq: 0,
            }),
            appended: Condvar::new(),
            capacity: capacity.max(1),
        }
    }

    fn lock(&self) -> MutexGuard<'_, LogState<T>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Appends an item, evicting the oldest when full. Returns its sequence.
    pub fn append(&self, item: T) -> u64 {
        let seq = {
            let mut state = self.lock();
            let seq = state.next_seq();
            state.items.push_back(item);
            while state.items.len() > self.capacity {
                state.items.pop_front();
                state.first_seq += 1;
            }
            seq
        };
        self.appended.notify_all();
        seq
    }

    /// Sequence of the oldest retained item and one past the newest.
    #[must_use]
    pub fn bounds(&self) -> (u64, u64) {
        let state = self.lock();
        (state.first_seq, state.next_seq())
    }

    /// Number of retained items.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().items.len()
    }

    /// Returns true when nothing has been retained.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Scans forward from `from`, collecting up to `limit` items accepted by
    /// `keep`. Returns the items and the sequence after the last one scanned.
    pub fn scan_forward(&self, from: u64, limit: usize, keep: impl Fn(&T) -> bool) -> (Vec<T>, u64) {
        let state = self.lock();
        let mut seq = from.max(state.first_seq);
        let end = state.next_seq();
        let mut found = Vec::new();
        while seq < end && found.len() < limit {
            if let Some(item) = state.get(seq).filter(|item| keep(item)) {
                found.push(item.clone());
            }
            seq += 1;
        }
        (found, seq)
    }

    /// Scans backward from just before `before`, collecting up to `limit`
    /// accepted items. Returns them oldest first together with the sequence
    /// of the earliest item scanned.
    pub fn scan_backward(&self, before: u64, limit: usize, keep: impl Fn(&T) -> bool) -> (Vec<T>, u64) {
        let state = self.lock();
        let mut seq = before.min(state.next_seq());
        let mut found = Vec::new();
        while seq > state.first_seq && found.len() < limit {
            seq -= 1;
            if let Some(item) = state.get(seq).filter(|item| keep(item)) {
                found.push(item.clone());
            }
        }
        found.reverse();
        (found, seq.max(state.first_seq))
    }

    /// Blocks until an item with sequence at or beyond `seq` exists,
    /// `stop` returns true, or `deadline` passes. Returns true when items
    /// are available.
    pub fn wait_beyond(&self, seq: u64, deadline: Option<Instant>, stop: impl Fn() -> bool) -> bool {
        let mut state = self.lock();
        loop {
            if state.next_seq() > seq {
                return true;
            }
            if stop() {
                return false;
            }
            match deadline {
                None => {
                    state = self
                        .appended
                        .wait(state)
                        .unwrap_or_else(PoisonError::into_inner);
                }
                Some(until) => {
                    let remaining = until.saturating_duration_since(Instant::now());
                    if remaining.is_zero() {
                        return false;
                    }
                    state = self
                        .appended
                        .wait_timeout(state, remaining)
                        .unwrap_or_else(PoisonError::into_inner)
                        .0;
                }
            }
        }
    }

    /// Wakes every blocked waiter so it re-checks its stop condition.
    pub fn wake_all(&self) {
        let _guard = self.lock();
        self.appended.notify_all();
    }
}
