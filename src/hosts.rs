//! Ensemble address list.
//!
//! Supplies the next candidate server for each (re)connection attempt in
//! round-robin order. The list is optionally shuffled once at construction
//! and the resulting order is fixed for the lifetime of the client, so a
//! fleet of clients spreads its initial connections across the ensemble
//! while any single client remains deterministic after startup.
//!
//! The list is owned exclusively by the connection supervisor task; nothing
//! here needs a lock.

use rand::seq::SliceRandom;

/// Round-robin cursor over the ensemble members.
#[derive(Debug)]
pub(crate) struct HostList {
    servers: Vec<String>,
    curr: Option<usize>,
    last: Option<usize>,
}

impl HostList {
    /// Build the list. `servers` must be non-empty; the builder enforces it.
    pub(crate) fn new(
        mut servers: Vec<String>,
        shuffle: bool,
    ) -> Self {
        if shuffle {
            servers.shuffle(&mut rand::thread_rng());
        }
        Self {
            servers,
            curr: None,
            last: None,
        }
    }

    /// Next candidate address, plus whether the cursor has wrapped back to
    /// the last successfully connected server — i.e. one full cycle of the
    /// list has failed. The supervisor sleeps its backoff only when
    /// `cycle_complete` is true, so individual dead candidates are skipped
    /// without delay.
    pub(crate) fn next_candidate(&mut self) -> (String, bool) {
        let len = self.servers.len();
        let idx = match self.curr {
            None => 0,
            Some(i) => (i + 1) % len,
        };
        self.curr = Some(idx);
        let cycle_complete = match self.last {
            Some(last) => idx == last,
            None => {
                // No success yet: measure cycles from the head of the list.
                self.last = Some(0);
                false
            }
        };
        (self.servers[idx].clone(), cycle_complete)
    }

    /// Record that the most recently returned candidate accepted us.
    pub(crate) fn connected(&mut self) {
        self.last = self.curr;
    }

    #[allow(dead_code)]
    pub(crate) fn len(&self) -> usize {
        self.servers.len()
    }
}
