//! Insertion-ordered round-robin selection.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use parking_lot::Mutex;

use super::{Balancer, BalancerInfo, Handle};
use crate::conn::{Conn, ConnState};

struct Entry {
    id: u64,
    conn: Arc<Conn>,
}

/// Fair rotation over the insertion order. Ignores endpoint metadata; fair
/// under equal latency.
#[derive(Default)]
pub struct RoundRobin {
    entries: Mutex<Vec<Entry>>,
    cursor: AtomicUsize,
    next_id: AtomicU64,
}

impl RoundRobin {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Balancer for RoundRobin {
    fn insert(&self, conn: Arc<Conn>, _info: BalancerInfo) -> Handle {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.entries.lock().push(Entry { id, conn });
        Handle::leaf(id)
    }

    fn update(&self, _handle: Handle, _info: BalancerInfo) {
        // Rotation order does not depend on endpoint metadata.
    }

    fn remove(&self, handle: Handle) {
        self.entries.lock().retain(|entry| entry.id != handle.id);
    }

    fn next(&self) -> Option<Arc<Conn>> {
        let entries = self.entries.lock();
        if entries.is_empty() {
            return None;
        }
        for _ in 0..entries.len() {
            let at = self.cursor.fetch_add(1, Ordering::Relaxed) % entries.len();
            let entry = &entries[at];
            if entry.conn.runtime().state() == ConnState::Online {
                return Some(entry.conn.clone());
            }
        }
        None
    }
}
