//! Degenerate single-conn policy, used when discovery is disabled.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

use super::{Balancer, BalancerInfo, Handle};
use crate::conn::{Conn, ConnState};

struct Entry {
    id: u64,
    conn: Arc<Conn>,
}

/// Holds at most one conn; a later insert replaces the previous one.
#[derive(Default)]
pub struct SingleConn {
    slot: Mutex<Option<Entry>>,
    next_id: AtomicU64,
}

impl SingleConn {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Balancer for SingleConn {
    fn insert(&self, conn: Arc<Conn>, _info: BalancerInfo) -> Handle {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        *self.slot.lock() = Some(Entry { id, conn });
        Handle::leaf(id)
    }

    fn update(&self, _handle: Handle, _info: BalancerInfo) {}

    fn remove(&self, handle: Handle) {
        let mut slot = self.slot.lock();
        if slot.as_ref().is_some_and(|entry| entry.id == handle.id) {
            *slot = None;
        }
    }

    fn next(&self) -> Option<Arc<Conn>> {
        let slot = self.slot.lock();
        slot.as_ref()
            .filter(|entry| entry.conn.runtime().state() == ConnState::Online)
            .map(|entry| entry.conn.clone())
    }
}
