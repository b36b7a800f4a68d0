//! Power-of-two-choices selection.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

use super::{Balancer, BalancerInfo, Handle};
use crate::config::BalancingConfig;
use crate::conn::{Conn, ConnState};

/// Criterion bias added to non-local conns when locality preference is on.
/// Finite, so a fully saturated local set still loses to an idle remote
/// one eventually.
pub const LOCAL_PENALTY: f64 = 1_000.0;

struct Entry {
    id: u64,
    conn: Arc<Conn>,
    info: BalancerInfo,
}

/// Samples two distinct conns uniformly at random and returns the one with
/// the lower criterion score; a classic latency/load compromise between
/// round-robin's fairness and least-loaded's herding.
pub struct PowerOfTwoChoices {
    prefer_local: bool,
    op_time_threshold: Option<Duration>,
    entries: Mutex<Vec<Entry>>,
    rng: Mutex<SmallRng>,
    next_id: AtomicU64,
}

impl PowerOfTwoChoices {
    pub fn new(config: &BalancingConfig) -> Self {
        Self::with_rng(config, SmallRng::from_os_rng())
    }

    /// Deterministic variant for tests and simulations.
    pub fn with_seed(config: &BalancingConfig, seed: u64) -> Self {
        Self::with_rng(config, SmallRng::seed_from_u64(seed))
    }

    fn with_rng(config: &BalancingConfig, rng: SmallRng) -> Self {
        PowerOfTwoChoices {
            prefer_local: config.prefer_local,
            op_time_threshold: config.op_time_threshold,
            entries: Mutex::new(Vec::new()),
            rng: Mutex::new(rng),
            next_id: AtomicU64::new(0),
        }
    }

    /// Criterion score; lower wins. Pending operations are the primary
    /// signal, slow peers and remote peers pay a surcharge.
    fn score(&self, entry: &Entry, now: Instant) -> (f64, f64, u64) {
        let stats = entry.conn.runtime().stats(now);
        let mut score = stats.pending as f64;
        if let Some(threshold) = self.op_time_threshold {
            if stats.avg_op_time >= threshold {
                score += stats.avg_op_time.as_secs_f64() / threshold.as_secs_f64();
            }
        }
        if self.prefer_local && !entry.info.local {
            score += LOCAL_PENALTY;
        }
        (score, stats.errs_per_minute, entry.id)
    }
}

impl Balancer for PowerOfTwoChoices {
    fn insert(&self, conn: Arc<Conn>, info: BalancerInfo) -> Handle {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.entries.lock().push(Entry { id, conn, info });
        Handle::leaf(id)
    }

    fn update(&self, handle: Handle, info: BalancerInfo) {
        let mut entries = self.entries.lock();
        if let Some(entry) = entries.iter_mut().find(|entry| entry.id == handle.id) {
            entry.info = info;
        }
    }

    fn remove(&self, handle: Handle) {
        self.entries.lock().retain(|entry| entry.id != handle.id);
    }

    fn next(&self) -> Option<Arc<Conn>> {
        let entries = self.entries.lock();
        let candidates: Vec<&Entry> = entries
            .iter()
            .filter(|entry| entry.conn.runtime().state() == ConnState::Online)
            .collect();
        match candidates.len() {
            0 => None,
            1 => Some(candidates[0].conn.clone()),
            n => {
                let (a, b) = {
                    let mut rng = self.rng.lock();
                    let a = rng.random_range(0..n);
                    let mut b = rng.random_range(0..n - 1);
                    if b >= a {
                        b += 1;
                    }
                    (a, b)
                };
                let now = Instant::now();
                let (first, second) = (candidates[a], candidates[b]);
                let winner = if score_le(self.score(first, now), self.score(second, now)) {
                    first
                } else {
                    second
                };
                Some(winner.conn.clone())
            }
        }
    }
}

/// Lexicographic comparison of `(score, err rate, insertion id)`.
fn score_le(a: (f64, f64, u64), b: (f64, f64, u64)) -> bool {
    if a.0 != b.0 {
        return a.0 < b.0;
    }
    if a.1 != b.1 {
        return a.1 < b.1;
    }
    a.2 <= b.2
}
