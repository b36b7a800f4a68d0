//! A transport channel bound to one endpoint, plus its runtime stats.

use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tonic::transport::Channel;

use meridian_series::Series;

use crate::endpoint::Endpoint;
use crate::errors::DriverError;
use crate::transport::mock::MockChannel;
use std::sync::Arc;

/// Visibility state of a conn. Only `Online` conns are eligible for
/// balancing; a conn may sit in the cluster registry while `Offline`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ConnState {
    #[default]
    Unknown,
    Online,
    Offline,
}

/// The underlying channel of a conn. Cloning is cheap and clones keep the
/// transport alive, so outstanding calls survive a cluster-side remove
/// until their own deadlines fire.
#[derive(Clone, Debug)]
pub(crate) enum RawChannel {
    Grpc(Channel),
    Mock(Arc<MockChannel>),
}

/// Windowed snapshot of one conn's runtime counters.
#[derive(Clone, Copy, Debug)]
pub struct RuntimeStats {
    pub state: ConnState,
    pub op_started: u64,
    pub op_succeeded: u64,
    pub op_failed: u64,
    /// `op_started - op_succeeded - op_failed`; the balancer's primary
    /// load signal.
    pub pending: u64,
    pub avg_op_time: Duration,
    pub ops_per_minute: f64,
    pub errs_per_minute: f64,
}

const STATS_WINDOW: Duration = Duration::from_secs(60);
const STATS_BUCKETS: usize = 6;
const MINUTE: Duration = Duration::from_secs(60);

struct RuntimeInner {
    state: ConnState,
    op_started: u64,
    op_succeeded: u64,
    op_failed: u64,
    /// Sum of operation durations (seconds) per window bucket.
    op_time: Series,
    /// Operation (and stream receive) events per window bucket.
    op_rate: Series,
    /// Timeout-class failures per window bucket.
    err_rate: Series,
}

/// Per-conn mutable statistics feeding the balancer's choice.
///
/// The mutex is held only for O(1) arithmetic; nothing ever blocks or
/// performs I/O under it.
pub struct ConnRuntime {
    inner: Mutex<RuntimeInner>,
}

impl Default for ConnRuntime {
    fn default() -> Self {
        ConnRuntime {
            inner: Mutex::new(RuntimeInner {
                state: ConnState::Unknown,
                op_started: 0,
                op_succeeded: 0,
                op_failed: 0,
                op_time: Series::new(STATS_WINDOW, STATS_BUCKETS),
                op_rate: Series::new(STATS_WINDOW, STATS_BUCKETS),
                err_rate: Series::new(STATS_WINDOW, STATS_BUCKETS),
            }),
        }
    }
}

impl ConnRuntime {
    pub fn state(&self) -> ConnState {
        self.inner.lock().state
    }

    pub(crate) fn set_state(&self, state: ConnState) {
        self.inner.lock().state = state;
    }

    pub(crate) fn operation_start(&self, now: Instant) {
        let mut inner = self.inner.lock();
        inner.op_started += 1;
        inner.op_rate.add(now, 1.0);
    }

    /// Settle one operation. Only timeout-class errors count toward the
    /// error rate: a permanent API error says nothing about the
    /// endpoint's health.
    pub(crate) fn operation_done(&self, start: Instant, now: Instant, err: Option<&DriverError>) {
        let mut inner = self.inner.lock();
        match err {
            None => inner.op_succeeded += 1,
            Some(err) => {
                inner.op_failed += 1;
                if err.is_timeout_class() {
                    inner.err_rate.add(now, 1.0);
                }
            }
        }
        inner
            .op_time
            .add(now, now.saturating_duration_since(start).as_secs_f64());
    }

    pub(crate) fn stream_start(&self, now: Instant) {
        self.operation_start(now);
    }

    pub(crate) fn stream_recv(&self, now: Instant) {
        self.inner.lock().op_rate.add(now, 1.0);
    }

    pub(crate) fn stream_done(&self, start: Instant, now: Instant, err: Option<&DriverError>) {
        self.operation_done(start, now, err);
    }

    pub fn stats(&self, now: Instant) -> RuntimeStats {
        let inner = self.inner.lock();
        let (time_sum, time_count) = inner.op_time.get(now);
        let avg_op_time = if time_count > 0.0 {
            Duration::from_secs_f64(time_sum / time_count)
        } else {
            Duration::ZERO
        };
        RuntimeStats {
            state: inner.state,
            op_started: inner.op_started,
            op_succeeded: inner.op_succeeded,
            op_failed: inner.op_failed,
            pending: inner.op_started - inner.op_succeeded - inner.op_failed,
            avg_op_time,
            ops_per_minute: inner.op_rate.sum_per(now, MINUTE),
            errs_per_minute: inner.err_rate.sum_per(now, MINUTE),
        }
    }
}

/// One endpoint's transport channel plus runtime stats. Exclusively owned
/// by one cluster; balancers alias it through `Arc`.
pub struct Conn {
    endpoint: Endpoint,
    channel: RawChannel,
    runtime: ConnRuntime,
}

impl Conn {
    pub(crate) fn new(endpoint: Endpoint, channel: RawChannel) -> Self {
        Conn {
            endpoint,
            channel,
            runtime: ConnRuntime::default(),
        }
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    pub fn runtime(&self) -> &ConnRuntime {
        &self.runtime
    }

    pub(crate) fn channel(&self) -> &RawChannel {
        &self.channel
    }
}

impl std::fmt::Debug for Conn {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Conn")
            .field("endpoint", &self.endpoint.host_port())
            .field("state", &self.runtime.state())
            .finish()
    }
}
