//! The live collection of conns managed by one driver instance.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use parking_lot::RwLock;
use tokio::sync::Notify;
use tracing::{debug, warn};

use meridian_cancel::Context;

use crate::balancer::{Balancer, BalancerInfo, Handle};
use crate::conn::{Conn, ConnState, RuntimeStats};
use crate::dialer::Dialer;
use crate::endpoint::Endpoint;
use crate::errors::{DriverError, DriverResult};

/// One row of the per-endpoint stats surface.
#[derive(Clone, Debug)]
pub struct ClusterStats {
    pub endpoint: Endpoint,
    pub stats: RuntimeStats,
}

struct ClusterEntry {
    endpoint: Endpoint,
    /// `None` when the last dial attempt failed; the endpoint stays in the
    /// registry as `Offline` so a later cycle can retry.
    conn: Option<Arc<Conn>>,
    handle: Option<Handle>,
}

/// Owns the endpoint registry and mediates every balancer mutation.
///
/// Invariants: every conn registered with the balancer is in the registry;
/// at most one conn per endpoint key; after `close` every conn has been
/// closed exactly once and `get` fails fast.
pub(crate) struct Cluster {
    dialer: Arc<Dialer>,
    balancer: Arc<dyn Balancer>,
    inner: RwLock<BTreeMap<(String, u16), ClusterEntry>>,
    /// Wakes `get` callers blocked on an empty balancer.
    added: Notify,
    closed: AtomicBool,
}

impl Cluster {
    pub(crate) fn new(dialer: Arc<Dialer>, balancer: Arc<dyn Balancer>) -> Arc<Self> {
        Arc::new(Cluster {
            dialer,
            balancer,
            inner: RwLock::new(BTreeMap::new()),
            added: Notify::new(),
            closed: AtomicBool::new(false),
        })
    }

    fn key_of(endpoint: &Endpoint) -> (String, u16) {
        (endpoint.address.clone(), endpoint.port)
    }

    fn info_of(endpoint: &Endpoint) -> BalancerInfo {
        BalancerInfo {
            local: endpoint.local,
            load_factor: endpoint.load_factor,
        }
    }

    /// Dial `endpoint` and register the conn. A failed dial records the
    /// endpoint as offline and reports the error without poisoning the
    /// registry; a later `update` retries the dial.
    pub(crate) async fn insert(&self, ctx: &Context, endpoint: Endpoint) -> DriverResult<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(DriverError::Closed);
        }
        let key = Self::key_of(&endpoint);
        match self
            .dialer
            .dial_host_port(ctx, &endpoint.address, endpoint.port)
            .await
        {
            Ok(channel) => {
                let conn = Arc::new(Conn::new(endpoint.clone(), channel));
                conn.runtime().set_state(ConnState::Online);
                let handle = self.balancer.insert(conn.clone(), Self::info_of(&endpoint));
                {
                    let mut inner = self.inner.write();
                    if self.closed.load(Ordering::Acquire) {
                        // Lost the race with close: roll the registration back.
                        self.balancer.remove(handle);
                        conn.runtime().set_state(ConnState::Offline);
                        return Err(DriverError::Closed);
                    }
                    if let Some(previous) = inner.insert(
                        key,
                        ClusterEntry {
                            endpoint: endpoint.clone(),
                            conn: Some(conn),
                            handle: Some(handle),
                        },
                    ) {
                        if let Some(stale) = previous.handle {
                            self.balancer.remove(stale);
                        }
                        if let Some(stale) = previous.conn {
                            stale.runtime().set_state(ConnState::Offline);
                        }
                    }
                }
                debug!(endpoint = %endpoint, "endpoint joined the cluster");
                self.added.notify_waiters();
                Ok(())
            }
            Err(err) => {
                {
                    let mut inner = self.inner.write();
                    if !self.closed.load(Ordering::Acquire) {
                        inner.insert(
                            key,
                            ClusterEntry {
                                endpoint: endpoint.clone(),
                                conn: None,
                                handle: None,
                            },
                        );
                    }
                }
                warn!(endpoint = %endpoint, error = %err, "endpoint dial failed; recorded offline");
                Err(err)
            }
        }
    }

    /// Endpoint identity unchanged, metadata refreshed. Live conns have
    /// their balancer registration re-weighted; offline entries get a
    /// fresh dial attempt.
    pub(crate) async fn update(&self, ctx: &Context, endpoint: Endpoint) -> DriverResult<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(DriverError::Closed);
        }
        let key = Self::key_of(&endpoint);
        {
            let mut inner = self.inner.write();
            if let Some(entry) = inner.get_mut(&key) {
                entry.endpoint = endpoint.clone();
                if let Some(handle) = entry.handle {
                    self.balancer.update(handle, Self::info_of(&endpoint));
                    return Ok(());
                }
            }
        }
        // Offline (or unknown) endpoint: try to bring it up.
        self.insert(ctx, endpoint).await
    }

    /// Deregister and drop the endpoint's conn. The transport closes
    /// asynchronously: in-flight calls hold channel clones and finish
    /// under their own deadlines.
    pub(crate) fn remove(&self, endpoint: &Endpoint) {
        let entry = self.inner.write().remove(&Self::key_of(endpoint));
        let Some(entry) = entry else { return };
        if let Some(handle) = entry.handle {
            self.balancer.remove(handle);
        }
        if let Some(conn) = entry.conn {
            conn.runtime().set_state(ConnState::Offline);
            debug!(endpoint = %endpoint, "endpoint left the cluster");
        }
    }

    /// Pick a conn for one call, waiting until an online conn is
    /// registered or the context gives up.
    pub(crate) async fn get(&self, ctx: &Context) -> DriverResult<Arc<Conn>> {
        loop {
            if self.closed.load(Ordering::Acquire) {
                return Err(DriverError::Closed);
            }
            // Register interest before re-checking so an insert between
            // the check and the await cannot be missed.
            let notified = self.added.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if let Some(conn) = self.balancer.next() {
                return Ok(conn);
            }
            if self.closed.load(Ordering::Acquire) {
                return Err(DriverError::Closed);
            }
            ctx.run_until_done(notified).await.map_err(DriverError::from)?;
        }
    }

    /// Close every conn exactly once and fail all future `get`s.
    /// Idempotent.
    pub(crate) fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let drained = std::mem::take(&mut *self.inner.write());
        for entry in drained.into_values() {
            if let Some(handle) = entry.handle {
                self.balancer.remove(handle);
            }
            if let Some(conn) = entry.conn {
                conn.runtime().set_state(ConnState::Offline);
            }
        }
        self.added.notify_waiters();
        debug!("cluster closed");
    }

    /// Snapshot per-endpoint runtime stats. Never-dialed endpoints report
    /// zeroed offline stats.
    pub(crate) fn stats(&self, mut visit: impl FnMut(&ClusterStats)) {
        let now = Instant::now();
        for entry in self.inner.read().values() {
            let stats = match &entry.conn {
                Some(conn) => conn.runtime().stats(now),
                None => RuntimeStats {
                    state: ConnState::Offline,
                    op_started: 0,
                    op_succeeded: 0,
                    op_failed: 0,
                    pending: 0,
                    avg_op_time: std::time::Duration::ZERO,
                    ops_per_minute: 0.0,
                    errs_per_minute: 0.0,
                },
            };
            visit(&ClusterStats {
                endpoint: entry.endpoint.clone(),
                stats,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::balancer::RoundRobin;
    use crate::config::DriverConfig;
    use crate::transport::mock::MockNetwork;
    use std::time::Duration;

    fn cluster_over(network: &MockNetwork) -> Arc<Cluster> {
        let config = DriverConfig::new("/prod/orders").with_mock_network(network.clone());
        Cluster::new(
            Arc::new(Dialer::from_config(&config)),
            Arc::new(RoundRobin::new()),
        )
    }

    #[tokio::test]
    async fn insert_then_get_round_trips() {
        let network = MockNetwork::new();
        network.add_endpoint("node-a:2135");
        let cluster = cluster_over(&network);

        cluster
            .insert(&Context::background(), Endpoint::new("node-a", 2135))
            .await
            .unwrap();
        let conn = cluster.get(&Context::background()).await.unwrap();
        assert_eq!(conn.endpoint().host_port(), "node-a:2135");
        assert_eq!(conn.runtime().state(), ConnState::Online);
    }

    #[tokio::test(start_paused = true)]
    async fn get_blocks_until_an_endpoint_appears() {
        let network = MockNetwork::new();
        network.add_endpoint("node-a:2135");
        let cluster = cluster_over(&network);

        let waiter = {
            let cluster = cluster.clone();
            tokio::spawn(async move {
                let ctx = Context::background().with_timeout(Duration::from_secs(5));
                cluster.get(&ctx).await
            })
        };
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(!waiter.is_finished());

        cluster
            .insert(&Context::background(), Endpoint::new("node-a", 2135))
            .await
            .unwrap();
        let conn = waiter.await.unwrap().unwrap();
        assert_eq!(conn.endpoint().host_port(), "node-a:2135");
    }

    #[tokio::test(start_paused = true)]
    async fn get_gives_up_with_the_context() {
        let network = MockNetwork::new();
        let cluster = cluster_over(&network);
        let ctx = Context::background().with_timeout(Duration::from_millis(20));
        let err = cluster.get(&ctx).await.unwrap_err();
        assert!(matches!(err, DriverError::DeadlineExceeded));
    }

    #[tokio::test]
    async fn close_wakes_blocked_getters_and_closes_conns() {
        let network = MockNetwork::new();
        let endpoint = network.add_endpoint("node-a:2135");
        let cluster = cluster_over(&network);
        cluster
            .insert(&Context::background(), Endpoint::new("node-a", 2135))
            .await
            .unwrap();

        cluster.close();
        cluster.close(); // idempotent
        assert_eq!(endpoint.open_channels(), 0);
        let err = cluster.get(&Context::background()).await.unwrap_err();
        assert!(matches!(err, DriverError::Closed));

        let err = cluster
            .insert(&Context::background(), Endpoint::new("node-a", 2135))
            .await
            .unwrap_err();
        assert!(matches!(err, DriverError::Closed));
    }

    #[tokio::test]
    async fn failed_dial_records_offline_and_update_retries() {
        let network = MockNetwork::new();
        network.add_endpoint("node-a:2135");
        network.refuse("node-a:2135");
        let cluster = cluster_over(&network);

        let err = cluster
            .insert(&Context::background(), Endpoint::new("node-a", 2135))
            .await
            .unwrap_err();
        assert!(matches!(err, DriverError::Transport { .. }));

        let mut seen = Vec::new();
        cluster.stats(|row| seen.push((row.endpoint.host_port(), row.stats.state)));
        assert_eq!(seen, vec![("node-a:2135".to_owned(), ConnState::Offline)]);

        // The endpoint comes back; the next reconciliation update re-dials.
        network.allow("node-a:2135");
        cluster
            .update(&Context::background(), Endpoint::new("node-a", 2135))
            .await
            .unwrap();
        let conn = cluster.get(&Context::background()).await.unwrap();
        assert_eq!(conn.runtime().state(), ConnState::Online);
    }

    #[tokio::test]
    async fn remove_deregisters_but_spares_inflight_channels() {
        let network = MockNetwork::new();
        let endpoint = network.add_endpoint("node-a:2135");
        let cluster = cluster_over(&network);
        cluster
            .insert(&Context::background(), Endpoint::new("node-a", 2135))
            .await
            .unwrap();

        // An in-flight call holds a clone of the conn.
        let held = cluster.get(&Context::background()).await.unwrap();
        cluster.remove(&Endpoint::new("node-a", 2135));

        let ctx = Context::background().with_timeout(Duration::from_millis(10));
        assert!(cluster.get(&ctx).await.is_err());
        assert_eq!(endpoint.open_channels(), 1, "held conn keeps the channel");
        drop(held);
        assert_eq!(endpoint.open_channels(), 0);
    }
}
