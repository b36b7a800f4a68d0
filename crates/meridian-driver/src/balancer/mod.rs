//! Pluggable connection-selection policies.
//!
//! The cluster owns exactly one balancer and mediates all mutations;
//! `next` is called concurrently from every in-flight operation, so each
//! implementation carries its own synchronization.

mod multi;
mod p2c;
mod round_robin;
mod single;

pub use multi::{MultiBalancer, RoutePredicate};
pub use p2c::{LOCAL_PENALTY, PowerOfTwoChoices};
pub use round_robin::RoundRobin;
pub use single::SingleConn;

use std::sync::Arc;

use crate::config::{BalancingConfig, BalancingMethod};
use crate::conn::Conn;

/// Endpoint metadata a policy may weigh, refreshed every discovery cycle.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct BalancerInfo {
    pub local: bool,
    pub load_factor: f32,
}

/// Stable identity of one registration, returned by [`Balancer::insert`]
/// and consumed by `update`/`remove`. Decouples the balancer from string
/// endpoint keys. `route` is reserved for composite balancers; leaf
/// policies emit 0.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Handle {
    pub(crate) route: u32,
    pub(crate) id: u64,
}

impl Handle {
    pub(crate) fn leaf(id: u64) -> Self {
        Handle { route: 0, id }
    }
}

/// A connection-selection policy.
pub trait Balancer: Send + Sync {
    fn insert(&self, conn: Arc<Conn>, info: BalancerInfo) -> Handle;
    fn update(&self, handle: Handle, info: BalancerInfo);
    fn remove(&self, handle: Handle);
    /// Pick a conn for one call, or `None` when no online conn is
    /// registered. Must be safe under concurrent callers.
    fn next(&self) -> Option<Arc<Conn>>;
}

/// Build the balancer tree the configuration asks for.
pub(crate) fn for_config(
    method: BalancingMethod,
    config: &BalancingConfig,
    prefer_local_endpoints: bool,
) -> Arc<dyn Balancer> {
    let leaf = |config: &BalancingConfig| -> Arc<dyn Balancer> {
        match method {
            BalancingMethod::RoundRobin => Arc::new(RoundRobin::new()),
            BalancingMethod::PowerOfTwoChoices => Arc::new(PowerOfTwoChoices::new(config)),
        }
    };
    if prefer_local_endpoints {
        // Local endpoints first; everything else only when no local conn
        // can serve.
        Arc::new(MultiBalancer::new(vec![
            (Arc::new(|info: &BalancerInfo| info.local) as RoutePredicate, leaf(config)),
            (Arc::new(|_: &BalancerInfo| true) as RoutePredicate, leaf(config)),
        ]))
    } else {
        leaf(config)
    }
}
