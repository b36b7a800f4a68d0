//! Locality-splitting composite balancer.

use std::sync::Arc;

use super::{Balancer, BalancerInfo, Handle};
use crate::conn::Conn;

/// Routes an insertion to the first sub-balancer whose predicate accepts
/// the conn's metadata.
pub type RoutePredicate = Arc<dyn Fn(&BalancerInfo) -> bool + Send + Sync>;

/// Composes sub-balancers in declared order: `insert` routes to the first
/// matching predicate (falling through to the last sub-balancer), `next`
/// returns the first sub-balancer that can serve. The driver composes
/// `[local-only, everything]` when locality preference is enabled.
pub struct MultiBalancer {
    routes: Vec<(RoutePredicate, Arc<dyn Balancer>)>,
}

impl MultiBalancer {
    /// Panics when `routes` is empty; a composite of nothing cannot route.
    pub fn new(routes: Vec<(RoutePredicate, Arc<dyn Balancer>)>) -> Self {
        assert!(!routes.is_empty(), "multi balancer needs at least one route");
        MultiBalancer { routes }
    }

    fn route_of(&self, info: &BalancerInfo) -> usize {
        self.routes
            .iter()
            .position(|(predicate, _)| predicate(info))
            .unwrap_or(self.routes.len() - 1)
    }
}

impl Balancer for MultiBalancer {
    fn insert(&self, conn: Arc<Conn>, info: BalancerInfo) -> Handle {
        let route = self.route_of(&info);
        let inner = self.routes[route].1.insert(conn, info);
        Handle {
            route: route as u32,
            id: inner.id,
        }
    }

    fn update(&self, handle: Handle, info: BalancerInfo) {
        // Routing is fixed at insertion; metadata changes reach the owning
        // sub-balancer. A conn changes route only through remove + insert.
        if let Some((_, inner)) = self.routes.get(handle.route as usize) {
            inner.update(Handle::leaf(handle.id), info);
        }
    }

    fn remove(&self, handle: Handle) {
        if let Some((_, inner)) = self.routes.get(handle.route as usize) {
            inner.remove(Handle::leaf(handle.id));
        }
    }

    fn next(&self) -> Option<Arc<Conn>> {
        self.routes.iter().find_map(|(_, inner)| inner.next())
    }
}
