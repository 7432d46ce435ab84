//! Routing table and the distance-vector routing context.
//!
//! [`RoutingContext`] owns everything the network layer needs to route:
//! the neighbor cost table, the distance-vector table and the routing table.
//! The two mutable tables sit behind their own locks; applying a route
//! update takes the DV lock first and then the routing lock, so adopting a
//! cheaper cost and repointing the next hop happen together.
//!
//! Relaxation is plain distributed Bellman-Ford: for every destination `d`
//! in an update from neighbor `n`,
//!
//! ```text
//!   candidate = link_cost(n) + advertised_cost(n, d)
//!   if candidate < own_cost(d):  own_cost(d) = candidate; next_hop(d) = n
//! ```
//!
//! Costs never rise again, so link failures are not reflected.
//!
//! Every update that changes a route bumps a version published on a
//! [`watch`] channel; [`RoutingContext::subscribe`] hands out receivers.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Mutex, MutexGuard, PoisonError};

use tokio::sync::watch;

use crate::config::INFINITE_COST;
use crate::dvtable::DvTable;
use crate::id::NodeId;
use crate::nbr_cost::NeighborCostTable;
use crate::packet::RouteUpdate;
use crate::topology::Topology;

/// Destination → next-hop neighbor.
#[derive(Debug, Clone)]
pub struct RoutingTable {
    me: NodeId,
    next_hops: BTreeMap<NodeId, NodeId>,
}

impl RoutingTable {
    /// Every neighbor starts out as its own next hop.
    pub fn new(me: NodeId, neighbors: impl IntoIterator<Item = NodeId>) -> Self {
        Self {
            me,
            next_hops: neighbors.into_iter().map(|n| (n, n)).collect(),
        }
    }

    pub fn set(&mut self, dest: NodeId, next_hop: NodeId) {
        self.next_hops.insert(dest, next_hop);
    }

    pub fn get(&self, dest: NodeId) -> Option<NodeId> {
        self.next_hops.get(&dest).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (NodeId, NodeId)> + '_ {
        self.next_hops.iter().map(|(&d, &h)| (d, h))
    }
}

impl fmt::Display for RoutingTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "routing table of node {}:", self.me)?;
        writeln!(f, "{:>6} {:>8}", "dest", "next hop")?;
        for (dest, hop) in self.iter() {
            writeln!(f, "{:>6} {:>8}", dest, hop)?;
        }
        Ok(())
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Shared routing state of one node.
#[derive(Debug)]
pub struct RoutingContext {
    me: NodeId,
    nbr_costs: NeighborCostTable,
    dv: Mutex<DvTable>,
    routes: Mutex<RoutingTable>,
    version: watch::Sender<u64>,
}

impl RoutingContext {
    pub fn new(topology: &Topology) -> Self {
        let me = topology.me();
        let nbr_costs = topology.neighbor_costs();
        let dv = DvTable::new(me, &topology.nodes(), &nbr_costs);
        let routes = RoutingTable::new(me, nbr_costs.neighbors());
        Self {
            me,
            nbr_costs,
            dv: Mutex::new(dv),
            routes: Mutex::new(routes),
            version: watch::channel(0).0,
        }
    }

    pub fn me(&self) -> NodeId {
        self.me
    }

    pub fn neighbor_costs(&self) -> &NeighborCostTable {
        &self.nbr_costs
    }

    /// Apply a route update from `from`. Returns `true` if any route changed.
    pub fn apply_update(&self, from: NodeId, update: &RouteUpdate) -> bool {
        if !self.nbr_costs.is_neighbor(from) {
            log::debug!("[snp] ignoring route update from non-neighbor {from}");
            return false;
        }
        let link = self.nbr_costs.cost(from);

        let changed = {
            let mut dv = lock(&self.dv);
            dv.record_advertisement(from, update);

            let mut routes = lock(&self.routes);
            let mut changed = false;
            for entry in &update.entries {
                let candidate = link.saturating_add(entry.cost).min(INFINITE_COST);
                if candidate < dv.cost(self.me, entry.node) && dv.set_cost(self.me, entry.node, candidate) {
                    routes.set(entry.node, from);
                    changed = true;
                    log::debug!(
                        "[snp] route to {} now via {} at cost {}",
                        entry.node,
                        from,
                        candidate
                    );
                }
            }
            changed
        };
        // Published with both locks released.
        if changed {
            self.version.send_modify(|v| *v += 1);
        }
        changed
    }

    /// Receiver whose value advances each time a route changes.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.version.subscribe()
    }

    /// This node's vector for the next broadcast.
    pub fn own_update(&self) -> RouteUpdate {
        lock(&self.dv).own_vector()
    }

    pub fn next_hop(&self, dest: NodeId) -> Option<NodeId> {
        lock(&self.routes).get(dest)
    }

    /// Best known cost to `dest`.
    pub fn cost_to(&self, dest: NodeId) -> u32 {
        lock(&self.dv).cost(self.me, dest)
    }

    pub fn routing_table(&self) -> RoutingTable {
        lock(&self.routes).clone()
    }

    pub fn dv_table(&self) -> DvTable {
        lock(&self.dv).clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::RouteEntry;

    fn update(pairs: &[(u32, u32)]) -> RouteUpdate {
        RouteUpdate {
            entries: pairs
                .iter()
                .map(|&(node, cost)| RouteEntry {
                    node: NodeId(node),
                    cost,
                })
                .collect(),
        }
    }

    // 1 ─1─ 2 ─1─ 3, plus a direct 1 ─5─ 3.
    fn triangle(me: u8) -> RoutingContext {
        let text = "10.0.0.1 10.0.0.2 1\n10.0.0.2 10.0.0.3 1\n10.0.0.1 10.0.0.3 5\n";
        let topo = Topology::parse(text, [10, 0, 0, me].into()).unwrap();
        RoutingContext::new(&topo)
    }

    #[test]
    fn neighbors_start_as_their_own_next_hop() {
        let ctx = triangle(1);
        assert_eq!(ctx.next_hop(NodeId(2)), Some(NodeId(2)));
        assert_eq!(ctx.next_hop(NodeId(3)), Some(NodeId(3)));
        assert_eq!(ctx.next_hop(NodeId(9)), None);
        assert_eq!(ctx.cost_to(NodeId(3)), 5);
    }

    #[test]
    fn cheaper_path_is_adopted() {
        let ctx = triangle(1);
        assert!(ctx.apply_update(NodeId(2), &update(&[(1, 1), (2, 0), (3, 1)])));
        assert_eq!(ctx.next_hop(NodeId(3)), Some(NodeId(2)));
        assert_eq!(ctx.cost_to(NodeId(3)), 2);
    }

    #[test]
    fn equal_or_worse_path_is_ignored() {
        let ctx = triangle(1);
        assert!(!ctx.apply_update(NodeId(3), &update(&[(1, 5), (2, 1), (3, 0)])));
        assert_eq!(ctx.next_hop(NodeId(2)), Some(NodeId(2)));
        assert_eq!(ctx.cost_to(NodeId(2)), 1);
    }

    #[test]
    fn infinite_advertisement_never_overflows() {
        let ctx = triangle(1);
        assert!(!ctx.apply_update(NodeId(2), &update(&[(3, u32::MAX)])));
        assert_eq!(ctx.cost_to(NodeId(3)), 5);
    }

    #[test]
    fn non_neighbor_update_is_rejected() {
        let text = "10.0.0.1 10.0.0.2 1\n10.0.0.2 10.0.0.3 1\n";
        let topo = Topology::parse(text, [10, 0, 0, 1].into()).unwrap();
        let ctx = RoutingContext::new(&topo);
        assert!(!ctx.apply_update(NodeId(3), &update(&[(1, 1)])));
        assert_eq!(ctx.next_hop(NodeId(3)), None);
    }

    #[test]
    fn advertised_row_is_recorded() {
        let ctx = triangle(1);
        ctx.apply_update(NodeId(2), &update(&[(3, 1)]));
        assert_eq!(ctx.dv_table().cost(NodeId(2), NodeId(3)), 1);
    }

    #[test]
    fn route_change_is_published() {
        let ctx = triangle(1);
        let mut rx = ctx.subscribe();
        assert!(!ctx.apply_update(NodeId(3), &update(&[(2, 5)])));
        assert!(!rx.has_changed().unwrap());

        assert!(ctx.apply_update(NodeId(2), &update(&[(3, 1)])));
        assert!(rx.has_changed().unwrap());
        assert_eq!(*rx.borrow_and_update(), 1);
    }

    #[tokio::test]
    async fn waiter_wakes_on_route_change() {
        let ctx = std::sync::Arc::new(triangle(1));
        let mut rx = ctx.subscribe();
        let waiter = {
            let ctx = std::sync::Arc::clone(&ctx);
            tokio::spawn(async move {
                crate::state::wait_until(&mut rx, Some(std::time::Duration::from_secs(2)), |_| {
                    ctx.next_hop(NodeId(3)) == Some(NodeId(2))
                })
                .await
            })
        };
        tokio::task::yield_now().await;
        ctx.apply_update(NodeId(2), &update(&[(3, 1)]));
        assert_eq!(waiter.await.unwrap(), Some(1));
    }

    #[test]
    fn own_update_reflects_row_zero() {
        let ctx = triangle(2);
        let costs: Vec<u32> = ctx.own_update().entries.iter().map(|e| e.cost).collect();
        assert_eq!(costs, vec![1, 0, 1]);
    }
}
