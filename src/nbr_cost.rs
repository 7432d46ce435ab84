//! Direct link costs from this node to each neighbor.

use std::fmt;

use crate::config::INFINITE_COST;
use crate::id::NodeId;

#[derive(Debug, Clone)]
pub struct NeighborCostTable {
    me: NodeId,
    entries: Vec<(NodeId, u32)>,
}

impl NeighborCostTable {
    pub fn new(me: NodeId, entries: impl IntoIterator<Item = (NodeId, u32)>) -> Self {
        Self {
            me,
            entries: entries.into_iter().collect(),
        }
    }

    /// Link cost to `node`, or [`INFINITE_COST`] if it is not a neighbor.
    pub fn cost(&self, node: NodeId) -> u32 {
        self.entries
            .iter()
            .find(|(n, _)| *n == node)
            .map_or(INFINITE_COST, |&(_, cost)| cost)
    }

    pub fn is_neighbor(&self, node: NodeId) -> bool {
        self.entries.iter().any(|(n, _)| *n == node)
    }

    pub fn neighbors(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.entries.iter().map(|&(n, _)| n)
    }
}

impl fmt::Display for NeighborCostTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "neighbor cost table of node {}:", self.me)?;
        writeln!(f, "{:>6} {:>6}", "node", "cost")?;
        for (node, cost) in &self.entries {
            writeln!(f, "{:>6} {:>6}", node, cost)?;
        }
        Ok(())
    }
}
