//! Distance-vector table.
//!
//! Row 0 is this node's own vector: the best cost it currently believes to
//! every destination. The remaining rows hold the vector each neighbor last
//! advertised. Every row covers the full, fixed node set of the topology.
//!
//! ```text
//!            dest:  1     2     3     4
//!   row 0 (me=1)    0     1     3   999
//!   row 1 (nbr 2)   1     0     2   999
//!   row 2 (nbr 3) 999   999   999   999   ← nothing heard yet
//! ```

use std::collections::BTreeMap;
use std::fmt;

use crate::config::INFINITE_COST;
use crate::id::NodeId;
use crate::nbr_cost::NeighborCostTable;
use crate::packet::{RouteEntry, RouteUpdate};

#[derive(Debug, Clone)]
struct DvRow {
    source: NodeId,
    costs: BTreeMap<NodeId, u32>,
}

#[derive(Debug, Clone)]
pub struct DvTable {
    rows: Vec<DvRow>,
}

impl DvTable {
    /// Row 0 starts at the direct link costs (0 to itself); neighbor rows
    /// start at infinity.
    pub fn new(me: NodeId, nodes: &[NodeId], neighbors: &NeighborCostTable) -> Self {
        let own = nodes
            .iter()
            .map(|&dest| {
                let cost = if dest == me { 0 } else { neighbors.cost(dest) };
                (dest, cost)
            })
            .collect();
        let mut rows = vec![DvRow { source: me, costs: own }];
        rows.extend(neighbors.neighbors().map(|nbr| DvRow {
            source: nbr,
            costs: nodes.iter().map(|&dest| (dest, INFINITE_COST)).collect(),
        }));
        Self { rows }
    }

    pub fn me(&self) -> NodeId {
        self.rows[0].source
    }

    fn row_mut(&mut self, source: NodeId) -> Option<&mut DvRow> {
        self.rows.iter_mut().find(|row| row.source == source)
    }

    /// Cost `from` → `to`, or [`INFINITE_COST`] if either is unknown.
    pub fn cost(&self, from: NodeId, to: NodeId) -> u32 {
        self.rows
            .iter()
            .find(|row| row.source == from)
            .and_then(|row| row.costs.get(&to))
            .copied()
            .unwrap_or(INFINITE_COST)
    }

    /// Set one known cell. Returns `false` when `from` or `to` is unknown.
    pub fn set_cost(&mut self, from: NodeId, to: NodeId, cost: u32) -> bool {
        match self.row_mut(from).and_then(|row| row.costs.get_mut(&to)) {
            Some(cell) => {
                *cell = cost;
                true
            }
            None => false,
        }
    }

    /// Overwrite a neighbor's row with its advertised vector. Entries for
    /// nodes outside the topology are ignored. Returns `false` if `from` is
    /// not a neighbor.
    pub fn record_advertisement(&mut self, from: NodeId, update: &RouteUpdate) -> bool {
        if from == self.me() {
            return false;
        }
        let Some(row) = self.row_mut(from) else {
            return false;
        };
        for entry in &update.entries {
            if let Some(cell) = row.costs.get_mut(&entry.node) {
                *cell = entry.cost.min(INFINITE_COST);
            }
        }
        true
    }

    /// This node's own vector, ready to advertise.
    pub fn own_vector(&self) -> RouteUpdate {
        RouteUpdate {
            entries: self.rows[0]
                .costs
                .iter()
                .map(|(&node, &cost)| RouteEntry { node, cost })
                .collect(),
        }
    }
}

impl fmt::Display for DvTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "distance vector table of node {}:", self.me())?;
        write!(f, "{:>6}", "from")?;
        for dest in self.rows[0].costs.keys() {
            write!(f, " {:>5}", dest)?;
        }
        writeln!(f)?;
        for row in &self.rows {
            write!(f, "{:>6}", row.source)?;
            for cost in row.costs.values() {
                write!(f, " {:>5}", cost)?;
            }
            writeln!(f)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(raw: &[u32]) -> Vec<NodeId> {
        raw.iter().map(|&n| NodeId(n)).collect()
    }

    fn table() -> DvTable {
        let nct = NeighborCostTable::new(NodeId(1), [(NodeId(2), 1), (NodeId(3), 5)]);
        DvTable::new(NodeId(1), &ids(&[1, 2, 3, 4]), &nct)
    }

    #[test]
    fn initial_rows() {
        let dv = table();
        assert_eq!(dv.cost(NodeId(1), NodeId(1)), 0);
        assert_eq!(dv.cost(NodeId(1), NodeId(2)), 1);
        assert_eq!(dv.cost(NodeId(1), NodeId(3)), 5);
        assert_eq!(dv.cost(NodeId(1), NodeId(4)), INFINITE_COST);
        assert_eq!(dv.cost(NodeId(2), NodeId(2)), INFINITE_COST);
    }

    #[test]
    fn advertisement_overwrites_neighbor_row_only() {
        let mut dv = table();
        let update = RouteUpdate {
            entries: vec![
                RouteEntry { node: NodeId(3), cost: 1 },
                RouteEntry { node: NodeId(77), cost: 1 },
            ],
        };
        assert!(dv.record_advertisement(NodeId(2), &update));
        assert_eq!(dv.cost(NodeId(2), NodeId(3)), 1);
        assert_eq!(dv.cost(NodeId(1), NodeId(3)), 5);
        assert!(!dv.record_advertisement(NodeId(4), &update));
    }

    #[test]
    fn set_cost_rejects_unknown_cells() {
        let mut dv = table();
        assert!(dv.set_cost(NodeId(1), NodeId(4), 9));
        assert_eq!(dv.cost(NodeId(1), NodeId(4)), 9);
        assert!(!dv.set_cost(NodeId(1), NodeId(8), 9));
        assert!(!dv.set_cost(NodeId(8), NodeId(1), 9));
    }

    #[test]
    fn own_vector_covers_every_node() {
        let update = table().own_vector();
        assert_eq!(update.entries.len(), 4);
        assert_eq!(update.entries[0], RouteEntry { node: NodeId(1), cost: 0 });
    }

    #[test]
    fn display_has_one_line_per_row_plus_headers() {
        assert_eq!(table().to_string().lines().count(), 2 + 3);
    }
}
