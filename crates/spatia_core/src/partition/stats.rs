//! Partition statistics.

use tracing::info;

use crate::voxel::TreeStats;

/// Snapshot of a partition's occupancy, for capacity tuning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionStats {
    /// Live handles.
    pub handles: usize,
    /// Mutations waiting for the outermost query to finish.
    pub pending_mutations: usize,
    /// Per-tree counters, in configuration order.
    pub trees: Vec<TreeStats>,
}

impl PartitionStats {
    /// Entities linked into any tree, counted once per tree.
    #[must_use]
    pub fn linked_entities(&self) -> usize {
        self.trees.iter().map(|t| t.entities).sum()
    }

    /// Writes the snapshot to the log, one line per non-empty level.
    pub fn log(&self) {
        info!(
            handles = self.handles,
            pending = self.pending_mutations,
            trees = self.trees.len(),
            "spatial partition stats"
        );
        for tree in &self.trees {
            info!(tree = %tree.name, entities = tree.entities, links = tree.links(), "tree");
            for level in tree.levels.iter().filter(|l| l.links > 0) {
                info!(
                    tree = %tree.name,
                    level = level.level,
                    cell_size = level.cell_size,
                    voxels = level.occupied_voxels,
                    links = level.links,
                    "level"
                );
            }
        }
    }
}
