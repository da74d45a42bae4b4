//! In-memory chunk index shared by the embedded backends.
//!
//! Mirrors the relational layout: the global log keyed by position plus
//! two per-partition uniqueness maps. The memory backend holds one of
//! these behind a mutex as its entire state; the file backend rebuilds one
//! from the log on open and keeps it in step with every durable write.

use std::collections::{BTreeMap, HashMap};

use crate::store::{Chunk, Index, Position};

/// Which uniqueness constraint an insert would violate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ConflictKind {
    Operation,
    Index,
}

#[derive(Debug, Default)]
pub(crate) struct ChunkIndex {
    /// Committed chunks by global position.
    log: BTreeMap<Position, Chunk>,
    /// partition id -> index -> position.
    partitions: HashMap<String, BTreeMap<Index, Position>>,
    /// (partition id, operation id) -> position.
    operations: HashMap<(String, String), Position>,
}

impl ChunkIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate both constraints without mutating anything. The operation
    /// id is checked first so an idempotent retry of an explicit-index
    /// write reports "already applied", not an index conflict.
    pub fn check(&self, partition_id: &str, index: Index, operation_id: &str) -> Option<ConflictKind> {
        if self
            .operations
            .contains_key(&(partition_id.to_string(), operation_id.to_string()))
        {
            return Some(ConflictKind::Operation);
        }
        if self
            .partitions
            .get(partition_id)
            .is_some_and(|p| p.contains_key(&index))
        {
            return Some(ConflictKind::Index);
        }
        None
    }

    /// Insert a chunk the caller has already validated.
    pub fn commit(&mut self, chunk: Chunk) {
        self.partitions
            .entry(chunk.partition_id.clone())
            .or_default()
            .insert(chunk.index, chunk.position);
        self.operations.insert(
            (chunk.partition_id.clone(), chunk.operation_id.clone()),
            chunk.position,
        );
        self.log.insert(chunk.position, chunk);
    }

    /// Highest committed index of a partition, 0 when it has none.
    pub fn last_index(&self, partition_id: &str) -> Index {
        self.partitions
            .get(partition_id)
            .and_then(|p| p.keys().next_back().copied())
            .unwrap_or(0)
    }

    /// Position of the last committed chunk, 0 for an empty log.
    pub fn last_position(&self) -> Position {
        self.log.keys().next_back().copied().unwrap_or(0)
    }

    /// Committed chunk count, fillers included.
    pub fn len(&self) -> usize {
        self.log.len()
    }

    pub fn page_forward(
        &self,
        partition_id: &str,
        from: Index,
        to: Index,
        limit: Option<usize>,
    ) -> Vec<Chunk> {
        let Some(partition) = self.partitions.get(partition_id) else {
            return Vec::new();
        };
        if from > to {
            return Vec::new();
        }
        partition
            .range(from..=to)
            .take(limit.unwrap_or(usize::MAX))
            .filter_map(|(_, position)| self.log.get(position).cloned())
            .collect()
    }

    /// Descending page from the upper bound `from` down to `to`.
    pub fn page_backward(
        &self,
        partition_id: &str,
        from: Index,
        to: Index,
        limit: Option<usize>,
    ) -> Vec<Chunk> {
        let Some(partition) = self.partitions.get(partition_id) else {
            return Vec::new();
        };
        if to > from {
            return Vec::new();
        }
        partition
            .range(to..=from)
            .rev()
            .take(limit.unwrap_or(usize::MAX))
            .filter_map(|(_, position)| self.log.get(position).cloned())
            .collect()
    }

    pub fn last_chunk(&self, partition_id: &str, max_index: Index) -> Option<Chunk> {
        let partition = self.partitions.get(partition_id)?;
        let (_, position) = partition.range(..=max_index).next_back()?;
        self.log.get(position).cloned()
    }

    pub fn page_all(&self, from_position: Position, limit: Option<usize>) -> Vec<Chunk> {
        self.log
            .range(from_position..)
            .take(limit.unwrap_or(usize::MAX))
            .map(|(_, chunk)| chunk.clone())
            .collect()
    }

    pub fn find_operation(&self, partition_id: &str, operation_id: &str) -> Option<Chunk> {
        let position = self
            .operations
            .get(&(partition_id.to_string(), operation_id.to_string()))?;
        self.log.get(position).cloned()
    }

    /// Whether a delete of the range would remove anything.
    pub fn delete_matches(&self, partition_id: &str, from: Index, to: Index) -> bool {
        from <= to
            && self
                .partitions
                .get(partition_id)
                .is_some_and(|p| p.range(from..=to).next().is_some())
    }

    /// Remove a contiguous index range, releasing both uniqueness
    /// constraints for the removed chunks. Their positions stay consumed.
    pub fn delete_range(&mut self, partition_id: &str, from: Index, to: Index) -> Vec<Chunk> {
        let Self {
            log,
            partitions,
            operations,
        } = self;
        let Some(partition) = partitions.get_mut(partition_id) else {
            return Vec::new();
        };
        if from > to {
            return Vec::new();
        }
        let doomed: Vec<(Index, Position)> = partition
            .range(from..=to)
            .map(|(index, position)| (*index, *position))
            .collect();
        let mut removed = Vec::with_capacity(doomed.len());
        for (index, position) in doomed {
            partition.remove(&index);
            if let Some(chunk) = log.remove(&position) {
                operations.remove(&(chunk.partition_id.clone(), chunk.operation_id.clone()));
                removed.push(chunk);
            }
        }
        if partition.is_empty() {
            partitions.remove(partition_id);
        }
        removed
    }

    /// Per-partition summary: (id, chunk count, last index).
    pub fn partition_stats(&self) -> Vec<(String, usize, Index)> {
        let mut stats: Vec<(String, usize, Index)> = self
            .partitions
            .iter()
            .map(|(id, p)| {
                (
                    id.clone(),
                    p.len(),
                    p.keys().next_back().copied().unwrap_or(0),
                )
            })
            .collect();
        stats.sort_by(|a, b| a.0.cmp(&b.0));
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn chunk(partition_id: &str, index: Index, position: Position) -> Chunk {
        Chunk {
            position,
            partition_id: partition_id.to_string(),
            index,
            operation_id: format!("op-{partition_id}-{index}"),
            payload: json!(index),
        }
    }

    #[test]
    fn test_operation_conflict_wins_over_index_conflict() {
        let mut index = ChunkIndex::new();
        index.commit(chunk("a", 1, 1));
        // Same index and same operation id: the operation check must win.
        assert_eq!(
            index.check("a", 1, "op-a-1"),
            Some(ConflictKind::Operation)
        );
        assert_eq!(index.check("a", 1, "fresh"), Some(ConflictKind::Index));
        assert_eq!(index.check("a", 2, "fresh"), None);
    }

    #[test]
    fn test_delete_releases_constraints_but_not_positions() {
        let mut index = ChunkIndex::new();
        index.commit(chunk("a", 1, 1));
        index.commit(chunk("a", 2, 2));
        let removed = index.delete_range("a", 1, 2);
        assert_eq!(removed.len(), 2);
        assert_eq!(index.check("a", 1, "op-a-1"), None);
        assert_eq!(index.last_index("a"), 0);
        // The log no longer holds the chunks, but last_position reflects
        // only committed chunks; the allocator owns "never reuse".
        assert_eq!(index.last_position(), 0);
    }

    #[test]
    fn test_pages_and_bounds() {
        let mut index = ChunkIndex::new();
        for i in 1..=5 {
            index.commit(chunk("a", i, i + 10));
        }
        let forward: Vec<Index> = index
            .page_forward("a", 2, 4, None)
            .iter()
            .map(|c| c.index)
            .collect();
        assert_eq!(forward, vec![2, 3, 4]);

        let backward: Vec<Index> = index
            .page_backward("a", 4, 2, Some(2))
            .iter()
            .map(|c| c.index)
            .collect();
        assert_eq!(backward, vec![4, 3]);

        assert!(index.page_forward("a", 4, 2, None).is_empty());
        assert!(index.page_forward("missing", 1, 10, None).is_empty());
        assert_eq!(index.last_chunk("a", 3).map(|c| c.index), Some(3));
        assert_eq!(index.last_chunk("a", 0), None);
    }
}
