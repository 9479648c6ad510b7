//! Edge index: element id -> connect lines, built once per graph snapshot.

use crate::pipeline::connect_line::ConnectLine;
use crate::pipeline::graph::{Graph, SnapshotId};
use crate::pipeline::id::ElementId;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

/// Read-only adjacency for one snapshot.
///
/// Outgoing lines keep graph insertion order and duplicates. Incoming lines
/// are ordered by `index` (stable for equal indices), which is the order join
/// operators consume their inputs in.
#[derive(Debug, Default)]
pub struct EdgeIndex {
    snapshot: Option<SnapshotId>,
    outgoing: HashMap<ElementId, Vec<ConnectLine>>,
    incoming: HashMap<ElementId, Vec<ConnectLine>>,
}

impl EdgeIndex {
    pub fn build(graph: &Graph) -> Self {
        let mut outgoing: HashMap<ElementId, Vec<ConnectLine>> = HashMap::new();
        let mut incoming: HashMap<ElementId, Vec<ConnectLine>> = HashMap::new();

        for line in graph.connect_lines() {
            outgoing
                .entry(line.source_id().clone())
                .or_default()
                .push(line.clone());
            incoming
                .entry(line.target_id().clone())
                .or_default()
                .push(line.clone());
        }

        for lines in incoming.values_mut() {
            lines.sort_by_key(|l| l.index);
        }

        Self {
            snapshot: Some(graph.snapshot_id()),
            outgoing,
            incoming,
        }
    }

    pub fn snapshot(&self) -> Option<SnapshotId> {
        self.snapshot
    }

    pub fn outgoing(&self, id: &ElementId) -> &[ConnectLine] {
        self.outgoing.get(id).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn incoming(&self, id: &ElementId) -> &[ConnectLine] {
        self.incoming.get(id).map(Vec::as_slice).unwrap_or(&[])
    }

    /// The whole outgoing map, as exposed to external consumers.
    pub fn outgoing_map(&self) -> &HashMap<ElementId, Vec<ConnectLine>> {
        &self.outgoing
    }
}

/// Caches the edge index of the most recent snapshot.
///
/// Keyed by [`SnapshotId`]; a graph mutation (new generation) or a different
/// graph causes a rebuild on the next lookup.
#[derive(Debug, Default)]
pub struct EdgeIndexCache {
    cached: RwLock<Option<Arc<EdgeIndex>>>,
}

impl EdgeIndexCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn index_for(&self, graph: &Graph) -> Arc<EdgeIndex> {
        let wanted = graph.snapshot_id();
        {
            let cached = self.cached.read().unwrap_or_else(PoisonError::into_inner);
            if let Some(index) = cached.as_ref() {
                if index.snapshot() == Some(wanted) {
                    return index.clone();
                }
            }
        }

        let index = Arc::new(EdgeIndex::build(graph));
        tracing::debug!(
            "Edge index rebuilt for generation {} ({} sources)",
            wanted.generation,
            index.outgoing.len()
        );
        *self.cached.write().unwrap_or_else(PoisonError::into_inner) = Some(index.clone());
        index
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::element::{Element, ElementType};

    fn fan_out_graph() -> Graph {
        let mut g = Graph::new();
        g.add_element(Element::new("src", ElementType::Of))
            .add_element(Element::new("m", ElementType::Merge))
            .add_element(Element::new("r", ElementType::Result))
            .add_connect_line(ConnectLine::pipe("l1", "src", "m").with_index(1))
            .add_connect_line(ConnectLine::pipe("l2", "src", "m").with_index(0))
            .add_connect_line(ConnectLine::subscribe("l3", "m", "r"));
        g
    }

    #[test]
    fn test_outgoing_keeps_duplicates_in_order() {
        let g = fan_out_graph();
        let index = EdgeIndex::build(&g);
        let ids: Vec<_> = index
            .outgoing(&ElementId::from("src"))
            .iter()
            .map(|l| l.id.as_str())
            .collect();
        assert_eq!(ids, vec!["l1", "l2"]);
    }

    #[test]
    fn test_incoming_sorted_by_index() {
        let g = fan_out_graph();
        let index = EdgeIndex::build(&g);
        let ids: Vec<_> = index
            .incoming(&ElementId::from("m"))
            .iter()
            .map(|l| l.id.as_str())
            .collect();
        assert_eq!(ids, vec!["l2", "l1"]);
        assert!(index.outgoing(&ElementId::from("r")).is_empty());
    }

    #[test]
    fn test_cache_reuses_until_mutation() {
        let mut g = fan_out_graph();
        let cache = EdgeIndexCache::new();
        let a = cache.index_for(&g);
        let b = cache.index_for(&g);
        assert!(Arc::ptr_eq(&a, &b));

        g.add_element(Element::new("extra", ElementType::Result));
        let c = cache.index_for(&g);
        assert!(!Arc::ptr_eq(&a, &c));
        assert_eq!(c.snapshot(), Some(g.snapshot_id()));
    }
}
