//! Shadow copies of objects as they were before the first local edit.

use std::collections::HashMap;

use super::osm::{Node, ObjectKind, ObjectRef, OsmId, Relation, Way};

/// Borrowed view of a snapshot, whatever its kind.
#[derive(Debug, Clone, Copy)]
pub enum OriginalObject<'a> {
    Node(&'a Node),
    Way(&'a Way),
    Relation(&'a Relation),
}

#[derive(Debug, Default, Clone)]
pub struct OriginalSnapshotStore {
    nodes: HashMap<OsmId, Node>,
    ways: HashMap<OsmId, Way>,
    relations: HashMap<OsmId, Relation>,
}

impl OriginalSnapshotStore {
    pub fn new() -> Self {
        OriginalSnapshotStore::default()
    }

    pub fn len(&self) -> usize {
        self.nodes.len() + self.ways.len() + self.relations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, kind: ObjectKind, id: OsmId) -> bool {
        match kind {
            ObjectKind::Node => self.nodes.contains_key(&id),
            ObjectKind::Way => self.ways.contains_key(&id),
            ObjectKind::Relation => self.relations.contains_key(&id),
        }
    }

    /// Only the first snapshot of an object is kept.
    pub fn snapshot_node(&mut self, node: &Node) {
        self.nodes.entry(node.id()).or_insert_with(|| node.clone());
    }

    pub fn snapshot_way(&mut self, way: &Way) {
        self.ways.entry(way.id()).or_insert_with(|| way.clone());
    }

    pub fn snapshot_relation(&mut self, relation: &Relation) {
        self.relations.entry(relation.id()).or_insert_with(|| relation.clone());
    }

    pub fn node(&self, id: OsmId) -> Option<&Node> {
        self.nodes.get(&id)
    }

    pub fn way(&self, id: OsmId) -> Option<&Way> {
        self.ways.get(&id)
    }

    pub fn relation(&self, id: OsmId) -> Option<&Relation> {
        self.relations.get(&id)
    }

    pub fn get(&self, object: &ObjectRef) -> Option<OriginalObject<'_>> {
        match object.kind() {
            ObjectKind::Node => self.node(object.id()).map(OriginalObject::Node),
            ObjectKind::Way => self.way(object.id()).map(OriginalObject::Way),
            ObjectKind::Relation => self.relation(object.id()).map(OriginalObject::Relation),
        }
    }

    pub fn drop_snapshot(&mut self, kind: ObjectKind, id: OsmId) -> bool {
        match kind {
            ObjectKind::Node => self.nodes.remove(&id).is_some(),
            ObjectKind::Way => self.ways.remove(&id).is_some(),
            ObjectKind::Relation => self.relations.remove(&id).is_some(),
        }
    }

    pub fn clear(&mut self) {
        self.nodes.clear();
        self.ways.clear();
        self.relations.clear();
    }
}

/// Counts of edited objects of one kind.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DirtyCounts {
    pub total: usize,
    pub added: usize,
    pub modified: usize,
    pub deleted: usize,
    pub hidden: usize,
}

impl DirtyCounts {
    pub fn changed(&self) -> usize {
        self.added + self.modified + self.deleted
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DirtySummary {
    pub nodes: DirtyCounts,
    pub ways: DirtyCounts,
    pub relations: DirtyCounts,
}

impl DirtySummary {
    pub fn is_empty(&self) -> bool {
        self.nodes.changed() + self.ways.changed() + self.relations.changed() == 0
    }
}
