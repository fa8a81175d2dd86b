use std::collections::{HashMap, HashSet};

use log::{info, warn};

use self::original::{DirtyCounts, DirtySummary, OriginalObject, OriginalSnapshotStore};
use self::osm::{BaseAttributes, Bounds, Member, Node, ObjectFlags, ObjectKind, ObjectRef, OsmId, Pos, Relation, Way};
use self::tags::TagPolicy;
use crate::errors::{Error, Result};

pub mod original;
pub mod osm;
pub mod tags;

/// Map data as parsed from an upstream download, before any local edit.

#[derive(rkyv::Archive, rkyv::Deserialize, rkyv::Serialize, Debug, Default, Clone)]
#[archive(check_bytes)]
pub struct UpstreamData {
    pub bounds: Option<Bounds>,
    pub nodes: Vec<Node>,
    pub ways: Vec<Way>,
    pub relations: Vec<Relation>,
}

/// The loaded dataset: id-indexed arenas per kind plus edit bookkeeping.
///
/// Ways reference nodes and relations reference members by id only; the
/// store owns every entity. Each node counts the way chain entries pointing
/// at it so deletes can tell when it became an orphan.
#[derive(Debug)]
pub struct MapDataStore {
    nodes: HashMap<OsmId, Node>,
    ways: HashMap<OsmId, Way>,
    relations: HashMap<OsmId, Relation>,
    bounds: Option<Bounds>,
    next_new_id: OsmId,
    originals: OriginalSnapshotStore,
    policy: TagPolicy,
    touched: Vec<(ObjectKind, OsmId)>,
}

impl Default for MapDataStore {
    fn default() -> Self {
        MapDataStore::new(TagPolicy::default())
    }
}

impl MapDataStore {
    pub fn new(policy: TagPolicy) -> Self {
        MapDataStore {
            nodes: HashMap::new(),
            ways: HashMap::new(),
            relations: HashMap::new(),
            bounds: None,
            next_new_id: -1,
            originals: OriginalSnapshotStore::new(),
            policy,
            touched: Vec::new(),
        }
    }

    /// Builds a clean store from upstream data. Way references to nodes
    /// missing from the download are dropped, relation members outside it
    /// become id-only references.
    pub fn from_upstream(data: UpstreamData, policy: TagPolicy) -> Self {
        let mut store = MapDataStore::new(policy);
        store.bounds = data.bounds;

        for mut node in data.nodes {
            node.ways = 0;
            node.attrs.flags = ObjectFlags::empty();
            store.nodes.insert(node.id(), node);
        }

        let mut dropped_refs = 0usize;
        for mut way in data.ways {
            way.attrs.flags = ObjectFlags::empty();
            let before = way.chain.len();
            way.chain.retain(|id| store.nodes.contains_key(id));
            if way.chain.len() != before {
                dropped_refs += before - way.chain.len();
                warn!(way_id = way.id(); "Way references nodes outside the download");
            }
            for node_id in &way.chain {
                if let Some(node) = store.nodes.get_mut(node_id) {
                    node.ways += 1;
                }
            }
            store.ways.insert(way.id(), way);
        }

        for mut relation in data.relations {
            relation.attrs.flags = ObjectFlags::empty();
            store.relations.insert(relation.id(), relation);
        }
        let relation_ids: HashSet<OsmId> = store.relations.keys().copied().collect();
        let nodes = &store.nodes;
        let ways = &store.ways;
        for relation in store.relations.values_mut() {
            for member in &mut relation.members {
                let id = member.object.id();
                let present = match member.object.kind() {
                    ObjectKind::Node => nodes.contains_key(&id),
                    ObjectKind::Way => ways.contains_key(&id),
                    ObjectKind::Relation => relation_ids.contains(&id),
                };
                member.object = if present {
                    ObjectRef::materialized(member.object.kind(), id)
                } else {
                    ObjectRef::id_only(member.object.kind(), id)
                };
            }
        }

        let lowest = store.nodes.keys()
            .chain(store.ways.keys())
            .chain(store.relations.keys())
            .copied()
            .min()
            .unwrap_or(0);
        store.reserve_id(lowest);

        info!(
            nodes = store.nodes.len(),
            ways = store.ways.len(),
            relations = store.relations.len(),
            dropped_refs = dropped_refs;
            "Built map data store"
        );
        store
    }

    pub fn policy(&self) -> &TagPolicy {
        &self.policy
    }

    pub fn bounds(&self) -> Option<Bounds> {
        self.bounds
    }

    pub fn set_bounds(&mut self, bounds: Bounds) {
        self.bounds = Some(bounds);
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

    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.values()
    }

    pub fn ways(&self) -> impl Iterator<Item = &Way> {
        self.ways.values()
    }

    pub fn relations(&self) -> impl Iterator<Item = &Relation> {
        self.relations.values()
    }

    pub fn contains(&self, kind: ObjectKind, id: OsmId) -> bool {
        self.attrs(kind, id).is_some()
    }

    pub fn attrs(&self, kind: ObjectKind, id: OsmId) -> Option<&BaseAttributes> {
        match kind {
            ObjectKind::Node => self.nodes.get(&id).map(|n| &n.attrs),
            ObjectKind::Way => self.ways.get(&id).map(|w| &w.attrs),
            ObjectKind::Relation => self.relations.get(&id).map(|r| &r.attrs),
        }
    }

    fn attrs_mut(&mut self, kind: ObjectKind, id: OsmId) -> Option<&mut BaseAttributes> {
        match kind {
            ObjectKind::Node => self.nodes.get_mut(&id).map(|n| &mut n.attrs),
            ObjectKind::Way => self.ways.get_mut(&id).map(|w| &mut w.attrs),
            ObjectKind::Relation => self.relations.get_mut(&id).map(|r| &mut r.attrs),
        }
    }

    /// Reference to `id`, materialized if the object is loaded.
    pub fn resolve(&self, kind: ObjectKind, id: OsmId) -> ObjectRef {
        if self.contains(kind, id) {
            ObjectRef::materialized(kind, id)
        } else {
            ObjectRef::id_only(kind, id)
        }
    }

    pub fn node_new(&self, pos: Pos) -> Node {
        Node::new(pos)
    }

    pub fn way_new(&self) -> Way {
        Way::new()
    }

    pub fn relation_new(&self) -> Relation {
        Relation::new()
    }

    pub fn allocate_id(&mut self) -> OsmId {
        let id = self.next_new_id;
        self.next_new_id -= 1;
        id
    }

    /// Makes sure `id` is never handed out by [`Self::allocate_id`].
    pub(crate) fn reserve_id(&mut self, id: OsmId) {
        if id <= self.next_new_id {
            self.next_new_id = id - 1;
        }
    }

    fn prepare_attrs(&mut self, attrs: &mut BaseAttributes) {
        if attrs.id == 0 {
            attrs.id = self.allocate_id();
        } else {
            self.reserve_id(attrs.id);
        }
        if attrs.id < 0 {
            attrs.flags.insert(ObjectFlags::NEW);
            attrs.version = 0;
        }
    }

    pub fn attach_node(&mut self, mut node: Node) -> Result<OsmId> {
        self.prepare_attrs(&mut node.attrs);
        let id = node.id();
        if self.nodes.contains_key(&id) {
            return Err(format!("node #{id} already exists").into());
        }
        node.ways = 0;
        self.nodes.insert(id, node);
        Ok(id)
    }

    pub fn attach_way(&mut self, mut way: Way) -> Result<OsmId> {
        if let Some(missing) = way.chain.iter().find(|id| !self.nodes.contains_key(id)) {
            return Err(format!("way references unknown node #{missing}").into());
        }
        self.prepare_attrs(&mut way.attrs);
        let id = way.id();
        if self.ways.contains_key(&id) {
            return Err(format!("way #{id} already exists").into());
        }
        for node_id in &way.chain {
            if let Some(node) = self.nodes.get_mut(node_id) {
                node.ways += 1;
            }
        }
        self.ways.insert(id, way);
        Ok(id)
    }

    pub fn attach_relation(&mut self, mut relation: Relation) -> Result<OsmId> {
        self.prepare_attrs(&mut relation.attrs);
        let id = relation.id();
        if self.relations.contains_key(&id) {
            return Err(format!("relation #{id} already exists").into());
        }
        for member in &mut relation.members {
            let (kind, member_id) = (member.object.kind(), member.object.id());
            member.object = if (kind, member_id) == (ObjectKind::Relation, id) || self.contains(kind, member_id) {
                ObjectRef::materialized(kind, member_id)
            } else {
                ObjectRef::id_only(kind, member_id)
            };
        }
        self.relations.insert(id, relation);
        Ok(id)
    }

    /// Snapshot of the object as it was before it was first edited.
    pub fn original_object(&self, object: &ObjectRef) -> Option<OriginalObject<'_>> {
        self.originals.get(object)
    }

    pub fn originals(&self) -> &OriginalSnapshotStore {
        &self.originals
    }

    /// Ids of live ways whose chain contains `node`.
    pub fn ways_of_node(&self, node: OsmId) -> Vec<OsmId> {
        let mut ids: Vec<OsmId> = self.ways.values()
            .filter(|w| !w.attrs.is_deleted() && w.contains_node(node))
            .map(Way::id)
            .collect();
        ids.sort_unstable();
        ids
    }

    /// Ids of live relations that have `object` as a member.
    pub fn relations_of(&self, object: &ObjectRef) -> Vec<OsmId> {
        let mut ids: Vec<OsmId> = self.relations.values()
            .filter(|r| !r.attrs.is_deleted() && r.has_member(object))
            .map(Relation::id)
            .collect();
        ids.sort_unstable();
        ids
    }

    pub fn set_way_hidden(&mut self, id: OsmId, hidden: bool) -> Result<()> {
        let way = self.ways.get_mut(&id).ok_or_else(|| Error::new(format!("way #{id} not found")))?;
        way.attrs.flags.set(ObjectFlags::HIDDEN, hidden);
        Ok(())
    }

    pub fn unhide_all(&mut self) {
        for way in self.ways.values_mut() {
            way.attrs.flags.remove(ObjectFlags::HIDDEN);
        }
    }

    pub fn dirty_summary(&self) -> DirtySummary {
        fn count<'a>(attrs: impl Iterator<Item = &'a BaseAttributes>) -> DirtyCounts {
            let mut counts = DirtyCounts::default();
            for a in attrs {
                counts.total += 1;
                if a.is_deleted() {
                    counts.deleted += 1;
                } else if a.is_new() {
                    counts.added += 1;
                } else if a.is_dirty() {
                    counts.modified += 1;
                }
                if a.is_hidden() {
                    counts.hidden += 1;
                }
            }
            counts
        }
        DirtySummary {
            nodes: count(self.nodes.values().map(|n| &n.attrs)),
            ways: count(self.ways.values().map(|w| &w.attrs)),
            relations: count(self.relations.values().map(|r| &r.attrs)),
        }
    }

    pub(crate) fn node_mut(&mut self, id: OsmId) -> Option<&mut Node> {
        self.nodes.get_mut(&id)
    }

    pub(crate) fn way_mut(&mut self, id: OsmId) -> Option<&mut Way> {
        self.ways.get_mut(&id)
    }

    pub(crate) fn relation_mut(&mut self, id: OsmId) -> Option<&mut Relation> {
        self.relations.get_mut(&id)
    }

    pub(crate) fn erase_node(&mut self, id: OsmId) -> Option<Node> {
        self.nodes.remove(&id)
    }

    pub(crate) fn erase_way(&mut self, id: OsmId) -> Option<Way> {
        self.ways.remove(&id)
    }

    pub(crate) fn erase_relation(&mut self, id: OsmId) -> Option<Relation> {
        self.relations.remove(&id)
    }

    /// Records that an object is about to change. The first time a
    /// server-known object is touched its current state is copied into the
    /// snapshot store.
    pub(crate) fn touch(&mut self, kind: ObjectKind, id: OsmId) {
        if id > 0 && !self.originals.contains(kind, id) {
            match kind {
                ObjectKind::Node => if let Some(node) = self.nodes.get(&id) {
                    self.originals.snapshot_node(node);
                },
                ObjectKind::Way => if let Some(way) = self.ways.get(&id) {
                    self.originals.snapshot_way(way);
                },
                ObjectKind::Relation => if let Some(relation) = self.relations.get(&id) {
                    self.originals.snapshot_relation(relation);
                },
            }
        }
        if let Some(attrs) = self.attrs_mut(kind, id) {
            if !attrs.is_new() {
                attrs.flags.insert(ObjectFlags::DIRTY);
            }
            self.touched.push((kind, id));
        }
    }

    /// Clears the dirty state of every touched object that ended up equal to
    /// its snapshot again.
    pub(crate) fn settle(&mut self) {
        let mut touched = std::mem::take(&mut self.touched);
        touched.sort_unstable();
        touched.dedup();
        for (kind, id) in touched {
            if id <= 0 {
                continue;
            }
            let unchanged = match kind {
                ObjectKind::Node => match (self.nodes.get(&id), self.originals.node(id)) {
                    (Some(live), Some(orig)) => live.same_content(orig, &self.policy),
                    _ => false,
                },
                ObjectKind::Way => match (self.ways.get(&id), self.originals.way(id)) {
                    (Some(live), Some(orig)) => live.same_content(orig, &self.policy),
                    _ => false,
                },
                ObjectKind::Relation => match (self.relations.get(&id), self.originals.relation(id)) {
                    (Some(live), Some(orig)) => live.same_content(orig, &self.policy),
                    _ => false,
                },
            };
            if unchanged {
                if let Some(attrs) = self.attrs_mut(kind, id) {
                    attrs.flags.remove(ObjectFlags::DIRTY);
                }
                self.originals.drop_snapshot(kind, id);
            }
        }
    }

    /// Replaces a way's chain, keeping node usage counters in step.
    pub(crate) fn set_way_chain(&mut self, way_id: OsmId, chain: Vec<OsmId>) {
        let old = match self.ways.get_mut(&way_id) {
            Some(way) => std::mem::replace(&mut way.chain, chain.clone()),
            None => return,
        };
        for node_id in old {
            if let Some(node) = self.nodes.get_mut(&node_id) {
                node.ways = node.ways.saturating_sub(1);
            }
        }
        for node_id in chain {
            if let Some(node) = self.nodes.get_mut(&node_id) {
                node.ways += 1;
            }
        }
    }

    /// Rewrites every member pointing at `from` to point at `to`, returning
    /// the relations that changed. Touches them before editing.
    pub(crate) fn repoint_members(&mut self, from: &ObjectRef, to: ObjectRef) -> Vec<OsmId> {
        let affected = self.relations_of(from);
        for rel_id in &affected {
            self.touch(ObjectKind::Relation, *rel_id);
            if let Some(relation) = self.relations.get_mut(rel_id) {
                for member in relation.members.iter_mut().filter(|m| m.object == *from) {
                    member.object = to;
                }
                relation.collapse_adjacent_members();
            }
        }
        affected
    }

    /// Materializes id-only member references whose target has been
    /// loaded since. Returns how many were resolved.
    pub fn refresh_member_refs(&mut self) -> usize {
        let present: HashSet<(ObjectKind, OsmId)> = self.nodes.keys().map(|id| (ObjectKind::Node, *id))
            .chain(self.ways.keys().map(|id| (ObjectKind::Way, *id)))
            .chain(self.relations.keys().map(|id| (ObjectKind::Relation, *id)))
            .collect();
        let mut resolved = 0;
        for relation in self.relations.values_mut() {
            for member in relation.members.iter_mut().filter(|m| !m.object.is_materialized()) {
                let (kind, id) = (member.object.kind(), member.object.id());
                if present.contains(&(kind, id)) {
                    member.object = ObjectRef::materialized(kind, id);
                    resolved += 1;
                }
            }
        }
        resolved
    }

    /// Drops every member pointing at `object` from all relations.
    pub(crate) fn remove_from_relations(&mut self, object: &ObjectRef) -> Vec<OsmId> {
        let affected = self.relations_of(object);
        for rel_id in &affected {
            self.touch(ObjectKind::Relation, *rel_id);
            if let Some(relation) = self.relations.get_mut(rel_id) {
                relation.members.retain(|m: &Member| m.object != *object);
            }
        }
        affected
    }
}
