//! Delete cascades.
//!
//! Objects created locally (negative id) are erased outright. Objects the
//! server knows about stay behind as `DELETED` stubs with their content
//! cleared, so the deletion can be uploaded later.

use log::debug;

use crate::data::osm::{ObjectFlags, ObjectKind, ObjectRef, OsmId};
use crate::data::MapDataStore;
use crate::errors::Result;

use super::{live_node, live_relation, live_way};

pub fn delete_node(store: &mut MapDataStore, id: OsmId) -> Result<()> {
    live_node(store, id)?;
    remove_node(store, id);
    store.settle();
    Ok(())
}

pub fn delete_way(store: &mut MapDataStore, id: OsmId) -> Result<()> {
    live_way(store, id)?;
    remove_way(store, id);
    store.settle();
    Ok(())
}

pub fn delete_relation(store: &mut MapDataStore, id: OsmId) -> Result<()> {
    live_relation(store, id)?;
    remove_relation(store, id);
    store.settle();
    Ok(())
}

pub fn delete_object(store: &mut MapDataStore, object: &ObjectRef) -> Result<()> {
    match object.kind() {
        ObjectKind::Node => delete_node(store, object.id()),
        ObjectKind::Way => delete_way(store, object.id()),
        ObjectKind::Relation => delete_relation(store, object.id()),
    }
}

/// Chain of a way with every occurrence of `node` taken out.
fn chain_without(chain: &[OsmId], node: OsmId, closed: bool) -> Vec<OsmId> {
    let mut result: Vec<OsmId> = chain.iter().copied().filter(|id| *id != node).collect();
    result.dedup();
    if closed && result.first() != result.last() {
        let mut distinct = result.clone();
        distinct.sort_unstable();
        distinct.dedup();
        if distinct.len() >= 3 {
            result.push(result[0]);
        }
    }
    result
}

pub(crate) fn has_fewer_than_two_distinct(chain: &[OsmId]) -> bool {
    match chain.first() {
        Some(first) => chain.iter().all(|id| id == first),
        None => true,
    }
}

/// Removes a node from every way and relation, then erases it or leaves a
/// deleted stub. Ways that drop below two distinct nodes go too.
pub(crate) fn remove_node(store: &mut MapDataStore, id: OsmId) {
    for way_id in store.ways_of_node(id) {
        let Some(way) = store.way(way_id) else { continue };
        let chain = chain_without(&way.chain, id, way.is_closed());
        store.touch(ObjectKind::Way, way_id);
        store.set_way_chain(way_id, chain.clone());
        if has_fewer_than_two_distinct(&chain) {
            debug!(way_id = way_id, node_id = id; "Way degenerated by node removal");
            remove_way(store, way_id);
        }
    }
    store.remove_from_relations(&ObjectRef::Node(id));

    let is_new = match store.node(id) {
        Some(node) => node.attrs.is_new() || id < 0,
        None => return,
    };
    if is_new {
        store.erase_node(id);
    } else {
        store.touch(ObjectKind::Node, id);
        if let Some(node) = store.node_mut(id) {
            node.attrs.flags.insert(ObjectFlags::DELETED);
            node.tags.clear();
        }
    }
}

/// Deletes a node that nothing refers to any more and that carries no
/// tags worth keeping.
pub(crate) fn remove_if_orphan(store: &mut MapDataStore, id: OsmId) -> bool {
    let orphan = match store.node(id) {
        Some(node) => !node.attrs.is_deleted()
            && node.ways == 0
            && !node.tags.has_real_tags(store.policy()),
        None => false,
    };
    if !orphan || !store.relations_of(&ObjectRef::Node(id)).is_empty() {
        return false;
    }
    remove_node(store, id);
    true
}

pub(crate) fn remove_way(store: &mut MapDataStore, id: OsmId) {
    remove_way_keeping(store, id, &[]);
}

/// Like [`remove_way`], but never treats the nodes in `keep` as orphans.
pub(crate) fn remove_way_keeping(store: &mut MapDataStore, id: OsmId, keep: &[OsmId]) {
    let Some(way) = store.way(id) else { return };
    let mut nodes = way.chain.clone();
    let is_new = way.attrs.is_new() || id < 0;
    nodes.sort_unstable();
    nodes.dedup();

    store.touch(ObjectKind::Way, id);
    store.set_way_chain(id, Vec::new());
    store.remove_from_relations(&ObjectRef::Way(id));
    if is_new {
        store.erase_way(id);
    } else if let Some(way) = store.way_mut(id) {
        way.attrs.flags.insert(ObjectFlags::DELETED);
        way.tags.clear();
    }

    for node_id in nodes.into_iter().filter(|n| !keep.contains(n)) {
        remove_if_orphan(store, node_id);
    }
}

pub(crate) fn remove_relation(store: &mut MapDataStore, id: OsmId) {
    let is_new = match store.relation(id) {
        Some(relation) => relation.attrs.is_new() || id < 0,
        None => return,
    };
    store.remove_from_relations(&ObjectRef::Relation(id));
    if is_new {
        store.erase_relation(id);
    } else {
        store.touch(ObjectKind::Relation, id);
        if let Some(relation) = store.relation_mut(id) {
            relation.attrs.flags.insert(ObjectFlags::DELETED);
            relation.members.clear();
            relation.tags.clear();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::osm::{Member, Pos};
    use crate::data::tags::TagSet;
    use crate::data::tests::{store_with_nodes, upstream_way};

    #[test]
    fn deleting_way_erases_new_untagged_orphans() {
        let mut store = store_with_nodes(1);
        let a = store.attach_node(store.node_new(Pos::new(1.0, 1.0))).unwrap();
        let mut tagged = store.node_new(Pos::new(1.0, 2.0));
        tagged.tags.insert("amenity", "bench");
        let b = store.attach_node(tagged).unwrap();
        let mut way = store.way_new();
        way.chain = vec![a, b, 1];
        let w = store.attach_way(way).unwrap();

        delete_way(&mut store, w).unwrap();
        assert!(store.way(w).is_none());
        assert!(store.node(a).is_none());
        assert!(store.node(b).is_some());
        // last reference to a server node leaves a deleted stub
        let stub = store.node(1).unwrap();
        assert!(stub.attrs.is_deleted());
        assert!(store.original_object(&ObjectRef::Node(1)).is_some());
    }

    #[test]
    fn shared_nodes_survive_way_delete() {
        let mut store = store_with_nodes(3);
        store.attach_way(upstream_way(10, &[1, 2])).unwrap();
        store.attach_way(upstream_way(11, &[2, 3])).unwrap();
        delete_way(&mut store, 10).unwrap();
        assert!(store.way(10).unwrap().attrs.is_deleted());
        assert!(store.way(10).unwrap().chain.is_empty());
        assert!(store.node(1).unwrap().attrs.is_deleted());
        assert!(!store.node(2).unwrap().attrs.is_deleted());
        assert_eq!(store.node(2).unwrap().ways, 1);
        assert!(delete_way(&mut store, 10).is_err());
    }

    #[test]
    fn deleting_node_degenerates_two_node_way() {
        let mut store = store_with_nodes(3);
        store.attach_way(upstream_way(10, &[1, 2])).unwrap();
        store.attach_way(upstream_way(11, &[2, 3, 1])).unwrap();
        delete_node(&mut store, 2).unwrap();

        assert!(store.node(2).unwrap().attrs.is_deleted());
        assert!(store.way(10).unwrap().attrs.is_deleted());
        assert_eq!(store.way(11).unwrap().chain, vec![3, 1]);
        assert!(store.way(11).unwrap().attrs.is_dirty());
        // node 1 is still used by way 11
        assert!(!store.node(1).unwrap().attrs.is_deleted());
    }

    #[test]
    fn deleting_node_recloses_rings() {
        let mut store = store_with_nodes(4);
        store.attach_way(upstream_way(10, &[1, 2, 3, 4, 1])).unwrap();
        delete_node(&mut store, 1).unwrap();
        assert_eq!(store.way(10).unwrap().chain, vec![2, 3, 4, 2]);
        assert_eq!(store.node(2).unwrap().ways, 2);
    }

    #[test]
    fn new_node_is_erased_and_dropped_from_relations() {
        let mut store = store_with_nodes(0);
        let mut node = store.node_new(Pos::new(0.0, 0.0));
        node.tags = TagSet::from_pairs([("highway", "bus_stop")]);
        let n = store.attach_node(node).unwrap();
        let mut rel = store.relation_new();
        rel.members.push(Member::new(ObjectRef::Node(n), Some("stop")));
        let r = store.attach_relation(rel).unwrap();

        delete_node(&mut store, n).unwrap();
        assert!(store.node(n).is_none());
        assert!(store.relation(r).unwrap().members.is_empty());
    }

    #[test]
    fn deleted_relation_is_a_stub() {
        let mut store = store_with_nodes(1);
        let mut rel = crate::data::osm::Relation::new();
        rel.attrs.id = 30;
        rel.members.push(Member::new(ObjectRef::Node(1), None));
        store.attach_relation(rel).unwrap();
        delete_object(&mut store, &ObjectRef::Relation(30)).unwrap();
        let stub = store.relation(30).unwrap();
        assert!(stub.attrs.is_deleted());
        assert!(stub.members.is_empty());
        // members are not cascaded
        assert!(!store.node(1).unwrap().attrs.is_deleted());
    }
}
