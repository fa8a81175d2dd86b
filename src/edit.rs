//! Edits on a [`MapDataStore`].
//!
//! Every public operation here is atomic once started: it validates its
//! arguments, records the pre-edit state of each object it is about to
//! change, mutates, and finally settles dirty state so objects that ended up
//! back at their upstream content are clean again.

pub mod delete;
pub mod merge;
pub mod reverse;
pub mod split;

use crate::data::osm::{Member, Node, ObjectKind, ObjectRef, OsmId, Pos, Relation, Way};
use crate::data::tags::TagSet;
use crate::data::MapDataStore;
use crate::errors::{Error, Result};

pub use delete::{delete_node, delete_object, delete_relation, delete_way};
pub use merge::{merge_nodes, merge_ways, MergeNodesOutcome, MergeWaysOutcome};
pub use reverse::{reverse_way, ReverseOutcome};
pub use split::split_way;

pub(crate) fn live_node(store: &MapDataStore, id: OsmId) -> Result<&Node> {
    match store.node(id) {
        Some(node) if !node.attrs.is_deleted() => Ok(node),
        Some(_) => Err(Error::new(format!("node #{id} is deleted"))),
        None => Err(Error::new(format!("node #{id} not found"))),
    }
}

pub(crate) fn live_way(store: &MapDataStore, id: OsmId) -> Result<&Way> {
    match store.way(id) {
        Some(way) if !way.attrs.is_deleted() => Ok(way),
        Some(_) => Err(Error::new(format!("way #{id} is deleted"))),
        None => Err(Error::new(format!("way #{id} not found"))),
    }
}

pub(crate) fn live_relation(store: &MapDataStore, id: OsmId) -> Result<&Relation> {
    match store.relation(id) {
        Some(relation) if !relation.attrs.is_deleted() => Ok(relation),
        Some(_) => Err(Error::new(format!("relation #{id} is deleted"))),
        None => Err(Error::new(format!("relation #{id} not found"))),
    }
}

pub fn move_node(store: &mut MapDataStore, id: OsmId, pos: Pos) -> Result<()> {
    live_node(store, id)?;
    if !pos.is_valid() {
        return Err(format!("invalid position {}, {}", pos.lat, pos.lon).into());
    }
    store.touch(ObjectKind::Node, id);
    if let Some(node) = store.node_mut(id) {
        node.set_pos(pos);
    }
    store.settle();
    Ok(())
}

/// Replaces all tags of a live object.
pub fn set_tags(store: &mut MapDataStore, object: &ObjectRef, tags: TagSet) -> Result<()> {
    let id = object.id();
    let kind = object.kind();
    match kind {
        ObjectKind::Node => { live_node(store, id)?; },
        ObjectKind::Way => { live_way(store, id)?; },
        ObjectKind::Relation => { live_relation(store, id)?; },
    }
    store.touch(kind, id);
    match kind {
        ObjectKind::Node => if let Some(node) = store.node_mut(id) {
            node.tags.replace(tags);
        },
        ObjectKind::Way => if let Some(way) = store.way_mut(id) {
            way.tags.replace(tags);
        },
        ObjectKind::Relation => if let Some(relation) = store.relation_mut(id) {
            relation.tags.replace(tags);
        },
    }
    store.settle();
    Ok(())
}

/// Appends a node to the end of a way, as when extending it while drawing.
pub fn way_append_node(store: &mut MapDataStore, way: OsmId, node: OsmId) -> Result<()> {
    live_node(store, node)?;
    let mut chain = live_way(store, way)?.chain.clone();
    if chain.last() == Some(&node) {
        return Err(format!("node #{node} already ends way #{way}").into());
    }
    chain.push(node);
    store.touch(ObjectKind::Way, way);
    store.set_way_chain(way, chain);
    store.settle();
    Ok(())
}

/// Inserts a member at `position`, or appends it.
pub fn relation_add_member(store: &mut MapDataStore, relation: OsmId, member: Member, position: Option<usize>) -> Result<()> {
    let len = live_relation(store, relation)?.members.len();
    let at = position.unwrap_or(len);
    if at > len {
        return Err(format!("member position {at} out of range for relation #{relation}").into());
    }
    let member = Member {
        object: store.resolve(member.object.kind(), member.object.id()),
        role: member.role,
    };
    store.touch(ObjectKind::Relation, relation);
    if let Some(rel) = store.relation_mut(relation) {
        rel.members.insert(at, member);
    }
    store.settle();
    Ok(())
}

pub fn relation_remove_member(store: &mut MapDataStore, relation: OsmId, index: usize) -> Result<Member> {
    let len = live_relation(store, relation)?.members.len();
    if index >= len {
        return Err(format!("member index {index} out of range for relation #{relation}").into());
    }
    store.touch(ObjectKind::Relation, relation);
    let removed = match store.relation_mut(relation) {
        Some(rel) => rel.members.remove(index),
        None => return Err(format!("relation #{relation} not found").into()),
    };
    store.settle();
    Ok(removed)
}
