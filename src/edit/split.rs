use log::debug;

use crate::data::osm::{Member, ObjectFlags, ObjectKind, ObjectRef, OsmId};
use crate::data::MapDataStore;
use crate::errors::Result;

use super::delete::{has_fewer_than_two_distinct, remove_if_orphan, remove_way};
use super::{live_node, live_way};

/// Splits a way in two at the node at position `index` and returns the id
/// of the newly created way.
///
/// With `at_node` set the boundary node is shared: it ends the first half
/// and starts the second. Otherwise the second half starts at a new copy of
/// the boundary node (same position and tags), so the halves are
/// disconnected. A closed way cut at its closing node is rotated first so
/// the cut is interior.
///
/// The original way keeps the first half. Relations holding the original get
/// the new way as an extra member with the same role right after it.
/// Returns `None` when the cut is at an end of the way or when one half ends
/// up with fewer than two nodes and is dropped instead.
pub fn split_way(store: &mut MapDataStore, way_id: OsmId, index: usize, at_node: bool) -> Result<Option<OsmId>> {
    let way = live_way(store, way_id)?;
    let mut chain = way.chain.clone();
    let len = chain.len();
    if index >= len {
        return Err(format!("split index {index} out of range for way #{way_id} with {len} nodes").into());
    }

    let mut cut = index;
    if way.is_closed() && (cut == 0 || cut == len - 1) {
        chain.pop();
        chain.rotate_left(1);
        chain.push(chain[0]);
        cut = len - 2;
    }
    if cut == 0 || cut == len - 1 {
        return Ok(None);
    }
    let first = chain[..=cut].to_vec();
    let mut second = chain[cut..].to_vec();
    let tags = way.tags.clone();
    let hidden = way.attrs.is_hidden();

    let first_ok = !has_fewer_than_two_distinct(&first);
    let second_ok = !has_fewer_than_two_distinct(&second);
    if first_ok && second_ok && !at_node {
        let boundary = live_node(store, second[0])?;
        let mut copy = store.node_new(boundary.pos());
        copy.tags = boundary.tags.clone();
        second[0] = store.attach_node(copy)?;
    }
    store.touch(ObjectKind::Way, way_id);

    if !(first_ok && second_ok) {
        debug!(way_id = way_id, index = index; "Split leaves a degenerate half");
        let kept = if first_ok { first } else if second_ok { second } else { Vec::new() };
        store.set_way_chain(way_id, kept.clone());
        if kept.is_empty() {
            remove_way(store, way_id);
        }
        for node_id in chain {
            if !kept.contains(&node_id) {
                remove_if_orphan(store, node_id);
            }
        }
        store.settle();
        return Ok(None);
    }

    store.set_way_chain(way_id, first);
    let mut new_way = store.way_new();
    new_way.chain = second;
    new_way.tags = tags;
    new_way.attrs.flags.set(ObjectFlags::HIDDEN, hidden);
    let new_id = store.attach_way(new_way)?;

    let original = ObjectRef::Way(way_id);
    for rel_id in store.relations_of(&original) {
        store.touch(ObjectKind::Relation, rel_id);
        let Some(relation) = store.relation_mut(rel_id) else { continue };
        let mut i = 0;
        while i < relation.members.len() {
            if relation.members[i].object == original {
                let member = Member {
                    object: ObjectRef::Way(new_id),
                    role: relation.members[i].role.clone(),
                };
                relation.members.insert(i + 1, member);
                i += 2;
            } else {
                i += 1;
            }
        }
    }

    store.settle();
    debug!(way_id = way_id, new_way_id = new_id; "Split way");
    Ok(Some(new_id))
}
