//! Merging nodes and ways.
//!
//! In both cases an object the server already knows (positive id) outlives a
//! locally created one. Between two objects of the same kind of id the first
//! argument survives. Tag and role collisions are reported, never resolved.

use log::debug;

use crate::data::osm::{ObjectKind, ObjectRef, OsmId};
use crate::data::MapDataStore;
use crate::errors::{Error, Result};

use super::delete::{has_fewer_than_two_distinct, remove_node, remove_way, remove_way_keeping};
use super::{live_node, live_way};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeNodesOutcome {
    pub survivor: OsmId,
    pub tag_collision: bool,
    /// Two ways that now both end at the survivor, one from each side of
    /// the merge. Callers may offer to merge them next.
    pub way_candidates: Option<(OsmId, OsmId)>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeWaysOutcome {
    pub survivor: OsmId,
    pub tag_collision: bool,
    pub role_collision: bool,
}

fn pick_survivor(a: OsmId, b: OsmId) -> (OsmId, OsmId) {
    if a < 0 && b > 0 {
        (b, a)
    } else {
        (a, b)
    }
}

/// Open ways ending at `node` that do not also contain `other`. A closed
/// way touches its end node twice and is no candidate for joining.
fn ways_ending_at(store: &MapDataStore, node: OsmId, other: OsmId) -> Vec<OsmId> {
    store.ways_of_node(node)
        .into_iter()
        .filter(|id| {
            store.way(*id).is_some_and(|w| w.ends_with_node(node) && !w.is_closed() && !w.contains_node(other))
        })
        .collect()
}

pub fn merge_nodes(store: &mut MapDataStore, a: OsmId, b: OsmId) -> Result<MergeNodesOutcome> {
    if a == b {
        return Err(Error::new(format!("cannot merge node #{a} with itself")));
    }
    live_node(store, a)?;
    live_node(store, b)?;
    let (survivor, loser) = pick_survivor(a, b);

    let survivor_ends = ways_ending_at(store, survivor, loser);
    let loser_ends = ways_ending_at(store, loser, survivor);

    for way_id in store.ways_of_node(loser) {
        let Some(way) = store.way(way_id) else { continue };
        let mut chain: Vec<OsmId> = way.chain.iter()
            .map(|id| if *id == loser { survivor } else { *id })
            .collect();
        chain.dedup();
        store.touch(ObjectKind::Way, way_id);
        store.set_way_chain(way_id, chain.clone());
        if has_fewer_than_two_distinct(&chain) {
            remove_way_keeping(store, way_id, &[survivor, loser]);
        }
    }
    store.repoint_members(&ObjectRef::Node(loser), ObjectRef::Node(survivor));

    let loser_tags = live_node(store, loser)?.tags.clone();
    let mut tags = live_node(store, survivor)?.tags.clone();
    let tag_collision = tags.merge(&loser_tags, store.policy());
    store.touch(ObjectKind::Node, survivor);
    if let Some(node) = store.node_mut(survivor) {
        node.tags = tags;
    }

    let way_candidates = match (survivor_ends.as_slice(), loser_ends.as_slice()) {
        ([s], [l]) if s != l && live_way(store, *s).is_ok() && live_way(store, *l).is_ok() => Some((*s, *l)),
        _ => None,
    };

    remove_node(store, loser);
    store.settle();
    debug!(survivor = survivor, loser = loser, tag_collision = tag_collision; "Merged nodes");
    Ok(MergeNodesOutcome {
        survivor,
        tag_collision,
        way_candidates,
    })
}

/// Joined chain of the survivor `s` and the way `o` to be absorbed, or
/// `None` if they share no endpoint.
fn joined_chain(s: &[OsmId], o: &[OsmId]) -> Option<Vec<OsmId>> {
    let (s_first, s_last) = (*s.first()?, *s.last()?);
    let (o_first, o_last) = (*o.first()?, *o.last()?);
    let reversed: Vec<OsmId> = o.iter().rev().copied().collect();

    let chain = if s_last == o_first {
        s.iter().chain(&o[1..]).copied().collect()
    } else if s_last == o_last {
        s.iter().chain(&reversed[1..]).copied().collect()
    } else if s_first == o_last {
        o.iter().chain(&s[1..]).copied().collect()
    } else if s_first == o_first {
        reversed.iter().chain(&s[1..]).copied().collect()
    } else {
        return None;
    };
    Some(chain)
}

/// Points the loser's memberships at the survivor. Where a relation holds
/// both, the memberships are folded into one: an empty role yields to a
/// set one, two different set roles are kept side by side and reported.
fn fold_memberships(store: &mut MapDataStore, survivor: OsmId, loser: OsmId) -> bool {
    let loser_ref = ObjectRef::Way(loser);
    let survivor_ref = ObjectRef::Way(survivor);
    let mut role_collision = false;

    for rel_id in store.relations_of(&loser_ref) {
        store.touch(ObjectKind::Relation, rel_id);
        let Some(relation) = store.relation_mut(rel_id) else { continue };
        if !relation.has_member(&survivor_ref) {
            for member in relation.members.iter_mut().filter(|m| m.object == loser_ref) {
                member.object = survivor_ref;
            }
            relation.collapse_adjacent_members();
            continue;
        }

        let members = &mut relation.members;
        let mut i = 0;
        while i < members.len() {
            if members[i].object != loser_ref {
                i += 1;
                continue;
            }
            let role = members[i].role.clone();
            let same = members.iter().any(|m| m.object == survivor_ref && m.role == role);
            if same || role.is_none() {
                members.remove(i);
                continue;
            }
            if let Some(slot) = members.iter_mut().find(|m| m.object == survivor_ref && m.role.is_none()) {
                slot.role = role;
                members.remove(i);
                continue;
            }
            role_collision = true;
            members[i].object = survivor_ref;
            i += 1;
        }
        relation.collapse_adjacent_members();
    }
    role_collision
}

pub fn merge_ways(store: &mut MapDataStore, a: OsmId, b: OsmId) -> Result<MergeWaysOutcome> {
    if a == b {
        return Err(Error::new(format!("cannot merge way #{a} with itself")));
    }
    let (survivor, loser) = pick_survivor(a, b);
    let s_chain = live_way(store, survivor)?.chain.clone();
    let o_chain = live_way(store, loser)?.chain.clone();
    let chain = joined_chain(&s_chain, &o_chain)
        .ok_or_else(|| Error::new(format!("ways #{a} and #{b} share no endpoint")))?;

    let loser_tags = live_way(store, loser)?.tags.clone();
    let mut tags = live_way(store, survivor)?.tags.clone();
    let tag_collision = tags.merge(&loser_tags, store.policy());

    store.touch(ObjectKind::Way, survivor);
    store.set_way_chain(survivor, chain);
    if let Some(way) = store.way_mut(survivor) {
        way.tags = tags;
    }
    let role_collision = fold_memberships(store, survivor, loser);
    remove_way(store, loser);
    store.settle();

    debug!(survivor = survivor, loser = loser, tag_collision = tag_collision, role_collision = role_collision; "Merged ways");
    Ok(MergeWaysOutcome {
        survivor,
        tag_collision,
        role_collision,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::osm::{Member, Pos, Relation};
    use crate::data::tags::TagSet;
    use crate::data::tests::{store_with_nodes, upstream_way};

    #[test]
    fn server_node_survives_new_node() {
        let mut store = store_with_nodes(3);
        let mut fresh = store.node_new(Pos::new(40.0, 8.0));
        fresh.tags = TagSet::from_pairs([("barrier", "gate")]);
        let n = store.attach_node(fresh).unwrap();
        store.attach_way(upstream_way(10, &[1, 2])).unwrap();
        let mut drawn = store.way_new();
        drawn.chain = vec![3, n];
        let w = store.attach_way(drawn).unwrap();
        let before = store.node(2).unwrap().pos();

        let outcome = merge_nodes(&mut store, n, 2).unwrap();
        assert_eq!(outcome.survivor, 2);
        assert!(!outcome.tag_collision);
        assert_eq!(outcome.way_candidates, Some((10, w)));
        assert!(store.node(n).is_none());
        let survivor = store.node(2).unwrap();
        assert_eq!(survivor.pos(), before);
        assert_eq!(survivor.tags.get("barrier"), Some("gate"));
        assert_eq!(survivor.ways, 2);
        assert_eq!(store.way(w).unwrap().chain, vec![3, 2]);
    }

    #[test]
    fn server_node_survives_as_first_argument_too() {
        let mut store = store_with_nodes(2);
        let n = store.attach_node(store.node_new(Pos::new(40.0, 8.0))).unwrap();
        store.attach_way(upstream_way(10, &[1, 2])).unwrap();
        let mut drawn = store.way_new();
        drawn.chain = vec![n, 1];
        let w = store.attach_way(drawn).unwrap();

        let outcome = merge_nodes(&mut store, 2, n).unwrap();
        assert_eq!(outcome.survivor, 2);
        assert_eq!(outcome.way_candidates, Some((10, w)));
        assert!(store.node(n).is_none());
        assert_eq!(store.way(w).unwrap().chain, vec![2, 1]);
    }

    #[test]
    fn no_candidates_from_closed_or_shared_ways() {
        // closed ring ending at the survivor
        let mut store = store_with_nodes(5);
        store.attach_way(upstream_way(10, &[1, 2, 3, 1])).unwrap();
        store.attach_way(upstream_way(11, &[4, 5])).unwrap();
        let outcome = merge_nodes(&mut store, 1, 4).unwrap();
        assert_eq!(outcome.way_candidates, None);

        // one way holding both nodes
        let mut store = store_with_nodes(4);
        store.attach_way(upstream_way(10, &[1, 2, 3])).unwrap();
        store.attach_way(upstream_way(11, &[3, 4])).unwrap();
        let outcome = merge_nodes(&mut store, 1, 3).unwrap();
        assert_eq!(outcome.way_candidates, None);
    }

    #[test]
    fn no_candidates_when_one_side_has_two_ways() {
        let mut store = store_with_nodes(5);
        store.attach_way(upstream_way(10, &[2, 1])).unwrap();
        store.attach_way(upstream_way(11, &[3, 1])).unwrap();
        store.attach_way(upstream_way(12, &[4, 5])).unwrap();
        let outcome = merge_nodes(&mut store, 1, 4).unwrap();
        assert_eq!(outcome.way_candidates, None);
        assert_eq!(store.node(1).unwrap().ways, 3);
    }

    #[test]
    fn merging_neighbours_collapses_the_segment() {
        let mut store = store_with_nodes(3);
        store.attach_way(upstream_way(10, &[1, 2, 3])).unwrap();
        let outcome = merge_nodes(&mut store, 2, 3).unwrap();
        assert_eq!(outcome.survivor, 2);
        assert_eq!(outcome.way_candidates, None);
        assert_eq!(store.way(10).unwrap().chain, vec![1, 2]);
        assert!(store.node(3).unwrap().attrs.is_deleted());
        assert_eq!(store.node(2).unwrap().ways, 1);
    }

    #[test]
    fn collapsing_a_two_node_way_keeps_the_survivor() {
        let mut store = store_with_nodes(2);
        store.attach_way(upstream_way(10, &[1, 2])).unwrap();
        let outcome = merge_nodes(&mut store, 1, 2).unwrap();
        assert_eq!(outcome.survivor, 1);
        assert!(store.way(10).unwrap().attrs.is_deleted());
        assert!(!store.node(1).unwrap().attrs.is_deleted());
        assert!(store.node(2).unwrap().attrs.is_deleted());
    }

    #[test]
    fn node_merge_reports_collision_and_dedups_members() {
        let mut store = store_with_nodes(2);
        crate::edit::set_tags(&mut store, &ObjectRef::Node(1), TagSet::from_pairs([("name", "A")])).unwrap();
        crate::edit::set_tags(&mut store, &ObjectRef::Node(2), TagSet::from_pairs([("name", "B")])).unwrap();
        let mut rel = Relation::new();
        rel.attrs.id = 40;
        rel.members.push(Member::new(ObjectRef::Node(1), Some("stop")));
        rel.members.push(Member::new(ObjectRef::Node(2), Some("stop")));
        store.attach_relation(rel).unwrap();

        let outcome = merge_nodes(&mut store, 1, 2).unwrap();
        assert!(outcome.tag_collision);
        let members = &store.relation(40).unwrap().members;
        assert_eq!(members.len(), 1);
        assert_eq!(members[0].object, ObjectRef::Node(1));
    }

    #[test]
    fn ways_join_at_any_shared_endpoint() {
        assert_eq!(joined_chain(&[1, 2, 3], &[3, 4]), Some(vec![1, 2, 3, 4]));
        assert_eq!(joined_chain(&[1, 2, 3], &[4, 3]), Some(vec![1, 2, 3, 4]));
        assert_eq!(joined_chain(&[3, 4], &[1, 2, 3]), Some(vec![1, 2, 3, 4]));
        assert_eq!(joined_chain(&[3, 4], &[3, 2, 1]), Some(vec![1, 2, 3, 4]));
        assert_eq!(joined_chain(&[1, 2], &[3, 4]), None);
    }

    #[test]
    fn merge_ways_prefers_server_way_and_keeps_order() {
        let mut store = store_with_nodes(4);
        store.attach_way(upstream_way(10, &[2, 3, 4])).unwrap();
        let mut drawn = store.way_new();
        drawn.chain = vec![1, 2];
        drawn.tags = TagSet::from_pairs([("highway", "path")]);
        let w = store.attach_way(drawn).unwrap();

        let outcome = merge_ways(&mut store, w, 10).unwrap();
        assert_eq!(outcome.survivor, 10);
        assert!(!outcome.tag_collision);
        assert_eq!(store.way(10).unwrap().chain, vec![1, 2, 3, 4]);
        assert!(store.way(w).is_none());
        assert_eq!(store.node(2).unwrap().ways, 1);
        assert_eq!(store.way(10).unwrap().tags.get("highway"), Some("path"));
    }

    #[test]
    fn merge_ways_without_shared_endpoint_fails() {
        let mut store = store_with_nodes(4);
        store.attach_way(upstream_way(10, &[1, 2])).unwrap();
        store.attach_way(upstream_way(11, &[3, 4])).unwrap();
        assert!(merge_ways(&mut store, 10, 11).is_err());
        assert!(!store.way(10).unwrap().attrs.is_dirty());
    }

    #[test]
    fn different_roles_are_kept_and_reported() {
        let mut store = store_with_nodes(3);
        store.attach_way(upstream_way(10, &[1, 2])).unwrap();
        store.attach_way(upstream_way(11, &[2, 3])).unwrap();
        let mut rel = Relation::new();
        rel.attrs.id = 60;
        rel.members.push(Member::new(ObjectRef::Way(10), Some("forward")));
        rel.members.push(Member::new(ObjectRef::Way(11), Some("backward")));
        store.attach_relation(rel).unwrap();

        let outcome = merge_ways(&mut store, 10, 11).unwrap();
        assert!(outcome.role_collision);
        let roles: Vec<&str> = store.relation(60).unwrap().members.iter().map(|m| m.role()).collect();
        assert_eq!(roles, vec!["forward", "backward"]);
        assert!(store.way(11).unwrap().attrs.is_deleted());
    }
}
