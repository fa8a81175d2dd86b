use log::debug;

use crate::data::osm::{ObjectKind, ObjectRef, OsmId};
use crate::data::tags::TagSet;
use crate::data::MapDataStore;
use crate::errors::Result;

use super::live_way;

/// `oneway` values meaning "in drawing direction".
const ONEWAY_FORWARD: [&str; 3] = ["yes", "true", "1"];
const ONEWAY_BACKWARD: &str = "-1";

/// Keys whose `left`/`right` value is relative to the way direction.
const LEFT_RIGHT_KEYS: [&str; 2] = ["sidewalk", "cycleway"];

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ReverseOutcome {
    pub tags_flipped: usize,
    pub roles_flipped: usize,
}

fn flip_direction_suffix(key: &str) -> Option<String> {
    if let Some(base) = key.strip_suffix(":forward") {
        Some(format!("{base}:backward"))
    } else {
        key.strip_suffix(":backward").map(|base| format!("{base}:forward"))
    }
}

fn flip_side(value: &str) -> Option<&'static str> {
    match value {
        "left" => Some("right"),
        "right" => Some("left"),
        _ => None,
    }
}

fn flip_role(role: &str) -> Option<&'static str> {
    match role {
        "forward" => Some("backward"),
        "backward" => Some("forward"),
        _ => None,
    }
}

/// Flips every direction dependent tag and returns how many changed.
/// `oneway` values outside the known vocabulary are left as they are.
/// `-1` always flips back to `yes`, so reversing twice turns `true` and `1`
/// into `yes`.
pub(crate) fn reverse_tags(tags: &mut TagSet) -> usize {
    let mut flipped = 0;
    for tag in tags.tags_mut() {
        if tag.key == "oneway" {
            if ONEWAY_FORWARD.contains(&tag.value.as_str()) {
                tag.value = ONEWAY_BACKWARD.to_string();
            } else if tag.value == ONEWAY_BACKWARD {
                tag.value = ONEWAY_FORWARD[0].to_string();
            } else {
                continue;
            }
            flipped += 1;
        } else if let Some(key) = flip_direction_suffix(&tag.key) {
            tag.key = key;
            flipped += 1;
        } else if LEFT_RIGHT_KEYS.contains(&tag.key.as_str()) {
            if let Some(value) = flip_side(&tag.value) {
                tag.value = value.to_string();
                flipped += 1;
            }
        }
    }
    flipped
}

/// Reverses the node order of a way together with its direction dependent
/// tags and its `forward`/`backward` roles (and those of its end nodes) in
/// route relations.
pub fn reverse_way(store: &mut MapDataStore, way_id: OsmId) -> Result<ReverseOutcome> {
    let way = live_way(store, way_id)?;
    let mut chain = way.chain.clone();
    let mut tags = way.tags.clone();
    chain.reverse();
    let tags_flipped = reverse_tags(&mut tags);

    let mut endpoints = vec![ObjectRef::Way(way_id)];
    endpoints.extend(chain.first().map(|id| ObjectRef::Node(*id)));
    if chain.last() != chain.first() {
        endpoints.extend(chain.last().map(|id| ObjectRef::Node(*id)));
    }

    store.touch(ObjectKind::Way, way_id);
    store.set_way_chain(way_id, chain);
    if let Some(way) = store.way_mut(way_id) {
        way.tags = tags;
    }

    let mut routes: Vec<OsmId> = Vec::new();
    for object in &endpoints {
        for rel_id in store.relations_of(object) {
            if !routes.contains(&rel_id) && store.relation(rel_id).is_some_and(|r| r.is_route()) {
                routes.push(rel_id);
            }
        }
    }

    let mut roles_flipped = 0;
    for rel_id in routes {
        let needs_flip = store.relation(rel_id).is_some_and(|r| {
            r.members.iter().any(|m| endpoints.contains(&m.object) && flip_role(m.role()).is_some())
        });
        if !needs_flip {
            continue;
        }
        store.touch(ObjectKind::Relation, rel_id);
        if let Some(relation) = store.relation_mut(rel_id) {
            for member in relation.members.iter_mut().filter(|m| endpoints.contains(&m.object)) {
                if let Some(role) = flip_role(member.role()) {
                    member.role = Some(role.to_string());
                    roles_flipped += 1;
                }
            }
        }
    }

    store.settle();
    debug!(way_id = way_id, tags_flipped = tags_flipped, roles_flipped = roles_flipped; "Reversed way");
    Ok(ReverseOutcome {
        tags_flipped,
        roles_flipped,
    })
}
