use osm_edit::data::osm::{Member, Node, ObjectRef, OsmId, Pos, Relation, Way};
use osm_edit::data::tags::{TagPolicy, TagSet};
use osm_edit::data::UpstreamData;
use osm_edit::edit;
use osm_edit::MapDataStore;

fn node(id: OsmId) -> Node {
    let mut node = Node::new(Pos::new(51.5 + id as f64 * 0.0001, -0.12));
    node.attrs.id = id;
    node.attrs.version = 1;
    node
}

fn way(id: OsmId, chain: &[OsmId], tags: &[(&str, &str)]) -> Way {
    let mut way = Way::new();
    way.attrs.id = id;
    way.attrs.version = 1;
    way.chain = chain.to_vec();
    way.tags = TagSet::from_pairs(tags.iter().copied());
    way
}

fn relation(id: OsmId, tags: &[(&str, &str)], members: &[(ObjectRef, &str)]) -> Relation {
    let mut relation = Relation::new();
    relation.attrs.id = id;
    relation.attrs.version = 1;
    relation.tags = TagSet::from_pairs(tags.iter().copied());
    relation.members = members.iter().map(|(object, role)| Member::new(*object, Some(role))).collect();
    relation
}

fn load(nodes: &[OsmId], ways: Vec<Way>, relations: Vec<Relation>) -> MapDataStore {
    let data = UpstreamData {
        bounds: None,
        nodes: nodes.iter().map(|id| node(*id)).collect(),
        ways,
        relations,
    };
    MapDataStore::from_upstream(data, TagPolicy::default())
}

fn assert_clean(store: &MapDataStore) {
    let summary = store.dirty_summary();
    assert!(summary.is_empty(), "store still has edits: {summary:?}");
    assert!(store.originals().is_empty());
}

#[test]
fn split_then_merge_restores_open_way() {
    let mut store = load(
        &[1, 2, 3, 4, 5],
        vec![way(10, &[1, 2, 3, 4, 5], &[("highway", "residential"), ("name", "Dean St")])],
        vec![relation(50, &[("type", "route"), ("route", "bus")], &[(ObjectRef::Way(10), "forward")])],
    );

    let new_way = edit::split_way(&mut store, 10, 2, true).unwrap().unwrap();
    assert_eq!(store.way(10).unwrap().chain, vec![1, 2, 3]);
    assert_eq!(store.way(new_way).unwrap().chain, vec![3, 4, 5]);
    assert_eq!(store.relation(50).unwrap().members.len(), 2);

    let outcome = edit::merge_ways(&mut store, 10, new_way).unwrap();
    assert_eq!(outcome.survivor, 10);
    assert!(!outcome.tag_collision);
    let merged = store.way(10).unwrap();
    assert_eq!(merged.chain, vec![1, 2, 3, 4, 5]);
    assert_eq!(merged.tags.get("name"), Some("Dean St"));
    assert!(store.way(new_way).is_none());
    assert_eq!(store.relation(50).unwrap().members.len(), 1);
    assert_clean(&store);
}

#[test]
fn split_then_merge_restores_closed_ring() {
    // A-B-C-A split at C
    let mut store = load(&[1, 2, 3], vec![way(10, &[1, 2, 3, 1], &[("landuse", "grass")])], vec![]);

    let new_way = edit::split_way(&mut store, 10, 2, true).unwrap().unwrap();
    assert_eq!(store.way(10).unwrap().chain, vec![1, 2, 3]);
    assert_eq!(store.way(new_way).unwrap().chain, vec![3, 1]);

    edit::merge_ways(&mut store, 10, new_way).unwrap();
    assert_eq!(store.way(10).unwrap().chain, vec![1, 2, 3, 1]);
    assert!(store.way(10).unwrap().is_closed());
    assert_eq!(store.node(1).unwrap().ways, 2);
    assert_clean(&store);
}

#[test]
fn reverse_vocabulary_round_trip() {
    let mut store = load(
        &[1, 2, 3],
        vec![way(10, &[1, 2, 3], &[("oneway", "yes"), ("sidewalk", "left"), ("maxspeed:forward", "30")])],
        vec![relation(50, &[("type", "route")], &[(ObjectRef::Way(10), "forward"), (ObjectRef::Node(3), "backward")])],
    );

    edit::reverse_way(&mut store, 10).unwrap();
    let reversed = store.way(10).unwrap();
    assert_eq!(reversed.tags.get("oneway"), Some("-1"));
    assert_eq!(reversed.tags.get("sidewalk"), Some("right"));
    assert_eq!(reversed.tags.get("maxspeed:backward"), Some("30"));
    assert_eq!(store.relation(50).unwrap().members[0].role(), "backward");

    edit::reverse_way(&mut store, 10).unwrap();
    let restored = store.way(10).unwrap();
    assert_eq!(restored.tags.get("oneway"), Some("yes"));
    assert_eq!(restored.tags.get("sidewalk"), Some("left"));
    assert_eq!(restored.chain, vec![1, 2, 3]);
    assert_clean(&store);
}

#[test]
fn merging_nodes_keeps_the_upstream_id() {
    let mut store = load(
        &[1, 2, 3],
        vec![way(10, &[1, 2], &[("highway", "footway")])],
        vec![],
    );
    let added = store.attach_node(store.node_new(Pos::new(51.6, -0.1))).unwrap();
    let mut stub = store.way_new();
    stub.chain = vec![added, 3];
    let stub = store.attach_way(stub).unwrap();
    let mut route = store.relation_new();
    route.members = vec![
        Member::new(ObjectRef::Node(added), Some("stop")),
        Member::new(ObjectRef::Node(2), Some("stop")),
    ];
    let route = store.attach_relation(route).unwrap();

    let outcome = edit::merge_nodes(&mut store, added, 2).unwrap();
    assert_eq!(outcome.survivor, 2);
    assert!(store.node(added).is_none());
    assert_eq!(store.way(stub).unwrap().chain, vec![2, 3]);
    let members = &store.relation(route).unwrap().members;
    assert_eq!(members.len(), 1);
    assert!(members.windows(2).all(|pair| pair[0] != pair[1]));
}

#[test]
fn deleting_last_references() {
    let mut store = load(&[1, 2], vec![], vec![]);
    let added = store.attach_node(store.node_new(Pos::new(51.6, -0.1))).unwrap();
    let mut a = store.way_new();
    a.chain = vec![added, 1];
    let a = store.attach_way(a).unwrap();
    let mut b = store.way_new();
    b.chain = vec![1, 2];
    let b = store.attach_way(b).unwrap();

    edit::delete_way(&mut store, a).unwrap();
    assert!(store.node(added).is_none());
    assert!(!store.node(1).unwrap().attrs.is_deleted());

    edit::delete_way(&mut store, b).unwrap();
    let stub = store.node(1).unwrap();
    assert!(stub.attrs.is_deleted());
    assert!(store.original_object(&ObjectRef::Node(1)).is_some());
}

#[test]
fn merging_ways_folds_memberships() {
    let mut store = load(
        &[1, 2, 3],
        vec![way(10, &[1, 2], &[("highway", "primary")]), way(11, &[2, 3], &[("highway", "primary")])],
        vec![relation(50, &[("type", "route")], &[(ObjectRef::Way(10), "forward"), (ObjectRef::Way(11), "")])],
    );

    let outcome = edit::merge_ways(&mut store, 11, 10).unwrap();
    assert!(!outcome.role_collision);
    let members = &store.relation(50).unwrap().members;
    assert_eq!(members.len(), 1);
    assert_eq!(members[0].object, ObjectRef::Way(outcome.survivor));
    assert_eq!(members[0].role(), "forward");
}
