use quick_xml::events::{BytesEnd, BytesStart, Event};
use quick_xml::writer::Writer;

use crate::data::osm::{BaseAttributes, ObjectKind, OsmId};
use crate::data::MapDataStore;
use crate::errors::{Error, Result};

use super::element;

fn deleted_ids<'a>(attrs: impl Iterator<Item = &'a BaseAttributes>) -> Vec<(OsmId, u32)> {
    let mut ids: Vec<(OsmId, u32)> = attrs
        .filter(|a| a.is_deleted() && a.id > 0)
        .map(|a| (a.id, a.version))
        .collect();
    ids.sort_unstable();
    ids
}

/// The `<delete>` block of an osmChange upload for `changeset`.
///
/// Relations come first and nodes last, so nothing is deleted while a
/// later entry of the same block still refers to it. Locally created
/// objects never reached the server and are left out.
pub fn delete_section(store: &MapDataStore, changeset: u64) -> Result<String> {
    let changeset = changeset.to_string();
    let groups = [
        (ObjectKind::Relation, deleted_ids(store.relations().map(|r| &r.attrs))),
        (ObjectKind::Way, deleted_ids(store.ways().map(|w| &w.attrs))),
        (ObjectKind::Node, deleted_ids(store.nodes().map(|n| &n.attrs))),
    ];

    let mut writer = Writer::new_with_indent(Vec::new(), b' ', 2);
    writer.write_event(Event::Start(BytesStart::new("delete")))?;
    for (kind, ids) in &groups {
        for (id, version) in ids {
            writer.write_event(Event::Empty(element(kind.name(), &[
                ("id", id.to_string().as_str()),
                ("version", version.to_string().as_str()),
                ("changeset", changeset.as_str()),
            ])))?;
        }
    }
    writer.write_event(Event::End(BytesEnd::new("delete")))?;
    String::from_utf8(writer.into_inner()).map_err(|e| Error::new(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::osm::{Member, ObjectRef, Pos, Relation};
    use crate::data::tests::{store_with_nodes, upstream_way};
    use crate::edit;

    #[test]
    fn lists_server_deletions_in_dependency_order() {
        let mut store = store_with_nodes(3);
        store.attach_way(upstream_way(10, &[1, 2])).unwrap();
        store.attach_way(upstream_way(11, &[2, 3])).unwrap();
        let mut rel = Relation::new();
        rel.attrs.id = 20;
        rel.attrs.version = 4;
        rel.members.push(Member::new(ObjectRef::Way(10), Some("outer")));
        store.attach_relation(rel).unwrap();
        let new_node = store.attach_node(store.node_new(Pos::new(0.0, 0.0))).unwrap();

        edit::delete_relation(&mut store, 20).unwrap();
        edit::delete_way(&mut store, 10).unwrap();
        edit::delete_node(&mut store, new_node).unwrap();

        let xml = delete_section(&store, 77).unwrap();
        let lines: Vec<&str> = xml.lines().map(str::trim).collect();
        assert_eq!(lines, vec![
            "<delete>",
            r#"<relation id="20" version="4" changeset="77"/>"#,
            r#"<way id="10" version="1" changeset="77"/>"#,
            r#"<node id="1" version="1" changeset="77"/>"#,
            "</delete>",
        ]);
    }

    #[test]
    fn empty_when_nothing_was_deleted() {
        let store = store_with_nodes(2);
        let xml = delete_section(&store, 1).unwrap();
        assert!(!xml.contains("<node"));
        assert!(xml.starts_with("<delete>"));
    }
}
