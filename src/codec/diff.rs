//! Local diff file: every edited object, so edits survive a restart
//! without being uploaded.
//!
//! ```xml
//! <diff name="project">
//!   <node id="-1" state="new" lat="51.5" lon="-0.1" time="0"><tag k="amenity" v="bench"/></node>
//!   <node id="42" state="deleted"/>
//!   <way id="7" hidden="true"><nd ref="-1"/><nd ref="43"/><tag k="highway" v="path"/></way>
//!   <relation id="9"><member type="way" ref="7" role="outer"/></relation>
//! </diff>
//! ```

use std::fs::{self, File};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use log::{info, warn};
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, Event};
use quick_xml::reader::Reader;
use quick_xml::writer::Writer;

use crate::data::osm::{BaseAttributes, Member, Node, ObjectFlags, ObjectKind, ObjectRef, OsmId, Pos, Relation, Way};
use crate::data::tags::TagSet;
use crate::data::MapDataStore;
use crate::edit::delete::{has_fewer_than_two_distinct, remove_node, remove_relation, remove_way};
use crate::errors::{Error, Result};

use super::{attributes, element, optional, required};

const ROOT: &str = "diff";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryState {
    Dirty,
    New,
    Deleted,
}

impl EntryState {
    fn of(attrs: &BaseAttributes) -> Self {
        if attrs.is_deleted() {
            EntryState::Deleted
        } else if attrs.is_new() {
            EntryState::New
        } else {
            EntryState::Dirty
        }
    }
}

/// One `<node>`, `<way>` or `<relation>` of a diff file.
#[derive(Debug, Clone)]
pub struct DiffEntry {
    pub kind: ObjectKind,
    pub id: OsmId,
    pub state: EntryState,
    pub hidden: bool,
    pub pos: Option<Pos>,
    pub time: Option<i64>,
    pub chain: Vec<OsmId>,
    pub members: Vec<Member>,
    pub tags: TagSet,
    /// Whether the entry carries object content, as opposed to a bare
    /// `hidden` marker.
    pub has_content: bool,
}

impl DiffEntry {
    fn new(kind: ObjectKind, id: OsmId, state: EntryState) -> Self {
        DiffEntry {
            kind,
            id,
            state,
            hidden: false,
            pos: None,
            time: None,
            chain: Vec::new(),
            members: Vec::new(),
            tags: TagSet::new(),
            has_content: false,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct DiffDocument {
    pub name: Option<String>,
    pub entries: Vec<DiffEntry>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RestoreReport {
    /// The file the diff was read from, if any.
    pub source: Option<PathBuf>,
    /// Entries that left their object edited.
    pub applied: usize,
    /// Entries identical to the upstream data, dropped as clean.
    pub clean: usize,
    /// Entries referring to objects that no longer exist.
    pub ignored: usize,
    pub name_mismatch: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveOutcome {
    Written { objects: usize },
    /// Nothing was edited, so any existing diff file was removed.
    Removed,
}

fn parse_entry_start(el: &BytesStart, kind: ObjectKind) -> Result<DiffEntry> {
    let attrs = attributes(el)?;
    let name = kind.name();
    let id: OsmId = required(&attrs, "id", name)?;
    let state = match attrs.get("state").map(String::as_str) {
        None => EntryState::Dirty,
        Some("new") => EntryState::New,
        Some("deleted") => EntryState::Deleted,
        Some(other) => return Err(format!("<{name} id=\"{id}\"> has unknown state '{other}'").into()),
    };
    let mut entry = DiffEntry::new(kind, id, state);
    entry.hidden = attrs.get("hidden").is_some_and(|v| v == "true");
    if kind == ObjectKind::Node && state != EntryState::Deleted {
        let lat: Option<f64> = optional(&attrs, "lat", name)?;
        let lon: Option<f64> = optional(&attrs, "lon", name)?;
        entry.pos = match (lat, lon) {
            (Some(lat), Some(lon)) => Some(Pos::new(lat, lon)),
            (None, None) => None,
            _ => return Err(format!("<node id=\"{id}\"> needs both lat and lon").into()),
        };
        entry.time = optional(&attrs, "time", name)?;
        entry.has_content = entry.pos.is_some();
    }
    Ok(entry)
}

fn parse_child(el: &BytesStart, entry: &mut DiffEntry) -> Result<()> {
    let attrs = attributes(el)?;
    match (el.name().as_ref(), entry.kind) {
        (b"tag", _) => {
            let key: String = required(&attrs, "k", "tag")?;
            let value: String = required(&attrs, "v", "tag")?;
            entry.tags.tags_mut().push(crate::data::tags::Tag::new(key, value));
        },
        (b"nd", ObjectKind::Way) => {
            entry.chain.push(required(&attrs, "ref", "nd")?);
        },
        (b"member", ObjectKind::Relation) => {
            let type_name: String = required(&attrs, "type", "member")?;
            let kind = ObjectKind::from_name(&type_name)
                .ok_or_else(|| Error::new(format!("<member> has unknown type '{type_name}'")))?;
            let id: OsmId = required(&attrs, "ref", "member")?;
            let role = attrs.get("role").map(String::as_str);
            entry.members.push(Member::new(ObjectRef::id_only(kind, id), role));
        },
        (other, kind) => {
            return Err(format!("unexpected <{}> inside <{kind}>", String::from_utf8_lossy(other)).into());
        },
    }
    entry.has_content = true;
    Ok(())
}

fn entry_kind(name: &[u8]) -> Option<ObjectKind> {
    match name {
        b"node" => Some(ObjectKind::Node),
        b"way" => Some(ObjectKind::Way),
        b"relation" => Some(ObjectKind::Relation),
        _ => None,
    }
}

/// Reads a complete diff document. Nothing is applied here, so a broken
/// file cannot leave a half restored store behind.
pub fn parse_diff<R: BufRead>(input: R) -> Result<DiffDocument> {
    let mut reader = Reader::from_reader(input);
    reader.trim_text(true);
    let mut buf = Vec::new();
    let mut doc = DiffDocument::default();
    let mut current: Option<DiffEntry> = None;
    let mut seen_root = false;
    let mut closed_root = false;

    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Eof => break,
            Event::Start(e) if e.name().as_ref() == ROOT.as_bytes() => {
                doc.name = attributes(&e)?.get("name").cloned();
                seen_root = true;
            },
            Event::Empty(e) if e.name().as_ref() == ROOT.as_bytes() => {
                doc.name = attributes(&e)?.get("name").cloned();
                seen_root = true;
                closed_root = true;
            },
            Event::End(e) if e.name().as_ref() == ROOT.as_bytes() => closed_root = true,
            Event::Start(e) => {
                if let Some(entry) = current.as_mut() {
                    parse_child(&e, entry)?;
                } else if let Some(kind) = entry_kind(e.name().as_ref()) {
                    let mut entry = parse_entry_start(&e, kind)?;
                    entry.has_content |= entry.state != EntryState::Deleted;
                    current = Some(entry);
                } else {
                    warn!(element = &*String::from_utf8_lossy(e.name().as_ref()); "Skipping unknown diff element");
                }
            },
            Event::Empty(e) => {
                if let Some(entry) = current.as_mut() {
                    parse_child(&e, entry)?;
                } else if let Some(kind) = entry_kind(e.name().as_ref()) {
                    doc.entries.push(parse_entry_start(&e, kind)?);
                } else {
                    warn!(element = &*String::from_utf8_lossy(e.name().as_ref()); "Skipping unknown diff element");
                }
            },
            Event::End(e) => {
                if entry_kind(e.name().as_ref()).is_some() {
                    if let Some(entry) = current.take() {
                        doc.entries.push(entry);
                    }
                }
            },
            _ => (),
        }
        buf.clear();
    }

    if !seen_root {
        return Err("diff file has no <diff> root element".into());
    }
    if current.is_some() || !closed_root {
        return Err("diff file is truncated".into());
    }
    Ok(doc)
}

fn write_tags<W: Write>(writer: &mut Writer<W>, tags: &TagSet) -> Result<()> {
    for tag in tags.iter() {
        writer.write_event(Event::Empty(element("tag", &[("k", tag.key.as_str()), ("v", tag.value.as_str())])))?;
    }
    Ok(())
}

fn state_attr(attrs: &BaseAttributes) -> Option<&'static str> {
    match EntryState::of(attrs) {
        EntryState::Dirty => None,
        EntryState::New => Some("new"),
        EntryState::Deleted => Some("deleted"),
    }
}

fn is_flagged(attrs: &BaseAttributes) -> bool {
    !attrs.flags.is_empty()
}

fn write_node<W: Write>(writer: &mut Writer<W>, node: &Node) -> Result<()> {
    let id = node.id().to_string();
    let mut el = element("node", &[("id", id.as_str())]);
    if let Some(state) = state_attr(&node.attrs) {
        el.push_attribute(("state", state));
    }
    if node.attrs.is_deleted() {
        writer.write_event(Event::Empty(el))?;
        return Ok(());
    }
    let pos = node.pos();
    el.push_attribute(("lat", pos.lat.to_string().as_str()));
    el.push_attribute(("lon", pos.lon.to_string().as_str()));
    el.push_attribute(("time", node.attrs.time.to_string().as_str()));
    writer.write_event(Event::Start(el))?;
    write_tags(writer, &node.tags)?;
    writer.write_event(Event::End(BytesEnd::new("node")))?;
    Ok(())
}

fn write_way<W: Write>(writer: &mut Writer<W>, way: &Way) -> Result<()> {
    let id = way.id().to_string();
    let mut el = element("way", &[("id", id.as_str())]);
    let edited = way.attrs.is_new() || way.attrs.is_dirty() || way.attrs.is_deleted();
    if edited {
        if let Some(state) = state_attr(&way.attrs) {
            el.push_attribute(("state", state));
        }
    }
    if way.attrs.is_hidden() {
        el.push_attribute(("hidden", "true"));
    }
    if !edited || way.attrs.is_deleted() {
        writer.write_event(Event::Empty(el))?;
        return Ok(());
    }
    writer.write_event(Event::Start(el))?;
    for node_id in &way.chain {
        writer.write_event(Event::Empty(element("nd", &[("ref", node_id.to_string().as_str())])))?;
    }
    write_tags(writer, &way.tags)?;
    writer.write_event(Event::End(BytesEnd::new("way")))?;
    Ok(())
}

fn write_relation<W: Write>(writer: &mut Writer<W>, relation: &Relation) -> Result<()> {
    let id = relation.id().to_string();
    let mut el = element("relation", &[("id", id.as_str())]);
    if let Some(state) = state_attr(&relation.attrs) {
        el.push_attribute(("state", state));
    }
    if relation.attrs.is_deleted() {
        writer.write_event(Event::Empty(el))?;
        return Ok(());
    }
    writer.write_event(Event::Start(el))?;
    for member in &relation.members {
        let reference = member.object.id().to_string();
        let mut m = element("member", &[("type", member.object.kind().name()), ("ref", reference.as_str())]);
        if let Some(role) = &member.role {
            m.push_attribute(("role", role.as_str()));
        }
        writer.write_event(Event::Empty(m))?;
    }
    write_tags(writer, &relation.tags)?;
    writer.write_event(Event::End(BytesEnd::new("relation")))?;
    Ok(())
}

/// Serializes every flagged object of the store. Returns the document and
/// the number of objects in it.
pub fn write_diff(store: &MapDataStore, project: &str) -> Result<(Vec<u8>, usize)> {
    let mut nodes: Vec<&Node> = store.nodes().filter(|n| is_flagged(&n.attrs)).collect();
    let mut ways: Vec<&Way> = store.ways().filter(|w| is_flagged(&w.attrs)).collect();
    let mut relations: Vec<&Relation> = store.relations().filter(|r| is_flagged(&r.attrs)).collect();
    nodes.sort_by_key(|n| n.id());
    ways.sort_by_key(|w| w.id());
    relations.sort_by_key(|r| r.id());

    let mut writer = Writer::new_with_indent(Vec::new(), b' ', 2);
    writer.write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))?;
    writer.write_event(Event::Start(element(ROOT, &[("name", project)])))?;
    for node in &nodes {
        write_node(&mut writer, node)?;
    }
    for way in &ways {
        write_way(&mut writer, way)?;
    }
    for relation in &relations {
        write_relation(&mut writer, relation)?;
    }
    writer.write_event(Event::End(BytesEnd::new(ROOT)))?;
    Ok((writer.into_inner(), nodes.len() + ways.len() + relations.len()))
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".tmp");
    PathBuf::from(name)
}

/// Outcome of applying one entry.
enum Applied {
    Edited,
    Clean,
    Ignored,
}

fn settle_outcome(store: &mut MapDataStore, kind: ObjectKind, id: OsmId) -> Applied {
    store.settle();
    match store.attrs(kind, id) {
        Some(attrs) if attrs.is_new() || attrs.is_dirty() || attrs.is_deleted() => Applied::Edited,
        Some(attrs) if attrs.is_hidden() => Applied::Edited,
        _ => Applied::Clean,
    }
}

fn is_live(store: &MapDataStore, kind: ObjectKind, id: OsmId) -> bool {
    store.attrs(kind, id).is_some_and(|a| !a.is_deleted())
}

/// Chain entries pointing at live nodes; anything else is dropped.
fn live_chain(store: &MapDataStore, entry: &DiffEntry) -> Vec<OsmId> {
    let mut chain = Vec::with_capacity(entry.chain.len());
    for node_id in &entry.chain {
        if is_live(store, ObjectKind::Node, *node_id) {
            chain.push(*node_id);
        } else {
            warn!(way_id = entry.id, node_id = *node_id; "Diff way references missing node, dropping it");
        }
    }
    chain.dedup();
    chain
}

fn resolved_members(store: &MapDataStore, entry: &DiffEntry) -> Vec<Member> {
    entry.members.iter()
        .map(|m| Member {
            object: store.resolve(m.object.kind(), m.object.id()),
            role: m.role.clone(),
        })
        .collect()
}

fn apply_new(store: &mut MapDataStore, entry: &DiffEntry) -> Result<Applied> {
    if entry.id >= 0 || store.contains(entry.kind, entry.id) {
        warn!(kind = entry.kind.name(), id = entry.id; "Diff entry for a new object clashes with a loaded one");
        return Ok(Applied::Ignored);
    }
    let mut attrs = BaseAttributes {
        id: entry.id,
        ..BaseAttributes::default()
    };
    if entry.hidden {
        attrs.flags.insert(ObjectFlags::HIDDEN);
    }
    match entry.kind {
        ObjectKind::Node => {
            let Some(pos) = entry.pos else {
                warn!(id = entry.id; "New node in diff has no position");
                return Ok(Applied::Ignored);
            };
            let mut node = Node::new(pos);
            attrs.time = entry.time.unwrap_or_default();
            node.attrs = attrs;
            node.tags = entry.tags.clone();
            store.attach_node(node)?;
        },
        ObjectKind::Way => {
            let chain = live_chain(store, entry);
            if has_fewer_than_two_distinct(&chain) {
                warn!(id = entry.id; "New way in diff has fewer than two usable nodes");
                return Ok(Applied::Ignored);
            }
            let mut way = Way::new();
            way.attrs = attrs;
            way.chain = chain;
            way.tags = entry.tags.clone();
            store.attach_way(way)?;
        },
        ObjectKind::Relation => {
            let mut relation = Relation::new();
            relation.attrs = attrs;
            relation.members = resolved_members(store, entry);
            relation.tags = entry.tags.clone();
            store.attach_relation(relation)?;
        },
    }
    Ok(Applied::Edited)
}

fn apply_dirty(store: &mut MapDataStore, entry: &DiffEntry) -> Result<Applied> {
    let (kind, id) = (entry.kind, entry.id);
    if !is_live(store, kind, id) {
        warn!(kind = kind.name(), id = id; "Diff entry references an object that no longer exists");
        return Ok(Applied::Ignored);
    }
    if kind == ObjectKind::Way {
        store.set_way_hidden(id, entry.hidden)?;
    }
    if !entry.has_content {
        return Ok(settle_outcome(store, kind, id));
    }
    store.touch(kind, id);
    match kind {
        ObjectKind::Node => {
            if let Some(node) = store.node_mut(id) {
                if let Some(pos) = entry.pos {
                    node.set_pos(pos);
                }
                node.tags = entry.tags.clone();
            }
        },
        ObjectKind::Way => {
            let chain = live_chain(store, entry);
            if has_fewer_than_two_distinct(&chain) {
                warn!(id = id; "Diff way has fewer than two usable nodes, deleting it");
                remove_way(store, id);
            } else {
                store.set_way_chain(id, chain);
                if let Some(way) = store.way_mut(id) {
                    way.tags = entry.tags.clone();
                }
            }
        },
        ObjectKind::Relation => {
            let members = resolved_members(store, entry);
            if let Some(relation) = store.relation_mut(id) {
                relation.members = members;
                relation.tags = entry.tags.clone();
            }
        },
    }
    Ok(settle_outcome(store, kind, id))
}

fn apply_deleted(store: &mut MapDataStore, entry: &DiffEntry) -> Applied {
    let (kind, id) = (entry.kind, entry.id);
    match store.attrs(kind, id) {
        None => {
            warn!(kind = kind.name(), id = id; "Diff deletes an object that no longer exists");
            return Applied::Ignored;
        },
        Some(attrs) if attrs.is_deleted() => return Applied::Edited,
        Some(_) => (),
    }
    match kind {
        ObjectKind::Node => remove_node(store, id),
        ObjectKind::Way => remove_way(store, id),
        ObjectKind::Relation => remove_relation(store, id),
    }
    settle_outcome(store, kind, id)
}

fn record(report: &mut RestoreReport, applied: Applied) {
    match applied {
        Applied::Edited => report.applied += 1,
        Applied::Clean => report.clean += 1,
        Applied::Ignored => report.ignored += 1,
    }
}

/// Applies a parsed diff to a freshly loaded store.
///
/// Creations and modifications go first (nodes, ways, relations), then
/// deletions in reverse dependency order so deleting a node never has to
/// cascade through ways the diff already rewrote.
pub fn apply_diff(store: &mut MapDataStore, doc: &DiffDocument) -> Result<RestoreReport> {
    let mut report = RestoreReport::default();

    for kind in [ObjectKind::Node, ObjectKind::Way, ObjectKind::Relation] {
        for entry in doc.entries.iter().filter(|e| e.kind == kind && e.state != EntryState::Deleted) {
            let applied = match entry.state {
                EntryState::New => apply_new(store, entry)?,
                _ => apply_dirty(store, entry)?,
            };
            record(&mut report, applied);
        }
    }
    store.refresh_member_refs();
    for kind in [ObjectKind::Relation, ObjectKind::Way, ObjectKind::Node] {
        for entry in doc.entries.iter().filter(|e| e.kind == kind && e.state == EntryState::Deleted) {
            let applied = apply_deleted(store, entry);
            record(&mut report, applied);
        }
    }
    store.settle();
    Ok(report)
}

/// Reads and writes the diff file of one project.
#[derive(Debug, Clone)]
pub struct DiffCodec {
    path: PathBuf,
    project: String,
}

impl DiffCodec {
    pub fn new(path: impl Into<PathBuf>, project: impl Into<String>) -> Self {
        DiffCodec {
            path: path.into(),
            project: project.into(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn temp_path(&self) -> PathBuf {
        temp_path(&self.path)
    }

    /// Writes the diff next to the target and renames it into place, so a
    /// crash never leaves a truncated diff under the real name.
    pub fn save(&self, store: &MapDataStore) -> Result<SaveOutcome> {
        let (bytes, objects) = write_diff(store, &self.project)?;
        if objects == 0 {
            for path in [self.temp_path(), self.path.clone()] {
                if path.exists() {
                    fs::remove_file(&path)?;
                }
            }
            info!(path = &*self.path.to_string_lossy(); "No edits, removed diff");
            return Ok(SaveOutcome::Removed);
        }

        let temp = self.temp_path();
        {
            let mut file = File::create(&temp)?;
            file.write_all(&bytes)?;
            file.sync_all()?;
        }
        fs::rename(&temp, &self.path)?;
        info!(path = &*self.path.to_string_lossy(), objects = objects; "Saved diff");
        Ok(SaveOutcome::Written { objects })
    }

    fn read(path: &Path) -> Result<DiffDocument> {
        let file = File::open(path)?;
        parse_diff(BufReader::new(file))
    }

    /// Locates the diff, preferring a temp file left behind by an
    /// interrupted save, and parses it completely.
    pub fn load(&self) -> Result<Option<(PathBuf, DiffDocument)>> {
        let temp = self.temp_path();
        if temp.exists() {
            match DiffCodec::read(&temp) {
                Ok(doc) => {
                    info!(path = &*temp.to_string_lossy(); "Recovering diff from interrupted save");
                    fs::rename(&temp, &self.path)?;
                    return Ok(Some((self.path.clone(), doc)));
                },
                Err(err) => {
                    warn!(path = &*temp.to_string_lossy(), err = err.message.as_str(); "Ignoring unreadable temp diff");
                },
            }
        }
        if !self.path.exists() {
            return Ok(None);
        }
        let doc = DiffCodec::read(&self.path)?;
        Ok(Some((self.path.clone(), doc)))
    }

    /// Restores the project's diff onto `store`. A missing diff is not an
    /// error; a diff that fails to parse leaves the store untouched.
    pub fn restore(&self, store: &mut MapDataStore) -> Result<RestoreReport> {
        let Some((source, doc)) = self.load()? else {
            info!(path = &*self.path.to_string_lossy(); "No diff to restore");
            return Ok(RestoreReport::default());
        };
        let mut report = apply_diff(store, &doc)?;
        if doc.name.as_deref() != Some(self.project.as_str()) {
            warn!(
                expected = self.project.as_str(),
                found = doc.name.as_deref().unwrap_or("");
                "Diff belongs to a different project"
            );
            report.name_mismatch = true;
        }
        report.source = Some(source);
        info!(
            applied = report.applied,
            clean = report.clean,
            ignored = report.ignored;
            "Restored diff"
        );
        Ok(report)
    }
}
