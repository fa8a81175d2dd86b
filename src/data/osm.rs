use std::fmt;
use std::hash::{Hash, Hasher};

use bitflags::bitflags;
use rkyv::with::Skip;

use super::tags::{TagPolicy, TagSet};

pub type OsmId = i64;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ObjectFlags: u8 {
        const NEW = 1 << 0;
        const DIRTY = 1 << 1;
        const DELETED = 1 << 2;
        const HIDDEN = 1 << 3;
    }
}

impl Default for ObjectFlags {
    fn default() -> Self {
        ObjectFlags::empty()
    }
}

/// Id, upstream version and edit state shared by all entities.
///
/// Negative ids are local and never uploaded, positive ids are assigned by
/// the server. Flags are edit state only and are never cached.
#[derive(rkyv::Archive, rkyv::Deserialize, rkyv::Serialize, Debug, Default, Clone)]
#[archive(check_bytes)]
pub struct BaseAttributes {
    pub id: OsmId,
    pub version: u32,
    pub time: i64,
    #[with(Skip)]
    pub flags: ObjectFlags,
}

impl BaseAttributes {
    pub fn is_new(&self) -> bool {
        self.flags.contains(ObjectFlags::NEW)
    }

    pub fn is_dirty(&self) -> bool {
        self.flags.contains(ObjectFlags::DIRTY)
    }

    pub fn is_deleted(&self) -> bool {
        self.flags.contains(ObjectFlags::DELETED)
    }

    pub fn is_hidden(&self) -> bool {
        self.flags.contains(ObjectFlags::HIDDEN)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ObjectKind {
    Node,
    Way,
    Relation,
}

impl ObjectKind {
    pub fn name(&self) -> &'static str {
        match self {
            ObjectKind::Node => "node",
            ObjectKind::Way => "way",
            ObjectKind::Relation => "relation",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "node" => Some(ObjectKind::Node),
            "way" => Some(ObjectKind::Way),
            "relation" => Some(ObjectKind::Relation),
            _ => None,
        }
    }
}

impl fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Reference to an OSM object.
///
/// The first three variants point at objects loaded in the store, the `*Id`
/// variants at objects outside the loaded set. Two references are equal if
/// kind and id match, whichever variant they are.
#[derive(rkyv::Archive, rkyv::Deserialize, rkyv::Serialize, Debug, Clone, Copy)]
#[archive(check_bytes)]
pub enum ObjectRef {
    Node(OsmId),
    Way(OsmId),
    Relation(OsmId),
    NodeId(OsmId),
    WayId(OsmId),
    RelationId(OsmId),
}

impl ObjectRef {
    pub fn materialized(kind: ObjectKind, id: OsmId) -> Self {
        match kind {
            ObjectKind::Node => ObjectRef::Node(id),
            ObjectKind::Way => ObjectRef::Way(id),
            ObjectKind::Relation => ObjectRef::Relation(id),
        }
    }

    pub fn id_only(kind: ObjectKind, id: OsmId) -> Self {
        match kind {
            ObjectKind::Node => ObjectRef::NodeId(id),
            ObjectKind::Way => ObjectRef::WayId(id),
            ObjectKind::Relation => ObjectRef::RelationId(id),
        }
    }

    pub fn kind(&self) -> ObjectKind {
        match self {
            ObjectRef::Node(_) | ObjectRef::NodeId(_) => ObjectKind::Node,
            ObjectRef::Way(_) | ObjectRef::WayId(_) => ObjectKind::Way,
            ObjectRef::Relation(_) | ObjectRef::RelationId(_) => ObjectKind::Relation,
        }
    }

    pub fn id(&self) -> OsmId {
        match *self {
            ObjectRef::Node(id) | ObjectRef::NodeId(id)
            | ObjectRef::Way(id) | ObjectRef::WayId(id)
            | ObjectRef::Relation(id) | ObjectRef::RelationId(id) => id,
        }
    }

    pub fn is_materialized(&self) -> bool {
        matches!(self, ObjectRef::Node(_) | ObjectRef::Way(_) | ObjectRef::Relation(_))
    }
}

impl PartialEq for ObjectRef {
    fn eq(&self, other: &Self) -> bool {
        self.kind() == other.kind() && self.id() == other.id()
    }
}

impl Eq for ObjectRef {}

impl Hash for ObjectRef {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.kind().hash(state);
        self.id().hash(state);
    }
}

impl fmt::Display for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} #{}", self.kind(), self.id())
    }
}

#[derive(rkyv::Archive, rkyv::Deserialize, rkyv::Serialize, Debug, Default, Clone, Copy, PartialEq)]
#[archive(check_bytes)]
pub struct Pos {
    pub lat: f64,
    pub lon: f64,
}

impl Pos {
    pub fn new(lat: f64, lon: f64) -> Self {
        Pos { lat, lon }
    }

    pub fn is_valid(&self) -> bool {
        self.lat.is_finite() && self.lon.is_finite()
            && (-90.0..=90.0).contains(&self.lat)
            && (-180.0..=180.0).contains(&self.lon)
    }
}

const EARTH_RADIUS_M: f64 = 6_378_137.0;

/// Spherical web-mercator coordinate in metres.
#[derive(rkyv::Archive, rkyv::Deserialize, rkyv::Serialize, Debug, Default, Clone, Copy, PartialEq)]
#[archive(check_bytes)]
pub struct Projected {
    pub x: f64,
    pub y: f64,
}

impl From<Pos> for Projected {
    fn from(pos: Pos) -> Self {
        let lat = pos.lat.clamp(-85.051_128_78, 85.051_128_78).to_radians();
        Projected {
            x: EARTH_RADIUS_M * pos.lon.to_radians(),
            y: EARTH_RADIUS_M * (std::f64::consts::FRAC_PI_4 + lat / 2.0).tan().ln(),
        }
    }
}

#[derive(rkyv::Archive, rkyv::Deserialize, rkyv::Serialize, Debug, Default, Clone, Copy, PartialEq)]
#[archive(check_bytes)]
pub struct Bounds {
    pub min_lat: f64,
    pub min_lon: f64,
    pub max_lat: f64,
    pub max_lon: f64,
}

impl Bounds {
    pub fn contains(&self, pos: Pos) -> bool {
        (self.min_lat..=self.max_lat).contains(&pos.lat)
            && (self.min_lon..=self.max_lon).contains(&pos.lon)
    }
}

#[derive(rkyv::Archive, rkyv::Deserialize, rkyv::Serialize, Debug, Default, Clone)]
#[archive(check_bytes)]
pub struct Node {
    pub attrs: BaseAttributes,
    pos: Pos,
    projected: Projected,
    /// Number of way chain entries pointing at this node.
    pub ways: u32,
    pub tags: TagSet,
}

impl Node {
    pub fn new(pos: Pos) -> Self {
        Node {
            pos,
            projected: pos.into(),
            ..Node::default()
        }
    }

    pub fn id(&self) -> OsmId {
        self.attrs.id
    }

    pub fn pos(&self) -> Pos {
        self.pos
    }

    pub fn projected(&self) -> Projected {
        self.projected
    }

    pub fn set_pos(&mut self, pos: Pos) {
        self.pos = pos;
        self.projected = pos.into();
    }

    /// Compares everything that gets uploaded: position, tags and deletion.
    pub fn same_content(&self, other: &Node, policy: &TagPolicy) -> bool {
        self.attrs.is_deleted() == other.attrs.is_deleted()
            && self.pos == other.pos
            && self.tags.equals(&other.tags, policy)
    }
}

#[derive(rkyv::Archive, rkyv::Deserialize, rkyv::Serialize, Debug, Default, Clone)]
#[archive(check_bytes)]
pub struct Way {
    pub attrs: BaseAttributes,
    /// Node ids in order; the nodes themselves live in the store.
    pub chain: Vec<OsmId>,
    pub tags: TagSet,
}

impl Way {
    pub fn new() -> Self {
        Way::default()
    }

    pub fn id(&self) -> OsmId {
        self.attrs.id
    }

    pub fn first_node(&self) -> Option<OsmId> {
        self.chain.first().copied()
    }

    pub fn last_node(&self) -> Option<OsmId> {
        self.chain.last().copied()
    }

    pub fn is_closed(&self) -> bool {
        self.chain.len() > 2 && self.chain.first() == self.chain.last()
    }

    pub fn contains_node(&self, node: OsmId) -> bool {
        self.chain.contains(&node)
    }

    pub fn ends_with_node(&self, node: OsmId) -> bool {
        self.first_node() == Some(node) || self.last_node() == Some(node)
    }

    pub fn distinct_nodes(&self) -> usize {
        let mut ids = self.chain.clone();
        ids.sort_unstable();
        ids.dedup();
        ids.len()
    }

    pub fn same_content(&self, other: &Way, policy: &TagPolicy) -> bool {
        self.attrs.is_deleted() == other.attrs.is_deleted()
            && self.chain == other.chain
            && self.tags.equals(&other.tags, policy)
    }
}

#[derive(rkyv::Archive, rkyv::Deserialize, rkyv::Serialize, Debug, Clone, PartialEq)]
#[archive(check_bytes)]
pub struct Member {
    pub object: ObjectRef,
    pub role: Option<String>,
}

impl Member {
    pub fn new(object: ObjectRef, role: Option<&str>) -> Self {
        Member {
            object,
            role: role.filter(|r| !r.is_empty()).map(str::to_string),
        }
    }

    pub fn role(&self) -> &str {
        self.role.as_deref().unwrap_or("")
    }
}

#[derive(rkyv::Archive, rkyv::Deserialize, rkyv::Serialize, Debug, Default, Clone)]
#[archive(check_bytes)]
pub struct Relation {
    pub attrs: BaseAttributes,
    pub members: Vec<Member>,
    pub tags: TagSet,
}

impl Relation {
    pub fn new() -> Self {
        Relation::default()
    }

    pub fn id(&self) -> OsmId {
        self.attrs.id
    }

    pub fn has_member(&self, object: &ObjectRef) -> bool {
        self.members.iter().any(|m| m.object == *object)
    }

    pub fn is_route(&self) -> bool {
        self.tags.get("type") == Some("route")
    }

    /// Drops members equal (object and role) to their predecessor.
    pub(crate) fn collapse_adjacent_members(&mut self) -> bool {
        let before = self.members.len();
        self.members.dedup();
        before != self.members.len()
    }

    pub fn same_content(&self, other: &Relation, policy: &TagPolicy) -> bool {
        self.attrs.is_deleted() == other.attrs.is_deleted()
            && self.members == other.members
            && self.tags.equals(&other.tags, policy)
    }
}
