use std::fs::{self, File};
use std::io::{BufRead, BufReader, Read, Write};
use std::path::{Path, PathBuf};

use chrono::DateTime;
use log::{info, warn};
use quick_xml::events::{BytesStart, Event};
use quick_xml::reader::Reader;
use xz::bufread::XzDecoder;

use crate::codec::{attributes, optional, required};
use crate::config::UserConfig;
use crate::data::osm::{BaseAttributes, Bounds, Member, Node, ObjectKind, ObjectRef, OsmId, Pos, Relation, Way};
use crate::data::tags::TagSet;
use crate::data::UpstreamData;
use crate::errors::{Error, Result};

use super::Etl;

pub const ETL_NAME: &str = "parse_osm";
pub const OUTPUT_FILE_NAME: &str = "upstream.rkyv";

enum Element {
    Node(Node),
    Way(Way),
    Relation(Relation),
}

impl Element {
    fn tags(&mut self) -> &mut TagSet {
        match self {
            Element::Node(node) => &mut node.tags,
            Element::Way(way) => &mut way.tags,
            Element::Relation(relation) => &mut relation.tags,
        }
    }

    fn finish(self, data: &mut UpstreamData) {
        match self {
            Element::Node(node) => data.nodes.push(node),
            Element::Way(way) => data.ways.push(way),
            Element::Relation(relation) => data.relations.push(relation),
        }
    }
}

fn parse_base(el: &BytesStart, name: &str) -> Result<Option<BaseAttributes>> {
    let attrs = attributes(el)?;
    if attrs.get("visible").is_some_and(|v| v == "false") || attrs.get("action").is_some_and(|v| v == "delete") {
        return Ok(None);
    }
    let time = match attrs.get("timestamp") {
        Some(raw) => DateTime::parse_from_rfc3339(raw)?.timestamp(),
        None => 0,
    };
    Ok(Some(BaseAttributes {
        id: required(&attrs, "id", name)?,
        version: optional(&attrs, "version", name)?.unwrap_or(0),
        time,
        ..BaseAttributes::default()
    }))
}

fn parse_element(el: &BytesStart) -> Result<Option<Element>> {
    let element = match el.name().as_ref() {
        b"node" => {
            let Some(base) = parse_base(el, "node")? else { return Ok(None) };
            let attrs = attributes(el)?;
            let mut node = Node::new(Pos::new(required(&attrs, "lat", "node")?, required(&attrs, "lon", "node")?));
            node.attrs = base;
            Element::Node(node)
        },
        b"way" => {
            let Some(base) = parse_base(el, "way")? else { return Ok(None) };
            let mut way = Way::new();
            way.attrs = base;
            Element::Way(way)
        },
        b"relation" => {
            let Some(base) = parse_base(el, "relation")? else { return Ok(None) };
            let mut relation = Relation::new();
            relation.attrs = base;
            Element::Relation(relation)
        },
        _ => return Ok(None),
    };
    Ok(Some(element))
}

fn parse_child(el: &BytesStart, element: &mut Element) -> Result<()> {
    let attrs = attributes(el)?;
    match (el.name().as_ref(), element) {
        (b"tag", element) => {
            let key: String = required(&attrs, "k", "tag")?;
            let value: String = required(&attrs, "v", "tag")?;
            element.tags().insert(key, value);
        },
        (b"nd", Element::Way(way)) => way.chain.push(required(&attrs, "ref", "nd")?),
        (b"member", Element::Relation(relation)) => {
            let type_name: String = required(&attrs, "type", "member")?;
            let kind = ObjectKind::from_name(&type_name)
                .ok_or_else(|| Error::new(format!("member has unknown type '{type_name}'")))?;
            let id: OsmId = required(&attrs, "ref", "member")?;
            relation.members.push(Member::new(ObjectRef::id_only(kind, id), attrs.get("role").map(String::as_str)));
        },
        _ => (),
    }
    Ok(())
}

fn parse_bounds(el: &BytesStart) -> Result<Bounds> {
    let attrs = attributes(el)?;
    Ok(Bounds {
        min_lat: required(&attrs, "minlat", "bounds")?,
        min_lon: required(&attrs, "minlon", "bounds")?,
        max_lat: required(&attrs, "maxlat", "bounds")?,
        max_lon: required(&attrs, "maxlon", "bounds")?,
    })
}

/// Parses an OSM XML document. Deleted or invisible objects are skipped.
pub fn parse_osm<R: BufRead>(input: R) -> Result<UpstreamData> {
    let mut reader = Reader::from_reader(input);
    reader.trim_text(true);
    let mut buf = Vec::new();
    let mut data = UpstreamData::default();
    let mut current: Option<Element> = None;
    // depth of a skipped element we are inside of
    let mut skipping = 0usize;

    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Eof => break,
            Event::Start(e) => {
                if skipping > 0 {
                    skipping += 1;
                } else if let Some(element) = current.as_mut() {
                    parse_child(&e, element)?;
                } else if e.name().as_ref() == b"bounds" {
                    data.bounds = Some(parse_bounds(&e)?);
                } else if matches!(e.name().as_ref(), b"node" | b"way" | b"relation") {
                    current = parse_element(&e)?;
                    if current.is_none() {
                        skipping = 1;
                    }
                }
            },
            Event::Empty(_) if skipping > 0 => (),
            Event::Empty(e) => {
                if let Some(element) = current.as_mut() {
                    parse_child(&e, element)?;
                } else if e.name().as_ref() == b"bounds" {
                    data.bounds = Some(parse_bounds(&e)?);
                } else if let Some(element) = parse_element(&e)? {
                    element.finish(&mut data);
                }
            },
            Event::End(e) => {
                if skipping > 0 {
                    skipping -= 1;
                } else if matches!(e.name().as_ref(), b"node" | b"way" | b"relation") {
                    if let Some(element) = current.take() {
                        element.finish(&mut data);
                    }
                }
            },
            Event::Text(_) => return Err("Didn't expect to see Text in OSM file.".into()),
            _ => (),
        }
        buf.clear();
    }
    Ok(data)
}

pub struct ParseOsmEtl {
    data_path: PathBuf,
}

impl ParseOsmEtl {
    fn output_path(dir: &Path) -> PathBuf {
        dir.join(OUTPUT_FILE_NAME)
    }

    fn create_osm_reader(&self) -> Result<Box<dyn BufRead>> {
        let file = File::open(&self.data_path)
            .map_err(|e| Error::new(format!("Could not open {}: {e}", self.data_path.display())))?;
        let file_reader = BufReader::new(file);
        if self.data_path.extension().is_some_and(|ext| ext == "xz") {
            let xz_reader = XzDecoder::new(file_reader);
            Ok(Box::new(BufReader::new(xz_reader)))
        } else {
            Ok(Box::new(file_reader))
        }
    }

    pub fn new(config: &UserConfig) -> ParseOsmEtl {
        ParseOsmEtl {
            data_path: config.data_path.clone(),
        }
    }
}

impl Etl for ParseOsmEtl {
    type Input = Box<dyn BufRead>;
    type Output = UpstreamData;

    fn etl_name(&self) -> &str {
        ETL_NAME
    }

    fn is_cached(&self, dir: &Path) -> Result<bool> {
        Ok(Self::output_path(dir).try_exists()?)
    }

    fn clean(&self, dir: &Path) -> Result<()> {
        if self.is_cached(dir)? {
            fs::remove_file(Self::output_path(dir))?;
        }
        Ok(())
    }

    fn extract(&mut self, _dir: &Path) -> Result<Self::Input> {
        self.create_osm_reader()
    }

    fn transform(&mut self, input: Self::Input) -> Result<Self::Output> {
        let data = parse_osm(input)?;
        info!(
            nodes = data.nodes.len(),
            ways = data.ways.len(),
            relations = data.relations.len();
            "Parsed upstream data"
        );
        if data.bounds.is_none() {
            warn!(etl_name = ETL_NAME; "Upstream data has no bounds");
        }
        Ok(data)
    }

    fn load(&mut self, dir: &Path, output: &Self::Output) -> Result<()> {
        fs::create_dir_all(dir)?;
        let bytes = rkyv::to_bytes::<_, 256>(output)
            .map_err(|e| Error::new(format!("Could not serialize upstream cache: {e:?}")))?;
        let path = Self::output_path(dir);
        let temp = path.with_extension("rkyv.tmp");
        {
            let mut output_file = File::create(&temp)?;
            output_file.write_all(&bytes)?;
            output_file.sync_all()?;
        }
        fs::rename(&temp, &path)?;
        Ok(())
    }

    fn read_cache(&mut self, dir: &Path) -> Result<Self::Output> {
        let mut input_file = File::open(Self::output_path(dir))?;
        let mut buf_vec: Vec<u8> = Vec::new();
        input_file.read_to_end(&mut buf_vec)?;
        let mut aligned = rkyv::AlignedVec::with_capacity(buf_vec.len());
        aligned.extend_from_slice(&buf_vec);

        rkyv::from_bytes::<UpstreamData>(&aligned)
            .map_err(|e| Error::new(format!("Could not deserialize upstream cache: {e:?}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const SAMPLE: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<osm version="0.6" generator="test">
  <bounds minlat="51.50" minlon="-0.15" maxlat="51.52" maxlon="-0.12"/>
  <node id="1" lat="51.51" lon="-0.13" version="3" timestamp="2020-01-01T00:00:10Z"/>
  <node id="2" lat="51.511" lon="-0.131" version="1">
    <tag k="highway" v="crossing"/>
  </node>
  <node id="3" lat="51.512" lon="-0.132" version="2" visible="false"/>
  <way id="10" version="4">
    <nd ref="1"/>
    <nd ref="2"/>
    <tag k="highway" v="footway"/>
    <tag k="name" v="Fish &amp; Chips Row"/>
  </way>
  <relation id="20" version="1">
    <member type="way" ref="10" role="outer"/>
    <member type="node" ref="99" role=""/>
    <tag k="type" v="multipolygon"/>
  </relation>
</osm>"#;

    #[test]
    fn parses_all_element_kinds() {
        let data = parse_osm(SAMPLE.as_bytes()).unwrap();
        assert_eq!(data.bounds.map(|b| b.max_lon), Some(-0.12));
        assert_eq!(data.nodes.len(), 2);
        assert_eq!(data.nodes[0].attrs.version, 3);
        assert_eq!(data.nodes[0].attrs.time, 1_577_836_810);
        assert_eq!(data.nodes[1].tags.get("highway"), Some("crossing"));
        assert_eq!(data.ways[0].chain, vec![1, 2]);
        assert_eq!(data.ways[0].tags.get("name"), Some("Fish & Chips Row"));
        let members = &data.relations[0].members;
        assert_eq!(members[0].object, ObjectRef::WayId(10));
        assert_eq!(members[0].role(), "outer");
        assert_eq!(members[1].role, None);
    }

    #[test]
    fn rejects_bad_numbers() {
        assert!(parse_osm(r#"<osm><node id="a" lat="1" lon="2"/></osm>"#.as_bytes()).is_err());
        assert!(parse_osm(r#"<osm><node id="1" lat="1"/></osm>"#.as_bytes()).is_err());
    }

    #[test]
    fn process_caches_and_reads_back() {
        let dir = tempfile::tempdir().unwrap();
        let data_path = dir.path().join("area.osm");
        File::create(&data_path).unwrap().write_all(SAMPLE.as_bytes()).unwrap();
        let work_dir = dir.path().join("work");

        let mut etl = ParseOsmEtl { data_path };
        let parsed = etl.process(&work_dir).unwrap();
        assert!(etl.is_cached(&work_dir).unwrap());

        let cached = etl.process(&work_dir).unwrap();
        assert_eq!(cached.nodes.len(), parsed.nodes.len());
        assert_eq!(cached.ways[0].chain, parsed.ways[0].chain);
        assert_eq!(cached.nodes[1].pos(), parsed.nodes[1].pos());
        assert_eq!(cached.relations[0].members, parsed.relations[0].members);

        etl.clean(&work_dir).unwrap();
        assert!(!etl.is_cached(&work_dir).unwrap());
    }

    #[test]
    fn truncated_cache_is_rebuilt() {
        let dir = tempfile::tempdir().unwrap();
        let data_path = dir.path().join("area.osm");
        File::create(&data_path).unwrap().write_all(SAMPLE.as_bytes()).unwrap();
        let work_dir = dir.path().join("work");

        let mut etl = ParseOsmEtl { data_path };
        etl.process(&work_dir).unwrap();
        let cache = ParseOsmEtl::output_path(&work_dir);
        let bytes = fs::read(&cache).unwrap();
        fs::write(&cache, &bytes[..bytes.len() / 2]).unwrap();
        assert!(etl.read_cache(&work_dir).is_err());

        let rebuilt = etl.process(&work_dir).unwrap();
        assert_eq!(rebuilt.nodes.len(), 2);
        assert_eq!(fs::read(&cache).unwrap(), bytes);
        assert!(!work_dir.join("upstream.rkyv.tmp").exists());
    }

    #[test]
    fn garbage_cache_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(OUTPUT_FILE_NAME), b"not an archive at all, just bytes").unwrap();
        let mut etl = ParseOsmEtl { data_path: dir.path().join("area.osm") };
        assert!(etl.read_cache(dir.path()).is_err());
    }

    #[test]
    fn reads_xz_compressed_input() {
        let dir = tempfile::tempdir().unwrap();
        let data_path = dir.path().join("area.osm.xz");
        let mut encoder = xz::write::XzEncoder::new(File::create(&data_path).unwrap(), 6);
        encoder.write_all(SAMPLE.as_bytes()).unwrap();
        encoder.finish().unwrap();

        let mut etl = ParseOsmEtl { data_path };
        let data = etl.process(&dir.path().join("work")).unwrap();
        assert_eq!(data.ways.len(), 1);
    }
}
