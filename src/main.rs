use std::env;
use std::fs::{self, create_dir_all};
use std::io;

use log::info;
use structured_logger::json::new_writer;
use structured_logger::Builder;

use osm_edit::codec::changeset::delete_section;
use osm_edit::codec::diff::DiffCodec;
use osm_edit::data::tags::TagPolicy;
use osm_edit::etl::parse_osm::ParseOsmEtl;
use osm_edit::etl::Etl;
use osm_edit::{load_user_config, MapDataStore, Result};

const DEFAULT_CONFIG_PATH: &str = "config/session.json";

fn setup_logging(level: &str) {
    Builder::with_level(level)
        .with_target_writer("*", new_writer(io::stdout()))
        .init();
}

fn main() -> Result<()> {
    let config_path = env::args().nth(1).unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string());
    let user_config = load_user_config(&config_path)?;
    setup_logging(&user_config.log_level);

    create_dir_all(&user_config.work_dir)?;
    let mut etl = ParseOsmEtl::new(&user_config);
    let upstream = etl.process(&user_config.work_dir)?;

    let policy = TagPolicy::from_config(&user_config.tag_policy)?;
    let mut store = MapDataStore::from_upstream(upstream, policy);

    let codec = DiffCodec::new(user_config.diff_path(), user_config.project_name.as_str());
    let report = codec.restore(&mut store)?;
    let summary = store.dirty_summary();
    info!(
        applied = report.applied,
        ignored = report.ignored,
        name_mismatch = report.name_mismatch,
        added_nodes = summary.nodes.added,
        modified_ways = summary.ways.modified,
        deleted = summary.nodes.deleted + summary.ways.deleted + summary.relations.deleted;
        "Session ready"
    );
    codec.save(&store)?;

    if let Some(changeset) = user_config.changeset_id {
        let path = user_config.work_dir.join(format!("{}-delete.xml", user_config.project_name));
        fs::write(&path, delete_section(&store, changeset)?)?;
        info!(path = &*path.to_string_lossy(), changeset = changeset; "Wrote delete section");
    }

    Ok(())
}
