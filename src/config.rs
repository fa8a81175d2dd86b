use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::data::tags::{DEFAULT_DISCARDABLE, DEFAULT_TRIVIAL};
use crate::errors::{Error, Result};

fn default_discardable() -> Vec<String> {
    DEFAULT_DISCARDABLE.iter().map(|s| s.to_string()).collect()
}

fn default_trivial() -> Vec<String> {
    DEFAULT_TRIVIAL.iter().map(|s| s.to_string()).collect()
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Tag key patterns; `*` matches any run of characters.
#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct TagPolicyConfig {
    #[serde(default = "default_discardable")]
    pub discardable: Vec<String>,
    #[serde(default = "default_trivial")]
    pub trivial: Vec<String>,
}

impl Default for TagPolicyConfig {
    fn default() -> Self {
        TagPolicyConfig {
            discardable: default_discardable(),
            trivial: default_trivial(),
        }
    }
}

#[derive(Deserialize, Debug, Clone)]
pub struct UserConfig {
    /// Written into the diff file and checked when it is restored.
    pub project_name: String,
    /// Upstream `.osm` file, optionally xz compressed.
    pub data_path: PathBuf,
    /// Holds the parse cache and the diff file.
    pub work_dir: PathBuf,
    #[serde(default)]
    pub tag_policy: TagPolicyConfig,
    /// When set, a `<delete>` block for this changeset is written on exit.
    #[serde(default)]
    pub changeset_id: Option<u64>,
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl UserConfig {
    pub fn diff_path(&self) -> PathBuf {
        self.work_dir.join(format!("{}.diff", self.project_name))
    }
}

pub fn load_user_config(path: impl AsRef<Path>) -> Result<UserConfig> {
    let path = path.as_ref();
    let file = File::open(path)
        .map_err(|e| Error::new(format!("Could not open config file {}: {e}", path.display())))?;
    let config: UserConfig = serde_json::from_reader(BufReader::new(file))?;
    if config.project_name.is_empty() {
        return Err("Config needs a non-empty project_name".into());
    }
    Ok(config)
}
