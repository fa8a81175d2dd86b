pub mod codec;
pub mod config;
pub mod data;
pub mod edit;
pub mod errors;
pub mod etl;

pub use config::{load_user_config, UserConfig};
pub use data::MapDataStore;
pub use errors::{Error, Result};
