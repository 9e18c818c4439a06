use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::auth::AuthConfig;

pub const DEFAULT_SEARCH_LIMIT: usize = 1000;

/// Settings for a [`Facade`](crate::facade::Facade).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Config {
    /// Directory holding one JSON file per document.
    pub data_dir: PathBuf,
    /// Directory of the full-text index. `None` keeps the index in memory;
    /// it is rebuilt from the store at open either way.
    pub index_dir: Option<PathBuf>,
    /// Maximum number of search hits returned.
    pub search_limit: usize,
    #[serde(default)]
    pub auth: AuthConfig,
}

impl Config {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            ..Self::default()
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            index_dir: None,
            search_limit: DEFAULT_SEARCH_LIMIT,
            auth: AuthConfig::default(),
        }
    }
}
