//! Runtime configuration: archive layout plus bitmap codec tunables.
//!
//! Loaded from a JSON file with `--config`; any field left out takes its
//! default, so `{}` is the shipped archive.
//!
//! ```json
//! {
//!   "layout": { "tables": [
//!     { "kind": "image",  "offset": 0,     "count": 10256 },
//!     { "kind": "sound",  "offset": 82048, "count": 267 },
//!     { "kind": "font",   "offset": 84184, "count": 19 },
//!     { "kind": "shader", "offset": 84336, "count": 3 }
//!   ] },
//!   "bitmap": { "marker_window": 128 }
//! }
//! ```

use std::io;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::bitmap::BitmapConfig;
use crate::layout::{ArchiveLayout, LayoutError};

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Cannot read config: {0}")]
    Io(#[from] io::Error),
    #[error("Invalid config JSON: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("Invalid layout: {0}")]
    Layout(#[from] LayoutError),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub layout: ArchiveLayout,
    pub bitmap: BitmapConfig,
}

impl Config {
    pub fn from_json(bytes: &[u8]) -> Result<Self, ConfigError> {
        let config: Config = serde_json::from_slice(bytes)?;
        config.layout.check()?;
        Ok(config)
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        Self::from_json(&std::fs::read(path)?)
    }

    pub fn to_json(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec_pretty(self)
    }
}
