//! JSON artifacts written between pipeline stages, so any stage can be
//! rerun from the previous one's output.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::info;

/// Every section of every query, straight from the SERP API.
pub const AIO_DATA_FULL: &str = "aio_data_full.json";
/// First section only, for queries that have one.
pub const AIO_DATA: &str = "aio_data.json";
/// References with scraped content attached.
pub const SCRAPED_CONTENT: &str = "scraped_content.json";
/// Scrape sentinels removed, starting texts attached.
pub const CLEANED_SCRAPED_CONTENT: &str = "cleaned_scraped_content.json";
/// Optimization results keyed by query.
pub const CONTENT_GEN: &str = "content_gen.json";

pub struct ArtifactStore {
    dir: PathBuf,
}

impl ArtifactStore {
    pub fn new(dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create output dir {}", dir.display()))?;
        Ok(Self {
            dir: dir.to_path_buf(),
        })
    }

    pub fn path(&self, name: &str) -> PathBuf {
        self.dir.join(name)
    }

    pub fn write<T: Serialize>(&self, name: &str, value: &T) -> Result<PathBuf> {
        let path = self.path(name);
        let json = serde_json::to_string_pretty(value).context("serialize artifact")?;
        std::fs::write(&path, json)
            .with_context(|| format!("Failed to write {}", path.display()))?;
        info!(path = %path.display(), "Artifact written");
        Ok(path)
    }

    pub fn read<T: DeserializeOwned>(&self, name: &str) -> Result<T> {
        let path = self.path(name);
        let bytes = std::fs::read(&path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        serde_json::from_slice(&bytes)
            .with_context(|| format!("Malformed artifact {}", path.display()))
    }
}

/// Load the `query -> starting text` map. An empty string means "generate one".
pub fn read_queries(path: &Path) -> Result<std::collections::BTreeMap<String, String>> {
    let bytes = std::fs::read(path)
        .with_context(|| format!("Failed to read queries file {}", path.display()))?;
    serde_json::from_slice(&bytes)
        .with_context(|| format!("Queries file {} must map query to starting text", path.display()))
}
