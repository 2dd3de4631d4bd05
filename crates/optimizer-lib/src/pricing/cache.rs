//! On-disk cache of reference prices
//!
//! Written after every successful live fetch and read back only when the
//! live source fails and the entry is younger than the freshness window.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct CacheFile {
    timestamp: DateTime<Utc>,
    prices: BTreeMap<String, f64>,
}

/// Prices read back from the cache
#[derive(Debug, Clone, PartialEq)]
pub struct CachedPrices {
    pub prices: BTreeMap<String, f64>,
    pub written_at: DateTime<Utc>,
}

/// JSON file cache with a maximum trusted age
#[derive(Debug, Clone)]
pub struct PriceCache {
    path: PathBuf,
    max_age: Duration,
}

impl PriceCache {
    pub fn new(path: impl Into<PathBuf>, max_age: Duration) -> Self {
        Self {
            path: path.into(),
            max_age,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Store prices stamped with the current time
    pub fn store(&self, prices: &BTreeMap<String, f64>) -> Result<()> {
        self.store_at(prices, Utc::now())
    }

    /// Store prices with an explicit timestamp
    pub fn store_at(&self, prices: &BTreeMap<String, f64>, timestamp: DateTime<Utc>) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory {:?}", parent))?;
        }

        let entry = CacheFile {
            timestamp,
            prices: prices.clone(),
        };
        let json = serde_json::to_vec(&entry).context("Failed to serialize price cache")?;

        // Write atomically using temp file
        let temp_path = self.path.with_extension("tmp");
        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&temp_path)
            .with_context(|| format!("Failed to create temp file {:?}", temp_path))?;

        file.write_all(&json).context("Failed to write price cache")?;
        file.sync_all().context("Failed to sync price cache")?;

        std::fs::rename(&temp_path, &self.path)
            .with_context(|| format!("Failed to rename {:?} to {:?}", temp_path, self.path))?;

        debug!(path = %self.path.display(), classes = prices.len(), "Price cache refreshed");
        Ok(())
    }

    /// Load the cache if it exists and is younger than the maximum age
    pub fn load_fresh(&self, now: DateTime<Utc>) -> Result<Option<CachedPrices>> {
        if !self.path.exists() {
            return Ok(None);
        }

        let mut file = File::open(&self.path)
            .with_context(|| format!("Failed to open price cache {:?}", self.path))?;
        let mut data = Vec::new();
        file.read_to_end(&mut data)
            .context("Failed to read price cache")?;

        let entry: CacheFile =
            serde_json::from_slice(&data).context("Failed to deserialize price cache")?;

        let age = now.signed_duration_since(entry.timestamp);
        let max_age = chrono::Duration::from_std(self.max_age).unwrap_or(chrono::Duration::MAX);
        if age >= max_age {
            debug!(age_secs = age.num_seconds(), "Price cache expired");
            return Ok(None);
        }

        Ok(Some(CachedPrices {
            prices: entry.prices,
            written_at: entry.timestamp,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn prices() -> BTreeMap<String, f64> {
        BTreeMap::from([("g4dn.xlarge".to_string(), 1.05), ("g5.xlarge".to_string(), 1.3)])
    }

    #[test]
    fn test_store_and_load() {
        let dir = TempDir::new().unwrap();
        let cache = PriceCache::new(dir.path().join("prices.json"), Duration::from_secs(86_400));

        cache.store(&prices()).unwrap();
        let loaded = cache.load_fresh(Utc::now()).unwrap().unwrap();

        assert_eq!(loaded.prices, prices());
    }

    #[test]
    fn test_expired_entry_ignored() {
        let dir = TempDir::new().unwrap();
        let cache = PriceCache::new(dir.path().join("prices.json"), Duration::from_secs(86_400));

        let old = Utc::now() - chrono::Duration::hours(25);
        cache.store_at(&prices(), old).unwrap();

        assert!(cache.load_fresh(Utc::now()).unwrap().is_none());
    }

    #[test]
    fn test_missing_file_is_none() {
        let dir = TempDir::new().unwrap();
        let cache = PriceCache::new(dir.path().join("absent.json"), Duration::from_secs(60));
        assert!(cache.load_fresh(Utc::now()).unwrap().is_none());
    }

    #[test]
    fn test_corrupt_file_is_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("prices.json");
        std::fs::write(&path, b"not json").unwrap();

        let cache = PriceCache::new(path, Duration::from_secs(60));
        assert!(cache.load_fresh(Utc::now()).is_err());
    }
}
