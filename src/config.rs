//! Runtime configuration.
//!
//! Defaults match the public Jamendo v3.0 endpoint. Values can be overridden
//! from the environment (see [`JamplayConfig::from_env`]) or set directly.

use std::path::PathBuf;
use std::time::Duration;

use crate::error::{JamplayError, Result};

/// Base URL for the Jamendo API.
pub const DEFAULT_API_BASE: &str = "https://api.jamendo.com/v3.0/";

/// Tracks per home page.
pub const DEFAULT_PAGE_SIZE: usize = 20;

/// Tracks requested per full network fetch.
pub const DEFAULT_NETWORK_BATCH: u32 = 200;

/// Featured playlists requested per fetch.
pub const DEFAULT_FEATURED_LIMIT: u32 = 10;

/// Recent plays returned by the repository.
pub const RECENT_PLAYS_LIMIT: usize = 10;

const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// Settings shared by the catalog client, store and state holders.
#[derive(Debug, Clone)]
pub struct JamplayConfig {
    /// Jamendo client id.
    pub client_id: String,
    /// Catalog base URL, with trailing slash.
    pub api_base: String,
    /// SQLite file backing the track cache.
    pub database_path: PathBuf,
    /// Tracks per page on the home list.
    pub page_size: usize,
    /// Tracks requested by a full network fetch.
    pub network_batch: u32,
    /// Featured playlists requested per fetch.
    pub featured_limit: u32,
    /// Whole-request HTTP timeout.
    pub http_timeout: Duration,
}

impl Default for JamplayConfig {
    fn default() -> Self {
        Self {
            client_id: String::new(),
            api_base: DEFAULT_API_BASE.to_string(),
            database_path: default_database_path(),
            page_size: DEFAULT_PAGE_SIZE,
            network_batch: DEFAULT_NETWORK_BATCH,
            featured_limit: DEFAULT_FEATURED_LIMIT,
            http_timeout: DEFAULT_HTTP_TIMEOUT,
        }
    }
}

impl JamplayConfig {
    /// Create a config with the given client id and defaults elsewhere.
    pub fn new<S: Into<String>>(client_id: S) -> Self {
        Self {
            client_id: client_id.into(),
            ..Default::default()
        }
    }

    /// Read `JAMENDO_CLIENT_ID`, `JAMPLAY_API_BASE` and `JAMPLAY_DB`.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        if let Ok(id) = std::env::var("JAMENDO_CLIENT_ID") {
            config.client_id = id;
        }
        if let Ok(base) = std::env::var("JAMPLAY_API_BASE") {
            config.set_api_base(base);
        }
        if let Ok(path) = std::env::var("JAMPLAY_DB") {
            config.database_path = PathBuf::from(path);
        }
        config.validate()?;
        Ok(config)
    }

    /// Set the API base, normalizing the trailing slash.
    pub fn set_api_base<S: Into<String>>(&mut self, base: S) {
        let mut base = base.into();
        if !base.ends_with('/') {
            base.push('/');
        }
        self.api_base = base;
    }

    /// Check that the config can talk to the catalog.
    pub fn validate(&self) -> Result<()> {
        if self.client_id.trim().is_empty() {
            return Err(JamplayError::MissingClientId);
        }
        if self.page_size == 0 {
            return Err(JamplayError::Config("page size must be positive".to_string()));
        }
        if !self.api_base.starts_with("http://") && !self.api_base.starts_with("https://") {
            return Err(JamplayError::Config(format!(
                "invalid API base: {}",
                self.api_base
            )));
        }
        Ok(())
    }
}

/// `<data dir>/jamplay/tracks.db`, or `./jamplay.db` when no data dir exists.
pub fn default_database_path() -> PathBuf {
    dirs::data_dir()
        .map(|dir| dir.join("jamplay").join("tracks.db"))
        .unwrap_or_else(|| PathBuf::from("jamplay.db"))
}
