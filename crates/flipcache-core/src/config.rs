//! Application configuration management.
//!
//! This module handles loading and saving the configuration: which site the
//! worker serves, how its store is versioned, what gets pre-cached and how
//! runtime responses are cached.
//!
//! Configuration is stored at `~/.config/flipcache/config.json`. The origin
//! and cache directory can be overridden with `FLIPCACHE_ORIGIN` and
//! `FLIPCACHE_CACHE_DIR`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::cache::CacheVersion;
use crate::manifest::ManifestSpec;
use crate::net::DEFAULT_REQUEST_TIMEOUT_SECS;
use crate::worker::{
    RuntimeCachePolicy, WorkerOptions, DEFAULT_BATCH_SIZE, DEFAULT_SHELL_PAGE, DEFAULT_SYNC_TAG,
};

/// Application name used for config/cache directory paths
const APP_NAME: &str = "flipcache";

/// Config file name
const CONFIG_FILE: &str = "config.json";

/// Environment variable overriding `origin`
pub const ENV_ORIGIN: &str = "FLIPCACHE_ORIGIN";

/// Environment variable overriding `cache_dir`
pub const ENV_CACHE_DIR: &str = "FLIPCACHE_CACHE_DIR";

const DEFAULT_ORIGIN: &str = "http://localhost:8080/";
const DEFAULT_CACHE_PREFIX: &str = "rx-lifestyle";
const DEFAULT_CACHE_VERSION: u32 = 3;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Scope the worker serves. Manifest entries resolve against it.
    pub origin: String,
    pub cache_prefix: String,
    /// Bump on every deploy that changes cached content.
    pub cache_version: u32,
    pub batch_size: usize,
    pub shell_page: String,
    pub request_timeout_secs: u64,
    pub notify_uncontrolled: bool,
    pub runtime_policy: RuntimeCachePolicy,
    pub sync_tag: String,
    pub sync_urls: Vec<String>,
    pub manifest: ManifestSpec,
    /// Where disk-backed stores live. Defaults to the platform cache dir.
    pub cache_dir: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            origin: DEFAULT_ORIGIN.to_string(),
            cache_prefix: DEFAULT_CACHE_PREFIX.to_string(),
            cache_version: DEFAULT_CACHE_VERSION,
            batch_size: DEFAULT_BATCH_SIZE,
            shell_page: DEFAULT_SHELL_PAGE.to_string(),
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            notify_uncontrolled: true,
            runtime_policy: RuntimeCachePolicy::default(),
            sync_tag: DEFAULT_SYNC_TAG.to_string(),
            sync_urls: ["thumb", "page", "large"]
                .iter()
                .map(|dir| format!("./Complan/files/{}/", dir))
                .collect(),
            manifest: ManifestSpec::presentation_site(),
            cache_dir: None,
        }
    }
}

impl Config {
    /// Load from the default location, then apply environment overrides.
    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;
        let mut config = Self::load_from(&path)?;
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Load from `path`, falling back to defaults if it does not exist.
    pub fn load_from(path: &Path) -> Result<Self> {
        if path.exists() {
            let contents = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read {}", path.display()))?;
            serde_json::from_str(&contents)
                .with_context(|| format!("Invalid config file {}", path.display()))
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    pub fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find config directory"))?;
        Ok(config_dir.join(APP_NAME).join(CONFIG_FILE))
    }

    /// Apply overrides from a variable lookup. Empty values are ignored.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(origin) = lookup(ENV_ORIGIN).filter(|v| !v.is_empty()) {
            self.origin = origin;
        }
        if let Some(dir) = lookup(ENV_CACHE_DIR).filter(|v| !v.is_empty()) {
            self.cache_dir = Some(PathBuf::from(dir));
        }
    }

    pub fn cache_dir(&self) -> Result<PathBuf> {
        if let Some(ref dir) = self.cache_dir {
            return Ok(dir.clone());
        }
        let cache_dir = dirs::cache_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find cache directory"))?;
        Ok(cache_dir.join(APP_NAME))
    }

    /// The worker scope. A missing trailing slash is added so relative
    /// entries resolve inside the scope rather than next to it.
    pub fn scope(&self) -> Result<Url> {
        let mut origin = self.origin.clone();
        if !origin.ends_with('/') {
            origin.push('/');
        }
        Url::parse(&origin).with_context(|| format!("Invalid origin {:?}", self.origin))
    }

    pub fn version(&self) -> CacheVersion {
        CacheVersion::new(self.cache_prefix.clone(), self.cache_version)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn worker_options(&self) -> Result<WorkerOptions> {
        Ok(WorkerOptions::new(self.scope()?, self.version(), self.manifest.build())
            .with_batch_size(self.batch_size)
            .with_shell_page(self.shell_page.clone())
            .with_runtime_policy(self.runtime_policy.clone())
            .with_notify_uncontrolled(self.notify_uncontrolled)
            .with_sync(self.sync_tag.clone(), self.sync_urls.clone()))
    }
}
