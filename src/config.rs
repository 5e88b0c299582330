//! Configuration management using the prefer crate.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::adapters::{NavigationPolicy, PacingConfig, SiteSelectors};
use crate::browser::{BrowserEngineConfig, PoolConfig};
use crate::queue::WorkerConfig;
use crate::scheduler::ScheduleConfig;
use crate::sync::SyncConfig;

/// Default crawl-state database filename.
pub const DEFAULT_DATABASE_FILENAME: &str = "comicrawl.db";

/// Default production catalog database filename.
pub const DEFAULT_CATALOG_FILENAME: &str = "catalog.db";

/// Default asset subdirectory name.
const ASSETS_SUBDIR: &str = "assets";

/// Configuration file structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Data directory path.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_dir: Option<String>,
    /// Crawl-state database filename or path.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database: Option<String>,
    /// Production catalog database filename or path.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub catalog_database: Option<String>,
    /// Root of the asset store.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub asset_dir: Option<String>,
    #[serde(default)]
    pub browser: BrowserEngineConfig,
    #[serde(default)]
    pub pool: PoolConfig,
    #[serde(default)]
    pub worker: WorkerConfig,
    #[serde(default)]
    pub schedule: ScheduleConfig,
    #[serde(default)]
    pub navigation: NavigationPolicy,
    #[serde(default)]
    pub pacing: PacingConfig,
    #[serde(default)]
    pub sync: SyncConfig,
    /// Selector rules keyed by source domain.
    #[serde(default)]
    pub sites: BTreeMap<String, SiteSelectors>,
    /// Path to the config file this was loaded from (not serialized).
    #[serde(skip)]
    pub source_path: Option<PathBuf>,
}

impl Config {
    /// Discover a `comicrawl` config file in the standard locations. Falls
    /// back to defaults when none is found or it fails to parse.
    pub async fn load() -> Self {
        let discovered = match prefer::load("comicrawl").await {
            Ok(found) => found.source_path().map(|p| p.to_path_buf()),
            Err(_) => None,
        };

        match discovered {
            Some(path) => match Self::load_from_path(&path).await {
                Ok(config) => config,
                Err(e) => {
                    tracing::warn!("Ignoring config {}: {:#}", path.display(), e);
                    Self::default().with_env_overrides()
                }
            },
            None => Self::default().with_env_overrides(),
        }
    }

    /// Load configuration from a specific file. The format follows the
    /// extension: TOML, YAML, otherwise JSON.
    pub async fn load_from_path(path: &Path) -> Result<Self> {
        let contents = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read config file {}", path.display()))?;

        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("json");
        let mut config = Self::parse(&contents, ext)?;
        config.source_path = Some(path.to_path_buf());
        Ok(config.with_env_overrides())
    }

    pub fn parse(contents: &str, ext: &str) -> Result<Self> {
        let config: Config = match ext {
            "toml" => toml::from_str(contents).context("Failed to parse TOML config")?,
            "yaml" | "yml" => {
                serde_yaml::from_str(contents).context("Failed to parse YAML config")?
            }
            _ => serde_json::from_str(contents).context("Failed to parse JSON config")?,
        };
        Ok(config)
    }

    pub fn with_env_overrides(mut self) -> Self {
        self.browser = self.browser.with_env_overrides();
        self.pool = self.pool.with_env_overrides();
        self
    }

    /// Directory relative paths resolve against: the config file's
    /// directory when there is one.
    pub fn base_dir(&self) -> Option<PathBuf> {
        self.source_path
            .as_ref()
            .and_then(|p| p.parent().map(|p| p.to_path_buf()))
    }

    /// Expand `~` and resolve relative paths against `base_dir`.
    pub fn resolve_path(&self, path_str: &str, base_dir: &Path) -> PathBuf {
        let expanded = shellexpand::tilde(path_str);
        let path = Path::new(expanded.as_ref());

        if path.is_absolute() {
            path.to_path_buf()
        } else {
            base_dir.join(path)
        }
    }

    pub fn apply_to_settings(&self, settings: &mut Settings, base_dir: &Path) {
        if let Some(ref data_dir) = self.data_dir {
            settings.data_dir = self.resolve_path(data_dir, base_dir);
        }
        settings.database_path = self.resolve_file(
            self.database.as_deref(),
            DEFAULT_DATABASE_FILENAME,
            &settings.data_dir,
        );
        settings.catalog_path = self.resolve_file(
            self.catalog_database.as_deref(),
            DEFAULT_CATALOG_FILENAME,
            &settings.data_dir,
        );
        settings.asset_dir = match self.asset_dir {
            Some(ref dir) => self.resolve_path(dir, base_dir),
            None => settings.data_dir.join(ASSETS_SUBDIR),
        };
    }

    /// Bare filenames live in the data directory; anything with a path
    /// component is resolved on its own.
    fn resolve_file(&self, value: Option<&str>, default: &str, data_dir: &Path) -> PathBuf {
        match value {
            Some(v) if v.contains('/') || v.starts_with('~') => self.resolve_path(v, data_dir),
            Some(v) => data_dir.join(v),
            None => data_dir.join(default),
        }
    }
}

/// Resolved runtime paths.
#[derive(Debug, Clone)]
pub struct Settings {
    pub data_dir: PathBuf,
    /// Crawl targets and jobs.
    pub database_path: PathBuf,
    /// Production catalog sink.
    pub catalog_path: PathBuf,
    pub asset_dir: PathBuf,
}

impl Default for Settings {
    fn default() -> Self {
        // Platform data dir -> home dir -> current dir
        let data_dir = dirs::data_dir()
            .or_else(dirs::home_dir)
            .unwrap_or_else(|| PathBuf::from("."))
            .join("comicrawl");
        Self::in_dir(data_dir)
    }
}

impl Settings {
    /// Default layout inside `data_dir`.
    pub fn in_dir(data_dir: impl Into<PathBuf>) -> Self {
        let data_dir = data_dir.into();
        Self {
            database_path: data_dir.join(DEFAULT_DATABASE_FILENAME),
            catalog_path: data_dir.join(DEFAULT_CATALOG_FILENAME),
            asset_dir: data_dir.join(ASSETS_SUBDIR),
            data_dir,
        }
    }
}

/// Options for loading settings.
#[derive(Debug, Clone, Default)]
pub struct LoadOptions {
    /// Explicit config file path (overrides discovery).
    pub config_path: Option<PathBuf>,
    /// Data directory override (`--data`).
    pub data_dir: Option<PathBuf>,
}

/// Load config and resolve settings. Precedence for the data directory:
/// `--data`, then `COMICRAWL_DATA_DIR`, then the config file, then the
/// platform default.
pub async fn load_settings(options: LoadOptions) -> Result<(Settings, Config)> {
    let config = match options.config_path {
        Some(ref path) => Config::load_from_path(path).await?,
        None => Config::load().await,
    };

    let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
    let base_dir = config.base_dir().unwrap_or_else(|| cwd.clone());

    let mut config = config;
    let data_override = options.data_dir.or_else(|| {
        std::env::var("COMICRAWL_DATA_DIR")
            .ok()
            .filter(|s| !s.trim().is_empty())
            .map(PathBuf::from)
    });
    if let Some(dir) = data_override {
        let dir = if dir.is_absolute() { dir } else { cwd.join(dir) };
        tracing::debug!("Using data directory override: {}", dir.display());
        config.data_dir = Some(dir.to_string_lossy().into_owned());
    }

    let mut settings = Settings::default();
    config.apply_to_settings(&mut settings, &base_dir);
    Ok((settings, config))
}
