use std::env;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};

use crate::config::themes::ThemeRegistry;
use crate::filter::SortKey;

pub mod themes;

const APP_DOMAIN: &str = "io";
const APP_ORG: &str = "JobsTui";
const APP_NAME: &str = "jobtui";

pub const CONFIG_ENV: &str = "JOBTUI_CONFIG";
pub const DATA_ENV: &str = "JOBTUI_DATA";

pub struct ConfigLoader {
    paths: ConfigPaths,
}

impl ConfigLoader {
    pub fn discover() -> Result<Self> {
        let paths = ConfigPaths::discover()?;
        Ok(Self { paths })
    }

    pub fn with_paths(paths: ConfigPaths) -> Self {
        Self { paths }
    }

    pub fn paths(&self) -> &ConfigPaths {
        &self.paths
    }

    pub fn load_or_init(&self) -> Result<AppConfig> {
        self.paths.ensure_directories()?;
        if !self.paths.config_file.exists() {
            let mut default_cfg = AppConfig::default();
            default_cfg.post_load(&self.paths)?;
            self.write_default_config(&default_cfg)?;
            return Ok(default_cfg);
        }

        self.load()
    }

    pub fn load(&self) -> Result<AppConfig> {
        let raw = fs::read_to_string(&self.paths.config_file)
            .with_context(|| format!("reading config {}", self.paths.config_file.display()))?;
        let mut cfg: AppConfig = toml::from_str(&raw).context("parsing config toml")?;
        cfg.post_load(&self.paths)?;
        Ok(cfg)
    }

    fn write_default_config(&self, cfg: &AppConfig) -> Result<()> {
        let toml = toml::to_string_pretty(cfg).context("serializing default config")?;
        if let Some(parent) = self.paths.config_file.parent() {
            fs::create_dir_all(parent).with_context(|| format!("creating {}", parent.display()))?;
        }
        let mut file = fs::File::create(&self.paths.config_file)
            .with_context(|| format!("creating config {}", self.paths.config_file.display()))?;
        file.write_all(toml.as_bytes())
            .context("writing default config")?;
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct ConfigPaths {
    pub config_dir: PathBuf,
    pub config_file: PathBuf,
    pub data_dir: PathBuf,
    pub database_path: PathBuf,
    pub cache_dir: PathBuf,
    pub log_dir: PathBuf,
    pub state_dir: PathBuf,
}

impl ConfigPaths {
    pub fn discover() -> Result<Self> {
        let override_config = env::var(CONFIG_ENV).ok().map(PathBuf::from);
        let override_data = env::var(DATA_ENV).ok().map(PathBuf::from);

        let project_dirs = ProjectDirs::from(APP_DOMAIN, APP_ORG, APP_NAME)
            .context("resolving XDG project directories")?;

        let config_dir = override_config
            .clone()
            .map(|p| {
                if p.is_dir() {
                    p
                } else {
                    p.parent().map(Path::to_path_buf).unwrap_or(p)
                }
            })
            .unwrap_or_else(|| project_dirs.config_dir().to_path_buf());

        let config_file = override_config
            .filter(|p| p.is_file() || p.extension().is_some())
            .unwrap_or_else(|| config_dir.join("config.toml"));

        let data_root = override_data.unwrap_or_else(|| project_dirs.data_dir().to_path_buf());
        let database_path = data_root.join("jobs.db");

        let cache_dir = project_dirs.cache_dir().to_path_buf();
        let state_dir = project_dirs
            .state_dir()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| data_root.join("state"));
        let log_dir = state_dir.join("logs");

        Ok(Self {
            config_dir,
            config_file,
            data_dir: data_root,
            database_path,
            cache_dir,
            log_dir,
            state_dir,
        })
    }

    pub fn ensure_directories(&self) -> Result<()> {
        for dir in [
            &self.config_dir,
            &self.data_dir,
            &self.cache_dir,
            &self.log_dir,
            &self.state_dir,
        ] {
            fs::create_dir_all(dir)
                .with_context(|| format!("creating application directory {}", dir.display()))?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub theme: ThemeName,
    pub default_sort: SortKey,
    /// Offset used to decide what "today" is for the date filters.
    pub utc_offset_minutes: i16,
    pub api: ApiConfig,
    pub window: WindowConfig,
    pub search: SearchOptions,
    pub session: SessionConfig,
    pub offline: OfflineConfig,
    pub storage: StorageOptions,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            theme: ThemeName::Dark,
            default_sort: SortKey::Default,
            utc_offset_minutes: 9 * 60,
            api: ApiConfig::default(),
            window: WindowConfig::default(),
            search: SearchOptions::default(),
            session: SessionConfig::default(),
            offline: OfflineConfig::default(),
            storage: StorageOptions::default(),
        }
    }
}

impl AppConfig {
    fn post_load(&mut self, paths: &ConfigPaths) -> Result<()> {
        self.storage
            .resolve(paths)
            .context("resolving storage paths")?;
        if !ThemeRegistry::default().contains(&self.theme) {
            tracing::warn!(?self.theme, "unknown theme in config, falling back to Dark");
            self.theme = ThemeName::Dark;
        }
        if self.window.page_size == 0 {
            tracing::warn!("window.page_size must be positive, using 20");
            self.window.page_size = WindowConfig::default().page_size;
        }
        if self.window.max_pages == 0 {
            tracing::warn!("window.max_pages must be positive, using 3");
            self.window.max_pages = WindowConfig::default().max_pages;
        }
        Ok(())
    }

    pub fn utc_offset(&self) -> time::UtcOffset {
        crate::model::utc_offset_from_minutes(self.utc_offset_minutes)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    /// Origin serving the `/api/jobs` proxy and the cached shell.
    pub base_url: String,
    pub jobs_path: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8788".to_string(),
            jobs_path: "/api/jobs".to_string(),
        }
    }
}

impl ApiConfig {
    pub fn origin(&self) -> &str {
        self.base_url.trim_end_matches('/')
    }

    pub fn jobs_url(&self) -> String {
        let path = self.jobs_path.trim();
        if path.starts_with('/') {
            format!("{}{}", self.origin(), path)
        } else {
            format!("{}/{}", self.origin(), path)
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WindowConfig {
    pub page_size: usize,
    pub max_pages: usize,
    /// Lines from either edge of the viewport that trigger a window shift.
    pub sentinel_margin: u16,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            page_size: 20,
            max_pages: 3,
            sentinel_margin: 2,
        }
    }
}

impl WindowConfig {
    pub fn cap(&self) -> usize {
        self.page_size * self.max_pages
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchOptions {
    pub debounce_ms: u64,
    pub recent_limit: usize,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            debounce_ms: 250,
            recent_limit: crate::history::RECENT_SEARCH_LIMIT,
        }
    }
}

impl SearchOptions {
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub persist: bool,
    pub throttle_ms: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            persist: true,
            throttle_ms: 500,
        }
    }
}

impl SessionConfig {
    pub fn throttle(&self) -> Duration {
        Duration::from_millis(self.throttle_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OfflineConfig {
    pub enabled: bool,
    pub cache_version: String,
    /// Show the last good record snapshot when a fetch fails.
    pub fallback_to_snapshot: bool,
}

impl Default for OfflineConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            cache_version: "jobs-app-static-v20260221_1".to_string(),
            fallback_to_snapshot: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageOptions {
    #[serde(skip)]
    pub database_path: PathBuf,
    pub wal_autocheckpoint: u32,
    pub busy_timeout_ms: u64,
}

impl Default for StorageOptions {
    fn default() -> Self {
        Self {
            database_path: PathBuf::new(),
            wal_autocheckpoint: 1000,
            busy_timeout_ms: 2000,
        }
    }
}

impl StorageOptions {
    fn resolve(&mut self, paths: &ConfigPaths) -> Result<()> {
        if self.database_path.as_os_str().is_empty() {
            self.database_path = paths.database_path.clone();
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "kebab-case")]
pub enum ThemeName {
    #[default]
    Dark,
    Light,
    HighContrast,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::tests::temp_paths;
    use tempfile::TempDir;

    #[test]
    fn first_run_writes_default_config() -> Result<()> {
        let temp = TempDir::new()?;
        let loader = ConfigLoader::with_paths(temp_paths(&temp));
        let cfg = loader.load_or_init()?;
        assert!(loader.paths().config_file.exists());
        assert_eq!(cfg.window.cap(), 60);
        assert_eq!(cfg.storage.database_path, loader.paths().database_path);

        let raw = fs::read_to_string(&loader.paths().config_file)?;
        assert!(raw.contains("[window]"));
        assert!(raw.contains("cache_version"));
        Ok(())
    }

    #[test]
    fn partial_config_fills_defaults() -> Result<()> {
        let temp = TempDir::new()?;
        let paths = temp_paths(&temp);
        paths.ensure_directories()?;
        fs::write(
            &paths.config_file,
            "default_sort = \"deadline\"\n[api]\nbase_url = \"https://jobs.example.org/\"\n[window]\npage_size = 0\n",
        )?;
        let cfg = ConfigLoader::with_paths(paths).load()?;
        assert_eq!(cfg.default_sort, SortKey::Deadline);
        assert_eq!(cfg.api.jobs_url(), "https://jobs.example.org/api/jobs");
        assert_eq!(cfg.window.page_size, 20);
        assert_eq!(cfg.search.debounce(), Duration::from_millis(250));
        Ok(())
    }

    #[test]
    fn malformed_config_is_an_error() -> Result<()> {
        let temp = TempDir::new()?;
        let paths = temp_paths(&temp);
        paths.ensure_directories()?;
        fs::write(&paths.config_file, "theme = [")?;
        let err = ConfigLoader::with_paths(paths).load().unwrap_err();
        assert!(format!("{err:#}").contains("parsing config toml"));
        Ok(())
    }
}
