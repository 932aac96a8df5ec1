//! Pool configuration stored at `<root>/config.json`

use crate::canonical::{CanonicalConfig, DEFAULT_DESIGNATOR_PREFIX, DEFAULT_POOL_MODULE};
use crate::error::{PoolError, Result};
use crate::frontend::Frontend;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable naming the pool directory
pub const POOL_DIR_ENV: &str = "MOBIUS_DIRECTORY";

/// Pool directory used when the environment does not name one
pub const DEFAULT_POOL_DIR: &str = "./.mobius";

const CONFIG_FILE: &str = "config.json";

/// Author recorded in new Logic metadata
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Author {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

impl Default for Author {
    fn default() -> Self {
        Self {
            name: "anonymous".to_string(),
            email: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Pool directory; implied by where the file was loaded from
    #[serde(skip)]
    pub root: PathBuf,
    /// Database file name inside `root`
    pub database: String,
    /// Git mirror cache; `<root>/cache` when unset
    pub cache_dir: Option<PathBuf>,
    pub pool_module: String,
    pub designator_prefix: String,
    /// Upper bound for any remote transfer
    pub transport_timeout_secs: u64,
    pub author: Author,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from(DEFAULT_POOL_DIR),
            database: "pool.db".to_string(),
            cache_dir: None,
            pool_module: DEFAULT_POOL_MODULE.to_string(),
            designator_prefix: DEFAULT_DESIGNATOR_PREFIX.to_string(),
            transport_timeout_secs: 120,
            author: Author::default(),
        }
    }
}

impl PoolConfig {
    /// Defaults rooted at `root`
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            ..Self::default()
        }
    }

    /// Load from the directory named by `MOBIUS_DIRECTORY`, or `./.mobius`
    pub fn from_env() -> Result<Self> {
        let root = std::env::var_os(POOL_DIR_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_POOL_DIR));
        Self::load(&root)
    }

    /// Load `<dir>/config.json`, falling back to defaults when it is absent
    pub fn load(dir: &Path) -> Result<Self> {
        let path = dir.join(CONFIG_FILE);
        if !path.exists() {
            return Ok(Self::with_root(dir));
        }
        let data = fs::read_to_string(&path)?;
        let mut config: PoolConfig = serde_json::from_str(&data).map_err(|e| {
            PoolError::invalid("config", format!("failed to parse {:?}: {}", path, e))
        })?;
        config.root = dir.to_path_buf();
        tracing::debug!("Loaded pool config from {:?}", path);
        Ok(config)
    }

    /// Write `<dir>/config.json`
    pub fn save(&self, dir: &Path) -> Result<()> {
        let data = serde_json::to_vec_pretty(self)
            .map_err(|e| PoolError::Serialization(e.to_string()))?;
        write_atomic(&dir.join(CONFIG_FILE), &data)
    }

    pub fn database_path(&self) -> PathBuf {
        self.root.join(&self.database)
    }

    pub fn cache_dir(&self) -> PathBuf {
        self.cache_dir
            .clone()
            .unwrap_or_else(|| self.root.join("cache"))
    }

    pub fn transport_timeout(&self) -> Duration {
        Duration::from_secs(self.transport_timeout_secs)
    }

    /// Canonicalizer settings for `frontend`
    pub fn canonical_config(&self, frontend: &dyn Frontend) -> CanonicalConfig {
        CanonicalConfig {
            designator_prefix: self.designator_prefix.clone(),
            pool_module: self.pool_module.clone(),
            builtins: frontend.builtins(),
        }
    }
}

/// Write through a temporary sibling, then rename over `path`
pub fn write_atomic(path: &Path, data: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    let tmp_path = staging_path(path);
    fs::write(&tmp_path, data)?;
    fs::rename(&tmp_path, path)?;
    Ok(())
}

/// `<path>.tmp`, the sibling a file is built in before being renamed over `path`
pub fn staging_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}
