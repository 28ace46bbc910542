//! Application Alias Registry
//!
//! Maps short aliases used in step tables (`wechat`) to the package names
//! the device launches (`com.tencent.mm`).
//!
//! # Registry Resolution Priority
//!
//! `apps.json` is looked up in the following order:
//! 1. Next to the autostep executable
//! 2. Development path: `{project_root}/runtime/apps.json`
//! 3. Current working directory

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use log::{debug, info, warn};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

use crate::error::{AutomationError, Result};

/// Lazily-initialized path to the alias registry file.
pub static APPS_PATH: Lazy<PathBuf> = Lazy::new(|| {
    if let Ok(exe_path) = std::env::current_exe() {
        if let Some(exe_dir) = exe_path.parent() {
            let prod_path = exe_dir.join("apps.json");
            if prod_path.exists() {
                info!("Using app registry: {}", prod_path.display());
                return prod_path;
            }
        }
    }

    let dev_path = PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("runtime")
        .join("apps.json");
    if dev_path.exists() {
        info!("Using development app registry: {}", dev_path.display());
        return dev_path;
    }

    let cwd_path = PathBuf::from("apps.json");
    debug!("Using CWD app registry: {}", cwd_path.display());
    cwd_path
});

/// Mapping of application aliases to package names.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(transparent)]
pub struct AppRegistry {
    map: BTreeMap<String, String>,
}

impl AppRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self {
            map: BTreeMap::new(),
        }
    }

    /// Loads the registry from [`APPS_PATH`], falling back to the
    /// built-in aliases when the file is missing or unreadable.
    pub fn load() -> Self {
        if !APPS_PATH.exists() {
            return Self::default();
        }
        Self::load_from(&*APPS_PATH).unwrap_or_else(|e| {
            warn!("Ignoring app registry: {}", e);
            Self::default()
        })
    }

    /// Loads the registry from a specific file.
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content =
            fs::read_to_string(path).map_err(|e| AutomationError::io(path.display().to_string(), e))?;
        let registry: Self = serde_json::from_str(&content)?;
        info!("Loaded {} app aliases from {}", registry.map.len(), path.display());
        Ok(registry)
    }

    /// Saves the registry to [`APPS_PATH`].
    pub fn save(&self) -> Result<()> {
        self.save_to(&*APPS_PATH)
    }

    /// Saves the registry to a specific file.
    pub fn save_to(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .map_err(|e| AutomationError::io(parent.display().to_string(), e))?;
        }
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json).map_err(|e| AutomationError::io(path.display().to_string(), e))?;
        Ok(())
    }

    /// Gets the package name for an alias.
    pub fn get(&self, alias: &str) -> Option<&String> {
        self.map.get(alias)
    }

    /// Sets the package for an alias.
    pub fn set(&mut self, alias: impl Into<String>, package: impl Into<String>) {
        self.map.insert(alias.into(), package.into());
    }

    /// Returns the internal map.
    pub fn as_map(&self) -> &BTreeMap<String, String> {
        &self.map
    }

    /// Resolves an alias or a literal package name.
    ///
    /// Names that are not aliases are accepted as-is only if they look like
    /// a package name (contain a dot).
    pub fn resolve(&self, name: &str) -> Option<String> {
        let name = name.trim();
        if let Some(package) = self.map.get(name) {
            return Some(package.clone());
        }
        if name.contains('.') && !name.starts_with('.') && !name.ends_with('.') {
            return Some(name.to_string());
        }
        None
    }
}

impl Default for AppRegistry {
    fn default() -> Self {
        let mut registry = Self::new();
        registry.set("wechat", "com.tencent.mm");
        registry
    }
}
