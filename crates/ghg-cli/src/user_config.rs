//! Per-user list of known stores.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserConfig {
    #[serde(default)]
    pub default_store: Option<String>,
    #[serde(default)]
    pub stores: BTreeMap<String, PathBuf>,
}

impl UserConfig {
    /// `$HOME/.ghg/config.toml`.
    pub fn default_path() -> anyhow::Result<PathBuf> {
        let home = std::env::var_os("HOME").context("HOME is not set; pass --config")?;
        Ok(PathBuf::from(home).join(".ghg").join("config.toml"))
    }

    /// Load, treating a missing file as empty.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        match fs::read_to_string(path) {
            Ok(text) => toml::from_str(&text).with_context(|| format!("parsing {}", path.display())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(e).with_context(|| format!("reading {}", path.display())),
        }
    }

    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, toml::to_string_pretty(self)?)
            .with_context(|| format!("writing {}", path.display()))
    }

    /// Register a store. The first store added becomes the default.
    pub fn add_store(&mut self, name: &str, path: PathBuf, make_default: bool) -> anyhow::Result<()> {
        if name.trim().is_empty() {
            bail!("store name must not be empty");
        }
        self.stores.insert(name.to_string(), path);
        if make_default || self.default_store.is_none() {
            self.default_store = Some(name.to_string());
        }
        Ok(())
    }

    /// Store path for `--store`: a configured name, else a literal path. With
    /// no selector, the default store, else the current directory.
    pub fn resolve(&self, selector: Option<&str>) -> PathBuf {
        match selector {
            Some(s) => self.stores.get(s).cloned().unwrap_or_else(|| PathBuf::from(s)),
            None => self
                .default_store
                .as_ref()
                .and_then(|name| self.stores.get(name))
                .cloned()
                .unwrap_or_else(|| PathBuf::from(".")),
        }
    }
}
