//! Module search path composition for child interpreters.
//!
//! Every process spawned by the harness (the broker and each test case)
//! inherits one environment variable listing where importable modules are
//! looked up. Mocks come first so they shadow the real implementations.

use anyhow::{Context, Result};
use std::ffi::OsString;
use std::path::{Path, PathBuf};

use crate::config::{HarnessConfig, SearchPathConfig};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleSearchPath {
    entries: Vec<PathBuf>,
}

impl ModuleSearchPath {
    /// Build the search path in priority order: mocks, working directory,
    /// frozen modules, user library, system library.
    pub fn compose(cwd: &Path, config: &SearchPathConfig) -> Self {
        let entries = vec![
            cwd.join(&config.mock_dir),
            cwd.to_path_buf(),
            PathBuf::from(&config.frozen_entry),
            expand_home(&config.user_lib_dir),
            config.system_lib_dir.clone(),
        ];

        Self { entries }
    }

    pub fn entries(&self) -> &[PathBuf] {
        &self.entries
    }

    /// Position of `path` in the search path; lower wins.
    pub fn priority_of(&self, path: &Path) -> Option<usize> {
        self.entries.iter().position(|entry| entry == path)
    }

    pub fn to_env_value(&self) -> Result<OsString> {
        std::env::join_paths(&self.entries).context("Search path entry contains a separator")
    }

    /// Export the search path into the harness' own environment so every
    /// child spawned afterwards inherits it.
    pub fn install(&self, env_var: &str) -> Result<OsString> {
        let value = self.to_env_value()?;
        std::env::set_var(env_var, &value);
        log::info!("{env_var}={}", value.to_string_lossy());
        Ok(value)
    }
}

/// Expand a leading `~` to the current user's home directory.
pub fn expand_home(raw: &str) -> PathBuf {
    let rest = if raw == "~" {
        Some("")
    } else {
        raw.strip_prefix("~/")
    };

    match (rest, dirs::home_dir()) {
        (Some(rest), Some(home)) if rest.is_empty() => home,
        (Some(rest), Some(home)) => home.join(rest),
        _ => PathBuf::from(raw),
    }
}

pub fn compose_and_install(config: &HarnessConfig) -> Result<ModuleSearchPath> {
    let cwd = std::env::current_dir().context("Failed to read current directory")?;
    let search_path = ModuleSearchPath::compose(&cwd, &config.search_path);
    search_path.install(&config.search_path.env_var)?;
    Ok(search_path)
}
