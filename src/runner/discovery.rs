use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

/// A standalone end-to-end script, identified only by its path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestCase {
    path: PathBuf,
}

impl TestCase {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn name(&self) -> String {
        self.path
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .unwrap_or_else(|| self.path.to_string_lossy().to_string())
    }
}

impl fmt::Display for TestCase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.path.display())
    }
}

/// List the regular files in `dir` whose name matches `pattern`.
///
/// Results keep the order `read_dir` yields them in. A missing directory is
/// an empty batch, not an error.
pub fn discover(dir: &Path, pattern: &str) -> Result<Vec<TestCase>> {
    let pattern = glob::Pattern::new(pattern)
        .with_context(|| format!("Invalid test pattern: {pattern}"))?;

    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            log::warn!("Test directory {} does not exist", dir.display());
            return Ok(Vec::new());
        }
        Err(e) => {
            return Err(e)
                .with_context(|| format!("Failed to read test directory: {}", dir.display()))
        }
    };

    let mut cases = Vec::new();
    for entry in entries {
        let entry =
            entry.with_context(|| format!("Failed to read entry in {}", dir.display()))?;

        // Invalid UTF-8 becomes U+FFFD for matching; the real path is kept.
        let file_name = entry.file_name();
        let name = file_name.to_string_lossy();

        let path = entry.path();
        if pattern.matches(&name) && path.is_file() {
            cases.push(TestCase::new(path));
        }
    }

    log::debug!(
        "Discovered {} test cases in {} matching {}",
        cases.len(),
        dir.display(),
        pattern
    );

    Ok(cases)
}
