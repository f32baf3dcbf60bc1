//! Polling reload of a project file.

use std::{
    fs,
    path::{Path, PathBuf},
    time::SystemTime,
};

use anyhow::{Context, Result};

use crate::dsl::{self, ProjectRecord};

/// A project file that is re-read whenever its modification time advances.
#[derive(Debug)]
pub struct ProjectWatcher {
    path: PathBuf,
    last_modified: Option<SystemTime>,
}

impl ProjectWatcher {
    /// Start watching `path`. The current contents count as already seen.
    pub fn new(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref().to_path_buf();
        let last_modified = fs::metadata(&path).and_then(|m| m.modified()).ok();
        Self {
            path,
            last_modified,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the freshly parsed project when the file changed since the last check.
    ///
    /// A file that changed but fails to parse is reported once as `Err`; the next
    /// successful save is picked up normally.
    pub fn check_reload(&mut self) -> Result<Option<ProjectRecord>> {
        let Ok(modified) = fs::metadata(&self.path).and_then(|m| m.modified()) else {
            return Ok(None);
        };
        if self.last_modified.is_some_and(|last| modified <= last) {
            return Ok(None);
        }
        self.last_modified = Some(modified);

        let project = dsl::load_project_from_path(&self.path)
            .with_context(|| format!("reload of {} failed", self.path.display()))?;
        log::info!("[watch] reloaded {}", self.path.display());
        Ok(Some(project))
    }
}
