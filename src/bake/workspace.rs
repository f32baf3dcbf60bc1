use std::{
    collections::BTreeSet,
    path::{Path, PathBuf},
    sync::atomic::{AtomicU64, Ordering},
};

use anyhow::{Context, Result};

use crate::composer::types::{ShaderStage, StageSources};

/// Source files written for one build attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttemptFiles {
    pub build_id: u64,
    pub dir: PathBuf,
    pub vertex: PathBuf,
    pub fragment: PathBuf,
}

impl AttemptFiles {
    pub fn source(&self, stage: ShaderStage) -> &Path {
        match stage {
            ShaderStage::Vertex => &self.vertex,
            ShaderStage::Fragment => &self.fragment,
        }
    }
}

static NEXT_SESSION: AtomicU64 = AtomicU64::new(0);

/// Owns the per-attempt temporary directories under one root.
///
/// Starting a new attempt retires the previous one. A retired directory is deleted
/// once its jobs have reported (`release`); everything left is removed on drop.
#[derive(Debug)]
pub struct BuildWorkspace {
    root: PathBuf,
    current: Option<AttemptFiles>,
    retired: Vec<AttemptFiles>,
    /// Attempts whose jobs have all reported.
    released: BTreeSet<u64>,
}

impl BuildWorkspace {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let session = NEXT_SESSION.fetch_add(1, Ordering::Relaxed);
        let root = root
            .into()
            .join(format!("session-{}-{session}", std::process::id()));
        Self {
            root,
            current: None,
            retired: Vec::new(),
            released: BTreeSet::new(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn current(&self) -> Option<&AttemptFiles> {
        self.current.as_ref()
    }

    /// Write both stages into a fresh directory for `build_id`.
    pub fn begin_attempt(&mut self, build_id: u64, name: &str, sources: &StageSources) -> Result<AttemptFiles> {
        let dir = self.root.join(format!("attempt-{build_id}"));
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("failed to create build dir {}", dir.display()))?;

        let write = |stage: ShaderStage| -> Result<PathBuf> {
            let path = dir.join(format!("{name}.{}", stage.source_extension()));
            std::fs::write(&path, sources.get(stage))
                .with_context(|| format!("failed to write {}", path.display()))?;
            Ok(path)
        };
        let files = AttemptFiles {
            build_id,
            vertex: write(ShaderStage::Vertex)?,
            fragment: write(ShaderStage::Fragment)?,
            dir,
        };

        if let Some(previous) = self.current.replace(files.clone()) {
            self.retired.push(previous);
        }
        self.prune();
        Ok(files)
    }

    /// The jobs of `build_id` are done; its directory goes once it is superseded.
    pub fn release(&mut self, build_id: u64) {
        self.released.insert(build_id);
        self.prune();
    }

    fn prune(&mut self) {
        let released = &mut self.released;
        self.retired.retain(|attempt| {
            if !released.remove(&attempt.build_id) {
                return true;
            }
            remove_dir(&attempt.dir);
            false
        });
    }

    pub fn retired_count(&self) -> usize {
        self.retired.len()
    }
}

fn remove_dir(dir: &Path) {
    if let Err(e) = std::fs::remove_dir_all(dir) {
        if e.kind() != std::io::ErrorKind::NotFound {
            log::warn!("[bake] failed to remove {}: {e}", dir.display());
        }
    }
}

impl Drop for BuildWorkspace {
    fn drop(&mut self) {
        remove_dir(&self.root);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_root(tag: &str) -> PathBuf {
        std::env::temp_dir().join(format!("nfc-workspace-{tag}-{}", std::process::id()))
    }

    #[test]
    fn new_attempt_retires_previous_until_released() {
        let mut ws = BuildWorkspace::new(temp_root("retire"));
        let sources = StageSources {
            vertex: "v".into(),
            fragment: "f".into(),
        };
        let first = ws.begin_attempt(1, "effect", &sources).unwrap();
        assert_eq!(std::fs::read_to_string(&first.fragment).unwrap(), "f");
        assert!(first.vertex.ends_with("effect.vert"));

        let second = ws.begin_attempt(2, "effect", &sources).unwrap();
        assert_eq!(ws.retired_count(), 1);
        assert!(first.dir.exists());

        ws.release(1);
        assert_eq!(ws.retired_count(), 0);
        assert!(!first.dir.exists());
        assert!(second.dir.exists());

        // Already reported when superseded: removed right away.
        ws.release(2);
        ws.begin_attempt(3, "effect", &sources).unwrap();
        assert_eq!(ws.retired_count(), 0);
        assert!(!second.dir.exists());

        let root = ws.root().to_path_buf();
        drop(ws);
        assert!(!root.exists());
    }

    #[test]
    fn workspaces_sharing_a_root_do_not_clobber_each_other() {
        let root = temp_root("shared");
        let sources = StageSources {
            vertex: "v".into(),
            fragment: "f".into(),
        };
        let mut a = BuildWorkspace::new(&root);
        let mut b = BuildWorkspace::new(&root);
        assert_ne!(a.root(), b.root());

        a.begin_attempt(1, "effect", &sources).unwrap();
        let running = b.begin_attempt(1, "effect", &sources).unwrap();
        drop(a);
        assert!(running.fragment.is_file());
        assert!(b.root().exists());
    }
}
