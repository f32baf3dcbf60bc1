//! Lookup of node definitions by id, used to resolve `@requires` dependencies.

use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
};

use anyhow::{Result, anyhow};

use crate::{
    composition::node::{CompositionNode, load_node_from_path},
    dsl,
};

pub trait NodeLibrary {
    /// Return a fresh, parsed node for `id`, or a not-found error.
    fn lookup(&self, id: &str) -> Result<CompositionNode>;
}

/// Definitions stored as `<root>/**/<Id>.json`.
#[derive(Debug, Clone)]
pub struct DirectoryLibrary {
    root: PathBuf,
}

impl DirectoryLibrary {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn find_file(&self, id: &str) -> Option<PathBuf> {
        let direct = self.root.join(format!("{id}.json"));
        if direct.is_file() {
            return Some(direct);
        }

        // Fall back to a recursive scan; definitions may carry an explicit id that
        // differs from their file name.
        let mut stack = vec![self.root.clone()];
        let mut candidates: Vec<PathBuf> = Vec::new();
        while let Some(dir) = stack.pop() {
            let Ok(rd) = std::fs::read_dir(&dir) else {
                continue;
            };
            for entry in rd.flatten() {
                let path = entry.path();
                if path.is_dir() {
                    stack.push(path);
                } else if path
                    .extension()
                    .and_then(|s| s.to_str())
                    .is_some_and(|ext| ext.eq_ignore_ascii_case("json"))
                {
                    candidates.push(path);
                }
            }
        }
        candidates.sort();

        candidates.into_iter().find(|path| {
            if dsl::id_from_path(path).as_deref() == Some(id) {
                return true;
            }
            dsl::load_node_record_from_path(path)
                .ok()
                .and_then(|r| r.id)
                .is_some_and(|rid| rid == id)
        })
    }
}

impl NodeLibrary for DirectoryLibrary {
    fn lookup(&self, id: &str) -> Result<CompositionNode> {
        let path = self.find_file(id).ok_or_else(|| {
            anyhow!(
                "node `{id}` not found in library {}",
                self.root.display()
            )
        })?;
        let node = load_node_from_path(&path)?;
        if node.id != id {
            return Err(anyhow!(
                "library file {} defines node `{}`, expected `{id}`",
                path.display(),
                node.id
            ));
        }
        Ok(node)
    }
}

/// In-memory library, for embedding hosts and tests.
#[derive(Debug, Clone, Default)]
pub struct MemoryLibrary {
    nodes: BTreeMap<String, CompositionNode>,
}

impl MemoryLibrary {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, node: CompositionNode) {
        self.nodes.insert(node.id.clone(), node);
    }

    pub fn with(mut self, node: CompositionNode) -> Self {
        self.insert(node);
        self
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

impl NodeLibrary for MemoryLibrary {
    fn lookup(&self, id: &str) -> Result<CompositionNode> {
        let mut node = self
            .nodes
            .get(id)
            .cloned()
            .ok_or_else(|| anyhow!("node `{id}` not found in library"))?;
        node.ref_count = 0;
        Ok(node)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_library_reports_missing_ids() {
        let lib = MemoryLibrary::new().with(CompositionNode::new("Noise"));
        assert_eq!(lib.lookup("Noise").unwrap().id, "Noise");
        let err = lib.lookup("Nope").unwrap_err();
        assert!(err.to_string().contains("`Nope` not found"));
    }

    #[test]
    fn directory_library_missing_root_is_not_found() {
        let lib = DirectoryLibrary::new("/definitely/not/here");
        assert!(lib.lookup("Noise").is_err());
    }
}
