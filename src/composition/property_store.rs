use std::collections::BTreeMap;

use super::uniform::{UniformData, UniformValue};

/// Live uniform values shared between the document, the glue generator and hosts.
///
/// Keys are uniform names; the merged uniform block is flat, so names are global.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PropertyStore {
    values: BTreeMap<String, UniformData>,
}

impl PropertyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn publish(&mut self, name: impl Into<String>, value: UniformData) {
        self.values.insert(name.into(), value);
    }

    pub fn get(&self, name: &str) -> Option<&UniformData> {
        self.values.get(name)
    }

    pub fn forget(&mut self, name: &str) {
        self.values.remove(name);
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Current value for `uniform`: the published one when its kind still matches,
    /// otherwise the uniform's own value.
    pub fn current<'a>(&'a self, uniform: &'a UniformValue) -> &'a UniformData {
        self.values
            .get(&uniform.name)
            .filter(|v| v.kind() == uniform.kind)
            .unwrap_or(&uniform.value)
    }

    /// Rebuild from scratch out of a set of uniforms (first occurrence of a name wins).
    pub fn reset_from<'a>(&mut self, uniforms: impl IntoIterator<Item = &'a UniformValue>) {
        self.values.clear();
        for u in uniforms {
            self.values
                .entry(u.name.clone())
                .or_insert_with(|| u.value.clone());
        }
    }
}
