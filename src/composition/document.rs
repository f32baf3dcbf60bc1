use std::{
    collections::{HashMap, HashSet, VecDeque},
    path::Path,
};

use anyhow::{Context, Result, anyhow, bail};
use crossbeam_channel::Receiver;

use crate::{
    composer::{self, Composition, types::{ShaderStage, StageTemplates}},
    diagnostics::ErrorLog,
    dsl::{self, FORMAT_VERSION, ProjectRecord},
    library::NodeLibrary,
};

use super::{
    events::{DocumentEvent, EventHub},
    node::CompositionNode,
    property_store::PropertyStore,
    uniform::{UniformData, UniformValue},
};

/// The ordered, dependency-resolved node list plus everything derived from it.
///
/// Every mutation either applies completely or leaves the document untouched.
#[derive(Debug, Default)]
pub struct CompositionDocument {
    nodes: Vec<CompositionNode>,
    templates: StageTemplates,
    properties: PropertyStore,
    events: EventHub,
    cache: Option<Composition>,
}

/// Resolve `required` into `staged`, inserting missing nodes at `anchor`.
///
/// Present ids are bumped; missing ones come from `library` with their own
/// requirements resolved first. Returns the anchor after all insertions.
fn resolve_requirements(
    staged: &mut Vec<CompositionNode>,
    required: &[String],
    mut anchor: usize,
    library: &dyn NodeLibrary,
    chain: &mut Vec<String>,
    added: &mut Vec<String>,
) -> Result<usize> {
    for id in required {
        if let Some(existing) = staged.iter_mut().find(|n| &n.id == id) {
            existing.ref_count += 1;
            continue;
        }
        if chain.contains(id) {
            bail!("dependency cycle: {} -> {id}", chain.join(" -> "));
        }

        let mut dep = library
            .lookup(id)
            .with_context(|| format!("resolving dependency `{id}` of `{}`", chain.join(" -> ")))?;
        if &dep.id != id {
            bail!("library returned node `{}` for `{id}`", dep.id);
        }
        dep.ref_count = 1;

        chain.push(id.clone());
        let requirements = dep.required_ids.clone();
        anchor = resolve_requirements(staged, &requirements, anchor, library, chain, added)?;
        chain.pop();

        staged.insert(anchor, dep);
        added.push(id.clone());
        anchor += 1;
    }
    Ok(anchor)
}

/// Decrement each of `ids`; nodes reaching zero are removed and release their own
/// requirements. Returns the removed nodes with their index at removal, in order.
fn release_requirements(
    staged: &mut Vec<CompositionNode>,
    ids: &[String],
) -> Vec<(usize, CompositionNode)> {
    let mut removed = Vec::new();
    let mut queue: VecDeque<String> = ids.iter().cloned().collect();
    while let Some(id) = queue.pop_front() {
        let Some(index) = staged.iter().position(|n| n.id == id) else {
            continue;
        };
        let node = &mut staged[index];
        node.ref_count = node.ref_count.saturating_sub(1);
        if node.ref_count == 0 {
            let node = staged.remove(index);
            queue.extend(node.required_ids.iter().cloned());
            removed.push((index, node));
        }
    }
    removed
}

impl CompositionDocument {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a document from a project record, re-deriving reference counts.
    ///
    /// Sampler paths resolve against `base_dir` (usually the project file's directory).
    pub fn from_project(record: &ProjectRecord, base_dir: Option<&Path>) -> Result<Self> {
        let mut doc = Self::new();
        let (nodes, properties) = Self::nodes_from_project(record, base_dir)?;
        doc.nodes = nodes;
        doc.properties = properties;
        Ok(doc)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let record = dsl::load_project_from_path(path)?;
        Self::from_project(&record, path.parent())
            .with_context(|| format!("invalid project {}", path.display()))
    }

    fn nodes_from_project(
        record: &ProjectRecord,
        base_dir: Option<&Path>,
    ) -> Result<(Vec<CompositionNode>, PropertyStore)> {
        let mut nodes: Vec<CompositionNode> = Vec::with_capacity(record.nodes.len());
        for (i, rec) in record.nodes.iter().enumerate() {
            let node = CompositionNode::from_record(rec, None, base_dir)
                .with_context(|| format!("project node #{i}"))?;
            if nodes.iter().any(|n| n.id == node.id) {
                bail!("project contains node `{}` more than once", node.id);
            }
            nodes.push(node);
        }

        let mut counts: HashMap<String, u32> = HashMap::new();
        for node in &nodes {
            for id in &node.required_ids {
                if !nodes.iter().any(|n| &n.id == id) {
                    bail!("node `{}` requires `{id}`, which is not in the project", node.id);
                }
                *counts.entry(id.clone()).or_default() += 1;
            }
        }
        for node in &mut nodes {
            node.ref_count = counts.get(&node.id).copied().unwrap_or(0);
        }

        let mut properties = PropertyStore::new();
        properties.reset_from(nodes.iter().flat_map(|n| n.uniforms.iter()));
        Ok((nodes, properties))
    }

    pub fn to_project(&self) -> ProjectRecord {
        ProjectRecord {
            version: Some(FORMAT_VERSION),
            nodes: self.nodes.iter().map(CompositionNode::to_record).collect(),
        }
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        dsl::save_project_to_path(&self.to_project(), path)
    }

    /// Swap in a new node list from `record`; subscribers are kept.
    pub fn replace_with_project(&mut self, record: &ProjectRecord, base_dir: Option<&Path>) -> Result<()> {
        let (nodes, properties) = Self::nodes_from_project(record, base_dir)?;
        self.nodes = nodes;
        self.properties = properties;
        if self.nodes.is_empty() {
            self.touch(DocumentEvent::Emptied);
        } else {
            self.touch(DocumentEvent::Reloaded);
        }
        Ok(())
    }

    pub fn subscribe(&mut self) -> Receiver<DocumentEvent> {
        self.events.subscribe()
    }

    pub fn nodes(&self) -> &[CompositionNode] {
        &self.nodes
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node(&self, index: usize) -> Option<&CompositionNode> {
        self.nodes.get(index)
    }

    pub fn index_of(&self, id: &str) -> Option<usize> {
        self.nodes.iter().position(|n| n.id == id)
    }

    pub fn templates(&self) -> &StageTemplates {
        &self.templates
    }

    pub fn properties(&self) -> &PropertyStore {
        &self.properties
    }

    fn touch(&mut self, event: DocumentEvent) {
        self.cache = None;
        self.events.emit(event);
    }

    fn check_index(&self, index: usize) -> Result<()> {
        if index >= self.nodes.len() {
            bail!("node index {index} out of range ({} nodes)", self.nodes.len());
        }
        Ok(())
    }

    fn node_mut(&mut self, index: usize) -> Result<&mut CompositionNode> {
        let len = self.nodes.len();
        self.nodes
            .get_mut(index)
            .ok_or_else(|| anyhow!("node index {index} out of range ({len} nodes)"))
    }

    fn is_declared(&self, uniform: &str) -> bool {
        self.nodes.iter().any(|n| n.uniform(uniform).is_some())
    }

    /// Append `node`, pulling its `@requires` dependencies from `library`.
    ///
    /// Returns the index of the appended node. Missing dependencies are inserted in
    /// front of their dependent with a reference count of one; dependencies already
    /// present are shared.
    pub fn add_node(&mut self, mut node: CompositionNode, library: &dyn NodeLibrary) -> Result<usize> {
        if self.index_of(&node.id).is_some() {
            bail!("node `{}` is already in the composition", node.id);
        }
        if node.required_ids.contains(&node.id) {
            bail!("node `{}` requires itself", node.id);
        }

        let mut staged = self.nodes.clone();
        let mut chain = vec![node.id.clone()];
        let mut added = Vec::new();
        let anchor = staged.len();
        resolve_requirements(&mut staged, &node.required_ids, anchor, library, &mut chain, &mut added)
            .with_context(|| format!("cannot add node `{}`", node.id))?;

        node.ref_count = 0;
        let id = node.id.clone();
        staged.push(node);
        added.push(id.clone());
        self.nodes = staged;

        for added_id in &added {
            if let Some(node) = self.nodes.iter().find(|n| &n.id == added_id) {
                for u in &node.uniforms {
                    if self.properties.get(&u.name).is_none() {
                        self.properties.publish(u.name.clone(), u.value.clone());
                    }
                }
            }
        }
        for added_id in added {
            let index = self.index_of(&added_id).unwrap_or(0);
            log::debug!("[compose] added `{added_id}` at {index}");
            self.touch(DocumentEvent::NodeAdded { index, id: added_id });
        }
        Ok(self.nodes.len() - 1)
    }

    /// Remove the node at `index` and release its dependencies.
    ///
    /// Nodes that exist only because something requires them cannot be removed directly.
    pub fn remove_node(&mut self, index: usize) -> Result<()> {
        self.check_index(index)?;
        let node = &self.nodes[index];
        if node.ref_count > 0 {
            bail!(
                "node `{}` is required by {} other node(s)",
                node.id,
                node.ref_count
            );
        }

        let mut staged = self.nodes.clone();
        let removed_node = staged.remove(index);
        let released = release_requirements(&mut staged, &removed_node.required_ids);
        let mut removed = vec![(index, removed_node)];
        removed.extend(released);
        self.nodes = staged;

        self.forget_undeclared(removed.iter().map(|(_, n)| n));
        for (index, node) in removed {
            log::debug!("[compose] removed `{}` from {index}", node.id);
            self.touch(DocumentEvent::NodeRemoved { index, id: node.id });
        }
        if self.nodes.is_empty() {
            self.touch(DocumentEvent::Emptied);
        }
        Ok(())
    }

    fn forget_undeclared<'a>(&mut self, removed: impl IntoIterator<Item = &'a CompositionNode>) {
        for node in removed {
            for u in &node.uniforms {
                if !self.is_declared(&u.name) {
                    self.properties.forget(&u.name);
                }
            }
        }
    }

    pub fn move_node(&mut self, from: usize, to: usize) -> Result<()> {
        self.check_index(from)?;
        self.check_index(to)?;
        if from == to {
            return Ok(());
        }
        let node = self.nodes.remove(from);
        self.nodes.insert(to, node);
        self.touch(DocumentEvent::NodeMoved { from, to });
        Ok(())
    }

    pub fn set_enabled(&mut self, index: usize, enabled: bool) -> Result<()> {
        let node = self.node_mut(index)?;
        if node.enabled == enabled {
            return Ok(());
        }
        node.enabled = enabled;
        self.touch(DocumentEvent::EnabledChanged { index, enabled });
        Ok(())
    }

    pub fn add_uniform(&mut self, index: usize, uniform: UniformValue) -> Result<()> {
        let node = self.node_mut(index)?;
        if node.uniform(&uniform.name).is_some() {
            bail!("node `{}` already has a uniform `{}`", node.id, uniform.name);
        }
        let name = uniform.name.clone();
        let value = uniform.value.clone();
        node.uniforms.push(uniform);
        self.properties.publish(name.clone(), value);
        self.touch(DocumentEvent::UniformChanged { index, uniform: name });
        Ok(())
    }

    /// Replace the uniform with the same name.
    pub fn update_uniform(&mut self, index: usize, uniform: UniformValue) -> Result<()> {
        let node = self.node_mut(index)?;
        let slot = node
            .uniform_index(&uniform.name)
            .ok_or_else(|| anyhow!("node `{}` has no uniform `{}`", node.id, uniform.name))?;
        let name = uniform.name.clone();
        let value = uniform.value.clone();
        node.uniforms[slot] = uniform;
        self.properties.publish(name.clone(), value);
        self.touch(DocumentEvent::UniformChanged { index, uniform: name });
        Ok(())
    }

    pub fn remove_uniform(&mut self, index: usize, name: &str) -> Result<UniformValue> {
        let node = self.node_mut(index)?;
        let slot = node
            .uniform_index(name)
            .ok_or_else(|| anyhow!("node `{}` has no uniform `{name}`", node.id))?;
        let removed = node.uniforms.remove(slot);
        if !self.is_declared(name) {
            self.properties.forget(name);
        }
        self.touch(DocumentEvent::UniformChanged {
            index,
            uniform: name.to_string(),
        });
        Ok(removed)
    }

    /// Set a uniform's current value and publish it to the property store.
    pub fn set_uniform_value(&mut self, index: usize, name: &str, value: UniformData) -> Result<()> {
        let node = self.node_mut(index)?;
        let id = node.id.clone();
        let uniform = node
            .uniforms
            .iter_mut()
            .find(|u| u.name == name)
            .ok_or_else(|| anyhow!("node `{id}` has no uniform `{name}`"))?;
        uniform.set_value(value.clone())?;
        self.properties.publish(name, value);
        self.touch(DocumentEvent::UniformChanged {
            index,
            uniform: name.to_string(),
        });
        Ok(())
    }

    /// Replace one stage's code, reconciling dependencies with the new `@requires` set.
    pub fn set_code(
        &mut self,
        index: usize,
        stage: ShaderStage,
        text: &str,
        library: &dyn NodeLibrary,
    ) -> Result<()> {
        self.check_index(index)?;
        let mut staged = self.nodes.clone();
        let old_required = staged[index].required_ids.clone();
        staged[index].set_code(stage, text);
        let id = staged[index].id.clone();
        let new_required = staged[index].required_ids.clone();
        if new_required.contains(&id) {
            bail!("node `{id}` requires itself");
        }

        let dropped: Vec<String> = old_required
            .iter()
            .filter(|r| !new_required.contains(r))
            .cloned()
            .collect();
        let gained: Vec<String> = new_required
            .iter()
            .filter(|r| !old_required.contains(r))
            .cloned()
            .collect();

        let mut added = Vec::new();
        if !gained.is_empty() {
            let anchor = staged
                .iter()
                .position(|n| n.id == id)
                .ok_or_else(|| anyhow!("node `{id}` vanished while editing"))?;
            let mut chain = vec![id.clone()];
            resolve_requirements(&mut staged, &gained, anchor, library, &mut chain, &mut added)
                .with_context(|| format!("cannot update code of `{id}`"))?;
        }
        let removed = release_requirements(&mut staged, &dropped);
        self.nodes = staged;
        self.forget_undeclared(removed.iter().map(|(_, n)| n));

        for added_id in added {
            if let Some(index) = self.index_of(&added_id) {
                self.touch(DocumentEvent::NodeAdded { index, id: added_id });
            }
        }
        for (index, node) in removed {
            self.touch(DocumentEvent::NodeRemoved { index, id: node.id });
        }
        let index = self.index_of(&id).unwrap_or(index);
        self.touch(DocumentEvent::CodeChanged { index, stage });
        Ok(())
    }

    /// Override a stage's main template. Empty text restores the built-in default.
    pub fn set_main_template(&mut self, stage: ShaderStage, text: impl Into<String>) {
        self.templates.set(stage, text);
        self.touch(DocumentEvent::TemplateChanged { stage });
    }

    /// Compose the current node list. Results are cached until the next mutation.
    pub fn compose(&mut self, log: &mut ErrorLog) -> &Composition {
        let nodes: Vec<&CompositionNode> = self.nodes.iter().collect();
        let composition = composer::compose(&nodes, &self.templates, &self.properties, log);
        self.cache.insert(composition)
    }

    /// The last composition, unless the document changed since.
    pub fn cached(&self) -> Option<&Composition> {
        self.cache.as_ref()
    }

    pub fn extra_margin(&self) -> i32 {
        let nodes: Vec<&CompositionNode> = self.nodes.iter().collect();
        composer::extra_margin(&nodes)
    }

    /// Check the structural invariants: unique ids, resolvable requirements and
    /// reference counts matching the number of dependents.
    pub fn validate(&self) -> Result<()> {
        let mut ids: HashSet<&str> = HashSet::new();
        for node in &self.nodes {
            if !ids.insert(node.id.as_str()) {
                bail!("node `{}` appears more than once", node.id);
            }
        }
        for node in &self.nodes {
            for id in &node.required_ids {
                let Some(dep) = self.nodes.iter().find(|n| &n.id == id) else {
                    bail!("node `{}` requires missing node `{id}`", node.id);
                };
                if dep.ref_count == 0 {
                    bail!("node `{id}` is required by `{}` but has no references", node.id);
                }
            }
            let dependents = self
                .nodes
                .iter()
                .filter(|n| n.required_ids.contains(&node.id))
                .count() as u32;
            if dependents != node.ref_count {
                bail!(
                    "node `{}` has ref_count {} but {dependents} dependent(s)",
                    node.id,
                    node.ref_count
                );
            }
        }
        Ok(())
    }
}
