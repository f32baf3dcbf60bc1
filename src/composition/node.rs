use std::{
    collections::HashSet,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result, bail};

use crate::{
    composer::{tags, types::ShaderStage},
    dsl::{self, FORMAT_VERSION, NodeRecord},
};

use super::uniform::UniformValue;

/// One reusable fragment of a composition.
#[derive(Clone, Debug, PartialEq)]
pub struct CompositionNode {
    pub id: String,
    pub display_name: String,
    pub description: String,
    pub vertex_code: String,
    pub fragment_code: String,
    pub uniforms: Vec<UniformValue>,
    /// Parsed from `@requires` lines; kept in sync by `set_code`.
    pub required_ids: Vec<String>,
    pub enabled: bool,
    pub custom: bool,
    /// Number of nodes in the document that require this one.
    pub ref_count: u32,
    pub extra_margin: i32,
    /// Definition file this node was loaded from, used to resolve relative resources.
    pub source_path: Option<PathBuf>,
}

impl CompositionNode {
    pub fn new(id: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            display_name: id.clone(),
            id,
            description: String::new(),
            vertex_code: String::new(),
            fragment_code: String::new(),
            uniforms: Vec::new(),
            required_ids: Vec::new(),
            enabled: true,
            custom: false,
            ref_count: 0,
            extra_margin: 0,
            source_path: None,
        }
    }

    /// Build a node from a definition record.
    ///
    /// `source_path` is the definition file (id fallback + sampler base directory);
    /// `base_dir` overrides the directory used for samplers when given.
    pub fn from_record(
        record: &NodeRecord,
        source_path: Option<&Path>,
        base_dir: Option<&Path>,
    ) -> Result<Self> {
        let id = record
            .id
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .or_else(|| source_path.and_then(dsl::id_from_path))
            .or_else(|| {
                let compact: String = record.name.split_whitespace().collect();
                (!compact.is_empty()).then_some(compact)
            });
        let Some(id) = id else {
            bail!("node definition has no id, file name or name to derive one from");
        };

        let resource_dir = base_dir.or_else(|| source_path.and_then(Path::parent));
        let mut seen: HashSet<&str> = HashSet::new();
        let mut uniforms = Vec::with_capacity(record.properties.len());
        for prop in &record.properties {
            let uniform = UniformValue::from_record(prop, resource_dir)
                .with_context(|| format!("node `{id}`"))?;
            if !seen.insert(prop.name.trim()) {
                bail!("node `{id}` declares uniform `{}` more than once", uniform.name);
            }
            uniforms.push(uniform);
        }

        let vertex_code = record.vertex_code.join("\n");
        let fragment_code = record.fragment_code.join("\n");
        let required_ids = tags::required_ids([vertex_code.as_str(), fragment_code.as_str()]);
        if required_ids.contains(&id) {
            bail!("node `{id}` requires itself");
        }

        Ok(Self {
            display_name: if record.name.trim().is_empty() {
                id.clone()
            } else {
                record.name.clone()
            },
            id,
            description: record.description.clone(),
            vertex_code,
            fragment_code,
            uniforms,
            required_ids,
            enabled: record.enabled,
            custom: record.custom,
            ref_count: 0,
            extra_margin: record.extra_margin,
            source_path: source_path.map(Path::to_path_buf),
        })
    }

    pub fn to_record(&self) -> NodeRecord {
        let lines = |code: &str| -> Vec<String> {
            if code.is_empty() {
                Vec::new()
            } else {
                code.split('\n').map(str::to_string).collect()
            }
        };
        NodeRecord {
            version: Some(FORMAT_VERSION),
            name: self.display_name.clone(),
            description: self.description.clone(),
            id: Some(self.id.clone()),
            enabled: self.enabled,
            custom: self.custom,
            extra_margin: self.extra_margin,
            properties: self.uniforms.iter().map(UniformValue::to_record).collect(),
            fragment_code: lines(&self.fragment_code),
            vertex_code: lines(&self.vertex_code),
        }
    }

    pub fn code(&self, stage: ShaderStage) -> &str {
        match stage {
            ShaderStage::Vertex => &self.vertex_code,
            ShaderStage::Fragment => &self.fragment_code,
        }
    }

    /// Replace one stage's code and re-derive `required_ids`.
    pub fn set_code(&mut self, stage: ShaderStage, text: impl Into<String>) {
        match stage {
            ShaderStage::Vertex => self.vertex_code = text.into(),
            ShaderStage::Fragment => self.fragment_code = text.into(),
        }
        self.required_ids =
            tags::required_ids([self.vertex_code.as_str(), self.fragment_code.as_str()]);
    }

    pub fn uniform(&self, name: &str) -> Option<&UniformValue> {
        self.uniforms.iter().find(|u| u.name == name)
    }

    pub fn uniform_index(&self, name: &str) -> Option<usize> {
        self.uniforms.iter().position(|u| u.name == name)
    }

    /// Directory that relative resources of this node resolve against.
    pub fn resource_dir(&self) -> Option<&Path> {
        self.source_path.as_deref().and_then(Path::parent)
    }
}

/// Parse a definition file into a node.
pub fn load_node_from_path(path: impl AsRef<Path>) -> Result<CompositionNode> {
    let path = path.as_ref();
    let record = dsl::load_node_record_from_path(path)?;
    CompositionNode::from_record(&record, Some(path), None)
        .with_context(|| format!("invalid node definition {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dsl::UniformRecord;

    fn record() -> NodeRecord {
        NodeRecord {
            version: Some(1),
            name: "Wave Distort".to_string(),
            enabled: true,
            fragment_code: vec![
                "@requires Noise".to_string(),
                "@main".to_string(),
                "{".to_string(),
                "}".to_string(),
            ],
            ..Default::default()
        }
    }

    #[test]
    fn id_falls_back_to_file_stem_then_name() {
        let n = CompositionNode::from_record(&record(), Some(Path::new("/lib/Wave.json")), None)
            .unwrap();
        assert_eq!(n.id, "Wave");
        assert_eq!(n.resource_dir(), Some(Path::new("/lib")));

        let n = CompositionNode::from_record(&record(), None, None).unwrap();
        assert_eq!(n.id, "WaveDistort");
        assert_eq!(n.required_ids, vec!["Noise"]);
    }

    #[test]
    fn duplicate_uniform_names_are_rejected() {
        let mut rec = record();
        let prop = UniformRecord {
            name: "amount".to_string(),
            kind: "float".to_string(),
            ..Default::default()
        };
        rec.properties = vec![prop.clone(), prop];
        let err = CompositionNode::from_record(&rec, None, None).unwrap_err();
        assert!(format!("{err:#}").contains("more than once"));
    }

    #[test]
    fn set_code_rederives_requirements() {
        let mut n = CompositionNode::from_record(&record(), None, None).unwrap();
        n.set_code(ShaderStage::Vertex, "@requires Grid");
        assert_eq!(n.required_ids, vec!["Grid", "Noise"]);
        n.set_code(ShaderStage::Fragment, "@main");
        assert_eq!(n.required_ids, vec!["Grid"]);
    }

    #[test]
    fn record_round_trip_keeps_code_lines() {
        let n = CompositionNode::from_record(&record(), None, None).unwrap();
        let back = n.to_record();
        assert_eq!(back.fragment_code, record().fragment_code);
        assert!(back.vertex_code.is_empty());
        assert_eq!(back.id.as_deref(), Some("WaveDistort"));
    }
}
