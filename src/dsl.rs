//! On-disk records: node definitions and composition projects.
//!
//! Records mirror the JSON layout exactly; typed models live in `composition`.

use std::path::Path;

use anyhow::{Context, Result, anyhow, bail};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The only record version this crate reads and writes.
pub const FORMAT_VERSION: u32 = 1;

#[derive(Debug, Deserialize, Serialize, Clone, Default, PartialEq)]
pub struct NodeRecord {
    #[serde(default)]
    pub version: Option<u32>,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub custom: bool,
    #[serde(rename = "extraMargin", default)]
    pub extra_margin: i32,
    #[serde(default)]
    pub properties: Vec<UniformRecord>,
    #[serde(rename = "fragmentCode", default)]
    pub fragment_code: Vec<String>,
    #[serde(rename = "vertexCode", default)]
    pub vertex_code: Vec<String>,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize, Serialize, Clone, Default, PartialEq)]
pub struct UniformRecord {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(rename = "controlType", default, skip_serializing_if = "Option::is_none")]
    pub control_type: Option<String>,
    #[serde(rename = "displayName", default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    // Scalars may arrive as strings, numbers, booleans or arrays; see `value_text`.
    #[serde(default)]
    pub value: Option<Value>,
    #[serde(rename = "defaultValue", default)]
    pub default_value: Option<Value>,
    #[serde(rename = "minValue", default, skip_serializing_if = "Option::is_none")]
    pub min_value: Option<Value>,
    #[serde(rename = "maxValue", default, skip_serializing_if = "Option::is_none")]
    pub max_value: Option<Value>,
    #[serde(rename = "customValue", default, skip_serializing_if = "Option::is_none")]
    pub custom_value: Option<String>,
    #[serde(rename = "useCustomValue", default, skip_serializing_if = "Option::is_none")]
    pub use_custom_value: Option<bool>,
    #[serde(rename = "enableMipmap", default, skip_serializing_if = "Option::is_none")]
    pub enable_mipmap: Option<bool>,
}

#[derive(Debug, Deserialize, Serialize, Clone, Default, PartialEq)]
pub struct ProjectRecord {
    #[serde(default)]
    pub version: Option<u32>,
    #[serde(default)]
    pub nodes: Vec<NodeRecord>,
}

fn check_version(version: Option<u32>, what: &str) -> Result<()> {
    match version {
        Some(FORMAT_VERSION) => Ok(()),
        Some(other) => bail!(
            "unsupported {what} version {other} (expected {FORMAT_VERSION})"
        ),
        None => bail!("{what} is missing its `version` field"),
    }
}

pub fn parse_node_record(text: &str) -> Result<NodeRecord> {
    let record: NodeRecord =
        serde_json::from_str(text).context("failed to parse node definition json")?;
    check_version(record.version, "node definition")?;
    Ok(record)
}

pub fn load_node_record_from_path(path: impl AsRef<Path>) -> Result<NodeRecord> {
    let path = path.as_ref();
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read node definition at {}", path.display()))?;
    parse_node_record(&text).with_context(|| format!("invalid node definition {}", path.display()))
}

pub fn parse_project_record(text: &str) -> Result<ProjectRecord> {
    let record: ProjectRecord =
        serde_json::from_str(text).context("failed to parse project json")?;
    validate_project_record(&record)?;
    Ok(record)
}

/// Version checks for a project and its embedded nodes (which may omit `version`).
pub fn validate_project_record(record: &ProjectRecord) -> Result<()> {
    check_version(record.version, "project")?;
    for (i, node) in record.nodes.iter().enumerate() {
        check_version(node.version.or(Some(FORMAT_VERSION)), "node definition")
            .with_context(|| format!("project node #{i} (`{}`)", node.name))?;
    }
    Ok(())
}

pub fn load_project_from_path(path: impl AsRef<Path>) -> Result<ProjectRecord> {
    let path = path.as_ref();
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read project at {}", path.display()))?;
    parse_project_record(&text).with_context(|| format!("invalid project {}", path.display()))
}

pub fn save_project_to_path(project: &ProjectRecord, path: impl AsRef<Path>) -> Result<()> {
    let path = path.as_ref();
    let text = serde_json::to_string_pretty(project).context("failed to serialize project")?;
    std::fs::write(path, text)
        .with_context(|| format!("failed to write project to {}", path.display()))
}

/// Node id derived from a definition file name (`effects/Blur.json` -> `Blur`).
pub fn id_from_path(path: &Path) -> Option<String> {
    path.file_stem()
        .and_then(|s| s.to_str())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// Textual form of a record scalar. Arrays become comma-separated component lists.
pub fn value_text(value: &Value) -> Result<String> {
    match value {
        Value::String(s) => Ok(s.clone()),
        Value::Bool(b) => Ok(b.to_string()),
        Value::Number(n) => Ok(n.to_string()),
        Value::Array(items) => {
            let parts = items
                .iter()
                .map(|v| match v {
                    Value::Array(_) | Value::Object(_) => {
                        Err(anyhow!("nested value component: {v}"))
                    }
                    other => value_text(other),
                })
                .collect::<Result<Vec<_>>>()?;
            Ok(parts.join(", "))
        }
        Value::Null => Ok(String::new()),
        Value::Object(_) => Err(anyhow!("unexpected object value: {value}")),
    }
}
