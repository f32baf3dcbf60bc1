use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};

/// Environment fallback for the external compiler executable.
pub const COMPILER_ENV: &str = "NODE_FORGE_COMPILER";

pub const DEFAULT_DEBOUNCE_MS: u64 = 300;

/// Profile flags passed to the external compiler for every primary job.
pub fn default_profile_flags() -> Vec<String> {
    ["--glsl", "100 es,120,150", "--hlsl", "50", "--msl", "12"]
        .into_iter()
        .map(str::to_string)
        .collect()
}

fn default_debounce_ms() -> u64 {
    DEFAULT_DEBOUNCE_MS
}

fn default_effect_name() -> String {
    "effect".to_string()
}

fn default_artifact_extension() -> String {
    "qsb".to_string()
}

/// One output destination of a bake.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetConfig {
    #[serde(rename = "outputDir")]
    pub output_dir: PathBuf,
    #[serde(rename = "profileFlags", default = "default_profile_flags")]
    pub profile_flags: Vec<String>,
}

impl TargetConfig {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
            profile_flags: default_profile_flags(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BakeConfig {
    /// Base name of the generated sources and artifacts (`<name>.vert.qsb`, ...).
    #[serde(rename = "effectName", default = "default_effect_name")]
    pub effect_name: String,
    /// External compiler executable. `None` falls back to `NODE_FORGE_COMPILER`,
    /// then to the in-process backend.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compiler: Option<PathBuf>,
    pub primary: TargetConfig,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preview: Option<TargetConfig>,
    #[serde(rename = "debounceMs", default = "default_debounce_ms")]
    pub debounce_ms: u64,
    /// Parent of the per-attempt build directories. Defaults to the system temp dir.
    #[serde(rename = "tempRoot", default, skip_serializing_if = "Option::is_none")]
    pub temp_root: Option<PathBuf>,
    #[serde(rename = "artifactExtension", default = "default_artifact_extension")]
    pub artifact_extension: String,
}

impl BakeConfig {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            effect_name: default_effect_name(),
            compiler: None,
            primary: TargetConfig::new(output_dir),
            preview: None,
            debounce_ms: DEFAULT_DEBOUNCE_MS,
            temp_root: None,
            artifact_extension: default_artifact_extension(),
        }
    }

    /// Number of compiler jobs one build spawns.
    pub fn job_count(&self) -> usize {
        if self.preview.is_some() { 4 } else { 2 }
    }

    /// Configured compiler, else the environment fallback.
    pub fn resolved_compiler(&self) -> Option<PathBuf> {
        self.compiler.clone().or_else(|| {
            std::env::var_os(COMPILER_ENV)
                .filter(|v| !v.is_empty())
                .map(PathBuf::from)
        })
    }

    pub fn temp_root(&self) -> PathBuf {
        self.temp_root
            .clone()
            .unwrap_or_else(|| std::env::temp_dir().join("node-forge-composer"))
    }

    pub fn validate(&self) -> Result<()> {
        if self.effect_name.trim().is_empty() {
            bail!("effectName must not be empty");
        }
        if self.effect_name.contains(['/', '\\']) {
            bail!("effectName must be a plain file name, got `{}`", self.effect_name);
        }
        Ok(())
    }
}

pub fn load_bake_config(path: impl AsRef<Path>) -> Result<BakeConfig> {
    let path = path.as_ref();
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read bake config {}", path.display()))?;
    let config: BakeConfig = serde_json::from_str(&text)
        .with_context(|| format!("failed to parse bake config {}", path.display()))?;
    config.validate()?;
    Ok(config)
}
