//! Core type definitions shared by the composer, the document and the bake pipeline.

use std::fmt;

/// One of the two programs produced by a composition.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ShaderStage {
    Vertex,
    Fragment,
}

impl ShaderStage {
    pub const ALL: [ShaderStage; 2] = [ShaderStage::Vertex, ShaderStage::Fragment];

    pub fn as_str(self) -> &'static str {
        match self {
            ShaderStage::Vertex => "vertex",
            ShaderStage::Fragment => "fragment",
        }
    }

    /// File extension used for this stage's source text.
    pub fn source_extension(self) -> &'static str {
        match self {
            ShaderStage::Vertex => "vert",
            ShaderStage::Fragment => "frag",
        }
    }

    /// Storage qualifier a varying carries when declared in this stage.
    pub fn varying_qualifier(self) -> &'static str {
        match self {
            ShaderStage::Vertex => "out",
            ShaderStage::Fragment => "in",
        }
    }
}

impl fmt::Display for ShaderStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-stage main templates. An empty template falls back to the built-in default.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct StageTemplates {
    pub vertex: String,
    pub fragment: String,
}

impl StageTemplates {
    pub fn get(&self, stage: ShaderStage) -> &str {
        match stage {
            ShaderStage::Vertex => &self.vertex,
            ShaderStage::Fragment => &self.fragment,
        }
    }

    pub fn set(&mut self, stage: ShaderStage, text: impl Into<String>) {
        match stage {
            ShaderStage::Vertex => self.vertex = text.into(),
            ShaderStage::Fragment => self.fragment = text.into(),
        }
    }
}

/// Both merged programs of one composition pass.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct StageSources {
    pub vertex: String,
    pub fragment: String,
}

impl StageSources {
    pub fn get(&self, stage: ShaderStage) -> &str {
        match stage {
            ShaderStage::Vertex => &self.vertex,
            ShaderStage::Fragment => &self.fragment,
        }
    }
}
