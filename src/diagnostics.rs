//! Non-fatal problems collected while composing and baking.
//!
//! Fatal errors travel as `anyhow::Error`; everything that should be shown to the user
//! without aborting the operation is recorded here, keyed by category.

use std::collections::BTreeMap;

use crate::composer::types::ShaderStage;

/// Categories are ordered: the first non-empty one provides the summary message.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum DiagnosticCategory {
    Bake,
    Preprocessor,
    Glue,
    Shader,
}

impl DiagnosticCategory {
    pub fn as_str(self) -> &'static str {
        match self {
            DiagnosticCategory::Bake => "bake",
            DiagnosticCategory::Preprocessor => "preprocessor",
            DiagnosticCategory::Glue => "glue",
            DiagnosticCategory::Shader => "shader",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Diagnostic {
    pub category: DiagnosticCategory,
    pub message: String,
    pub stage: Option<ShaderStage>,
    pub node_id: Option<String>,
    /// Best-effort source line, when the message carries one.
    pub line: Option<u32>,
    /// Job label (`"vertex/primary"`) for compiler diagnostics.
    pub job: Option<String>,
}

impl Diagnostic {
    pub fn new(category: DiagnosticCategory, message: impl Into<String>) -> Self {
        Self {
            category,
            message: message.into(),
            stage: None,
            node_id: None,
            line: None,
            job: None,
        }
    }

    /// An unrecognized `@` tag found while merging a stage.
    pub fn unknown_tag(stage: ShaderStage, node_id: Option<&str>, line_text: &str) -> Self {
        let origin = node_id.unwrap_or("main template");
        Self {
            stage: Some(stage),
            node_id: node_id.map(str::to_string),
            ..Self::new(
                DiagnosticCategory::Preprocessor,
                format!(
                    "unknown tag in {stage} code of `{origin}`: {}",
                    line_text.trim()
                ),
            )
        }
    }

    /// Diagnostic text reported by one compiler job.
    pub fn compiler_output(stage: ShaderStage, job: impl Into<String>, text: &str) -> Self {
        Self {
            stage: Some(stage),
            line: extract_line_number(text),
            job: Some(job.into()),
            ..Self::new(DiagnosticCategory::Shader, text.trim())
        }
    }
}

/// Extract a line number from the first `:<n>:` pattern in compiler output.
///
/// `ERROR: 0:12: 'foo' : undeclared identifier` yields `Some(12)`.
pub fn extract_line_number(text: &str) -> Option<u32> {
    let bytes = text.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b':' {
            let start = i + 1;
            let mut end = start;
            while end < bytes.len() && bytes[end].is_ascii_digit() {
                end += 1;
            }
            if end > start && end < bytes.len() && bytes[end] == b':' {
                if let Ok(n) = text[start..end].parse::<u32>() {
                    return Some(n);
                }
            }
            // Resume at the closing colon so it can open the next candidate.
            i = end.max(start);
            continue;
        }
        i += 1;
    }
    None
}

#[derive(Clone, Debug, Default)]
pub struct ErrorLog {
    entries: BTreeMap<DiagnosticCategory, Vec<Diagnostic>>,
}

impl ErrorLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, diagnostic: Diagnostic) {
        self.entries
            .entry(diagnostic.category)
            .or_default()
            .push(diagnostic);
    }

    pub fn extend(&mut self, diagnostics: impl IntoIterator<Item = Diagnostic>) {
        for d in diagnostics {
            self.push(d);
        }
    }

    pub fn clear(&mut self, category: DiagnosticCategory) {
        self.entries.remove(&category);
    }

    pub fn clear_all(&mut self) {
        self.entries.clear();
    }

    pub fn get(&self, category: DiagnosticCategory) -> &[Diagnostic] {
        self.entries
            .get(&category)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn is_empty(&self) -> bool {
        self.entries.values().all(Vec::is_empty)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Diagnostic> {
        self.entries.values().flatten()
    }

    /// First non-empty message across categories, in category order.
    pub fn summary(&self) -> Option<&str> {
        self.entries
            .values()
            .flatten()
            .map(|d| d.message.as_str())
            .find(|m| !m.is_empty())
    }
}
