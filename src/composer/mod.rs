//! Composition pipeline: bare merge, feature detection, glue, final merge.

pub mod features;
pub mod glue;
pub mod merge;
pub mod tags;
pub mod templates;
pub mod types;

use std::collections::HashSet;

use crate::{
    composition::{
        node::CompositionNode,
        property_store::PropertyStore,
        uniform::{UniformData, UniformKind, UniformValue},
    },
    diagnostics::{Diagnostic, DiagnosticCategory, ErrorLog},
};

use features::{ShaderFeature, ShaderFeatureSet};
use glue::Glue;
use merge::{MergeOptions, merge};
use types::{StageSources, StageTemplates};

/// Output of one composition pass.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Composition {
    /// Final programs, headers included. These are what gets compiled.
    pub sources: StageSources,
    /// Header-less programs used for feature detection.
    pub bare_sources: StageSources,
    pub features: ShaderFeatureSet,
    pub glue: Glue,
    pub varyings: Vec<String>,
    pub extra_margin: i32,
}

/// Uniforms of the enabled nodes in document order. Later duplicates of a name are
/// dropped with a glue diagnostic; the uniform block is flat.
fn collect_uniforms<'a>(
    nodes: &[&'a CompositionNode],
    diagnostics: &mut Vec<Diagnostic>,
) -> Vec<&'a UniformValue> {
    let mut seen: HashSet<&str> = HashSet::new();
    let mut out = Vec::new();
    for node in nodes {
        for u in &node.uniforms {
            if seen.insert(u.name.as_str()) {
                out.push(u);
            } else {
                diagnostics.push(Diagnostic {
                    node_id: Some(node.id.clone()),
                    ..Diagnostic::new(
                        DiagnosticCategory::Glue,
                        format!(
                            "uniform `{}` of `{}` is already declared by an earlier node; skipped",
                            u.name, node.id
                        ),
                    )
                });
            }
        }
    }
    out
}

fn define_pairs(uniforms: &[&UniformValue], store: &PropertyStore) -> Vec<(String, String)> {
    uniforms
        .iter()
        .filter(|u| u.kind == UniformKind::Define)
        .map(|u| {
            let text = match store.current(u) {
                UniformData::Define(text) => text.trim().to_string(),
                other => other.to_record_text(),
            };
            (u.name.clone(), text)
        })
        .collect()
}

/// Effective margin: the largest `extra_margin` among enabled nodes (never negative).
pub fn extra_margin(nodes: &[&CompositionNode]) -> i32 {
    nodes
        .iter()
        .filter(|n| n.enabled)
        .map(|n| n.extra_margin)
        .max()
        .unwrap_or(0)
        .max(0)
}

/// Compose `nodes` (document order) into a complete program pair.
///
/// Clears and refills the preprocessor and glue categories of `log`. Output is a pure
/// function of the inputs.
pub fn compose(
    nodes: &[&CompositionNode],
    templates: &StageTemplates,
    store: &PropertyStore,
    log: &mut ErrorLog,
) -> Composition {
    log.clear(DiagnosticCategory::Preprocessor);
    log.clear(DiagnosticCategory::Glue);

    let enabled: Vec<&CompositionNode> = nodes.iter().copied().filter(|n| n.enabled).collect();
    let mut glue_diagnostics = Vec::new();
    let uniforms = collect_uniforms(&enabled, &mut glue_diagnostics);
    let defines = define_pairs(&uniforms, store);
    let margin = extra_margin(&enabled);

    let bare = merge(
        &enabled,
        templates,
        &MergeOptions {
            headers: None,
            defines: &defines,
            frag_coord: false,
        },
    );

    // Host text without built-ins: custom expressions may reference iTime and friends.
    let host_text = glue::render_properties(&glue::host_properties(&uniforms, store));
    let mut texts: Vec<&str> = vec![
        bare.sources.vertex.as_str(),
        bare.sources.fragment.as_str(),
        host_text.as_str(),
    ];
    texts.extend(bare.directives.iter().map(String::as_str));
    let features = ShaderFeatureSet::detect(texts);

    let glue = glue::generate(&uniforms, store, &features, margin);

    let full = merge(
        &enabled,
        templates,
        &MergeOptions {
            headers: Some(&glue.headers),
            defines: &defines,
            frag_coord: features.has(ShaderFeature::FragCoord),
        },
    );

    log.extend(full.diagnostics);
    log.extend(glue_diagnostics);

    log::debug!(
        "[compose] {} node(s), features {:?}, grid {}x{}",
        enabled.len(),
        features.enabled().collect::<Vec<_>>(),
        features.grid_width,
        features.grid_height
    );

    Composition {
        sources: full.sources,
        bare_sources: bare.sources,
        features,
        glue,
        varyings: full.varyings,
        extra_margin: margin,
    }
}
