//! Line-oriented merge of node code into complete stage programs.
//!
//! Node bodies are opaque text. Only whitespace tokens at the start of a line are
//! inspected: `@` tags, the `out`/`in` varying qualifiers and the `@main` split.

use std::fmt::Write as _;

use crate::{
    composition::node::CompositionNode,
    diagnostics::{Diagnostic, DiagnosticCategory},
};

use super::{
    tags::{self, LineTag},
    templates::{default_template, frag_coord_assignment},
    types::{ShaderStage, StageSources, StageTemplates},
};

const INDENT: &str = "    ";

#[derive(Clone, Debug, Default)]
pub struct MergeOptions<'a> {
    /// Per-stage glue headers. `None` produces the bare text used for feature detection.
    pub headers: Option<&'a StageSources>,
    /// `(NAME, VALUE)` pairs emitted as `#define NAME VALUE`.
    pub defines: &'a [(String, String)],
    /// The `fragCoord` varying occupies location 1.
    pub frag_coord: bool,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct MergedProgram {
    pub sources: StageSources,
    /// Custom varying declarations (qualifier stripped), in node order.
    pub varyings: Vec<String>,
    /// Raw `@mesh` / `@blursources` lines, kept for feature detection.
    pub directives: Vec<String>,
    pub diagnostics: Vec<Diagnostic>,
}

#[derive(Default)]
struct StageBuffers {
    root: Vec<String>,
    main: Vec<String>,
    contributed: bool,
}

/// Drop tag lines, recording directives and reporting unknown tags.
///
/// `@nodes` survives when `keep_nodes` is set (templates).
fn strip_tags<'a>(
    lines: impl IntoIterator<Item = &'a str>,
    stage: ShaderStage,
    node_id: Option<&str>,
    keep_nodes: bool,
    directives: &mut Vec<String>,
    diagnostics: &mut Vec<Diagnostic>,
) -> Vec<&'a str> {
    let mut out = Vec::new();
    for line in lines {
        match tags::classify(line) {
            LineTag::Code => out.push(line),
            LineTag::Reserved(tag) if tag == tags::TAG_NODES && keep_nodes => out.push(line),
            LineTag::Reserved(tag) => {
                if tag == tags::TAG_MESH || tag == tags::TAG_BLUR_SOURCES {
                    directives.push(line.trim().to_string());
                }
            }
            LineTag::Unknown(_) => diagnostics.push(Diagnostic::unknown_tag(stage, node_id, line)),
        }
    }
    out
}

fn collect_stage(
    nodes: &[&CompositionNode],
    stage: ShaderStage,
    varyings: &mut Vec<String>,
    directives: &mut Vec<String>,
    diagnostics: &mut Vec<Diagnostic>,
) -> StageBuffers {
    let mut buf = StageBuffers::default();
    for node in nodes.iter().filter(|n| n.enabled) {
        let code = node.code(stage);
        if code.trim().is_empty() {
            continue;
        }
        buf.contributed = true;

        let lines: Vec<&str> = code.lines().collect();
        let split = tags::find_main(&lines).unwrap_or(lines.len());
        let (root, main) = lines.split_at(split);

        for line in strip_tags(
            root.iter().copied(),
            stage,
            Some(&node.id),
            false,
            directives,
            diagnostics,
        ) {
            match (stage, tags::first_token(line)) {
                (ShaderStage::Vertex, Some("out")) => {
                    let decl = line.trim_start().strip_prefix("out").unwrap_or(line);
                    varyings.push(decl.trim().to_string());
                }
                (ShaderStage::Fragment, Some("in")) => {}
                _ => buf.root.push(line.to_string()),
            }
        }

        for line in strip_tags(
            main.iter().copied(),
            stage,
            Some(&node.id),
            false,
            directives,
            diagnostics,
        ) {
            if line.trim().is_empty() {
                buf.main.push(String::new());
            } else {
                buf.main.push(format!("{INDENT}{line}"));
            }
        }
    }
    buf
}

fn assemble_stage(
    stage: ShaderStage,
    buf: &StageBuffers,
    template: &str,
    varyings: &[String],
    options: &MergeOptions<'_>,
    directives: &mut Vec<String>,
    diagnostics: &mut Vec<Diagnostic>,
) -> String {
    let mut out = String::new();

    if let Some(headers) = options.headers {
        out.push_str(headers.get(stage));
        if !out.ends_with('\n') {
            out.push('\n');
        }
        out.push('\n');
    }

    for (name, value) in options.defines {
        let _ = writeln!(out, "#define {name} {value}");
    }

    let first_location = if options.frag_coord { 2 } else { 1 };
    for (i, decl) in varyings.iter().enumerate() {
        let _ = writeln!(
            out,
            "layout(location = {}) {} {decl}",
            first_location + i,
            stage.varying_qualifier()
        );
    }

    for line in &buf.root {
        out.push_str(line);
        out.push('\n');
    }

    // A stage nobody contributed to always gets the minimal default.
    let template = if !buf.contributed || template.trim().is_empty() {
        default_template(stage)
    } else {
        template
    };
    let template_lines = strip_tags(template.lines(), stage, None, true, directives, diagnostics);

    let mut substituted = false;
    for line in template_lines {
        if tags::is_tag(line, tags::TAG_NODES) {
            if substituted {
                continue;
            }
            substituted = true;
            if stage == ShaderStage::Vertex && options.frag_coord && options.headers.is_some() {
                out.push_str(&frag_coord_assignment());
                out.push('\n');
            }
            for main_line in &buf.main {
                out.push_str(main_line);
                out.push('\n');
            }
        } else {
            out.push_str(line);
            out.push('\n');
        }
    }

    if !substituted {
        diagnostics.push(Diagnostic {
            stage: Some(stage),
            ..Diagnostic::new(
                DiagnosticCategory::Preprocessor,
                format!("{stage} main template has no {} line", tags::TAG_NODES),
            )
        });
    }

    out
}

/// Merge enabled `nodes` (document order) into both stage programs.
pub fn merge(
    nodes: &[&CompositionNode],
    templates: &StageTemplates,
    options: &MergeOptions<'_>,
) -> MergedProgram {
    let mut program = MergedProgram::default();
    let mut varyings = Vec::new();
    let mut directives = Vec::new();
    let mut diagnostics = Vec::new();

    let vertex = collect_stage(
        nodes,
        ShaderStage::Vertex,
        &mut varyings,
        &mut directives,
        &mut diagnostics,
    );
    let fragment = collect_stage(
        nodes,
        ShaderStage::Fragment,
        &mut varyings,
        &mut directives,
        &mut diagnostics,
    );

    for (stage, buf) in [(ShaderStage::Vertex, &vertex), (ShaderStage::Fragment, &fragment)] {
        let text = assemble_stage(
            stage,
            buf,
            templates.get(stage),
            &varyings,
            options,
            &mut directives,
            &mut diagnostics,
        );
        match stage {
            ShaderStage::Vertex => program.sources.vertex = text,
            ShaderStage::Fragment => program.sources.fragment = text,
        }
    }

    program.varyings = varyings;
    program.directives = directives;
    program.diagnostics = diagnostics;
    program
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(id: &str, vertex: &str, fragment: &str) -> CompositionNode {
        let mut n = CompositionNode::new(id);
        n.set_code(ShaderStage::Vertex, vertex);
        n.set_code(ShaderStage::Fragment, fragment);
        n
    }

    #[test]
    fn root_and_main_are_split_at_main_tag() {
        let a = node(
            "Tint",
            "",
            "vec4 tint(vec4 c) { return c; }\n@main\nfragColor = tint(fragColor);",
        );
        let merged = merge(&[&a], &StageTemplates::default(), &MergeOptions::default());
        assert_eq!(
            merged.sources.fragment,
            "vec4 tint(vec4 c) { return c; }\n\
             void main() {\n    fragColor = vec4(0.0);\n    fragColor = tint(fragColor);\n    fragColor = fragColor * opacity;\n}\n"
        );
        assert!(merged.diagnostics.is_empty());
    }

    #[test]
    fn vertex_outs_become_varyings_and_fragment_ins_are_dropped() {
        let a = node(
            "Wave",
            "out vec2 waveUv;\n@main\nwaveUv = texCoord;",
            "in vec2 waveUv;\n@main\nfragColor = vec4(waveUv, 0.0, 1.0);",
        );
        let merged = merge(&[&a], &StageTemplates::default(), &MergeOptions::default());
        assert_eq!(merged.varyings, vec!["vec2 waveUv;"]);
        assert!(merged.sources.vertex.starts_with("layout(location = 1) out vec2 waveUv;\n"));
        assert!(merged.sources.fragment.starts_with("layout(location = 1) in vec2 waveUv;\n"));
        assert_eq!(merged.sources.fragment.matches("waveUv;").count(), 1);
    }

    #[test]
    fn unknown_tag_reports_once_and_is_dropped() {
        let a = node("Odd", "", "@bogus foo\n@main\nfragColor = vec4(1.0);");
        let merged = merge(&[&a], &StageTemplates::default(), &MergeOptions::default());
        assert_eq!(merged.diagnostics.len(), 1);
        let d = &merged.diagnostics[0];
        assert_eq!(d.category, DiagnosticCategory::Preprocessor);
        assert_eq!(d.stage, Some(ShaderStage::Fragment));
        assert_eq!(d.node_id.as_deref(), Some("Odd"));
        assert!(d.message.contains("@bogus foo"));
        assert!(!merged.sources.fragment.contains("@bogus"));
    }

    #[test]
    fn directives_and_requires_are_stripped() {
        let a = node(
            "Grid",
            "@mesh 4,8\n@requires Noise\n@main\nvertCoord += 1.0;",
            "@blursources\n@main\nfragColor = vec4(1.0);",
        );
        let merged = merge(&[&a], &StageTemplates::default(), &MergeOptions::default());
        assert_eq!(merged.directives, vec!["@mesh 4,8", "@blursources"]);
        assert!(!merged.sources.vertex.contains('@'));
        assert!(!merged.sources.fragment.contains('@'));
    }

    #[test]
    fn disabled_nodes_do_not_contribute() {
        let mut a = node("Off", "", "@main\nfragColor = vec4(1.0);");
        a.enabled = false;
        let merged = merge(&[&a], &StageTemplates::default(), &MergeOptions::default());
        assert!(!merged.sources.fragment.contains("vec4(1.0)"));
    }

    #[test]
    fn template_without_nodes_line_is_reported() {
        let mut templates = StageTemplates::default();
        templates.set(ShaderStage::Fragment, "void main() {\n    fragColor = vec4(1.0);\n}");
        let a = node("Flat", "", "@main\nfragColor = vec4(0.5);");
        let merged = merge(&[&a], &templates, &MergeOptions::default());
        assert_eq!(merged.diagnostics.len(), 1);
        assert!(merged.diagnostics[0].message.contains("@nodes"));
    }

    #[test]
    fn defines_precede_varyings() {
        let a = node("Wave", "out float w;", "");
        let defines = vec![("STEPS".to_string(), "8".to_string())];
        let options = MergeOptions {
            defines: &defines,
            frag_coord: true,
            ..Default::default()
        };
        let merged = merge(&[&a], &StageTemplates::default(), &options);
        assert!(merged
            .sources
            .vertex
            .starts_with("#define STEPS 8\nlayout(location = 2) out float w;\n"));
    }
}
