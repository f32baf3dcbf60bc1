//! In-process GLSL validation via naga.

use anyhow::{Result, anyhow};

use crate::composer::types::ShaderStage;

fn naga_stage(stage: ShaderStage) -> naga::ShaderStage {
    match stage {
        ShaderStage::Vertex => naga::ShaderStage::Vertex,
        ShaderStage::Fragment => naga::ShaderStage::Fragment,
    }
}

/// Parse and validate a GLSL stage, translating it to WGSL.
pub fn glsl_to_wgsl(source: &str, stage: ShaderStage) -> Result<String> {
    let mut parser = naga::front::glsl::Frontend::default();
    let options = naga::front::glsl::Options {
        stage: naga_stage(stage),
        defines: Default::default(),
    };

    let module = parser
        .parse(&options, source)
        .map_err(|e| anyhow!("GLSL parse failed: {}", format_glsl_errors(source, &e)))?;

    let info = naga::valid::Validator::new(
        naga::valid::ValidationFlags::all(),
        naga::valid::Capabilities::all(),
    )
    .validate(&module)
    .map_err(|e| anyhow!("GLSL validation failed: {e:?}"))?;

    naga::back::wgsl::write_string(&module, &info, naga::back::wgsl::WriterFlags::EXPLICIT_TYPES)
        .map_err(|e| anyhow!("WGSL writer failed: {e:?}"))
}

/// One error per line, prefixed `0:<line>:` so line extraction works the same way
/// as for external compiler output.
fn format_glsl_errors(source: &str, error: &naga::front::glsl::ParseError) -> String {
    let mut out = String::new();
    for e in &error.errors {
        let line = e.meta.location(source).line_number;
        out.push_str(&format!("\nERROR: 0:{line}: {}", e.kind));
    }
    out
}
