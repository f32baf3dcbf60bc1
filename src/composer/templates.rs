//! Built-in shader text: default main templates and the fixed stage interface.

use super::types::ShaderStage;

pub const GLSL_VERSION_LINE: &str = "#version 440";

/// Vertex attribute carrying the quad/grid position.
pub const VERTEX_POSITION: &str = "vertexPosition";
/// Vertex attribute carrying the texture coordinate.
pub const VERTEX_TEX_COORD: &str = "vertexTexCoord";
pub const MVP_MATRIX: &str = "mvpMatrix";
pub const OPACITY: &str = "opacity";

pub const DEFAULT_VERTEX_TEMPLATE: &str = "\
void main() {
    texCoord = vertexTexCoord;
    vec2 vertCoord = vertexPosition.xy;
    @nodes
    gl_Position = mvpMatrix * vec4(vertCoord, 0.0, 1.0);
}";

pub const DEFAULT_FRAGMENT_TEMPLATE: &str = "\
void main() {
    fragColor = vec4(0.0);
    @nodes
    fragColor = fragColor * opacity;
}";

pub fn default_template(stage: ShaderStage) -> &'static str {
    match stage {
        ShaderStage::Vertex => DEFAULT_VERTEX_TEMPLATE,
        ShaderStage::Fragment => DEFAULT_FRAGMENT_TEMPLATE,
    }
}

/// Statement feeding the `fragCoord` varying; emitted ahead of the vertex main buffer.
pub fn frag_coord_assignment() -> String {
    format!("    fragCoord = {VERTEX_POSITION}.xy;")
}
