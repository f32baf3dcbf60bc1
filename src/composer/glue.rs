//! Glue generation: uniform block, sampler bindings and host-exposed properties.
//!
//! The shader side is plain GLSL 440 declarations. The host side is a list of
//! `HostProperty` values; `render_properties` turns them into the neutral
//! `[readonly ]property <type> <name>: <initializer>` text used for feature scanning
//! and handed to embedding applications.

use std::fmt::Write as _;

use crate::composition::{
    property_store::PropertyStore,
    uniform::{UniformData, UniformKind, UniformValue, fmt_component},
};

use super::{
    features::{ShaderFeature, ShaderFeatureSet},
    templates::{GLSL_VERSION_LINE, MVP_MATRIX, OPACITY, VERTEX_POSITION, VERTEX_TEX_COORD},
    types::StageSources,
};

/// Number of blur-source samplers reserved when `@blursources` is used.
pub const BLUR_SOURCE_COUNT: u32 = 5;

const BUILTIN_FIELDS: [(ShaderFeature, &str); 4] = [
    (ShaderFeature::Time, "float iTime"),
    (ShaderFeature::Frame, "int iFrame"),
    (ShaderFeature::Resolution, "vec3 iResolution"),
    (ShaderFeature::Mouse, "vec4 iMouse"),
];

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SamplerBinding {
    pub binding: u32,
    pub name: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HostType {
    Bool,
    Int,
    Real,
    Vector2,
    Vector3,
    Vector4,
    Color,
    Image,
    Text,
}

impl HostType {
    pub fn as_str(self) -> &'static str {
        match self {
            HostType::Bool => "bool",
            HostType::Int => "int",
            HostType::Real => "real",
            HostType::Vector2 => "vector2",
            HostType::Vector3 => "vector3",
            HostType::Vector4 => "vector4",
            HostType::Color => "color",
            HostType::Image => "image",
            HostType::Text => "string",
        }
    }

    fn for_kind(kind: UniformKind) -> Self {
        match kind {
            UniformKind::Bool => HostType::Bool,
            UniformKind::Int | UniformKind::Channel => HostType::Int,
            UniformKind::Float => HostType::Real,
            UniformKind::Vec2 => HostType::Vector2,
            UniformKind::Vec3 => HostType::Vector3,
            UniformKind::Vec4 => HostType::Vector4,
            UniformKind::Color => HostType::Color,
            UniformKind::Sampler => HostType::Image,
            UniformKind::Define => HostType::Text,
        }
    }

    /// Best fitting type for a `#define` replacement text.
    fn for_define(text: &str) -> Self {
        let t = text.trim();
        if t == "true" || t == "false" {
            HostType::Bool
        } else if t.parse::<i64>().is_ok() {
            HostType::Int
        } else if t.parse::<f64>().is_ok() {
            HostType::Real
        } else {
            HostType::Text
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Access {
    ReadOnly,
    ReadWrite,
}

#[derive(Clone, Debug, PartialEq)]
pub struct HostProperty {
    pub name: String,
    pub ty: HostType,
    pub access: Access,
    pub initializer: String,
}

impl HostProperty {
    fn new(name: impl Into<String>, ty: HostType, access: Access, initializer: String) -> Self {
        Self {
            name: name.into(),
            ty,
            access,
            initializer,
        }
    }

    pub fn declaration(&self) -> String {
        let prefix = match self.access {
            Access::ReadOnly => "readonly ",
            Access::ReadWrite => "",
        };
        format!(
            "{prefix}property {} {}: {}",
            self.ty.as_str(),
            self.name,
            self.initializer
        )
    }
}

/// Everything generated from the uniform set and the feature set for one build.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Glue {
    /// Complete per-stage headers (version, stage interface, uniform block, samplers).
    pub headers: StageSources,
    pub uniform_block: String,
    pub samplers: Vec<SamplerBinding>,
    /// One per uniform (Define uniforms lower-cased).
    pub host_properties: Vec<HostProperty>,
    /// Feature-driven properties the host has to feed (`iTime`, `iSource`, ...).
    pub builtin_properties: Vec<HostProperty>,
}

impl Glue {
    /// Host declarations, built-ins first.
    pub fn host_text(&self) -> String {
        let mut all = self.builtin_properties.clone();
        all.extend(self.host_properties.iter().cloned());
        render_properties(&all)
    }
}

pub fn render_properties(props: &[HostProperty]) -> String {
    let mut out = String::new();
    for p in props {
        out.push_str(&p.declaration());
        out.push('\n');
    }
    out
}

fn vector_literal(ctor: &str, values: &[f32]) -> String {
    let parts: Vec<String> = values.iter().map(|v| fmt_component(*v)).collect();
    format!("{ctor}({})", parts.join(", "))
}

fn image_literal(url: &str, mipmap: bool) -> String {
    let url = url.replace('\\', "\\\\").replace('"', "\\\"");
    if mipmap {
        format!("image(\"{url}\", mipmap)")
    } else {
        format!("image(\"{url}\")")
    }
}

fn value_literal(value: &UniformData, mipmap: bool) -> String {
    match value {
        UniformData::Bool(b) => b.to_string(),
        UniformData::Int(v) | UniformData::Channel(v) => v.to_string(),
        UniformData::Float(v) => fmt_component(*v),
        UniformData::Vec2(v) => vector_literal("vector2", v),
        UniformData::Vec3(v) => vector_literal("vector3", v),
        UniformData::Vec4(v) => vector_literal("vector4", v),
        UniformData::Color(v) => vector_literal("rgba", v),
        UniformData::Sampler(url) => image_literal(url, mipmap),
        UniformData::Define(text) => text.clone(),
    }
}

/// Host properties for the uniforms, reading live values from `store`.
pub fn host_properties(uniforms: &[&UniformValue], store: &PropertyStore) -> Vec<HostProperty> {
    uniforms
        .iter()
        .map(|u| {
            let current = store.current(u);
            if u.kind == UniformKind::Define {
                let text = value_literal(current, false);
                return HostProperty::new(
                    u.name.to_lowercase(),
                    HostType::for_define(&text),
                    Access::ReadOnly,
                    text,
                );
            }
            match u.active_custom_expression() {
                Some(expr) => HostProperty::new(
                    u.name.clone(),
                    HostType::for_kind(u.kind),
                    Access::ReadWrite,
                    expr.trim().to_string(),
                ),
                None => HostProperty::new(
                    u.name.clone(),
                    HostType::for_kind(u.kind),
                    Access::ReadOnly,
                    value_literal(current, u.enable_mipmap),
                ),
            }
        })
        .collect()
}

pub fn builtin_properties(features: &ShaderFeatureSet, extra_margin: i32) -> Vec<HostProperty> {
    let mut props = Vec::new();
    let rw = |name: &str, ty: HostType, init: &str| {
        HostProperty::new(name, ty, Access::ReadWrite, init.to_string())
    };
    if features.has(ShaderFeature::Time) {
        props.push(rw("iTime", HostType::Real, "0"));
    }
    if features.has(ShaderFeature::Frame) {
        props.push(rw("iFrame", HostType::Int, "0"));
    }
    if features.has(ShaderFeature::Resolution) {
        props.push(rw("iResolution", HostType::Vector3, "vector3(0, 0, 1)"));
    }
    if features.has(ShaderFeature::Mouse) {
        props.push(rw("iMouse", HostType::Vector4, "vector4(0, 0, 0, 0)"));
    }
    if features.has(ShaderFeature::Source) {
        props.push(rw("iSource", HostType::Image, "null"));
    }
    if features.has(ShaderFeature::GridMesh) {
        props.push(HostProperty::new(
            "meshResolution",
            HostType::Vector2,
            Access::ReadOnly,
            format!("vector2({}, {})", features.grid_width, features.grid_height),
        ));
    }
    if features.has(ShaderFeature::BlurSources) {
        props.push(HostProperty::new(
            "blurHelper",
            HostType::Bool,
            Access::ReadOnly,
            "true".to_string(),
        ));
    }
    props.push(HostProperty::new(
        "extraMargin",
        HostType::Int,
        Access::ReadOnly,
        extra_margin.to_string(),
    ));
    props
}

pub fn uniform_block(uniforms: &[&UniformValue], features: &ShaderFeatureSet) -> String {
    let mut s = String::from("layout(std140, binding = 0) uniform buf {\n");
    let _ = writeln!(s, "    mat4 {MVP_MATRIX};");
    let _ = writeln!(s, "    float {OPACITY};");
    for (feature, decl) in BUILTIN_FIELDS {
        if features.has(feature) {
            let _ = writeln!(s, "    {decl};");
        }
    }
    for u in uniforms {
        if let Some(ty) = u.kind.shader_type() {
            let _ = writeln!(s, "    {ty} {};", u.name);
        }
    }
    s.push_str("};\n");
    s
}

pub fn sampler_bindings(uniforms: &[&UniformValue], features: &ShaderFeatureSet) -> Vec<SamplerBinding> {
    let mut out = Vec::new();
    let mut next: u32 = 1;
    let mut push = |name: String, out: &mut Vec<SamplerBinding>| {
        out.push(SamplerBinding {
            binding: next,
            name,
        });
        next += 1;
    };
    if features.has(ShaderFeature::Source) {
        push("iSource".to_string(), &mut out);
    }
    for u in uniforms.iter().filter(|u| u.kind == UniformKind::Sampler) {
        push(u.name.clone(), &mut out);
    }
    if features.has(ShaderFeature::BlurSources) {
        for i in 1..=BLUR_SOURCE_COUNT {
            push(format!("iSourceBlur{i}"), &mut out);
        }
    }
    out
}

fn stage_headers(
    features: &ShaderFeatureSet,
    uniform_block: &str,
    samplers: &[SamplerBinding],
) -> StageSources {
    let frag_coord = features.has(ShaderFeature::FragCoord);
    let mut sampler_text = String::new();
    for b in samplers {
        let _ = writeln!(
            sampler_text,
            "layout(binding = {}) uniform sampler2D {};",
            b.binding, b.name
        );
    }

    let mut vertex = format!("{GLSL_VERSION_LINE}\n\n");
    let _ = writeln!(vertex, "layout(location = 0) in vec4 {VERTEX_POSITION};");
    let _ = writeln!(vertex, "layout(location = 1) in vec2 {VERTEX_TEX_COORD};");
    vertex.push_str("layout(location = 0) out vec2 texCoord;\n");
    if frag_coord {
        vertex.push_str("layout(location = 1) out vec2 fragCoord;\n");
    }

    let mut fragment = format!("{GLSL_VERSION_LINE}\n\n");
    fragment.push_str("layout(location = 0) in vec2 texCoord;\n");
    if frag_coord {
        fragment.push_str("layout(location = 1) in vec2 fragCoord;\n");
    }
    fragment.push_str("layout(location = 0) out vec4 fragColor;\n");

    for header in [&mut vertex, &mut fragment] {
        header.push('\n');
        header.push_str(uniform_block);
        if !sampler_text.is_empty() {
            header.push('\n');
            header.push_str(&sampler_text);
        }
    }

    StageSources { vertex, fragment }
}

pub fn generate(
    uniforms: &[&UniformValue],
    store: &PropertyStore,
    features: &ShaderFeatureSet,
    extra_margin: i32,
) -> Glue {
    let uniform_block = uniform_block(uniforms, features);
    let samplers = sampler_bindings(uniforms, features);
    let headers = stage_headers(features, &uniform_block, &samplers);
    Glue {
        headers,
        uniform_block,
        samplers,
        host_properties: host_properties(uniforms, store),
        builtin_properties: builtin_properties(features, extra_margin),
    }
}
