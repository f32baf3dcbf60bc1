//! Typed uniform parameters and their record (de)serialization.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow, bail};
use serde_json::Value;

use crate::dsl::{UniformRecord, value_text};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum UniformKind {
    Bool,
    Int,
    Float,
    Vec2,
    Vec3,
    Vec4,
    Color,
    Sampler,
    Channel,
    Define,
}

impl UniformKind {
    pub const ALL: [UniformKind; 10] = [
        UniformKind::Bool,
        UniformKind::Int,
        UniformKind::Float,
        UniformKind::Vec2,
        UniformKind::Vec3,
        UniformKind::Vec4,
        UniformKind::Color,
        UniformKind::Sampler,
        UniformKind::Channel,
        UniformKind::Define,
    ];

    pub fn parse(s: &str) -> Result<Self> {
        let kind = match s.trim().to_ascii_lowercase().as_str() {
            "bool" => UniformKind::Bool,
            "int" => UniformKind::Int,
            "float" => UniformKind::Float,
            "vec2" => UniformKind::Vec2,
            "vec3" => UniformKind::Vec3,
            "vec4" => UniformKind::Vec4,
            "color" => UniformKind::Color,
            "sampler2d" | "sampler" => UniformKind::Sampler,
            "channel" => UniformKind::Channel,
            "define" => UniformKind::Define,
            other => bail!("unknown uniform type `{other}`"),
        };
        Ok(kind)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            UniformKind::Bool => "bool",
            UniformKind::Int => "int",
            UniformKind::Float => "float",
            UniformKind::Vec2 => "vec2",
            UniformKind::Vec3 => "vec3",
            UniformKind::Vec4 => "vec4",
            UniformKind::Color => "color",
            UniformKind::Sampler => "sampler2D",
            UniformKind::Channel => "channel",
            UniformKind::Define => "define",
        }
    }

    /// Type name inside the uniform block. `None` for kinds that never enter it.
    pub fn shader_type(self) -> Option<&'static str> {
        match self {
            UniformKind::Bool => Some("bool"),
            UniformKind::Int | UniformKind::Channel => Some("int"),
            UniformKind::Float => Some("float"),
            UniformKind::Vec2 => Some("vec2"),
            UniformKind::Vec3 => Some("vec3"),
            UniformKind::Vec4 | UniformKind::Color => Some("vec4"),
            UniformKind::Sampler | UniformKind::Define => None,
        }
    }

    /// Whether `minValue`/`maxValue` are meaningful (and therefore serialized).
    pub fn has_range(self) -> bool {
        matches!(
            self,
            UniformKind::Int
                | UniformKind::Float
                | UniformKind::Vec2
                | UniformKind::Vec3
                | UniformKind::Vec4
        )
    }

    /// Zero value; the lower bound when none is given.
    pub fn zero(self) -> UniformData {
        match self {
            UniformKind::Bool => UniformData::Bool(false),
            UniformKind::Int => UniformData::Int(0),
            UniformKind::Float => UniformData::Float(0.0),
            UniformKind::Vec2 => UniformData::Vec2([0.0; 2]),
            UniformKind::Vec3 => UniformData::Vec3([0.0; 3]),
            UniformKind::Vec4 => UniformData::Vec4([0.0; 4]),
            UniformKind::Color => UniformData::Color([0.0, 0.0, 0.0, 0.0]),
            UniformKind::Sampler => UniformData::Sampler(String::new()),
            UniformKind::Channel => UniformData::Channel(0),
            UniformKind::Define => UniformData::Define(String::new()),
        }
    }

    /// Upper bound when none is given.
    pub fn one(self) -> UniformData {
        match self {
            UniformKind::Bool => UniformData::Bool(true),
            UniformKind::Int => UniformData::Int(1),
            UniformKind::Float => UniformData::Float(1.0),
            UniformKind::Vec2 => UniformData::Vec2([1.0; 2]),
            UniformKind::Vec3 => UniformData::Vec3([1.0; 3]),
            UniformKind::Vec4 => UniformData::Vec4([1.0; 4]),
            UniformKind::Color => UniformData::Color([1.0; 4]),
            UniformKind::Sampler => UniformData::Sampler(String::new()),
            // r, g, b, a
            UniformKind::Channel => UniformData::Channel(3),
            UniformKind::Define => UniformData::Define(String::new()),
        }
    }
}

/// Value payload; the variant always matches the owning uniform's `kind`.
#[derive(Clone, Debug, PartialEq)]
pub enum UniformData {
    Bool(bool),
    Int(i32),
    Float(f32),
    Vec2([f32; 2]),
    Vec3([f32; 3]),
    Vec4([f32; 4]),
    Color([f32; 4]),
    /// Absolute, scheme-qualified resource reference (or empty).
    Sampler(String),
    Channel(i32),
    /// Replacement text for `#define NAME VALUE`.
    Define(String),
}

impl UniformData {
    pub fn kind(&self) -> UniformKind {
        match self {
            UniformData::Bool(_) => UniformKind::Bool,
            UniformData::Int(_) => UniformKind::Int,
            UniformData::Float(_) => UniformKind::Float,
            UniformData::Vec2(_) => UniformKind::Vec2,
            UniformData::Vec3(_) => UniformKind::Vec3,
            UniformData::Vec4(_) => UniformKind::Vec4,
            UniformData::Color(_) => UniformKind::Color,
            UniformData::Sampler(_) => UniformKind::Sampler,
            UniformData::Channel(_) => UniformKind::Channel,
            UniformData::Define(_) => UniformKind::Define,
        }
    }

    /// Parse record text for `kind`. Sampler paths are resolved against `base_dir`.
    pub fn parse(kind: UniformKind, text: &str, base_dir: Option<&Path>) -> Result<Self> {
        let text = text.trim();
        let data = match kind {
            UniformKind::Bool => UniformData::Bool(parse_bool(text)?),
            UniformKind::Int => UniformData::Int(parse_int(text)?),
            UniformKind::Channel => UniformData::Channel(parse_int(text)?),
            UniformKind::Float => UniformData::Float(parse_components::<1>(text, 0.0)?[0]),
            UniformKind::Vec2 => UniformData::Vec2(parse_components(text, 0.0)?),
            UniformKind::Vec3 => UniformData::Vec3(parse_components(text, 0.0)?),
            UniformKind::Vec4 => UniformData::Vec4(parse_components(text, 0.0)?),
            UniformKind::Color => UniformData::Color(parse_components(text, 1.0)?),
            UniformKind::Sampler => UniformData::Sampler(resolve_resource(text, base_dir)?),
            UniformKind::Define => UniformData::Define(text.to_string()),
        };
        Ok(data)
    }

    /// Record text. Samplers keep only the file base name.
    pub fn to_record_text(&self) -> String {
        match self {
            UniformData::Bool(b) => b.to_string(),
            UniformData::Int(v) | UniformData::Channel(v) => v.to_string(),
            UniformData::Float(v) => fmt_component(*v),
            UniformData::Vec2(v) => join_components(v),
            UniformData::Vec3(v) => join_components(v),
            UniformData::Vec4(v) | UniformData::Color(v) => join_components(v),
            UniformData::Sampler(url) => resource_base_name(url),
            UniformData::Define(text) => text.clone(),
        }
    }
}

fn parse_bool(text: &str) -> Result<bool> {
    match text.to_ascii_lowercase().as_str() {
        "true" | "1" => Ok(true),
        "false" | "0" | "" => Ok(false),
        other => bail!("invalid bool value `{other}`"),
    }
}

fn parse_int(text: &str) -> Result<i32> {
    if text.is_empty() {
        return Ok(0);
    }
    text.parse::<i32>()
        .or_else(|_| {
            // Accept `3.0` from editors that store every number as float.
            text.parse::<f64>()
                .ok()
                .filter(|v| v.fract() == 0.0 && *v >= i32::MIN as f64 && *v <= i32::MAX as f64)
                .map(|v| v as i32)
                .ok_or(())
        })
        .map_err(|_| anyhow!("invalid int value `{text}`"))
}

/// Parse up to `N` comma-separated floats; missing trailing components use `pad_last`
/// for the final slot and zero elsewhere.
fn parse_components<const N: usize>(text: &str, pad_last: f32) -> Result<[f32; N]> {
    let mut out = [0.0_f32; N];
    if N > 1 {
        out[N - 1] = pad_last;
    }
    if text.is_empty() {
        return Ok(out);
    }
    let parts: Vec<&str> = text.split(',').map(str::trim).collect();
    if parts.len() > N {
        bail!("expected at most {N} components, got {} in `{text}`", parts.len());
    }
    for (slot, part) in out.iter_mut().zip(parts) {
        *slot = part
            .parse::<f32>()
            .map_err(|_| anyhow!("invalid number `{part}` in `{text}`"))?;
    }
    Ok(out)
}

/// Shortest text that parses back to the same `f32`.
pub fn fmt_component(v: f32) -> String {
    if v.is_finite() { v.to_string() } else { "0".to_string() }
}

fn join_components(values: &[f32]) -> String {
    values
        .iter()
        .map(|v| fmt_component(*v))
        .collect::<Vec<_>>()
        .join(", ")
}

const FILE_SCHEME: &str = "file://";

fn has_scheme(text: &str) -> bool {
    text.split_once(':').is_some_and(|(scheme, rest)| {
        scheme.len() > 1
            && scheme.chars().all(|c| c.is_ascii_alphanumeric() || c == '+' || c == '-')
            && !rest.is_empty()
    })
}

/// Resolve a sampler path into an absolute `file://` reference.
pub fn resolve_resource(text: &str, base_dir: Option<&Path>) -> Result<String> {
    if text.is_empty() || has_scheme(text) {
        return Ok(text.to_string());
    }
    let path = PathBuf::from(text);
    let joined = match base_dir {
        Some(dir) if path.is_relative() => dir.join(path),
        _ => path,
    };
    let absolute = std::path::absolute(&joined)
        .with_context(|| format!("failed to resolve sampler path {}", joined.display()))?;
    Ok(format!("{FILE_SCHEME}{}", absolute.display()))
}

/// File base name of a resource reference (`file:///a/b/noise.png` -> `noise.png`).
pub fn resource_base_name(url: &str) -> String {
    let path = url.strip_prefix(FILE_SCHEME).unwrap_or(url);
    Path::new(path)
        .file_name()
        .and_then(|s| s.to_str())
        .unwrap_or(path)
        .to_string()
}

#[derive(Clone, Debug, PartialEq)]
pub struct UniformValue {
    pub name: String,
    pub display_name: String,
    pub kind: UniformKind,
    pub control_kind: UniformKind,
    pub value: UniformData,
    pub default_value: UniformData,
    pub min: UniformData,
    pub max: UniformData,
    pub description: String,
    pub custom_expression: Option<String>,
    pub use_custom_expression: bool,
    pub enable_mipmap: bool,
}

impl UniformValue {
    /// A uniform with every value slot initialized to the kind's zero/one defaults.
    pub fn new(name: impl Into<String>, kind: UniformKind) -> Self {
        let name = name.into();
        Self {
            display_name: name.clone(),
            name,
            kind,
            control_kind: kind,
            value: kind.zero(),
            default_value: kind.zero(),
            min: kind.zero(),
            max: kind.one(),
            description: String::new(),
            custom_expression: None,
            use_custom_expression: false,
            enable_mipmap: false,
        }
    }

    pub fn with_value(mut self, value: UniformData) -> Result<Self> {
        self.set_value(value.clone())?;
        self.default_value = value;
        Ok(self)
    }

    pub fn set_value(&mut self, value: UniformData) -> Result<()> {
        if value.kind() != self.kind {
            bail!(
                "uniform `{}` is {}, got a {} value",
                self.name,
                self.kind.as_str(),
                value.kind().as_str()
            );
        }
        self.value = value;
        Ok(())
    }

    pub fn set_custom_expression(&mut self, expression: Option<String>) {
        self.custom_expression = expression.filter(|e| !e.trim().is_empty());
        self.use_custom_expression = self.custom_expression.is_some();
    }

    /// The custom expression, when one is set and enabled.
    pub fn active_custom_expression(&self) -> Option<&str> {
        if self.use_custom_expression {
            self.custom_expression.as_deref()
        } else {
            None
        }
    }

    pub fn from_record(record: &UniformRecord, base_dir: Option<&Path>) -> Result<Self> {
        let name = record.name.trim();
        if name.is_empty() {
            bail!("uniform is missing its name");
        }
        let kind = UniformKind::parse(&record.kind)
            .with_context(|| format!("uniform `{name}`"))?;
        let control_kind = match record.control_type.as_deref() {
            Some(t) if !t.trim().is_empty() => UniformKind::parse(t)
                .with_context(|| format!("uniform `{name}` controlType"))?,
            _ => kind,
        };

        let parse_slot = |slot: &Option<Value>, what: &str| -> Result<Option<UniformData>> {
            let Some(v) = slot else {
                return Ok(None);
            };
            let text = value_text(v).with_context(|| format!("uniform `{name}` {what}"))?;
            UniformData::parse(kind, &text, base_dir)
                .map(Some)
                .with_context(|| format!("uniform `{name}` {what}"))
        };

        let default_value = parse_slot(&record.default_value, "defaultValue")?
            .unwrap_or_else(|| kind.zero());
        let value = parse_slot(&record.value, "value")?.unwrap_or_else(|| default_value.clone());
        let min = parse_slot(&record.min_value, "minValue")?.unwrap_or_else(|| kind.zero());
        let max = parse_slot(&record.max_value, "maxValue")?.unwrap_or_else(|| kind.one());

        let custom_expression = record
            .custom_value
            .clone()
            .filter(|e| !e.trim().is_empty());
        let use_custom_expression =
            record.use_custom_value.unwrap_or(false) && custom_expression.is_some();

        Ok(Self {
            name: name.to_string(),
            display_name: record
                .display_name
                .clone()
                .filter(|s| !s.is_empty())
                .unwrap_or_else(|| name.to_string()),
            kind,
            control_kind,
            value,
            default_value,
            min,
            max,
            description: record.description.clone().unwrap_or_default(),
            custom_expression,
            use_custom_expression,
            enable_mipmap: kind == UniformKind::Sampler && record.enable_mipmap.unwrap_or(false),
        })
    }

    pub fn to_record(&self) -> UniformRecord {
        let text = |d: &UniformData| Value::String(d.to_record_text());
        let has_range = self.kind.has_range();
        UniformRecord {
            name: self.name.clone(),
            kind: self.kind.as_str().to_string(),
            control_type: (self.control_kind != self.kind)
                .then(|| self.control_kind.as_str().to_string()),
            display_name: (self.display_name != self.name).then(|| self.display_name.clone()),
            description: (!self.description.is_empty()).then(|| self.description.clone()),
            value: Some(text(&self.value)),
            default_value: Some(text(&self.default_value)),
            min_value: has_range.then(|| text(&self.min)),
            max_value: has_range.then(|| text(&self.max)),
            custom_value: self.custom_expression.clone(),
            use_custom_value: self
                .custom_expression
                .as_ref()
                .map(|_| self.use_custom_expression),
            enable_mipmap: (self.kind == UniformKind::Sampler && self.enable_mipmap)
                .then_some(true),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(kind: &str) -> UniformRecord {
        UniformRecord {
            name: "u".to_string(),
            kind: kind.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn missing_values_get_zero_one_defaults() {
        let u = UniformValue::from_record(&record("vec3"), None).unwrap();
        assert_eq!(u.value, UniformData::Vec3([0.0; 3]));
        assert_eq!(u.min, UniformData::Vec3([0.0; 3]));
        assert_eq!(u.max, UniformData::Vec3([1.0; 3]));
        assert_eq!(u.control_kind, UniformKind::Vec3);
        assert_eq!(u.display_name, "u");
    }

    #[test]
    fn value_falls_back_to_default_value() {
        let mut r = record("float");
        r.default_value = Some(Value::String("0.25".into()));
        let u = UniformValue::from_record(&r, None).unwrap();
        assert_eq!(u.value, UniformData::Float(0.25));
    }

    #[test]
    fn color_pads_alpha_with_one() {
        let d = UniformData::parse(UniformKind::Color, "1, 0.5, 0", None).unwrap();
        assert_eq!(d, UniformData::Color([1.0, 0.5, 0.0, 1.0]));
    }

    #[test]
    fn too_many_components_is_an_error() {
        assert!(UniformData::parse(UniformKind::Vec2, "1, 2, 3", None).is_err());
        assert!(UniformData::parse(UniformKind::Float, "abc", None).is_err());
    }

    #[test]
    fn control_type_only_serialized_when_different() {
        let mut r = record("int");
        r.control_type = Some("channel".into());
        let u = UniformValue::from_record(&r, None).unwrap();
        assert_eq!(u.control_kind, UniformKind::Channel);
        assert_eq!(u.to_record().control_type.as_deref(), Some("channel"));

        let plain = UniformValue::from_record(&record("int"), None).unwrap();
        assert!(plain.to_record().control_type.is_none());
    }

    #[test]
    fn range_omitted_for_non_editable_kinds() {
        for kind in ["bool", "color", "sampler2D", "channel"] {
            let u = UniformValue::from_record(&record(kind), None).unwrap();
            let out = u.to_record();
            assert!(out.min_value.is_none() && out.max_value.is_none(), "{kind}");
            assert!(out.value.is_some() && out.default_value.is_some(), "{kind}");
        }
        let u = UniformValue::from_record(&record("vec2"), None).unwrap();
        assert!(u.to_record().min_value.is_some());
    }

    #[test]
    fn sampler_resolves_to_file_url_and_serializes_base_name() {
        let mut r = record("sampler2D");
        r.value = Some(Value::String("images/noise.png".into()));
        r.enable_mipmap = Some(true);
        let u = UniformValue::from_record(&r, Some(Path::new("/lib/effects"))).unwrap();
        assert_eq!(
            u.value,
            UniformData::Sampler("file:///lib/effects/images/noise.png".into())
        );
        assert!(u.enable_mipmap);

        let out = u.to_record();
        assert_eq!(out.value, Some(Value::String("noise.png".into())));
        assert_eq!(out.enable_mipmap, Some(true));
    }

    #[test]
    fn custom_expression_fields_only_when_set() {
        let u = UniformValue::new("speed", UniformKind::Float);
        let out = u.to_record();
        assert!(out.custom_value.is_none() && out.use_custom_value.is_none());

        let mut u = u;
        u.set_custom_expression(Some("iTime * 2.0".into()));
        let out = u.to_record();
        assert_eq!(out.custom_value.as_deref(), Some("iTime * 2.0"));
        assert_eq!(out.use_custom_value, Some(true));
    }

    #[test]
    fn set_value_rejects_kind_mismatch() {
        let mut u = UniformValue::new("amount", UniformKind::Float);
        assert!(u.set_value(UniformData::Int(3)).is_err());
        assert!(u.set_value(UniformData::Float(3.0)).is_ok());
    }
}
