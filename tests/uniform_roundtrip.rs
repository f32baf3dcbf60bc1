use std::path::{Path, PathBuf};

use node_forge_composer::{
    composition::uniform::{UniformData, UniformKind, UniformValue},
    dsl::UniformRecord,
};
use proptest::prelude::*;

fn base_dir() -> PathBuf {
    std::env::temp_dir().join("nfc-uniform-assets")
}

fn component() -> impl Strategy<Value = f32> {
    prop_oneof![
        Just(0.0_f32),
        Just(-0.0_f32),
        Just(1.0_f32),
        Just(f32::MIN_POSITIVE),
        Just(f32::MAX),
        Just(f32::MIN),
        -1.0e6_f32..1.0e6_f32,
    ]
}

fn data_for(kind: UniformKind) -> BoxedStrategy<UniformData> {
    match kind {
        UniformKind::Bool => any::<bool>().prop_map(UniformData::Bool).boxed(),
        UniformKind::Int => any::<i32>().prop_map(UniformData::Int).boxed(),
        UniformKind::Channel => (0..4).prop_map(UniformData::Channel).boxed(),
        UniformKind::Float => component().prop_map(UniformData::Float).boxed(),
        UniformKind::Vec2 => [component(), component()]
            .prop_map(UniformData::Vec2)
            .boxed(),
        UniformKind::Vec3 => [component(), component(), component()]
            .prop_map(UniformData::Vec3)
            .boxed(),
        UniformKind::Vec4 => [component(), component(), component(), component()]
            .prop_map(UniformData::Vec4)
            .boxed(),
        UniformKind::Color => [0.0_f32..=1.0, 0.0_f32..=1.0, 0.0_f32..=1.0, 0.0_f32..=1.0]
            .prop_map(UniformData::Color)
            .boxed(),
        UniformKind::Sampler => prop_oneof![
            Just(String::new()),
            "[a-z][a-z0-9_]{0,8}\\.png"
                .prop_map(|name| format!("file://{}", base_dir().join(name).display())),
        ]
        .prop_map(UniformData::Sampler)
        .boxed(),
        UniformKind::Define => "[A-Za-z0-9_.()]{0,12}".prop_map(UniformData::Define).boxed(),
    }
}

fn uniform() -> impl Strategy<Value = UniformValue> {
    prop::sample::select(UniformKind::ALL.to_vec()).prop_flat_map(|kind| {
        (
            "[a-z][A-Za-z0-9_]{0,10}",
            data_for(kind),
            data_for(kind),
            data_for(kind),
            data_for(kind),
            prop::option::of("[a-z]{1,6}\\(iTime\\) \\* [0-9]\\.[0-9]"),
            any::<bool>(),
            any::<bool>(),
        )
            .prop_map(
                move |(name, value, default_value, min, max, expr, use_expr, mipmap)| {
                    let mut u = UniformValue::new(name, kind);
                    u.value = value;
                    u.default_value = default_value;
                    if kind.has_range() {
                        u.min = min;
                        u.max = max;
                    }
                    u.use_custom_expression = use_expr && expr.is_some();
                    u.custom_expression = expr;
                    u.enable_mipmap = kind == UniformKind::Sampler && mipmap;
                    u
                },
            )
    })
}

fn through_json(u: &UniformValue, base: &Path) -> UniformValue {
    let text = serde_json::to_string(&u.to_record())
        .unwrap_or_else(|e| panic!("serialize {}: {e}", u.name));
    let record: UniformRecord =
        serde_json::from_str(&text).unwrap_or_else(|e| panic!("parse {text}: {e}"));
    UniformValue::from_record(&record, Some(base))
        .unwrap_or_else(|e| panic!("from_record {text}: {e:#}"))
}

proptest! {
    #[test]
    fn uniform_record_roundtrip_preserves_value(u in uniform()) {
        let back = through_json(&u, &base_dir());
        prop_assert_eq!(back.kind, u.kind);
        prop_assert_eq!(&back.value, &u.value);
        prop_assert_eq!(back.use_custom_expression, u.use_custom_expression);
        prop_assert_eq!(back, u);
    }
}

#[test]
fn sampler_record_keeps_only_the_file_name() {
    let dir = base_dir();
    let mut u = UniformValue::new("noiseTex", UniformKind::Sampler);
    u.value = UniformData::parse(UniformKind::Sampler, "textures/noise.png", Some(&dir)).unwrap();
    let expected = format!("file://{}", dir.join("textures/noise.png").display());
    assert_eq!(u.value, UniformData::Sampler(expected));

    let record = u.to_record();
    assert_eq!(record.value, Some(serde_json::json!("noise.png")));

    // Relocated next to the project file it is saved with.
    let moved = std::env::temp_dir().join("nfc-uniform-elsewhere");
    let back = UniformValue::from_record(&record, Some(&moved)).unwrap();
    assert_eq!(
        back.value,
        UniformData::Sampler(format!("file://{}", moved.join("noise.png").display()))
    );
}

#[test]
fn numeric_values_accept_json_numbers_and_pad_components() {
    let record: UniformRecord = serde_json::from_str(
        r#"{"name":"tint","type":"color","value":"0.5, 0.25","defaultValue":[1, 0, 0]}"#,
    )
    .unwrap();
    let u = UniformValue::from_record(&record, None).unwrap();
    assert_eq!(u.value, UniformData::Color([0.5, 0.25, 0.0, 1.0]));
    assert_eq!(u.default_value, UniformData::Color([1.0, 0.0, 0.0, 1.0]));

    let record: UniformRecord =
        serde_json::from_str(r#"{"name":"steps","type":"int","value":3.0}"#).unwrap();
    let u = UniformValue::from_record(&record, None).unwrap();
    assert_eq!(u.value, UniformData::Int(3));
}

#[test]
fn custom_expression_without_text_is_inactive() {
    let record: UniformRecord = serde_json::from_str(
        r#"{"name":"speed","type":"float","customValue":"  ","useCustomValue":true}"#,
    )
    .unwrap();
    let u = UniformValue::from_record(&record, None).unwrap();
    assert!(u.custom_expression.is_none());
    assert!(!u.use_custom_expression);
    assert_eq!(u.active_custom_expression(), None);
}

#[test]
fn rejects_mismatched_and_malformed_values() {
    let mut u = UniformValue::new("amount", UniformKind::Float);
    assert!(u.set_value(UniformData::Int(1)).is_err());
    assert!(UniformData::parse(UniformKind::Vec2, "1, 2, 3", None).is_err());
    assert!(UniformData::parse(UniformKind::Bool, "maybe", None).is_err());
    assert!(UniformKind::parse("mat4").is_err());
}
