//! Detection of the optional built-ins a composition needs.

use super::tags;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ShaderFeature {
    Time,
    Frame,
    Resolution,
    Source,
    Mouse,
    FragCoord,
    GridMesh,
    BlurSources,
}

impl ShaderFeature {
    pub const ALL: [ShaderFeature; 8] = [
        ShaderFeature::Time,
        ShaderFeature::Frame,
        ShaderFeature::Resolution,
        ShaderFeature::Source,
        ShaderFeature::Mouse,
        ShaderFeature::FragCoord,
        ShaderFeature::GridMesh,
        ShaderFeature::BlurSources,
    ];

    fn bit(self) -> u16 {
        1 << (self as u16)
    }

    /// Identifier whose literal presence in the text enables this feature.
    pub fn identifier(self) -> Option<&'static str> {
        match self {
            ShaderFeature::Time => Some("iTime"),
            ShaderFeature::Frame => Some("iFrame"),
            ShaderFeature::Resolution => Some("iResolution"),
            ShaderFeature::Source => Some("iSource"),
            ShaderFeature::Mouse => Some("iMouse"),
            ShaderFeature::FragCoord => Some("fragCoord"),
            ShaderFeature::GridMesh | ShaderFeature::BlurSources => None,
        }
    }
}

/// Capabilities detected in one build. Always recomputed from scratch.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ShaderFeatureSet {
    bits: u16,
    pub grid_width: u32,
    pub grid_height: u32,
}

impl Default for ShaderFeatureSet {
    fn default() -> Self {
        Self {
            bits: 0,
            grid_width: 1,
            grid_height: 1,
        }
    }
}

impl ShaderFeatureSet {
    pub fn has(&self, feature: ShaderFeature) -> bool {
        self.bits & feature.bit() != 0
    }

    pub fn set(&mut self, feature: ShaderFeature) {
        self.bits |= feature.bit();
    }

    pub fn enabled(&self) -> impl Iterator<Item = ShaderFeature> + '_ {
        ShaderFeature::ALL.into_iter().filter(|f| self.has(*f))
    }

    /// Scan every line of every text.
    pub fn detect<'a>(texts: impl IntoIterator<Item = &'a str>) -> Self {
        let mut set = Self::default();
        for text in texts {
            for line in text.lines() {
                set.scan_line(line);
            }
        }
        set
    }

    pub fn scan_line(&mut self, line: &str) {
        for feature in ShaderFeature::ALL {
            if let Some(ident) = feature.identifier() {
                if !self.has(feature) && line.contains(ident) {
                    self.set(feature);
                }
            }
        }

        if line.trim_start().starts_with(tags::TAG_MESH) {
            if let Some((w, h)) = tags::parse_mesh(line) {
                self.grid_width = self.grid_width.max(w);
                self.grid_height = self.grid_height.max(h);
                if self.grid_width > 1 || self.grid_height > 1 {
                    self.set(ShaderFeature::GridMesh);
                }
            }
        }

        if line.contains(tags::TAG_BLUR_SOURCES) {
            self.set(ShaderFeature::BlurSources);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identifiers_set_bits() {
        let f = ShaderFeatureSet::detect(["float t = iTime;", "vec2 p = fragCoord / iResolution.xy;"]);
        assert!(f.has(ShaderFeature::Time));
        assert!(f.has(ShaderFeature::FragCoord));
        assert!(f.has(ShaderFeature::Resolution));
        assert!(!f.has(ShaderFeature::Mouse));
        assert!(!f.has(ShaderFeature::GridMesh));
        assert_eq!((f.grid_width, f.grid_height), (1, 1));
    }

    #[test]
    fn mesh_keeps_per_axis_maximum() {
        let f = ShaderFeatureSet::detect(["@mesh 4,8", "@mesh 2,16"]);
        assert_eq!((f.grid_width, f.grid_height), (4, 16));
        assert!(f.has(ShaderFeature::GridMesh));

        let f = ShaderFeatureSet::detect(["@mesh 1,1"]);
        assert!(!f.has(ShaderFeature::GridMesh));
    }

    #[test]
    fn blur_sources_anywhere_in_line() {
        let f = ShaderFeatureSet::detect(["  @blursources"]);
        assert!(f.has(ShaderFeature::BlurSources));
        assert_eq!(
            f.enabled().collect::<Vec<_>>(),
            vec![ShaderFeature::BlurSources]
        );
    }
}
