//! Structural tag vocabulary recognized inside node code.

pub const TAG_MAIN: &str = "@main";
pub const TAG_NODES: &str = "@nodes";
pub const TAG_MESH: &str = "@mesh";
pub const TAG_BLUR_SOURCES: &str = "@blursources";
pub const TAG_REQUIRES: &str = "@requires";

pub const RESERVED_TAGS: [&str; 5] = [TAG_MAIN, TAG_NODES, TAG_MESH, TAG_BLUR_SOURCES, TAG_REQUIRES];

/// What a single line means to the composer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LineTag<'a> {
    /// Ordinary code.
    Code,
    /// One of `RESERVED_TAGS`.
    Reserved(&'a str),
    /// An `@`-prefixed token outside the vocabulary.
    Unknown(&'a str),
}

pub fn first_token(line: &str) -> Option<&str> {
    line.split_whitespace().next()
}

pub fn classify(line: &str) -> LineTag<'_> {
    match first_token(line) {
        Some(tok) if tok.starts_with('@') => {
            if RESERVED_TAGS.contains(&tok) {
                LineTag::Reserved(tok)
            } else {
                LineTag::Unknown(tok)
            }
        }
        _ => LineTag::Code,
    }
}

pub fn is_tag(line: &str, tag: &str) -> bool {
    first_token(line) == Some(tag)
}

/// Index of the first `@main` line, if any.
pub fn find_main(lines: &[&str]) -> Option<usize> {
    lines.iter().position(|l| is_tag(l, TAG_MAIN))
}

/// Parse `@mesh W,H`. Components below 1 are clamped to 1.
pub fn parse_mesh(line: &str) -> Option<(u32, u32)> {
    let rest = line.trim_start().strip_prefix(TAG_MESH)?;
    let (w, h) = rest.split_once(',')?;
    let w = w.trim().parse::<i64>().ok()?;
    let h = h.trim().parse::<i64>().ok()?;
    let clamp = |v: i64| v.clamp(1, u32::MAX as i64) as u32;
    Some((clamp(w), clamp(h)))
}

/// Node ids named by `@requires` lines, in order of first appearance.
pub fn required_ids<'a>(sources: impl IntoIterator<Item = &'a str>) -> Vec<String> {
    let mut ids: Vec<String> = Vec::new();
    for source in sources {
        for line in source.lines() {
            let Some(rest) = line.trim_start().strip_prefix(TAG_REQUIRES) else {
                continue;
            };
            if !rest.is_empty() && !rest.starts_with(char::is_whitespace) {
                // `@requiresFoo` is a different (unknown) tag.
                continue;
            }
            for id in rest.split(|c: char| c == ',' || c.is_whitespace()) {
                if !id.is_empty() && !ids.iter().any(|x| x == id) {
                    ids.push(id.to_string());
                }
            }
        }
    }
    ids
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_lines() {
        assert_eq!(classify("  @main"), LineTag::Reserved("@main"));
        assert_eq!(classify("@bogus foo"), LineTag::Unknown("@bogus"));
        assert_eq!(classify("vec2 uv = texCoord; // @main"), LineTag::Code);
        assert_eq!(classify(""), LineTag::Code);
    }

    #[test]
    fn mesh_directive() {
        assert_eq!(parse_mesh("@mesh 4,8"), Some((4, 8)));
        assert_eq!(parse_mesh("  @mesh 0, 16"), Some((1, 16)));
        assert_eq!(parse_mesh("@mesh 4"), None);
        assert_eq!(parse_mesh("@mesh a,b"), None);
    }

    #[test]
    fn requires_lists_are_deduplicated() {
        let ids = required_ids([
            "@requires BlurHelper\nvoid f();\n@requires Noise, BlurHelper",
            "@requiresX nope\n  @requires Vignette",
        ]);
        assert_eq!(ids, vec!["BlurHelper", "Noise", "Vignette"]);
    }
}
