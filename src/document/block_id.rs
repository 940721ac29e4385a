//! Block id generation and the `<!-- @mid:<id> -->` anchor convention
//! used to correlate a Markdown block with its Sidecar entries.

use crate::util::random_base36;

const ANCHOR_PREFIX: &str = "<!-- @mid:";
const ANCHOR_SUFFIX: &str = " -->";

/// A block kind tag used as the id prefix (`kind ∈ {p, h, list, bq, code, img}`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockIdKind {
    Paragraph,
    Heading,
    List,
    Blockquote,
    Code,
    Image,
}

impl BlockIdKind {
    fn tag(self) -> &'static str {
        match self {
            BlockIdKind::Paragraph => "p",
            BlockIdKind::Heading => "h",
            BlockIdKind::List => "list",
            BlockIdKind::Blockquote => "bq",
            BlockIdKind::Code => "code",
            BlockIdKind::Image => "img",
        }
    }
}

/// Freshly generate a block id of the form `<kind>-<6base36>`.
pub fn generate(kind: BlockIdKind) -> String {
    format!("{}-{}", kind.tag(), random_base36(6))
}

/// Render the anchor comment line for a block id.
pub fn anchor_line(id: &str) -> String {
    format!("{ANCHOR_PREFIX}{id}{ANCHOR_SUFFIX}")
}

/// If `line` is an anchor comment, return the block id it carries.
pub fn parse_anchor(line: &str) -> Option<&str> {
    let trimmed = line.trim();
    trimmed
        .strip_prefix(ANCHOR_PREFIX)
        .and_then(|s| s.strip_suffix(ANCHOR_SUFFIX))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_ids_have_kind_prefix_and_length() {
        let id = generate(BlockIdKind::Heading);
        assert!(id.starts_with("h-"));
        assert_eq!(id.len(), "h-".len() + 6);
    }

    #[test]
    fn anchor_round_trips() {
        let id = generate(BlockIdKind::Paragraph);
        let line = anchor_line(&id);
        assert_eq!(parse_anchor(&line), Some(id.as_str()));
    }

    #[test]
    fn non_anchor_lines_are_not_parsed() {
        assert_eq!(parse_anchor("just some text"), None);
        assert_eq!(parse_anchor("<!-- a regular comment -->"), None);
    }
}
