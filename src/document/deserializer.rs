//! (Markdown, Sidecar) -> document tree.
//!
//! The inverse of `serializer`. Offsets recorded in the Sidecar's `spans`
//! are matched against the raw Markdown span of each parsed inline run
//! (not the run's plain text), mirroring exactly how the serializer
//! computed them - see `serializer::render_inline`.

use std::future::Future;
use std::pin::Pin;

use crate::document::block_id;
use crate::document::sidecar::{Sidecar, SidecarMark};
use crate::document::tree::{Align, Block, BlockKind, Document, Inline, ListItem, Mark};
use crate::error::Result;
use crate::store::ImageStore;

/// Deserialize Markdown + Sidecar into a document tree.
///
/// Empty input yields a document containing a single empty paragraph.
pub async fn deserialize(
    markdown: &str,
    sidecar: &Sidecar,
    image_store: &ImageStore,
) -> Result<Document> {
    if markdown.trim().is_empty() {
        return Ok(Document::empty());
    }

    let mut blocks = Vec::new();
    for chunk in split_chunks(markdown) {
        blocks.extend(parse_chunk(&chunk, sidecar, image_store).await?);
    }

    if blocks.is_empty() {
        return Ok(Document::empty());
    }

    Ok(Document { blocks })
}

/// Split a full Markdown document into top-level block chunks on blank
/// lines, keeping fenced code blocks intact.
fn split_chunks(markdown: &str) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut current: Vec<&str> = Vec::new();
    let mut in_fence = false;

    for line in markdown.lines() {
        if line.trim_start().starts_with("```") {
            in_fence = !in_fence;
        }

        if line.trim().is_empty() && !in_fence {
            if !current.is_empty() {
                chunks.push(current.join("\n"));
                current.clear();
            }
            continue;
        }

        current.push(line);
    }

    if !current.is_empty() {
        chunks.push(current.join("\n"));
    }

    chunks
}

/// Parse one top-level chunk. Returns more than one `Block` only for a
/// list chunk, which carries one block per item.
async fn parse_chunk(
    chunk: &str,
    sidecar: &Sidecar,
    image_store: &ImageStore,
) -> Result<Vec<Block>> {
    let lines: Vec<&str> = chunk.lines().collect();

    if is_list_chunk(&lines) {
        return Ok(parse_list(&lines, sidecar));
    }

    let (block_id, content_lines) = strip_leading_anchor(&lines);
    let content = content_lines.join("\n");

    let block = parse_single_block(block_id.as_deref(), &content, sidecar, image_store).await?;
    Ok(vec![block])
}

fn is_list_chunk(lines: &[&str]) -> bool {
    for line in lines {
        if block_id::parse_anchor(line).is_some() {
            continue;
        }
        return bullet_marker_len(line).is_some() || ordered_marker_len(line).is_some();
    }
    false
}

fn strip_leading_anchor<'a>(lines: &[&'a str]) -> (Option<String>, Vec<&'a str>) {
    if let Some(first) = lines.first() {
        if let Some(id) = block_id::parse_anchor(first) {
            return (Some(id.to_string()), lines[1..].to_vec());
        }
    }
    (None, lines.to_vec())
}

fn parse_single_block<'a>(
    block_id: Option<&'a str>,
    content: &'a str,
    sidecar: &'a Sidecar,
    image_store: &'a ImageStore,
) -> Pin<Box<dyn Future<Output = Result<Block>> + 'a>> {
    Box::pin(async move {
        let align = block_id.and_then(|id| sidecar.blocks.get(id)).and_then(|fmt| {
            fmt.align.as_deref().and_then(|a| match a {
                "center" => Some(Align::Center),
                "right" => Some(Align::Right),
                _ => None,
            })
        });

        let trimmed = content.trim();

        if trimmed.starts_with("```") {
            let mut lines = content.lines();
            let fence_line = lines.next().unwrap_or("");
            let language = fence_line.trim_start_matches("```").trim();
            let language = if language.is_empty() {
                None
            } else {
                Some(language.to_string())
            };
            let rest: Vec<&str> = lines.collect();
            let code = if rest.last().map(|l| l.trim() == "```").unwrap_or(false) {
                rest[..rest.len() - 1].join("\n")
            } else {
                rest.join("\n")
            };
            return Ok(Block {
                id: block_id.map(String::from),
                align: None,
                kind: BlockKind::CodeBlock { language, code },
            });
        }

        if trimmed == "---" || trimmed == "***" || trimmed == "___" {
            return Ok(Block {
                id: block_id.map(String::from),
                align: None,
                kind: BlockKind::HorizontalRule,
            });
        }

        if let Some(level) = heading_level(trimmed) {
            let text = trimmed[level as usize + 1..].trim_start();
            let inline = parse_inline_with_spans(text, block_id, sidecar);
            return Ok(Block {
                id: block_id.map(String::from),
                align,
                kind: BlockKind::Heading { level, inline },
            });
        }

        if trimmed.starts_with('>') {
            let inner_lines: Vec<String> = content
                .lines()
                .map(|l| l.strip_prefix("> ").or_else(|| l.strip_prefix('>')).unwrap_or(l))
                .map(str::to_string)
                .collect();
            let inner = inner_lines.join("\n");
            let mut children = Vec::new();
            for sub_chunk in split_chunks(&inner) {
                let sub_lines: Vec<&str> = sub_chunk.lines().collect();
                if is_list_chunk(&sub_lines) {
                    children.extend(parse_list(&sub_lines, sidecar));
                    continue;
                }
                let (sub_id, sub_content_lines) = strip_leading_anchor(&sub_lines);
                let sub_content = sub_content_lines.join("\n");
                children.push(
                    parse_single_block(sub_id.as_deref(), &sub_content, sidecar, image_store)
                        .await?,
                );
            }
            return Ok(Block {
                id: block_id.map(String::from),
                align: None,
                kind: BlockKind::Blockquote { children },
            });
        }

        if trimmed.starts_with("![") {
            if let Some((alt, src)) = parse_image_syntax(trimmed) {
                let resolved_src = if src.starts_with("@img:") {
                    image_store.data_url(&src).await?.unwrap_or(src)
                } else {
                    src
                };
                let fmt = block_id.and_then(|id| sidecar.blocks.get(id));
                return Ok(Block {
                    id: block_id.map(String::from),
                    align: None,
                    kind: BlockKind::Image {
                        src: resolved_src,
                        alt: if alt.is_empty() { None } else { Some(alt) },
                        width: fmt.and_then(|f| f.width),
                        height: fmt.and_then(|f| f.height),
                        float: fmt.and_then(|f| f.float.clone()),
                    },
                });
            }
        }

        let inline = parse_inline_with_spans(content, block_id, sidecar);
        Ok(Block {
            id: block_id.map(String::from),
            align,
            kind: BlockKind::Paragraph { inline },
        })
    })
}

fn parse_list(lines: &[&str], sidecar: &Sidecar) -> Vec<Block> {
    let ordered = lines
        .iter()
        .find(|l| block_id::parse_anchor(l).is_none())
        .map(|l| ordered_marker_len(l).is_some())
        .unwrap_or(false);

    let mut items: Vec<ListItem> = Vec::new();
    let mut pending_id: Option<String> = None;

    for line in lines {
        if let Some(id) = block_id::parse_anchor(line) {
            pending_id = Some(id.to_string());
            continue;
        }

        let marker_len = if ordered {
            ordered_marker_len(line)
        } else {
            bullet_marker_len(line)
        };

        if let Some(len) = marker_len {
            let text = &line[len..];
            let item_id = pending_id.take();
            let inline = parse_inline_with_spans(text, item_id.as_deref(), sidecar);
            items.push(ListItem { id: item_id, inline });
        } else if let Some(last) = items.last_mut() {
            last.inline.push(Inline::plain(format!(" {}", line.trim())));
        }
    }

    let kind = if ordered {
        BlockKind::OrderedList { items }
    } else {
        BlockKind::BulletList { items }
    };

    vec![Block {
        id: None,
        align: None,
        kind,
    }]
}

fn bullet_marker_len(line: &str) -> Option<usize> {
    if line.starts_with("- ") {
        Some(2)
    } else {
        None
    }
}

fn ordered_marker_len(line: &str) -> Option<usize> {
    let digits: String = line.chars().take_while(|c| c.is_ascii_digit()).collect();
    if digits.is_empty() {
        return None;
    }
    let rest = &line[digits.len()..];
    if rest.starts_with(". ") {
        Some(digits.len() + 2)
    } else {
        None
    }
}

fn heading_level(trimmed: &str) -> Option<u8> {
    let hashes = trimmed.chars().take_while(|c| *c == '#').count();
    if hashes == 0 || hashes > 6 {
        return None;
    }
    if trimmed.as_bytes().get(hashes) != Some(&b' ') {
        return None;
    }
    Some(hashes as u8)
}

fn parse_image_syntax(text: &str) -> Option<(String, String)> {
    let rest = text.strip_prefix("![")?;
    let (alt, rest) = rest.split_once("](")?;
    let src = rest.strip_suffix(')')?;
    Some((alt.to_string(), src.to_string()))
}

/// Parse native Markdown inline marks, then overlay any Sidecar spans
/// recorded for `block_id` onto the runs whose raw-text range matches.
fn parse_inline_with_spans(text: &str, block_id: Option<&str>, sidecar: &Sidecar) -> Vec<Inline> {
    let tokens = tokenize_inline(text);
    let spans = block_id.and_then(|id| sidecar.spans.get(id));

    tokens
        .into_iter()
        .map(|(mut inline, start, end)| {
            if let Some(spans) = spans {
                for span in spans {
                    if span.start == start && span.end == end {
                        for mark in &span.marks {
                            if let Some(m) = from_sidecar_mark(mark) {
                                if !inline.marks.iter().any(|existing| same_mark_type(existing, &m)) {
                                    inline.marks.push(m);
                                }
                            }
                        }
                    }
                }
            }
            inline
        })
        .collect()
}

fn same_mark_type(a: &Mark, b: &Mark) -> bool {
    std::mem::discriminant(a) == std::mem::discriminant(b)
}

fn from_sidecar_mark(mark: &SidecarMark) -> Option<Mark> {
    Some(match mark {
        SidecarMark::Bold => Mark::Bold,
        SidecarMark::Italic => Mark::Italic,
        SidecarMark::Code => Mark::Code,
        SidecarMark::Underline => Mark::Underline,
        SidecarMark::Strike => Mark::Strike,
        SidecarMark::Highlight { color } => Mark::Highlight { color: color.clone() },
        SidecarMark::TextStyle { color, font_family } => Mark::TextStyle {
            color: color.clone(),
            font_family: font_family.clone(),
        },
        SidecarMark::FontSize { size } => Mark::FontSize { size: size.clone() },
        SidecarMark::Superscript => Mark::Superscript,
        SidecarMark::Subscript => Mark::Subscript,
    })
}

/// Tokenize native Markdown inline syntax plus legacy `<span style="...">`
/// wrappers. Returns each run with its `[start, end)` UTF-16 offset in
/// `text`, measured over the raw (still-marked-up) source - the same
/// coordinate space the serializer used to record Sidecar spans.
fn tokenize_inline(text: &str) -> Vec<(Inline, usize, usize)> {
    let chars: Vec<char> = text.chars().collect();
    let mut utf16_at = Vec::with_capacity(chars.len() + 1);
    let mut acc = 0usize;
    for c in &chars {
        utf16_at.push(acc);
        acc += c.len_utf16();
    }
    utf16_at.push(acc);

    let mut out = Vec::new();
    let mut i = 0usize;
    let mut plain_start = 0usize;

    macro_rules! flush_plain {
        ($end:expr) => {
            if $end > plain_start {
                let s: String = chars[plain_start..$end].iter().collect();
                out.push((Inline::plain(s), utf16_at[plain_start], utf16_at[$end]));
            }
        };
    }

    while i < chars.len() {
        let rest: String = chars[i..].iter().collect();

        if rest.starts_with("***") {
            if let Some(close) = find_closing(&chars, i + 3, "***") {
                flush_plain!(i);
                let inner: String = chars[i + 3..close].iter().collect();
                out.push((
                    Inline {
                        text: inner,
                        marks: vec![Mark::Bold, Mark::Italic],
                    },
                    utf16_at[i],
                    utf16_at[close + 3],
                ));
                i = close + 3;
                plain_start = i;
                continue;
            }
        } else if rest.starts_with("**") {
            if let Some(close) = find_closing(&chars, i + 2, "**") {
                flush_plain!(i);
                let inner: String = chars[i + 2..close].iter().collect();
                out.push((
                    Inline {
                        text: inner,
                        marks: vec![Mark::Bold],
                    },
                    utf16_at[i],
                    utf16_at[close + 2],
                ));
                i = close + 2;
                plain_start = i;
                continue;
            }
        } else if rest.starts_with('`') {
            if let Some(close) = find_closing(&chars, i + 1, "`") {
                flush_plain!(i);
                let inner: String = chars[i + 1..close].iter().collect();
                out.push((
                    Inline {
                        text: inner,
                        marks: vec![Mark::Code],
                    },
                    utf16_at[i],
                    utf16_at[close + 1],
                ));
                i = close + 1;
                plain_start = i;
                continue;
            }
        } else if rest.starts_with('*') {
            if let Some(close) = find_closing(&chars, i + 1, "*") {
                flush_plain!(i);
                let inner: String = chars[i + 1..close].iter().collect();
                out.push((
                    Inline {
                        text: inner,
                        marks: vec![Mark::Italic],
                    },
                    utf16_at[i],
                    utf16_at[close + 1],
                ));
                i = close + 1;
                plain_start = i;
                continue;
            }
        } else if chars[i] == '[' {
            if let Some((inner, href, title, end)) = parse_link(&chars, i) {
                flush_plain!(i);
                out.push((
                    Inline {
                        text: inner,
                        marks: vec![Mark::Link { href, title }],
                    },
                    utf16_at[i],
                    utf16_at[end],
                ));
                i = end;
                plain_start = i;
                continue;
            }
        } else if rest.starts_with("<span") {
            if let Some((inner, style, end)) = parse_legacy_span(&chars, i) {
                flush_plain!(i);
                out.push((
                    Inline {
                        text: inner,
                        marks: marks_from_style(&style),
                    },
                    utf16_at[i],
                    utf16_at[end],
                ));
                i = end;
                plain_start = i;
                continue;
            }
        }

        i += 1;
    }

    flush_plain!(chars.len());
    out
}

fn find_closing(chars: &[char], from: usize, delim: &str) -> Option<usize> {
    let delim_chars: Vec<char> = delim.chars().collect();
    let mut i = from;
    while i + delim_chars.len() <= chars.len() {
        if chars[i..i + delim_chars.len()] == delim_chars[..] {
            return Some(i);
        }
        i += 1;
    }
    None
}

fn parse_link(chars: &[char], start: usize) -> Option<(String, String, Option<String>, usize)> {
    let close_bracket = find_closing(chars, start + 1, "](")?;
    let inner: String = chars[start + 1..close_bracket].iter().collect();
    let paren_start = close_bracket + 2;
    let close_paren = find_closing(chars, paren_start, ")")?;
    let inside: String = chars[paren_start..close_paren].iter().collect();

    let (href, title) = match inside.split_once(" \"") {
        Some((h, t)) => (h.to_string(), Some(t.trim_end_matches('"').to_string())),
        None => (inside, None),
    };

    Some((inner, href, title, close_paren + 1))
}

fn parse_legacy_span(chars: &[char], start: usize) -> Option<(String, String, usize)> {
    let open_end = find_closing(chars, start, ">")? + 1;
    let tag: String = chars[start..open_end].iter().collect();
    let style = tag
        .split("style=\"")
        .nth(1)
        .and_then(|s| s.split('"').next())
        .unwrap_or("")
        .to_string();

    let mut depth = 1usize;
    let mut i = open_end;
    let content_start = open_end;
    while i < chars.len() {
        let rest: String = chars[i..].iter().collect();
        if rest.starts_with("<span") {
            depth += 1;
            i += 5;
            continue;
        }
        if rest.starts_with("</span>") {
            depth -= 1;
            if depth == 0 {
                let inner: String = chars[content_start..i].iter().collect();
                let stripped = strip_tags(&inner);
                return Some((stripped, style, i + "</span>".len()));
            }
            i += 7;
            continue;
        }
        i += 1;
    }
    None
}

fn strip_tags(s: &str) -> String {
    let mut out = String::new();
    let mut in_tag = false;
    for c in s.chars() {
        match c {
            '<' => in_tag = true,
            '>' => in_tag = false,
            _ if !in_tag => out.push(c),
            _ => {}
        }
    }
    out
}

fn marks_from_style(style: &str) -> Vec<Mark> {
    let mut marks = Vec::new();
    let mut color = None;
    let mut font_family = None;

    for decl in style.split(';') {
        let decl = decl.trim();
        let Some((prop, value)) = decl.split_once(':') else {
            continue;
        };
        let prop = prop.trim();
        let value = value.trim().to_string();

        match prop {
            "color" => color = Some(value),
            "font-family" => font_family = Some(value),
            "font-size" => marks.push(Mark::FontSize { size: value }),
            "background-color" => marks.push(Mark::Highlight { color: value }),
            _ => {}
        }
    }

    if color.is_some() || font_family.is_some() {
        marks.push(Mark::TextStyle { color, font_family });
    }

    marks
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::serializer::serialize;
    use crate::document::tree::Inline as InlineNode;
    use crate::traits::MockFileSystem;
    use chrono::DateTime;
    use std::sync::Arc;

    fn image_store() -> ImageStore {
        ImageStore::new(std::path::Path::new("/ws"), Arc::new(MockFileSystem::new()))
    }

    fn now() -> chrono::DateTime<chrono::Utc> {
        DateTime::UNIX_EPOCH
    }

    #[tokio::test]
    async fn empty_input_yields_single_empty_paragraph() {
        let store = image_store();
        let sidecar = Sidecar::empty_default(now());
        let doc = deserialize("", &sidecar, &store).await.unwrap();
        assert_eq!(doc.blocks.len(), 1);
        assert!(matches!(&doc.blocks[0].kind, BlockKind::Paragraph { inline } if inline.is_empty()));
    }

    #[tokio::test]
    async fn round_trip_simple_document() {
        let doc = Document {
            blocks: vec![
                Block {
                    id: None,
                    align: None,
                    kind: BlockKind::Heading {
                        level: 1,
                        inline: vec![InlineNode::plain("My Doc")],
                    },
                },
                Block {
                    id: None,
                    align: None,
                    kind: BlockKind::Paragraph {
                        inline: vec![
                            InlineNode::plain("This is "),
                            InlineNode {
                                text: "bold".into(),
                                marks: vec![Mark::Bold],
                            },
                            InlineNode::plain(" and "),
                            InlineNode {
                                text: "italic".into(),
                                marks: vec![Mark::Italic],
                            },
                            InlineNode::plain(" text."),
                        ],
                    },
                },
            ],
        };

        let store = image_store();
        let (markdown, sidecar) = serialize(&doc, &store, now()).await.unwrap();

        assert!(markdown.contains("# My Doc"));
        assert!(markdown.contains("**bold**"));
        assert!(markdown.contains("*italic*"));
        assert_eq!(markdown.matches("<!-- @mid:").count(), 3);

        let back = deserialize(&markdown, &sidecar, &store).await.unwrap();
        assert_eq!(back.blocks.len(), 2);
        assert!(matches!(&back.blocks[0].kind, BlockKind::Heading { level: 1, .. }));

        if let BlockKind::Paragraph { inline } = &back.blocks[1].kind {
            let joined: String = inline.iter().map(|i| i.text.as_str()).collect();
            assert_eq!(joined, "This is bold and italic text.");
            assert!(inline.iter().any(|i| i.marks.contains(&Mark::Bold)));
            assert!(inline.iter().any(|i| i.marks.contains(&Mark::Italic)));
        } else {
            panic!("expected paragraph");
        }
    }

    #[tokio::test]
    async fn underline_span_round_trips() {
        let doc = Document {
            blocks: vec![Block {
                id: None,
                align: None,
                kind: BlockKind::Paragraph {
                    inline: vec![InlineNode {
                        text: "important".into(),
                        marks: vec![Mark::Underline],
                    }],
                },
            }],
        };
        let store = image_store();
        let (markdown, sidecar) = serialize(&doc, &store, now()).await.unwrap();
        let back = deserialize(&markdown, &sidecar, &store).await.unwrap();

        if let BlockKind::Paragraph { inline } = &back.blocks[0].kind {
            assert!(inline.iter().any(|i| i.marks.contains(&Mark::Underline)));
        } else {
            panic!("expected paragraph");
        }
    }

    #[tokio::test]
    async fn ordered_list_round_trips() {
        let doc = Document {
            blocks: vec![Block {
                id: None,
                align: None,
                kind: BlockKind::OrderedList {
                    items: vec![
                        ListItem {
                            id: None,
                            inline: vec![InlineNode::plain("first")],
                        },
                        ListItem {
                            id: None,
                            inline: vec![InlineNode::plain("second")],
                        },
                    ],
                },
            }],
        };
        let store = image_store();
        let (markdown, sidecar) = serialize(&doc, &store, now()).await.unwrap();
        let back = deserialize(&markdown, &sidecar, &store).await.unwrap();

        if let BlockKind::OrderedList { items } = &back.blocks[0].kind {
            assert_eq!(items.len(), 2);
            assert_eq!(items[0].inline[0].text, "first");
            assert_eq!(items[1].inline[0].text, "second");
        } else {
            panic!("expected ordered list");
        }
    }

    #[tokio::test]
    async fn code_block_round_trips_with_language() {
        let doc = Document {
            blocks: vec![Block {
                id: None,
                align: None,
                kind: BlockKind::CodeBlock {
                    language: Some("rust".into()),
                    code: "fn main() {}".into(),
                },
            }],
        };
        let store = image_store();
        let (markdown, sidecar) = serialize(&doc, &store, now()).await.unwrap();
        let back = deserialize(&markdown, &sidecar, &store).await.unwrap();

        if let BlockKind::CodeBlock { language, code } = &back.blocks[0].kind {
            assert_eq!(language.as_deref(), Some("rust"));
            assert_eq!(code, "fn main() {}");
        } else {
            panic!("expected code block");
        }
    }

    #[tokio::test]
    async fn blockquote_round_trips() {
        let doc = Document {
            blocks: vec![Block {
                id: None,
                align: None,
                kind: BlockKind::Blockquote {
                    children: vec![Block {
                        id: None,
                        align: None,
                        kind: BlockKind::Paragraph {
                            inline: vec![InlineNode::plain("quoted")],
                        },
                    }],
                },
            }],
        };
        let store = image_store();
        let (markdown, sidecar) = serialize(&doc, &store, now()).await.unwrap();
        let back = deserialize(&markdown, &sidecar, &store).await.unwrap();

        if let BlockKind::Blockquote { children } = &back.blocks[0].kind {
            assert_eq!(children.len(), 1);
        } else {
            panic!("expected blockquote");
        }
    }

    #[tokio::test]
    async fn legacy_span_highlight_is_parsed() {
        let sidecar = Sidecar::empty_default(now());
        let store = image_store();
        let markdown = "<!-- @mid:p-abc123 -->\nsome <span style=\"background-color: yellow\">highlighted</span> text";
        let doc = deserialize(markdown, &sidecar, &store).await.unwrap();

        if let BlockKind::Paragraph { inline } = &doc.blocks[0].kind {
            assert!(inline
                .iter()
                .any(|i| i.text == "highlighted" && i.marks.iter().any(|m| matches!(m, Mark::Highlight { .. }))));
        } else {
            panic!("expected paragraph");
        }
    }
}
