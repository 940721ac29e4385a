//! Document tree -> (Markdown, Sidecar).

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;

use chrono::{DateTime, Utc};

use crate::document::block_id::{self, BlockIdKind};
use crate::document::sidecar::{BlockFormatting, Sidecar, SidecarMark, SpanRecord};
use crate::document::tree::{Align, Block, BlockKind, Document, Inline, Mark};
use crate::error::Result;
use crate::store::ImageStore;

/// Serialize a document tree into its Markdown text and Sidecar.
///
/// An empty document serializes to the empty string with a default
/// Sidecar.
pub async fn serialize(
    doc: &Document,
    image_store: &ImageStore,
    now: DateTime<Utc>,
) -> Result<(String, Sidecar)> {
    if doc.is_empty() {
        return Ok((String::new(), Sidecar::empty_default(now)));
    }

    let mut sidecar = Sidecar::empty_default(now);
    let mut first_heading_text: Option<String> = None;

    let mut pieces = Vec::with_capacity(doc.blocks.len());
    for block in &doc.blocks {
        if first_heading_text.is_none() {
            if let BlockKind::Heading { inline, .. } = &block.kind {
                first_heading_text = Some(plain_text(inline));
            }
        }
        pieces.push(serialize_block(block, &mut sidecar, image_store).await?);
    }

    let markdown = pieces.join("\n\n");

    let word_count = count_words(&strip_anchors(&markdown));
    sidecar.meta.word_count = word_count;
    sidecar.meta.reading_time = ((word_count as f64) / 200.0).ceil() as usize;
    sidecar.meta.title = first_heading_text;

    Ok((markdown, sidecar))
}

fn serialize_block<'a>(
    block: &'a Block,
    sidecar: &'a mut Sidecar,
    image_store: &'a ImageStore,
) -> Pin<Box<dyn Future<Output = Result<String>> + 'a>> {
    Box::pin(async move {
        match &block.kind {
            BlockKind::Paragraph { inline } => {
                let id = block_id::generate(BlockIdKind::Paragraph);
                let (text, spans) = render_inline(inline);
                store_spans(sidecar, &id, spans);
                store_align(sidecar, &id, block.align);
                Ok(format!("{}\n{}", block_id::anchor_line(&id), text))
            }
            BlockKind::Heading { level, inline } => {
                let id = block_id::generate(BlockIdKind::Heading);
                let (text, spans) = render_inline(inline);
                store_spans(sidecar, &id, spans);
                store_align(sidecar, &id, block.align);
                let hashes = "#".repeat((*level).clamp(1, 6) as usize);
                Ok(format!("{}\n{} {}", block_id::anchor_line(&id), hashes, text))
            }
            BlockKind::BulletList { items } => serialize_list(items, false, sidecar),
            BlockKind::OrderedList { items } => serialize_list(items, true, sidecar),
            BlockKind::Blockquote { children } => {
                let id = block_id::generate(BlockIdKind::Blockquote);
                let mut inner_pieces = Vec::with_capacity(children.len());
                for child in children {
                    inner_pieces.push(serialize_block(child, sidecar, image_store).await?);
                }
                let inner = inner_pieces.join("\n\n");
                let quoted: Vec<String> = inner
                    .lines()
                    .filter(|line| block_id::parse_anchor(line).is_none())
                    .map(|line| format!("> {line}"))
                    .collect();
                Ok(format!("{}\n{}", block_id::anchor_line(&id), quoted.join("\n")))
            }
            BlockKind::CodeBlock { language, code } => {
                let id = block_id::generate(BlockIdKind::Code);
                let lang = language.clone().unwrap_or_default();
                Ok(format!(
                    "{}\n```{}\n{}\n```",
                    block_id::anchor_line(&id),
                    lang,
                    code
                ))
            }
            BlockKind::HorizontalRule => {
                let id = block_id::generate(BlockIdKind::Blockquote);
                Ok(format!("{}\n---", block_id::anchor_line(&id)))
            }
            BlockKind::Image {
                src,
                alt,
                width,
                height,
                float,
            } => {
                let id = block_id::generate(BlockIdKind::Image);
                let final_src = if let Some(data_url) = src.strip_prefix("data:").map(|_| src.as_str()) {
                    let stored = image_store.store_data_url(data_url, None).await?;
                    sidecar.images.insert(stored.image_ref.clone(), stored.info);
                    stored.image_ref
                } else {
                    src.clone()
                };

                if width.is_some() || height.is_some() || float.is_some() {
                    sidecar.blocks.insert(
                        id.clone(),
                        BlockFormatting {
                            align: None,
                            width: *width,
                            height: *height,
                            float: float.clone(),
                        },
                    );
                }

                Ok(format!(
                    "{}\n![{}]({})",
                    block_id::anchor_line(&id),
                    alt.clone().unwrap_or_default(),
                    final_src
                ))
            }
        }
    })
}

fn serialize_list(
    items: &[crate::document::tree::ListItem],
    ordered: bool,
    sidecar: &mut Sidecar,
) -> Result<String> {
    let mut lines = Vec::with_capacity(items.len());
    for (i, item) in items.iter().enumerate() {
        let id = block_id::generate(BlockIdKind::List);
        let (text, spans) = render_inline(&item.inline);
        store_spans(sidecar, &id, spans);

        let marker = if ordered {
            format!("{}.", i + 1)
        } else {
            "-".to_string()
        };
        lines.push(format!("{}\n{} {}", block_id::anchor_line(&id), marker, text));
    }
    Ok(lines.join("\n"))
}

fn store_spans(sidecar: &mut Sidecar, id: &str, spans: Vec<SpanRecord>) {
    if !spans.is_empty() {
        sidecar.spans.insert(id.to_string(), spans);
    }
}

fn store_align(sidecar: &mut Sidecar, id: &str, align: Option<Align>) {
    match align {
        None | Some(Align::Left) => {}
        Some(other) => {
            let align_str = match other {
                Align::Center => "center",
                Align::Right => "right",
                Align::Left => unreachable!(),
            };
            sidecar
                .blocks
                .entry(id.to_string())
                .or_default()
                .align = Some(align_str.to_string());
        }
    }
}

/// Render a run of inline nodes to Markdown text, returning the rendered
/// text and the Sidecar span records for marks Markdown can't carry.
fn render_inline(inline: &[Inline]) -> (String, Vec<SpanRecord>) {
    let mut out = String::new();
    let mut spans = Vec::new();

    for run in inline {
        let native: Vec<&Mark> = run.marks.iter().filter(|m| m.is_markdown_native()).collect();
        let rendered = render_native(&run.text, &native);

        let start = utf16_len(&out);
        out.push_str(&rendered);
        let end = utf16_len(&out);

        let has_non_native = run.marks.iter().any(|m| !m.is_markdown_native());
        if has_non_native {
            let marks: Vec<SidecarMark> = run.marks.iter().filter_map(to_sidecar_mark).collect();
            spans.push(SpanRecord { start, end, marks });
        }
    }

    (out, spans)
}

fn render_native(text: &str, marks: &[&Mark]) -> String {
    if marks.iter().any(|m| matches!(m, Mark::Code)) {
        return format!("`{text}`");
    }

    let bold = marks.iter().any(|m| matches!(m, Mark::Bold));
    let italic = marks.iter().any(|m| matches!(m, Mark::Italic));

    let mut rendered = if bold && italic {
        format!("***{text}***")
    } else if bold {
        format!("**{text}**")
    } else if italic {
        format!("*{text}*")
    } else {
        text.to_string()
    };

    if let Some(Mark::Link { href, title }) = marks.iter().find(|m| matches!(m, Mark::Link { .. })) {
        rendered = match title {
            Some(t) => format!("[{rendered}]({href} \"{t}\")"),
            None => format!("[{rendered}]({href})"),
        };
    }

    rendered
}

fn to_sidecar_mark(mark: &Mark) -> Option<SidecarMark> {
    Some(match mark {
        Mark::Bold => SidecarMark::Bold,
        Mark::Italic => SidecarMark::Italic,
        Mark::Code => SidecarMark::Code,
        Mark::Underline => SidecarMark::Underline,
        Mark::Strike => SidecarMark::Strike,
        Mark::Highlight { color } => SidecarMark::Highlight { color: color.clone() },
        Mark::TextStyle { color, font_family } => SidecarMark::TextStyle {
            color: color.clone(),
            font_family: font_family.clone(),
        },
        Mark::FontSize { size } => SidecarMark::FontSize { size: size.clone() },
        Mark::Superscript => SidecarMark::Superscript,
        Mark::Subscript => SidecarMark::Subscript,
        Mark::Link { .. } => return None,
    })
}

fn plain_text(inline: &[Inline]) -> String {
    inline.iter().map(|run| run.text.as_str()).collect()
}

fn utf16_len(s: &str) -> usize {
    s.encode_utf16().count()
}

fn strip_anchors(markdown: &str) -> String {
    markdown
        .lines()
        .filter(|line| block_id::parse_anchor(line).is_none())
        .collect::<Vec<_>>()
        .join("\n")
}

fn count_words(text: &str) -> usize {
    text.split_whitespace().count()
}

/// Used by the Workspace Coordinator's in-memory `HashMap<String,
/// BlockFormatting>` lookups when merging serialized output with a
/// previously loaded Sidecar's user-owned `meta` fields.
pub fn merge_preserving_user_meta(mut new_sidecar: Sidecar, previous: Option<&Sidecar>) -> Sidecar {
    if let Some(previous) = previous {
        new_sidecar.meta.title = new_sidecar.meta.title.or_else(|| previous.meta.title.clone());
        new_sidecar.meta.tags = previous.meta.tags.clone();
        new_sidecar.meta.created = previous.meta.created;
    }
    new_sidecar
}
