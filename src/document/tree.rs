//! The rich-text document tree produced and consumed by the editor.
//!
//! This is the in-memory shape the Serializer turns into
//! `(Markdown, Sidecar)` and the Deserializer rebuilds from that pair. The
//! editor itself is out of scope; this module only defines the wire shape
//! both sides agree on.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Align {
    Left,
    Center,
    Right,
}

/// A single document, a flat top-level sequence of blocks.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Document {
    pub blocks: Vec<Block>,
}

impl Document {
    pub fn empty() -> Self {
        Self {
            blocks: vec![Block {
                id: None,
                align: None,
                kind: BlockKind::Paragraph { inline: Vec::new() },
            }],
        }
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
            || (self.blocks.len() == 1
                && matches!(
                    &self.blocks[0].kind,
                    BlockKind::Paragraph { inline } if inline.is_empty()
                ))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Block {
    /// Assigned during serialization; a tree fresh from the editor may
    /// have no id yet.
    pub id: Option<String>,
    pub align: Option<Align>,
    pub kind: BlockKind,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum BlockKind {
    Paragraph { inline: Vec<Inline> },
    Heading { level: u8, inline: Vec<Inline> },
    BulletList { items: Vec<ListItem> },
    OrderedList { items: Vec<ListItem> },
    Blockquote { children: Vec<Block> },
    CodeBlock { language: Option<String>, code: String },
    HorizontalRule,
    Image {
        src: String,
        alt: Option<String>,
        width: Option<u32>,
        height: Option<u32>,
        float: Option<String>,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ListItem {
    pub id: Option<String>,
    pub inline: Vec<Inline>,
}

/// A run of text sharing the exact same set of marks.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Inline {
    pub text: String,
    pub marks: Vec<Mark>,
}

impl Inline {
    pub fn plain(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            marks: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Mark {
    Bold,
    Italic,
    Code,
    Link { href: String, title: Option<String> },
    Underline,
    Strike,
    Highlight { color: String },
    TextStyle { color: Option<String>, font_family: Option<String> },
    FontSize { size: String },
    Superscript,
    Subscript,
}

impl Mark {
    /// Marks that map directly onto native Markdown syntax. Everything
    /// else is carried as a Sidecar span.
    pub fn is_markdown_native(&self) -> bool {
        matches!(self, Mark::Bold | Mark::Italic | Mark::Code | Mark::Link { .. })
    }
}
