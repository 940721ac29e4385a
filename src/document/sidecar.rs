//! The Sidecar: a JSON document carrying everything the Markdown side of
//! a saved document cannot represent without losing fidelity.

use crate::store::ImageInfo;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SidecarMeta {
    pub title: Option<String>,
    pub created: chrono::DateTime<chrono::Utc>,
    pub modified: chrono::DateTime<chrono::Utc>,
    #[serde(rename = "wordCount")]
    pub word_count: usize,
    #[serde(rename = "readingTime")]
    pub reading_time: usize,
    #[serde(default)]
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct BlockFormatting {
    pub align: Option<String>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub float: Option<String>,
}

/// Marks that cannot be represented in native Markdown syntax and are
/// instead recorded as `[start, end)` UTF-16 spans over a block's text.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum SidecarMark {
    Bold,
    Italic,
    Code,
    Underline,
    Strike,
    Highlight { color: String },
    TextStyle { color: Option<String>, font_family: Option<String> },
    FontSize { size: String },
    Superscript,
    Subscript,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SpanRecord {
    pub start: usize,
    pub end: usize,
    pub marks: Vec<SidecarMark>,
}

/// Current on-disk Sidecar envelope version.
pub const SIDECAR_VERSION: u32 = 1;

fn default_sidecar_version() -> u32 {
    SIDECAR_VERSION
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Sidecar {
    #[serde(default = "default_sidecar_version")]
    pub version: u32,
    pub meta: SidecarMeta,
    #[serde(default)]
    pub blocks: HashMap<String, BlockFormatting>,
    #[serde(default)]
    pub spans: HashMap<String, Vec<SpanRecord>>,
    #[serde(default)]
    pub images: HashMap<String, ImageInfo>,
}

impl Default for Sidecar {
    fn default() -> Self {
        Self {
            version: SIDECAR_VERSION,
            meta: SidecarMeta::default(),
            blocks: HashMap::new(),
            spans: HashMap::new(),
            images: HashMap::new(),
        }
    }
}

impl Default for SidecarMeta {
    fn default() -> Self {
        let epoch = chrono::DateTime::UNIX_EPOCH;
        Self {
            title: None,
            created: epoch,
            modified: epoch,
            word_count: 0,
            reading_time: 0,
            tags: Vec::new(),
        }
    }
}

impl Sidecar {
    pub fn empty_default(now: chrono::DateTime<chrono::Utc>) -> Self {
        Self {
            meta: SidecarMeta {
                created: now,
                modified: now,
                ..SidecarMeta::default()
            },
            ..Default::default()
        }
    }
}
