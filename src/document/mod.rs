//! The document tree, its Sidecar companion, and the Serializer /
//! Deserializer that translate between them and Markdown.

pub mod block_id;
pub mod deserializer;
pub mod serializer;
pub mod sidecar;
pub mod tree;

pub use block_id::{BlockIdKind, anchor_line, generate as generate_block_id, parse_anchor};
pub use deserializer::deserialize;
pub use serializer::serialize;
pub use sidecar::{BlockFormatting, Sidecar, SidecarMark, SidecarMeta, SpanRecord};
pub use tree::{Align, Block, BlockKind, Document, Inline, ListItem, Mark};
