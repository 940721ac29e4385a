//! Content-addressable storage: blobs (`ObjectStore`) and images (`ImageStore`).

pub mod image_store;
pub mod object_store;

pub use image_store::{ImageInfo, ImageStore, StoredImage};
pub use object_store::ObjectStore;
