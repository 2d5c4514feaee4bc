//! Content-addressed dataset storage with sidecar metadata and a
//! friendly-name index.

pub mod store;

pub use store::{guess_mime_type, DatasetStore, FileMetadata, Upload, DATA_DIR_NAME};
