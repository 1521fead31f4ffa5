pub mod local;

pub use local::{LocalIndexStore, DEFAULT_INDEX_DIR};
