// Adapters layer: concrete implementations of the domain ports (filesystem storage, publishing)

pub mod storage;

pub use storage::{DirectoryPublisher, LocalStorage, ARCHIVE_NAME};
