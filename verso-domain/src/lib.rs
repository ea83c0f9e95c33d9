pub mod content;

pub use content::{
    stable_id,
    ContentItem, DirectoryItem,
    Snapshot, SnapshotBuilder, LocalizationInfo,
    DomainError,
};
