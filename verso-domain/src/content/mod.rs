pub mod item;
pub mod directory;
pub mod snapshot;

pub use item::{eq_ignore_case, parent_path, unique_labels, ContentItem};
pub use directory::DirectoryItem;
pub use snapshot::{DomainError, LocalizationInfo, Snapshot, SnapshotBuilder};

use sha2::{Digest, Sha256};

/// 由路径派生稳定ID
///
/// 取规范化路径（去除首尾 `/`）SHA-256 的前16个十六进制字符。
pub fn stable_id(path: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(path.trim_matches('/').as_bytes());
    let digest = hasher.finalize();
    hex::encode(&digest[..8])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stable_id_depends_only_on_path() {
        let a = stable_id("content/en/blog/post.md");
        assert_eq!(a.len(), 16);
        assert_eq!(a, stable_id("/content/en/blog/post.md/"));
        assert_ne!(a, stable_id("content/fr/blog/post.md"));
    }
}
