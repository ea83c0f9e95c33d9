pub mod local;

pub use local::LocalListingSource;

use sha2::{Digest, Sha256};

/// 内容寻址的版本标记：内容的SHA-256十六进制摘要
pub fn content_version(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}
