pub mod cache;
pub mod parser;
pub mod source;

pub use cache::{CacheError, CacheOptions, CacheService, CacheStats, RedisCache, SharedCache};
pub use parser::MarkdownParser;
pub use source::LocalListingSource;
