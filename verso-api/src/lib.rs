pub mod source;
pub mod document;
pub mod query;

pub use source::{EntryKind, FileContent, FileHistory, ListingEntry, ListingSource, SourceError};
pub use document::{DocumentParser, FrontMatter, ParseError, ParsedDocument};
pub use query::{ContentQuery, ContentStatus, ListResult, SortDirection, SortField, QUERY_CACHE_PREFIX};
