pub mod options;
pub mod locale;
pub mod materializer;
pub mod repository;
pub mod query_engine;


pub use options::ContentOptions;
pub use locale::RouteResolver;
pub use materializer::{MaterializeError, TreeMaterializer};
pub use repository::{ContentRepository, RefreshOutcome, RepositoryError, SnapshotState, SNAPSHOT_CACHE_KEY};
pub use query_engine::{CachedContentQueryService, ContentQueryService, QueryEngine};
