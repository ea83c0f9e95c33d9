pub mod content;

pub use content::{
    ContentOptions, RouteResolver,
    TreeMaterializer, MaterializeError,
    ContentRepository, RefreshOutcome, RepositoryError, SnapshotState,
    ContentQueryService, CachedContentQueryService, QueryEngine,
};
