use chrono::Utc;
use futures_util::future::join_all;
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use verso_api::{
    ContentStatus, DocumentParser, FileHistory, FrontMatter, ListingEntry, ListingSource,
    ParsedDocument, SourceError,
};
use verso_domain::content::{parent_path, unique_labels};
use verso_domain::{stable_id, ContentItem, DirectoryItem, DomainError, Snapshot, SnapshotBuilder};

use super::locale::{file_stem, RouteResolver};
use super::options::ContentOptions;

/// 由目录元数据文件覆盖、不进入元数据表的键（含别名）
const SIDECAR_FIELDS: &[&str] = &[
    "title",
    "description",
    "order",
    "weight",
    "sort_order",
    "sortOrder",
    "locale",
    "lang",
    "language",
    "url",
    "permalink",
];

/// 物化错误，只有整次构建失败才会返回
#[derive(Error, Debug)]
pub enum MaterializeError {
    #[error("Content root {path} is unavailable: {source}")]
    RootUnavailable {
        path: String,
        #[source]
        source: SourceError,
    },

    #[error("Materialization cancelled")]
    Cancelled,

    #[error("Invalid content graph: {0}")]
    Graph(#[from] DomainError),

    #[error("Invalid routing pattern: {0}")]
    Pattern(#[from] regex::Error),
}

/// 一个目录的列表结果
struct Listing {
    path: String,
    entries: Vec<ListingEntry>,
}

/// TreeMaterializer 将扁平列表构建为目录/内容图
///
/// 目录按波次并发列出（并发数受 `max_concurrency` 限制），
/// 之后按深度优先前序重建顺序，所以相同的列表总是得到相同的输出。
pub struct TreeMaterializer {
    source: Arc<dyn ListingSource>,
    parser: Arc<dyn DocumentParser>,
    options: ContentOptions,
    routes: RouteResolver,
}

impl TreeMaterializer {
    pub fn new(
        source: Arc<dyn ListingSource>,
        parser: Arc<dyn DocumentParser>,
        options: ContentOptions,
    ) -> Result<Self, MaterializeError> {
        let routes = RouteResolver::new(&options)?;
        Ok(Self {
            source,
            parser,
            options,
            routes,
        })
    }

    pub fn options(&self) -> &ContentOptions {
        &self.options
    }

    pub fn routes(&self) -> &RouteResolver {
        &self.routes
    }

    pub fn provider_id(&self) -> &str {
        self.source.provider_id()
    }

    /// 完整构建一次快照
    pub async fn build(&self, token: &CancellationToken) -> Result<Snapshot, MaterializeError> {
        if token.is_cancelled() {
            return Err(MaterializeError::Cancelled);
        }
        let started = Instant::now();

        let listings = self.traverse(token).await?;
        let mut builder = SnapshotBuilder::new();

        for listing in &listings {
            let dir = self.directory_for(&listing.path);
            let id = dir.id.clone();
            builder.add_directory(dir);
            if listing.path == self.options.root() {
                continue;
            }
            let parent_id = builder
                .directory_id_for_path(parent_path(&listing.path))
                .map(str::to_string);
            if let Some(parent_id) = parent_id {
                builder.attach_directory(&parent_id, &id)?;
            }
        }

        // 目录元数据
        let sidecars: Vec<(String, String)> = listings
            .iter()
            .filter_map(|listing| {
                listing
                    .entries
                    .iter()
                    .find(|e| !e.is_dir() && self.options.is_index_file(&e.name))
                    .map(|e| (listing.path.clone(), e.path.clone()))
            })
            .collect();
        let loaded = self
            .run_chunked(token, sidecars, |(dir_path, file_path)| async move {
                let doc = self.load_sidecar(&file_path).await;
                (dir_path, doc)
            })
            .await?;
        for (dir_path, doc) in loaded {
            let Some(doc) = doc else {
                continue;
            };
            let dir_id = stable_id(&dir_path);
            if let Some(dir) = builder.directory_mut(&dir_id) {
                merge_sidecar(dir, doc);
            }
        }

        // 内容条目
        let mut seen = HashSet::new();
        let files: Vec<(String, ListingEntry)> = listings
            .iter()
            .flat_map(|listing| {
                listing
                    .entries
                    .iter()
                    .filter(|e| !e.is_dir() && self.options.accepts_file(&e.name))
                    .map(|e| (listing.path.clone(), e.clone()))
            })
            .filter(|(_, entry)| seen.insert(entry.path.clone()))
            .collect();
        let items = self
            .run_chunked(token, files, |(dir_path, entry)| async move {
                (dir_path, self.load_item(&entry).await)
            })
            .await?;

        for (dir_path, item) in items {
            let Some(item) = item else {
                continue;
            };
            let item_id = item.id.clone();
            builder.add_item(item);
            let dir_id = builder.directory_id_for_path(&dir_path).map(str::to_string);
            if let Some(dir_id) = dir_id {
                builder.link_item(&item_id, &dir_id)?;
            }
        }

        let snapshot = builder.build(
            self.source.provider_id(),
            &self.options.default_locale,
            &self.options.supported_locales,
        );
        info!(
            "Materialized {} directories and {} content items from {} in {:?}",
            snapshot.directories().len(),
            snapshot.items().len(),
            self.source.provider_id(),
            started.elapsed()
        );
        Ok(snapshot)
    }

    /// 列出所有目录，返回深度优先前序的列表结果
    async fn traverse(&self, token: &CancellationToken) -> Result<Vec<Listing>, MaterializeError> {
        let root = self.options.root().to_string();
        let root_entries = tokio::select! {
            _ = token.cancelled() => return Err(MaterializeError::Cancelled),
            result = self.source.list(&root) => result.map_err(|source| MaterializeError::RootUnavailable {
                path: root.clone(),
                source,
            })?,
        };

        let mut seen: HashSet<String> = HashSet::from([root.clone()]);
        let mut listed: HashMap<String, Vec<ListingEntry>> = HashMap::new();
        let mut pending = self.subdirectories(&root_entries, &mut seen);
        listed.insert(root.clone(), root_entries);

        while !pending.is_empty() {
            let wave = std::mem::take(&mut pending);
            debug!("Listing {} directories", wave.len());
            let results = self
                .run_chunked(token, wave, |path| async move {
                    let result = self.source.list(&path).await;
                    (path, result)
                })
                .await?;

            for (path, result) in results {
                match result {
                    Ok(entries) => {
                        pending.extend(self.subdirectories(&entries, &mut seen));
                        listed.insert(path, entries);
                    }
                    Err(e) => warn!("Skipping subtree {}: listing failed: {}", path, e),
                }
            }
        }

        let mut ordered = Vec::with_capacity(listed.len());
        let mut stack = vec![root];
        while let Some(path) = stack.pop() {
            let Some(entries) = listed.remove(&path) else {
                continue;
            };
            let children: Vec<String> = entries
                .iter()
                .filter(|e| e.is_dir())
                .map(|e| e.path.trim_matches('/').to_string())
                .collect();
            stack.extend(children.into_iter().rev());
            ordered.push(Listing { path, entries });
        }
        Ok(ordered)
    }

    fn subdirectories(&self, entries: &[ListingEntry], seen: &mut HashSet<String>) -> Vec<String> {
        if !self.options.include_subdirectories {
            return Vec::new();
        }
        entries
            .iter()
            .filter(|e| e.is_dir())
            .map(|e| e.path.trim_matches('/').to_string())
            .filter(|path| seen.insert(path.clone()))
            .collect()
    }

    /// 按 `max_concurrency` 分块并发执行，结果保持输入顺序
    async fn run_chunked<I, T, F, Fut>(
        &self,
        token: &CancellationToken,
        inputs: Vec<I>,
        task: F,
    ) -> Result<Vec<T>, MaterializeError>
    where
        F: Fn(I) -> Fut,
        Fut: Future<Output = T>,
    {
        let mut results = Vec::with_capacity(inputs.len());
        let mut inputs = inputs.into_iter();
        loop {
            if token.is_cancelled() {
                return Err(MaterializeError::Cancelled);
            }
            let chunk: Vec<I> = inputs.by_ref().take(self.options.concurrency()).collect();
            if chunk.is_empty() {
                break;
            }
            let batch = join_all(chunk.into_iter().map(&task));
            tokio::select! {
                _ = token.cancelled() => return Err(MaterializeError::Cancelled),
                done = batch => results.extend(done),
            }
        }
        Ok(results)
    }

    fn directory_for(&self, path: &str) -> DirectoryItem {
        let relative = self.options.relative_path(path);
        let (locale, _) = self.routes.split(relative, false);
        let name = match path.rsplit('/').next() {
            Some(name) if !name.is_empty() => name,
            _ => "root",
        };
        DirectoryItem::new(stable_id(path), path, name, locale).with_url(relative)
    }

    async fn load_sidecar(&self, path: &str) -> Option<ParsedDocument> {
        let file = match self.source.read_file(path).await {
            Ok(file) => file,
            Err(SourceError::NotFound(_)) => return None,
            Err(e) => {
                warn!("Ignoring directory metadata {}: {}", path, e);
                return None;
            }
        };
        match self.parser.extract(&file.text()) {
            Ok(doc) => Some(doc),
            Err(e) => {
                warn!("Ignoring malformed directory metadata {}: {}", path, e);
                None
            }
        }
    }

    async fn load_item(&self, entry: &ListingEntry) -> Option<ContentItem> {
        let file = match self.source.read_file(&entry.path).await {
            Ok(file) => file,
            Err(e) => {
                warn!("Skipping {}: read failed: {}", entry.path, e);
                return None;
            }
        };
        let text = file.text();
        let doc = match self.parser.extract(&text) {
            Ok(doc) => doc,
            Err(e) => {
                warn!("Skipping {}: {}", entry.path, e);
                return None;
            }
        };
        let history = match self.source.history(&entry.path).await {
            Ok(history) => history,
            Err(e) => {
                warn!(
                    "History unavailable for {} ({}); using current time, original timestamps are lost",
                    entry.path, e
                );
                FileHistory {
                    created_at: Utc::now(),
                    modified_at: None,
                }
            }
        };
        let version = file.version.or_else(|| entry.version.clone());
        Some(self.build_item(entry, text, version, doc, history))
    }

    fn build_item(
        &self,
        entry: &ListingEntry,
        source_text: String,
        version: Option<String>,
        doc: ParsedDocument,
        history: FileHistory,
    ) -> ContentItem {
        let ParsedDocument {
            front_matter: fm,
            body,
            ..
        } = doc;

        let id = stable_id(&entry.path);
        let relative = self.options.relative_path(&entry.path);
        let (path_locale, _) = self.routes.split(relative, true);
        let locale = non_empty(fm.locale.as_deref()).unwrap_or(path_locale);

        let stem = file_stem(&entry.name);
        let title = non_empty(fm.title.as_deref()).unwrap_or_else(|| stem.to_string());
        let slug = non_empty(fm.slug.as_deref()).unwrap_or_else(|| {
            [self.routes.slugify(&title), self.routes.slugify(stem)]
                .into_iter()
                .find(|s| !s.is_empty())
                .unwrap_or_else(|| id.clone())
        });
        let url = non_empty(fm.url.as_deref().map(|u| u.trim_matches('/')))
            .unwrap_or_else(|| self.routes.item_url(relative, &slug));
        let content_id = non_empty(fm.content_id.as_deref()).unwrap_or_else(|| {
            if self.options.enable_localization {
                self.routes.grouping_id(relative)
            } else {
                id.clone()
            }
        });

        ContentItem {
            title,
            author: fm.author.clone(),
            description: fm.description.clone(),
            created_at: fm.created().unwrap_or(history.created_at),
            modified_at: fm.last_modified().or(history.modified_at),
            body: self.parser.render(&body),
            source: source_text,
            locale,
            content_id,
            slug,
            url,
            path: entry.path.trim_matches('/').to_string(),
            tags: unique_labels(&fm.tags),
            categories: unique_labels(&fm.categories),
            featured: fm.featured.unwrap_or(false),
            status: status_of(&entry.path, &fm),
            metadata: fm.extra,
            directory_id: None,
            provider_id: self.source.provider_id().to_string(),
            version,
            id,
        }
    }
}

fn non_empty(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

/// `draft: true` 优先于 `status`
fn status_of(path: &str, fm: &FrontMatter) -> ContentStatus {
    if fm.draft == Some(true) {
        return ContentStatus::Draft;
    }
    match fm.status.as_deref() {
        None => ContentStatus::Published,
        Some(raw) => raw.parse().unwrap_or_else(|_| {
            warn!("Unknown status {:?} in {}, treating as published", raw, path);
            ContentStatus::Published
        }),
    }
}

fn merge_sidecar(dir: &mut DirectoryItem, doc: ParsedDocument) {
    let ParsedDocument {
        front_matter,
        fields,
        ..
    } = doc;
    if let Some(title) = non_empty(front_matter.title.as_deref()) {
        dir.name = title;
    }
    if let Some(description) = non_empty(front_matter.description.as_deref()) {
        dir.description = Some(description);
    }
    if let Some(order) = front_matter.order {
        dir.sort_order = order;
    }
    if let Some(locale) = non_empty(front_matter.locale.as_deref()) {
        dir.locale = locale;
    }
    if let Some(url) = non_empty(front_matter.url.as_deref().map(|u| u.trim_matches('/'))) {
        dir.url = url;
    }

    for (key, value) in fields {
        if SIDECAR_FIELDS.contains(&key.as_str()) || is_blank(&value) {
            continue;
        }
        dir.metadata.insert(key, value);
    }
}

fn is_blank(value: &serde_json::Value) -> bool {
    match value {
        serde_json::Value::Null => true,
        serde_json::Value::Array(values) => values.is_empty(),
        _ => false,
    }
}
