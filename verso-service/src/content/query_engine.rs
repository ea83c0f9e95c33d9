use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};
use verso_api::{ContentQuery, ListResult, SortDirection, SortField};
use verso_domain::content::eq_ignore_case;
use verso_domain::{ContentItem, Snapshot};
use verso_infra::cache::CacheService;

use super::repository::{ContentRepository, RepositoryError};

/// QueryEngine 在快照上执行过滤、排序与分页
///
/// 过滤条件全部是合取关系，并且都忽略大小写，因此查询缓存键可以统一转小写。
pub struct QueryEngine;

impl QueryEngine {
    pub fn execute(snapshot: &Snapshot, query: &ContentQuery) -> ListResult<ContentItem> {
        if query.is_contradictory() {
            return ListResult::empty(query.skip, query.take);
        }

        let terms = search_terms(query);
        let mut matched: Vec<&ContentItem> = snapshot
            .items()
            .iter()
            .filter(|item| Self::matches(item, query, &terms))
            .collect();

        Self::sort(&mut matched, query.sort_by, query.sort_direction);

        let total = matched.len() as u64;
        let page = matched
            .into_iter()
            .skip(query.skip)
            .take(query.take.unwrap_or(usize::MAX))
            .cloned()
            .collect();
        ListResult::new(page, total, query.skip, query.take)
    }

    /// 按固定顺序检查过滤条件
    pub fn matches(item: &ContentItem, query: &ContentQuery, terms: &[String]) -> bool {
        if let Some(directory) = &query.directory {
            if !eq_ignore_case(item.parent_path(), directory.trim_matches('/')) {
                return false;
            }
        }
        if let Some(directory_id) = &query.directory_id {
            match &item.directory_id {
                Some(id) if eq_ignore_case(id, directory_id) => {}
                _ => return false,
            }
        }
        if !query.required_categories().iter().all(|c| item.has_category(c)) {
            return false;
        }
        if !query.required_tags().iter().all(|t| item.has_tag(t)) {
            return false;
        }
        if let Some(featured) = query.featured {
            if item.featured != featured {
                return false;
            }
        }
        if let Some(author) = &query.author {
            match &item.author {
                Some(a) if eq_ignore_case(a, author.trim()) => {}
                _ => return false,
            }
        }
        if let Some(status) = query.status {
            if item.status != status {
                return false;
            }
        }
        if query.date_from.is_some_and(|from| item.created_at < from) {
            return false;
        }
        if query.date_to.is_some_and(|to| item.created_at > to) {
            return false;
        }
        if !terms.is_empty() && !matches_any_term(item, terms) {
            return false;
        }
        if let Some(locale) = &query.locale {
            if !eq_ignore_case(&item.locale, locale.trim()) {
                return false;
            }
        }
        if let Some(content_id) = &query.content_id {
            if !eq_ignore_case(&item.content_id, content_id.trim()) {
                return false;
            }
        }
        if let Some(provider_id) = &query.provider_id {
            if !eq_ignore_case(&item.provider_id, provider_id.trim()) {
                return false;
            }
        }
        if !query.include_ids.is_empty()
            && !query.include_ids.iter().any(|id| eq_ignore_case(id, &item.id))
        {
            return false;
        }
        !query.exclude_ids.iter().any(|id| eq_ignore_case(id, &item.id))
    }

    /// 稳定排序，相等元素保持快照顺序
    pub fn sort(items: &mut [&ContentItem], field: SortField, direction: SortDirection) {
        items.sort_by(|a, b| {
            let ordering = compare(a, b, field);
            match direction {
                SortDirection::Asc => ordering,
                SortDirection::Desc => ordering.reverse(),
            }
        });
    }
}

fn compare(a: &ContentItem, b: &ContentItem, field: SortField) -> Ordering {
    match field {
        SortField::DateCreated => a.created_at.cmp(&b.created_at),
        SortField::LastModified => a.last_modified().cmp(&b.last_modified()),
        SortField::Title => a.title.to_lowercase().cmp(&b.title.to_lowercase()),
        SortField::Author => {
            let a = a.author.as_deref().map(str::to_lowercase);
            let b = b.author.as_deref().map(str::to_lowercase);
            a.cmp(&b)
        }
    }
}

fn search_terms(query: &ContentQuery) -> Vec<String> {
    query
        .search
        .as_deref()
        .map(|s| s.split_whitespace().map(str::to_lowercase).collect())
        .unwrap_or_default()
}

/// 任一关键词出现在标题、描述、正文、分类或标签中即匹配
fn matches_any_term(item: &ContentItem, terms: &[String]) -> bool {
    let title = item.title.to_lowercase();
    let description = item.description.as_deref().unwrap_or_default().to_lowercase();
    let body = item.body.to_lowercase();
    let labels: Vec<String> = item
        .categories
        .iter()
        .chain(item.tags.iter())
        .map(|l| l.to_lowercase())
        .collect();

    terms.iter().any(|term| {
        title.contains(term.as_str())
            || description.contains(term.as_str())
            || body.contains(term.as_str())
            || labels.iter().any(|l| l.contains(term.as_str()))
    })
}

/// ContentQueryService trait 定义内容查询操作
#[async_trait]
pub trait ContentQueryService: Send + Sync {
    async fn query(&self, query: &ContentQuery) -> Result<ListResult<ContentItem>, RepositoryError>;
}

/// 缓存中的查询结果，记录其所基于的快照
#[derive(Debug, Clone, Serialize, Deserialize)]
struct CachedPage {
    built_at: DateTime<Utc>,
    result: ListResult<ContentItem>,
}

/// 带缓存的查询服务
pub struct CachedContentQueryService {
    repository: Arc<ContentRepository>,
    cache: Arc<CacheService>,
    ttl: Option<Duration>,
}

impl CachedContentQueryService {
    pub fn new(repository: Arc<ContentRepository>, cache: Arc<CacheService>) -> Self {
        Self {
            repository,
            cache,
            ttl: None,
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }
}

#[async_trait]
impl ContentQueryService for CachedContentQueryService {
    async fn query(&self, query: &ContentQuery) -> Result<ListResult<ContentItem>, RepositoryError> {
        if query.is_contradictory() {
            debug!("Contradictory query, returning empty result");
            return Ok(ListResult::empty(query.skip, query.take));
        }

        // 先取快照再查查询缓存，两次闸门获取不嵌套
        let snapshot = self.repository.snapshot().await?;
        let key = query.cache_key();

        let source = snapshot.clone();
        let cached = self
            .cache
            .get_or_create(&key, self.ttl, move || async move {
                Ok::<_, RepositoryError>(CachedPage {
                    built_at: source.built_at,
                    result: QueryEngine::execute(&source, query),
                })
            })
            .await;

        match cached {
            Ok(page) if page.built_at == snapshot.built_at => Ok(page.result),
            Ok(_) => {
                debug!("Cached result for {} predates the current snapshot, recomputing", key);
                let result = QueryEngine::execute(&snapshot, query);
                let page = CachedPage {
                    built_at: snapshot.built_at,
                    result: result.clone(),
                };
                self.cache.set(&key, page, self.ttl).await;
                Ok(result)
            }
            Err(e) => {
                warn!("Query cache unavailable for {}: {}", key, e);
                Ok(QueryEngine::execute(&snapshot, query))
            }
        }
    }
}
