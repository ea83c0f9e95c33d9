use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{debug, warn};
use verso_api::document::parse_datetime;
use verso_api::{ContentQuery, ListResult};
use verso_infra::cache::CacheService;
use verso_service::content::{ContentQueryService, ContentRepository};

use crate::error::{Result, VersoError};

/// 应用状态
#[derive(Clone)]
pub struct AppState {
    pub repository: Arc<ContentRepository>,
    pub queries: Arc<dyn ContentQueryService>,
    pub cache: Arc<CacheService>,
}

/// 创建应用路由
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        // 内容查询
        .route("/api/contents", get(list_contents))
        .route("/api/contents/:id", get(get_content))
        .route("/api/directories/:id", get(get_directory))
        .route("/api/localization", get(get_localization))
        // 运维
        .route("/api/refresh", post(refresh))
        .route("/api/cache/stats", get(cache_stats))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        )
        .with_state(state)
}

/// 健康检查端点
async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

/// 内容列表请求参数
///
/// 多值参数使用逗号分隔，例如 `tags=rust,async`。
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentListParams {
    pub directory: Option<String>,
    pub directory_id: Option<String>,
    pub category: Option<String>,
    pub categories: Option<String>,
    pub tag: Option<String>,
    pub tags: Option<String>,
    pub featured: Option<bool>,
    pub author: Option<String>,
    pub status: Option<String>,
    pub date_from: Option<String>,
    pub date_to: Option<String>,
    pub search: Option<String>,
    pub locale: Option<String>,
    pub content_id: Option<String>,
    pub provider_id: Option<String>,
    pub include_ids: Option<String>,
    pub exclude_ids: Option<String>,
    pub sort_by: Option<String>,
    pub sort_direction: Option<String>,
    pub skip: Option<usize>,
    pub take: Option<usize>,
}

fn split_list(value: Option<String>) -> Vec<String> {
    value
        .map(|v| {
            v.split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

impl ContentListParams {
    /// 转换为查询；过滤值无法解析时返回 None（结果为空页），
    /// 排序值无法解析时忽略并使用默认排序
    pub fn into_query(self) -> Option<ContentQuery> {
        let mut query = ContentQuery {
            directory: self.directory,
            directory_id: self.directory_id,
            category: self.category,
            categories: split_list(self.categories),
            tag: self.tag,
            tags: split_list(self.tags),
            featured: self.featured,
            author: self.author,
            search: self.search,
            locale: self.locale,
            content_id: self.content_id,
            provider_id: self.provider_id,
            include_ids: split_list(self.include_ids),
            exclude_ids: split_list(self.exclude_ids),
            skip: self.skip.unwrap_or(0),
            take: self.take,
            ..ContentQuery::default()
        };

        if let Some(status) = self.status {
            match status.parse() {
                Ok(status) => query.status = Some(status),
                Err(e) => {
                    debug!("Unmatchable status filter: {}", e);
                    return None;
                }
            }
        }
        for (name, value, slot) in [
            ("dateFrom", self.date_from, &mut query.date_from),
            ("dateTo", self.date_to, &mut query.date_to),
        ] {
            if let Some(value) = value {
                let Some(parsed) = parse_datetime(&value) else {
                    debug!("Unmatchable {} filter: {}", name, value);
                    return None;
                };
                *slot = Some(parsed);
            }
        }

        if let Some(sort_by) = self.sort_by {
            match sort_by.parse() {
                Ok(field) => query.sort_by = field,
                Err(e) => warn!("Ignoring sortBy: {}", e),
            }
        }
        if let Some(direction) = self.sort_direction {
            match direction.parse() {
                Ok(direction) => query.sort_direction = direction,
                Err(e) => warn!("Ignoring sortDirection: {}", e),
            }
        }
        Some(query)
    }
}

/// 查询内容列表
async fn list_contents(
    State(state): State<AppState>,
    Query(params): Query<ContentListParams>,
) -> Result<impl IntoResponse> {
    let (skip, take) = (params.skip.unwrap_or(0), params.take);
    let result = match params.into_query() {
        Some(query) => {
            debug!("Listing contents with key {}", query.cache_key());
            state.queries.query(&query).await?
        }
        None => ListResult::empty(skip, take),
    };
    Ok(Json(result))
}

/// 获取单个内容及其译文
async fn get_content(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse> {
    // 条目与译文取自同一份快照
    let snapshot = state.repository.snapshot().await?;
    let item = snapshot
        .item(&id)
        .ok_or_else(|| VersoError::NotFound(format!("Content {}", id)))?;
    let translations: Vec<_> = snapshot
        .translations(&item.content_id)
        .into_iter()
        .filter(|t| t.id != item.id)
        .map(|t| json!({ "id": t.id, "locale": t.locale, "url": t.url }))
        .collect();

    Ok(Json(json!({
        "item": item,
        "translations": translations,
    })))
}

/// 获取目录、子目录与目录下的内容
async fn get_directory(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse> {
    let directory = state
        .repository
        .directory(&id)
        .await?
        .ok_or_else(|| VersoError::NotFound(format!("Directory {}", id)))?;
    let children = state.repository.child_directories(&id).await?;
    let items = state.repository.items_in(&id).await?;

    Ok(Json(json!({
        "directory": directory,
        "children": children,
        "items": items,
    })))
}

async fn get_localization(State(state): State<AppState>) -> Result<impl IntoResponse> {
    Ok(Json(state.repository.localization().await?))
}

/// 强制重建快照
async fn refresh(State(state): State<AppState>) -> Result<impl IntoResponse> {
    let outcome = state.repository.refresh().await?;
    Ok(Json(outcome))
}

async fn cache_stats(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({
        "stats": state.cache.stats(),
        "snapshot": state.repository.state(),
        "enabled": state.cache.is_enabled(),
    }))
}
