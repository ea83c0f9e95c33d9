use serde::Serialize;
use std::sync::{Arc, Mutex, RwLock};
use thiserror::Error;
use tokio::sync::Mutex as AsyncMutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use verso_api::{ListingSource, SourceError, QUERY_CACHE_PREFIX};
use verso_domain::{ContentItem, DirectoryItem, LocalizationInfo, Snapshot};
use verso_infra::cache::{CacheError, CacheService};

use super::materializer::{MaterializeError, TreeMaterializer};

/// 快照在缓存中的键
pub const SNAPSHOT_CACHE_KEY: &str = "snapshot:content";

/// 仓库错误
#[derive(Error, Debug)]
pub enum RepositoryError {
    #[error("Materialization failed: {0}")]
    Materialize(#[from] MaterializeError),

    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error("Source error: {0}")]
    Source(#[from] SourceError),
}

/// 快照生命周期
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SnapshotState {
    Unloaded,
    Loading,
    Loaded,
    Refreshing,
}

/// 刷新结果
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "camelCase")]
pub enum RefreshOutcome {
    Refreshed { directories: usize, items: usize },
    /// 已有加载或刷新在进行中，本次请求被合并
    AlreadyRunning,
}

/// 请求被取消（future被丢弃）时把状态恢复原样
struct StateGuard<'a> {
    state: &'a Mutex<SnapshotState>,
    fallback: SnapshotState,
    armed: bool,
}

impl StateGuard<'_> {
    fn finish(mut self, state: SnapshotState) {
        set_state(self.state, state);
        self.armed = false;
    }
}

impl Drop for StateGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            set_state(self.state, self.fallback);
        }
    }
}

fn set_state(state: &Mutex<SnapshotState>, value: SnapshotState) {
    if let Ok(mut guard) = state.lock() {
        *guard = value;
    }
}

/// ContentRepository 管理已发布的快照
///
/// 读取经过缓存服务；重建期间读取方拿到的是上一份快照。
/// 所有重建都持有 `rebuild_lock`，写入后的重建因此不会与旧的重建交错。
pub struct ContentRepository {
    materializer: Arc<TreeMaterializer>,
    source: Arc<dyn ListingSource>,
    cache: Arc<CacheService>,
    state: Mutex<SnapshotState>,
    current: RwLock<Option<Arc<Snapshot>>>,
    rebuild_lock: AsyncMutex<()>,
    token: CancellationToken,
}

impl ContentRepository {
    pub fn new(
        materializer: Arc<TreeMaterializer>,
        source: Arc<dyn ListingSource>,
        cache: Arc<CacheService>,
    ) -> Self {
        Self {
            materializer,
            source,
            cache,
            state: Mutex::new(SnapshotState::Unloaded),
            current: RwLock::new(None),
            rebuild_lock: AsyncMutex::new(()),
            token: CancellationToken::new(),
        }
    }

    pub fn state(&self) -> SnapshotState {
        self.state
            .lock()
            .map(|s| *s)
            .unwrap_or(SnapshotState::Unloaded)
    }

    /// 最近一次发布的快照，不触发加载
    pub fn current(&self) -> Option<Arc<Snapshot>> {
        self.current.read().ok().and_then(|c| c.clone())
    }

    pub fn cache(&self) -> &Arc<CacheService> {
        &self.cache
    }

    pub fn materializer(&self) -> &Arc<TreeMaterializer> {
        &self.materializer
    }

    /// 取消进行中的物化，用于关闭
    pub fn shutdown(&self) {
        self.token.cancel();
    }

    /// 获取快照，必要时加载
    pub async fn snapshot(&self) -> Result<Arc<Snapshot>, RepositoryError> {
        self.snapshot_with(&CancellationToken::new()).await
    }

    /// 获取快照，`token` 取消时放弃本次加载
    ///
    /// 已有快照时从不等待重建：缓存条目过期后由一个读取方重建，
    /// 其余读取方直接拿到旧快照。重建失败同样返回旧快照。
    pub async fn snapshot_with(
        &self,
        token: &CancellationToken,
    ) -> Result<Arc<Snapshot>, RepositoryError> {
        let Some(previous) = self.current() else {
            return self.first_load(token).await;
        };

        if let Some(snapshot) = self.cache.get::<Arc<Snapshot>>(SNAPSHOT_CACHE_KEY).await {
            self.publish(snapshot.clone());
            return Ok(snapshot);
        }

        let Some(guard) = self.begin_rebuild() else {
            debug!("Content snapshot is being rebuilt, serving previous snapshot");
            return Ok(previous);
        };
        let _rebuilding = self.rebuild_lock.lock().await;
        match self.rebuild(guard, token, false).await {
            Ok(snapshot) => Ok(snapshot),
            Err(e) => {
                warn!("Serving previous content snapshot: {}", e);
                Ok(previous)
            }
        }
    }

    /// 强制重建快照
    pub async fn refresh(&self) -> Result<RefreshOutcome, RepositoryError> {
        self.refresh_with(&CancellationToken::new()).await
    }

    /// 强制重建快照，`token` 取消时保留旧快照
    ///
    /// 已有加载或刷新在进行时直接返回 [`RefreshOutcome::AlreadyRunning`]。
    /// 失败时保留旧快照。
    pub async fn refresh_with(
        &self,
        token: &CancellationToken,
    ) -> Result<RefreshOutcome, RepositoryError> {
        let Some(guard) = self.begin_rebuild() else {
            debug!("Content refresh already running, skipping");
            return Ok(RefreshOutcome::AlreadyRunning);
        };
        let _rebuilding = self.rebuild_lock.lock().await;

        let snapshot = match self.rebuild(guard, token, true).await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!("Content refresh failed, keeping previous snapshot: {}", e);
                return Err(e);
            }
        };
        Ok(RefreshOutcome::Refreshed {
            directories: snapshot.directories().len(),
            items: snapshot.items().len(),
        })
    }

    /// 写入单个文件，随后重建快照并使查询缓存失效
    ///
    /// 进行中的重建可能已经读过旧文件，所以先等它结束再重建一次。
    /// 返回数据源给出的新版本标记。
    pub async fn save_content(
        &self,
        path: &str,
        text: &str,
        expected_version: Option<&str>,
    ) -> Result<String, RepositoryError> {
        let version = self.source.write_file(path, text, expected_version).await?;
        info!("Saved {} (version {})", path, version);

        let _rebuilding = self.rebuild_lock.lock().await;
        let guard = self.enter_rebuild();
        self.rebuild(guard, &CancellationToken::new(), true).await?;
        Ok(version)
    }

    pub async fn item(&self, id: &str) -> Result<Option<ContentItem>, RepositoryError> {
        Ok(self.snapshot().await?.item(id).cloned())
    }

    pub async fn item_by_path(&self, path: &str) -> Result<Option<ContentItem>, RepositoryError> {
        Ok(self.snapshot().await?.item_by_path(path).cloned())
    }

    pub async fn item_by_url(&self, url: &str) -> Result<Option<ContentItem>, RepositoryError> {
        Ok(self.snapshot().await?.item_by_url(url).cloned())
    }

    pub async fn item_by_slug(
        &self,
        slug: &str,
        locale: &str,
    ) -> Result<Option<ContentItem>, RepositoryError> {
        Ok(self.snapshot().await?.item_by_slug(slug, locale).cloned())
    }

    pub async fn directory(&self, id: &str) -> Result<Option<DirectoryItem>, RepositoryError> {
        Ok(self.snapshot().await?.directory(id).cloned())
    }

    pub async fn directory_by_path(
        &self,
        path: &str,
    ) -> Result<Option<DirectoryItem>, RepositoryError> {
        Ok(self.snapshot().await?.directory_by_path(path).cloned())
    }

    pub async fn root(&self) -> Result<Option<DirectoryItem>, RepositoryError> {
        Ok(self.snapshot().await?.root().cloned())
    }

    /// 子目录（按排序值、名称）
    pub async fn child_directories(&self, id: &str) -> Result<Vec<DirectoryItem>, RepositoryError> {
        let snapshot = self.snapshot().await?;
        Ok(snapshot.child_directories(id).into_iter().cloned().collect())
    }

    pub async fn items_in(&self, id: &str) -> Result<Vec<ContentItem>, RepositoryError> {
        let snapshot = self.snapshot().await?;
        Ok(snapshot.items_in(id).into_iter().cloned().collect())
    }

    pub async fn translations(&self, content_id: &str) -> Result<Vec<ContentItem>, RepositoryError> {
        let snapshot = self.snapshot().await?;
        Ok(snapshot.translations(content_id).into_iter().cloned().collect())
    }

    pub async fn localization(&self) -> Result<LocalizationInfo, RepositoryError> {
        Ok(self.snapshot().await?.localization().clone())
    }

    async fn materialize(&self, token: &CancellationToken) -> Result<Arc<Snapshot>, RepositoryError> {
        let snapshot = tokio::select! {
            _ = token.cancelled() => return Err(MaterializeError::Cancelled.into()),
            built = self.materializer.build(&self.token) => built?,
        };
        Ok(Arc::new(snapshot))
    }

    /// 首次加载，没有旧快照可退回
    async fn first_load(&self, token: &CancellationToken) -> Result<Arc<Snapshot>, RepositoryError> {
        let guard = self.begin_load();
        let snapshot = self
            .cache
            .get_or_create(SNAPSHOT_CACHE_KEY, None, move || self.materialize(token))
            .await;

        match snapshot {
            Ok(snapshot) => {
                self.publish(snapshot.clone());
                if let Some(guard) = guard {
                    guard.finish(SnapshotState::Loaded);
                }
                Ok(snapshot)
            }
            // 等待期间可能有其他调用方发布了快照
            Err(e) => self.current().ok_or(e),
        }
    }

    /// 调用方须持有 `rebuild_lock`；`force` 为 false 时缓存命中即返回
    async fn rebuild(
        &self,
        guard: StateGuard<'_>,
        token: &CancellationToken,
        force: bool,
    ) -> Result<Arc<Snapshot>, RepositoryError> {
        let snapshot = if force {
            self.cache
                .refresh(SNAPSHOT_CACHE_KEY, None, move || self.materialize(token))
                .await?
        } else {
            self.cache
                .get_or_create(SNAPSHOT_CACHE_KEY, None, move || self.materialize(token))
                .await?
        };

        let removed = self.cache.remove_by_prefix(QUERY_CACHE_PREFIX).await;
        self.publish(snapshot.clone());
        guard.finish(SnapshotState::Loaded);

        info!(
            "Content rebuilt: {} directories, {} items, {} cached queries dropped",
            snapshot.directories().len(),
            snapshot.items().len(),
            removed
        );
        Ok(snapshot)
    }

    /// 首次读取时进入 Loading 状态
    fn begin_load(&self) -> Option<StateGuard<'_>> {
        let mut state = self.state.lock().ok()?;
        if *state != SnapshotState::Unloaded {
            return None;
        }
        *state = SnapshotState::Loading;
        Some(StateGuard {
            state: &self.state,
            fallback: SnapshotState::Unloaded,
            armed: true,
        })
    }

    /// 没有其他加载或刷新时进入 Loading/Refreshing 状态
    fn begin_rebuild(&self) -> Option<StateGuard<'_>> {
        let mut state = self.state.lock().ok()?;
        let (next, fallback) = match *state {
            SnapshotState::Loading | SnapshotState::Refreshing => return None,
            SnapshotState::Unloaded => (SnapshotState::Loading, SnapshotState::Unloaded),
            SnapshotState::Loaded => (SnapshotState::Refreshing, SnapshotState::Loaded),
        };
        *state = next;
        Some(StateGuard {
            state: &self.state,
            fallback,
            armed: true,
        })
    }

    /// 无条件进入重建状态，调用方已持有 `rebuild_lock`
    fn enter_rebuild(&self) -> StateGuard<'_> {
        let has_snapshot = self.current().is_some();
        let fallback = match self.state.lock() {
            Ok(mut state) => {
                let fallback = *state;
                *state = if has_snapshot {
                    SnapshotState::Refreshing
                } else {
                    SnapshotState::Loading
                };
                fallback
            }
            Err(_) => SnapshotState::Unloaded,
        };
        StateGuard {
            state: &self.state,
            fallback,
            armed: true,
        }
    }

    fn publish(&self, snapshot: Arc<Snapshot>) {
        if let Ok(mut current) = self.current.write() {
            let changed = current
                .as_ref()
                .map_or(true, |existing| !Arc::ptr_eq(existing, &snapshot));
            if changed {
                debug!("Publishing content snapshot built at {}", snapshot.built_at);
                *current = Some(snapshot);
            }
        }
        // 缓存命中时也可能是首次发布
        if let Ok(mut state) = self.state.lock() {
            if *state == SnapshotState::Unloaded {
                *state = SnapshotState::Loaded;
            }
        }
    }
}
