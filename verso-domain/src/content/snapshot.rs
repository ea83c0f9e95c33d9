use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use thiserror::Error;

use super::directory::DirectoryItem;
use super::item::ContentItem;

/// 领域错误
#[derive(Error, Debug, PartialEq, Eq)]
pub enum DomainError {
    #[error("Directory {child} cannot be attached under {parent}: would create a cycle")]
    Cycle { parent: String, child: String },

    #[error("Directory {0} already has a parent")]
    AlreadyAttached(String),

    #[error("Unknown directory: {0}")]
    UnknownDirectory(String),

    #[error("Unknown content item: {0}")]
    UnknownItem(String),
}

/// LocalizationInfo 本地化信息
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LocalizationInfo {
    #[serde(rename = "defaultLocale")]
    pub default_locale: String,

    #[serde(rename = "availableLocales")]
    pub available_locales: Vec<String>,

    /// 分组ID -> {语言 -> 路径}
    pub translations: BTreeMap<String, BTreeMap<String, String>>,
}

impl LocalizationInfo {
    /// 根据内容条目生成本地化信息
    ///
    /// 可用语言包含配置的语言与实际出现的语言，默认语言总是排在第一位。
    pub fn collect<'a>(
        default_locale: &str,
        configured: &[String],
        items: impl IntoIterator<Item = &'a ContentItem>,
    ) -> Self {
        let mut available: Vec<String> = vec![default_locale.to_string()];
        for locale in configured {
            if !available.iter().any(|l| l.eq_ignore_ascii_case(locale)) {
                available.push(locale.clone());
            }
        }

        let mut translations: BTreeMap<String, BTreeMap<String, String>> = BTreeMap::new();
        for item in items {
            if !available.iter().any(|l| l.eq_ignore_ascii_case(&item.locale)) {
                available.push(item.locale.clone());
            }
            translations
                .entry(item.content_id.clone())
                .or_default()
                .entry(item.locale.clone())
                .or_insert_with(|| item.path.clone());
        }

        Self {
            default_locale: default_locale.to_string(),
            available_locales: available,
            translations,
        }
    }

    pub fn translation_path(&self, content_id: &str, locale: &str) -> Option<&str> {
        self.translations
            .get(content_id)
            .and_then(|by_locale| by_locale.get(locale))
            .map(String::as_str)
    }
}

/// 统一URL查找键
fn url_key(url: &str) -> String {
    url.trim().trim_matches('/').to_lowercase()
}

/// Snapshot 一次物化得到的完整、内部一致的目录与内容集合
///
/// 所有实体平铺存放，父子及所属关系通过ID引用在快照内解析。
/// 索引不参与序列化，反序列化时重建。
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(from = "SnapshotParts")]
pub struct Snapshot {
    #[serde(rename = "providerId")]
    pub provider_id: String,

    #[serde(rename = "rootId")]
    pub root_id: Option<String>,

    #[serde(rename = "builtAt")]
    pub built_at: DateTime<Utc>,

    directories: Vec<DirectoryItem>,

    items: Vec<ContentItem>,

    localization: LocalizationInfo,

    #[serde(skip)]
    dir_by_id: HashMap<String, usize>,

    #[serde(skip)]
    dir_by_path: HashMap<String, usize>,

    #[serde(skip)]
    item_by_id: HashMap<String, usize>,

    #[serde(skip)]
    item_by_path: HashMap<String, usize>,

    #[serde(skip)]
    item_by_url: HashMap<String, usize>,
}

#[derive(Deserialize)]
struct SnapshotParts {
    #[serde(rename = "providerId")]
    provider_id: String,
    #[serde(rename = "rootId")]
    root_id: Option<String>,
    #[serde(rename = "builtAt")]
    built_at: DateTime<Utc>,
    directories: Vec<DirectoryItem>,
    items: Vec<ContentItem>,
    localization: LocalizationInfo,
}

impl From<SnapshotParts> for Snapshot {
    fn from(parts: SnapshotParts) -> Self {
        Snapshot::assemble(
            parts.provider_id,
            parts.root_id,
            parts.built_at,
            parts.directories,
            parts.items,
            parts.localization,
        )
    }
}

impl Snapshot {
    /// 空快照
    pub fn empty(provider_id: impl Into<String>) -> Self {
        Self::assemble(
            provider_id.into(),
            None,
            Utc::now(),
            Vec::new(),
            Vec::new(),
            LocalizationInfo::default(),
        )
    }

    fn assemble(
        provider_id: String,
        root_id: Option<String>,
        built_at: DateTime<Utc>,
        directories: Vec<DirectoryItem>,
        items: Vec<ContentItem>,
        localization: LocalizationInfo,
    ) -> Self {
        let mut snapshot = Self {
            provider_id,
            root_id,
            built_at,
            directories,
            items,
            localization,
            dir_by_id: HashMap::new(),
            dir_by_path: HashMap::new(),
            item_by_id: HashMap::new(),
            item_by_path: HashMap::new(),
            item_by_url: HashMap::new(),
        };
        snapshot.reindex();
        snapshot
    }

    fn reindex(&mut self) {
        for (idx, dir) in self.directories.iter().enumerate() {
            self.dir_by_id.insert(dir.id.clone(), idx);
            self.dir_by_path.insert(dir.path.clone(), idx);
        }
        for (idx, item) in self.items.iter().enumerate() {
            self.item_by_id.insert(item.id.clone(), idx);
            self.item_by_path.insert(item.path.clone(), idx);
            // 同一URL出现多次时保留最先出现的条目
            self.item_by_url.entry(url_key(&item.url)).or_insert(idx);
        }
    }

    pub fn directories(&self) -> &[DirectoryItem] {
        &self.directories
    }

    pub fn items(&self) -> &[ContentItem] {
        &self.items
    }

    pub fn localization(&self) -> &LocalizationInfo {
        &self.localization
    }

    pub fn is_empty(&self) -> bool {
        self.directories.is_empty() && self.items.is_empty()
    }

    pub fn root(&self) -> Option<&DirectoryItem> {
        self.root_id.as_deref().and_then(|id| self.directory(id))
    }

    pub fn directory(&self, id: &str) -> Option<&DirectoryItem> {
        self.dir_by_id.get(id).map(|&idx| &self.directories[idx])
    }

    pub fn directory_by_path(&self, path: &str) -> Option<&DirectoryItem> {
        self.dir_by_path
            .get(path.trim_matches('/'))
            .map(|&idx| &self.directories[idx])
    }

    pub fn item(&self, id: &str) -> Option<&ContentItem> {
        self.item_by_id.get(id).map(|&idx| &self.items[idx])
    }

    pub fn item_by_path(&self, path: &str) -> Option<&ContentItem> {
        self.item_by_path
            .get(path.trim_matches('/'))
            .map(|&idx| &self.items[idx])
    }

    /// 按规范URL查找（忽略首尾 `/` 与大小写）
    pub fn item_by_url(&self, url: &str) -> Option<&ContentItem> {
        self.item_by_url.get(&url_key(url)).map(|&idx| &self.items[idx])
    }

    pub fn item_by_slug(&self, slug: &str, locale: &str) -> Option<&ContentItem> {
        self.items
            .iter()
            .find(|item| item.slug.eq_ignore_ascii_case(slug) && item.locale.eq_ignore_ascii_case(locale))
    }

    /// 条目所属目录
    pub fn directory_of(&self, item: &ContentItem) -> Option<&DirectoryItem> {
        item.directory_id.as_deref().and_then(|id| self.directory(id))
    }

    pub fn parent_of(&self, dir: &DirectoryItem) -> Option<&DirectoryItem> {
        dir.parent_id.as_deref().and_then(|id| self.directory(id))
    }

    /// 子目录，按排序值、名称排序
    pub fn child_directories(&self, id: &str) -> Vec<&DirectoryItem> {
        let Some(dir) = self.directory(id) else {
            return Vec::new();
        };
        let mut children: Vec<&DirectoryItem> = dir
            .children
            .iter()
            .filter_map(|child| self.directory(child))
            .collect();
        children.sort_by(|a, b| {
            a.sort_order
                .cmp(&b.sort_order)
                .then_with(|| a.name.to_lowercase().cmp(&b.name.to_lowercase()))
        });
        children
    }

    /// 目录下的内容条目（不含子目录）
    pub fn items_in(&self, id: &str) -> Vec<&ContentItem> {
        self.directory(id)
            .map(|dir| dir.item_ids.iter().filter_map(|item| self.item(item)).collect())
            .unwrap_or_default()
    }

    /// 从根到该目录的路径（含自身）
    pub fn ancestors(&self, id: &str) -> Vec<&DirectoryItem> {
        let mut chain = Vec::new();
        let mut current = self.directory(id);
        while let Some(dir) = current {
            chain.push(dir);
            // 防御数据损坏导致的死循环
            if chain.len() > self.directories.len() {
                break;
            }
            current = self.parent_of(dir);
        }
        chain.reverse();
        chain
    }

    /// 同一分组ID的全部语言版本
    pub fn translations(&self, content_id: &str) -> Vec<&ContentItem> {
        self.items
            .iter()
            .filter(|item| item.content_id == content_id)
            .collect()
    }
}

/// SnapshotBuilder 构建快照，在每次设置父目录前检查环
#[derive(Debug, Default)]
pub struct SnapshotBuilder {
    directories: Vec<DirectoryItem>,
    items: Vec<ContentItem>,
    dir_by_id: HashMap<String, usize>,
    dir_by_path: HashMap<String, usize>,
    item_by_id: HashMap<String, usize>,
    root_id: Option<String>,
}

impl SnapshotBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// 添加目录；第一个添加的目录成为根目录
    pub fn add_directory(&mut self, dir: DirectoryItem) {
        if self.root_id.is_none() {
            self.root_id = Some(dir.id.clone());
        }
        let idx = self.directories.len();
        self.dir_by_id.insert(dir.id.clone(), idx);
        self.dir_by_path.insert(dir.path.clone(), idx);
        self.directories.push(dir);
    }

    pub fn add_item(&mut self, item: ContentItem) {
        let idx = self.items.len();
        self.item_by_id.insert(item.id.clone(), idx);
        self.items.push(item);
    }

    pub fn directory_id_for_path(&self, path: &str) -> Option<&str> {
        self.dir_by_path
            .get(path)
            .map(|&idx| self.directories[idx].id.as_str())
    }

    pub fn directory_mut(&mut self, id: &str) -> Option<&mut DirectoryItem> {
        match self.dir_by_id.get(id) {
            Some(&idx) => Some(&mut self.directories[idx]),
            None => None,
        }
    }

    pub fn directories(&self) -> &[DirectoryItem] {
        &self.directories
    }

    pub fn items(&self) -> &[ContentItem] {
        &self.items
    }

    /// 将 `child` 挂到 `parent` 下
    pub fn attach_directory(&mut self, parent: &str, child: &str) -> Result<(), DomainError> {
        let parent_idx = *self
            .dir_by_id
            .get(parent)
            .ok_or_else(|| DomainError::UnknownDirectory(parent.to_string()))?;
        let child_idx = *self
            .dir_by_id
            .get(child)
            .ok_or_else(|| DomainError::UnknownDirectory(child.to_string()))?;

        if self.is_ancestor_or_self(child, parent) {
            return Err(DomainError::Cycle {
                parent: parent.to_string(),
                child: child.to_string(),
            });
        }
        if self.directories[child_idx].parent_id.is_some() {
            return Err(DomainError::AlreadyAttached(child.to_string()));
        }

        self.directories[child_idx].parent_id = Some(parent.to_string());
        self.directories[parent_idx].children.push(child.to_string());
        Ok(())
    }

    /// `candidate` 是否为 `dir` 本身或其祖先
    fn is_ancestor_or_self(&self, candidate: &str, dir: &str) -> bool {
        let mut current = Some(dir.to_string());
        let mut steps = 0;
        while let Some(id) = current {
            if id == candidate {
                return true;
            }
            steps += 1;
            if steps > self.directories.len() {
                return true;
            }
            current = self
                .dir_by_id
                .get(&id)
                .and_then(|&idx| self.directories[idx].parent_id.clone());
        }
        false
    }

    /// 将内容条目关联到目录
    pub fn link_item(&mut self, item_id: &str, dir_id: &str) -> Result<(), DomainError> {
        let item_idx = *self
            .item_by_id
            .get(item_id)
            .ok_or_else(|| DomainError::UnknownItem(item_id.to_string()))?;
        let dir_idx = *self
            .dir_by_id
            .get(dir_id)
            .ok_or_else(|| DomainError::UnknownDirectory(dir_id.to_string()))?;

        self.items[item_idx].directory_id = Some(dir_id.to_string());
        let dir = &mut self.directories[dir_idx];
        if !dir.item_ids.iter().any(|id| id == item_id) {
            dir.item_ids.push(item_id.to_string());
        }
        Ok(())
    }

    pub fn build(
        self,
        provider_id: impl Into<String>,
        default_locale: &str,
        configured_locales: &[String],
    ) -> Snapshot {
        let localization =
            LocalizationInfo::collect(default_locale, configured_locales, self.items.iter());
        Snapshot::assemble(
            provider_id.into(),
            self.root_id,
            Utc::now(),
            self.directories,
            self.items,
            localization,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use verso_api::ContentStatus;

    fn dir(id: &str, path: &str) -> DirectoryItem {
        DirectoryItem::new(id, path, path.rsplit('/').next().unwrap_or(path), "en")
    }

    fn item(id: &str, path: &str, locale: &str, content_id: &str) -> ContentItem {
        ContentItem {
            id: id.to_string(),
            title: id.to_string(),
            author: None,
            description: None,
            created_at: Utc::now(),
            modified_at: None,
            body: String::new(),
            source: String::new(),
            locale: locale.to_string(),
            content_id: content_id.to_string(),
            slug: id.to_string(),
            url: format!("{}/{}", locale, id),
            path: path.to_string(),
            tags: Vec::new(),
            categories: Vec::new(),
            featured: false,
            status: ContentStatus::Published,
            metadata: BTreeMap::new(),
            directory_id: None,
            provider_id: "local".to_string(),
            version: None,
        }
    }

    fn tree() -> SnapshotBuilder {
        let mut builder = SnapshotBuilder::new();
        builder.add_directory(dir("root", "content"));
        builder.add_directory(dir("en", "content/en"));
        builder.add_directory(dir("blog", "content/en/blog"));
        builder.attach_directory("root", "en").unwrap();
        builder.attach_directory("en", "blog").unwrap();
        builder
    }

    #[test]
    fn test_attach_rejects_self_parent() {
        let mut builder = tree();
        assert_eq!(
            builder.attach_directory("blog", "blog"),
            Err(DomainError::Cycle {
                parent: "blog".to_string(),
                child: "blog".to_string()
            })
        );
    }

    #[test]
    fn test_attach_rejects_descendant_as_parent() {
        let mut builder = tree();
        let result = builder.attach_directory("blog", "root");
        assert!(matches!(result, Err(DomainError::Cycle { .. })));
        assert!(builder.directories()[0].parent_id.is_none());
    }

    #[test]
    fn test_attach_rejects_second_parent() {
        let mut builder = tree();
        builder.add_directory(dir("fr", "content/fr"));
        assert_eq!(
            builder.attach_directory("fr", "blog"),
            Err(DomainError::AlreadyAttached("blog".to_string()))
        );
    }

    #[test]
    fn test_snapshot_lookups() {
        let mut builder = tree();
        builder.add_item(item("p1", "content/en/blog/p1.md", "en", "blog/p1"));
        builder.link_item("p1", "blog").unwrap();
        let snapshot = builder.build("local", "en", &[]);

        assert_eq!(snapshot.root().map(|d| d.id.as_str()), Some("root"));
        assert_eq!(snapshot.directory_by_path("content/en/blog").unwrap().id, "blog");
        assert_eq!(snapshot.item_by_url("/EN/p1/").unwrap().id, "p1");
        assert_eq!(snapshot.items_in("blog").len(), 1);
        assert_eq!(snapshot.directory_of(snapshot.item("p1").unwrap()).unwrap().id, "blog");

        let chain: Vec<&str> = snapshot.ancestors("blog").iter().map(|d| d.id.as_str()).collect();
        assert_eq!(chain, vec!["root", "en", "blog"]);
    }

    #[test]
    fn test_child_directories_sorted_by_order_then_name() {
        let mut builder = SnapshotBuilder::new();
        builder.add_directory(dir("root", "c"));
        let mut b = dir("b", "c/b");
        b.sort_order = 1;
        builder.add_directory(b);
        builder.add_directory(dir("z", "c/z"));
        builder.add_directory(dir("a", "c/a"));
        for child in ["b", "z", "a"] {
            builder.attach_directory("root", child).unwrap();
        }
        let snapshot = builder.build("local", "en", &[]);
        let names: Vec<&str> = snapshot
            .child_directories("root")
            .iter()
            .map(|d| d.id.as_str())
            .collect();
        assert_eq!(names, vec!["a", "z", "b"]);
    }

    #[test]
    fn test_localization_collects_translations() {
        let mut builder = tree();
        builder.add_item(item("p1", "content/en/blog/p1.md", "en", "blog/p1"));
        builder.add_item(item("p2", "content/fr/blog/p1.md", "fr", "blog/p1"));
        let snapshot = builder.build("local", "en", &["de".to_string()]);

        let info = snapshot.localization();
        assert_eq!(info.available_locales, vec!["en", "de", "fr"]);
        assert_eq!(info.translation_path("blog/p1", "fr"), Some("content/fr/blog/p1.md"));
        assert_eq!(snapshot.translations("blog/p1").len(), 2);
    }

    #[test]
    fn test_serde_round_trip_rebuilds_indexes() {
        let mut builder = tree();
        builder.add_item(item("p1", "content/en/blog/p1.md", "en", "blog/p1"));
        builder.link_item("p1", "blog").unwrap();
        let snapshot = builder.build("local", "en", &[]);

        let json = serde_json::to_string(&snapshot).unwrap();
        assert!(!json.contains("dir_by_id"));
        let restored: Snapshot = serde_json::from_str(&json).unwrap();
        assert_eq!(restored.item_by_path("content/en/blog/p1.md").unwrap().id, "p1");
        assert_eq!(restored.directory("blog").unwrap().item_ids, vec!["p1"]);
    }
}
