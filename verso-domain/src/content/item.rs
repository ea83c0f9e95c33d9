use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use verso_api::ContentStatus;

/// ContentItem 内容条目（一篇文档）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentItem {
    /// 由路径派生的稳定ID，路径不变则ID不变
    pub id: String,

    pub title: String,

    pub author: Option<String>,

    pub description: Option<String>,

    #[serde(rename = "createdAt")]
    pub created_at: DateTime<Utc>,

    #[serde(rename = "modifiedAt")]
    pub modified_at: Option<DateTime<Utc>>,

    /// 渲染后的正文
    pub body: String,

    /// 原始文档文本（含前言）
    pub source: String,

    pub locale: String,

    /// 跨语言分组ID，同一逻辑文档的各语言版本共享
    #[serde(rename = "contentId")]
    pub content_id: String,

    pub slug: String,

    /// 规范URL（站点相对，无前导 `/`）
    pub url: String,

    pub path: String,

    /// 标签（忽略大小写去重）
    pub tags: Vec<String>,

    /// 分类（忽略大小写去重）
    pub categories: Vec<String>,

    pub featured: bool,

    pub status: ContentStatus,

    pub metadata: BTreeMap<String, serde_json::Value>,

    /// 所属目录（仅关系，不持有所有权）
    #[serde(rename = "directoryId")]
    pub directory_id: Option<String>,

    #[serde(rename = "providerId")]
    pub provider_id: String,

    /// 数据源版本标记，用于写入时的乐观并发检查
    pub version: Option<String>,
}

impl ContentItem {
    /// 忽略大小写检查标签
    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.iter().any(|t| eq_ignore_case(t, tag.trim()))
    }

    /// 忽略大小写检查分类
    pub fn has_category(&self, category: &str) -> bool {
        self.categories.iter().any(|c| eq_ignore_case(c, category.trim()))
    }

    /// 最后修改时间，缺失时退回创建时间
    pub fn last_modified(&self) -> DateTime<Utc> {
        self.modified_at.unwrap_or(self.created_at)
    }

    /// 父目录路径
    pub fn parent_path(&self) -> &str {
        parent_path(&self.path)
    }

    pub fn is_published(&self) -> bool {
        self.status == ContentStatus::Published
    }
}

impl PartialEq for ContentItem {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id && self.provider_id == other.provider_id && self.path == other.path
    }
}

impl Eq for ContentItem {}

/// 返回路径的父路径（根下文件返回空字符串）
pub fn parent_path(path: &str) -> &str {
    let path = path.trim_end_matches('/');
    match path.rfind('/') {
        Some(idx) => &path[..idx],
        None => "",
    }
}

/// Unicode大小写不敏感比较
pub fn eq_ignore_case(a: &str, b: &str) -> bool {
    a.eq_ignore_ascii_case(b) || a.to_lowercase() == b.to_lowercase()
}

/// 忽略大小写去重，保留首次出现的写法
pub fn unique_labels<I, S>(values: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut labels: Vec<String> = Vec::new();
    for value in values {
        let value = value.as_ref().trim();
        if value.is_empty() {
            continue;
        }
        if !labels.iter().any(|l| eq_ignore_case(l, value)) {
            labels.push(value.to_string());
        }
    }
    labels
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_item(id: &str, path: &str) -> ContentItem {
        ContentItem {
            id: id.to_string(),
            title: "Sample".to_string(),
            author: None,
            description: None,
            created_at: Utc::now(),
            modified_at: None,
            body: String::new(),
            source: String::new(),
            locale: "en".to_string(),
            content_id: id.to_string(),
            slug: "sample".to_string(),
            url: "sample".to_string(),
            path: path.to_string(),
            tags: vec!["Rust".to_string()],
            categories: vec![],
            featured: false,
            status: ContentStatus::Published,
            metadata: BTreeMap::new(),
            directory_id: None,
            provider_id: "local".to_string(),
            version: None,
        }
    }

    #[test]
    fn test_equality_ignores_content_fields() {
        let a = sample_item("1", "blog/a.md");
        let mut b = a.clone();
        b.title = "Changed".to_string();
        b.body = "<p>new</p>".to_string();
        assert_eq!(a, b);

        b.provider_id = "github".to_string();
        assert_ne!(a, b);
    }

    #[test]
    fn test_tag_lookup_is_case_insensitive() {
        let item = sample_item("1", "blog/a.md");
        assert!(item.has_tag("rust"));
        assert!(item.has_tag(" RUST "));
        assert!(!item.has_tag("go"));
    }

    #[test]
    fn test_unique_labels() {
        assert_eq!(
            unique_labels(["Rust", "rust", " Cache ", "", "CACHE", "tokio"]),
            vec!["Rust", "Cache", "tokio"]
        );
    }

    #[test]
    fn test_parent_path() {
        assert_eq!(parent_path("content/en/blog/post.md"), "content/en/blog");
        assert_eq!(parent_path("post.md"), "");
        assert_eq!(parent_path("blog/"), "");
    }
}
