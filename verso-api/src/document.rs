use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

/// FrontMatter 文档头部的结构化元数据
///
/// 已知字段解析为强类型，其余键原样保留在 `extra` 中。
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FrontMatter {
    pub title: Option<String>,

    pub author: Option<String>,

    pub description: Option<String>,

    /// 创建时间，支持 RFC3339、`YYYY-MM-DD HH:MM:SS` 与 `YYYY-MM-DD`
    pub date: Option<String>,

    #[serde(alias = "lastmod", alias = "updated")]
    pub modified: Option<String>,

    pub slug: Option<String>,

    #[serde(alias = "permalink")]
    pub url: Option<String>,

    #[serde(default, deserialize_with = "string_or_list")]
    pub tags: Vec<String>,

    #[serde(default, alias = "category", deserialize_with = "string_or_list")]
    pub categories: Vec<String>,

    pub featured: Option<bool>,

    pub status: Option<String>,

    pub draft: Option<bool>,

    #[serde(alias = "lang", alias = "language")]
    pub locale: Option<String>,

    /// 跨语言分组ID
    #[serde(alias = "contentId", alias = "translationKey", alias = "translation_key")]
    pub content_id: Option<String>,

    #[serde(alias = "weight", alias = "sort_order", alias = "sortOrder")]
    pub order: Option<i32>,

    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl FrontMatter {
    pub fn created(&self) -> Option<DateTime<Utc>> {
        self.date.as_deref().and_then(parse_datetime)
    }

    pub fn last_modified(&self) -> Option<DateTime<Utc>> {
        self.modified.as_deref().and_then(parse_datetime)
    }
}

/// 解析前言中的时间字段
pub fn parse_datetime(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S") {
        return Some(dt.and_utc());
    }
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc())
}

/// 标签和分类允许写成列表，也允许写成逗号分隔的字符串
fn string_or_list<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum StringOrList {
        One(String),
        Many(Vec<String>),
        Nothing(()),
    }

    Ok(match StringOrList::deserialize(deserializer)? {
        StringOrList::One(s) => s
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect(),
        StringOrList::Many(list) => list,
        StringOrList::Nothing(()) => Vec::new(),
    })
}

/// 解析后的文档
#[derive(Debug, Clone, Default)]
pub struct ParsedDocument {
    pub front_matter: FrontMatter,
    /// 前言的原始键值，键名保持文件中的写法（别名不做归一）
    pub fields: BTreeMap<String, serde_json::Value>,
    pub body: String,
}

/// 文档解析错误
#[derive(Error, Debug)]
pub enum ParseError {
    #[error("Unterminated front matter block")]
    Unterminated,

    #[error("Malformed front matter: {0}")]
    Malformed(String),
}

/// DocumentParser 定义文档解析能力
pub trait DocumentParser: Send + Sync {
    /// 拆分前言与正文
    fn extract(&self, text: &str) -> Result<ParsedDocument, ParseError>;

    /// 将正文渲染为展示格式
    fn render(&self, body: &str) -> String;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_datetime_formats() {
        assert!(parse_datetime("2024-03-01T10:00:00Z").is_some());
        assert!(parse_datetime("2024-03-01T10:00:00+08:00").is_some());
        assert!(parse_datetime("2024-03-01 10:00:00").is_some());
        assert_eq!(
            parse_datetime("2024-03-01").map(|d| d.to_rfc3339()),
            Some("2024-03-01T00:00:00+00:00".to_string())
        );
        assert!(parse_datetime("yesterday").is_none());
    }

    #[test]
    fn test_front_matter_from_json_keeps_unknown_keys() {
        let fm: FrontMatter = serde_json::from_value(serde_json::json!({
            "title": "Hello",
            "tags": "rust, cache",
            "weight": 3,
            "contentId": "hello",
            "hero": {"image": "a.png"}
        }))
        .unwrap();

        assert_eq!(fm.title.as_deref(), Some("Hello"));
        assert_eq!(fm.tags, vec!["rust", "cache"]);
        assert_eq!(fm.order, Some(3));
        assert_eq!(fm.content_id.as_deref(), Some("hello"));
        assert_eq!(fm.extra.len(), 1);
        assert!(fm.extra.contains_key("hero"));
    }
}
