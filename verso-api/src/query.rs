use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// 内容状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentStatus {
    Draft,
    #[default]
    Published,
    Archived,
}

impl ContentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContentStatus::Draft => "draft",
            ContentStatus::Published => "published",
            ContentStatus::Archived => "archived",
        }
    }
}

impl FromStr for ContentStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "draft" => Ok(ContentStatus::Draft),
            "published" | "publish" => Ok(ContentStatus::Published),
            "archived" | "archive" => Ok(ContentStatus::Archived),
            other => Err(format!("Unknown content status: {}", other)),
        }
    }
}

impl fmt::Display for ContentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 排序字段
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortField {
    #[default]
    DateCreated,
    Title,
    Author,
    LastModified,
}

impl SortField {
    pub fn as_str(&self) -> &'static str {
        match self {
            SortField::DateCreated => "date_created",
            SortField::Title => "title",
            SortField::Author => "author",
            SortField::LastModified => "last_modified",
        }
    }
}

impl FromStr for SortField {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "date_created" | "created" | "date" => Ok(SortField::DateCreated),
            "title" => Ok(SortField::Title),
            "author" => Ok(SortField::Author),
            "last_modified" | "modified" => Ok(SortField::LastModified),
            other => Err(format!("Unknown sort field: {}", other)),
        }
    }
}

/// 排序方向
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    Asc,
    #[default]
    Desc,
}

impl FromStr for SortDirection {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "asc" | "ascending" => Ok(SortDirection::Asc),
            "desc" | "descending" => Ok(SortDirection::Desc),
            other => Err(format!("Unknown sort direction: {}", other)),
        }
    }
}

/// 查询缓存键前缀
pub const QUERY_CACHE_PREFIX: &str = "query:";

/// ContentQuery 内容查询参数
///
/// 查询引擎只读取该对象；调用方需要修改时先clone再使用构建方法。
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContentQuery {
    /// 所属目录路径
    pub directory: Option<String>,
    pub directory_id: Option<String>,
    pub category: Option<String>,
    /// 必须全部包含的分类
    pub categories: Vec<String>,
    pub tag: Option<String>,
    /// 必须全部包含的标签
    pub tags: Vec<String>,
    pub featured: Option<bool>,
    pub author: Option<String>,
    pub status: Option<ContentStatus>,
    pub date_from: Option<DateTime<Utc>>,
    pub date_to: Option<DateTime<Utc>>,
    /// 自由文本搜索，按空白拆分，任一词命中即可
    pub search: Option<String>,
    pub locale: Option<String>,
    /// 跨语言分组ID
    pub content_id: Option<String>,
    pub provider_id: Option<String>,
    pub include_ids: Vec<String>,
    pub exclude_ids: Vec<String>,
    pub sort_by: SortField,
    pub sort_direction: SortDirection,
    pub skip: usize,
    pub take: Option<usize>,
}

impl ContentQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_directory(mut self, directory: impl Into<String>) -> Self {
        self.directory = Some(directory.into());
        self
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_categories<I, S>(mut self, categories: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.categories = categories.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_search(mut self, search: impl Into<String>) -> Self {
        self.search = Some(search.into());
        self
    }

    pub fn with_locale(mut self, locale: impl Into<String>) -> Self {
        self.locale = Some(locale.into());
        self
    }

    pub fn with_status(mut self, status: ContentStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_sort(mut self, field: SortField, direction: SortDirection) -> Self {
        self.sort_by = field;
        self.sort_direction = direction;
        self
    }

    pub fn with_page(mut self, skip: usize, take: usize) -> Self {
        self.skip = skip;
        self.take = Some(take);
        self
    }

    /// 合并 `category` 与 `categories`
    pub fn required_categories(&self) -> Vec<&str> {
        merge_single(self.category.as_deref(), &self.categories)
    }

    /// 合并 `tag` 与 `tags`
    pub fn required_tags(&self) -> Vec<&str> {
        merge_single(self.tag.as_deref(), &self.tags)
    }

    /// 检查参数是否自相矛盾（矛盾的查询返回空结果而不是错误）
    pub fn is_contradictory(&self) -> bool {
        if let (Some(from), Some(to)) = (self.date_from, self.date_to) {
            if from > to {
                return true;
            }
        }
        if !self.include_ids.is_empty()
            && self
                .include_ids
                .iter()
                .all(|id| self.exclude_ids.iter().any(|ex| ex.eq_ignore_ascii_case(id)))
        {
            return true;
        }
        if let Some(directory_id) = &self.directory_id {
            if self.exclude_ids.iter().any(|ex| ex.eq_ignore_ascii_case(directory_id)) {
                return true;
            }
        }
        false
    }

    /// 生成缓存键
    ///
    /// 只拼接非默认参数，字段顺序固定。仅默认字段不同的两个查询共享同一个键。
    pub fn cache_key(&self) -> String {
        let mut parts: Vec<String> = Vec::new();

        push_opt(&mut parts, "dir", self.directory.as_deref());
        push_opt(&mut parts, "dir_id", self.directory_id.as_deref());
        push_list(&mut parts, "cats", &self.required_categories());
        push_list(&mut parts, "tags", &self.required_tags());
        if let Some(featured) = self.featured {
            parts.push(format!("featured={}", featured));
        }
        push_opt(&mut parts, "author", self.author.as_deref());
        if let Some(status) = self.status {
            parts.push(format!("status={}", status));
        }
        if let Some(from) = self.date_from {
            parts.push(format!("from={}", from.to_rfc3339()));
        }
        if let Some(to) = self.date_to {
            parts.push(format!("to={}", to.to_rfc3339()));
        }
        if let Some(search) = self.search.as_deref() {
            let terms: Vec<&str> = search.split_whitespace().collect();
            if !terms.is_empty() {
                parts.push(format!("q={}", escape_key_value(&terms.join(" ").to_lowercase())));
            }
        }
        push_opt(&mut parts, "locale", self.locale.as_deref());
        push_opt(&mut parts, "cid", self.content_id.as_deref());
        push_opt(&mut parts, "provider", self.provider_id.as_deref());
        let include: Vec<&str> = self.include_ids.iter().map(String::as_str).collect();
        push_list(&mut parts, "in", &include);
        let exclude: Vec<&str> = self.exclude_ids.iter().map(String::as_str).collect();
        push_list(&mut parts, "ex", &exclude);
        if self.sort_by != SortField::default() {
            parts.push(format!("sort={}", self.sort_by.as_str()));
        }
        if self.sort_direction != SortDirection::default() {
            parts.push("asc".to_string());
        }
        if self.skip != 0 {
            parts.push(format!("skip={}", self.skip));
        }
        if let Some(take) = self.take {
            parts.push(format!("take={}", take));
        }

        format!("{}{}", QUERY_CACHE_PREFIX, parts.join("|"))
    }
}

fn merge_single<'a>(single: Option<&'a str>, many: &'a [String]) -> Vec<&'a str> {
    let mut values: Vec<&str> = Vec::with_capacity(many.len() + 1);
    for value in single.into_iter().chain(many.iter().map(String::as_str)) {
        let value = value.trim();
        if !value.is_empty() && !values.iter().any(|v| v.eq_ignore_ascii_case(value)) {
            values.push(value);
        }
    }
    values
}

fn push_opt(parts: &mut Vec<String>, name: &str, value: Option<&str>) {
    if let Some(value) = value.map(str::trim).filter(|v| !v.is_empty()) {
        parts.push(format!("{}={}", name, escape_key_value(&value.to_lowercase())));
    }
}

/// 列表参数按集合处理：忽略顺序与大小写
fn push_list(parts: &mut Vec<String>, name: &str, values: &[&str]) {
    if values.is_empty() {
        return;
    }
    let mut normalized: Vec<String> = values
        .iter()
        .map(|v| escape_key_value(&v.trim().to_lowercase()))
        .collect();
    normalized.sort();
    normalized.dedup();
    parts.push(format!("{}={}", name, normalized.join(",")));
}

/// 转义键中的分隔符，参数值无法伪造其他字段
fn escape_key_value(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '%' => escaped.push_str("%25"),
            '|' => escaped.push_str("%7c"),
            '=' => escaped.push_str("%3d"),
            ',' => escaped.push_str("%2c"),
            _ => escaped.push(c),
        }
    }
    escaped
}

/// ListResult 包含查询结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListResult<T> {
    pub items: Vec<T>,
    /// 过滤后、分页前的总数
    pub total: u64,
    pub skip: usize,
    pub take: Option<usize>,
}

impl<T> ListResult<T> {
    pub fn new(items: Vec<T>, total: u64, skip: usize, take: Option<usize>) -> Self {
        Self {
            items,
            total,
            skip,
            take,
        }
    }

    pub fn empty(skip: usize, take: Option<usize>) -> Self {
        Self::new(Vec::new(), 0, skip, take)
    }
}
