use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// 列表条目类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    File,
    Directory,
}

/// ListingEntry 表示数据源返回的一个子条目
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListingEntry {
    /// 条目名称（不含父路径）
    pub name: String,

    /// 相对于数据源根的完整路径，使用 `/` 分隔
    pub path: String,

    pub kind: EntryKind,

    /// 内容寻址的版本标记（例如 git blob SHA），部分数据源在列表阶段不提供
    pub version: Option<String>,
}

impl ListingEntry {
    pub fn file(path: impl Into<String>) -> Self {
        Self::new(path, EntryKind::File)
    }

    pub fn directory(path: impl Into<String>) -> Self {
        Self::new(path, EntryKind::Directory)
    }

    fn new(path: impl Into<String>, kind: EntryKind) -> Self {
        let path = path.into();
        let name = path.rsplit('/').next().unwrap_or_default().to_string();
        Self {
            name,
            path,
            kind,
            version: None,
        }
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }

    pub fn is_dir(&self) -> bool {
        self.kind == EntryKind::Directory
    }
}

/// 读取到的文件内容
#[derive(Debug, Clone)]
pub struct FileContent {
    pub bytes: Vec<u8>,
    pub version: Option<String>,
}

impl FileContent {
    /// 按UTF-8解码（非法字节使用替换字符）
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.bytes).into_owned()
    }
}

/// 文件的历史时间信息
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileHistory {
    pub created_at: DateTime<Utc>,
    pub modified_at: Option<DateTime<Utc>>,
}

/// 数据源错误
#[derive(Error, Debug)]
pub enum SourceError {
    #[error("Path not found: {0}")]
    NotFound(String),

    #[error("Version conflict on {path}: expected {expected}, found {actual}")]
    Conflict {
        path: String,
        expected: String,
        actual: String,
    },

    #[error("Source unavailable: {0}")]
    Unavailable(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// ListingSource 定义扁平文件列表数据源的能力
///
/// 实现可以是版本库的内容API，也可以是本地文件树。所有路径都使用 `/` 分隔，
/// 且相对于数据源自身的根。
#[async_trait]
pub trait ListingSource: Send + Sync {
    /// 数据源标识，会写入每个内容条目的 `provider_id`
    fn provider_id(&self) -> &str;

    /// 列出目录下的直接子条目
    async fn list(&self, path: &str) -> Result<Vec<ListingEntry>, SourceError>;

    /// 读取文件内容及其版本标记
    async fn read_file(&self, path: &str) -> Result<FileContent, SourceError>;

    /// 查询文件的创建与修改时间
    async fn history(&self, path: &str) -> Result<FileHistory, SourceError>;

    /// 写入单个文件
    ///
    /// `expected_version` 存在时执行乐观并发检查，不匹配返回 [`SourceError::Conflict`]。
    /// 成功时返回新的版本标记。
    async fn write_file(
        &self,
        path: &str,
        content: &str,
        expected_version: Option<&str>,
    ) -> Result<String, SourceError>;
}
