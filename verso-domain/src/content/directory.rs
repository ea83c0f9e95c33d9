use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// DirectoryItem 目录实体
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DirectoryItem {
    pub id: String,

    pub path: String,

    /// 显示名称，默认取路径最后一段，可由目录元数据文件覆盖
    pub name: String,

    pub description: Option<String>,

    pub locale: String,

    #[serde(rename = "sortOrder")]
    pub sort_order: i32,

    pub url: String,

    #[serde(rename = "parentId")]
    pub parent_id: Option<String>,

    /// 子目录ID（父目录持有子目录）
    pub children: Vec<String>,

    /// 目录下的内容条目ID（非持有引用）
    #[serde(rename = "itemIds")]
    pub item_ids: Vec<String>,

    pub metadata: BTreeMap<String, serde_json::Value>,
}

impl DirectoryItem {
    pub fn new(
        id: impl Into<String>,
        path: impl Into<String>,
        name: impl Into<String>,
        locale: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            path: path.into(),
            name: name.into(),
            description: None,
            locale: locale.into(),
            sort_order: 0,
            url: String::new(),
            parent_id: None,
            children: Vec::new(),
            item_ids: Vec::new(),
            metadata: BTreeMap::new(),
        }
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }

    pub fn is_root(&self) -> bool {
        self.parent_id.is_none()
    }
}
