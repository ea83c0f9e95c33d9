use serde::{Deserialize, Serialize};

/// 内容物化配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ContentOptions {
    /// 数据源中的内容根目录，空字符串表示数据源根
    pub root_path: String,

    /// 接受的文件扩展名（忽略大小写，可带或不带 `.`）
    pub extensions: Vec<String>,

    pub include_subdirectories: bool,

    pub enable_localization: bool,

    pub default_locale: String,

    /// 为空时按语言标签格式识别路径首段
    pub supported_locales: Vec<String>,

    /// 目录元数据文件
    pub index_file_name: String,

    /// 占位文件，始终忽略
    pub placeholder_file_name: String,

    /// 并发列表/读取调用的上限
    pub max_concurrency: usize,
}

impl Default for ContentOptions {
    fn default() -> Self {
        Self {
            root_path: String::new(),
            extensions: vec!["md".to_string(), "markdown".to_string()],
            include_subdirectories: true,
            enable_localization: true,
            default_locale: "en".to_string(),
            supported_locales: Vec::new(),
            index_file_name: "_index.md".to_string(),
            placeholder_file_name: ".gitkeep".to_string(),
            max_concurrency: 8,
        }
    }
}

impl ContentOptions {
    pub fn root(&self) -> &str {
        self.root_path.trim_matches('/')
    }

    /// 相对于内容根的路径
    pub fn relative_path<'a>(&self, path: &'a str) -> &'a str {
        let path = path.trim_matches('/');
        let root = self.root();
        if root.is_empty() {
            return path;
        }
        match path.strip_prefix(root) {
            Some("") => "",
            Some(rest) if rest.starts_with('/') => &rest[1..],
            _ => path,
        }
    }

    pub fn is_index_file(&self, name: &str) -> bool {
        name.eq_ignore_ascii_case(&self.index_file_name)
    }

    /// 文件是否作为内容条目处理
    pub fn accepts_file(&self, name: &str) -> bool {
        if self.is_index_file(name) || name.eq_ignore_ascii_case(&self.placeholder_file_name) {
            return false;
        }
        let Some((_, ext)) = name.rsplit_once('.') else {
            return false;
        };
        self.extensions
            .iter()
            .any(|allowed| allowed.trim_start_matches('.').eq_ignore_ascii_case(ext))
    }

    pub fn concurrency(&self) -> usize {
        self.max_concurrency.max(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accepts_file() {
        let options = ContentOptions {
            extensions: vec![".md".to_string(), "mdx".to_string()],
            ..ContentOptions::default()
        };
        assert!(options.accepts_file("post.md"));
        assert!(options.accepts_file("POST.MD"));
        assert!(options.accepts_file("page.mdx"));
        assert!(!options.accepts_file("_index.md"));
        assert!(!options.accepts_file(".gitkeep"));
        assert!(!options.accepts_file("image.png"));
        assert!(!options.accepts_file("README"));
    }

    #[test]
    fn test_relative_path() {
        let options = ContentOptions {
            root_path: "/content/".to_string(),
            ..ContentOptions::default()
        };
        assert_eq!(options.relative_path("content/en/blog/post.md"), "en/blog/post.md");
        assert_eq!(options.relative_path("content"), "");
        assert_eq!(options.relative_path("contents/x.md"), "contents/x.md");
        assert_eq!(ContentOptions::default().relative_path("/en/a.md"), "en/a.md");
    }
}
