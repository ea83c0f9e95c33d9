use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};
use tokio::fs;
use tracing::debug;
use verso_api::{FileContent, FileHistory, ListingEntry, ListingSource, SourceError};

use super::content_version;

/// 本地文件树数据源
///
/// 列表阶段不计算版本标记，读取文件时才返回内容摘要。
pub struct LocalListingSource {
    base_path: PathBuf,
    provider_id: String,
}

impl LocalListingSource {
    pub fn new(base_path: PathBuf) -> Self {
        Self {
            base_path,
            provider_id: "local".to_string(),
        }
    }

    pub fn with_provider_id(mut self, provider_id: impl Into<String>) -> Self {
        self.provider_id = provider_id.into();
        self
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    /// 构建完整文件路径，拒绝跳出根目录的路径
    fn build_path(&self, relative: &str) -> Result<PathBuf, SourceError> {
        let relative = relative.trim_matches('/');
        let mut full = self.base_path.clone();
        for component in Path::new(relative).components() {
            match component {
                Component::Normal(part) => full.push(part),
                Component::CurDir => {}
                _ => return Err(SourceError::NotFound(relative.to_string())),
            }
        }
        Ok(full)
    }
}

fn join(parent: &str, name: &str) -> String {
    let parent = parent.trim_matches('/');
    if parent.is_empty() {
        name.to_string()
    } else {
        format!("{}/{}", parent, name)
    }
}

fn map_io(path: &str, err: std::io::Error) -> SourceError {
    if err.kind() == ErrorKind::NotFound {
        SourceError::NotFound(path.to_string())
    } else {
        SourceError::Io(err)
    }
}

#[async_trait]
impl ListingSource for LocalListingSource {
    fn provider_id(&self) -> &str {
        &self.provider_id
    }

    async fn list(&self, path: &str) -> Result<Vec<ListingEntry>, SourceError> {
        let dir = self.build_path(path)?;
        let mut reader = fs::read_dir(&dir).await.map_err(|e| map_io(path, e))?;

        let mut entries = Vec::new();
        while let Some(entry) = reader.next_entry().await? {
            let name = entry.file_name().to_string_lossy().into_owned();
            let file_type = entry.file_type().await?;
            let child = join(path, &name);
            if file_type.is_dir() {
                entries.push(ListingEntry::directory(child));
            } else if file_type.is_file() {
                entries.push(ListingEntry::file(child));
            }
        }
        entries.sort_by(|a, b| a.name.cmp(&b.name));

        debug!("Listed {} entries under {:?}", entries.len(), dir);
        Ok(entries)
    }

    async fn read_file(&self, path: &str) -> Result<FileContent, SourceError> {
        let full = self.build_path(path)?;
        let bytes = fs::read(&full).await.map_err(|e| map_io(path, e))?;
        let version = content_version(&bytes);
        Ok(FileContent {
            bytes,
            version: Some(version),
        })
    }

    async fn history(&self, path: &str) -> Result<FileHistory, SourceError> {
        let full = self.build_path(path)?;
        let metadata = fs::metadata(&full).await.map_err(|e| map_io(path, e))?;

        let modified = metadata.modified().ok().map(DateTime::<Utc>::from);
        // 部分文件系统不记录创建时间
        let created = metadata
            .created()
            .ok()
            .map(DateTime::<Utc>::from)
            .or(modified)
            .ok_or_else(|| SourceError::Unavailable(format!("No timestamps for {}", path)))?;

        Ok(FileHistory {
            created_at: created,
            modified_at: modified,
        })
    }

    async fn write_file(
        &self,
        path: &str,
        content: &str,
        expected_version: Option<&str>,
    ) -> Result<String, SourceError> {
        let full = self.build_path(path)?;

        if let Some(expected) = expected_version {
            let actual = match fs::read(&full).await {
                Ok(bytes) => content_version(&bytes),
                Err(e) if e.kind() == ErrorKind::NotFound => String::new(),
                Err(e) => return Err(SourceError::Io(e)),
            };
            if actual != expected {
                return Err(SourceError::Conflict {
                    path: path.to_string(),
                    expected: expected.to_string(),
                    actual,
                });
            }
        }

        // 创建父目录
        if let Some(parent) = full.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::write(&full, content.as_bytes()).await?;

        debug!("Wrote {} bytes to {:?}", content.len(), full);
        Ok(content_version(content.as_bytes()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn fixture() -> (TempDir, LocalListingSource) {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("en/blog")).unwrap();
        std::fs::write(dir.path().join("en/blog/post1.md"), "# Post").unwrap();
        std::fs::write(dir.path().join("en/blog/_index.md"), "---\ntitle: Blog\n---\n").unwrap();
        std::fs::write(dir.path().join("en/about.md"), "About").unwrap();
        let source = LocalListingSource::new(dir.path().to_path_buf());
        (dir, source)
    }

    #[tokio::test]
    async fn test_list_is_sorted_with_relative_paths() {
        let (_dir, source) = fixture();

        let root = source.list("").await.unwrap();
        assert_eq!(root.len(), 1);
        assert_eq!(root[0].path, "en");
        assert!(root[0].is_dir());

        let en = source.list("en").await.unwrap();
        let paths: Vec<&str> = en.iter().map(|e| e.path.as_str()).collect();
        assert_eq!(paths, vec!["en/about.md", "en/blog"]);

        let blog = source.list("/en/blog/").await.unwrap();
        let names: Vec<&str> = blog.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["_index.md", "post1.md"]);
        assert!(blog.iter().all(|e| e.version.is_none()));
    }

    #[tokio::test]
    async fn test_missing_paths_map_to_not_found() {
        let (_dir, source) = fixture();
        assert!(matches!(source.list("de").await, Err(SourceError::NotFound(_))));
        assert!(matches!(source.read_file("en/missing.md").await, Err(SourceError::NotFound(_))));
        assert!(matches!(source.read_file("../etc/passwd").await, Err(SourceError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_read_file_returns_content_version() {
        let (_dir, source) = fixture();
        let file = source.read_file("en/blog/post1.md").await.unwrap();
        assert_eq!(file.text(), "# Post");
        assert_eq!(file.version, Some(content_version(b"# Post")));

        let history = source.history("en/blog/post1.md").await.unwrap();
        assert!(history.modified_at.is_some());
    }

    #[tokio::test]
    async fn test_write_file_checks_expected_version() {
        let (dir, source) = fixture();
        let current = content_version(b"About");

        let conflict = source.write_file("en/about.md", "New", Some("stale")).await;
        assert!(matches!(conflict, Err(SourceError::Conflict { ref actual, .. }) if *actual == current));
        assert_eq!(std::fs::read_to_string(dir.path().join("en/about.md")).unwrap(), "About");

        let version = source.write_file("en/about.md", "New", Some(&current)).await.unwrap();
        assert_eq!(version, content_version(b"New"));

        // 新文件无需版本标记，父目录自动创建
        source.write_file("fr/blog/post1.md", "Bonjour", None).await.unwrap();
        assert!(dir.path().join("fr/blog/post1.md").exists());
    }
}
