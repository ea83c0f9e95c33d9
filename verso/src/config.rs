use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use verso_infra::cache::CacheOptions;
use verso_service::content::ContentOptions;

use crate::error::Result;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    /// 未配置时只使用进程内缓存
    pub redis: Option<RedisConfig>,
    pub source: SourceConfig,
    pub cache: CacheOptions,
    pub content: ContentOptions,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub port: u16,
    pub host: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 8090,
            host: "0.0.0.0".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RedisConfig {
    pub url: String,
    pub namespace: String,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: "redis://localhost:6379".to_string(),
            namespace: "verso:".to_string(),
        }
    }
}

/// 本地文件树数据源
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    pub base_path: PathBuf,
    pub provider_id: String,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            base_path: PathBuf::from("."),
            provider_id: "local".to_string(),
        }
    }
}

impl Config {
    /// 依次叠加 `verso.toml`、`~/.verso/verso.toml` 与 `VERSO__*` 环境变量
    pub fn load() -> Result<Self> {
        // 如果存在.env文件，先把它加载进环境变量
        if let Err(e) = dotenv::dotenv() {
            tracing::debug!("No .env file loaded: {}", e);
        }

        let home_dir = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
        let config_path = home_dir.join(".verso").join("verso.toml");

        let config = config::Config::builder()
            .add_source(config::File::with_name("verso.toml").required(false))
            .add_source(config::File::from(config_path.as_path()).required(false))
            .add_source(config::Environment::with_prefix("VERSO").separator("__"))
            .build()?;
        Ok(config.try_deserialize()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.server.port, 8090);
        assert!(config.redis.is_none());
        assert_eq!(config.source.provider_id, "local");
        assert!(config.cache.enabled);
        assert_eq!(config.content.index_file_name, "_index.md");
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config: Config = config::Config::builder()
            .add_source(config::File::from_str(
                "[server]\nport = 9000\n\n[redis]\nurl = \"redis://cache:6379\"\n\n[content]\nroot_path = \"content\"\nsupported_locales = [\"en\", \"fr\"]\n",
                config::FileFormat::Toml,
            ))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();

        assert_eq!(config.server.port, 9000);
        assert_eq!(config.server.host, "0.0.0.0");
        let redis = config.redis.unwrap();
        assert_eq!(redis.url, "redis://cache:6379");
        assert_eq!(redis.namespace, "verso:");
        assert_eq!(config.content.root_path, "content");
        assert_eq!(config.content.supported_locales, vec!["en", "fr"]);
        assert_eq!(config.content.max_concurrency, 8);
    }
}
