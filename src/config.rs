//! 配置加载
//!
//! ```toml
//! [discovery]
//! poll_interval_secs = 10
//!
//! [[discovery.strategies]]
//! kind = "kubernetes"
//! namespace = "default"
//!
//! [registry]
//! stop_timeout_secs = 5
//!
//! [runtime]
//! shutdown_timeout_secs = 5
//! ```

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::discovery::config::DiscoveryConfig;
use crate::error::{Result, ServicesError};
use crate::runtime::config::RuntimeConfig;

/// 配置文件路径的环境变量
pub const CONFIG_ENV_VAR: &str = "SERVICES_CONFIG";

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ServicesConfig {
    #[serde(default)]
    pub discovery: DiscoveryConfig,
    #[serde(default)]
    pub registry: RegistryConfig,
    #[serde(default)]
    pub runtime: RuntimeConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RegistryConfig {
    /// 注销时等待 stop 的最长时间
    #[serde(rename = "stop_timeout_secs", with = "duration_secs", default = "default_stop_timeout")]
    pub stop_timeout: Duration,
}

fn default_stop_timeout() -> Duration {
    Duration::from_secs(5)
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            stop_timeout: default_stop_timeout(),
        }
    }
}

impl RegistryConfig {
    pub fn with_stop_timeout(mut self, timeout: Duration) -> Self {
        self.stop_timeout = timeout;
        self
    }
}

impl ServicesConfig {
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            ServicesError::config(format!("failed to read {}: {}", path.display(), e))
        })?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: ServicesConfig = toml::from_str(content)
            .map_err(|e| ServicesError::config(format!("invalid config: {}", e)))?;
        config.discovery.validate()?;
        Ok(config)
    }

    /// 从 `SERVICES_CONFIG` 指定的文件加载，未设置时使用默认配置
    pub fn from_env() -> Result<Self> {
        match std::env::var(CONFIG_ENV_VAR) {
            Ok(path) if !path.trim().is_empty() => Self::load_from_file(path.trim()),
            _ => Ok(Self::default()),
        }
    }
}

/// 以整数秒表示的 `Duration`
pub(crate) mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_secs)
    }
}
