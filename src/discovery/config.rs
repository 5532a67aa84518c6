//! 服务发现配置

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::time::Duration;

use crate::discovery::backend::poll::PollSettings;
use crate::discovery::composite::DEFAULT_WATCH_BUFFER;
use crate::error::{Result, ServicesError};

/// 默认轮询间隔（秒）
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 10;

/// 服务发现配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveryConfig {
    /// 按顺序实例化的策略列表
    #[serde(default)]
    pub strategies: Vec<StrategyConfig>,

    /// 默认策略（仅用于日志和诊断）
    #[serde(default)]
    pub default_strategy: Option<String>,

    /// 轮询式 watch 的间隔（秒）
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,

    /// 合并事件流的缓冲大小
    #[serde(default = "default_watch_buffer")]
    pub watch_buffer: usize,
}

fn default_poll_interval() -> u64 {
    DEFAULT_POLL_INTERVAL_SECS
}

fn default_watch_buffer() -> usize {
    DEFAULT_WATCH_BUFFER
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            strategies: Vec::new(),
            default_strategy: None,
            poll_interval_secs: DEFAULT_POLL_INTERVAL_SECS,
            watch_buffer: DEFAULT_WATCH_BUFFER,
        }
    }
}

impl DiscoveryConfig {
    /// 某个策略实际使用的轮询参数（策略级配置优先）
    pub fn poll_settings(&self, strategy: &StrategyConfig) -> PollSettings {
        let secs = strategy
            .poll_interval_secs
            .unwrap_or(self.poll_interval_secs)
            .max(1);
        PollSettings {
            interval: Duration::from_secs(secs),
            buffer: self.watch_buffer.max(1),
        }
    }

    /// 校验所有策略配置
    pub fn validate(&self) -> Result<()> {
        for strategy in &self.strategies {
            strategy.validate()?;
        }
        Ok(())
    }
}

/// 策略类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StrategyKind {
    Kubernetes,
    DockerSwarm,
    Dns,
}

impl StrategyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StrategyKind::Kubernetes => "kubernetes",
            StrategyKind::DockerSwarm => "docker_swarm",
            StrategyKind::Dns => "dns",
        }
    }
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for StrategyKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "kubernetes" | "k8s" => Ok(StrategyKind::Kubernetes),
            "docker" | "swarm" | "docker_swarm" => Ok(StrategyKind::DockerSwarm),
            "dns" | "dns_txt" => Ok(StrategyKind::Dns),
            _ => Err(format!("Unknown strategy: {}", s)),
        }
    }
}

impl Serialize for StrategyKind {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for StrategyKind {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// 单个策略配置
///
/// 每种策略只使用与其相关的字段：
/// - kubernetes: `namespace`（默认 "default"）、`label_selector`、`api_server`
/// - docker_swarm: `network`（必填）、`host`
/// - dns: `domain`（必填）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategyConfig {
    pub kind: StrategyKind,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label_selector: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_server: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub poll_interval_secs: Option<u64>,
}

impl StrategyConfig {
    fn empty(kind: StrategyKind) -> Self {
        Self {
            kind,
            namespace: None,
            label_selector: None,
            api_server: None,
            network: None,
            host: None,
            domain: None,
            poll_interval_secs: None,
        }
    }

    pub fn kubernetes(namespace: impl Into<String>) -> Self {
        Self {
            namespace: Some(namespace.into()),
            ..Self::empty(StrategyKind::Kubernetes)
        }
    }

    pub fn docker_swarm(network: impl Into<String>) -> Self {
        Self {
            network: Some(network.into()),
            ..Self::empty(StrategyKind::DockerSwarm)
        }
    }

    pub fn dns(domain: impl Into<String>) -> Self {
        Self {
            domain: Some(domain.into()),
            ..Self::empty(StrategyKind::Dns)
        }
    }

    /// 后端特定的目标标识（命名空间 / 网络 / 域名）
    pub fn target(&self) -> Option<&str> {
        match self.kind {
            StrategyKind::Kubernetes => Some(self.namespace.as_deref().unwrap_or("default")),
            StrategyKind::DockerSwarm => self.network.as_deref(),
            StrategyKind::Dns => self.domain.as_deref(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        match self.target() {
            Some(target) if !target.trim().is_empty() => Ok(()),
            _ => Err(ServicesError::config(format!(
                "{} strategy requires a {}",
                self.kind,
                match self.kind {
                    StrategyKind::Kubernetes => "namespace",
                    StrategyKind::DockerSwarm => "network",
                    StrategyKind::Dns => "domain",
                }
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_aliases() {
        assert_eq!("k8s".parse::<StrategyKind>().unwrap(), StrategyKind::Kubernetes);
        assert_eq!("Docker".parse::<StrategyKind>().unwrap(), StrategyKind::DockerSwarm);
        assert_eq!("docker-swarm".parse::<StrategyKind>().unwrap(), StrategyKind::DockerSwarm);
        assert_eq!("dns".parse::<StrategyKind>().unwrap(), StrategyKind::Dns);
        assert!("consul".parse::<StrategyKind>().is_err());
    }

    #[test]
    fn test_validate_targets() {
        assert!(StrategyConfig::kubernetes("prod").validate().is_ok());
        assert!(StrategyConfig::empty(StrategyKind::Kubernetes).validate().is_ok());
        assert!(StrategyConfig::empty(StrategyKind::DockerSwarm).validate().is_err());
        assert!(StrategyConfig::dns("").validate().is_err());
    }

    #[test]
    fn test_poll_settings_override() {
        let config = DiscoveryConfig::default();
        let mut dns = StrategyConfig::dns("_svc.example.com");
        assert_eq!(config.poll_settings(&dns).interval, Duration::from_secs(10));
        dns.poll_interval_secs = Some(3);
        assert_eq!(config.poll_settings(&dns).interval, Duration::from_secs(3));
    }

    #[test]
    fn test_poll_settings_use_watch_buffer() {
        let config = DiscoveryConfig {
            watch_buffer: 16,
            ..DiscoveryConfig::default()
        };
        let dns = StrategyConfig::dns("_svc.example.com");
        assert_eq!(config.poll_settings(&dns).buffer, 16);

        let zero = DiscoveryConfig {
            watch_buffer: 0,
            ..DiscoveryConfig::default()
        };
        assert_eq!(zero.poll_settings(&dns).buffer, 1);
    }
}
