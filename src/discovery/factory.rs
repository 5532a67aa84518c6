//! 服务发现工厂
//!
//! 根据配置实例化发现策略，并构建组合发现器

use std::sync::Arc;
use tracing::info;

use crate::discovery::backend::{DnsStrategy, KubernetesStrategy, SwarmStrategy};
use crate::discovery::composite::CompositeDiscovery;
use crate::discovery::config::{DiscoveryConfig, StrategyConfig, StrategyKind};
use crate::discovery::strategy::DiscoveryStrategy;
use crate::error::Result;

/// 策略工厂
pub struct StrategyFactory;

impl StrategyFactory {
    /// 从单个策略配置创建策略
    ///
    /// `discovery` 提供全局的轮询参数
    pub fn create(
        config: &StrategyConfig,
        discovery: &DiscoveryConfig,
    ) -> Result<Arc<dyn DiscoveryStrategy>> {
        config.validate()?;
        let poll = discovery.poll_settings(config);

        let strategy: Arc<dyn DiscoveryStrategy> = match config.kind {
            StrategyKind::Kubernetes => Arc::new(KubernetesStrategy::new(config, poll)?),
            StrategyKind::DockerSwarm => Arc::new(SwarmStrategy::new(config, poll)?),
            StrategyKind::Dns => Arc::new(DnsStrategy::new(config, poll)?),
        };

        info!(
            strategy = %config.kind,
            target = config.target().unwrap_or_default(),
            interval_secs = poll.interval.as_secs(),
            "Created discovery strategy"
        );
        Ok(strategy)
    }

    /// 按配置顺序创建所有策略，任一失败则整体失败
    pub fn create_all(discovery: &DiscoveryConfig) -> Result<Vec<Arc<dyn DiscoveryStrategy>>> {
        discovery
            .strategies
            .iter()
            .map(|config| Self::create(config, discovery))
            .collect()
    }
}

impl CompositeDiscovery {
    /// 从配置构建组合发现器
    pub fn from_config(config: &DiscoveryConfig) -> Result<Self> {
        config.validate()?;
        let strategies = StrategyFactory::create_all(config)?;
        info!(
            strategies = strategies.len(),
            default_strategy = config.default_strategy.as_deref().unwrap_or("none"),
            "Composite discovery configured"
        );
        Ok(CompositeDiscovery::with_strategies(strategies).with_watch_buffer(config.watch_buffer))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ServicesError;

    #[tokio::test]
    async fn test_create_from_config() {
        let config = DiscoveryConfig {
            strategies: vec![
                StrategyConfig {
                    api_server: Some("http://127.0.0.1:6443".to_string()),
                    ..StrategyConfig::kubernetes("prod")
                },
                StrategyConfig {
                    host: Some("tcp://127.0.0.1:2375".to_string()),
                    ..StrategyConfig::docker_swarm("backend")
                },
            ],
            ..DiscoveryConfig::default()
        };

        let composite = CompositeDiscovery::from_config(&config).unwrap();
        assert_eq!(
            composite.strategy_names().await,
            vec!["kubernetes".to_string(), "docker_swarm".to_string()]
        );
    }

    #[test]
    fn test_missing_target_is_config_error() {
        let config = DiscoveryConfig {
            strategies: vec![StrategyConfig::dns("")],
            ..DiscoveryConfig::default()
        };
        let err = CompositeDiscovery::from_config(&config).err().unwrap();
        assert!(matches!(err, ServicesError::Config(_)));
    }
}
