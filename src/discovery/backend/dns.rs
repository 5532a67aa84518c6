//! DNS TXT 服务发现后端
//!
//! 查询配置域名的 TXT 记录，每条记录描述一个端点：
//!
//! ```text
//! name=auth,address=10.0.0.12,version=1.4.0,ports=grpc:9090/tcp;metrics:9100,env=prod
//! ```
//!
//! `name`、`address`、`version`、`ports` 为保留键，其余键值对作为 tags。
//! `ports` 的格式为 `名称:端口[/协议]`，多个端口用 `;` 分隔，协议缺省为 TCP。

use async_trait::async_trait;
use hickory_resolver::TokioAsyncResolver;
use hickory_resolver::config::{ResolverConfig, ResolverOpts};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::context::Context;
use crate::discovery::backend::poll::{PollSettings, spawn_poll_watch};
use crate::discovery::config::StrategyConfig;
use crate::discovery::endpoint::{Endpoint, Port, Protocol};
use crate::discovery::filter::Filter;
use crate::discovery::strategy::{DiscoveryStrategy, EventStream};
use crate::error::{BoxError, Result, ServicesError};

const STRATEGY_NAME: &str = "dns";

/// TXT 记录解析器
#[async_trait]
pub trait TxtResolver: Send + Sync {
    /// 返回域名下的所有 TXT 记录（多段字符串已拼接）
    async fn lookup_txt(&self, domain: &str) -> std::result::Result<Vec<String>, BoxError>;
}

/// 基于系统 DNS 配置的解析器
pub struct SystemTxtResolver {
    resolver: TokioAsyncResolver,
}

impl SystemTxtResolver {
    /// 读取系统配置（/etc/resolv.conf），失败时回退到默认上游
    pub fn new() -> Self {
        let resolver = match TokioAsyncResolver::tokio_from_system_conf() {
            Ok(resolver) => resolver,
            Err(e) => {
                warn!(error = %e, "Failed to load system resolver config, using defaults");
                TokioAsyncResolver::tokio(ResolverConfig::default(), ResolverOpts::default())
            }
        };
        Self { resolver }
    }
}

impl Default for SystemTxtResolver {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TxtResolver for SystemTxtResolver {
    async fn lookup_txt(&self, domain: &str) -> std::result::Result<Vec<String>, BoxError> {
        let lookup = self.resolver.txt_lookup(domain).await?;
        Ok(lookup
            .iter()
            .map(|txt| {
                txt.txt_data()
                    .iter()
                    .map(|chunk| String::from_utf8_lossy(chunk))
                    .collect::<String>()
            })
            .collect())
    }
}

/// DNS TXT 服务发现策略
#[derive(Clone)]
pub struct DnsStrategy {
    domain: String,
    resolver: Arc<dyn TxtResolver>,
    poll: PollSettings,
}

impl DnsStrategy {
    pub fn new(config: &StrategyConfig, poll: PollSettings) -> Result<Self> {
        let domain = config
            .domain
            .clone()
            .filter(|d| !d.trim().is_empty())
            .ok_or_else(|| ServicesError::config("dns strategy requires a domain"))?;
        Ok(Self::with_resolver(
            domain,
            Arc::new(SystemTxtResolver::new()),
            poll,
        ))
    }

    /// 使用自定义解析器创建
    pub fn with_resolver(
        domain: impl Into<String>,
        resolver: Arc<dyn TxtResolver>,
        poll: PollSettings,
    ) -> Self {
        Self {
            domain: domain.into(),
            resolver,
            poll,
        }
    }

    pub fn domain(&self) -> &str {
        &self.domain
    }

    async fn list(&self, ctx: &Context, filter: &Filter) -> Result<Vec<Endpoint>> {
        ctx.check()?;

        let records = tokio::select! {
            biased;
            _ = ctx.done() => return Err(ctx
                .err()
                .unwrap_or_else(|| ServicesError::timeout("context done"))),
            records = self.resolver.lookup_txt(&self.domain) => records,
        };
        let records = records.map_err(|e| {
            warn!(domain = %self.domain, error = %e, "DNS lookup failed");
            ServicesError::backend(STRATEGY_NAME, e)
        })?;

        let mut endpoints = Vec::with_capacity(records.len());
        for record in &records {
            let endpoint = parse_txt_record(record);
            if let Err(e) = endpoint.validate() {
                warn!(record = %record, error = %e, "Skipping malformed TXT record");
                continue;
            }
            if filter.matches(&endpoint) {
                endpoints.push(endpoint);
            }
        }

        debug!(domain = %self.domain, records = records.len(), count = endpoints.len(), "Resolved TXT records");
        Ok(endpoints)
    }
}

#[async_trait]
impl DiscoveryStrategy for DnsStrategy {
    fn name(&self) -> &str {
        STRATEGY_NAME
    }

    async fn discover(&self, ctx: &Context, filter: &Filter) -> Result<Vec<Endpoint>> {
        self.list(ctx, filter).await
    }

    async fn watch(&self, ctx: &Context, filter: &Filter) -> Result<EventStream> {
        ctx.check()?;
        let this = self.clone();
        let filter = filter.clone();
        Ok(spawn_poll_watch(
            STRATEGY_NAME,
            ctx.clone(),
            self.poll,
            move |ctx| {
                let this = this.clone();
                let filter = filter.clone();
                async move { this.list(&ctx, &filter).await }
            },
        ))
    }
}

/// 解析一条 TXT 记录，不做必需字段校验
pub fn parse_txt_record(record: &str) -> Endpoint {
    let mut endpoint = Endpoint::new("", "");

    for part in record.split(',') {
        let Some((key, value)) = part.split_once('=') else {
            continue;
        };
        let (key, value) = (key.trim(), value.trim());
        match key {
            "name" => endpoint.name = value.to_string(),
            "address" => endpoint.address = value.to_string(),
            "version" => endpoint.version = value.to_string(),
            "ports" => endpoint.ports = parse_ports(value),
            _ if !key.is_empty() => {
                endpoint.tags.insert(key.to_string(), value.to_string());
            }
            _ => {}
        }
    }

    endpoint
}

fn parse_ports(value: &str) -> Vec<Port> {
    value
        .split(';')
        .filter_map(|spec| {
            let (name, rest) = spec.trim().split_once(':')?;
            let (number, protocol) = match rest.split_once('/') {
                Some((number, protocol)) => (number, Protocol::parse(protocol)),
                None => (rest, Protocol::Tcp),
            };
            let number = number.trim().parse::<u16>().ok()?;
            Some(Port::new(name.trim(), number, protocol))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct FakeResolver {
        answers: Mutex<Vec<std::result::Result<Vec<String>, String>>>,
    }

    impl FakeResolver {
        fn new(answers: Vec<std::result::Result<Vec<String>, String>>) -> Arc<Self> {
            Arc::new(Self {
                answers: Mutex::new(answers),
            })
        }
    }

    #[async_trait]
    impl TxtResolver for FakeResolver {
        async fn lookup_txt(&self, _domain: &str) -> std::result::Result<Vec<String>, BoxError> {
            let mut answers = self.answers.lock().unwrap();
            let answer = if answers.len() > 1 {
                answers.remove(0)
            } else {
                answers[0].clone()
            };
            answer.map_err(Into::into)
        }
    }

    #[test]
    fn test_parse_txt_record() {
        let endpoint = parse_txt_record(
            "name=auth,address=10.0.0.12,version=1.4.0,ports=grpc:9090/tcp;dns:53/udp;http:8080,env=prod",
        );
        assert_eq!(endpoint.name, "auth");
        assert_eq!(endpoint.address, "10.0.0.12");
        assert_eq!(endpoint.version, "1.4.0");
        assert_eq!(
            endpoint.ports,
            vec![
                Port::tcp("grpc", 9090),
                Port::new("dns", 53, Protocol::Udp),
                Port::tcp("http", 8080),
            ]
        );
        assert_eq!(endpoint.tags.len(), 1);
        assert_eq!(endpoint.tags.get("env").map(String::as_str), Some("prod"));
    }

    #[test]
    fn test_parse_ignores_garbage() {
        let endpoint = parse_txt_record("name=x,,noequals,ports=bad;http:notanumber;ok:80");
        assert_eq!(endpoint.name, "x");
        assert_eq!(endpoint.ports, vec![Port::tcp("ok", 80)]);
        assert!(endpoint.tags.is_empty());
        assert!(endpoint.validate().is_err());
    }

    #[tokio::test]
    async fn test_discover_skips_invalid_and_filters() {
        let resolver = FakeResolver::new(vec![Ok(vec![
            "name=auth,address=10.0.0.1,ports=http:80,env=prod".to_string(),
            "name=billing,address=10.0.0.2,ports=http:80,env=dev".to_string(),
            "env=prod".to_string(),
        ])]);
        let strategy =
            DnsStrategy::with_resolver("_svc.example.com", resolver, PollSettings::default());

        let all = strategy.discover(&Context::new(), &Filter::new()).await.unwrap();
        assert_eq!(all.len(), 2);

        let prod = strategy
            .discover(&Context::new(), &Filter::new().with_tag("env", "prod").with_label("x", "y"))
            .await
            .unwrap();
        assert_eq!(prod.len(), 1);
        assert_eq!(prod[0].name, "auth");
    }

    #[tokio::test]
    async fn test_lookup_failure_is_backend_error() {
        let resolver = FakeResolver::new(vec![Err("no such domain".to_string())]);
        let strategy =
            DnsStrategy::with_resolver("_svc.example.com", resolver, PollSettings::default());

        let err = strategy
            .discover(&Context::new(), &Filter::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ServicesError::BackendFailure { .. }));
    }

    #[test]
    fn test_new_requires_domain() {
        let config = StrategyConfig::dns(" ");
        assert!(DnsStrategy::new(&config, PollSettings::default()).is_err());
    }
}
