//! Kubernetes 服务发现后端
//!
//! 通过 API Server 的 REST 接口列出命名空间内的 Service，
//! 集群内运行时使用 service account 的 token 和 CA。watch 通过轮询对比实现。

use async_trait::async_trait;
use reqwest::Client as HttpClient;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::context::Context;
use crate::discovery::backend::poll::{PollSettings, spawn_poll_watch};
use crate::discovery::config::StrategyConfig;
use crate::discovery::endpoint::{Endpoint, Port, Protocol};
use crate::discovery::filter::Filter;
use crate::discovery::strategy::{DiscoveryStrategy, EventStream};
use crate::error::{Result, ServicesError};

const STRATEGY_NAME: &str = "kubernetes";
const SERVICE_ACCOUNT_TOKEN: &str = "/var/run/secrets/kubernetes.io/serviceaccount/token";
const SERVICE_ACCOUNT_CA: &str = "/var/run/secrets/kubernetes.io/serviceaccount/ca.crt";
const DEFAULT_LABEL_SELECTOR: &str = "app=discovery";

/// 不作为标签暴露的注解
const SKIPPED_ANNOTATIONS: &[&str] = &["kubectl.kubernetes.io/last-applied-configuration"];

/// Kubernetes 服务发现策略
#[derive(Clone)]
pub struct KubernetesStrategy {
    inner: Arc<KubernetesInner>,
}

struct KubernetesInner {
    http_client: HttpClient,
    api_server: String,
    token: Option<String>,
    namespace: String,
    label_selector: String,
    poll: PollSettings,
}

impl KubernetesStrategy {
    /// 从策略配置创建
    ///
    /// API Server 地址优先取配置，其次取集群内环境变量
    /// `KUBERNETES_SERVICE_HOST` / `KUBERNETES_SERVICE_PORT`
    pub fn new(config: &StrategyConfig, poll: PollSettings) -> Result<Self> {
        let api_server = match &config.api_server {
            Some(server) => server.trim_end_matches('/').to_string(),
            None => in_cluster_api_server().ok_or_else(|| {
                ServicesError::config(
                    "kubernetes api_server not configured and not running in cluster",
                )
            })?,
        };

        let mut builder = HttpClient::builder();
        if let Ok(pem) = std::fs::read(SERVICE_ACCOUNT_CA) {
            let cert = reqwest::Certificate::from_pem(&pem)
                .map_err(|e| ServicesError::backend(STRATEGY_NAME, e))?;
            builder = builder.add_root_certificate(cert);
        }
        let http_client = builder
            .build()
            .map_err(|e| ServicesError::backend(STRATEGY_NAME, e))?;

        let token = std::fs::read_to_string(SERVICE_ACCOUNT_TOKEN)
            .ok()
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty());

        Ok(Self {
            inner: Arc::new(KubernetesInner {
                http_client,
                api_server,
                token,
                namespace: config
                    .namespace
                    .clone()
                    .unwrap_or_else(|| "default".to_string()),
                label_selector: config
                    .label_selector
                    .clone()
                    .unwrap_or_else(|| DEFAULT_LABEL_SELECTOR.to_string()),
                poll,
            }),
        })
    }

    pub fn namespace(&self) -> &str {
        &self.inner.namespace
    }

    async fn list(&self, ctx: &Context, filter: &Filter) -> Result<Vec<Endpoint>> {
        ctx.check()?;

        let url = format!(
            "{}/api/v1/namespaces/{}/services",
            self.inner.api_server, self.inner.namespace
        );
        let mut request = self
            .inner
            .http_client
            .get(&url)
            .query(&[("labelSelector", self.inner.label_selector.as_str())]);
        if let Some(token) = &self.inner.token {
            request = request.bearer_auth(token);
        }
        if let Some(remaining) = ctx.remaining() {
            request = request.timeout(remaining);
        }

        let response = tokio::select! {
            biased;
            _ = ctx.done() => return Err(ctx
                .err()
                .unwrap_or_else(|| ServicesError::timeout("context done"))),
            response = request.send() => response,
        };
        let list: ServiceList = response
            .and_then(|r| r.error_for_status())
            .map_err(|e| ServicesError::backend(STRATEGY_NAME, e))?
            .json()
            .await
            .map_err(|e| ServicesError::backend(STRATEGY_NAME, e))?;

        let endpoints = endpoints_from_service_list(list, filter);
        debug!(
            namespace = %self.inner.namespace,
            count = endpoints.len(),
            "Listed kubernetes services"
        );
        Ok(endpoints)
    }
}

#[async_trait]
impl DiscoveryStrategy for KubernetesStrategy {
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
            self.inner.poll,
            move |ctx| {
                let this = this.clone();
                let filter = filter.clone();
                async move { this.list(&ctx, &filter).await }
            },
        ))
    }
}

fn in_cluster_api_server() -> Option<String> {
    let host = std::env::var("KUBERNETES_SERVICE_HOST").ok()?;
    let port = std::env::var("KUBERNETES_SERVICE_PORT").unwrap_or_else(|_| "443".to_string());
    if host.contains(':') {
        Some(format!("https://[{}]:{}", host, port))
    } else {
        Some(format!("https://{}:{}", host, port))
    }
}

#[derive(Debug, Deserialize)]
struct ServiceList {
    #[serde(default)]
    items: Vec<ServiceItem>,
}

#[derive(Debug, Deserialize)]
struct ServiceItem {
    #[serde(default)]
    metadata: ObjectMeta,
    #[serde(default)]
    spec: ServiceSpec,
}

#[derive(Debug, Default, Deserialize)]
struct ObjectMeta {
    #[serde(default)]
    name: String,
    #[serde(default)]
    labels: Option<HashMap<String, String>>,
    #[serde(default)]
    annotations: Option<HashMap<String, String>>,
}

#[derive(Debug, Default, Deserialize)]
struct ServiceSpec {
    #[serde(default, rename = "clusterIP")]
    cluster_ip: Option<String>,
    #[serde(default)]
    ports: Option<Vec<ServicePort>>,
}

#[derive(Debug, Deserialize)]
struct ServicePort {
    #[serde(default)]
    name: Option<String>,
    port: u16,
    #[serde(default)]
    protocol: Option<String>,
}

/// headless service 的 ClusterIP 为 "None"
fn normalize_cluster_ip(ip: Option<String>) -> String {
    match ip {
        Some(ip) if ip != "None" => ip,
        _ => String::new(),
    }
}

fn endpoints_from_service_list(list: ServiceList, filter: &Filter) -> Vec<Endpoint> {
    let mut endpoints = Vec::with_capacity(list.items.len());

    for item in list.items {
        let labels = item.metadata.labels.unwrap_or_default();
        let mut tags = item.metadata.annotations.unwrap_or_default();
        tags.retain(|key, _| !SKIPPED_ANNOTATIONS.contains(&key.as_str()));

        let version = labels
            .get("app.kubernetes.io/version")
            .or_else(|| labels.get("version"))
            .cloned()
            .unwrap_or_default();

        let ports = item
            .spec
            .ports
            .unwrap_or_default()
            .into_iter()
            .map(|p| Port {
                name: p.name.unwrap_or_default(),
                number: p.port,
                protocol: Protocol::parse(p.protocol.as_deref().unwrap_or("")),
            })
            .collect();

        let endpoint = Endpoint {
            name: item.metadata.name,
            address: normalize_cluster_ip(item.spec.cluster_ip),
            ports,
            version,
            tags,
            labels,
        };

        if let Err(e) = endpoint.validate() {
            warn!(error = %e, "Invalid service metadata");
            continue;
        }
        if !filter.matches(&endpoint) {
            continue;
        }
        endpoints.push(endpoint);
    }

    endpoints
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_list() -> ServiceList {
        serde_json::from_value(json!({
            "kind": "ServiceList",
            "items": [
                {
                    "metadata": {
                        "name": "auth",
                        "labels": { "app": "discovery", "app.kubernetes.io/version": "1.4.2" },
                        "annotations": {
                            "env": "prod",
                            "kubectl.kubernetes.io/last-applied-configuration": "{}"
                        }
                    },
                    "spec": {
                        "clusterIP": "10.96.0.12",
                        "ports": [
                            { "name": "grpc", "port": 9090, "protocol": "TCP" },
                            { "name": "metrics", "port": 9100, "protocol": "TCP" }
                        ]
                    }
                },
                {
                    "metadata": { "name": "headless", "labels": { "app": "discovery" } },
                    "spec": { "clusterIP": "None", "ports": [{ "port": 80 }] }
                },
                {
                    "metadata": { "name": "billing", "labels": null },
                    "spec": { "clusterIP": "10.96.0.40", "ports": [{ "name": "dns", "port": 53, "protocol": "UDP" }] }
                }
            ]
        }))
        .unwrap()
    }

    #[test]
    fn test_converts_services() {
        let endpoints = endpoints_from_service_list(sample_list(), &Filter::new());
        let names: Vec<_> = endpoints.iter().map(|e| e.name.as_str()).collect();
        // headless service 没有地址，被跳过
        assert_eq!(names, vec!["auth", "billing"]);

        let auth = &endpoints[0];
        assert_eq!(auth.address, "10.96.0.12");
        assert_eq!(auth.version, "1.4.2");
        assert_eq!(auth.ports.len(), 2);
        assert_eq!(auth.ports[0], Port::tcp("grpc", 9090));
        assert_eq!(auth.tags.get("env").map(String::as_str), Some("prod"));
        assert!(!auth.tags.contains_key("kubectl.kubernetes.io/last-applied-configuration"));

        assert_eq!(endpoints[1].ports[0].protocol, Protocol::Udp);
    }

    #[test]
    fn test_applies_filter() {
        let filter = Filter::new()
            .with_tag("env", "prod")
            .with_label("app", "nothing");
        let endpoints = endpoints_from_service_list(sample_list(), &filter);
        assert_eq!(endpoints.len(), 1);
        assert_eq!(endpoints[0].name, "auth");
    }

    #[tokio::test]
    async fn test_discover_fails_fast_on_expired_context() {
        let strategy = KubernetesStrategy::new(
            &StrategyConfig {
                api_server: Some("http://127.0.0.1:1".to_string()),
                ..StrategyConfig::kubernetes("default")
            },
            PollSettings::default(),
        )
        .unwrap();

        let ctx = Context::new();
        ctx.cancel();
        let err = strategy.discover(&ctx, &Filter::new()).await.unwrap_err();
        assert!(err.is_timeout());
    }
}
