//! Docker Swarm 服务发现后端
//!
//! 通过 Docker Engine REST API（TCP）查询目标 overlay 网络中的 Swarm 服务，
//! 每个位于该网络上的 VIP 生成一个端点。watch 通过轮询对比实现。

use async_trait::async_trait;
use reqwest::Client as HttpClient;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};

use crate::context::Context;
use crate::discovery::backend::poll::{PollSettings, spawn_poll_watch};
use crate::discovery::config::StrategyConfig;
use crate::discovery::endpoint::{Endpoint, Port, Protocol};
use crate::discovery::filter::Filter;
use crate::discovery::strategy::{DiscoveryStrategy, EventStream};
use crate::error::{Result, ServicesError};

const STRATEGY_NAME: &str = "docker_swarm";
const DEFAULT_DOCKER_HOST: &str = "http://localhost:2375";

/// Docker Swarm 服务发现策略
#[derive(Clone)]
pub struct SwarmStrategy {
    inner: Arc<SwarmInner>,
}

struct SwarmInner {
    http_client: HttpClient,
    host: String,
    network: String,
    poll: PollSettings,
}

impl SwarmStrategy {
    /// 从策略配置创建
    ///
    /// Engine 地址优先取配置中的 `host`，其次取 `DOCKER_HOST`（仅支持 tcp/http）
    pub fn new(config: &StrategyConfig, poll: PollSettings) -> Result<Self> {
        let network = config
            .network
            .clone()
            .filter(|n| !n.is_empty())
            .ok_or_else(|| ServicesError::config("docker_swarm strategy requires a network"))?;

        let raw_host = config
            .host
            .clone()
            .or_else(|| std::env::var("DOCKER_HOST").ok())
            .unwrap_or_else(|| DEFAULT_DOCKER_HOST.to_string());
        let host = normalize_docker_host(&raw_host)?;

        Ok(Self {
            inner: Arc::new(SwarmInner {
                http_client: HttpClient::new(),
                host,
                network,
                poll,
            }),
        })
    }

    pub fn network(&self) -> &str {
        &self.inner.network
    }

    async fn get_json(&self, ctx: &Context, path: &str) -> Result<Value> {
        let url = format!("{}{}", self.inner.host, path);
        let mut request = self.inner.http_client.get(&url);
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

        response
            .and_then(|r| r.error_for_status())
            .map_err(|e| ServicesError::backend(STRATEGY_NAME, e))?
            .json()
            .await
            .map_err(|e| ServicesError::backend(STRATEGY_NAME, e))
    }

    async fn list(&self, ctx: &Context, filter: &Filter) -> Result<Vec<Endpoint>> {
        ctx.check()?;
        info!(swarm_network = %self.inner.network, "Using Docker Swarm strategy for service discovery");

        let networks = self.get_json(ctx, "/networks").await?;
        let network_id = find_network_id(&networks, &self.inner.network).ok_or_else(|| {
            warn!(swarm_network = %self.inner.network, "No matching network found");
            ServicesError::backend(
                STRATEGY_NAME,
                format!("network not found: {}", self.inner.network),
            )
        })?;

        let services = self.get_json(ctx, "/services").await?;
        let endpoints = endpoints_from_services(&services, &network_id, filter);

        if endpoints.is_empty() {
            warn!(swarm_network = %self.inner.network, "No services discovered in the target swarm network");
        }
        for endpoint in &endpoints {
            info!(name = %endpoint.name, address = %endpoint.address, "Discovered service endpoint");
        }

        Ok(endpoints)
    }
}

#[async_trait]
impl DiscoveryStrategy for SwarmStrategy {
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

/// `tcp://host:2375` -> `http://host:2375`；unix socket 不受支持
fn normalize_docker_host(raw: &str) -> Result<String> {
    let host = raw.trim().trim_end_matches('/');
    if let Some(rest) = host.strip_prefix("tcp://") {
        return Ok(format!("http://{}", rest));
    }
    if host.starts_with("http://") || host.starts_with("https://") {
        return Ok(host.to_string());
    }
    if host.starts_with("unix://") || host.starts_with("npipe://") {
        return Err(ServicesError::config(format!(
            "docker host {} is not reachable over http, expose the engine on tcp",
            host
        )));
    }
    Ok(format!("http://{}", host))
}

fn find_network_id(networks: &Value, name: &str) -> Option<String> {
    networks
        .as_array()?
        .iter()
        .find(|n| n["Name"].as_str() == Some(name))
        .and_then(|n| n["Id"].as_str())
        .map(|id| id.to_string())
}

fn string_map(value: &Value) -> HashMap<String, String> {
    value
        .as_object()
        .map(|obj| {
            obj.iter()
                .filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), s.to_string())))
                .collect()
        })
        .unwrap_or_default()
}

/// 镜像标签作为版本：`registry:5000/app:1.2@sha256:...` -> `1.2`
fn image_version(image: &str) -> String {
    let image = image.split('@').next().unwrap_or(image);
    let last_segment = image.rsplit('/').next().unwrap_or(image);
    match last_segment.rsplit_once(':') {
        Some((_, tag)) => tag.to_string(),
        None => String::new(),
    }
}

fn service_ports(service: &Value) -> Vec<Port> {
    let ports = service["Endpoint"]["Ports"]
        .as_array()
        .or_else(|| service["Spec"]["EndpointSpec"]["Ports"].as_array());

    ports
        .map(|ports| {
            ports
                .iter()
                .filter_map(|p| {
                    let number = u16::try_from(p["TargetPort"].as_u64()?).ok()?;
                    let protocol = Protocol::parse(p["Protocol"].as_str().unwrap_or(""));
                    let name = p["Name"]
                        .as_str()
                        .map(|s| s.to_string())
                        .unwrap_or_else(|| format!("{}-{}", protocol.to_string().to_lowercase(), number));
                    Some(Port::new(name, number, protocol))
                })
                .collect()
        })
        .unwrap_or_default()
}

fn endpoints_from_services(services: &Value, network_id: &str, filter: &Filter) -> Vec<Endpoint> {
    let mut endpoints = Vec::new();
    let Some(services) = services.as_array() else {
        return endpoints;
    };

    for service in services {
        let spec = &service["Spec"];
        let Some(name) = spec["Name"].as_str().filter(|n| !n.is_empty()) else {
            continue;
        };

        let labels = string_map(&spec["Labels"]);
        let tags = string_map(&spec["TaskTemplate"]["ContainerSpec"]["Labels"]);
        if !filter.matches_maps(&labels, &tags) {
            continue;
        }

        let version = spec["TaskTemplate"]["ContainerSpec"]["Image"]
            .as_str()
            .map(image_version)
            .unwrap_or_default();
        let ports = service_ports(service);

        let Some(vips) = service["Endpoint"]["VirtualIPs"].as_array() else {
            continue;
        };
        for vip in vips {
            if vip["NetworkID"].as_str() != Some(network_id) {
                continue;
            }
            let address = vip["Addr"]
                .as_str()
                .and_then(|a| a.split('/').next())
                .unwrap_or_default();
            if address.is_empty() {
                continue;
            }
            endpoints.push(Endpoint {
                name: name.to_string(),
                address: address.to_string(),
                ports: ports.clone(),
                version: version.clone(),
                tags: tags.clone(),
                labels: labels.clone(),
            });
        }
    }

    endpoints
}
