//! 服务端点定义

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

use crate::error::{Result, ServicesError};

/// 端口协议
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Protocol {
    Tcp,
    Udp,
    /// 其他协议（如 SCTP），保留原始字符串
    #[serde(untagged)]
    Other(String),
}

impl Protocol {
    /// 解析协议字符串（大小写不敏感），空字符串视为 TCP
    pub fn parse(s: &str) -> Self {
        match s.trim().to_uppercase().as_str() {
            "" | "TCP" => Protocol::Tcp,
            "UDP" => Protocol::Udp,
            other => Protocol::Other(other.to_string()),
        }
    }
}

impl Default for Protocol {
    fn default() -> Self {
        Protocol::Tcp
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Protocol::Tcp => f.write_str("TCP"),
            Protocol::Udp => f.write_str("UDP"),
            Protocol::Other(p) => f.write_str(p),
        }
    }
}

/// 端点暴露的端口
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Port {
    /// 端口名称（如 "http", "grpc"）
    pub name: String,

    /// 端口号
    pub number: u16,

    /// 协议
    pub protocol: Protocol,
}

impl Port {
    pub fn new(name: impl Into<String>, number: u16, protocol: Protocol) -> Self {
        Self {
            name: name.into(),
            number,
            protocol,
        }
    }

    pub fn tcp(name: impl Into<String>, number: u16) -> Self {
        Self::new(name, number, Protocol::Tcp)
    }
}

/// 服务端点
///
/// 由发现策略在每次 discover / watch 时创建，构造后不再修改；
/// 同名端点的后续观察结果以新值替换旧值。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoint {
    /// 服务名称（在单个发现范围内唯一）
    pub name: String,

    /// IP 或主机名
    pub address: String,

    /// 暴露的端口（保持后端返回的顺序）
    pub ports: Vec<Port>,

    /// 版本
    #[serde(default)]
    pub version: String,

    /// 标签（注解、容器标签、TXT 属性等）
    #[serde(default)]
    pub tags: HashMap<String, String>,

    /// 后端原生 labels（Kubernetes metadata.labels、Swarm Spec.Labels）
    #[serde(default)]
    pub labels: HashMap<String, String>,
}

impl Endpoint {
    /// 创建新的端点
    pub fn new(name: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            address: address.into(),
            ports: Vec::new(),
            version: String::new(),
            tags: HashMap::new(),
            labels: HashMap::new(),
        }
    }

    /// 添加端口
    pub fn with_port(mut self, port: Port) -> Self {
        self.ports.push(port);
        self
    }

    /// 设置版本
    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    /// 添加标签
    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    /// 添加 label
    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    /// 按名称查找端口
    pub fn port(&self, name: &str) -> Option<&Port> {
        self.ports.iter().find(|p| p.name == name)
    }

    /// 第一个端口的 `address:port`
    pub fn primary_address(&self) -> Option<String> {
        self.ports
            .first()
            .map(|p| format!("{}:{}", self.address, p.number))
    }

    /// 检查必需字段是否齐全
    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(ServicesError::InvalidEndpoint("missing name".to_string()));
        }
        if self.address.is_empty() {
            return Err(ServicesError::InvalidEndpoint(format!(
                "{}: missing address",
                self.name
            )));
        }
        if self.ports.is_empty() {
            return Err(ServicesError::InvalidEndpoint(format!(
                "{}: missing ports",
                self.name
            )));
        }
        Ok(())
    }
}

/// 服务事件类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum EventKind {
    Added,
    Modified,
    Deleted,
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventKind::Added => f.write_str("ADDED"),
            EventKind::Modified => f.write_str("MODIFIED"),
            EventKind::Deleted => f.write_str("DELETED"),
        }
    }
}

/// 服务变更事件，仅在 watch 流中传递，不做持久化
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceEvent {
    pub kind: EventKind,
    pub endpoint: Endpoint,
}

impl ServiceEvent {
    pub fn added(endpoint: Endpoint) -> Self {
        Self {
            kind: EventKind::Added,
            endpoint,
        }
    }

    pub fn modified(endpoint: Endpoint) -> Self {
        Self {
            kind: EventKind::Modified,
            endpoint,
        }
    }

    pub fn deleted(endpoint: Endpoint) -> Self {
        Self {
            kind: EventKind::Deleted,
            endpoint,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_protocol_parse() {
        assert_eq!(Protocol::parse("tcp"), Protocol::Tcp);
        assert_eq!(Protocol::parse("Udp"), Protocol::Udp);
        assert_eq!(Protocol::parse(""), Protocol::Tcp);
        assert_eq!(Protocol::parse("sctp"), Protocol::Other("SCTP".to_string()));
    }

    #[test]
    fn test_validate() {
        let ok = Endpoint::new("auth", "10.0.0.1").with_port(Port::tcp("grpc", 9090));
        assert!(ok.validate().is_ok());
        assert_eq!(ok.primary_address().as_deref(), Some("10.0.0.1:9090"));

        assert!(Endpoint::new("", "10.0.0.1").validate().is_err());
        assert!(Endpoint::new("auth", "").validate().is_err());
        assert!(Endpoint::new("auth", "10.0.0.1").validate().is_err());
    }

    #[test]
    fn test_event_kind_serialization() {
        let event = ServiceEvent::deleted(Endpoint::new("auth", "10.0.0.1"));
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["kind"], "DELETED");
    }
}
