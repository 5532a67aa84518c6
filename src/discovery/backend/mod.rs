//! 服务发现后端实现
//!
//! 每个后端都实现 [`DiscoveryStrategy`](crate::discovery::DiscoveryStrategy)：
//! - kubernetes：命名空间内的 Service
//! - docker_swarm：overlay 网络上的 Swarm 服务
//! - dns：域名下的 TXT 记录
//!
//! 三者都没有增量推送，watch 统一使用 [`poll`] 中的轮询对比实现。

pub mod dns;
pub mod kubernetes;
pub mod poll;
pub mod swarm;

pub use dns::{DnsStrategy, SystemTxtResolver, TxtResolver, parse_txt_record};
pub use kubernetes::KubernetesStrategy;
pub use poll::{PollSettings, diff_snapshot, spawn_poll_watch};
pub use swarm::SwarmStrategy;
