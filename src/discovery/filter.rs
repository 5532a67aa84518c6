//! 端点过滤器
//!
//! 匹配规则：`match_tags(E, F) || match_labels(E, F)`。
//! 每一侧都要求过滤器中的所有键在端点对应的 map 中存在且值相等；
//! 空 map 视为满足（vacuous truth），因此只要任意一侧为空，过滤器就匹配。

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use super::endpoint::Endpoint;

/// 端点过滤器
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Filter {
    #[serde(default)]
    pub labels: HashMap<String, String>,
    #[serde(default)]
    pub tags: HashMap<String, String>,
}

impl Filter {
    /// 空过滤器，匹配所有端点
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty() && self.tags.is_empty()
    }

    /// 检查端点是否匹配
    pub fn matches(&self, endpoint: &Endpoint) -> bool {
        self.matches_maps(&endpoint.labels, &endpoint.tags)
    }

    /// 针对后端原生的 labels / tags 进行匹配（在构造端点之前过滤）
    pub fn matches_maps(
        &self,
        labels: &HashMap<String, String>,
        tags: &HashMap<String, String>,
    ) -> bool {
        match_subset(tags, &self.tags) || match_subset(labels, &self.labels)
    }

    /// 按过滤器筛选端点，保持原有顺序
    pub fn apply(&self, endpoints: Vec<Endpoint>) -> Vec<Endpoint> {
        endpoints.into_iter().filter(|e| self.matches(e)).collect()
    }
}

/// `wanted` 中的每个键都必须在 `actual` 中存在且值相等
pub fn match_subset(actual: &HashMap<String, String>, wanted: &HashMap<String, String>) -> bool {
    wanted
        .iter()
        .all(|(key, value)| actual.get(key).is_some_and(|v| v == value))
}
