//! 公共类型（对外暴露）：结果信封
use serde::Serialize;
use serde_json::{Map, Value};

use crate::error::ScanError;
use crate::findings::Finding;

/// 单个扫描器的结果信封
///
/// 约定 `count == items.len()`；census 例外，`count` 为计数的文件数，`items` 为各分类桶。
#[derive(Debug, Clone, Default, Serialize)]
pub struct ScanResult {
    pub scanner: String,
    pub target: String,
    pub count: usize,
    pub items: Vec<Finding>,
    pub errors: Vec<String>,
    /// 启动类错误（目标缺失等）；存在时该扫描器未执行
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Map::is_empty")]
    pub summary: Map<String, Value>,
    #[serde(skip_serializing_if = "Map::is_empty")]
    pub metadata: Map<String, Value>,
}

impl ScanResult {
    pub fn new(scanner: &str, target: impl Into<String>) -> Self {
        Self { scanner: scanner.to_string(), target: target.into(), ..Default::default() }
    }

    /// 以启动错误构造信封
    pub fn failed(scanner: &str, target: impl Into<String>, err: &ScanError) -> Self {
        tracing::warn!(scanner, error = %err, "scanner setup failed");
        let mut r = Self::new(scanner, target);
        r.error = Some(err.to_string());
        r
    }

    pub fn push(&mut self, finding: Finding) {
        self.items.push(finding);
        self.count = self.items.len();
    }

    pub fn extend(&mut self, findings: impl IntoIterator<Item = Finding>) {
        self.items.extend(findings);
        self.count = self.items.len();
    }

    pub fn record_error(&mut self, err: impl std::fmt::Display) {
        self.errors.push(err.to_string());
    }

    pub fn set_summary<T: Serialize>(&mut self, key: &str, value: T) {
        self.summary.insert(key.to_string(), to_value(value));
    }

    pub fn set_metadata<T: Serialize>(&mut self, key: &str, value: T) {
        self.metadata.insert(key.to_string(), to_value(value));
    }

    pub fn is_failed(&self) -> bool {
        self.error.is_some()
    }
}

fn to_value<T: Serialize>(value: T) -> Value {
    serde_json::to_value(value).unwrap_or(Value::Null)
}
