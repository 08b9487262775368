//! 命中项（Finding）
use serde::Serialize;
use serde_json::{Map, Value};

/// 单条扫描输出：位置 + 类别 + 扫描器自定义负载
///
/// 负载以扁平方式与 `path`/`line`/`kind` 并列序列化。
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Finding {
    pub path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub line: Option<usize>,
    pub kind: String,
    #[serde(flatten)]
    pub payload: Map<String, Value>,
}

impl Finding {
    pub fn new(path: impl Into<String>, kind: impl Into<String>) -> Self {
        Self { path: path.into(), line: None, kind: kind.into(), payload: Map::new() }
    }

    pub fn at_line(mut self, line: usize) -> Self {
        self.line = Some(line);
        self
    }

    /// 将任意可序列化记录并入负载；非对象类型挂在 `value` 键下
    pub fn with_payload<T: Serialize>(mut self, record: &T) -> Self {
        match serde_json::to_value(record) {
            Ok(Value::Object(map)) => {
                for (k, v) in map {
                    // 公共字段以外层为准
                    if matches!(k.as_str(), "path" | "line" | "kind") {
                        continue;
                    }
                    self.payload.insert(k, v);
                }
            }
            Ok(other) => {
                self.payload.insert("value".to_string(), other);
            }
            Err(e) => {
                self.payload.insert("payload_error".to_string(), Value::String(e.to_string()));
            }
        }
        self
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.payload.get(key)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.payload.get(key).and_then(Value::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[derive(Serialize)]
    struct Rec {
        status: &'static str,
        kind: &'static str,
    }

    #[test]
    fn test_payload_is_flattened() {
        let f = Finding::new("a/b.py", "http").at_line(3).with_payload(&Rec { status: "missing", kind: "ignored" });
        let v = serde_json::to_value(&f).unwrap();
        assert_eq!(v, json!({"path": "a/b.py", "line": 3, "kind": "http", "status": "missing"}));
    }
}
