//! 配置文件加载（TOML）
//!
//! 所有字段均可缺省，缺失时回退到内置默认值；扫描参数（ScanParams）在单次调用中优先于配置。
use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// 默认配置文件名
pub const CONFIG_FILE_NAME: &str = "omni.toml";

/// 默认单文件大小上限：1 MiB
pub const DEFAULT_MAX_FILE_SIZE: u64 = 1024 * 1024;

/// 顶层配置
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub scan: ScanSection,
    pub content: ContentSection,
    pub surfaces: SurfacesSection,
    pub census: CensusSection,
    pub uuids: UuidsSection,
}

/// 通用遍历参数
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ScanSection {
    /// 目录名黑名单（命中即剪枝，不进入）
    pub exclude_dirs: Vec<String>,
    /// 路径片段黑名单（完整路径包含即跳过）
    pub exclude_phrases: Vec<String>,
    /// 单文件大小上限（字节）
    pub max_file_size: u64,
    /// 线程数：缺省为 CPU 核数
    pub threads: Option<usize>,
}

impl Default for ScanSection {
    fn default() -> Self {
        Self {
            exclude_dirs: to_strings(&[
                "node_modules", ".git", ".venv", "venv", "dist", "build", "__pycache__",
                ".next", "coverage", "htmlcov", "site-packages", "target",
            ]),
            exclude_phrases: to_strings(&["site-packages", "superseded", "backup", "deprecated", "_old"]),
            max_file_size: DEFAULT_MAX_FILE_SIZE,
            threads: None,
        }
    }
}

/// 关键词分类（保持配置顺序）
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct KeywordSet {
    pub category: String,
    pub keywords: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ContentSection {
    pub keyword_sets: Vec<KeywordSet>,
    pub sample_size: usize,
}

impl Default for ContentSection {
    fn default() -> Self {
        let sets: &[(&str, &[&str])] = &[
            ("codecraft", &["codecraft", "ritual", "arcane", "::invoke:", "let it bind"]),
            ("federation", &["federation", "station", "nexus", "spine", "seraphina"]),
            ("council", &["council", "ace", "mega", "oracle", "claude", "deepscribe"]),
            ("protocols", &["protocol", "procedure", "workflow", "ADR"]),
            ("blueprints", &["blueprint", "architecture", "design", "spec"]),
            ("lore", &["lore", "chronicle", "story", "narrative"]),
        ];
        Self {
            keyword_sets: sets
                .iter()
                .map(|(c, k)| KeywordSet { category: c.to_string(), keywords: to_strings(k) })
                .collect(),
            sample_size: 2048,
        }
    }
}

/// 契约族：某类 surface 默认挂靠的契约引用与兜底状态
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct ContractFamily {
    pub reference: String,
    #[serde(default = "default_family_status")]
    pub status: String,
}

fn default_family_status() -> String {
    "partial".to_string()
}

/// 按项目名匹配的人工覆盖规则
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct SurfaceOverride {
    /// 项目名（小写）包含该片段即命中
    pub project_contains: String,
    /// 仅作用于某类 surface；缺省则作用于全部
    #[serde(default)]
    pub kind: Option<String>,
    pub status: String,
    /// 为 true 时只把 missing 提升为 `status`，不覆盖更高的判定
    #[serde(default)]
    pub only_if_missing: bool,
    /// 附加到契约引用上的后缀
    #[serde(default)]
    pub reference: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SurfacesSection {
    pub contract_families: BTreeMap<String, ContractFamily>,
    pub overrides: Vec<SurfaceOverride>,
    pub external_markers: Vec<String>,
}

impl Default for SurfacesSection {
    fn default() -> Self {
        Self {
            contract_families: BTreeMap::new(),
            overrides: vec![
                SurfaceOverride {
                    project_contains: "scribes-anvil".to_string(),
                    kind: Some("mcp".to_string()),
                    status: "exists".to_string(),
                    only_if_missing: false,
                    reference: Some("C-MCP-SCRIBE-001".to_string()),
                },
                SurfaceOverride {
                    project_contains: "orchestration".to_string(),
                    kind: None,
                    status: "partial".to_string(),
                    only_if_missing: true,
                    reference: Some("C-SYS-ORCH-001".to_string()),
                },
            ],
            external_markers: to_strings(&["external", "Serena"]),
        }
    }
}

/// census 的 workspace 维度：标签 -> 路径片段
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct WorkspacePattern {
    pub label: String,
    pub contains: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CensusSection {
    pub workspaces: Vec<WorkspacePattern>,
}

impl Default for CensusSection {
    fn default() -> Self {
        let labels = ["Infrastructure", "Workspace", "Deployment", "Projects"];
        Self {
            workspaces: labels
                .iter()
                .map(|l| WorkspacePattern { label: l.to_string(), contains: vec![l.to_string()] })
                .collect(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct UuidsSection {
    /// 规范 UUID 列表文件（YAML/JSON 字符串数组），仅用于交叉标记
    pub canonical: Option<PathBuf>,
}

/// 从指定 TOML 文件加载配置
pub fn load_config(path: &Path) -> Result<Config> {
    let txt = std::fs::read_to_string(path).with_context(|| format!("read config {}", path.display()))?;
    let parsed: Config = toml::from_str(&txt).with_context(|| format!("parse config {}", path.display()))?;
    Ok(parsed)
}

/// 查找配置：显式路径 → `<root>/omni.toml` → `<root>/../omni.toml` → 内置默认
pub fn resolve_config(explicit: Option<&Path>, root: &Path) -> Result<Config> {
    if let Some(p) = explicit {
        return load_config(p);
    }
    let mut candidates = vec![root.join(CONFIG_FILE_NAME)];
    if let Some(parent) = root.parent() {
        candidates.push(parent.join(CONFIG_FILE_NAME));
    }
    for c in candidates {
        if c.is_file() {
            tracing::debug!(path = %c.display(), "loading config");
            return load_config(&c);
        }
    }
    Ok(Config::default())
}

/// 读取规范 UUID 列表（YAML 可兼容 JSON 数组）
pub fn load_canonical_uuids(path: &Path) -> Result<Vec<String>> {
    let txt = std::fs::read_to_string(path).with_context(|| format!("read canonical uuids {}", path.display()))?;
    let list: Vec<String> = serde_yaml::from_str(&txt).context("parse canonical uuid list")?;
    Ok(list.into_iter().map(|s| s.trim().to_lowercase()).collect())
}

fn to_strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults_when_missing() {
        let dir = TempDir::new().unwrap();
        let cfg = resolve_config(None, dir.path()).unwrap();
        assert_eq!(cfg.scan.max_file_size, DEFAULT_MAX_FILE_SIZE);
        assert_eq!(cfg.content.sample_size, 2048);
        assert_eq!(cfg.content.keyword_sets[0].category, "codecraft");
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let dir = TempDir::new().unwrap();
        std::fs::write(
            dir.path().join(CONFIG_FILE_NAME),
            r#"
[scan]
max_file_size = 4096

[[content.keyword_sets]]
category = "ops"
keywords = ["deploy"]

[surfaces.contract_families.http]
reference = "C-HTTP-BASE-001"
"#,
        )
        .unwrap();
        let cfg = resolve_config(None, dir.path()).unwrap();
        assert_eq!(cfg.scan.max_file_size, 4096);
        assert!(cfg.scan.exclude_dirs.iter().any(|d| d == "node_modules"));
        assert_eq!(cfg.content.keyword_sets.len(), 1);
        assert_eq!(cfg.surfaces.contract_families["http"].status, "partial");
    }

    #[test]
    fn test_canonical_list() {
        let dir = TempDir::new().unwrap();
        let p = dir.path().join("canon.yaml");
        std::fs::write(&p, "- 3F2504E0-4F89-11D3-9A0C-0305E82C3301\n").unwrap();
        let list = load_canonical_uuids(&p).unwrap();
        assert_eq!(list, vec!["3f2504e0-4f89-11d3-9a0c-0305e82c3301".to_string()]);
    }

    #[test]
    fn test_sample_config_parses() {
        let sample = Path::new(env!("CARGO_MANIFEST_DIR")).join("../../config/omni.toml");
        let cfg = load_config(&sample).unwrap();
        assert_eq!(cfg.content.keyword_sets.len(), 2);
        assert_eq!(cfg.surfaces.overrides.len(), 2);
        assert!(!cfg.surfaces.overrides[0].only_if_missing);
        assert!(cfg.surfaces.overrides[1].only_if_missing);
        assert_eq!(cfg.surfaces.contract_families["mcp"].status, "partial");
        assert_eq!(cfg.census.workspaces[1].label, "Projects");
        assert!(cfg.uuids.canonical.is_none());
    }
}
