//! Surface 扫描：按固定正则表识别对外入口（HTTP / MCP / CLI / 总线 / DB / UI），
//! 并按分层启发式估计契约状态（missing → partial → exists）
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use super::{collect_files, display, project_name, resolve_root, ScanContext};
use crate::config::SurfacesSection;
use crate::error::{Result, ScanError};
use crate::findings::Finding;
use crate::options::ScanTarget;
use crate::types::ScanResult;
use crate::walker::WalkEntry;

pub const NAME: &str = "surfaces";

pub const EXTENSIONS: &[&str] = &[".py", ".js", ".ts", ".go", ".rs", ".java"];

const KIND_PATTERNS: &[(&str, &[&str])] = &[
    (
        "http",
        &[
            r"@app\.(get|post|put|delete|patch)\(",
            r"router\.(get|post|put|delete|patch)\(",
            r"api\.add_resource\(",
            r"class .*\(.*Resource.*\):",
        ],
    ),
    (
        "mcp",
        &[r"@mcp\.tool", r"@mcp\.resource", r"class .*Server.*:", r"tools\s*=\s*\[", r"ListToolsRequest", r"CallToolRequest"],
    ),
    ("cli", &[r"if __name__ == .__main__.:", r"@click\.command", r"typer\.Typer\(", r"argparse\.ArgumentParser\("]),
    ("bus_topic", &[r"publish\(", r"subscribe\(", r"topic\s*[:=]", r"crown://"]),
    ("db", &[r"class .*\(.*Model.*\):", r"CREATE TABLE"]),
    ("ui_integration", &[r"fetch\(", r"axios\."]),
];

/// 编译后的 (kind, 正则组)
static PATTERNS: Lazy<Vec<(&'static str, Vec<Regex>)>> = Lazy::new(|| {
    KIND_PATTERNS
        .iter()
        .map(|(kind, pats)| (*kind, pats.iter().filter_map(|p| Regex::new(p).ok()).collect()))
        .collect()
});

const OPENAPI_FILES: &[&str] = &["openapi.yaml", "openapi.json", "swagger.yaml", "swagger.json"];
const CONTRACT_DIRS: &[&str] = &["contracts", "schemas"];
const CONTRACT_FILES: &[&str] = &["contracts.py", "protocols.py"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContractStatus {
    Missing,
    Partial,
    Exists,
}

impl ContractStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ContractStatus::Missing => "missing",
            ContractStatus::Partial => "partial",
            ContractStatus::Exists => "exists",
        }
    }

    /// 配置中的状态字符串；无法识别时为 None
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "missing" => Some(ContractStatus::Missing),
            "partial" => Some(ContractStatus::Partial),
            "exists" => Some(ContractStatus::Exists),
            _ => None,
        }
    }
}

/// 目录内可见的契约基础设施
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ContractMeta {
    pub openapi: bool,
    pub contracts_dir: bool,
}

impl ContractMeta {
    fn merge(self, other: ContractMeta) -> ContractMeta {
        ContractMeta { openapi: self.openapi || other.openapi, contracts_dir: self.contracts_dir || other.contracts_dir }
    }
}

/// 只看目录的直接子项；目录不可读视为无标记
pub fn probe_contracts(dir: &Path) -> ContractMeta {
    let mut meta = ContractMeta::default();
    let Ok(rd) = std::fs::read_dir(dir) else {
        return meta;
    };
    for entry in rd.flatten() {
        let name = entry.file_name().to_string_lossy().to_string();
        let lower = name.to_lowercase();
        if OPENAPI_FILES.contains(&lower.as_str()) {
            meta.openapi = true;
        }
        if CONTRACT_DIRS.contains(&lower.as_str()) && entry.path().is_dir() {
            meta.contracts_dir = true;
        }
        if name == "CONTRACT.md" || CONTRACT_FILES.contains(&lower.as_str()) {
            meta.contracts_dir = true;
        }
    }
    meta
}

/// 单个文件中每类 surface 的首个命中
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawSurface {
    pub kind: &'static str,
    pub line: usize,
    pub matched: String,
}

/// 每类取所有模式中位置最靠前的一次命中
pub fn detect_surfaces(content: &str) -> Vec<RawSurface> {
    let mut out = Vec::new();
    for (kind, regexes) in PATTERNS.iter() {
        let first = regexes.iter().filter_map(|re| re.find(content)).min_by_key(|m| m.start());
        if let Some(m) = first {
            let line = content[..m.start()].matches('\n').count() + 1;
            out.push(RawSurface { kind: *kind, line, matched: m.as_str().to_string() });
        }
    }
    out
}

/// 判定所需的上下文
pub struct StatusInput<'a> {
    pub kind: &'a str,
    pub matched: &'a str,
    pub content: &'a str,
    pub relative: &'a str,
    pub project: &'a str,
    pub meta: ContractMeta,
}

/// 分层状态判定；返回 (状态, 契约引用)
pub fn contract_status(input: &StatusInput<'_>, cfg: &SurfacesSection) -> (ContractStatus, Option<String>) {
    let mut status = ContractStatus::Missing;
    let kind = input.kind;

    if kind == "http" && input.meta.openapi {
        status = ContractStatus::Partial;
    }
    if kind == "mcp" && (input.content.contains("inputSchema") || input.content.contains("outputSchema")) {
        status = ContractStatus::Partial;
    }
    if kind == "bus_topic" && input.matched.contains("crown://") {
        status = ContractStatus::Partial;
    }
    if input.relative.contains("contracts") || input.relative.contains("schema") {
        status = ContractStatus::Exists;
    }
    if input.meta.contracts_dir && status == ContractStatus::Missing {
        status = ContractStatus::Partial;
    }

    let mut reference = None;
    if let Some(family) = cfg.contract_families.get(kind) {
        if status == ContractStatus::Missing {
            status = ContractStatus::parse(&family.status).unwrap_or(ContractStatus::Partial);
        }
        reference = Some(family.reference.clone());
    }
    if kind == "http" && input.meta.openapi {
        status = ContractStatus::Exists;
    }

    let project = input.project.to_lowercase();
    for ov in &cfg.overrides {
        if !project.contains(&ov.project_contains.to_lowercase()) {
            continue;
        }
        if ov.kind.as_deref().is_some_and(|k| k != kind) {
            continue;
        }
        match ContractStatus::parse(&ov.status) {
            Some(s) if ov.only_if_missing => {
                if status == ContractStatus::Missing {
                    status = s;
                }
            }
            Some(s) => status = s,
            None => tracing::warn!(status = %ov.status, "ignoring override with unknown status"),
        }
        if let Some(extra) = &ov.reference {
            reference = Some(match reference {
                Some(base) => format!("{base} + {extra}"),
                None => extra.clone(),
            });
        }
    }
    (status, reference)
}

pub fn scope_of(project: &str, cfg: &SurfacesSection) -> &'static str {
    if cfg.external_markers.iter().any(|m| project.contains(m.as_str())) {
        "external_reference"
    } else {
        "internal"
    }
}

/// 单条 surface 记录
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Surface {
    pub surface_id: String,
    pub kind: String,
    pub project: String,
    pub location: String,
    pub status: String,
    pub reference: Option<String>,
    pub scope: String,
}

struct FileSurfaces {
    relative: String,
    surfaces: Vec<(RawSurface, ContractStatus, Option<String>)>,
}

fn scan_file(
    entry: &WalkEntry,
    root: &Path,
    root_meta: ContractMeta,
    project: &str,
    cfg: &SurfacesSection,
) -> Result<FileSurfaces> {
    let bytes = std::fs::read(&entry.path).map_err(|e| ScanError::io(&entry.path, e))?;
    let content = String::from_utf8_lossy(&bytes);
    let raw = detect_surfaces(&content);
    let mut meta = root_meta;
    if !raw.is_empty() {
        if let Some(parent) = entry.path.parent().filter(|p| *p != root) {
            meta = meta.merge(probe_contracts(parent));
        }
    }
    let surfaces = raw
        .into_iter()
        .map(|s| {
            let input = StatusInput {
                kind: s.kind,
                matched: &s.matched,
                content: &content,
                relative: &entry.relative,
                project,
                meta,
            };
            let (status, reference) = contract_status(&input, cfg);
            (s, status, reference)
        })
        .collect();
    Ok(FileSurfaces { relative: entry.relative.clone(), surfaces })
}

/// 统计时把文件路径去掉常见源码扩展名作为组件名
fn component_of(relative: &str) -> String {
    for ext in [".py", ".js", ".ts"] {
        if let Some(stem) = relative.strip_suffix(ext) {
            return stem.to_string();
        }
    }
    relative.to_string()
}

fn summarize(surfaces: &[Surface], result: &mut ScanResult) {
    let mut by_kind: BTreeMap<&str, usize> = BTreeMap::new();
    let mut by_status: BTreeMap<&str, usize> =
        ["missing", "partial", "exists"].into_iter().map(|s| (s, 0)).collect();
    // 组件按首次出现顺序计数，排序稳定
    let mut components: Vec<(String, usize)> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();
    for s in surfaces {
        *by_kind.entry(s.kind.as_str()).or_insert(0) += 1;
        *by_status.entry(s.status.as_str()).or_insert(0) += 1;
        let c = component_of(s.location.rsplit_once(':').map_or(s.location.as_str(), |(f, _)| f));
        match index.get(&c) {
            Some(&i) => components[i].1 += 1,
            None => {
                index.insert(c.clone(), components.len());
                components.push((c, 1));
            }
        }
    }
    let most_surfaced = components.iter().fold(None::<&(String, usize)>, |best, c| match best {
        Some(b) if b.1 >= c.1 => Some(b),
        _ => Some(c),
    });
    let mut ranked = components.clone();
    ranked.sort_by(|a, b| b.1.cmp(&a.1));
    let exists = by_status.get("exists").copied().unwrap_or(0);
    let coverage = if surfaces.is_empty() {
        0.0
    } else {
        (exists as f64 / surfaces.len() as f64 * 1000.0).round() / 10.0
    };

    result.set_summary("by_kind", &by_kind);
    result.set_summary("by_status", &by_status);
    result.set_summary("by_component", ranked.iter().take(20).cloned().collect::<BTreeMap<_, _>>());
    result.set_summary("total_components", components.len());
    result.set_summary("most_surfaced_component", most_surfaced.map(|c| c.0.clone()));
    result.set_summary("coverage_ratio", coverage);
    result.set_summary("top_components", ranked.iter().take(5).map(|c| c.0.clone()).collect::<Vec<_>>());
}

/// 扫描器入口
pub fn scan(target: &ScanTarget, ctx: &ScanContext) -> ScanResult {
    let root = match resolve_root(target) {
        Ok(r) => r,
        Err(e) => return ScanResult::failed(NAME, display(target.path()), &e),
    };
    let mut result = ScanResult::new(NAME, display(&root));
    let cfg = &ctx.config.surfaces;
    let project = project_name(&root);
    let root_meta = probe_contracts(&root);

    let walker = ctx
        .walker(&root)
        .exclude_phrases(["governance/registry/surfaces", "omni/artifacts"])
        .skip_hidden_dirs(&[])
        .suffixes(EXTENSIONS);
    let files = collect_files(walker.files(), target.params.max_files, &ctx.budget, &mut result);

    let threads = ctx.threads(target);
    let scope = scope_of(&project, cfg);
    let mut surfaces: Vec<Surface> = Vec::new();
    crate::pool::for_each_ordered(
        &files,
        threads,
        |entry| scan_file(entry, &root, root_meta, &project, cfg),
        |_, r| match r {
            Ok(fs) => {
                for (raw, status, reference) in fs.surfaces {
                    surfaces.push(Surface {
                        surface_id: format!("{project}:{}:{}:{}", fs.relative, raw.kind, raw.line),
                        kind: raw.kind.to_string(),
                        project: project.clone(),
                        location: format!("{}:{}", fs.relative, raw.line),
                        status: status.as_str().to_string(),
                        reference,
                        scope: scope.to_string(),
                    });
                }
            }
            Err(e) => result.record_error(e),
        },
    );

    summarize(&surfaces, &mut result);
    result.set_metadata("category", "static");
    result.set_metadata("project", &project);
    result.set_metadata("threads", threads);
    result.set_metadata("openapi", root_meta.openapi);
    result.set_metadata("contracts_dir", root_meta.contracts_dir);
    tracing::debug!(project = %project, files = files.len(), surfaces = surfaces.len(), "surface scan finished");

    result.extend(surfaces.iter().map(|s| {
        let (path, line) = s.location.rsplit_once(':').unwrap_or((s.location.as_str(), "0"));
        Finding::new(path, s.kind.clone()).at_line(line.parse().unwrap_or(0)).with_payload(s)
    }));
    result
}
