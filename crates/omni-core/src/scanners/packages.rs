//! 包清单扫描：pyproject.toml / setup.py / Cargo.toml / package.json
//!
//! 提取名称、版本、描述、声明依赖与命令行入口，并按包根目录检测 CLI / MCP / HTTP 三类接口。
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::Path;

use super::{display, require_dir, try_collect_files, ScanContext};
use crate::error::{Result, ScanError};
use crate::findings::Finding;
use crate::options::ScanTarget;
use crate::types::ScanResult;

pub const NAME: &str = "packages";

pub const MANIFESTS: &[&str] = &["pyproject.toml", "setup.py", "Cargo.toml", "package.json"];
const HTTP_FILES: &[&str] = &["server.py", "api.py", "app.py", "api_server.py"];
const MAX_INTERFACE_NAMES: usize = 3;

static SETUP_FIELD: Lazy<Option<Regex>> =
    Lazy::new(|| Regex::new(r#"\b(name|version|description)\s*=\s*["']([^"']+)["']"#).ok());
static SETUP_REQUIRES: Lazy<Option<Regex>> = Lazy::new(|| Regex::new(r"(?s)install_requires\s*=\s*\[(.*?)\]").ok());
static SETUP_SCRIPTS: Lazy<Option<Regex>> = Lazy::new(|| Regex::new(r"(?s)console_scripts.*?\[(.*?)\]").ok());
static QUOTED: Lazy<Option<Regex>> = Lazy::new(|| Regex::new(r#"["']([^"']+)["']"#).ok());
/// PEP 508 依赖串中的包名部分
static REQUIREMENT_NAME: Lazy<Option<Regex>> = Lazy::new(|| Regex::new(r"^\s*([A-Za-z0-9][A-Za-z0-9._-]*)").ok());

/// 包根目录检测到的接口（每类最多 3 个名称）
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct EntryPoints {
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub cli: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub mcp: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub http: Vec<String>,
}

impl EntryPoints {
    pub fn is_triple(&self) -> bool {
        !self.cli.is_empty() && !self.mcp.is_empty() && !self.http.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PackageInfo {
    pub name: String,
    /// 包根目录（相对扫描根，根自身为 `.`）
    pub package_root: String,
    pub manifest: String,
    pub version: String,
    pub description: String,
    pub dependencies: Vec<String>,
    /// 清单声明的命令行入口（脚本名 / bin 名）
    pub cli_scripts: Vec<String>,
    pub entry_points: EntryPoints,
}

/// 单个清单的解析结果（名称缺省时取目录名）
#[derive(Debug, Default)]
struct Manifest {
    name: Option<String>,
    version: Option<String>,
    description: Option<String>,
    dependencies: Vec<String>,
    scripts: Vec<String>,
}

fn requirement_name(spec: &str) -> Option<String> {
    REQUIREMENT_NAME.as_ref()?.captures(spec)?.get(1).map(|m| m.as_str().to_string())
}

fn toml_str(v: Option<&toml::Value>) -> Option<String> {
    v.and_then(toml::Value::as_str).map(str::to_string)
}

fn table_keys(v: Option<&toml::Value>) -> Vec<String> {
    v.and_then(toml::Value::as_table).map(|t| t.keys().cloned().collect()).unwrap_or_default()
}

fn parse_pyproject(text: &str, path: &Path) -> Result<Manifest> {
    let doc: toml::Value = toml::from_str(text).map_err(|e| ScanError::Parse { path: path.to_path_buf(), reason: e.to_string() })?;
    let mut m = Manifest::default();
    if let Some(project) = doc.get("project") {
        m.name = toml_str(project.get("name"));
        m.version = toml_str(project.get("version"));
        m.description = toml_str(project.get("description"));
        m.dependencies = project
            .get("dependencies")
            .and_then(toml::Value::as_array)
            .map(|a| a.iter().filter_map(toml::Value::as_str).filter_map(requirement_name).collect())
            .unwrap_or_default();
        m.scripts = table_keys(project.get("scripts"));
    }
    // poetry 风格
    if let Some(poetry) = doc.get("tool").and_then(|t| t.get("poetry")) {
        m.name = m.name.or_else(|| toml_str(poetry.get("name")));
        m.version = m.version.or_else(|| toml_str(poetry.get("version")));
        m.description = m.description.or_else(|| toml_str(poetry.get("description")));
        if m.dependencies.is_empty() {
            m.dependencies = table_keys(poetry.get("dependencies")).into_iter().filter(|d| d != "python").collect();
        }
        if m.scripts.is_empty() {
            m.scripts = table_keys(poetry.get("scripts"));
        }
    }
    Ok(m)
}

fn quoted_items(block: &str) -> Vec<String> {
    QUOTED
        .as_ref()
        .map(|re| re.captures_iter(block).filter_map(|c| c.get(1)).map(|m| m.as_str().to_string()).collect())
        .unwrap_or_default()
}

fn parse_setup_py(text: &str) -> Manifest {
    let mut m = Manifest::default();
    if let Some(re) = SETUP_FIELD.as_ref() {
        for caps in re.captures_iter(text) {
            let (Some(key), Some(value)) = (caps.get(1), caps.get(2)) else {
                continue;
            };
            let slot = match key.as_str() {
                "name" => &mut m.name,
                "version" => &mut m.version,
                _ => &mut m.description,
            };
            if slot.is_none() {
                *slot = Some(value.as_str().to_string());
            }
        }
    }
    if let Some(block) = SETUP_REQUIRES.as_ref().and_then(|re| re.captures(text)).and_then(|c| c.get(1)) {
        m.dependencies = quoted_items(block.as_str()).iter().filter_map(|s| requirement_name(s)).collect();
    }
    if let Some(block) = SETUP_SCRIPTS.as_ref().and_then(|re| re.captures(text)).and_then(|c| c.get(1)) {
        m.scripts = quoted_items(block.as_str())
            .iter()
            .filter_map(|s| s.split_once('=').map(|(name, _)| name.trim().to_string()))
            .collect();
    }
    m
}

fn parse_cargo(text: &str, path: &Path) -> Result<Manifest> {
    let doc: toml::Value = toml::from_str(text).map_err(|e| ScanError::Parse { path: path.to_path_buf(), reason: e.to_string() })?;
    let mut m = Manifest::default();
    if let Some(pkg) = doc.get("package") {
        m.name = toml_str(pkg.get("name"));
        m.version = toml_str(pkg.get("version"));
        m.description = toml_str(pkg.get("description"));
    }
    m.dependencies = table_keys(doc.get("dependencies"));
    m.scripts = doc
        .get("bin")
        .and_then(toml::Value::as_array)
        .map(|bins| bins.iter().filter_map(|b| toml_str(b.get("name"))).collect())
        .unwrap_or_default();
    let has_main = path.parent().is_some_and(|p| p.join("src/main.rs").is_file());
    if m.scripts.is_empty() && has_main {
        if let Some(name) = &m.name {
            m.scripts.push(name.clone());
        }
    }
    Ok(m)
}

fn parse_package_json(text: &str, path: &Path) -> Result<Manifest> {
    let doc: serde_json::Value =
        serde_json::from_str(text).map_err(|e| ScanError::Parse { path: path.to_path_buf(), reason: e.to_string() })?;
    let s = |k: &str| doc.get(k).and_then(serde_json::Value::as_str).map(str::to_string);
    let keys = |k: &str| -> Vec<String> {
        doc.get(k).and_then(serde_json::Value::as_object).map(|o| o.keys().cloned().collect()).unwrap_or_default()
    };
    let mut m = Manifest { name: s("name"), version: s("version"), description: s("description"), ..Default::default() };
    m.dependencies = keys("dependencies");
    m.scripts = match doc.get("bin") {
        Some(serde_json::Value::String(_)) => m.name.iter().cloned().collect(),
        Some(serde_json::Value::Object(o)) => o.keys().cloned().collect(),
        _ => Vec::new(),
    };
    Ok(m)
}

fn parse_manifest(path: &Path) -> Result<Manifest> {
    let text = std::fs::read_to_string(path).map_err(|e| ScanError::io(path, e))?;
    match path.file_name().and_then(|n| n.to_str()) {
        Some("pyproject.toml") => parse_pyproject(&text, path),
        Some("setup.py") => Ok(parse_setup_py(&text)),
        Some("Cargo.toml") => parse_cargo(&text, path),
        Some("package.json") => parse_package_json(&text, path),
        _ => Ok(Manifest::default()),
    }
}

/// 在包根目录下检测接口；不进入带有自己清单的子目录
///
/// 遍历到的 `.py` 文件计入共享预算。`stopped` 为 true 时只看清单与 `__main__.py`；
/// 返回值的第二项表示本次遍历是否因取消或预算耗尽而停止。
fn detect_interfaces(
    pkg_root: &Path,
    scripts: &[String],
    ctx: &ScanContext,
    result: &mut ScanResult,
    stopped: bool,
) -> (EntryPoints, bool) {
    let mut ep = EntryPoints::default();
    if !scripts.is_empty() {
        ep.cli = scripts.to_vec();
    } else if pkg_root.join("__main__.py").is_file() {
        let dir = pkg_root.file_name().map(|n| n.to_string_lossy().to_string()).unwrap_or_default();
        ep.cli = vec![format!("python -m {dir}")];
    }
    if stopped {
        return (ep, true);
    }
    let walker = ctx.walker(pkg_root).skip_hidden_dirs(&[]).stop_at_markers(MANIFESTS).suffixes(&[".py"]);
    let (files, stopped) = try_collect_files(walker.files(), None, &ctx.budget, result);
    for entry in files {
        let name = entry.path.file_name().map(|n| n.to_string_lossy().to_string()).unwrap_or_default();
        let stem = name.trim_end_matches(".py").to_string();
        if name.ends_with("mcp_server.py") && ep.mcp.len() < MAX_INTERFACE_NAMES {
            ep.mcp.push(stem.clone());
        }
        if HTTP_FILES.contains(&name.as_str()) && ep.http.len() < MAX_INTERFACE_NAMES {
            ep.http.push(stem);
        }
    }
    (ep, stopped)
}

/// 扫描器入口
pub fn scan(target: &ScanTarget, ctx: &ScanContext) -> ScanResult {
    let root = match require_dir(target) {
        Ok(r) => r,
        Err(e) => return ScanResult::failed(NAME, display(target.path()), &e),
    };
    let mut result = ScanResult::new(NAME, display(&root));
    let walker = ctx.walker(&root).skip_hidden_dirs(&[]).suffixes(MANIFESTS);
    let (found, mut stopped) = try_collect_files(walker.files(), None, &ctx.budget, &mut result);
    let manifests: Vec<_> = found
        .into_iter()
        .filter(|e| e.path.file_name().and_then(|n| n.to_str()).is_some_and(|n| MANIFESTS.contains(&n)))
        .take(target.params.max_files.unwrap_or(usize::MAX))
        .collect();

    let mut packages: Vec<(String, PackageInfo)> = Vec::new();
    for entry in &manifests {
        let manifest = match parse_manifest(&entry.path) {
            Ok(m) => m,
            Err(e) => {
                result.record_error(e);
                continue;
            }
        };
        let pkg_root = entry.path.parent().unwrap_or(&root);
        let dir_name = pkg_root.file_name().map(|n| n.to_string_lossy().to_string()).unwrap_or_default();
        let package_root = match entry.relative.rsplit_once('/') {
            Some((dir, _)) => dir.to_string(),
            None => ".".to_string(),
        };
        let (entry_points, halted) = detect_interfaces(pkg_root, &manifest.scripts, ctx, &mut result, stopped);
        stopped = halted;
        let manifest_name = entry.path.file_name().map(|n| n.to_string_lossy().to_string()).unwrap_or_default();
        packages.push((
            entry.relative.clone(),
            PackageInfo {
                name: manifest.name.unwrap_or(dir_name),
                package_root,
                manifest: manifest_name,
                version: manifest.version.unwrap_or_else(|| "unknown".to_string()),
                description: manifest.description.unwrap_or_default(),
                dependencies: manifest.dependencies,
                cli_scripts: manifest.scripts,
                entry_points,
            },
        ));
    }

    let mut by_manifest: BTreeMap<&str, usize> = BTreeMap::new();
    for (_, p) in &packages {
        *by_manifest.entry(p.manifest.as_str()).or_insert(0) += 1;
    }
    let count = |f: fn(&EntryPoints) -> bool| packages.iter().filter(|(_, p)| f(&p.entry_points)).count();
    result.set_summary("total", packages.len());
    result.set_summary("with_cli", count(|e| !e.cli.is_empty()));
    result.set_summary("with_mcp", count(|e| !e.mcp.is_empty()));
    result.set_summary("with_http", count(|e| !e.http.is_empty()));
    result.set_summary("triple_interface", count(EntryPoints::is_triple));
    result.set_summary("by_manifest", &by_manifest);
    result.set_metadata("category", "static");

    result.extend(packages.iter().map(|(rel, p)| Finding::new(rel.clone(), "package").with_payload(p)));
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_pyproject_fields() {
        let m = parse_pyproject(
            "[project]\nname = \"demo\"\nversion = \"1.2.0\"\ndependencies = [\"requests>=2\", \"pyyaml\"]\n\n[project.scripts]\ndemo = \"demo.cli:main\"\n",
            Path::new("pyproject.toml"),
        )
        .unwrap();
        assert_eq!(m.name.as_deref(), Some("demo"));
        assert_eq!(m.version.as_deref(), Some("1.2.0"));
        assert_eq!(m.dependencies, vec!["requests", "pyyaml"]);
        assert_eq!(m.scripts, vec!["demo"]);
    }

    #[test]
    fn test_setup_py_regex() {
        let m = parse_setup_py(
            "setup(\n  name='legacy',\n  version=\"0.3\",\n  install_requires=['click>=8', \"rich\"],\n  entry_points={'console_scripts': ['leg = legacy.main:run']},\n)\n",
        );
        assert_eq!(m.name.as_deref(), Some("legacy"));
        assert_eq!(m.version.as_deref(), Some("0.3"));
        assert_eq!(m.dependencies, vec!["click", "rich"]);
        assert_eq!(m.scripts, vec!["leg"]);
    }

    #[test]
    fn test_package_json_bin() {
        let m = parse_package_json(r#"{"name":"tool","version":"2.0.0","bin":"./cli.js","dependencies":{"axios":"^1"}}"#, Path::new("package.json")).unwrap();
        assert_eq!(m.scripts, vec!["tool"]);
        assert_eq!(m.dependencies, vec!["axios"]);
    }

    #[test]
    fn test_scan_detects_interfaces() {
        let dir = TempDir::new().unwrap();
        let pkg = dir.path().join("svc");
        fs::create_dir_all(pkg.join("svc/api")).unwrap();
        fs::write(pkg.join("pyproject.toml"), "[project]\nname = \"svc\"\n[project.scripts]\nsvc = \"svc:main\"\n").unwrap();
        fs::write(pkg.join("svc/svc_mcp_server.py"), "").unwrap();
        fs::write(pkg.join("svc/api/server.py"), "").unwrap();
        let crate_dir = dir.path().join("rs");
        fs::create_dir_all(crate_dir.join("src")).unwrap();
        fs::write(crate_dir.join("Cargo.toml"), "[package]\nname = \"rs-tool\"\nversion = \"0.1.0\"\n[dependencies]\nserde = \"1\"\n").unwrap();
        fs::write(crate_dir.join("src/main.rs"), "fn main() {}").unwrap();
        fs::write(dir.path().join("broken.json"), "{").unwrap();

        let res = scan(&ScanTarget::new(dir.path()), &ScanContext::default());
        assert_eq!(res.count, 2);
        assert_eq!(res.summary["triple_interface"], 1);
        assert_eq!(res.summary["with_cli"], 2);
        assert_eq!(res.summary["by_manifest"]["Cargo.toml"], 1);
        let rs = &res.items[0];
        assert_eq!(rs.path, "rs/Cargo.toml");
        assert_eq!(rs.get_str("name"), Some("rs-tool"));
        assert_eq!(rs.get("cli_scripts"), Some(&serde_json::json!(["rs-tool"])));
        let svc = &res.items[1];
        assert_eq!(svc.get("entry_points"), Some(&serde_json::json!({"cli": ["svc"], "mcp": ["svc_mcp_server"], "http": ["server"]})));
        assert_eq!(svc.get_str("version"), Some("unknown"));
    }

    #[test]
    fn test_nested_package_keeps_its_own_interfaces() {
        let dir = TempDir::new().unwrap();
        let root = dir.path();
        fs::create_dir_all(root.join("plugins/echo")).unwrap();
        fs::write(root.join("pyproject.toml"), "[project]\nname = \"host\"\n").unwrap();
        fs::write(root.join("server.py"), "").unwrap();
        fs::write(root.join("plugins/echo/pyproject.toml"), "[project]\nname = \"echo\"\n").unwrap();
        fs::write(root.join("plugins/echo/api.py"), "").unwrap();
        fs::write(root.join("plugins/echo/echo_mcp_server.py"), "").unwrap();

        let res = scan(&ScanTarget::new(root), &ScanContext::default());
        assert_eq!(res.count, 2);
        let host = res.items.iter().find(|f| f.get_str("name") == Some("host")).unwrap();
        assert_eq!(host.get("entry_points"), Some(&serde_json::json!({"http": ["server"]})));
        let echo = res.items.iter().find(|f| f.get_str("name") == Some("echo")).unwrap();
        assert_eq!(echo.get("entry_points"), Some(&serde_json::json!({"mcp": ["echo_mcp_server"], "http": ["api"]})));
    }

    #[test]
    fn test_interface_walk_draws_from_budget() {
        let dir = TempDir::new().unwrap();
        let root = dir.path();
        fs::create_dir_all(root.join("b")).unwrap();
        fs::write(root.join("pyproject.toml"), "[project]\nname = \"a\"\n").unwrap();
        fs::write(root.join("app.py"), "").unwrap();
        fs::write(root.join("b/pyproject.toml"), "[project]\nname = \"b\"\n").unwrap();
        fs::write(root.join("b/server.py"), "").unwrap();

        let ctx = ScanContext::default().with_budget(crate::cancel::Budget::new(Some(2), None));
        let res = scan(&ScanTarget::new(root), &ctx);
        assert_eq!(res.count, 2);
        assert_eq!(res.errors, vec!["file budget exhausted".to_string()]);
        assert_eq!(res.summary["with_http"], 0);
        assert_eq!(ctx.budget.files_taken(), 2);
    }
}
