//! 链接/依赖图扫描
//!
//! - Markdown：`[text](target)` 与 `[[wikilink]]`，逐个解析目标是否存在
//! - Python：`import x` / `from x import a, b`（逐行，跳过注释）
//! - JS/TS：`import ... from '...'`、`require('...')`、`import type {..} from '...'`
//!
//! 解析顺序：相对引用文件所在目录 → 相对扫描根 → 断链。
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};

use super::{collect_files, display, require_dir, ScanContext};
use crate::error::{Result, ScanError};
use crate::findings::Finding;
use crate::options::ScanTarget;
use crate::types::ScanResult;

pub const NAME: &str = "graph";
pub const DEFAULT_MAX_FILES: usize = 1000;

const MARKDOWN_EXTS: &[&str] = &["md", "markdown"];
const JS_EXTS: &[&str] = &["js", "ts", "jsx", "tsx", "mjs"];
const EXTERNAL_PREFIXES: &[&str] = &["http://", "https://", "mailto:", "#"];

static MARKDOWN_LINK: Lazy<Option<Regex>> = Lazy::new(|| Regex::new(r"\[([^\]]+)\]\(([^)]+)\)").ok());
static WIKI_LINK: Lazy<Option<Regex>> = Lazy::new(|| Regex::new(r"\[\[([^\]]+)\]\]").ok());
static PYTHON_IMPORT: Lazy<Option<Regex>> =
    Lazy::new(|| Regex::new(r"^(?:from\s+([a-zA-Z0-9_.]+)\s+)?import\s+([a-zA-Z0-9_., ]+)").ok());
static JS_IMPORT: Lazy<Option<Regex>> = Lazy::new(|| {
    Regex::new(r#"(?:\bimport\s+(type\s+)?(?:[\w$*{}\s,]+?\s+from\s+)?|\brequire\s*\(\s*)['"]([^'"]+)['"]"#).ok()
});

/// 链接类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkKind {
    Markdown,
    Wikilink,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Link {
    pub kind: LinkKind,
    pub text: String,
    pub target: String,
    pub line: usize,
    /// 解析后的路径（相对扫描根）；None 表示断链
    pub resolved: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ImportKind {
    PythonImport,
    JsImport,
    TsTypeImport,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Import {
    pub kind: ImportKind,
    /// 模块名（Python 为导入项，JS/TS 为模块路径）
    pub module: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,
    pub line: usize,
}

/// 单文件的图数据
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileGraph {
    pub links: Vec<Link>,
    pub imports: Vec<Import>,
}

#[derive(Debug, Clone, Serialize)]
pub struct BrokenLink {
    pub source: String,
    pub target: String,
    pub text: String,
    pub error: String,
}

fn line_of(content: &str, offset: usize) -> usize {
    content[..offset].matches('\n').count() + 1
}

/// 去掉 `#fragment`、尖括号与可选标题
fn clean_target(raw: &str) -> &str {
    let t = raw.trim().trim_start_matches('<');
    let t = t.split_whitespace().next().unwrap_or("");
    let t = t.trim_end_matches('>');
    t.split('#').next().unwrap_or("")
}

/// 提取 Markdown 链接（未解析）
pub fn extract_markdown_links(content: &str) -> Vec<Link> {
    let mut links = Vec::new();
    if let Some(re) = MARKDOWN_LINK.as_ref() {
        for caps in re.captures_iter(content) {
            let (Some(all), Some(text), Some(target)) = (caps.get(0), caps.get(1), caps.get(2)) else {
                continue;
            };
            let raw = target.as_str().trim();
            if EXTERNAL_PREFIXES.iter().any(|p| raw.starts_with(p)) {
                continue;
            }
            let cleaned = clean_target(raw);
            if cleaned.is_empty() {
                continue;
            }
            links.push(Link {
                kind: LinkKind::Markdown,
                text: text.as_str().to_string(),
                target: cleaned.to_string(),
                line: line_of(content, all.start()),
                resolved: None,
            });
        }
    }
    if let Some(re) = WIKI_LINK.as_ref() {
        for caps in re.captures_iter(content) {
            let (Some(all), Some(inner)) = (caps.get(0), caps.get(1)) else {
                continue;
            };
            // `[[target|alias]]` 取 target
            let name = inner.as_str().split('|').next().unwrap_or("").trim();
            let name = name.split('#').next().unwrap_or("");
            if name.is_empty() {
                continue;
            }
            links.push(Link {
                kind: LinkKind::Wikilink,
                text: inner.as_str().to_string(),
                target: format!("{name}.md"),
                line: line_of(content, all.start()),
                resolved: None,
            });
        }
    }
    links
}

pub fn extract_python_imports(content: &str) -> Vec<Import> {
    let Some(re) = PYTHON_IMPORT.as_ref() else {
        return Vec::new();
    };
    let mut imports = Vec::new();
    for (idx, raw) in content.lines().enumerate() {
        let line = raw.trim();
        if line.starts_with('#') {
            continue;
        }
        let Some(caps) = re.captures(line) else {
            continue;
        };
        let from = caps.get(1).map(|m| m.as_str().to_string());
        let list = caps.get(2).map_or("", |m| m.as_str());
        for module in list.split(',').map(str::trim).filter(|m| !m.is_empty()) {
            imports.push(Import { kind: ImportKind::PythonImport, module: module.to_string(), from: from.clone(), line: idx + 1 });
        }
    }
    imports
}

pub fn extract_js_imports(content: &str) -> Vec<Import> {
    let Some(re) = JS_IMPORT.as_ref() else {
        return Vec::new();
    };
    re.captures_iter(content)
        .filter_map(|caps| {
            let all = caps.get(0)?;
            let module = caps.get(2)?;
            let kind = if caps.get(1).is_some() { ImportKind::TsTypeImport } else { ImportKind::JsImport };
            Some(Import { kind, module: module.as_str().to_string(), from: None, line: line_of(content, all.start()) })
        })
        .collect()
}

/// 词法规整 `.` / `..`，不访问文件系统
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for c in path.components() {
        match c {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    out.push("..");
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

fn relative_display(path: &Path, root: &Path) -> String {
    match path.strip_prefix(normalize(root)) {
        Ok(rel) => rel.components().map(|c| c.as_os_str().to_string_lossy()).collect::<Vec<_>>().join("/"),
        Err(_) => display(path),
    }
}

/// 先相对引用文件目录，再相对扫描根
pub fn resolve_link_target(source: &Path, target: &str, root: &Path) -> Option<String> {
    let base = source.parent().unwrap_or(root);
    for candidate in [base.join(target), root.join(target)] {
        let candidate = normalize(&candidate);
        if candidate.exists() {
            return Some(relative_display(&candidate, root));
        }
    }
    None
}

/// 分析单个文件；非 Markdown/Python/JS/TS 文件返回空图
pub fn analyze_file(path: &Path, root: &Path) -> Result<FileGraph> {
    let ext = path.extension().map(|e| e.to_string_lossy().to_lowercase()).unwrap_or_default();
    let is_markdown = MARKDOWN_EXTS.contains(&ext.as_str());
    let is_js = JS_EXTS.contains(&ext.as_str());
    if !is_markdown && !is_js && ext != "py" {
        return Ok(FileGraph::default());
    }
    let bytes = std::fs::read(path).map_err(|e| ScanError::io(path, e))?;
    let content = String::from_utf8_lossy(&bytes);

    let mut graph = FileGraph::default();
    if is_markdown {
        graph.links = extract_markdown_links(&content);
        for link in &mut graph.links {
            link.resolved = resolve_link_target(path, &link.target, root);
        }
    } else if is_js {
        graph.imports = extract_js_imports(&content);
    } else {
        graph.imports = extract_python_imports(&content);
    }
    Ok(graph)
}

/// 扫描器入口
pub fn scan(target: &ScanTarget, ctx: &ScanContext) -> ScanResult {
    let root = match require_dir(target) {
        Ok(r) => r,
        Err(e) => return ScanResult::failed(NAME, display(target.path()), &e),
    };
    let pattern = target.params.pattern.clone().unwrap_or_else(|| "**/*".to_string());
    let max_files = target.params.max_files.unwrap_or(DEFAULT_MAX_FILES);
    let walker = match ctx.walker(&root).include_glob(&pattern) {
        Ok(w) => w,
        Err(e) => return ScanResult::failed(NAME, display(&root), &e),
    };
    let mut result = ScanResult::new(NAME, display(&root));
    let files = collect_files(walker.files(), Some(max_files), &ctx.budget, &mut result);

    let mut findings = Vec::new();
    let mut broken: Vec<BrokenLink> = Vec::new();
    let mut edges: BTreeMap<String, Vec<String>> = BTreeMap::new();
    let (mut with_links, mut with_imports, mut total_links, mut total_imports) = (0usize, 0usize, 0usize, 0usize);

    for entry in &files {
        let graph = match analyze_file(&entry.path, &root) {
            Ok(g) => g,
            Err(e) => {
                result.record_error(e);
                continue;
            }
        };
        if !graph.links.is_empty() {
            with_links += 1;
        }
        if !graph.imports.is_empty() {
            with_imports += 1;
        }
        total_links += graph.links.len();
        total_imports += graph.imports.len();

        for link in graph.links {
            edges.entry(entry.relative.clone()).or_default().push(link.target.clone());
            if link.resolved.is_none() {
                broken.push(BrokenLink {
                    source: entry.relative.clone(),
                    target: link.target.clone(),
                    text: link.text.clone(),
                    error: format!("Target not found: {}", link.target),
                });
            }
            let kind = match link.kind {
                LinkKind::Markdown => "markdown_link",
                LinkKind::Wikilink => "wikilink",
            };
            findings.push(
                Finding::new(entry.relative.clone(), kind)
                    .at_line(link.line)
                    .with_payload(&link)
                    .with_payload(&serde_json::json!({ "broken": link.resolved.is_none() })),
            );
        }
        for import in graph.imports {
            let kind = match import.kind {
                ImportKind::PythonImport => "python_import",
                ImportKind::JsImport => "js_import",
                ImportKind::TsTypeImport => "ts_type_import",
            };
            findings.push(Finding::new(entry.relative.clone(), kind).at_line(import.line).with_payload(&import));
        }
    }

    result.set_summary("total_files", files.len());
    result.set_summary("files_with_links", with_links);
    result.set_summary("files_with_imports", with_imports);
    result.set_summary("total_links", total_links);
    result.set_summary("total_imports", total_imports);
    result.set_summary("total_broken_links", broken.len());
    result.set_summary("broken_links", &broken);
    result.set_summary("graph_edges", &edges);
    result.set_metadata("category", "library");
    result.set_metadata("pattern", &pattern);
    result.set_metadata("max_files", max_files);
    result.extend(findings);
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_markdown_links_skip_external() {
        let md = "See [a](./a.md), [web](https://x.io), [top](#top), [sec](b.md#intro)\nand [[Notes|alias]]\n";
        let links = extract_markdown_links(md);
        let targets: Vec<_> = links.iter().map(|l| (l.kind, l.target.as_str(), l.line)).collect();
        assert_eq!(
            targets,
            vec![(LinkKind::Markdown, "./a.md", 1), (LinkKind::Markdown, "b.md", 1), (LinkKind::Wikilink, "Notes.md", 2)]
        );
    }

    #[test]
    fn test_python_imports() {
        let src = "import os\n# import hidden\nfrom a.b import c, d\n    import json\n";
        let imports = extract_python_imports(src);
        let got: Vec<_> = imports.iter().map(|i| (i.module.as_str(), i.from.as_deref(), i.line)).collect();
        assert_eq!(got, vec![("os", None, 1), ("c", Some("a.b"), 3), ("d", Some("a.b"), 3), ("json", None, 4)]);
    }

    #[test]
    fn test_js_imports() {
        let src = "import x from './x';\nconst y = require('y');\nimport type { T } from \"./types\";\nimport './side.css';\n";
        let imports = extract_js_imports(src);
        let got: Vec<_> = imports.iter().map(|i| (i.kind, i.module.as_str())).collect();
        assert_eq!(
            got,
            vec![
                (ImportKind::JsImport, "./x"),
                (ImportKind::JsImport, "y"),
                (ImportKind::TsTypeImport, "./types"),
                (ImportKind::JsImport, "./side.css"),
            ]
        );
    }

    #[test]
    fn test_resolution_order() {
        let dir = TempDir::new().unwrap();
        let root = dir.path();
        fs::create_dir_all(root.join("docs")).unwrap();
        fs::write(root.join("docs/local.md"), "").unwrap();
        fs::write(root.join("top.md"), "").unwrap();
        let src = root.join("docs/index.md");
        assert_eq!(resolve_link_target(&src, "local.md", root).as_deref(), Some("docs/local.md"));
        assert_eq!(resolve_link_target(&src, "top.md", root).as_deref(), Some("top.md"));
        assert_eq!(resolve_link_target(&src, "../top.md", root).as_deref(), Some("top.md"));
        assert_eq!(resolve_link_target(&src, "none.md", root), None);
    }

    #[test]
    fn test_single_broken_link() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("ok.md"), "# ok").unwrap();
        fs::write(dir.path().join("index.md"), "[Ok](./ok.md)\n[Missing](./nope.md)\n").unwrap();
        fs::write(dir.path().join("main.py"), "import os\n").unwrap();
        let res = scan(&ScanTarget::new(dir.path()), &ScanContext::default());
        assert!(res.error.is_none());
        assert_eq!(res.summary["total_broken_links"], 1);
        let broken = res.summary["broken_links"].as_array().unwrap();
        assert_eq!(broken.len(), 1);
        assert_eq!(broken[0]["target"], "./nope.md");
        assert_eq!(broken[0]["source"], "index.md");
        assert_eq!(res.summary["total_imports"], 1);
        assert_eq!(res.count, 3);
    }
}
