//! 目录内聚度分析：区分 MODULE / DUMP_GROUND / AMBIGUOUS
//!
//! 评分 = 0.4 * 扩展名同质性 + 0.3 * 前缀内聚 + 0.2 * 主权标记 + 0.1 * 模块结构
//! - 分数 ≥ 0.6，或存在主权标记，或具备模块结构 → MODULE
//! - 分数 < 0.3 且无主权标记 → DUMP_GROUND
//! - 其余 → AMBIGUOUS
//! 直接文件少于 3 个的目录信号不足，一律 AMBIGUOUS 且分数为 0。
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};

use super::{display, require_dir, ScanContext};
use crate::error::{Result, ScanError};
use crate::findings::Finding;
use crate::options::ScanTarget;
use crate::types::ScanResult;
use crate::walker::FileWalker;

pub const NAME: &str = "cohesion";

/// 主权标记：存在即视为有意划定边界的单元
pub const SOVEREIGNTY_MARKERS: &[&str] = &[
    "README.md", "README.txt", "README",
    "package.json", "package-lock.json",
    "pyproject.toml", "setup.py", "requirements.txt",
    "Cargo.toml", "Cargo.lock",
    ".ccraft", "manifest.yaml", "manifest.yml",
    "LICENSE", "LICENSE.md", "LICENSE.txt",
    ".git",
    "tsconfig.json", "webpack.config.js",
];

/// 标准模块结构：子目录名集合包含其中任一组即可
pub const MODULE_SIBLING_PATTERNS: &[&[&str]] = &[
    &["src", "docs", "tests"],
    &["src", "test", "config"],
    &["lib", "bin", "include"],
    &["components", "utils", "assets"],
    &["api", "models", "services"],
];

const NOISE_DIRS: &[&str] = &["__pycache__", "node_modules", "DevCache"];

pub const MIN_FILES: usize = 3;
pub const DEFAULT_MAX_DEPTH: usize = 4;
const MIN_PREFIX_LEN: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Classification {
    Module,
    DumpGround,
    Ambiguous,
}

impl Classification {
    pub fn as_str(&self) -> &'static str {
        match self {
            Classification::Module => "MODULE",
            Classification::DumpGround => "DUMP_GROUND",
            Classification::Ambiguous => "AMBIGUOUS",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CohesionAnalysis {
    pub file_count: usize,
    pub extension_homogeneity: f64,
    pub prefix_cohesion: f64,
    pub markers_found: Vec<String>,
    pub siblings_found: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// 单个目录的分析结果
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CohesionRecord {
    pub path: String,
    pub name: String,
    pub cohesion_score: f64,
    pub is_module: bool,
    pub is_dump_ground: bool,
    pub sovereignty: bool,
    pub classification: Classification,
    pub analysis: CohesionAnalysis,
}

/// 最常见扩展名的文件占比
pub fn extension_homogeneity(files: &[PathBuf]) -> f64 {
    if files.is_empty() {
        return 0.0;
    }
    let mut counts: HashMap<String, usize> = HashMap::new();
    for f in files {
        let ext = f.extension().map(|e| e.to_string_lossy().to_lowercase()).unwrap_or_default();
        *counts.entry(ext).or_insert(0) += 1;
    }
    let top = counts.values().copied().max().unwrap_or(0);
    top as f64 / files.len() as f64
}

/// 共享首个 `_`/`-` 分隔词（长度 ≥ min_prefix_len）的文件占比，分母为全部文件
pub fn prefix_cohesion(files: &[PathBuf], min_prefix_len: usize) -> f64 {
    if files.len() < 2 {
        return 0.0;
    }
    let mut counts: HashMap<String, usize> = HashMap::new();
    for f in files {
        let stem = match f.file_stem() {
            Some(s) => s.to_string_lossy().to_lowercase().replace('-', "_"),
            None => continue,
        };
        let mut parts = stem.split('_');
        let first = parts.next().unwrap_or_default();
        if parts.next().is_some() && first.chars().count() >= min_prefix_len {
            *counts.entry(first.to_string()).or_insert(0) += 1;
        }
    }
    match counts.values().copied().max() {
        Some(top) => top as f64 / files.len() as f64,
        None => 0.0,
    }
}

/// 返回命中的主权标记（按名称排序）
pub fn sovereignty_markers(entry_names: &[String]) -> Vec<String> {
    let mut found: Vec<String> = entry_names
        .iter()
        .filter(|n| SOVEREIGNTY_MARKERS.contains(&n.as_str()))
        .cloned()
        .collect();
    found.sort();
    found
}

/// 子目录名（小写）集合若覆盖某组模块结构，返回该组
pub fn module_siblings(subdirs: &HashSet<String>) -> Option<&'static [&'static str]> {
    MODULE_SIBLING_PATTERNS
        .iter()
        .copied()
        .find(|pattern| pattern.iter().all(|p| subdirs.contains(*p)))
}

fn round3(x: f64) -> f64 {
    (x * 1000.0).round() / 1000.0
}

/// 分析单个目录（只看直接子项，不递归）
pub fn analyze_folder(path: &Path, relative: &str) -> Result<CohesionRecord> {
    let mut files: Vec<PathBuf> = Vec::new();
    let mut names: Vec<String> = Vec::new();
    let mut subdirs: HashSet<String> = HashSet::new();

    let entries = fs::read_dir(path).map_err(|e| ScanError::io(path, e))?;
    for entry in entries {
        let entry = entry.map_err(|e| ScanError::io(path, e))?;
        let p = entry.path();
        let name = entry.file_name().to_string_lossy().to_string();
        if p.is_file() {
            files.push(p);
        } else if p.is_dir() {
            subdirs.insert(name.to_lowercase());
        }
        names.push(name);
    }
    files.sort();

    let name = path.file_name().map(|n| n.to_string_lossy().to_string()).unwrap_or_default();

    if files.len() < MIN_FILES {
        return Ok(CohesionRecord {
            path: relative.to_string(),
            name,
            cohesion_score: 0.0,
            is_module: false,
            is_dump_ground: false,
            sovereignty: false,
            classification: Classification::Ambiguous,
            analysis: CohesionAnalysis {
                file_count: files.len(),
                extension_homogeneity: 0.0,
                prefix_cohesion: 0.0,
                markers_found: Vec::new(),
                siblings_found: Vec::new(),
                reason: Some(format!("Too few files (<{MIN_FILES})")),
            },
        });
    }

    let ext = extension_homogeneity(&files);
    let prefix = prefix_cohesion(&files, MIN_PREFIX_LEN);
    let markers = sovereignty_markers(&names);
    let sovereignty = !markers.is_empty();
    let siblings = module_siblings(&subdirs);
    let structure = siblings.is_some();

    let mut score = ext * 0.4 + prefix * 0.3;
    if sovereignty {
        score += 0.2;
    }
    if structure {
        score += 0.1;
    }

    let is_module = score >= 0.6 || sovereignty || structure;
    let is_dump_ground = score < 0.3 && !sovereignty;
    let classification = if is_module {
        Classification::Module
    } else if is_dump_ground {
        Classification::DumpGround
    } else {
        Classification::Ambiguous
    };

    Ok(CohesionRecord {
        path: relative.to_string(),
        name,
        cohesion_score: round3(score),
        is_module,
        is_dump_ground,
        sovereignty,
        classification,
        analysis: CohesionAnalysis {
            file_count: files.len(),
            extension_homogeneity: round3(ext),
            prefix_cohesion: round3(prefix),
            markers_found: markers,
            siblings_found: siblings.map(|s| s.iter().map(|x| x.to_string()).collect()).unwrap_or_default(),
            reason: None,
        },
    })
}

/// 扫描器入口
pub fn scan(target: &ScanTarget, ctx: &ScanContext) -> ScanResult {
    let root = match require_dir(target) {
        Ok(r) => r,
        Err(e) => return ScanResult::failed(NAME, display(target.path()), &e),
    };
    let max_depth = target.params.max_depth.unwrap_or(DEFAULT_MAX_DEPTH);
    let min_cohesion = target.params.min_cohesion;

    let mut result = ScanResult::new(NAME, display(&root));
    let walker = FileWalker::new(&root)
        .exclude_dirs(NOISE_DIRS.iter().copied())
        .skip_hidden_dirs(&[".git"])
        .max_depth(max_depth)
        .cancel_token(ctx.cancel.clone());

    let mut records: Vec<CohesionRecord> = Vec::new();
    for dir in walker.dirs() {
        let dir = match dir {
            Ok(d) => d,
            Err(e) => {
                result.record_error(e);
                continue;
            }
        };
        match analyze_folder(&dir.path, &dir.relative) {
            Ok(rec) => records.push(rec),
            Err(e) => result.record_error(e),
        }
    }
    let analyzed = records.len();

    if let Some(min) = min_cohesion {
        records.retain(|r| r.cohesion_score >= min);
    }

    let modules: Vec<&CohesionRecord> = records.iter().filter(|r| r.is_module).collect();
    let avg = if modules.is_empty() {
        0.0
    } else {
        round3(modules.iter().map(|r| r.cohesion_score).sum::<f64>() / modules.len() as f64)
    };
    result.set_summary("folders_analyzed", analyzed);
    result.set_summary("modules_found", modules.len());
    result.set_summary("sovereign_modules", records.iter().filter(|r| r.is_module && r.sovereignty).count());
    result.set_summary("dump_grounds", records.iter().filter(|r| r.is_dump_ground).count());
    result.set_summary(
        "ambiguous",
        records.iter().filter(|r| r.classification == Classification::Ambiguous).count(),
    );
    result.set_summary("avg_cohesion", avg);
    result.set_metadata("category", "library");
    result.set_metadata("max_depth", max_depth);
    result.set_metadata("min_cohesion", min_cohesion);

    result.extend(
        records
            .iter()
            .map(|r| Finding::new(r.path.clone(), r.classification.as_str()).with_payload(r)),
    );
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn touch(dir: &Path, names: &[&str]) {
        fs::create_dir_all(dir).unwrap();
        for n in names {
            fs::write(dir.join(n), "x").unwrap();
        }
    }

    fn paths(names: &[&str]) -> Vec<PathBuf> {
        names.iter().map(PathBuf::from).collect()
    }

    #[test]
    fn test_extension_homogeneity_bounds() {
        assert_eq!(extension_homogeneity(&paths(&["a.py", "b.py", "c.py"])), 1.0);
        let distinct = paths(&["a.py", "b.md", "c.rs", "d.txt"]);
        assert!((extension_homogeneity(&distinct) - 0.25).abs() < 1e-9);
        assert_eq!(extension_homogeneity(&[]), 0.0);
    }

    #[test]
    fn test_prefix_cohesion() {
        let all = paths(&["cmp_memory.py", "cmp_bus.py", "cmp-station.py"]);
        assert_eq!(prefix_cohesion(&all, 3), 1.0);
        // 前缀太短或单段名不计入分子，但计入分母
        let mixed = paths(&["ab_x.py", "plain.py", "cmp_a.py", "cmp_b.py"]);
        assert!((prefix_cohesion(&mixed, 3) - 0.5).abs() < 1e-9);
        assert_eq!(prefix_cohesion(&paths(&["cmp_a.py"]), 3), 0.0);
        assert_eq!(prefix_cohesion(&paths(&["a.py", "b.py"]), 3), 0.0);
    }

    #[test]
    fn test_few_files_is_ambiguous() {
        let dir = TempDir::new().unwrap();
        let p = dir.path().join("tiny");
        touch(&p, &["README.md", "a.py"]);
        let rec = analyze_folder(&p, "tiny").unwrap();
        assert_eq!(rec.classification, Classification::Ambiguous);
        assert_eq!(rec.cohesion_score, 0.0);
        assert!(!rec.is_module && !rec.is_dump_ground && !rec.sovereignty);
    }

    #[test]
    fn test_readme_overrides_low_score() {
        let dir = TempDir::new().unwrap();
        let p = dir.path().join("mixed");
        touch(&p, &["README.md", "a.rs", "b.txt", "c.json", "d.csv"]);
        let rec = analyze_folder(&p, "mixed").unwrap();
        assert!(rec.sovereignty);
        assert!(rec.is_module);
        assert!(!rec.is_dump_ground);
        assert!(rec.cohesion_score < 0.6);
        assert_eq!(rec.analysis.markers_found, vec!["README.md".to_string()]);
    }

    #[test]
    fn test_dump_ground() {
        let dir = TempDir::new().unwrap();
        let p = dir.path().join("junk");
        touch(&p, &["a.rs", "b.txt", "c.json", "d.csv", "e.png"]);
        let rec = analyze_folder(&p, "junk").unwrap();
        // 0.4 * 0.2 = 0.08
        assert_eq!(rec.cohesion_score, 0.08);
        assert_eq!(rec.classification, Classification::DumpGround);
    }

    #[test]
    fn test_module_structure() {
        let dir = TempDir::new().unwrap();
        let p = dir.path().join("pkg");
        touch(&p, &["a.rs", "b.txt", "c.json"]);
        for sub in ["src", "docs", "Tests"] {
            fs::create_dir_all(p.join(sub)).unwrap();
        }
        let rec = analyze_folder(&p, "pkg").unwrap();
        assert!(rec.is_module);
        assert!(!rec.sovereignty);
        assert_eq!(rec.analysis.siblings_found, vec!["src", "docs", "tests"]);
    }

    #[test]
    fn test_scan_recursion_and_noise() {
        let dir = TempDir::new().unwrap();
        let root = dir.path();
        touch(&root.join("lib"), &["cmp_a.py", "cmp_b.py", "cmp_c.py"]);
        touch(&root.join("node_modules/x"), &["a.js", "b.js", "c.js"]);
        touch(&root.join(".cache"), &["a", "b", "c"]);
        touch(&root.join("a/b/c/d/e"), &["x.py", "y.py", "z.py"]);
        let target = ScanTarget::new(root);
        let res = scan(&target, &ScanContext::default());
        let paths: Vec<&str> = res.items.iter().map(|f| f.path.as_str()).collect();
        assert!(paths.contains(&"lib"));
        assert!(!paths.iter().any(|p| p.starts_with("node_modules") || p.starts_with(".cache")));
        // 深度上限 4：a/b/c/d 被分析，a/b/c/d/e 不会
        assert!(paths.contains(&"a/b/c/d"));
        assert!(!paths.contains(&"a/b/c/d/e"));
        assert_eq!(res.count, res.items.len());
        let lib = res.items.iter().find(|f| f.path == "lib").unwrap();
        assert_eq!(lib.kind, "MODULE");
    }

    #[test]
    fn test_missing_target_is_reported() {
        let res = scan(&ScanTarget::new("/definitely/not/here"), &ScanContext::default());
        assert!(res.error.is_some());
        assert_eq!(res.count, 0);
    }
}
