//! 文件普查：按单一维度分桶计数（extension / size_bucket / workspace / date_bucket）
use serde::Serialize;
use std::collections::HashMap;
use std::str::FromStr;
use std::time::{Duration, SystemTime};

use super::{collect_files, display, resolve_root, ScanContext};
use crate::config::WorkspacePattern;
use crate::error::{Result, ScanError};
use crate::findings::Finding;
use crate::options::ScanTarget;
use crate::types::ScanResult;
use crate::walker::WalkEntry;

pub const NAME: &str = "census";
pub const DEFAULT_MAX_FILES: usize = 100_000;

/// 普查额外剪枝的目录
pub const CENSUS_EXCLUDE_DIRS: &[&str] =
    &["bin", "obj", ".nuxt", "external-frameworks", ".gemini", ".pytest_cache", ".gradle", ".idea"];

const KB: u64 = 1024;
const SIZE_BUCKETS: &[(u64, &str)] = &[(KB, "tiny"), (100 * KB, "small"), (KB * KB, "medium"), (10 * KB * KB, "large")];

const DAY: u64 = 24 * 60 * 60;
const DATE_BUCKETS: &[(u64, &str)] =
    &[(7 * DAY, "this_week"), (30 * DAY, "this_month"), (90 * DAY, "this_quarter"), (365 * DAY, "this_year")];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dimension {
    Extension,
    SizeBucket,
    Workspace,
    DateBucket,
}

impl Dimension {
    pub fn as_str(self) -> &'static str {
        match self {
            Dimension::Extension => "extension",
            Dimension::SizeBucket => "size_bucket",
            Dimension::Workspace => "workspace",
            Dimension::DateBucket => "date_bucket",
        }
    }
}

impl FromStr for Dimension {
    type Err = ScanError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "extension" => Ok(Dimension::Extension),
            "size_bucket" => Ok(Dimension::SizeBucket),
            "workspace" => Ok(Dimension::Workspace),
            "date_bucket" => Ok(Dimension::DateBucket),
            other => Err(ScanError::InvalidParam {
                name: "dimension",
                reason: format!("unknown dimension '{other}' (expected extension, size_bucket, workspace or date_bucket)"),
            }),
        }
    }
}

pub fn extension_of(name: &str) -> String {
    match name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() && !ext.is_empty() => format!(".{}", ext.to_lowercase()),
        _ => "(no-extension)".to_string(),
    }
}

pub fn size_bucket(size: u64) -> &'static str {
    SIZE_BUCKETS.iter().find(|(limit, _)| size < *limit).map_or("huge", |&(_, label)| label)
}

pub fn date_bucket(age: Duration) -> &'static str {
    let secs = age.as_secs();
    DATE_BUCKETS.iter().find(|(limit, _)| secs < *limit).map_or("older", |&(_, label)| label)
}

pub fn workspace_of(path: &str, patterns: &[WorkspacePattern]) -> String {
    patterns
        .iter()
        .find(|w| w.contains.iter().any(|c| path.contains(c.as_str())))
        .map_or_else(|| "other".to_string(), |w| w.label.clone())
}

fn category_of(entry: &WalkEntry, dim: Dimension, patterns: &[WorkspacePattern], now: SystemTime) -> Result<String> {
    Ok(match dim {
        Dimension::Extension => {
            let name = entry.path.file_name().map(|n| n.to_string_lossy().to_string()).unwrap_or_default();
            extension_of(&name)
        }
        Dimension::SizeBucket => size_bucket(entry.size).to_string(),
        Dimension::Workspace => workspace_of(&entry.path.to_string_lossy(), patterns),
        Dimension::DateBucket => {
            let modified = std::fs::metadata(&entry.path)
                .and_then(|m| m.modified())
                .map_err(|e| ScanError::io(&entry.path, e))?;
            // 修改时间在未来时按 0 处理
            date_bucket(now.duration_since(modified).unwrap_or_default()).to_string()
        }
    })
}

#[derive(Debug, Clone, Serialize)]
pub struct CensusBucket {
    pub category: String,
    pub count: usize,
    pub percentage: f64,
}

/// 扫描器入口
pub fn scan(target: &ScanTarget, ctx: &ScanContext) -> ScanResult {
    let root = match resolve_root(target) {
        Ok(r) => r,
        Err(e) => return ScanResult::failed(NAME, display(target.path()), &e),
    };
    let dim = match target.params.dimension.as_deref().unwrap_or("extension").parse::<Dimension>() {
        Ok(d) => d,
        Err(e) => return ScanResult::failed(NAME, display(&root), &e),
    };
    let max_files = target.params.max_files.unwrap_or(DEFAULT_MAX_FILES);
    let mut result = ScanResult::new(NAME, display(&root));

    // 普查统计全部文件，不受单文件大小上限约束
    let walker = ctx.walker(&root).max_file_size(None).exclude_dirs(CENSUS_EXCLUDE_DIRS.iter().copied());
    let files = collect_files(walker.files(), Some(max_files), &ctx.budget, &mut result);
    if files.len() >= max_files {
        tracing::warn!(max_files, "census hit file limit");
    }

    let now = SystemTime::now();
    let patterns = &ctx.config.census.workspaces;
    let mut counts: HashMap<String, usize> = HashMap::new();
    let mut counted = 0usize;
    let mut total_size = 0u64;
    for entry in &files {
        match category_of(entry, dim, patterns, now) {
            Ok(c) => {
                *counts.entry(c).or_insert(0) += 1;
                counted += 1;
                total_size += entry.size;
            }
            Err(e) => result.record_error(e),
        }
    }

    let mut buckets: Vec<CensusBucket> = counts
        .into_iter()
        .map(|(category, count)| CensusBucket {
            percentage: if counted == 0 { 0.0 } else { (count as f64 / counted as f64 * 1000.0).round() / 10.0 },
            category,
            count,
        })
        .collect();
    buckets.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.category.cmp(&b.category)));

    let top_10: Vec<(&str, usize)> = buckets.iter().take(10).map(|b| (b.category.as_str(), b.count)).collect();
    result.set_summary("dimension", dim.as_str());
    result.set_summary("total_files", counted);
    result.set_summary("total_size", total_size);
    result.set_summary("unique_categories", buckets.len());
    result.set_summary("top_10", &top_10);
    result.set_summary("size_gb", (total_size as f64 / (KB * KB * KB) as f64 * 100.0).round() / 100.0);
    result.set_metadata("category", "discovery");
    result.set_metadata("max_files", max_files);

    result.extend(buckets.iter().map(|b| Finding::new(".", dim.as_str()).with_payload(b)));
    // 信封例外：count 为计数的文件数
    result.count = counted;
    result
}
