//! UUID 溯源扫描：UUID -> 出现的文件及各文件次数
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap, HashSet};

use super::{collect_files, display, resolve_root, ScanContext};
use crate::config::load_canonical_uuids;
use crate::error::{Result, ScanError};
use crate::findings::Finding;
use crate::options::ScanTarget;
use crate::types::ScanResult;
use crate::walker::WalkEntry;

pub const NAME: &str = "uuids";

/// 在通用排除之外额外剪枝的目录
pub const UUID_EXCLUDE_DIRS: &[&str] = &[
    ".firebase", "var", "data", "input", "output", "artifacts", "logs", "backups", "snapshots", "INBOX",
    "archive", "older_versions",
];

/// 文件名包含即跳过（备份、日志、带时间戳的导出）
pub const IGNORABLE_NAMES: &[&str] = &[".bak", ".tmp", ".log", ".csv", ".lock", "chat-export-", "2024-", "2025-"];

pub const EXTENSIONS: &[&str] = &[
    ".md", ".py", ".json", ".yaml", ".yml", ".txt", ".js", ".ts", ".env", ".html", ".css", ".toml",
];

const RFC_EXAMPLE_UUID: &str = "550e8400-e29b-41d4-a716-446655440000";

static UUID_RE: Lazy<Option<Regex>> = Lazy::new(|| {
    Regex::new(r"(?i)[0-9a-f]{8}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{12}").ok()
});

/// 占位/测试用 UUID（入参需已小写）
pub fn is_placeholder(uuid: &str) -> bool {
    uuid.starts_with("00000000")
        || uuid.starts_with("11111111")
        || uuid.starts_with("22222222")
        || uuid == RFC_EXAMPLE_UUID
        || uuid.contains("1234-1234")
}

/// 单个文件内的 UUID 计数，按首次出现排序
pub fn file_uuids(text: &str) -> Vec<(String, usize)> {
    let Some(re) = UUID_RE.as_ref() else {
        return Vec::new();
    };
    let mut order: Vec<(String, usize)> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();
    for m in re.find_iter(text) {
        let u = m.as_str().to_lowercase();
        if is_placeholder(&u) {
            continue;
        }
        match index.get(&u) {
            Some(&i) => order[i].1 += 1,
            None => {
                index.insert(u.clone(), order.len());
                order.push((u, 1));
            }
        }
    }
    order
}

fn scan_file(entry: &WalkEntry) -> Result<Vec<(String, usize)>> {
    let bytes = std::fs::read(&entry.path).map_err(|e| ScanError::io(&entry.path, e))?;
    Ok(file_uuids(&String::from_utf8_lossy(&bytes)))
}

/// 单个 UUID 的溯源记录
#[derive(Debug, Clone, Serialize)]
pub struct ProvenanceEntry {
    pub uuid: String,
    /// 首次出现顺序
    pub locations: Vec<String>,
    pub counts_by_location: BTreeMap<String, usize>,
    pub count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub canonical: Option<bool>,
}

/// 扫描器入口
pub fn scan(target: &ScanTarget, ctx: &ScanContext) -> ScanResult {
    let root = match resolve_root(target) {
        Ok(r) => r,
        Err(e) => return ScanResult::failed(NAME, display(target.path()), &e),
    };
    let mut result = ScanResult::new(NAME, display(&root));

    let walker = ctx
        .walker(&root)
        .exclude_dirs(UUID_EXCLUDE_DIRS.iter().copied())
        .skip_hidden_dirs(&[])
        .ignore_names(IGNORABLE_NAMES)
        .suffixes(EXTENSIONS);
    let files = collect_files(walker.files(), target.params.max_files, &ctx.budget, &mut result);

    let mut entries: Vec<ProvenanceEntry> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();
    let threads = ctx.threads(target);
    crate::pool::for_each_ordered(&files, threads, scan_file, |i, r| match r {
        Ok(found) => {
            let rel = &files[i].relative;
            for (u, n) in found {
                let idx = *index.entry(u.clone()).or_insert_with(|| {
                    entries.push(ProvenanceEntry {
                        uuid: u.clone(),
                        locations: Vec::new(),
                        counts_by_location: BTreeMap::new(),
                        count: 0,
                        canonical: None,
                    });
                    entries.len() - 1
                });
                let e = &mut entries[idx];
                e.count += n;
                e.locations.push(rel.clone());
                e.counts_by_location.insert(rel.clone(), n);
            }
        }
        Err(e) => result.record_error(e),
    });

    // 稳定排序：次数相同保持首次出现顺序
    entries.sort_by(|a, b| b.count.cmp(&a.count));

    if let Some(path) = ctx.config.uuids.canonical.as_deref() {
        match load_canonical_uuids(path) {
            Ok(list) => {
                let canonical: HashSet<String> = list.into_iter().collect();
                for e in &mut entries {
                    e.canonical = Some(canonical.contains(&e.uuid));
                }
                let hits = entries.iter().filter(|e| e.canonical == Some(true)).count();
                result.set_summary("canonical_count", hits);
                result.set_summary("unregistered_count", entries.len() - hits);
            }
            Err(e) => result.record_error(format!("{e:#}")),
        }
    }

    tracing::debug!(files = files.len(), uuids = entries.len(), "uuid scan finished");
    result.set_summary("files_scanned", files.len());
    result.set_summary("unique_uuids", entries.len());
    result.set_summary("total_occurrences", entries.iter().map(|e| e.count).sum::<usize>());
    result.set_metadata("category", "static");
    result.set_metadata("threads", threads);

    result.extend(entries.iter().map(|e| {
        let first = e.locations.first().cloned().unwrap_or_default();
        Finding::new(first, "uuid").with_payload(e)
    }));
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    const A: &str = "3f2b8c1e-9a4d-4e7f-b2c6-1d8e9f0a7b35";
    const B: &str = "a1c4e5f6-7b8d-4c9e-8f0a-2b3c4d5e6f70";

    #[test]
    fn test_placeholders_filtered() {
        let text = format!(
            "00000000-0000-0000-0000-000000000000 11111111-1111-1111-1111-111111111111 \
             550E8400-E29B-41D4-A716-446655440000 abcd1234-1234-1234-1234-123456789012 \
             22222222-2222-2222-2222-222222222222 {A}"
        );
        assert_eq!(file_uuids(&text), vec![(A.to_string(), 1)]);
    }

    #[test]
    fn test_case_insensitive_and_first_seen() {
        let text = format!("{B} {} {A} {B}", A.to_uppercase());
        assert_eq!(file_uuids(&text), vec![(B.to_string(), 2), (A.to_string(), 2)]);
    }

    #[test]
    fn test_scan_aggregates_and_sorts() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("a.md"), format!("{A}\n{B}\n{B}")).unwrap();
        fs::write(dir.path().join("b.py"), format!("x = '{B}'")).unwrap();
        fs::write(dir.path().join("c.rs"), A).unwrap();
        fs::write(dir.path().join("notes.bak.md"), A).unwrap();
        fs::create_dir_all(dir.path().join("logs")).unwrap();
        fs::write(dir.path().join("logs/x.md"), A).unwrap();

        let res = scan(&ScanTarget::new(dir.path()), &ScanContext::default());
        assert_eq!(res.count, 2);
        assert_eq!(res.items[0].get_str("uuid"), Some(B));
        assert_eq!(res.items[0].get("count"), Some(&serde_json::json!(3)));
        assert_eq!(res.items[0].get("locations"), Some(&serde_json::json!(["a.md", "b.py"])));
        assert_eq!(res.items[1].get_str("uuid"), Some(A));
        assert_eq!(res.items[1].get("count"), Some(&serde_json::json!(1)));
    }

    #[test]
    fn test_oversized_file_skipped() {
        let dir = TempDir::new().unwrap();
        let mut big = format!("{A}\n").into_bytes();
        big.resize(2 * 1024 * 1024, b'x');
        fs::write(dir.path().join("big.txt"), big).unwrap();
        let res = scan(&ScanTarget::new(dir.path()), &ScanContext::default());
        assert_eq!(res.count, 0);
        assert!(res.errors.is_empty());
    }

    #[test]
    fn test_canonical_cross_reference() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("a.md"), format!("{A} {B}")).unwrap();
        let list = dir.path().join("canon.yaml");
        fs::write(&list, format!("- {}\n", A.to_uppercase())).unwrap();
        let mut ctx = ScanContext::default();
        ctx.config.uuids.canonical = Some(list);
        let res = scan(&ScanTarget::new(dir.path()), &ctx);
        assert_eq!(res.summary["canonical_count"], 1);
        assert_eq!(res.summary["unregistered_count"], 1);
        let a = res.items.iter().find(|f| f.get_str("uuid") == Some(A)).unwrap();
        assert_eq!(a.get("canonical"), Some(&serde_json::json!(true)));
    }

    #[test]
    fn test_missing_target_is_setup_error() {
        let res = scan(&ScanTarget::new("/definitely/not/here"), &ScanContext::default());
        assert!(res.error.is_some());
        assert_eq!(res.count, 0);
    }
}
