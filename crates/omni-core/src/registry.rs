//! 扫描器注册表：启动时构建一次，之后只读
use std::fmt;
use std::time::Instant;
use tracing::info;

use crate::error::{Result, ScanError};
use crate::options::ScanTarget;
use crate::report::Report;
use crate::scanners::{census, cohesion, content, graph, packages, surfaces, uuids, ScanContext, ScanFn};

/// 注册表中的一项
#[derive(Clone, Copy)]
pub struct ScannerEntry {
    pub name: &'static str,
    pub category: &'static str,
    pub description: &'static str,
    pub scan: ScanFn,
}

impl fmt::Debug for ScannerEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScannerEntry").field("name", &self.name).field("category", &self.category).finish()
    }
}

#[derive(Debug, Clone)]
pub struct Registry {
    entries: Vec<ScannerEntry>,
}

impl Registry {
    /// 内置扫描器（注册顺序即默认执行顺序）
    pub fn builtin() -> Self {
        Self::from_entries(vec![
            ScannerEntry {
                name: surfaces::NAME,
                category: "static",
                description: "Detect HTTP/MCP/CLI/bus/DB/UI surfaces and estimate contract coverage",
                scan: surfaces::scan,
            },
            ScannerEntry {
                name: uuids::NAME,
                category: "static",
                description: "Map UUIDs to the files they appear in",
                scan: uuids::scan,
            },
            ScannerEntry {
                name: cohesion::NAME,
                category: "library",
                description: "Classify folders as MODULE, DUMP_GROUND or AMBIGUOUS",
                scan: cohesion::scan,
            },
            ScannerEntry {
                name: content::NAME,
                category: "library",
                description: "Sample file heads for binary magic, shebang, frontmatter and keywords",
                scan: content::scan,
            },
            ScannerEntry {
                name: graph::NAME,
                category: "library",
                description: "Extract markdown links and imports, report broken links",
                scan: graph::scan,
            },
            ScannerEntry {
                name: packages::NAME,
                category: "static",
                description: "Read package manifests and detect CLI/MCP/HTTP interfaces",
                scan: packages::scan,
            },
            ScannerEntry {
                name: census::NAME,
                category: "discovery",
                description: "Count files by extension, size, workspace or age",
                scan: census::scan,
            },
        ])
    }

    pub fn from_entries(entries: Vec<ScannerEntry>) -> Self {
        Self { entries }
    }

    pub fn get(&self, name: &str) -> Result<&ScannerEntry> {
        self.entries
            .iter()
            .find(|e| e.name == name)
            .ok_or_else(|| ScanError::UnknownScanner(name.to_string()))
    }

    /// 先解析全部名称，任一未知即整体拒绝；空列表表示全部；重复名称只保留第一次
    pub fn select<S: AsRef<str>>(&self, names: &[S]) -> Result<Vec<&ScannerEntry>> {
        if names.is_empty() {
            return Ok(self.entries.iter().collect());
        }
        let mut selected: Vec<&ScannerEntry> = Vec::with_capacity(names.len());
        for n in names {
            let entry = self.get(n.as_ref())?;
            if !selected.iter().any(|e| e.name == entry.name) {
                selected.push(entry);
            }
        }
        Ok(selected)
    }

    pub fn entries(&self) -> &[ScannerEntry] {
        &self.entries
    }

    pub fn by_category<'a>(&'a self, category: &'a str) -> impl Iterator<Item = &'a ScannerEntry> + 'a {
        self.entries.iter().filter(move |e| e.category == category)
    }

    /// 依次执行所选扫描器并汇总为报告
    pub fn run<S: AsRef<str>>(&self, names: &[S], target: &ScanTarget, ctx: &ScanContext) -> Result<Report> {
        let selected = self.select(names)?;
        let mut report = Report::new(target.path());
        for entry in selected {
            let started = Instant::now();
            info!(scanner = entry.name, target = %target.path().display(), "running scanner");
            let result = (entry.scan)(target, ctx);
            info!(
                scanner = entry.name,
                count = result.count,
                errors = result.errors.len(),
                failed = result.is_failed(),
                elapsed_ms = started.elapsed().as_millis() as u64,
                "scanner finished"
            );
            report.add(result);
        }
        report.finish();
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ScanResult;

    fn stub(_: &ScanTarget, _: &ScanContext) -> ScanResult {
        let mut r = ScanResult::new("stub", ".");
        r.record_error("one");
        r
    }

    #[test]
    fn test_builtin_names_unique() {
        let reg = Registry::builtin();
        let names: Vec<_> = reg.entries().iter().map(|e| e.name).collect();
        assert_eq!(names, vec!["surfaces", "uuids", "cohesion", "content", "graph", "packages", "census"]);
        assert_eq!(reg.by_category("library").count(), 3);
    }

    #[test]
    fn test_unknown_name_rejects_whole_request() {
        let reg = Registry::builtin();
        assert!(matches!(reg.get("nope"), Err(ScanError::UnknownScanner(n)) if n == "nope"));
        assert!(reg.select(&["uuids", "nope"]).is_err());
        assert_eq!(reg.select::<&str>(&[]).unwrap().len(), 7);
    }

    #[test]
    fn test_duplicate_names_run_once() {
        let reg = Registry::builtin();
        let names: Vec<_> = reg.select(&["uuids", "graph", "uuids"]).unwrap().iter().map(|e| e.name).collect();
        assert_eq!(names, vec!["uuids", "graph"]);

        let stubs = Registry::from_entries(vec![ScannerEntry { name: "stub", category: "test", description: "", scan: stub }]);
        let report = stubs.run(&["stub", "stub"], &ScanTarget::new("."), &ScanContext::default()).unwrap();
        assert_eq!(report.summary.scanners_run, vec!["stub".to_string()]);
        assert_eq!(report.findings.len(), 1);
        assert_eq!(report.summary.total_errors, 1);
    }

    #[test]
    fn test_restricted_table_runs() {
        let reg = Registry::from_entries(vec![ScannerEntry {
            name: "stub",
            category: "test",
            description: "",
            scan: stub,
        }]);
        let report = reg.run(&["stub"], &ScanTarget::new("."), &ScanContext::default()).unwrap();
        assert_eq!(report.summary.scanners_run, vec!["stub".to_string()]);
        assert_eq!(report.summary.total_errors, 1);
        assert!(reg.run(&["surfaces"], &ScanTarget::new("."), &ScanContext::default()).is_err());
    }
}
