//! 汇总报告：各扫描器结果 + 总体统计 + surface 风险评级
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::io::Write;
use std::path::Path;

use crate::scanners::surfaces;
use crate::types::ScanResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Risk {
    Low,
    Medium,
    High,
}

/// surface 契约覆盖情况
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SurfaceRisk {
    pub total: usize,
    /// 不含 external_reference 范围
    pub missing: usize,
    pub partial: usize,
    pub exists: usize,
    pub risk: Risk,
}

impl SurfaceRisk {
    pub fn from_result(result: &ScanResult) -> Self {
        let (mut missing, mut partial, mut exists) = (0, 0, 0);
        for item in &result.items {
            match item.get_str("status") {
                Some("missing") if item.get_str("scope") != Some("external_reference") => missing += 1,
                Some("partial") => partial += 1,
                Some("exists") => exists += 1,
                _ => {}
            }
        }
        let total = result.items.len();
        let risk = if missing > 0 {
            Risk::High
        } else if partial * 10 > total * 9 {
            Risk::Medium
        } else {
            Risk::Low
        };
        Self { total, missing, partial, exists, risk }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ReportSummary {
    pub scanners_run: Vec<String>,
    pub total_items: usize,
    pub total_errors: usize,
    /// 带启动错误的扫描器
    pub failed: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub surfaces: Option<SurfaceRisk>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Report {
    pub target: String,
    pub version: String,
    pub generated_at: DateTime<Utc>,
    pub findings: BTreeMap<String, ScanResult>,
    pub summary: ReportSummary,
}

impl Report {
    pub fn new(target: &Path) -> Self {
        Self {
            target: target.display().to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            generated_at: Utc::now(),
            findings: BTreeMap::new(),
            summary: ReportSummary::default(),
        }
    }

    pub fn add(&mut self, result: ScanResult) {
        self.summary.scanners_run.push(result.scanner.clone());
        self.findings.insert(result.scanner.clone(), result);
    }

    /// 重新计算汇总统计
    pub fn finish(&mut self) {
        let s = &mut self.summary;
        s.total_items = self.findings.values().map(|r| r.items.len()).sum();
        s.total_errors = self.findings.values().map(|r| r.errors.len()).sum();
        s.failed = self.findings.values().filter(|r| r.is_failed()).map(|r| r.scanner.clone()).collect();
        s.surfaces = self
            .findings
            .get(surfaces::NAME)
            .filter(|r| !r.is_failed())
            .map(SurfaceRisk::from_result);
    }
}

pub fn write_json<W: Write>(report: &Report, mut out: W) -> Result<()> {
    serde_json::to_writer_pretty(&mut out, report).context("serialize report as json")?;
    writeln!(out).context("write report")?;
    Ok(())
}

pub fn write_yaml<W: Write>(report: &Report, out: W) -> Result<()> {
    serde_yaml::to_writer(out, report).context("serialize report as yaml")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::findings::Finding;
    use serde_json::json;

    fn surface(status: &str, scope: &str) -> Finding {
        Finding::new("a.py", "http").with_payload(&json!({"status": status, "scope": scope}))
    }

    #[test]
    fn test_surface_risk_levels() {
        let mut r = ScanResult::new(surfaces::NAME, ".");
        r.extend([surface("exists", "internal"), surface("missing", "external_reference")]);
        assert_eq!(SurfaceRisk::from_result(&r).risk, Risk::Low);
        assert_eq!(SurfaceRisk::from_result(&r).missing, 0);
        r.push(surface("missing", "internal"));
        assert_eq!(SurfaceRisk::from_result(&r).risk, Risk::High);

        let mut p = ScanResult::new(surfaces::NAME, ".");
        p.extend((0..10).map(|_| surface("partial", "internal")));
        assert_eq!(SurfaceRisk::from_result(&p).risk, Risk::Medium);
    }

    #[test]
    fn test_summary_and_writers() {
        let mut report = Report::new(Path::new("/tmp/x"));
        let mut ok = ScanResult::new("uuids", "/tmp/x");
        ok.push(Finding::new("a.md", "uuid"));
        ok.record_error("bad file");
        report.add(ok);
        let mut bad = ScanResult::new("graph", "/tmp/x");
        bad.error = Some("target does not exist".into());
        report.add(bad);
        report.finish();
        assert_eq!(report.summary.total_items, 1);
        assert_eq!(report.summary.total_errors, 1);
        assert_eq!(report.summary.failed, vec!["graph".to_string()]);
        assert!(report.summary.surfaces.is_none());

        let mut buf = Vec::new();
        write_json(&report, &mut buf).unwrap();
        let v: serde_json::Value = serde_json::from_slice(&buf).unwrap();
        assert_eq!(v["findings"]["uuids"]["count"], 1);
        assert_eq!(v["summary"]["scanners_run"], json!(["uuids", "graph"]));

        let mut yaml = Vec::new();
        write_yaml(&report, &mut yaml).unwrap();
        assert!(String::from_utf8(yaml).unwrap().contains("scanners_run"));
    }
}
