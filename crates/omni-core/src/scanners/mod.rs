//! 扫描器集合与统一契约
//!
//! 每个扫描器是一个普通函数 `fn(&ScanTarget, &ScanContext) -> ScanResult`：
//! - 不修改目标；结构缺失时返回空/部分结果
//! - 目标不存在等启动错误写入信封的 `error`，从不向调用方传播
//! - 单文件错误收集到 `errors`
pub mod census;
pub mod cohesion;
pub mod content;
pub mod graph;
pub mod packages;
pub mod surfaces;
pub mod uuids;

use std::path::{Path, PathBuf};

use crate::cancel::{Budget, CancelToken};
use crate::config::Config;
use crate::error::{Result, ScanError};
use crate::options::ScanTarget;
use crate::types::ScanResult;
use crate::walker::{FileWalker, Walk, WalkEntry};

/// 扫描器入口函数签名
pub type ScanFn = fn(&ScanTarget, &ScanContext) -> ScanResult;

/// 所有扫描器共享的只读上下文
#[derive(Debug, Default)]
pub struct ScanContext {
    pub config: Config,
    pub cancel: CancelToken,
    pub budget: Budget,
}

impl ScanContext {
    pub fn new(config: Config) -> Self {
        Self { config, cancel: CancelToken::new(), budget: Budget::unlimited() }
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_budget(mut self, budget: Budget) -> Self {
        self.budget = budget;
        self
    }

    /// 带通用排除规则与取消令牌的遍历器
    pub(crate) fn walker(&self, root: &Path) -> FileWalker {
        FileWalker::from_config(root, &self.config.scan).cancel_token(self.cancel.clone())
    }

    pub(crate) fn threads(&self, target: &ScanTarget) -> usize {
        crate::pool::resolve_threads(target.params.threads.or(self.config.scan.threads))
    }
}

/// 启动检查：目标必须存在；返回扫描根目录
pub(crate) fn resolve_root(target: &ScanTarget) -> Result<PathBuf> {
    let path = target.path();
    if !path.exists() {
        return Err(ScanError::TargetMissing(path.to_path_buf()));
    }
    Ok(target.root_dir())
}

/// 启动检查：目标必须是目录
pub(crate) fn require_dir(target: &ScanTarget) -> Result<PathBuf> {
    let path = target.path();
    if !path.exists() {
        return Err(ScanError::TargetMissing(path.to_path_buf()));
    }
    if !path.is_dir() {
        return Err(ScanError::NotADirectory(path.to_path_buf()));
    }
    Ok(path.to_path_buf())
}

/// 项目名：扫描根目录的最后一段（解析失败时用原路径）
pub(crate) fn project_name(root: &Path) -> String {
    let resolved = root.canonicalize().unwrap_or_else(|_| root.to_path_buf());
    resolved
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| resolved.display().to_string())
}

pub(crate) fn display(path: &Path) -> String {
    path.display().to_string()
}

/// 按遍历顺序收集候选文件，同时执行 max_files 与共享预算
///
/// 取消或预算耗尽时停止并在 `errors` 中记一条说明，已收集的部分照常返回。
pub(crate) fn collect_files(
    walk: Walk<'_, WalkEntry>,
    max_files: Option<usize>,
    budget: &Budget,
    result: &mut ScanResult,
) -> Vec<WalkEntry> {
    try_collect_files(walk, max_files, budget, result).0
}

/// 同 `collect_files`，另返回是否因取消或预算耗尽而提前停止
pub(crate) fn try_collect_files(
    walk: Walk<'_, WalkEntry>,
    max_files: Option<usize>,
    budget: &Budget,
    result: &mut ScanResult,
) -> (Vec<WalkEntry>, bool) {
    let mut out = Vec::new();
    for entry in walk {
        if max_files.is_some_and(|m| out.len() >= m) {
            break;
        }
        match entry {
            Ok(e) => {
                if !budget.try_take(e.size) {
                    tracing::debug!(scanner = %result.scanner, "file budget exhausted");
                    result.record_error("file budget exhausted");
                    return (out, true);
                }
                out.push(e);
            }
            Err(ScanError::Cancelled) => {
                result.record_error(ScanError::Cancelled);
                return (out, true);
            }
            Err(e) => result.record_error(e),
        }
    }
    (out, false)
}
