//! 文件遍历器：目录剪枝 + 路径片段/扩展名/大小过滤
//!
//! - 被排除的目录在下降前剪枝，从不打开
//! - 每层按文件名排序，输出顺序可复现
//! - 单个条目的 I/O 错误以 `Err` 形式产出，遍历继续
//! - 无内部状态，可重复调用 `files()` 重新扫描
use globset::{GlobBuilder, GlobMatcher};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use walkdir::{DirEntry, WalkDir};

use crate::cancel::CancelToken;
use crate::config::ScanSection;
use crate::error::{Result, ScanError};

/// 遍历产出的候选文件
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalkEntry {
    pub path: PathBuf,
    /// 相对扫描根的路径（`/` 分隔）
    pub relative: String,
    pub size: u64,
}

/// 遍历产出的候选目录（cohesion 用）
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirWalkEntry {
    pub path: PathBuf,
    pub relative: String,
    pub depth: usize,
}

#[derive(Debug, Clone)]
pub struct FileWalker {
    root: PathBuf,
    exclude_dirs: HashSet<String>,
    exclude_phrases: Vec<String>,
    /// 文件名后缀白名单（小写，含点）；None 表示不限
    suffixes: Option<Vec<String>>,
    /// 文件名包含即跳过
    ignore_names: Vec<String>,
    max_file_size: Option<u64>,
    include: Option<GlobMatcher>,
    skip_hidden_dirs: bool,
    allow_hidden: HashSet<String>,
    max_depth: Option<usize>,
    /// 子目录含任一该文件名即剪枝
    stop_markers: Vec<String>,
    cancel: Option<CancelToken>,
}

impl FileWalker {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            exclude_dirs: HashSet::new(),
            exclude_phrases: Vec::new(),
            suffixes: None,
            ignore_names: Vec::new(),
            max_file_size: None,
            include: None,
            skip_hidden_dirs: false,
            allow_hidden: HashSet::new(),
            max_depth: None,
            stop_markers: Vec::new(),
            cancel: None,
        }
    }

    /// 以配置中的通用排除规则初始化
    pub fn from_config(root: impl Into<PathBuf>, scan: &ScanSection) -> Self {
        Self::new(root)
            .exclude_dirs(scan.exclude_dirs.iter().cloned())
            .exclude_phrases(scan.exclude_phrases.iter().cloned())
            .max_file_size(Some(scan.max_file_size))
    }

    pub fn exclude_dirs<I, S>(mut self, dirs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.exclude_dirs.extend(dirs.into_iter().map(Into::into));
        self
    }

    pub fn exclude_phrases<I, S>(mut self, phrases: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.exclude_phrases.extend(phrases.into_iter().map(Into::into));
        self
    }

    pub fn suffixes(mut self, suffixes: &[&str]) -> Self {
        self.suffixes = Some(suffixes.iter().map(|s| s.to_lowercase()).collect());
        self
    }

    pub fn ignore_names(mut self, names: &[&str]) -> Self {
        self.ignore_names.extend(names.iter().map(|s| s.to_string()));
        self
    }

    pub fn max_file_size(mut self, max: Option<u64>) -> Self {
        self.max_file_size = max;
        self
    }

    /// 相对路径 glob（`*` 不跨目录，`**` 跨任意层）
    pub fn include_glob(mut self, pattern: &str) -> Result<Self> {
        let glob = GlobBuilder::new(pattern)
            .literal_separator(true)
            .build()
            .map_err(|e| ScanError::InvalidParam { name: "pattern", reason: e.to_string() })?;
        self.include = Some(glob.compile_matcher());
        Ok(self)
    }

    /// 跳过以 `.` 开头的目录，`allow` 中列出的除外
    pub fn skip_hidden_dirs(mut self, allow: &[&str]) -> Self {
        self.skip_hidden_dirs = true;
        self.allow_hidden = allow.iter().map(|s| s.to_string()).collect();
        self
    }

    /// 不进入自带标记文件的子目录（根目录除外），例如嵌套包
    pub fn stop_at_markers(mut self, markers: &[&str]) -> Self {
        self.stop_markers = markers.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn max_depth(mut self, depth: usize) -> Self {
        self.max_depth = Some(depth);
        self
    }

    pub fn cancel_token(mut self, token: CancelToken) -> Self {
        self.cancel = Some(token);
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// 惰性产出候选文件
    pub fn files(&self) -> Walk<'_, WalkEntry> {
        Walk { inner: Box::new(self.walkdir().into_iter().filter_entry(move |e| self.keep_entry(e))), walker: self, done: false, map: Self::map_file }
    }

    /// 惰性产出候选目录（不含根本身）
    pub fn dirs(&self) -> Walk<'_, DirWalkEntry> {
        Walk { inner: Box::new(self.walkdir().min_depth(1).into_iter().filter_entry(move |e| self.keep_entry(e))), walker: self, done: false, map: Self::map_dir }
    }

    fn walkdir(&self) -> WalkDir {
        let mut wd = WalkDir::new(&self.root).sort_by_file_name();
        if let Some(d) = self.max_depth {
            wd = wd.max_depth(d);
        }
        wd
    }

    /// 目录剪枝；根目录本身总是保留
    fn keep_entry(&self, entry: &DirEntry) -> bool {
        if entry.depth() == 0 || !entry.file_type().is_dir() {
            return true;
        }
        let name = entry.file_name().to_string_lossy();
        if self.exclude_dirs.contains(name.as_ref()) {
            return false;
        }
        if self.skip_hidden_dirs && name.starts_with('.') && !self.allow_hidden.contains(name.as_ref()) {
            return false;
        }
        if self.stop_markers.iter().any(|m| entry.path().join(m).is_file()) {
            return false;
        }
        true
    }

    fn relative(&self, path: &Path) -> String {
        let rel = path.strip_prefix(&self.root).unwrap_or(path);
        rel.components().map(|c| c.as_os_str().to_string_lossy()).collect::<Vec<_>>().join("/")
    }

    fn map_file(&self, entry: DirEntry) -> Option<Result<WalkEntry>> {
        if !entry.file_type().is_file() {
            return None;
        }
        let name = entry.file_name().to_string_lossy().to_lowercase();
        if let Some(suffixes) = &self.suffixes {
            if !suffixes.iter().any(|s| name.ends_with(s.as_str())) {
                return None;
            }
        }
        let raw_name = entry.file_name().to_string_lossy();
        if self.ignore_names.iter().any(|n| raw_name.contains(n.as_str())) {
            return None;
        }
        let full = entry.path().to_string_lossy().replace('\\', "/");
        if self.exclude_phrases.iter().any(|p| full.contains(p.as_str())) {
            return None;
        }
        let relative = self.relative(entry.path());
        if let Some(glob) = &self.include {
            if !glob.is_match(&relative) {
                return None;
            }
        }
        let size = match entry.metadata() {
            Ok(md) => md.len(),
            Err(e) => return Some(Err(ScanError::Walk(e))),
        };
        if let Some(max) = self.max_file_size {
            if size > max {
                tracing::debug!(path = %entry.path().display(), size, "skipping oversized file");
                return None;
            }
        }
        Some(Ok(WalkEntry { path: entry.into_path(), relative, size }))
    }

    fn map_dir(&self, entry: DirEntry) -> Option<Result<DirWalkEntry>> {
        if !entry.file_type().is_dir() {
            return None;
        }
        let relative = self.relative(entry.path());
        let depth = entry.depth();
        Some(Ok(DirWalkEntry { path: entry.into_path(), relative, depth }))
    }
}

/// 惰性遍历迭代器；取消后产出一次 `Cancelled` 并结束
pub struct Walk<'a, T> {
    inner: Box<dyn Iterator<Item = walkdir::Result<DirEntry>> + 'a>,
    walker: &'a FileWalker,
    done: bool,
    map: fn(&FileWalker, DirEntry) -> Option<Result<T>>,
}

impl<'a, T> Iterator for Walk<'a, T> {
    type Item = Result<T>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.done {
                return None;
            }
            if self.walker.cancel.as_ref().is_some_and(CancelToken::is_cancelled) {
                self.done = true;
                return Some(Err(ScanError::Cancelled));
            }
            match self.inner.next()? {
                Err(e) => {
                    tracing::debug!(error = %e, "walk entry failed");
                    return Some(Err(ScanError::Walk(e)));
                }
                Ok(entry) => {
                    if let Some(r) = (self.map)(self.walker, entry) {
                        return Some(r);
                    }
                }
            }
        }
    }
}
