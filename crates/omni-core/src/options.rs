//! 扫描目标与参数（模块）
use std::path::{Path, PathBuf};

/// 单次调用的扫描参数；全部可选，缺省值由各扫描器自行决定
#[derive(Debug, Clone, Default)]
pub struct ScanParams {
    /// 相对根目录的文件 glob，例如 `**/*.md`
    pub pattern: Option<String>,
    /// census 的统计维度（extension / size_bucket / workspace / date_bucket）
    pub dimension: Option<String>,
    /// 目录递归深度上限（cohesion）
    pub max_depth: Option<usize>,
    /// 单扫描器处理的文件数上限
    pub max_files: Option<usize>,
    /// 内容采样字节数（content）
    pub sample_size: Option<usize>,
    /// cohesion 结果的最低分过滤
    pub min_cohesion: Option<f64>,
    /// 线程数：None 表示自动（等于 CPU 核数）；Some(1) 走串行
    pub threads: Option<usize>,
}

/// 扫描目标：路径 + 参数，单次调用内不可变
#[derive(Debug, Clone)]
pub struct ScanTarget {
    pub path: PathBuf,
    pub params: ScanParams,
}

impl ScanTarget {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into(), params: ScanParams::default() }
    }

    pub fn with_params(mut self, params: ScanParams) -> Self {
        self.params = params;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// 目标若为文件，则以其父目录作为扫描根
    pub(crate) fn root_dir(&self) -> PathBuf {
        if self.path.is_file() {
            self.path.parent().map(Path::to_path_buf).unwrap_or_else(|| self.path.clone())
        } else {
            self.path.clone()
        }
    }
}
