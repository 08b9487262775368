//! 扫描错误类型
use std::path::PathBuf;
use thiserror::Error;

/// 扫描过程中可能出现的错误
/// - 启动类错误（目标不存在/类型不对/参数非法）：写入结果信封的 `error`，该扫描器终止
/// - 单文件错误（权限、读失败）：收集到 `errors`，扫描继续
/// - 配置错误（未知扫描器名）：由注册表直接拒绝，不执行任何扫描
#[derive(Debug, Error)]
pub enum ScanError {
    #[error("target does not exist: {0}")]
    TargetMissing(PathBuf),

    #[error("target is not a directory: {0}")]
    NotADirectory(PathBuf),

    #[error("unknown scanner: {0}")]
    UnknownScanner(String),

    #[error("invalid parameter {name}: {reason}")]
    InvalidParam { name: &'static str, reason: String },

    #[error("{path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot parse {path}: {reason}")]
    Parse { path: PathBuf, reason: String },

    #[error("walk error: {0}")]
    Walk(#[from] walkdir::Error),

    #[error("config error: {0}")]
    Config(String),

    #[error("scan cancelled")]
    Cancelled,
}

impl ScanError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        ScanError::Io { path: path.into(), source }
    }
}

pub type Result<T, E = ScanError> = std::result::Result<T, E>;
