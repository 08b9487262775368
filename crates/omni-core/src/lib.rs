//! omni 核心库：文件遍历、扫描器契约与内置扫描器、汇总报告
//!
//! 单次调用的结果完全由调用者拥有；注册表构建后只读，不存在全局可变状态。
pub mod cancel;
pub mod config;
pub mod error;
pub mod findings;
pub mod options;
mod pool;
pub mod registry;
pub mod report;
pub mod scanners;
pub mod types;
pub mod walker;

pub use cancel::{Budget, CancelToken};
pub use config::{load_config, resolve_config, Config};
pub use error::{Result, ScanError};
pub use findings::Finding;
pub use options::{ScanParams, ScanTarget};
pub use registry::{Registry, ScannerEntry};
pub use report::{write_json, write_yaml, Report, ReportSummary, Risk, SurfaceRisk};
pub use scanners::{ScanContext, ScanFn};
pub use types::ScanResult;
pub use walker::{FileWalker, WalkEntry};
