use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use omni_core::{resolve_config, write_json, write_yaml, CancelToken, Registry, ScanContext, ScanParams, ScanTarget};
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{info, warn};

/// 命令行入口（基于 clap）
#[derive(Parser, Debug)]
#[command(name = "omni", version, about = "Filesystem scanners for project governance")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Format {
    Json,
    Yaml,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// 运行扫描器并输出汇总报告
    Scan {
        /// 扫描目标（目录或文件）
        #[arg(default_value = ".")]
        target: PathBuf,

        /// 逗号分隔的扫描器名；缺省运行全部
        #[arg(long, value_delimiter = ',')]
        scanners: Vec<String>,

        /// 输出文件；缺省写到 stdout
        #[arg(long)]
        output: Option<PathBuf>,

        #[arg(long, value_enum, default_value = "json")]
        format: Format,

        /// 配置文件（TOML）；缺省查找 <target>/omni.toml 与上一级目录
        #[arg(long)]
        config: Option<PathBuf>,

        /// 文件 glob（content / graph）
        #[arg(long)]
        pattern: Option<String>,

        /// census 维度：extension / size_bucket / workspace / date_bucket
        #[arg(long)]
        dimension: Option<String>,

        /// cohesion 递归深度
        #[arg(long)]
        max_depth: Option<usize>,

        /// 单扫描器文件数上限
        #[arg(long)]
        max_files: Option<usize>,

        /// content 采样字节数
        #[arg(long)]
        sample_size: Option<usize>,

        /// cohesion 最低分过滤
        #[arg(long)]
        min_cohesion: Option<f64>,

        /// 线程数（"auto"=CPU 核心数）
        #[arg(long, default_value = "auto")]
        threads: String,

        /// 超时秒数，到期后扫描器返回部分结果
        #[arg(long)]
        timeout_secs: Option<u64>,
    },
    /// 列出已注册的扫描器
    List,
}

fn main() -> Result<()> {
    // 初始化日志（支持通过 RUST_LOG 控制等级，例如 info、debug）
    init_tracing();
    let cli = Cli::parse();
    let registry = Registry::builtin();

    match cli.command {
        Commands::List => {
            let stdout = io::stdout();
            let mut out = stdout.lock();
            for e in registry.entries() {
                writeln!(out, "{:<10} {:<10} {}", e.name, e.category, e.description)?;
            }
        }
        Commands::Scan {
            target,
            scanners,
            output,
            format,
            config,
            pattern,
            dimension,
            max_depth,
            max_files,
            sample_size,
            min_cohesion,
            threads,
            timeout_secs,
        } => {
            // 未知扫描器名在任何扫描开始前拒绝
            if let Err(e) = registry.select(&scanners) {
                bail!("{e}");
            }
            info!(?target, ?scanners, "starting scan");

            let root = if target.is_file() { target.parent().map(PathBuf::from).unwrap_or_default() } else { target.clone() };
            let cfg = resolve_config(config.as_deref(), &root).context("load config")?;
            let cancel = match timeout_secs {
                Some(s) => CancelToken::with_timeout(Duration::from_secs(s)),
                None => CancelToken::new(),
            };
            let ctx = ScanContext::new(cfg).with_cancel(cancel);

            // 解析线程参数："auto" 表示自动（等于 CPU 核数）；其他为具体数值
            let params = ScanParams {
                pattern,
                dimension,
                max_depth,
                max_files,
                sample_size,
                min_cohesion,
                threads: parse_threads(&threads),
            };
            let scan_target = ScanTarget::new(&target).with_params(params);
            let report = registry.run(&scanners, &scan_target, &ctx).context("scan failed")?;

            for name in &report.summary.failed {
                warn!(scanner = %name, "scanner reported a setup error");
            }

            match output {
                Some(path) => {
                    // 以缓冲方式打开输出文件
                    let mut out = BufWriter::new(File::create(&path).context("create output file")?);
                    write_report(&report, format, &mut out)?;
                    out.flush().context("flush output")?;
                    info!(?path, "report written");
                }
                None => {
                    let stdout = io::stdout();
                    let mut out = stdout.lock();
                    write_report(&report, format, &mut out)?;
                }
            }
            info!(
                scanners = report.summary.scanners_run.len(),
                items = report.summary.total_items,
                errors = report.summary.total_errors,
                "scan finished"
            );
        }
    }

    Ok(())
}

fn write_report<W: Write>(report: &omni_core::Report, format: Format, out: W) -> Result<()> {
    match format {
        Format::Json => write_json(report, out),
        Format::Yaml => write_yaml(report, out),
    }
}

fn init_tracing() {
    use tracing_subscriber::{EnvFilter, FmtSubscriber};
    // 日志写 stderr，stdout 留给报告
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = FmtSubscriber::builder().with_env_filter(env_filter).with_writer(io::stderr).finish();
    let _ = tracing::subscriber::set_global_default(subscriber);
}

/// 解析线程参数
fn parse_threads(s: &str) -> Option<usize> {
    if s.eq_ignore_ascii_case("auto") {
        return None;
    }
    match s.parse::<usize>() {
        Ok(n) if n >= 1 => Some(n),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_threads() {
        assert_eq!(parse_threads("auto"), None);
        assert_eq!(parse_threads("4"), Some(4));
        assert_eq!(parse_threads("0"), None);
    }

    #[test]
    fn test_cli_parses_scanner_list() {
        let cli = Cli::try_parse_from(["omni", "scan", "/tmp", "--scanners", "uuids,graph", "--format", "yaml"]).unwrap();
        match cli.command {
            Commands::Scan { scanners, format, .. } => {
                assert_eq!(scanners, vec!["uuids", "graph"]);
                assert!(matches!(format, Format::Yaml));
            }
            Commands::List => panic!("expected scan"),
        }
    }
}
