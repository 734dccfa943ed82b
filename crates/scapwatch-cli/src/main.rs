use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use scapwatch_core::{
    detect_capabilities, load_config, AppConfig, JsonLinesSink, LocalScanner, NotificationSink, OutputPaths,
    ScanOutcome, ScannerMode, ToolCapabilities,
};
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};

/// 命令行入口（基于 clap）
#[derive(Parser, Debug)]
#[command(name = "scapwatch", version, about = "Run oscap and follow its scan progress")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// 评估 XCCDF / SCAP source datastream（xccdf eval）
    Scan {
        /// 输入内容（XCCDF 或 SDS）
        input: PathBuf,

        #[arg(long)]
        profile: Option<String>,

        /// tailoring 文件
        #[arg(long)]
        tailoring: Option<PathBuf>,

        /// 输入是 source datastream
        #[arg(long)]
        sds: bool,

        #[arg(long)]
        datastream_id: Option<String>,

        #[arg(long)]
        xccdf_id: Option<String>,

        /// 扫描同时执行在线修复
        #[arg(long)]
        remediate: bool,

        #[arg(long)]
        fetch_remote_resources: bool,

        #[command(flatten)]
        common: CommonArgs,
    },
    /// 对之前扫描的 ARF/结果文件执行离线修复（xccdf remediate）
    Remediate {
        /// 之前扫描产生的 ARF 或 XCCDF 结果文件
        input: PathBuf,

        #[command(flatten)]
        common: CommonArgs,
    },
    /// 打印探测到的 oscap 能力
    Capabilities {
        #[arg(long)]
        config: Option<PathBuf>,

        #[arg(long)]
        oscap: Option<PathBuf>,
    },
}

#[derive(Args, Debug)]
struct CommonArgs {
    /// 配置文件（TOML）
    #[arg(long)]
    config: Option<PathBuf>,

    /// oscap 可执行文件
    #[arg(long)]
    oscap: Option<PathBuf>,

    /// 跳过版本探测，假定 oscap 为该版本
    #[arg(long)]
    assume_version: Option<String>,

    #[arg(long)]
    skip_valid: bool,

    /// XCCDF 结果输出路径
    #[arg(long)]
    results: Option<PathBuf>,

    /// HTML 报告输出路径
    #[arg(long)]
    report: Option<PathBuf>,

    /// ARF 输出路径
    #[arg(long)]
    arf: Option<PathBuf>,

    /// 只打印 oscap 参数，不执行
    #[arg(long)]
    dry_run: bool,

    /// 以 JSON Lines 输出通知
    #[arg(long)]
    json: bool,
}

fn main() -> Result<()> {
    // 初始化日志（支持通过 RUST_LOG 控制等级，例如 info、debug）
    init_tracing();
    let cli = Cli::parse();

    match cli.command {
        Commands::Scan { input, profile, tailoring, sds, datastream_id, xccdf_id, remediate, fetch_remote_resources, common } => {
            let mut cfg = load_app_config(common.config.as_deref())?;
            let session = &mut cfg.session;
            if let Some(p) = profile { session.profile = p; }
            if tailoring.is_some() { session.tailoring_file = tailoring; }
            if datastream_id.is_some() { session.datastream_id = datastream_id; }
            if xccdf_id.is_some() { session.component_id = xccdf_id; }
            session.source_datastream |= sds;
            session.online_remediation |= remediate;
            session.fetch_remote_resources |= fetch_remote_resources;
            let mode = ScannerMode::for_evaluation(&cfg.session);
            run(cfg, mode, &input, &common)
        }
        Commands::Remediate { input, common } => {
            let cfg = load_app_config(common.config.as_deref())?;
            run(cfg, ScannerMode::OfflineRemediation, &input, &common)
        }
        Commands::Capabilities { config, oscap } => {
            let mut cfg = load_app_config(config.as_deref())?;
            if let Some(p) = oscap { cfg.oscap.path = p; }
            let caps = resolve_capabilities(&cfg, None)?;
            println!("{}", serde_json::to_string_pretty(&caps)?);
            Ok(())
        }
    }
}

fn init_tracing() {
    use tracing_subscriber::{EnvFilter, FmtSubscriber};
    // 日志写到 stderr，stdout 留给 --json / --dry-run 输出
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = FmtSubscriber::builder().with_env_filter(env_filter).with_writer(std::io::stderr).finish();
    let _ = tracing::subscriber::set_global_default(subscriber);
}

fn load_app_config(path: Option<&Path>) -> Result<AppConfig> {
    match path {
        Some(p) => load_config(p).with_context(|| format!("load config {}", p.display())),
        None => Ok(AppConfig::default()),
    }
}

/// 优先级：命令行 --assume-version > 配置 assume_version > 运行 `oscap --version`
fn resolve_capabilities(cfg: &AppConfig, assume_version: Option<&str>) -> Result<ToolCapabilities> {
    match assume_version.or(cfg.oscap.assume_version.as_deref()) {
        Some(v) => ToolCapabilities::from_version(v).context("parse assumed oscap version"),
        None => detect_capabilities(&cfg.oscap.path).context("detect oscap capabilities"),
    }
}

fn run(mut cfg: AppConfig, mode: ScannerMode, input: &Path, common: &CommonArgs) -> Result<()> {
    if let Some(p) = &common.oscap { cfg.oscap.path = p.clone(); }
    cfg.session.skip_validation |= common.skip_valid;

    let caps = resolve_capabilities(&cfg, common.assume_version.as_deref())?;
    info!(version = caps.version_string(), ?mode, ?input, "oscap ready");
    let poll = cfg.oscap.poll_interval();
    let mut scanner = LocalScanner::new(cfg.oscap.path.clone(), caps, cfg.session).with_poll_interval(poll);

    if common.dry_run {
        let placeholder = |p: &Option<PathBuf>, name: &str| p.clone().unwrap_or_else(|| PathBuf::from(name));
        let (r, h, a) = (
            placeholder(&common.results, "results.xml"),
            placeholder(&common.report, "report.html"),
            placeholder(&common.arf, "arf.xml"),
        );
        let args = scanner.build_args(mode, input, OutputPaths { results: &r, report: &h, arf: &a });
        println!("{}", shell_line(&cfg.oscap.path, &args));
        return Ok(());
    }

    let res = if common.json {
        let mut sink = JsonLinesSink::new(std::io::stdout().lock());
        let res = scanner.run(mode, input, &mut sink);
        sink.finish().context("write notifications")?;
        res
    } else {
        scanner.run(mode, input, &mut LogSink)
    };
    let outcome = res.context("scan failed")?;

    match outcome {
        ScanOutcome::Canceled => warn!("scan canceled"),
        ScanOutcome::Completed { exit_code } => {
            let lc = scanner.lifecycle();
            write_output(common.results.as_deref(), lc.results()?, "results")?;
            write_output(common.report.as_deref(), lc.report()?, "report")?;
            write_output(common.arf.as_deref(), lc.arf()?, "ARF")?;
            info!(exit_code, "scan finished");
        }
    }
    Ok(())
}

fn write_output(path: Option<&Path>, data: &[u8], what: &str) -> Result<()> {
    if let Some(p) = path {
        std::fs::write(p, data).with_context(|| format!("write {what} to {}", p.display()))?;
        info!(path = %p.display(), bytes = data.len(), "{what} written");
    }
    Ok(())
}

fn shell_line(program: &Path, args: &[OsString]) -> String {
    std::iter::once(program.as_os_str())
        .chain(args.iter().map(OsString::as_os_str))
        .map(|a| a.to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join(" ")
}

/// 以日志形式输出通知
struct LogSink;

impl NotificationSink for LogSink {
    fn progress_report(&mut self, rule_id: &str, status: &str) {
        info!(rule = rule_id, status, "progress");
    }
    fn info_message(&mut self, text: &str) {
        info!("{text}");
    }
    fn warning_message(&mut self, text: &str) {
        warn!("{text}");
    }
    fn error_message(&mut self, text: &str) {
        error!("{text}");
    }
}
