//! oscap 命令行参数构建与前置能力检查
//!
//! 参数顺序固定，便于测试与日志比对；值为空的选项整体省略，
//! 避免 oscap 把空值当成显式覆盖。
use std::ffi::OsString;
use std::path::Path;

use crate::capabilities::{Feature, ToolCapabilities};
use crate::config::{ScanConfiguration, ScannerMode};
use crate::error::{ScanError, ScanResult};

/// 三个输出文件（结果、HTML 报告、ARF）
#[derive(Debug, Clone, Copy)]
pub struct OutputPaths<'a> {
    pub results: &'a Path,
    pub report: &'a Path,
    pub arf: &'a Path,
}

/// 参数构建器：配置与能力的纯函数
#[derive(Debug, Clone, Copy)]
pub struct ArgumentBuilder<'a> {
    config: &'a ScanConfiguration,
    caps: &'a ToolCapabilities,
}

impl<'a> ArgumentBuilder<'a> {
    pub fn new(config: &'a ScanConfiguration, caps: &'a ToolCapabilities) -> Self {
        Self { config, caps }
    }

    /// `xccdf eval ...`
    ///
    /// 请求在线修复但工具不支持时静默降级为普通评估。
    pub fn evaluation_args(
        &self,
        input: &Path,
        tailoring: Option<&Path>,
        outputs: OutputPaths<'_>,
        online_remediation: bool,
    ) -> Vec<OsString> {
        let mut ret: Vec<OsString> = vec!["xccdf".into(), "eval".into()];

        if self.config.skip_validation { ret.push("--skip-valid".into()); }
        if self.config.fetch_remote_resources { ret.push("--fetch-remote-resources".into()); }

        if self.config.source_datastream {
            // datastream-id 与 xccdf-id 相互独立
            if let Some(id) = non_empty(self.config.datastream_id.as_deref()) {
                ret.push("--datastream-id".into());
                ret.push(id.into());
            }
            if let Some(id) = non_empty(self.config.component_id.as_deref()) {
                ret.push("--xccdf-id".into());
                ret.push(id.into());
            }
        }

        if let Some(path) = tailoring.filter(|p| !p.as_os_str().is_empty()) {
            ret.push("--tailoring-file".into());
            ret.push(path.into());
        }

        if let Some(profile) = non_empty(Some(self.config.profile.as_str())) {
            ret.push("--profile".into());
            ret.push(profile.into());
        }

        self.push_outputs(&mut ret, outputs);

        if online_remediation && self.caps.supports(Feature::OnlineRemediation) {
            ret.push("--remediate".into());
        }

        ret.push(input.into());
        ret
    }

    /// `xccdf remediate ...`，输入为之前扫描产生的 ARF 或结果文件
    pub fn offline_remediation_args(&self, result_input: &Path, outputs: OutputPaths<'_>) -> Vec<OsString> {
        let mut ret: Vec<OsString> = vec!["xccdf".into(), "remediate".into()];

        if self.config.skip_validation { ret.push("--skip-valid".into()); }

        self.push_outputs(&mut ret, outputs);

        ret.push(result_input.into());
        ret
    }

    /// OVAL 结果本身不被读取，但 oscap 生成 HTML 报告时会用到它们
    fn push_outputs(&self, ret: &mut Vec<OsString>, outputs: OutputPaths<'_>) {
        ret.push("--oval-results".into());
        ret.push("--results".into());
        ret.push(outputs.results.into());
        ret.push("--results-arf".into());
        ret.push(outputs.arf.into());
        ret.push("--report".into());
        ret.push(outputs.report.into());

        if self.caps.supports(Feature::ProgressReporting) {
            ret.push("--progress".into());
        }
    }
}

fn non_empty(v: Option<&str>) -> Option<&str> {
    v.filter(|s| !s.is_empty())
}

/// 启动前按固定顺序检查能力，遇到第一个缺失即失败
pub fn check_prerequisites(caps: &ToolCapabilities, config: &ScanConfiguration, mode: ScannerMode) -> ScanResult<()> {
    let required = [
        (Feature::Baseline, true),
        (Feature::OnlineRemediation, mode == ScannerMode::ScanOnlineRemediation),
        (Feature::ArfInput, mode == ScannerMode::OfflineRemediation),
        (Feature::SourceDatastreams, config.source_datastream),
        (Feature::Tailoring, config.has_tailoring()),
    ];

    match required.into_iter().find(|(f, needed)| *needed && !caps.supports(*f)) {
        Some((feature, _)) => Err(ScanError::CapabilityMismatch { feature, version: caps.version_string().to_string() }),
        None => Ok(()),
    }
}
