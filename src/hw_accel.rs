//! 硬件解码能力协商
//!
//! 先向 ffmpeg 查询可用的 hwaccel 列表，再按偏好选出最佳后端；
//! 没有可用后端时退回软件解码。平台差异只体现在探测结果里。

use std::process::Command;
use std::str::FromStr;

use tracing::debug;

/// 硬件加速后端
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HwBackend {
    Cuda,
    VideoToolbox,
    Vaapi,
    Qsv,
    D3d11va,
    Dxva2,
}

impl HwBackend {
    /// 自动选择时的优先顺序
    pub const PREFERENCE: [HwBackend; 6] = [
        HwBackend::Cuda,
        HwBackend::VideoToolbox,
        HwBackend::Vaapi,
        HwBackend::Qsv,
        HwBackend::D3d11va,
        HwBackend::Dxva2,
    ];

    /// ffmpeg `-hwaccel` 参数值
    pub fn ffmpeg_name(&self) -> &'static str {
        match self {
            HwBackend::Cuda => "cuda",
            HwBackend::VideoToolbox => "videotoolbox",
            HwBackend::Vaapi => "vaapi",
            HwBackend::Qsv => "qsv",
            HwBackend::D3d11va => "d3d11va",
            HwBackend::Dxva2 => "dxva2",
        }
    }

    fn from_ffmpeg_name(name: &str) -> Option<Self> {
        Self::PREFERENCE
            .into_iter()
            .find(|b| b.ffmpeg_name() == name)
    }
}

/// 配置中的加速模式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HwAccelMode {
    /// 自动探测
    #[default]
    Auto,
    /// 只用软件解码
    Software,
    /// 指定后端，不可用时退回软件
    Specific(HwBackend),
}

impl FromStr for HwAccelMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "auto" | "" => Ok(HwAccelMode::Auto),
            "software" | "none" | "off" => Ok(HwAccelMode::Software),
            other => HwBackend::from_ffmpeg_name(other)
                .map(HwAccelMode::Specific)
                .ok_or_else(|| format!("未知的硬件加速模式: {}", other)),
        }
    }
}

/// 协商结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeBackend {
    Hardware(HwBackend),
    Software,
}

/// 解析 `ffmpeg -hwaccels` 的输出
pub fn parse_hwaccels(output: &str) -> Vec<HwBackend> {
    output
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.ends_with(':'))
        .filter_map(HwBackend::from_ffmpeg_name)
        .collect()
}

/// 调用 ffmpeg 查询可用的 hwaccel；ffmpeg 不存在或执行失败时返回空列表
pub fn probe_hwaccels(ffmpeg_bin: &str) -> Vec<HwBackend> {
    match Command::new(ffmpeg_bin)
        .args(["-hide_banner", "-hwaccels"])
        .output()
    {
        Ok(output) if output.status.success() => {
            let available = parse_hwaccels(&String::from_utf8_lossy(&output.stdout));
            debug!("🔍 [硬件加速] 可用后端: {:?}", available);
            available
        }
        Ok(output) => {
            debug!("🔍 [硬件加速] ffmpeg -hwaccels 退出码 {:?}", output.status.code());
            Vec::new()
        }
        Err(e) => {
            debug!("🔍 [硬件加速] 无法执行 {}: {}", ffmpeg_bin, e);
            Vec::new()
        }
    }
}

/// 根据模式和探测结果选择解码后端
pub fn negotiate(mode: HwAccelMode, available: &[HwBackend]) -> DecodeBackend {
    match mode {
        HwAccelMode::Software => DecodeBackend::Software,
        HwAccelMode::Specific(backend) if available.contains(&backend) => DecodeBackend::Hardware(backend),
        HwAccelMode::Specific(_) => DecodeBackend::Software,
        HwAccelMode::Auto => HwBackend::PREFERENCE
            .into_iter()
            .find(|b| available.contains(b))
            .map(DecodeBackend::Hardware)
            .unwrap_or(DecodeBackend::Software),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LINUX_OUTPUT: &str = "Hardware acceleration methods:\nvdpau\ncuda\nvaapi\ndrm\nopencl\nvulkan\n\n";

    #[test]
    fn test_parse_hwaccels() {
        assert_eq!(parse_hwaccels(LINUX_OUTPUT), vec![HwBackend::Cuda, HwBackend::Vaapi]);
        assert!(parse_hwaccels("Hardware acceleration methods:\n").is_empty());
    }

    #[test]
    fn test_negotiate_auto_prefers_cuda() {
        let available = parse_hwaccels(LINUX_OUTPUT);
        assert_eq!(
            negotiate(HwAccelMode::Auto, &available),
            DecodeBackend::Hardware(HwBackend::Cuda)
        );
    }

    #[test]
    fn test_negotiate_falls_back_to_software() {
        assert_eq!(negotiate(HwAccelMode::Auto, &[]), DecodeBackend::Software);
        assert_eq!(
            negotiate(HwAccelMode::Specific(HwBackend::Qsv), &[HwBackend::Vaapi]),
            DecodeBackend::Software
        );
        assert_eq!(
            negotiate(HwAccelMode::Software, &[HwBackend::Cuda]),
            DecodeBackend::Software
        );
    }

    #[test]
    fn test_mode_from_str() {
        assert_eq!("auto".parse::<HwAccelMode>().unwrap(), HwAccelMode::Auto);
        assert_eq!("OFF".parse::<HwAccelMode>().unwrap(), HwAccelMode::Software);
        assert_eq!(
            "vaapi".parse::<HwAccelMode>().unwrap(),
            HwAccelMode::Specific(HwBackend::Vaapi)
        );
        assert!("quantum".parse::<HwAccelMode>().is_err());
    }
}
