use anyhow::{bail, Context, Result};
use std::env;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::hw_accel::HwAccelMode;

/// 输出帧宽、高的上限（8K）
pub const MAX_FRAME_DIMENSION: u32 = 7680;

/// 帧采样配置
#[derive(Debug, Clone)]
pub struct SamplingConfig {
    /// 采样间隔（秒）
    pub interval: f64,
    /// 输出帧宽度
    pub width: u32,
    /// 输出帧高度
    pub height: u32,
    /// JPEG 质量 (1-100)
    pub jpeg_quality: u8,
    /// 硬件加速模式
    pub hw_accel: HwAccelMode,
    /// ffmpeg 可执行文件
    pub ffmpeg_bin: String,
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            interval: 1.0,
            width: 640,
            height: 360,
            jpeg_quality: 70,
            hw_accel: HwAccelMode::Auto,
            ffmpeg_bin: "ffmpeg".to_string(),
        }
    }
}

/// 批大小范围
#[derive(Debug, Clone)]
pub struct BatchingConfig {
    pub min_batch_size: usize,
    pub max_batch_size: usize,
}

impl Default for BatchingConfig {
    fn default() -> Self {
        Self {
            min_batch_size: 2,
            max_batch_size: 8,
        }
    }
}

/// 推理服务配置（Ollama 兼容接口）
#[derive(Debug, Clone)]
pub struct InferenceConfig {
    pub base_url: String,
    pub model: String,
    pub timeout_secs: u64,
    pub keep_alive: String,
    pub temperature: f32,
    pub top_p: f32,
    pub num_predict: u32,
}

impl Default for InferenceConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:11434".to_string(),
            model: "qwen2.5vl:7b".to_string(),
            timeout_secs: 60,
            keep_alive: "5m".to_string(),
            temperature: 0.1,
            top_p: 0.9,
            num_predict: 1024,
        }
    }
}

/// 分析流程配置
#[derive(Debug, Clone, Default)]
pub struct AnalysisConfig {
    pub sampling: SamplingConfig,
    pub batching: BatchingConfig,
    pub inference: InferenceConfig,
}

impl AnalysisConfig {
    /// 检查取值范围
    pub fn validate(&self) -> Result<()> {
        if !(self.sampling.interval > 0.0) {
            bail!("采样间隔必须大于 0: {}", self.sampling.interval);
        }
        if !(1..=MAX_FRAME_DIMENSION).contains(&self.sampling.width)
            || !(1..=MAX_FRAME_DIMENSION).contains(&self.sampling.height)
        {
            bail!("输出分辨率无效: {}x{}", self.sampling.width, self.sampling.height);
        }
        if !(1..=100).contains(&self.sampling.jpeg_quality) {
            bail!("JPEG 质量必须在 1-100 之间: {}", self.sampling.jpeg_quality);
        }
        if self.batching.min_batch_size == 0 || self.batching.min_batch_size > self.batching.max_batch_size {
            bail!(
                "批大小范围无效: [{}, {}]",
                self.batching.min_batch_size,
                self.batching.max_batch_size
            );
        }
        Ok(())
    }
}

/// 服务模式配置
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// 监听地址
    pub bind: String,
    /// 报告输出目录
    pub report_dir: PathBuf,
    /// 日志级别（trace, debug, info, warn, error）
    pub log_level: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:8000".to_string(),
            report_dir: PathBuf::from("analysis_results"),
            log_level: "info".to_string(),
        }
    }
}

/// 完整配置
#[derive(Debug, Clone, Default)]
pub struct ExtendedConfig {
    pub analysis: AnalysisConfig,
    pub server: ServerConfig,
}

/// 命令行覆盖项
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub interval: Option<f64>,
    pub hw_accel: Option<String>,
    pub min_batch_size: Option<usize>,
    pub max_batch_size: Option<usize>,
    pub model: Option<String>,
    pub base_url: Option<String>,
    pub bind: Option<String>,
    pub report_dir: Option<PathBuf>,
}

/// 环境变量 + INI 文件两层查找
struct Layers {
    ini: Option<configparser::ini::Ini>,
}

impl Layers {
    fn get<T: FromStr>(&self, section: &str, key: &str, env_key: Option<&str>) -> Option<T> {
        env_key
            .and_then(|k| env::var(k).ok())
            .and_then(|v| v.trim().parse().ok())
            .or_else(|| {
                self.ini
                    .as_ref()
                    .and_then(|ini| ini.get(section, key))
                    .filter(|v| !v.is_empty())
                    .and_then(|v| v.trim().parse().ok())
            })
    }
}

/// 配置加载器
pub struct ConfigLoader;

impl ConfigLoader {
    /// 从多个源加载配置，优先级：命令行参数 > 环境变量 > 配置文件 > 默认值
    pub fn load(config_file: Option<&Path>, overrides: &ConfigOverrides) -> Result<ExtendedConfig> {
        let ini = match config_file {
            Some(path) => Some(Self::load_ini(path)?),
            None => Self::default_location().map(|p| Self::load_ini(&p)).transpose()?,
        };
        let layers = Layers { ini };

        let sampling_defaults = SamplingConfig::default();
        let hw_accel = match overrides
            .hw_accel
            .clone()
            .or_else(|| layers.get::<String>("sampling", "hw_accel", Some("VIDEO_ANALYZE_HW_ACCEL")))
        {
            Some(mode) => mode.parse::<HwAccelMode>().map_err(anyhow::Error::msg)?,
            None => sampling_defaults.hw_accel,
        };

        let sampling = SamplingConfig {
            interval: overrides
                .interval
                .or_else(|| layers.get("sampling", "interval", Some("VIDEO_ANALYZE_INTERVAL")))
                .unwrap_or(sampling_defaults.interval),
            width: layers
                .get("sampling", "width", Some("VIDEO_ANALYZE_WIDTH"))
                .unwrap_or(sampling_defaults.width),
            height: layers
                .get("sampling", "height", Some("VIDEO_ANALYZE_HEIGHT"))
                .unwrap_or(sampling_defaults.height),
            jpeg_quality: layers
                .get("sampling", "jpeg_quality", Some("VIDEO_ANALYZE_JPEG_QUALITY"))
                .unwrap_or(sampling_defaults.jpeg_quality),
            hw_accel,
            ffmpeg_bin: layers
                .get("sampling", "ffmpeg", Some("VIDEO_ANALYZE_FFMPEG"))
                .unwrap_or(sampling_defaults.ffmpeg_bin),
        };

        let batching_defaults = BatchingConfig::default();
        let batching = BatchingConfig {
            min_batch_size: overrides
                .min_batch_size
                .or_else(|| layers.get("batching", "min_batch_size", Some("VIDEO_ANALYZE_MIN_BATCH")))
                .unwrap_or(batching_defaults.min_batch_size),
            max_batch_size: overrides
                .max_batch_size
                .or_else(|| layers.get("batching", "max_batch_size", Some("VIDEO_ANALYZE_MAX_BATCH")))
                .unwrap_or(batching_defaults.max_batch_size),
        };

        let inference_defaults = InferenceConfig::default();
        let inference = InferenceConfig {
            base_url: overrides
                .base_url
                .clone()
                .or_else(|| layers.get("inference", "base_url", Some("OLLAMA_HOST")))
                .unwrap_or(inference_defaults.base_url),
            model: overrides
                .model
                .clone()
                .or_else(|| layers.get("inference", "model", Some("VIDEO_ANALYZE_MODEL")))
                .unwrap_or(inference_defaults.model),
            timeout_secs: layers
                .get("inference", "timeout_secs", Some("VIDEO_ANALYZE_TIMEOUT"))
                .unwrap_or(inference_defaults.timeout_secs),
            keep_alive: layers
                .get("inference", "keep_alive", None)
                .unwrap_or(inference_defaults.keep_alive),
            temperature: layers
                .get("inference", "temperature", None)
                .unwrap_or(inference_defaults.temperature),
            top_p: layers
                .get("inference", "top_p", None)
                .unwrap_or(inference_defaults.top_p),
            num_predict: layers
                .get("inference", "num_predict", None)
                .unwrap_or(inference_defaults.num_predict),
        };

        let server_defaults = ServerConfig::default();
        let server = ServerConfig {
            bind: overrides
                .bind
                .clone()
                .or_else(|| layers.get("server", "bind", Some("VIDEO_ANALYZE_BIND")))
                .unwrap_or(server_defaults.bind),
            report_dir: overrides
                .report_dir
                .clone()
                .or_else(|| {
                    layers
                        .get::<String>("server", "report_dir", Some("VIDEO_ANALYZE_REPORT_DIR"))
                        .map(PathBuf::from)
                })
                .unwrap_or(server_defaults.report_dir),
            log_level: layers
                .get("logging", "level", Some("LOG_LEVEL"))
                .unwrap_or(server_defaults.log_level),
        };

        let analysis = AnalysisConfig {
            sampling,
            batching,
            inference,
        };
        analysis.validate()?;

        Ok(ExtendedConfig { analysis, server })
    }

    fn load_ini(config_path: &Path) -> Result<configparser::ini::Ini> {
        if !config_path.exists() {
            bail!("配置文件不存在: {}", config_path.display());
        }

        let mut ini = configparser::ini::Ini::new();
        ini.load(config_path)
            .map_err(|e| anyhow::anyhow!("读取配置文件失败: {}: {}", config_path.display(), e))?;
        Ok(ini)
    }

    /// 默认位置：当前目录、用户主目录、/etc
    fn default_location() -> Option<PathBuf> {
        let mut candidates = vec![
            PathBuf::from("video-analyze.ini"),
            PathBuf::from(".video-analyze.ini"),
        ];
        if let Some(home) = env::var_os("HOME") {
            candidates.push(PathBuf::from(home).join(".video-analyze.ini"));
        }
        candidates.push(PathBuf::from("/etc/video-analyze.ini"));

        candidates.into_iter().find(|p| p.exists())
    }

    /// 创建默认配置文件
    pub fn create_default_config(config_path: &Path) -> Result<()> {
        let sampling = SamplingConfig::default();
        let batching = BatchingConfig::default();
        let inference = InferenceConfig::default();
        let server = ServerConfig::default();

        let mut ini = configparser::ini::Ini::new();
        ini.set("sampling", "interval", Some(sampling.interval.to_string()));
        ini.set("sampling", "width", Some(sampling.width.to_string()));
        ini.set("sampling", "height", Some(sampling.height.to_string()));
        ini.set("sampling", "jpeg_quality", Some(sampling.jpeg_quality.to_string()));
        ini.set("sampling", "hw_accel", Some("auto".to_string()));
        ini.set("sampling", "ffmpeg", Some(sampling.ffmpeg_bin));
        ini.set("batching", "min_batch_size", Some(batching.min_batch_size.to_string()));
        ini.set("batching", "max_batch_size", Some(batching.max_batch_size.to_string()));
        ini.set("inference", "base_url", Some(inference.base_url));
        ini.set("inference", "model", Some(inference.model));
        ini.set("inference", "timeout_secs", Some(inference.timeout_secs.to_string()));
        ini.set("inference", "keep_alive", Some(inference.keep_alive));
        ini.set("inference", "temperature", Some(inference.temperature.to_string()));
        ini.set("inference", "top_p", Some(inference.top_p.to_string()));
        ini.set("inference", "num_predict", Some(inference.num_predict.to_string()));
        ini.set("server", "bind", Some(server.bind));
        ini.set("server", "report_dir", Some(server.report_dir.to_string_lossy().to_string()));
        ini.set("logging", "level", Some(server.log_level));

        ini.write(config_path)
            .with_context(|| format!("写入配置文件失败: {}", config_path.display()))?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hw_accel::HwBackend;

    #[test]
    fn test_file_values_and_cli_override() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("video-analyze.ini");
        std::fs::write(
            &path,
            "[sampling]\ninterval = 2.5\nhw_accel = vaapi\n[batching]\nmax_batch_size = 6\n[inference]\nmodel = llava:13b\n",
        )
        .unwrap();

        let config = ConfigLoader::load(Some(&path), &ConfigOverrides::default()).unwrap();
        assert_eq!(config.analysis.sampling.interval, 2.5);
        assert_eq!(config.analysis.sampling.hw_accel, HwAccelMode::Specific(HwBackend::Vaapi));
        assert_eq!(config.analysis.batching.max_batch_size, 6);
        assert_eq!(config.analysis.inference.model, "llava:13b");
        assert_eq!(config.analysis.sampling.jpeg_quality, 70);

        let overrides = ConfigOverrides {
            interval: Some(0.5),
            model: Some("qwen2.5vl:3b".to_string()),
            ..Default::default()
        };
        let config = ConfigLoader::load(Some(&path), &overrides).unwrap();
        assert_eq!(config.analysis.sampling.interval, 0.5);
        assert_eq!(config.analysis.inference.model, "qwen2.5vl:3b");
    }

    #[test]
    fn test_default_config_file_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("default.ini");
        ConfigLoader::create_default_config(&path).unwrap();

        let config = ConfigLoader::load(Some(&path), &ConfigOverrides::default()).unwrap();
        assert_eq!(config.analysis.batching.min_batch_size, 2);
        assert_eq!(config.analysis.inference.timeout_secs, 60);
        assert_eq!(config.server.bind, "127.0.0.1:8000");
    }

    #[test]
    fn test_invalid_batch_range_rejected() {
        let overrides = ConfigOverrides {
            min_batch_size: Some(9),
            max_batch_size: Some(4),
            ..Default::default()
        };
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.ini");
        std::fs::write(&path, "[sampling]\n").unwrap();
        assert!(ConfigLoader::load(Some(&path), &overrides).is_err());
    }

    #[test]
    fn test_oversized_resolution_rejected() {
        let mut config = AnalysisConfig::default();
        assert!(config.validate().is_ok());

        config.sampling.width = 100_000;
        config.sampling.height = 100_000;
        assert!(config.validate().is_err());

        config.sampling.width = MAX_FRAME_DIMENSION;
        config.sampling.height = MAX_FRAME_DIMENSION;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_missing_explicit_file_is_error() {
        let result = ConfigLoader::load(Some(Path::new("/nonexistent/video-analyze.ini")), &ConfigOverrides::default());
        assert!(result.is_err());
    }
}
