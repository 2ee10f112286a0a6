use std::io::Cursor;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use image::codecs::jpeg::JpegEncoder;
use image::{ColorType, ImageFormat, RgbImage};
use serde::{Deserialize, Serialize};

use crate::error::AnalysisError;

/// 采样得到的单帧（已缩放并压缩为 JPEG）
#[derive(Debug, Clone)]
pub struct Frame {
    /// 在原视频中的帧序号
    pub index: u64,
    /// 时间戳（秒）
    pub timestamp: f64,
    /// 宽度
    pub width: u32,
    /// 高度
    pub height: u32,
    /// JPEG 字节
    pub jpeg: Vec<u8>,
}

impl Frame {
    /// 压缩 RGB 图像并生成帧
    pub fn from_rgb(index: u64, timestamp: f64, image: &RgbImage, quality: u8) -> Result<Self, AnalysisError> {
        let mut jpeg = Vec::with_capacity((image.width() * image.height() / 8) as usize);
        JpegEncoder::new_with_quality(&mut jpeg, quality).encode(
            image.as_raw(),
            image.width(),
            image.height(),
            ColorType::Rgb8,
        )?;

        Ok(Self {
            index,
            timestamp,
            width: image.width(),
            height: image.height(),
            jpeg,
        })
    }

    /// 解码为 RGB 图像
    pub fn decode(&self) -> Result<RgbImage, AnalysisError> {
        let image = image::load(Cursor::new(&self.jpeg), ImageFormat::Jpeg)?;
        Ok(image.to_rgb8())
    }
}

/// 视觉上连续的一段帧
#[derive(Debug, Clone)]
pub struct Scene {
    /// 场景编号（从 1 开始）
    pub id: u32,
    /// 开始时间（秒）
    pub start_time: f64,
    /// 结束时间（秒）
    pub end_time: f64,
    /// 场景内的帧（按时间排序）
    pub frames: Vec<Frame>,
}

impl Scene {
    pub fn time_range(&self) -> TimeRange {
        TimeRange::new(self.start_time, self.end_time)
    }
}

/// 情绪类别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mood {
    Happy,
    Sad,
    Excited,
    Calm,
    Tense,
    Romantic,
    Mysterious,
    Emotional,
    Neutral,
}

impl Mood {
    pub const ALL: [Mood; 9] = [
        Mood::Happy,
        Mood::Sad,
        Mood::Excited,
        Mood::Calm,
        Mood::Tense,
        Mood::Romantic,
        Mood::Mysterious,
        Mood::Emotional,
        Mood::Neutral,
    ];

    /// 从模型输出的标签解析，未知标签归为 neutral
    pub fn from_label(label: &str) -> Self {
        match label.trim().trim_matches('"').to_lowercase().as_str() {
            "happy" | "joyful" | "cheerful" => Mood::Happy,
            "sad" | "melancholic" | "melancholy" => Mood::Sad,
            "excited" | "energetic" | "exciting" => Mood::Excited,
            "calm" | "peaceful" | "relaxed" => Mood::Calm,
            "tense" | "suspenseful" | "anxious" => Mood::Tense,
            "romantic" => Mood::Romantic,
            "mysterious" => Mood::Mysterious,
            "emotional" | "touching" => Mood::Emotional,
            _ => Mood::Neutral,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Mood::Happy => "happy",
            Mood::Sad => "sad",
            Mood::Excited => "excited",
            Mood::Calm => "calm",
            Mood::Tense => "tense",
            Mood::Romantic => "romantic",
            Mood::Mysterious => "mysterious",
            Mood::Emotional => "emotional",
            Mood::Neutral => "neutral",
        }
    }
}

impl std::fmt::Display for Mood {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 场景时间范围
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TimeRange {
    pub start: f64,
    pub end: f64,
    pub duration: f64,
}

impl TimeRange {
    pub fn new(start: f64, end: f64) -> Self {
        Self {
            start,
            end,
            duration: (end - start).max(0.0),
        }
    }
}

/// 记录是通过哪种解析路径得到的
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParseMode {
    /// 完整 JSON
    Structured,
    /// 嵌套 JSON 或正则提取
    Partial,
    /// 推理或解析失败后的兜底记录
    Fallback,
}

/// 单个场景的分析结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SceneAnalysisRecord {
    /// 场景编号
    pub scene_id: u32,
    /// 场景描述
    pub description: String,
    /// 情绪
    pub mood: Mood,
    /// 情绪强度 [0,1]
    pub emotion_intensity: f64,
    /// 高光分数 [0,1]
    pub highlight_score: f64,
    /// 情境
    pub situation: String,
    /// 关键事件
    pub key_events: Vec<String>,
    /// 情绪变化
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mood_progression: Option<String>,
    /// 镜头语言
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub camera_work: Option<String>,
    /// 时间范围
    pub time_range: TimeRange,
    /// 生成时间
    pub generated_at: DateTime<Utc>,
    /// 解析路径
    pub parse_mode: ParseMode,
    /// 是否为兜底记录
    pub error: bool,
    /// 失败原因
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

/// 可用于剪辑的候选片段
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClipCandidate {
    pub scene_id: u32,
    pub start_time: f64,
    pub end_time: f64,
    pub highlight_score: f64,
    pub mood: Mood,
    pub description: String,
}

impl From<&SceneAnalysisRecord> for ClipCandidate {
    fn from(record: &SceneAnalysisRecord) -> Self {
        Self {
            scene_id: record.scene_id,
            start_time: record.time_range.start,
            end_time: record.time_range.end,
            highlight_score: record.highlight_score,
            mood: record.mood,
            description: record.description.clone(),
        }
    }
}

/// 情绪出现次数
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MoodCount {
    pub mood: Mood,
    pub count: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnalysisQuality {
    Good,
    Fair,
}

/// 全片汇总
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OverallSummary {
    /// 出现最多的情绪
    pub dominant_mood: Mood,
    /// 各情绪出现次数（按首次出现顺序）
    pub mood_distribution: Vec<MoodCount>,
    /// 平均高光分数
    pub average_highlight_score: f64,
    /// 高光分数 > 0.7 的场景
    pub highlight_scenes: Vec<ClipCandidate>,
    /// 按分数排序的前 5 个片段
    pub recommended_clips: Vec<ClipCandidate>,
    /// 分析质量
    pub analysis_quality: AnalysisQuality,
}

/// 场景来源
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SegmentationMode {
    /// 场景检测结果
    Detected,
    /// 检测结果不足，按批大小强制切分
    Batched,
}

/// 一次完整分析的报告
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisReport {
    pub video_id: String,
    pub timestamp: DateTime<Utc>,
    pub total_scenes: usize,
    pub total_frames: usize,
    pub video_duration: f64,
    pub sample_interval: f64,
    pub segmentation: SegmentationMode,
    pub batch_size: usize,
    pub overall_summary: OverallSummary,
    pub scene_analysis: Vec<SceneAnalysisRecord>,
}

/// 视频探测信息
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoProbe {
    pub path: PathBuf,
    pub fps: f64,
    pub frame_count: u64,
    pub duration: f64,
    pub width: u32,
    pub height: u32,
}

/// 分析状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnalysisStatus {
    Uploaded,
    Analyzing,
    Completed,
    Failed,
}

/// 视频登记记录
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VideoRecord {
    /// 唯一 ID
    pub id: String,
    /// 文件路径
    pub file_path: PathBuf,
    /// 原始文件名
    pub original_name: String,
    /// 登记时间
    pub registered_at: DateTime<Utc>,
    /// 当前状态
    pub status: AnalysisStatus,
    /// 进度 0-100
    pub progress: u8,
    /// 失败原因
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// 分析结果
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub analysis_result: Option<AnalysisReport>,
}

impl VideoRecord {
    pub fn new(file_path: impl Into<PathBuf>) -> Self {
        let file_path = file_path.into();
        let original_name = file_path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("video.mp4")
            .to_string();

        Self {
            id: uuid::Uuid::new_v4().to_string(),
            file_path,
            original_name,
            registered_at: Utc::now(),
            status: AnalysisStatus::Uploaded,
            progress: 0,
            error: None,
            analysis_result: None,
        }
    }
}
