use sysinfo::System;
use tracing::{info, warn};

use crate::config::BatchingConfig;
use crate::error::{AnalysisError, AnalysisResult};
use crate::models::{Frame, Scene, SegmentationMode};

const GIB: u64 = 1024 * 1024 * 1024;

/// 内存探测失败时假定的可用内存
const DEFAULT_AVAILABLE_MEMORY: u64 = 8 * GIB;

/// 强制分批时场景的最小跨度（秒）
const MIN_SCENE_SPAN: f64 = 0.1;

/// 内存档位：(可用内存上限, 批大小)，最后一档无上限
const MEMORY_TIERS: [(u64, usize); 5] = [(4 * GIB, 2), (8 * GIB, 3), (12 * GIB, 4), (16 * GIB, 6), (24 * GIB, 8)];
const TOP_TIER_BATCH: usize = 12;

/// 批大小建议，每次分析重新计算
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchAdvice {
    /// 夹在 [min, max] 内的批大小
    pub current_batch_size: usize,
    /// 探测到的可用内存（字节），探测失败时为 None
    pub available_memory: Option<u64>,
}

/// 根据可用内存给出批大小
#[derive(Debug, Clone)]
pub struct BatchSizeAdvisor {
    min_batch_size: usize,
    max_batch_size: usize,
}

impl BatchSizeAdvisor {
    pub fn new(config: &BatchingConfig) -> Self {
        Self {
            min_batch_size: config.min_batch_size.max(1),
            max_batch_size: config.max_batch_size.max(config.min_batch_size.max(1)),
        }
    }

    /// 档位对应的原始批大小（未夹紧）
    pub fn tier_batch_size(available_bytes: u64) -> usize {
        MEMORY_TIERS
            .iter()
            .find(|(limit, _)| available_bytes < *limit)
            .map(|(_, batch)| *batch)
            .unwrap_or(TOP_TIER_BATCH)
    }

    pub fn advise_for(&self, available_bytes: u64) -> BatchAdvice {
        let batch = Self::tier_batch_size(available_bytes).clamp(self.min_batch_size, self.max_batch_size);
        BatchAdvice {
            current_batch_size: batch,
            available_memory: Some(available_bytes),
        }
    }

    /// 探测当前可用内存并给出建议；探测失败时按默认档位继续
    pub fn advise(&self) -> BatchAdvice {
        match probe_available_memory() {
            Ok(available) => {
                let advice = self.advise_for(available);
                info!(
                    "🧮 [批处理] 可用内存 {:.1} GiB -> 批大小 {}",
                    available as f64 / GIB as f64,
                    advice.current_batch_size
                );
                advice
            }
            Err(e) => {
                warn!("⚠️  [批处理] {}，按 {} GiB 估算", e, DEFAULT_AVAILABLE_MEMORY / GIB);
                BatchAdvice {
                    available_memory: None,
                    ..self.advise_for(DEFAULT_AVAILABLE_MEMORY)
                }
            }
        }
    }
}

fn probe_available_memory() -> AnalysisResult<u64> {
    let mut sys = System::new();
    sys.refresh_memory();
    match sys.available_memory() {
        0 => Err(AnalysisError::ResourceProbeFailed("无法读取可用内存".to_string())),
        available => Ok(available),
    }
}

/// 检测结果至少应有的场景数：ceil(帧数 / 批大小)
pub fn required_scene_count(frame_count: usize, batch_size: usize) -> usize {
    frame_count.div_ceil(batch_size.max(1))
}

/// 检测到的场景数不足时，丢弃检测结果并按批大小强制切分
pub fn rebatch_if_insufficient(
    scenes: Vec<Scene>,
    batch_size: usize,
    interval: f64,
    video_duration: f64,
) -> (Vec<Scene>, SegmentationMode) {
    let frame_count: usize = scenes.iter().map(|s| s.frames.len()).sum();
    let required = required_scene_count(frame_count, batch_size);
    if scenes.len() >= required {
        return (scenes, SegmentationMode::Detected);
    }

    info!(
        "🔁 [批处理] 检测到 {} 个场景，少于 ceil({}/{}) = {}，改为按批切分",
        scenes.len(),
        frame_count,
        batch_size,
        required
    );
    let frames: Vec<Frame> = scenes.into_iter().flat_map(|s| s.frames).collect();
    (batch_frames(frames, batch_size, interval, video_duration), SegmentationMode::Batched)
}

/// 每 `batch_size` 帧组成一个场景
pub fn batch_frames(frames: Vec<Frame>, batch_size: usize, interval: f64, video_duration: f64) -> Vec<Scene> {
    let batch_size = batch_size.max(1);
    let next_starts: Vec<f64> = frames
        .iter()
        .step_by(batch_size)
        .skip(1)
        .map(|f| f.timestamp)
        .collect();

    let mut scenes = Vec::with_capacity(next_starts.len() + 1);
    let mut iter = frames.into_iter().peekable();
    while iter.peek().is_some() {
        let chunk: Vec<Frame> = iter.by_ref().take(batch_size).collect();
        let id = scenes.len() as u32 + 1;
        let start_time = chunk[0].timestamp;
        let last_time = chunk[chunk.len() - 1].timestamp;

        let mut end_time = last_time + interval;
        if let Some(next_start) = next_starts.get(scenes.len()) {
            end_time = end_time.min(*next_start);
        }
        if video_duration > 0.0 {
            end_time = end_time.min(video_duration);
        }
        if end_time <= start_time {
            end_time = start_time + MIN_SCENE_SPAN;
        }

        scenes.push(Scene {
            id,
            start_time,
            end_time,
            frames: chunk,
        });
    }
    scenes
}
