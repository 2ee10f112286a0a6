use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;
use chrono::Utc;
use tracing::{debug, error, info, warn};

use crate::batch_advisor::{rebatch_if_insufficient, BatchSizeAdvisor};
use crate::config::AnalysisConfig;
use crate::error::{AnalysisError, AnalysisResult};
use crate::frame_sampler::FrameSampler;
use crate::inference::{InferenceClient, OllamaClient};
use crate::models::{AnalysisReport, AnalysisStatus, Frame, VideoProbe};
use crate::scene_classifier::SceneClassifier;
use crate::scene_segmenter::{group_frames_by_scene, SceneSegmenter};
use crate::store::{save_report, VideoStore};
use crate::summary::summarize;

/// 帧提取完成
pub const PROGRESS_SAMPLED: u8 = 10;
/// 场景切分完成
pub const PROGRESS_SEGMENTED: u8 = 30;
/// 场景循环结束
pub const PROGRESS_CLASSIFIED: u8 = 90;
pub const PROGRESS_DONE: u8 = 100;

/// 只向外报告递增的进度
struct Progress<P: FnMut(u8)> {
    sink: P,
    last: Option<u8>,
}

impl<P: FnMut(u8)> Progress<P> {
    fn new(sink: P) -> Self {
        Self { sink, last: None }
    }

    fn report(&mut self, value: u8) {
        let value = value.min(PROGRESS_DONE);
        if self.last.map_or(true, |last| value > last) {
            self.last = Some(value);
            (self.sink)(value);
        }
    }
}

/// 场景循环中第 `done` 个场景完成时的进度
fn scene_progress(done: usize, total: usize) -> u8 {
    if total == 0 {
        return PROGRESS_CLASSIFIED;
    }
    let span = (PROGRESS_CLASSIFIED - PROGRESS_SEGMENTED) as usize;
    PROGRESS_SEGMENTED + (span * done / total) as u8
}

/// 串行驱动各阶段：采样 → 切分 → 批处理检查 → 逐场景推理 → 汇总
pub struct Orchestrator {
    config: AnalysisConfig,
    sampler: FrameSampler,
    segmenter: SceneSegmenter,
    advisor: BatchSizeAdvisor,
    classifier: SceneClassifier,
}

impl Orchestrator {
    pub fn new(config: AnalysisConfig, client: Arc<dyn InferenceClient>) -> Self {
        Self {
            sampler: FrameSampler::new(config.sampling.clone()),
            segmenter: SceneSegmenter::new(),
            advisor: BatchSizeAdvisor::new(&config.batching),
            classifier: SceneClassifier::new(client),
            config,
        }
    }

    /// 使用 Ollama 作为推理服务
    pub fn with_ollama(config: AnalysisConfig) -> Result<Self> {
        let client = OllamaClient::new(config.inference.clone())?;
        Ok(Self::new(config, Arc::new(client)))
    }

    pub fn config(&self) -> &AnalysisConfig {
        &self.config
    }

    /// 分析一个视频文件
    pub async fn analyze<P>(&self, video_id: &str, path: &Path, progress: P) -> AnalysisResult<AnalysisReport>
    where
        P: FnMut(u8) + Send,
    {
        let mut progress = Progress::new(progress);
        info!("🎬 [视频分析] 开始分析: {}", path.display());
        info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

        let sampler = self.sampler.clone();
        let input = path.to_path_buf();
        let (probe, frames) = tokio::task::spawn_blocking(move || sampler.sample(&input)).await??;
        progress.report(PROGRESS_SAMPLED);

        self.run_stages(video_id, probe, frames, &mut progress).await
    }

    /// 对已采样的帧执行后续阶段
    pub async fn analyze_frames<P>(
        &self,
        video_id: &str,
        probe: VideoProbe,
        frames: Vec<Frame>,
        progress: P,
    ) -> AnalysisResult<AnalysisReport>
    where
        P: FnMut(u8) + Send,
    {
        if frames.is_empty() {
            return Err(AnalysisError::FrameExtractionFailed(format!(
                "{} 没有可分析的帧",
                probe.path.display()
            )));
        }
        let mut progress = Progress::new(progress);
        progress.report(PROGRESS_SAMPLED);
        self.run_stages(video_id, probe, frames, &mut progress).await
    }

    async fn run_stages<P>(
        &self,
        video_id: &str,
        probe: VideoProbe,
        frames: Vec<Frame>,
        progress: &mut Progress<P>,
    ) -> AnalysisResult<AnalysisReport>
    where
        P: FnMut(u8) + Send,
    {
        let total_start = Instant::now();
        let total_frames = frames.len();
        let interval = self.config.sampling.interval;

        // 切分
        let segment_start = Instant::now();
        let segmenter = self.segmenter.clone();
        let (frames, boundaries) = tokio::task::spawn_blocking(move || {
            let boundaries = segmenter.detect_boundaries(&frames);
            (frames, boundaries)
        })
        .await?;
        let detected = group_frames_by_scene(frames, &boundaries);
        info!(
            "✅ [视频分析] 场景检测完成: {} 个场景，耗时 {:.2}秒",
            detected.len(),
            segment_start.elapsed().as_secs_f64()
        );

        let advice = self.advisor.advise();
        let batch_size = advice.current_batch_size;
        let (scenes, segmentation) = rebatch_if_insufficient(detected, batch_size, interval, probe.duration);
        progress.report(PROGRESS_SEGMENTED);

        // 逐个场景推理，同一时间只有一个请求
        let classify_start = Instant::now();
        let total_scenes = scenes.len();
        let mut records = Vec::with_capacity(total_scenes);
        for (i, scene) in scenes.into_iter().enumerate() {
            info!(
                "⏳ [视频分析] 场景 {}/{} ({:.1}s - {:.1}s, {} 帧)",
                i + 1,
                total_scenes,
                scene.start_time,
                scene.end_time,
                scene.frames.len()
            );
            let record = self.classifier.classify(&scene, batch_size).await;
            drop(scene);
            records.push(record);
            progress.report(scene_progress(i + 1, total_scenes));
        }
        info!(
            "✅ [视频分析] 场景分析完成，耗时 {:.2}秒",
            classify_start.elapsed().as_secs_f64()
        );

        let overall_summary = summarize(&records);
        let failed = records.iter().filter(|r| r.error).count();
        if failed > 0 {
            warn!("⚠️  [视频分析] {} 个场景使用了兜底记录", failed);
        }

        let report = AnalysisReport {
            video_id: video_id.to_string(),
            timestamp: Utc::now(),
            total_scenes: records.len(),
            total_frames,
            video_duration: probe.duration,
            sample_interval: interval,
            segmentation,
            batch_size,
            overall_summary,
            scene_analysis: records,
        };
        progress.report(PROGRESS_DONE);

        info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
        info!("🎉 [视频分析] 分析完成，总耗时 {:.2}秒", total_start.elapsed().as_secs_f64());
        info!("  • 场景数: {} ({:?})", report.total_scenes, report.segmentation);
        info!("  • 主要情绪: {}", report.overall_summary.dominant_mood);
        info!(
            "  • 平均高光分数: {:.2}",
            report.overall_summary.average_highlight_score
        );
        Ok(report)
    }

    /// 分析登记表中的视频并把状态、进度、结果写回
    ///
    /// 调用前记录应已通过 `begin_analysis` 进入 analyzing 状态。致命错误会把记录
    /// 标记为 failed 并把进度清零。
    pub async fn run_for_video(
        &self,
        store: &dyn VideoStore,
        report_dir: &Path,
        video_id: &str,
    ) -> AnalysisResult<AnalysisReport> {
        let record = store
            .get(video_id)
            .ok_or_else(|| AnalysisError::VideoNotFound(video_id.to_string()))?;

        let progress = |value: u8| {
            write_progress(store, video_id, value);
        };

        match self.analyze(video_id, &record.file_path, progress).await {
            Ok(report) => {
                if let Err(e) = save_report(report_dir, &report) {
                    error!("❌ [视频分析] 保存报告失败: {}", e);
                }
                store.update(video_id, &mut |r| {
                    r.status = AnalysisStatus::Completed;
                    r.progress = PROGRESS_DONE;
                    r.error = None;
                    r.analysis_result = Some(report.clone());
                    Ok(())
                })?;
                Ok(report)
            }
            Err(e) => {
                error!("❌ [视频分析] 视频 {} 分析失败: {}", video_id, e);
                let message = e.to_string();
                store.update(video_id, &mut |r| {
                    r.status = AnalysisStatus::Failed;
                    r.progress = 0;
                    r.error = Some(message.clone());
                    Ok(())
                })?;
                Err(e)
            }
        }
    }
}

/// 写回进度；记录不存在时只记日志
fn write_progress(store: &dyn VideoStore, video_id: &str, value: u8) -> bool {
    match store.update(video_id, &mut |r| {
        r.progress = value;
        Ok(())
    }) {
        Ok(_) => true,
        Err(e) => {
            debug!("[视频分析] 进度 {}% 写回失败: {}", value, e);
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inference::InferenceRequest;
    use crate::models::VideoRecord;
    use crate::store::InMemoryVideoStore;
    use async_trait::async_trait;

    struct SilentClient;

    #[async_trait]
    impl InferenceClient for SilentClient {
        async fn generate(&self, request: InferenceRequest) -> AnalysisResult<String> {
            Err(AnalysisError::inference(request.scene_id, "unused"))
        }

        fn model(&self) -> &str {
            "silent"
        }
    }

    fn orchestrator() -> Orchestrator {
        Orchestrator::new(AnalysisConfig::default(), Arc::new(SilentClient))
    }

    #[test]
    fn test_progress_is_monotonic() {
        let mut seen = Vec::new();
        {
            let mut progress = Progress::new(|v: u8| seen.push(v));
            for v in [10, 30, 30, 20, 60, 120] {
                progress.report(v);
            }
        }
        assert_eq!(seen, vec![10, 30, 60, 100]);
    }

    #[test]
    fn test_scene_progress() {
        assert_eq!(scene_progress(0, 3), 30);
        assert_eq!(scene_progress(1, 3), 50);
        assert_eq!(scene_progress(3, 3), 90);
        assert_eq!(scene_progress(0, 0), 90);
    }

    #[tokio::test]
    async fn test_empty_frames_are_fatal() {
        let probe = VideoProbe {
            path: "clip.mp4".into(),
            fps: 30.0,
            frame_count: 0,
            duration: 0.0,
            width: 640,
            height: 360,
        };
        let err = orchestrator()
            .analyze_frames("v1", probe, Vec::new(), |_| {})
            .await
            .unwrap_err();
        assert!(matches!(err, AnalysisError::FrameExtractionFailed(_)));
        assert!(err.is_fatal());
    }

    #[tokio::test]
    async fn test_missing_file_marks_video_failed() {
        let dir = tempfile::tempdir().unwrap();
        let store = InMemoryVideoStore::new();
        let record = VideoRecord::new(dir.path().join("missing.mp4"));
        let id = record.id.clone();
        store.insert(record);
        store.begin_analysis(&id).unwrap();

        let result = orchestrator().run_for_video(&store, dir.path(), &id).await;
        assert!(result.is_err());

        let record = store.get(&id).unwrap();
        assert_eq!(record.status, AnalysisStatus::Failed);
        assert_eq!(record.progress, 0);
        assert!(record.error.is_some());
        assert!(record.analysis_result.is_none());
    }

    #[test]
    fn test_progress_write_back_on_missing_record() {
        let store = InMemoryVideoStore::new();
        let record = VideoRecord::new("clip.mp4");
        let id = record.id.clone();
        store.insert(record);

        assert!(write_progress(&store, &id, 40));
        assert_eq!(store.get(&id).unwrap().progress, 40);

        assert!(!write_progress(&store, "gone", 50));
        assert!(store.get("gone").is_none());
    }
}
