use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock};

use tracing::info;

use crate::error::{AnalysisError, AnalysisResult};
use crate::models::{AnalysisReport, AnalysisStatus, VideoRecord};

/// 视频登记表
pub trait VideoStore: Send + Sync {
    fn insert(&self, record: VideoRecord);

    fn get(&self, id: &str) -> Option<VideoRecord>;

    /// 按登记时间排序
    fn list(&self) -> Vec<VideoRecord>;

    /// 原地修改记录，返回修改后的副本
    fn update(
        &self,
        id: &str,
        apply: &mut dyn FnMut(&mut VideoRecord) -> AnalysisResult<()>,
    ) -> AnalysisResult<VideoRecord>;

    /// 进入 analyzing 状态；只允许从 uploaded 或 failed 进入
    fn begin_analysis(&self, id: &str) -> AnalysisResult<VideoRecord> {
        self.update(id, &mut |record| match record.status {
            AnalysisStatus::Uploaded | AnalysisStatus::Failed => {
                record.status = AnalysisStatus::Analyzing;
                record.progress = 0;
                record.error = None;
                Ok(())
            }
            other => Err(AnalysisError::InvalidState(format!(
                "视频 {} 当前状态为 {:?}，无法开始分析",
                record.id, other
            ))),
        })
    }
}

/// 进程内登记表
#[derive(Debug, Default)]
pub struct InMemoryVideoStore {
    records: RwLock<HashMap<String, VideoRecord>>,
}

impl InMemoryVideoStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl VideoStore for InMemoryVideoStore {
    fn insert(&self, record: VideoRecord) {
        let mut records = self.records.write().unwrap_or_else(PoisonError::into_inner);
        records.insert(record.id.clone(), record);
    }

    fn get(&self, id: &str) -> Option<VideoRecord> {
        let records = self.records.read().unwrap_or_else(PoisonError::into_inner);
        records.get(id).cloned()
    }

    fn list(&self) -> Vec<VideoRecord> {
        let records = self.records.read().unwrap_or_else(PoisonError::into_inner);
        let mut all: Vec<VideoRecord> = records.values().cloned().collect();
        all.sort_by_key(|r| r.registered_at);
        all
    }

    fn update(
        &self,
        id: &str,
        apply: &mut dyn FnMut(&mut VideoRecord) -> AnalysisResult<()>,
    ) -> AnalysisResult<VideoRecord> {
        let mut records = self.records.write().unwrap_or_else(PoisonError::into_inner);
        let record = records
            .get_mut(id)
            .ok_or_else(|| AnalysisError::VideoNotFound(id.to_string()))?;
        apply(record)?;
        Ok(record.clone())
    }
}

/// 报告文件路径：`<dir>/analysis_<video_id>.json`
pub fn report_path(dir: &Path, video_id: &str) -> PathBuf {
    dir.join(format!("analysis_{}.json", video_id))
}

/// 把报告写入目录
pub fn save_report(dir: &Path, report: &AnalysisReport) -> AnalysisResult<PathBuf> {
    std::fs::create_dir_all(dir)?;
    let path = report_path(dir, &report.video_id);
    let json = serde_json::to_string_pretty(report)?;
    std::fs::write(&path, json)?;
    info!("💾 [报告] 已写入: {}", path.display());
    Ok(path)
}
