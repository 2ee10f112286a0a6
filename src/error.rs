use thiserror::Error;

/// 分析流程的错误类型
#[derive(Debug, Error)]
pub enum AnalysisError {
    /// 两条提取路径都没有得到任何帧
    #[error("帧提取失败: {0}")]
    FrameExtractionFailed(String),

    /// 资源探测失败（使用默认值继续）
    #[error("资源探测失败: {0}")]
    ResourceProbeFailed(String),

    /// 推理调用失败（超时、连接失败、非 200、空响应）
    #[error("场景 {scene_id} 推理失败: {message}")]
    SceneInferenceFailed { scene_id: u32, message: String },

    /// 模型输出无法解析
    #[error("响应解析失败: {0}")]
    ResponseParseFailed(String),

    #[error("未找到视频: {0}")]
    VideoNotFound(String),

    #[error("状态不允许该操作: {0}")]
    InvalidState(String),

    /// 后台阻塞任务崩溃或被取消
    #[error("后台任务失败: {0}")]
    TaskFailed(String),

    #[error("FFmpeg 错误: {0}")]
    Ffmpeg(#[from] ffmpeg_next::Error),

    #[error("图像编解码错误: {0}")]
    Image(#[from] image::ImageError),

    #[error("IO 错误: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON 错误: {0}")]
    Json(#[from] serde_json::Error),
}

impl AnalysisError {
    /// 是否应终止本次分析
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            AnalysisError::ResourceProbeFailed(_)
                | AnalysisError::SceneInferenceFailed { .. }
                | AnalysisError::ResponseParseFailed(_)
        )
    }

    pub fn inference(scene_id: u32, message: impl Into<String>) -> Self {
        AnalysisError::SceneInferenceFailed {
            scene_id,
            message: message.into(),
        }
    }
}

impl From<tokio::task::JoinError> for AnalysisError {
    fn from(err: tokio::task::JoinError) -> Self {
        AnalysisError::TaskFailed(err.to_string())
    }
}

pub type AnalysisResult<T> = Result<T, AnalysisError>;
