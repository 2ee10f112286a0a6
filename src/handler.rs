use std::path::PathBuf;
use std::sync::Arc;

use axum::{
    extract::{Json, Path, State},
    http::StatusCode,
    response::Json as ResponseJson,
    routing::{get, post},
    Router,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{error, info};

use crate::error::AnalysisError;
use crate::models::{AnalysisStatus, VideoRecord};
use crate::processor::Orchestrator;
use crate::store::VideoStore;

/// 各 handler 共享的状态
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn VideoStore>,
    pub orchestrator: Arc<Orchestrator>,
    /// 报告输出目录
    pub report_dir: PathBuf,
}

type ApiError = (StatusCode, String);

fn api_error(err: AnalysisError) -> ApiError {
    let status = match err {
        AnalysisError::VideoNotFound(_) => StatusCode::NOT_FOUND,
        AnalysisError::InvalidState(_) => StatusCode::CONFLICT,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, err.to_string())
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(health_check))
        .route("/health", get(health_check))
        .route("/videos", get(list_videos).post(register_video))
        .route("/videos/:id", get(get_video))
        .route("/analyze/:id", post(start_analysis))
        .with_state(state)
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub model: String,
    pub timestamp: String,
}

/// 健康检查 Handler
pub async fn health_check(State(state): State<AppState>) -> ResponseJson<HealthResponse> {
    ResponseJson(HealthResponse {
        status: "healthy".to_string(),
        model: state.orchestrator.config().inference.model.clone(),
        timestamp: Utc::now().to_rfc3339(),
    })
}

/// 登记本地视频请求
#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    /// 本地视频路径
    pub file_path: String,
}

/// 登记一个本地视频文件
pub async fn register_video(
    State(state): State<AppState>,
    Json(request): Json<RegisterRequest>,
) -> Result<(StatusCode, ResponseJson<VideoRecord>), ApiError> {
    let path = PathBuf::from(&request.file_path);
    if !path.is_file() {
        return Err((StatusCode::BAD_REQUEST, format!("文件不存在: {}", request.file_path)));
    }

    let record = VideoRecord::new(path);
    info!("📥 [服务] 登记视频 {} -> {}", record.original_name, record.id);
    state.store.insert(record.clone());
    Ok((StatusCode::CREATED, ResponseJson(record)))
}

/// 列出所有视频
pub async fn list_videos(State(state): State<AppState>) -> ResponseJson<Vec<VideoRecord>> {
    ResponseJson(state.store.list())
}

/// 查询单个视频（含进度和分析结果）
pub async fn get_video(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<ResponseJson<VideoRecord>, ApiError> {
    state
        .store
        .get(&id)
        .map(ResponseJson)
        .ok_or_else(|| api_error(AnalysisError::VideoNotFound(id)))
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AnalyzeResponse {
    pub message: String,
    pub video_id: String,
    pub status: AnalysisStatus,
}

/// 开始后台分析，立即返回 202
pub async fn start_analysis(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<(StatusCode, ResponseJson<AnalyzeResponse>), ApiError> {
    let record = state.store.begin_analysis(&id).map_err(api_error)?;
    info!("🚀 [服务] 开始分析视频 {}", id);

    let video_id = id.clone();
    tokio::spawn(async move {
        if let Err(e) = state
            .orchestrator
            .run_for_video(state.store.as_ref(), &state.report_dir, &video_id)
            .await
        {
            error!("❌ [服务] 视频 {} 分析失败: {}", video_id, e);
        }
    });

    Ok((
        StatusCode::ACCEPTED,
        ResponseJson(AnalyzeResponse {
            message: "分析已开始".to_string(),
            video_id: id,
            status: record.status,
        }),
    ))
}
