//! 视觉模型推理客户端
//!
//! 对接 Ollama 的 `/api/generate` 接口。所有失败（超时、连接失败、非 200、空响应）
//! 都归为 `SceneInferenceFailed`，由调用方决定是否兜底。

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::InferenceConfig;
use crate::error::{AnalysisError, AnalysisResult};

/// 一次场景推理请求
#[derive(Debug, Clone)]
pub struct InferenceRequest {
    /// 场景编号，用于错误归属
    pub scene_id: u32,
    /// 提示词
    pub prompt: String,
    /// base64 编码的 JPEG
    pub images: Vec<String>,
}

/// 推理服务抽象，便于测试时替换
#[async_trait]
pub trait InferenceClient: Send + Sync {
    /// 返回模型的原始文本输出
    async fn generate(&self, request: InferenceRequest) -> AnalysisResult<String>;

    /// 模型名称
    fn model(&self) -> &str;
}

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    images: &'a [String],
    stream: bool,
    keep_alive: &'a str,
    options: GenerateOptions,
}

#[derive(Debug, Serialize)]
struct GenerateOptions {
    temperature: f32,
    top_p: f32,
    num_predict: u32,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    response: String,
}

/// Ollama 客户端
pub struct OllamaClient {
    config: InferenceConfig,
    client: Client,
}

impl OllamaClient {
    pub fn new(config: InferenceConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .context("创建 HTTP 客户端失败")?;

        Ok(Self { config, client })
    }

    fn endpoint(&self) -> String {
        format!("{}/api/generate", self.config.base_url.trim_end_matches('/'))
    }
}

#[async_trait]
impl InferenceClient for OllamaClient {
    async fn generate(&self, request: InferenceRequest) -> AnalysisResult<String> {
        let scene_id = request.scene_id;
        let body = GenerateRequest {
            model: &self.config.model,
            prompt: &request.prompt,
            images: &request.images,
            stream: false,
            keep_alive: &self.config.keep_alive,
            options: GenerateOptions {
                temperature: self.config.temperature,
                top_p: self.config.top_p,
                num_predict: self.config.num_predict,
            },
        };

        debug!(
            "🤖 [推理] 场景 {} -> {} ({} 张图)",
            scene_id,
            self.config.model,
            request.images.len()
        );

        let response = self
            .client
            .post(self.endpoint())
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                let reason = if e.is_timeout() {
                    format!("请求超时 ({}s)", self.config.timeout_secs)
                } else {
                    format!("连接失败: {}", e)
                };
                warn!("⚠️  [推理] 场景 {}: {}", scene_id, reason);
                AnalysisError::inference(scene_id, reason)
            })?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            warn!("⚠️  [推理] 场景 {}: HTTP {} {}", scene_id, status.as_u16(), detail);
            return Err(AnalysisError::inference(scene_id, format!("HTTP {}", status.as_u16())));
        }

        let parsed: GenerateResponse = response.json().await.map_err(|e| {
            let reason = if e.is_timeout() {
                format!("读取响应超时 ({}s)", self.config.timeout_secs)
            } else {
                format!("响应体无效: {}", e)
            };
            AnalysisError::inference(scene_id, reason)
        })?;

        if parsed.response.trim().is_empty() {
            return Err(AnalysisError::inference(scene_id, "空响应"));
        }

        Ok(parsed.response)
    }

    fn model(&self) -> &str {
        &self.config.model
    }
}
