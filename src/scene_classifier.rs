//! 场景分类
//!
//! 为每个场景挑选代表帧、调用视觉模型，并把（可能不规范的）输出整理成
//! `SceneAnalysisRecord`。模型输出依次尝试三种解析方式：
//!
//! 1. 截取第一个 `{` 到最后一个 `}` 之间的内容按 JSON 解析
//! 2. `scene_description` 字段里嵌套了一个 JSON 对象时，单独取出解析
//! 3. 用正则逐个提取已知字段，其余字段取默认值
//!
//! 无论哪条路径，`classify` 都会返回一条记录，不会让整次分析失败。

use std::sync::Arc;

use base64::Engine;
use chrono::Utc;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use crate::error::AnalysisError;
use crate::inference::{InferenceClient, InferenceRequest};
use crate::models::{Mood, ParseMode, Scene, SceneAnalysisRecord, TimeRange};

/// 每次推理最多携带的代表帧数
pub const MAX_REPRESENTATIVE_FRAMES: usize = 3;

/// 描述的最大字符数
pub const MAX_DESCRIPTION_CHARS: usize = 200;

pub const DEFAULT_EMOTION_INTENSITY: f64 = 0.5;
pub const DEFAULT_HIGHLIGHT_SCORE: f64 = 0.5;

const DEFAULT_DESCRIPTION: &str = "无法获取场景描述";
const DEFAULT_SITUATION: &str = "未知";

/// 从模型输出中提取出的字段，缺失的字段为 None
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedScene {
    pub description: Option<String>,
    pub mood: Option<Mood>,
    pub emotion_intensity: Option<f64>,
    pub highlight_score: Option<f64>,
    pub situation: Option<String>,
    pub key_events: Vec<String>,
    pub mood_progression: Option<String>,
    pub camera_work: Option<String>,
}

/// 解析结果
#[derive(Debug, Clone, PartialEq)]
pub enum ParseOutcome {
    /// 完整 JSON
    Structured(ParsedScene),
    /// 嵌套 JSON 或正则提取
    PartiallyRecovered(ParsedScene),
    /// 无可用内容
    Unparseable,
}

/// 在 `len` 帧中均匀选出至多 `max` 个下标，首尾都包含
pub fn representative_indices(len: usize, max: usize) -> Vec<usize> {
    let k = max.min(len);
    match k {
        0 => Vec::new(),
        1 => vec![0],
        _ if k == len => (0..len).collect(),
        _ => (0..k).map(|i| i * (len - 1) / (k - 1)).collect(),
    }
}

/// 生成场景分析提示词
pub fn build_prompt(scene: &Scene, image_count: usize) -> String {
    let moods: Vec<&str> = Mood::ALL.iter().map(Mood::as_str).collect();
    format!(
        r#"你是一名专业的影视剪辑师。下面是视频中同一场景按时间顺序排列的 {count} 张截图，
场景时间范围为 {start:.1}s - {end:.1}s。

请只输出一个 JSON 对象，不要输出任何其他文字，格式如下：
{{
  "scene_description": "用一两句话描述画面内容",
  "mood": "{moods}",
  "emotion_intensity": 0.0 到 1.0 之间的数字,
  "situation": "场景所处的情境",
  "key_events": ["关键事件1", "关键事件2"],
  "mood_progression": "情绪在场景内如何变化",
  "camera_work": "镜头语言（景别、运镜）",
  "highlight_score": 0.0 到 1.0 之间的数字，表示适合剪成短视频的程度
}}

mood 只能从上面列出的值中选择一个。"#,
        count = image_count,
        start = scene.start_time,
        end = scene.end_time,
        moods = moods.join(" | "),
    )
}

/// 依次尝试三种解析方式
pub fn parse_response(text: &str) -> ParseOutcome {
    if text.trim().is_empty() {
        return ParseOutcome::Unparseable;
    }

    if let Some(object) = outer_json_object(text) {
        return ParseOutcome::Structured(parsed_from_object(&object));
    }

    if let Some(object) = nested_description_object(text) {
        debug!("🧩 [场景分类] 使用嵌套 JSON 解析");
        return ParseOutcome::PartiallyRecovered(parsed_from_object(&object));
    }

    debug!("🧩 [场景分类] JSON 解析失败，改用正则提取");
    ParseOutcome::PartiallyRecovered(parse_with_patterns(text))
}

/// 第一个 `{` 到最后一个 `}`
fn outer_json_object(text: &str) -> Option<Map<String, Value>> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if end <= start {
        return None;
    }
    match serde_json::from_str::<Value>(&text[start..=end]) {
        Ok(Value::Object(map)) => Some(map),
        _ => None,
    }
}

/// `scene_description` 之后第一个括号平衡的 JSON 对象
fn nested_description_object(text: &str) -> Option<Map<String, Value>> {
    let key = text.find("scene_description")?;
    let rest = &text[key..];
    let open = rest.find('{')?;
    let candidate = balanced_object(&rest[open..])?;

    // 模型常把内层引号转义
    [candidate.to_string(), candidate.replace("\\\"", "\"")]
        .iter()
        .find_map(|s| match serde_json::from_str::<Value>(s) {
            Ok(Value::Object(map)) => Some(map),
            _ => None,
        })
}

fn balanced_object(text: &str) -> Option<&str> {
    let mut depth = 0usize;
    for (i, c) in text.char_indices() {
        match c {
            '{' => depth += 1,
            '}' => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    return Some(&text[..=i]);
                }
            }
            _ => {}
        }
    }
    None
}

fn text_field(map: &Map<String, Value>, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|k| match map.get(*k) {
        Some(Value::String(s)) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Some(Value::Array(items)) if !items.is_empty() => Some(
            items
                .iter()
                .map(|v| v.as_str().map(str::to_string).unwrap_or_else(|| v.to_string()))
                .collect::<Vec<_>>()
                .join(", "),
        ),
        _ => None,
    })
}

/// 取第一个非空标签；数组只看第一个元素
fn label_field(map: &Map<String, Value>, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|k| match map.get(*k) {
        Some(Value::String(s)) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Some(Value::Array(items)) => items
            .first()
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string),
        _ => None,
    })
}

fn unit_field(map: &Map<String, Value>, keys: &[&str]) -> Option<f64> {
    keys.iter().find_map(|k| map.get(*k).and_then(unit_value))
}

/// 数字、数字字符串或百分比转为 [0,1] 内的值
pub fn unit_value(value: &Value) -> Option<f64> {
    let raw = match value {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => parse_unit_str(s)?,
        _ => return None,
    };
    raw.is_finite().then(|| raw.clamp(0.0, 1.0))
}

fn parse_unit_str(s: &str) -> Option<f64> {
    let s = s.trim();
    match s.strip_suffix('%') {
        Some(percent) => percent.trim().parse::<f64>().ok().map(|v| v / 100.0),
        None => s.parse::<f64>().ok(),
    }
}

fn parsed_from_object(map: &Map<String, Value>) -> ParsedScene {
    let key_events = match map.get("key_events") {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|v| v.as_str())
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect(),
        Some(Value::String(s)) if !s.trim().is_empty() => vec![s.trim().to_string()],
        _ => Vec::new(),
    };

    ParsedScene {
        description: text_field(map, &["scene_description", "description"]),
        mood: label_field(map, &["mood", "primary_mood"]).map(|m| Mood::from_label(&m)),
        emotion_intensity: unit_field(map, &["emotion_intensity", "intensity"]),
        highlight_score: unit_field(map, &["highlight_score", "highlight_potential"]),
        situation: text_field(map, &["situation", "context"]),
        key_events,
        mood_progression: text_field(map, &["mood_progression"]),
        camera_work: text_field(map, &["camera_work", "camera"]),
    }
}

static MOOD_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?i)(?:primary_)?mood"?\s*(?:[:=]|\bis\b)\s*"?([a-z]+)"#).expect("无效的正则表达式"));
static INTENSITY_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?i)emotion_intensity"?\s*[:=]\s*"?(-?[0-9]*\.?[0-9]+\s*%?)"#).expect("无效的正则表达式"));
static HIGHLIGHT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?i)highlight_score"?\s*[:=]\s*"?(-?[0-9]*\.?[0-9]+\s*%?)"#).expect("无效的正则表达式"));
static SITUATION_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?i)situation"?\s*[:=]\s*"?([^"\n,}]+)"#).expect("无效的正则表达式"));
static PROGRESSION_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?i)mood_progression"?\s*[:=]\s*"?([^"\n}]+)"#).expect("无效的正则表达式"));
static DESCRIPTION_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?i)(?:scene_)?description"?\s*[:=]\s*"([^"]+)""#).expect("无效的正则表达式"));

fn capture(re: &Regex, text: &str) -> Option<String> {
    re.captures(text)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().trim().to_string())
        .filter(|s| !s.is_empty())
}

/// 描述字段的正则提取
///
/// 以 `{` 开头的匹配是被截断的嵌套对象，跳过它取后面的匹配；只有这种匹配时
/// 返回 None，交给默认描述。完全没有描述字段时整段文字作为描述。
fn pattern_description(text: &str) -> Option<String> {
    let mut matches = DESCRIPTION_RE
        .captures_iter(text)
        .filter_map(|c| c.get(1))
        .map(|m| m.as_str().trim())
        .filter(|s| !s.is_empty())
        .peekable();
    if matches.peek().is_none() {
        return Some(text.trim().to_string());
    }
    matches.find(|s| !s.starts_with('{')).map(str::to_string)
}

/// 正则逐字段提取；一个字段都没匹配到时，整段文字作为描述
fn parse_with_patterns(text: &str) -> ParsedScene {
    ParsedScene {
        description: pattern_description(text),
        mood: capture(&MOOD_RE, text).map(|m| Mood::from_label(&m)),
        emotion_intensity: capture(&INTENSITY_RE, text).and_then(|s| unit_value(&Value::String(s))),
        highlight_score: capture(&HIGHLIGHT_RE, text).and_then(|s| unit_value(&Value::String(s))),
        situation: capture(&SITUATION_RE, text),
        key_events: Vec::new(),
        mood_progression: capture(&PROGRESSION_RE, text),
        camera_work: None,
    }
}

/// 描述本身是 JSON 时取其内层描述，否则截断到固定长度
pub fn normalize_description(raw: &str) -> String {
    let trimmed = raw.trim();
    if trimmed.starts_with('{') {
        if let Some(inner) = outer_json_object(trimmed)
            .and_then(|map| text_field(&map, &["scene_description", "description"]))
        {
            return truncate(&inner);
        }
    }
    truncate(trimmed)
}

fn truncate(text: &str) -> String {
    if text.chars().count() <= MAX_DESCRIPTION_CHARS {
        return text.to_string();
    }
    let mut cut: String = text.chars().take(MAX_DESCRIPTION_CHARS - 3).collect();
    cut.push_str("...");
    cut
}

/// 补全默认值、夹紧数值并打上场景信息
pub fn finalize(scene_id: u32, time_range: TimeRange, parsed: ParsedScene, parse_mode: ParseMode) -> SceneAnalysisRecord {
    let description = parsed
        .description
        .as_deref()
        .map(normalize_description)
        .filter(|d| !d.is_empty())
        .unwrap_or_else(|| DEFAULT_DESCRIPTION.to_string());

    SceneAnalysisRecord {
        scene_id,
        description,
        mood: parsed.mood.unwrap_or(Mood::Neutral),
        emotion_intensity: parsed
            .emotion_intensity
            .unwrap_or(DEFAULT_EMOTION_INTENSITY)
            .clamp(0.0, 1.0),
        highlight_score: parsed.highlight_score.unwrap_or(DEFAULT_HIGHLIGHT_SCORE).clamp(0.0, 1.0),
        situation: parsed.situation.unwrap_or_else(|| DEFAULT_SITUATION.to_string()),
        key_events: parsed.key_events,
        mood_progression: parsed.mood_progression,
        camera_work: parsed.camera_work,
        time_range,
        generated_at: Utc::now(),
        parse_mode,
        error: false,
        error_message: None,
    }
}

/// 推理或解析失败时的兜底记录
pub fn fallback_record(scene_id: u32, time_range: TimeRange, reason: &str) -> SceneAnalysisRecord {
    SceneAnalysisRecord {
        description: format!("场景 {} 分析失败", scene_id),
        error: true,
        error_message: Some(reason.to_string()),
        ..finalize(scene_id, time_range, ParsedScene::default(), ParseMode::Fallback)
    }
}

/// 场景分类器
pub struct SceneClassifier {
    client: Arc<dyn InferenceClient>,
}

impl SceneClassifier {
    pub fn new(client: Arc<dyn InferenceClient>) -> Self {
        Self { client }
    }

    /// 分析一个场景；任何失败都转成兜底记录
    pub async fn classify(&self, scene: &Scene, batch_size: usize) -> SceneAnalysisRecord {
        let time_range = scene.time_range();
        let max_images = MAX_REPRESENTATIVE_FRAMES.min(batch_size.max(1));
        let images: Vec<String> = representative_indices(scene.frames.len(), max_images)
            .into_iter()
            .map(|i| base64::engine::general_purpose::STANDARD.encode(&scene.frames[i].jpeg))
            .collect();

        if images.is_empty() {
            warn!("⚠️  [场景分类] 场景 {} 没有帧", scene.id);
            return fallback_record(scene.id, time_range, "场景没有可用的帧");
        }

        debug!(
            "🖼️  [场景分类] 场景 {} 选取 {} 张代表帧，模型 {}",
            scene.id,
            images.len(),
            self.client.model()
        );
        let request = InferenceRequest {
            scene_id: scene.id,
            prompt: build_prompt(scene, images.len()),
            images,
        };

        let text = match self.client.generate(request).await {
            Ok(text) => text,
            Err(e) => {
                warn!("⚠️  [场景分类] {}，使用兜底记录", e);
                return fallback_record(scene.id, time_range, &e.to_string());
            }
        };

        match parse_response(&text) {
            ParseOutcome::Structured(parsed) => {
                info!("✅ [场景分类] 场景 {} 解析完成", scene.id);
                finalize(scene.id, time_range, parsed, ParseMode::Structured)
            }
            ParseOutcome::PartiallyRecovered(parsed) => {
                info!("🩹 [场景分类] 场景 {} 部分恢复", scene.id);
                finalize(scene.id, time_range, parsed, ParseMode::Partial)
            }
            ParseOutcome::Unparseable => {
                let err = AnalysisError::ResponseParseFailed(format!("场景 {} 的模型输出为空", scene.id));
                warn!("⚠️  [场景分类] {}", err);
                fallback_record(scene.id, time_range, &err.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AnalysisResult;
    use crate::models::Frame;
    use async_trait::async_trait;
    use image::RgbImage;
    use std::sync::Mutex;

    struct ScriptedClient {
        reply: Result<String, String>,
        seen_images: Mutex<Vec<usize>>,
    }

    impl ScriptedClient {
        fn new(reply: Result<String, String>) -> Arc<Self> {
            Arc::new(Self {
                reply,
                seen_images: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl InferenceClient for ScriptedClient {
        async fn generate(&self, request: InferenceRequest) -> AnalysisResult<String> {
            self.seen_images.lock().unwrap().push(request.images.len());
            match &self.reply {
                Ok(text) => Ok(text.clone()),
                Err(reason) => Err(AnalysisError::inference(request.scene_id, reason.clone())),
            }
        }

        fn model(&self) -> &str {
            "scripted"
        }
    }

    fn scene(frame_count: usize) -> Scene {
        let img = RgbImage::from_pixel(8, 8, image::Rgb([10, 20, 30]));
        Scene {
            id: 4,
            start_time: 2.0,
            end_time: 2.0 + frame_count as f64,
            frames: (0..frame_count)
                .map(|i| Frame::from_rgb(i as u64, 2.0 + i as f64, &img, 70).unwrap())
                .collect(),
        }
    }

    #[test]
    fn test_representative_indices() {
        assert_eq!(representative_indices(0, 3), Vec::<usize>::new());
        assert_eq!(representative_indices(1, 3), vec![0]);
        assert_eq!(representative_indices(3, 3), vec![0, 1, 2]);
        assert_eq!(representative_indices(7, 3), vec![0, 3, 6]);
        assert_eq!(representative_indices(10, 3), vec![0, 4, 9]);
        assert_eq!(representative_indices(10, 2), vec![0, 9]);
    }

    #[test]
    fn test_structured_roundtrip() {
        let text = r#"Sure! Here is the analysis:
```json
{"scene_description": "两个人在海边散步", "mood": "romantic", "emotion_intensity": 0.72,
 "situation": "傍晚约会", "key_events": ["牵手", "夕阳"], "highlight_score": "85%",
 "camera_work": "远景跟拍"}
```"#;
        let ParseOutcome::Structured(parsed) = parse_response(text) else {
            panic!("expected structured outcome");
        };
        let record = finalize(1, TimeRange::new(0.0, 4.0), parsed, ParseMode::Structured);

        assert_eq!(record.description, "两个人在海边散步");
        assert_eq!(record.mood, Mood::Romantic);
        assert!((record.emotion_intensity - 0.72).abs() < 1e-9);
        assert!((record.highlight_score - 0.85).abs() < 1e-9);
        assert_eq!(record.key_events, vec!["牵手", "夕阳"]);
        assert_eq!(record.camera_work.as_deref(), Some("远景跟拍"));
        assert!(record.mood_progression.is_none());
        assert!(!record.error);
    }

    #[test]
    fn test_nested_description_object() {
        let text = r#"{"scene_description": "{"scene_description": "a chase through a market", "mood": "tense", "highlight_score": 0.9}", "mood": "calm"}"#;
        let ParseOutcome::PartiallyRecovered(parsed) = parse_response(text) else {
            panic!("expected partial outcome");
        };
        assert_eq!(parsed.description.as_deref(), Some("a chase through a market"));
        assert_eq!(parsed.mood, Some(Mood::Tense));
        assert_eq!(parsed.highlight_score, Some(0.9));
    }

    #[test]
    fn test_truncated_nested_description_skips_brace() {
        // 输出在内层对象中途被截断，没有任何闭合的 `}`
        let text = r#"{"scene_description": "{"scene_description": "a chase through a market", "mood": "tense", "highlight_score": 0.9"#;
        let ParseOutcome::PartiallyRecovered(parsed) = parse_response(text) else {
            panic!("expected partial outcome");
        };
        assert_eq!(parsed.description.as_deref(), Some("a chase through a market"));
        assert_eq!(parsed.mood, Some(Mood::Tense));

        let record = finalize(4, TimeRange::new(0.0, 2.0), parsed, ParseMode::Partial);
        assert_eq!(record.description, "a chase through a market");
        assert!((record.highlight_score - 0.9).abs() < 1e-9);
    }

    #[test]
    fn test_truncated_description_without_inner_text_uses_default() {
        let text = r#"{"scene_description": "{"mood": "sad""#;
        let ParseOutcome::PartiallyRecovered(parsed) = parse_response(text) else {
            panic!("expected partial outcome");
        };
        let record = finalize(5, TimeRange::new(0.0, 2.0), parsed, ParseMode::Partial);
        assert_eq!(record.description, DEFAULT_DESCRIPTION);
        assert_eq!(record.mood, Mood::Sad);
    }

    #[test]
    fn test_mood_array_takes_first_label() {
        let text = r#"{"scene_description": "a rooftop standoff", "mood": ["tense", "excited"]}"#;
        let ParseOutcome::Structured(parsed) = parse_response(text) else {
            panic!("expected structured outcome");
        };
        assert_eq!(parsed.mood, Some(Mood::Tense));
    }

    #[test]
    fn test_non_numeric_scores_use_defaults() {
        let text = r#"{"scene_description": "a quiet street", "highlight_score": "high", "emotion_intensity": null}"#;
        let ParseOutcome::Structured(parsed) = parse_response(text) else {
            panic!("expected structured outcome");
        };
        let record = finalize(6, TimeRange::new(0.0, 1.0), parsed, ParseMode::Structured);
        assert_eq!(record.highlight_score, DEFAULT_HIGHLIGHT_SCORE);
        assert_eq!(record.emotion_intensity, DEFAULT_EMOTION_INTENSITY);
    }

    #[test]
    fn test_json_shaped_description_is_unwrapped() {
        let text = r#"{"scene_description": "{\"description\": \"kids playing football\"}", "mood": "happy"}"#;
        let ParseOutcome::Structured(parsed) = parse_response(text) else {
            panic!("expected structured outcome");
        };
        let record = finalize(1, TimeRange::new(0.0, 1.0), parsed, ParseMode::Structured);
        assert_eq!(record.description, "kids playing football");
    }

    #[test]
    fn test_regex_recovery() {
        let text = "mood: excited\nemotion_intensity: 0.8\nsituation: a concert crowd\nhighlight_score = 1.7\nmood_progression: builds to a climax";
        let ParseOutcome::PartiallyRecovered(parsed) = parse_response(text) else {
            panic!("expected partial outcome");
        };
        let record = finalize(2, TimeRange::new(1.0, 3.0), parsed, ParseMode::Partial);

        assert_eq!(record.mood, Mood::Excited);
        assert!((record.emotion_intensity - 0.8).abs() < 1e-9);
        assert_eq!(record.highlight_score, 1.0);
        assert_eq!(record.situation, "a concert crowd");
        assert_eq!(record.mood_progression.as_deref(), Some("builds to a climax"));
    }

    #[test]
    fn test_prose_yields_defaults() {
        let text = "I can see a person sitting near a window while it rains outside.";
        let ParseOutcome::PartiallyRecovered(parsed) = parse_response(text) else {
            panic!("expected partial outcome");
        };
        let record = finalize(3, TimeRange::new(0.0, 2.0), parsed, ParseMode::Partial);

        assert_eq!(record.description, text);
        assert_eq!(record.mood, Mood::Neutral);
        assert_eq!(record.emotion_intensity, DEFAULT_EMOTION_INTENSITY);
        assert_eq!(record.highlight_score, DEFAULT_HIGHLIGHT_SCORE);
        assert_eq!(record.situation, DEFAULT_SITUATION);
        assert!(!record.error);
    }

    #[test]
    fn test_out_of_range_values_are_clamped() {
        let text = r#"{"mood": "sad", "emotion_intensity": -3, "highlight_score": 42}"#;
        let ParseOutcome::Structured(parsed) = parse_response(text) else {
            panic!("expected structured outcome");
        };
        let record = finalize(1, TimeRange::new(0.0, 1.0), parsed, ParseMode::Structured);
        assert_eq!(record.emotion_intensity, 0.0);
        assert_eq!(record.highlight_score, 1.0);
        assert_eq!(record.description, DEFAULT_DESCRIPTION);
    }

    #[test]
    fn test_blank_text_is_unparseable() {
        assert_eq!(parse_response("  \n "), ParseOutcome::Unparseable);
    }

    #[test]
    fn test_long_description_is_truncated() {
        let long = "字".repeat(500);
        let normalized = normalize_description(&long);
        assert_eq!(normalized.chars().count(), MAX_DESCRIPTION_CHARS);
        assert!(normalized.ends_with("..."));
    }

    #[tokio::test]
    async fn test_classify_limits_images_by_batch_size() {
        let client = ScriptedClient::new(Ok(r#"{"mood": "calm", "highlight_score": 0.3}"#.to_string()));
        let classifier = SceneClassifier::new(client.clone());

        let record = classifier.classify(&scene(6), 8).await;
        assert_eq!(record.scene_id, 4);
        assert_eq!(record.mood, Mood::Calm);
        assert_eq!(record.parse_mode, ParseMode::Structured);
        assert_eq!(record.time_range, TimeRange::new(2.0, 8.0));

        classifier.classify(&scene(6), 2).await;
        assert_eq!(*client.seen_images.lock().unwrap(), vec![3, 2]);
    }

    #[tokio::test]
    async fn test_classify_failure_becomes_fallback() {
        let client = ScriptedClient::new(Err("请求超时 (60s)".to_string()));
        let classifier = SceneClassifier::new(client);

        let record = classifier.classify(&scene(2), 4).await;
        assert!(record.error);
        assert_eq!(record.parse_mode, ParseMode::Fallback);
        assert_eq!(record.mood, Mood::Neutral);
        assert_eq!(record.highlight_score, DEFAULT_HIGHLIGHT_SCORE);
        assert!(record.error_message.unwrap().contains("请求超时"));
    }
}
