use crate::models::{AnalysisQuality, ClipCandidate, Mood, MoodCount, OverallSummary, SceneAnalysisRecord};

/// 高光场景的分数阈值（严格大于）
pub const HIGHLIGHT_THRESHOLD: f64 = 0.7;

/// 推荐片段数量
pub const RECOMMENDED_CLIP_COUNT: usize = 5;

/// 无错误记录占比超过该值时质量为 good
const GOOD_QUALITY_RATIO: f64 = 0.8;

/// 汇总所有场景记录
pub fn summarize(records: &[SceneAnalysisRecord]) -> OverallSummary {
    // 按首次出现顺序计数，平局时先出现者胜出
    let mut mood_distribution: Vec<MoodCount> = Vec::new();
    for record in records {
        match mood_distribution.iter_mut().find(|c| c.mood == record.mood) {
            Some(entry) => entry.count += 1,
            None => mood_distribution.push(MoodCount {
                mood: record.mood,
                count: 1,
            }),
        }
    }

    let dominant_mood = mood_distribution
        .iter()
        .fold(None::<&MoodCount>, |best, c| match best {
            Some(b) if b.count >= c.count => Some(b),
            _ => Some(c),
        })
        .map(|c| c.mood)
        .unwrap_or(Mood::Neutral);

    let average_highlight_score = if records.is_empty() {
        0.0
    } else {
        records.iter().map(|r| r.highlight_score).sum::<f64>() / records.len() as f64
    };

    let highlight_scenes = records
        .iter()
        .filter(|r| r.highlight_score > HIGHLIGHT_THRESHOLD)
        .map(ClipCandidate::from)
        .collect();

    let mut ranked: Vec<&SceneAnalysisRecord> = records.iter().collect();
    // 稳定排序，同分时保持场景顺序
    ranked.sort_by(|a, b| b.highlight_score.total_cmp(&a.highlight_score));
    let recommended_clips = ranked
        .into_iter()
        .take(RECOMMENDED_CLIP_COUNT)
        .map(ClipCandidate::from)
        .collect();

    let clean = records.iter().filter(|r| !r.error).count();
    let analysis_quality = if !records.is_empty() && clean as f64 > records.len() as f64 * GOOD_QUALITY_RATIO {
        AnalysisQuality::Good
    } else {
        AnalysisQuality::Fair
    };

    OverallSummary {
        dominant_mood,
        mood_distribution,
        average_highlight_score,
        highlight_scenes,
        recommended_clips,
        analysis_quality,
    }
}
