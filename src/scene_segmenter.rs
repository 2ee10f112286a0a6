use image::{GrayImage, RgbImage};
use std::time::Instant;
use tracing::{debug, info, warn};

use crate::models::{Frame, Scene};

/// 颜色+结构同时变化
const CUT_COLOR: f64 = 0.65;
const CUT_STRUCTURE: f64 = 0.5;
/// 颜色稳定但结构（机位/角度）变化
const STABLE_COLOR: f64 = 0.8;
const ANGLE_STRUCTURE: f64 = 0.3;
/// 仅光照变化
const LIGHTING_COLOR: f64 = 0.5;
const LIGHTING_STRUCTURE: f64 = 0.7;
/// 弱变化累计
const WEAK_COLOR: f64 = 0.75;
const WEAK_CHANGE_LIMIT: usize = 3;

/// 平坦图像的方差阈值（灰度级平方）
const FLAT_VARIANCE: f64 = 1.0;
const FLAT_MEAN_TOLERANCE: f64 = 8.0;

/// 相邻两帧的相似度信号
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameSimilarity {
    /// 颜色直方图相关系数，约 [-1, 1]
    pub color: f64,
    /// 灰度归一化互相关，[0, 1]
    pub structural: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoundaryReason {
    /// 颜色和结构同时变化
    ColorAndStructure,
    /// 颜色稳定，结构/角度变化
    StructuralChange,
    /// 连续多次弱变化
    GradualTransition,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Boundary(BoundaryReason),
    /// 光照变化，不切分
    LightingChange,
    Continuous,
}

/// 联合 RGB 直方图（每通道 8 个 bin）的相关系数
pub fn color_correlation(img1: &RgbImage, img2: &RgbImage) -> f64 {
    let hist1 = rgb_histogram(img1);
    let hist2 = rgb_histogram(img2);

    let mean1 = hist1.iter().sum::<f64>() / hist1.len() as f64;
    let mean2 = hist2.iter().sum::<f64>() / hist2.len() as f64;

    let mut cov = 0.0;
    let mut var1 = 0.0;
    let mut var2 = 0.0;
    for (h1, h2) in hist1.iter().zip(hist2.iter()) {
        let d1 = h1 - mean1;
        let d2 = h2 - mean2;
        cov += d1 * d2;
        var1 += d1 * d1;
        var2 += d2 * d2;
    }

    let denom = (var1 * var2).sqrt();
    if denom <= f64::EPSILON {
        return if hist1 == hist2 { 1.0 } else { 0.0 };
    }
    cov / denom
}

/// 归一化直方图，bin = (r>>5, g>>5, b>>5)
fn rgb_histogram(img: &RgbImage) -> Vec<f64> {
    let mut hist = vec![0.0f64; 512];
    for pixel in img.pixels() {
        let bin = ((pixel[0] >> 5) as usize) * 64 + ((pixel[1] >> 5) as usize) * 8 + (pixel[2] >> 5) as usize;
        hist[bin] += 1.0;
    }

    let total = (img.width() * img.height()).max(1) as f64;
    for h in hist.iter_mut() {
        *h /= total;
    }
    hist
}

/// 灰度图的零均值归一化互相关（两图同尺寸时即模板匹配的峰值），截断到 [0, 1]
pub fn structural_similarity(img1: &GrayImage, img2: &GrayImage) -> f64 {
    let resized;
    let img2 = if img1.dimensions() != img2.dimensions() {
        resized = image::imageops::resize(img2, img1.width(), img1.height(), image::imageops::FilterType::Triangle);
        &resized
    } else {
        img2
    };

    let n = (img1.width() * img1.height()) as f64;
    if n == 0.0 {
        return 1.0;
    }

    let mean1 = img1.pixels().map(|p| p[0] as f64).sum::<f64>() / n;
    let mean2 = img2.pixels().map(|p| p[0] as f64).sum::<f64>() / n;

    let mut cov = 0.0;
    let mut var1 = 0.0;
    let mut var2 = 0.0;
    for (p1, p2) in img1.pixels().zip(img2.pixels()) {
        let d1 = p1[0] as f64 - mean1;
        let d2 = p2[0] as f64 - mean2;
        cov += d1 * d2;
        var1 += d1 * d1;
        var2 += d2 * d2;
    }

    let flat1 = var1 / n < FLAT_VARIANCE;
    let flat2 = var2 / n < FLAT_VARIANCE;
    match (flat1, flat2) {
        (true, true) => {
            if (mean1 - mean2).abs() <= FLAT_MEAN_TOLERANCE {
                1.0
            } else {
                0.0
            }
        }
        (true, false) | (false, true) => 0.0,
        (false, false) => (cov / (var1 * var2).sqrt()).clamp(0.0, 1.0),
    }
}

/// 计算两帧的相似度信号
pub fn frame_similarity(img1: &RgbImage, img2: &RgbImage) -> FrameSimilarity {
    let gray1 = image::imageops::grayscale(img1);
    let gray2 = image::imageops::grayscale(img2);

    FrameSimilarity {
        color: color_correlation(img1, img2),
        structural: structural_similarity(&gray1, &gray2),
    }
}

/// 按顺序套用切分规则；`weak_changes` 跨帧累计
pub fn classify_transition(similarity: FrameSimilarity, weak_changes: &mut usize) -> Transition {
    let FrameSimilarity { color, structural } = similarity;

    if color < CUT_COLOR && structural < CUT_STRUCTURE {
        *weak_changes = 0;
        return Transition::Boundary(BoundaryReason::ColorAndStructure);
    }
    if color > STABLE_COLOR && structural < ANGLE_STRUCTURE {
        *weak_changes = 0;
        return Transition::Boundary(BoundaryReason::StructuralChange);
    }
    if color < LIGHTING_COLOR && structural > LIGHTING_STRUCTURE {
        return Transition::LightingChange;
    }

    if color < WEAK_COLOR {
        *weak_changes += 1;
        if *weak_changes >= WEAK_CHANGE_LIMIT {
            *weak_changes = 0;
            return Transition::Boundary(BoundaryReason::GradualTransition);
        }
    } else {
        *weak_changes = 0;
    }
    Transition::Continuous
}

/// `similarities[i]` 是第 i 帧与第 i+1 帧的信号；返回场景起始帧下标，首个总是 0
pub fn boundaries_from_similarities(similarities: &[FrameSimilarity]) -> Vec<usize> {
    let mut boundaries = vec![0];
    let mut weak_changes = 0;

    for (i, similarity) in similarities.iter().enumerate() {
        match classify_transition(*similarity, &mut weak_changes) {
            Transition::Boundary(reason) => {
                debug!(
                    "[场景分割] 帧 {} 切分: {:?} (color={:.3}, structural={:.3})",
                    i + 1,
                    reason,
                    similarity.color,
                    similarity.structural
                );
                boundaries.push(i + 1);
            }
            Transition::LightingChange => {
                debug!("[场景分割] 帧 {} 光照变化，不切分", i + 1);
            }
            Transition::Continuous => {}
        }
    }

    boundaries
}

/// 场景分割器
#[derive(Debug, Clone, Default)]
pub struct SceneSegmenter;

impl SceneSegmenter {
    pub fn new() -> Self {
        Self
    }

    /// 检测场景边界（帧下标）
    ///
    /// 逐帧解码，只保留上一帧的像素。解码失败的帧不参与比较。
    pub fn detect_boundaries(&self, frames: &[Frame]) -> Vec<usize> {
        if frames.is_empty() {
            return Vec::new();
        }

        let start = Instant::now();
        let mut similarities = Vec::with_capacity(frames.len().saturating_sub(1));
        let mut previous: Option<RgbImage> = None;

        for (i, frame) in frames.iter().enumerate() {
            let current = match frame.decode() {
                Ok(img) => Some(img),
                Err(e) => {
                    warn!("⚠️  [场景分割] 帧 {} 解码失败: {}", frame.index, e);
                    None
                }
            };

            if i > 0 {
                let similarity = match (previous.as_ref(), current.as_ref()) {
                    (Some(prev), Some(curr)) => frame_similarity(prev, curr),
                    // 任一帧无法解码时视为连续
                    _ => FrameSimilarity { color: 1.0, structural: 1.0 },
                };
                similarities.push(similarity);
            }
            previous = current;
        }

        let boundaries = boundaries_from_similarities(&similarities);
        info!(
            "✅ [场景分割] {} 帧中检测到 {} 个场景，耗时 {:.2}秒",
            frames.len(),
            boundaries.len(),
            start.elapsed().as_secs_f64()
        );
        boundaries
    }
}

/// 在边界处切分帧序列，得到连续、不重叠的场景
pub fn group_frames_by_scene(frames: Vec<Frame>, boundaries: &[usize]) -> Vec<Scene> {
    if frames.is_empty() {
        return Vec::new();
    }

    let mut starts: Vec<usize> = boundaries.iter().copied().filter(|&b| b < frames.len()).collect();
    starts.sort_unstable();
    starts.dedup();
    if starts.first() != Some(&0) {
        starts.insert(0, 0);
    }

    let mut scenes = Vec::with_capacity(starts.len());
    let mut remaining = frames;
    // 从后往前切，避免反复移动
    for (i, &start) in starts.iter().enumerate().rev() {
        let slice = remaining.split_off(start);
        scenes.push(Scene {
            id: (i + 1) as u32,
            start_time: slice.first().map(|f| f.timestamp).unwrap_or(0.0),
            end_time: slice.last().map(|f| f.timestamp).unwrap_or(0.0),
            frames: slice,
        });
    }
    scenes.reverse();
    scenes
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageBuffer, Rgb};

    const W: u32 = 64;
    const H: u32 = 36;

    fn red_horizontal_ramp() -> RgbImage {
        ImageBuffer::from_fn(W, H, |x, _| Rgb([(x * 255 / (W - 1)) as u8, 200, 200]))
    }

    fn blue_vertical_ramp() -> RgbImage {
        ImageBuffer::from_fn(W, H, |_, y| Rgb([20, 20, (y * 255 / (H - 1)) as u8]))
    }

    fn gray(img_fn: impl Fn(u32, u32) -> u8) -> RgbImage {
        ImageBuffer::from_fn(W, H, |x, y| {
            let v = img_fn(x, y);
            Rgb([v, v, v])
        })
    }

    fn frames_from(images: &[RgbImage]) -> Vec<Frame> {
        images
            .iter()
            .enumerate()
            .map(|(i, img)| Frame::from_rgb(i as u64 * 25, i as f64, img, 90).unwrap())
            .collect()
    }

    fn sim(color: f64, structural: f64) -> FrameSimilarity {
        FrameSimilarity { color, structural }
    }

    #[test]
    fn test_identical_frames_are_fully_similar() {
        let img = red_horizontal_ramp();
        let s = frame_similarity(&img, &img);
        assert!((s.color - 1.0).abs() < 1e-9);
        assert!((s.structural - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_disjoint_colors_and_orthogonal_structure() {
        let s = frame_similarity(&red_horizontal_ramp(), &blue_vertical_ramp());
        assert!(s.color < 0.65, "color={}", s.color);
        assert!(s.structural < 0.5, "structural={}", s.structural);
    }

    #[test]
    fn test_same_histogram_different_layout_is_angle_change() {
        let left_right = gray(|x, _| if x < W / 2 { 16 } else { 240 });
        let top_bottom = gray(|_, y| if y < H / 2 { 16 } else { 240 });
        let s = frame_similarity(&left_right, &top_bottom);
        assert!(s.color > 0.8, "color={}", s.color);
        assert!(s.structural < 0.3, "structural={}", s.structural);

        let mut weak = 0;
        assert_eq!(
            classify_transition(s, &mut weak),
            Transition::Boundary(BoundaryReason::StructuralChange)
        );
    }

    #[test]
    fn test_brightness_shift_is_lighting_change() {
        let dark = gray(|x, _| (x * 120 / (W - 1)) as u8);
        let bright = gray(|x, _| 135 + (x * 120 / (W - 1)) as u8);
        let s = frame_similarity(&dark, &bright);
        assert!(s.color < 0.5, "color={}", s.color);
        assert!(s.structural > 0.7, "structural={}", s.structural);

        let mut weak = 2;
        assert_eq!(classify_transition(s, &mut weak), Transition::LightingChange);
        assert_eq!(weak, 2);
    }

    #[test]
    fn test_flat_frames() {
        let a = GrayImage::from_pixel(16, 16, image::Luma([100]));
        let b = GrayImage::from_pixel(16, 16, image::Luma([104]));
        let c = GrayImage::from_pixel(16, 16, image::Luma([200]));
        assert_eq!(structural_similarity(&a, &b), 1.0);
        assert_eq!(structural_similarity(&a, &c), 0.0);
    }

    #[test]
    fn test_weak_changes_force_gradual_boundary() {
        let sims = vec![
            sim(0.7, 0.9),
            sim(0.7, 0.9),
            sim(0.7, 0.9), // 第三次弱变化 -> 切分
            sim(0.7, 0.9),
            sim(0.95, 0.9), // 重置
            sim(0.7, 0.9),
            sim(0.7, 0.9),
        ];
        assert_eq!(boundaries_from_similarities(&sims), vec![0, 3]);
    }

    #[test]
    fn test_rule_order() {
        let mut weak = 0;
        assert_eq!(
            classify_transition(sim(0.4, 0.2), &mut weak),
            Transition::Boundary(BoundaryReason::ColorAndStructure)
        );
        assert_eq!(
            classify_transition(sim(0.9, 0.1), &mut weak),
            Transition::Boundary(BoundaryReason::StructuralChange)
        );
        assert_eq!(classify_transition(sim(0.3, 0.9), &mut weak), Transition::LightingChange);
        assert_eq!(classify_transition(sim(0.9, 0.9), &mut weak), Transition::Continuous);
    }

    #[test]
    fn test_boundaries_always_well_formed() {
        // 简单 LCG 生成伪随机信号
        let mut seed: u64 = 0x5eed;
        let mut next = || {
            seed = seed.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
            (seed >> 33) as f64 / (1u64 << 31) as f64
        };

        for len in 0..60 {
            let sims: Vec<FrameSimilarity> = (0..len).map(|_| sim(next() * 2.0 - 1.0, next())).collect();
            let boundaries = boundaries_from_similarities(&sims);
            assert_eq!(boundaries[0], 0);
            assert!(boundaries.len() <= len + 1);
            assert!(boundaries.windows(2).all(|w| w[0] < w[1]));
            assert!(boundaries.iter().all(|&b| b <= len));
        }
    }

    #[test]
    fn test_near_identical_frames_form_one_scene() {
        let images: Vec<RgbImage> = (0..10)
            .map(|i| {
                ImageBuffer::from_fn(W, H, move |x, y| {
                    // 只有角落的小块随帧变化
                    if x < 4 && y < 4 {
                        Rgb([(i * 20) as u8, 60, 60])
                    } else {
                        Rgb([(x * 3) as u8, (y * 5) as u8, 120])
                    }
                })
            })
            .collect();
        let frames = frames_from(&images);

        let boundaries = SceneSegmenter::new().detect_boundaries(&frames);
        assert_eq!(boundaries, vec![0]);

        let scenes = group_frames_by_scene(frames, &boundaries);
        assert_eq!(scenes.len(), 1);
        assert_eq!(scenes[0].frames.len(), 10);
        assert_eq!(scenes[0].start_time, 0.0);
        assert_eq!(scenes[0].end_time, 9.0);
    }

    #[test]
    fn test_hard_cut_at_frame_five() {
        let mut images = vec![red_horizontal_ramp(); 5];
        images.extend(vec![blue_vertical_ramp(); 5]);
        let frames = frames_from(&images);

        let boundaries = SceneSegmenter::new().detect_boundaries(&frames);
        assert_eq!(boundaries, vec![0, 5]);

        let scenes = group_frames_by_scene(frames, &boundaries);
        assert_eq!(scenes.len(), 2);
        assert_eq!((scenes[0].id, scenes[0].start_time, scenes[0].end_time), (1, 0.0, 4.0));
        assert_eq!((scenes[1].id, scenes[1].start_time, scenes[1].end_time), (2, 5.0, 9.0));
    }

    #[test]
    fn test_grouping_is_lossless() {
        let img = red_horizontal_ramp();
        let frames = frames_from(&vec![img; 12]);
        let original: Vec<(u64, f64)> = frames.iter().map(|f| (f.index, f.timestamp)).collect();

        // 未排序、重复、越界的边界也能处理
        let scenes = group_frames_by_scene(frames, &[7, 3, 3, 40, 10]);
        assert_eq!(scenes.iter().map(|s| s.id).collect::<Vec<_>>(), vec![1, 2, 3, 4]);

        let rebuilt: Vec<(u64, f64)> = scenes
            .iter()
            .flat_map(|s| s.frames.iter().map(|f| (f.index, f.timestamp)))
            .collect();
        assert_eq!(rebuilt, original);
    }
}
