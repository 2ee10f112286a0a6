use ffmpeg_next as ffmpeg;
use image::RgbImage;
use std::io::{self, Read};
use std::path::Path;
use std::process::{Command, Stdio};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{mpsc, Once};
use std::thread;
use std::time::Instant;
use tracing::{debug, info, warn};

use crate::config::SamplingConfig;
use crate::error::{AnalysisError, AnalysisResult};
use crate::hw_accel::{self, DecodeBackend, HwBackend};
use crate::models::{Frame, VideoProbe};

/// 单次 seek 后最多读取的数据包数量
const MAX_PACKETS_PER_SEEK: usize = 600;

static FFMPEG_INIT: Once = Once::new();

fn init_ffmpeg() -> AnalysisResult<()> {
    ffmpeg::init()?;
    // 只显示错误，抑制解码警告
    FFMPEG_INIT.call_once(|| ffmpeg::util::log::set_level(ffmpeg::util::log::Level::Error));
    Ok(())
}

/// 帧采样器：按固定间隔提取缩放、压缩后的帧
#[derive(Debug, Clone)]
pub struct FrameSampler {
    config: SamplingConfig,
}

impl FrameSampler {
    pub fn new(config: SamplingConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &SamplingConfig {
        &self.config
    }

    /// 获取视频信息（帧率、帧数、时长、分辨率）
    pub fn probe(&self, path: &Path) -> AnalysisResult<VideoProbe> {
        init_ffmpeg()?;

        let ictx = ffmpeg::format::input(path).map_err(|e| {
            AnalysisError::FrameExtractionFailed(format!("无法打开视频文件 {}: {}", path.display(), e))
        })?;
        let stream = ictx
            .streams()
            .best(ffmpeg::media::Type::Video)
            .ok_or_else(|| AnalysisError::FrameExtractionFailed("未找到视频流".to_string()))?;

        let rate = stream.avg_frame_rate();
        let fps = if rate.numerator() > 0 && rate.denominator() > 0 {
            rate.numerator() as f64 / rate.denominator() as f64
        } else {
            30.0 // 默认值
        };

        let duration = if ictx.duration() > 0 {
            ictx.duration() as f64 / ffmpeg::ffi::AV_TIME_BASE as f64
        } else if stream.duration() > 0 {
            stream.duration() as f64 * f64::from(stream.time_base())
        } else {
            0.0
        };

        let frame_count = if stream.frames() > 0 {
            stream.frames() as u64
        } else {
            (duration * fps).round() as u64
        };

        let decoder = ffmpeg::codec::context::Context::from_parameters(stream.parameters())?
            .decoder()
            .video()?;

        Ok(VideoProbe {
            path: path.to_path_buf(),
            fps,
            frame_count,
            duration,
            width: decoder.width(),
            height: decoder.height(),
        })
    }

    /// 按采样间隔提取全部帧
    ///
    /// 优先走硬件解码管道；管道任何失败（非零退出、读不满、解码错误）都会退回
    /// 基于 seek 的逐点提取。两条路径都拿不到帧时返回 `FrameExtractionFailed`。
    pub fn sample(&self, path: &Path) -> AnalysisResult<(VideoProbe, Vec<Frame>)> {
        let probe = self.probe(path)?;
        info!(
            "📊 [帧采样] {}x{}, {:.2} fps, {} 帧, 时长 {:.2}秒, 采样间隔 {:.2}秒",
            probe.width, probe.height, probe.fps, probe.frame_count, probe.duration, self.config.interval
        );

        let available = match self.config.hw_accel {
            hw_accel::HwAccelMode::Software => Vec::new(),
            _ => hw_accel::probe_hwaccels(&self.config.ffmpeg_bin),
        };
        let backend = hw_accel::negotiate(self.config.hw_accel, &available);

        let start = Instant::now();
        let frames = match backend {
            DecodeBackend::Hardware(hw) => match self.sample_via_pipe(&probe, hw) {
                Ok(frames) if !frames.is_empty() => {
                    info!("✅ [帧采样] 硬件解码({})提取 {} 帧", hw.ffmpeg_name(), frames.len());
                    frames
                }
                Ok(_) => {
                    warn!("⚠️  [帧采样] 硬件解码({})未输出任何帧，改用 seek 提取", hw.ffmpeg_name());
                    self.sample_via_seek(&probe)?
                }
                Err(e) => {
                    warn!("⚠️  [帧采样] 硬件解码({})失败: {}，改用 seek 提取", hw.ffmpeg_name(), e);
                    self.sample_via_seek(&probe)?
                }
            },
            DecodeBackend::Software => self.sample_via_seek(&probe)?,
        };

        if frames.is_empty() {
            return Err(AnalysisError::FrameExtractionFailed(format!(
                "没有从 {} 提取到任何帧",
                path.display()
            )));
        }

        info!(
            "✅ [帧采样] 完成: {} 帧，耗时 {:.2}秒",
            frames.len(),
            start.elapsed().as_secs_f64()
        );
        Ok((probe, frames))
    }

    /// ffmpeg 子进程解码，读取固定大小的 RGB24 原始帧流
    fn sample_via_pipe(&self, probe: &VideoProbe, backend: HwBackend) -> AnalysisResult<Vec<Frame>> {
        let (width, height) = (self.config.width, self.config.height);
        let filter = format!("fps={:.6},scale={}:{}", 1.0 / self.config.interval, width, height);

        let mut child = Command::new(&self.config.ffmpeg_bin)
            .args(["-hide_banner", "-loglevel", "error", "-nostdin", "-hwaccel", backend.ffmpeg_name(), "-i"])
            .arg(&probe.path)
            .args(["-vf", filter.as_str(), "-f", "rawvideo", "-pix_fmt", "rgb24", "pipe:1"])
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;

        let mut stdout = child
            .stdout
            .take()
            .ok_or_else(|| AnalysisError::FrameExtractionFailed("无法获取 ffmpeg 输出".to_string()))?;
        let stderr_handle = child.stderr.take().map(|mut stderr| {
            thread::spawn(move || {
                let mut message = String::new();
                let _ = stderr.read_to_string(&mut message);
                message
            })
        });

        let mut frames = Vec::new();
        let read_result = self.read_raw_frames(&mut stdout, probe, &mut frames);

        if read_result.is_err() {
            let _ = child.kill();
        }
        let status = child.wait()?;
        let stderr = stderr_handle
            .and_then(|h| h.join().ok())
            .unwrap_or_default();
        read_result?;

        if !status.success() {
            return Err(AnalysisError::FrameExtractionFailed(format!(
                "ffmpeg 退出码 {:?}: {}",
                status.code(),
                stderr.trim()
            )));
        }

        Ok(frames)
    }

    /// 从管道读取原始帧直到 EOF，读不满一帧视为失败
    fn read_raw_frames(
        &self,
        stdout: &mut impl Read,
        probe: &VideoProbe,
        frames: &mut Vec<Frame>,
    ) -> AnalysisResult<()> {
        let (width, height) = (self.config.width, self.config.height);
        let frame_bytes = raw_frame_len(width, height);

        loop {
            let mut buf = vec![0u8; frame_bytes];
            let n = read_full(stdout, &mut buf)?;
            if n == 0 {
                return Ok(());
            }
            if n < frame_bytes {
                return Err(AnalysisError::FrameExtractionFailed(format!(
                    "第 {} 帧数据不完整: {}/{} 字节",
                    frames.len(),
                    n,
                    frame_bytes
                )));
            }

            let timestamp = frames.len() as f64 * self.config.interval;
            if probe.duration > 0.0 && timestamp >= probe.duration {
                continue;
            }
            let image = RgbImage::from_raw(width, height, buf)
                .ok_or_else(|| AnalysisError::FrameExtractionFailed("原始帧尺寸不匹配".to_string()))?;
            let index = (timestamp * probe.fps).round() as u64;
            frames.push(Frame::from_rgb(index, timestamp, &image, self.config.jpeg_quality)?);
        }
    }

    /// 软件解码：直接 seek 到每个需要的帧，代价与采样帧数成正比
    fn sample_via_seek(&self, probe: &VideoProbe) -> AnalysisResult<Vec<Frame>> {
        let plan = sample_plan(probe.duration, probe.fps, probe.frame_count, self.config.interval);
        let mut decoder = SeekDecoder::open(&probe.path, self.config.width, self.config.height).map_err(|e| {
            AnalysisError::FrameExtractionFailed(format!("无法打开解码器 {}: {}", probe.path.display(), e))
        })?;
        let tolerance = 0.5 / probe.fps.max(1.0);

        let start = Instant::now();
        let log_interval = (plan.len() / 10).max(1);
        let mut frames = Vec::with_capacity(plan.len());

        for (i, &(index, timestamp)) in plan.iter().enumerate() {
            match decoder.frame_at(timestamp, tolerance) {
                Ok(Some(image)) => {
                    frames.push(Frame::from_rgb(index, timestamp, &image, self.config.jpeg_quality)?);
                }
                Ok(None) => debug!("[帧采样] {:.2}s 没有解码到帧，跳过", timestamp),
                Err(e) => debug!("[帧采样] {:.2}s 解码失败: {}", timestamp, e),
            }

            if (i + 1) % log_interval == 0 {
                debug!(
                    "📈 [帧采样] 进度 {}% ({}/{}) | 已用 {:.1}s",
                    (i + 1) * 100 / plan.len(),
                    i + 1,
                    plan.len(),
                    start.elapsed().as_secs_f64()
                );
            }
        }

        Ok(frames)
    }

    /// 在任意时间点并行提取帧
    ///
    /// 工作线程数约等于 CPU 核数，每个线程持有独立的解码器。完成顺序不确定，
    /// 返回前按时间戳重新排序。
    pub fn extract_at_timestamps(&self, path: &Path, timestamps: &[f64]) -> AnalysisResult<Vec<Frame>> {
        let probe = self.probe(path)?;
        let targets: Vec<f64> = timestamps
            .iter()
            .copied()
            .filter(|t| t.is_finite() && *t >= 0.0 && (probe.duration <= 0.0 || *t < probe.duration))
            .collect();
        if targets.is_empty() {
            return Err(AnalysisError::FrameExtractionFailed("没有有效的时间点".to_string()));
        }

        let workers = thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(4)
            .min(targets.len());
        let tolerance = 0.5 / probe.fps.max(1.0);
        let next = AtomicUsize::new(0);
        let (tx, rx) = mpsc::channel();

        info!("⏳ [帧采样] 并行提取 {} 个时间点，{} 个工作线程", targets.len(), workers);

        thread::scope(|scope| {
            for worker in 0..workers {
                let tx = tx.clone();
                let (next, targets, probe) = (&next, &targets, &probe);
                scope.spawn(move || {
                    let mut decoder = match SeekDecoder::open(&probe.path, self.config.width, self.config.height) {
                        Ok(decoder) => decoder,
                        Err(e) => {
                            warn!("⚠️  [帧采样] 工作线程 {} 打开解码器失败: {}", worker, e);
                            return;
                        }
                    };
                    loop {
                        let i = next.fetch_add(1, Ordering::Relaxed);
                        let Some(&timestamp) = targets.get(i) else { break };
                        let index = (timestamp * probe.fps).round() as u64;
                        let frame = decoder
                            .frame_at(timestamp, tolerance)
                            .and_then(|image| {
                                image
                                    .map(|img| Frame::from_rgb(index, timestamp, &img, self.config.jpeg_quality))
                                    .transpose()
                            });
                        match frame {
                            Ok(Some(frame)) => {
                                let _ = tx.send(frame);
                            }
                            Ok(None) => warn!("⚠️  [帧采样] {:.2}s 没有解码到帧", timestamp),
                            Err(e) => warn!("⚠️  [帧采样] {:.2}s 提取失败: {}", timestamp, e),
                        }
                    }
                });
            }
        });
        drop(tx);

        let frames = order_frames(rx.into_iter().collect());
        if frames.is_empty() {
            return Err(AnalysisError::FrameExtractionFailed(format!(
                "没有从 {} 提取到任何帧",
                path.display()
            )));
        }
        Ok(frames)
    }
}

/// 计算采样计划：(帧序号, 时间戳)
pub fn sample_plan(duration: f64, fps: f64, frame_count: u64, interval: f64) -> Vec<(u64, f64)> {
    let duration = if duration > 0.0 {
        duration
    } else if fps > 0.0 {
        frame_count as f64 / fps
    } else {
        0.0
    };
    let count = (duration / interval).ceil() as usize;

    (0..count)
        .map(|i| i as f64 * interval)
        .filter(|t| *t < duration)
        .map(|t| ((t * fps).round() as u64, t))
        .collect()
}

/// 按时间戳排序并去掉重复时间点
pub fn order_frames(mut frames: Vec<Frame>) -> Vec<Frame> {
    frames.sort_by(|a, b| a.timestamp.total_cmp(&b.timestamp));
    frames.dedup_by(|a, b| a.timestamp == b.timestamp);
    frames
}

/// 一帧 RGB24 原始数据的字节数
fn raw_frame_len(width: u32, height: u32) -> usize {
    width as usize * height as usize * 3
}

/// 读满缓冲区或读到 EOF，返回实际读取的字节数
fn read_full(reader: &mut impl Read, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

/// 基于 seek 的单点解码器
struct SeekDecoder {
    ictx: ffmpeg::format::context::Input,
    stream_index: usize,
    time_base: f64,
    decoder: ffmpeg::decoder::Video,
    scaler: ffmpeg::software::scaling::Context,
}

impl SeekDecoder {
    fn open(path: &Path, width: u32, height: u32) -> AnalysisResult<Self> {
        init_ffmpeg()?;

        let ictx = ffmpeg::format::input(path)?;
        let stream = ictx
            .streams()
            .best(ffmpeg::media::Type::Video)
            .ok_or_else(|| AnalysisError::FrameExtractionFailed("未找到视频流".to_string()))?;
        let stream_index = stream.index();
        let time_base = f64::from(stream.time_base());

        let decoder = ffmpeg::codec::context::Context::from_parameters(stream.parameters())?
            .decoder()
            .video()?;

        let scaler = ffmpeg::software::scaling::Context::get(
            decoder.format(),
            decoder.width(),
            decoder.height(),
            ffmpeg::format::Pixel::RGB24,
            width,
            height,
            ffmpeg::software::scaling::Flags::BILINEAR,
        )?;

        Ok(Self {
            ictx,
            stream_index,
            time_base,
            decoder,
            scaler,
        })
    }

    /// 解码目标时间点（含容差）之后的第一帧
    fn frame_at(&mut self, target: f64, tolerance: f64) -> AnalysisResult<Option<RgbImage>> {
        let timestamp = (target * ffmpeg::ffi::AV_TIME_BASE as f64) as i64;
        self.ictx.seek(timestamp, ..timestamp)?;
        self.decoder.flush();

        let mut packets_read = 0;
        for (stream, packet) in self.ictx.packets() {
            if stream.index() != self.stream_index {
                continue;
            }
            packets_read += 1;
            if packets_read > MAX_PACKETS_PER_SEEK {
                break;
            }
            if self.decoder.send_packet(&packet).is_err() {
                continue;
            }

            let mut decoded = ffmpeg::frame::Video::empty();
            while self.decoder.receive_frame(&mut decoded).is_ok() {
                let frame_time = decoded
                    .timestamp()
                    .map(|ts| ts as f64 * self.time_base)
                    .unwrap_or(target);
                if frame_time + tolerance < target {
                    continue;
                }

                let mut rgb = ffmpeg::frame::Video::empty();
                self.scaler.run(&decoded, &mut rgb)?;
                return frame_to_image(&rgb).map(Some);
            }
        }

        Ok(None)
    }
}

/// 将 RGB24 的 FFmpeg 帧转换为图像（按行处理 stride）
fn frame_to_image(frame: &ffmpeg::frame::Video) -> AnalysisResult<RgbImage> {
    let (width, height) = (frame.width(), frame.height());
    let stride = frame.stride(0);
    let data = frame.data(0);
    let row = width as usize * 3;

    let mut buf = Vec::with_capacity(row * height as usize);
    for y in 0..height as usize {
        let offset = y * stride;
        let line = data
            .get(offset..offset + row)
            .ok_or_else(|| AnalysisError::FrameExtractionFailed("帧数据越界".to_string()))?;
        buf.extend_from_slice(line);
    }

    RgbImage::from_raw(width, height, buf)
        .ok_or_else(|| AnalysisError::FrameExtractionFailed("帧尺寸不匹配".to_string()))
}
