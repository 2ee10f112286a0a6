use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;
use video_analyze::config::{ConfigLoader, ConfigOverrides, ExtendedConfig};
use video_analyze::handler::{self, AppState};
use video_analyze::store::{save_report, InMemoryVideoStore};
use video_analyze::Orchestrator;

/// 视频场景分析工具 - 切分场景、用视觉模型分析情绪与高光片段
#[derive(Parser, Debug)]
#[command(name = "video-analyze")]
#[command(about = "视频场景分析：采样帧、切分场景、调用视觉模型生成分析报告", long_about = None)]
struct Args {
    /// 配置文件路径（可选，支持 .ini 格式）
    /// 优先级：命令行参数 > 环境变量 > 配置文件 > 默认值
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// CLI 模式：分析本地视频文件并写出报告
    Analyze {
        /// 输入视频文件路径
        #[arg(short, long)]
        input: PathBuf,

        /// 报告输出目录（默认使用配置中的 report_dir）
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// 采样间隔（秒）
        /// 可通过环境变量 VIDEO_ANALYZE_INTERVAL 或配置文件设置
        #[arg(long)]
        interval: Option<f64>,

        /// 硬件加速模式（auto, software, cuda, vaapi, videotoolbox, qsv, d3d11va, dxva2）
        #[arg(long)]
        hw_accel: Option<String>,

        /// 最小批大小
        #[arg(long)]
        min_batch: Option<usize>,

        /// 最大批大小
        #[arg(long)]
        max_batch: Option<usize>,

        /// 视觉模型名称
        #[arg(long)]
        model: Option<String>,

        /// Ollama 服务地址
        #[arg(long)]
        ollama_url: Option<String>,
    },
    /// 在指定时间点截帧并保存为 JPEG
    Snapshot {
        /// 输入视频文件路径
        #[arg(short, long)]
        input: PathBuf,

        /// 时间点（秒），逗号分隔，例如 1.5,3,10
        #[arg(long, value_delimiter = ',', required = true)]
        at: Vec<f64>,

        /// 输出目录
        #[arg(short, long, default_value = "./snapshots")]
        output: PathBuf,
    },
    /// Web 服务模式：登记视频并在后台分析
    Serve {
        /// 监听地址
        #[arg(short, long)]
        bind: Option<String>,

        /// 报告输出目录
        #[arg(long)]
        report_dir: Option<PathBuf>,
    },
    /// 生成默认配置文件
    InitConfig {
        /// 配置文件路径
        #[arg(default_value = "video-analyze.ini")]
        path: PathBuf,
    },
}

fn init_tracing(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    match args.command {
        Commands::Analyze {
            input,
            output,
            interval,
            hw_accel,
            min_batch,
            max_batch,
            model,
            ollama_url,
        } => {
            let overrides = ConfigOverrides {
                interval,
                hw_accel,
                min_batch_size: min_batch,
                max_batch_size: max_batch,
                model,
                base_url: ollama_url,
                report_dir: output,
                ..ConfigOverrides::default()
            };
            let config = ConfigLoader::load(args.config.as_deref(), &overrides).context("加载配置失败")?;
            init_tracing(&config.server.log_level);
            run_analyze(&input, config).await?;
        }
        Commands::Snapshot { input, at, output } => {
            let config = ConfigLoader::load(args.config.as_deref(), &ConfigOverrides::default())
                .context("加载配置失败")?;
            init_tracing(&config.server.log_level);
            run_snapshot(input, at, &output, config).await?;
        }
        Commands::Serve { bind, report_dir } => {
            let overrides = ConfigOverrides {
                bind,
                report_dir,
                ..ConfigOverrides::default()
            };
            let config = ConfigLoader::load(args.config.as_deref(), &overrides).context("加载配置失败")?;
            init_tracing(&config.server.log_level);
            start_web_server(config).await?;
        }
        Commands::InitConfig { path } => {
            ConfigLoader::create_default_config(&path)?;
            println!("已生成配置文件: {}", path.display());
        }
    }

    Ok(())
}

async fn run_analyze(input: &Path, config: ExtendedConfig) -> Result<()> {
    println!(
        "使用配置: interval={:.2}s, batch=[{}, {}], model={}",
        config.analysis.sampling.interval,
        config.analysis.batching.min_batch_size,
        config.analysis.batching.max_batch_size,
        config.analysis.inference.model
    );

    let orchestrator = Orchestrator::with_ollama(config.analysis)?;
    let video_id = uuid::Uuid::new_v4().to_string();
    let report = orchestrator
        .analyze(&video_id, input, |p: u8| tracing::info!("📈 [进度] {}%", p))
        .await
        .context("分析视频失败")?;

    let path = save_report(&config.server.report_dir, &report).context("保存报告失败")?;
    println!(
        "完成: {} 个场景，主要情绪 {}，报告: {}",
        report.total_scenes,
        report.overall_summary.dominant_mood,
        path.display()
    );
    Ok(())
}

async fn run_snapshot(input: PathBuf, at: Vec<f64>, output: &Path, config: ExtendedConfig) -> Result<()> {
    let sampler = video_analyze::FrameSampler::new(config.analysis.sampling);
    let frames = tokio::task::spawn_blocking(move || sampler.extract_at_timestamps(&input, &at))
        .await
        .context("截帧任务失败")?
        .context("截帧失败")?;

    std::fs::create_dir_all(output).context("创建输出目录失败")?;
    for frame in &frames {
        let path = output.join(format!("frame_{:09.3}.jpg", frame.timestamp));
        std::fs::write(&path, &frame.jpeg)
            .with_context(|| format!("写入截图失败: {}", path.display()))?;
        println!("{:.3}s -> {}", frame.timestamp, path.display());
    }
    Ok(())
}

async fn start_web_server(config: ExtendedConfig) -> Result<()> {
    use tower_http::cors::CorsLayer;
    use tower_http::trace::TraceLayer;

    let bind = config.server.bind.clone();
    let state = AppState {
        store: Arc::new(InMemoryVideoStore::new()),
        orchestrator: Arc::new(Orchestrator::with_ollama(config.analysis)?),
        report_dir: config.server.report_dir,
    };

    let app = handler::router(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    let listener = tokio::net::TcpListener::bind(&bind)
        .await
        .context(format!("绑定地址失败: {}", bind))?;

    tracing::info!("Web 服务器启动在: http://{}", bind);
    tracing::info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    tracing::info!("可用端点:");
    tracing::info!("  • 健康检查: GET  http://{}/health", bind);
    tracing::info!("  • 登记视频: POST http://{}/videos", bind);
    tracing::info!("  • 视频列表: GET  http://{}/videos", bind);
    tracing::info!("  • 视频详情: GET  http://{}/videos/:id", bind);
    tracing::info!("  • 开始分析: POST http://{}/analyze/:id", bind);
    tracing::info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    axum::serve(listener, app)
        .await
        .context("启动服务器失败")?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_snapshot_of_missing_input_fails_without_output() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("snapshots");

        let result = run_snapshot(
            dir.path().join("missing.mp4"),
            vec![1.0, 2.5],
            &output,
            ExtendedConfig::default(),
        )
        .await;

        assert!(result.is_err());
        assert!(!output.exists());
    }
}
