pub mod batch_advisor;
pub mod config;
pub mod error;
pub mod frame_sampler;
pub mod handler;
pub mod hw_accel;
pub mod inference;
pub mod models;
pub mod processor;
pub mod scene_classifier;
pub mod scene_segmenter;
pub mod store;
pub mod summary;

pub use batch_advisor::{BatchAdvice, BatchSizeAdvisor};
pub use config::{AnalysisConfig, ConfigLoader, ExtendedConfig};
pub use error::{AnalysisError, AnalysisResult};
pub use frame_sampler::FrameSampler;
pub use inference::{InferenceClient, InferenceRequest, OllamaClient};
pub use models::{AnalysisReport, Frame, Mood, Scene, SceneAnalysisRecord, VideoProbe, VideoRecord};
pub use processor::Orchestrator;
pub use scene_classifier::{ParseOutcome, SceneClassifier};
pub use scene_segmenter::SceneSegmenter;
pub use store::{InMemoryVideoStore, VideoStore};
