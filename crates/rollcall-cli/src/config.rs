use rollcall_core::enrollment::{CaptureConfig, DEFAULT_QUALITY_THRESHOLD};
use rollcall_core::quality::DEFAULT_MIN_FACE_SIZE;
use rollcall_core::recognition::DEFAULT_CONFIDENCE_THRESHOLD;
use rollcall_core::training::ModelPaths;
use std::path::PathBuf;
use std::time::Duration;

/// Runtime configuration, loaded from environment variables.
pub struct Config {
    /// V4L2 device path (default: /dev/video0).
    pub camera_device: String,
    /// Directory holding the SCRFD model and the trained classifier.
    pub model_dir: PathBuf,
    /// Path to the SQLite database file.
    pub db_path: PathBuf,
    /// Minimum quality score for an enrollment sample.
    pub quality_threshold: f32,
    /// Face crops with a smaller side score at most 50.
    pub min_face_size: u32,
    /// Classifier distances at or above this are not matches.
    pub confidence_threshold: f32,
    pub enroll_tick: Duration,
    pub recognize_tick: Duration,
    /// Frames buffered between acquisition and processing.
    pub queue_capacity: usize,
}

impl Config {
    /// Load configuration from `ROLLCALL_*` environment variables with defaults.
    pub fn from_env() -> Self {
        let data_dir = std::env::var("ROLLCALL_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| default_data_dir());

        let model_dir = std::env::var("ROLLCALL_MODEL_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| data_dir.join("models"));

        let db_path = std::env::var("ROLLCALL_DB_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| data_dir.join("rollcall.db"));

        Self {
            camera_device: std::env::var("ROLLCALL_CAMERA_DEVICE")
                .unwrap_or_else(|_| "/dev/video0".to_string()),
            model_dir,
            db_path,
            quality_threshold: env_f32("ROLLCALL_QUALITY_THRESHOLD", DEFAULT_QUALITY_THRESHOLD),
            min_face_size: env_u32("ROLLCALL_MIN_FACE_SIZE", DEFAULT_MIN_FACE_SIZE),
            confidence_threshold: env_f32("ROLLCALL_CONFIDENCE_THRESHOLD", DEFAULT_CONFIDENCE_THRESHOLD),
            enroll_tick: tick_period(env_u64("ROLLCALL_ENROLL_TICK_MS", 30)),
            recognize_tick: tick_period(env_u64("ROLLCALL_RECOGNIZE_TICK_MS", 80)),
            queue_capacity: env_usize("ROLLCALL_QUEUE_CAPACITY", 2).max(1),
        }
    }

    /// Path to the SCRFD detection model.
    pub fn scrfd_model_path(&self) -> PathBuf {
        self.model_dir.join("det_10g.onnx")
    }

    pub fn classifier_paths(&self) -> ModelPaths {
        ModelPaths::in_dir(&self.model_dir)
    }

    pub fn capture_config(&self) -> CaptureConfig {
        CaptureConfig {
            quality_threshold: self.quality_threshold,
            min_face_size: self.min_face_size,
        }
    }
}

fn default_data_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("rollcall")
}

/// Session tick period; a zero interval is not allowed.
fn tick_period(ms: u64) -> Duration {
    Duration::from_millis(ms.max(1))
}

fn env_f32(key: &str, default: f32) -> f32 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_u32(key: &str, default: u32) -> u32 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_usize(key: &str, default: usize) -> usize {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
