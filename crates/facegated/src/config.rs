use std::path::PathBuf;
use std::time::Duration;

use facegate_core::{DecisionPolicy, ExtractorConfig, LivenessConfig};

use crate::orchestrator::PipelineConfig;

/// Daemon configuration, loaded from environment variables.
pub struct Config {
    /// V4L2 device path (default: /dev/video0).
    pub camera_device: String,
    /// Use the deterministic synthetic source instead of a camera.
    pub synthetic_source: bool,
    /// Path to the SQLite database file.
    pub db_path: PathBuf,
    /// Capture thread sampling interval.
    pub capture_interval_ms: u64,
    /// Wall-clock budget per pipeline run.
    pub pipeline_timeout_secs: u64,
    /// Frames required before the temporal checks run.
    pub min_liveness_frames: usize,
    /// Combined liveness score threshold.
    pub liveness_threshold: f32,
    /// Minimum detection quality to proceed.
    pub min_quality: f32,
    /// Samples attempted per enrollment run.
    pub required_samples: usize,
    /// Accepted samples an enrollment template needs.
    pub min_samples: usize,
    /// Embedding variant: "standard" (256-dim) or "basic" (32-dim).
    pub extractor_variant: ExtractorConfig,
    /// Accept policy: "basic" or "enhanced".
    pub policy: DecisionPolicy,
    /// Warmup frames discarded at camera start (AGC/AE stabilization).
    pub warmup_frames: usize,
    /// Connect to the session bus instead of the system bus (development).
    pub session_bus: bool,
}

impl Config {
    /// Load configuration from `FACEGATE_*` environment variables with defaults.
    pub fn from_env() -> Self {
        let data_dir = std::env::var("XDG_DATA_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
                PathBuf::from(home).join(".local/share")
            })
            .join("facegate");

        let db_path = std::env::var("FACEGATE_DB_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| data_dir.join("templates.db"));

        Self {
            camera_device: std::env::var("FACEGATE_CAMERA_DEVICE")
                .unwrap_or_else(|_| "/dev/video0".to_string()),
            synthetic_source: env_flag("FACEGATE_SYNTHETIC_SOURCE", false),
            db_path,
            capture_interval_ms: env_u64("FACEGATE_CAPTURE_INTERVAL_MS", 100),
            pipeline_timeout_secs: env_u64("FACEGATE_PIPELINE_TIMEOUT_SECS", 30),
            min_liveness_frames: env_usize("FACEGATE_MIN_LIVENESS_FRAMES", 5),
            liveness_threshold: env_f32("FACEGATE_LIVENESS_THRESHOLD", 0.6),
            min_quality: env_f32("FACEGATE_MIN_QUALITY", 0.3),
            required_samples: env_usize("FACEGATE_REQUIRED_SAMPLES", 5),
            min_samples: env_usize("FACEGATE_MIN_SAMPLES", 3),
            extractor_variant: match std::env::var("FACEGATE_EXTRACTOR_VARIANT").as_deref() {
                Ok("basic") => ExtractorConfig::Basic,
                _ => ExtractorConfig::Standard,
            },
            policy: match std::env::var("FACEGATE_POLICY").as_deref() {
                Ok("basic") => DecisionPolicy::Basic,
                _ => DecisionPolicy::Enhanced,
            },
            warmup_frames: env_usize("FACEGATE_WARMUP_FRAMES", 4),
            session_bus: env_flag("FACEGATE_SESSION_BUS", false),
        }
    }

    /// Derive the pipeline configuration for `spawn_pipeline`.
    pub fn pipeline_config(&self) -> PipelineConfig {
        PipelineConfig {
            capture_interval: Duration::from_millis(self.capture_interval_ms),
            timeout: Duration::from_secs(self.pipeline_timeout_secs),
            min_quality: self.min_quality,
            required_samples: self.required_samples,
            min_samples: self.min_samples,
            liveness: LivenessConfig {
                min_frames: self.min_liveness_frames,
                threshold: self.liveness_threshold,
            },
            extractor: self.extractor_variant,
            policy: self.policy,
            ..PipelineConfig::default()
        }
    }
}

fn env_f32(key: &str, default: f32) -> f32 {
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

fn env_flag(key: &str, default: bool) -> bool {
    std::env::var(key).map(|v| v != "0").unwrap_or(default)
}
