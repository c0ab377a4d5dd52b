//! Temporal liveness detection.
//!
//! A live subject is never perfectly still in front of the sensor: frame
//! pairs differ (motion), the amount of difference itself fluctuates
//! (micro-movement), and overall brightness drifts as the subject breathes
//! and sways (depth cue). A flat reproduction held in front of the camera
//! produces none of these.

use facegate_capture::Frame;
use tracing::debug;

use crate::types::LivenessResult;

#[derive(Debug, Clone)]
pub struct LivenessConfig {
    /// Frames required before a verdict is attempted.
    pub min_frames: usize,
    /// Combined score at or above this is live.
    pub threshold: f32,
}

impl Default for LivenessConfig {
    fn default() -> Self {
        Self {
            min_frames: 5,
            threshold: 0.6,
        }
    }
}

/// Mean per-pixel delta that counts as full motion.
const MOTION_NORMALIZER: f32 = 8.0;
/// Stddev of per-pair motion that counts as full micro-movement.
const MICRO_NORMALIZER: f32 = 2.0;
/// Variance of frame brightness that counts as full depth variation.
const DEPTH_NORMALIZER: f32 = 6.0;

const MOTION_WEIGHT: f32 = 0.4;
const MICRO_WEIGHT: f32 = 0.3;
const DEPTH_WEIGHT: f32 = 0.3;

pub struct LivenessDetector {
    config: LivenessConfig,
}

impl Default for LivenessDetector {
    fn default() -> Self {
        Self::new(LivenessConfig::default())
    }
}

impl LivenessDetector {
    pub fn new(config: LivenessConfig) -> Self {
        Self { config }
    }

    pub fn min_frames(&self) -> usize {
        self.config.min_frames
    }

    /// Analyze a chronologically ordered frame history.
    ///
    /// With fewer than `min_frames` frames the result is a non-live verdict
    /// with zero confidence, never an error: the caller retries as more
    /// frames arrive.
    pub fn analyze(&self, frames: &[&Frame]) -> LivenessResult {
        if frames.len() < self.config.min_frames {
            return LivenessResult {
                is_live: false,
                confidence: 0.0,
                reason: format!(
                    "need {} frames, have {}",
                    self.config.min_frames,
                    frames.len()
                ),
            };
        }

        let pair_motion: Vec<f32> = frames
            .windows(2)
            .map(|w| mean_abs_delta(w[0], w[1]))
            .collect();

        let motion = mean(&pair_motion);
        let micro = stddev(&pair_motion);
        let brightness: Vec<f32> = frames.iter().map(|f| f.mean_luma()).collect();
        let depth = variance(&brightness);

        let motion_norm = (motion / MOTION_NORMALIZER).min(1.0);
        let micro_norm = (micro / MICRO_NORMALIZER).min(1.0);
        let depth_norm = (depth / DEPTH_NORMALIZER).min(1.0);

        let score =
            MOTION_WEIGHT * motion_norm + MICRO_WEIGHT * micro_norm + DEPTH_WEIGHT * depth_norm;
        let is_live = score >= self.config.threshold;

        debug!(
            motion = motion_norm,
            micro = micro_norm,
            depth = depth_norm,
            score,
            is_live,
            "liveness cues"
        );

        let reason = if is_live {
            String::new()
        } else if motion_norm < micro_norm && motion_norm < depth_norm {
            "insufficient motion between frames".to_string()
        } else if depth_norm <= micro_norm {
            "no depth variation detected".to_string()
        } else {
            "no micro-movement detected".to_string()
        };

        LivenessResult {
            is_live,
            confidence: score.min(1.0),
            reason,
        }
    }
}

/// Mean absolute luminance delta between two equally sized frames.
fn mean_abs_delta(a: &Frame, b: &Frame) -> f32 {
    let pa = a.luma_plane();
    let pb = b.luma_plane();
    if pa.is_empty() || pa.len() != pb.len() {
        return 0.0;
    }
    let sum: u64 = pa
        .iter()
        .zip(pb.iter())
        .map(|(&x, &y)| (x as i64 - y as i64).unsigned_abs())
        .sum();
    sum as f32 / pa.len() as f32
}

fn mean(values: &[f32]) -> f32 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f32>() / values.len() as f32
}

fn variance(values: &[f32]) -> f32 {
    if values.is_empty() {
        return 0.0;
    }
    let m = mean(values);
    values.iter().map(|v| (v - m) * (v - m)).sum::<f32>() / values.len() as f32
}

fn stddev(values: &[f32]) -> f32 {
    variance(values).sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;
    use facegate_capture::{SyntheticScene, SyntheticSource};

    fn refs(frames: &[facegate_capture::Frame]) -> Vec<&facegate_capture::Frame> {
        frames.iter().collect()
    }

    #[test]
    fn test_too_few_frames_not_live() {
        let frames = SyntheticSource::render_sequence(SyntheticScene::LiveFace, 3);
        let detector = LivenessDetector::default();
        let result = detector.analyze(&refs(&frames));
        assert!(!result.is_live);
        assert_eq!(result.confidence, 0.0);
        assert!(result.reason.contains("need 5 frames"));
    }

    #[test]
    fn test_live_sequence_passes() {
        let frames = SyntheticSource::render_sequence(SyntheticScene::LiveFace, 10);
        let detector = LivenessDetector::default();
        let result = detector.analyze(&refs(&frames));
        assert!(result.is_live, "score = {}", result.confidence);
        assert!(result.confidence >= 0.6);
    }

    #[test]
    fn test_static_photo_fails() {
        let frames = SyntheticSource::render_sequence(SyntheticScene::StaticPhoto, 10);
        let detector = LivenessDetector::default();
        let result = detector.analyze(&refs(&frames));
        assert!(!result.is_live);
        assert!(result.confidence < 0.1);
        assert!(!result.reason.is_empty());
    }

    #[test]
    fn test_custom_min_frames() {
        let frames = SyntheticSource::render_sequence(SyntheticScene::LiveFace, 6);
        let detector = LivenessDetector::new(LivenessConfig {
            min_frames: 7,
            threshold: 0.6,
        });
        assert!(!detector.analyze(&refs(&frames)).is_live);
    }

    #[test]
    fn test_confidence_bounded() {
        let frames = SyntheticSource::render_sequence(SyntheticScene::LiveFace, 10);
        let result = LivenessDetector::default().analyze(&refs(&frames));
        assert!((0.0..=1.0).contains(&result.confidence));
    }
}
