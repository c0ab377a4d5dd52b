//! Presentation-attack analysis.
//!
//! Four independent checks over the recent frame history, each targeting an
//! artifact that flat reproductions exhibit and real faces do not:
//!
//! - texture: prints and screens flatten local contrast
//! - depth: a real face is lit differently from its background
//! - reflection: glossy prints and screens produce saturated glare
//! - frequency: raster output leaves alternating-line energy at Nyquist
//!
//! The overall verdict requires at least three of the four to pass, so a
//! single borderline check cannot flip the outcome either way.

use facegate_capture::Frame;
use tracing::debug;

use crate::types::{AntiSpoofingResult, SpoofChecks};

#[derive(Debug, Clone)]
pub struct AntiSpoofingConfig {
    /// Minimum mean luma stddev for natural texture.
    pub texture_min_stddev: f32,
    /// Minimum center-vs-border brightness separation.
    pub depth_min_contrast: f32,
    /// Maximum fraction of saturated pixels.
    pub reflection_max_fraction: f32,
    /// Maximum alternating-row energy ratio.
    pub frequency_max_ratio: f32,
    /// Sub-checks that must pass for an overall pass.
    pub required_passes: usize,
}

impl Default for AntiSpoofingConfig {
    fn default() -> Self {
        Self {
            texture_min_stddev: 18.0,
            depth_min_contrast: 6.0,
            reflection_max_fraction: 0.02,
            frequency_max_ratio: 0.05,
            required_passes: 3,
        }
    }
}

/// Luma at or above this counts as saturated.
const SATURATION_FLOOR: u8 = 250;

pub struct AntiSpoofingAnalyzer {
    config: AntiSpoofingConfig,
}

impl Default for AntiSpoofingAnalyzer {
    fn default() -> Self {
        Self::new(AntiSpoofingConfig::default())
    }
}

impl AntiSpoofingAnalyzer {
    pub fn new(config: AntiSpoofingConfig) -> Self {
        Self { config }
    }

    /// Analyze the frame history. An empty history fails every check.
    pub fn analyze(&self, frames: &[&Frame]) -> AntiSpoofingResult {
        if frames.is_empty() {
            return AntiSpoofingResult {
                passed: false,
                score: 0.0,
                checks: SpoofChecks {
                    texture_consistency: false,
                    depth_variation: false,
                    reflection_absence: false,
                    frequency_consistency: false,
                },
            };
        }

        let texture = mean_over(frames, frame_luma_stddev);
        let depth = mean_over(frames, center_border_contrast);
        let reflection = mean_over(frames, saturated_fraction);
        let frequency = mean_over(frames, alternating_row_ratio);

        let checks = SpoofChecks {
            texture_consistency: texture >= self.config.texture_min_stddev,
            depth_variation: depth >= self.config.depth_min_contrast,
            reflection_absence: reflection <= self.config.reflection_max_fraction,
            frequency_consistency: frequency <= self.config.frequency_max_ratio,
        };

        let passed_count = checks.passed_count();
        let passed = passed_count >= self.config.required_passes;

        debug!(
            texture,
            depth, reflection, frequency, passed_count, "anti-spoofing metrics"
        );

        AntiSpoofingResult {
            passed,
            score: passed_count as f32 / 4.0,
            checks,
        }
    }
}

fn mean_over(frames: &[&Frame], metric: fn(&Frame) -> f32) -> f32 {
    frames.iter().map(|f| metric(f)).sum::<f32>() / frames.len() as f32
}

fn frame_luma_stddev(frame: &Frame) -> f32 {
    let plane = frame.luma_plane();
    if plane.is_empty() {
        return 0.0;
    }
    let mean = plane.iter().map(|&p| p as f64).sum::<f64>() / plane.len() as f64;
    let var = plane
        .iter()
        .map(|&p| {
            let d = p as f64 - mean;
            d * d
        })
        .sum::<f64>()
        / plane.len() as f64;
    var.sqrt() as f32
}

/// Brightness separation between the frame's middle third and its outer
/// 10% border ring.
fn center_border_contrast(frame: &Frame) -> f32 {
    let (w, h) = (frame.width, frame.height);
    if w < 10 || h < 10 {
        return 0.0;
    }

    let cx0 = w / 3;
    let cx1 = w * 2 / 3;
    let cy0 = h / 3;
    let cy1 = h * 2 / 3;
    let bx = (w / 10).max(1);
    let by = (h / 10).max(1);

    let mut center_sum = 0u64;
    let mut center_n = 0u64;
    let mut border_sum = 0u64;
    let mut border_n = 0u64;

    for y in 0..h {
        for x in 0..w {
            let luma = frame.luma_at(x, y) as u64;
            if x >= cx0 && x < cx1 && y >= cy0 && y < cy1 {
                center_sum += luma;
                center_n += 1;
            } else if x < bx || x >= w - bx || y < by || y >= h - by {
                border_sum += luma;
                border_n += 1;
            }
        }
    }

    if center_n == 0 || border_n == 0 {
        return 0.0;
    }
    (center_sum as f32 / center_n as f32 - border_sum as f32 / border_n as f32).abs()
}

fn saturated_fraction(frame: &Frame) -> f32 {
    let plane = frame.luma_plane();
    if plane.is_empty() {
        return 0.0;
    }
    let saturated = plane.iter().filter(|&&p| p >= SATURATION_FLOOR).count();
    saturated as f32 / plane.len() as f32
}

/// Energy at the vertical Nyquist frequency, as a fraction of total
/// brightness. Natural images put almost nothing there; line-rastered
/// reproductions put a lot.
fn alternating_row_ratio(frame: &Frame) -> f32 {
    if frame.height < 2 || frame.width == 0 {
        return 0.0;
    }

    let mut alternating = 0.0f64;
    let mut total = 0.0f64;

    for y in 0..frame.height {
        let mut row_sum = 0u64;
        for x in 0..frame.width {
            row_sum += frame.luma_at(x, y) as u64;
        }
        let row_mean = row_sum as f64 / frame.width as f64;
        total += row_mean;
        if y % 2 == 0 {
            alternating += row_mean;
        } else {
            alternating -= row_mean;
        }
    }

    if total <= 0.0 {
        return 0.0;
    }
    (alternating.abs() / total) as f32
}

#[cfg(test)]
mod tests {
    use super::*;
    use facegate_capture::{SyntheticScene, SyntheticSource};

    fn refs(frames: &[facegate_capture::Frame]) -> Vec<&facegate_capture::Frame> {
        frames.iter().collect()
    }

    #[test]
    fn test_live_sequence_passes_all_checks() {
        let frames = SyntheticSource::render_sequence(SyntheticScene::LiveFace, 8);
        let result = AntiSpoofingAnalyzer::default().analyze(&refs(&frames));
        assert!(result.passed);
        assert!(result.checks.texture_consistency);
        assert!(result.checks.depth_variation);
        assert!(result.checks.reflection_absence);
        assert!(result.checks.frequency_consistency);
        assert_eq!(result.score, 1.0);
    }

    #[test]
    fn test_photo_fails_overall() {
        let frames = SyntheticSource::render_sequence(SyntheticScene::StaticPhoto, 8);
        let result = AntiSpoofingAnalyzer::default().analyze(&refs(&frames));
        assert!(!result.passed);
        // Glare and raster banding are the print's tells.
        assert!(!result.checks.reflection_absence);
        assert!(!result.checks.frequency_consistency);
        assert!(result.score <= 0.5);
    }

    #[test]
    fn test_empty_history_fails() {
        let result = AntiSpoofingAnalyzer::default().analyze(&[]);
        assert!(!result.passed);
        assert_eq!(result.score, 0.0);
    }

    #[test]
    fn test_score_is_pass_fraction() {
        let frames = SyntheticSource::render_sequence(SyntheticScene::StaticPhoto, 4);
        let result = AntiSpoofingAnalyzer::default().analyze(&refs(&frames));
        assert_eq!(
            result.score,
            result.checks.passed_count() as f32 / 4.0
        );
    }
}
