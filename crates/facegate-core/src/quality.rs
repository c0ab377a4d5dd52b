//! Frame quality assessment.
//!
//! Scores a detected face region for downstream use. Two gates: the region
//! must be large enough to carry features at all, and the crop must be sharp
//! (Laplacian variance, the standard focus measure).

use facegate_capture::Frame;

use crate::types::FaceRegion;

/// Region smaller than this fraction of the frame's short side scores zero.
const MIN_SIZE_FRACTION: f32 = 0.10;
/// Laplacian variance that maps to a quality of 1.0.
const SHARPNESS_NORMALIZER: f32 = 400.0;

pub struct QualityAssessor;

impl Default for QualityAssessor {
    fn default() -> Self {
        Self::new()
    }
}

impl QualityAssessor {
    pub fn new() -> Self {
        Self
    }

    /// Quality of `region` within `frame`, in [0, 1].
    pub fn assess(&self, frame: &Frame, region: &FaceRegion) -> f32 {
        let min_dim = (frame.width.min(frame.height) as f32 * MIN_SIZE_FRACTION) as u32;
        if region.width < min_dim.max(1) || region.height < min_dim.max(1) {
            return 0.0;
        }

        (self.laplacian_variance(frame, region) / SHARPNESS_NORMALIZER).min(1.0)
    }

    /// Variance of the 4-neighbor Laplacian over the region interior.
    /// Blur suppresses high-frequency content, collapsing this toward zero.
    fn laplacian_variance(&self, frame: &Frame, region: &FaceRegion) -> f32 {
        let x0 = region.x.max(1);
        let y0 = region.y.max(1);
        let x1 = (region.x + region.width).min(frame.width - 1);
        let y1 = (region.y + region.height).min(frame.height - 1);
        if x1 <= x0 || y1 <= y0 {
            return 0.0;
        }

        let mut sum = 0.0f64;
        let mut sum_sq = 0.0f64;
        let mut count = 0u64;

        for y in y0..y1 {
            for x in x0..x1 {
                let center = frame.luma_at(x, y) as f64;
                let lap = frame.luma_at(x - 1, y) as f64
                    + frame.luma_at(x + 1, y) as f64
                    + frame.luma_at(x, y - 1) as f64
                    + frame.luma_at(x, y + 1) as f64
                    - 4.0 * center;
                sum += lap;
                sum_sq += lap * lap;
                count += 1;
            }
        }

        if count == 0 {
            return 0.0;
        }
        let mean = sum / count as f64;
        (sum_sq / count as f64 - mean * mean) as f32
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use facegate_capture::{Frame, SyntheticScene, SyntheticSource};

    fn flat_frame(width: u32, height: u32, value: u8) -> Frame {
        let data = vec![value, value, value, 255]
            .into_iter()
            .cycle()
            .take((width * height * 4) as usize)
            .collect();
        Frame::from_rgba(data, width, height, 0).unwrap()
    }

    fn full_region(frame: &Frame) -> FaceRegion {
        FaceRegion {
            x: 0,
            y: 0,
            width: frame.width,
            height: frame.height,
        }
    }

    #[test]
    fn test_flat_frame_scores_zero() {
        let frame = flat_frame(64, 64, 128);
        let q = QualityAssessor::new();
        assert_eq!(q.assess(&frame, &full_region(&frame)), 0.0);
    }

    #[test]
    fn test_textured_face_scores_high() {
        let frame = SyntheticSource::render(SyntheticScene::LiveFace, 0);
        let region = FaceRegion {
            x: frame.width / 4,
            y: frame.height / 6,
            width: frame.width / 2,
            height: frame.height * 2 / 3,
        };
        let q = QualityAssessor::new();
        assert!(q.assess(&frame, &region) > 0.5);
    }

    #[test]
    fn test_tiny_region_rejected() {
        let frame = SyntheticSource::render(SyntheticScene::LiveFace, 0);
        let region = FaceRegion {
            x: 10,
            y: 10,
            width: 4,
            height: 4,
        };
        let q = QualityAssessor::new();
        assert_eq!(q.assess(&frame, &region), 0.0);
    }

    #[test]
    fn test_quality_in_unit_range() {
        let frame = SyntheticSource::render(SyntheticScene::StaticPhoto, 0);
        let q = QualityAssessor::new();
        let score = q.assess(&frame, &full_region(&frame));
        assert!((0.0..=1.0).contains(&score));
    }
}
