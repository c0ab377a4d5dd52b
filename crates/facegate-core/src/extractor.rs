//! Embedding extraction.
//!
//! Produces a fixed-length feature vector from a face crop by tiling the
//! region into a grid and taking per-cell brightness statistics, plus a
//! 68-point landmark layout fitted to the region. Grid statistics are crude
//! next to a learned model, but they are deterministic, dimension-stable,
//! and similar crops of the same subject land close in the vector space,
//! which is all the aggregation and comparison stages require.

use facegate_capture::Frame;
use thiserror::Error;

use crate::types::{FaceEmbedding, FaceRegion, EMBEDDING_DIM, EMBEDDING_DIM_BASIC, LANDMARK_DIM};

#[derive(Error, Debug)]
pub enum ExtractError {
    #[error("no face region to extract from")]
    NoFaceRegion,
    #[error("extractor not initialized")]
    NotInitialized,
    #[error("region exceeds frame bounds")]
    RegionOutOfBounds,
}

/// Which embedding variant to produce. Variants are not comparable with
/// each other; the comparator rejects mixed-dimension pairs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExtractorConfig {
    /// 8x8 grid, 4 statistics per cell: 256 dimensions.
    #[default]
    Standard,
    /// 4x2 grid, 4 statistics per cell: 32 dimensions.
    Basic,
}

impl ExtractorConfig {
    pub fn dimension(&self) -> usize {
        match self {
            ExtractorConfig::Standard => EMBEDDING_DIM,
            ExtractorConfig::Basic => EMBEDDING_DIM_BASIC,
        }
    }

    fn grid(&self) -> (u32, u32) {
        match self {
            ExtractorConfig::Standard => (8, 8),
            ExtractorConfig::Basic => (4, 2),
        }
    }
}

/// Feature variance at or above this maps to quality 1.0.
const QUALITY_NORMALIZER: f32 = 0.01;

pub struct EmbeddingExtractor {
    config: ExtractorConfig,
    initialized: bool,
}

impl EmbeddingExtractor {
    pub fn new(config: ExtractorConfig) -> Self {
        Self {
            config,
            initialized: false,
        }
    }

    /// Prepare the extractor for use. Must precede `extract`.
    pub fn init(&mut self) {
        self.initialized = true;
    }

    /// Release extractor resources. A disposed extractor can be re-inited.
    pub fn dispose(&mut self) {
        self.initialized = false;
    }

    pub fn dimension(&self) -> usize {
        self.config.dimension()
    }

    /// Extract an embedding and landmarks from `region` of `frame`.
    pub fn extract(
        &self,
        frame: &Frame,
        region: Option<&FaceRegion>,
    ) -> Result<FaceEmbedding, ExtractError> {
        if !self.initialized {
            return Err(ExtractError::NotInitialized);
        }
        let region = region.ok_or(ExtractError::NoFaceRegion)?;
        if region.width == 0
            || region.height == 0
            || region.x + region.width > frame.width
            || region.y + region.height > frame.height
        {
            return Err(ExtractError::RegionOutOfBounds);
        }

        let values = self.grid_features(frame, region);
        let quality = (feature_variance(&values) / QUALITY_NORMALIZER).min(1.0);
        let values = l2_normalize(values);
        let landmarks = generate_landmarks(frame, region);

        Ok(FaceEmbedding {
            values,
            quality,
            landmarks: Some(landmarks),
        })
    }

    /// Per-cell brightness statistics: mean, stddev, min, max.
    fn grid_features(&self, frame: &Frame, region: &FaceRegion) -> Vec<f32> {
        let (cols, rows) = self.config.grid();
        let mut features = Vec::with_capacity(self.config.dimension());

        for row in 0..rows {
            for col in 0..cols {
                let x0 = region.x + col * region.width / cols;
                let x1 = region.x + (col + 1) * region.width / cols;
                let y0 = region.y + row * region.height / rows;
                let y1 = region.y + (row + 1) * region.height / rows;

                let mut sum = 0.0f64;
                let mut sum_sq = 0.0f64;
                let mut min = u8::MAX;
                let mut max = u8::MIN;
                let mut count = 0u64;

                for y in y0..y1 {
                    for x in x0..x1 {
                        let luma = frame.luma_at(x, y);
                        sum += luma as f64;
                        sum_sq += (luma as f64) * (luma as f64);
                        min = min.min(luma);
                        max = max.max(luma);
                        count += 1;
                    }
                }

                if count == 0 {
                    features.extend_from_slice(&[0.0, 0.0, 0.0, 0.0]);
                    continue;
                }

                let mean = sum / count as f64;
                let var = (sum_sq / count as f64 - mean * mean).max(0.0);
                features.push((mean / 255.0) as f32);
                features.push((var.sqrt() / 128.0) as f32);
                features.push(min as f32 / 255.0);
                features.push(max as f32 / 255.0);
            }
        }

        features
    }
}

fn feature_variance(values: &[f32]) -> f32 {
    if values.is_empty() {
        return 0.0;
    }
    let mean = values.iter().sum::<f32>() / values.len() as f32;
    values.iter().map(|v| (v - mean) * (v - mean)).sum::<f32>() / values.len() as f32
}

fn l2_normalize(mut values: Vec<f32>) -> Vec<f32> {
    let norm = values.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > 0.0 {
        for v in &mut values {
            *v /= norm;
        }
    }
    values
}

/// Parametric 68-point landmark layout fitted to the face region: 17 jaw,
/// 10 brow, 9 nose, 12 eye, and 20 mouth points, each nudged to the darkest
/// pixel in its 5x5 neighborhood and normalized to region coordinates.
fn generate_landmarks(frame: &Frame, region: &FaceRegion) -> Vec<f32> {
    let mut points: Vec<(f32, f32)> = Vec::with_capacity(LANDMARK_DIM / 2);

    // Jaw line: lower half-ellipse, left ear to right ear.
    for i in 0..17 {
        let t = i as f32 / 16.0;
        let angle = std::f32::consts::PI * (1.0 - t);
        points.push((0.5 + 0.48 * angle.cos(), 0.55 + 0.42 * angle.sin()));
    }
    // Brows, 5 points each.
    for i in 0..5 {
        let t = i as f32 / 4.0;
        points.push((0.18 + 0.22 * t, 0.28 - 0.04 * (t * std::f32::consts::PI).sin()));
    }
    for i in 0..5 {
        let t = i as f32 / 4.0;
        points.push((0.60 + 0.22 * t, 0.28 - 0.04 * (t * std::f32::consts::PI).sin()));
    }
    // Nose: bridge then base.
    for i in 0..4 {
        points.push((0.5, 0.34 + 0.05 * i as f32));
    }
    for i in 0..5 {
        points.push((0.42 + 0.04 * i as f32, 0.52));
    }
    // Eyes, 6 points each.
    for i in 0..6 {
        let angle = i as f32 / 6.0 * std::f32::consts::TAU;
        points.push((0.32 + 0.06 * angle.cos(), 0.38 + 0.025 * angle.sin()));
    }
    for i in 0..6 {
        let angle = i as f32 / 6.0 * std::f32::consts::TAU;
        points.push((0.68 + 0.06 * angle.cos(), 0.38 + 0.025 * angle.sin()));
    }
    // Mouth: outer ring of 12, inner ring of 8.
    for i in 0..12 {
        let angle = i as f32 / 12.0 * std::f32::consts::TAU;
        points.push((0.5 + 0.13 * angle.cos(), 0.72 + 0.05 * angle.sin()));
    }
    for i in 0..8 {
        let angle = i as f32 / 8.0 * std::f32::consts::TAU;
        points.push((0.5 + 0.07 * angle.cos(), 0.72 + 0.025 * angle.sin()));
    }

    let mut out = Vec::with_capacity(LANDMARK_DIM);
    for (nx, ny) in points {
        let px = region.x as f32 + nx.clamp(0.0, 1.0) * (region.width - 1) as f32;
        let py = region.y as f32 + ny.clamp(0.0, 1.0) * (region.height - 1) as f32;
        let (sx, sy) = snap_to_darkest(frame, px as u32, py as u32);
        out.push((sx as f32 - region.x as f32) / (region.width - 1).max(1) as f32);
        out.push((sy as f32 - region.y as f32) / (region.height - 1).max(1) as f32);
    }
    out
}

/// Darkest pixel within the 5x5 window centered at (x, y), ties broken by
/// scan order so repeated runs agree.
fn snap_to_darkest(frame: &Frame, x: u32, y: u32) -> (u32, u32) {
    let mut best = (x.min(frame.width - 1), y.min(frame.height - 1));
    let mut best_luma = frame.luma_at(best.0, best.1);

    let x0 = x.saturating_sub(2);
    let y0 = y.saturating_sub(2);
    let x1 = (x + 2).min(frame.width - 1);
    let y1 = (y + 2).min(frame.height - 1);

    for yy in y0..=y1 {
        for xx in x0..=x1 {
            let luma = frame.luma_at(xx, yy);
            if luma < best_luma {
                best_luma = luma;
                best = (xx, yy);
            }
        }
    }
    best
}
