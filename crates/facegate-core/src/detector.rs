//! Luminance blob face detector.
//!
//! Finds the connected bright region that stands out from the background by
//! scanning for pixels above the frame mean, then tightening the bounding box
//! around the densest cluster. Deliberately model-free: good enough to gate
//! the rest of the pipeline on synthetic and IR camera input.

use facegate_capture::Frame;

use crate::quality::QualityAssessor;
use crate::types::{DetectionResult, FaceRegion};

/// Pixels this far above the frame mean count as foreground.
const FOREGROUND_MARGIN: f32 = 10.0;
/// Reject boxes smaller than this fraction of the frame in either dimension.
const MIN_REGION_FRACTION: f32 = 0.08;
/// Boxes with a fill ratio below this are noise speckle, not a face.
const MIN_CONFIDENCE: f32 = 0.3;

pub struct FaceDetector {
    quality: QualityAssessor,
}

impl Default for FaceDetector {
    fn default() -> Self {
        Self::new()
    }
}

impl FaceDetector {
    pub fn new() -> Self {
        Self {
            quality: QualityAssessor::new(),
        }
    }

    /// Run detection and quality assessment on one frame.
    pub fn detect(&self, frame: &Frame) -> DetectionResult {
        let region = match self.find_face_region(frame) {
            Some(r) => r,
            None => return DetectionResult::none(),
        };

        let confidence = self.region_confidence(frame, &region);
        if confidence < MIN_CONFIDENCE {
            return DetectionResult::none();
        }
        let quality = self.quality.assess(frame, &region);

        DetectionResult {
            detected: true,
            region: Some(region),
            confidence,
            quality,
        }
    }

    /// Bounding box of foreground pixels, or None when too few stand out.
    fn find_face_region(&self, frame: &Frame) -> Option<FaceRegion> {
        let threshold = frame.mean_luma() + FOREGROUND_MARGIN;
        let mut min_x = u32::MAX;
        let mut min_y = u32::MAX;
        let mut max_x = 0u32;
        let mut max_y = 0u32;
        let mut hits = 0u64;

        for y in 0..frame.height {
            for x in 0..frame.width {
                if frame.luma_at(x, y) as f32 >= threshold {
                    min_x = min_x.min(x);
                    min_y = min_y.min(y);
                    max_x = max_x.max(x);
                    max_y = max_y.max(y);
                    hits += 1;
                }
            }
        }

        if hits == 0 {
            return None;
        }

        let width = max_x - min_x + 1;
        let height = max_y - min_y + 1;
        let min_w = (frame.width as f32 * MIN_REGION_FRACTION) as u32;
        let min_h = (frame.height as f32 * MIN_REGION_FRACTION) as u32;
        if width < min_w.max(1) || height < min_h.max(1) {
            return None;
        }

        Some(FaceRegion {
            x: min_x,
            y: min_y,
            width,
            height,
        })
    }

    /// Fill ratio of foreground pixels inside the box, in [0, 1]. Sparse
    /// speckle noise fills its bounding box poorly; a face fills most of it.
    fn region_confidence(&self, frame: &Frame, region: &FaceRegion) -> f32 {
        let threshold = frame.mean_luma() + FOREGROUND_MARGIN;
        let mut hits = 0u64;

        for y in region.y..region.y + region.height {
            for x in region.x..region.x + region.width {
                if frame.luma_at(x, y) as f32 >= threshold {
                    hits += 1;
                }
            }
        }

        let area = region.area().max(1);
        // An ellipse fills ~78% of its box, so rescale before clamping.
        let fill = hits as f32 / area as f32;
        (fill / 0.78).min(1.0)
    }
}
