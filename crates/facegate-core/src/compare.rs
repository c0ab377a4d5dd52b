//! Template comparison and the accept decision.
//!
//! Three sub-scores feed the combined similarity: cosine distance between
//! embeddings, pointwise landmark agreement, and geometric consistency of
//! facial proportions. Confidence reflects how much the sub-scores agree
//! with each other; a probe that matches on one signal but not the others
//! scores confident-low rather than ambiguous-high.

use tracing::debug;

use crate::types::{ComparisonBreakdown, ComparisonResult, EnrollmentTemplate, FaceEmbedding};

const EMBEDDING_WEIGHT: f32 = 0.6;
const LANDMARK_WEIGHT: f32 = 0.25;
const GEOMETRY_WEIGHT: f32 = 0.15;

/// Landmark index pairs whose distances define facial proportions:
/// eye span, inner eye gap, jaw width, chin-to-nose, mouth width.
/// Indices follow the standard 68-point layout.
const ANCHOR_PAIRS: [(usize, usize); 5] = [(36, 45), (39, 42), (0, 16), (8, 30), (48, 54)];

/// How an accept/reject verdict is derived from a comparison.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DecisionPolicy {
    /// Similarity alone must clear 0.75.
    Basic,
    /// Similarity must reach 0.8 and confidence 0.7.
    #[default]
    Enhanced,
}

impl DecisionPolicy {
    pub fn accepts(&self, result: &ComparisonResult) -> bool {
        match self {
            DecisionPolicy::Basic => result.similarity > 0.75,
            DecisionPolicy::Enhanced => result.similarity >= 0.8 && result.confidence >= 0.7,
        }
    }
}

pub struct SimilarityComparator;

impl Default for SimilarityComparator {
    fn default() -> Self {
        Self::new()
    }
}

impl SimilarityComparator {
    pub fn new() -> Self {
        Self
    }

    /// Compare a probe embedding against a stored template.
    ///
    /// Mismatched embedding dimensions yield a zero result: templates from
    /// different extractor variants are never comparable.
    pub fn compare(&self, probe: &FaceEmbedding, template: &EnrollmentTemplate) -> ComparisonResult {
        if probe.values.len() != template.embedding.len() {
            return ComparisonResult {
                similarity: 0.0,
                confidence: 0.0,
                breakdown: ComparisonBreakdown {
                    embedding_similarity: 0.0,
                    landmark_similarity: None,
                    geometric_consistency: None,
                },
            };
        }

        let template_embedding = FaceEmbedding {
            values: template.embedding.clone(),
            quality: template.avg_quality,
            landmarks: template.landmarks.clone(),
        };
        // Negative cosine means anti-correlated, which is as much of a
        // non-match as orthogonal; clamp rather than rescale.
        let embedding_sim = probe
            .cosine_similarity(&template_embedding)
            .clamp(0.0, 1.0);

        let landmark_sim = match (&probe.landmarks, &template.landmarks) {
            (Some(a), Some(b)) if a.len() == b.len() && !a.is_empty() => {
                Some(landmark_agreement(a, b))
            }
            _ => None,
        };
        let geometry = match (&probe.landmarks, &template.landmarks) {
            (Some(a), Some(b)) if a.len() == b.len() => geometric_consistency(a, b),
            _ => None,
        };

        let mut weighted = EMBEDDING_WEIGHT * embedding_sim;
        let mut weight_total = EMBEDDING_WEIGHT;
        let mut subs = vec![embedding_sim];
        if let Some(lm) = landmark_sim {
            weighted += LANDMARK_WEIGHT * lm;
            weight_total += LANDMARK_WEIGHT;
            subs.push(lm);
        }
        if let Some(geo) = geometry {
            weighted += GEOMETRY_WEIGHT * geo;
            weight_total += GEOMETRY_WEIGHT;
            subs.push(geo);
        }

        let similarity = (weighted / weight_total).clamp(0.0, 1.0);
        let confidence = (1.0 - variance(&subs)).clamp(0.0, 1.0);

        debug!(
            embedding_sim,
            landmark_sim, geometry, similarity, confidence, "comparison"
        );

        ComparisonResult {
            similarity,
            confidence,
            breakdown: ComparisonBreakdown {
                embedding_similarity: embedding_sim,
                landmark_similarity: landmark_sim,
                geometric_consistency: geometry,
            },
        }
    }
}

/// Mean pointwise agreement: 1 minus the absolute coordinate difference.
fn landmark_agreement(a: &[f32], b: &[f32]) -> f32 {
    let sum: f32 = a
        .iter()
        .zip(b.iter())
        .map(|(x, y)| (1.0 - (x - y).abs()).max(0.0))
        .sum();
    (sum / a.len() as f32).clamp(0.0, 1.0)
}

/// Mean min/max ratio of anchor distances: 1.0 when all facial proportions
/// match, approaching 0 as they diverge.
fn geometric_consistency(a: &[f32], b: &[f32]) -> Option<f32> {
    let mut ratios = Vec::with_capacity(ANCHOR_PAIRS.len());

    for &(i, j) in &ANCHOR_PAIRS {
        let da = point_distance(a, i, j)?;
        let db = point_distance(b, i, j)?;
        if da <= 0.0 || db <= 0.0 {
            continue;
        }
        ratios.push(da.min(db) / da.max(db));
    }

    if ratios.is_empty() {
        None
    } else {
        Some(ratios.iter().sum::<f32>() / ratios.len() as f32)
    }
}

fn point_distance(landmarks: &[f32], i: usize, j: usize) -> Option<f32> {
    let (xi, yi) = (*landmarks.get(2 * i)?, *landmarks.get(2 * i + 1)?);
    let (xj, yj) = (*landmarks.get(2 * j)?, *landmarks.get(2 * j + 1)?);
    Some(((xi - xj).powi(2) + (yi - yj).powi(2)).sqrt())
}

fn variance(values: &[f32]) -> f32 {
    if values.is_empty() {
        return 0.0;
    }
    let mean = values.iter().sum::<f32>() / values.len() as f32;
    values.iter().map(|v| (v - mean) * (v - mean)).sum::<f32>() / values.len() as f32
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::EmbeddingAggregator;
    use crate::detector::FaceDetector;
    use crate::extractor::{EmbeddingExtractor, ExtractorConfig};
    use facegate_capture::{SyntheticScene, SyntheticSource};

    fn template_from(values: Vec<f32>) -> EnrollmentTemplate {
        EnrollmentTemplate {
            embedding: values,
            landmarks: None,
            avg_quality: 1.0,
            sample_count: 3,
        }
    }

    fn probe_from(values: Vec<f32>) -> FaceEmbedding {
        FaceEmbedding {
            values,
            quality: 1.0,
            landmarks: None,
        }
    }

    #[test]
    fn test_identical_embeddings_match() {
        let comparator = SimilarityComparator::new();
        let result = comparator.compare(
            &probe_from(vec![0.6, 0.8]),
            &template_from(vec![0.6, 0.8]),
        );
        assert!(result.similarity > 0.99);
        assert!(result.confidence > 0.99);
    }

    #[test]
    fn test_identical_probe_and_template_with_landmarks() {
        let landmarks: Vec<f32> = (0..136).map(|i| (i as f32) / 136.0).collect();
        let mut probe = probe_from(vec![0.6, 0.8]);
        probe.landmarks = Some(landmarks.clone());
        let mut template = template_from(vec![0.6, 0.8]);
        template.landmarks = Some(landmarks);

        let comparator = SimilarityComparator::new();
        let result = comparator.compare(&probe, &template);
        assert!(result.similarity > 0.99, "similarity = {}", result.similarity);
        assert!(result.confidence > 0.99, "confidence = {}", result.confidence);
        assert!(DecisionPolicy::Enhanced.accepts(&result));
    }

    #[test]
    fn test_orthogonal_embeddings_do_not_match() {
        let comparator = SimilarityComparator::new();
        let result = comparator.compare(
            &probe_from(vec![1.0, 0.0]),
            &template_from(vec![0.0, 1.0]),
        );
        assert!(result.similarity < 0.01);
    }

    #[test]
    fn test_dimension_mismatch_is_zero() {
        let comparator = SimilarityComparator::new();
        let result = comparator.compare(
            &probe_from(vec![1.0, 0.0, 0.0]),
            &template_from(vec![1.0, 0.0]),
        );
        assert_eq!(result.similarity, 0.0);
        assert_eq!(result.confidence, 0.0);
    }

    #[test]
    fn test_negative_cosine_clamped() {
        let comparator = SimilarityComparator::new();
        let result = comparator.compare(
            &probe_from(vec![1.0, 0.0]),
            &template_from(vec![-1.0, 0.0]),
        );
        assert_eq!(result.breakdown.embedding_similarity, 0.0);
    }

    #[test]
    fn test_full_pipeline_self_match() {
        // Enroll from one set of live frames and verify against another.
        let detector = FaceDetector::new();
        let mut extractor = EmbeddingExtractor::new(ExtractorConfig::Standard);
        extractor.init();

        let mut samples = Vec::new();
        for seq in 0..4 {
            let frame = SyntheticSource::render(SyntheticScene::LiveFace, seq);
            let detection = detector.detect(&frame);
            let emb = extractor
                .extract(&frame, detection.region.as_ref())
                .unwrap();
            samples.push(emb);
        }
        let template = EmbeddingAggregator::new(3).aggregate(&samples).unwrap();

        let frame = SyntheticSource::render(SyntheticScene::LiveFace, 9);
        let detection = detector.detect(&frame);
        let probe = extractor
            .extract(&frame, detection.region.as_ref())
            .unwrap();

        let result = SimilarityComparator::new().compare(&probe, &template);
        assert!(result.similarity >= 0.8, "similarity = {}", result.similarity);
        assert!(result.confidence >= 0.7, "confidence = {}", result.confidence);
        assert!(DecisionPolicy::Enhanced.accepts(&result));
    }

    #[test]
    fn test_policy_thresholds() {
        let borderline = ComparisonResult {
            similarity: 0.78,
            confidence: 0.9,
            breakdown: ComparisonBreakdown {
                embedding_similarity: 0.78,
                landmark_similarity: None,
                geometric_consistency: None,
            },
        };
        assert!(DecisionPolicy::Basic.accepts(&borderline));
        assert!(!DecisionPolicy::Enhanced.accepts(&borderline));

        let low_confidence = ComparisonResult {
            similarity: 0.95,
            confidence: 0.5,
            breakdown: ComparisonBreakdown {
                embedding_similarity: 0.95,
                landmark_similarity: None,
                geometric_consistency: None,
            },
        };
        assert!(DecisionPolicy::Basic.accepts(&low_confidence));
        assert!(!DecisionPolicy::Enhanced.accepts(&low_confidence));
    }
}
