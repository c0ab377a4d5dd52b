//! Enrollment template aggregation.
//!
//! Averages several per-frame embeddings into one template. Averaging
//! suppresses per-frame sensor noise; requiring a minimum sample count keeps
//! a single lucky frame from becoming someone's identity.

use thiserror::Error;

use crate::types::{EnrollmentTemplate, FaceEmbedding};

#[derive(Error, Debug)]
pub enum AggregateError {
    #[error("insufficient samples: got {got}, need {need}")]
    InsufficientSamples { got: usize, need: usize },
    #[error("sample dimension mismatch: expected {expected}, found {found}")]
    DimensionMismatch { expected: usize, found: usize },
}

pub struct EmbeddingAggregator {
    min_samples: usize,
}

impl Default for EmbeddingAggregator {
    fn default() -> Self {
        Self::new(3)
    }
}

impl EmbeddingAggregator {
    pub fn new(min_samples: usize) -> Self {
        Self {
            min_samples: min_samples.max(1),
        }
    }

    pub fn min_samples(&self) -> usize {
        self.min_samples
    }

    /// Combine samples into an enrollment template.
    ///
    /// The embedding is the component-wise mean of the samples, so a single
    /// sample (or identical copies of one) comes back unchanged. Cosine
    /// comparison downstream is magnitude-invariant, so the mean is stored
    /// as-is. Landmarks are averaged only when every sample carries them.
    pub fn aggregate(
        &self,
        samples: &[FaceEmbedding],
    ) -> Result<EnrollmentTemplate, AggregateError> {
        if samples.len() < self.min_samples {
            return Err(AggregateError::InsufficientSamples {
                got: samples.len(),
                need: self.min_samples,
            });
        }

        let dim = samples[0].values.len();
        for sample in &samples[1..] {
            if sample.values.len() != dim {
                return Err(AggregateError::DimensionMismatch {
                    expected: dim,
                    found: sample.values.len(),
                });
            }
        }

        let mut embedding = vec![0.0f32; dim];
        for sample in samples {
            for (acc, v) in embedding.iter_mut().zip(sample.values.iter()) {
                *acc += v;
            }
        }
        let n = samples.len() as f32;
        for v in &mut embedding {
            *v /= n;
        }

        let landmarks = mean_landmarks(samples);
        let avg_quality = samples.iter().map(|s| s.quality).sum::<f32>() / n;

        Ok(EnrollmentTemplate {
            embedding,
            landmarks,
            avg_quality,
            sample_count: samples.len(),
        })
    }
}

fn mean_landmarks(samples: &[FaceEmbedding]) -> Option<Vec<f32>> {
    let first = samples.first()?.landmarks.as_ref()?;
    let dim = first.len();
    let mut acc = vec![0.0f32; dim];

    for sample in samples {
        let landmarks = sample.landmarks.as_ref()?;
        if landmarks.len() != dim {
            return None;
        }
        for (a, v) in acc.iter_mut().zip(landmarks.iter()) {
            *a += v;
        }
    }

    let n = samples.len() as f32;
    for v in &mut acc {
        *v /= n;
    }
    Some(acc)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(values: Vec<f32>, quality: f32) -> FaceEmbedding {
        FaceEmbedding {
            values,
            quality,
            landmarks: None,
        }
    }

    #[test]
    fn test_too_few_samples() {
        let aggregator = EmbeddingAggregator::new(3);
        let samples = vec![sample(vec![1.0, 0.0], 0.9); 2];
        match aggregator.aggregate(&samples) {
            Err(AggregateError::InsufficientSamples { got, need }) => {
                assert_eq!(got, 2);
                assert_eq!(need, 3);
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_single_sample_is_identity() {
        let aggregator = EmbeddingAggregator::new(1);
        let template = aggregator
            .aggregate(&[sample(vec![0.6, 0.8], 0.7)])
            .unwrap();
        assert!((template.embedding[0] - 0.6).abs() < 1e-6);
        assert!((template.embedding[1] - 0.8).abs() < 1e-6);
        assert_eq!(template.sample_count, 1);
        assert!((template.avg_quality - 0.7).abs() < 1e-6);
    }

    #[test]
    fn test_mean_of_samples() {
        // Component-wise arithmetic mean, not a renormalized direction.
        let aggregator = EmbeddingAggregator::new(2);
        let samples = vec![sample(vec![1.0, 0.0], 1.0), sample(vec![0.0, 1.0], 1.0)];
        let template = aggregator.aggregate(&samples).unwrap();
        assert!((template.embedding[0] - 0.5).abs() < 1e-6);
        assert!((template.embedding[1] - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_non_unit_single_sample_unchanged() {
        // A sample away from unit length must not be rescaled.
        let aggregator = EmbeddingAggregator::new(1);
        let template = aggregator.aggregate(&[sample(vec![3.0, 4.0], 0.9)]).unwrap();
        assert!((template.embedding[0] - 3.0).abs() < 1e-6);
        assert!((template.embedding[1] - 4.0).abs() < 1e-6);
    }

    #[test]
    fn test_identical_samples_reproduce_input() {
        let aggregator = EmbeddingAggregator::new(2);
        let samples = vec![sample(vec![0.6, 0.8], 1.0); 3];
        let template = aggregator.aggregate(&samples).unwrap();
        assert!((template.embedding[0] - 0.6).abs() < 1e-6);
        assert!((template.embedding[1] - 0.8).abs() < 1e-6);
        assert_eq!(template.sample_count, 3);
    }

    #[test]
    fn test_dimension_mismatch() {
        let aggregator = EmbeddingAggregator::new(2);
        let samples = vec![sample(vec![1.0, 0.0], 1.0), sample(vec![1.0], 1.0)];
        assert!(matches!(
            aggregator.aggregate(&samples),
            Err(AggregateError::DimensionMismatch {
                expected: 2,
                found: 1
            })
        ));
    }

    #[test]
    fn test_quality_is_averaged() {
        let aggregator = EmbeddingAggregator::new(2);
        let samples = vec![sample(vec![1.0, 0.0], 0.4), sample(vec![1.0, 0.0], 0.8)];
        let template = aggregator.aggregate(&samples).unwrap();
        assert!((template.avg_quality - 0.6).abs() < 1e-6);
    }

    #[test]
    fn test_landmarks_averaged_when_all_present() {
        let aggregator = EmbeddingAggregator::new(2);
        let mut a = sample(vec![1.0, 0.0], 1.0);
        a.landmarks = Some(vec![0.2, 0.4]);
        let mut b = sample(vec![1.0, 0.0], 1.0);
        b.landmarks = Some(vec![0.4, 0.6]);
        let template = aggregator.aggregate(&[a, b]).unwrap();
        let lm = template.landmarks.unwrap();
        assert!((lm[0] - 0.3).abs() < 1e-6);
        assert!((lm[1] - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_landmarks_dropped_when_any_missing() {
        let aggregator = EmbeddingAggregator::new(2);
        let mut a = sample(vec![1.0, 0.0], 1.0);
        a.landmarks = Some(vec![0.2, 0.4]);
        let b = sample(vec![1.0, 0.0], 1.0);
        let template = aggregator.aggregate(&[a, b]).unwrap();
        assert!(template.landmarks.is_none());
    }
}
