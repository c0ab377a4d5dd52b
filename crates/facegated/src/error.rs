use thiserror::Error;

/// Everything a pipeline run can fail with. Each variant maps to a distinct
/// caller-visible outcome; the D-Bus layer converts these to fdo errors.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("frame source error: {0}")]
    Source(#[from] facegate_capture::SourceError),
    #[error("frame capture stopped: {0}")]
    CaptureFailed(String),
    #[error("no frame cleared the quality gate (best score {score:.2})")]
    QualityTooLow { score: f32 },
    #[error("liveness check failed: {reason}")]
    LivenessFailed { reason: String },
    #[error("presentation attack suspected ({passed} of 4 checks passed)")]
    SpoofSuspected { passed: usize },
    #[error("extraction error: {0}")]
    Extract(#[from] facegate_core::ExtractError),
    #[error("aggregation error: {0}")]
    Aggregate(#[from] facegate_core::AggregateError),
    #[error("verification rejected: similarity {similarity:.2}, confidence {confidence:.2}")]
    VerificationRejected { similarity: f32, confidence: f32 },
    #[error("another pipeline run is in progress")]
    Busy,
    #[error("pipeline timed out")]
    Timeout,
    #[error("pipeline run cancelled")]
    Cancelled,
    #[error("pipeline worker exited")]
    ChannelClosed,
}

impl PipelineError {
    /// Whether the caller can retry the run on the same session. Fatal
    /// variants require session re-initialization (or, for `InsufficientSamples`
    /// inside [`Aggregate`](Self::Aggregate), a fresh capture from zero).
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::QualityTooLow { .. }
                | Self::LivenessFailed { .. }
                | Self::SpoofSuspected { .. }
                | Self::Extract(_)
                | Self::VerificationRejected { .. }
                | Self::Busy
                | Self::Cancelled
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recoverable_classification() {
        assert!(PipelineError::QualityTooLow { score: 0.1 }.is_recoverable());
        assert!(PipelineError::VerificationRejected {
            similarity: 0.2,
            confidence: 0.5
        }
        .is_recoverable());
        assert!(!PipelineError::Timeout.is_recoverable());
        assert!(!PipelineError::CaptureFailed("gone".into()).is_recoverable());
        assert!(
            !PipelineError::Aggregate(facegate_core::AggregateError::InsufficientSamples {
                got: 2,
                need: 3
            })
            .is_recoverable()
        );
    }
}
