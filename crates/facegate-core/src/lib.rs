//! facegate-core — the gated biometric pipeline stages.
//!
//! Quality assessment, liveness detection, anti-spoofing analysis, embedding
//! extraction, multi-sample aggregation, and weighted similarity comparison.
//! Every stage is a deterministic computation over pixel data: the same frame
//! buffer always produces the same result.

pub mod aggregate;
pub mod antispoof;
pub mod compare;
pub mod detector;
pub mod extractor;
pub mod liveness;
pub mod quality;
pub mod types;

pub use aggregate::{AggregateError, EmbeddingAggregator};
pub use antispoof::{AntiSpoofingAnalyzer, AntiSpoofingConfig};
pub use compare::{DecisionPolicy, SimilarityComparator};
pub use detector::FaceDetector;
pub use extractor::{EmbeddingExtractor, ExtractError, ExtractorConfig};
pub use liveness::{LivenessConfig, LivenessDetector};
pub use quality::QualityAssessor;
pub use types::{
    AntiSpoofingResult, CheckStatus, ComparisonBreakdown, ComparisonResult, DetectionResult,
    EnrollmentTemplate,
    FaceEmbedding, FaceRegion, LivenessResult, SecurityCheck, SpoofChecks,
};
