use serde::{Deserialize, Serialize};

/// Standard embedding dimension.
pub const EMBEDDING_DIM: usize = 256;
/// Reduced dimension used by the basic pipeline variant. Not interchangeable
/// with the standard dimension; comparing across variants yields zero.
pub const EMBEDDING_DIM_BASIC: usize = 32;
/// Landmark vector length: 68 points, 2 normalized coordinates each.
pub const LANDMARK_DIM: usize = 136;

/// Axis-aligned face region in frame pixel coordinates.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct FaceRegion {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl FaceRegion {
    pub fn area(&self) -> u64 {
        self.width as u64 * self.height as u64
    }
}

/// Outcome of running detection plus quality assessment on one frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectionResult {
    pub detected: bool,
    pub region: Option<FaceRegion>,
    /// Detection confidence in [0, 1].
    pub confidence: f32,
    /// Frame/region quality in [0, 1].
    pub quality: f32,
}

impl DetectionResult {
    pub fn none() -> Self {
        Self {
            detected: false,
            region: None,
            confidence: 0.0,
            quality: 0.0,
        }
    }
}

/// Fixed-length face feature vector with optional landmarks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FaceEmbedding {
    pub values: Vec<f32>,
    /// Discriminability estimate in [0, 1], derived from component variance.
    pub quality: f32,
    /// Normalized (x, y) landmark pairs, [`LANDMARK_DIM`] values when present.
    pub landmarks: Option<Vec<f32>>,
}

impl FaceEmbedding {
    /// Cosine similarity between two embeddings, in [-1, 1].
    ///
    /// Always processes all dimensions; no data-dependent early exit.
    /// Unequal lengths compare over the shorter prefix; callers that need the
    /// strict contract check lengths first (the comparator does).
    pub fn cosine_similarity(&self, other: &FaceEmbedding) -> f32 {
        let mut dot = 0.0f32;
        let mut norm_a = 0.0f32;
        let mut norm_b = 0.0f32;

        for (a, b) in self.values.iter().zip(other.values.iter()) {
            dot += a * b;
            norm_a += a * a;
            norm_b += b * b;
        }

        let denom = norm_a.sqrt() * norm_b.sqrt();
        if denom > 0.0 {
            dot / denom
        } else {
            0.0
        }
    }
}

/// Aggregated enrollment template. The only pipeline artifact that outlives
/// a session; persisted by the template store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnrollmentTemplate {
    pub embedding: Vec<f32>,
    /// Mean landmark vector; present only if every sample carried landmarks.
    pub landmarks: Option<Vec<f32>>,
    /// Mean of the per-sample embedding qualities.
    pub avg_quality: f32,
    pub sample_count: usize,
}

/// Result of a liveness check over a frame history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LivenessResult {
    pub is_live: bool,
    pub confidence: f32,
    /// For failures, names the dominant missing signal so the caller can
    /// coach the subject.
    pub reason: String,
}

/// One boolean per anti-spoofing sub-check.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SpoofChecks {
    pub texture_consistency: bool,
    pub depth_variation: bool,
    pub reflection_absence: bool,
    pub frequency_consistency: bool,
}

impl SpoofChecks {
    pub fn passed_count(&self) -> usize {
        [
            self.texture_consistency,
            self.depth_variation,
            self.reflection_absence,
            self.frequency_consistency,
        ]
        .iter()
        .filter(|&&c| c)
        .count()
    }
}

/// Result of the anti-spoofing analysis.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AntiSpoofingResult {
    pub passed: bool,
    /// Fraction of sub-checks that succeeded, in [0, 1].
    pub score: f32,
    pub checks: SpoofChecks,
}

/// Per-score breakdown of a comparison.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComparisonBreakdown {
    pub embedding_similarity: f32,
    pub landmark_similarity: Option<f32>,
    pub geometric_consistency: Option<f32>,
}

/// Result of comparing a probe against a stored template.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComparisonResult {
    /// Combined similarity in [0, 1].
    pub similarity: f32,
    /// Agreement across sub-scores in [0, 1]: 1 minus their variance.
    pub confidence: f32,
    pub breakdown: ComparisonBreakdown,
}

/// Progress state of one pipeline stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckStatus {
    Pending,
    Checking,
    Passed,
    Failed,
}

/// UI-facing progress record, one per pipeline stage. Mutated only by the
/// orchestrator; everyone else sees cloned snapshots in progress events.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityCheck {
    pub name: String,
    pub status: CheckStatus,
    pub description: String,
}

impl SecurityCheck {
    pub fn pending(name: &str, description: &str) -> Self {
        Self {
            name: name.to_string(),
            status: CheckStatus::Pending,
            description: description.to_string(),
        }
    }
}
