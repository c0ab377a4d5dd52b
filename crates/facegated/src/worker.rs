//! The pipeline worker: runs the staged analysis for one job at a time.
//!
//! Jobs arrive over an mpsc channel and reply through oneshots. All heavy
//! pixel work happens here, on a dedicated OS thread, so D-Bus handlers stay
//! responsive. The worker owns every stage object; nothing here is shared
//! except the frame history (read) and the control flags.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use facegate_capture::{Frame, FrameHistory};
use facegate_core::{
    AntiSpoofingAnalyzer, ComparisonResult, DecisionPolicy, DetectionResult, EmbeddingAggregator,
    EmbeddingExtractor, EnrollmentTemplate, FaceDetector, FaceEmbedding, LivenessDetector,
    SimilarityComparator,
};
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use crate::error::PipelineError;
use crate::progress::{PipelineState, ProgressSink, ProgressTracker};

/// Messages from the pipeline handle to the worker thread.
pub enum WorkerRequest {
    Enroll {
        reply: oneshot::Sender<Result<EnrollmentTemplate, PipelineError>>,
        sink: Option<Box<dyn ProgressSink>>,
    },
    Verify {
        template: EnrollmentTemplate,
        reply: oneshot::Sender<Result<ComparisonResult, PipelineError>>,
        sink: Option<Box<dyn ProgressSink>>,
    },
}

/// Check list for an enrollment run; verification appends one more.
const ENROLL_CHECKS: [(&str, &str); 5] = [
    ("face_detection", "a face is present in the frame"),
    ("image_quality", "the capture is sharp enough to use"),
    ("liveness", "the subject shows natural movement"),
    ("anti_spoofing", "no presentation-attack artifacts"),
    ("feature_extraction", "face features extracted"),
];
const VERIFY_CHECK: (&str, &str) = ("template_match", "features match the enrolled template");

/// Everything the worker needs for a run. Built once in `spawn_pipeline`
/// and moved onto the worker thread.
pub struct WorkerContext {
    pub history: Arc<Mutex<FrameHistory>>,
    pub detector: FaceDetector,
    pub extractor: EmbeddingExtractor,
    pub liveness: LivenessDetector,
    pub antispoof: AntiSpoofingAnalyzer,
    pub aggregator: EmbeddingAggregator,
    pub comparator: SimilarityComparator,
    pub policy: DecisionPolicy,
    pub min_quality: f32,
    /// Samples attempted per enrollment; dropped samples are tolerated as
    /// long as the accepted count still reaches the aggregator's minimum.
    pub required_samples: usize,
    pub poll_interval: Duration,
    pub timeout: Duration,
    pub cancel: Arc<AtomicBool>,
    pub capture_fault: Arc<Mutex<Option<String>>>,
    pub state: Arc<Mutex<PipelineState>>,
}

impl WorkerContext {
    /// Process requests until every sender is dropped. Exactly one job runs
    /// at a time; the in-flight flag is owned by the handle and cleared here
    /// after each job, so a caller that gave up on a slow job still cannot
    /// start a second one while the first is running.
    pub fn run_loop(
        mut self,
        mut rx: tokio::sync::mpsc::Receiver<WorkerRequest>,
        in_flight: Arc<AtomicBool>,
    ) {
        info!("pipeline worker started");
        while let Some(req) = rx.blocking_recv() {
            // The slot is released before the reply goes out, so the state
            // a woken caller observes already accepts a fresh run.
            match req {
                WorkerRequest::Enroll { reply, sink } => {
                    let result = self.run_enroll(sink);
                    if let Err(e) = &result {
                        warn!(error = %e, recoverable = e.is_recoverable(), "enrollment failed");
                    }
                    self.finish_job(&in_flight);
                    let _ = reply.send(result);
                }
                WorkerRequest::Verify {
                    template,
                    reply,
                    sink,
                } => {
                    let result = self.run_verify(&template, sink);
                    if let Err(e) = &result {
                        warn!(error = %e, recoverable = e.is_recoverable(), "verification failed");
                    }
                    self.finish_job(&in_flight);
                    let _ = reply.send(result);
                }
            }
        }
        info!("pipeline worker exiting");
    }

    fn run_enroll(
        &mut self,
        sink: Option<Box<dyn ProgressSink>>,
    ) -> Result<EnrollmentTemplate, PipelineError> {
        let mut tracker = ProgressTracker::new(&ENROLL_CHECKS, sink);
        let deadline = self.begin_job(&mut tracker);

        self.await_face(&mut tracker, deadline)?;

        self.enter(&mut tracker, PipelineState::Capturing);
        let samples = self.capture_samples(&mut tracker, deadline)?;

        self.enter(&mut tracker, PipelineState::Aggregating);
        let template = match self.aggregator.aggregate(&samples) {
            Ok(t) => {
                tracker.pass(4);
                t
            }
            Err(e) => {
                tracker.fail(4);
                return Err(e.into());
            }
        };

        self.enter(&mut tracker, PipelineState::Succeeded);
        info!(
            samples = template.sample_count,
            quality = template.avg_quality,
            "enrollment complete"
        );
        Ok(template)
    }

    fn run_verify(
        &mut self,
        template: &EnrollmentTemplate,
        sink: Option<Box<dyn ProgressSink>>,
    ) -> Result<ComparisonResult, PipelineError> {
        let mut checks: Vec<(&str, &str)> = ENROLL_CHECKS.to_vec();
        checks.push(VERIFY_CHECK);
        let mut tracker = ProgressTracker::new(&checks, sink);
        let deadline = self.begin_job(&mut tracker);

        let (frames, frame, detection) = self.await_face(&mut tracker, deadline)?;
        self.temporal_checks(&frames, &mut tracker)?;

        self.enter(&mut tracker, PipelineState::Extracting);
        tracker.begin(4);
        let probe = match detection.region.as_ref() {
            Some(region) => match self.extractor.extract(&frame, Some(region)) {
                Ok(p) => p,
                Err(e) => {
                    tracker.fail(4);
                    return Err(e.into());
                }
            },
            None => {
                tracker.fail(4);
                return Err(PipelineError::QualityTooLow {
                    score: detection.quality,
                });
            }
        };
        tracker.pass(4);

        self.enter(&mut tracker, PipelineState::Comparing);
        tracker.begin(5);
        let result = self.comparator.compare(&probe, template);
        if !self.policy.accepts(&result) {
            tracker.fail(5);
            return Err(PipelineError::VerificationRejected {
                similarity: result.similarity,
                confidence: result.confidence,
            });
        }
        tracker.pass(5);

        self.enter(&mut tracker, PipelineState::Succeeded);
        info!(
            similarity = result.similarity,
            confidence = result.confidence,
            "verification accepted"
        );
        Ok(result)
    }

    /// The Detecting phase: poll the history until a frame clears both the
    /// detection and quality gates. This phase never fails the run on its
    /// own; on deadline it reports `QualityTooLow` when a face was seen but
    /// never sharp enough, and `Timeout` when no face ever appeared.
    fn await_face(
        &self,
        tracker: &mut ProgressTracker,
        deadline: Instant,
    ) -> Result<(Vec<Frame>, Frame, DetectionResult), PipelineError> {
        self.enter(tracker, PipelineState::Detecting);
        tracker.begin(0);

        let need = self.min_window();
        let mut best_quality = 0.0f32;
        let mut saw_face = false;

        loop {
            self.checkpoint()?;
            if let Some(msg) = self.capture_fault() {
                tracker.fail(0);
                return Err(PipelineError::CaptureFailed(msg));
            }

            let snapshot = self.snapshot();
            if snapshot.len() >= need {
                let mut hit = None;
                for (i, frame) in snapshot.iter().enumerate().rev() {
                    let detection = self.detector.detect(frame);
                    if !detection.detected {
                        continue;
                    }
                    saw_face = true;
                    best_quality = best_quality.max(detection.quality);
                    if detection.quality >= self.min_quality {
                        hit = Some((i, detection));
                        break;
                    }
                }
                if let Some((i, detection)) = hit {
                    tracker.pass(0);
                    tracker.begin(1);
                    tracker.pass(1);
                    debug!(
                        frames = snapshot.len(),
                        quality = detection.quality,
                        "detection gate cleared"
                    );
                    let frame = snapshot[i].clone();
                    return Ok((snapshot, frame, detection));
                }
            }

            if Instant::now() >= deadline {
                return if saw_face {
                    tracker.pass(0);
                    tracker.begin(1);
                    tracker.fail(1);
                    Err(PipelineError::QualityTooLow {
                        score: best_quality,
                    })
                } else {
                    tracker.fail(0);
                    Err(PipelineError::Timeout)
                };
            }
            std::thread::sleep(self.poll_interval);
        }
    }

    /// The Capturing phase: one liveness + anti-spoofing + extraction pass
    /// per required sample, each on a frame not used by an earlier sample.
    /// A sample whose frame fails detection, quality, or extraction is
    /// dropped; the aggregator decides afterwards whether enough survived.
    fn capture_samples(
        &mut self,
        tracker: &mut ProgressTracker,
        deadline: Instant,
    ) -> Result<Vec<FaceEmbedding>, PipelineError> {
        let mut samples = Vec::with_capacity(self.required_samples);
        let mut last_used: Option<u32> = None;

        for attempt in 0..self.required_samples {
            let (frame, snapshot) = self.next_sample_frame(last_used, deadline)?;
            last_used = Some(frame.sequence);

            self.temporal_checks(&snapshot, tracker)?;

            self.enter(tracker, PipelineState::Extracting);
            if attempt == 0 {
                tracker.begin(4);
            }
            let detection = self.detector.detect(&frame);
            let region = match detection.region {
                Some(r) if detection.quality >= self.min_quality => r,
                _ => {
                    debug!(
                        attempt,
                        sequence = frame.sequence,
                        "sample dropped at the quality gate"
                    );
                    continue;
                }
            };
            match self.extractor.extract(&frame, Some(&region)) {
                Ok(embedding) => samples.push(embedding),
                Err(e) => {
                    warn!(attempt, error = %e, "sample dropped at extraction");
                }
            }
        }
        Ok(samples)
    }

    /// Liveness and anti-spoofing over the frame window. Either failing
    /// fails the run; the liveness reason is surfaced verbatim so the
    /// caller can coach the subject.
    fn temporal_checks(
        &self,
        frames: &[Frame],
        tracker: &mut ProgressTracker,
    ) -> Result<(), PipelineError> {
        self.checkpoint()?;
        self.enter(tracker, PipelineState::LivenessCheck);
        tracker.begin(2);
        let refs: Vec<&Frame> = frames.iter().collect();
        let liveness = self.liveness.analyze(&refs);
        if !liveness.is_live {
            tracker.fail(2);
            return Err(PipelineError::LivenessFailed {
                reason: liveness.reason,
            });
        }
        tracker.pass(2);

        self.checkpoint()?;
        self.enter(tracker, PipelineState::AntiSpoofCheck);
        tracker.begin(3);
        let spoof = self.antispoof.analyze(&refs);
        if !spoof.passed {
            tracker.fail(3);
            return Err(PipelineError::SpoofSuspected {
                passed: spoof.checks.passed_count(),
            });
        }
        tracker.pass(3);

        self.checkpoint()
    }

    /// Oldest frame newer than the previous sample's, polling for fresh
    /// capture output when the buffer is exhausted.
    fn next_sample_frame(
        &self,
        last_used: Option<u32>,
        deadline: Instant,
    ) -> Result<(Frame, Vec<Frame>), PipelineError> {
        loop {
            self.checkpoint()?;
            if let Some(msg) = self.capture_fault() {
                return Err(PipelineError::CaptureFailed(msg));
            }

            let snapshot = self.snapshot();
            let fresh = snapshot
                .iter()
                .find(|f| last_used.map_or(true, |s| f.sequence > s))
                .cloned();
            if let Some(frame) = fresh {
                return Ok((frame, snapshot));
            }

            if Instant::now() >= deadline {
                return Err(PipelineError::Timeout);
            }
            std::thread::sleep(self.poll_interval);
        }
    }

    /// Frames the temporal checks need before a run can leave Detecting.
    fn min_window(&self) -> usize {
        self.liveness
            .min_frames()
            .max(self.aggregator.min_samples())
    }

    /// Terminal states reset to Idle so the session accepts a retry.
    fn finish_job(&self, in_flight: &AtomicBool) {
        self.set_state(PipelineState::Idle);
        in_flight.store(false, Ordering::SeqCst);
    }

    /// Job preamble: clear any stale cancel request, compute the deadline.
    fn begin_job(&self, tracker: &mut ProgressTracker) -> Instant {
        self.cancel.store(false, Ordering::SeqCst);
        self.enter(tracker, PipelineState::Initializing);
        Instant::now() + self.timeout
    }

    fn checkpoint(&self) -> Result<(), PipelineError> {
        if self.cancel.load(Ordering::SeqCst) {
            return Err(PipelineError::Cancelled);
        }
        Ok(())
    }

    fn snapshot(&self) -> Vec<Frame> {
        self.history
            .lock()
            .map(|h| h.snapshot())
            .unwrap_or_default()
    }

    fn capture_fault(&self) -> Option<String> {
        self.capture_fault.lock().map(|f| f.clone()).unwrap_or(None)
    }

    fn enter(&self, tracker: &mut ProgressTracker, state: PipelineState) {
        self.set_state(state);
        tracker.set_state(state);
    }

    fn set_state(&self, state: PipelineState) {
        if let Ok(mut s) = self.state.lock() {
            *s = state;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use facegate_capture::{SyntheticScene, SyntheticSource};
    use facegate_core::{AggregateError, AntiSpoofingConfig, ExtractorConfig, LivenessConfig};

    fn context(history: FrameHistory) -> WorkerContext {
        let mut extractor = EmbeddingExtractor::new(ExtractorConfig::Standard);
        extractor.init();

        WorkerContext {
            history: Arc::new(Mutex::new(history)),
            detector: FaceDetector::new(),
            extractor,
            liveness: LivenessDetector::new(LivenessConfig::default()),
            antispoof: AntiSpoofingAnalyzer::new(AntiSpoofingConfig::default()),
            aggregator: EmbeddingAggregator::new(3),
            comparator: SimilarityComparator::new(),
            policy: DecisionPolicy::Enhanced,
            min_quality: 0.3,
            required_samples: 5,
            poll_interval: Duration::from_millis(5),
            timeout: Duration::from_millis(500),
            cancel: Arc::new(AtomicBool::new(false)),
            capture_fault: Arc::new(Mutex::new(None)),
            state: Arc::new(Mutex::new(PipelineState::Idle)),
        }
    }

    fn context_with(scene: SyntheticScene, frame_count: usize) -> WorkerContext {
        let mut history = FrameHistory::new(10);
        for frame in SyntheticSource::render_sequence(scene, frame_count) {
            history.push(frame);
        }
        context(history)
    }

    #[test]
    fn test_enroll_live_scene_succeeds() {
        let mut ctx = context_with(SyntheticScene::LiveFace, 10);
        let template = ctx.run_enroll(None).unwrap();
        assert_eq!(template.sample_count, 5);
        assert_eq!(template.embedding.len(), 256);
        assert!(template.landmarks.is_some());
    }

    #[test]
    fn test_enroll_seven_samples_counts_all() {
        let mut ctx = context_with(SyntheticScene::LiveFace, 10);
        ctx.required_samples = 7;
        let template = ctx.run_enroll(None).unwrap();
        assert_eq!(template.sample_count, 7);
        assert_eq!(template.embedding.len(), 256);
    }

    #[test]
    fn test_enroll_with_too_few_usable_frames_is_insufficient() {
        // Two usable frames, then the subject leaves: of the five attempted
        // samples only two clear the quality gate.
        let mut history = FrameHistory::new(10);
        for frame in SyntheticSource::render_sequence(SyntheticScene::LiveFace, 2) {
            history.push(frame);
        }
        for seq in 2..10u32 {
            history.push(SyntheticSource::render(SyntheticScene::Empty, seq));
        }
        let mut ctx = context(history);
        let err = ctx.run_enroll(None).unwrap_err();
        assert!(
            matches!(
                err,
                PipelineError::Aggregate(AggregateError::InsufficientSamples { got: 2, need: 3 })
            ),
            "unexpected error: {err}"
        );
    }

    #[test]
    fn test_enroll_then_verify_accepts() {
        let mut ctx = context_with(SyntheticScene::LiveFace, 10);
        let template = ctx.run_enroll(None).unwrap();
        let result = ctx.run_verify(&template, None).unwrap();
        assert!(result.similarity >= 0.8);
        assert!(result.confidence >= 0.7);
    }

    #[test]
    fn test_photo_rejected_before_extraction() {
        let mut ctx = context_with(SyntheticScene::StaticPhoto, 10);
        let err = ctx.run_enroll(None).unwrap_err();
        assert!(
            matches!(
                err,
                PipelineError::LivenessFailed { .. } | PipelineError::SpoofSuspected { .. }
            ),
            "unexpected error: {err}"
        );
    }

    #[test]
    fn test_empty_scene_times_out_without_detection() {
        let mut ctx = context_with(SyntheticScene::Empty, 10);
        ctx.timeout = Duration::from_millis(50);
        let err = ctx.run_enroll(None).unwrap_err();
        assert!(matches!(err, PipelineError::Timeout), "got: {err}");
    }

    #[test]
    fn test_starved_history_times_out() {
        let mut ctx = context_with(SyntheticScene::LiveFace, 2);
        ctx.timeout = Duration::from_millis(50);
        let err = ctx.run_enroll(None).unwrap_err();
        assert!(matches!(err, PipelineError::Timeout));
    }

    #[test]
    fn test_capture_fault_surfaces() {
        let mut ctx = context_with(SyntheticScene::LiveFace, 2);
        *ctx.capture_fault.lock().unwrap() = Some("device unplugged".to_string());
        let err = ctx.run_enroll(None).unwrap_err();
        assert!(matches!(err, PipelineError::CaptureFailed(_)));
    }

    #[test]
    fn test_verify_wrong_template_rejected() {
        let mut ctx = context_with(SyntheticScene::LiveFace, 10);
        let template = EnrollmentTemplate {
            embedding: {
                // Orthogonal-ish template: all weight on one component.
                let mut v = vec![0.0f32; 256];
                v[0] = 1.0;
                v
            },
            landmarks: None,
            avg_quality: 1.0,
            sample_count: 3,
        };
        let err = ctx.run_verify(&template, None).unwrap_err();
        assert!(matches!(err, PipelineError::VerificationRejected { .. }));
    }

    #[test]
    fn test_progress_reaches_all_checks() {
        use crate::progress::ChannelSink;
        let mut ctx = context_with(SyntheticScene::LiveFace, 10);
        let (sink, mut rx) = ChannelSink::new();
        ctx.run_enroll(Some(Box::new(sink))).unwrap();

        let mut last = None;
        while let Ok(update) = rx.try_recv() {
            last = Some(update);
        }
        let last = last.unwrap();
        assert_eq!(last.state, PipelineState::Succeeded);
        assert_eq!(last.percent, 100);
        assert!(last
            .checks
            .iter()
            .all(|c| c.status == facegate_core::CheckStatus::Passed));
    }
}
