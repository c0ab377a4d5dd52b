//! Pipeline assembly: the capture thread, the worker thread, and the handle
//! that D-Bus handlers talk to.
//!
//! Two dedicated OS threads per pipeline. The capture thread is the only
//! writer of the frame history; it samples the source at a fixed interval
//! so the temporal checks see evenly spaced frames. The worker thread runs
//! one job at a time. The handle is clone-safe and async.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use facegate_capture::{FrameHistory, FrameSource};
use facegate_core::{
    AntiSpoofingAnalyzer, AntiSpoofingConfig, ComparisonResult, DecisionPolicy,
    EmbeddingAggregator, EmbeddingExtractor, EnrollmentTemplate, ExtractorConfig, FaceDetector,
    LivenessConfig, LivenessDetector, SimilarityComparator,
};
use tokio::sync::{mpsc, oneshot};
use tracing::{info, warn};

use crate::error::PipelineError;
use crate::progress::{PipelineState, ProgressSink};
use crate::worker::{WorkerContext, WorkerRequest};

/// Consecutive capture failures before the source is declared dead.
const MAX_CAPTURE_FAULTS: u32 = 10;

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// How often the capture thread samples the source.
    pub capture_interval: Duration,
    /// Wall-clock budget for one enroll or verify run.
    pub timeout: Duration,
    /// Minimum detection quality to proceed past the quality gate.
    pub min_quality: f32,
    /// Samples attempted per enrollment run.
    pub required_samples: usize,
    /// Accepted samples an enrollment template needs; fewer fails the run.
    pub min_samples: usize,
    /// Ring buffer depth for the frame history.
    pub history_capacity: usize,
    pub liveness: LivenessConfig,
    pub antispoof: AntiSpoofingConfig,
    pub extractor: ExtractorConfig,
    pub policy: DecisionPolicy,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            capture_interval: Duration::from_millis(100),
            timeout: Duration::from_secs(30),
            min_quality: 0.3,
            required_samples: 5,
            min_samples: 3,
            history_capacity: 10,
            liveness: LivenessConfig::default(),
            antispoof: AntiSpoofingConfig::default(),
            extractor: ExtractorConfig::default(),
            policy: DecisionPolicy::default(),
        }
    }
}

/// Clone-safe handle to a running pipeline.
#[derive(Clone)]
pub struct PipelineHandle {
    tx: mpsc::Sender<WorkerRequest>,
    cancel: Arc<AtomicBool>,
    in_flight: Arc<AtomicBool>,
    state: Arc<Mutex<PipelineState>>,
    running: Arc<AtomicBool>,
    timeout: Duration,
}

impl PipelineHandle {
    /// Run an enrollment. Rejects with [`PipelineError::Busy`] if another
    /// run is in flight.
    pub async fn enroll(
        &self,
        sink: Option<Box<dyn ProgressSink>>,
    ) -> Result<EnrollmentTemplate, PipelineError> {
        if self.in_flight.swap(true, Ordering::SeqCst) {
            return Err(PipelineError::Busy);
        }
        let (reply_tx, reply_rx) = oneshot::channel();
        if self
            .tx
            .send(WorkerRequest::Enroll {
                reply: reply_tx,
                sink,
            })
            .await
            .is_err()
        {
            self.in_flight.store(false, Ordering::SeqCst);
            return Err(PipelineError::ChannelClosed);
        }
        self.await_reply(reply_rx).await
    }

    /// Run a verification against a stored template.
    pub async fn verify(
        &self,
        template: EnrollmentTemplate,
        sink: Option<Box<dyn ProgressSink>>,
    ) -> Result<ComparisonResult, PipelineError> {
        if self.in_flight.swap(true, Ordering::SeqCst) {
            return Err(PipelineError::Busy);
        }
        let (reply_tx, reply_rx) = oneshot::channel();
        if self
            .tx
            .send(WorkerRequest::Verify {
                template,
                reply: reply_tx,
                sink,
            })
            .await
            .is_err()
        {
            self.in_flight.store(false, Ordering::SeqCst);
            return Err(PipelineError::ChannelClosed);
        }
        self.await_reply(reply_rx).await
    }

    /// Request cancellation of the run in flight. The worker notices at its
    /// next stage boundary; the run fails with [`PipelineError::Cancelled`].
    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::SeqCst);
    }

    /// Current pipeline phase, for status reporting.
    pub fn state(&self) -> PipelineState {
        self.state
            .lock()
            .map(|s| *s)
            .unwrap_or(PipelineState::Idle)
    }

    /// Stop the capture thread and let the worker drain. Consumes the handle;
    /// clones become inert (their requests fail with `ChannelClosed` once
    /// every handle is gone).
    pub fn shutdown(self) {
        self.running.store(false, Ordering::SeqCst);
    }

    /// Wait for the worker's reply. The worker enforces the job deadline
    /// itself; the slightly longer wait here is a backstop against a wedged
    /// worker thread. A caller that gives up does not free the slot — the
    /// worker clears the in-flight flag only when the job actually ends.
    async fn await_reply<T>(
        &self,
        reply_rx: oneshot::Receiver<Result<T, PipelineError>>,
    ) -> Result<T, PipelineError> {
        match tokio::time::timeout(self.timeout + Duration::from_secs(1), reply_rx).await {
            Err(_) => Err(PipelineError::Timeout),
            Ok(Err(_)) => Err(PipelineError::ChannelClosed),
            Ok(Ok(result)) => result,
        }
    }
}

/// Start the capture and worker threads and return the handle.
///
/// The source is started synchronously so an unusable device fails the
/// daemon at startup rather than on the first authentication attempt.
pub fn spawn_pipeline(
    mut source: Box<dyn FrameSource>,
    config: PipelineConfig,
) -> Result<PipelineHandle, PipelineError> {
    source.start()?;
    let (width, height) = source.dimensions();
    info!(width, height, "frame source started");

    let history = Arc::new(Mutex::new(FrameHistory::new(config.history_capacity)));
    let running = Arc::new(AtomicBool::new(true));
    let capture_fault = Arc::new(Mutex::new(None::<String>));
    let cancel = Arc::new(AtomicBool::new(false));
    let in_flight = Arc::new(AtomicBool::new(false));
    let state = Arc::new(Mutex::new(PipelineState::Idle));

    {
        let history = Arc::clone(&history);
        let running = Arc::clone(&running);
        let capture_fault = Arc::clone(&capture_fault);
        let interval = config.capture_interval;

        std::thread::Builder::new()
            .name("facegate-capture".into())
            .spawn(move || {
                let mut consecutive_faults = 0u32;
                while running.load(Ordering::SeqCst) {
                    match source.get_frame() {
                        Ok(frame) => {
                            consecutive_faults = 0;
                            if let Ok(mut h) = history.lock() {
                                h.push(frame);
                            }
                        }
                        Err(e) => {
                            consecutive_faults += 1;
                            warn!(error = %e, consecutive_faults, "frame capture failed");
                            if consecutive_faults >= MAX_CAPTURE_FAULTS {
                                if let Ok(mut fault) = capture_fault.lock() {
                                    *fault = Some(e.to_string());
                                }
                                break;
                            }
                        }
                    }
                    std::thread::sleep(interval);
                }
                // Single teardown path: stop the stream and drop any
                // retained frames with it.
                if let Ok(mut h) = history.lock() {
                    h.clear();
                }
                source.stop();
                info!("capture thread exiting");
            })
            .map_err(|e| PipelineError::CaptureFailed(e.to_string()))?;
    }

    let (tx, rx) = mpsc::channel::<WorkerRequest>(4);
    {
        let mut extractor = EmbeddingExtractor::new(config.extractor);
        extractor.init();

        let ctx = WorkerContext {
            history,
            detector: FaceDetector::new(),
            extractor,
            liveness: LivenessDetector::new(config.liveness.clone()),
            antispoof: AntiSpoofingAnalyzer::new(config.antispoof.clone()),
            aggregator: EmbeddingAggregator::new(config.min_samples),
            comparator: SimilarityComparator::new(),
            policy: config.policy,
            min_quality: config.min_quality,
            required_samples: config.required_samples,
            poll_interval: config.capture_interval,
            timeout: config.timeout,
            cancel: Arc::clone(&cancel),
            capture_fault,
            state: Arc::clone(&state),
        };
        let in_flight = Arc::clone(&in_flight);

        std::thread::Builder::new()
            .name("facegate-worker".into())
            .spawn(move || ctx.run_loop(rx, in_flight))
            .map_err(|e| PipelineError::CaptureFailed(e.to_string()))?;
    }

    Ok(PipelineHandle {
        tx,
        cancel,
        in_flight,
        state,
        running,
        timeout: config.timeout,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use facegate_capture::{SyntheticScene, SyntheticSource};

    fn fast_config() -> PipelineConfig {
        PipelineConfig {
            capture_interval: Duration::from_millis(5),
            timeout: Duration::from_secs(2),
            ..PipelineConfig::default()
        }
    }

    fn live_pipeline(config: PipelineConfig) -> PipelineHandle {
        spawn_pipeline(
            Box::new(SyntheticSource::new(SyntheticScene::LiveFace)),
            config,
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_enroll_then_verify_roundtrip() {
        let handle = live_pipeline(fast_config());
        let template = handle.enroll(None).await.unwrap();
        assert_eq!(template.embedding.len(), 256);
        assert_eq!(template.sample_count, 5);

        let result = handle.verify(template, None).await.unwrap();
        assert!(result.similarity >= 0.8);
        handle.shutdown();
    }

    #[tokio::test]
    async fn test_photo_attack_rejected() {
        let handle = spawn_pipeline(
            Box::new(SyntheticSource::new(SyntheticScene::StaticPhoto)),
            fast_config(),
        )
        .unwrap();
        let err = handle.enroll(None).await.unwrap_err();
        assert!(
            matches!(
                err,
                PipelineError::LivenessFailed { .. } | PipelineError::SpoofSuspected { .. }
            ),
            "unexpected error: {err}"
        );
        handle.shutdown();
    }

    #[tokio::test]
    async fn test_second_submission_rejected_while_busy() {
        let handle = live_pipeline(fast_config());
        let first = {
            let handle = handle.clone();
            tokio::spawn(async move { handle.enroll(None).await })
        };
        // Give the first job time to claim the slot and start acquiring.
        tokio::time::sleep(Duration::from_millis(10)).await;

        let err = handle.enroll(None).await.unwrap_err();
        assert!(matches!(err, PipelineError::Busy));

        assert!(first.await.unwrap().is_ok());
        handle.shutdown();
    }

    #[tokio::test]
    async fn test_run_times_out_when_frames_never_accumulate() {
        let config = PipelineConfig {
            capture_interval: Duration::from_millis(50),
            timeout: Duration::from_millis(60),
            ..PipelineConfig::default()
        };
        let handle = live_pipeline(config);
        let err = handle.enroll(None).await.unwrap_err();
        assert!(matches!(err, PipelineError::Timeout), "got: {err}");

        // The timed-out run released its slot: a fresh attempt is accepted
        // (and times out on its own budget) rather than rejected as busy.
        let err = handle.enroll(None).await.unwrap_err();
        assert!(matches!(err, PipelineError::Timeout), "got: {err}");
        handle.shutdown();
    }

    #[tokio::test]
    async fn test_cancel_aborts_run_in_flight() {
        let config = PipelineConfig {
            // History needs 5 frames at 30ms apiece, leaving a wide window
            // to cancel during acquisition.
            capture_interval: Duration::from_millis(30),
            timeout: Duration::from_secs(5),
            ..PipelineConfig::default()
        };
        let handle = live_pipeline(config);
        let job = {
            let handle = handle.clone();
            tokio::spawn(async move { handle.enroll(None).await })
        };
        tokio::time::sleep(Duration::from_millis(40)).await;
        handle.cancel();

        let err = job.await.unwrap().unwrap_err();
        assert!(matches!(err, PipelineError::Cancelled), "got: {err}");
        handle.shutdown();
    }

    #[tokio::test]
    async fn test_slot_frees_after_each_run() {
        let handle = live_pipeline(fast_config());
        for _ in 0..2 {
            handle.enroll(None).await.unwrap();
        }
        assert_eq!(handle.state(), PipelineState::Idle);
        handle.shutdown();
    }

    #[tokio::test]
    async fn test_dead_source_surfaces_capture_fault() {
        struct FailingSource;
        impl FrameSource for FailingSource {
            fn start(&mut self) -> Result<(), facegate_capture::SourceError> {
                Ok(())
            }
            fn stop(&mut self) {}
            fn get_frame(
                &mut self,
            ) -> Result<facegate_capture::Frame, facegate_capture::SourceError> {
                Err(facegate_capture::SourceError::CaptureFailed(
                    "gone".to_string(),
                ))
            }
            fn dimensions(&self) -> (u32, u32) {
                (160, 120)
            }
        }

        let config = PipelineConfig {
            capture_interval: Duration::from_millis(1),
            timeout: Duration::from_secs(2),
            ..PipelineConfig::default()
        };
        let handle = spawn_pipeline(Box::new(FailingSource), config).unwrap();
        let err = handle.enroll(None).await.unwrap_err();
        assert!(matches!(err, PipelineError::CaptureFailed(_)), "got: {err}");
        handle.shutdown();
    }
}
