//! Progress reporting from the worker to interested callers.

use facegate_core::{CheckStatus, SecurityCheck};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// Where a pipeline run currently is. Published alongside the check list so
/// a UI can show both a phase label and per-check status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineState {
    Idle,
    Initializing,
    Detecting,
    Capturing,
    LivenessCheck,
    AntiSpoofCheck,
    Extracting,
    Aggregating,
    Comparing,
    Succeeded,
    Failed,
}

/// One progress snapshot. `percent` counts settled checks over the total,
/// never wall-clock time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressUpdate {
    pub state: PipelineState,
    pub percent: u8,
    pub checks: Vec<SecurityCheck>,
}

/// Receives progress snapshots during a run. Implementations must never
/// block: the worker publishes from its stage loop.
pub trait ProgressSink: Send {
    fn publish(&self, update: ProgressUpdate);
}

/// Sink backed by an unbounded tokio channel. Dropped receivers are fine;
/// publishing to a closed channel is silently discarded.
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<ProgressUpdate>,
}

impl ChannelSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ProgressUpdate>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl ProgressSink for ChannelSink {
    fn publish(&self, update: ProgressUpdate) {
        let _ = self.tx.send(update);
    }
}

/// Tracks the check list for one run and pushes snapshots to the sink.
pub struct ProgressTracker {
    checks: Vec<SecurityCheck>,
    state: PipelineState,
    sink: Option<Box<dyn ProgressSink>>,
}

impl ProgressTracker {
    pub fn new(check_names: &[(&str, &str)], sink: Option<Box<dyn ProgressSink>>) -> Self {
        let checks = check_names
            .iter()
            .map(|(name, desc)| SecurityCheck::pending(name, desc))
            .collect();
        Self {
            checks,
            state: PipelineState::Idle,
            sink,
        }
    }

    pub fn set_state(&mut self, state: PipelineState) {
        self.state = state;
        self.publish();
    }

    pub fn begin(&mut self, index: usize) {
        if let Some(check) = self.checks.get_mut(index) {
            check.status = CheckStatus::Checking;
        }
        self.publish();
    }

    pub fn pass(&mut self, index: usize) {
        if let Some(check) = self.checks.get_mut(index) {
            check.status = CheckStatus::Passed;
        }
        self.publish();
    }

    pub fn fail(&mut self, index: usize) {
        if let Some(check) = self.checks.get_mut(index) {
            check.status = CheckStatus::Failed;
        }
        self.state = PipelineState::Failed;
        self.publish();
    }

    /// Completed-stage progress, 0 to 100.
    pub fn percent(&self) -> u8 {
        if self.checks.is_empty() {
            return 0;
        }
        let done = self
            .checks
            .iter()
            .filter(|c| matches!(c.status, CheckStatus::Passed | CheckStatus::Failed))
            .count();
        (done * 100 / self.checks.len()) as u8
    }

    fn publish(&self) {
        if let Some(sink) = &self.sink {
            sink.publish(ProgressUpdate {
                state: self.state,
                percent: self.percent(),
                checks: self.checks.clone(),
            });
        }
    }
}
