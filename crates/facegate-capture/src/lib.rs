//! facegate-capture — frame acquisition for the biometric pipeline.
//!
//! Defines the RGBA [`Frame`] type, the bounded [`FrameHistory`] buffer
//! used by the temporal analyses (liveness, anti-spoofing), and the
//! [`FrameSource`] boundary with V4L2, synthetic, and image-file
//! implementations.

pub mod camera;
pub mod frame;
pub mod history;
pub mod source;

pub use camera::V4l2Source;
pub use frame::{Frame, FrameError};
pub use history::FrameHistory;
pub use source::{
    FixtureSource, FrameSource, ScriptedSource, SourceError, SyntheticScene, SyntheticSource,
};
