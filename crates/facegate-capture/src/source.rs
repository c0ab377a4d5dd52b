//! The FrameSource boundary and non-hardware implementations.
//!
//! Any capture mechanism only needs to implement [`FrameSource`]: the
//! hardware camera ([`crate::V4l2Source`]), the deterministic
//! [`SyntheticSource`] used by tests and diagnostics, and the image-file
//! backed [`FixtureSource`].

use crate::frame::{self, Frame};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SourceError {
    #[error("device not found: {0}")]
    DeviceNotFound(String),
    #[error("device busy")]
    DeviceBusy,
    #[error("capture failed: {0}")]
    CaptureFailed(String),
    #[error("format negotiation failed: {0}")]
    FormatNegotiationFailed(String),
    #[error("streaming not supported")]
    StreamingNotSupported,
    #[error("source not started")]
    NotStarted,
    #[error("fixture decode failed: {0}")]
    FixtureDecode(String),
    #[error(transparent)]
    Frame(#[from] frame::FrameError),
}

/// A stream of frames with an explicit start/stop lifecycle.
///
/// `Send` so a source can be moved onto the acquisition thread.
pub trait FrameSource: Send {
    /// Acquire the underlying resource. Must be called before `get_frame`.
    fn start(&mut self) -> Result<(), SourceError>;

    /// Release the underlying resource. Idempotent.
    fn stop(&mut self);

    /// Capture the next frame.
    fn get_frame(&mut self) -> Result<Frame, SourceError>;

    /// Frame dimensions (width, height).
    fn dimensions(&self) -> (u32, u32);
}

// ── Synthetic scenes ──────────────────────────────────────────────────────────

/// What the synthetic generator renders.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyntheticScene {
    /// A textured face blob with per-frame sensor noise, slight positional
    /// wobble, and a slow brightness "breathing" cycle — passes the quality,
    /// liveness, and anti-spoofing gates.
    LiveFace,
    /// A flat reproduction: static pixels, raster row banding, and a specular
    /// glare patch — fails liveness and anti-spoofing.
    StaticPhoto,
    /// Background only, no face — never clears the detection gate.
    Empty,
}

const SYNTH_WIDTH: u32 = 160;
const SYNTH_HEIGHT: u32 = 120;

/// Deterministic frame generator.
///
/// Every pixel is a pure function of (x, y, sequence, scene) — repeated runs
/// produce byte-identical frames, which the pipeline tests rely on.
pub struct SyntheticSource {
    scene: SyntheticScene,
    width: u32,
    height: u32,
    sequence: u32,
    started: bool,
}

impl SyntheticSource {
    pub fn new(scene: SyntheticScene) -> Self {
        Self {
            scene,
            width: SYNTH_WIDTH,
            height: SYNTH_HEIGHT,
            sequence: 0,
            started: false,
        }
    }

    /// Render a single frame of `scene` at sequence `seq` without a source.
    pub fn render(scene: SyntheticScene, seq: u32) -> Frame {
        render_scene(scene, SYNTH_WIDTH, SYNTH_HEIGHT, seq)
    }

    /// Render `count` consecutive frames, oldest first.
    pub fn render_sequence(scene: SyntheticScene, count: usize) -> Vec<Frame> {
        (0..count as u32).map(|s| Self::render(scene, s)).collect()
    }
}

impl FrameSource for SyntheticSource {
    fn start(&mut self) -> Result<(), SourceError> {
        self.started = true;
        Ok(())
    }

    fn stop(&mut self) {
        self.started = false;
    }

    fn get_frame(&mut self) -> Result<Frame, SourceError> {
        if !self.started {
            return Err(SourceError::NotStarted);
        }
        let frame = render_scene(self.scene, self.width, self.height, self.sequence);
        self.sequence = self.sequence.wrapping_add(1);
        Ok(frame)
    }

    fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }
}

/// A source that plays a fixed schedule of scenes, one per captured frame.
///
/// The last scene repeats once the schedule is exhausted. Used to model a
/// subject who cooperates for a while and then holds up a photo, etc.
pub struct ScriptedSource {
    schedule: Vec<SyntheticScene>,
    sequence: u32,
    started: bool,
}

impl ScriptedSource {
    pub fn new(schedule: Vec<SyntheticScene>) -> Self {
        assert!(!schedule.is_empty(), "schedule must not be empty");
        Self {
            schedule,
            sequence: 0,
            started: false,
        }
    }
}

impl FrameSource for ScriptedSource {
    fn start(&mut self) -> Result<(), SourceError> {
        self.started = true;
        Ok(())
    }

    fn stop(&mut self) {
        self.started = false;
    }

    fn get_frame(&mut self) -> Result<Frame, SourceError> {
        if !self.started {
            return Err(SourceError::NotStarted);
        }
        let idx = (self.sequence as usize).min(self.schedule.len() - 1);
        let frame = render_scene(self.schedule[idx], SYNTH_WIDTH, SYNTH_HEIGHT, self.sequence);
        self.sequence = self.sequence.wrapping_add(1);
        Ok(frame)
    }

    fn dimensions(&self) -> (u32, u32) {
        (SYNTH_WIDTH, SYNTH_HEIGHT)
    }
}

// ── Image-file fixtures ───────────────────────────────────────────────────────

/// Frame source backed by image files on disk, cycling through them.
pub struct FixtureSource {
    paths: Vec<std::path::PathBuf>,
    frames: Vec<Frame>,
    cursor: usize,
    sequence: u32,
}

impl FixtureSource {
    pub fn new(paths: Vec<std::path::PathBuf>) -> Self {
        Self {
            paths,
            frames: Vec::new(),
            cursor: 0,
            sequence: 0,
        }
    }
}

impl FrameSource for FixtureSource {
    fn start(&mut self) -> Result<(), SourceError> {
        self.frames.clear();
        for path in &self.paths {
            let img = image::open(path)
                .map_err(|e| SourceError::FixtureDecode(format!("{}: {e}", path.display())))?
                .to_rgba8();
            let (w, h) = img.dimensions();
            self.frames.push(Frame::from_rgba(img.into_raw(), w, h, 0)?);
        }
        if self.frames.is_empty() {
            return Err(SourceError::FixtureDecode("no fixture files".into()));
        }
        self.cursor = 0;
        Ok(())
    }

    fn stop(&mut self) {
        self.frames.clear();
    }

    fn get_frame(&mut self) -> Result<Frame, SourceError> {
        if self.frames.is_empty() {
            return Err(SourceError::NotStarted);
        }
        let mut frame = self.frames[self.cursor].clone();
        frame.sequence = self.sequence;
        frame.timestamp = std::time::Instant::now();
        self.cursor = (self.cursor + 1) % self.frames.len();
        self.sequence = self.sequence.wrapping_add(1);
        Ok(frame)
    }

    fn dimensions(&self) -> (u32, u32) {
        self.frames
            .first()
            .map(|f| (f.width, f.height))
            .unwrap_or((0, 0))
    }
}

// ── Scene renderer ────────────────────────────────────────────────────────────

/// Integer hash for reproducible per-pixel noise (xorshift-multiply mix).
fn pixel_hash(x: u32, y: u32, salt: u32) -> u32 {
    let mut h = x
        .wrapping_mul(0x9E37_79B9)
        ^ y.wrapping_mul(0x85EB_CA6B)
        ^ salt.wrapping_mul(0xC2B2_AE35);
    h ^= h >> 16;
    h = h.wrapping_mul(0x7FEB_352D);
    h ^= h >> 15;
    h = h.wrapping_mul(0x846C_A68B);
    h ^= h >> 16;
    h
}

/// Uniform noise in [-amp, amp].
fn noise(x: u32, y: u32, salt: u32, amp: i32) -> i32 {
    (pixel_hash(x, y, salt) % (2 * amp as u32 + 1)) as i32 - amp
}

fn render_scene(scene: SyntheticScene, width: u32, height: u32, seq: u32) -> Frame {
    let mut data = Vec::with_capacity((width * height * 4) as usize);

    // Face geometry: centered ellipse covering roughly a quarter of the frame.
    let wobble = (seq % 3) as i32 - 1;
    let cx = width as i32 / 2 + wobble;
    let cy = height as i32 / 2;
    let rx = (width as f32 * 0.23) as i32;
    let ry = (height as f32 * 0.33) as i32;
    let breathing = 14.0 * (seq as f32 * 0.9).sin();

    for y in 0..height {
        for x in 0..width {
            let luma = match scene {
                SyntheticScene::LiveFace => {
                    live_pixel(x, y, seq, cx, cy, rx, ry, breathing)
                }
                SyntheticScene::StaticPhoto => {
                    // Fixed geometry: a reproduction does not wobble or breathe.
                    photo_pixel(x, y, width as i32 / 2, cy, rx, ry)
                }
                SyntheticScene::Empty => {
                    let base = 45 + (x / 16) as i32;
                    (base + noise(x, y, seq, 10)).clamp(10, 240) as u8
                }
            };
            data.extend_from_slice(&[luma, luma, luma, 255]);
        }
    }

    Frame {
        data,
        width,
        height,
        timestamp: std::time::Instant::now(),
        sequence: seq,
    }
}

#[allow(clippy::too_many_arguments)]
fn live_pixel(x: u32, y: u32, seq: u32, cx: i32, cy: i32, rx: i32, ry: i32, breathing: f32) -> u8 {
    let dx = x as i32 - cx;
    let dy = y as i32 - cy;
    let inside = (dx * dx) as f32 / (rx * rx) as f32 + (dy * dy) as f32 / (ry * ry) as f32 <= 1.0;

    let luma = if inside {
        let mut value = 150 + breathing as i32 + noise(x, y, seq, 28);
        // Dark eye and mouth blobs give the face internal structure.
        for (fx, fy) in [
            (cx - (rx * 2) / 5, cy - (ry * 3) / 10),
            (cx + (rx * 2) / 5, cy - (ry * 3) / 10),
            (cx, cy + (ry * 9) / 20),
        ] {
            let ex = x as i32 - fx;
            let ey = y as i32 - fy;
            if ex * ex + ey * ey <= 16 {
                value -= 60;
            }
        }
        value
    } else {
        45 + (x / 16) as i32 + noise(x, y, seq, 10)
    };

    luma.clamp(10, 240) as u8
}

fn photo_pixel(x: u32, y: u32, cx: i32, cy: i32, rx: i32, ry: i32) -> u8 {
    // Specular glare on the glossy print, saturating a patch of the face.
    let gx = x as i32 - (cx - rx / 2);
    let gy = y as i32 - (cy - ry / 2);
    if (0..28).contains(&gx) && (0..24).contains(&gy) {
        return 255;
    }

    let dx = x as i32 - cx;
    let dy = y as i32 - cy;
    let inside = (dx * dx) as f32 / (rx * rx) as f32 + (dy * dy) as f32 / (ry * ry) as f32 <= 1.0;

    // Raster row banding across the whole print; noise is seq-independent.
    let band = if y % 2 == 0 { 12 } else { -12 };
    let base = if inside { 150 } else { 45 + (x / 16) as i32 };
    (base + band + noise(x, y, 0, 2)).clamp(10, 254) as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_frame_requires_start() {
        let mut src = SyntheticSource::new(SyntheticScene::LiveFace);
        assert!(matches!(src.get_frame(), Err(SourceError::NotStarted)));
        src.start().unwrap();
        assert!(src.get_frame().is_ok());
        src.stop();
        assert!(src.get_frame().is_err());
    }

    #[test]
    fn test_synthetic_is_deterministic() {
        let a = SyntheticSource::render(SyntheticScene::LiveFace, 3);
        let b = SyntheticSource::render(SyntheticScene::LiveFace, 3);
        assert_eq!(a.data, b.data);
    }

    #[test]
    fn test_live_frames_change_between_sequences() {
        let a = SyntheticSource::render(SyntheticScene::LiveFace, 0);
        let b = SyntheticSource::render(SyntheticScene::LiveFace, 1);
        assert_ne!(a.data, b.data);
    }

    #[test]
    fn test_static_photo_is_static() {
        let a = SyntheticSource::render(SyntheticScene::StaticPhoto, 0);
        let b = SyntheticSource::render(SyntheticScene::StaticPhoto, 7);
        assert_eq!(a.data, b.data);
    }

    #[test]
    fn test_photo_has_saturated_glare() {
        let frame = SyntheticSource::render(SyntheticScene::StaticPhoto, 0);
        let saturated = frame.luma_plane().iter().filter(|&&p| p >= 250).count();
        let fraction = saturated as f32 / frame.pixel_count() as f32;
        assert!(fraction > 0.02, "glare fraction = {fraction}");
    }

    #[test]
    fn test_live_has_no_saturation() {
        let frame = SyntheticSource::render(SyntheticScene::LiveFace, 0);
        assert!(frame.luma_plane().iter().all(|&p| p < 250));
    }

    #[test]
    fn test_live_face_brighter_than_background() {
        let frame = SyntheticSource::render(SyntheticScene::LiveFace, 0);
        let center = frame.luma_at(frame.width / 2 + 3, frame.height / 2 + 3);
        let corner = frame.luma_at(2, 2);
        assert!(center as i32 - corner as i32 > 40);
    }

    #[test]
    fn test_scripted_source_follows_schedule() {
        let mut src = ScriptedSource::new(vec![
            SyntheticScene::LiveFace,
            SyntheticScene::StaticPhoto,
        ]);
        src.start().unwrap();
        let first = src.get_frame().unwrap();
        let second = src.get_frame().unwrap();
        let third = src.get_frame().unwrap(); // schedule exhausted, repeats last
        assert_eq!(first.data, SyntheticSource::render(SyntheticScene::LiveFace, 0).data);
        assert_eq!(second.data, SyntheticSource::render(SyntheticScene::StaticPhoto, 1).data);
        assert_eq!(third.data, SyntheticSource::render(SyntheticScene::StaticPhoto, 2).data);
    }

    #[test]
    fn test_render_sequence_order() {
        let frames = SyntheticSource::render_sequence(SyntheticScene::LiveFace, 5);
        assert_eq!(frames.len(), 5);
        for (i, f) in frames.iter().enumerate() {
            assert_eq!(f.sequence, i as u32);
        }
    }
}
