//! Frame type and pixel-format conversions — YUYV/GREY to RGBA, luminance,
//! dark-frame detection.

const CHANNELS: usize = 4;

/// A captured RGBA camera frame.
///
/// Immutable once produced: sources build it, pipeline stages only read it.
#[derive(Clone)]
pub struct Frame {
    /// RGBA pixel data (width * height * 4 bytes).
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub timestamp: std::time::Instant,
    pub sequence: u32,
}

impl Frame {
    /// Build a frame from an RGBA buffer, validating its length.
    pub fn from_rgba(
        data: Vec<u8>,
        width: u32,
        height: u32,
        sequence: u32,
    ) -> Result<Self, FrameError> {
        let expected = (width as usize) * (height as usize) * CHANNELS;
        if data.len() != expected {
            return Err(FrameError::InvalidLength {
                expected,
                actual: data.len(),
            });
        }
        Ok(Self {
            data,
            width,
            height,
            timestamp: std::time::Instant::now(),
            sequence,
        })
    }

    /// Number of pixels in the frame.
    pub fn pixel_count(&self) -> usize {
        (self.width as usize) * (self.height as usize)
    }

    /// Luminance of the pixel at (x, y) using the BT.601 integer weights.
    #[inline]
    pub fn luma_at(&self, x: u32, y: u32) -> u8 {
        let idx = (y as usize * self.width as usize + x as usize) * CHANNELS;
        let r = self.data[idx] as u32;
        let g = self.data[idx + 1] as u32;
        let b = self.data[idx + 2] as u32;
        ((77 * r + 150 * g + 29 * b) >> 8) as u8
    }

    /// Extract the full luminance plane (width * height bytes).
    pub fn luma_plane(&self) -> Vec<u8> {
        let mut luma = Vec::with_capacity(self.pixel_count());
        for px in self.data.chunks_exact(CHANNELS) {
            let r = px[0] as u32;
            let g = px[1] as u32;
            let b = px[2] as u32;
            luma.push(((77 * r + 150 * g + 29 * b) >> 8) as u8);
        }
        luma
    }

    /// Average pixel luminance (0.0–255.0).
    pub fn mean_luma(&self) -> f32 {
        if self.data.is_empty() {
            return 0.0;
        }
        let sum: u64 = self
            .data
            .chunks_exact(CHANNELS)
            .map(|px| {
                let r = px[0] as u64;
                let g = px[1] as u64;
                let b = px[2] as u64;
                (77 * r + 150 * g + 29 * b) >> 8
            })
            .sum();
        sum as f32 / self.pixel_count() as f32
    }
}

/// Convert packed YUYV (4:2:2) to RGBA by expanding the Y channel.
///
/// YUYV packs two pixels per 4 bytes: [Y0, U, Y1, V]. Chroma is discarded —
/// IR cameras carry no useful color and the pipeline operates on luminance.
pub fn yuyv_to_rgba(yuyv: &[u8], width: u32, height: u32) -> Result<Vec<u8>, FrameError> {
    let expected = (width * height * 2) as usize;
    if yuyv.len() < expected {
        return Err(FrameError::InvalidLength {
            expected,
            actual: yuyv.len(),
        });
    }
    let mut rgba = Vec::with_capacity((width * height) as usize * CHANNELS);
    for y in yuyv[..expected].iter().step_by(2) {
        rgba.extend_from_slice(&[*y, *y, *y, 255]);
    }
    Ok(rgba)
}

/// Expand an 8-bit grayscale buffer to RGBA.
pub fn gray_to_rgba(gray: &[u8], width: u32, height: u32) -> Result<Vec<u8>, FrameError> {
    let expected = (width * height) as usize;
    if gray.len() < expected {
        return Err(FrameError::InvalidLength {
            expected,
            actual: gray.len(),
        });
    }
    let mut rgba = Vec::with_capacity(expected * CHANNELS);
    for g in &gray[..expected] {
        rgba.extend_from_slice(&[*g, *g, *g, 255]);
    }
    Ok(rgba)
}

/// Check if a luminance plane is dark.
///
/// Returns true if more than `threshold_pct` of pixels fall below 32.
pub fn is_dark_frame(luma: &[u8], threshold_pct: f32) -> bool {
    if luma.is_empty() {
        return true;
    }
    let dark_count = luma.iter().filter(|&&p| p < 32).count();
    (dark_count as f32 / luma.len() as f32) > threshold_pct
}

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("invalid buffer length: expected {expected}, got {actual}")]
    InvalidLength { expected: usize, actual: usize },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_yuyv_to_rgba() {
        // 2x1 image: [Y0=100, U=128, Y1=200, V=128]
        let yuyv = vec![100, 128, 200, 128];
        let rgba = yuyv_to_rgba(&yuyv, 2, 1).unwrap();
        assert_eq!(rgba, vec![100, 100, 100, 255, 200, 200, 200, 255]);
    }

    #[test]
    fn test_yuyv_invalid_length() {
        let yuyv = vec![100, 128]; // too short for 2x1
        assert!(yuyv_to_rgba(&yuyv, 2, 1).is_err());
    }

    #[test]
    fn test_gray_to_rgba() {
        let gray = vec![7u8, 9];
        let rgba = gray_to_rgba(&gray, 2, 1).unwrap();
        assert_eq!(rgba, vec![7, 7, 7, 255, 9, 9, 9, 255]);
    }

    #[test]
    fn test_frame_length_validated() {
        assert!(Frame::from_rgba(vec![0u8; 15], 2, 2, 0).is_err());
        assert!(Frame::from_rgba(vec![0u8; 16], 2, 2, 0).is_ok());
    }

    #[test]
    fn test_luma_gray_pixel_is_identity() {
        // BT.601 integer weights sum to 256, so a gray pixel maps to itself.
        let frame = Frame::from_rgba(vec![128, 128, 128, 255], 1, 1, 0).unwrap();
        assert_eq!(frame.luma_at(0, 0), 128);
        assert_eq!(frame.luma_plane(), vec![128]);
    }

    #[test]
    fn test_mean_luma() {
        let mut data = vec![0u8, 0, 0, 255];
        data.extend_from_slice(&[200, 200, 200, 255]);
        let frame = Frame::from_rgba(data, 2, 1, 0).unwrap();
        let mean = frame.mean_luma();
        assert!((mean - 100.0).abs() < 1.0, "mean = {mean}");
    }

    #[test]
    fn test_dark_frame_all_black() {
        assert!(is_dark_frame(&vec![0u8; 1000], 0.95));
    }

    #[test]
    fn test_dark_frame_normal() {
        assert!(!is_dark_frame(&vec![128u8; 1000], 0.95));
    }

    #[test]
    fn test_dark_frame_empty() {
        assert!(is_dark_frame(&[], 0.95));
    }

    #[test]
    fn test_dark_frame_borderline() {
        // 96% dark => dark; 94% dark => not dark
        let mut mostly = vec![10u8; 960];
        mostly.extend(vec![128u8; 40]);
        assert!(is_dark_frame(&mostly, 0.95));

        let mut brighter = vec![10u8; 940];
        brighter.extend(vec![128u8; 60]);
        assert!(!is_dark_frame(&brighter, 0.95));
    }
}
