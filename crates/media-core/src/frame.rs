//! Decoded video frames.

use std::sync::Arc;

/// One decoded RGBA8 video frame. Pixel data is shared, so clones are
/// cheap and frames can be handed across threads without copying.
#[derive(Debug, Clone, PartialEq)]
pub struct VideoFrame {
    pub width: u32,
    pub height: u32,
    /// Capture timestamp in nanoseconds on the producer's clock.
    pub timestamp_ns: u64,
    data: Arc<[u8]>,
}

impl VideoFrame {
    /// Wrap RGBA8 pixel data. Returns `None` if the buffer length does not
    /// match `width * height * 4`.
    pub fn from_rgba(
        width: u32,
        height: u32,
        data: impl Into<Arc<[u8]>>,
        timestamp_ns: u64,
    ) -> Option<Self> {
        let data = data.into();
        if data.len() != width as usize * height as usize * 4 {
            return None;
        }
        Some(Self {
            width,
            height,
            timestamp_ns,
            data,
        })
    }

    /// A frame filled with one colour.
    pub fn solid(width: u32, height: u32, rgba: [u8; 4], timestamp_ns: u64) -> Self {
        let pixels = width as usize * height as usize;
        let mut data = Vec::with_capacity(pixels * 4);
        for _ in 0..pixels {
            data.extend_from_slice(&rgba);
        }
        Self {
            width,
            height,
            timestamp_ns,
            data: data.into(),
        }
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn byte_len(&self) -> usize {
        self.data.len()
    }

    /// RGBA value at `(x, y)`, or `None` outside the frame.
    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 4]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let i = (y as usize * self.width as usize + x as usize) * 4;
        Some([
            self.data[i],
            self.data[i + 1],
            self.data[i + 2],
            self.data[i + 3],
        ])
    }

    /// Whether the frame is real picture content. Some platforms deliver a
    /// 2×2 placeholder right after a device is opened; those frames are
    /// not decodable.
    pub fn is_decodable(&self) -> bool {
        self.width > 2 && self.height > 2 && !self.data.is_empty()
    }

    pub fn aspect_ratio(&self) -> f64 {
        self.width as f64 / self.height.max(1) as f64
    }
}
