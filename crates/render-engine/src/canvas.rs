//! Output canvas and pixel blending.

use lectern_media_core::VideoFrame;
use lectern_session_model::Rect;

/// The shared RGBA8 output buffer the render loop draws into.
#[derive(Debug, Clone)]
pub struct Canvas {
    width: u32,
    height: u32,
    data: Vec<u8>,
}

impl Canvas {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            data: vec![0; width as usize * height as usize * 4],
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn byte_len(&self) -> usize {
        self.data.len()
    }

    pub fn clear(&mut self, rgba: [u8; 4]) {
        for px in self.data.chunks_exact_mut(4) {
            px.copy_from_slice(&rgba);
        }
    }

    /// Draw `frame` scaled to fit inside `rect` (aspect preserved,
    /// centred) and alpha-blended with `opacity`.
    pub fn draw_fit(&mut self, frame: &VideoFrame, rect: &Rect, opacity: f64) {
        let alpha_scale = (opacity.clamp(0.0, 1.0) * 256.0).round() as u32;
        if alpha_scale == 0 || frame.width == 0 || frame.height == 0 {
            return;
        }
        let (rx, ry, rw, rh) = rect.to_pixels(self.width, self.height);
        if rw == 0 || rh == 0 {
            return;
        }

        let scale = (rw as f64 / frame.width as f64).min(rh as f64 / frame.height as f64);
        let dw = ((frame.width as f64 * scale).round() as u32).clamp(1, rw);
        let dh = ((frame.height as f64 * scale).round() as u32).clamp(1, rh);
        let dx = rx + (rw - dw) / 2;
        let dy = ry + (rh - dh) / 2;

        let src = frame.data();
        let src_stride = frame.width as usize * 4;
        let dst_stride = self.width as usize * 4;
        let columns: Vec<usize> = (0..dw)
            .map(|x| ((x as u64 * frame.width as u64) / dw as u64) as usize * 4)
            .collect();

        for y in 0..dh {
            let out_y = (dy + y) as usize;
            if out_y >= self.height as usize {
                break;
            }
            let sy = ((y as u64 * frame.height as u64) / dh as u64) as usize;
            let src_row = &src[sy * src_stride..(sy + 1) * src_stride];
            let dst_row_start = out_y * dst_stride;

            for (x, src_off) in columns.iter().enumerate() {
                let out_x = dx as usize + x;
                if out_x >= self.width as usize {
                    break;
                }
                let d = dst_row_start + out_x * 4;
                let s = &src_row[*src_off..*src_off + 4];
                let a = (s[3] as u32 * alpha_scale) >> 8;
                if a >= 255 {
                    self.data[d..d + 3].copy_from_slice(&s[..3]);
                    self.data[d + 3] = 255;
                    continue;
                }
                let inv = 255 - a;
                for c in 0..3 {
                    let blended = (s[c] as u32 * a + self.data[d + c] as u32 * inv) / 255;
                    self.data[d + c] = blended as u8;
                }
                self.data[d + 3] = 255;
            }
        }
    }

    /// Snapshot the canvas as a frame.
    pub fn to_frame(&self, timestamp_ns: u64) -> VideoFrame {
        VideoFrame::from_rgba(self.width, self.height, self.data.clone(), timestamp_ns)
            .unwrap_or_else(|| VideoFrame::solid(self.width, self.height, [0, 0, 0, 255], timestamp_ns))
    }
}
