//! Encoder contract and the built-in `lrv` encoder.
//!
//! An [`Encoder`] consumes composited frames and mixed audio and hands
//! back encoded bytes in arbitrary slices through `take_output`; the
//! session turns each slice into a chunk. Concatenating every slice in
//! order gives a complete, playable stream.

use std::sync::atomic::{AtomicU64, Ordering};

use lectern_common::{LecternError, LecternResult, Quality, Resolution};
use lectern_media_core::VideoFrame;
use lectern_session_model::Codec;

/// Parameters an encoder is created with.
#[derive(Debug, Clone, PartialEq)]
pub struct EncoderSettings {
    pub codec: Codec,
    pub resolution: Resolution,
    pub fps: u32,
    pub sample_rate: u32,
    pub quality: Quality,
}

impl EncoderSettings {
    pub fn video_bitrate_bps(&self) -> u64 {
        self.quality
            .video_bitrate_bps(self.resolution.width, self.resolution.height, self.fps)
    }
}

/// Runtime statistics from an encoder.
#[derive(Debug, Clone, Default)]
pub struct EncoderStats {
    pub frames_encoded: u64,
    pub audio_samples_encoded: u64,
    pub bytes_out: u64,
}

/// A live encoder instance.
pub trait Encoder: Send {
    fn codec(&self) -> Codec;

    fn start(&mut self) -> LecternResult<()>;

    fn encode_video(&mut self, frame: &VideoFrame) -> LecternResult<()>;

    /// Mono samples in `[-1.0, 1.0]` starting at `timestamp_ns`.
    fn encode_audio(&mut self, samples: &[f32], timestamp_ns: u64) -> LecternResult<()>;

    /// While paused, input is discarded.
    fn pause(&mut self) -> LecternResult<()>;

    fn resume(&mut self) -> LecternResult<()>;

    /// Encoded bytes produced since the previous call.
    fn take_output(&mut self) -> LecternResult<Vec<u8>>;

    /// Flush and return the remaining bytes. The encoder is unusable
    /// afterwards.
    fn finish(&mut self) -> LecternResult<Vec<u8>>;

    fn is_running(&self) -> bool;

    fn stats(&self) -> EncoderStats;
}

/// Creates encoder instances.
pub trait EncoderFactory: Send + Sync {
    fn create(&self, settings: &EncoderSettings) -> LecternResult<Box<dyn Encoder>>;

    /// Number of instances created so far.
    fn instances_created(&self) -> u64;
}

/// Built-in factory: `lrv` in-process, the container codecs through
/// GStreamer when that feature is enabled.
#[derive(Debug, Default)]
pub struct DefaultEncoderFactory {
    created: AtomicU64,
}

impl DefaultEncoderFactory {
    pub fn new() -> Self {
        Self::default()
    }
}

impl EncoderFactory for DefaultEncoderFactory {
    fn create(&self, settings: &EncoderSettings) -> LecternResult<Box<dyn Encoder>> {
        let encoder: Box<dyn Encoder> = match settings.codec {
            Codec::Lrv => Box::new(FramedEncoder::new(settings.clone())),
            #[cfg(feature = "gstreamer")]
            _ => Box::new(crate::gst::GstEncoder::new(settings.clone())?),
            #[cfg(not(feature = "gstreamer"))]
            other => {
                return Err(LecternError::encoder(format!(
                    "{} requires the gstreamer feature",
                    other.mime_type()
                )))
            }
        };
        let n = self.created.fetch_add(1, Ordering::SeqCst) + 1;
        tracing::info!(codec = settings.codec.mime_type(), instance = n, "Encoder created");
        Ok(encoder)
    }

    fn instances_created(&self) -> u64 {
        self.created.load(Ordering::SeqCst)
    }
}

pub const LRV_MAGIC: &[u8; 4] = b"LRV1";
const LRV_HEADER_LEN: usize = 20;
const TAG_VIDEO: u8 = b'V';
const TAG_AUDIO: u8 = b'A';

/// Lightweight raw video: a header followed by tagged records.
///
/// ```text
/// header: "LRV1" width:u32 height:u32 fps:u32 sample_rate:u32
/// video:  'V' ts:u64 width:u32 height:u32 len:u32 rle-rgba[len]
/// audio:  'A' ts:u64 samples:u32 pcm-i16[samples]
/// ```
///
/// All integers little-endian. Video is run-length coded as
/// `(count:u8, rgba:[u8; 4])` pairs.
#[derive(Debug)]
pub struct FramedEncoder {
    settings: EncoderSettings,
    buffer: Vec<u8>,
    started: bool,
    paused: bool,
    finished: bool,
    stats: EncoderStats,
}

impl FramedEncoder {
    pub fn new(settings: EncoderSettings) -> Self {
        Self {
            settings,
            buffer: Vec::new(),
            started: false,
            paused: false,
            finished: false,
            stats: EncoderStats::default(),
        }
    }

    fn ensure_running(&self) -> LecternResult<()> {
        if !self.started || self.finished {
            return Err(LecternError::encoder("lrv encoder is not running"));
        }
        Ok(())
    }
}

impl Encoder for FramedEncoder {
    fn codec(&self) -> Codec {
        Codec::Lrv
    }

    fn start(&mut self) -> LecternResult<()> {
        if self.started {
            return Err(LecternError::encoder("lrv encoder already started"));
        }
        self.buffer.extend_from_slice(LRV_MAGIC);
        for v in [
            self.settings.resolution.width,
            self.settings.resolution.height,
            self.settings.fps,
            self.settings.sample_rate,
        ] {
            self.buffer.extend_from_slice(&v.to_le_bytes());
        }
        self.started = true;
        Ok(())
    }

    fn encode_video(&mut self, frame: &VideoFrame) -> LecternResult<()> {
        self.ensure_running()?;
        if self.paused {
            return Ok(());
        }
        let payload = rle_encode(frame.data());
        self.buffer.push(TAG_VIDEO);
        self.buffer.extend_from_slice(&frame.timestamp_ns.to_le_bytes());
        self.buffer.extend_from_slice(&frame.width.to_le_bytes());
        self.buffer.extend_from_slice(&frame.height.to_le_bytes());
        self.buffer.extend_from_slice(&(payload.len() as u32).to_le_bytes());
        self.buffer.extend_from_slice(&payload);
        self.stats.frames_encoded += 1;
        Ok(())
    }

    fn encode_audio(&mut self, samples: &[f32], timestamp_ns: u64) -> LecternResult<()> {
        self.ensure_running()?;
        if self.paused || samples.is_empty() {
            return Ok(());
        }
        self.buffer.push(TAG_AUDIO);
        self.buffer.extend_from_slice(&timestamp_ns.to_le_bytes());
        self.buffer.extend_from_slice(&(samples.len() as u32).to_le_bytes());
        for s in samples {
            let pcm = (s.clamp(-1.0, 1.0) * i16::MAX as f32) as i16;
            self.buffer.extend_from_slice(&pcm.to_le_bytes());
        }
        self.stats.audio_samples_encoded += samples.len() as u64;
        Ok(())
    }

    fn pause(&mut self) -> LecternResult<()> {
        self.ensure_running()?;
        self.paused = true;
        Ok(())
    }

    fn resume(&mut self) -> LecternResult<()> {
        self.ensure_running()?;
        self.paused = false;
        Ok(())
    }

    fn take_output(&mut self) -> LecternResult<Vec<u8>> {
        let out = std::mem::take(&mut self.buffer);
        self.stats.bytes_out += out.len() as u64;
        Ok(out)
    }

    fn finish(&mut self) -> LecternResult<Vec<u8>> {
        self.ensure_running()?;
        self.finished = true;
        self.take_output()
    }

    fn is_running(&self) -> bool {
        self.started && !self.finished
    }

    fn stats(&self) -> EncoderStats {
        self.stats.clone()
    }
}

fn rle_encode(rgba: &[u8]) -> Vec<u8> {
    let mut out = Vec::new();
    let mut pixels = rgba.chunks_exact(4);
    let Some(first) = pixels.next() else {
        return out;
    };
    let mut current = first;
    let mut run: u8 = 1;
    for px in pixels {
        if px == current && run < u8::MAX {
            run += 1;
        } else {
            out.push(run);
            out.extend_from_slice(current);
            current = px;
            run = 1;
        }
    }
    out.push(run);
    out.extend_from_slice(current);
    out
}

/// Summary of an `lrv` stream.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LrvSummary {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub sample_rate: u32,
    pub video_frames: u64,
    pub audio_samples: u64,
    /// Audio samples that decode to exact silence.
    pub silent_samples: u64,
    /// Timestamp of the last record, nanoseconds.
    pub last_timestamp_ns: u64,
}

impl LrvSummary {
    pub fn audio_secs(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.audio_samples as f64 / self.sample_rate as f64
    }
}

/// Walk an `lrv` byte stream and validate its structure.
pub fn inspect_lrv(bytes: &[u8]) -> LecternResult<LrvSummary> {
    if bytes.len() < LRV_HEADER_LEN || &bytes[..4] != LRV_MAGIC {
        return Err(LecternError::encoder("not an lrv stream"));
    }
    let mut cursor = Cursor { bytes, pos: 4 };
    let mut summary = LrvSummary {
        width: cursor.u32()?,
        height: cursor.u32()?,
        fps: cursor.u32()?,
        sample_rate: cursor.u32()?,
        ..Default::default()
    };

    while cursor.pos < bytes.len() {
        let tag = cursor.take(1)?[0];
        let ts = cursor.u64()?;
        match tag {
            TAG_VIDEO => {
                let w = cursor.u32()? as u64;
                let h = cursor.u32()? as u64;
                let len = cursor.u32()? as usize;
                let payload = cursor.take(len)?;
                let pixels: u64 = payload.chunks_exact(5).map(|run| run[0] as u64).sum();
                if payload.len() % 5 != 0 || pixels != w * h {
                    return Err(LecternError::encoder(format!(
                        "corrupt video record at {ts}ns"
                    )));
                }
                summary.video_frames += 1;
            }
            TAG_AUDIO => {
                let n = cursor.u32()? as usize;
                let pcm = cursor.take(n * 2)?;
                summary.silent_samples += pcm
                    .chunks_exact(2)
                    .filter(|s| i16::from_le_bytes([s[0], s[1]]) == 0)
                    .count() as u64;
                summary.audio_samples += n as u64;
            }
            other => {
                return Err(LecternError::encoder(format!(
                    "unknown lrv record tag {other:#04x}"
                )))
            }
        }
        summary.last_timestamp_ns = summary.last_timestamp_ns.max(ts);
    }
    Ok(summary)
}

struct Cursor<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn take(&mut self, n: usize) -> LecternResult<&'a [u8]> {
        let end = self.pos.checked_add(n).filter(|end| *end <= self.bytes.len());
        let Some(end) = end else {
            return Err(LecternError::encoder("truncated lrv stream"));
        };
        let slice = &self.bytes[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn u32(&mut self) -> LecternResult<u32> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn u64(&mut self) -> LecternResult<u64> {
        let b = self.take(8)?;
        let mut arr = [0u8; 8];
        arr.copy_from_slice(b);
        Ok(u64::from_le_bytes(arr))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(codec: Codec) -> EncoderSettings {
        EncoderSettings {
            codec,
            resolution: Resolution::new(8, 4),
            fps: 30,
            sample_rate: 1000,
            quality: Quality::Medium,
        }
    }

    #[test]
    fn lrv_stream_is_the_concatenation_of_outputs() {
        let mut encoder = FramedEncoder::new(settings(Codec::Lrv));
        encoder.start().unwrap();
        encoder.encode_video(&VideoFrame::solid(8, 4, [1, 2, 3, 255], 0)).unwrap();
        let first = encoder.take_output().unwrap();

        encoder.encode_audio(&[0.5; 100], 10).unwrap();
        encoder.encode_audio(&[0.0; 20], 20).unwrap();
        encoder.encode_video(&VideoFrame::solid(8, 4, [9, 9, 9, 255], 33)).unwrap();
        let second = encoder.take_output().unwrap();
        let last = encoder.finish().unwrap();

        let mut all = first.clone();
        all.extend(second);
        all.extend(last);
        let summary = inspect_lrv(&all).unwrap();
        assert_eq!(summary.video_frames, 2);
        assert_eq!(summary.audio_samples, 120);
        assert_eq!(summary.silent_samples, 20);
        assert_eq!((summary.width, summary.height), (8, 4));
        assert_eq!(encoder.stats().bytes_out, all.len() as u64);
        assert!(!encoder.is_running());
    }

    #[test]
    fn paused_encoder_drops_input() {
        let mut encoder = FramedEncoder::new(settings(Codec::Lrv));
        encoder.start().unwrap();
        encoder.pause().unwrap();
        encoder.encode_video(&VideoFrame::solid(8, 4, [1, 2, 3, 255], 0)).unwrap();
        encoder.resume().unwrap();
        encoder.encode_audio(&[0.1; 10], 5).unwrap();
        let summary = inspect_lrv(&encoder.finish().unwrap()).unwrap();
        assert_eq!(summary.video_frames, 0);
        assert_eq!(summary.audio_samples, 10);
    }

    #[test]
    fn encoding_before_start_is_an_error() {
        let mut encoder = FramedEncoder::new(settings(Codec::Lrv));
        let err = encoder
            .encode_video(&VideoFrame::solid(8, 4, [0, 0, 0, 255], 0))
            .unwrap_err();
        assert!(matches!(err, LecternError::Encoder { .. }));
    }

    #[test]
    fn rle_collapses_runs() {
        let frame = VideoFrame::solid(300, 1, [5, 5, 5, 255], 0);
        let encoded = rle_encode(frame.data());
        assert_eq!(encoded.len(), 10);
        assert_eq!(encoded[0], 255);
        assert_eq!(encoded[5], 45);
    }

    #[test]
    fn truncated_stream_is_rejected() {
        let mut encoder = FramedEncoder::new(settings(Codec::Lrv));
        encoder.start().unwrap();
        encoder.encode_audio(&[0.1; 10], 0).unwrap();
        let bytes = encoder.finish().unwrap();
        assert!(inspect_lrv(&bytes[..bytes.len() - 3]).is_err());
    }

    #[test]
    fn factory_counts_instances() {
        let factory = DefaultEncoderFactory::new();
        assert!(factory.create(&settings(Codec::Lrv)).is_ok());
        assert_eq!(factory.instances_created(), 1);
    }

    #[cfg(not(feature = "gstreamer"))]
    #[test]
    fn container_codecs_need_gstreamer() {
        let factory = DefaultEncoderFactory::new();
        assert!(factory.create(&settings(Codec::Mp4H264)).is_err());
        assert_eq!(factory.instances_created(), 0);
    }
}
