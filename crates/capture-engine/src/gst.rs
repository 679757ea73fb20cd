//! GStreamer-backed encoding for the container codecs.
//!
//! Frames and samples are pushed into `appsrc` elements and encoded
//! output is pulled from an `appsink`, so chunking stays under the
//! session's control exactly as with the built-in encoder.

use std::sync::OnceLock;
use std::time::Duration;

use gst::prelude::*;
use gstreamer as gst;

use lectern_common::{LecternError, LecternResult};
use lectern_media_core::VideoFrame;
use lectern_session_model::Codec;

use crate::capabilities::CapabilityProbe;
use crate::encoder::{Encoder, EncoderSettings, EncoderStats};

fn init_gstreamer() -> LecternResult<()> {
    static GST_INIT: OnceLock<Result<(), String>> = OnceLock::new();
    let init_res = GST_INIT.get_or_init(|| gst::init().map_err(|e| e.to_string()));
    match init_res {
        Ok(()) => Ok(()),
        Err(e) => Err(LecternError::unsupported(format!(
            "Failed to initialize GStreamer: {e}"
        ))),
    }
}

/// Element factories each codec's pipeline needs.
fn required_elements(codec: Codec) -> &'static [&'static str] {
    match codec {
        Codec::Mp4H264 => &["x264enc", "h264parse", "avenc_aac", "aacparse", "mp4mux"],
        Codec::WebmVp8 => &["vp8enc", "opusenc", "webmmux"],
        Codec::WebmVp9 => &["vp9enc", "opusenc", "webmmux"],
        Codec::MkvH264 => &["x264enc", "h264parse", "opusenc", "matroskamux"],
        Codec::Lrv => &[],
    }
}

fn launch_string(settings: &EncoderSettings) -> LecternResult<String> {
    let fps = settings.fps.max(1);
    // Keyframe every two seconds.
    let keyint = fps.saturating_mul(2).max(2);
    let bps = settings.video_bitrate_bps().max(100_000);
    let kbps = bps / 1000;

    let (video_enc, audio_enc, mux) = match settings.codec {
        Codec::Mp4H264 => (
            format!("x264enc tune=zerolatency speed-preset=veryfast bitrate={kbps} key-int-max={keyint} ! h264parse"),
            "avenc_aac ! aacparse",
            "mp4mux fragment-duration=1000 streamable=true",
        ),
        Codec::WebmVp8 => (
            format!("vp8enc deadline=1 target-bitrate={bps} keyframe-max-dist={keyint}"),
            "opusenc",
            "webmmux streamable=true",
        ),
        Codec::WebmVp9 => (
            format!("vp9enc deadline=1 target-bitrate={bps} keyframe-max-dist={keyint}"),
            "opusenc",
            "webmmux streamable=true",
        ),
        Codec::MkvH264 => (
            format!("x264enc tune=zerolatency speed-preset=veryfast bitrate={kbps} key-int-max={keyint} ! h264parse"),
            "opusenc",
            "matroskamux streamable=true",
        ),
        Codec::Lrv => {
            return Err(LecternError::encoder(
                "lrv is encoded in-process, not through GStreamer",
            ))
        }
    };

    let (w, h) = (settings.resolution.width, settings.resolution.height);
    let rate = settings.sample_rate;
    Ok(format!(
        "appsrc name=video is-live=true format=time caps=video/x-raw,format=RGBA,width={w},height={h},framerate={fps}/1 \
         ! queue max-size-buffers=8 ! videoconvert ! video/x-raw,format=I420 ! {video_enc} ! queue ! {mux} name=mux \
         ! appsink name=sink sync=false \
         appsrc name=audio is-live=true format=time caps=audio/x-raw,format=F32LE,rate={rate},channels=1,layout=interleaved \
         ! queue ! audioconvert ! audioresample ! {audio_enc} ! queue ! mux."
    ))
}

/// Encoder driving an `appsrc ! encode ! mux ! appsink` pipeline.
pub struct GstEncoder {
    settings: EncoderSettings,
    pipeline: gst::Pipeline,
    video_src: gst::Element,
    audio_src: gst::Element,
    sink: gst::Element,
    running: bool,
    paused: bool,
    stats: EncoderStats,
}

impl GstEncoder {
    pub fn new(settings: EncoderSettings) -> LecternResult<Self> {
        init_gstreamer()?;
        let launch = launch_string(&settings)?;
        let element = gst::parse::launch(&launch)
            .map_err(|e| LecternError::encoder(format!("Failed to build pipeline: {e}")))?;
        let pipeline = element
            .dynamic_cast::<gst::Pipeline>()
            .map_err(|_| LecternError::encoder("Launch string did not produce a pipeline"))?;

        let by_name = |name: &str| {
            pipeline
                .by_name(name)
                .ok_or_else(|| LecternError::encoder(format!("pipeline has no element named {name}")))
        };
        let video_src = by_name("video")?;
        let audio_src = by_name("audio")?;
        let sink = by_name("sink")?;

        Ok(Self {
            settings,
            pipeline,
            video_src,
            audio_src,
            sink,
            running: false,
            paused: false,
            stats: EncoderStats::default(),
        })
    }

    fn name(&self) -> &'static str {
        self.settings.codec.extension()
    }

    fn push(&self, src: &gst::Element, data: Vec<u8>, timestamp_ns: u64) -> LecternResult<()> {
        let mut buffer = gst::Buffer::from_mut_slice(data);
        if let Some(buf) = buffer.get_mut() {
            buf.set_pts(gst::ClockTime::from_nseconds(timestamp_ns));
        }
        let flow = src.emit_by_name::<gst::FlowReturn>("push-buffer", &[&buffer]);
        if flow != gst::FlowReturn::Ok {
            return Err(LecternError::encoder(format!(
                "{} pipeline rejected buffer: {flow:?}",
                self.name()
            )));
        }
        Ok(())
    }

    fn pull_available(&mut self, timeout: gst::ClockTime) -> Vec<u8> {
        let mut out = Vec::new();
        loop {
            let sample = self
                .sink
                .emit_by_name::<Option<gst::Sample>>("try-pull-sample", &[&timeout.nseconds()]);
            let Some(sample) = sample else {
                break;
            };
            if let Some(buffer) = sample.buffer() {
                if let Ok(map) = buffer.map_readable() {
                    out.extend_from_slice(map.as_slice());
                }
            }
        }
        self.stats.bytes_out += out.len() as u64;
        out
    }

    fn drain_eos(&self) {
        let Some(bus) = self.pipeline.bus() else {
            return;
        };
        let deadline = Duration::from_secs(10);
        let start = std::time::Instant::now();
        loop {
            let elapsed = start.elapsed();
            if elapsed >= deadline {
                tracing::warn!(pipeline = self.name(), "EOS drain timed out after 10s");
                break;
            }
            let remaining = gst::ClockTime::from_nseconds((deadline - elapsed).as_nanos() as u64);
            match bus.timed_pop(remaining) {
                Some(msg) => match msg.view() {
                    gst::MessageView::Eos(_) => {
                        tracing::debug!(pipeline = self.name(), "EOS received; pipeline drained");
                        break;
                    }
                    gst::MessageView::Error(e) => {
                        tracing::warn!(
                            pipeline = self.name(),
                            error = %e.error(),
                            "Pipeline error during EOS drain"
                        );
                        break;
                    }
                    _ => {}
                },
                None => break,
            }
        }
    }
}

impl Encoder for GstEncoder {
    fn codec(&self) -> Codec {
        self.settings.codec
    }

    fn start(&mut self) -> LecternResult<()> {
        self.pipeline.set_state(gst::State::Playing).map_err(|e| {
            LecternError::encoder(format!("Failed to start {} pipeline: {e:?}", self.name()))
        })?;
        match self.pipeline.state(gst::ClockTime::from_seconds(5)) {
            (Ok(_), gst::State::Playing, _) => {}
            (Ok(_), state, _) => {
                tracing::warn!(pipeline = self.name(), ?state, "Pipeline did not reach Playing state within timeout");
            }
            (Err(e), _, _) => {
                return Err(LecternError::encoder(format!(
                    "{} pipeline failed to reach Playing state: {e:?}",
                    self.name()
                )));
            }
        }
        self.running = true;
        Ok(())
    }

    fn encode_video(&mut self, frame: &VideoFrame) -> LecternResult<()> {
        if !self.running {
            return Err(LecternError::encoder("encoder is not running"));
        }
        if self.paused {
            return Ok(());
        }
        let expected = self.settings.resolution;
        if frame.width != expected.width || frame.height != expected.height {
            return Err(LecternError::encoder(format!(
                "frame {}x{} does not match encoder resolution {expected}",
                frame.width, frame.height
            )));
        }
        self.push(&self.video_src, frame.data().to_vec(), frame.timestamp_ns)?;
        self.stats.frames_encoded += 1;
        Ok(())
    }

    fn encode_audio(&mut self, samples: &[f32], timestamp_ns: u64) -> LecternResult<()> {
        if !self.running {
            return Err(LecternError::encoder("encoder is not running"));
        }
        if self.paused || samples.is_empty() {
            return Ok(());
        }
        let bytes: Vec<u8> = samples.iter().flat_map(|s| s.to_le_bytes()).collect();
        self.push(&self.audio_src, bytes, timestamp_ns)?;
        self.stats.audio_samples_encoded += samples.len() as u64;
        Ok(())
    }

    fn pause(&mut self) -> LecternResult<()> {
        self.paused = true;
        Ok(())
    }

    fn resume(&mut self) -> LecternResult<()> {
        self.paused = false;
        Ok(())
    }

    fn take_output(&mut self) -> LecternResult<Vec<u8>> {
        Ok(self.pull_available(gst::ClockTime::ZERO))
    }

    fn finish(&mut self) -> LecternResult<Vec<u8>> {
        if !self.running {
            return Err(LecternError::encoder("encoder is not running"));
        }
        for src in [&self.video_src, &self.audio_src] {
            let _ = src.emit_by_name::<gst::FlowReturn>("end-of-stream", &[]);
        }
        self.drain_eos();
        let out = self.pull_available(gst::ClockTime::from_mseconds(100));
        self.pipeline.set_state(gst::State::Null).map_err(|e| {
            LecternError::encoder(format!("Failed to stop {} pipeline: {e:?}", self.name()))
        })?;
        self.running = false;
        Ok(out)
    }

    fn is_running(&self) -> bool {
        self.running
    }

    fn stats(&self) -> EncoderStats {
        self.stats.clone()
    }
}

impl Drop for GstEncoder {
    fn drop(&mut self) {
        if self.running {
            let _ = self.pipeline.set_state(gst::State::Null);
        }
    }
}

/// Reports what the installed GStreamer plugins can encode.
#[derive(Debug, Clone, Copy, Default)]
pub struct GstProbe;

impl GstProbe {
    fn has_elements(names: &[&str]) -> bool {
        init_gstreamer().is_ok()
            && names
                .iter()
                .all(|name| gst::ElementFactory::find(name).is_some())
    }
}

impl CapabilityProbe for GstProbe {
    fn name(&self) -> &str {
        "gstreamer"
    }

    fn can_composite(&self) -> bool {
        true
    }

    fn can_record(&self) -> bool {
        true
    }

    fn supports(&self, codec: Codec) -> bool {
        codec != Codec::Lrv
            && Self::has_elements(&["appsrc", "appsink", "videoconvert", "audioconvert"])
            && Self::has_elements(required_elements(codec))
    }
}
