//! Audio mixer: per-source gain, mute, level metering, and the combined
//! output track.
//!
//! Unknown source ids are treated as no-ops rather than errors because UI
//! controls routinely race ahead of source teardown.

use std::collections::BTreeMap;
use std::ops::ControlFlow;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use lectern_common::{spawn_periodic, TaskHandle};
use lectern_media_core::MediaTrack;
use lectern_session_model::SourceKind;

const LEVEL_DECAY: f32 = 0.85;

/// Level reading for one channel.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AudioLevelData {
    pub source: SourceKind,
    /// Smoothed RMS of the input, `[0.0, 1.0]`.
    pub level: f32,
    /// Peak absolute sample of the most recent block.
    pub peak: f32,
    pub volume: f32,
    pub muted: bool,
}

/// Linear-interpolating rate converter fed from a capture track.
#[derive(Debug, Default)]
struct Resampler {
    /// Input samples not yet fully consumed.
    pending: Vec<f32>,
    /// Read position into `pending`, in input samples.
    pos: f64,
}

impl Resampler {
    /// Pull up to `len` samples at `out_rate` from `track`. Returns fewer
    /// when the track runs dry.
    fn pull(&mut self, track: &MediaTrack, out_rate: u32, len: usize) -> Vec<f32> {
        let in_rate = track.sample_rate();
        if in_rate == 0 || out_rate == 0 || in_rate == out_rate {
            return track.drain_audio(len);
        }
        if len == 0 {
            return Vec::new();
        }

        let step = in_rate as f64 / out_rate as f64;
        let needed = (self.pos + (len - 1) as f64 * step).floor() as usize + 2;
        if needed > self.pending.len() {
            let more = track.drain_audio(needed - self.pending.len());
            self.pending.extend(more);
        }

        let mut out = Vec::with_capacity(len);
        while out.len() < len {
            let idx = self.pos.floor() as usize;
            if idx + 1 >= self.pending.len() {
                break;
            }
            let frac = (self.pos - idx as f64) as f32;
            let (a, b) = (self.pending[idx], self.pending[idx + 1]);
            out.push(a + (b - a) * frac);
            self.pos += step;
        }

        let consumed = (self.pos.floor() as usize).min(self.pending.len());
        self.pending.drain(..consumed);
        self.pos -= consumed as f64;
        out
    }
}

#[derive(Debug)]
struct AudioChannel {
    track: MediaTrack,
    resampler: Resampler,
    volume: f32,
    muted: bool,
    level: f32,
    peak: f32,
    /// Set when the source was removed; the channel ramps to silence
    /// and is then dropped.
    fading_since: Option<Instant>,
}

impl AudioChannel {
    fn new(track: MediaTrack) -> Self {
        Self {
            track,
            resampler: Resampler::default(),
            volume: 1.0,
            muted: false,
            level: 0.0,
            peak: 0.0,
            fading_since: None,
        }
    }

    fn fade_gain(&self, now: Instant, fade_out: Duration) -> f32 {
        match self.fading_since {
            None => 1.0,
            Some(_) if fade_out.is_zero() => 0.0,
            Some(since) => {
                let t = now.saturating_duration_since(since).as_secs_f32() / fade_out.as_secs_f32();
                (1.0 - t).max(0.0)
            }
        }
    }

    fn meter(&mut self, block: &[f32]) {
        if block.is_empty() {
            self.level *= LEVEL_DECAY;
            self.peak *= LEVEL_DECAY;
            return;
        }
        let sum_sq: f32 = block.iter().map(|s| s * s).sum();
        let rms = (sum_sq / block.len() as f32).sqrt().min(1.0);
        self.level = rms.max(self.level * LEVEL_DECAY);
        self.peak = block.iter().fold(0.0f32, |m, s| m.max(s.abs())).min(1.0);
    }
}

#[derive(Debug)]
struct MixerState {
    channels: BTreeMap<SourceKind, AudioChannel>,
    fade_out: Duration,
}

/// Combines every unmuted channel into one mono track.
#[derive(Debug)]
pub struct AudioMixer {
    state: Arc<Mutex<MixerState>>,
    monitor: Mutex<Option<TaskHandle>>,
}

impl AudioMixer {
    pub fn new(fade_out: Duration) -> Self {
        Self {
            state: Arc::new(Mutex::new(MixerState {
                channels: BTreeMap::new(),
                fade_out,
            })),
            monitor: Mutex::new(None),
        }
    }

    /// Route a source's audio track into the mix. Replaces any channel
    /// (including a fading one) for the same source, keeping its gain.
    pub fn add_channel(&self, source: SourceKind, track: MediaTrack) {
        let mut state = self.state.lock();
        let mut channel = AudioChannel::new(track);
        if let Some(previous) = state.channels.get(&source) {
            channel.volume = previous.volume;
            channel.muted = previous.muted;
        }
        state.channels.insert(source, channel);
        tracing::debug!(%source, "Audio channel added");
    }

    /// Begin fading a channel out. Returns `false` for unknown sources.
    pub fn remove_channel(&self, source: SourceKind) -> bool {
        let mut state = self.state.lock();
        match state.channels.get_mut(&source) {
            Some(channel) => {
                if channel.fading_since.is_none() {
                    channel.fading_since = Some(Instant::now());
                    tracing::debug!(%source, "Audio channel fading out");
                }
                true
            }
            None => false,
        }
    }

    /// Drop every channel immediately.
    pub fn clear(&self) {
        self.state.lock().channels.clear();
    }

    pub fn has_channel(&self, source: SourceKind) -> bool {
        self.state
            .lock()
            .channels
            .get(&source)
            .map(|c| c.fading_since.is_none())
            .unwrap_or(false)
    }

    /// Set channel gain, clamped to `[0.0, 1.0]`.
    pub fn set_volume(&self, source: SourceKind, volume: f32) -> bool {
        let mut state = self.state.lock();
        match state.channels.get_mut(&source) {
            Some(channel) => {
                channel.volume = if volume.is_finite() {
                    volume.clamp(0.0, 1.0)
                } else {
                    0.0
                };
                true
            }
            None => false,
        }
    }

    pub fn set_muted(&self, source: SourceKind, muted: bool) -> bool {
        let mut state = self.state.lock();
        match state.channels.get_mut(&source) {
            Some(channel) => {
                channel.muted = muted;
                true
            }
            None => false,
        }
    }

    pub fn volume(&self, source: SourceKind) -> Option<f32> {
        self.state.lock().channels.get(&source).map(|c| c.volume)
    }

    pub fn is_muted(&self, source: SourceKind) -> Option<bool> {
        self.state.lock().channels.get(&source).map(|c| c.muted)
    }

    pub fn levels(&self) -> Vec<AudioLevelData> {
        collect_levels(&self.state.lock())
    }

    /// Pull `samples` samples at `sample_rate` from every channel and
    /// return their mix. Channels captured at another rate are converted.
    /// Channels short on input are padded with silence.
    pub fn mix(&self, samples: usize, sample_rate: u32) -> Vec<f32> {
        let now = Instant::now();
        let mut out = vec![0.0f32; samples];
        let mut state = self.state.lock();
        let fade_out = state.fade_out;

        for channel in state.channels.values_mut() {
            let block = channel.resampler.pull(&channel.track, sample_rate, samples);
            channel.meter(&block);
            let gain = if channel.muted {
                0.0
            } else {
                channel.volume * channel.fade_gain(now, fade_out)
            };
            if gain <= 0.0 {
                continue;
            }
            for (o, s) in out.iter_mut().zip(block.iter()) {
                *o += s * gain;
            }
        }

        state
            .channels
            .retain(|_, c| c.fading_since.is_none() || c.fade_gain(now, fade_out) > 0.0);

        for s in out.iter_mut() {
            *s = s.clamp(-1.0, 1.0);
        }
        out
    }

    /// Invoke `callback` with all levels every `interval` until stopped.
    /// Replaces any previous monitor.
    pub fn start_level_monitoring<F>(&self, interval: Duration, callback: F)
    where
        F: Fn(Vec<AudioLevelData>) + Send + 'static,
    {
        let state = self.state.clone();
        let handle = spawn_periodic("audio-levels", interval, move |_| {
            let levels = collect_levels(&state.lock());
            callback(levels);
            ControlFlow::Continue(())
        });
        *self.monitor.lock() = Some(handle);
    }

    pub fn stop_level_monitoring(&self) {
        if let Some(mut handle) = self.monitor.lock().take() {
            handle.cancel();
        }
    }
}

fn collect_levels(state: &MixerState) -> Vec<AudioLevelData> {
    state
        .channels
        .iter()
        .filter(|(_, c)| c.fading_since.is_none())
        .map(|(source, c)| AudioLevelData {
            source: *source,
            level: c.level,
            peak: c.peak,
            volume: c.volume,
            muted: c.muted,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use lectern_session_model::TrackKind;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn mixer() -> AudioMixer {
        AudioMixer::new(Duration::from_millis(50))
    }

    #[test]
    fn mixes_unmuted_channels_with_gain() {
        let mixer = mixer();
        let (mic_feed, mic) = MediaTrack::channel(TrackKind::Audio, "mic", 48000);
        let (scr_feed, scr) = MediaTrack::channel(TrackKind::Audio, "screen", 48000);
        mixer.add_channel(SourceKind::Microphone, mic);
        mixer.add_channel(SourceKind::Screen, scr);

        mic_feed.push_audio(&[0.5; 4]);
        scr_feed.push_audio(&[0.2; 4]);
        assert!(mixer.set_volume(SourceKind::Screen, 0.5));

        let out = mixer.mix(4, 48000);
        assert!((out[0] - 0.6).abs() < 1e-6);

        mic_feed.push_audio(&[0.5; 4]);
        scr_feed.push_audio(&[0.2; 4]);
        assert!(mixer.set_muted(SourceKind::Microphone, true));
        let out = mixer.mix(4, 48000);
        assert!((out[0] - 0.1).abs() < 1e-6);
    }

    #[test]
    fn slower_capture_rate_is_upsampled() {
        let mixer = mixer();
        let (feed, mic) = MediaTrack::channel(TrackKind::Audio, "mic", 8000);
        mixer.add_channel(SourceKind::Microphone, mic);

        // 100ms at 8kHz fills 100ms at 48kHz instead of 1/6 of it.
        feed.push_audio(&[0.5; 800]);
        let out = mixer.mix(4800, 48000);
        assert_eq!(out.len(), 4800);
        let filled = out.iter().filter(|s| (**s - 0.5).abs() < 1e-6).count();
        assert!(filled >= 4790, "{filled}");

        feed.push_audio(&[0.5; 800]);
        let out = mixer.mix(4800, 48000);
        assert!(out[..4790].iter().all(|s| (*s - 0.5).abs() < 1e-6));
    }

    #[test]
    fn faster_capture_rate_is_downsampled() {
        let mixer = mixer();
        let (feed, mic) = MediaTrack::channel(TrackKind::Audio, "mic", 48000);
        mixer.add_channel(SourceKind::Microphone, mic.clone());

        let ramp: Vec<f32> = (0..4800).map(|i| i as f32 / 4800.0).collect();
        feed.push_audio(&ramp);
        let out = mixer.mix(800, 8000);
        assert_eq!(out.len(), 800);
        for (i, s) in out.iter().enumerate() {
            assert!((s - ramp[i * 6]).abs() < 1e-6);
        }
        assert!(mic.audio_available() <= 6);
    }

    #[test]
    fn unknown_sources_are_no_ops() {
        let mixer = mixer();
        assert!(!mixer.set_volume(SourceKind::Camera, 0.3));
        assert!(!mixer.set_muted(SourceKind::Camera, true));
        assert!(!mixer.remove_channel(SourceKind::Camera));
        assert_eq!(mixer.volume(SourceKind::Camera), None);
        assert_eq!(mixer.is_muted(SourceKind::Camera), None);
    }

    #[test]
    fn volume_is_clamped() {
        let mixer = mixer();
        let (_feed, mic) = MediaTrack::channel(TrackKind::Audio, "mic", 48000);
        mixer.add_channel(SourceKind::Microphone, mic);
        mixer.set_volume(SourceKind::Microphone, 3.0);
        assert_eq!(mixer.volume(SourceKind::Microphone), Some(1.0));
        mixer.set_volume(SourceKind::Microphone, -1.0);
        assert_eq!(mixer.volume(SourceKind::Microphone), Some(0.0));
    }

    #[test]
    fn levels_track_input_even_when_muted() {
        let mixer = mixer();
        let (feed, mic) = MediaTrack::channel(TrackKind::Audio, "mic", 48000);
        mixer.add_channel(SourceKind::Microphone, mic);
        mixer.set_muted(SourceKind::Microphone, true);
        feed.push_audio(&[0.4; 100]);
        mixer.mix(100, 48000);

        let levels = mixer.levels();
        assert_eq!(levels.len(), 1);
        assert!((levels[0].level - 0.4).abs() < 1e-4);
        assert!(levels[0].muted);
    }

    #[test]
    fn removed_channel_fades_then_disappears() {
        let mixer = mixer();
        let (feed, mic) = MediaTrack::channel(TrackKind::Audio, "mic", 48000);
        mixer.add_channel(SourceKind::Microphone, mic);
        assert!(mixer.remove_channel(SourceKind::Microphone));
        assert!(!mixer.has_channel(SourceKind::Microphone));
        assert!(mixer.levels().is_empty());

        std::thread::sleep(Duration::from_millis(80));
        feed.push_audio(&[0.9; 10]);
        let out = mixer.mix(10, 48000);
        assert!(out.iter().all(|s| *s == 0.0));
        assert_eq!(mixer.volume(SourceKind::Microphone), None);
    }

    #[tokio::test]
    async fn level_monitoring_invokes_callback_until_stopped() {
        let mixer = mixer();
        let (_feed, mic) = MediaTrack::channel(TrackKind::Audio, "mic", 48000);
        mixer.add_channel(SourceKind::Microphone, mic);

        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        mixer.start_level_monitoring(Duration::from_millis(5), move |levels| {
            assert_eq!(levels.len(), 1);
            counter.fetch_add(1, Ordering::SeqCst);
        });
        tokio::time::sleep(Duration::from_millis(50)).await;
        mixer.stop_level_monitoring();
        let seen = calls.load(Ordering::SeqCst);
        assert!(seen >= 2);

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(calls.load(Ordering::SeqCst), seen);
    }
}
