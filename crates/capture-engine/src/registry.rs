//! Source registry.
//!
//! Owns every acquired device. Consumers get `Arc<CaptureSource>` views;
//! only the registry holds the [`DeviceControl`] that can stop a device.
//! Acquisitions are reference-counted per kind so a preview and the
//! compositor share one physical device, and releases are deferred while
//! a recording is active.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use lectern_common::{CancellationToken, LecternError, LecternResult};
use lectern_media_core::{CaptureConstraints, CaptureSource, DeviceControl, DeviceProvider, DeviceRequest};
use lectern_session_model::{EngineEvent, SourceKind};

static NEXT_ENTRY_ID: AtomicU64 = AtomicU64::new(1);

struct RegistryEntry {
    id: u64,
    source: Arc<CaptureSource>,
    control: Box<dyn DeviceControl>,
    ref_count: usize,
    /// Count reached zero while recording; stop once recording ends.
    release_pending: bool,
    watchers: Vec<JoinHandle<()>>,
}

impl RegistryEntry {
    fn shutdown(mut self) {
        for watcher in self.watchers.drain(..) {
            watcher.abort();
        }
        self.control.stop();
    }
}

#[derive(Default)]
struct RegistryInner {
    entries: BTreeMap<SourceKind, RegistryEntry>,
    recording_active: bool,
}

/// Acquires, shares, and releases capture devices.
pub struct SourceRegistry {
    provider: Arc<dyn DeviceProvider>,
    constraints: CaptureConstraints,
    inner: Arc<Mutex<RegistryInner>>,
    events: broadcast::Sender<EngineEvent>,
}

impl std::fmt::Debug for SourceRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock();
        let counts: BTreeMap<SourceKind, usize> =
            inner.entries.iter().map(|(k, e)| (*k, e.ref_count)).collect();
        f.debug_struct("SourceRegistry")
            .field("provider", &self.provider.name())
            .field("ref_counts", &counts)
            .field("recording_active", &inner.recording_active)
            .finish()
    }
}

impl SourceRegistry {
    pub fn new(provider: Arc<dyn DeviceProvider>, events: broadcast::Sender<EngineEvent>) -> Self {
        Self {
            provider,
            constraints: CaptureConstraints::default(),
            inner: Arc::new(Mutex::new(RegistryInner::default())),
            events,
        }
    }

    pub fn with_constraints(mut self, constraints: CaptureConstraints) -> Self {
        self.constraints = constraints;
        self
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.events.subscribe()
    }

    /// Acquire a source, sharing an existing live acquisition if there
    /// is one.
    ///
    /// Screen capture asks for audio and video together first; if the
    /// platform refuses the audio part it retries video-only.
    pub async fn acquire(&self, kind: SourceKind) -> LecternResult<Arc<CaptureSource>> {
        if let Some(source) = self.share_existing(kind) {
            return Ok(source);
        }

        let request = DeviceRequest::for_kind(kind, self.constraints.clone());
        let stream = match self.provider.open(request.clone()).await {
            Err(LecternError::AudioUnavailable { message }) if kind == SourceKind::Screen => {
                tracing::warn!(reason = %message, "Screen audio unavailable, retrying video-only");
                self.provider.open(request.without_audio()).await?
            }
            other => other?,
        };

        let source = Arc::new(CaptureSource::new(kind, stream.tracks));
        let mut control = stream.control;

        let mut inner = self.inner.lock();
        if let Some(entry) = inner.entries.get_mut(&kind) {
            if entry.source.is_live() {
                // Lost a race with a concurrent acquire; keep theirs.
                entry.ref_count += 1;
                entry.release_pending = false;
                control.stop();
                return Ok(entry.source.clone());
            }
        }
        if let Some(stale) = inner.entries.remove(&kind) {
            stale.shutdown();
        }

        let id = NEXT_ENTRY_ID.fetch_add(1, Ordering::Relaxed);
        let watchers = self.spawn_watchers(kind, id, &source);
        inner.entries.insert(
            kind,
            RegistryEntry {
                id,
                source: source.clone(),
                control,
                ref_count: 1,
                release_pending: false,
                watchers,
            },
        );
        let (video, audio) = (source.video_track_count(), source.audio_track_count());
        tracing::info!(%kind, video, audio, provider = self.provider.name(), "Source acquired");
        Ok(source)
    }

    /// [`acquire`](Self::acquire), abandoned with `Cancelled` if `cancel`
    /// fires before the device is granted.
    pub async fn acquire_with_cancel(
        &self,
        kind: SourceKind,
        cancel: &CancellationToken,
    ) -> LecternResult<Arc<CaptureSource>> {
        tokio::select! {
            result = self.acquire(kind) => result,
            _ = cancel.cancelled() => {
                tracing::info!(%kind, "Source acquisition cancelled");
                Err(LecternError::Cancelled)
            }
        }
    }

    fn share_existing(&self, kind: SourceKind) -> Option<Arc<CaptureSource>> {
        let mut inner = self.inner.lock();
        let entry = inner.entries.get_mut(&kind)?;
        if !entry.source.is_live() {
            return None;
        }
        entry.ref_count += 1;
        entry.release_pending = false;
        tracing::debug!(%kind, ref_count = entry.ref_count, "Sharing existing source");
        Some(entry.source.clone())
    }

    /// Watch every track; an end we did not cause is a source loss.
    fn spawn_watchers(&self, kind: SourceKind, id: u64, source: &CaptureSource) -> Vec<JoinHandle<()>> {
        source
            .tracks()
            .iter()
            .map(|track| {
                let track = track.clone();
                let inner: Weak<Mutex<RegistryInner>> = Arc::downgrade(&self.inner);
                let events = self.events.clone();
                tokio::spawn(async move {
                    track.ended().await;
                    let Some(inner) = inner.upgrade() else {
                        return;
                    };
                    let lost = {
                        let mut guard = inner.lock();
                        match guard.entries.get(&kind) {
                            Some(entry) if entry.id == id => guard.entries.remove(&kind),
                            _ => None,
                        }
                    };
                    if let Some(entry) = lost {
                        tracing::warn!(%kind, track = %track.label(), "Source lost");
                        // Sibling watchers see the entry gone and exit.
                        let RegistryEntry { mut control, .. } = entry;
                        control.stop();
                        let _ = events.send(EngineEvent::SourceLost { kind });
                    }
                })
            })
            .collect()
    }

    /// Drop one reference. The device is stopped when the count reaches
    /// zero, unless a recording is active, in which case the stop waits
    /// until [`set_recording_active(false)`](Self::set_recording_active).
    /// Returns `false` if nothing of `kind` is held.
    pub fn release(&self, kind: SourceKind) -> bool {
        let mut inner = self.inner.lock();
        let recording = inner.recording_active;
        let Some(entry) = inner.entries.get_mut(&kind) else {
            return false;
        };
        entry.ref_count = entry.ref_count.saturating_sub(1);
        if entry.ref_count > 0 {
            tracing::debug!(%kind, ref_count = entry.ref_count, "Source reference released");
            return true;
        }
        if recording {
            entry.release_pending = true;
            tracing::debug!(%kind, "Release deferred until recording ends");
            return true;
        }
        if let Some(entry) = inner.entries.remove(&kind) {
            entry.shutdown();
            tracing::info!(%kind, "Source released");
        }
        true
    }

    /// Mark whether a recording is in progress. Clearing the flag stops
    /// every device whose release was deferred.
    pub fn set_recording_active(&self, active: bool) {
        let mut inner = self.inner.lock();
        inner.recording_active = active;
        if active {
            return;
        }
        let pending: Vec<SourceKind> = inner
            .entries
            .iter()
            .filter(|(_, e)| e.release_pending && e.ref_count == 0)
            .map(|(k, _)| *k)
            .collect();
        for kind in pending {
            if let Some(entry) = inner.entries.remove(&kind) {
                entry.shutdown();
                tracing::info!(%kind, "Deferred source release completed");
            }
        }
    }

    pub fn is_recording_active(&self) -> bool {
        self.inner.lock().recording_active
    }

    /// Stop every device regardless of reference counts.
    pub fn release_all(&self) {
        let entries = std::mem::take(&mut self.inner.lock().entries);
        for (kind, entry) in entries {
            entry.shutdown();
            tracing::info!(%kind, "Source released");
        }
    }

    pub fn get(&self, kind: SourceKind) -> Option<Arc<CaptureSource>> {
        self.inner.lock().entries.get(&kind).map(|e| e.source.clone())
    }

    pub fn ref_count(&self, kind: SourceKind) -> usize {
        self.inner
            .lock()
            .entries
            .get(&kind)
            .map(|e| e.ref_count)
            .unwrap_or(0)
    }

    pub fn kinds(&self) -> Vec<SourceKind> {
        self.inner.lock().entries.keys().copied().collect()
    }
}

impl Drop for SourceRegistry {
    fn drop(&mut self) {
        self.release_all();
    }
}
