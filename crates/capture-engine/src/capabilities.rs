//! Capability detection and codec negotiation.

use std::collections::HashSet;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use lectern_session_model::Codec;

/// Something that can answer what this machine supports.
pub trait CapabilityProbe: Send + Sync {
    fn name(&self) -> &str;
    fn can_composite(&self) -> bool;
    fn can_record(&self) -> bool;
    fn supports(&self, codec: Codec) -> bool;
}

/// The in-process renderer and `lrv` encoder. Always present.
#[derive(Debug, Clone, Copy, Default)]
pub struct BuiltinProbe;

impl CapabilityProbe for BuiltinProbe {
    fn name(&self) -> &str {
        "builtin"
    }

    fn can_composite(&self) -> bool {
        true
    }

    fn can_record(&self) -> bool {
        true
    }

    fn supports(&self, codec: Codec) -> bool {
        codec == Codec::Lrv
    }
}

/// Fixed answers, for tests and for forcing a configuration.
#[derive(Debug, Clone)]
pub struct StaticProbe {
    pub composite: bool,
    pub record: bool,
    pub codecs: Vec<Codec>,
}

impl StaticProbe {
    pub fn new(codecs: impl IntoIterator<Item = Codec>) -> Self {
        Self {
            composite: true,
            record: true,
            codecs: codecs.into_iter().collect(),
        }
    }

    pub fn without_compositing(mut self) -> Self {
        self.composite = false;
        self
    }

    pub fn without_recording(mut self) -> Self {
        self.record = false;
        self
    }
}

impl CapabilityProbe for StaticProbe {
    fn name(&self) -> &str {
        "static"
    }

    fn can_composite(&self) -> bool {
        self.composite
    }

    fn can_record(&self) -> bool {
        self.record
    }

    fn supports(&self, codec: Codec) -> bool {
        self.codecs.contains(&codec)
    }
}

/// Result of [`CapabilityNegotiator::detect`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Capabilities {
    pub can_composite: bool,
    pub can_record: bool,
    /// Supported codecs, most preferred first.
    pub supported_codecs: Vec<Codec>,
    pub warnings: Vec<String>,
}

/// Combines probes into one capability answer and picks a codec.
///
/// Any probe can contribute a codec. Compositing and recording are
/// available if every probe allows them.
pub struct CapabilityNegotiator {
    probes: Vec<Box<dyn CapabilityProbe>>,
    reported: Mutex<HashSet<String>>,
}

impl std::fmt::Debug for CapabilityNegotiator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<&str> = self.probes.iter().map(|p| p.name()).collect();
        f.debug_struct("CapabilityNegotiator")
            .field("probes", &names)
            .finish()
    }
}

impl Default for CapabilityNegotiator {
    fn default() -> Self {
        #[allow(unused_mut)]
        let mut probes: Vec<Box<dyn CapabilityProbe>> = vec![Box::new(BuiltinProbe)];
        #[cfg(feature = "gstreamer")]
        probes.push(Box::new(crate::gst::GstProbe));
        Self::new(probes)
    }
}

impl CapabilityNegotiator {
    pub fn new(probes: Vec<Box<dyn CapabilityProbe>>) -> Self {
        Self {
            probes,
            reported: Mutex::new(HashSet::new()),
        }
    }

    pub fn detect(&self) -> Capabilities {
        let can_composite = !self.probes.is_empty() && self.probes.iter().all(|p| p.can_composite());
        let can_record = !self.probes.is_empty() && self.probes.iter().all(|p| p.can_record());
        let supported_codecs: Vec<Codec> = Codec::PRIORITY
            .iter()
            .copied()
            .filter(|c| self.probes.iter().any(|p| p.supports(*c)))
            .collect();

        let mut warnings = Vec::new();
        if !can_record {
            warnings.push("Recording is not supported on this platform".to_string());
        }
        if !can_composite {
            warnings.push(
                "Compositing is unavailable; recording falls back to a single source".to_string(),
            );
        }
        match supported_codecs.first() {
            Some(best) if *best != Codec::PRIORITY[0] => warnings.push(format!(
                "Preferred codec {} unavailable; using {}",
                Codec::PRIORITY[0].mime_type(),
                best.mime_type()
            )),
            None => warnings.push(format!(
                "No preferred codec available; using {}",
                Codec::UNIVERSAL.mime_type()
            )),
            _ => {}
        }

        for warning in &warnings {
            self.report_once(warning);
        }

        Capabilities {
            can_composite,
            can_record,
            supported_codecs,
            warnings,
        }
    }

    /// First supported codec in priority order, or the universal fallback.
    pub fn select_codec(&self, capabilities: &Capabilities) -> Codec {
        let codec = capabilities
            .supported_codecs
            .first()
            .copied()
            .unwrap_or(Codec::UNIVERSAL);
        tracing::info!(codec = codec.mime_type(), "Codec selected");
        codec
    }

    /// Log a warning the first time it is seen. Returns whether it was new.
    pub fn report_once(&self, warning: &str) -> bool {
        let fresh = self.reported.lock().insert(warning.to_string());
        if fresh {
            tracing::warn!(warning, "Capability warning");
        }
        fresh
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codecs_come_back_in_priority_order() {
        let negotiator = CapabilityNegotiator::new(vec![
            Box::new(StaticProbe::new([Codec::MkvH264, Codec::WebmVp8])),
            Box::new(BuiltinProbe),
        ]);
        let caps = negotiator.detect();
        assert_eq!(
            caps.supported_codecs,
            vec![Codec::WebmVp8, Codec::MkvH264, Codec::Lrv]
        );
        assert_eq!(negotiator.select_codec(&caps), Codec::WebmVp8);
    }

    #[test]
    fn missing_specialised_codecs_fall_back_to_universal() {
        let negotiator = CapabilityNegotiator::new(vec![Box::new(StaticProbe::new(Vec::<Codec>::new()))]);
        let caps = negotiator.detect();
        assert!(caps.supported_codecs.is_empty());
        assert_eq!(negotiator.select_codec(&caps), Codec::UNIVERSAL);
        assert!(!caps.warnings.is_empty());
    }

    #[test]
    fn compositing_needs_every_backend_to_agree() {
        let negotiator = CapabilityNegotiator::new(vec![
            Box::new(BuiltinProbe),
            Box::new(StaticProbe::new([Codec::Mp4H264]).without_compositing()),
        ]);
        let caps = negotiator.detect();
        assert!(!caps.can_composite);
        assert!(caps.can_record);
        assert_eq!(caps.supported_codecs[0], Codec::Mp4H264);
    }

    #[test]
    fn warnings_are_reported_once() {
        let negotiator = CapabilityNegotiator::new(vec![Box::new(BuiltinProbe)]);
        let first = negotiator.detect();
        assert!(!first.warnings.is_empty());
        for warning in &first.warnings {
            assert!(!negotiator.report_once(warning));
        }
        assert!(negotiator.report_once("something new"));
    }
}
