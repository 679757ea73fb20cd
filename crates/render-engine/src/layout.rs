//! Layout engine: named layout → per-source placement.
//!
//! [`resolve_layout`] is a pure function of the layout and the video
//! sources present. [`LayoutTransition`] interpolates between two
//! resolved tables for smooth switches.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use lectern_session_model::{Layout, Placement, Rect, SourceKind};

/// Placement of every visual source for one layout.
pub type PlacementTable = BTreeMap<SourceKind, Placement>;

const PIP_CAMERA: Rect = Rect {
    x: 0.73,
    y: 0.71,
    w: 0.25,
    h: 0.25,
};

const LEFT_HALF: Rect = Rect {
    x: 0.0,
    y: 0.0,
    w: 0.5,
    h: 1.0,
};

const RIGHT_HALF: Rect = Rect {
    x: 0.5,
    y: 0.0,
    w: 0.5,
    h: 1.0,
};

const PRESENTATION_SCREEN: Rect = Rect {
    x: 0.0,
    y: 0.0,
    w: 0.75,
    h: 1.0,
};

const PRESENTATION_CAMERA: Rect = Rect {
    x: 0.755,
    y: 0.02,
    w: 0.235,
    h: 0.32,
};

/// Resolve a layout for the visual sources present.
///
/// Non-visual kinds are ignored. A two-source layout with only one of
/// its sources present gives that source the whole canvas.
pub fn resolve_layout(layout: Layout, present: &[SourceKind]) -> PlacementTable {
    let visual: Vec<SourceKind> = present.iter().copied().filter(|k| k.is_visual()).collect();
    let mut table = PlacementTable::new();

    let dual = matches!(
        layout,
        Layout::PictureInPicture | Layout::SideBySide | Layout::Presentation
    );
    if dual && visual.len() == 1 {
        table.insert(visual[0], Placement::shown(Rect::FULL, 0));
        return table;
    }

    for kind in visual {
        let placement = match (layout, kind) {
            (Layout::PictureInPicture, SourceKind::Screen) => Placement::shown(Rect::FULL, 0),
            (Layout::PictureInPicture, _) => Placement::shown(PIP_CAMERA, 1),
            (Layout::SideBySide, SourceKind::Screen) => Placement::shown(LEFT_HALF, 0),
            (Layout::SideBySide, _) => Placement::shown(RIGHT_HALF, 0),
            (Layout::Presentation, SourceKind::Screen) => {
                Placement::shown(PRESENTATION_SCREEN, 0)
            }
            (Layout::Presentation, _) => Placement::shown(PRESENTATION_CAMERA, 1),
            (Layout::ScreenOnly, SourceKind::Screen) => Placement::shown(Rect::FULL, 0),
            (Layout::ScreenOnly, _) => Placement::hidden(PIP_CAMERA, 1),
            (Layout::CameraOnly, SourceKind::Camera) => Placement::shown(Rect::FULL, 1),
            (Layout::CameraOnly, _) => Placement::hidden(Rect::FULL, 0),
        };
        table.insert(kind, placement);
    }
    table
}

/// Ease-in-out curve used for transitions.
fn smoothstep(t: f64) -> f64 {
    let t = t.clamp(0.0, 1.0);
    t * t * (3.0 - 2.0 * t)
}

/// An in-flight interpolation between two placement tables.
#[derive(Debug, Clone)]
pub struct LayoutTransition {
    from: PlacementTable,
    to: PlacementTable,
    started: Instant,
    duration: Duration,
}

impl LayoutTransition {
    pub fn new(from: PlacementTable, to: PlacementTable, started: Instant, duration: Duration) -> Self {
        Self {
            from,
            to,
            started,
            duration,
        }
    }

    pub fn target(&self) -> &PlacementTable {
        &self.to
    }

    /// Linear progress in `[0.0, 1.0]`.
    pub fn progress(&self, now: Instant) -> f64 {
        if self.duration.is_zero() {
            return 1.0;
        }
        let elapsed = now.saturating_duration_since(self.started);
        (elapsed.as_secs_f64() / self.duration.as_secs_f64()).min(1.0)
    }

    pub fn is_complete(&self, now: Instant) -> bool {
        self.progress(now) >= 1.0
    }

    /// Interpolated placements at `now`. A source missing from the start
    /// table fades in at its target rect; one missing from the target
    /// fades out where it was.
    pub fn sample(&self, now: Instant) -> PlacementTable {
        let t = smoothstep(self.progress(now));
        let mut out = PlacementTable::new();
        for (kind, to) in &self.to {
            let from = self.from.get(kind).copied().unwrap_or(Placement {
                opacity: 0.0,
                visible: false,
                ..*to
            });
            out.insert(*kind, Placement::lerp(&from, to, t));
        }
        for (kind, from) in &self.from {
            if !self.to.contains_key(kind) {
                let to = Placement {
                    opacity: 0.0,
                    visible: false,
                    ..*from
                };
                out.insert(*kind, Placement::lerp(from, &to, t));
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use SourceKind::*;

    #[test]
    fn pip_puts_camera_over_full_screen() {
        let table = resolve_layout(Layout::PictureInPicture, &[Camera, Screen, Microphone]);
        assert_eq!(table.len(), 2);
        assert_eq!(table[&Screen].rect, Rect::FULL);
        assert!(table[&Camera].z_order > table[&Screen].z_order);
        assert!(table[&Camera].rect.area() < 0.1);
    }

    #[test]
    fn solo_layouts_hide_the_other_source() {
        let table = resolve_layout(Layout::CameraOnly, &[Camera, Screen]);
        assert!(table[&Camera].visible);
        assert_eq!(table[&Camera].rect, Rect::FULL);
        assert!(!table[&Screen].visible);
        assert_eq!(table[&Screen].opacity, 0.0);

        let table = resolve_layout(Layout::ScreenOnly, &[Camera, Screen]);
        assert!(table[&Screen].visible);
        assert!(!table[&Camera].visible);
    }

    #[test]
    fn dual_layout_with_one_source_fills_canvas() {
        let table = resolve_layout(Layout::SideBySide, &[Camera]);
        assert_eq!(table[&Camera].rect, Rect::FULL);
        assert!(table[&Camera].visible);
    }

    #[test]
    fn side_by_side_splits_canvas() {
        let table = resolve_layout(Layout::SideBySide, &[Camera, Screen]);
        assert_eq!(table[&Screen].rect, LEFT_HALF);
        assert_eq!(table[&Camera].rect, RIGHT_HALF);
    }

    #[test]
    fn transition_interpolates_and_completes() {
        let start = Instant::now();
        let from = resolve_layout(Layout::ScreenOnly, &[Camera, Screen]);
        let to = resolve_layout(Layout::PictureInPicture, &[Camera, Screen]);
        let transition = LayoutTransition::new(from, to.clone(), start, Duration::from_millis(400));

        let mid = transition.sample(start + Duration::from_millis(200));
        let cam = mid[&Camera];
        assert!(cam.opacity > 0.0 && cam.opacity < 1.0);
        assert!(cam.visible);

        assert!(transition.is_complete(start + Duration::from_millis(400)));
        assert_eq!(transition.sample(start + Duration::from_millis(500)), to);
    }

    #[test]
    fn zero_duration_transition_is_instant() {
        let start = Instant::now();
        let to = resolve_layout(Layout::CameraOnly, &[Camera]);
        let transition =
            LayoutTransition::new(PlacementTable::new(), to.clone(), start, Duration::ZERO);
        assert_eq!(transition.sample(start), to);
    }
}
