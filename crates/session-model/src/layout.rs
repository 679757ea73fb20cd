//! Named layouts.

use serde::{Deserialize, Serialize};

use lectern_common::LecternError;

use crate::source::SourceKind;

/// A named arrangement of the visible sources.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Layout {
    /// Screen fills the canvas, camera sits in a corner.
    PictureInPicture,
    /// Screen and camera split the canvas.
    SideBySide,
    /// Screen dominant with the camera in a side panel.
    Presentation,
    ScreenOnly,
    CameraOnly,
}

impl Layout {
    pub const ALL: [Layout; 5] = [
        Layout::PictureInPicture,
        Layout::SideBySide,
        Layout::Presentation,
        Layout::ScreenOnly,
        Layout::CameraOnly,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Layout::PictureInPicture => "picture-in-picture",
            Layout::SideBySide => "side-by-side",
            Layout::Presentation => "presentation",
            Layout::ScreenOnly => "screen-only",
            Layout::CameraOnly => "camera-only",
        }
    }

    /// Video sources this layout needs in order to make sense.
    pub fn required_sources(&self) -> &'static [SourceKind] {
        match self {
            Layout::PictureInPicture | Layout::SideBySide | Layout::Presentation => {
                &[SourceKind::Screen, SourceKind::Camera]
            }
            Layout::ScreenOnly => &[SourceKind::Screen],
            Layout::CameraOnly => &[SourceKind::Camera],
        }
    }

    /// Whether every required source is present.
    pub fn is_satisfied_by(&self, present: &[SourceKind]) -> bool {
        self.required_sources()
            .iter()
            .all(|kind| present.contains(kind))
    }

    /// Layout chosen when the caller has not picked one explicitly.
    ///
    /// Camera and screen together default to picture-in-picture; a single
    /// video source gets its solo layout.
    pub fn default_for(present: &[SourceKind]) -> Option<Layout> {
        let camera = present.contains(&SourceKind::Camera);
        let screen = present.contains(&SourceKind::Screen);
        match (camera, screen) {
            (true, true) => Some(Layout::PictureInPicture),
            (false, true) => Some(Layout::ScreenOnly),
            (true, false) => Some(Layout::CameraOnly),
            (false, false) => None,
        }
    }

    /// The full-canvas layout for a single video source.
    pub fn solo(kind: SourceKind) -> Option<Layout> {
        match kind {
            SourceKind::Camera => Some(Layout::CameraOnly),
            SourceKind::Screen => Some(Layout::ScreenOnly),
            SourceKind::Microphone => None,
        }
    }
}

impl std::fmt::Display for Layout {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Layout {
    type Err = LecternError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('_', "-").as_str() {
            "picture-in-picture" | "pip" => Ok(Layout::PictureInPicture),
            "side-by-side" | "sbs" => Ok(Layout::SideBySide),
            "presentation" => Ok(Layout::Presentation),
            "screen-only" | "screen" => Ok(Layout::ScreenOnly),
            "camera-only" | "camera" => Ok(Layout::CameraOnly),
            _ => Err(LecternError::invalid_layout(s)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_policy_follows_present_sources() {
        use SourceKind::*;
        assert_eq!(
            Layout::default_for(&[Camera, Screen]),
            Some(Layout::PictureInPicture)
        );
        assert_eq!(Layout::default_for(&[Screen]), Some(Layout::ScreenOnly));
        assert_eq!(
            Layout::default_for(&[Camera, Microphone]),
            Some(Layout::CameraOnly)
        );
        assert_eq!(Layout::default_for(&[Microphone]), None);
    }

    #[test]
    fn names_round_trip_and_unknown_names_fail() {
        for layout in Layout::ALL {
            assert_eq!(layout.as_str().parse::<Layout>().unwrap(), layout);
        }
        assert_eq!("PIP".parse::<Layout>().unwrap(), Layout::PictureInPicture);
        assert!(matches!(
            "mosaic".parse::<Layout>(),
            Err(LecternError::InvalidLayout { .. })
        ));
    }

    #[test]
    fn serde_uses_kebab_case() {
        let json = serde_json::to_string(&Layout::PictureInPicture).unwrap();
        assert_eq!(json, "\"picture-in-picture\"");
    }
}
