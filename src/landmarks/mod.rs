//! Hand landmarks and the collaborators that produce them.
//!
//! The recognition core only ever sees a [`LandmarkSource`]: one
//! [`Observation`] per frame, first detected hand only. Where the landmarks
//! come from (camera + detector model, a recorded session) is behind that
//! trait.

#[cfg(feature = "onnx")]
mod onnx;
mod preprocess;
mod replay;

#[cfg(feature = "onnx")]
pub use onnx::OnnxHandLandmarker;
pub use preprocess::{Preprocessor, TensorLayout};
pub use replay::ReplayFeed;

use crate::capture::CaptureSource;
use anyhow::Result;
use image::RgbImage;
use serde::{Deserialize, Serialize};

/// Number of keypoints in a hand skeleton
pub const LANDMARK_COUNT: usize = 21;

/// Keypoint indices (MediaPipe hand landmark convention)
pub mod index {
    pub const WRIST: usize = 0;
    pub const THUMB_CMC: usize = 1;
    pub const THUMB_MCP: usize = 2;
    pub const THUMB_IP: usize = 3;
    pub const THUMB_TIP: usize = 4;
    pub const INDEX_MCP: usize = 5;
    pub const INDEX_PIP: usize = 6;
    pub const INDEX_DIP: usize = 7;
    pub const INDEX_TIP: usize = 8;
    pub const MIDDLE_MCP: usize = 9;
    pub const MIDDLE_PIP: usize = 10;
    pub const MIDDLE_DIP: usize = 11;
    pub const MIDDLE_TIP: usize = 12;
    pub const RING_MCP: usize = 13;
    pub const RING_PIP: usize = 14;
    pub const RING_DIP: usize = 15;
    pub const RING_TIP: usize = 16;
    pub const PINKY_MCP: usize = 17;
    pub const PINKY_PIP: usize = 18;
    pub const PINKY_DIP: usize = 19;
    pub const PINKY_TIP: usize = 20;
}

/// A single keypoint
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Landmark {
    /// 0.0 to 1.0, normalized to image width
    pub x: f32,
    /// 0.0 to 1.0, normalized to image height
    pub y: f32,
    /// Depth relative to the wrist
    pub z: f32,
}

impl Landmark {
    pub const fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }
}

/// Keypoints of one detected hand, in anatomical index order.
///
/// Serialized as a list of `[x, y, z]` triples. A set that does not hold
/// exactly [`LANDMARK_COUNT`] points is malformed; it is carried as-is so
/// the feature extractor can degrade instead of failing.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct LandmarkSet {
    points: Vec<Landmark>,
}

impl LandmarkSet {
    pub fn new(points: Vec<Landmark>) -> Self {
        Self { points }
    }

    /// Build from a flat `[x0, y0, z0, x1, ...]` buffer
    pub fn from_flat(values: &[f32]) -> Self {
        let points = values
            .chunks_exact(3)
            .map(|c| Landmark::new(c[0], c[1], c[2]))
            .collect();
        Self { points }
    }

    pub fn points(&self) -> &[Landmark] {
        &self.points
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn is_well_formed(&self) -> bool {
        self.points.len() == LANDMARK_COUNT
    }

    pub fn get(&self, idx: usize) -> Option<&Landmark> {
        self.points.get(idx)
    }

    /// Axis-aligned bounds in normalized image coordinates:
    /// (x_min, y_min, x_max, y_max)
    pub fn bounding_box(&self) -> Option<(f32, f32, f32, f32)> {
        let first = self.points.first()?;
        let init = (first.x, first.y, first.x, first.y);
        Some(self.points.iter().fold(init, |(x0, y0, x1, y1), p| {
            (x0.min(p.x), y0.min(p.y), x1.max(p.x), y1.max(p.y))
        }))
    }
}

impl Serialize for LandmarkSet {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let triples: Vec<[f32; 3]> = self.points.iter().map(|p| [p.x, p.y, p.z]).collect();
        triples.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for LandmarkSet {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let triples = Vec::<[f32; 3]>::deserialize(deserializer)?;
        Ok(Self::new(
            triples
                .into_iter()
                .map(|[x, y, z]| Landmark::new(x, y, z))
                .collect(),
        ))
    }
}

/// What the landmark collaborator saw in one frame
#[derive(Clone, Debug, PartialEq)]
pub enum Observation {
    Hand(LandmarkSet),
    NoHand,
}

impl Observation {
    pub fn hand(&self) -> Option<&LandmarkSet> {
        match self {
            Observation::Hand(set) => Some(set),
            Observation::NoHand => None,
        }
    }
}

impl From<Option<LandmarkSet>> for Observation {
    fn from(value: Option<LandmarkSet>) -> Self {
        value.map_or(Observation::NoHand, Observation::Hand)
    }
}

/// Per-frame landmark feed
pub trait LandmarkSource {
    /// Observation for the next frame, or `None` once the feed is exhausted.
    ///
    /// Capture or detection failures are reported as [`Observation::NoHand`],
    /// never as the end of the feed.
    fn next_frame(&mut self) -> Option<Observation>;
}

/// Trait for hand landmark detectors
/// Allows swapping between different backends (ONNX, subprocess, etc.)
pub trait HandDetector {
    /// Detect the first hand in a frame
    ///
    /// Detection-confidence gating happens inside the detector.
    fn detect(&mut self, frame: &RgbImage) -> Result<Option<LandmarkSet>>;
}

/// Live feed: grab a frame, run the detector on it
pub struct CameraFeed<C, D> {
    capture: C,
    detector: D,
    mirror: bool,
}

impl<C, D> CameraFeed<C, D>
where
    C: CaptureSource,
    D: HandDetector,
{
    /// `mirror` flips each frame horizontally (selfie view) before detection
    pub fn new(capture: C, detector: D, mirror: bool) -> Self {
        Self {
            capture,
            detector,
            mirror,
        }
    }
}

impl<C, D> LandmarkSource for CameraFeed<C, D>
where
    C: CaptureSource,
    D: HandDetector,
{
    fn next_frame(&mut self) -> Option<Observation> {
        let frame = match self.capture.capture_frame() {
            Ok(frame) => frame,
            Err(err) => {
                tracing::warn!("Dropped frame: {:#}", err);
                return Some(Observation::NoHand);
            }
        };

        let frame = if self.mirror {
            image::imageops::flip_horizontal(&frame)
        } else {
            frame
        };

        match self.detector.detect(&frame) {
            Ok(hand) => Some(hand.into()),
            Err(err) => {
                tracing::warn!("Hand detection failed: {:#}", err);
                Some(Observation::NoHand)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::bail;

    struct FlakyCapture {
        calls: usize,
    }

    impl CaptureSource for FlakyCapture {
        fn capture_frame(&mut self) -> Result<RgbImage> {
            self.calls += 1;
            if self.calls % 2 == 0 {
                bail!("device busy");
            }
            Ok(RgbImage::new(4, 4))
        }

        fn resolution(&self) -> (u32, u32) {
            (4, 4)
        }
    }

    struct FixedDetector;

    impl HandDetector for FixedDetector {
        fn detect(&mut self, _frame: &RgbImage) -> Result<Option<LandmarkSet>> {
            Ok(Some(LandmarkSet::new(vec![Landmark::default(); LANDMARK_COUNT])))
        }
    }

    #[test]
    fn test_capture_failure_is_no_hand() {
        let mut feed = CameraFeed::new(FlakyCapture { calls: 0 }, FixedDetector, true);
        assert!(matches!(feed.next_frame(), Some(Observation::Hand(_))));
        assert_eq!(feed.next_frame(), Some(Observation::NoHand));
        assert!(matches!(feed.next_frame(), Some(Observation::Hand(_))));
    }

    #[test]
    fn test_bounding_box() {
        let set = LandmarkSet::from_flat(&[0.2, 0.5, 0.0, 0.6, 0.1, 0.0, 0.4, 0.9, 0.0]);
        assert_eq!(set.len(), 3);
        assert!(!set.is_well_formed());
        assert_eq!(set.bounding_box(), Some((0.2, 0.1, 0.6, 0.9)));
        assert_eq!(LandmarkSet::default().bounding_box(), None);
    }

    #[test]
    fn test_serde_as_triples() {
        let set = LandmarkSet::from_flat(&[0.25, 0.5, -0.125]);
        let json = serde_json::to_string(&set).unwrap();
        assert_eq!(json, "[[0.25,0.5,-0.125]]");
        let back: LandmarkSet = serde_json::from_str(&json).unwrap();
        assert_eq!(back, set);
    }
}
