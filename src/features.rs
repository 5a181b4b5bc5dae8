//! Feature extraction from hand landmarks
//!
//! Extracts 9 features per hand. The recipe is fixed: persisted models were
//! trained against exactly this order and these definitions.

use crate::landmarks::{index, Landmark, LandmarkSet};
use serde::{Deserialize, Serialize};

/// Length of a [`FeatureVector`] produced by [`extract`]
pub const FEATURE_LEN: usize = 9;

/// Names of the features, in vector order
pub const FEATURE_NAMES: [&str; FEATURE_LEN] = [
    "thumb_index_dist",
    "thumb_middle_dist",
    "palm_spread",
    "fingers_open",
    "wrist_x",
    "wrist_y",
    "thumb_index_angle",
    "index_middle_angle",
    "hand_size",
];

/// Tip / proximal joint pairs for the four fingers judged vertically
const FINGERS: [(usize, usize); 4] = [
    (index::INDEX_TIP, index::INDEX_PIP),
    (index::MIDDLE_TIP, index::MIDDLE_PIP),
    (index::RING_TIP, index::RING_PIP),
    (index::PINKY_TIP, index::PINKY_PIP),
];

/// Numeric summary of one hand
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FeatureVector(Vec<f32>);

impl FeatureVector {
    pub fn new(values: Vec<f32>) -> Self {
        Self(values)
    }

    pub fn zeros() -> Self {
        Self(vec![0.0; FEATURE_LEN])
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn into_inner(self) -> Vec<f32> {
        self.0
    }
}

impl From<Vec<f32>> for FeatureVector {
    fn from(values: Vec<f32>) -> Self {
        Self(values)
    }
}

/// Extract the feature vector for one hand
///
/// Features:
/// - 0: thumb tip to index tip distance (pinch)
/// - 1: thumb tip to middle tip distance
/// - 2: index tip to pinky tip distance (palm spread)
/// - 3: number of open fingers, 0-5
/// - 4: wrist x
/// - 5: wrist y
/// - 6: angle at the thumb tip between thumb IP and index tip, degrees
/// - 7: angle at the middle tip between index tip and ring tip, degrees
/// - 8: wrist to index tip distance (hand size)
///
/// The vertex of feature 6 is the thumb tip, not the IP joint. Saved models
/// were fitted on this exact order and definition; changing either makes
/// every persisted model predict garbage.
///
/// A malformed landmark set yields all zeros.
pub fn extract(landmarks: &LandmarkSet) -> FeatureVector {
    if !landmarks.is_well_formed() {
        tracing::debug!(
            "Malformed landmark set ({} points), emitting zero features",
            landmarks.len()
        );
        return FeatureVector::zeros();
    }

    let p = landmarks.points();
    let wrist = &p[index::WRIST];

    let values = [
        distance(&p[index::THUMB_TIP], &p[index::INDEX_TIP]),
        distance(&p[index::THUMB_TIP], &p[index::MIDDLE_TIP]),
        distance(&p[index::INDEX_TIP], &p[index::PINKY_TIP]),
        count_open_fingers(landmarks) as f64,
        wrist.x as f64,
        wrist.y as f64,
        angle_at(&p[index::THUMB_IP], &p[index::THUMB_TIP], &p[index::INDEX_TIP]),
        angle_at(&p[index::INDEX_TIP], &p[index::MIDDLE_TIP], &p[index::RING_TIP]),
        distance(wrist, &p[index::INDEX_TIP]),
    ];

    FeatureVector(values.iter().map(|&v| v as f32).collect())
}

/// Wrist to index tip distance, a scale reference for the hand
pub fn hand_size(landmarks: &LandmarkSet) -> f32 {
    match (landmarks.get(index::WRIST), landmarks.get(index::INDEX_TIP)) {
        (Some(wrist), Some(tip)) => distance(wrist, tip) as f32,
        _ => 0.0,
    }
}

/// All pairwise distances between the wrist and the five fingertips
/// (15 values). Not part of the default recipe.
pub fn pairwise_distances(landmarks: &LandmarkSet) -> Vec<f32> {
    const KEY_POINTS: [usize; 6] = [
        index::WRIST,
        index::THUMB_TIP,
        index::INDEX_TIP,
        index::MIDDLE_TIP,
        index::RING_TIP,
        index::PINKY_TIP,
    ];

    let mut out = Vec::with_capacity(15);
    for (i, &a) in KEY_POINTS.iter().enumerate() {
        for &b in &KEY_POINTS[i + 1..] {
            let d = match (landmarks.get(a), landmarks.get(b)) {
                (Some(pa), Some(pb)) => distance(pa, pb) as f32,
                _ => 0.0,
            };
            out.push(d);
        }
    }
    out
}

/// Open fingers: tip above its PIP joint (smaller y). The thumb opens
/// sideways, so it is open when its tip lies right of its IP joint.
pub fn count_open_fingers(landmarks: &LandmarkSet) -> u32 {
    let thumb = match (
        landmarks.get(index::THUMB_TIP),
        landmarks.get(index::THUMB_IP),
    ) {
        (Some(tip), Some(ip)) => tip.x > ip.x,
        _ => false,
    };

    let others = FINGERS
        .iter()
        .filter(|&&(tip, pip)| match (landmarks.get(tip), landmarks.get(pip)) {
            (Some(tip), Some(pip)) => tip.y < pip.y,
            _ => false,
        })
        .count() as u32;

    thumb as u32 + others
}

/// 3D Euclidean distance
pub fn distance(a: &Landmark, b: &Landmark) -> f64 {
    let dx = a.x as f64 - b.x as f64;
    let dy = a.y as f64 - b.y as f64;
    let dz = a.z as f64 - b.z as f64;
    (dx * dx + dy * dy + dz * dz).sqrt()
}

/// Angle in degrees at `vertex` between the rays to `a` and `b`.
/// Zero when either ray has zero length.
pub fn angle_at(a: &Landmark, vertex: &Landmark, b: &Landmark) -> f64 {
    let v1 = [
        a.x as f64 - vertex.x as f64,
        a.y as f64 - vertex.y as f64,
        a.z as f64 - vertex.z as f64,
    ];
    let v2 = [
        b.x as f64 - vertex.x as f64,
        b.y as f64 - vertex.y as f64,
        b.z as f64 - vertex.z as f64,
    ];

    let dot = v1[0] * v2[0] + v1[1] * v2[1] + v1[2] * v2[2];
    let mag1 = (v1[0] * v1[0] + v1[1] * v1[1] + v1[2] * v1[2]).sqrt();
    let mag2 = (v2[0] * v2[0] + v2[1] * v2[1] + v2[2] * v2[2]).sqrt();

    if mag1 == 0.0 || mag2 == 0.0 {
        return 0.0;
    }

    (dot / (mag1 * mag2)).clamp(-1.0, 1.0).acos().to_degrees()
}
