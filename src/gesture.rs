use serde::{Deserialize, Serialize};
use std::fmt;

/// Gesture classes, with stable integer ids shared by training data,
/// persisted models and runtime.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GestureLabel {
    /// Open hand
    Palm,
    /// Closed fist
    Fist,
    /// Thumb and index touching
    Pinch,
    /// Index finger extended
    Point,
    /// Index and middle fingers extended
    VSign,
    /// No hand, or nothing recognised
    Unknown,
}

impl GestureLabel {
    /// Every trainable gesture, in id order
    pub const TRAINABLE: [GestureLabel; 5] = [
        GestureLabel::Palm,
        GestureLabel::Fist,
        GestureLabel::Pinch,
        GestureLabel::Point,
        GestureLabel::VSign,
    ];

    pub fn from_id(id: u8) -> Self {
        match id {
            0 => GestureLabel::Palm,
            1 => GestureLabel::Fist,
            2 => GestureLabel::Pinch,
            3 => GestureLabel::Point,
            4 => GestureLabel::VSign,
            _ => GestureLabel::Unknown,
        }
    }

    pub fn id(&self) -> u8 {
        match self {
            GestureLabel::Palm => 0,
            GestureLabel::Fist => 1,
            GestureLabel::Pinch => 2,
            GestureLabel::Point => 3,
            GestureLabel::VSign => 4,
            GestureLabel::Unknown => u8::MAX,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            GestureLabel::Palm => "PALM",
            GestureLabel::Fist => "FIST",
            GestureLabel::Pinch => "PINCH",
            GestureLabel::Point => "POINT",
            GestureLabel::VSign => "V_SIGN",
            GestureLabel::Unknown => "UNKNOWN",
        }
    }

    /// Parse a name as written by [`GestureLabel::as_str`], case-insensitively
    pub fn from_name(name: &str) -> Option<Self> {
        let upper = name.trim().to_ascii_uppercase();
        GestureLabel::TRAINABLE
            .into_iter()
            .chain(std::iter::once(GestureLabel::Unknown))
            .find(|label| label.as_str() == upper)
    }
}

impl fmt::Display for GestureLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
