//! Temporal smoothing of per-frame predictions.

use crate::classifier::Prediction;
use crate::gesture::GestureLabel;
use std::collections::VecDeque;

pub const DEFAULT_HISTORY: usize = 5;
pub const DEFAULT_THRESHOLD: f32 = 0.6;

/// Stabilized decision for one frame
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SmoothedState {
    NoHand,
    /// Hand visible, prediction below the confidence threshold
    LowConfidence,
    Stable(GestureLabel),
}

impl SmoothedState {
    pub fn label(&self) -> GestureLabel {
        match self {
            SmoothedState::Stable(label) => *label,
            _ => GestureLabel::Unknown,
        }
    }

    pub fn is_stable(&self) -> bool {
        matches!(self, SmoothedState::Stable(_))
    }
}

/// Majority vote over the last N confident predictions.
///
/// Only predictions at or above the threshold enter the window, so a single
/// flickering frame near the decision boundary cannot change the output.
#[derive(Clone, Debug)]
pub struct GestureSmoother {
    history: VecDeque<GestureLabel>,
    capacity: usize,
    threshold: f32,
    clear_on_no_hand: bool,
}

impl Default for GestureSmoother {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY, DEFAULT_THRESHOLD, false)
    }
}

impl GestureSmoother {
    /// A capacity of zero is treated as one.
    pub fn new(capacity: usize, threshold: f32, clear_on_no_hand: bool) -> Self {
        let capacity = capacity.max(1);
        Self {
            history: VecDeque::with_capacity(capacity),
            capacity,
            threshold,
            clear_on_no_hand,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    pub fn history(&self) -> impl Iterator<Item = GestureLabel> + '_ {
        self.history.iter().copied()
    }

    pub fn len(&self) -> usize {
        self.history.len()
    }

    pub fn is_empty(&self) -> bool {
        self.history.is_empty()
    }

    pub fn clear(&mut self) {
        self.history.clear();
    }

    /// Advance by one frame. `None` means no hand was detected.
    pub fn update(&mut self, prediction: Option<Prediction>) -> SmoothedState {
        let Some(prediction) = prediction else {
            if self.clear_on_no_hand {
                self.history.clear();
            }
            return SmoothedState::NoHand;
        };

        if prediction.confidence < self.threshold {
            return SmoothedState::LowConfidence;
        }

        if self.history.len() == self.capacity {
            self.history.pop_front();
        }
        self.history.push_back(prediction.label);

        match self.majority() {
            Some(label) => SmoothedState::Stable(label),
            None => SmoothedState::LowConfidence,
        }
    }

    /// Most frequent label in the window; ties go to the label seen first
    pub fn majority(&self) -> Option<GestureLabel> {
        let mut counts: Vec<(GestureLabel, usize)> = Vec::new();
        for label in &self.history {
            match counts.iter_mut().find(|(l, _)| l == label) {
                Some((_, n)) => *n += 1,
                None => counts.push((*label, 1)),
            }
        }

        let mut best: Option<(GestureLabel, usize)> = None;
        for (label, n) in counts {
            if best.map_or(true, |(_, b)| n > b) {
                best = Some((label, n));
            }
        }
        best.map(|(label, _)| label)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use GestureLabel::*;

    fn confident(label: GestureLabel) -> Option<Prediction> {
        Some(Prediction {
            label,
            confidence: 0.9,
        })
    }

    #[test]
    fn test_history_is_bounded() {
        let mut smoother = GestureSmoother::new(5, 0.6, false);
        for i in 0..12 {
            let label = if i % 2 == 0 { Palm } else { Fist };
            smoother.update(confident(label));
            assert!(smoother.len() <= 5);
        }
        assert_eq!(smoother.len(), 5);
        // oldest entries evicted first
        assert_eq!(smoother.history().collect::<Vec<_>>(), vec![Fist, Palm, Fist, Palm, Fist]);
    }

    #[test]
    fn test_majority_of_window() {
        let mut smoother = GestureSmoother::new(5, 0.6, false);
        let mut state = SmoothedState::NoHand;
        for label in [Palm, Palm, Fist, Palm, Fist] {
            state = smoother.update(confident(label));
        }
        assert_eq!(state, SmoothedState::Stable(Palm));
    }

    #[test]
    fn test_tie_goes_to_first_seen() {
        let mut smoother = GestureSmoother::new(4, 0.6, false);
        for label in [Fist, Palm, Palm, Fist] {
            smoother.update(confident(label));
        }
        assert_eq!(smoother.majority(), Some(Fist));
    }

    #[test]
    fn test_low_confidence_is_ignored() {
        let mut smoother = GestureSmoother::new(5, 0.6, false);
        smoother.update(confident(Palm));
        let state = smoother.update(Some(Prediction {
            label: Fist,
            confidence: 0.59,
        }));
        assert_eq!(state, SmoothedState::LowConfidence);
        assert_eq!(smoother.history().collect::<Vec<_>>(), vec![Palm]);
        assert_eq!(smoother.majority(), Some(Palm));

        // exactly at the threshold counts
        let state = smoother.update(Some(Prediction {
            label: Palm,
            confidence: 0.6,
        }));
        assert_eq!(state, SmoothedState::Stable(Palm));
    }

    #[test]
    fn test_no_hand_keeps_history_by_default() {
        let mut smoother = GestureSmoother::default();
        smoother.update(confident(Point));
        assert_eq!(smoother.update(None), SmoothedState::NoHand);
        assert_eq!(smoother.len(), 1);
        assert_eq!(smoother.update(confident(Palm)), SmoothedState::Stable(Point));
    }

    #[test]
    fn test_no_hand_can_clear_history() {
        let mut smoother = GestureSmoother::new(5, 0.6, true);
        smoother.update(confident(Point));
        smoother.update(confident(Point));
        assert_eq!(smoother.update(None), SmoothedState::NoHand);
        assert!(smoother.is_empty());
        assert_eq!(smoother.update(confident(Palm)), SmoothedState::Stable(Palm));
    }

    #[test]
    fn test_state_label() {
        assert_eq!(SmoothedState::NoHand.label(), Unknown);
        assert_eq!(SmoothedState::LowConfidence.label(), Unknown);
        assert_eq!(SmoothedState::Stable(VSign).label(), VSign);
    }
}
