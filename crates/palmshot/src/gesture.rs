//! Open palm and fist classification.
//!
//! Classification only compares the vertical position of each non-thumb fingertip with the PIP
//! joint one segment below it. A finger whose tip is higher up in the image than its PIP joint is
//! extended, otherwise it is curled. This works for upright hands facing the camera either way;
//! it does not attempt to handle hands pointing sideways or down.

use crate::hand::landmark::{HandLandmarks, LandmarkIdx};

/// `(tip, PIP joint)` landmark pairs of the four non-thumb fingers.
pub const FINGER_PAIRS: [(LandmarkIdx, LandmarkIdx); 4] = [
    (LandmarkIdx::IndexFingerTip, LandmarkIdx::IndexFingerPip),
    (LandmarkIdx::MiddleFingerTip, LandmarkIdx::MiddleFingerPip),
    (LandmarkIdx::RingFingerTip, LandmarkIdx::RingFingerPip),
    (LandmarkIdx::PinkyTip, LandmarkIdx::PinkyPip),
];

/// The hand pose recognized in a single frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Gesture {
    /// All four fingers extended.
    Palm,
    /// All four fingers curled.
    Fist,
    /// Mixed fingers, or a degenerate landmark set.
    Neither,
}

impl Gesture {
    /// Classifies a single hand.
    pub fn classify(hand: &HandLandmarks) -> Self {
        let palm = is_open_palm(hand);
        let fist = is_fist(hand);
        match (palm, fist) {
            (true, false) => Gesture::Palm,
            (false, true) => Gesture::Fist,
            // Both rules only hold at once when every tip sits exactly at its joint's height.
            (true, true) | (false, false) => Gesture::Neither,
        }
    }
}

/// Returns `true` if no fingertip is above its PIP joint.
pub fn is_fist(hand: &HandLandmarks) -> bool {
    FINGER_PAIRS
        .iter()
        .all(|&(tip, pip)| hand.position(tip)[1] >= hand.position(pip)[1])
}

/// Returns `true` if no fingertip is below its PIP joint.
pub fn is_open_palm(hand: &HandLandmarks) -> bool {
    FINGER_PAIRS
        .iter()
        .all(|&(tip, pip)| hand.position(tip)[1] <= hand.position(pip)[1])
}
