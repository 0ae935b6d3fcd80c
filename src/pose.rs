//! Heuristic hand pose classification from landmark geometry.
//!
//! A finger counts as extended when its tip sits above both its PIP and MCP
//! joints by at least a margin. Image `y` grows downward, so "above" means a
//! smaller `y`. The thumb is not considered.

use crate::landmarks::{HandJoint, HandLandmarks, LandmarkFrame};
use std::fmt;

/// The poses a capture sequence can ask for.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum PoseId {
    /// Index finger only.
    One = 1,
    /// Index and middle fingers.
    Two = 2,
    /// Index, middle and ring fingers.
    Three = 3,
}

impl PoseId {
    pub const SEQUENCE: [PoseId; 3] = [PoseId::One, PoseId::Two, PoseId::Three];

    pub fn number(self) -> u8 {
        self as u8
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::One => "Pose 1",
            Self::Two => "Pose 2",
            Self::Three => "Pose 3",
        }
    }
}

impl fmt::Display for PoseId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Finger {
    Index,
    Middle,
    Ring,
    Pinky,
}

impl Finger {
    pub const ALL: [Finger; 4] = [Finger::Index, Finger::Middle, Finger::Ring, Finger::Pinky];

    /// (tip, pip, mcp)
    fn joints(self) -> (HandJoint, HandJoint, HandJoint) {
        match self {
            Self::Index => (HandJoint::IndexTip, HandJoint::IndexPip, HandJoint::IndexMcp),
            Self::Middle => (HandJoint::MiddleTip, HandJoint::MiddlePip, HandJoint::MiddleMcp),
            Self::Ring => (HandJoint::RingTip, HandJoint::RingPip, HandJoint::RingMcp),
            Self::Pinky => (HandJoint::PinkyTip, HandJoint::PinkyPip, HandJoint::PinkyMcp),
        }
    }
}

/// Which of the four non-thumb fingers are extended.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub struct FingerStates {
    pub index: bool,
    pub middle: bool,
    pub ring: bool,
    pub pinky: bool,
}

impl FingerStates {
    pub fn new(index: bool, middle: bool, ring: bool, pinky: bool) -> Self {
        Self {
            index,
            middle,
            ring,
            pinky,
        }
    }

    pub fn from_hand(hand: &HandLandmarks, margin: f32) -> Self {
        Self {
            index: is_extended(hand, Finger::Index, margin),
            middle: is_extended(hand, Finger::Middle, margin),
            ring: is_extended(hand, Finger::Ring, margin),
            pinky: is_extended(hand, Finger::Pinky, margin),
        }
    }

    pub fn pose(self) -> Option<PoseId> {
        match (self.index, self.middle, self.ring, self.pinky) {
            (true, false, false, false) => Some(PoseId::One),
            (true, true, false, false) => Some(PoseId::Two),
            (true, true, true, false) => Some(PoseId::Three),
            _ => None,
        }
    }
}

pub fn is_extended(hand: &HandLandmarks, finger: Finger, margin: f32) -> bool {
    let (tip, pip, mcp) = finger.joints();
    let tip = hand.get(tip).y();
    tip < hand.get(pip).y() - margin && tip < hand.get(mcp).y() - margin
}

/// Classify a frame. No hand, or any unmapped finger combination, is `None`.
pub fn classify(frame: &LandmarkFrame, margin: f32) -> Option<PoseId> {
    frame
        .hand()
        .and_then(|hand| FingerStates::from_hand(hand, margin).pose())
}

#[cfg(test)]
pub(crate) mod fixtures {
    use crate::landmarks::{HandJoint, HandLandmarks, LandmarkFrame, NUM_LANDMARKS};

    const MCP_Y: f32 = 0.6;
    const PIP_Y: f32 = 0.5;
    const EXTENDED_TIP_Y: f32 = 0.3;
    const CURLED_TIP_Y: f32 = 0.55;

    /// A synthetic hand with the given fingers (index, middle, ring, pinky)
    /// extended.
    pub(crate) fn hand(extended: [bool; 4]) -> HandLandmarks {
        let mut points = [(0.5, 0.8); NUM_LANDMARKS];
        let fingers = [
            (HandJoint::IndexTip, HandJoint::IndexPip, HandJoint::IndexMcp),
            (HandJoint::MiddleTip, HandJoint::MiddlePip, HandJoint::MiddleMcp),
            (HandJoint::RingTip, HandJoint::RingPip, HandJoint::RingMcp),
            (HandJoint::PinkyTip, HandJoint::PinkyPip, HandJoint::PinkyMcp),
        ];
        for (i, ((tip, pip, mcp), &up)) in fingers.iter().zip(extended.iter()).enumerate() {
            let x = 0.4 + 0.05 * i as f32;
            points[mcp.idx()] = (x, MCP_Y);
            points[pip.idx()] = (x, PIP_Y);
            // DIP sits right before the tip
            points[tip.idx() - 1] = (x, (PIP_Y + EXTENDED_TIP_Y) / 2.0);
            points[tip.idx()] = (x, if up { EXTENDED_TIP_Y } else { CURLED_TIP_Y });
        }
        HandLandmarks::from_points(&points).unwrap()
    }

    pub(crate) fn frame(extended: [bool; 4]) -> LandmarkFrame {
        LandmarkFrame::Present(hand(extended))
    }

    pub(crate) const POSE_ONE: [bool; 4] = [true, false, false, false];
    pub(crate) const POSE_TWO: [bool; 4] = [true, true, false, false];
    pub(crate) const POSE_THREE: [bool; 4] = [true, true, true, false];
    pub(crate) const FIST: [bool; 4] = [false, false, false, false];
    pub(crate) const OPEN: [bool; 4] = [true, true, true, true];
}
