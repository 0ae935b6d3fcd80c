use crate::error::Error;
use num_traits::FromPrimitive;
use ordered_float::NotNan;
use tracing::debug;

/// Hand joints in the order a 21-point hand tracker reports them.
#[derive(Debug, Copy, Clone, PartialEq, Eq, num_derive::FromPrimitive, num_derive::ToPrimitive)]
pub enum HandJoint {
    Wrist,
    ThumbCmc,
    ThumbMcp,
    ThumbIp,
    ThumbTip,
    IndexMcp,
    IndexPip,
    IndexDip,
    IndexTip,
    MiddleMcp,
    MiddlePip,
    MiddleDip,
    MiddleTip,
    RingMcp,
    RingPip,
    RingDip,
    RingTip,
    PinkyMcp,
    PinkyPip,
    PinkyDip,
    PinkyTip,
}

pub const NUM_LANDMARKS: usize = 21;

impl HandJoint {
    #[inline]
    pub fn idx(self) -> usize {
        self as usize
    }

    pub fn all() -> impl Iterator<Item = Self> {
        (0..NUM_LANDMARKS).filter_map(Self::from_usize)
    }
}

/// A keypoint in normalized image coordinates, `[0, 1]` relative to the
/// frame's width and height.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Landmark {
    x: f32,
    y: f32,
}

impl Landmark {
    pub fn new(x: f32, y: f32) -> Result<Self, Error> {
        let x = NotNan::new(x).map_err(|e| Error::ConstructNotNan(e, x))?;
        let y = NotNan::new(y).map_err(|e| Error::ConstructNotNan(e, y))?;
        for value in [x, y] {
            if !value.is_finite() {
                return Err(Error::NonFiniteCoordinate(value.into_inner()));
            }
        }
        Ok(Self {
            x: x.into_inner(),
            y: y.into_inner(),
        })
    }

    #[inline]
    pub fn x(self) -> f32 {
        self.x
    }

    #[inline]
    pub fn y(self) -> f32 {
        self.y
    }
}

/// One hand's full set of landmarks.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HandLandmarks([Landmark; NUM_LANDMARKS]);

impl HandLandmarks {
    pub fn new(landmarks: [Landmark; NUM_LANDMARKS]) -> Self {
        Self(landmarks)
    }

    /// Build from raw `(x, y)` pairs, rejecting wrong counts and NaNs.
    pub fn from_points(points: &[(f32, f32)]) -> Result<Self, Error> {
        if points.len() != NUM_LANDMARKS {
            return Err(Error::LandmarkCount {
                expected: NUM_LANDMARKS,
                got: points.len(),
            });
        }
        let mut landmarks = [Landmark::default(); NUM_LANDMARKS];
        for (dst, &(x, y)) in landmarks.iter_mut().zip(points) {
            *dst = Landmark::new(x, y)?;
        }
        Ok(Self(landmarks))
    }

    #[inline]
    pub fn get(&self, joint: HandJoint) -> Landmark {
        self.0[joint.idx()]
    }

    pub fn as_slice(&self) -> &[Landmark] {
        &self.0
    }
}

/// What the landmark source saw in one video frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LandmarkFrame {
    Present(HandLandmarks),
    Absent,
}

impl LandmarkFrame {
    /// Interpret raw tracker output. Anything that isn't a complete, finite
    /// set of landmarks counts as no hand.
    pub fn from_points(points: Option<&[(f32, f32)]>) -> Self {
        match points.map(HandLandmarks::from_points) {
            Some(Ok(hand)) => Self::Present(hand),
            Some(Err(error)) => {
                debug!(message = "discarding malformed landmarks", %error);
                Self::Absent
            }
            None => Self::Absent,
        }
    }

    pub fn hand(&self) -> Option<&HandLandmarks> {
        match self {
            Self::Present(hand) => Some(hand),
            Self::Absent => None,
        }
    }
}

impl From<HandLandmarks> for LandmarkFrame {
    fn from(hand: HandLandmarks) -> Self {
        Self::Present(hand)
    }
}
