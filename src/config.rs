use crate::{error::Error, pose::PoseId};
use std::time::Duration;

pub const DEFAULT_SETTLE_MS: u64 = 800;
pub const DEFAULT_COUNTDOWN: u8 = 3;
pub const DEFAULT_TICK_MS: u64 = 1000;
pub const DEFAULT_EXTENSION_MARGIN: f32 = 0.06;
pub const DEFAULT_BOX_PADDING: u32 = 20;
pub const DEFAULT_JPEG_QUALITY: u8 = 90;
pub const DEFAULT_MIN_HAND_SCORE: f32 = 0.7;

/// Tunables for one capture session.
#[derive(Debug, Clone, PartialEq)]
pub struct CaptureConfig {
    /// Poses that must be held, in order.
    pub steps: Vec<PoseId>,
    /// How long a required pose must be held continuously before it counts.
    pub settle: Duration,
    /// Starting value of the countdown once the last pose is accepted.
    pub countdown: u8,
    /// Interval between countdown ticks.
    pub tick: Duration,
    /// Normalized distance a fingertip must clear its PIP and MCP joints by.
    pub extension_margin: f32,
    /// Pixels added around the landmark bounding box in the overlay.
    pub box_padding: u32,
    pub jpeg_quality: u8,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            steps: PoseId::SEQUENCE.to_vec(),
            settle: Duration::from_millis(DEFAULT_SETTLE_MS),
            countdown: DEFAULT_COUNTDOWN,
            tick: Duration::from_millis(DEFAULT_TICK_MS),
            extension_margin: DEFAULT_EXTENSION_MARGIN,
            box_padding: DEFAULT_BOX_PADDING,
            jpeg_quality: DEFAULT_JPEG_QUALITY,
        }
    }
}

impl CaptureConfig {
    pub fn validate(&self) -> Result<(), Error> {
        if self.steps.is_empty() {
            return Err(Error::InvalidConfig("at least one pose step is required"));
        }
        if self.countdown == 0 {
            return Err(Error::InvalidConfig("countdown must start above zero"));
        }
        if self.tick.is_zero() {
            return Err(Error::InvalidConfig("countdown tick must be non-zero"));
        }
        if !(self.extension_margin.is_finite() && (0.0..1.0).contains(&self.extension_margin)) {
            return Err(Error::InvalidConfig(
                "extension margin must be a finite value in [0, 1)",
            ));
        }
        if !(1..=100).contains(&self.jpeg_quality) {
            return Err(Error::InvalidConfig("jpeg quality must be in 1..=100"));
        }
        Ok(())
    }
}
