//! Guided hand-pose photo capture.
//!
//! A live camera feed is walked through a fixed series of hand poses. Each
//! pose has to be held for a moment before the next one is asked for, and
//! after the last one a countdown runs and a single still is captured and
//! encoded as JPEG.

pub mod camera;
pub mod capture;
pub mod config;
pub mod error;
pub mod landmarks;
pub mod overlay;
pub mod pose;
pub mod runtime;
pub mod session;
pub mod source;
pub mod timer;

pub use capture::{EncodedImage, Frame};
pub use config::CaptureConfig;
pub use error::{DeviceError, Error};
pub use runtime::{open, Callbacks, Outcome, SessionHandle, SessionUpdate};
pub use session::{CaptureSession, Phase};
