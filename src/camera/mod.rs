//! Camera sources.
//!
//! A [`CameraSource`] is a factory: acquiring it yields a [`FrameStream`]
//! that owns the device. Dropping the stream releases the device, so every
//! exit path of a session gives the camera back.

use crate::{capture::Frame, error::DeviceError};

mod image_dir;
pub use image_dir::{ImageDirCamera, ImageDirStream};

#[cfg(feature = "opencv")]
mod v4l2;
#[cfg(feature = "opencv")]
pub use v4l2::{V4l2Camera, V4l2Stream};

pub trait CameraSource: Send + 'static {
    type Stream: FrameStream;

    /// Open the device. May block on permission prompts or slow hardware.
    fn acquire(&mut self) -> Result<Self::Stream, DeviceError>;
}

pub trait FrameStream: Send {
    /// Next frame, or `None` when the stream has ended.
    fn read(&mut self) -> Result<Option<Frame>, DeviceError>;
}

impl<S> FrameStream for Box<S>
where
    S: FrameStream + ?Sized,
{
    fn read(&mut self) -> Result<Option<Frame>, DeviceError> {
        (**self).read()
    }
}
