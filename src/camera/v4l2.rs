use crate::{
    camera::{CameraSource, FrameStream},
    capture::Frame,
    error::DeviceError,
};
use num_traits::cast::ToPrimitive;
use opencv::{
    core::Mat,
    imgproc::{cvt_color_def, COLOR_BGR2RGB},
    prelude::*,
    videoio::{VideoCapture, CAP_PROP_FRAME_HEIGHT, CAP_PROP_FRAME_WIDTH, CAP_V4L2},
};
use tracing::{info, instrument, warn};

/// A V4L2 device opened through OpenCV: `/dev/video{device}`.
#[derive(Debug, Clone)]
pub struct V4l2Camera {
    pub device: i32,
    pub width: Option<u16>,
    pub height: Option<u16>,
}

impl V4l2Camera {
    pub fn new(device: i32) -> Self {
        Self {
            device,
            width: None,
            height: None,
        }
    }

    pub fn with_resolution(mut self, width: u16, height: u16) -> Self {
        self.width = Some(width);
        self.height = Some(height);
        self
    }
}

fn acquire_error(error: opencv::Error) -> DeviceError {
    DeviceError::Acquire(error.to_string())
}

fn read_error(error: opencv::Error) -> DeviceError {
    DeviceError::Read(error.to_string())
}

impl CameraSource for V4l2Camera {
    type Stream = V4l2Stream;

    #[instrument(name = "V4l2Camera::acquire", skip(self), fields(device = self.device))]
    fn acquire(&mut self) -> Result<Self::Stream, DeviceError> {
        let path = format!("/dev/video{}", self.device);
        if let Err(error) = std::fs::metadata(&path) {
            return Err(DeviceError::from_io(&error));
        }

        let mut capture = VideoCapture::new(self.device, CAP_V4L2).map_err(acquire_error)?;
        if !capture.is_opened().map_err(acquire_error)? {
            return Err(DeviceError::Acquire(format!("failed to open {}", path)));
        }

        if let Some(width) = self.width.map(f64::from) {
            capture
                .set(CAP_PROP_FRAME_WIDTH, width)
                .map_err(acquire_error)?;
        }
        if let Some(height) = self.height.map(f64::from) {
            capture
                .set(CAP_PROP_FRAME_HEIGHT, height)
                .map_err(acquire_error)?;
        }

        let width = capture.get(CAP_PROP_FRAME_WIDTH).map_err(acquire_error)?;
        let height = capture.get(CAP_PROP_FRAME_HEIGHT).map_err(acquire_error)?;
        info!(
            message = "got dimensions from video capture",
            width = width.to_i64().unwrap_or_default(),
            height = height.to_i64().unwrap_or_default()
        );

        Ok(V4l2Stream {
            capture,
            bgr: Mat::default(),
            rgb: Mat::default(),
        })
    }
}

pub struct V4l2Stream {
    capture: VideoCapture,
    bgr: Mat,
    rgb: Mat,
}

impl FrameStream for V4l2Stream {
    fn read(&mut self) -> Result<Option<Frame>, DeviceError> {
        if !self.capture.read(&mut self.bgr).map_err(read_error)? {
            return Ok(None);
        }
        cvt_color_def(&self.bgr, &mut self.rgb, COLOR_BGR2RGB).map_err(read_error)?;

        let width = self
            .rgb
            .cols()
            .to_u32()
            .ok_or_else(|| DeviceError::Read("negative frame width".into()))?;
        let height = self
            .rgb
            .rows()
            .to_u32()
            .ok_or_else(|| DeviceError::Read("negative frame height".into()))?;
        let data = self.rgb.data_bytes().map_err(read_error)?.to_vec();

        Frame::from_rgb(width, height, data)
            .map(Some)
            .map_err(|e| DeviceError::Read(e.to_string()))
    }
}

impl Drop for V4l2Stream {
    fn drop(&mut self) {
        if let Err(error) = self.capture.release() {
            warn!(message = "failed to release video capture", %error);
        } else {
            info!("released video capture");
        }
    }
}
