use crate::error::Error;
use base64::Engine as _;
use image::{codecs::jpeg::JpegEncoder, ColorType, RgbImage};
use std::{fmt, sync::Arc};
use tracing::{info, instrument};

/// One live video frame in RGB at the camera's native resolution.
#[derive(Clone, PartialEq)]
pub struct Frame(RgbImage);

impl Frame {
    pub fn new(image: RgbImage) -> Self {
        Self(image)
    }

    pub fn from_rgb(width: u32, height: u32, data: Vec<u8>) -> Result<Self, Error> {
        let len = data.len();
        RgbImage::from_raw(width, height, data)
            .map(Self)
            .ok_or(Error::FrameBufferSize(len, width, height))
    }

    #[inline]
    pub fn width(&self) -> u32 {
        self.0.width()
    }

    #[inline]
    pub fn height(&self) -> u32 {
        self.0.height()
    }

    pub fn image(&self) -> &RgbImage {
        &self.0
    }
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Frame")
            .field("width", &self.width())
            .field("height", &self.height())
            .finish()
    }
}

/// A JPEG-encoded still. Clones share the same bytes.
#[derive(Clone, PartialEq, Eq)]
pub struct EncodedImage {
    bytes: Arc<[u8]>,
    width: u32,
    height: u32,
}

impl EncodedImage {
    pub const MIME_TYPE: &'static str = "image/jpeg";

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// `data:image/jpeg;base64,...`, the form profile fields store.
    pub fn to_data_url(&self) -> String {
        format!(
            "data:{};base64,{}",
            Self::MIME_TYPE,
            base64::engine::general_purpose::STANDARD.encode(&self.bytes)
        )
    }
}

impl fmt::Debug for EncodedImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EncodedImage")
            .field("len", &self.bytes.len())
            .field("width", &self.width)
            .field("height", &self.height)
            .finish()
    }
}

pub fn encode_jpeg(frame: &Frame, quality: u8) -> Result<EncodedImage, Error> {
    let mut bytes = Vec::new();
    JpegEncoder::new_with_quality(&mut bytes, quality)
        .encode(frame.image().as_raw(), frame.width(), frame.height(), ColorType::Rgb8)
        .map_err(Error::EncodeJpeg)?;
    Ok(EncodedImage {
        bytes: bytes.into(),
        width: frame.width(),
        height: frame.height(),
    })
}

/// Turns the live frame into the session's single still.
#[derive(Debug)]
pub struct FrameCapturer {
    quality: u8,
    captured: bool,
}

impl FrameCapturer {
    pub fn new(quality: u8) -> Self {
        Self {
            quality,
            captured: false,
        }
    }

    pub fn has_captured(&self) -> bool {
        self.captured
    }

    #[instrument(name = "FrameCapturer::capture", skip(self, frame), fields(width = frame.width(), height = frame.height()))]
    pub fn capture(&mut self, frame: &Frame) -> Result<EncodedImage, Error> {
        if self.captured {
            return Err(Error::AlreadyCaptured);
        }
        let image = encode_jpeg(frame, self.quality)?;
        self.captured = true;
        info!(message = "captured frame", bytes = image.bytes().len());
        Ok(image)
    }
}

#[cfg(test)]
pub(crate) fn solid_frame(width: u32, height: u32, rgb: [u8; 3]) -> Frame {
    Frame::new(RgbImage::from_pixel(width, height, image::Rgb(rgb)))
}

#[cfg(test)]
mod tests {
    use super::{solid_frame, Frame, FrameCapturer};
    use crate::error::Error;
    use image::GenericImageView;

    #[test]
    fn capture_produces_jpeg_at_native_resolution() {
        let frame = solid_frame(64, 48, [200, 120, 40]);
        let mut capturer = FrameCapturer::new(90);
        let image = capturer.capture(&frame).unwrap();

        assert_eq!((image.width(), image.height()), (64, 48));
        // SOI marker
        assert_eq!(&image.bytes()[..2], &[0xFF, 0xD8]);

        let decoded = image::load_from_memory(image.bytes()).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (64, 48));
    }

    #[test]
    fn second_capture_is_rejected() {
        let frame = solid_frame(8, 8, [0, 0, 0]);
        let mut capturer = FrameCapturer::new(90);
        capturer.capture(&frame).unwrap();
        assert!(capturer.has_captured());
        assert!(matches!(capturer.capture(&frame), Err(Error::AlreadyCaptured)));
    }

    #[test]
    fn data_url_has_jpeg_prefix() {
        let frame = solid_frame(4, 4, [255, 255, 255]);
        let image = FrameCapturer::new(50).capture(&frame).unwrap();
        assert!(image.to_data_url().starts_with("data:image/jpeg;base64,/9j/"));
    }

    #[test]
    fn raw_buffer_size_is_checked() {
        assert!(Frame::from_rgb(2, 2, vec![0; 12]).is_ok());
        assert!(matches!(
            Frame::from_rgb(2, 2, vec![0; 11]),
            Err(Error::FrameBufferSize(11, 2, 2))
        ));
    }
}
