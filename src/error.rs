/// Failures of the camera or the frame stream behind it.
///
/// These are terminal for a capture session: the session enters its error
/// phase and stays there until it is closed or retaken.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DeviceError {
    #[error("camera access was denied; allow camera access and reopen the capture")]
    PermissionDenied,

    #[error("no camera was found; make sure a camera device is available")]
    NotFound,

    #[error("failed to acquire camera stream: {0}")]
    Acquire(String),

    #[error("failed to read frame from camera: {0}")]
    Read(String),

    #[error("no frame was available to capture")]
    NoFrame,

    #[error("failed to capture frame: {0}")]
    Capture(String),
}

impl DeviceError {
    /// Map an I/O failure opening a device or frame source onto a device error.
    pub fn from_io(error: &std::io::Error) -> Self {
        match error.kind() {
            std::io::ErrorKind::NotFound => Self::NotFound,
            std::io::ErrorKind::PermissionDenied => Self::PermissionDenied,
            _ => Self::Acquire(error.to_string()),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Device(#[from] DeviceError),

    #[error("failed to encode captured frame as jpeg")]
    EncodeJpeg(#[source] image::ImageError),

    #[error("frame buffer of {0} bytes does not match {1}x{2} rgb")]
    FrameBufferSize(usize, u32, u32),

    #[error("a frame was already captured for this session")]
    AlreadyCaptured,

    #[error("capture requested while the countdown has not finished")]
    CaptureNotDue,

    #[error("expected {expected} hand landmarks, got {got}")]
    LandmarkCount { expected: usize, got: usize },

    #[error("failed to construct NotNan from f32: {1}")]
    ConstructNotNan(#[source] ordered_float::FloatIsNan, f32),

    #[error("landmark coordinate {0} is not finite")]
    NonFiniteCoordinate(f32),

    #[error("failed to parse landmark trace at line {1}")]
    ParseTrace(#[source] serde_json::Error, usize),

    #[error("failed to read landmark trace")]
    ReadTrace(#[source] std::io::Error),

    #[error("failed to open landmark trace: {1:?}")]
    OpenTrace(#[source] std::io::Error, std::path::PathBuf),

    #[error("invalid capture configuration: {0}")]
    InvalidConfig(&'static str),

    #[error("failed to spawn {0} thread")]
    SpawnThread(&'static str, #[source] std::io::Error),

    #[error("{0} thread panicked")]
    JoinThread(&'static str),
}
