use crate::{
    camera::{CameraSource, FrameStream},
    capture::Frame,
    error::DeviceError,
};
use std::{
    collections::VecDeque,
    path::{Path, PathBuf},
    time::{Duration, Instant},
};
use tracing::{debug, info, instrument};

const EXTENSIONS: &[&str] = &["jpg", "jpeg", "png"];

/// Replays still images from a directory, in file name order, as a camera.
#[derive(Debug, Clone)]
pub struct ImageDirCamera {
    dir: PathBuf,
    interval: Duration,
}

impl ImageDirCamera {
    /// `fps` of zero replays as fast as frames are read.
    pub fn new<P>(dir: P, fps: u32) -> Self
    where
        P: AsRef<Path>,
    {
        Self {
            dir: dir.as_ref().to_path_buf(),
            interval: if fps == 0 {
                Duration::ZERO
            } else {
                Duration::from_secs(1) / fps
            },
        }
    }
}

impl CameraSource for ImageDirCamera {
    type Stream = ImageDirStream;

    #[instrument(name = "ImageDirCamera::acquire", skip(self), fields(dir = ?self.dir))]
    fn acquire(&mut self) -> Result<Self::Stream, DeviceError> {
        let entries = std::fs::read_dir(&self.dir).map_err(|e| DeviceError::from_io(&e))?;

        let mut paths = entries
            .filter_map(Result::ok)
            .map(|entry| entry.path())
            .filter(|path| {
                path.extension()
                    .and_then(|ext| ext.to_str())
                    .map_or(false, |ext| {
                        EXTENSIONS.iter().any(|known| ext.eq_ignore_ascii_case(known))
                    })
            })
            .collect::<Vec<_>>();
        if paths.is_empty() {
            return Err(DeviceError::NotFound);
        }
        paths.sort();

        info!(message = "replaying frames", count = paths.len());
        Ok(ImageDirStream {
            paths: paths.into(),
            interval: self.interval,
            next_at: None,
        })
    }
}

#[derive(Debug)]
pub struct ImageDirStream {
    paths: VecDeque<PathBuf>,
    interval: Duration,
    next_at: Option<Instant>,
}

impl ImageDirStream {
    pub fn remaining(&self) -> usize {
        self.paths.len()
    }
}

impl FrameStream for ImageDirStream {
    fn read(&mut self) -> Result<Option<Frame>, DeviceError> {
        let path = match self.paths.pop_front() {
            Some(path) => path,
            None => return Ok(None),
        };

        // pace like a live camera
        if let Some(next_at) = self.next_at {
            let now = Instant::now();
            if next_at > now {
                std::thread::sleep(next_at - now);
            }
        }
        self.next_at = Some(Instant::now() + self.interval);

        let image = image::open(&path)
            .map_err(|e| DeviceError::Read(format!("{}: {}", path.display(), e)))?;
        debug!(message = "read frame", path = ?path, remaining = self.remaining());
        Ok(Some(Frame::new(image.to_rgb8())))
    }
}
