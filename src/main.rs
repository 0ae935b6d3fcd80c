use anyhow::{anyhow, bail, Context, Result};
use crossbeam::channel::{bounded, Receiver, Sender, TrySendError};
use handshot::{
    camera::{CameraSource, ImageDirCamera},
    config::{self, CaptureConfig},
    pose::PoseId,
    runtime::{self, Callbacks, Outcome, SessionUpdate},
    source::LandmarkTrace,
    EncodedImage,
};
use image::RgbImage;
use indicatif::{ProgressBar, ProgressStyle};
use std::{
    io::BufRead,
    path::PathBuf,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};
use structopt::StructOpt;
use tracing::{debug, info, warn};
use tracing_subscriber::layer::SubscriberExt;

type Landmarks = LandmarkTrace<Box<dyn BufRead + Send>>;

#[derive(structopt::StructOpt)]
struct Opt {
    /// Directory of still images to replay as the camera feed.
    #[structopt(short, long)]
    frames: Option<PathBuf>,

    /// A v4l2 compatible device: /dev/videoDEVICE
    #[cfg(feature = "opencv")]
    #[structopt(short, long, conflicts_with = "frames")]
    device: Option<i32>,

    /// The requested width of camera frames.
    #[cfg(feature = "opencv")]
    #[structopt(short, long, default_value = "960")]
    width: u16,

    /// The requested height of camera frames.
    #[cfg(feature = "opencv")]
    #[structopt(short = "-H", long, default_value = "720")]
    height: u16,

    /// JSON-lines hand landmark trace, one line per frame, or - for stdin.
    #[structopt(short = "-L", long)]
    landmarks: PathBuf,

    /// Where to write the captured JPEG.
    #[structopt(short, long, default_value = "capture.jpg")]
    output: PathBuf,

    /// Print the capture as a data URL instead of writing a file.
    #[structopt(long)]
    data_url: bool,

    /// How long each pose must be held, in milliseconds.
    #[structopt(long, default_value = "800")]
    settle_ms: u64,

    /// Countdown start after the last pose.
    #[structopt(short, long, default_value = "3")]
    countdown: u8,

    /// Countdown tick interval, in milliseconds.
    #[structopt(long, default_value = "1000")]
    tick_ms: u64,

    /// How far a fingertip must clear its knuckles to count as extended.
    #[structopt(short, long, default_value = "0.06")]
    margin: f32,

    /// Hands detected with a lower score are ignored.
    #[structopt(long, default_value = "0.7")]
    min_hand_score: f32,

    /// JPEG quality, 1-100.
    #[structopt(short, long, default_value = "90")]
    quality: u8,

    /// Frame rate to replay image directories at. 0 replays unpaced.
    #[structopt(long, default_value = "30")]
    fps: u32,

    /// Start over this many times when a session fails or runs out of frames.
    #[structopt(short, long, default_value = "0")]
    retakes: usize,

    #[structopt(short, long, default_value = "info", env = "RUST_LOG")]
    log_level: tracing_subscriber::filter::EnvFilter,

    #[structopt(short, long)]
    show_progress: bool,
}

impl Opt {
    fn capture_config(&self) -> CaptureConfig {
        CaptureConfig {
            steps: PoseId::SEQUENCE.to_vec(),
            settle: Duration::from_millis(self.settle_ms),
            countdown: self.countdown,
            tick: Duration::from_millis(self.tick_ms),
            extension_margin: self.margin,
            box_padding: config::DEFAULT_BOX_PADDING,
            jpeg_quality: self.quality,
        }
    }
}

/// How often the main thread checks for Ctrl-C while a session runs.
const POLL_INTERVAL: Duration = Duration::from_millis(30);

#[cfg(feature = "gui")]
mod gui {
    use anyhow::{Context, Result};
    use image::RgbImage;
    use num_traits::cast::ToPrimitive;
    use opencv::{
        core::{Mat, Scalar, CV_8UC3},
        highgui,
        imgproc::{cvt_color_def, COLOR_RGB2BGR},
        prelude::*,
    };

    pub(crate) fn show(image: &RgbImage) -> Result<()> {
        let rows = image.height().to_i32().context("frame height out of range")?;
        let cols = image.width().to_i32().context("frame width out of range")?;
        let mut rgb = Mat::new_rows_cols_with_default(rows, cols, CV_8UC3, Scalar::all(0.0))
            .context("failed allocating preview frame")?;
        rgb.data_bytes_mut()
            .context("failed getting preview frame bytes")?
            .copy_from_slice(image.as_raw());

        let mut bgr = Mat::default();
        cvt_color_def(&rgb, &mut bgr, COLOR_RGB2BGR).context("failed converting preview frame")?;
        highgui::imshow("handshot", &bgr).context("failed showing preview frame")
    }

    pub(crate) fn wait_q(delay_ms: i32) -> Result<bool> {
        const Q_KEY: u8 = b'q';
        Ok(highgui::wait_key(delay_ms)? != i32::from(Q_KEY))
    }
}

fn progress_bar(show_progress: bool) -> Option<ProgressBar> {
    if show_progress {
        let pb = ProgressBar::new_spinner().with_style(
            ProgressStyle::default_spinner()
                .tick_chars("⠁⠂⠄⡀⢀⠠⠐⠈ ")
                .template("{prefix:.bold.dim} {spinner} {wide_msg}"),
        );
        pb.set_prefix("handshot");
        Some(pb)
    } else {
        None
    }
}

/// Hand a preview to the display without blocking the session. Returns
/// whether the display took it.
fn offer_preview(previews: &Sender<RgbImage>, image: RgbImage) -> bool {
    match previews.try_send(image) {
        Ok(()) => true,
        // the display is behind, skip this frame
        Err(TrySendError::Full(_)) => false,
        Err(TrySendError::Disconnected(_)) => {
            debug!("preview display closed");
            false
        }
    }
}

fn callbacks(progress: Option<ProgressBar>, previews: Option<Sender<RgbImage>>) -> Callbacks {
    Callbacks::new(
        |image: EncodedImage| {
            info!(
                message = "captured still",
                width = image.width(),
                height = image.height(),
                bytes = image.bytes().len()
            )
        },
        || info!("capture cancelled"),
    )
    .on_update(move |update: &SessionUpdate<'_>| {
        if let Some(pb) = &progress {
            pb.set_message(update.message());
            pb.tick();
        }
        if let Some(previews) = &previews {
            if let Some(image) = update.preview() {
                offer_preview(previews, image);
            }
        }
    })
}

/// Run sessions on `camera` until one captures, fails for good, or is
/// cancelled.
fn run<C>(
    camera: C,
    landmarks: Landmarks,
    config: CaptureConfig,
    opt: &Opt,
    running: &AtomicBool,
) -> Result<Outcome>
where
    C: CameraSource,
{
    let progress = progress_bar(opt.show_progress);
    let (previews_tx, previews_rx) = bounded(1);
    let previews_tx = if cfg!(feature = "gui") {
        Some(previews_tx)
    } else {
        None
    };

    let mut handle = runtime::open(
        camera,
        landmarks,
        config,
        callbacks(progress.clone(), previews_tx),
    )
    .context("failed opening capture session")?;

    let mut retakes = opt.retakes;
    let outcome = loop {
        let outcome = match wait(&mut handle, running, &previews_rx)? {
            Some(outcome) => outcome,
            None => break Outcome::Cancelled,
        };
        match outcome {
            Outcome::Failed(_) | Outcome::StreamEnded if retakes > 0 => {
                retakes -= 1;
                warn!(message = "session ended without a capture, retaking", ?outcome, retakes_left = retakes);
                handle = handle.retake().context("failed retaking capture session")?;
            }
            outcome => break outcome,
        }
    };

    handle.close().context("failed closing capture session")?;
    if let Some(pb) = progress {
        pb.finish_and_clear();
    }
    Ok(outcome)
}

/// Wait for the session outcome, or `None` if the user cancelled.
fn wait<C>(
    handle: &mut runtime::SessionHandle<C, Landmarks>,
    running: &AtomicBool,
    #[cfg(feature = "gui")] previews: &Receiver<RgbImage>,
    #[cfg(not(feature = "gui"))] _previews: &Receiver<RgbImage>,
) -> Result<Option<Outcome>>
where
    C: CameraSource,
{
    while running.load(Ordering::SeqCst) {
        if let Some(outcome) = handle.wait_timeout(POLL_INTERVAL) {
            return Ok(Some(outcome));
        }

        #[cfg(feature = "gui")]
        {
            if let Ok(image) = previews.try_recv() {
                gui::show(&image)?;
            }
            if !gui::wait_q(1).context("failed waiting for 'q' key")? {
                running.store(false, Ordering::SeqCst);
            }
        }
    }
    Ok(None)
}

fn open_camera_and_run(opt: &Opt, config: CaptureConfig, running: &AtomicBool) -> Result<Outcome> {
    let landmarks: Landmarks = LandmarkTrace::open(&opt.landmarks)
        .context("failed opening landmark trace")?
        .with_min_score(opt.min_hand_score);

    #[cfg(feature = "opencv")]
    {
        if let Some(device) = opt.device {
            let camera =
                handshot::camera::V4l2Camera::new(device).with_resolution(opt.width, opt.height);
            return run(camera, landmarks, config, opt, running);
        }
    }

    let frames = opt
        .frames
        .as_ref()
        .ok_or_else(|| anyhow!("no camera given; pass --frames"))?;
    run(ImageDirCamera::new(frames, opt.fps), landmarks, config, opt, running)
}

fn main() -> Result<()> {
    let mut opt = Opt::from_args();

    tracing::subscriber::set_global_default(
        tracing_subscriber::registry()
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .with(std::mem::take(&mut opt.log_level)),
    )?;

    let config = opt.capture_config();
    config.validate().context("invalid capture options")?;

    let running = Arc::new(AtomicBool::new(true));
    let running_ctrl_c = running.clone();

    ctrlc::set_handler(move || {
        running_ctrl_c.store(false, Ordering::SeqCst);
    })
    .context("failed setting Ctrl-C handler")?;

    match open_camera_and_run(&opt, config, &running)? {
        Outcome::Captured(image) => {
            if opt.data_url {
                println!("{}", image.to_data_url());
            } else {
                std::fs::write(&opt.output, image.bytes())
                    .with_context(|| format!("failed writing capture to {:?}", opt.output))?;
                info!(message = "wrote capture", path = ?opt.output);
            }
            Ok(())
        }
        Outcome::Failed(error) => Err(error).context("capture failed"),
        Outcome::StreamEnded => bail!("camera stream ended before all poses were held"),
        Outcome::Cancelled => bail!("capture cancelled"),
    }
}
