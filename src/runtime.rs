//! Running a capture session against a live camera.
//!
//! [`open`] starts two threads. The camera thread acquires the device, reads
//! frames, asks the landmark source about each one and sends the pair on. The
//! event loop thread owns the [`CaptureSession`], applies frames and fires
//! timers as their deadlines pass, and invokes the callbacks. The returned
//! [`SessionHandle`] closes, retakes or waits on the session.

use crate::{
    camera::{CameraSource, FrameStream},
    capture::{EncodedImage, Frame},
    config::CaptureConfig,
    error::{DeviceError, Error},
    landmarks::LandmarkFrame,
    overlay::{self, BoundingBox},
    pose::PoseId,
    session::{CaptureSession, FrameVerdict, Phase, PoseStatus, Transition},
    source::LandmarkSource,
};
use crossbeam::channel::{after, bounded, never, select, Receiver, RecvTimeoutError, Sender};
use image::RgbImage;
use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread::JoinHandle,
    time::{Duration, Instant},
};
use tracing::{debug, error, info, instrument, warn};

/// Frames in flight between the camera thread and the event loop.
const EVENT_QUEUE_SIZE: usize = 2;

type CapturedFn = Box<dyn FnMut(EncodedImage) + Send>;
type CancelFn = Box<dyn FnMut() + Send>;
type UpdateFn = Box<dyn FnMut(&SessionUpdate<'_>) + Send>;

/// Hooks invoked by a running session.
///
/// `on_captured` fires exactly once, when the still is taken. `on_cancel`
/// fires at most once, when a session that never captured is closed.
/// `on_update` fires after every processed event. No hook fires after
/// [`SessionHandle::close`] returns.
pub struct Callbacks {
    on_captured: CapturedFn,
    on_cancel: CancelFn,
    on_update: Option<UpdateFn>,
}

impl Callbacks {
    pub fn new<C, X>(on_captured: C, on_cancel: X) -> Self
    where
        C: FnMut(EncodedImage) + Send + 'static,
        X: FnMut() + Send + 'static,
    {
        Self {
            on_captured: Box::new(on_captured),
            on_cancel: Box::new(on_cancel),
            on_update: None,
        }
    }

    pub fn on_update<U>(mut self, on_update: U) -> Self
    where
        U: FnMut(&SessionUpdate<'_>) + Send + 'static,
    {
        self.on_update = Some(Box::new(on_update));
        self
    }
}

impl std::fmt::Debug for Callbacks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Callbacks")
            .field("on_update", &self.on_update.is_some())
            .finish()
    }
}

/// A snapshot of the session for rendering a live view.
#[derive(Debug)]
pub struct SessionUpdate<'a> {
    pub phase: &'a Phase,
    pub step: usize,
    pub pose: PoseId,
    pub status: PoseStatus,
    pub countdown: Option<u8>,
    /// Classification of the frame this update was produced for, if any.
    pub verdict: Option<FrameVerdict>,
    /// Box around the hand, absent once captured or with no hand in view.
    pub overlay: Option<BoundingBox>,
    pub frame: Option<&'a Frame>,
    pub transitions: &'a [Transition],
}

impl SessionUpdate<'_> {
    /// Text for the status indicator.
    pub fn message(&self) -> String {
        match self.phase {
            Phase::AwaitingPose { .. } => format!("{}: {}", self.pose.label(), self.status.message()),
            Phase::Countdown { remaining } => format!("Capturing photo in {}…", remaining),
            Phase::Captured => "Captured".to_string(),
            Phase::Error(error) => error.to_string(),
        }
    }

    /// The latest frame with the overlay box drawn onto it.
    pub fn preview(&self) -> Option<RgbImage> {
        let mut image = self.frame?.image().clone();
        if let Some(bbox) = self.overlay {
            let matched = self.verdict.map_or(false, |verdict| verdict.matched);
            overlay::draw_box(&mut image, &bbox, overlay::color_for(matched));
        }
        Some(image)
    }
}

/// How a session ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Captured(EncodedImage),
    Failed(DeviceError),
    /// The camera ran out of frames before a capture could happen.
    StreamEnded,
    /// Closed before reaching any other outcome.
    Cancelled,
}

#[derive(Debug)]
enum CameraEvent {
    Frame { frame: Frame, landmarks: LandmarkFrame },
    Failed(DeviceError),
    Ended,
}

#[derive(Debug)]
enum Control {
    Close,
}

struct LoopExit {
    callbacks: Callbacks,
    captured: bool,
}

/// Start a capture session.
#[instrument(name = "runtime::open", skip(camera, landmarks, config, callbacks))]
pub fn open<C, L>(
    camera: C,
    landmarks: L,
    config: CaptureConfig,
    callbacks: Callbacks,
) -> Result<SessionHandle<C, L>, Error>
where
    C: CameraSource,
    L: LandmarkSource + 'static,
{
    let session = CaptureSession::new(&config)?;

    let alive = Arc::new(AtomicBool::new(true));
    let streaming = Arc::new(AtomicBool::new(true));
    let (events_tx, events_rx) = bounded(EVENT_QUEUE_SIZE);
    let (control_tx, control_rx) = bounded(1);
    let (outcome_tx, outcome_rx) = bounded(1);

    let streaming_camera = streaming.clone();
    let camera_thread = std::thread::Builder::new()
        .name("handshot-camera".to_string())
        .spawn(move || run_camera(camera, landmarks, events_tx, streaming_camera))
        .map_err(|e| Error::SpawnThread("camera", e))?;

    let event_loop = EventLoop {
        session,
        padding: config.box_padding,
        alive: alive.clone(),
        streaming: streaming.clone(),
        outcome: Some(outcome_tx),
        pending: None,
        callbacks,
        latest: None,
    };
    let loop_thread = match std::thread::Builder::new()
        .name("handshot-session".to_string())
        .spawn(move || event_loop.run(events_rx, control_rx))
    {
        Ok(handle) => handle,
        Err(e) => {
            // the camera thread exits once its event channel is gone
            streaming.store(false, Ordering::SeqCst);
            if camera_thread.join().is_err() {
                error!("camera thread panicked");
            }
            return Err(Error::SpawnThread("session", e));
        }
    };

    info!("capture session opened");
    Ok(SessionHandle {
        alive,
        streaming,
        control: control_tx,
        outcome_rx,
        outcome: None,
        camera_thread: Some(camera_thread),
        loop_thread: Some(loop_thread),
        config,
    })
}

fn run_camera<C, L>(
    mut camera: C,
    mut landmarks: L,
    events: Sender<CameraEvent>,
    streaming: Arc<AtomicBool>,
) -> (C, L)
where
    C: CameraSource,
    L: LandmarkSource,
{
    let mut stream = match camera.acquire() {
        Ok(stream) => stream,
        Err(error) => {
            warn!(message = "failed to acquire camera", %error);
            if events.send(CameraEvent::Failed(error)).is_err() {
                debug!("session closed before camera failure was delivered");
            }
            return (camera, landmarks);
        }
    };
    info!("camera acquired");

    let mut nframes = 0usize;
    while streaming.load(Ordering::SeqCst) {
        let event = match stream.read() {
            Ok(Some(frame)) => {
                let detected = landmarks.detect(&frame).unwrap_or_else(|error| {
                    debug!(message = "landmark detection failed, treating as no hand", %error);
                    LandmarkFrame::Absent
                });
                nframes += 1;
                CameraEvent::Frame {
                    frame,
                    landmarks: detected,
                }
            }
            Ok(None) => CameraEvent::Ended,
            Err(error) => CameraEvent::Failed(error),
        };
        let last = !matches!(event, CameraEvent::Frame { .. });
        if events.send(event).is_err() || last {
            break;
        }
    }

    drop(stream);
    info!(message = "camera released", frames = nframes);
    (camera, landmarks)
}

struct EventLoop {
    session: CaptureSession,
    padding: u32,
    alive: Arc<AtomicBool>,
    streaming: Arc<AtomicBool>,
    outcome: Option<Sender<Outcome>>,
    pending: Option<Outcome>,
    callbacks: Callbacks,
    latest: Option<Frame>,
}

impl EventLoop {
    fn run(mut self, mut events: Receiver<CameraEvent>, control: Receiver<Control>) -> LoopExit {
        let mut ended = false;

        while self.alive.load(Ordering::SeqCst) {
            let timer = match self.session.next_deadline() {
                Some(at) => after(at.saturating_duration_since(Instant::now())),
                None => never(),
            };

            let mut stop_events = false;
            select! {
                recv(control) -> msg => {
                    match msg {
                        Ok(Control::Close) => debug!("close requested"),
                        Err(_) => debug!("session handle dropped"),
                    }
                    break;
                }
                recv(events) -> msg => match msg {
                    Ok(CameraEvent::Frame { frame, landmarks }) => {
                        let now = Instant::now();
                        self.latest = Some(frame);
                        let transitions = self.poll(now);
                        let verdict = if self.session.is_terminal() {
                            None
                        } else {
                            Some(self.session.on_frame(now, &landmarks))
                        };
                        self.update(verdict, Some(&landmarks), &transitions);
                    }
                    Ok(CameraEvent::Failed(error)) => {
                        let mut transitions = Vec::new();
                        if self.session.fail(error.clone()) {
                            self.streaming.store(false, Ordering::SeqCst);
                            stop_events = true;
                            transitions.push(Transition::Failed(error.clone()));
                            self.finish(Outcome::Failed(error));
                        }
                        self.update(None, None, &transitions);
                    }
                    Ok(CameraEvent::Ended) | Err(_) => {
                        debug!("camera stream ended");
                        ended = true;
                        stop_events = true;
                    }
                },
                recv(timer) -> _ => {
                    let transitions = self.poll(Instant::now());
                    self.update(None, None, &transitions);
                }
            }

            if stop_events {
                events = never();
            }
            if ended && !self.session.is_terminal() && self.session.next_deadline().is_none() {
                info!(message = "camera stream ended before capture", step = self.session.step());
                self.finish(Outcome::StreamEnded);
            }
            self.deliver();
        }

        self.streaming.store(false, Ordering::SeqCst);
        self.session.cancel_timers();
        LoopExit {
            captured: matches!(self.session.phase(), Phase::Captured),
            callbacks: self.callbacks,
        }
    }

    /// Fire due timers, taking the still if the countdown finished.
    fn poll(&mut self, now: Instant) -> Vec<Transition> {
        let mut transitions = self.session.poll(now);
        if transitions.contains(&Transition::CaptureDue) {
            match self.session.capture(self.latest.as_ref()) {
                Ok(image) => {
                    self.streaming.store(false, Ordering::SeqCst);
                    transitions.push(Transition::Captured);
                    if self.alive.load(Ordering::SeqCst) {
                        (self.callbacks.on_captured)(image.clone());
                    }
                    self.finish(Outcome::Captured(image));
                }
                Err(error) => match self.session.phase().clone() {
                    Phase::Error(device_error) => {
                        error!(message = "capture failed", %error);
                        self.streaming.store(false, Ordering::SeqCst);
                        transitions.push(Transition::Failed(device_error.clone()));
                        self.finish(Outcome::Failed(device_error));
                    }
                    phase => warn!(message = "capture rejected", %error, ?phase),
                },
            }
        }
        for transition in &transitions {
            debug!(message = "transition", ?transition);
        }
        transitions
    }

    /// Record the outcome. Only the first one counts; it is delivered to
    /// waiters once the update for the current event has gone out.
    fn finish(&mut self, outcome: Outcome) {
        if self.outcome.is_some() && self.pending.is_none() {
            self.pending = Some(outcome);
        }
    }

    fn deliver(&mut self) {
        if let Some(outcome) = self.pending.take() {
            if let Some(tx) = self.outcome.take() {
                if tx.send(outcome).is_err() {
                    debug!("no one is waiting on the session outcome");
                }
            }
        }
    }

    fn update(
        &mut self,
        verdict: Option<FrameVerdict>,
        landmarks: Option<&LandmarkFrame>,
        transitions: &[Transition],
    ) {
        if !self.alive.load(Ordering::SeqCst) {
            return;
        }
        let on_update = match self.callbacks.on_update.as_mut() {
            Some(on_update) => on_update,
            None => return,
        };

        let session = &self.session;
        let frame = self.latest.as_ref();
        let overlay = match (session.phase(), frame, landmarks.and_then(LandmarkFrame::hand)) {
            (Phase::Captured, ..) => None,
            (_, Some(frame), Some(hand)) => {
                BoundingBox::around(hand, frame.width(), frame.height(), self.padding)
            }
            _ => None,
        };

        on_update(&SessionUpdate {
            phase: session.phase(),
            step: session.step(),
            pose: session.current_pose(),
            status: session.status(),
            countdown: session.countdown(),
            verdict,
            overlay,
            frame,
            transitions,
        });
    }
}

/// Owner of a running session. Dropping it closes the session.
pub struct SessionHandle<C, L>
where
    C: CameraSource,
    L: LandmarkSource + 'static,
{
    alive: Arc<AtomicBool>,
    streaming: Arc<AtomicBool>,
    control: Sender<Control>,
    outcome_rx: Receiver<Outcome>,
    outcome: Option<Outcome>,
    camera_thread: Option<JoinHandle<(C, L)>>,
    loop_thread: Option<JoinHandle<LoopExit>>,
    config: CaptureConfig,
}

impl<C, L> SessionHandle<C, L>
where
    C: CameraSource,
    L: LandmarkSource + 'static,
{
    /// Block until the session captures, fails, or runs out of frames.
    pub fn wait(&mut self) -> Outcome {
        if let Some(outcome) = &self.outcome {
            return outcome.clone();
        }
        let outcome = self.outcome_rx.recv().unwrap_or(Outcome::Cancelled);
        self.outcome = Some(outcome.clone());
        outcome
    }

    /// Like [`wait`](Self::wait), giving up after `timeout`.
    pub fn wait_timeout(&mut self, timeout: Duration) -> Option<Outcome> {
        if let Some(outcome) = &self.outcome {
            return Some(outcome.clone());
        }
        let outcome = match self.outcome_rx.recv_timeout(timeout) {
            Ok(outcome) => outcome,
            Err(RecvTimeoutError::Timeout) => return None,
            Err(RecvTimeoutError::Disconnected) => Outcome::Cancelled,
        };
        self.outcome = Some(outcome.clone());
        Some(outcome)
    }

    /// The configuration the session was opened with. A retake reuses it.
    pub fn config(&self) -> &CaptureConfig {
        &self.config
    }

    /// Stop the session and release the camera. Fires `on_cancel` if nothing
    /// was captured.
    #[instrument(name = "SessionHandle::close", skip(self))]
    pub fn close(mut self) -> Result<(), Error> {
        if let Some((_, _, mut callbacks, captured)) = self.shutdown()? {
            if !captured {
                (callbacks.on_cancel)();
            }
        }
        Ok(())
    }

    /// Tear the session down and start over on the same camera, landmark
    /// source and callbacks. `on_cancel` does not fire.
    #[instrument(name = "SessionHandle::retake", skip(self))]
    pub fn retake(mut self) -> Result<Self, Error> {
        let config = self.config().clone();
        match self.shutdown()? {
            Some((camera, landmarks, callbacks, _)) => {
                info!("retaking");
                open(camera, landmarks, config, callbacks)
            }
            None => Err(Error::JoinThread("session")),
        }
    }

    /// Stop both threads and hand back what they owned. The camera stream
    /// has been dropped by the time this returns.
    fn shutdown(&mut self) -> Result<Option<(C, L, Callbacks, bool)>, Error> {
        self.alive.store(false, Ordering::SeqCst);
        self.streaming.store(false, Ordering::SeqCst);
        if self.control.send(Control::Close).is_err() {
            debug!("event loop already stopped");
        }

        let exit = match self.loop_thread.take() {
            Some(handle) => Some(handle.join().map_err(|_| Error::JoinThread("session"))?),
            None => None,
        };
        let parts = match self.camera_thread.take() {
            Some(handle) => Some(handle.join().map_err(|_| Error::JoinThread("camera"))?),
            None => None,
        };

        Ok(match (exit, parts) {
            (Some(LoopExit { callbacks, captured }), Some((camera, landmarks))) => {
                info!(message = "capture session closed", captured);
                Some((camera, landmarks, callbacks, captured))
            }
            _ => None,
        })
    }
}

impl<C, L> Drop for SessionHandle<C, L>
where
    C: CameraSource,
    L: LandmarkSource + 'static,
{
    fn drop(&mut self) {
        match self.shutdown() {
            Ok(Some((_, _, mut callbacks, false))) => (callbacks.on_cancel)(),
            Ok(_) => {}
            Err(error) => error!(message = "failed to close capture session", %error),
        }
    }
}
