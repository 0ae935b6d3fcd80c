//! The guided capture state machine.
//!
//! A session walks through its pose steps, runs a countdown, and captures one
//! still. It is driven from outside: [`CaptureSession::on_frame`] for every
//! classified video frame and [`CaptureSession::poll`] whenever time may have
//! passed. Both take the current instant so timing is wall-clock based and
//! independent of frame rate.
//!
//! Poll before applying a frame, so timers that expired before the frame
//! arrived fire first.

use crate::{
    capture::{EncodedImage, Frame, FrameCapturer},
    config::CaptureConfig,
    error::{DeviceError, Error},
    landmarks::LandmarkFrame,
    pose::{self, PoseId},
    timer::{Deadline, Ticker},
};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Phase {
    /// Waiting for `steps[step]` to be held for the settle duration.
    AwaitingPose { step: usize },
    /// Counting down to the capture. Pose loss does not interrupt it.
    Countdown { remaining: u8 },
    Captured,
    Error(DeviceError),
}

impl Phase {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Captured | Self::Error(_))
    }
}

/// The status indicator shown next to the live feed.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum PoseStatus {
    Idle,
    Detected,
    NotDetected,
}

impl PoseStatus {
    pub fn message(self) -> &'static str {
        match self {
            Self::Idle => "Raise your hand",
            Self::Detected => "Pose detected",
            Self::NotDetected => "Hand pose not detected",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    StepAdvanced { from: usize, to: usize },
    CountdownStarted { remaining: u8 },
    CountdownTick { remaining: u8 },
    /// The countdown reached zero; the owner must call
    /// [`CaptureSession::capture`] with the latest frame.
    CaptureDue,
    Captured,
    Failed(DeviceError),
}

/// Classification result for one frame, for status and overlay rendering.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameVerdict {
    pub pose: Option<PoseId>,
    /// The frame shows the pose the current step requires.
    pub matched: bool,
}

impl FrameVerdict {
    const IGNORED: Self = Self {
        pose: None,
        matched: false,
    };
}

#[derive(Debug)]
pub struct CaptureSession {
    steps: Vec<PoseId>,
    settle: Duration,
    margin: f32,
    countdown_start: u8,
    phase: Phase,
    step: usize,
    settle_timer: Deadline,
    ticker: Ticker,
    status: PoseStatus,
    capturer: FrameCapturer,
    image: Option<EncodedImage>,
}

impl CaptureSession {
    pub fn new(config: &CaptureConfig) -> Result<Self, Error> {
        config.validate()?;
        Ok(Self {
            steps: config.steps.clone(),
            settle: config.settle,
            margin: config.extension_margin,
            countdown_start: config.countdown,
            phase: Phase::AwaitingPose { step: 0 },
            step: 0,
            settle_timer: Deadline::default(),
            ticker: Ticker::new(config.tick),
            status: PoseStatus::Idle,
            capturer: FrameCapturer::new(config.jpeg_quality),
            image: None,
        })
    }

    pub fn phase(&self) -> &Phase {
        &self.phase
    }

    /// Index of the current step. Never decreases.
    pub fn step(&self) -> usize {
        self.step
    }

    pub fn steps(&self) -> &[PoseId] {
        &self.steps
    }

    /// The pose the session is asking for, or last asked for once past the
    /// pose steps.
    pub fn current_pose(&self) -> PoseId {
        self.steps[self.step]
    }

    pub fn status(&self) -> PoseStatus {
        self.status
    }

    pub fn countdown(&self) -> Option<u8> {
        match self.phase {
            Phase::Countdown { remaining } => Some(remaining),
            _ => None,
        }
    }

    pub fn image(&self) -> Option<&EncodedImage> {
        self.image.as_ref()
    }

    pub fn is_terminal(&self) -> bool {
        self.phase.is_terminal()
    }

    pub fn settle_pending(&self) -> bool {
        self.settle_timer.is_armed()
    }

    /// Earliest instant at which [`poll`](Self::poll) has something to do.
    pub fn next_deadline(&self) -> Option<Instant> {
        match (self.settle_timer.due_at(), self.ticker.due_at()) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    /// Apply one frame's landmarks.
    pub fn on_frame(&mut self, now: Instant, frame: &LandmarkFrame) -> FrameVerdict {
        if self.is_terminal() {
            return FrameVerdict::IGNORED;
        }

        let pose = pose::classify(frame, self.margin);
        let matched = match self.phase {
            Phase::AwaitingPose { step } => pose == Some(self.steps[step]),
            _ => false,
        };

        if matched {
            self.status = PoseStatus::Detected;
            // one timer per matching streak
            if !self.settle_timer.is_armed() {
                self.settle_timer.arm(now, self.settle);
                debug!(message = "settle timer armed", step = self.step, pose = ?pose);
            }
        } else {
            self.status = PoseStatus::NotDetected;
            if self.settle_timer.is_armed() {
                self.settle_timer.cancel();
                debug!(message = "settle timer cancelled", step = self.step, pose = ?pose);
            }
        }

        FrameVerdict { pose, matched }
    }

    /// Fire whatever timers have expired by `now`.
    pub fn poll(&mut self, now: Instant) -> Vec<Transition> {
        let mut transitions = Vec::new();
        match self.phase {
            Phase::AwaitingPose { step } => {
                let due = self.settle_timer.due_at();
                if self.settle_timer.fire(now) {
                    if step + 1 >= self.steps.len() {
                        self.phase = Phase::Countdown {
                            remaining: self.countdown_start,
                        };
                        self.ticker.start(due.unwrap_or(now));
                        info!(message = "all poses held, counting down", from = self.countdown_start);
                        transitions.push(Transition::CountdownStarted {
                            remaining: self.countdown_start,
                        });
                        // a poll arriving very late may already owe ticks
                        transitions.extend(self.drain_ticks(now));
                    } else {
                        self.step = step + 1;
                        self.phase = Phase::AwaitingPose { step: self.step };
                        info!(message = "pose accepted", from = step, to = self.step, next = %self.current_pose());
                        transitions.push(Transition::StepAdvanced {
                            from: step,
                            to: self.step,
                        });
                    }
                }
            }
            Phase::Countdown { .. } => transitions.extend(self.drain_ticks(now)),
            Phase::Captured | Phase::Error(_) => {}
        }
        transitions
    }

    fn drain_ticks(&mut self, now: Instant) -> Vec<Transition> {
        let mut transitions = Vec::new();
        while let Phase::Countdown { remaining } = self.phase {
            if remaining == 0 || !self.ticker.tick(now) {
                break;
            }
            let remaining = remaining - 1;
            self.phase = Phase::Countdown { remaining };
            if remaining == 0 {
                self.ticker.stop();
                transitions.push(Transition::CaptureDue);
            } else {
                debug!(message = "countdown", remaining);
                transitions.push(Transition::CountdownTick { remaining });
            }
        }
        transitions
    }

    /// Take the still once the countdown has reached zero. With no frame to
    /// capture the session fails with [`DeviceError::NoFrame`].
    pub fn capture(&mut self, frame: Option<&Frame>) -> Result<EncodedImage, Error> {
        if self.capturer.has_captured() {
            return Err(Error::AlreadyCaptured);
        }
        if self.phase != (Phase::Countdown { remaining: 0 }) {
            return Err(Error::CaptureNotDue);
        }

        let frame = match frame {
            Some(frame) => frame,
            None => {
                self.fail(DeviceError::NoFrame);
                return Err(DeviceError::NoFrame.into());
            }
        };

        match self.capturer.capture(frame) {
            Ok(image) => {
                self.phase = Phase::Captured;
                self.image = Some(image.clone());
                Ok(image)
            }
            Err(error) => {
                self.fail(DeviceError::Capture(error.to_string()));
                Err(error)
            }
        }
    }

    /// Move to the error phase. Returns `false` if the session had already
    /// finished.
    pub fn fail(&mut self, error: DeviceError) -> bool {
        if self.is_terminal() {
            return false;
        }
        warn!(message = "capture session failed", %error);
        self.cancel_timers();
        self.status = PoseStatus::NotDetected;
        self.phase = Phase::Error(error);
        true
    }

    pub fn cancel_timers(&mut self) {
        self.settle_timer.cancel();
        self.ticker.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::{CaptureSession, Phase, PoseStatus, Transition};
    use crate::{
        capture::solid_frame,
        config::CaptureConfig,
        error::{DeviceError, Error},
        landmarks::LandmarkFrame,
        pose::fixtures::{frame, FIST, OPEN, POSE_ONE, POSE_THREE, POSE_TWO},
    };
    use proptest::prelude::*;
    use std::time::{Duration, Instant};

    const FRAME_MS: u64 = 33;

    fn ms(millis: u64) -> Duration {
        Duration::from_millis(millis)
    }

    fn session() -> CaptureSession {
        CaptureSession::new(&CaptureConfig::default()).unwrap()
    }

    /// Feed `landmarks` every frame interval over `[from, to)`, polling
    /// before each frame the way the runtime does.
    fn hold(
        session: &mut CaptureSession,
        from: Instant,
        to: Instant,
        landmarks: &LandmarkFrame,
    ) -> Vec<Transition> {
        let mut transitions = Vec::new();
        let mut now = from;
        while now < to {
            transitions.extend(session.poll(now));
            session.on_frame(now, landmarks);
            now += ms(FRAME_MS);
        }
        transitions.extend(session.poll(to));
        transitions
    }

    mod progression_tests {
        use super::*;

        #[test]
        fn holding_pose_one_advances_to_step_one() {
            let mut session = session();
            let t0 = Instant::now();
            let transitions = hold(&mut session, t0, t0 + ms(900), &frame(POSE_ONE));
            assert_eq!(transitions, vec![Transition::StepAdvanced { from: 0, to: 1 }]);
            assert_eq!(session.phase(), &Phase::AwaitingPose { step: 1 });
        }

        #[test]
        fn losing_the_pose_after_advancing_does_not_regress() {
            let mut session = session();
            let t0 = Instant::now();
            hold(&mut session, t0, t0 + ms(900), &frame(POSE_ONE));
            let t1 = t0 + ms(900);
            hold(&mut session, t1, t1 + ms(200), &LandmarkFrame::Absent);
            let t2 = t1 + ms(200);
            let transitions = hold(&mut session, t2, t2 + ms(1000), &frame(POSE_ONE));
            assert!(transitions.is_empty());
            assert_eq!(session.step(), 1);
        }

        #[test]
        fn short_hold_does_not_advance() {
            let mut session = session();
            let t0 = Instant::now();
            hold(&mut session, t0, t0 + ms(700), &frame(POSE_ONE));
            assert!(session.settle_pending());
            let t1 = t0 + ms(700);
            session.poll(t1);
            session.on_frame(t1, &frame(FIST));
            assert!(!session.settle_pending());
            assert_eq!(session.status(), PoseStatus::NotDetected);
            // the first deadline has passed but it was cancelled
            assert!(session.poll(t0 + ms(2000)).is_empty());
            assert_eq!(session.step(), 0);
        }

        #[test]
        fn continuous_match_does_not_rearm() {
            let mut session = session();
            let t0 = Instant::now();
            session.on_frame(t0, &frame(POSE_ONE));
            let due = session.next_deadline().unwrap();
            session.on_frame(t0 + ms(400), &frame(POSE_ONE));
            assert_eq!(session.next_deadline(), Some(due));
            assert_eq!(due, t0 + ms(800));
        }

        #[test]
        fn settle_fires_without_further_frames() {
            let mut session = session();
            let t0 = Instant::now();
            session.on_frame(t0, &frame(POSE_ONE));
            assert!(session.poll(t0 + ms(799)).is_empty());
            assert_eq!(
                session.poll(t0 + ms(800)),
                vec![Transition::StepAdvanced { from: 0, to: 1 }]
            );
        }

        #[test]
        fn wrong_pose_is_not_accepted() {
            let mut session = session();
            let t0 = Instant::now();
            let transitions = hold(&mut session, t0, t0 + ms(2000), &frame(POSE_TWO));
            assert!(transitions.is_empty());
            assert_eq!(session.step(), 0);
            assert_eq!(session.status(), PoseStatus::NotDetected);
        }

        #[test]
        fn status_starts_idle() {
            let session = session();
            assert_eq!(session.status(), PoseStatus::Idle);
            assert_eq!(session.status().message(), "Raise your hand");
        }
    }

    mod countdown_tests {
        use super::*;

        fn through_poses(session: &mut CaptureSession, t0: Instant) -> Instant {
            let mut now = t0;
            for pose in [POSE_ONE, POSE_TWO, POSE_THREE] {
                hold(session, now, now + ms(850), &frame(pose));
                now += ms(850);
            }
            now
        }

        #[test]
        fn full_sequence_captures_after_three_ticks() {
            let mut session = session();
            let t0 = Instant::now();
            let t1 = through_poses(&mut session, t0);
            assert_eq!(session.phase(), &Phase::Countdown { remaining: 3 });
            assert_eq!(session.step(), 2);

            let start = session.next_deadline().unwrap() - ms(1000);
            assert_eq!(session.poll(start + ms(1000)), vec![Transition::CountdownTick { remaining: 2 }]);
            assert_eq!(session.poll(start + ms(2000)), vec![Transition::CountdownTick { remaining: 1 }]);
            assert!(session.poll(start + ms(2500)).is_empty());
            assert_eq!(session.poll(start + ms(3000)), vec![Transition::CaptureDue]);
            assert!(start + ms(3000) > t1);

            let image = session.capture(Some(&solid_frame(32, 24, [10, 20, 30]))).unwrap();
            assert!(!image.bytes().is_empty());
            assert_eq!(session.phase(), &Phase::Captured);
            assert_eq!(session.image(), Some(&image));
            assert_eq!(session.next_deadline(), None);
        }

        #[test]
        fn capture_happens_at_most_once() {
            let mut session = session();
            let t1 = through_poses(&mut session, Instant::now());
            session.poll(t1 + ms(5000));
            let frame = solid_frame(8, 8, [0, 0, 0]);
            session.capture(Some(&frame)).unwrap();
            assert!(matches!(session.capture(Some(&frame)), Err(Error::AlreadyCaptured)));
            // a late failure does not undo the capture
            assert!(!session.fail(DeviceError::NoFrame));
            assert!(matches!(session.capture(Some(&frame)), Err(Error::AlreadyCaptured)));
            assert_eq!(session.phase(), &Phase::Captured);
        }

        #[test]
        fn capture_before_zero_is_rejected() {
            let mut session = session();
            through_poses(&mut session, Instant::now());
            let frame = solid_frame(8, 8, [0, 0, 0]);
            assert!(matches!(session.capture(Some(&frame)), Err(Error::CaptureNotDue)));
            assert_eq!(session.phase(), &Phase::Countdown { remaining: 3 });
        }

        #[test]
        fn missing_frame_fails_the_session() {
            let mut session = session();
            let t1 = through_poses(&mut session, Instant::now());
            session.poll(t1 + ms(5000));
            assert!(matches!(
                session.capture(None),
                Err(Error::Device(DeviceError::NoFrame))
            ));
            assert_eq!(session.phase(), &Phase::Error(DeviceError::NoFrame));
        }

        /// Known quirk: once counting down, losing the hand does not stop the
        /// capture.
        #[test]
        fn countdown_completes_after_pose_loss() {
            let mut session = session();
            let t1 = through_poses(&mut session, Instant::now());
            let transitions = hold(&mut session, t1, t1 + ms(3500), &LandmarkFrame::Absent);
            assert_eq!(transitions.last(), Some(&Transition::CaptureDue));
            assert_eq!(session.countdown(), Some(0));
        }

        #[test]
        fn late_poll_drains_all_ticks() {
            let mut session = session();
            let t0 = Instant::now();
            let t1 = through_poses(&mut session, t0);
            let transitions = session.poll(t1 + ms(10_000));
            assert_eq!(
                transitions,
                vec![
                    Transition::CountdownTick { remaining: 2 },
                    Transition::CountdownTick { remaining: 1 },
                    Transition::CaptureDue,
                ]
            );
            assert!(session.poll(t1 + ms(20_000)).is_empty());
        }

        #[test]
        fn frames_are_ignored_once_captured() {
            let mut session = session();
            let t1 = through_poses(&mut session, Instant::now());
            session.poll(t1 + ms(5000));
            session.capture(Some(&solid_frame(4, 4, [0, 0, 0]))).unwrap();
            let verdict = session.on_frame(t1 + ms(5100), &frame(POSE_ONE));
            assert!(!verdict.matched);
            assert_eq!(verdict.pose, None);
            assert_eq!(session.phase(), &Phase::Captured);
        }
    }

    mod error_tests {
        use super::*;

        #[test]
        fn device_failure_stops_everything() {
            let mut session = session();
            let t0 = Instant::now();
            session.on_frame(t0, &frame(POSE_ONE));
            assert!(session.fail(DeviceError::PermissionDenied));
            assert_eq!(session.phase(), &Phase::Error(DeviceError::PermissionDenied));
            assert_eq!(session.next_deadline(), None);
            assert!(session.poll(t0 + ms(5000)).is_empty());
            assert!(!session.on_frame(t0 + ms(5000), &frame(POSE_ONE)).matched);
        }

        #[test]
        fn failure_after_capture_is_ignored() {
            let mut session = session();
            let mut now = Instant::now();
            for pose in [POSE_ONE, POSE_TWO, POSE_THREE] {
                hold(&mut session, now, now + ms(850), &frame(pose));
                now += ms(850);
            }
            session.poll(now + ms(5000));
            session.capture(Some(&solid_frame(4, 4, [0, 0, 0]))).unwrap();
            assert!(!session.fail(DeviceError::NotFound));
            assert_eq!(session.phase(), &Phase::Captured);
        }
    }

    #[test]
    fn config_values_drive_timing() {
        let config = CaptureConfig {
            settle: ms(100),
            countdown: 1,
            tick: ms(50),
            steps: vec![crate::pose::PoseId::Two],
            ..Default::default()
        };
        let mut session = CaptureSession::new(&config).unwrap();
        let t0 = Instant::now();
        session.on_frame(t0, &frame(POSE_TWO));
        assert_eq!(
            session.poll(t0 + ms(100)),
            vec![Transition::CountdownStarted { remaining: 1 }]
        );
        assert_eq!(session.poll(t0 + ms(150)), vec![Transition::CaptureDue]);
    }

    fn arb_landmarks() -> impl Strategy<Value = LandmarkFrame> {
        prop_oneof![
            Just(LandmarkFrame::Absent),
            Just(frame(POSE_ONE)),
            Just(frame(POSE_TWO)),
            Just(frame(POSE_THREE)),
            Just(frame(FIST)),
            Just(frame(OPEN)),
        ]
    }

    proptest! {
        #[test]
        fn step_index_never_decreases(
            script in prop::collection::vec((arb_landmarks(), 1u64..400), 1..200),
        ) {
            let mut session = session();
            let t0 = Instant::now();
            let mut now = t0;
            let mut last_step = 0;
            let mut match_since: Option<Instant> = None;

            for (landmarks, gap) in script {
                let before = session.step();
                let advanced_before = session.poll(now).iter().any(|t| {
                    matches!(t, Transition::StepAdvanced { .. } | Transition::CountdownStarted { .. })
                });
                if advanced_before {
                    // only after a streak of at least the settle duration
                    let since = match_since.take();
                    prop_assert!(since.map_or(false, |s| now - s >= ms(800)));
                }
                prop_assert!(session.step() >= before);
                prop_assert!(session.step() >= last_step);
                last_step = session.step();

                let verdict = session.on_frame(now, &landmarks);
                if verdict.matched {
                    match_since.get_or_insert(now);
                } else {
                    match_since = None;
                }
                now += ms(gap);
            }
        }
    }
}
