//! Runs a [`CaptureSession`] against real collaborators.
//!
//! The driver owns the camera stream, the detector and the timer table.
//! It feeds events to the session one at a time and executes whatever
//! effects come back; no other code touches the stream.

use std::collections::VecDeque;
use std::thread;
use std::time::{Duration, Instant};

use facecap_vision::pipeline::{self, Viewport};
use facecap_vision::{AcquisitionError, Camera, Detector, LandmarkSet, Verdict};
use image::RgbImage;

use crate::session::{CaptureSession, CycleError, Effect, SessionEvent, SessionSnapshot};

pub const POLL_INTERVAL: Duration = Duration::from_millis(1500);
pub const COUNTDOWN_INTERVAL: Duration = Duration::from_secs(1);
/// Consecutive failed grabs after which the camera is considered lost.
pub const MAX_GRAB_FAILURES: u32 = 3;

pub trait Clock {
    fn now(&self) -> Instant;

    fn sleep_until(&mut self, deadline: Instant);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn sleep_until(&mut self, deadline: Instant) {
        let now = Instant::now();
        if deadline > now {
            thread::sleep(deadline - now);
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timing {
    pub poll: Duration,
    pub countdown: Duration,
    /// Landmark overlay refresh; `None` disables it.
    pub overlay: Option<Duration>,
}

impl Default for Timing {
    fn default() -> Self {
        Self {
            poll: POLL_INTERVAL,
            countdown: COUNTDOWN_INTERVAL,
            overlay: None,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Timer {
    epoch: u64,
    due: Instant,
    period: Duration,
}

impl Timer {
    /// Returns the epoch if the timer fired, and schedules the next shot.
    fn fire(&mut self, now: Instant) -> Option<u64> {
        if self.due > now {
            return None;
        }
        self.due += self.period;
        if self.due <= now {
            self.due = now + self.period;
        }
        Some(self.epoch)
    }
}

pub type OverlaySink = Box<dyn FnMut(Option<&LandmarkSet>)>;

pub struct SessionDriver<C: Camera, D: Detector, K: Clock = SystemClock> {
    session: CaptureSession,
    camera: C,
    detector: D,
    clock: K,
    viewport: Viewport,
    timing: Timing,
    stream: Option<(u64, C::Stream)>,
    poll: Option<Timer>,
    countdown: Option<Timer>,
    overlay: Option<(Instant, OverlaySink)>,
    overlay_sink: Option<OverlaySink>,
    events: VecDeque<SessionEvent>,
    capture: Option<RgbImage>,
    grab_failures: u32,
    /// Display-space detection behind the last verdict; the overlay reads it.
    last_detection: Option<LandmarkSet>,
}

impl<C: Camera, D: Detector, K: Clock> SessionDriver<C, D, K> {
    pub fn new(session: CaptureSession, camera: C, detector: D, clock: K, viewport: Viewport) -> Self {
        Self {
            session,
            camera,
            detector,
            clock,
            viewport,
            timing: Timing::default(),
            stream: None,
            poll: None,
            countdown: None,
            overlay: None,
            overlay_sink: None,
            events: VecDeque::new(),
            capture: None,
            grab_failures: 0,
            last_detection: None,
        }
    }

    pub fn with_timing(mut self, timing: Timing) -> Self {
        self.timing = timing;
        self
    }

    /// Receives the latest display-space landmarks while streaming.
    /// Only runs when `Timing::overlay` is set.
    pub fn with_overlay(mut self, sink: OverlaySink) -> Self {
        self.overlay_sink = Some(sink);
        self
    }

    pub fn session(&self) -> &CaptureSession {
        &self.session
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.session.snapshot()
    }

    pub fn start(&mut self) {
        self.dispatch(SessionEvent::Start);
    }

    pub fn stop(&mut self) {
        self.dispatch(SessionEvent::Stop);
    }

    pub fn reset(&mut self) {
        self.capture = None;
        self.dispatch(SessionEvent::Reset);
    }

    /// New display geometry; applies from the next validation cycle.
    pub fn resize(&mut self, viewport: Viewport) {
        log::debug!("session {}: viewport {:?}", self.session.id(), viewport);
        self.viewport = viewport;
    }

    /// The captured frame, once the session reaches `Captured`.
    pub fn take_capture(&mut self) -> Option<RgbImage> {
        self.capture.take()
    }

    pub fn is_streaming(&self) -> bool {
        self.stream.is_some()
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        [
            self.poll.map(|t| t.due),
            self.countdown.map(|t| t.due),
            self.overlay.as_ref().map(|(due, _)| *due),
        ]
        .into_iter()
        .flatten()
        .min()
    }

    /// Sleep until the next timer is due and fire everything that is due.
    /// Returns `false` when nothing is scheduled.
    pub fn step(&mut self) -> bool {
        let Some(deadline) = self.next_deadline() else {
            return false;
        };
        self.clock.sleep_until(deadline);
        let now = self.clock.now();

        // Poll first: a fresh verdict may cancel a countdown due at the same instant.
        if let Some(epoch) = self.poll.as_mut().and_then(|t| t.fire(now)) {
            self.dispatch(SessionEvent::PollTick { epoch });
        }
        if let Some(epoch) = self.countdown.as_mut().and_then(|t| t.fire(now)) {
            self.dispatch(SessionEvent::CountdownTick { epoch });
        }
        self.refresh_overlay(now);
        true
    }

    /// Step until the session is terminal, nothing is scheduled, or `limit` has elapsed.
    pub fn run_for(&mut self, limit: Duration) -> SessionSnapshot {
        let end = self.clock.now() + limit;
        while !self.session.status().is_terminal() {
            match self.next_deadline() {
                Some(deadline) if deadline <= end => {
                    self.step();
                }
                _ => break,
            }
        }
        self.snapshot()
    }

    fn dispatch(&mut self, event: SessionEvent) {
        self.events.push_back(event);
        while let Some(event) = self.events.pop_front() {
            for effect in self.session.handle(event) {
                self.apply(effect);
            }
        }
    }

    fn apply(&mut self, effect: Effect) {
        let now = self.clock.now();
        match effect {
            Effect::Acquire { epoch, facing } => match self.camera.acquire(facing) {
                Ok(stream) => {
                    if let Some((_, old)) = self.stream.replace((epoch, stream)) {
                        self.camera.stop(old);
                    }
                    self.grab_failures = 0;
                    self.events.push_back(SessionEvent::Acquired { epoch });
                }
                Err(error) => self.events.push_back(SessionEvent::AcquireFailed { epoch, error }),
            },
            Effect::Release { epoch } => {
                if matches!(self.stream, Some((held, _)) if held == epoch) {
                    if let Some((_, stream)) = self.stream.take() {
                        self.camera.stop(stream);
                    }
                }
                if self.stream.is_none() {
                    self.last_detection = None;
                    if let Some((_, sink)) = self.overlay.take() {
                        self.overlay_sink = Some(sink);
                    }
                }
            }
            Effect::StartPolling { epoch } => {
                self.poll = Some(Timer {
                    epoch,
                    due: now + self.timing.poll,
                    period: self.timing.poll,
                });
                if let (Some(period), Some(sink)) = (self.timing.overlay, self.overlay_sink.take()) {
                    self.overlay = Some((now + period, sink));
                }
            }
            Effect::StopPolling => self.poll = None,
            Effect::StartCountdown { epoch } => {
                self.countdown = Some(Timer {
                    epoch,
                    due: now + self.timing.countdown,
                    period: self.timing.countdown,
                });
            }
            Effect::CancelCountdown => self.countdown = None,
            Effect::Validate { epoch, cycle } => {
                let outcome = self.run_cycle();
                let lost = outcome.is_err() && self.grab_failures >= MAX_GRAB_FAILURES;
                self.events.push_back(SessionEvent::ValidationDone { epoch, cycle, outcome });
                if lost {
                    self.events.push_back(SessionEvent::CameraFailed {
                        epoch,
                        error: AcquisitionError::DeviceNotFound,
                    });
                }
            }
            Effect::GrabCapture { epoch } => match self.grab() {
                Ok(frame) => {
                    self.capture = Some(frame);
                    self.events.push_back(SessionEvent::FrameCaptured { epoch });
                }
                Err(e) => {
                    log::warn!("session {}: capture grab failed: {:#}", self.session.id(), e);
                    self.events.push_back(SessionEvent::CaptureFailed { epoch });
                }
            },
        }
    }

    fn grab(&mut self) -> anyhow::Result<RgbImage> {
        match self.stream.as_mut() {
            Some((_, stream)) => self.camera.grab_frame(stream),
            None => anyhow::bail!("no camera stream"),
        }
    }

    fn run_cycle(&mut self) -> Result<Verdict, CycleError> {
        let frame = match self.grab() {
            Ok(frame) => frame,
            Err(e) => {
                self.grab_failures += 1;
                self.last_detection = None;
                return Err(CycleError(format!("{:#}", e)));
            }
        };
        self.grab_failures = 0;
        let (verdict, detection) = pipeline::assess_detection(&mut self.detector, &frame, &self.viewport);
        self.last_detection = detection;
        Ok(verdict)
    }

    fn refresh_overlay(&mut self, now: Instant) {
        let period = match self.timing.overlay {
            Some(period) => period,
            None => return,
        };
        // Redraws the last cycle's detection; never grabs or detects on its own.
        if let Some((due, sink)) = self.overlay.as_mut() {
            if *due <= now {
                sink(self.last_detection.as_ref());
                *due = now + period;
            }
        }
    }
}

impl<C: Camera, D: Detector, K: Clock> Drop for SessionDriver<C, D, K> {
    fn drop(&mut self) {
        if let Some((_, stream)) = self.stream.take() {
            self.camera.stop(stream);
        }
    }
}
