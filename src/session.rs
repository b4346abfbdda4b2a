//! Capture session state machine.
//!
//! Everything that can change a session (user requests, timer ticks,
//! collaborator results) arrives as a [`SessionEvent`] and goes through
//! [`CaptureSession::handle`], one at a time. The returned [`Effect`]s are
//! executed by the owner (see [`crate::driver`]); results come back as new
//! events.
//!
//! Timer and collaborator events carry the epoch they were issued under.
//! Stop, reset and camera loss bump the epoch, so anything still in flight
//! from before is dropped instead of touching the new state.

use facecap_vision::{AcquisitionError, FacingMode, Verdict};
use thiserror::Error;
use uuid::Uuid;

pub const COUNTDOWN_START: u8 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    Idle,
    Loading,
    Streaming,
    Countdown { remaining: u8 },
    Captured,
    Failed(AcquisitionError),
}

impl SessionStatus {
    pub fn is_live(self) -> bool {
        matches!(self, SessionStatus::Streaming | SessionStatus::Countdown { .. })
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, SessionStatus::Captured | SessionStatus::Failed(_))
    }
}

/// A validation cycle that could not produce a verdict.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("validation cycle failed: {0}")]
pub struct CycleError(pub String);

#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    Start,
    Stop,
    /// Stop, then start again.
    Reset,
    Acquired { epoch: u64 },
    AcquireFailed { epoch: u64, error: AcquisitionError },
    /// The camera went away while loading or streaming.
    CameraFailed { epoch: u64, error: AcquisitionError },
    PollTick { epoch: u64 },
    ValidationDone {
        epoch: u64,
        cycle: u64,
        outcome: Result<Verdict, CycleError>,
    },
    CountdownTick { epoch: u64 },
    FrameCaptured { epoch: u64 },
    CaptureFailed { epoch: u64 },
}

impl SessionEvent {
    fn epoch(&self) -> Option<u64> {
        match self {
            SessionEvent::Start | SessionEvent::Stop | SessionEvent::Reset => None,
            SessionEvent::Acquired { epoch }
            | SessionEvent::AcquireFailed { epoch, .. }
            | SessionEvent::CameraFailed { epoch, .. }
            | SessionEvent::PollTick { epoch }
            | SessionEvent::ValidationDone { epoch, .. }
            | SessionEvent::CountdownTick { epoch }
            | SessionEvent::FrameCaptured { epoch }
            | SessionEvent::CaptureFailed { epoch } => Some(*epoch),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Effect {
    Acquire { epoch: u64, facing: FacingMode },
    /// Release the stream acquired under `epoch`, if it is still held.
    Release { epoch: u64 },
    StartPolling { epoch: u64 },
    StopPolling,
    StartCountdown { epoch: u64 },
    CancelCountdown,
    Validate { epoch: u64, cycle: u64 },
    GrabCapture { epoch: u64 },
}

/// What the rest of the application may read about a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionSnapshot {
    pub status: SessionStatus,
    pub verdict: Option<Verdict>,
    pub facing: FacingMode,
}

impl SessionSnapshot {
    pub fn countdown(&self) -> Option<u8> {
        match self.status {
            SessionStatus::Countdown { remaining } => Some(remaining),
            _ => None,
        }
    }
}

#[derive(Debug)]
pub struct CaptureSession {
    id: Uuid,
    status: SessionStatus,
    facing: FacingMode,
    verdict: Option<Verdict>,
    countdown_from: u8,
    epoch: u64,
    cycle: u64,
    in_flight: Option<u64>,
    stream_held: bool,
}

impl CaptureSession {
    pub fn new(facing: FacingMode) -> Self {
        Self {
            id: Uuid::new_v4(),
            status: SessionStatus::Idle,
            facing,
            verdict: None,
            countdown_from: COUNTDOWN_START,
            epoch: 0,
            cycle: 0,
            in_flight: None,
            stream_held: false,
        }
    }

    pub fn with_countdown(mut self, seconds: u8) -> Self {
        self.countdown_from = seconds.max(1);
        self
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn status(&self) -> SessionStatus {
        self.status
    }

    pub fn verdict(&self) -> Option<Verdict> {
        self.verdict
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            status: self.status,
            verdict: self.verdict,
            facing: self.facing,
        }
    }

    /// The single transition function.
    pub fn handle(&mut self, event: SessionEvent) -> Vec<Effect> {
        if let Some(epoch) = event.epoch() {
            if epoch != self.epoch {
                return self.stale(event, epoch);
            }
        }

        match event {
            SessionEvent::Start => self.start(),
            SessionEvent::Stop => {
                log::info!("session {}: stopped", self.id);
                self.teardown(SessionStatus::Idle)
            }
            SessionEvent::Reset => {
                log::info!("session {}: reset", self.id);
                let mut effects = self.teardown(SessionStatus::Idle);
                effects.extend(self.start());
                effects
            }
            SessionEvent::Acquired { .. } => self.acquired(),
            SessionEvent::AcquireFailed { error, .. } => {
                if self.status != SessionStatus::Loading {
                    return Vec::new();
                }
                log::warn!("session {}: camera acquisition failed: {}", self.id, error);
                self.status = SessionStatus::Failed(error);
                Vec::new()
            }
            SessionEvent::CameraFailed { error, .. } => {
                if !(self.status == SessionStatus::Loading || self.status.is_live()) {
                    return Vec::new();
                }
                log::warn!("session {}: camera lost: {}", self.id, error);
                self.teardown(SessionStatus::Failed(error))
            }
            SessionEvent::PollTick { .. } => self.poll(),
            SessionEvent::ValidationDone { cycle, outcome, .. } => self.validated(cycle, outcome),
            SessionEvent::CountdownTick { .. } => self.countdown_tick(),
            SessionEvent::FrameCaptured { .. } => {
                if self.status != (SessionStatus::Countdown { remaining: 0 }) {
                    return Vec::new();
                }
                log::info!("session {}: captured", self.id);
                self.status = SessionStatus::Captured;
                self.in_flight = None;
                self.stream_held = false;
                vec![Effect::StopPolling, Effect::Release { epoch: self.epoch }]
            }
            SessionEvent::CaptureFailed { .. } => {
                if self.status != (SessionStatus::Countdown { remaining: 0 }) {
                    return Vec::new();
                }
                log::warn!("session {}: capture grab failed, back to streaming", self.id);
                self.status = SessionStatus::Streaming;
                self.verdict = None;
                Vec::new()
            }
        }
    }

    fn stale(&mut self, event: SessionEvent, epoch: u64) -> Vec<Effect> {
        log::debug!(
            "session {}: dropping {:?} from epoch {} (now {})",
            self.id,
            event,
            epoch,
            self.epoch
        );
        match event {
            // A stream that arrives after its session was torn down is not ours to keep.
            SessionEvent::Acquired { epoch } => vec![Effect::Release { epoch }],
            _ => Vec::new(),
        }
    }

    fn start(&mut self) -> Vec<Effect> {
        if self.status != SessionStatus::Idle {
            log::debug!("session {}: start ignored in {:?}", self.id, self.status);
            return Vec::new();
        }
        log::info!("session {}: acquiring {:?} camera", self.id, self.facing);
        self.status = SessionStatus::Loading;
        self.verdict = None;
        vec![Effect::Acquire {
            epoch: self.epoch,
            facing: self.facing,
        }]
    }

    fn acquired(&mut self) -> Vec<Effect> {
        if self.status != SessionStatus::Loading {
            return vec![Effect::Release { epoch: self.epoch }];
        }
        log::info!("session {}: streaming", self.id);
        self.status = SessionStatus::Streaming;
        self.stream_held = true;
        vec![Effect::StartPolling { epoch: self.epoch }]
    }

    /// Cancel timers, release the stream and move to `next`. Bumps the epoch.
    fn teardown(&mut self, next: SessionStatus) -> Vec<Effect> {
        let mut effects = vec![Effect::CancelCountdown, Effect::StopPolling];
        if self.stream_held || self.status == SessionStatus::Loading {
            effects.push(Effect::Release { epoch: self.epoch });
        }
        self.stream_held = false;
        self.in_flight = None;
        self.verdict = None;
        self.epoch += 1;
        self.status = next;
        effects
    }

    fn poll(&mut self) -> Vec<Effect> {
        if !self.status.is_live() {
            return Vec::new();
        }
        if let Some(cycle) = self.in_flight {
            log::debug!("session {}: cycle {} still running, skipping tick", self.id, cycle);
            return Vec::new();
        }
        self.cycle += 1;
        self.in_flight = Some(self.cycle);
        vec![Effect::Validate {
            epoch: self.epoch,
            cycle: self.cycle,
        }]
    }

    fn validated(&mut self, cycle: u64, outcome: Result<Verdict, CycleError>) -> Vec<Effect> {
        if self.in_flight != Some(cycle) {
            return Vec::new();
        }
        self.in_flight = None;
        let verdict = outcome.unwrap_or_else(|e| {
            log::warn!("session {}: {}", self.id, e);
            Verdict::NoFace
        });
        if self.verdict != Some(verdict) {
            log::debug!("session {}: cycle {} → {:?}", self.id, cycle, verdict);
        }
        self.verdict = Some(verdict);

        match (self.status, verdict.is_valid()) {
            (SessionStatus::Streaming, true) => {
                log::info!("session {}: aligned, counting down from {}", self.id, self.countdown_from);
                self.status = SessionStatus::Countdown {
                    remaining: self.countdown_from,
                };
                vec![Effect::StartCountdown { epoch: self.epoch }]
            }
            (SessionStatus::Countdown { .. }, false) => {
                log::info!("session {}: alignment lost ({:?}), countdown cancelled", self.id, verdict);
                self.status = SessionStatus::Streaming;
                vec![Effect::CancelCountdown]
            }
            _ => Vec::new(),
        }
    }

    fn countdown_tick(&mut self) -> Vec<Effect> {
        let remaining = match self.status {
            SessionStatus::Countdown { remaining } if remaining > 0 => remaining,
            _ => return Vec::new(),
        };
        if self.verdict != Some(Verdict::Valid) {
            return Vec::new();
        }
        let remaining = remaining - 1;
        self.status = SessionStatus::Countdown { remaining };
        if remaining > 0 {
            return Vec::new();
        }
        vec![Effect::CancelCountdown, Effect::GrabCapture { epoch: self.epoch }]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn streaming() -> CaptureSession {
        let mut session = CaptureSession::new(FacingMode::User);
        assert_eq!(
            session.handle(SessionEvent::Start),
            vec![Effect::Acquire {
                epoch: 0,
                facing: FacingMode::User
            }]
        );
        assert_eq!(
            session.handle(SessionEvent::Acquired { epoch: 0 }),
            vec![Effect::StartPolling { epoch: 0 }]
        );
        session
    }

    fn cycle(session: &mut CaptureSession, verdict: Verdict) -> Vec<Effect> {
        let epoch = session.epoch();
        let effects = session.handle(SessionEvent::PollTick { epoch });
        let cycle = match effects.as_slice() {
            [Effect::Validate { cycle, .. }] => *cycle,
            other => panic!("expected a validation cycle, got {:?}", other),
        };
        session.handle(SessionEvent::ValidationDone {
            epoch,
            cycle,
            outcome: Ok(verdict),
        })
    }

    #[test]
    fn test_start_and_stream() {
        let session = streaming();
        assert_eq!(session.status(), SessionStatus::Streaming);
        assert_eq!(session.verdict(), None);
    }

    #[test]
    fn test_acquisition_failure_is_terminal() {
        let mut session = CaptureSession::new(FacingMode::User);
        session.handle(SessionEvent::Start);
        let effects = session.handle(SessionEvent::AcquireFailed {
            epoch: 0,
            error: AcquisitionError::PermissionDenied,
        });
        assert!(effects.is_empty());
        assert_eq!(session.status(), SessionStatus::Failed(AcquisitionError::PermissionDenied));
        // No automatic retry: start is ignored until an explicit reset.
        assert!(session.handle(SessionEvent::Start).is_empty());
        let effects = session.handle(SessionEvent::Reset);
        assert!(effects.contains(&Effect::Acquire {
            epoch: 1,
            facing: FacingMode::User
        }));
        assert_eq!(session.status(), SessionStatus::Loading);
    }

    #[test]
    fn test_valid_verdict_starts_countdown() {
        let mut session = streaming();
        assert!(cycle(&mut session, Verdict::TooFar).is_empty());
        assert_eq!(cycle(&mut session, Verdict::Valid), vec![Effect::StartCountdown { epoch: 0 }]);
        assert_eq!(session.status(), SessionStatus::Countdown { remaining: 3 });
        // Staying valid does not restart the countdown.
        session.handle(SessionEvent::CountdownTick { epoch: 0 });
        assert!(cycle(&mut session, Verdict::Valid).is_empty());
        assert_eq!(session.status(), SessionStatus::Countdown { remaining: 2 });
    }

    #[test]
    fn test_countdown_cancelled_when_alignment_lost() {
        let mut session = streaming();
        cycle(&mut session, Verdict::Valid);
        session.handle(SessionEvent::CountdownTick { epoch: 0 });
        assert_eq!(session.snapshot().countdown(), Some(2));

        assert_eq!(cycle(&mut session, Verdict::Tilted), vec![Effect::CancelCountdown]);
        assert_eq!(session.status(), SessionStatus::Streaming);
        // A tick already queued before the cancel cannot advance anything.
        assert!(session.handle(SessionEvent::CountdownTick { epoch: 0 }).is_empty());
        assert_eq!(session.status(), SessionStatus::Streaming);

        // Re-aligning starts over from the top.
        cycle(&mut session, Verdict::Valid);
        assert_eq!(session.snapshot().countdown(), Some(3));
    }

    #[test]
    fn test_countdown_reaching_zero_captures() {
        let mut session = streaming();
        cycle(&mut session, Verdict::Valid);
        assert!(session.handle(SessionEvent::CountdownTick { epoch: 0 }).is_empty());
        assert!(session.handle(SessionEvent::CountdownTick { epoch: 0 }).is_empty());
        assert_eq!(
            session.handle(SessionEvent::CountdownTick { epoch: 0 }),
            vec![Effect::CancelCountdown, Effect::GrabCapture { epoch: 0 }]
        );
        assert_eq!(
            session.handle(SessionEvent::FrameCaptured { epoch: 0 }),
            vec![Effect::StopPolling, Effect::Release { epoch: 0 }]
        );
        assert_eq!(session.status(), SessionStatus::Captured);
        assert!(session.status().is_terminal());
        // Terminal: further ticks are inert.
        assert!(session.handle(SessionEvent::PollTick { epoch: 0 }).is_empty());
    }

    #[test]
    fn test_failed_grab_returns_to_streaming() {
        let mut session = streaming().with_countdown(1);
        cycle(&mut session, Verdict::Valid);
        session.handle(SessionEvent::CountdownTick { epoch: 0 });
        assert!(session.handle(SessionEvent::CaptureFailed { epoch: 0 }).is_empty());
        assert_eq!(session.status(), SessionStatus::Streaming);
        assert_eq!(session.verdict(), None);
    }

    #[test]
    fn test_cycle_error_degrades_to_no_face() {
        let mut session = streaming();
        cycle(&mut session, Verdict::Valid);
        let effects = session.handle(SessionEvent::PollTick { epoch: 0 });
        assert_eq!(effects, vec![Effect::Validate { epoch: 0, cycle: 2 }]);
        let effects = session.handle(SessionEvent::ValidationDone {
            epoch: 0,
            cycle: 2,
            outcome: Err(CycleError("detector unavailable".into())),
        });
        assert_eq!(effects, vec![Effect::CancelCountdown]);
        assert_eq!(session.verdict(), Some(Verdict::NoFace));
        assert_eq!(session.status(), SessionStatus::Streaming);
    }

    #[test]
    fn test_one_cycle_in_flight() {
        let mut session = streaming();
        assert_eq!(
            session.handle(SessionEvent::PollTick { epoch: 0 }),
            vec![Effect::Validate { epoch: 0, cycle: 1 }]
        );
        assert!(session.handle(SessionEvent::PollTick { epoch: 0 }).is_empty());
        // Results for cycles that are not in flight are dropped.
        assert!(session
            .handle(SessionEvent::ValidationDone {
                epoch: 0,
                cycle: 7,
                outcome: Ok(Verdict::Valid),
            })
            .is_empty());
        assert_eq!(session.verdict(), None);
    }

    #[test]
    fn test_stop_cancels_everything_and_drops_late_events() {
        let mut session = streaming();
        cycle(&mut session, Verdict::Valid);
        session.handle(SessionEvent::PollTick { epoch: 0 });

        let effects = session.handle(SessionEvent::Stop);
        assert_eq!(
            effects,
            vec![Effect::CancelCountdown, Effect::StopPolling, Effect::Release { epoch: 0 }]
        );
        assert_eq!(session.status(), SessionStatus::Idle);
        assert_eq!(session.epoch(), 1);

        assert!(session.handle(SessionEvent::CountdownTick { epoch: 0 }).is_empty());
        assert!(session
            .handle(SessionEvent::ValidationDone {
                epoch: 0,
                cycle: 2,
                outcome: Ok(Verdict::Valid),
            })
            .is_empty());
        assert_eq!(session.status(), SessionStatus::Idle);
        assert_eq!(session.verdict(), None);
    }

    #[test]
    fn test_late_stream_is_released() {
        let mut session = CaptureSession::new(FacingMode::Environment);
        session.handle(SessionEvent::Start);
        session.handle(SessionEvent::Stop);
        assert_eq!(
            session.handle(SessionEvent::Acquired { epoch: 0 }),
            vec![Effect::Release { epoch: 0 }]
        );
        assert_eq!(session.status(), SessionStatus::Idle);
    }

    #[test]
    fn test_camera_lost_while_streaming() {
        let mut session = streaming();
        cycle(&mut session, Verdict::Valid);
        let effects = session.handle(SessionEvent::CameraFailed {
            epoch: 0,
            error: AcquisitionError::DeviceNotFound,
        });
        assert!(effects.contains(&Effect::Release { epoch: 0 }));
        assert!(effects.contains(&Effect::CancelCountdown));
        assert_eq!(session.status(), SessionStatus::Failed(AcquisitionError::DeviceNotFound));
    }
}
