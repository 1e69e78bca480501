//! Attendance session state machine.
//!
//! The camera source lives inside the `Running` state, so every transition
//! back to `Idle` (stop, capture failure, or dropping the controller) releases
//! it. Within one run, each student is sent to the ledger at most once; the
//! ledger itself enforces one record per student per day.

use crate::camera::{CameraProvider, FrameSource};
use chrono::{Local, NaiveDateTime};
use rollcall_core::records::{AttendanceLedger, AttendanceRecord, RecordOutcome, STATUS_PRESENT};
use rollcall_core::{match_frame, AnalyzerError, FaceAnalyzer, KnownEncodings, MatchResult, StudentId};
use rollcall_hw::CameraError;
use rollcall_store::EmbeddingStore;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("session already running")]
    AlreadyRunning,
    #[error("session not running")]
    NotRunning,
    #[error("camera unavailable: {0}")]
    CameraUnavailable(#[source] CameraError),
    #[error("frame capture failed: {0}")]
    CaptureFailure(#[source] CameraError),
    #[error("face analysis failed: {0}")]
    Analyzer(#[from] AnalyzerError),
}

#[derive(Debug, Clone, Copy)]
pub struct SessionConfig {
    /// Maximum distance for a match.
    pub tolerance: f32,
    /// Pause between frames in [`SessionController::run`].
    pub frame_interval: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            tolerance: 0.55,
            frame_interval: Duration::from_millis(20),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Running,
}

/// Something an operator should see.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    Started {
        encodings: usize,
    },
    /// The encoding cache could not be read; the session runs with no known faces.
    StoreDegraded {
        error: String,
    },
    Recorded {
        student_id: StudentId,
        name: String,
        record: AttendanceRecord,
    },
    /// The ledger already held today's record for this student.
    AlreadyRecorded {
        student_id: StudentId,
        name: String,
    },
    RecordWriteFailure {
        student_id: StudentId,
        name: String,
        error: String,
    },
    Stopped(SessionSummary),
}

/// Outcome of one loop iteration.
#[derive(Debug, Clone)]
pub struct FrameReport {
    pub sequence: u32,
    pub matches: Vec<MatchResult>,
    pub events: Vec<SessionEvent>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionSummary {
    pub frames: u64,
    /// Students settled this run, in ascending id order.
    pub marked: Vec<StudentId>,
}

struct Running<S> {
    source: S,
    known: KnownEncodings,
    marked: HashSet<StudentId>,
    frames: u64,
}

enum State<S> {
    Idle,
    Running(Running<S>),
}

type Clock = Box<dyn Fn() -> NaiveDateTime + Send>;

pub struct SessionController<P: CameraProvider, A: FaceAnalyzer, L: AttendanceLedger> {
    provider: P,
    analyzer: A,
    ledger: L,
    store: EmbeddingStore,
    config: SessionConfig,
    cached: Option<KnownEncodings>,
    state: State<P::Source>,
    clock: Clock,
}

impl<P, A, L> SessionController<P, A, L>
where
    P: CameraProvider,
    A: FaceAnalyzer,
    L: AttendanceLedger,
{
    pub fn new(provider: P, analyzer: A, ledger: L, store: EmbeddingStore, config: SessionConfig) -> Self {
        Self {
            provider,
            analyzer,
            ledger,
            store,
            config,
            cached: None,
            state: State::Idle,
            clock: Box::new(|| Local::now().naive_local()),
        }
    }

    /// Replace the wall clock used for attendance dates and times.
    pub fn with_clock(mut self, clock: impl Fn() -> NaiveDateTime + Send + 'static) -> Self {
        self.clock = Box::new(clock);
        self
    }

    pub fn state(&self) -> SessionState {
        match self.state {
            State::Idle => SessionState::Idle,
            State::Running(_) => SessionState::Running,
        }
    }

    pub fn is_running(&self) -> bool {
        matches!(self.state, State::Running(_))
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn ledger(&self) -> &L {
        &self.ledger
    }

    /// Encodings the running session matches against, else the cached set.
    pub fn known(&self) -> Option<&KnownEncodings> {
        match &self.state {
            State::Running(run) => Some(&run.known),
            State::Idle => self.cached.as_ref(),
        }
    }

    /// Re-read the encoding cache, replacing the set used by a running session.
    pub fn reload_encodings(&mut self) -> Vec<SessionEvent> {
        let (known, events) = self.load_known();
        if let State::Running(run) = &mut self.state {
            run.known = known;
        }
        events
    }

    /// Idle → Running: load encodings if not cached, reset the marked set,
    /// and open the camera.
    pub fn start(&mut self) -> Result<Vec<SessionEvent>, SessionError> {
        if self.is_running() {
            return Err(SessionError::AlreadyRunning);
        }

        let (known, mut events) = match &self.cached {
            Some(cached) => (cached.clone(), Vec::new()),
            None => self.load_known(),
        };

        let source = self.provider.open().map_err(|e| {
            tracing::error!(error = %e, "could not open camera");
            SessionError::CameraUnavailable(e)
        })?;

        tracing::info!(
            encodings = known.len(),
            tolerance = self.config.tolerance,
            "attendance session started"
        );
        events.push(SessionEvent::Started {
            encodings: known.len(),
        });
        self.state = State::Running(Running {
            source,
            known,
            marked: HashSet::new(),
            frames: 0,
        });
        Ok(events)
    }

    /// Running → Idle, releasing the camera. Returns `None` if already idle.
    pub fn stop(&mut self) -> Option<SessionSummary> {
        match std::mem::replace(&mut self.state, State::Idle) {
            State::Idle => None,
            State::Running(run) => {
                let summary = summarize(&run);
                drop(run);
                tracing::info!(
                    frames = summary.frames,
                    marked = summary.marked.len(),
                    "attendance session stopped"
                );
                Some(summary)
            }
        }
    }

    /// Capture, match, and record one frame.
    ///
    /// A capture failure ends the session. Analyzer failures leave it running.
    /// Dark frames are counted but not analysed. A student joins the marked
    /// set once the ledger holds today's record, whether written now or
    /// found already there; a failed write leaves them unmarked.
    pub fn step(&mut self) -> Result<FrameReport, SessionError> {
        let captured = match &mut self.state {
            State::Running(run) => run.source.capture(),
            State::Idle => return Err(SessionError::NotRunning),
        };

        let frame = match captured {
            Ok(frame) => frame,
            Err(e) => {
                tracing::error!(error = %e, "frame capture failed; ending session");
                self.stop();
                return Err(SessionError::CaptureFailure(e));
            }
        };

        let State::Running(run) = &mut self.state else {
            return Err(SessionError::NotRunning);
        };
        run.frames += 1;

        if frame.is_dark {
            tracing::debug!(sequence = frame.sequence, "dark frame skipped");
            return Ok(FrameReport {
                sequence: frame.sequence,
                matches: Vec::new(),
                events: Vec::new(),
            });
        }

        let matches = match_frame(
            &mut self.analyzer,
            &frame.data,
            frame.width,
            frame.height,
            &run.known,
            self.config.tolerance,
        )?;

        let now = (self.clock)();
        let mut events = Vec::new();
        for student_id in matches.iter().filter_map(MatchResult::matched_student_id) {
            if run.marked.contains(&student_id) {
                continue;
            }
            let event = settle(&self.ledger, &run.known, student_id, now);
            if !matches!(event, SessionEvent::RecordWriteFailure { .. }) {
                run.marked.insert(student_id);
            }
            events.push(event);
        }

        Ok(FrameReport {
            sequence: frame.sequence,
            matches,
            events,
        })
    }

    /// Start, then step until `stop` is set or capture fails; always ends idle.
    ///
    /// `stop` is checked once per frame.
    pub fn run(
        &mut self,
        stop: &AtomicBool,
        mut observer: impl FnMut(&SessionEvent),
    ) -> Result<SessionSummary, SessionError> {
        for event in self.start()? {
            observer(&event);
        }

        while !stop.load(Ordering::Relaxed) {
            match self.step() {
                Ok(report) => report.events.iter().for_each(&mut observer),
                Err(SessionError::Analyzer(e)) => {
                    tracing::warn!(error = %e, "skipping frame");
                }
                Err(e) => return Err(e),
            }
            if !self.config.frame_interval.is_zero() {
                std::thread::sleep(self.config.frame_interval);
            }
        }

        let summary = self.stop().unwrap_or_default();
        observer(&SessionEvent::Stopped(summary.clone()));
        Ok(summary)
    }

    /// Load the encoding cache. A corrupt cache degrades to an empty set and
    /// is not cached, so the next start retries.
    fn load_known(&mut self) -> (KnownEncodings, Vec<SessionEvent>) {
        match self.store.load() {
            Ok(known) => {
                tracing::info!(count = known.len(), "loaded known encodings");
                self.cached = Some(known.clone());
                (known, Vec::new())
            }
            Err(e) => {
                tracing::error!(
                    error = %e,
                    path = %self.store.path().display(),
                    "encoding cache unreadable; matching with no known faces"
                );
                let event = SessionEvent::StoreDegraded {
                    error: e.to_string(),
                };
                (KnownEncodings::new(), vec![event])
            }
        }
    }
}

impl<P, A, L> Drop for SessionController<P, A, L>
where
    P: CameraProvider,
    A: FaceAnalyzer,
    L: AttendanceLedger,
{
    fn drop(&mut self) {
        self.stop();
    }
}

fn summarize<S>(run: &Running<S>) -> SessionSummary {
    let mut marked: Vec<StudentId> = run.marked.iter().copied().collect();
    marked.sort_unstable();
    SessionSummary {
        frames: run.frames,
        marked,
    }
}

/// Ask the ledger about one matched student and record them if needed.
fn settle<L: AttendanceLedger>(
    ledger: &L,
    known: &KnownEncodings,
    student_id: StudentId,
    now: NaiveDateTime,
) -> SessionEvent {
    let name = known.label(student_id);
    let date = now.date();

    let outcome = ledger.has_recorded(student_id, date).and_then(|done| {
        if done {
            Ok(RecordOutcome::AlreadyRecorded)
        } else {
            ledger.record(student_id, date, now.time(), STATUS_PRESENT)
        }
    });

    match outcome {
        Ok(RecordOutcome::Recorded(record)) => {
            tracing::info!(student_id, name = %name, time = %record.time, "marked present");
            SessionEvent::Recorded {
                student_id,
                name,
                record,
            }
        }
        Ok(RecordOutcome::AlreadyRecorded) => {
            tracing::debug!(student_id, name = %name, "already recorded today");
            SessionEvent::AlreadyRecorded { student_id, name }
        }
        Err(e) => {
            tracing::warn!(student_id, name = %name, error = %e, "recording attendance failed");
            SessionEvent::RecordWriteFailure {
                student_id,
                name,
                error: e.to_string(),
            }
        }
    }
}
