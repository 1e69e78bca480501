//! rollcall-session — the attendance-taking loop.
//!
//! [`SessionController`] is an `Idle ⇄ Running` state machine. It owns the
//! camera only while running, matches each captured frame against the known
//! encodings, and asks the ledger to record each newly seen student once.

pub mod camera;
pub mod controller;

pub use camera::{CameraProvider, FrameSource, V4l2CameraProvider};
pub use controller::{
    FrameReport, SessionConfig, SessionController, SessionError, SessionEvent, SessionState,
    SessionSummary,
};
