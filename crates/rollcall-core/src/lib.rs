//! rollcall-core — face matching and enrollment for attendance taking.
//!
//! Matching and enrollment consume the [`FaceAnalyzer`] capability; the
//! bundled implementation runs SCRFD detection and ArcFace recognition via
//! ONNX Runtime on grayscale frames.

pub mod alignment;
pub mod analyzer;
pub mod detector;
pub mod enroll;
pub mod matcher;
pub mod recognizer;
pub mod records;
pub mod types;

pub use analyzer::{AnalyzerError, FaceAnalyzer, OnnxFaceAnalyzer};
pub use detector::DetectorOptions;
pub use enroll::{enroll, EnrollError};
pub use matcher::{match_faces, match_frame, nearest};
pub use records::{AttendanceLedger, ImageStore, RecordError, RecordOutcome, StudentRegistry};
pub use types::{
    BoundingBox, DetectedFace, Embedding, KnownEncoding, KnownEncodings, MatchOutcome,
    MatchResult, StudentId, NO_CANDIDATE_DISTANCE,
};
