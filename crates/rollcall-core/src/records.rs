//! Boundary contracts for the record store and image store.
//!
//! The ledger owns the at-most-one-record-per-student-per-day rule; callers
//! only avoid redundant attempts.

use crate::types::StudentId;
use chrono::{NaiveDate, NaiveTime};
use serde::Serialize;
use thiserror::Error;

/// Status written for a student seen by the camera.
pub const STATUS_PRESENT: &str = "present";

#[derive(Error, Debug)]
pub enum RecordError {
    #[error("record store: {0}")]
    Backend(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("image store I/O: {0}")]
    Io(#[from] std::io::Error),
    #[error("record store returned no row for {0}")]
    Missing(String),
}

impl RecordError {
    pub fn backend<E>(err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        RecordError::Backend(Box::new(err))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Student {
    pub id: StudentId,
    pub name: String,
    pub image_ref: String,
    pub created_at: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AttendanceRecord {
    pub id: i64,
    pub student_id: StudentId,
    pub date: NaiveDate,
    pub time: NaiveTime,
    pub status: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RecordOutcome {
    Recorded(AttendanceRecord),
    /// A record for this student and date already existed; nothing was written.
    AlreadyRecorded,
}

pub trait StudentRegistry {
    /// Create a student and return the identifier assigned by the store.
    fn create_student(&self, name: &str, image_ref: &str) -> Result<StudentId, RecordError>;

    /// Delete a student; returns whether one existed.
    fn delete_student(&self, student_id: StudentId) -> Result<bool, RecordError>;
}

pub trait AttendanceLedger {
    fn has_recorded(&self, student_id: StudentId, date: NaiveDate) -> Result<bool, RecordError>;

    fn record(
        &self,
        student_id: StudentId,
        date: NaiveDate,
        time: NaiveTime,
        status: &str,
    ) -> Result<RecordOutcome, RecordError>;
}

pub trait ImageStore {
    /// Persist an image and return a durable reference to it.
    fn save(&self, image_bytes: &[u8], filename: &str) -> Result<String, RecordError>;

    /// Remove a previously saved image. Removing a missing image is not an error.
    fn remove(&self, image_ref: &str) -> Result<(), RecordError>;
}
