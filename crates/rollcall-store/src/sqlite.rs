//! SQLite-backed student registry and attendance ledger.

use chrono::{NaiveDate, NaiveTime, Timelike, Utc};
use rollcall_core::records::{
    AttendanceLedger, AttendanceRecord, RecordError, RecordOutcome, Student, StudentRegistry,
};
use rollcall_core::StudentId;
use rusqlite::types::Type;
use rusqlite::{params, Connection};
use std::path::Path;

const DATE_FMT: &str = "%Y-%m-%d";
const TIME_FMT: &str = "%H:%M:%S";

const SCHEMA_SQL: &str = "
CREATE TABLE IF NOT EXISTS students (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    name        TEXT NOT NULL,
    image_ref   TEXT NOT NULL,
    created_at  TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS attendance (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    student_id  INTEGER NOT NULL REFERENCES students(id) ON DELETE CASCADE,
    date        TEXT NOT NULL,
    time        TEXT NOT NULL,
    status      TEXT NOT NULL,
    UNIQUE (student_id, date)
);
CREATE INDEX IF NOT EXISTS attendance_by_date ON attendance (date, time);
";

/// Optional filters for [`SqliteRecords::attendance_records`].
#[derive(Debug, Clone, Default)]
pub struct AttendanceFilter {
    pub date: Option<NaiveDate>,
    pub student_id: Option<StudentId>,
}

pub struct SqliteRecords {
    conn: Connection,
}

impl SqliteRecords {
    /// Open or create the database at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, RecordError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path).map_err(RecordError::backend)?;
        tracing::debug!(path = %path.display(), "opened record store");
        Self::init(conn)
    }

    pub fn open_in_memory() -> Result<Self, RecordError> {
        Self::init(Connection::open_in_memory().map_err(RecordError::backend)?)
    }

    fn init(conn: Connection) -> Result<Self, RecordError> {
        conn.pragma_update(None, "foreign_keys", 1)
            .map_err(RecordError::backend)?;
        conn.busy_timeout(std::time::Duration::from_secs(5))
            .map_err(RecordError::backend)?;
        conn.execute_batch(SCHEMA_SQL).map_err(RecordError::backend)?;
        Ok(Self { conn })
    }

    /// All students, most recently created first.
    pub fn students(&self) -> Result<Vec<Student>, RecordError> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT id, name, image_ref, created_at FROM students
                 ORDER BY created_at DESC, id DESC",
            )
            .map_err(RecordError::backend)?;
        let rows = stmt
            .query_map([], |row| {
                Ok(Student {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    image_ref: row.get(2)?,
                    created_at: row.get(3)?,
                })
            })
            .map_err(RecordError::backend)?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(RecordError::backend)
    }

    /// Attendance rows matching `filter`, newest date then time first.
    pub fn attendance_records(
        &self,
        filter: &AttendanceFilter,
    ) -> Result<Vec<AttendanceRecord>, RecordError> {
        let date = filter.date.map(|d| d.format(DATE_FMT).to_string());
        let mut stmt = self
            .conn
            .prepare(
                "SELECT id, student_id, date, time, status FROM attendance
                 WHERE (?1 IS NULL OR date = ?1) AND (?2 IS NULL OR student_id = ?2)
                 ORDER BY date DESC, time DESC, id DESC",
            )
            .map_err(RecordError::backend)?;
        let rows = stmt
            .query_map(params![date, filter.student_id], decode_attendance_row)
            .map_err(RecordError::backend)?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(RecordError::backend)
    }
}

impl StudentRegistry for SqliteRecords {
    fn create_student(&self, name: &str, image_ref: &str) -> Result<StudentId, RecordError> {
        self.conn
            .execute(
                "INSERT INTO students (name, image_ref, created_at) VALUES (?1, ?2, ?3)",
                params![name, image_ref, Utc::now().to_rfc3339()],
            )
            .map_err(RecordError::backend)?;
        let id = self.conn.last_insert_rowid();
        tracing::info!(student_id = id, name, "student created");
        Ok(id)
    }

    /// Attendance rows go with the student (`ON DELETE CASCADE`).
    fn delete_student(&self, student_id: StudentId) -> Result<bool, RecordError> {
        let deleted = self
            .conn
            .execute("DELETE FROM students WHERE id = ?1", params![student_id])
            .map_err(RecordError::backend)?;
        if deleted > 0 {
            tracing::info!(student_id, "student deleted");
        }
        Ok(deleted > 0)
    }
}

impl AttendanceLedger for SqliteRecords {
    fn has_recorded(&self, student_id: StudentId, date: NaiveDate) -> Result<bool, RecordError> {
        self.conn
            .query_row(
                "SELECT EXISTS (SELECT 1 FROM attendance WHERE student_id = ?1 AND date = ?2)",
                params![student_id, date.format(DATE_FMT).to_string()],
                |row| row.get(0),
            )
            .map_err(RecordError::backend)
    }

    fn record(
        &self,
        student_id: StudentId,
        date: NaiveDate,
        time: NaiveTime,
        status: &str,
    ) -> Result<RecordOutcome, RecordError> {
        let inserted = self
            .conn
            .execute(
                "INSERT INTO attendance (student_id, date, time, status)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT (student_id, date) DO NOTHING",
                params![
                    student_id,
                    date.format(DATE_FMT).to_string(),
                    time.format(TIME_FMT).to_string(),
                    status
                ],
            )
            .map_err(RecordError::backend)?;

        if inserted == 0 {
            tracing::debug!(student_id, %date, "attendance already recorded");
            return Ok(RecordOutcome::AlreadyRecorded);
        }

        Ok(RecordOutcome::Recorded(AttendanceRecord {
            id: self.conn.last_insert_rowid(),
            student_id,
            date,
            // Stored at second precision.
            time: time.with_nanosecond(0).unwrap_or(time),
            status: status.to_string(),
        }))
    }
}

fn decode_attendance_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<AttendanceRecord> {
    let date: String = row.get(2)?;
    let time: String = row.get(3)?;
    Ok(AttendanceRecord {
        id: row.get(0)?,
        student_id: row.get(1)?,
        date: NaiveDate::parse_from_str(&date, DATE_FMT)
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(2, Type::Text, Box::new(e)))?,
        time: NaiveTime::parse_from_str(&time, TIME_FMT)
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(3, Type::Text, Box::new(e)))?,
        status: row.get(4)?,
    })
}
