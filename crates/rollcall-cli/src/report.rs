//! Attendance report rendering.

use rollcall_core::records::{AttendanceRecord, Student};
use rollcall_core::StudentId;
use serde::Serialize;
use std::collections::HashMap;
use std::io::Write;

#[derive(Debug, Serialize)]
pub struct ReportRow<'a> {
    pub student_id: StudentId,
    pub name: &'a str,
    pub date: String,
    pub time: String,
    pub status: &'a str,
}

/// Join attendance rows with student names; unknown ids get an empty name.
pub fn rows<'a>(records: &'a [AttendanceRecord], students: &'a [Student]) -> Vec<ReportRow<'a>> {
    let names: HashMap<StudentId, &str> = students.iter().map(|s| (s.id, s.name.as_str())).collect();
    records
        .iter()
        .map(|r| ReportRow {
            student_id: r.student_id,
            name: names.get(&r.student_id).copied().unwrap_or(""),
            date: r.date.format("%Y-%m-%d").to_string(),
            time: r.time.format("%H:%M:%S").to_string(),
            status: &r.status,
        })
        .collect()
}

pub fn write_csv(out: &mut impl Write, rows: &[ReportRow<'_>]) -> std::io::Result<()> {
    writeln!(out, "student_id,name,date,time,status")?;
    for row in rows {
        writeln!(
            out,
            "{},{},{},{},{}",
            row.student_id,
            csv_field(row.name),
            row.date,
            row.time,
            csv_field(row.status)
        )?;
    }
    Ok(())
}

pub fn write_table(out: &mut impl Write, rows: &[ReportRow<'_>]) -> std::io::Result<()> {
    if rows.is_empty() {
        return writeln!(out, "No attendance recorded");
    }
    writeln!(out, "{:<10} {:<24} {:<10} {:<8} STATUS", "ID", "NAME", "DATE", "TIME")?;
    for row in rows {
        writeln!(
            out,
            "{:<10} {:<24} {:<10} {:<8} {}",
            row.student_id, row.name, row.date, row.time, row.status
        )?;
    }
    Ok(())
}

fn csv_field(value: &str) -> String {
    if value.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, NaiveTime};

    fn record(id: i64, student_id: StudentId) -> AttendanceRecord {
        AttendanceRecord {
            id,
            student_id,
            date: NaiveDate::from_ymd_opt(2026, 10, 17).unwrap(),
            time: NaiveTime::from_hms_opt(8, 59, 1).unwrap(),
            status: "present".into(),
        }
    }

    fn student(id: StudentId, name: &str) -> Student {
        Student {
            id,
            name: name.into(),
            image_ref: format!("{id}.jpg"),
            created_at: "2026-10-01T08:00:00Z".into(),
        }
    }

    #[test]
    fn test_csv_quotes_names() {
        let records = [record(1, 7), record(2, 9)];
        let students = [student(7, "Lovelace, Ada"), student(9, "Bo \"B\" Li")];
        let mut out = Vec::new();
        write_csv(&mut out, &rows(&records, &students)).unwrap();
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "student_id,name,date,time,status\n\
             7,\"Lovelace, Ada\",2026-10-17,08:59:01,present\n\
             9,\"Bo \"\"B\"\" Li\",2026-10-17,08:59:01,present\n"
        );
    }

    #[test]
    fn test_unknown_student_has_empty_name() {
        let records = [record(1, 3)];
        let joined = rows(&records, &[]);
        assert_eq!(joined[0].name, "");
    }

    #[test]
    fn test_json_row_shape() {
        let records = [record(1, 7)];
        let students = [student(7, "Ana")];
        let json = serde_json::to_value(&rows(&records, &students)[0]).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "student_id": 7,
                "name": "Ana",
                "date": "2026-10-17",
                "time": "08:59:01",
                "status": "present",
            })
        );
    }

    #[test]
    fn test_empty_table() {
        let mut out = Vec::new();
        write_table(&mut out, &[]).unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), "No attendance recorded\n");
    }
}
