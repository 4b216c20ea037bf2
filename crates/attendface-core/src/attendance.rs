//! Per-class attendance ledger stored as CSV.
//!
//! One file per class at `<root>/<class>.csv` with the columns in
//! [`COLUMNS`]. A student has at most one row per date; check-out fills the
//! `CheckOut` cell of that row. Every change rewrites the whole file through
//! a temporary file and a rename.

use crate::types::{validate_identifier, InvalidIdentifier};
use chrono::{Local, NaiveDate, NaiveDateTime, NaiveTime, Timelike};
use serde::{Deserialize, Serialize, Serializer};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;

pub const COLUMNS: [&str; 5] = ["Enrollment", "Name", "Date", "CheckIn", "CheckOut"];

const LEDGER_EXTENSION: &str = "csv";

#[derive(Error, Debug)]
pub enum LedgerError {
    #[error(transparent)]
    InvalidIdentifier(#[from] InvalidIdentifier),
    #[error("attendance file not found for {0}")]
    NotFound(String),
    #[error("ledger {path}: {source}")]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

/// One ledger row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttendanceRecord {
    #[serde(rename = "Enrollment")]
    pub enrollment: String,
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "Date")]
    pub date: NaiveDate,
    #[serde(rename = "CheckIn", serialize_with = "clock")]
    pub check_in: NaiveTime,
    #[serde(rename = "CheckOut", serialize_with = "clock_or_empty", default)]
    pub check_out: Option<NaiveTime>,
}

fn clock<S: Serializer>(time: &NaiveTime, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.collect_str(&time.format("%H:%M:%S"))
}

fn clock_or_empty<S: Serializer>(time: &Option<NaiveTime>, serializer: S) -> Result<S::Ok, S::Error> {
    match time {
        Some(t) => clock(t, serializer),
        None => serializer.serialize_str(""),
    }
}

/// Outcome of a check-in or check-out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mark {
    CheckedIn,
    AlreadyCheckedIn,
    CheckedOut,
    NotCheckedIn,
    AlreadyCheckedOut,
}

impl Mark {
    pub fn is_ok(self) -> bool {
        matches!(self, Mark::CheckedIn | Mark::CheckedOut)
    }

    pub fn message(self) -> &'static str {
        match self {
            Mark::CheckedIn => "Check-in successful",
            Mark::AlreadyCheckedIn => "Already checked in",
            Mark::CheckedOut => "Check-out successful",
            Mark::NotCheckedIn => "Please check-in first",
            Mark::AlreadyCheckedOut => "Already checked out",
        }
    }
}

/// CSV attendance ledgers rooted at the attendance directory.
///
/// Updates to one class are serialized; different classes proceed in
/// parallel.
#[derive(Debug)]
pub struct AttendanceBook {
    root: PathBuf,
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl AttendanceBook {
    /// Open the book, creating the root directory if needed.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, LedgerError> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self {
            root,
            locks: Mutex::new(HashMap::new()),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn ledger_path(&self, class: &str) -> Result<PathBuf, LedgerError> {
        validate_identifier("class name", class)?;
        Ok(self.root.join(format!("{class}.{LEDGER_EXTENSION}")))
    }

    fn class_lock(&self, class: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        locks.entry(class.to_string()).or_default().clone()
    }

    /// Check `enrollment` in for today, local time.
    pub fn checkin(&self, class: &str, enrollment: &str, name: &str) -> Result<Mark, LedgerError> {
        self.checkin_at(class, enrollment, name, Local::now().naive_local())
    }

    pub fn checkin_at(
        &self,
        class: &str,
        enrollment: &str,
        name: &str,
        now: NaiveDateTime,
    ) -> Result<Mark, LedgerError> {
        let path = self.ledger_path(class)?;
        validate_identifier("enrollment", enrollment)?;

        let lock = self.class_lock(class);
        let _guard = lock_ignoring_poison(&lock);

        let mut records = read_or_create(&path)?;
        let today = now.date();
        if records.iter().any(|r| r.enrollment == enrollment && r.date == today) {
            return Ok(Mark::AlreadyCheckedIn);
        }

        records.push(AttendanceRecord {
            enrollment: enrollment.to_string(),
            name: name.to_string(),
            date: today,
            check_in: whole_seconds(now.time()),
            check_out: None,
        });
        write_ledger(&path, &records)?;
        tracing::info!(class, enrollment, date = %today, "checked in");
        Ok(Mark::CheckedIn)
    }

    /// Check `enrollment` out for today, local time.
    pub fn checkout(&self, class: &str, enrollment: &str) -> Result<Mark, LedgerError> {
        self.checkout_at(class, enrollment, Local::now().naive_local())
    }

    pub fn checkout_at(&self, class: &str, enrollment: &str, now: NaiveDateTime) -> Result<Mark, LedgerError> {
        let path = self.ledger_path(class)?;
        validate_identifier("enrollment", enrollment)?;

        let lock = self.class_lock(class);
        let _guard = lock_ignoring_poison(&lock);

        let mut records = read_or_create(&path)?;
        let today = now.date();
        let Some(record) = records
            .iter_mut()
            .find(|r| r.enrollment == enrollment && r.date == today)
        else {
            return Ok(Mark::NotCheckedIn);
        };
        if record.check_out.is_some() {
            return Ok(Mark::AlreadyCheckedOut);
        }

        record.check_out = Some(whole_seconds(now.time()));
        write_ledger(&path, &records)?;
        tracing::info!(class, enrollment, date = %today, "checked out");
        Ok(Mark::CheckedOut)
    }

    /// All rows of a class ledger, in file order.
    pub fn records(&self, class: &str) -> Result<Vec<AttendanceRecord>, LedgerError> {
        let path = self.ledger_path(class)?;
        if !path.exists() {
            return Err(LedgerError::NotFound(class.to_string()));
        }
        read_ledger(&path)
    }
}

fn lock_ignoring_poison(lock: &Mutex<()>) -> MutexGuard<'_, ()> {
    lock.lock().unwrap_or_else(|e| e.into_inner())
}

fn whole_seconds(time: NaiveTime) -> NaiveTime {
    time.with_nanosecond(0).unwrap_or(time)
}

fn read_or_create(path: &Path) -> Result<Vec<AttendanceRecord>, LedgerError> {
    if path.exists() {
        read_ledger(path)
    } else {
        write_ledger(path, &[])?;
        Ok(Vec::new())
    }
}

fn read_ledger(path: &Path) -> Result<Vec<AttendanceRecord>, LedgerError> {
    let csv_err = |source| LedgerError::Csv {
        path: path.to_path_buf(),
        source,
    };
    let mut reader = csv::Reader::from_path(path).map_err(csv_err)?;
    reader
        .deserialize()
        .collect::<Result<Vec<AttendanceRecord>, _>>()
        .map_err(csv_err)
}

fn write_ledger(path: &Path, records: &[AttendanceRecord]) -> Result<(), LedgerError> {
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let tmp = path.with_file_name(format!(".{file_name}.tmp"));

    let written = write_csv(&tmp, records).and_then(|()| fs::rename(&tmp, path).map_err(LedgerError::from));
    if written.is_err() {
        let _ = fs::remove_file(&tmp);
    }
    written
}

fn write_csv(tmp: &Path, records: &[AttendanceRecord]) -> Result<(), LedgerError> {
    let csv_err = |source| LedgerError::Csv {
        path: tmp.to_path_buf(),
        source,
    };
    // Header written by hand so an empty ledger still carries it.
    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_path(tmp)
        .map_err(csv_err)?;
    writer.write_record(COLUMNS).map_err(csv_err)?;
    for record in records {
        writer.serialize(record).map_err(csv_err)?;
    }
    writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn at(date: &str, time: &str) -> NaiveDateTime {
        NaiveDateTime::parse_from_str(&format!("{date} {time}"), "%Y-%m-%d %H:%M:%S").unwrap()
    }

    fn book() -> (TempDir, AttendanceBook) {
        let dir = TempDir::new().unwrap();
        let book = AttendanceBook::open(dir.path()).unwrap();
        (dir, book)
    }

    #[test]
    fn test_checkin_creates_ledger() {
        let (dir, book) = book();
        let mark = book.checkin_at("CS101", "007", "Ada", at("2024-03-01", "09:00:00")).unwrap();
        assert_eq!(mark, Mark::CheckedIn);
        assert!(mark.is_ok());

        let text = fs::read_to_string(dir.path().join("CS101.csv")).unwrap();
        let mut lines = text.lines();
        assert_eq!(lines.next(), Some("Enrollment,Name,Date,CheckIn,CheckOut"));
        assert_eq!(lines.next(), Some("007,Ada,2024-03-01,09:00:00,"));
    }

    #[test]
    fn test_second_checkin_same_day() {
        let (_dir, book) = book();
        book.checkin_at("CS101", "007", "Ada", at("2024-03-01", "09:00:00")).unwrap();
        let mark = book.checkin_at("CS101", "007", "Ada", at("2024-03-01", "11:00:00")).unwrap();
        assert_eq!(mark, Mark::AlreadyCheckedIn);
        assert_eq!(mark.message(), "Already checked in");
        assert!(!mark.is_ok());
        assert_eq!(book.records("CS101").unwrap().len(), 1);
    }

    #[test]
    fn test_checkin_next_day_adds_row() {
        let (_dir, book) = book();
        book.checkin_at("CS101", "007", "Ada", at("2024-03-01", "09:00:00")).unwrap();
        let mark = book.checkin_at("CS101", "007", "Ada", at("2024-03-02", "09:00:00")).unwrap();
        assert_eq!(mark, Mark::CheckedIn);
        assert_eq!(book.records("CS101").unwrap().len(), 2);
    }

    #[test]
    fn test_checkout_before_checkin() {
        let (_dir, book) = book();
        let mark = book.checkout_at("CS101", "007", at("2024-03-01", "15:00:00")).unwrap();
        assert_eq!(mark, Mark::NotCheckedIn);
        assert_eq!(mark.message(), "Please check-in first");
    }

    #[test]
    fn test_checkout_then_again() {
        let (_dir, book) = book();
        book.checkin_at("CS101", "007", "Ada", at("2024-03-01", "09:00:00")).unwrap();

        let first = book.checkout_at("CS101", "007", at("2024-03-01", "15:30:12")).unwrap();
        assert_eq!(first, Mark::CheckedOut);
        assert_eq!(first.message(), "Check-out successful");

        let second = book.checkout_at("CS101", "007", at("2024-03-01", "16:00:00")).unwrap();
        assert_eq!(second, Mark::AlreadyCheckedOut);

        let records = book.records("CS101").unwrap();
        assert_eq!(records[0].check_out, NaiveTime::from_hms_opt(15, 30, 12));
    }

    #[test]
    fn test_checkout_only_touches_todays_row() {
        let (_dir, book) = book();
        book.checkin_at("CS101", "007", "Ada", at("2024-03-01", "09:00:00")).unwrap();
        let mark = book.checkout_at("CS101", "007", at("2024-03-02", "15:00:00")).unwrap();
        assert_eq!(mark, Mark::NotCheckedIn);
    }

    #[test]
    fn test_classes_are_separate() {
        let (_dir, book) = book();
        book.checkin_at("CS101", "007", "Ada", at("2024-03-01", "09:00:00")).unwrap();
        let mark = book.checkin_at("MATH2", "007", "Ada", at("2024-03-01", "09:00:00")).unwrap();
        assert_eq!(mark, Mark::CheckedIn);
    }

    #[test]
    fn test_failed_rewrite_removes_temp_file() {
        let (dir, _book) = book();
        let path = dir.path().join("CS101.csv");
        fs::create_dir_all(&path).unwrap();
        fs::write(path.join("keep"), "x").unwrap();

        assert!(write_ledger(&path, &[]).is_err());
        assert!(!dir.path().join(".CS101.csv.tmp").exists());
    }

    #[test]
    fn test_records_missing_ledger() {
        let (_dir, book) = book();
        assert!(matches!(book.records("CS101"), Err(LedgerError::NotFound(_))));
    }

    #[test]
    fn test_invalid_class_name() {
        let (_dir, book) = book();
        let err = book
            .checkin_at("../etc", "007", "Ada", at("2024-03-01", "09:00:00"))
            .unwrap_err();
        assert!(matches!(err, LedgerError::InvalidIdentifier(_)));
    }

    #[test]
    fn test_names_with_commas_survive() {
        let (_dir, book) = book();
        book.checkin_at("CS101", "007", "Lovelace, Ada", at("2024-03-01", "09:00:00")).unwrap();
        assert_eq!(book.records("CS101").unwrap()[0].name, "Lovelace, Ada");
    }

    #[test]
    fn test_fractional_seconds_are_dropped() {
        let (_dir, book) = book();
        let now = at("2024-03-01", "09:00:00").with_nanosecond(750_000_000).unwrap();
        book.checkin_at("CS101", "007", "Ada", now).unwrap();
        assert_eq!(book.records("CS101").unwrap()[0].check_in, NaiveTime::from_hms_opt(9, 0, 0).unwrap());
    }

    #[test]
    fn test_record_json_shape() {
        let record = AttendanceRecord {
            enrollment: "007".into(),
            name: "Ada".into(),
            date: NaiveDate::from_ymd_opt(2024, 3, 1).unwrap(),
            check_in: NaiveTime::from_hms_opt(9, 0, 0).unwrap(),
            check_out: None,
        };
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["Date"], "2024-03-01");
        assert_eq!(json["CheckIn"], "09:00:00");
        assert_eq!(json["CheckOut"], "");
    }

    #[test]
    fn test_concurrent_checkins_keep_every_row() {
        let (_dir, book) = book();
        let book = Arc::new(book);
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let book = Arc::clone(&book);
                std::thread::spawn(move || {
                    book.checkin_at("CS101", &format!("S{i}"), "Student", at("2024-03-01", "09:00:00"))
                        .unwrap()
                })
            })
            .collect();
        for h in handles {
            assert_eq!(h.join().unwrap(), Mark::CheckedIn);
        }
        assert_eq!(book.records("CS101").unwrap().len(), 8);
    }
}
