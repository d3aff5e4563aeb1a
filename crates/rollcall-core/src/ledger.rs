//! Attendance ledger.
//!
//! Append-only. A record can only be written on the back of a current match,
//! and repeated confirmations on one day are all kept with increasing
//! ordinals.

use crate::events::{EventBus, RollEvent};
use crate::recognition::Recognition;
use crate::store::{DeletedSubject, HistoryFilter, Store, StoreError};
use crate::types::{AttendanceEntry, AttendanceRecord, AttendanceStatus};
use chrono::{NaiveDate, NaiveDateTime};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("no recognized subject to mark")]
    Rejected,
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Same-day marking state of a subject, shown when they are recognized.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DayStatus {
    NotMarked,
    Marked(u32),
}

pub struct Ledger<'a> {
    store: &'a dyn Store,
    events: &'a EventBus,
}

impl<'a> Ledger<'a> {
    pub fn new(store: &'a dyn Store, events: &'a EventBus) -> Self {
        Self { store, events }
    }

    /// Record attendance for the subject of a current match at `at`.
    ///
    /// The ordinal is the number of records already stored for that subject on
    /// `at`'s date, plus one.
    pub fn mark_attendance(&self, recognition: &Recognition, at: NaiveDateTime) -> Result<AttendanceRecord, LedgerError> {
        let Some(matched) = recognition.matched() else {
            tracing::debug!("attendance mark rejected: no current match");
            return Err(LedgerError::Rejected);
        };
        let key = matched.subject.key.as_str();
        let date = at.date();

        let prior = self.store.count_attendance_on(key, date)?;
        let record = AttendanceRecord {
            subject_key: key.to_string(),
            date,
            time: at.time(),
            status: AttendanceStatus::Present,
            ordinal: prior + 1,
        };
        self.store.insert_attendance(&record)?;

        tracing::info!(key, %date, ordinal = record.ordinal, "attendance recorded");
        self.events.publish(RollEvent::AttendanceRecorded(record.clone()));
        Ok(record)
    }

    pub fn day_status(&self, key: &str, date: NaiveDate) -> Result<DayStatus, LedgerError> {
        Ok(match self.store.count_attendance_on(key, date)? {
            0 => DayStatus::NotMarked,
            n => DayStatus::Marked(n),
        })
    }

    pub fn history(&self, filter: &HistoryFilter) -> Result<Vec<AttendanceEntry>, LedgerError> {
        Ok(self.store.attendance_history(filter)?)
    }

    /// Most recent record of `key` on `date`.
    pub fn latest_on(&self, key: &str, date: NaiveDate) -> Result<Option<AttendanceEntry>, LedgerError> {
        Ok(self
            .store
            .attendance_history(&HistoryFilter::Subject(key.to_string()))?
            .into_iter()
            .find(|e| e.date == date))
    }

    /// Remove a subject along with its ledger rows. Rows go first.
    pub fn delete_subject(&self, key: &str) -> Result<Option<DeletedSubject>, LedgerError> {
        let deleted = self.store.delete_subject(key)?;
        if let Some(d) = deleted {
            tracing::info!(key, attendance_removed = d.attendance_removed, "subject deleted");
            self.events.publish(RollEvent::SubjectDeleted {
                key: key.to_string(),
                attendance_removed: d.attendance_removed,
            });
        }
        Ok(deleted)
    }
}
