//! Storage capability consumed by the engine.
//!
//! Rows cross this boundary as typed records only. The SQLite implementation
//! lives in `rollcall-store`.

use crate::types::{
    AttendanceEntry, AttendanceRecord, FaceSamples, SampleSet, SubjectProfile, SubjectSummary,
    SubjectUpdate,
};
use chrono::NaiveDate;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("store backend: {0}")]
    Backend(String),
    #[error("subject already exists: {0}")]
    Duplicate(String),
    #[error("corrupt row: {0}")]
    Corrupt(String),
}

/// Which ledger rows a history query returns. Results are newest first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HistoryFilter {
    All,
    /// Subject key or name containing the fragment.
    Matching(String),
    /// Exactly one subject.
    Subject(String),
}

/// Outcome of a cascading subject delete.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeletedSubject {
    pub attendance_removed: usize,
}

pub trait Store {
    fn subject_exists(&self, key: &str) -> Result<bool, StoreError>;
    fn insert_subject(&self, profile: &SubjectProfile) -> Result<(), StoreError>;
    /// Returns `false` when no subject has `update.key`.
    fn update_subject(&self, update: &SubjectUpdate) -> Result<bool, StoreError>;
    /// Overwrite all five samples at once. Returns `false` for an unknown key.
    fn replace_samples(&self, key: &str, samples: &FaceSamples) -> Result<bool, StoreError>;
    fn subject(&self, key: &str) -> Result<Option<SubjectProfile>, StoreError>;
    fn subjects(&self) -> Result<Vec<SubjectSummary>, StoreError>;
    /// Subjects whose key contains `fragment` literally.
    fn search_subjects(&self, fragment: &str) -> Result<Vec<SubjectSummary>, StoreError>;
    /// Subjects of one class, ordered by key.
    fn class_roster(&self, class: &str) -> Result<Vec<SubjectSummary>, StoreError>;
    /// Samples of every subject, in store order.
    fn training_samples(&self) -> Result<Vec<SampleSet>, StoreError>;
    fn insert_attendance(&self, record: &AttendanceRecord) -> Result<(), StoreError>;
    /// Number of ledger rows for `key` whose stored date equals `date`.
    fn count_attendance_on(&self, key: &str, date: NaiveDate) -> Result<u32, StoreError>;
    fn attendance_history(&self, filter: &HistoryFilter) -> Result<Vec<AttendanceEntry>, StoreError>;
    /// Delete the subject's ledger rows, then the subject, as one unit.
    ///
    /// Returns `None` when the subject did not exist.
    fn delete_subject(&self, key: &str) -> Result<Option<DeletedSubject>, StoreError>;
    /// Returns `false` for an unknown key.
    fn set_score(&self, key: &str, score: f32) -> Result<bool, StoreError>;
}
