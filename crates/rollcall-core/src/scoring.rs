//! Coursework score from session attendance tallies.

use crate::store::{Store, StoreError};
use thiserror::Error;

pub const MAX_SESSIONS: u32 = 12;
pub const BASE_SCORE: f32 = 10.0;
const EXCUSED_PENALTY: f32 = 0.5;
const UNEXCUSED_PENALTY: f32 = 1.0;

#[derive(Error, Debug, PartialEq)]
pub enum ScoreError {
    #[error("{total} sessions exceeds the maximum of {MAX_SESSIONS}")]
    OverLimit { total: u64 },
    #[error("no such subject: {0}")]
    UnknownSubject(String),
    #[error("store: {0}")]
    Store(String),
}

impl From<StoreError> for ScoreError {
    fn from(e: StoreError) -> Self {
        ScoreError::Store(e.to_string())
    }
}

/// Attendance counts for one subject over a course.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionTally {
    pub present: u32,
    pub excused: u32,
    pub unexcused: u32,
}

impl SessionTally {
    pub fn total(&self) -> u64 {
        u64::from(self.present) + u64::from(self.excused) + u64::from(self.unexcused)
    }
}

/// `max(10 - 0.5 * excused - 1 * unexcused, 0)`, refusing tallies over 12 sessions.
pub fn session_score(tally: SessionTally) -> Result<f32, ScoreError> {
    let total = tally.total();
    if total > u64::from(MAX_SESSIONS) {
        return Err(ScoreError::OverLimit { total });
    }
    let deduction = tally.excused as f32 * EXCUSED_PENALTY + tally.unexcused as f32 * UNEXCUSED_PENALTY;
    Ok((BASE_SCORE - deduction).max(0.0))
}

/// Compute and store the score for `key`. Nothing is written on error.
pub fn record_session_score(store: &dyn Store, key: &str, tally: SessionTally) -> Result<f32, ScoreError> {
    let score = session_score(tally)?;
    if !store.set_score(key, score)? {
        return Err(ScoreError::UnknownSubject(key.to_string()));
    }
    tracing::info!(key, score, "session score recorded");
    Ok(score)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::MemoryStore;
    use crate::types::{FaceSamples, SubjectProfile, SubjectSummary};

    fn tally(present: u32, excused: u32, unexcused: u32) -> SessionTally {
        SessionTally { present, excused, unexcused }
    }

    #[test]
    fn test_over_limit_rejected() {
        assert_eq!(session_score(tally(9, 2, 2)), Err(ScoreError::OverLimit { total: 13 }));
    }

    #[test]
    fn test_huge_counts_do_not_wrap() {
        assert_eq!(
            session_score(tally(u32::MAX, 1, 0)),
            Err(ScoreError::OverLimit { total: u64::from(u32::MAX) + 1 })
        );
    }

    #[test]
    fn test_normal_deduction() {
        assert_eq!(session_score(tally(0, 2, 1)), Ok(8.0));
    }

    #[test]
    fn test_full_attendance() {
        assert_eq!(session_score(tally(12, 0, 0)), Ok(10.0));
    }

    #[test]
    fn test_floor_at_zero() {
        assert_eq!(session_score(tally(0, 0, 12)), Ok(0.0));
    }

    #[test]
    fn test_over_limit_writes_nothing() {
        let store = MemoryStore::default();
        store
            .insert_subject(&SubjectProfile {
                summary: SubjectSummary {
                    key: "SV001".into(),
                    name: "A".into(),
                    gender: "M".into(),
                    class: "K1".into(),
                    score: None,
                },
                representative: Vec::new(),
                samples: FaceSamples(Default::default()),
            })
            .unwrap();

        assert!(record_session_score(&store, "SV001", tally(9, 2, 2)).is_err());
        assert!(record_session_score(&store, "SV001", tally(u32::MAX, 1, 0)).is_err());
        assert_eq!(store.subject("SV001").unwrap().unwrap().summary.score, None);

        assert_eq!(record_session_score(&store, "SV001", tally(9, 2, 1)), Ok(8.0));
        assert_eq!(store.subject("SV001").unwrap().unwrap().summary.score, Some(8.0));
    }

    #[test]
    fn test_unknown_subject() {
        let store = MemoryStore::default();
        assert_eq!(
            record_session_score(&store, "SV404", tally(1, 0, 0)),
            Err(ScoreError::UnknownSubject("SV404".into()))
        );
    }
}
