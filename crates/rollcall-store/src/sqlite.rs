//! [`Store`] over a single SQLite database file.

use chrono::NaiveDate;
use rollcall_core::store::{DeletedSubject, HistoryFilter, Store, StoreError};
use rollcall_core::types::{
    AttendanceEntry, AttendanceRecord, AttendanceStatus, FaceSamples, SampleSet, SubjectProfile,
    SubjectSummary, SubjectUpdate,
};
use rusqlite::{params, Connection, ErrorCode, OptionalExtension, Row};
use std::path::Path;

const SCHEMA_SQL: &str = "
CREATE TABLE IF NOT EXISTS subjects (
    key            TEXT PRIMARY KEY NOT NULL,
    name           TEXT NOT NULL,
    gender         TEXT NOT NULL,
    class          TEXT NOT NULL,
    representative BLOB NOT NULL,
    sample_1       BLOB NOT NULL,
    sample_2       BLOB NOT NULL,
    sample_3       BLOB NOT NULL,
    sample_4       BLOB NOT NULL,
    sample_5       BLOB NOT NULL,
    score          REAL
);
CREATE TABLE IF NOT EXISTS attendance (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    subject_key TEXT NOT NULL REFERENCES subjects(key),
    date        TEXT NOT NULL,
    time        TEXT NOT NULL,
    status      TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS attendance_subject_date ON attendance(subject_key, date);
";

const SUMMARY_COLUMNS: &str = "key, name, gender, class, score";

const HISTORY_SELECT: &str = "
SELECT a.subject_key, s.name, s.class, a.date, a.time, a.status
FROM attendance a JOIN subjects s ON s.key = a.subject_key";

const HISTORY_ORDER: &str = " ORDER BY a.date DESC, a.time DESC, a.id DESC";

pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    /// Open or create the database at `path`.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| StoreError::Backend(format!("{}: {e}", parent.display())))?;
        }
        let conn = Connection::open(path).map_err(backend)?;
        tracing::info!(path = %path.display(), "opened database");
        Self::init(conn)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::init(Connection::open_in_memory().map_err(backend)?)
    }

    fn init(conn: Connection) -> Result<Self, StoreError> {
        conn.pragma_update(None, "foreign_keys", 1).map_err(backend)?;
        conn.execute_batch(SCHEMA_SQL).map_err(backend)?;
        Ok(Self { conn })
    }

    fn summaries(&self, sql: &str, param: &str) -> Result<Vec<SubjectSummary>, StoreError> {
        let mut stmt = self.conn.prepare(sql).map_err(backend)?;
        let rows = stmt.query_map(params![param], decode_summary).map_err(backend)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(backend)
    }
}

fn backend(e: rusqlite::Error) -> StoreError {
    StoreError::Backend(e.to_string())
}

/// `%fragment%` with LIKE wildcards in `fragment` escaped by `\`.
fn like_pattern(fragment: &str) -> String {
    let mut out = String::with_capacity(fragment.len() + 2);
    out.push('%');
    for c in fragment.chars() {
        if matches!(c, '\\' | '%' | '_') {
            out.push('\\');
        }
        out.push(c);
    }
    out.push('%');
    out
}

fn decode_summary(row: &Row<'_>) -> rusqlite::Result<SubjectSummary> {
    Ok(SubjectSummary {
        key: row.get(0)?,
        name: row.get(1)?,
        gender: row.get(2)?,
        class: row.get(3)?,
        score: row.get::<_, Option<f64>>(4)?.map(|s| s as f32),
    })
}

fn decode_entry(row: &Row<'_>) -> rusqlite::Result<AttendanceEntry> {
    let status: String = row.get(5)?;
    let status = AttendanceStatus::parse(&status).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            5,
            rusqlite::types::Type::Text,
            format!("unknown attendance status {status:?}").into(),
        )
    })?;
    Ok(AttendanceEntry {
        subject_key: row.get(0)?,
        name: row.get(1)?,
        class: row.get(2)?,
        date: row.get(3)?,
        time: row.get(4)?,
        status,
    })
}

impl Store for SqliteStore {
    fn subject_exists(&self, key: &str) -> Result<bool, StoreError> {
        self.conn
            .query_row("SELECT EXISTS(SELECT 1 FROM subjects WHERE key = ?1)", params![key], |r| r.get(0))
            .map_err(backend)
    }

    fn insert_subject(&self, profile: &SubjectProfile) -> Result<(), StoreError> {
        let s = &profile.summary;
        let [s1, s2, s3, s4, s5] = &profile.samples.0;
        let result = self.conn.execute(
            "INSERT INTO subjects (key, name, gender, class, representative,
                                   sample_1, sample_2, sample_3, sample_4, sample_5, score)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                s.key,
                s.name,
                s.gender,
                s.class,
                profile.representative,
                s1,
                s2,
                s3,
                s4,
                s5,
                s.score.map(f64::from)
            ],
        );
        match result {
            Ok(_) => Ok(()),
            Err(rusqlite::Error::SqliteFailure(e, _)) if e.code == ErrorCode::ConstraintViolation => {
                Err(StoreError::Duplicate(s.key.clone()))
            }
            Err(e) => Err(backend(e)),
        }
    }

    fn update_subject(&self, update: &SubjectUpdate) -> Result<bool, StoreError> {
        let changed = match &update.representative {
            Some(rep) => self.conn.execute(
                "UPDATE subjects SET name = ?2, gender = ?3, class = ?4, representative = ?5 WHERE key = ?1",
                params![update.key, update.name, update.gender, update.class, rep],
            ),
            None => self.conn.execute(
                "UPDATE subjects SET name = ?2, gender = ?3, class = ?4 WHERE key = ?1",
                params![update.key, update.name, update.gender, update.class],
            ),
        }
        .map_err(backend)?;
        Ok(changed > 0)
    }

    fn replace_samples(&self, key: &str, samples: &FaceSamples) -> Result<bool, StoreError> {
        let [s1, s2, s3, s4, s5] = &samples.0;
        let changed = self
            .conn
            .execute(
                "UPDATE subjects SET sample_1 = ?2, sample_2 = ?3, sample_3 = ?4, sample_4 = ?5, sample_5 = ?6
                 WHERE key = ?1",
                params![key, s1, s2, s3, s4, s5],
            )
            .map_err(backend)?;
        Ok(changed > 0)
    }

    fn subject(&self, key: &str) -> Result<Option<SubjectProfile>, StoreError> {
        self.conn
            .query_row(
                &format!(
                    "SELECT {SUMMARY_COLUMNS}, representative, sample_1, sample_2, sample_3, sample_4, sample_5
                     FROM subjects WHERE key = ?1"
                ),
                params![key],
                |row| {
                    Ok(SubjectProfile {
                        summary: decode_summary(row)?,
                        representative: row.get(5)?,
                        samples: FaceSamples([row.get(6)?, row.get(7)?, row.get(8)?, row.get(9)?, row.get(10)?]),
                    })
                },
            )
            .optional()
            .map_err(backend)
    }

    fn subjects(&self) -> Result<Vec<SubjectSummary>, StoreError> {
        let mut stmt = self
            .conn
            .prepare(&format!("SELECT {SUMMARY_COLUMNS} FROM subjects ORDER BY key"))
            .map_err(backend)?;
        let rows = stmt.query_map([], decode_summary).map_err(backend)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(backend)
    }

    fn search_subjects(&self, fragment: &str) -> Result<Vec<SubjectSummary>, StoreError> {
        self.summaries(
            &format!("SELECT {SUMMARY_COLUMNS} FROM subjects WHERE key LIKE ?1 ESCAPE '\\' ORDER BY key"),
            &like_pattern(fragment),
        )
    }

    fn class_roster(&self, class: &str) -> Result<Vec<SubjectSummary>, StoreError> {
        self.summaries(
            &format!("SELECT {SUMMARY_COLUMNS} FROM subjects WHERE class = ?1 ORDER BY key"),
            class,
        )
    }

    fn training_samples(&self) -> Result<Vec<SampleSet>, StoreError> {
        let mut stmt = self
            .conn
            .prepare("SELECT key, sample_1, sample_2, sample_3, sample_4, sample_5 FROM subjects ORDER BY rowid")
            .map_err(backend)?;
        let rows = stmt
            .query_map([], |row| {
                let mut samples = Vec::with_capacity(5);
                for col in 1..=5 {
                    samples.push(row.get::<_, Option<Vec<u8>>>(col)?.unwrap_or_default());
                }
                Ok(SampleSet { key: row.get(0)?, samples })
            })
            .map_err(backend)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(backend)
    }

    fn insert_attendance(&self, record: &AttendanceRecord) -> Result<(), StoreError> {
        self.conn
            .execute(
                "INSERT INTO attendance (subject_key, date, time, status) VALUES (?1, ?2, ?3, ?4)",
                params![record.subject_key, record.date, record.time, record.status.as_str()],
            )
            .map_err(backend)?;
        Ok(())
    }

    fn count_attendance_on(&self, key: &str, date: NaiveDate) -> Result<u32, StoreError> {
        self.conn
            .query_row(
                "SELECT COUNT(*) FROM attendance WHERE subject_key = ?1 AND date = ?2",
                params![key, date],
                |r| r.get(0),
            )
            .map_err(backend)
    }

    fn attendance_history(&self, filter: &HistoryFilter) -> Result<Vec<AttendanceEntry>, StoreError> {
        let (sql, param) = match filter {
            HistoryFilter::All => (format!("{HISTORY_SELECT}{HISTORY_ORDER}"), None),
            HistoryFilter::Matching(fragment) => (
                format!(
                    "{HISTORY_SELECT} WHERE s.key LIKE ?1 ESCAPE '\\' OR s.name LIKE ?1 ESCAPE '\\'{HISTORY_ORDER}"
                ),
                Some(like_pattern(fragment)),
            ),
            HistoryFilter::Subject(key) => (format!("{HISTORY_SELECT} WHERE a.subject_key = ?1{HISTORY_ORDER}"), Some(key.clone())),
        };
        let mut stmt = self.conn.prepare(&sql).map_err(backend)?;
        let rows = match &param {
            Some(p) => stmt.query_map(params![p], decode_entry),
            None => stmt.query_map([], decode_entry),
        }
        .map_err(backend)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(backend)
    }

    fn delete_subject(&self, key: &str) -> Result<Option<DeletedSubject>, StoreError> {
        let tx = self.conn.unchecked_transaction().map_err(backend)?;
        let attendance_removed = tx
            .execute("DELETE FROM attendance WHERE subject_key = ?1", params![key])
            .map_err(backend)?;
        let subjects_removed = tx
            .execute("DELETE FROM subjects WHERE key = ?1", params![key])
            .map_err(backend)?;
        if subjects_removed == 0 {
            // Dropping the transaction rolls it back.
            return Ok(None);
        }
        tx.commit().map_err(backend)?;
        Ok(Some(DeletedSubject { attendance_removed }))
    }

    fn set_score(&self, key: &str, score: f32) -> Result<bool, StoreError> {
        let changed = self
            .conn
            .execute("UPDATE subjects SET score = ?2 WHERE key = ?1", params![key, f64::from(score)])
            .map_err(backend)?;
        Ok(changed > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveTime;

    fn profile(key: &str, name: &str, class: &str) -> SubjectProfile {
        SubjectProfile {
            summary: SubjectSummary {
                key: key.into(),
                name: name.into(),
                gender: "F".into(),
                class: class.into(),
                score: None,
            },
            representative: vec![0xAA, 0xBB],
            samples: FaceSamples([vec![1], vec![2], vec![3], vec![4], vec![5]]),
        }
    }

    fn seeded() -> SqliteStore {
        let store = SqliteStore::open_in_memory().unwrap();
        store.insert_subject(&profile("SV002", "Tran B", "K54")).unwrap();
        store.insert_subject(&profile("SV001", "Nguyen A", "K54")).unwrap();
        store.insert_subject(&profile("SV_99", "Le C", "K55")).unwrap();
        store
    }

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 9, d).unwrap()
    }

    fn record(key: &str, d: u32, h: u32, ordinal: u32) -> AttendanceRecord {
        AttendanceRecord {
            subject_key: key.into(),
            date: day(d),
            time: NaiveTime::from_hms_opt(h, 0, 0).unwrap(),
            status: AttendanceStatus::Present,
            ordinal,
        }
    }

    fn keys(list: Vec<SubjectSummary>) -> Vec<String> {
        list.into_iter().map(|s| s.key).collect()
    }

    #[test]
    fn test_insert_and_fetch_profile() {
        let store = seeded();
        let p = store.subject("SV001").unwrap().unwrap();
        assert_eq!(p, profile("SV001", "Nguyen A", "K54"));
        assert!(store.subject("SV404").unwrap().is_none());
        assert!(store.subject_exists("SV002").unwrap());
        assert!(!store.subject_exists("SV404").unwrap());
    }

    #[test]
    fn test_duplicate_key() {
        let store = seeded();
        assert!(matches!(
            store.insert_subject(&profile("SV001", "Other", "K1")),
            Err(StoreError::Duplicate(k)) if k == "SV001"
        ));
    }

    #[test]
    fn test_search_escapes_wildcards() {
        let store = seeded();
        assert_eq!(keys(store.search_subjects("SV").unwrap()), vec!["SV001", "SV002", "SV_99"]);
        // '_' is literal, not "any character".
        assert_eq!(keys(store.search_subjects("V_").unwrap()), vec!["SV_99"]);
        assert!(store.search_subjects("%").unwrap().is_empty());
    }

    #[test]
    fn test_search_ignores_ascii_case() {
        let store = seeded();
        assert_eq!(keys(store.search_subjects("sv00").unwrap()), vec!["SV001", "SV002"]);
    }

    #[test]
    fn test_roster_and_list() {
        let store = seeded();
        assert_eq!(keys(store.class_roster("K54").unwrap()), vec!["SV001", "SV002"]);
        assert_eq!(store.subjects().unwrap().len(), 3);
    }

    #[test]
    fn test_update_and_replace_samples() {
        let store = seeded();
        let update = SubjectUpdate {
            key: "SV001".into(),
            name: "Nguyen AA".into(),
            gender: "M".into(),
            class: "K56".into(),
            representative: None,
        };
        assert!(store.update_subject(&update).unwrap());
        let p = store.subject("SV001").unwrap().unwrap();
        assert_eq!(p.summary.name, "Nguyen AA");
        assert_eq!(p.representative, vec![0xAA, 0xBB]);

        let fresh = FaceSamples([vec![9], vec![8], vec![7], vec![6], vec![5]]);
        assert!(store.replace_samples("SV001", &fresh).unwrap());
        assert_eq!(store.subject("SV001").unwrap().unwrap().samples, fresh);
        assert!(!store.replace_samples("SV404", &fresh).unwrap());
        assert!(!store.update_subject(&SubjectUpdate { key: "SV404".into(), ..update }).unwrap());
    }

    #[test]
    fn test_training_samples_in_insert_order() {
        let store = seeded();
        let sets = store.training_samples().unwrap();
        assert_eq!(sets.iter().map(|s| s.key.as_str()).collect::<Vec<_>>(), vec!["SV002", "SV001", "SV_99"]);
        assert_eq!(sets[0].samples, vec![vec![1], vec![2], vec![3], vec![4], vec![5]]);
    }

    #[test]
    fn test_same_day_count() {
        let store = seeded();
        store.insert_attendance(&record("SV001", 3, 8, 1)).unwrap();
        store.insert_attendance(&record("SV001", 3, 9, 2)).unwrap();
        store.insert_attendance(&record("SV001", 4, 8, 1)).unwrap();
        assert_eq!(store.count_attendance_on("SV001", day(3)).unwrap(), 2);
        assert_eq!(store.count_attendance_on("SV001", day(4)).unwrap(), 1);
        assert_eq!(store.count_attendance_on("SV002", day(3)).unwrap(), 0);
    }

    #[test]
    fn test_history_newest_first_and_filters() {
        let store = seeded();
        store.insert_attendance(&record("SV001", 3, 8, 1)).unwrap();
        store.insert_attendance(&record("SV002", 3, 10, 1)).unwrap();
        store.insert_attendance(&record("SV001", 4, 7, 1)).unwrap();

        let all = store.attendance_history(&HistoryFilter::All).unwrap();
        assert_eq!(
            all.iter().map(|e| (e.subject_key.as_str(), e.date)).collect::<Vec<_>>(),
            vec![("SV001", day(4)), ("SV002", day(3)), ("SV001", day(3))]
        );
        assert_eq!(all[1].name, "Tran B");
        assert_eq!(all[1].status, AttendanceStatus::Present);

        let by_name = store.attendance_history(&HistoryFilter::Matching("Tran".into())).unwrap();
        assert_eq!(by_name.len(), 1);
        let by_key = store.attendance_history(&HistoryFilter::Subject("SV001".into())).unwrap();
        assert_eq!(by_key.len(), 2);
        assert_eq!(by_key[0].time, NaiveTime::from_hms_opt(7, 0, 0).unwrap());
    }

    #[test]
    fn test_attendance_requires_subject() {
        let store = seeded();
        assert!(store.insert_attendance(&record("SV404", 3, 8, 1)).is_err());
    }

    #[test]
    fn test_delete_removes_attendance_first() {
        let store = seeded();
        for h in 8..11 {
            store.insert_attendance(&record("SV001", 3, h, h - 7)).unwrap();
        }
        store.insert_attendance(&record("SV002", 3, 8, 1)).unwrap();

        assert_eq!(store.delete_subject("SV001").unwrap(), Some(DeletedSubject { attendance_removed: 3 }));
        assert!(store.attendance_history(&HistoryFilter::Subject("SV001".into())).unwrap().is_empty());
        assert!(!store.subject_exists("SV001").unwrap());
        assert_eq!(store.attendance_history(&HistoryFilter::All).unwrap().len(), 1);
        assert_eq!(store.delete_subject("SV001").unwrap(), None);
    }

    #[test]
    fn test_set_score() {
        let store = seeded();
        assert!(store.set_score("SV001", 8.5).unwrap());
        assert_eq!(store.subject("SV001").unwrap().unwrap().summary.score, Some(8.5));
        assert!(!store.set_score("SV404", 1.0).unwrap());
    }

    #[test]
    fn test_open_creates_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("rollcall.db");
        {
            let store = SqliteStore::open(&path).unwrap();
            store.insert_subject(&profile("SV001", "A", "K1")).unwrap();
        }
        let reopened = SqliteStore::open(&path).unwrap();
        assert!(reopened.subject_exists("SV001").unwrap());
    }

    #[test]
    fn test_like_pattern() {
        assert_eq!(like_pattern("a_b%c\\"), "%a\\_b\\%c\\\\%");
    }
}
