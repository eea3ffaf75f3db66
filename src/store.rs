//! Keyed pending/published containers.
//!
//! Every write names the version it expects to replace (`Expect::Absent` when
//! the key must not exist yet). A mismatch is a `Conflict`; the store never
//! retries. This is the per-key mutual exclusion the workflow relies on.

use crate::error::{EngineError, EngineResult};
use crate::model::{PublishedRecord, ResultRecord, ResultSet};
use chrono::Utc;
use rusqlite::{Connection, OptionalExtension, Transaction, TransactionBehavior};
use serde::de::DeserializeOwned;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Expect {
    Absent,
    Version(i64),
}

impl Expect {
    pub fn of<T>(current: Option<&Versioned<T>>) -> Self {
        match current {
            Some(v) => Expect::Version(v.version),
            None => Expect::Absent,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Versioned<T> {
    pub key: String,
    pub version: i64,
    /// Set for published rows only.
    pub fingerprint: Option<String>,
    pub record: T,
}

pub trait ResultStore {
    fn list_pending(&self) -> EngineResult<Vec<Versioned<ResultRecord>>>;
    fn get_pending(&self, key: &str) -> EngineResult<Option<Versioned<ResultRecord>>>;
    fn pending_cohort(&self, grade: &str, section: &str)
        -> EngineResult<Vec<Versioned<ResultRecord>>>;

    fn list_published(&self) -> EngineResult<Vec<Versioned<PublishedRecord>>>;
    fn get_published(&self, key: &str) -> EngineResult<Option<Versioned<PublishedRecord>>>;
    fn published_cohort(
        &self,
        grade: &str,
        section: &str,
    ) -> EngineResult<Vec<Versioned<PublishedRecord>>>;
    fn published_for_student(&self, student_id: &str)
        -> EngineResult<Vec<Versioned<PublishedRecord>>>;

    /// Creates or overwrites a pending entry. Returns the new version.
    fn put_pending(&self, key: &str, record: &ResultRecord, expect: Expect) -> EngineResult<i64>;

    /// Drops the pending entry at `pending_version` without touching the
    /// published entry, provided the published entry still matches
    /// `published`. Both checks and the delete share one transaction.
    fn settle_pending(&self, key: &str, published: Expect, pending_version: i64) -> EngineResult<()>;

    /// Writes the published entry and settles the pending entry in one
    /// transaction: `pending` names the pending row to delete, or `Absent` to
    /// assert none exists.
    fn publish(
        &self,
        key: &str,
        record: &PublishedRecord,
        fingerprint: &str,
        published: Expect,
        pending: Expect,
    ) -> EngineResult<i64>;

    /// Deletes a published entry. Missing keys are a no-op and return `None`.
    fn delete_published(&self, key: &str) -> EngineResult<Option<PublishedRecord>>;

    /// Rewrites only the rank of a stored record.
    fn set_rank(&self, set: ResultSet, key: &str, rank: usize, version: i64) -> EngineResult<i64>;
}

pub struct SqliteResultStore<'a> {
    conn: &'a Connection,
}

impl<'a> SqliteResultStore<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    fn begin(&self) -> EngineResult<Transaction<'a>> {
        Ok(Transaction::new_unchecked(
            self.conn,
            TransactionBehavior::Immediate,
        )?)
    }
}

fn table(set: ResultSet) -> &'static str {
    match set {
        ResultSet::Pending => "pending_results",
        ResultSet::Published => "published_results",
    }
}

fn decode<T: DeserializeOwned>(
    key: String,
    version: i64,
    fingerprint: Option<String>,
    json: &str,
) -> EngineResult<Versioned<T>> {
    Ok(Versioned {
        key,
        version,
        fingerprint,
        record: serde_json::from_str(json)?,
    })
}

fn query_rows<T: DeserializeOwned>(
    conn: &Connection,
    set: ResultSet,
    filter: &str,
    params: &[&dyn rusqlite::ToSql],
) -> EngineResult<Vec<Versioned<T>>> {
    let fingerprint_col = match set {
        ResultSet::Pending => "NULL",
        ResultSet::Published => "fingerprint",
    };
    let sql = format!(
        "SELECT key, version, {}, record_json FROM {} {} ORDER BY key",
        fingerprint_col,
        table(set),
        filter
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(params, |r| {
            Ok((
                r.get::<_, String>(0)?,
                r.get::<_, i64>(1)?,
                r.get::<_, Option<String>>(2)?,
                r.get::<_, String>(3)?,
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    rows.into_iter()
        .map(|(key, version, fp, json)| decode(key, version, fp, &json))
        .collect()
}

fn current_version(conn: &Connection, set: ResultSet, key: &str) -> EngineResult<Option<i64>> {
    let sql = format!("SELECT version FROM {} WHERE key = ?", table(set));
    Ok(conn
        .query_row(&sql, [key], |r| r.get::<_, i64>(0))
        .optional()?)
}

fn check_expect(conn: &Connection, set: ResultSet, key: &str, expect: Expect) -> EngineResult<()> {
    let current = current_version(conn, set, key)?;
    let matches = match (expect, current) {
        (Expect::Absent, None) => true,
        (Expect::Version(v), Some(c)) => v == c,
        _ => false,
    };
    if matches {
        Ok(())
    } else {
        debug!(
            target: "resultd::store",
            set = set.as_str(),
            %key,
            ?expect,
            ?current,
            "version mismatch"
        );
        Err(EngineError::Conflict {
            set: set.as_str(),
            key: key.to_string(),
        })
    }
}

fn next_version(expect: Expect) -> i64 {
    match expect {
        Expect::Absent => 1,
        Expect::Version(v) => v + 1,
    }
}

impl ResultStore for SqliteResultStore<'_> {
    fn list_pending(&self) -> EngineResult<Vec<Versioned<ResultRecord>>> {
        query_rows(self.conn, ResultSet::Pending, "", &[])
    }

    fn get_pending(&self, key: &str) -> EngineResult<Option<Versioned<ResultRecord>>> {
        Ok(query_rows(self.conn, ResultSet::Pending, "WHERE key = ?", &[&key])?
            .into_iter()
            .next())
    }

    fn pending_cohort(
        &self,
        grade: &str,
        section: &str,
    ) -> EngineResult<Vec<Versioned<ResultRecord>>> {
        query_rows(
            self.conn,
            ResultSet::Pending,
            "WHERE grade = ? AND section = ?",
            &[&grade, &section],
        )
    }

    fn list_published(&self) -> EngineResult<Vec<Versioned<PublishedRecord>>> {
        query_rows(self.conn, ResultSet::Published, "", &[])
    }

    fn get_published(&self, key: &str) -> EngineResult<Option<Versioned<PublishedRecord>>> {
        Ok(query_rows(self.conn, ResultSet::Published, "WHERE key = ?", &[&key])?
            .into_iter()
            .next())
    }

    fn published_cohort(
        &self,
        grade: &str,
        section: &str,
    ) -> EngineResult<Vec<Versioned<PublishedRecord>>> {
        query_rows(
            self.conn,
            ResultSet::Published,
            "WHERE grade = ? AND section = ?",
            &[&grade, &section],
        )
    }

    fn published_for_student(
        &self,
        student_id: &str,
    ) -> EngineResult<Vec<Versioned<PublishedRecord>>> {
        query_rows(
            self.conn,
            ResultSet::Published,
            "WHERE student_id = ?",
            &[&student_id],
        )
    }

    fn put_pending(&self, key: &str, record: &ResultRecord, expect: Expect) -> EngineResult<i64> {
        let tx = self.begin()?;
        check_expect(&tx, ResultSet::Pending, key, expect)?;
        let version = next_version(expect);
        tx.execute(
            "INSERT INTO pending_results(key, student_id, grade, section, version, record_json, updated_at)
             VALUES(?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(key) DO UPDATE SET
               student_id = excluded.student_id,
               grade = excluded.grade,
               section = excluded.section,
               version = excluded.version,
               record_json = excluded.record_json,
               updated_at = excluded.updated_at",
            (
                key,
                &record.student_id,
                &record.grade,
                &record.section,
                version,
                serde_json::to_string(record)?,
                Utc::now().to_rfc3339(),
            ),
        )?;
        tx.commit()?;
        Ok(version)
    }

    fn settle_pending(&self, key: &str, published: Expect, pending_version: i64) -> EngineResult<()> {
        let tx = self.begin()?;
        check_expect(&tx, ResultSet::Published, key, published)?;
        check_expect(&tx, ResultSet::Pending, key, Expect::Version(pending_version))?;
        tx.execute(
            "DELETE FROM pending_results WHERE key = ? AND version = ?",
            (key, pending_version),
        )?;
        tx.commit()?;
        Ok(())
    }

    fn publish(
        &self,
        key: &str,
        record: &PublishedRecord,
        fingerprint: &str,
        published: Expect,
        pending: Expect,
    ) -> EngineResult<i64> {
        let tx = self.begin()?;
        check_expect(&tx, ResultSet::Published, key, published)?;
        check_expect(&tx, ResultSet::Pending, key, pending)?;

        let version = next_version(published);
        tx.execute(
            "INSERT INTO published_results(key, student_id, grade, section, version, fingerprint, record_json, updated_at)
             VALUES(?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(key) DO UPDATE SET
               student_id = excluded.student_id,
               grade = excluded.grade,
               section = excluded.section,
               version = excluded.version,
               fingerprint = excluded.fingerprint,
               record_json = excluded.record_json,
               updated_at = excluded.updated_at",
            (
                key,
                &record.result.student_id,
                &record.result.grade,
                &record.result.section,
                version,
                fingerprint,
                serde_json::to_string(record)?,
                Utc::now().to_rfc3339(),
            ),
        )?;
        if let Expect::Version(v) = pending {
            tx.execute(
                "DELETE FROM pending_results WHERE key = ? AND version = ?",
                (key, v),
            )?;
        }
        tx.commit()?;
        Ok(version)
    }

    fn delete_published(&self, key: &str) -> EngineResult<Option<PublishedRecord>> {
        let tx = self.begin()?;
        let existing: Option<String> = tx
            .query_row(
                "SELECT record_json FROM published_results WHERE key = ?",
                [key],
                |r| r.get(0),
            )
            .optional()?;
        let Some(json) = existing else {
            return Ok(None);
        };
        tx.execute("DELETE FROM published_results WHERE key = ?", [key])?;
        tx.commit()?;
        Ok(Some(serde_json::from_str(&json)?))
    }

    fn set_rank(&self, set: ResultSet, key: &str, rank: usize, version: i64) -> EngineResult<i64> {
        let tx = self.begin()?;
        check_expect(&tx, set, key, Expect::Version(version))?;
        let sql = format!("SELECT record_json FROM {} WHERE key = ?", table(set));
        let json: String = tx.query_row(&sql, [key], |r| r.get(0))?;
        let mut value: serde_json::Value = serde_json::from_str(&json)?;
        value["rank"] = serde_json::Value::from(rank as u64);

        let next = version + 1;
        let sql = format!(
            "UPDATE {} SET record_json = ?, version = ?, updated_at = ? WHERE key = ?",
            table(set)
        );
        tx.execute(
            &sql,
            (
                serde_json::to_string(&value)?,
                next,
                Utc::now().to_rfc3339(),
                key,
            ),
        )?;
        tx.commit()?;
        Ok(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calc::{compute_record, RecordMeta};
    use crate::classify::Thresholds;
    use crate::db::open_memory_db;
    use crate::model::{ResultInput, ResultStatus, SubjectInput};

    fn record(student_id: &str, marks: f64) -> ResultRecord {
        let input = ResultInput {
            student_id: student_id.into(),
            student_name: format!("Student {student_id}"),
            grade: "9".into(),
            section: "A".into(),
            subjects: vec![SubjectInput {
                name: "Math".into(),
                marks: Some(marks),
                ..Default::default()
            }],
            status: ResultStatus::Submitted,
        };
        compute_record(
            &input,
            &[],
            &Thresholds::default(),
            RecordMeta {
                status: ResultStatus::Submitted,
                submitted_by: "t-1",
                submitted_at: "2026-01-01T00:00:00Z",
            },
        )
        .expect("compute")
    }

    fn published(r: ResultRecord) -> PublishedRecord {
        PublishedRecord {
            result: r,
            published_at: "2026-01-02T00:00:00Z".into(),
            approved_by: "admin-1".into(),
            approved_at: "2026-01-02T00:00:00Z".into(),
        }
    }

    #[test]
    fn put_pending_enforces_expected_version() {
        let conn = open_memory_db().expect("db");
        let store = SqliteResultStore::new(&conn);

        let v1 = store
            .put_pending("S1", &record("s1", 70.0), Expect::Absent)
            .expect("create");
        assert_eq!(v1, 1);

        let err = store
            .put_pending("S1", &record("s1", 71.0), Expect::Absent)
            .expect_err("duplicate create");
        assert_eq!(err.code(), "conflict");

        let v2 = store
            .put_pending("S1", &record("s1", 72.0), Expect::Version(1))
            .expect("update");
        assert_eq!(v2, 2);

        let err = store
            .put_pending("S1", &record("s1", 99.0), Expect::Version(1))
            .expect_err("stale update");
        assert_eq!(err.code(), "conflict");

        let stored = store.get_pending("S1").expect("get").expect("present");
        assert_eq!(stored.version, 2);
        assert_eq!(stored.record.average, 72.0);
    }

    #[test]
    fn publish_moves_pending_atomically() {
        let conn = open_memory_db().expect("db");
        let store = SqliteResultStore::new(&conn);
        let r = record("s1", 80.0);
        store.put_pending("S1", &r, Expect::Absent).expect("pending");

        // Stale pending expectation aborts both writes.
        let err = store
            .publish("S1", &published(r.clone()), "fp", Expect::Absent, Expect::Version(7))
            .expect_err("stale pending");
        assert_eq!(err.code(), "conflict");
        assert!(store.get_published("S1").expect("get").is_none());
        assert!(store.get_pending("S1").expect("get").is_some());

        store
            .publish("S1", &published(r), "fp", Expect::Absent, Expect::Version(1))
            .expect("publish");
        assert!(store.get_pending("S1").expect("get").is_none());
        let p = store.get_published("S1").expect("get").expect("present");
        assert_eq!(p.fingerprint.as_deref(), Some("fp"));
        assert_eq!(p.record.approved_by, "admin-1");
    }

    #[test]
    fn settle_pending_requires_both_versions_to_match() {
        let conn = open_memory_db().expect("db");
        let store = SqliteResultStore::new(&conn);
        let r = record("s1", 80.0);
        store
            .publish("S1", &published(r.clone()), "fp", Expect::Absent, Expect::Absent)
            .expect("publish");
        store.put_pending("S1", &r, Expect::Absent).expect("pending");

        // Published entry moved on since it was read: pending stays put.
        store.set_rank(ResultSet::Published, "S1", 2, 1).expect("rank");
        let err = store
            .settle_pending("S1", Expect::Version(1), 1)
            .expect_err("stale published");
        assert_eq!(err.code(), "conflict");
        assert!(store.get_pending("S1").expect("get").is_some());

        let err = store
            .settle_pending("S1", Expect::Version(2), 5)
            .expect_err("stale pending");
        assert_eq!(err.code(), "conflict");

        store
            .settle_pending("S1", Expect::Version(2), 1)
            .expect("settle");
        assert!(store.get_pending("S1").expect("get").is_none());
        let p = store.get_published("S1").expect("get").expect("present");
        assert_eq!(p.version, 2);
        assert_eq!(p.fingerprint.as_deref(), Some("fp"));
    }

    #[test]
    fn delete_published_is_noop_for_missing_keys() {
        let conn = open_memory_db().expect("db");
        let store = SqliteResultStore::new(&conn);
        assert!(store.delete_published("nope").expect("delete").is_none());

        store
            .publish("S1", &published(record("s1", 60.0)), "fp", Expect::Absent, Expect::Absent)
            .expect("publish");
        let removed = store.delete_published("S1").expect("delete");
        assert_eq!(removed.map(|r| r.result.student_id), Some("s1".to_string()));
        assert!(store.list_published().expect("list").is_empty());
    }

    #[test]
    fn set_rank_bumps_version_and_keeps_fingerprint() {
        let conn = open_memory_db().expect("db");
        let store = SqliteResultStore::new(&conn);
        store
            .publish("S1", &published(record("s1", 60.0)), "fp", Expect::Absent, Expect::Absent)
            .expect("publish");

        let v = store
            .set_rank(ResultSet::Published, "S1", 3, 1)
            .expect("rank");
        assert_eq!(v, 2);
        let p = store.get_published("S1").expect("get").expect("present");
        assert_eq!(p.record.result.rank, Some(3));
        assert_eq!(p.fingerprint.as_deref(), Some("fp"));

        let err = store
            .set_rank(ResultSet::Published, "S1", 1, 1)
            .expect_err("stale");
        assert_eq!(err.code(), "conflict");
    }

    #[test]
    fn cohort_and_student_queries_filter_rows() {
        let conn = open_memory_db().expect("db");
        let store = SqliteResultStore::new(&conn);
        let mut other = record("s2", 50.0);
        other.section = "B".into();
        store
            .publish("S1", &published(record("s1", 60.0)), "a", Expect::Absent, Expect::Absent)
            .expect("publish");
        store
            .publish("S2", &published(other), "b", Expect::Absent, Expect::Absent)
            .expect("publish");

        assert_eq!(store.published_cohort("9", "A").expect("cohort").len(), 1);
        let mine = store.published_for_student("s2").expect("student");
        assert_eq!(mine.len(), 1);
        assert_eq!(mine[0].key, "S2");
    }
}
