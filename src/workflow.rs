//! Pending → published lifecycle.
//!
//! Staff submit pending results; only admins publish or delete published
//! results. Every write goes through the store's compare-and-swap, and each
//! write that can change cohort ordering is followed by a full re-rank of the
//! affected cohorts.

use crate::audit::{AuditAction, AuditCategory, AuditEvent, AuditSink};
use crate::calc::{self, RecordMeta};
use crate::error::{EngineError, EngineResult};
use crate::model::{
    Actor, PublishedRecord, ResultInput, ResultRecord, ResultSet, ResultStatus, Role,
    SubjectResult,
};
use crate::rank::{self, RankBy, RankOrder};
use crate::settings::Settings;
use crate::store::{Expect, ResultStore, Versioned};
use chrono::Utc;
use serde::Serialize;
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use std::collections::{BTreeSet, HashMap, HashSet};
use tracing::{info, warn};

type CohortKey = (String, String);

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubjectRejection {
    pub subject: String,
    pub kept_previous: bool,
    pub error: Value,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitOutcome {
    pub key: String,
    pub version: i64,
    pub record: ResultRecord,
    pub rejected: Vec<SubjectRejection>,
    pub warnings: Vec<Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PublishStatus {
    Published,
    Unchanged,
    Failed,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PublishOutcome {
    pub key: String,
    pub status: PublishStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub record: Option<PublishedRecord>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub rejected: Vec<SubjectRejection>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<Value>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteOutcome {
    pub key: String,
    pub deleted: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<Value>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PreviewOutcome {
    pub record: ResultRecord,
    /// Where the record would land in its published cohort.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub projected_rank: Option<usize>,
    pub rejected: Vec<SubjectRejection>,
    pub warnings: Vec<Value>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CohortEntry {
    pub key: String,
    pub student_id: String,
    pub student_name: String,
    pub total: f64,
    pub average: f64,
    pub rank: usize,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyedRecord<T> {
    pub key: String,
    pub version: i64,
    pub record: T,
}

impl<T> From<Versioned<T>> for KeyedRecord<T> {
    fn from(v: Versioned<T>) -> Self {
        Self {
            key: v.key,
            version: v.version,
            record: v.record,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase", tag = "scope")]
pub enum ResultsView {
    Staff {
        pending: Vec<KeyedRecord<ResultRecord>>,
        published: Vec<KeyedRecord<PublishedRecord>>,
    },
    Student {
        published: Vec<PublishedRecord>,
    },
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyView {
    pub key: String,
    pub pending: Option<ResultRecord>,
    pub published: Option<PublishedRecord>,
}

fn now() -> String {
    Utc::now().to_rfc3339()
}

/// Content hash of a computed record. Rank and submission metadata are
/// excluded so republishing unchanged marks is recognised as a no-op.
pub fn fingerprint(record: &ResultRecord) -> EngineResult<String> {
    let mut content = serde_json::to_value(record)?;
    if let Some(obj) = content.as_object_mut() {
        for k in ["rank", "submittedBy", "submittedAt"] {
            obj.remove(k);
        }
    }
    let digest = Sha256::digest(serde_json::to_vec(&content)?);
    Ok(format!("{:x}", digest))
}

fn cohort_of(record: &ResultRecord) -> CohortKey {
    (record.grade.clone(), record.section.clone())
}

pub struct ResultEngine<'a> {
    store: &'a dyn ResultStore,
    audit: &'a dyn AuditSink,
    settings: &'a Settings,
}

impl<'a> ResultEngine<'a> {
    pub fn new(store: &'a dyn ResultStore, audit: &'a dyn AuditSink, settings: &'a Settings) -> Self {
        Self {
            store,
            audit,
            settings,
        }
    }

    fn require_staff(&self, actor: &Actor, action: &str) -> EngineResult<()> {
        if actor.role.is_staff() {
            Ok(())
        } else {
            Err(EngineError::forbidden(action, actor.role.as_str()))
        }
    }

    fn require_admin(&self, actor: &Actor, action: &str) -> EngineResult<()> {
        if actor.role == Role::Admin {
            Ok(())
        } else {
            Err(EngineError::forbidden(action, actor.role.as_str()))
        }
    }

    /// Normalizes every subject, keeping the previous version of a subject
    /// whose update failed. Fails only when every subject failed.
    fn compute_lenient(
        &self,
        input: &ResultInput,
        previous: Option<&ResultRecord>,
        meta: RecordMeta<'_>,
    ) -> EngineResult<PreviewOutcome> {
        let outcomes = calc::compute_subjects(
            &input.subjects,
            &self.settings.assessment_types,
            &self.settings.thresholds,
        );

        let mut subjects: Vec<SubjectResult> = Vec::with_capacity(outcomes.len());
        let mut rejected: Vec<SubjectRejection> = Vec::new();
        let mut warnings: Vec<Value> = Vec::new();
        let mut first_error: Option<EngineError> = None;

        for outcome in outcomes {
            warnings.extend(outcome.warnings.iter().map(|w| w.to_json()));
            match outcome.result {
                Ok(s) => subjects.push(s),
                Err(e) => {
                    let prev = previous
                        .and_then(|p| p.subjects.iter().find(|s| s.name == outcome.name))
                        .cloned();
                    rejected.push(SubjectRejection {
                        subject: outcome.name.clone(),
                        kept_previous: prev.is_some(),
                        error: e.to_json(),
                    });
                    if let Some(p) = prev {
                        subjects.push(p);
                    }
                    if first_error.is_none() {
                        first_error = Some(e);
                    }
                }
            }
        }

        if !input.subjects.is_empty() && rejected.len() == input.subjects.len() {
            if let Some(e) = first_error {
                return Err(e);
            }
        }

        let record = calc::assemble_record(input, subjects, &self.settings.thresholds, meta);
        Ok(PreviewOutcome {
            record,
            projected_rank: None,
            rejected,
            warnings,
        })
    }

    pub fn preview(&self, actor: &Actor, input: &ResultInput) -> EngineResult<PreviewOutcome> {
        self.require_staff(actor, "preview results")?;
        let at = now();
        let mut outcome = self.compute_lenient(
            input,
            None,
            RecordMeta {
                status: input.status,
                submitted_by: &actor.id,
                submitted_at: &at,
            },
        )?;

        // The student's own published entry is replaced, not competed with.
        let by = self.settings.rank_by;
        let cohort: Vec<f64> = self
            .store
            .published_cohort(&input.grade, &input.section)?
            .iter()
            .filter(|v| v.record.result.student_id != input.student_id)
            .map(|v| by.value_of(&v.record.result))
            .collect();
        outcome.projected_rank = Some(rank::rank_eq(
            by.value_of(&outcome.record),
            &cohort,
            RankOrder::Descending,
        ));
        Ok(outcome)
    }

    pub fn submit(&self, actor: &Actor, key: &str, input: &ResultInput) -> EngineResult<SubmitOutcome> {
        self.require_staff(actor, "submit results")?;
        if key.trim().is_empty() {
            return Err(EngineError::BadInput("key must not be empty".into()));
        }

        let existing = self.store.get_pending(key)?;
        if let Some(prev) = &existing {
            if prev.record.status == ResultStatus::Submitted
                && actor.role == Role::Teacher
                && !self.settings.allow_teacher_edit_after_submission
            {
                return Err(EngineError::forbidden(
                    "edit a submitted result",
                    actor.role.as_str(),
                ));
            }
        }

        let at = now();
        let computed = self.compute_lenient(
            input,
            existing.as_ref().map(|v| &v.record),
            RecordMeta {
                status: input.status,
                submitted_by: &actor.id,
                submitted_at: &at,
            },
        )?;

        let version = self
            .store
            .put_pending(key, &computed.record, Expect::of(existing.as_ref()))?;

        info!(
            target: "resultd::workflow",
            %key,
            actor = %actor.id,
            version,
            overall_grade = computed.record.overall_grade.as_str(),
            rejected = computed.rejected.len(),
            "pending result stored"
        );
        self.audit.record(AuditEvent {
            actor_id: actor.id.clone(),
            action: AuditAction::Submit,
            category: AuditCategory::Results,
            details: json!({
                "key": key,
                "studentId": computed.record.student_id,
                "status": computed.record.status,
                "overallGrade": computed.record.overall_grade.as_str(),
                "conduct": computed.record.conduct.as_str(),
                "rejectedSubjects": computed.rejected.len(),
            }),
        });

        let mut cohorts: BTreeSet<CohortKey> = BTreeSet::new();
        cohorts.insert(cohort_of(&computed.record));
        if let Some(prev) = &existing {
            cohorts.insert(cohort_of(&prev.record));
        }
        for (grade, section) in &cohorts {
            self.rerank(ResultSet::Pending, grade, section);
        }

        let stored = self.store.get_pending(key)?;
        let (version, record) = match stored {
            Some(v) => (v.version, v.record),
            None => (version, computed.record),
        };
        Ok(SubmitOutcome {
            key: key.to_string(),
            version,
            record,
            rejected: computed.rejected,
            warnings: computed.warnings,
        })
    }

    fn publish_one(
        &self,
        actor: &Actor,
        key: &str,
        inline: Option<&ResultInput>,
        touched: &mut BTreeSet<(ResultSet, String, String)>,
    ) -> EngineResult<(PublishStatus, PublishedRecord, Vec<SubjectRejection>)> {
        let pending = self.store.get_pending(key)?;
        let at = now();
        let (input, status, submitted_by, submitted_at) = match (&pending, inline) {
            (Some(p), _) => (
                p.record.to_input(),
                p.record.status,
                p.record.submitted_by.clone(),
                p.record.submitted_at.clone(),
            ),
            (None, Some(i)) => (i.clone(), i.status, actor.id.clone(), at.clone()),
            (None, None) => {
                return Err(EngineError::NotFound {
                    set: ResultSet::Pending.as_str(),
                    key: key.to_string(),
                })
            }
        };

        // Subjects that fail are left out; the key fails only if all do.
        let computed = self.compute_lenient(
            &input,
            None,
            RecordMeta {
                status,
                submitted_by: &submitted_by,
                submitted_at: &submitted_at,
            },
        )?;
        let rejected = computed.rejected;
        let mut record = computed.record;
        let fp = fingerprint(&record)?;
        let existing = self.store.get_published(key)?;

        if let Some(p) = &pending {
            touched.insert((ResultSet::Pending, p.record.grade.clone(), p.record.section.clone()));
        }

        if let Some(current) = &existing {
            if current.fingerprint.as_deref() == Some(fp.as_str()) {
                if let Some(p) = &pending {
                    self.store
                        .settle_pending(key, Expect::Version(current.version), p.version)?;
                }
                return Ok((PublishStatus::Unchanged, current.record.clone(), rejected));
            }
            touched.insert((
                ResultSet::Published,
                current.record.result.grade.clone(),
                current.record.result.section.clone(),
            ));
            record.rank = current.record.result.rank;
        }

        touched.insert((ResultSet::Published, record.grade.clone(), record.section.clone()));
        let published = PublishedRecord {
            result: record,
            published_at: at.clone(),
            approved_by: actor.id.clone(),
            approved_at: at,
        };
        self.store.publish(
            key,
            &published,
            &fp,
            Expect::of(existing.as_ref()),
            Expect::of(pending.as_ref()),
        )?;
        Ok((PublishStatus::Published, published, rejected))
    }

    /// Admin only. Each key settles independently; the call fails as a whole
    /// only when the actor may not publish at all.
    pub fn publish(
        &self,
        actor: &Actor,
        keys: &[String],
        inline: &HashMap<String, ResultInput>,
    ) -> EngineResult<Vec<PublishOutcome>> {
        self.require_admin(actor, "publish results")?;

        let mut seen: HashSet<&str> = HashSet::new();
        let mut touched: BTreeSet<(ResultSet, String, String)> = BTreeSet::new();
        let mut outcomes: Vec<PublishOutcome> = Vec::with_capacity(keys.len());

        for key in keys {
            if !seen.insert(key.as_str()) {
                continue;
            }
            let outcome = match self.publish_one(actor, key, inline.get(key), &mut touched) {
                Ok((status, record, rejected)) => PublishOutcome {
                    key: key.clone(),
                    status,
                    record: Some(record),
                    rejected,
                    error: None,
                },
                Err(e) => {
                    warn!(target: "resultd::workflow", %key, error = %e, "publish failed");
                    PublishOutcome {
                        key: key.clone(),
                        status: PublishStatus::Failed,
                        record: None,
                        rejected: Vec::new(),
                        error: Some(e.to_json()),
                    }
                }
            };
            outcomes.push(outcome);
        }

        for (set, grade, section) in &touched {
            self.rerank(*set, grade, section);
        }
        // Report ranks as stored after the re-rank.
        for o in outcomes.iter_mut() {
            if o.status == PublishStatus::Failed {
                continue;
            }
            if let Ok(Some(fresh)) = self.store.get_published(&o.key) {
                o.record = Some(fresh.record);
            }
        }

        info!(
            target: "resultd::workflow",
            actor = %actor.id,
            requested = keys.len(),
            published = outcomes.iter().filter(|o| o.status == PublishStatus::Published).count(),
            failed = outcomes.iter().filter(|o| o.status == PublishStatus::Failed).count(),
            "publish finished"
        );
        self.audit.record(AuditEvent {
            actor_id: actor.id.clone(),
            action: AuditAction::Publish,
            category: AuditCategory::Results,
            details: json!({
                "keys": outcomes
                    .iter()
                    .map(|o| json!({ "key": o.key, "status": o.status }))
                    .collect::<Vec<_>>(),
            }),
        });
        Ok(outcomes)
    }

    pub fn delete_published(&self, actor: &Actor, keys: &[String]) -> EngineResult<Vec<DeleteOutcome>> {
        self.require_admin(actor, "delete published results")?;

        let mut touched: BTreeSet<CohortKey> = BTreeSet::new();
        let mut outcomes: Vec<DeleteOutcome> = Vec::with_capacity(keys.len());
        for key in keys {
            match self.store.delete_published(key) {
                Ok(Some(removed)) => {
                    touched.insert(cohort_of(&removed.result));
                    outcomes.push(DeleteOutcome {
                        key: key.clone(),
                        deleted: true,
                        error: None,
                    });
                }
                Ok(None) => outcomes.push(DeleteOutcome {
                    key: key.clone(),
                    deleted: false,
                    error: None,
                }),
                Err(e) => {
                    warn!(target: "resultd::workflow", %key, error = %e, "delete failed");
                    outcomes.push(DeleteOutcome {
                        key: key.clone(),
                        deleted: false,
                        error: Some(e.to_json()),
                    });
                }
            }
        }

        for (grade, section) in &touched {
            self.rerank(ResultSet::Published, grade, section);
        }

        self.audit.record(AuditEvent {
            actor_id: actor.id.clone(),
            action: AuditAction::DeletePublished,
            category: AuditCategory::Results,
            details: json!({
                "keys": keys,
                "deleted": outcomes.iter().filter(|o| o.deleted).count(),
            }),
        });
        Ok(outcomes)
    }

    /// Recomputes and stores ranks for a whole cohort. Not transactional with
    /// the triggering write; a rank write that loses a race is left to the
    /// competing writer's own re-rank.
    pub fn rerank(&self, set: ResultSet, grade: &str, section: &str) {
        let members: Vec<(String, i64, ResultRecord)> = match set {
            ResultSet::Pending => match self.store.pending_cohort(grade, section) {
                Ok(rows) => rows.into_iter().map(|v| (v.key, v.version, v.record)).collect(),
                Err(e) => {
                    warn!(target: "resultd::rank", error = %e, %grade, %section, "cohort read failed");
                    return;
                }
            },
            ResultSet::Published => match self.store.published_cohort(grade, section) {
                Ok(rows) => rows
                    .into_iter()
                    .map(|v| (v.key, v.version, v.record.result))
                    .collect(),
                Err(e) => {
                    warn!(target: "resultd::rank", error = %e, %grade, %section, "cohort read failed");
                    return;
                }
            },
        };

        let ranks = rank::rank_cohort(
            members.iter().map(|m| &m.2),
            self.settings.rank_by,
            RankOrder::Descending,
        );
        for ((key, version, record), new_rank) in members.iter().zip(ranks) {
            if record.rank == Some(new_rank) {
                continue;
            }
            if let Err(e) = self.store.set_rank(set, key, new_rank, *version) {
                warn!(
                    target: "resultd::rank",
                    set = set.as_str(),
                    %key,
                    error = %e,
                    "rank write skipped"
                );
            }
        }
    }

    /// Fresh ranks for a cohort, computed on read.
    pub fn cohort(
        &self,
        actor: &Actor,
        set: ResultSet,
        grade: &str,
        section: &str,
        by: Option<RankBy>,
        order: RankOrder,
    ) -> EngineResult<Vec<CohortEntry>> {
        self.require_staff(actor, "view cohort rankings")?;
        let by = by.unwrap_or(self.settings.rank_by);
        let rows: Vec<(String, ResultRecord)> = match set {
            ResultSet::Pending => self
                .store
                .pending_cohort(grade, section)?
                .into_iter()
                .map(|v| (v.key, v.record))
                .collect(),
            ResultSet::Published => self
                .store
                .published_cohort(grade, section)?
                .into_iter()
                .map(|v| (v.key, v.record.result))
                .collect(),
        };

        let ranks = rank::rank_cohort(rows.iter().map(|(_, r)| r), by, order);
        let mut entries: Vec<CohortEntry> = rows
            .into_iter()
            .zip(ranks)
            .map(|((key, r), rank)| CohortEntry {
                key,
                student_id: r.student_id,
                student_name: r.student_name,
                total: r.total,
                average: r.average,
                rank,
            })
            .collect();
        entries.sort_by(|a, b| a.rank.cmp(&b.rank).then_with(|| a.key.cmp(&b.key)));
        Ok(entries)
    }

    pub fn view(&self, actor: &Actor) -> EngineResult<ResultsView> {
        match actor.role {
            Role::Admin | Role::Teacher => Ok(ResultsView::Staff {
                pending: self
                    .store
                    .list_pending()?
                    .into_iter()
                    .map(KeyedRecord::from)
                    .collect(),
                published: self
                    .store
                    .list_published()?
                    .into_iter()
                    .map(KeyedRecord::from)
                    .collect(),
            }),
            Role::Student => Ok(ResultsView::Student {
                published: self
                    .store
                    .published_for_student(&actor.id)?
                    .into_iter()
                    .map(|v| v.record)
                    .collect(),
            }),
        }
    }

    /// Students only see their own published entry; anything else reads as
    /// not found.
    pub fn get(&self, actor: &Actor, key: &str) -> EngineResult<KeyView> {
        match actor.role {
            Role::Admin | Role::Teacher => Ok(KeyView {
                key: key.to_string(),
                pending: self.store.get_pending(key)?.map(|v| v.record),
                published: self.store.get_published(key)?.map(|v| v.record),
            }),
            Role::Student => {
                let published = self
                    .store
                    .get_published(key)?
                    .map(|v| v.record)
                    .filter(|r| r.result.student_id == actor.id);
                if published.is_none() {
                    return Err(EngineError::NotFound {
                        set: ResultSet::Published.as_str(),
                        key: key.to_string(),
                    });
                }
                Ok(KeyView {
                    key: key.to_string(),
                    pending: None,
                    published,
                })
            }
        }
    }
}
