use serde_json::{json, Value};
use thiserror::Error;
use tracing::warn;

pub type EngineResult<T> = Result<T, EngineError>;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("mark {mark} for '{assessment_id}' in {subject} is outside 0..={max_marks}")]
    InvalidMark {
        subject: String,
        assessment_id: String,
        mark: f64,
        max_marks: f64,
    },

    #[error("unknown assessment type '{assessment_id}' in {subject}")]
    UnknownAssessmentType {
        subject: String,
        assessment_id: String,
    },

    #[error("{role} may not {action}")]
    Forbidden { action: String, role: String },

    #[error("no {set} result for key '{key}'")]
    NotFound { set: &'static str, key: String },

    #[error("concurrent write to {set} result '{key}'")]
    Conflict { set: &'static str, key: String },

    #[error("{0}")]
    BadInput(String),

    #[error("store failure: {0}")]
    Store(#[from] anyhow::Error),
}

impl EngineError {
    pub fn forbidden(action: impl Into<String>, role: impl Into<String>) -> Self {
        let action = action.into();
        let role = role.into();
        warn!(target: "resultd::auth", %action, %role, "forbidden");
        EngineError::Forbidden { action, role }
    }

    pub fn code(&self) -> &'static str {
        match self {
            EngineError::InvalidMark { .. } => "invalid_mark",
            EngineError::UnknownAssessmentType { .. } => "unknown_assessment_type",
            EngineError::Forbidden { .. } => "forbidden",
            EngineError::NotFound { .. } => "not_found",
            EngineError::Conflict { .. } => "conflict",
            EngineError::BadInput(_) => "bad_params",
            EngineError::Store(_) => "store_failed",
        }
    }

    pub fn details(&self) -> Option<Value> {
        match self {
            EngineError::InvalidMark {
                subject,
                assessment_id,
                mark,
                max_marks,
            } => Some(json!({
                "subject": subject,
                "assessmentId": assessment_id,
                "mark": mark,
                "maxMarks": max_marks,
            })),
            EngineError::UnknownAssessmentType {
                subject,
                assessment_id,
            } => Some(json!({ "subject": subject, "assessmentId": assessment_id })),
            EngineError::NotFound { set, key } | EngineError::Conflict { set, key } => {
                Some(json!({ "set": set, "key": key }))
            }
            _ => None,
        }
    }

    /// Per-item error shape used inside bulk responses.
    pub fn to_json(&self) -> Value {
        let mut out = json!({
            "code": self.code(),
            "message": self.to_string(),
        });
        if let Some(d) = self.details() {
            out["details"] = d;
        }
        out
    }
}

impl From<rusqlite::Error> for EngineError {
    fn from(e: rusqlite::Error) -> Self {
        EngineError::Store(e.into())
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(e: serde_json::Error) -> Self {
        EngineError::Store(e.into())
    }
}
