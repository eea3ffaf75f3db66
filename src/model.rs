use crate::classify::{Conduct, LetterGrade, PassStatus, Promotion};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Teacher,
    Student,
}

impl Role {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "admin" => Some(Self::Admin),
            "teacher" => Some(Self::Teacher),
            "student" => Some(Self::Student),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Admin => "admin",
            Self::Teacher => "teacher",
            Self::Student => "student",
        }
    }

    pub fn is_staff(self) -> bool {
        matches!(self, Self::Admin | Self::Teacher)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Caller identity as resolved by the auth collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub role: Role,
    pub id: String,
}

impl Actor {
    pub fn new(role: Role, id: impl Into<String>) -> Self {
        Self {
            role,
            id: id.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssessmentType {
    pub id: String,
    pub label: String,
    pub weight: f64,
    pub max_marks: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResultStatus {
    Draft,
    #[default]
    Submitted,
}

impl ResultStatus {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "draft" => Some(Self::Draft),
            "submitted" => Some(Self::Submitted),
            _ => None,
        }
    }
}

/// Raw subject marks as submitted by staff. Non-numeric entries are dropped
/// before they reach this type.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubjectInput {
    pub name: String,
    #[serde(default)]
    pub assessments: BTreeMap<String, f64>,
    #[serde(default)]
    pub marks: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultInput {
    pub student_id: String,
    pub student_name: String,
    pub grade: String,
    pub section: String,
    pub subjects: Vec<SubjectInput>,
    #[serde(default)]
    pub status: ResultStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubjectResult {
    pub name: String,
    pub assessments: BTreeMap<String, f64>,
    pub marks: Option<f64>,
    pub status: Option<PassStatus>,
    pub grade: Option<LetterGrade>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultRecord {
    pub student_id: String,
    pub student_name: String,
    pub grade: String,
    pub section: String,
    pub subjects: Vec<SubjectResult>,
    pub total: f64,
    pub average: f64,
    pub overall_grade: LetterGrade,
    pub pass_status: PassStatus,
    pub conduct: Conduct,
    pub promoted_or_detained: Promotion,
    pub rank: Option<usize>,
    pub status: ResultStatus,
    pub submitted_by: String,
    pub submitted_at: String,
}

impl ResultRecord {
    /// Rebuilds the submission shape so a stored record can be recomputed.
    /// Derived subject marks ride along as the flat fallback; a usable
    /// assessment map still takes precedence on recompute.
    pub fn to_input(&self) -> ResultInput {
        ResultInput {
            student_id: self.student_id.clone(),
            student_name: self.student_name.clone(),
            grade: self.grade.clone(),
            section: self.section.clone(),
            subjects: self
                .subjects
                .iter()
                .map(|s| SubjectInput {
                    name: s.name.clone(),
                    assessments: s.assessments.clone(),
                    marks: s.marks,
                })
                .collect(),
            status: self.status,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublishedRecord {
    #[serde(flatten)]
    pub result: ResultRecord,
    pub published_at: String,
    pub approved_by: String,
    pub approved_at: String,
}

/// The two keyed containers a result can live in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ResultSet {
    Pending,
    Published,
}

impl ResultSet {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "published" => Some(Self::Published),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Published => "published",
        }
    }
}
