//! Typed boundary for the portal settings document.
//!
//! Settings arrive loosely typed (string booleans, string weights). They are
//! normalized once here and persisted in normalized form, so nothing
//! downstream re-coerces.

use crate::calc::loose_number;
use crate::classify::Thresholds;
use crate::db;
use crate::model::AssessmentType;
use crate::rank::RankBy;
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::HashSet;
use tracing::warn;

pub const SETTINGS_KEY: &str = "portal.settings";

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    pub assessment_types: Vec<AssessmentType>,
    pub principal_name: String,
    pub homeroom_name: String,
    pub allow_library_download: bool,
    pub allow_teacher_edit_after_submission: bool,
    pub report_card_download: bool,
    pub certificate_download: bool,
    pub maintenance_mode: bool,
    pub rank_by: RankBy,
    pub thresholds: Thresholds,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            assessment_types: default_assessment_types(),
            principal_name: String::new(),
            homeroom_name: String::new(),
            allow_library_download: false,
            allow_teacher_edit_after_submission: false,
            report_card_download: true,
            certificate_download: false,
            maintenance_mode: false,
            rank_by: RankBy::Average,
            thresholds: Thresholds::default(),
        }
    }
}

/// Used whenever the configured list is missing or ends up empty.
pub fn default_assessment_types() -> Vec<AssessmentType> {
    [
        ("quiz", "Quiz", 10.0, 10.0),
        ("assignment", "Assignment", 10.0, 10.0),
        ("midterm", "Midterm", 30.0, 30.0),
        ("final", "Final Exam", 50.0, 50.0),
    ]
    .into_iter()
    .map(|(id, label, weight, max_marks)| AssessmentType {
        id: id.to_string(),
        label: label.to_string(),
        weight,
        max_marks,
    })
    .collect()
}

/// Only JSON `true` or the literal string `"true"` are true.
pub fn coerce_bool(v: &Value) -> bool {
    match v {
        Value::Bool(b) => *b,
        Value::String(s) => s == "true",
        _ => false,
    }
}

fn parse_bool_strict(v: &Value, key: &str) -> Result<bool, String> {
    match v {
        Value::Bool(_) | Value::String(_) => Ok(coerce_bool(v)),
        _ => Err(format!("{} must be a boolean or \"true\"/\"false\"", key)),
    }
}

fn parse_string_max(v: &Value, key: &str, max: usize) -> Result<String, String> {
    let Some(s) = v.as_str() else {
        return Err(format!("{} must be a string", key));
    };
    let t = s.trim();
    if t.chars().count() > max {
        return Err(format!("{} must be at most {} characters", key, max));
    }
    Ok(t.to_string())
}

fn parse_assessment_type(v: &Value, index: usize) -> Result<AssessmentType, String> {
    let Some(obj) = v.as_object() else {
        return Err(format!("assessmentTypes[{}] must be an object", index));
    };
    let id = match obj.get("id") {
        Some(Value::String(s)) if !s.trim().is_empty() => s.trim().to_string(),
        Some(Value::Number(n)) => n.to_string(),
        _ => return Err(format!("assessmentTypes[{}].id is required", index)),
    };
    let label = obj
        .get("label")
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| id.clone());
    let Some(weight) = obj.get("weight").and_then(loose_number) else {
        return Err(format!("assessmentTypes[{}].weight must be numeric", index));
    };
    if !(0.0..=100.0).contains(&weight) {
        return Err(format!("assessmentTypes[{}].weight must be within 0..=100", index));
    }
    let Some(max_marks) = obj.get("maxMarks").and_then(loose_number) else {
        return Err(format!("assessmentTypes[{}].maxMarks must be numeric", index));
    };
    if max_marks <= 0.0 {
        return Err(format!("assessmentTypes[{}].maxMarks must be > 0", index));
    }
    Ok(AssessmentType {
        id,
        label,
        weight,
        max_marks,
    })
}

/// Parses the list, dropping duplicate ids after the first. In lenient mode
/// malformed entries are skipped; in strict mode they fail the whole list.
fn parse_assessment_types(v: &Value, strict: bool) -> Result<Vec<AssessmentType>, String> {
    let Some(arr) = v.as_array() else {
        if strict && !v.is_null() {
            return Err("assessmentTypes must be an array".into());
        }
        return Ok(default_assessment_types());
    };

    let mut seen: HashSet<String> = HashSet::new();
    let mut out: Vec<AssessmentType> = Vec::with_capacity(arr.len());
    for (i, raw) in arr.iter().enumerate() {
        let t = match parse_assessment_type(raw, i) {
            Ok(t) => t,
            Err(msg) if strict => return Err(msg),
            Err(msg) => {
                warn!(target: "resultd::settings", %msg, "skipping malformed assessment type");
                continue;
            }
        };
        if !seen.insert(t.id.clone()) {
            warn!(target: "resultd::settings", id = %t.id, "duplicate assessment type id dropped");
            continue;
        }
        out.push(t);
    }

    if out.is_empty() {
        return Ok(default_assessment_types());
    }
    Ok(out)
}

fn apply_field(settings: &mut Settings, key: &str, v: &Value, strict: bool) -> Result<(), String> {
    match key {
        "assessmentTypes" => {
            settings.assessment_types = parse_assessment_types(v, strict)?;
        }
        "principalName" => settings.principal_name = parse_string_max(v, key, 120)?,
        "homeroomName" => settings.homeroom_name = parse_string_max(v, key, 120)?,
        "allowLibraryDownload" => settings.allow_library_download = parse_bool_strict(v, key)?,
        "allowTeacherEditAfterSubmission" => {
            settings.allow_teacher_edit_after_submission = parse_bool_strict(v, key)?
        }
        "reportCardDownload" => settings.report_card_download = parse_bool_strict(v, key)?,
        "certificateDownload" => settings.certificate_download = parse_bool_strict(v, key)?,
        "maintenanceMode" => settings.maintenance_mode = parse_bool_strict(v, key)?,
        "rankBy" => {
            let s = parse_string_max(v, key, 16)?;
            settings.rank_by =
                RankBy::parse(&s).ok_or_else(|| "rankBy must be one of: average, total".to_string())?;
        }
        "thresholds" => {
            // Missing bands keep their current values.
            let mut merged = serde_json::to_value(&settings.thresholds).map_err(|e| e.to_string())?;
            let Some(patch) = v.as_object() else {
                return Err("thresholds must be an object".into());
            };
            for (k, tv) in patch {
                if merged.get(k.as_str()).is_none() {
                    return Err(format!("unknown thresholds field: {}", k));
                }
                let Some(n) = loose_number(tv) else {
                    return Err(format!("thresholds.{} must be numeric", k));
                };
                merged[k.as_str()] = Value::from(n);
            }
            let next: Thresholds = serde_json::from_value(merged).map_err(|e| e.to_string())?;
            next.validate()?;
            settings.thresholds = next;
        }
        _ => return Err(format!("unknown settings field: {}", key)),
    }
    Ok(())
}

/// Lenient ingestion: malformed or unknown fields fall back to defaults.
pub fn parse_settings(raw: &Value) -> Settings {
    let mut settings = Settings::default();
    let Some(obj) = raw.as_object() else {
        return settings;
    };
    for (k, v) in obj {
        if let Err(msg) = apply_field(&mut settings, k, v, false) {
            warn!(target: "resultd::settings", field = %k, %msg, "ignoring settings field");
        }
    }
    settings
}

/// Strict patch used by admin updates. Either every field applies or none.
pub fn merge_patch(current: &Settings, patch: &Map<String, Value>) -> Result<Settings, String> {
    let mut next = current.clone();
    for (k, v) in patch {
        apply_field(&mut next, k, v, true)?;
    }
    Ok(next)
}

pub fn load_settings(conn: &rusqlite::Connection) -> anyhow::Result<Settings> {
    Ok(match db::settings_get_json(conn, SETTINGS_KEY)? {
        Some(raw) => parse_settings(&raw),
        None => Settings::default(),
    })
}

pub fn save_settings(conn: &rusqlite::Connection, settings: &Settings) -> anyhow::Result<()> {
    db::settings_set_json(conn, SETTINGS_KEY, &serde_json::to_value(settings)?)
}
