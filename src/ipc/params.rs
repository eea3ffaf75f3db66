use crate::calc::loose_number;
use crate::error::{EngineError, EngineResult};
use crate::model::{Actor, ResultInput, ResultStatus, Role, SubjectInput};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};

fn bad(msg: impl Into<String>) -> EngineError {
    EngineError::BadInput(msg.into())
}

/// Strings pass through trimmed; numbers are rendered; anything else is absent.
fn loose_string(v: &Value) -> Option<String> {
    match v {
        Value::String(s) => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

pub fn actor(params: &Value) -> EngineResult<Actor> {
    let Some(obj) = params.get("actor").and_then(|v| v.as_object()) else {
        return Err(bad("missing actor"));
    };
    let role = obj
        .get("role")
        .and_then(|v| v.as_str())
        .and_then(Role::parse)
        .ok_or_else(|| bad("actor.role must be one of: admin, teacher, student"))?;
    let id = obj
        .get("id")
        .and_then(loose_string)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| bad("actor.id is required"))?;
    Ok(Actor::new(role, id))
}

pub fn required_str<'a>(params: &'a Value, key: &str) -> EngineResult<&'a str> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| bad(format!("missing {}", key)))
}

pub fn optional_str<'a>(params: &'a Value, key: &str) -> Option<&'a str> {
    params.get(key).and_then(|v| v.as_str())
}

pub fn keys(params: &Value) -> EngineResult<Vec<String>> {
    let Some(arr) = params.get("keys").and_then(|v| v.as_array()) else {
        return Err(bad("keys must be an array"));
    };
    arr.iter()
        .enumerate()
        .map(|(i, v)| {
            loose_string(v)
                .filter(|s| !s.is_empty())
                .ok_or_else(|| bad(format!("keys[{}] must be a non-empty string", i)))
        })
        .collect()
}

fn subject(v: &Value, index: usize) -> EngineResult<SubjectInput> {
    let Some(obj) = v.as_object() else {
        return Err(bad(format!("subjects[{}] must be an object", index)));
    };
    let name = obj
        .get("name")
        .and_then(loose_string)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| bad(format!("subjects[{}].name is required", index)))?;

    // Non-numeric entries read as blank cells.
    let mut assessments = BTreeMap::new();
    match obj.get("assessments") {
        None | Some(Value::Null) => {}
        Some(Value::Object(map)) => {
            for (id, raw) in map {
                if let Some(n) = loose_number(raw) {
                    assessments.insert(id.clone(), n);
                }
            }
        }
        Some(_) => {
            return Err(bad(format!("subjects[{}].assessments must be an object", index)));
        }
    }

    Ok(SubjectInput {
        name,
        assessments,
        marks: obj.get("marks").and_then(loose_number),
    })
}

pub fn result_input(v: &Value) -> EngineResult<ResultInput> {
    let Some(obj) = v.as_object() else {
        return Err(bad("result must be an object"));
    };
    let field = |key: &str| -> EngineResult<String> {
        obj.get(key)
            .and_then(loose_string)
            .ok_or_else(|| bad(format!("result.{} is required", key)))
    };

    let subjects = match obj.get("subjects") {
        None | Some(Value::Null) => Vec::new(),
        Some(Value::Array(arr)) => arr
            .iter()
            .enumerate()
            .map(|(i, s)| subject(s, i))
            .collect::<EngineResult<Vec<_>>>()?,
        Some(_) => return Err(bad("result.subjects must be an array")),
    };

    let status = match obj.get("status").and_then(|v| v.as_str()) {
        None => ResultStatus::default(),
        Some(s) => ResultStatus::parse(s)
            .ok_or_else(|| bad("result.status must be one of: draft, submitted"))?,
    };

    let student_id = field("studentId")?;
    if student_id.is_empty() {
        return Err(bad("result.studentId must not be empty"));
    }

    Ok(ResultInput {
        student_id,
        student_name: field("studentName")?,
        grade: field("grade")?,
        section: field("section")?,
        subjects,
        status,
    })
}

pub fn inline_results(params: &Value) -> EngineResult<HashMap<String, ResultInput>> {
    let mut out = HashMap::new();
    match params.get("inline") {
        None | Some(Value::Null) => {}
        Some(Value::Object(map)) => {
            for (key, raw) in map {
                out.insert(key.clone(), result_input(raw)?);
            }
        }
        Some(_) => return Err(bad("inline must be an object keyed by result key")),
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn actor_requires_known_role_and_id() {
        let a = actor(&json!({ "actor": { "role": "Teacher", "id": 42 } })).expect("actor");
        assert_eq!(a, Actor::new(Role::Teacher, "42"));
        assert!(actor(&json!({ "actor": { "role": "parent", "id": "p" } })).is_err());
        assert!(actor(&json!({ "actor": { "role": "admin" } })).is_err());
        assert!(actor(&json!({})).is_err());
    }

    #[test]
    fn loose_marks_follow_spreadsheet_rules() {
        let r = result_input(&json!({
            "studentId": 1001,
            "studentName": "Abebe",
            "grade": 9,
            "section": "A",
            "subjects": [
                { "name": "Math", "marks": "88" },
                { "name": "Art", "marks": "x" },
                { "name": "Science", "assessments": { "quiz": "8", "final": null, "midterm": 25 } }
            ]
        }))
        .expect("parse");
        assert_eq!(r.student_id, "1001");
        assert_eq!(r.grade, "9");
        assert_eq!(r.status, ResultStatus::Submitted);
        assert_eq!(r.subjects[0].marks, Some(88.0));
        assert_eq!(r.subjects[1].marks, None);
        assert_eq!(r.subjects[2].assessments.len(), 2);
        assert_eq!(r.subjects[2].assessments["quiz"], 8.0);
    }

    #[test]
    fn malformed_results_are_rejected() {
        assert!(result_input(&json!("S1")).is_err());
        assert!(result_input(&json!({ "studentId": "s", "studentName": "n", "grade": "9" })).is_err());
        assert!(result_input(&json!({
            "studentId": "s", "studentName": "n", "grade": "9", "section": "A",
            "status": "final"
        }))
        .is_err());
        assert!(keys(&json!({ "keys": ["a", ""] })).is_err());
        assert_eq!(keys(&json!({ "keys": ["a", 7] })).expect("keys"), vec!["a", "7"]);
    }
}
