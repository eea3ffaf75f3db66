use crate::classify::{self, Thresholds};
use crate::error::EngineError;
use crate::model::{AssessmentType, ResultInput, ResultRecord, ResultStatus, SubjectInput, SubjectResult};
use serde_json::Value;
use std::collections::HashMap;
use tracing::debug;

/// Half-up rounding to a fixed number of decimals:
/// `Int(10^p * x + 0.5) / 10^p`
pub fn round_half_up(x: f64, places: i32) -> f64 {
    let scale = 10f64.powi(places);
    ((scale * x) + 0.5).floor() / scale
}

/// Spreadsheet-style coercion of a loose JSON cell. Numbers and numeric
/// strings are numeric; text, null, bools and containers are not.
pub fn loose_number(v: &Value) -> Option<f64> {
    match v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok().filter(|x| x.is_finite()),
        _ => None,
    }
}

/// Non-numeric and non-finite entries count as zero.
pub fn sum<I>(values: I) -> f64
where
    I: IntoIterator<Item = Option<f64>>,
{
    values
        .into_iter()
        .flatten()
        .filter(|v| v.is_finite())
        .sum()
}

/// Mean of the numeric entries only; zero when none are numeric.
pub fn average<I>(values: I) -> f64
where
    I: IntoIterator<Item = Option<f64>>,
{
    let mut total = 0.0_f64;
    let mut count: usize = 0;
    for v in values.into_iter().flatten() {
        if v.is_nan() {
            continue;
        }
        total += v;
        count += 1;
    }
    if count == 0 {
        0.0
    } else {
        total / (count as f64)
    }
}

#[derive(Debug)]
pub struct SubjectScore {
    pub score: Option<f64>,
    pub warnings: Vec<EngineError>,
}

/// Resolves a subject's raw marks into a 0-100 score.
///
/// A usable assessment map (at least one known type with positive weight and
/// max marks) wins; otherwise the flat `marks` value is used. Unknown ids are
/// reported as warnings and skipped. Any out-of-range mark rejects the whole
/// subject.
pub fn normalize_subject(
    subject: &SubjectInput,
    types: &[AssessmentType],
) -> Result<SubjectScore, EngineError> {
    let by_id: HashMap<&str, &AssessmentType> =
        types.iter().map(|t| (t.id.as_str(), t)).collect();

    let mut warnings: Vec<EngineError> = Vec::new();
    let mut weighted_sum = 0.0_f64;
    let mut weight_denom = 0.0_f64;

    for (id, &mark) in &subject.assessments {
        let Some(t) = by_id.get(id.as_str()) else {
            warnings.push(EngineError::UnknownAssessmentType {
                subject: subject.name.clone(),
                assessment_id: id.clone(),
            });
            continue;
        };
        if !mark.is_finite() || mark < 0.0 || mark > t.max_marks {
            return Err(EngineError::InvalidMark {
                subject: subject.name.clone(),
                assessment_id: id.clone(),
                mark,
                max_marks: t.max_marks,
            });
        }
        if t.weight <= 0.0 || t.max_marks <= 0.0 {
            continue;
        }
        weighted_sum += (mark / t.max_marks) * t.weight;
        weight_denom += t.weight;
    }

    let score = if weight_denom > 0.0 {
        Some(100.0 * weighted_sum / weight_denom)
    } else if let Some(flat) = subject.marks {
        if !flat.is_finite() || !(0.0..=100.0).contains(&flat) {
            return Err(EngineError::InvalidMark {
                subject: subject.name.clone(),
                assessment_id: "marks".to_string(),
                mark: flat,
                max_marks: 100.0,
            });
        }
        Some(flat)
    } else {
        None
    };

    if !warnings.is_empty() {
        debug!(
            target: "resultd::calc",
            subject = %subject.name,
            unknown = warnings.len(),
            "ignored unknown assessment ids"
        );
    }

    Ok(SubjectScore {
        score: score.map(|s| round_half_up(s, 2)),
        warnings,
    })
}

pub fn subject_result(
    subject: &SubjectInput,
    types: &[AssessmentType],
    thresholds: &Thresholds,
) -> Result<(SubjectResult, Vec<EngineError>), EngineError> {
    let known: HashMap<&str, ()> = types.iter().map(|t| (t.id.as_str(), ())).collect();
    let normalized = normalize_subject(subject, types)?;
    let result = SubjectResult {
        name: subject.name.clone(),
        assessments: subject
            .assessments
            .iter()
            .filter(|(id, _)| known.contains_key(id.as_str()))
            .map(|(id, v)| (id.clone(), *v))
            .collect(),
        marks: normalized.score,
        status: normalized
            .score
            .map(|s| classify::pass_status(s, thresholds)),
        grade: normalized
            .score
            .map(|s| classify::letter_grade(s, thresholds)),
    };
    Ok((result, normalized.warnings))
}

#[derive(Debug)]
pub struct SubjectOutcome {
    pub name: String,
    pub result: Result<SubjectResult, EngineError>,
    pub warnings: Vec<EngineError>,
}

pub fn compute_subjects(
    subjects: &[SubjectInput],
    types: &[AssessmentType],
    thresholds: &Thresholds,
) -> Vec<SubjectOutcome> {
    subjects
        .iter()
        .map(|s| match subject_result(s, types, thresholds) {
            Ok((result, warnings)) => SubjectOutcome {
                name: s.name.clone(),
                result: Ok(result),
                warnings,
            },
            Err(e) => SubjectOutcome {
                name: s.name.clone(),
                result: Err(e),
                warnings: Vec::new(),
            },
        })
        .collect()
}

pub struct RecordMeta<'a> {
    pub status: ResultStatus,
    pub submitted_by: &'a str,
    pub submitted_at: &'a str,
}

/// Aggregates already-normalized subjects into a full record. Rank is left
/// unset; it is a cohort property.
pub fn assemble_record(
    input: &ResultInput,
    subjects: Vec<SubjectResult>,
    thresholds: &Thresholds,
    meta: RecordMeta<'_>,
) -> ResultRecord {
    let total = round_half_up(sum(subjects.iter().map(|s| s.marks)), 2);
    let avg = round_half_up(average(subjects.iter().map(|s| s.marks)), 2);
    let class = classify::classify(avg, thresholds);

    ResultRecord {
        student_id: input.student_id.clone(),
        student_name: input.student_name.clone(),
        grade: input.grade.clone(),
        section: input.section.clone(),
        subjects,
        total,
        average: avg,
        overall_grade: class.grade,
        pass_status: class.pass_status,
        conduct: class.conduct,
        promoted_or_detained: class.promotion,
        rank: None,
        status: meta.status,
        submitted_by: meta.submitted_by.to_string(),
        submitted_at: meta.submitted_at.to_string(),
    }
}

/// Strict recompute: the first failing subject fails the record.
#[cfg(test)]
pub fn compute_record(
    input: &ResultInput,
    types: &[AssessmentType],
    thresholds: &Thresholds,
    meta: RecordMeta<'_>,
) -> Result<ResultRecord, EngineError> {
    let mut subjects = Vec::with_capacity(input.subjects.len());
    for s in &input.subjects {
        let (result, _) = subject_result(s, types, thresholds)?;
        subjects.push(result);
    }
    Ok(assemble_record(input, subjects, thresholds, meta))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::LetterGrade;
    use serde_json::json;
    use std::collections::BTreeMap;

    fn types() -> Vec<AssessmentType> {
        vec![
            AssessmentType {
                id: "mid".into(),
                label: "Midterm".into(),
                weight: 40.0,
                max_marks: 50.0,
            },
            AssessmentType {
                id: "final".into(),
                label: "Final".into(),
                weight: 60.0,
                max_marks: 100.0,
            },
        ]
    }

    fn subject(name: &str, marks: &[(&str, f64)], flat: Option<f64>) -> SubjectInput {
        SubjectInput {
            name: name.into(),
            assessments: marks
                .iter()
                .map(|(k, v)| (k.to_string(), *v))
                .collect::<BTreeMap<_, _>>(),
            marks: flat,
        }
    }

    #[test]
    fn round_half_up_matches_fixed_decimals() {
        assert_eq!(round_half_up(82.0, 2), 82.0);
        assert_eq!(round_half_up(3.54, 1), 3.5);
        assert_eq!(round_half_up(3.55, 1), 3.6);
        assert_eq!(round_half_up(66.666_666, 2), 66.67);
    }

    #[test]
    fn sum_treats_non_numeric_as_zero() {
        let cells = [json!(10), Value::Null, json!(20)];
        assert_eq!(sum(cells.iter().map(loose_number)), 30.0);
        assert_eq!(sum([Some(5.0), Some(f64::NAN), None]), 5.0);
    }

    #[test]
    fn average_ignores_non_numeric_and_empty_is_zero() {
        assert_eq!(average(Vec::<Option<f64>>::new()), 0.0);
        let cells = [Some(f64::NAN), loose_number(&json!("x"))];
        assert_eq!(average(cells), 0.0);
        assert_eq!(average([Some(88.0), None, Some(76.0)]), 82.0);
        assert_eq!(average([Some(10.0), loose_number(&json!("20"))]), 15.0);
    }

    #[test]
    fn weighted_score_renormalizes_partial_submissions() {
        let full = normalize_subject(&subject("Math", &[("mid", 40.0), ("final", 80.0)], None), &types())
            .expect("normalize");
        // (40/50)*40 + (80/100)*60 = 32 + 48 = 80
        assert_eq!(full.score, Some(80.0));

        let partial = normalize_subject(&subject("Math", &[("mid", 45.0)], None), &types())
            .expect("normalize");
        assert_eq!(partial.score, Some(90.0));
    }

    #[test]
    fn out_of_range_mark_rejects_subject() {
        let err = normalize_subject(&subject("Math", &[("mid", 51.0)], None), &types())
            .expect_err("should reject");
        assert_eq!(err.code(), "invalid_mark");

        let err = normalize_subject(&subject("Math", &[("final", -1.0)], None), &types())
            .expect_err("should reject");
        assert_eq!(err.code(), "invalid_mark");

        let err = normalize_subject(&subject("Art", &[], Some(101.0)), &types())
            .expect_err("should reject flat");
        assert_eq!(err.code(), "invalid_mark");
    }

    #[test]
    fn unknown_ids_warn_without_changing_score() {
        let out = normalize_subject(
            &subject("Math", &[("mid", 40.0), ("final", 80.0), ("bonus", 5.0)], None),
            &types(),
        )
        .expect("normalize");
        assert_eq!(out.score, Some(80.0));
        assert_eq!(out.warnings.len(), 1);
        assert_eq!(out.warnings[0].code(), "unknown_assessment_type");
    }

    #[test]
    fn assessment_map_wins_over_flat_marks() {
        let out = normalize_subject(&subject("Math", &[("final", 50.0)], Some(99.0)), &types())
            .expect("normalize");
        assert_eq!(out.score, Some(50.0));

        // Only unknown ids: fall back to the flat value.
        let out = normalize_subject(&subject("Math", &[("bonus", 3.0)], Some(72.0)), &types())
            .expect("normalize");
        assert_eq!(out.score, Some(72.0));
    }

    #[test]
    fn no_configured_types_uses_flat_marks() {
        let out = normalize_subject(&subject("Math", &[], Some(64.5)), &[]).expect("normalize");
        assert_eq!(out.score, Some(64.5));

        let out = normalize_subject(&subject("Math", &[], None), &[]).expect("normalize");
        assert_eq!(out.score, None);
    }

    #[test]
    fn record_totals_and_classification() {
        let input = ResultInput {
            student_id: "stu-1".into(),
            student_name: "Abebe".into(),
            grade: "9".into(),
            section: "A".into(),
            subjects: vec![
                subject("Math", &[], Some(88.0)),
                subject("English", &[], Some(76.0)),
                subject("Music", &[], None),
            ],
            status: ResultStatus::Submitted,
        };
        let record = compute_record(
            &input,
            &types(),
            &Thresholds::default(),
            RecordMeta {
                status: input.status,
                submitted_by: "t-1",
                submitted_at: "2026-01-01T00:00:00Z",
            },
        )
        .expect("compute");
        assert_eq!(record.total, 164.0);
        assert_eq!(record.average, 82.0);
        assert_eq!(record.overall_grade, LetterGrade::A);
        assert_eq!(record.conduct.as_str(), "Very Good");
        assert_eq!(record.subjects[2].grade, None);
        assert_eq!(record.rank, None);
    }

    #[test]
    fn compute_subjects_reports_each_failure() {
        let outcomes = compute_subjects(
            &[
                subject("Math", &[("mid", 70.0)], None),
                subject("Physics", &[("final", 70.0)], None),
            ],
            &types(),
            &Thresholds::default(),
        );
        assert!(outcomes[0].result.is_err());
        let physics = outcomes[1].result.as_ref().expect("physics ok");
        assert_eq!(physics.marks, Some(70.0));
    }
}
