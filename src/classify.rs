use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LetterGrade {
    #[serde(rename = "A+")]
    APlus,
    A,
    #[serde(rename = "B+")]
    BPlus,
    B,
    C,
    D,
    F,
}

impl LetterGrade {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::APlus => "A+",
            Self::A => "A",
            Self::BPlus => "B+",
            Self::B => "B",
            Self::C => "C",
            Self::D => "D",
            Self::F => "F",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PassStatus {
    Pass,
    Fail,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Promotion {
    Promoted,
    Detained,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Conduct {
    Excellent,
    #[serde(rename = "Very Good")]
    VeryGood,
    Good,
    Satisfactory,
    Fair,
    #[serde(rename = "Needs Improvement")]
    NeedsImprovement,
}

impl Conduct {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Excellent => "Excellent",
            Self::VeryGood => "Very Good",
            Self::Good => "Good",
            Self::Satisfactory => "Satisfactory",
            Self::Fair => "Fair",
            Self::NeedsImprovement => "Needs Improvement",
        }
    }
}

/// Lower bounds (inclusive) for each band. Anything below the last bound
/// falls into the bottom band.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Thresholds {
    pub a_plus: f64,
    pub a: f64,
    pub b_plus: f64,
    pub b: f64,
    pub c: f64,
    pub d: f64,
    pub pass: f64,
    pub conduct_excellent: f64,
    pub conduct_very_good: f64,
    pub conduct_good: f64,
    pub conduct_satisfactory: f64,
    pub conduct_fair: f64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            a_plus: 90.0,
            a: 80.0,
            b_plus: 70.0,
            b: 60.0,
            c: 50.0,
            d: 35.0,
            pass: 35.0,
            conduct_excellent: 90.0,
            conduct_very_good: 80.0,
            conduct_good: 70.0,
            conduct_satisfactory: 60.0,
            conduct_fair: 50.0,
        }
    }
}

impl Thresholds {
    /// Band bounds must sit in 0..=100 and strictly descend within each table.
    pub fn validate(&self) -> Result<(), String> {
        let grade = [
            ("aPlus", self.a_plus),
            ("a", self.a),
            ("bPlus", self.b_plus),
            ("b", self.b),
            ("c", self.c),
            ("d", self.d),
        ];
        let conduct = [
            ("conductExcellent", self.conduct_excellent),
            ("conductVeryGood", self.conduct_very_good),
            ("conductGood", self.conduct_good),
            ("conductSatisfactory", self.conduct_satisfactory),
            ("conductFair", self.conduct_fair),
        ];
        for (name, v) in grade.iter().chain(conduct.iter()).chain([("pass", self.pass)].iter()) {
            if !v.is_finite() || !(0.0..=100.0).contains(v) {
                return Err(format!("thresholds.{} must be within 0..=100", name));
            }
        }
        for table in [&grade[..], &conduct[..]] {
            for pair in table.windows(2) {
                if pair[0].1 <= pair[1].1 {
                    return Err(format!(
                        "thresholds.{} must be greater than thresholds.{}",
                        pair[0].0, pair[1].0
                    ));
                }
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Classification {
    pub grade: LetterGrade,
    pub pass_status: PassStatus,
    pub promotion: Promotion,
    pub conduct: Conduct,
}

pub fn letter_grade(average: f64, t: &Thresholds) -> LetterGrade {
    if average >= t.a_plus {
        LetterGrade::APlus
    } else if average >= t.a {
        LetterGrade::A
    } else if average >= t.b_plus {
        LetterGrade::BPlus
    } else if average >= t.b {
        LetterGrade::B
    } else if average >= t.c {
        LetterGrade::C
    } else if average >= t.d {
        LetterGrade::D
    } else {
        LetterGrade::F
    }
}

pub fn pass_status(average: f64, t: &Thresholds) -> PassStatus {
    if average >= t.pass {
        PassStatus::Pass
    } else {
        PassStatus::Fail
    }
}

pub fn promotion(status: PassStatus) -> Promotion {
    match status {
        PassStatus::Pass => Promotion::Promoted,
        PassStatus::Fail => Promotion::Detained,
    }
}

pub fn conduct(average: f64, t: &Thresholds) -> Conduct {
    if average >= t.conduct_excellent {
        Conduct::Excellent
    } else if average >= t.conduct_very_good {
        Conduct::VeryGood
    } else if average >= t.conduct_good {
        Conduct::Good
    } else if average >= t.conduct_satisfactory {
        Conduct::Satisfactory
    } else if average >= t.conduct_fair {
        Conduct::Fair
    } else {
        Conduct::NeedsImprovement
    }
}

pub fn classify(average: f64, t: &Thresholds) -> Classification {
    let status = pass_status(average, t);
    Classification {
        grade: letter_grade(average, t),
        pass_status: status,
        promotion: promotion(status),
        conduct: conduct(average, t),
    }
}
