use crate::model::ResultRecord;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RankOrder {
    #[default]
    Descending,
    Ascending,
}

impl RankOrder {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "desc" | "descending" => Some(Self::Descending),
            "asc" | "ascending" => Some(Self::Ascending),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RankBy {
    #[default]
    Average,
    Total,
}

impl RankBy {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "average" => Some(Self::Average),
            "total" => Some(Self::Total),
            _ => None,
        }
    }
}

fn is_better(x: f64, v: f64, order: RankOrder) -> bool {
    if !x.is_finite() {
        return false;
    }
    if !v.is_finite() {
        return true;
    }
    match order {
        RankOrder::Descending => x > v,
        RankOrder::Ascending => x < v,
    }
}

/// Competition rank (RANK.EQ): one plus the number of cohort members strictly
/// better than `value`. Ties share a rank and the following rank skips.
pub fn rank_eq(value: f64, cohort: &[f64], order: RankOrder) -> usize {
    1 + cohort
        .iter()
        .filter(|&&x| is_better(x, value, order))
        .count()
}

/// Ranks every member of a cohort; output is aligned with the input.
pub fn rank_all(values: &[f64], order: RankOrder) -> Vec<usize> {
    // Sort once, then binary-search the count of strictly better entries.
    let mut finite: Vec<f64> = values.iter().copied().filter(|v| v.is_finite()).collect();
    finite.sort_by(|a, b| a.total_cmp(b));
    values
        .iter()
        .map(|&v| {
            if !v.is_finite() {
                return 1 + finite.len();
            }
            let better = match order {
                RankOrder::Descending => finite.len() - finite.partition_point(|&x| x <= v),
                RankOrder::Ascending => finite.partition_point(|&x| x < v),
            };
            1 + better
        })
        .collect()
}

impl RankBy {
    pub fn value_of(self, record: &ResultRecord) -> f64 {
        match self {
            Self::Average => record.average,
            Self::Total => record.total,
        }
    }
}

pub fn rank_cohort<'r, I>(records: I, by: RankBy, order: RankOrder) -> Vec<usize>
where
    I: IntoIterator<Item = &'r ResultRecord>,
{
    let values: Vec<f64> = records.into_iter().map(|r| by.value_of(r)).collect();
    rank_all(&values, order)
}
