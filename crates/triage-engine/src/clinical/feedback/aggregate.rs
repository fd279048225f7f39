//! De-identified rollups over feedback history.
//!
//! Every view is keyed by diagnosis label, complaint, or calendar period.
//! Session and submitter identifiers never reach the output.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{Datelike, Duration, NaiveDate};
use serde::Serialize;

use super::{FeedbackOutcome, FeedbackRecord};

/// Diagnoses listed per rollup bucket.
const TOP_DIAGNOSES_PER_BUCKET: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RollupPeriod {
    Daily,
    /// ISO weeks, starting Monday.
    Weekly,
}

impl RollupPeriod {
    fn bucket_start(&self, date: NaiveDate) -> NaiveDate {
        match self {
            RollupPeriod::Daily => date,
            RollupPeriod::Weekly => {
                date - Duration::days(i64::from(date.weekday().num_days_from_monday()))
            }
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct OutcomeCounts {
    pub total: usize,
    pub improved: usize,
    pub worsened: usize,
    pub diagnosed: usize,
}

impl OutcomeCounts {
    fn add(&mut self, outcome: FeedbackOutcome) {
        self.total += 1;
        match outcome {
            FeedbackOutcome::Improved => self.improved += 1,
            FeedbackOutcome::Worsened => self.worsened += 1,
            FeedbackOutcome::Diagnosed => self.diagnosed += 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ComplaintCoverage {
    pub chief_complaint: String,
    pub feedback_count: usize,
    pub distinct_diagnoses: usize,
    pub adult: usize,
    pub pediatric: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DiagnosisStats {
    pub diagnosis: String,
    #[serde(flatten)]
    pub outcomes: OutcomeCounts,
    /// Share of records that did not worsen.
    pub favourable_rate: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RollupBucket {
    pub period_start: NaiveDate,
    #[serde(flatten)]
    pub outcomes: OutcomeCounts,
    pub top_diagnoses: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FeedbackSummary {
    pub records: usize,
    pub coverage: Vec<ComplaintCoverage>,
    pub diagnoses: Vec<DiagnosisStats>,
    pub daily: Vec<RollupBucket>,
    pub weekly: Vec<RollupBucket>,
}

pub fn summarize(records: &[FeedbackRecord]) -> FeedbackSummary {
    FeedbackSummary {
        records: records.len(),
        coverage: coverage_by_complaint(records),
        diagnoses: diagnosis_stats(records),
        daily: rollup(records, RollupPeriod::Daily),
        weekly: rollup(records, RollupPeriod::Weekly),
    }
}

pub fn coverage_by_complaint(records: &[FeedbackRecord]) -> Vec<ComplaintCoverage> {
    let mut grouped: BTreeMap<&str, (usize, BTreeSet<&str>, usize, usize)> = BTreeMap::new();
    for record in records {
        let entry = grouped
            .entry(record.features.chief_complaint.as_str())
            .or_default();
        entry.0 += 1;
        entry.1.insert(record.confirmed_diagnosis.as_str());
        match record.features.age_group {
            crate::clinical::assessment::AgeGroup::Adult => entry.2 += 1,
            crate::clinical::assessment::AgeGroup::Pediatric => entry.3 += 1,
        }
    }

    grouped
        .into_iter()
        .map(
            |(complaint, (count, diagnoses, adult, pediatric))| ComplaintCoverage {
                chief_complaint: complaint.to_string(),
                feedback_count: count,
                distinct_diagnoses: diagnoses.len(),
                adult,
                pediatric,
            },
        )
        .collect()
}

/// Per-diagnosis outcome counts, most frequent first.
pub fn diagnosis_stats(records: &[FeedbackRecord]) -> Vec<DiagnosisStats> {
    let mut grouped: BTreeMap<&str, OutcomeCounts> = BTreeMap::new();
    for record in records {
        grouped
            .entry(record.confirmed_diagnosis.as_str())
            .or_default()
            .add(record.outcome);
    }

    let mut stats = grouped
        .into_iter()
        .map(|(diagnosis, outcomes)| DiagnosisStats {
            diagnosis: diagnosis.to_string(),
            favourable_rate: (outcomes.total - outcomes.worsened) as f64 / outcomes.total as f64,
            outcomes,
        })
        .collect::<Vec<_>>();
    stats.sort_by(|left, right| right.outcomes.total.cmp(&left.outcomes.total));
    stats
}

/// Buckets in chronological order.
pub fn rollup(records: &[FeedbackRecord], period: RollupPeriod) -> Vec<RollupBucket> {
    let mut buckets: BTreeMap<NaiveDate, (OutcomeCounts, BTreeMap<&str, usize>)> = BTreeMap::new();
    for record in records {
        let start = period.bucket_start(record.recorded_at.date_naive());
        let (counts, diagnoses) = buckets.entry(start).or_default();
        counts.add(record.outcome);
        *diagnoses.entry(record.confirmed_diagnosis.as_str()).or_default() += 1;
    }

    buckets
        .into_iter()
        .map(|(period_start, (outcomes, diagnoses))| {
            let mut ranked = diagnoses.into_iter().collect::<Vec<_>>();
            ranked.sort_by(|left, right| right.1.cmp(&left.1));
            RollupBucket {
                period_start,
                outcomes,
                top_diagnoses: ranked
                    .into_iter()
                    .take(TOP_DIAGNOSES_PER_BUCKET)
                    .map(|(diagnosis, _)| diagnosis.to_string())
                    .collect(),
            }
        })
        .collect()
}
