//! Batch grading and accuracy reporting
//!
//! Grades many submissions with bounded concurrency and compares the
//! predicted labels with human-assigned ones.

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use futures::stream::{self, StreamExt};
use serde::Serialize;

use crate::model::rubric::InvalidLabel;
use crate::model::{EvidenceLabel, GradeResponse};
use crate::service::grader::{GradeError, GradeRequest, Grader};

/// Column naming the student in an actual-labels CSV
const STUDENT_COLUMN: &str = "student";

#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum BatchError {
    #[error("Failed to read actual labels: {0}")]
    Csv(#[from] csv::Error),

    #[error("Actual labels file has no 'student' column")]
    MissingStudentColumn,

    #[error("Invalid actual label for student {student}: {source}")]
    InvalidLabel {
        student: String,
        source: InvalidLabel,
    },

    #[error("No actual label for student {student}, criterion {criterion}")]
    MissingActualLabel { student: String, criterion: String },

    #[error("Passing label count must be between 1 and 3, got {0}")]
    InvalidPassingLabels(usize),
}

/// One student program to grade
#[derive(Debug, Clone)]
pub struct Submission {
    pub student_id: String,
    pub code: String,
}

#[derive(Debug, Default)]
pub struct BatchOutcome {
    /// Successful gradings, ordered by student id
    pub graded: BTreeMap<String, GradeResponse>,
    pub failures: BTreeMap<String, GradeError>,
}

/// Grade every submission with at most `concurrency` gradings in flight
///
/// `template` supplies everything but the code and submission id.
pub async fn grade_batch(
    grader: &Grader,
    template: &GradeRequest,
    submissions: Vec<Submission>,
    concurrency: usize,
) -> BatchOutcome {
    let total = submissions.len();
    tracing::info!(total, concurrency, "Starting batch grading");

    let results: Vec<(String, Result<GradeResponse, GradeError>)> = stream::iter(submissions)
        .map(|submission| {
            let mut request = template.clone();
            request.code = submission.code;
            request.submission_id = Some(submission.student_id.clone());
            async move { (submission.student_id, grader.grade(request).await) }
        })
        .buffer_unordered(concurrency.max(1))
        .collect()
        .await;

    let mut outcome = BatchOutcome::default();
    for (student_id, result) in results {
        match result {
            Ok(response) => {
                outcome.graded.insert(student_id, response);
            }
            Err(e) => {
                tracing::error!(student_id = %student_id, error = %e, "Grading failed");
                outcome.failures.insert(student_id, e);
            }
        }
    }

    tracing::info!(
        total,
        graded = outcome.graded.len(),
        failed = outcome.failures.len(),
        "Batch grading finished"
    );
    outcome
}

/// Teacher-assigned labels: student id to criterion to label
pub type ActualLabels = HashMap<String, HashMap<String, EvidenceLabel>>;

/// Read a CSV with a `student` column and one column per criterion
pub fn read_actual_labels(csv_text: &str) -> Result<ActualLabels, BatchError> {
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_reader(csv_text.as_bytes());
    let headers = reader.headers()?.clone();
    let student_column = headers
        .iter()
        .position(|h| h == STUDENT_COLUMN)
        .ok_or(BatchError::MissingStudentColumn)?;

    let mut labels = ActualLabels::new();
    for record in reader.records() {
        let record = record?;
        let student = record.get(student_column).unwrap_or_default().to_string();
        let mut by_criterion = HashMap::new();
        for (column, value) in record.iter().enumerate() {
            if column == student_column {
                continue;
            }
            let Some(criterion) = headers.get(column) else {
                continue;
            };
            let label = value
                .parse::<EvidenceLabel>()
                .map_err(|source| BatchError::InvalidLabel {
                    student: student.clone(),
                    source,
                })?;
            by_criterion.insert(criterion.to_string(), label);
        }
        labels.insert(student, by_criterion);
    }
    Ok(labels)
}

/// Counts of actual (rows) against predicted (columns) label names
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConfusionMatrix {
    pub labels: Vec<String>,
    pub counts: Vec<Vec<usize>>,
}

impl ConfusionMatrix {
    fn new(labels: &[String]) -> Self {
        Self {
            labels: labels.to_vec(),
            counts: vec![vec![0; labels.len()]; labels.len()],
        }
    }

    fn record(&mut self, actual: &str, predicted: &str) {
        let row = self.labels.iter().position(|l| l == actual);
        let column = self.labels.iter().position(|l| l == predicted);
        if let (Some(row), Some(column)) = (row, column) {
            self.counts[row][column] += 1;
        }
    }

    pub fn count(&self, actual: &str, predicted: &str) -> usize {
        let row = self.labels.iter().position(|l| l == actual);
        let column = self.labels.iter().position(|l| l == predicted);
        match (row, column) {
            (Some(row), Some(column)) => self.counts[row][column],
            _ => 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CriterionAccuracy {
    pub accuracy: f64,
    pub confusion: ConfusionMatrix,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AccuracyReport {
    /// Label names used by the matrices; pass/fail names when collapsed
    pub label_names: Vec<String>,
    pub by_criterion: BTreeMap<String, CriterionAccuracy>,
    pub overall_accuracy: f64,
    pub overall_confusion: ConfusionMatrix,
}

/// How predicted and actual labels are compared
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Scale {
    Full,
    /// The first `n` labels, strongest first, count as passing
    PassFail(usize),
}

impl Scale {
    fn label_names(&self) -> Vec<String> {
        match *self {
            Scale::Full => EvidenceLabel::ALL.iter().map(|l| l.to_string()).collect(),
            Scale::PassFail(n) => vec![
                Self::join(&EvidenceLabel::ALL[..n]),
                Self::join(&EvidenceLabel::ALL[n..]),
            ],
        }
    }

    fn name(&self, label: EvidenceLabel) -> String {
        match *self {
            Scale::Full => label.to_string(),
            Scale::PassFail(n) => {
                let passing = &EvidenceLabel::ALL[..n];
                if passing.contains(&label) {
                    Self::join(passing)
                } else {
                    Self::join(&EvidenceLabel::ALL[n..])
                }
            }
        }
    }

    fn join(labels: &[EvidenceLabel]) -> String {
        labels.iter().map(EvidenceLabel::as_str).collect::<Vec<_>>().join("/")
    }
}

/// Accuracy and confusion per criterion and overall
///
/// With `passing_labels` set, the strongest `passing_labels` labels collapse
/// into one pass bucket and the rest into a fail bucket before comparing.
pub fn compute_accuracy(
    actual: &ActualLabels,
    predicted: &BTreeMap<String, GradeResponse>,
    passing_labels: Option<usize>,
) -> Result<AccuracyReport, BatchError> {
    let scale = match passing_labels {
        None => Scale::Full,
        Some(n) if (1..EvidenceLabel::ALL.len()).contains(&n) => Scale::PassFail(n),
        Some(n) => return Err(BatchError::InvalidPassingLabels(n)),
    };
    let label_names = scale.label_names();

    let mut pairs: BTreeMap<String, Vec<(String, String)>> = BTreeMap::new();
    for (student, response) in predicted {
        for row in &response.data {
            let actual_label = actual
                .get(student)
                .and_then(|labels| labels.get(&row.key_concept))
                .ok_or_else(|| BatchError::MissingActualLabel {
                    student: student.clone(),
                    criterion: row.key_concept.clone(),
                })?;
            pairs
                .entry(row.key_concept.clone())
                .or_default()
                .push((scale.name(*actual_label), scale.name(row.label)));
        }
    }

    let mut overall_confusion = ConfusionMatrix::new(&label_names);
    let mut overall_correct = 0;
    let mut overall_total = 0;
    let mut by_criterion = BTreeMap::new();

    for (criterion, pairs) in pairs {
        let mut confusion = ConfusionMatrix::new(&label_names);
        let mut correct = 0;
        for (actual, predicted) in &pairs {
            confusion.record(actual, predicted);
            overall_confusion.record(actual, predicted);
            if actual == predicted {
                correct += 1;
            }
        }
        overall_correct += correct;
        overall_total += pairs.len();
        by_criterion.insert(
            criterion,
            CriterionAccuracy {
                accuracy: ratio(correct, pairs.len()),
                confusion,
            },
        );
    }

    Ok(AccuracyReport {
        label_names,
        by_criterion,
        overall_accuracy: ratio(overall_correct, overall_total),
        overall_confusion,
    })
}

fn ratio(correct: usize, total: usize) -> f64 {
    if total == 0 {
        0.0
    } else {
        correct as f64 / total as f64
    }
}

/// How far a criterion's pass/fail predictions can be trusted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Confidence {
    High,
    Medium,
    Low,
}

impl Confidence {
    pub fn from_accuracy(accuracy: f64) -> Self {
        if accuracy >= 0.85 {
            Confidence::High
        } else if accuracy >= 0.8 {
            Confidence::Medium
        } else {
            Confidence::Low
        }
    }
}

impl fmt::Display for Confidence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Confidence::High => "HIGH",
            Confidence::Medium => "MEDIUM",
            Confidence::Low => "LOW",
        })
    }
}

pub fn pass_fail_confidence(report: &AccuracyReport) -> BTreeMap<String, Confidence> {
    report
        .by_criterion
        .iter()
        .map(|(criterion, accuracy)| {
            (
                criterion.clone(),
                Confidence::from_accuracy(accuracy.accuracy),
            )
        })
        .collect()
}
