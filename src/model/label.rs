//! Validated label rows and the grading response envelope

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::llm::TokenUsage;
use crate::model::rubric::{EvidenceLabel, Rubric};

/// One graded criterion
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelRow {
    #[serde(rename = "Key Concept")]
    pub key_concept: String,
    #[serde(rename = "Observations")]
    pub observations: String,
    #[serde(rename = "Label")]
    pub label: EvidenceLabel,
    #[serde(rename = "Reason")]
    pub reason: String,
    #[serde(rename = "Evidence", default, skip_serializing_if = "Option::is_none")]
    pub evidence: Option<String>,
}

/// Exactly one row per rubric criterion, in rubric order
///
/// Only built by validation, consensus, and the static graders, which all
/// guarantee coverage of the rubric they were given.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LabelSet {
    rows: Vec<LabelRow>,
}

impl LabelSet {
    /// Order rows by the rubric. Callers have already checked coverage.
    pub(crate) fn from_rows(mut rows: Vec<LabelRow>, rubric: &Rubric) -> Self {
        rows.sort_by_key(|row| rubric.index_of(&row.key_concept).unwrap_or(usize::MAX));
        Self { rows }
    }

    /// Rows already in rubric order
    pub(crate) fn from_ordered_rows(rows: Vec<LabelRow>) -> Self {
        Self { rows }
    }

    /// Every criterion gets the same label, observation and reason
    pub fn uniform(rubric: &Rubric, label: EvidenceLabel, message: &str) -> Self {
        let rows = rubric
            .key_concepts()
            .map(|key_concept| LabelRow {
                key_concept: key_concept.to_string(),
                observations: message.to_string(),
                label,
                reason: message.to_string(),
                evidence: None,
            })
            .collect();
        Self { rows }
    }

    pub fn rows(&self) -> &[LabelRow] {
        &self.rows
    }

    pub fn into_rows(self) -> Vec<LabelRow> {
        self.rows
    }

    pub fn get(&self, key_concept: &str) -> Option<&LabelRow> {
        self.rows.iter().find(|row| row.key_concept == key_concept)
    }

    pub fn label(&self, key_concept: &str) -> Option<EvidenceLabel> {
        self.get(key_concept).map(|row| row.label)
    }

    pub fn iter(&self) -> impl Iterator<Item = &LabelRow> {
        self.rows.iter()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Replace rows for the criteria present in `overrides`
    pub fn merge(mut self, overrides: Vec<LabelRow>) -> Self {
        for replacement in overrides {
            match self
                .rows
                .iter_mut()
                .find(|row| row.key_concept == replacement.key_concept)
            {
                Some(row) => *row = replacement,
                None => self.rows.push(replacement),
            }
        }
        self
    }
}

impl<'a> IntoIterator for &'a LabelSet {
    type Item = &'a LabelRow;
    type IntoIter = std::slice::Iter<'a, LabelRow>;

    fn into_iter(self) -> Self::IntoIter {
        self.rows.iter()
    }
}

/// Format the model is asked to answer in
///
/// `Tsv` still accepts JSON answers; the parser detects them. `Json` skips
/// detection and always decodes a JSON array.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseType {
    #[default]
    Tsv,
    Json,
}

impl std::str::FromStr for ResponseType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "tsv" => Ok(ResponseType::Tsv),
            "json" => Ok(ResponseType::Json),
            other => Err(format!("unknown response type: {other}")),
        }
    }
}

/// Which grader produced the labels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Agent {
    /// Blank program shortcut
    Static,
    /// Every criterion labeled by decision trees
    CodeFeatures,
    #[serde(rename = "openai")]
    OpenAi,
    Anthropic,
    Meta,
}

/// Envelope metadata, persisted with the labels in the cache
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GradeMetadata {
    pub submission_id: String,
    pub agent: Agent,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    /// Wall-clock seconds spent grading
    pub time: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<TokenUsage>,
    /// Criteria labeled by decision trees instead of the LLM
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub feature_labeled: Vec<String>,
    /// Samples that survived validation
    #[serde(default)]
    pub valid_responses: usize,
    pub created_at: DateTime<Utc>,
}

/// Grading result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GradeResponse {
    pub metadata: GradeMetadata,
    pub data: LabelSet,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::rubric::tests::TWO_CRITERIA_RUBRIC;

    fn row(key_concept: &str, label: EvidenceLabel) -> LabelRow {
        LabelRow {
            key_concept: key_concept.to_string(),
            observations: format!("{key_concept} observed"),
            label,
            reason: format!("{key_concept} reason"),
            evidence: None,
        }
    }

    #[test]
    fn test_from_rows_uses_rubric_order() {
        let rubric = Rubric::parse(TWO_CRITERIA_RUBRIC).unwrap();
        let set = LabelSet::from_rows(
            vec![row("B", EvidenceLabel::No), row("A", EvidenceLabel::Limited)],
            &rubric,
        );
        let names: Vec<_> = set.iter().map(|r| r.key_concept.as_str()).collect();
        assert_eq!(names, vec!["A", "B"]);
    }

    #[test]
    fn test_merge_overrides_matching_rows() {
        let rubric = Rubric::parse(TWO_CRITERIA_RUBRIC).unwrap();
        let set = LabelSet::uniform(&rubric, EvidenceLabel::No, "nothing");
        let merged = set.merge(vec![row("B", EvidenceLabel::Extensive)]);
        assert_eq!(merged.len(), 2);
        assert_eq!(merged.label("A"), Some(EvidenceLabel::No));
        assert_eq!(merged.label("B"), Some(EvidenceLabel::Extensive));
    }

    #[test]
    fn test_row_wire_names() {
        let json = serde_json::to_value(row("A", EvidenceLabel::Convincing)).unwrap();
        assert_eq!(json["Key Concept"], "A");
        assert_eq!(json["Label"], "Convincing Evidence");
        assert!(json.get("Evidence").is_none());

        let parsed: LabelRow = serde_json::from_value(serde_json::json!({
            "Key Concept": "A",
            "Observations": "o",
            "Label": "No Evidence",
            "Reason": "r",
            "Evidence": "Line 1: x"
        }))
        .unwrap();
        assert_eq!(parsed.evidence.as_deref(), Some("Line 1: x"));
    }

    #[test]
    fn test_agent_wire_names() {
        assert_eq!(serde_json::to_value(Agent::OpenAi).unwrap(), "openai");
        assert_eq!(serde_json::to_value(Agent::CodeFeatures).unwrap(), "code_features");
    }
}
