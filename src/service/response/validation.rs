//! Sanitization and validation of parsed label rows
//!
//! The steps run in a fixed order. Schema problems are reported before
//! coverage and label problems because those checks read fields the schema
//! check guarantees exist.

use std::collections::BTreeSet;

use crate::model::rubric::{EvidenceLabel, InvalidLabel, KEY_CONCEPT_COLUMN, Rubric};
use crate::model::{LabelRow, LabelSet};
use crate::service::response::parser::RawRow;

pub const OBSERVATIONS_COLUMN: &str = "Observations";
pub const LABEL_COLUMN: &str = "Label";
pub const REASON_COLUMN: &str = "Reason";
pub const EVIDENCE_COLUMN: &str = "Evidence";

/// Older prompts asked for a "Grade" column
const LEGACY_LABEL_COLUMN: &str = "Grade";

/// Columns every row must have
pub const EXPECTED_COLUMNS: [&str; 4] = [
    KEY_CONCEPT_COLUMN,
    OBSERVATIONS_COLUMN,
    LABEL_COLUMN,
    REASON_COLUMN,
];

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum ValidationError {
    #[error("incorrect column names. unexpected: {unexpected:?} missing: {missing:?}")]
    Columns {
        unexpected: BTreeSet<String>,
        missing: BTreeSet<String>,
    },

    #[error("unexpected or missing key concept. unexpected: {unexpected:?} missing: {missing:?}")]
    KeyConcepts {
        unexpected: BTreeSet<String>,
        missing: BTreeSet<String>,
    },

    #[error("duplicate key concept: {0}")]
    DuplicateKeyConcept(String),

    #[error(transparent)]
    Label(#[from] InvalidLabel),
}

/// Sanitize then validate
pub fn sanitize_and_validate(
    rows: Vec<RawRow>,
    rubric: &Rubric,
) -> Result<LabelSet, ValidationError> {
    validate_rows(sanitize_rows(rows), rubric)
}

/// Trim values and names, drop artifact rows, rename the legacy label column
pub fn sanitize_rows(rows: Vec<RawRow>) -> Vec<RawRow> {
    rows.into_iter()
        .map(sanitize_row)
        .filter(|row| {
            row.get(KEY_CONCEPT_COLUMN)
                .is_none_or(|key| key.chars().next().is_some_and(char::is_alphanumeric))
        })
        .collect()
}

fn sanitize_row(row: RawRow) -> RawRow {
    let mut clean = RawRow::default();
    for (name, value) in row.into_fields() {
        clean.insert(name.trim().to_string(), strip_quotes(&value).to_string());
    }
    if let Some(grade) = clean.remove(LEGACY_LABEL_COLUMN) {
        clean.insert(LABEL_COLUMN.to_string(), grade);
    }
    clean
}

/// Trim whitespace and one layer of double quotes
fn strip_quotes(value: &str) -> &str {
    let value = value.trim();
    let value = value.strip_prefix('"').unwrap_or(value);
    value.strip_suffix('"').unwrap_or(value).trim()
}

/// Check sanitized rows against the expected schema and the rubric
pub fn validate_rows(rows: Vec<RawRow>, rubric: &Rubric) -> Result<LabelSet, ValidationError> {
    for row in &rows {
        check_columns(row)?;
    }

    let response_concepts: BTreeSet<&str> = rows
        .iter()
        .filter_map(|row| row.get(KEY_CONCEPT_COLUMN))
        .collect();
    let rubric_concepts = rubric.key_concept_set();
    if response_concepts != rubric_concepts {
        return Err(ValidationError::KeyConcepts {
            unexpected: difference(&response_concepts, &rubric_concepts),
            missing: difference(&rubric_concepts, &response_concepts),
        });
    }

    let mut seen = BTreeSet::new();
    let mut label_rows = Vec::with_capacity(rows.len());
    for row in rows {
        let field = |name: &str| row.get(name).unwrap_or_default().to_string();
        let key_concept = field(KEY_CONCEPT_COLUMN);
        if !seen.insert(key_concept.clone()) {
            return Err(ValidationError::DuplicateKeyConcept(key_concept));
        }
        let label: EvidenceLabel = field(LABEL_COLUMN).parse()?;
        label_rows.push(LabelRow {
            observations: field(OBSERVATIONS_COLUMN),
            reason: field(REASON_COLUMN),
            evidence: row.get(EVIDENCE_COLUMN).map(str::to_string),
            key_concept,
            label,
        });
    }

    Ok(LabelSet::from_rows(label_rows, rubric))
}

fn check_columns(row: &RawRow) -> Result<(), ValidationError> {
    let names: BTreeSet<&str> = row.field_names().collect();
    let unexpected: BTreeSet<String> = names
        .iter()
        .filter(|name| !EXPECTED_COLUMNS.contains(name) && **name != EVIDENCE_COLUMN)
        .map(|name| name.to_string())
        .collect();
    let missing: BTreeSet<String> = EXPECTED_COLUMNS
        .iter()
        .filter(|name| !names.contains(*name))
        .map(|name| name.to_string())
        .collect();

    if unexpected.is_empty() && missing.is_empty() {
        Ok(())
    } else {
        Err(ValidationError::Columns { unexpected, missing })
    }
}

fn difference(left: &BTreeSet<&str>, right: &BTreeSet<&str>) -> BTreeSet<String> {
    left.difference(right).map(|s| s.to_string()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::rubric::tests::TWO_CRITERIA_RUBRIC;
    use crate::service::response::parser::parse_response;

    fn rubric() -> Rubric {
        Rubric::parse(TWO_CRITERIA_RUBRIC).unwrap()
    }

    fn validate(text: &str) -> Result<LabelSet, ValidationError> {
        sanitize_and_validate(parse_response(text).unwrap(), &rubric())
    }

    const TSV: &str = "Key Concept\tObservations\tLabel\tReason\n\
A\tSaw A\tConvincing Evidence\tBecause A\n\
B\tSaw B\tNo Evidence\tBecause B\n";

    #[test]
    fn test_valid_tsv() {
        let set = validate(TSV).unwrap();
        assert_eq!(set.len(), 2);
        assert_eq!(set.label("A"), Some(EvidenceLabel::Convincing));
        assert_eq!(set.get("B").unwrap().reason, "Because B");
    }

    #[test]
    fn test_same_rows_in_every_table_format() {
        let csv = "Key Concept,Observations,Label,Reason\n\
A,Saw A,Convincing Evidence,Because A\n\
B,Saw B,No Evidence,Because B\n";
        let markdown = "| Key Concept | Observations | Label | Reason |\n\
| --- | --- | --- | --- |\n\
| A | Saw A | Convincing Evidence | Because A |\n\
| B | Saw B | No Evidence | Because B |\n";

        let expected = validate(TSV).unwrap();
        assert_eq!(validate(csv).unwrap(), expected);
        assert_eq!(validate(markdown).unwrap(), expected);
    }

    #[test]
    fn test_rows_come_back_in_rubric_order() {
        let reversed = "Key Concept\tObservations\tLabel\tReason\n\
B\tSaw B\tNo Evidence\tBecause B\n\
A\tSaw A\tConvincing Evidence\tBecause A\n";
        let set = validate(reversed).unwrap();
        let names: Vec<_> = set.iter().map(|r| r.key_concept.as_str()).collect();
        assert_eq!(names, vec!["A", "B"]);
    }

    #[test]
    fn test_renamed_observations_column_rejected() {
        let renamed = TSV.replace("Observations", "Notes");
        let err = validate(&renamed).unwrap_err();
        assert_eq!(
            err,
            ValidationError::Columns {
                unexpected: BTreeSet::from(["Notes".to_string()]),
                missing: BTreeSet::from(["Observations".to_string()]),
            }
        );
        assert_eq!(
            err.to_string(),
            "incorrect column names. unexpected: {\"Notes\"} missing: {\"Observations\"}"
        );
    }

    #[test]
    fn test_missing_key_concept_rejected() {
        let text = "Key Concept\tObservations\tLabel\tReason\nA\tSaw A\tNo Evidence\tBecause A\n";
        let err = validate(text).unwrap_err();
        assert_eq!(
            err,
            ValidationError::KeyConcepts {
                unexpected: BTreeSet::new(),
                missing: BTreeSet::from(["B".to_string()]),
            }
        );
    }

    #[test]
    fn test_unexpected_key_concept_rejected() {
        let text = format!("{TSV}C\tSaw C\tNo Evidence\tBecause C\n");
        let err = validate(&text).unwrap_err();
        assert!(matches!(err, ValidationError::KeyConcepts { ref unexpected, .. } if unexpected.contains("C")));
    }

    #[test]
    fn test_invalid_label_rejected() {
        let text = TSV.replace("Convincing Evidence", "Strong Evidence");
        let err = validate(&text).unwrap_err();
        assert_eq!(err.to_string(), "invalid label value: 'Strong Evidence'");
    }

    #[test]
    fn test_label_case_not_coerced() {
        let text = TSV.replace("No Evidence", "no evidence");
        assert!(matches!(validate(&text), Err(ValidationError::Label(_))));
    }

    #[test]
    fn test_duplicate_key_concept_rejected() {
        let text = format!("{TSV}A\tSaw A again\tLimited Evidence\tBecause\n");
        assert_eq!(
            validate(&text).unwrap_err(),
            ValidationError::DuplicateKeyConcept("A".to_string())
        );
    }

    #[test]
    fn test_schema_checked_before_coverage() {
        let text = "Key Concept\tObservations\tLabel\nA\tSaw A\tNo Evidence\n";
        assert!(matches!(validate(text), Err(ValidationError::Columns { .. })));
    }

    #[test]
    fn test_quotes_whitespace_and_grade_column_sanitized() {
        let text = "Key Concept\t Observations \tGrade\tReason\n\
\"A\"\t  \"Saw A\" \t\"Limited Evidence\"\tBecause A\n\
B\tSaw B\tNo Evidence\tBecause B\n";
        let set = validate(text).unwrap();
        let a = set.get("A").unwrap();
        assert_eq!(a.observations, "Saw A");
        assert_eq!(a.label, EvidenceLabel::Limited);
        assert_eq!(set.get("B").unwrap().reason, "Because B");
    }

    #[test]
    fn test_strip_quotes_removes_one_layer() {
        assert_eq!(strip_quotes("  \"Says \"hi\"\"  "), "Says \"hi\"");
        assert_eq!(strip_quotes("\"\""), "");
        assert_eq!(strip_quotes("plain"), "plain");
    }

    #[test]
    fn test_artifact_rows_pruned() {
        let rows = vec![
            RawRow::from_pairs([("Key Concept", "A"), ("Observations", "o"), ("Label", "No Evidence"), ("Reason", "r")]),
            RawRow::from_pairs([("Key Concept", "---"), ("Observations", "---"), ("Label", "---"), ("Reason", "---")]),
            RawRow::from_pairs([("Key Concept", ""), ("Observations", ""), ("Label", ""), ("Reason", "")]),
            RawRow::from_pairs([("Key Concept", "B"), ("Observations", "o"), ("Label", "No Evidence"), ("Reason", "r")]),
        ];
        let sanitized = sanitize_rows(rows);
        assert_eq!(sanitized.len(), 2);
        assert!(sanitize_and_validate(sanitized, &rubric()).is_ok());
    }

    #[test]
    fn test_optional_evidence_column() {
        let text = "Key Concept\tObservations\tLabel\tReason\tEvidence\n\
A\tSaw A\tConvincing Evidence\tBecause A\tLine 3: sprite\n\
B\tSaw B\tNo Evidence\tBecause B\t\n";
        let set = validate(text).unwrap();
        assert_eq!(set.get("A").unwrap().evidence.as_deref(), Some("Line 3: sprite"));
        assert_eq!(set.get("B").unwrap().evidence.as_deref(), Some(""));
    }

    #[test]
    fn test_surplus_value_reported_as_unexpected_column() {
        let text = "Key Concept\tObservations\tLabel\tReason\n\
A\tSaw A\tConvincing Evidence\tBecause A\toops\n\
B\tSaw B\tNo Evidence\tBecause B\n";
        assert!(matches!(
            validate(text),
            Err(ValidationError::Columns { ref unexpected, .. }) if unexpected.contains("")
        ));
    }
}
