//! Normalization of model responses into validated label sets
//!
//! Parsing and validation run once per sampled choice; consensus combines
//! whichever choices survive.

pub mod consensus;
pub mod error;
pub mod parser;
pub mod validation;

pub use consensus::consensus;
pub use error::ResponseError;
pub use parser::{ParseError, RawRow, parse_response, parse_response_as};
pub use validation::{ValidationError, sanitize_and_validate};

use crate::model::{LabelSet, ResponseType, Rubric};

/// Parse, sanitize and validate one model response
pub fn label_set_from_text(
    text: &str,
    rubric: &Rubric,
    response_type: ResponseType,
) -> Result<LabelSet, ResponseError> {
    let rows = parse_response_as(text, response_type)?;
    Ok(sanitize_and_validate(rows, rubric)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::rubric::tests::TWO_CRITERIA_RUBRIC;

    #[test]
    fn test_structural_and_validation_failures_are_distinct() {
        let rubric = Rubric::parse(TWO_CRITERIA_RUBRIC).unwrap();

        let err = label_set_from_text("", &rubric, ResponseType::Tsv).unwrap_err();
        assert!(err.is_structural());

        let err = label_set_from_text(
            "Key Concept\tObservations\tLabel\tReason\nA\to\tNo Evidence\tr\n",
            &rubric,
            ResponseType::Tsv,
        )
        .unwrap_err();
        assert!(!err.is_structural());
        assert!(err.to_string().starts_with("unexpected or missing key concept"));
    }

    #[test]
    fn test_json_response_end_to_end() {
        let rubric = Rubric::parse(TWO_CRITERIA_RUBRIC).unwrap();
        let text = r#"[
            {"Key Concept": "A", "Observations": "Saw A", "Grade": "Extensive Evidence", "Reason": "r", "Evidence": "Line 2: A"},
            {"Key Concept": "B", "Observations": "Saw B", "Label": "Limited Evidence", "Reason": "r"}
        ]"#;
        let set = label_set_from_text(text, &rubric, ResponseType::Json).unwrap();
        assert_eq!(set.label("A"), Some(crate::model::EvidenceLabel::Extensive));
        assert_eq!(set.get("A").unwrap().evidence.as_deref(), Some("Line 2: A"));
        assert_eq!(set.get("B").unwrap().evidence, None);
    }
}
