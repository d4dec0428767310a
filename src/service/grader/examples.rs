//! Few-shot example checks
//!
//! An example whose label table names other criteria than the rubric would
//! teach the model the wrong table, so it is rejected before any LLM call.

use std::collections::BTreeSet;

use crate::model::rubric::KEY_CONCEPT_COLUMN;
use crate::model::{FewShotExample, ResponseType, Rubric};
use crate::service::grader::GradeError;
use crate::service::response::parse_response_as;

pub fn validate_examples(
    examples: &[FewShotExample],
    rubric: &Rubric,
    response_type: ResponseType,
) -> Result<(), GradeError> {
    let expected: BTreeSet<String> = rubric.key_concepts().map(str::to_string).collect();

    for (index, example) in examples.iter().enumerate() {
        let rows = parse_response_as(&example.response, response_type).map_err(|e| {
            GradeError::InvalidExample {
                index,
                reason: e.to_string(),
            }
        })?;

        let found: BTreeSet<String> = rows
            .iter()
            .filter_map(|row| row.get(KEY_CONCEPT_COLUMN))
            .map(|name| name.trim().to_string())
            .filter(|name| !name.is_empty())
            .collect();

        if found != expected {
            let unexpected: BTreeSet<String> = found.difference(&expected).cloned().collect();
            let missing: BTreeSet<String> = expected.difference(&found).cloned().collect();
            tracing::error!(
                example = index,
                unexpected = ?unexpected,
                missing = ?missing,
                "Mismatch between rubric and example key concepts"
            );
            return Err(GradeError::KeyConceptMismatch {
                index,
                unexpected,
                missing,
            });
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::rubric::tests::TWO_CRITERIA_RUBRIC;

    fn example(response: &str) -> FewShotExample {
        FewShotExample {
            code: "rect(1, 2, 3, 4);".to_string(),
            response: response.to_string(),
        }
    }

    #[test]
    fn test_matching_tsv_example() {
        let rubric = Rubric::parse(TWO_CRITERIA_RUBRIC).unwrap();
        let examples = [example(
            "Key Concept\tObservations\tLabel\tReason\nB\to\tNo Evidence\tr\nA\to\tNo Evidence\tr\n",
        )];
        assert!(validate_examples(&examples, &rubric, ResponseType::Tsv).is_ok());
    }

    #[test]
    fn test_matching_json_example() {
        let rubric = Rubric::parse(TWO_CRITERIA_RUBRIC).unwrap();
        let examples = [example(
            r#"[{"Key Concept": "A", "Label": "No Evidence"}, {"Key Concept": "B", "Label": "No Evidence"}]"#,
        )];
        assert!(validate_examples(&examples, &rubric, ResponseType::Json).is_ok());
    }

    #[test]
    fn test_mismatched_example() {
        let rubric = Rubric::parse(TWO_CRITERIA_RUBRIC).unwrap();
        let examples = [
            example("Key Concept\tLabel\nA\tNo Evidence\nB\tNo Evidence\n"),
            example("Key Concept\tLabel\nA\tNo Evidence\nC\tNo Evidence\n"),
        ];
        let err = validate_examples(&examples, &rubric, ResponseType::Tsv).unwrap_err();
        match err {
            GradeError::KeyConceptMismatch {
                index,
                unexpected,
                missing,
            } => {
                assert_eq!(index, 1);
                assert_eq!(unexpected, BTreeSet::from(["C".to_string()]));
                assert_eq!(missing, BTreeSet::from(["B".to_string()]));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_unreadable_example() {
        let rubric = Rubric::parse(TWO_CRITERIA_RUBRIC).unwrap();
        let err = validate_examples(&[example("  ")], &rubric, ResponseType::Tsv).unwrap_err();
        assert!(matches!(err, GradeError::InvalidExample { index: 0, .. }));
    }
}
