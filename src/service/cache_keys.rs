//! Submission ids for grading requests without one
//!
//! The id is a SHA-256 over every input that changes the grade, so a cached
//! response is only reused for an identical request.

use sha2::{Digest, Sha256};

use crate::model::FewShotExample;

/// Inputs that determine a grading result
pub struct SubmissionKey<'a> {
    pub code: &'a str,
    pub rubric: &'a str,
    pub prompt: &'a str,
    pub model: &'a str,
    pub examples: &'a [FewShotExample],
    pub num_responses: u32,
    pub temperature: f32,
    pub feature_criteria: &'a [String],
    pub lesson: Option<&'a str>,
    pub remove_comments: bool,
}

pub fn generate_submission_id(key: &SubmissionKey<'_>) -> String {
    let examples_hash = hash_string(&serde_json::to_string(key.examples).unwrap_or_default());

    let mut criteria: Vec<&str> = key.feature_criteria.iter().map(String::as_str).collect();
    criteria.sort_unstable();

    let key_components = format!(
        "{}|{}|{}|{}|{}|{}|{}|{}|{}|{}",
        hash_string(key.code),
        hash_string(key.rubric),
        hash_string(key.prompt),
        key.model,
        examples_hash,
        key.num_responses,
        key.temperature,
        criteria.join(","),
        key.lesson.unwrap_or("none"),
        key.remove_comments,
    );

    hash_string(&key_components)
}

/// Hash a string to a hex string using SHA256
pub fn hash_string(s: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(s.as_bytes());
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key<'a>(code: &'a str, criteria: &'a [String]) -> SubmissionKey<'a> {
        SubmissionKey {
            code,
            rubric: "rubric",
            prompt: "prompt",
            model: "gpt-4o-2024-05-13",
            examples: &[],
            num_responses: 1,
            temperature: 0.0,
            feature_criteria: criteria,
            lesson: None,
            remove_comments: false,
        }
    }

    #[test]
    fn test_submission_id_is_stable_hex() {
        let id = generate_submission_id(&key("rect(1, 2, 3, 4);", &[]));
        assert_eq!(id.len(), 64);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(id, generate_submission_id(&key("rect(1, 2, 3, 4);", &[])));
    }

    #[test]
    fn test_submission_id_changes_with_inputs() {
        let a = generate_submission_id(&key("rect(1, 2, 3, 4);", &[]));
        let b = generate_submission_id(&key("rect(1, 2, 3, 5);", &[]));
        assert_ne!(a, b);
    }

    #[test]
    fn test_criteria_order_is_insignificant() {
        let first = vec!["A".to_string(), "B".to_string()];
        let second = vec!["B".to_string(), "A".to_string()];
        assert_eq!(
            generate_submission_id(&key("x", &first)),
            generate_submission_id(&key("x", &second))
        );
    }

    #[test]
    fn test_hash_string() {
        assert_eq!(
            hash_string("abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }
}
