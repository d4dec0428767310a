//! Rubric model
//!
//! A rubric is a CSV table with one row per criterion ("Key Concept") and one
//! column per evidence level describing what that level looks like.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Column holding the criterion name, in rubrics and in label responses
pub const KEY_CONCEPT_COLUMN: &str = "Key Concept";

/// The four ordinal evidence levels, strongest first
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EvidenceLabel {
    #[serde(rename = "Extensive Evidence")]
    Extensive,
    #[serde(rename = "Convincing Evidence")]
    Convincing,
    #[serde(rename = "Limited Evidence")]
    Limited,
    #[serde(rename = "No Evidence")]
    No,
}

impl EvidenceLabel {
    pub const ALL: [EvidenceLabel; 4] = [
        EvidenceLabel::Extensive,
        EvidenceLabel::Convincing,
        EvidenceLabel::Limited,
        EvidenceLabel::No,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EvidenceLabel::Extensive => "Extensive Evidence",
            EvidenceLabel::Convincing => "Convincing Evidence",
            EvidenceLabel::Limited => "Limited Evidence",
            EvidenceLabel::No => "No Evidence",
        }
    }

    /// Extensive and Convincing count as a pass when labels are collapsed
    pub fn is_passing(&self) -> bool {
        matches!(self, EvidenceLabel::Extensive | EvidenceLabel::Convincing)
    }
}

impl fmt::Display for EvidenceLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when a string is not one of the four canonical labels
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid label value: '{0}'")]
pub struct InvalidLabel(pub String);

impl FromStr for EvidenceLabel {
    type Err = InvalidLabel;

    /// Exact match only. Case or spelling variants are rejected, never coerced.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EvidenceLabel::ALL
            .into_iter()
            .find(|label| label.as_str() == s)
            .ok_or_else(|| InvalidLabel(s.to_string()))
    }
}

/// One rubric criterion and its level descriptions
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Criterion {
    pub key_concept: String,
    pub extensive: String,
    pub convincing: String,
    pub limited: String,
    pub no_evidence: String,
}

impl Criterion {
    pub fn description(&self, label: EvidenceLabel) -> &str {
        match label {
            EvidenceLabel::Extensive => &self.extensive,
            EvidenceLabel::Convincing => &self.convincing,
            EvidenceLabel::Limited => &self.limited,
            EvidenceLabel::No => &self.no_evidence,
        }
    }
}

#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum RubricError {
    #[error("Failed to read rubric: {0}")]
    Csv(#[from] csv::Error),

    #[error("Rubric is missing required columns: {0:?}")]
    MissingColumns(Vec<String>),

    #[error("Rubric defines key concept more than once: {0}")]
    DuplicateKeyConcept(String),

    #[error("Rubric contains no criteria")]
    Empty,
}

/// Parsed rubric. Keeps the source text because prompts embed it verbatim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rubric {
    criteria: Vec<Criterion>,
    source: String,
}

impl Rubric {
    /// Parse a CSV rubric with a header row
    ///
    /// Column order does not matter and extra columns are ignored, but the
    /// key concept column and all four level columns must be present.
    pub fn parse(text: &str) -> Result<Self, RubricError> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .trim(csv::Trim::All)
            .from_reader(text.as_bytes());

        let headers = reader.headers()?.clone();
        let position = |name: &str| headers.iter().position(|h| h == name);

        let required = [
            KEY_CONCEPT_COLUMN,
            EvidenceLabel::Extensive.as_str(),
            EvidenceLabel::Convincing.as_str(),
            EvidenceLabel::Limited.as_str(),
            EvidenceLabel::No.as_str(),
        ];
        let missing: Vec<String> = required
            .iter()
            .filter(|name| position(name).is_none())
            .map(|name| name.to_string())
            .collect();
        if !missing.is_empty() {
            return Err(RubricError::MissingColumns(missing));
        }

        // All present, checked above
        let columns: Vec<usize> = required.iter().filter_map(|name| position(name)).collect();
        let cell = |record: &csv::StringRecord, column: usize| {
            record.get(column).unwrap_or_default().to_string()
        };

        let mut criteria: Vec<Criterion> = Vec::new();
        for record in reader.records() {
            let record = record?;
            let key_concept = cell(&record, columns[0]);
            if key_concept.is_empty() {
                continue;
            }
            if criteria.iter().any(|c| c.key_concept == key_concept) {
                return Err(RubricError::DuplicateKeyConcept(key_concept));
            }
            criteria.push(Criterion {
                key_concept,
                extensive: cell(&record, columns[1]),
                convincing: cell(&record, columns[2]),
                limited: cell(&record, columns[3]),
                no_evidence: cell(&record, columns[4]),
            });
        }

        if criteria.is_empty() {
            return Err(RubricError::Empty);
        }

        Ok(Self {
            criteria,
            source: text.to_string(),
        })
    }

    pub fn criteria(&self) -> &[Criterion] {
        &self.criteria
    }

    pub fn criterion(&self, key_concept: &str) -> Option<&Criterion> {
        self.criteria.iter().find(|c| c.key_concept == key_concept)
    }

    /// Criterion names in rubric order
    pub fn key_concepts(&self) -> impl Iterator<Item = &str> {
        self.criteria.iter().map(|c| c.key_concept.as_str())
    }

    pub fn key_concept_set(&self) -> BTreeSet<&str> {
        self.key_concepts().collect()
    }

    pub fn contains(&self, key_concept: &str) -> bool {
        self.criterion(key_concept).is_some()
    }

    /// Position of a criterion in rubric order
    pub fn index_of(&self, key_concept: &str) -> Option<usize> {
        self.criteria.iter().position(|c| c.key_concept == key_concept)
    }

    pub fn len(&self) -> usize {
        self.criteria.len()
    }

    pub fn is_empty(&self) -> bool {
        self.criteria.is_empty()
    }

    /// Original rubric text
    pub fn as_str(&self) -> &str {
        &self.source
    }
}

impl FromStr for Rubric {
    type Err = RubricError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Rubric::parse(s)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) const TWO_CRITERIA_RUBRIC: &str = "\
Key Concept,Instructions,Extensive Evidence,Convincing Evidence,Limited Evidence,No Evidence
A,Look at A,A is everywhere,A is there,A is barely there,No A
B,Look at B,B is everywhere,B is there,B is barely there,No B
";

    #[test]
    fn test_parse_rubric() {
        let rubric = Rubric::parse(TWO_CRITERIA_RUBRIC).unwrap();
        assert_eq!(rubric.len(), 2);
        assert_eq!(rubric.key_concepts().collect::<Vec<_>>(), vec!["A", "B"]);
        assert_eq!(
            rubric.criterion("B").unwrap().description(EvidenceLabel::Limited),
            "B is barely there"
        );
        assert_eq!(rubric.as_str(), TWO_CRITERIA_RUBRIC);
    }

    #[test]
    fn test_column_order_is_insignificant() {
        let text = "\
No Evidence,Limited Evidence,Key Concept,Convincing Evidence,Extensive Evidence
none,some,Only,most,all
";
        let rubric = Rubric::parse(text).unwrap();
        let criterion = rubric.criterion("Only").unwrap();
        assert_eq!(criterion.extensive, "all");
        assert_eq!(criterion.no_evidence, "none");
    }

    #[test]
    fn test_missing_level_column() {
        let text = "Key Concept,Extensive Evidence,Convincing Evidence,No Evidence\nA,a,b,c\n";
        let err = Rubric::parse(text).unwrap_err();
        assert!(matches!(err, RubricError::MissingColumns(ref cols) if cols == &["Limited Evidence"]));
    }

    #[test]
    fn test_duplicate_key_concept() {
        let text = "\
Key Concept,Extensive Evidence,Convincing Evidence,Limited Evidence,No Evidence
A,a,b,c,d
A,e,f,g,h
";
        assert!(matches!(
            Rubric::parse(text),
            Err(RubricError::DuplicateKeyConcept(ref name)) if name == "A"
        ));
    }

    #[test]
    fn test_header_only_rubric_is_empty() {
        let text = "Key Concept,Extensive Evidence,Convincing Evidence,Limited Evidence,No Evidence\n";
        assert!(matches!(Rubric::parse(text), Err(RubricError::Empty)));
    }

    #[test]
    fn test_label_parsing_is_exact() {
        assert_eq!(
            "Convincing Evidence".parse::<EvidenceLabel>().unwrap(),
            EvidenceLabel::Convincing
        );
        assert!("convincing evidence".parse::<EvidenceLabel>().is_err());
        assert!("Convincing".parse::<EvidenceLabel>().is_err());
        let err = "Great".parse::<EvidenceLabel>().unwrap_err();
        assert_eq!(err.to_string(), "invalid label value: 'Great'");
    }

    #[test]
    fn test_passing_labels() {
        let passing: Vec<_> = EvidenceLabel::ALL.into_iter().filter(|l| l.is_passing()).collect();
        assert_eq!(passing, vec![EvidenceLabel::Extensive, EvidenceLabel::Convincing]);
    }
}
