//! Majority vote across several validated samples

use crate::model::{EvidenceLabel, LabelRow, LabelSet};

/// Combine samples into one label set by per-criterion majority vote
///
/// Ties go to the label that appeared first. Observations and evidence come
/// from the first sample that agrees with the winner, the reason from the
/// last one. When the samples disagree the reason is prefixed with the votes.
pub fn consensus(samples: &[LabelSet], submission_id: &str) -> LabelSet {
    let Some(first) = samples.first() else {
        return LabelSet::from_ordered_rows(Vec::new());
    };

    let rows = first
        .iter()
        .map(|row| vote(&row.key_concept, samples, submission_id))
        .collect();

    LabelSet::from_ordered_rows(rows)
}

fn vote(key_concept: &str, samples: &[LabelSet], submission_id: &str) -> LabelRow {
    let agreeing: Vec<&LabelRow> = samples.iter().filter_map(|s| s.get(key_concept)).collect();
    let votes: Vec<EvidenceLabel> = agreeing.iter().map(|row| row.label).collect();
    let winner = majority(&votes);

    if let Some(first) = votes.first()
        && *first != winner
    {
        tracing::info!(
            submission_id = %submission_id,
            key_concept = %key_concept,
            first_label = %first,
            majority_label = %winner,
            "outvoted"
        );
    }

    let with_winner: Vec<&&LabelRow> = agreeing.iter().filter(|row| row.label == winner).collect();
    let first_match = with_winner.first();
    let last_match = with_winner.last();

    LabelRow {
        key_concept: key_concept.to_string(),
        observations: first_match.map(|row| row.observations.clone()).unwrap_or_default(),
        label: winner,
        reason: format!(
            "{}{}",
            vote_annotation(&votes),
            last_match.map(|row| row.reason.as_str()).unwrap_or_default()
        ),
        evidence: first_match.and_then(|row| row.evidence.clone()),
    }
}

/// Most common label, first occurrence wins ties
fn majority(votes: &[EvidenceLabel]) -> EvidenceLabel {
    let mut tally: Vec<(EvidenceLabel, usize)> = Vec::new();
    for label in votes {
        match tally.iter_mut().find(|(l, _)| l == label) {
            Some((_, count)) => *count += 1,
            None => tally.push((*label, 1)),
        }
    }

    let mut best: Option<(EvidenceLabel, usize)> = None;
    for (label, count) in tally {
        if best.is_none_or(|(_, best_count)| count > best_count) {
            best = Some((label, count));
        }
    }
    best.map(|(label, _)| label).unwrap_or(EvidenceLabel::No)
}

/// Empty when every vote agrees
fn vote_annotation(votes: &[EvidenceLabel]) -> String {
    if votes.windows(2).all(|pair| pair[0] == pair[1]) {
        return String::new();
    }
    let joined: Vec<&str> = votes.iter().map(EvidenceLabel::as_str).collect();
    format!("<b>Votes: [{}]</b><br>", joined.join(", "))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Rubric;
    use crate::model::rubric::tests::TWO_CRITERIA_RUBRIC;

    fn sample(a: EvidenceLabel, b: EvidenceLabel, tag: &str) -> LabelSet {
        let rubric = Rubric::parse(TWO_CRITERIA_RUBRIC).unwrap();
        let row = |key: &str, label| LabelRow {
            key_concept: key.to_string(),
            observations: format!("{key} observed in {tag}"),
            label,
            reason: format!("{key} reason from {tag}"),
            evidence: Some(format!("{key} evidence from {tag}")),
        };
        LabelSet::from_rows(vec![row("A", a), row("B", b)], &rubric)
    }

    #[test]
    fn test_majority_with_vote_annotation() {
        use EvidenceLabel::*;
        let samples = vec![
            sample(Limited, No, "s1"),
            sample(Convincing, No, "s2"),
            sample(Convincing, No, "s3"),
        ];

        let result = consensus(&samples, "student-1");
        let a = result.get("A").unwrap();
        assert_eq!(a.label, Convincing);
        assert_eq!(
            a.reason,
            "<b>Votes: [Limited Evidence, Convincing Evidence, Convincing Evidence]</b><br>A reason from s3"
        );
        assert_eq!(a.observations, "A observed in s2");
        assert_eq!(a.evidence.as_deref(), Some("A evidence from s2"));

        let b = result.get("B").unwrap();
        assert_eq!(b.label, No);
        assert_eq!(b.reason, "B reason from s3");
        assert_eq!(b.observations, "B observed in s1");
    }

    #[test]
    fn test_full_agreement_has_no_annotation() {
        use EvidenceLabel::*;
        let samples = vec![
            sample(Extensive, Limited, "s1"),
            sample(Extensive, Limited, "s2"),
            sample(Extensive, Limited, "s3"),
        ];
        let result = consensus(&samples, "student-2");
        assert!(result.iter().all(|row| !row.reason.contains("Votes")));
        assert_eq!(result.get("A").unwrap().reason, "A reason from s3");
    }

    #[test]
    fn test_tie_goes_to_first_seen_label() {
        use EvidenceLabel::*;
        let samples = vec![sample(Limited, No, "s1"), sample(Convincing, Extensive, "s2")];
        let result = consensus(&samples, "student-3");
        assert_eq!(result.label("A"), Some(Limited));
        assert_eq!(result.label("B"), Some(No));
        assert_eq!(
            result.get("A").unwrap().reason,
            "<b>Votes: [Limited Evidence, Convincing Evidence]</b><br>A reason from s1"
        );
    }

    #[test]
    fn test_later_tie_does_not_displace_earlier_label() {
        use EvidenceLabel::*;
        let votes = [No, Limited, Limited, No];
        assert_eq!(majority(&votes), No);
    }

    #[test]
    fn test_rubric_order_preserved() {
        use EvidenceLabel::*;
        let samples = vec![sample(No, No, "s1"), sample(No, Limited, "s2")];
        let names: Vec<_> = consensus(&samples, "student-4")
            .iter()
            .map(|row| row.key_concept.clone())
            .collect();
        assert_eq!(names, vec!["A", "B"]);
    }
}
