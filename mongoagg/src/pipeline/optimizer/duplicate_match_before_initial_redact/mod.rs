///
/// Duplicate Match Before Initial Redact
///
/// When a pipeline opens with $redact followed by $match, the match's
/// redact-safe portion evaluates identically against the raw document.
/// Prepending it as a fresh stage lets the producer satisfy it with an
/// index and shrinks the redact's workload. The original match stays:
/// its unsafe remainder still has to run after redaction.
///
#[cfg(test)]
mod test;

use super::Pass;
use crate::stage::{match_stage, MatchStage, Stage};

pub(crate) struct DuplicateMatchBeforeInitialRedact;

impl Pass for DuplicateMatchBeforeInitialRedact {
    fn name(&self) -> &'static str {
        "duplicateMatchBeforeInitialRedact"
    }

    fn apply(&self, stages: Vec<Stage>) -> Vec<Stage> {
        DuplicateMatchBeforeInitialRedact::duplicate_match_before_initial_redact(stages)
    }
}

impl DuplicateMatchBeforeInitialRedact {
    pub(crate) fn duplicate_match_before_initial_redact(mut stages: Vec<Stage>) -> Vec<Stage> {
        if let (Some(Stage::Redact(_)), Some(Stage::Match(m))) = (stages.first(), stages.get(1)) {
            let portion = match_stage::redact_safe_portion(&m.predicate);
            if !portion.is_empty() {
                stages.insert(0, Stage::Match(MatchStage { predicate: portion }));
            }
        }
        stages
    }
}
