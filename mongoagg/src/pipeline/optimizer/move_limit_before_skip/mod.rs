
use super::Pass;
use crate::stage::Stage;

pub(crate) struct MoveLimitBeforeSkip;

impl Pass for MoveLimitBeforeSkip {
    fn name(&self) -> &'static str {
        "moveLimitBeforeSkip"
    }

    fn apply(&self, stages: Vec<Stage>) -> Vec<Stage> {
        MoveLimitBeforeSkip::move_limit_before_skip(stages)
    }
}

impl MoveLimitBeforeSkip {
    pub(crate) fn move_limit_before_skip(mut stages: Vec<Stage>) -> Vec<Stage> {
        if stages.is_empty() {
            return stages;
        }
        let mut i = stages.len() - 1;
        while i >= 1 {
            if let (Stage::Skip(skip), Stage::Limit(limit)) = (&stages[i - 1], &stages[i]) {
                // The skipped documents now pass through the limit, so the
                // bound grows by the skip amount.
                let (skip, limit) = (*skip, *limit);
                stages[i - 1] = Stage::Limit(limit.saturating_add(skip));
                stages[i] = Stage::Skip(skip);
                i = stages.len() - 1;
                continue;
            }
            i -= 1;
        }
        stages
    }
}
