///
/// Move Skip And Limit Before Project
///
/// Projection cost scales with the number of documents touched, and
/// neither $skip nor $limit looks at document contents, so running them
/// first is strictly cheaper and produces the same results. Sweeps right
/// to left, restarting from the tail after each swap so chains like
/// PLL or PLPL fully migrate in a single invocation.
///
#[cfg(test)]
mod test;

use super::Pass;
use crate::stage::Stage;

pub(crate) struct MoveSkipAndLimitBeforeProject;

impl Pass for MoveSkipAndLimitBeforeProject {
    fn name(&self) -> &'static str {
        "moveSkipAndLimitBeforeProject"
    }

    fn apply(&self, stages: Vec<Stage>) -> Vec<Stage> {
        MoveSkipAndLimitBeforeProject::move_skip_and_limit_before_project(stages)
    }
}

impl MoveSkipAndLimitBeforeProject {
    pub(crate) fn move_skip_and_limit_before_project(mut stages: Vec<Stage>) -> Vec<Stage> {
        if stages.is_empty() {
            return stages;
        }
        let mut i = stages.len() - 1;
        while i >= 1 {
            if matches!(stages[i - 1], Stage::Project(_))
                && matches!(stages[i], Stage::Skip(_) | Stage::Limit(_))
            {
                stages.swap(i - 1, i);
                i = stages.len() - 1;
                continue;
            }
            i -= 1;
        }
        stages
    }
}
