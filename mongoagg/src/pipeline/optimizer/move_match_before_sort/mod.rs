///
/// Move Match Before Sort
///
/// A filter in front of a sort shrinks the sort's input, and a match
/// never observes document order, so the swap is an identity. Text
/// matches stay put: they must see the stream their producer created.
/// One left-to-right sweep, so a match hops at most one sort per
/// optimization round.
///
// TODO keep moving matches across multiple sorts the way
// move_limit_before_skip restarts from the tail.
#[cfg(test)]
mod test;

use super::Pass;
use crate::stage::{match_stage, Stage};

pub(crate) struct MoveMatchBeforeSort;

impl Pass for MoveMatchBeforeSort {
    fn name(&self) -> &'static str {
        "moveMatchBeforeSort"
    }

    fn apply(&self, stages: Vec<Stage>) -> Vec<Stage> {
        MoveMatchBeforeSort::move_match_before_sort(stages)
    }
}

impl MoveMatchBeforeSort {
    pub(crate) fn move_match_before_sort(mut stages: Vec<Stage>) -> Vec<Stage> {
        for i in 1..stages.len() {
            let swappable = matches!(
                (&stages[i - 1], &stages[i]),
                (Stage::Sort(_), Stage::Match(m)) if !match_stage::is_text_query(&m.predicate)
            );
            if swappable {
                stages.swap(i - 1, i);
            }
        }
        stages
    }
}
