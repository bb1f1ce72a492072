///
/// Coalesce Adjacent
///
/// A single left-to-right pass over the stage list, asking each stage in
/// the growing output whether it can absorb the next one: consecutive
/// limits keep the minimum, consecutive skips sum, adjacent matches
/// conjoin, and a sort swallows the limit behind it. Afterwards no two
/// adjacent stages can coalesce further.
///
#[cfg(test)]
mod test;

use super::Pass;
use crate::stage::Stage;

pub(crate) struct CoalesceAdjacent;

impl Pass for CoalesceAdjacent {
    fn name(&self) -> &'static str {
        "coalesceAdjacent"
    }

    fn apply(&self, stages: Vec<Stage>) -> Vec<Stage> {
        CoalesceAdjacent::coalesce_adjacent(stages)
    }
}

impl CoalesceAdjacent {
    pub(crate) fn coalesce_adjacent(stages: Vec<Stage>) -> Vec<Stage> {
        let mut out: Vec<Stage> = Vec::with_capacity(stages.len());
        for next in stages {
            let coalesced = match out.last_mut() {
                Some(last) => last.coalesce(&next),
                None => false,
            };
            if !coalesced {
                out.push(next);
            }
        }
        out
    }
}
