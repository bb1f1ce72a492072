//! The local rewrite passes. The order in which they run has significant
//! impact on the shape of the final pipeline and later passes rely on the
//! invariants earlier ones establish. Be careful!

mod coalesce_adjacent;
mod duplicate_match_before_initial_redact;
mod move_limit_before_skip;
mod move_match_before_sort;
mod move_skip_and_limit_before_project;
mod optimize_each_stage;

pub(crate) use coalesce_adjacent::CoalesceAdjacent;
pub(crate) use duplicate_match_before_initial_redact::DuplicateMatchBeforeInitialRedact;
pub(crate) use move_limit_before_skip::MoveLimitBeforeSkip;
pub(crate) use move_match_before_sort::MoveMatchBeforeSort;
pub(crate) use move_skip_and_limit_before_project::MoveSkipAndLimitBeforeProject;
pub(crate) use optimize_each_stage::OptimizeEachStage;

use crate::stage::Stage;
use tracing::debug;

/// An infallible rewrite over the stage list. Passes preserve result
/// semantics; they only ever reduce or reorder work.
pub(crate) trait Pass {
    fn name(&self) -> &'static str;
    fn apply(&self, stages: Vec<Stage>) -> Vec<Stage>;
}

// Passes must be listed in the order they are applied.
static PASSES: fn() -> Vec<Box<dyn Pass>> = || {
    vec![
        Box::new(MoveMatchBeforeSort),
        Box::new(MoveSkipAndLimitBeforeProject),
        Box::new(MoveLimitBeforeSkip),
        Box::new(CoalesceAdjacent),
        Box::new(OptimizeEachStage),
        Box::new(DuplicateMatchBeforeInitialRedact),
    ]
};

pub(crate) fn optimize_stages(stages: Vec<Stage>) -> Vec<Stage> {
    PASSES().into_iter().fold(stages, |stages, pass| {
        let out = pass.apply(stages);
        debug!(pass = pass.name(), stages = out.len(), "applied local rewrite pass");
        out
    })
}
