
use super::Pass;
use crate::stage::Stage;

pub(crate) struct OptimizeEachStage;

impl Pass for OptimizeEachStage {
    fn name(&self) -> &'static str {
        "optimizeEachDocumentSource"
    }

    fn apply(&self, stages: Vec<Stage>) -> Vec<Stage> {
        OptimizeEachStage::optimize_each_stage(stages)
    }
}

impl OptimizeEachStage {
    pub(crate) fn optimize_each_stage(stages: Vec<Stage>) -> Vec<Stage> {
        stages.into_iter().filter_map(Stage::optimize).collect()
    }
}
