//! Splits a locally-optimized pipeline into a shard half and a merger
//! half. The merger is the input pipeline mutated in place; the shard
//! half is new and shares the same context. The three steps run in
//! order: later ones depend on the shapes earlier ones leave behind.


use crate::{
    deps::{DepsStatus, DepsTracker},
    pipeline::Pipeline,
    stage::{ProjectStage, Stage},
};
use std::sync::Arc;
use tracing::debug;

pub(crate) fn split_for_sharded(merger: &mut Pipeline) -> Pipeline {
    // Work starts fully assigned to the merger and migrates shardward.
    let mut shard = Pipeline::new(Vec::new(), Arc::clone(&merger.ctx), merger.explain);

    find_split_point(&mut shard, merger);
    move_final_unwind_from_shards_to_merger(&mut shard, merger);
    limit_fields_sent_from_shards_to_merger(&mut shard, merger);

    debug!(
        shard_stages = shard.stages.len(),
        merger_stages = merger.stages.len(),
        "split pipeline for sharded execution"
    );
    shard
}

/// Walks stages off the front of the merger. Unsplittable stages run
/// wholly on the shards; the first splittable stage contributes its two
/// halves and ends the walk.
fn find_split_point(shard: &mut Pipeline, merger: &mut Pipeline) {
    while !merger.stages.is_empty() {
        let current = merger.stages.remove(0);
        if !current.is_splittable() {
            shard.stages.push(current);
            continue;
        }
        let (shard_part, merger_part) = current.split_for_sharded();
        if let Some(stage) = shard_part {
            shard.stages.push(stage);
        }
        if let Some(stage) = merger_part {
            merger.stages.insert(0, stage);
        }
        break;
    }
}

/// Trailing unwinds inflate the payload every shard sends over the wire;
/// running them after the merge is free and order-preserving.
fn move_final_unwind_from_shards_to_merger(shard: &mut Pipeline, merger: &mut Pipeline) {
    while matches!(shard.stages.last(), Some(Stage::Unwind(_))) {
        let unwind = shard.stages.pop().expect("checked non-empty");
        merger.stages.insert(0, unwind);
    }
}

/// Appends a projection to the shard half covering exactly what the
/// merger demands, so shards never ship fields nobody reads.
fn limit_fields_sent_from_shards_to_merger(shard: &mut Pipeline, merger: &mut Pipeline) {
    let mut merge_deps = merger.get_dependencies(&shard.get_initial_query());
    if merge_deps.need_whole_document {
        return; // the merger needs everything; nothing to trim
    }

    // An empty projection is special-cased by the wire format, so a
    // merger that needs nothing still asks for _id.
    if merge_deps.fields.is_empty() {
        merge_deps.fields.insert("_id".to_string());
    }

    // Metadata flows with the stream implicitly; projecting it would
    // re-materialize it as a field.
    merge_deps.need_text_score = false;

    // HEURISTIC: skip the projection when any shard stage already has an
    // exhaustive field list. A $project or $group there has already cut
    // the stream down, and stacking another projection on top only buys
    // a deep copy. When no such stage exists (say a $sort before the
    // first $project) the shards would otherwise ship whole documents.
    for stage in &shard.stages {
        let mut ignored = DepsTracker::default();
        if stage
            .dependencies(&mut ignored)
            .contains(DepsStatus::EXHAUSTIVE_FIELDS)
        {
            return;
        }
    }

    shard
        .stages
        .push(Stage::Project(ProjectStage::for_fields(&merge_deps.fields)));
}
