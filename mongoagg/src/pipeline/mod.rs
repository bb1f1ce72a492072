//! The pipeline: an ordered stage sequence plus its shared request
//! context. Construction happens in the parser; this module owns the
//! rewrite driver, the dependency analyzer, shard splitting, and the
//! serialized command form.

pub mod optimizer;
pub mod sharded;


use crate::{
    context::ExpressionContext,
    deps::{DepsStatus, DepsTracker},
    exec::{self, DocumentSource, RunEnvironment},
    namespace::Namespace,
    stage::{match_stage, Stage},
};
use bson::{Bson, Document};
use itertools::Itertools;
use std::sync::Arc;
use tracing::debug;

#[derive(Debug, Clone, PartialEq)]
pub struct Pipeline {
    stages: Vec<Stage>,
    ctx: Arc<ExpressionContext>,
    explain: bool,
}

impl Pipeline {
    pub fn new(stages: Vec<Stage>, ctx: Arc<ExpressionContext>, explain: bool) -> Self {
        Pipeline {
            stages,
            ctx,
            explain,
        }
    }

    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    pub fn ctx(&self) -> &ExpressionContext {
        &self.ctx
    }

    pub fn is_explain(&self) -> bool {
        self.explain
    }

    /// Inserts a stage at the front. Used by callers that materialize an
    /// input cursor as a stage, and by the shard splitter.
    pub fn prepend_stage(&mut self, stage: Stage) {
        self.stages.insert(0, stage);
    }

    /// Applies the local rewrite passes. Idempotent: a second invocation
    /// leaves the pipeline unchanged.
    pub fn optimize(&mut self) {
        let stages = std::mem::take(&mut self.stages);
        self.stages = optimizer::optimize_stages(stages);
    }

    /// Splits this pipeline for distributed execution. `self` becomes the
    /// merger half and the returned pipeline is the shard half; both share
    /// the same context.
    pub fn split_for_sharded(&mut self) -> Pipeline {
        sharded::split_for_sharded(self)
    }

    /// Computes the field and metadata demand of this pipeline given the
    /// predicate its producer will serve it with. Conservative: without an
    /// exhaustive report the producer must supply whole documents.
    pub fn get_dependencies(&self, initial_query: &Document) -> DepsTracker {
        let mut deps = DepsTracker::default();
        let mut know_all_fields = false;
        let mut know_all_meta = false;
        for stage in &self.stages {
            if know_all_fields && know_all_meta {
                break;
            }
            let mut local = DepsTracker::default();
            let status = stage.dependencies(&mut local);
            if status.contains(DepsStatus::NOT_SUPPORTED) {
                // The analyzer cannot see past this stage. Whatever was
                // learned from exhaustive stages before it still holds.
                break;
            }
            if !know_all_fields {
                deps.fields.extend(local.fields);
                if local.need_whole_document {
                    deps.need_whole_document = true;
                }
                know_all_fields = status.contains(DepsStatus::EXHAUSTIVE_FIELDS);
            }
            if !know_all_meta {
                if local.need_text_score {
                    deps.need_text_score = true;
                }
                know_all_meta = status.contains(DepsStatus::EXHAUSTIVE_META);
            }
        }
        if !know_all_fields {
            deps.need_whole_document = true;
        }
        // The text score only exists when the producing query is itself a
        // text query; otherwise asking for it is pointless.
        if match_stage::is_text_query(initial_query) {
            if !know_all_meta {
                deps.need_text_score = true;
            }
        } else {
            deps.need_text_score = false;
        }
        deps
    }

    /// The predicate of a leading `$match`, exposed so the caller can push
    /// it into the input cursor. Empty when the pipeline starts elsewhere.
    pub fn get_initial_query(&self) -> Document {
        match self.stages.first() {
            Some(Stage::Match(m)) => m.predicate.clone(),
            _ => Document::new(),
        }
    }

    /// Collections other than the input namespace any stage reads, with
    /// duplicates removed. The caller uses this for lock acquisition.
    pub fn get_involved_collections(&self) -> Vec<Namespace> {
        self.stages
            .iter()
            .flat_map(|stage| stage.involved_collections(&self.ctx.ns.db))
            .unique()
            .collect()
    }

    pub fn needs_primary_shard_merger(&self) -> bool {
        self.stages.iter().any(Stage::needs_primary_shard)
    }

    /// The command-shaped document form of this pipeline. Flags appear
    /// only when set, and every stage re-parses to an equivalent stage.
    pub fn serialize(&self) -> Document {
        let mut array = Vec::new();
        for stage in &self.stages {
            stage.serialize_to_array(&mut array, false);
        }
        let mut serialized = Document::new();
        serialized.insert("aggregate", self.ctx.ns.collection.clone());
        serialized.insert("pipeline", array);
        if self.explain {
            serialized.insert("explain", true);
        }
        if self.ctx.allow_disk_use {
            serialized.insert("allowDiskUse", true);
        }
        if self.ctx.bypass_document_validation {
            serialized.insert("bypassDocumentValidation", true);
        }
        serialized
    }

    /// The verbose explain form of the stage list.
    pub fn write_explain_ops(&self) -> Vec<Bson> {
        let mut array = Vec::new();
        for stage in &self.stages {
            stage.serialize_to_array(&mut array, true);
        }
        array
    }

    /// Stitches the stages over `input` and drains the chain into a
    /// `{ result: [...] }` document, enforcing the result size bound.
    pub fn run(
        &self,
        input: Option<Box<dyn DocumentSource>>,
        env: &RunEnvironment,
    ) -> exec::Result<Document> {
        debug!(ns = %self.ctx.ns, stages = self.stages.len(), "running pipeline");
        exec::run(self, input, env)
    }
}
