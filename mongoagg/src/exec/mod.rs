//! Pull-based execution. `stitch` turns a pipeline's stage list into a
//! chain of cursors, each drawing from the one before it; `run` drains
//! the chain into a result document. Execution is single-threaded and
//! cooperative: every cursor checks the interrupt flag before touching
//! its source.
//!
//! Stages whose evaluation belongs to outer layers (`$redact`'s
//! expression language, `$out`'s writes, opaque stages) refuse to
//! stitch rather than silently passing documents through.

mod expression;


pub(crate) use expression::{evaluate, get_path, insert_path, remove_path, value_cmp, value_eq};

use crate::{
    namespace::Namespace,
    options::RESULT_HEADER_RESERVE_BYTES,
    pipeline::Pipeline,
    stage::{
        AccumulatorFunction, GroupStage, LookupStage, ProjectItem, ProjectStage, SortDirection,
        SortStage, Stage, UnwindStage,
    },
    usererror::UserError,
};
use bson::{doc, Bson, Document};
use linked_hash_map::LinkedHashMap;
use std::{
    collections::VecDeque,
    rc::Rc,
    sync::{
        atomic::{AtomicBool, Ordering as AtomicOrdering},
        Arc,
    },
};
use thiserror::Error as ThisError;
use tracing::debug;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, ThisError, PartialEq)]
pub enum Error {
    #[error("should not have an empty pipeline")]
    EmptyPipeline,
    #[error("pipeline requires an input cursor")]
    MissingInputCursor,
    #[error("aggregation result exceeds maximum document size ({0}MB)")]
    ResultTooLarge(usize),
    #[error("operation was interrupted")]
    Interrupted,
    #[error("explained pipelines cannot be run")]
    ExplainNotRunnable,
    #[error("stage {0} cannot be executed in this process")]
    UnsupportedStage(String),
    #[error("match operator {0} cannot be executed in this process")]
    UnsupportedMatch(String),
    #[error("collection {0} is not available to this pipeline")]
    CollectionUnavailable(String),
    #[error("value at end of $unwind field path '{0}' must be an array")]
    UnwindNotArray(String),
    #[error("failed to serialize result document: {0}")]
    ResultSerialization(String),
}

impl UserError for Error {
    fn code(&self) -> u32 {
        match self {
            Error::EmptyPipeline => 16600,
            Error::MissingInputCursor => 16625,
            Error::ResultTooLarge(_) => 16389,
            Error::Interrupted => 11601,
            Error::ExplainNotRunnable => 16996,
            Error::UnsupportedStage(_) => 16997,
            Error::UnsupportedMatch(_) => 16998,
            Error::CollectionUnavailable(_) => 16999,
            Error::UnwindNotArray(_) => 15978,
            Error::ResultSerialization(_) => 17001,
        }
    }
}

/// One stage's pull interface: produce the next document or signal
/// exhaustion.
pub trait DocumentSource {
    fn get_next(&mut self) -> Result<Option<Document>>;
}

/// Cooperative cancellation flag supplied by the caller's operation
/// context. Cloning shares the flag.
#[derive(Debug, Clone, Default)]
pub struct InterruptHandle(Arc<AtomicBool>);

impl InterruptHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn interrupt(&self) {
        self.0.store(true, AtomicOrdering::Relaxed);
    }

    pub fn is_interrupted(&self) -> bool {
        self.0.load(AtomicOrdering::Relaxed)
    }

    fn check(&self) -> Result<()> {
        if self.is_interrupted() {
            Err(Error::Interrupted)
        } else {
            Ok(())
        }
    }
}

/// Read access to collections a stage joins against. Implemented by the
/// embedder; execution never reaches storage on its own.
pub trait CollectionProvider {
    fn collection(&self, ns: &Namespace) -> Result<Vec<Document>>;
}

/// A provider for callers whose pipelines touch no foreign collections.
pub struct NoCollections;

impl CollectionProvider for NoCollections {
    fn collection(&self, ns: &Namespace) -> Result<Vec<Document>> {
        Err(Error::CollectionUnavailable(ns.ns()))
    }
}

pub struct RunEnvironment {
    pub interrupt: InterruptHandle,
    pub collections: Rc<dyn CollectionProvider>,
}

impl Default for RunEnvironment {
    fn default() -> Self {
        RunEnvironment {
            interrupt: InterruptHandle::new(),
            collections: Rc::new(NoCollections),
        }
    }
}

/// An input cursor over already-materialized documents.
pub struct VecSource {
    docs: std::vec::IntoIter<Document>,
}

impl VecSource {
    pub fn new(docs: Vec<Document>) -> Self {
        VecSource {
            docs: docs.into_iter(),
        }
    }
}

impl DocumentSource for VecSource {
    fn get_next(&mut self) -> Result<Option<Document>> {
        Ok(self.docs.next())
    }
}

/// The stitched chain. Pulling on it drives `get_next` calls back
/// through every stage to the input cursor.
pub struct StitchedPipeline {
    tail: Box<dyn DocumentSource>,
}

impl StitchedPipeline {
    pub fn get_next(&mut self) -> Result<Option<Document>> {
        self.tail.get_next()
    }
}

/// Links the pipeline's stages over `input` into a pull chain. Fails on
/// an empty pipeline, on a missing input cursor, and on stages this
/// process cannot evaluate.
pub fn stitch(
    pipeline: &Pipeline,
    input: Option<Box<dyn DocumentSource>>,
    env: &RunEnvironment,
) -> Result<StitchedPipeline> {
    if pipeline.stages().is_empty() {
        return Err(Error::EmptyPipeline);
    }
    let mut source = input.ok_or(Error::MissingInputCursor)?;
    for stage in pipeline.stages() {
        source = make_cursor(stage, source, &pipeline.ctx().ns.db, env)?;
    }
    Ok(StitchedPipeline { tail: source })
}

/// Drains the pipeline into `{ result: [...] }`, enforcing the result
/// size bound from the pipeline's options.
pub fn run(
    pipeline: &Pipeline,
    input: Option<Box<dyn DocumentSource>>,
    env: &RunEnvironment,
) -> Result<Document> {
    if pipeline.is_explain() {
        return Err(Error::ExplainNotRunnable);
    }
    let max_bytes = pipeline.ctx().options.max_result_bytes;
    let mut stitched = stitch(pipeline, input, env)?;

    let mut results: Vec<Bson> = Vec::new();
    let mut result_bytes = 0usize;
    while let Some(document) = stitched.get_next()? {
        result_bytes += bson::to_vec(&document)
            .map_err(|e| Error::ResultSerialization(e.to_string()))?
            .len();
        // the reserve keeps room for the response envelope
        if result_bytes + RESULT_HEADER_RESERVE_BYTES > max_bytes {
            return Err(Error::ResultTooLarge(max_bytes / (1024 * 1024)));
        }
        results.push(Bson::Document(document));
    }
    debug!(documents = results.len(), bytes = result_bytes, "pipeline drained");
    Ok(doc! { "result": results })
}

fn make_cursor(
    stage: &Stage,
    source: Box<dyn DocumentSource>,
    db: &str,
    env: &RunEnvironment,
) -> Result<Box<dyn DocumentSource>> {
    let interrupt = env.interrupt.clone();
    Ok(match stage {
        Stage::Match(m) => Box::new(MatchCursor {
            predicate: m.predicate.clone(),
            source,
            interrupt,
        }),
        Stage::Sort(sort) => Box::new(SortCursor {
            stage: sort.clone(),
            source,
            interrupt,
            sorted: None,
        }),
        Stage::Project(project) => Box::new(ProjectCursor {
            spec: project.clone(),
            source,
            interrupt,
        }),
        Stage::Skip(n) => Box::new(SkipCursor {
            remaining: *n,
            source,
            interrupt,
        }),
        Stage::Limit(n) => Box::new(LimitCursor {
            remaining: *n,
            source,
            interrupt,
        }),
        Stage::Unwind(unwind) => Box::new(UnwindCursor {
            stage: unwind.clone(),
            source,
            interrupt,
            pending: VecDeque::new(),
        }),
        Stage::Group(group) => Box::new(GroupCursor {
            stage: group.clone(),
            source,
            interrupt,
            output: None,
        }),
        Stage::Lookup(lookup) => Box::new(LookupCursor {
            stage: lookup.clone(),
            from_ns: Namespace::new(db, lookup.from.clone()),
            provider: Rc::clone(&env.collections),
            source,
            interrupt,
            foreign: None,
        }),
        Stage::Redact(_) | Stage::Out(_) | Stage::Other(_) => {
            return Err(Error::UnsupportedStage(stage.name().to_string()))
        }
    })
}

struct MatchCursor {
    predicate: Document,
    source: Box<dyn DocumentSource>,
    interrupt: InterruptHandle,
}

impl DocumentSource for MatchCursor {
    fn get_next(&mut self) -> Result<Option<Document>> {
        loop {
            self.interrupt.check()?;
            let document = match self.source.get_next()? {
                Some(d) => d,
                None => return Ok(None),
            };
            if expression::eval_predicate(&self.predicate, &document)? {
                return Ok(Some(document));
            }
        }
    }
}

struct SkipCursor {
    remaining: i64,
    source: Box<dyn DocumentSource>,
    interrupt: InterruptHandle,
}

impl DocumentSource for SkipCursor {
    fn get_next(&mut self) -> Result<Option<Document>> {
        while self.remaining > 0 {
            self.interrupt.check()?;
            if self.source.get_next()?.is_none() {
                self.remaining = 0;
                return Ok(None);
            }
            self.remaining -= 1;
        }
        self.interrupt.check()?;
        self.source.get_next()
    }
}

struct LimitCursor {
    remaining: i64,
    source: Box<dyn DocumentSource>,
    interrupt: InterruptHandle,
}

impl DocumentSource for LimitCursor {
    fn get_next(&mut self) -> Result<Option<Document>> {
        if self.remaining <= 0 {
            return Ok(None);
        }
        self.interrupt.check()?;
        match self.source.get_next()? {
            Some(document) => {
                self.remaining -= 1;
                Ok(Some(document))
            }
            None => {
                self.remaining = 0;
                Ok(None)
            }
        }
    }
}

/// Blocking: materializes its whole input on first pull. With an
/// absorbed limit only the top-k survive the sort. A merging sort sees a
/// single upstream stream here, so the k-way merge degenerates to the
/// same comparison-ordered drain.
struct SortCursor {
    stage: SortStage,
    source: Box<dyn DocumentSource>,
    interrupt: InterruptHandle,
    sorted: Option<std::vec::IntoIter<Document>>,
}

impl SortCursor {
    fn compare(&self, a: &Document, b: &Document) -> std::cmp::Ordering {
        for (field, direction) in self.stage.key_spec.iter() {
            let left = get_path(a, field).cloned().unwrap_or(Bson::Null);
            let right = get_path(b, field).cloned().unwrap_or(Bson::Null);
            let order = value_cmp(&left, &right);
            let order = match direction {
                SortDirection::Ascending => order,
                SortDirection::Descending => order.reverse(),
            };
            if order != std::cmp::Ordering::Equal {
                return order;
            }
        }
        std::cmp::Ordering::Equal
    }
}

impl DocumentSource for SortCursor {
    fn get_next(&mut self) -> Result<Option<Document>> {
        if self.sorted.is_none() {
            let mut buffered = Vec::new();
            loop {
                self.interrupt.check()?;
                match self.source.get_next()? {
                    Some(document) => buffered.push(document),
                    None => break,
                }
            }
            buffered.sort_by(|a, b| self.compare(a, b));
            if let Some(limit) = self.stage.limit {
                buffered.truncate(limit.max(0) as usize);
            }
            self.sorted = Some(buffered.into_iter());
        }
        Ok(self.sorted.as_mut().expect("buffered above").next())
    }
}

struct ProjectCursor {
    spec: ProjectStage,
    source: Box<dyn DocumentSource>,
    interrupt: InterruptHandle,
}

impl ProjectCursor {
    fn apply(&self, document: Document) -> Document {
        if self.spec.is_exclusion() {
            let mut out = document;
            for (field, _) in self.spec.items.iter() {
                remove_path(&mut out, field);
            }
            return out;
        }
        let mut out = Document::new();
        if !self.spec.excludes_id() {
            if let Some(id) = document.get("_id") {
                out.insert("_id", id.clone());
            }
        }
        for (field, item) in self.spec.items.iter() {
            match item {
                ProjectItem::Inclusion => {
                    if let Some(value) = get_path(&document, field) {
                        insert_path(&mut out, field, value.clone());
                    }
                }
                ProjectItem::Ref(path) => {
                    if let Some(value) = get_path(&document, path) {
                        insert_path(&mut out, field, value.clone());
                    }
                }
                ProjectItem::Exclusion => {}
            }
        }
        out
    }
}

impl DocumentSource for ProjectCursor {
    fn get_next(&mut self) -> Result<Option<Document>> {
        self.interrupt.check()?;
        Ok(self.source.get_next()?.map(|d| self.apply(d)))
    }
}

struct UnwindCursor {
    stage: UnwindStage,
    source: Box<dyn DocumentSource>,
    interrupt: InterruptHandle,
    pending: VecDeque<Document>,
}

impl DocumentSource for UnwindCursor {
    fn get_next(&mut self) -> Result<Option<Document>> {
        loop {
            if let Some(ready) = self.pending.pop_front() {
                return Ok(Some(ready));
            }
            self.interrupt.check()?;
            let document = match self.source.get_next()? {
                Some(d) => d,
                None => return Ok(None),
            };
            match get_path(&document, &self.stage.path) {
                // missing, null, and empty arrays drop the document
                None | Some(Bson::Null) | Some(Bson::Undefined) => continue,
                Some(Bson::Array(elements)) => {
                    for element in elements.clone() {
                        let mut unwound = document.clone();
                        insert_path(&mut unwound, &self.stage.path, element);
                        self.pending.push_back(unwound);
                    }
                }
                Some(_) => {
                    return Err(Error::UnwindNotArray(self.stage.path.clone()));
                }
            }
        }
    }
}

enum AccState {
    Sum(f64),
    Extreme(Option<Bson>, bool),
    First(Option<Bson>),
    Last(Option<Bson>),
    Values(Vec<Bson>, bool),
}

impl AccState {
    fn new(function: AccumulatorFunction) -> AccState {
        match function {
            AccumulatorFunction::Sum => AccState::Sum(0.0),
            AccumulatorFunction::Min => AccState::Extreme(None, true),
            AccumulatorFunction::Max => AccState::Extreme(None, false),
            AccumulatorFunction::First => AccState::First(None),
            AccumulatorFunction::Last => AccState::Last(None),
            AccumulatorFunction::Push => AccState::Values(Vec::new(), false),
            AccumulatorFunction::AddToSet => AccState::Values(Vec::new(), true),
        }
    }

    fn accumulate(&mut self, value: Bson, doing_merge: bool) {
        match self {
            AccState::Sum(total) => match value {
                Bson::Int32(n) => *total += f64::from(n),
                Bson::Int64(n) => *total += n as f64,
                Bson::Double(d) => *total += d,
                // non-numeric values do not contribute
                _ => {}
            },
            AccState::Extreme(best, want_min) => {
                if matches!(value, Bson::Null) {
                    return;
                }
                let replace = match best {
                    None => true,
                    Some(current) => {
                        let order = value_cmp(&value, current);
                        if *want_min {
                            order == std::cmp::Ordering::Less
                        } else {
                            order == std::cmp::Ordering::Greater
                        }
                    }
                };
                if replace {
                    *best = Some(value);
                }
            }
            AccState::First(slot) => {
                if slot.is_none() {
                    *slot = Some(value);
                }
            }
            AccState::Last(slot) => {
                *slot = Some(value);
            }
            AccState::Values(values, dedup) => {
                // partials arrive as arrays when merging; splice them
                let incoming = if doing_merge {
                    match value {
                        Bson::Array(elements) => elements,
                        other => vec![other],
                    }
                } else {
                    vec![value]
                };
                for element in incoming {
                    if *dedup && values.iter().any(|v| value_eq(v, &element)) {
                        continue;
                    }
                    values.push(element);
                }
            }
        }
    }

    fn finalize(self) -> Bson {
        match self {
            AccState::Sum(total) => {
                if total.fract() == 0.0 && total.abs() < (i64::MAX as f64) {
                    Bson::Int64(total as i64)
                } else {
                    Bson::Double(total)
                }
            }
            AccState::Extreme(best, _) => best.unwrap_or(Bson::Null),
            AccState::First(slot) | AccState::Last(slot) => slot.unwrap_or(Bson::Null),
            AccState::Values(values, _) => Bson::Array(values),
        }
    }
}

/// Blocking: consumes its input on first pull, accumulating per-key
/// state, then streams the grouped documents out.
struct GroupCursor {
    stage: GroupStage,
    source: Box<dyn DocumentSource>,
    interrupt: InterruptHandle,
    output: Option<std::vec::IntoIter<Document>>,
}

impl GroupCursor {
    fn drain(&mut self) -> Result<Vec<Document>> {
        // key order follows first appearance of each group key
        let mut groups: LinkedHashMap<String, (Bson, Vec<AccState>)> = LinkedHashMap::new();
        loop {
            self.interrupt.check()?;
            let document = match self.source.get_next()? {
                Some(d) => d,
                None => break,
            };
            let key_value = evaluate(&self.stage.id, &document);
            let key = format!("{:?}", key_value);
            let entry = groups.entry(key).or_insert_with(|| {
                let states = self
                    .stage
                    .accumulators
                    .values()
                    .map(|acc| AccState::new(acc.function))
                    .collect();
                (key_value, states)
            });
            for (state, (_, acc)) in entry.1.iter_mut().zip(self.stage.accumulators.iter()) {
                let value = evaluate(&acc.arg, &document);
                state.accumulate(value, self.stage.doing_merge);
            }
        }
        let mut out = Vec::with_capacity(groups.len());
        for (_, (key_value, states)) in groups {
            let mut grouped = Document::new();
            grouped.insert("_id", key_value);
            for ((field, _), state) in self.stage.accumulators.iter().zip(states) {
                grouped.insert(field.clone(), state.finalize());
            }
            out.push(grouped);
        }
        Ok(out)
    }
}

impl DocumentSource for GroupCursor {
    fn get_next(&mut self) -> Result<Option<Document>> {
        if self.output.is_none() {
            let drained = self.drain()?;
            self.output = Some(drained.into_iter());
        }
        Ok(self.output.as_mut().expect("drained above").next())
    }
}

struct LookupCursor {
    stage: LookupStage,
    from_ns: Namespace,
    provider: Rc<dyn CollectionProvider>,
    source: Box<dyn DocumentSource>,
    interrupt: InterruptHandle,
    /// The foreign collection, fetched once on first pull.
    foreign: Option<Vec<Document>>,
}

impl DocumentSource for LookupCursor {
    fn get_next(&mut self) -> Result<Option<Document>> {
        self.interrupt.check()?;
        let mut document = match self.source.get_next()? {
            Some(d) => d,
            None => return Ok(None),
        };
        if self.foreign.is_none() {
            self.foreign = Some(self.provider.collection(&self.from_ns)?);
        }
        let local = get_path(&document, &self.stage.local_field)
            .cloned()
            .unwrap_or(Bson::Null);
        let joined: Vec<Bson> = self
            .foreign
            .as_ref()
            .expect("fetched above")
            .iter()
            .filter(|candidate| {
                let foreign = get_path(candidate, &self.stage.foreign_field)
                    .cloned()
                    .unwrap_or(Bson::Null);
                value_eq(&local, &foreign)
            })
            .cloned()
            .map(Bson::Document)
            .collect();
        document.insert(self.stage.as_field.clone(), joined);
        Ok(Some(document))
    }
}
