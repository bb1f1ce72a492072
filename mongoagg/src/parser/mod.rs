//! Turns an `aggregate` command document into a validated, unoptimized
//! [`Pipeline`]. Top-level option handling and per-stage payload checks
//! both live here; everything downstream assumes a well-formed pipeline.


use crate::{
    context::ExpressionContext,
    namespace::Namespace,
    pipeline::Pipeline,
    stage::{
        group::{AccumulatorExpr, AccumulatorFunction, GroupStage},
        LookupStage, MatchStage, OtherStage, OutStage, ProjectItem, ProjectStage, RedactStage,
        SortDirection, SortStage, Stage, UnwindStage,
    },
    usererror::UserError,
};
use bson::{Bson, Document};
use mongoagg_datastructures::UniqueLinkedHashMap;
use std::sync::Arc;
use thiserror::Error;

pub const COMMAND_NAME: &str = "aggregate";
pub const PIPELINE_NAME: &str = "pipeline";
pub const EXPLAIN_NAME: &str = "explain";
pub const FROM_ROUTER_NAME: &str = "fromRouter";
pub const ALLOW_DISK_USE_NAME: &str = "allowDiskUse";
pub const BYPASS_DOCUMENT_VALIDATION_NAME: &str = "bypassDocumentValidation";

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error, PartialEq)]
pub enum Error {
    #[error("unrecognized field '{0}'")]
    UnrecognizedField(String),
    #[error("the '{0}' field is required")]
    MissingRequiredField(&'static str),
    #[error("the aggregate field must name a collection, not a {0}")]
    AggregateFieldNotString(&'static str),
    #[error("the pipeline field must be an array, not a {0}")]
    PipelineNotArray(&'static str),
    #[error("pipeline element {0} is not an object")]
    StageNotAnObject(usize),
    #[error("allowDiskUse must be a bool, not a {0}")]
    AllowDiskUseNotBool(&'static str),
    #[error("{0} must be a bool, not a {1}")]
    OptionNotBool(&'static str, &'static str),
    #[error("$out can only be the final stage in the pipeline")]
    OutNotFinal,
    #[error("invalid namespace '{0}'")]
    InvalidNamespace(String),
    #[error("a pipeline stage specification object must contain exactly one field")]
    StageSpecNotSingleKey(usize),
    #[error("unrecognized pipeline stage name '{0}'")]
    UnrecognizedStageName(String),
    #[error("the $match filter must be an expression in an object")]
    MatchNotDocument,
    #[error("the $sort key specification must be an object")]
    SortNotDocument,
    #[error("the $sort key ordering for '{0}' must be 1 or -1")]
    InvalidSortDirection(String),
    #[error("the $sort stage must name at least one key")]
    EmptySortSpec,
    #[error("the $project specification must be an object")]
    ProjectNotDocument,
    #[error("the $project stage requires at least one output field")]
    EmptyProjectSpec,
    #[error("invalid $project value for field '{0}'")]
    InvalidProjectValue(String),
    #[error("cannot mix inclusions and exclusions in one $project: '{0}'")]
    MixedProjectSpec(String),
    #[error("duplicate field name '{0}' in specification")]
    DuplicateFieldName(String),
    #[error("the value to $skip must be a non-negative number, got {0}")]
    InvalidSkip(String),
    #[error("the $limit must be a positive number, got {0}")]
    InvalidLimit(String),
    #[error("the $unwind field path must be specified as a string")]
    UnwindNotString,
    #[error("the $unwind field path must be prefixed with '$'")]
    UnwindPathNotPrefixed(String),
    #[error("a $group's fields must be specified in an object")]
    GroupNotDocument,
    #[error("a $group specification must include an _id")]
    GroupMissingId,
    #[error("the computed aggregate '{0}' must specify exactly one operator")]
    AccumulatorNotSingleOperator(String),
    #[error("unknown group operator '{0}'")]
    UnknownAccumulator(String),
    #[error("the $out stage requires a string argument")]
    OutNotString,
    #[error("the $lookup specification must be an object")]
    LookupNotDocument,
    #[error("the $lookup '{0}' field must be a string")]
    LookupFieldNotString(&'static str),
}

impl UserError for Error {
    fn code(&self) -> u32 {
        match self {
            Error::UnrecognizedField(_) => 16923,
            Error::MissingRequiredField(_) => 16924,
            Error::AggregateFieldNotString(_) => 16925,
            Error::PipelineNotArray(_) => 15943,
            Error::StageNotAnObject(_) => 15942,
            Error::AllowDiskUseNotBool(_) => 16949,
            Error::OptionNotBool(_, _) => 16952,
            Error::OutNotFinal => 16991,
            Error::InvalidNamespace(_) => 17138,
            Error::StageSpecNotSingleKey(_) => 16435,
            Error::UnrecognizedStageName(_) => 16436,
            Error::MatchNotDocument => 15959,
            Error::SortNotDocument => 15973,
            Error::InvalidSortDirection(_) => 15974,
            Error::EmptySortSpec => 15976,
            Error::ProjectNotDocument => 15969,
            Error::EmptyProjectSpec => 16403,
            Error::InvalidProjectValue(_) => 15971,
            Error::MixedProjectSpec(_) => 16410,
            Error::DuplicateFieldName(_) => 16406,
            Error::InvalidSkip(_) => 15956,
            Error::InvalidLimit(_) => 15958,
            Error::UnwindNotString => 15981,
            Error::UnwindPathNotPrefixed(_) => 15982,
            Error::GroupNotDocument => 15947,
            Error::GroupMissingId => 15955,
            Error::AccumulatorNotSingleOperator(_) => 15954,
            Error::UnknownAccumulator(_) => 15952,
            Error::OutNotString => 16990,
            Error::LookupNotDocument => 4569,
            Error::LookupFieldNotString(_) => 4570,
        }
    }
}

fn type_name(value: &Bson) -> &'static str {
    match value {
        Bson::Double(_) => "double",
        Bson::String(_) => "string",
        Bson::Array(_) => "array",
        Bson::Document(_) => "object",
        Bson::Boolean(_) => "bool",
        Bson::Null => "null",
        Bson::Int32(_) => "int",
        Bson::Int64(_) => "long",
        _ => "other",
    }
}

fn truthy(value: &Bson) -> bool {
    match value {
        Bson::Boolean(b) => *b,
        Bson::Int32(n) => *n != 0,
        Bson::Int64(n) => *n != 0,
        Bson::Double(d) => *d != 0.0,
        Bson::Null | Bson::Undefined => false,
        _ => true,
    }
}

fn as_integer(value: &Bson) -> Option<i64> {
    match value {
        Bson::Int32(n) => Some(i64::from(*n)),
        Bson::Int64(n) => Some(*n),
        Bson::Double(d) if d.fract() == 0.0 => Some(*d as i64),
        _ => None,
    }
}

/// Parses an aggregate command issued against `db`. Top-level fields
/// prefixed with `$`, plus `cursor` and `maxTimeMS`, belong to the outer
/// command layer and are skipped; anything else unrecognized is an error.
pub fn parse_command(db: &str, cmd: &Document) -> Result<Pipeline> {
    let mut collection: Option<String> = None;
    let mut raw_pipeline: Option<&Vec<Bson>> = None;
    let mut explain = false;
    let mut in_shard = false;
    let mut allow_disk_use = false;
    let mut bypass_document_validation = false;

    for (field, value) in cmd.iter() {
        if field.starts_with('$') || field == "cursor" || field == "maxTimeMS" {
            continue;
        }
        match field.as_str() {
            COMMAND_NAME => match value {
                Bson::String(name) => collection = Some(name.clone()),
                other => return Err(Error::AggregateFieldNotString(type_name(other))),
            },
            PIPELINE_NAME => match value {
                Bson::Array(elements) => raw_pipeline = Some(elements),
                other => return Err(Error::PipelineNotArray(type_name(other))),
            },
            EXPLAIN_NAME => match value {
                Bson::Boolean(b) => explain = *b,
                other => return Err(Error::OptionNotBool(EXPLAIN_NAME, type_name(other))),
            },
            FROM_ROUTER_NAME => match value {
                Bson::Boolean(b) => in_shard = *b,
                other => return Err(Error::OptionNotBool(FROM_ROUTER_NAME, type_name(other))),
            },
            ALLOW_DISK_USE_NAME => match value {
                Bson::Boolean(b) => allow_disk_use = *b,
                other => return Err(Error::AllowDiskUseNotBool(type_name(other))),
            },
            BYPASS_DOCUMENT_VALIDATION_NAME => {
                bypass_document_validation = truthy(value);
            }
            other => return Err(Error::UnrecognizedField(other.to_string())),
        }
    }

    let collection = collection.ok_or(Error::MissingRequiredField(COMMAND_NAME))?;
    let raw_pipeline = raw_pipeline.ok_or(Error::MissingRequiredField(PIPELINE_NAME))?;

    let ns = Namespace::new(db, collection);
    if !ns.is_valid() {
        return Err(Error::InvalidNamespace(ns.ns()));
    }

    let total = raw_pipeline.len();
    let mut stages = Vec::with_capacity(total);
    for (i, element) in raw_pipeline.iter().enumerate() {
        let spec = match element {
            Bson::Document(spec) => spec,
            _ => return Err(Error::StageNotAnObject(i)),
        };
        let stage = parse_stage(i, spec)?;
        if matches!(stage, Stage::Out(_)) && i != total - 1 {
            return Err(Error::OutNotFinal);
        }
        stages.push(stage);
    }

    let mut ctx = ExpressionContext::new(ns);
    ctx.in_shard = in_shard;
    ctx.allow_disk_use = allow_disk_use;
    ctx.bypass_document_validation = bypass_document_validation;

    Ok(Pipeline::new(stages, Arc::new(ctx), explain))
}

fn parse_stage(position: usize, spec: &Document) -> Result<Stage> {
    let mut entries = spec.iter();
    let (name, payload) = match (entries.next(), entries.next()) {
        (Some(entry), None) => entry,
        _ => return Err(Error::StageSpecNotSingleKey(position)),
    };
    match name.as_str() {
        "$match" => parse_match(payload),
        "$sort" => parse_sort(payload),
        "$project" => parse_project(payload),
        "$skip" => parse_skip(payload),
        "$limit" => parse_limit(payload),
        "$unwind" => parse_unwind(payload),
        "$group" => parse_group(payload),
        "$redact" => Ok(Stage::Redact(RedactStage {
            expr: payload.clone(),
        })),
        "$out" => parse_out(payload),
        "$lookup" => parse_lookup(payload),
        other if other.starts_with('$') => Ok(Stage::Other(OtherStage {
            name: other.to_string(),
            payload: payload.clone(),
        })),
        other => Err(Error::UnrecognizedStageName(other.to_string())),
    }
}

fn parse_match(payload: &Bson) -> Result<Stage> {
    match payload {
        Bson::Document(predicate) => Ok(Stage::Match(MatchStage {
            predicate: predicate.clone(),
        })),
        _ => Err(Error::MatchNotDocument),
    }
}

fn parse_sort(payload: &Bson) -> Result<Stage> {
    let spec = payload.as_document().ok_or(Error::SortNotDocument)?;
    if spec.is_empty() {
        return Err(Error::EmptySortSpec);
    }
    let mut key_spec = UniqueLinkedHashMap::new();
    for (field, direction) in spec.iter() {
        let direction = match as_integer(direction) {
            Some(1) => SortDirection::Ascending,
            Some(-1) => SortDirection::Descending,
            _ => return Err(Error::InvalidSortDirection(field.clone())),
        };
        key_spec
            .insert(field.clone(), direction)
            .map_err(|e| Error::DuplicateFieldName(e.key_name()))?;
    }
    Ok(Stage::Sort(SortStage::new(key_spec)))
}

fn parse_project(payload: &Bson) -> Result<Stage> {
    let spec = payload.as_document().ok_or(Error::ProjectNotDocument)?;
    if spec.is_empty() {
        return Err(Error::EmptyProjectSpec);
    }
    let mut items = UniqueLinkedHashMap::new();
    let mut saw_inclusion = false;
    let mut saw_exclusion_other_than_id = false;
    for (field, value) in spec.iter() {
        let item = match value {
            Bson::Int32(1) | Bson::Int64(1) | Bson::Boolean(true) => ProjectItem::Inclusion,
            Bson::Double(d) if *d == 1.0 => ProjectItem::Inclusion,
            Bson::Int32(0) | Bson::Int64(0) | Bson::Boolean(false) => ProjectItem::Exclusion,
            Bson::Double(d) if *d == 0.0 => ProjectItem::Exclusion,
            Bson::String(path) if path.starts_with('$') && !path.starts_with("$$") => {
                ProjectItem::Ref(path[1..].to_string())
            }
            _ => return Err(Error::InvalidProjectValue(field.clone())),
        };
        match &item {
            ProjectItem::Exclusion if field != "_id" => saw_exclusion_other_than_id = true,
            ProjectItem::Exclusion => {}
            _ => saw_inclusion = true,
        }
        items
            .insert(field.clone(), item)
            .map_err(|e| Error::DuplicateFieldName(e.key_name()))?;
    }
    if saw_inclusion && saw_exclusion_other_than_id {
        return Err(Error::MixedProjectSpec(
            spec.keys().next().cloned().unwrap_or_default(),
        ));
    }
    Ok(Stage::Project(ProjectStage { items }))
}

fn parse_skip(payload: &Bson) -> Result<Stage> {
    match as_integer(payload) {
        Some(n) if n >= 0 => Ok(Stage::Skip(n)),
        _ => Err(Error::InvalidSkip(format!("{}", payload))),
    }
}

fn parse_limit(payload: &Bson) -> Result<Stage> {
    match as_integer(payload) {
        Some(n) if n > 0 => Ok(Stage::Limit(n)),
        _ => Err(Error::InvalidLimit(format!("{}", payload))),
    }
}

fn parse_unwind(payload: &Bson) -> Result<Stage> {
    let path = payload.as_str().ok_or(Error::UnwindNotString)?;
    let stripped = path
        .strip_prefix('$')
        .ok_or_else(|| Error::UnwindPathNotPrefixed(path.to_string()))?;
    Ok(Stage::Unwind(UnwindStage {
        path: stripped.to_string(),
    }))
}

fn parse_group(payload: &Bson) -> Result<Stage> {
    let spec = payload.as_document().ok_or(Error::GroupNotDocument)?;
    let id = spec.get("_id").ok_or(Error::GroupMissingId)?.clone();
    // routers send merger pipelines back through this parser
    let doing_merge = spec.get("$doingMerge").map_or(false, truthy);
    let mut accumulators = UniqueLinkedHashMap::new();
    for (field, value) in spec.iter() {
        if field == "_id" || field == "$doingMerge" {
            continue;
        }
        let operator = value
            .as_document()
            .filter(|d| d.len() == 1)
            .ok_or_else(|| Error::AccumulatorNotSingleOperator(field.clone()))?;
        let (op_name, arg) = operator.iter().next().expect("operator has one entry");
        let function = AccumulatorFunction::parse(op_name)
            .ok_or_else(|| Error::UnknownAccumulator(op_name.clone()))?;
        accumulators
            .insert(
                field.clone(),
                AccumulatorExpr {
                    function,
                    arg: arg.clone(),
                },
            )
            .map_err(|e| Error::DuplicateFieldName(e.key_name()))?;
    }
    Ok(Stage::Group(GroupStage {
        id,
        accumulators,
        doing_merge,
    }))
}

fn parse_out(payload: &Bson) -> Result<Stage> {
    match payload {
        Bson::String(collection) => Ok(Stage::Out(OutStage {
            collection: collection.clone(),
        })),
        _ => Err(Error::OutNotString),
    }
}

fn parse_lookup(payload: &Bson) -> Result<Stage> {
    let spec = payload.as_document().ok_or(Error::LookupNotDocument)?;
    let field = |name: &'static str| -> Result<String> {
        spec.get(name)
            .and_then(Bson::as_str)
            .map(str::to_string)
            .ok_or(Error::LookupFieldNotString(name))
    };
    Ok(Stage::Lookup(LookupStage {
        from: field("from")?,
        local_field: field("localField")?,
        foreign_field: field("foreignField")?,
        as_field: field("as")?,
    }))
}
