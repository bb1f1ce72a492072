use crate::{namespace::Namespace, options::AggregateOptions};
use bson::Document;

/// Request-scoped state shared by every stage of one pipeline. Fields are
/// fixed at parse time; optimization and execution read but never write
/// them.
#[derive(Debug, Clone, PartialEq)]
pub struct ExpressionContext {
    /// The collection the pipeline draws its input from.
    pub ns: Namespace,
    /// True when this process is executing the shard half of a split
    /// pipeline on behalf of a router.
    pub in_shard: bool,
    /// Permits blocking stages to spill to disk.
    pub allow_disk_use: bool,
    /// Skips write validation for a terminal `$out`.
    pub bypass_document_validation: bool,
    pub collation: Option<Document>,
    pub options: AggregateOptions,
}

impl ExpressionContext {
    pub fn new(ns: Namespace) -> Self {
        ExpressionContext {
            ns,
            in_shard: false,
            allow_disk_use: false,
            bypass_document_validation: false,
            collation: None,
            options: AggregateOptions::default(),
        }
    }
}
