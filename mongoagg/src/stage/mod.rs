//! The stage ontology. A pipeline stage is one variant of [`Stage`];
//! every algebraic property the rewrites and the shard splitter rely on
//! is answered by dispatch over the closed set of variants.

pub mod definitions;
pub mod group;
pub mod match_stage;

pub use definitions::{
    LookupStage, MatchStage, OtherStage, OutStage, ProjectItem, ProjectStage, RedactStage,
    SortDirection, SortStage, UnwindStage,
};
pub use group::{AccumulatorExpr, AccumulatorFunction, GroupStage};

use crate::{
    deps::{DepsStatus, DepsTracker},
    namespace::Namespace,
};
use bson::{doc, Bson, Document};

#[derive(Debug, Clone, PartialEq)]
pub enum Stage {
    Match(MatchStage),
    Sort(SortStage),
    Project(ProjectStage),
    Skip(i64),
    Limit(i64),
    Unwind(UnwindStage),
    Group(GroupStage),
    Redact(RedactStage),
    Out(OutStage),
    Lookup(LookupStage),
    Other(OtherStage),
}

impl Stage {
    pub fn name(&self) -> &str {
        match self {
            Stage::Match(_) => "$match",
            Stage::Sort(_) => "$sort",
            Stage::Project(_) => "$project",
            Stage::Skip(_) => "$skip",
            Stage::Limit(_) => "$limit",
            Stage::Unwind(_) => "$unwind",
            Stage::Group(_) => "$group",
            Stage::Redact(_) => "$redact",
            Stage::Out(_) => "$out",
            Stage::Lookup(_) => "$lookup",
            Stage::Other(other) => &other.name,
        }
    }

    /// Attempts to absorb the stage that follows this one. On success the
    /// caller drops `next`.
    pub fn coalesce(&mut self, next: &Stage) -> bool {
        match (self, next) {
            (Stage::Sort(sort), Stage::Limit(n)) => {
                sort.absorb_limit(*n);
                true
            }
            (Stage::Limit(mine), Stage::Limit(theirs)) => {
                *mine = (*mine).min(*theirs);
                true
            }
            (Stage::Skip(mine), Stage::Skip(theirs)) => {
                *mine = mine.saturating_add(*theirs);
                true
            }
            (Stage::Match(mine), Stage::Match(theirs))
                if !match_stage::is_text_query(&theirs.predicate) =>
            {
                let conjoined =
                    match_stage::conjoin(std::mem::take(&mut mine.predicate), &theirs.predicate);
                mine.predicate = conjoined;
                true
            }
            _ => false,
        }
    }

    /// A stage may replace itself with a cheaper form or vanish entirely.
    pub fn optimize(self) -> Option<Stage> {
        match self {
            Stage::Skip(0) => None,
            Stage::Match(m) if m.predicate.is_empty() => None,
            stage => Some(stage),
        }
    }

    /// Reports the fields and metadata this stage reads into `deps`. The
    /// returned status tells the analyzer how much the report can be
    /// trusted for the rest of the pipeline.
    pub fn dependencies(&self, deps: &mut DepsTracker) -> DepsStatus {
        match self {
            Stage::Match(m) => {
                match_stage::add_dependencies(&m.predicate, deps);
                DepsStatus::SEE_NEXT
            }
            Stage::Sort(sort) => {
                for (field, _) in sort.key_spec.iter() {
                    deps.fields.insert(field.clone());
                }
                DepsStatus::SEE_NEXT
            }
            Stage::Project(project) => {
                if project.is_exclusion() {
                    // The output is everything minus a fixed set; we
                    // cannot enumerate it but nothing new appears later.
                    deps.need_whole_document = true;
                } else {
                    if !project.excludes_id() {
                        deps.fields.insert("_id".to_string());
                    }
                    for (field, item) in project.items.iter() {
                        match item {
                            ProjectItem::Inclusion => {
                                deps.fields.insert(field.clone());
                            }
                            ProjectItem::Ref(path) => {
                                deps.fields.insert(path.clone());
                            }
                            ProjectItem::Exclusion => {}
                        }
                    }
                }
                DepsStatus::EXHAUSTIVE_FIELDS
            }
            Stage::Skip(_) | Stage::Limit(_) => DepsStatus::SEE_NEXT,
            Stage::Unwind(unwind) => {
                deps.fields.insert(unwind.path.clone());
                DepsStatus::SEE_NEXT
            }
            Stage::Group(g) => {
                add_expression_fields(&g.id, deps);
                for (_, acc) in g.accumulators.iter() {
                    add_expression_fields(&acc.arg, deps);
                }
                // A group builds new documents, so neither fields nor
                // metadata can be demanded from upstream past it.
                DepsStatus::EXHAUSTIVE_ALL
            }
            Stage::Redact(_) => DepsStatus::NOT_SUPPORTED,
            Stage::Out(_) => {
                deps.need_whole_document = true;
                DepsStatus::EXHAUSTIVE_ALL
            }
            Stage::Lookup(lookup) => {
                deps.fields.insert(lookup.local_field.clone());
                DepsStatus::SEE_NEXT
            }
            Stage::Other(_) => DepsStatus::NOT_SUPPORTED,
        }
    }

    /// True if the stage's semantics factor into a shard part and a
    /// merger part whose composition equals the original.
    pub fn is_splittable(&self) -> bool {
        matches!(
            self,
            Stage::Sort(_)
                | Stage::Skip(_)
                | Stage::Limit(_)
                | Stage::Group(_)
                | Stage::Out(_)
                | Stage::Lookup(_)
        )
    }

    /// Consumes the stage and produces its `(shard, merger)` parts.
    /// Either side may be absent. Only meaningful for splittable stages;
    /// everything else belongs wholly to the shard half.
    pub fn split_for_sharded(self) -> (Option<Stage>, Option<Stage>) {
        match self {
            Stage::Sort(sort) => {
                let merger = SortStage {
                    key_spec: sort.key_spec.clone(),
                    limit: sort.limit,
                    merging: true,
                };
                (Some(Stage::Sort(sort)), Some(Stage::Sort(merger)))
            }
            Stage::Skip(n) => (None, Some(Stage::Skip(n))),
            Stage::Limit(n) => (Some(Stage::Limit(n)), Some(Stage::Limit(n))),
            Stage::Group(g) => {
                let (shard, merger) = g.split_for_sharded();
                (Some(Stage::Group(shard)), Some(Stage::Group(merger)))
            }
            Stage::Out(out) => (None, Some(Stage::Out(out))),
            Stage::Lookup(lookup) => (None, Some(Stage::Lookup(lookup))),
            stage => (Some(stage), None),
        }
    }

    /// Stages with exclusive write or catalog needs force the merger
    /// pipeline onto the database's primary shard.
    pub fn needs_primary_shard(&self) -> bool {
        matches!(self, Stage::Out(_) | Stage::Lookup(_))
    }

    /// Collections other than the pipeline input this stage reads.
    pub fn involved_collections(&self, db: &str) -> Vec<Namespace> {
        match self {
            Stage::Lookup(lookup) => vec![Namespace::new(db, lookup.from.clone())],
            _ => vec![],
        }
    }

    /// Appends the stage's command form to `array`. Most stages emit one
    /// document; a sort with an absorbed limit emits two so the output
    /// reparses to an equivalent pipeline. Explain mode keeps composite
    /// state inside a single verbose document instead.
    pub fn serialize_to_array(&self, array: &mut Vec<Bson>, explain: bool) {
        match self {
            Stage::Match(m) => {
                array.push(Bson::Document(doc! { "$match": m.predicate.clone() }));
            }
            Stage::Sort(sort) => {
                if explain {
                    let mut verbose = doc! { "sortKey": sort.key_document() };
                    if let Some(limit) = sort.limit {
                        verbose.insert("limit", limit);
                    }
                    if sort.merging {
                        verbose.insert("mergePresorted", true);
                    }
                    array.push(Bson::Document(doc! { "$sort": verbose }));
                } else {
                    array.push(Bson::Document(doc! { "$sort": sort.key_document() }));
                    if let Some(limit) = sort.limit {
                        array.push(Bson::Document(doc! { "$limit": limit }));
                    }
                }
            }
            Stage::Project(project) => {
                array.push(Bson::Document(doc! { "$project": project.to_document() }));
            }
            Stage::Skip(n) => array.push(Bson::Document(doc! { "$skip": *n })),
            Stage::Limit(n) => array.push(Bson::Document(doc! { "$limit": *n })),
            Stage::Unwind(unwind) => {
                array.push(Bson::Document(doc! { "$unwind": format!("${}", unwind.path) }));
            }
            Stage::Group(g) => {
                array.push(Bson::Document(doc! { "$group": g.to_document() }));
            }
            Stage::Redact(redact) => {
                array.push(Bson::Document(doc! { "$redact": redact.expr.clone() }));
            }
            Stage::Out(out) => {
                array.push(Bson::Document(doc! { "$out": out.collection.clone() }));
            }
            Stage::Lookup(lookup) => {
                array.push(Bson::Document(doc! { "$lookup": {
                    "from": lookup.from.clone(),
                    "localField": lookup.local_field.clone(),
                    "foreignField": lookup.foreign_field.clone(),
                    "as": lookup.as_field.clone(),
                } }));
            }
            Stage::Other(other) => {
                let mut spec = Document::new();
                spec.insert(other.name.clone(), other.payload.clone());
                array.push(Bson::Document(spec));
            }
        }
    }
}

/// Collects the field paths an aggregation expression reads: `"$a.b"`
/// strings, recursing through documents and arrays. `$$` variables and
/// `$literal` payloads are not field references.
fn add_expression_fields(expr: &Bson, deps: &mut DepsTracker) {
    match expr {
        Bson::String(s) if s.starts_with("$$") => {}
        Bson::String(s) if s.starts_with('$') => {
            deps.fields.insert(s[1..].to_string());
        }
        Bson::Document(sub) => {
            for (key, value) in sub.iter() {
                if key == "$literal" {
                    continue;
                }
                add_expression_fields(value, deps);
            }
        }
        Bson::Array(elements) => {
            for element in elements {
                add_expression_fields(element, deps);
            }
        }
        _ => {}
    }
}

#[cfg(test)]
pub(crate) mod test;
