use bson::{Bson, Document};
use mongoagg_datastructures::UniqueLinkedHashMap;
use std::collections::BTreeSet;

/// `$match` keeps its predicate in document form; the predicate algebra
/// the rewrites need lives in [`super::match_stage`].
#[derive(Debug, Clone, PartialEq)]
pub struct MatchStage {
    pub predicate: Document,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDirection {
    Ascending,
    Descending,
}

impl SortDirection {
    pub fn as_i32(self) -> i32 {
        match self {
            SortDirection::Ascending => 1,
            SortDirection::Descending => -1,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SortStage {
    pub key_spec: UniqueLinkedHashMap<String, SortDirection>,
    /// A limit absorbed from an adjacent `$limit`; lets the sort hold a
    /// bounded top-k set instead of its whole input.
    pub limit: Option<i64>,
    /// Set on the merger half of a split sort. The inputs arrive
    /// pre-sorted per shard and only need merging.
    pub merging: bool,
}

impl SortStage {
    pub fn new(key_spec: UniqueLinkedHashMap<String, SortDirection>) -> Self {
        SortStage {
            key_spec,
            limit: None,
            merging: false,
        }
    }

    /// Folds `limit` into the stage, keeping the tighter bound.
    pub fn absorb_limit(&mut self, limit: i64) {
        self.limit = Some(match self.limit {
            Some(existing) => existing.min(limit),
            None => limit,
        });
    }

    pub fn key_document(&self) -> Document {
        let mut spec = Document::new();
        for (field, direction) in self.key_spec.iter() {
            spec.insert(field.clone(), direction.as_i32());
        }
        spec
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ProjectItem {
    Inclusion,
    Exclusion,
    /// `field: "$other.path"` renames; the stored path has no `$` prefix.
    Ref(String),
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct ProjectStage {
    pub items: UniqueLinkedHashMap<String, ProjectItem>,
}

impl ProjectStage {
    /// An exclusion projection removes named fields and passes the rest
    /// of the document through. `_id: 0` alongside inclusions does not
    /// make the projection an exclusion; the parser rejects any other mix.
    pub fn is_exclusion(&self) -> bool {
        !self.items.is_empty()
            && self
                .items
                .values()
                .all(|item| *item == ProjectItem::Exclusion)
    }

    pub fn excludes_id(&self) -> bool {
        self.items.get(&"_id".to_string()) == Some(&ProjectItem::Exclusion)
    }

    /// Builds the synthetic inclusion projection the shard splitter
    /// appends to bound inter-node payloads.
    pub fn for_fields(fields: &BTreeSet<String>) -> ProjectStage {
        let mut items = UniqueLinkedHashMap::new();
        let mut previous: Option<&str> = None;
        for field in fields {
            if let Some(last) = previous {
                if field.starts_with(last) && field.as_bytes().get(last.len()) == Some(&b'.') {
                    continue;
                }
            }
            // fields is a set, so insertion cannot collide
            let _ = items.insert(field.clone(), ProjectItem::Inclusion);
            previous = Some(field);
        }
        if !fields.contains("_id") {
            let _ = items.insert("_id".to_string(), ProjectItem::Exclusion);
        }
        ProjectStage { items }
    }

    pub fn to_document(&self) -> Document {
        let mut spec = Document::new();
        for (field, item) in self.items.iter() {
            match item {
                ProjectItem::Inclusion => spec.insert(field.clone(), 1_i32),
                ProjectItem::Exclusion => spec.insert(field.clone(), 0_i32),
                ProjectItem::Ref(path) => {
                    spec.insert(field.clone(), Bson::String(format!("${}", path)))
                }
            };
        }
        spec
    }
}

/// `$unwind` stores its field path without the `$` prefix.
#[derive(Debug, Clone, PartialEq)]
pub struct UnwindStage {
    pub path: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RedactStage {
    pub expr: Bson,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OutStage {
    pub collection: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LookupStage {
    pub from: String,
    pub local_field: String,
    pub foreign_field: String,
    pub as_field: String,
}

/// A stage this planner has no special knowledge of. It parses, survives
/// optimization untouched, and serializes back out unchanged.
#[derive(Debug, Clone, PartialEq)]
pub struct OtherStage {
    pub name: String,
    pub payload: Bson,
}
