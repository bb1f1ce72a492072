use bson::Document;
use std::{collections::BTreeSet, ops::BitOr};

/// The accumulated field and metadata demand of a pipeline suffix. When
/// `need_whole_document` is set the `fields` set is irrelevant; the
/// producer must supply complete documents.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DepsTracker {
    pub fields: BTreeSet<String>,
    pub need_whole_document: bool,
    pub need_text_score: bool,
}

impl DepsTracker {
    /// Renders the tracked fields as a `$project` specification. An empty
    /// document means no useful projection exists.
    pub fn to_projection(&self) -> Document {
        let mut projection = Document::new();
        if self.need_whole_document {
            return projection;
        }
        for field in self.retained_fields() {
            projection.insert(field, 1_i32);
        }
        if !self.fields.contains("_id") {
            projection.insert("_id", 0_i32);
        }
        projection
    }

    /// Fields with any ancestor also present are dropped; projecting the
    /// ancestor already carries the descendant.
    pub(crate) fn retained_fields(&self) -> Vec<&str> {
        let mut retained: Vec<&str> = Vec::new();
        for field in &self.fields {
            if let Some(last) = retained.last() {
                if field.starts_with(last) && field.as_bytes().get(last.len()) == Some(&b'.') {
                    continue;
                }
            }
            retained.push(field);
        }
        retained
    }
}

/// What a stage's dependency report lets the analyzer conclude. Flags are
/// combinable; `NOT_SUPPORTED` means the analyzer cannot see past the
/// stage at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DepsStatus {
    bits: u8,
}

impl DepsStatus {
    /// The stage's report is accurate but not authoritative; keep walking.
    pub const SEE_NEXT: DepsStatus = DepsStatus { bits: 0 };
    /// The stage's output is a closed function of its reported fields.
    pub const EXHAUSTIVE_FIELDS: DepsStatus = DepsStatus { bits: 1 };
    /// No metadata demand can originate downstream of this stage.
    pub const EXHAUSTIVE_META: DepsStatus = DepsStatus { bits: 2 };
    pub const EXHAUSTIVE_ALL: DepsStatus = DepsStatus { bits: 1 | 2 };
    pub const NOT_SUPPORTED: DepsStatus = DepsStatus { bits: 4 };

    pub fn contains(self, other: DepsStatus) -> bool {
        self.bits & other.bits == other.bits
    }
}

impl BitOr for DepsStatus {
    type Output = DepsStatus;

    fn bitor(self, rhs: DepsStatus) -> DepsStatus {
        DepsStatus {
            bits: self.bits | rhs.bits,
        }
    }
}
