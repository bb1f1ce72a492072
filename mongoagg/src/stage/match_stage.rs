//! Predicate algebra for `$match`. The rewrites only need three facts
//! about a predicate: whether it is a text query, which fields it reads,
//! and which sub-predicate is safe to evaluate before a `$redact` has
//! pruned the document.

use crate::deps::DepsTracker;
use bson::{Bson, Document};

/// True if the predicate contains a `$text` operator anywhere. Text
/// queries are pinned in place: they must see the raw input stream and
/// own the text-score metadata channel.
pub fn is_text_query(predicate: &Document) -> bool {
    predicate.iter().any(|(key, value)| {
        key == "$text"
            || match value {
                Bson::Document(sub) => is_text_query(sub),
                Bson::Array(elements) => elements.iter().any(|element| match element {
                    Bson::Document(sub) => is_text_query(sub),
                    _ => false,
                }),
                _ => false,
            }
    })
}

/// The largest sub-predicate guaranteed to evaluate identically before
/// and after a `$redact`. Redaction can only remove fields, so a clause
/// is safe when a removed field cannot flip it from false to true:
/// equality and range comparisons against concrete scalars qualify,
/// negations and type-sensitive operators do not.
pub fn redact_safe_portion(predicate: &Document) -> Document {
    let mut portion = Document::new();
    for (key, value) in predicate.iter() {
        match key.as_str() {
            "$and" => {
                if let Bson::Array(clauses) = value {
                    let kept: Vec<Bson> = clauses
                        .iter()
                        .filter_map(|clause| match clause {
                            Bson::Document(sub) => {
                                let safe = redact_safe_portion(sub);
                                (!safe.is_empty()).then(|| Bson::Document(safe))
                            }
                            _ => None,
                        })
                        .collect();
                    if !kept.is_empty() {
                        portion.insert("$and", kept);
                    }
                }
            }
            // A disjunction survives only whole: dropping one branch
            // would strengthen the predicate, not weaken it.
            "$or" => {
                if let Bson::Array(clauses) = value {
                    let all_safe = clauses.iter().all(|clause| match clause {
                        Bson::Document(sub) => redact_safe_portion(sub) == *sub,
                        _ => false,
                    });
                    if all_safe && !clauses.is_empty() {
                        portion.insert("$or", value.clone());
                    }
                }
            }
            key if key.starts_with('$') => {}
            field => {
                if let Some(safe) = safe_field_clause(value) {
                    portion.insert(field, safe);
                }
            }
        }
    }
    portion
}

fn safe_field_clause(value: &Bson) -> Option<Bson> {
    match value {
        Bson::Document(operators)
            if operators.keys().next().map_or(false, |k| k.starts_with('$')) =>
        {
            let mut kept = Document::new();
            for (op, operand) in operators.iter() {
                let safe = match op.as_str() {
                    "$eq" | "$gt" | "$gte" | "$lt" | "$lte" => is_safe_literal(operand),
                    "$in" => matches!(operand, Bson::Array(elements)
                        if elements.iter().all(is_safe_literal)),
                    _ => false,
                };
                if safe {
                    kept.insert(op.clone(), operand.clone());
                }
            }
            (!kept.is_empty()).then(|| Bson::Document(kept))
        }
        literal if is_safe_literal(literal) => Some(literal.clone()),
        _ => None,
    }
}

/// Null compares equal to a missing field, and structured values can
/// lose members to redaction, so neither is safe to compare against.
fn is_safe_literal(value: &Bson) -> bool {
    !matches!(
        value,
        Bson::Null | Bson::Undefined | Bson::Document(_) | Bson::Array(_)
    )
}

/// Records the fields a predicate reads. Top-level keys are field paths;
/// logical operators recurse. `$where` sees the whole document, and a
/// text clause demands the text-score metadata channel.
pub fn add_dependencies(predicate: &Document, deps: &mut DepsTracker) {
    for (key, value) in predicate.iter() {
        match key.as_str() {
            "$and" | "$or" | "$nor" => {
                if let Bson::Array(clauses) = value {
                    for clause in clauses {
                        if let Bson::Document(sub) = clause {
                            add_dependencies(sub, deps);
                        }
                    }
                }
            }
            "$where" => deps.need_whole_document = true,
            "$text" => deps.need_text_score = true,
            "$comment" => {}
            key if key.starts_with('$') => deps.need_whole_document = true,
            field => {
                deps.fields.insert(field.to_string());
            }
        }
    }
}

/// Conjoins two predicates. An existing top-level `$and` grows in place
/// so repeated coalescing stays flat.
pub fn conjoin(left: Document, right: &Document) -> Document {
    if left.len() == 1 {
        if let Some(Bson::Array(mut clauses)) = left.get("$and").cloned() {
            clauses.push(Bson::Document(right.clone()));
            let mut out = Document::new();
            out.insert("$and", clauses);
            return out;
        }
    }
    let mut out = Document::new();
    out.insert(
        "$and",
        vec![Bson::Document(left), Bson::Document(right.clone())],
    );
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;

    #[test]
    fn text_query_detected_at_top_level() {
        assert!(is_text_query(&doc! { "$text": { "$search": "foo" } }));
        assert!(!is_text_query(&doc! { "x": { "$gt": 0 } }));
    }

    #[test]
    fn text_query_detected_inside_and() {
        let predicate = doc! {
            "$and": [ { "a": 1 }, { "$text": { "$search": "foo" } } ]
        };
        assert!(is_text_query(&predicate));
    }

    #[test]
    fn safe_portion_keeps_scalar_equalities() {
        let predicate = doc! { "a": 1, "$where": "this.a == 1" };
        assert_eq!(doc! { "a": 1 }, redact_safe_portion(&predicate));
    }

    #[test]
    fn safe_portion_drops_null_and_structured_comparisons() {
        let predicate = doc! {
            "a": Bson::Null,
            "b": { "$eq": [1, 2] },
            "c": { "d": 1 },
            "e": { "$gt": 5, "$ne": 7 },
        };
        assert_eq!(doc! { "e": { "$gt": 5 } }, redact_safe_portion(&predicate));
    }

    #[test]
    fn safe_portion_keeps_or_only_when_fully_safe() {
        let safe = doc! { "$or": [ { "a": 1 }, { "b": { "$lt": 3 } } ] };
        assert_eq!(safe.clone(), redact_safe_portion(&safe));

        let unsafe_or = doc! { "$or": [ { "a": 1 }, { "b": Bson::Null } ] };
        assert_eq!(Document::new(), redact_safe_portion(&unsafe_or));
    }

    #[test]
    fn safe_portion_recurses_into_and() {
        let predicate = doc! {
            "$and": [ { "a": 1 }, { "b": Bson::Null } ]
        };
        assert_eq!(
            doc! { "$and": [ { "a": 1 } ] },
            redact_safe_portion(&predicate)
        );
    }

    #[test]
    fn dependencies_collect_field_paths() {
        let mut deps = DepsTracker::default();
        add_dependencies(
            &doc! {
                "a.b": 1,
                "$or": [ { "c": { "$gt": 2 } }, { "d": 3 } ],
            },
            &mut deps,
        );
        let fields: Vec<_> = deps.fields.iter().cloned().collect();
        assert_eq!(vec!["a.b", "c", "d"], fields);
        assert!(!deps.need_whole_document);
    }

    #[test]
    fn where_needs_whole_document() {
        let mut deps = DepsTracker::default();
        add_dependencies(&doc! { "$where": "true" }, &mut deps);
        assert!(deps.need_whole_document);
    }

    #[test]
    fn conjoin_flattens_existing_and() {
        let merged = conjoin(doc! { "a": 1 }, &doc! { "b": 2 });
        assert_eq!(doc! { "$and": [ { "a": 1 }, { "b": 2 } ] }, merged);

        let merged = conjoin(merged, &doc! { "c": 3 });
        assert_eq!(
            doc! { "$and": [ { "a": 1 }, { "b": 2 }, { "c": 3 } ] },
            merged
        );
    }
}
