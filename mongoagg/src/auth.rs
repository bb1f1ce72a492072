//! Privilege derivation for the aggregate command. This module inspects
//! the raw command document, before parsing, and computes the privilege
//! set the request demands; the authorization decision itself belongs to
//! the caller's [`AuthorizationSession`].

use crate::{namespace::Namespace, usererror::UserError};
use bson::{Bson, Document};
use std::collections::BTreeSet;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error, PartialEq)]
pub enum Error {
    #[error("Invalid input namespace, {0}")]
    InvalidInputNamespace(String),
    #[error("Invalid $out target namespace, {0}")]
    InvalidOutNamespace(String),
    #[error("unauthorized")]
    Unauthorized,
}

impl UserError for Error {
    fn code(&self) -> u32 {
        match self {
            Error::InvalidInputNamespace(_) => 17138,
            Error::InvalidOutNamespace(_) => 17139,
            Error::Unauthorized => 13,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ActionType {
    Find,
    Insert,
    Remove,
    BypassDocumentValidation,
}

/// A set of actions required on one namespace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Privilege {
    pub resource: Namespace,
    pub actions: BTreeSet<ActionType>,
}

impl Privilege {
    fn new(resource: Namespace, actions: impl IntoIterator<Item = ActionType>) -> Self {
        Privilege {
            resource,
            actions: actions.into_iter().collect(),
        }
    }
}

/// The caller-supplied authority that decides whether a privilege set is
/// held.
pub trait AuthorizationSession {
    fn is_authorized_for_privileges(&self, privileges: &[Privilege]) -> bool;
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

/// Computes the privilege set an aggregate command requires: `find` on
/// the input namespace, `insert` and `remove` (plus bypass when the
/// command requests it) on a `$out` target, and `find` on every
/// `$lookup` source.
pub fn required_privileges(db: &str, cmd: &Document) -> Result<Vec<Privilege>> {
    let input_collection = cmd
        .get("aggregate")
        .and_then(Bson::as_str)
        .unwrap_or_default();
    let input_ns = Namespace::new(db, input_collection);
    if !input_ns.is_valid() {
        return Err(Error::InvalidInputNamespace(input_ns.ns()));
    }

    let mut privileges = vec![Privilege::new(input_ns, [ActionType::Find])];

    let pipeline = match cmd.get("pipeline") {
        Some(Bson::Array(stages)) => stages.as_slice(),
        _ => &[],
    };
    for stage in pipeline {
        let spec = match stage {
            Bson::Document(spec) => spec,
            _ => continue,
        };
        let (name, payload) = match spec.iter().next() {
            Some(entry) => entry,
            None => continue,
        };
        match (name.as_str(), payload) {
            ("$out", Bson::String(target)) => {
                let out_ns = Namespace::new(db, target.clone());
                if !out_ns.is_valid() {
                    return Err(Error::InvalidOutNamespace(out_ns.ns()));
                }
                let mut actions = vec![ActionType::Insert, ActionType::Remove];
                if cmd
                    .get("bypassDocumentValidation")
                    .map_or(false, truthy)
                {
                    actions.push(ActionType::BypassDocumentValidation);
                }
                privileges.push(Privilege::new(out_ns, actions));
            }
            // "$lookUp" is a legacy spelling some callers still send;
            // "$lookup" is canonical.
            ("$lookup", Bson::Document(lookup)) | ("$lookUp", Bson::Document(lookup)) => {
                if let Some(from) = lookup.get("from").and_then(Bson::as_str) {
                    privileges.push(Privilege::new(
                        Namespace::new(db, from),
                        [ActionType::Find],
                    ));
                }
            }
            _ => {}
        }
    }
    Ok(privileges)
}

/// Computes the required privileges and defers the decision to
/// `session`.
pub fn check_auth_for_command(
    session: &dyn AuthorizationSession,
    db: &str,
    cmd: &Document,
) -> Result<()> {
    let privileges = required_privileges(db, cmd)?;
    if session.is_authorized_for_privileges(&privileges) {
        Ok(())
    } else {
        Err(Error::Unauthorized)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;

    struct Allow(bool);

    impl AuthorizationSession for Allow {
        fn is_authorized_for_privileges(&self, _privileges: &[Privilege]) -> bool {
            self.0
        }
    }

    #[test]
    fn input_namespace_needs_find() {
        let privileges =
            required_privileges("test", &doc! { "aggregate": "c", "pipeline": [] }).unwrap();
        assert_eq!(
            vec![Privilege::new(
                Namespace::new("test", "c"),
                [ActionType::Find]
            )],
            privileges
        );
    }

    #[test]
    fn out_target_needs_insert_and_remove() {
        let cmd = doc! { "aggregate": "c", "pipeline": [ { "$out": "target" } ] };
        let privileges = required_privileges("test", &cmd).unwrap();
        assert_eq!(
            Privilege::new(
                Namespace::new("test", "target"),
                [ActionType::Insert, ActionType::Remove]
            ),
            privileges[1]
        );
    }

    #[test]
    fn bypass_validation_extends_out_actions() {
        let cmd = doc! {
            "aggregate": "c",
            "pipeline": [ { "$out": "target" } ],
            "bypassDocumentValidation": true,
        };
        let privileges = required_privileges("test", &cmd).unwrap();
        assert!(privileges[1]
            .actions
            .contains(&ActionType::BypassDocumentValidation));
    }

    #[test]
    fn lookup_source_needs_find_in_both_spellings() {
        let cmd = doc! { "aggregate": "c", "pipeline": [
            { "$lookup": { "from": "one", "localField": "a", "foreignField": "b", "as": "j" } },
            { "$lookUp": { "from": "two", "localField": "a", "foreignField": "b", "as": "j" } },
        ] };
        let privileges = required_privileges("test", &cmd).unwrap();
        let sources: Vec<String> = privileges[1..]
            .iter()
            .map(|p| p.resource.collection.clone())
            .collect();
        assert_eq!(vec!["one", "two"], sources);
    }

    #[test]
    fn invalid_namespaces_rejected() {
        assert_eq!(
            Err(Error::InvalidInputNamespace("test.".to_string())),
            required_privileges("test", &doc! { "aggregate": "", "pipeline": [] })
        );
        let cmd = doc! { "aggregate": "c", "pipeline": [ { "$out": "ba$d" } ] };
        assert_eq!(
            Err(Error::InvalidOutNamespace("test.ba$d".to_string())),
            required_privileges("test", &cmd)
        );
    }

    #[test]
    fn session_decides() {
        let cmd = doc! { "aggregate": "c", "pipeline": [] };
        assert_eq!(Ok(()), check_auth_for_command(&Allow(true), "test", &cmd));
        assert_eq!(
            Err(Error::Unauthorized),
            check_auth_for_command(&Allow(false), "test", &cmd)
        );
    }
}
