use crate::{auth, exec, parser, usererror::UserError};
use thiserror::Error as ThisError;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, ThisError, PartialEq)]
pub enum Error {
    #[error("parse error: {0}")]
    Parse(#[from] parser::Error),
    #[error("authorization error: {0}")]
    Auth(#[from] auth::Error),
    #[error("execution error: {0}")]
    Execution(#[from] exec::Error),
}

impl UserError for Error {
    fn code(&self) -> u32 {
        match self {
            Error::Parse(e) => e.code(),
            Error::Auth(e) => e.code(),
            Error::Execution(e) => e.code(),
        }
    }
}

/// The coarse classification callers dispatch on when mapping an error
/// to a wire response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Parse,
    TypeMismatch,
    BadValue,
    Unauthorized,
    ResourceExceeded,
    Interrupted,
    Internal,
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Parse(e) => match e {
                parser::Error::StageNotAnObject(_)
                | parser::Error::AggregateFieldNotString(_)
                | parser::Error::PipelineNotArray(_)
                | parser::Error::AllowDiskUseNotBool(_)
                | parser::Error::OptionNotBool(_, _)
                | parser::Error::InvalidSkip(_)
                | parser::Error::InvalidLimit(_)
                | parser::Error::UnwindNotString
                | parser::Error::MatchNotDocument
                | parser::Error::SortNotDocument
                | parser::Error::ProjectNotDocument
                | parser::Error::GroupNotDocument
                | parser::Error::LookupNotDocument => ErrorKind::TypeMismatch,
                parser::Error::UnrecognizedField(_)
                | parser::Error::MissingRequiredField(_)
                | parser::Error::UnrecognizedStageName(_) => ErrorKind::Parse,
                _ => ErrorKind::BadValue,
            },
            Error::Auth(e) => match e {
                auth::Error::Unauthorized => ErrorKind::Unauthorized,
                _ => ErrorKind::BadValue,
            },
            Error::Execution(e) => match e {
                exec::Error::ResultTooLarge(_) => ErrorKind::ResourceExceeded,
                exec::Error::Interrupted => ErrorKind::Interrupted,
                exec::Error::UnwindNotArray(_) | exec::Error::UnsupportedMatch(_) => {
                    ErrorKind::BadValue
                }
                _ => ErrorKind::Internal,
            },
        }
    }
}
