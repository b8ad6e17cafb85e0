//! Error types for parsing and tailing.

use std::io;

use thiserror::Error;

use crate::message::MessageKind;

/// Failure to classify a single line, only surfaced in strict mode.
#[derive(Clone, Debug, Eq, Error, PartialEq)]
pub enum ParseError {
    /// The line was absent or empty.
    #[error("invalid line{{{0:?}}}")]
    Input(Option<String>),
    /// The line looked like `kind` but one of its fields was rejected.
    #[error("invalid {kind} message{{{line}}}: {reason}")]
    Validation {
        kind: MessageKind,
        line: String,
        reason: &'static str,
    },
}

impl ParseError {
    pub(crate) fn validation(kind: MessageKind, line: &str, reason: &'static str) -> Self {
        ParseError::Validation {
            kind,
            line: line.to_owned(),
            reason,
        }
    }
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("Chat log I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("Failed to parse line: {0}")]
    Parse(#[from] ParseError),
    #[error("Invalid pattern: {0}")]
    Pattern(#[from] regex::Error),
    #[error("No observer given")]
    NoObserver,
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
