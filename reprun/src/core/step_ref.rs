//! Step references given on the command line (`--from 2`, `--to train`).

use std::convert::Infallible;
use std::fmt;
use std::str::FromStr;

use thiserror::Error;

use crate::core::types::Pipeline;

/// A step named either by 1-based ordinal or by name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepRef {
    Ordinal(usize),
    Name(String),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum StepRefError {
    #[error("step ordinals are 1-based; got #0")]
    ZeroOrdinal,
    #[error("no step named '{0}' in the pipeline")]
    UnknownName(String),
}

impl FromStr for StepRef {
    type Err = Infallible;

    /// Anything that parses as an unsigned integer is an ordinal; the rest is a name.
    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let raw = raw.trim();
        Ok(match raw.parse::<usize>() {
            Ok(n) => StepRef::Ordinal(n),
            Err(_) => StepRef::Name(raw.to_string()),
        })
    }
}

impl fmt::Display for StepRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StepRef::Ordinal(n) => write!(f, "#{n}"),
            StepRef::Name(name) => write!(f, "'{name}'"),
        }
    }
}

impl StepRef {
    /// Resolve to a 1-based ordinal.
    ///
    /// Ordinals are passed through unchecked against the pipeline length;
    /// bounds are the range resolver's job so it can report them in context.
    pub fn resolve(&self, pipeline: &Pipeline) -> Result<usize, StepRefError> {
        match self {
            StepRef::Ordinal(0) => Err(StepRefError::ZeroOrdinal),
            StepRef::Ordinal(n) => Ok(*n),
            StepRef::Name(name) => pipeline
                .position(name)
                .map(|offset| offset + 1)
                .ok_or_else(|| StepRefError::UnknownName(name.clone())),
        }
    }
}
