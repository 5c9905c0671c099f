use std::fmt;
use thiserror::Error;

/// High-level error categories surfaced by the adapter.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Error)]
pub enum AdapterErrorKind {
    #[error("engine backend unavailable")]
    BackendGone,
    #[error("tcp bind failure")]
    Bind,
    #[error("internal error")]
    Internal,
}

/// Enriched error passed back to callers and logs.
#[derive(Clone, Debug)]
pub struct AdapterError {
    pub kind: AdapterErrorKind,
    pub hint: Option<String>,
}

impl fmt::Display for AdapterError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.kind)?;
        if let Some(hint) = &self.hint {
            write!(f, ": {}", hint)?;
        }
        Ok(())
    }
}

impl std::error::Error for AdapterError {}

impl AdapterError {
    pub fn new(kind: AdapterErrorKind) -> Self {
        Self { kind, hint: None }
    }

    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }
}
