//! Defect data model
//!
//! A `Defect` is one problem the analyzer found in a file; a `DefectSet` is
//! everything it found in one pass over one file version. Sets are built
//! once per analysis pass and never mutated - each pass supersedes the last.

use crate::util::collapse_whitespace;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Category of a detected defect
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DefectKind {
    Syntax,
    Name,
    Type,
    Other,
}

impl DefectKind {
    pub fn label(&self) -> &'static str {
        match self {
            DefectKind::Syntax => "SyntaxError",
            DefectKind::Name => "NameError",
            DefectKind::Type => "TypeError",
            DefectKind::Other => "Error",
        }
    }
}

impl fmt::Display for DefectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.label())
    }
}

/// 1-based position of a defect in its file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceLocation {
    pub line: usize,
    pub column: usize,
}

/// One problem detected in source text
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Defect {
    pub kind: DefectKind,
    pub message: String,
    pub location: Option<SourceLocation>,
    /// The analyzer's raw report line, kept for audit output
    pub raw: String,
}

impl Defect {
    pub fn new(kind: DefectKind, message: impl Into<String>) -> Self {
        let message = message.into();
        let raw = format!("{}: {}", kind.label(), message);
        Self {
            kind,
            message,
            location: None,
            raw,
        }
    }

    pub fn at(mut self, line: usize, column: usize) -> Self {
        self.location = Some(SourceLocation { line, column });
        self
    }

    /// Identity used for recurrence tracking. Location is deliberately
    /// excluded: the same mistake reported one line lower after an edit is
    /// still the same mistake.
    pub fn identity(&self) -> DefectIdentity {
        DefectIdentity {
            kind: self.kind,
            normalized: collapse_whitespace(&self.message.to_lowercase()),
        }
    }
}

impl fmt::Display for Defect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.location {
            Some(loc) => write!(f, "{} (line {}): {}", self.kind, loc.line, self.message),
            None => write!(f, "{}: {}", self.kind, self.message),
        }
    }
}

/// Deduplication/recurrence key for a defect
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DefectIdentity {
    pub kind: DefectKind,
    pub normalized: String,
}

/// Ordered defects for one file version. Empty means clean.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DefectSet(Vec<Defect>);

impl DefectSet {
    pub fn new(defects: Vec<Defect>) -> Self {
        Self(defects)
    }

    pub fn empty() -> Self {
        Self(Vec::new())
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// The lead defect - the first one reported, used for escalation queries
    pub fn lead(&self) -> Option<&Defect> {
        self.0.first()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Defect> {
        self.0.iter()
    }
}

impl<'a> IntoIterator for &'a DefectSet {
    type Item = &'a Defect;
    type IntoIter = std::slice::Iter<'a, Defect>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}
