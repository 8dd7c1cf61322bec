use std::path::{Path, PathBuf};

use tracing::{error, field, warn};

use crate::object::ObjId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    /// Only metadata was lost; content is intact.
    Warning,
    /// Content of the entry is missing or incomplete.
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IssueKind {
    /// A cached payload does not decode. Rebuilding the local cache may help.
    InvalidCachedData,
    /// A tree refers to an object that is not in the local cache.
    MissingChild,
    /// A tree entry name is not a single path component.
    InvalidName,
    /// A chunk could not be fetched, opened or verified from the repository.
    CorruptedChunk,
    /// A chunk decoded to something other than a blob.
    InvalidChunk,
    /// A chunk is encrypted and no private key was supplied.
    MissingKey,
    /// The destination already exists with a different file type.
    WrongFileType,
    /// Creating or writing the destination failed.
    Write,
    /// Ownership, permissions or timestamps could not be applied.
    Metadata,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Issue {
    pub severity: Severity,
    pub kind: IssueKind,
    pub path: PathBuf,
    pub objid: Option<ObjId>,
    /// Byte offset of the affected chunk, for chunk failures.
    pub offset: Option<u64>,
    pub message: String,
}

impl Issue {
    pub(crate) fn error(kind: IssueKind, path: &Path, message: String) -> Self {
        Issue {
            severity: Severity::Error,
            kind,
            path: path.to_path_buf(),
            objid: None,
            offset: None,
            message,
        }
    }

    pub(crate) fn warning(kind: IssueKind, path: &Path, message: String) -> Self {
        Issue {
            severity: Severity::Warning,
            ..Issue::error(kind, path, message)
        }
    }

    pub(crate) fn with_objid(mut self, objid: ObjId) -> Self {
        self.objid = Some(objid);
        self
    }

    pub(crate) fn at_offset(mut self, offset: u64) -> Self {
        self.offset = Some(offset);
        self
    }

    fn log(&self) {
        let objid = self.objid.map(field::display);
        match self.severity {
            Severity::Error => error!(
                kind = ?self.kind,
                path = %self.path.display(),
                objid,
                offset = self.offset,
                "{}",
                self.message
            ),
            Severity::Warning => warn!(
                kind = ?self.kind,
                path = %self.path.display(),
                objid,
                offset = self.offset,
                "{}",
                self.message
            ),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// All content was written.
    Restored,
    /// Nothing was attempted for this entry.
    Skipped(String),
    /// The entry was attempted but its content is incomplete.
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub path: PathBuf,
    pub outcome: Outcome,
}

/// Everything a restore did and everything it could not do.
#[derive(Debug, Clone, Default)]
pub struct RestoreReport {
    pub entries: Vec<Entry>,
    pub issues: Vec<Issue>,
    pub bytes_written: u64,
}

impl RestoreReport {
    /// True when no warning or error was recorded.
    pub fn is_complete(&self) -> bool {
        self.issues.is_empty()
    }

    pub fn errors(&self) -> impl Iterator<Item = &Issue> {
        self.issues
            .iter()
            .filter(|issue| issue.severity == Severity::Error)
    }

    pub fn warnings(&self) -> impl Iterator<Item = &Issue> {
        self.issues
            .iter()
            .filter(|issue| issue.severity == Severity::Warning)
    }

    pub fn outcome(&self, path: &Path) -> Option<&Outcome> {
        self.entries
            .iter()
            .find(|entry| entry.path == path)
            .map(|entry| &entry.outcome)
    }

    pub fn restored(&self) -> usize {
        self.count(|outcome| matches!(outcome, Outcome::Restored))
    }

    pub fn skipped(&self) -> usize {
        self.count(|outcome| matches!(outcome, Outcome::Skipped(_)))
    }

    pub fn failed(&self) -> usize {
        self.count(|outcome| matches!(outcome, Outcome::Failed(_)))
    }

    fn count(&self, f: impl Fn(&Outcome) -> bool) -> usize {
        self.entries.iter().filter(|entry| f(&entry.outcome)).count()
    }

    /// Logs and keeps `issue`.
    pub(crate) fn record(&mut self, issue: Issue) {
        issue.log();
        self.issues.push(issue);
    }

    pub(crate) fn finish(&mut self, path: &Path, outcome: Outcome) {
        self.entries.push(Entry {
            path: path.to_path_buf(),
            outcome,
        });
    }

    pub(crate) fn merge(&mut self, other: RestoreReport) {
        self.entries.extend(other.entries);
        self.issues.extend(other.issues);
        self.bytes_written += other.bytes_written;
    }
}
