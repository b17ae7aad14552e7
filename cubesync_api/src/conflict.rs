use serde::{Deserialize, Serialize};

/// Why a file could not be patched cleanly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictReason {
    /// At least one hunk's context no longer matches the target file.
    ContextMismatch,
    /// The change reads from a file the target tree does not contain.
    MissingFile,
    /// An added file already exists in the target tree with other content.
    AlreadyExists,
    /// A deleted file differs from the content the delta expected to remove.
    ContentMismatch,
    /// The patched text cannot be stored in the encoding of the target file.
    Unencodable,
}

impl ConflictReason {
    /// Short human-readable description used in logs.
    pub const fn describe(self) -> &'static str {
        match self {
            Self::ContextMismatch => "patch does not apply",
            Self::MissingFile => "does not exist in target tree",
            Self::AlreadyExists => "already exists in target tree",
            Self::ContentMismatch => "content differs from the expected original",
            Self::Unencodable => "patched text does not fit the file encoding",
        }
    }
}

/// A single file left unreconciled by a patch application.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conflict {
    /// File path relative to the target tree root.
    pub path: String,
    /// First reason recorded for this file.
    pub reason: ConflictReason,
    /// Number of hunks that could not be applied.
    #[serde(default)]
    pub rejected_hunks: u32,
    /// 1-based line of the first failing hunk, as recorded in the delta.
    #[serde(default)]
    pub line: Option<u32>,
    /// Residual `.rej` artifact written next to the file, if any.
    #[serde(default)]
    pub reject_file: Option<String>,
}

/// Every file a delta failed to apply to, deduplicated by path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ConflictReport {
    /// Conflicts in the order they were first encountered.
    #[serde(default)]
    pub conflicts: Vec<Conflict>,
}

impl ConflictReport {
    /// Create an empty report.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` when every change applied cleanly.
    pub fn is_empty(&self) -> bool {
        self.conflicts.is_empty()
    }

    /// Number of conflicting files.
    pub fn len(&self) -> usize {
        self.conflicts.len()
    }

    /// Record a conflict; repeated failures on the same file are merged into
    /// the first record.
    pub fn record(&mut self, conflict: Conflict) {
        if let Some(existing) = self
            .conflicts
            .iter_mut()
            .find(|existing| existing.path == conflict.path)
        {
            existing.rejected_hunks += conflict.rejected_hunks;
            if existing.reject_file.is_none() {
                existing.reject_file = conflict.reject_file;
            }
            if existing.line.is_none() {
                existing.line = conflict.line;
            }
            return;
        }
        self.conflicts.push(conflict);
    }

    /// Paths of the conflicting files.
    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.conflicts.iter().map(|conflict| conflict.path.as_str())
    }
}
