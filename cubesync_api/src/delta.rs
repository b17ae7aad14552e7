use serde::{Deserialize, Serialize};

/// A full delta computed between two file trees.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Delta {
    /// Label of the tree the delta was computed from (e.g., a baseline tag).
    pub from: String,
    /// Label of the tree the delta leads to (e.g., the local module path).
    pub to: String,
    /// Per-file change records, ordered by path.
    #[serde(default)]
    pub files: Vec<FileDelta>,
}

impl Delta {
    /// Create an empty delta between two labelled trees.
    pub fn new(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
            files: Vec::new(),
        }
    }

    /// Returns `true` when the delta carries no change at all.
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Aggregated insertions/deletions over every file.
    pub fn stats(&self) -> DiffStats {
        self.files
            .iter()
            .fold(DiffStats::ZERO, |acc, file| acc.add(file.stats))
    }

    /// Looks up the change record targeting `path` (new side).
    pub fn file(&self, path: &str) -> Option<&FileDelta> {
        self.files.iter().find(|file| file.path == path)
    }
}

/// Change record for a single file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileDelta {
    /// Path of the file relative to the tree root (new side).
    pub path: String,
    /// Previous path when the file was renamed.
    #[serde(default)]
    pub old_path: Option<String>,
    /// Kind of change.
    pub status: FileStatus,
    /// High-level summary of insertions/deletions.
    #[serde(default)]
    pub stats: DiffStats,
    /// The hunks that make up this file change.
    #[serde(default)]
    pub hunks: Vec<DiffHunk>,
}

impl FileDelta {
    /// Path the change reads from: the old path for renames, `path` otherwise.
    pub fn source_path(&self) -> &str {
        self.old_path.as_deref().unwrap_or(&self.path)
    }
}

/// Summary information about the changes within a file delta.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct DiffStats {
    /// Number of added lines.
    pub additions: u32,
    /// Number of removed lines.
    pub deletions: u32,
}

impl DiffStats {
    /// A stats instance with zero additions and deletions.
    pub const ZERO: Self = Self {
        additions: 0,
        deletions: 0,
    };

    /// Convenience constructor for explicit values.
    pub const fn new(additions: u32, deletions: u32) -> Self {
        Self {
            additions,
            deletions,
        }
    }

    /// Combine two stats structs.
    pub const fn add(self, other: Self) -> Self {
        Self {
            additions: self.additions + other.additions,
            deletions: self.deletions + other.deletions,
        }
    }

    /// Count the additions and deletions carried by a set of hunks.
    pub fn from_hunks(hunks: &[DiffHunk]) -> Self {
        let mut stats = Self::ZERO;
        for line in hunks.iter().flat_map(|hunk| hunk.lines.iter()) {
            match line.kind {
                DiffLineKind::Addition => stats.additions += 1,
                DiffLineKind::Deletion => stats.deletions += 1,
                DiffLineKind::Context => {}
            }
        }
        stats
    }
}

/// A contiguous set of changes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffHunk {
    /// The range header describing the hunk offsets.
    pub header: DiffRange,
    /// Optional section header (e.g., function signature) following `@@`.
    #[serde(default)]
    pub section: Option<String>,
    /// Line-level changes inside the hunk.
    #[serde(default)]
    pub lines: Vec<DiffLine>,
}

impl DiffHunk {
    /// Lines the hunk expects to find (context and deletions).
    pub fn old_lines(&self) -> impl Iterator<Item = &DiffLine> {
        self.lines
            .iter()
            .filter(|line| line.kind != DiffLineKind::Addition)
    }

    /// Lines the hunk leaves behind (context and additions).
    pub fn new_lines(&self) -> impl Iterator<Item = &DiffLine> {
        self.lines
            .iter()
            .filter(|line| line.kind != DiffLineKind::Deletion)
    }
}

/// The line number ranges referenced by a hunk header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffRange {
    /// Starting line number for the old side.
    pub base_start: u32,
    /// Number of lines covered on the old side.
    pub base_lines: u32,
    /// Starting line number for the new side.
    pub head_start: u32,
    /// Number of lines covered on the new side.
    pub head_lines: u32,
}

/// A single line within a hunk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffLine {
    /// The role the line plays in the hunk.
    pub kind: DiffLineKind,
    /// Line text without its terminator.
    pub text: String,
    /// `false` when the line is the last one of its file and has no terminator.
    #[serde(default = "default_newline")]
    pub newline: bool,
}

impl DiffLine {
    /// Construct a terminated line.
    pub fn new(kind: DiffLineKind, text: impl Into<String>) -> Self {
        Self {
            kind,
            text: text.into(),
            newline: true,
        }
    }
}

const fn default_newline() -> bool {
    true
}

/// Type of a line contained in a hunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiffLineKind {
    /// Unchanged context line.
    Context,
    /// A newly added line.
    Addition,
    /// A deleted line.
    Deletion,
}

/// File status from the delta's perspective.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileStatus {
    /// File only exists in the "to" tree.
    Added,
    /// File only exists in the "from" tree.
    Deleted,
    /// File exists in both trees with modifications.
    Modified,
    /// File path changed between both trees.
    Renamed,
}
