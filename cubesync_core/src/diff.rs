//! Whitespace-normalized diffing of two file trees.
//!
//! Hunks are produced by libgit2; this module is responsible for walking the
//! trees, applying the exclusion filters and pairing renames.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use cubesync_api::{
    Delta, DiffHunk, DiffLine, DiffLineKind, DiffRange, DiffStats, FileDelta, FileStatus,
};
use git2::Patch;
use tracing::{debug, warn};
use wildmatch::WildMatch;

use crate::fsutil::{decode, io_error, relative_slash_path, Encoding};
use crate::{display_path, Result};

/// Artifacts that never belong to a delta: logs and previous patch outputs.
pub const DEFAULT_EXCLUDES: &[&str] = &["*.log", "*.patch", "*.rej", "*.orig"];

/// Options controlling delta computation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiffOptions {
    /// Glob patterns matched against the relative path and the file name.
    pub exclude: Vec<String>,
    /// Context lines surrounding each hunk.
    pub context_lines: u32,
}

impl DiffOptions {
    /// Add an exclusion pattern.
    #[must_use]
    pub fn exclude(mut self, pattern: impl Into<String>) -> Self {
        self.exclude.push(pattern.into());
        self
    }
}

impl Default for DiffOptions {
    fn default() -> Self {
        Self {
            exclude: DEFAULT_EXCLUDES.iter().map(|p| (*p).to_owned()).collect(),
            context_lines: 3,
        }
    }
}

/// Computes [`Delta`] values between directory trees.
#[derive(Debug)]
pub struct DiffEngine {
    options: DiffOptions,
    patterns: Vec<WildMatch>,
}

impl DiffEngine {
    /// Build an engine for the given options.
    #[must_use]
    pub fn new(options: DiffOptions) -> Self {
        let patterns = options.exclude.iter().map(|p| WildMatch::new(p)).collect();
        Self { options, patterns }
    }

    /// Options the engine was built with.
    #[must_use]
    pub const fn options(&self) -> &DiffOptions {
        &self.options
    }

    /// Whether `relative` (a `/`-separated path) is filtered out.
    #[must_use]
    pub fn is_excluded(&self, relative: &str) -> bool {
        let name = relative.rsplit('/').next().unwrap_or(relative);
        self.patterns
            .iter()
            .any(|pattern| pattern.matches(relative) || pattern.matches(name))
    }

    /// Compute the change records turning `from_root` into `to_root`.
    ///
    /// A missing root is treated as an empty tree. Binary files are skipped;
    /// text that is not valid UTF-8 is read as Latin-1.
    ///
    /// # Errors
    ///
    /// Returns an error when either tree cannot be walked or read, or when
    /// libgit2 fails to produce hunks.
    pub fn compute_delta(&self, from_root: &Path, to_root: &Path) -> Result<Delta> {
        let from = self.collect_tree(from_root)?;
        let to = self.collect_tree(to_root)?;

        let mut delta = Delta::new(display_path(from_root), display_path(to_root));
        let mut deleted = BTreeSet::new();
        let mut added = BTreeSet::new();

        for (path, old) in &from {
            match to.get(path) {
                Some(new) if new == old => {}
                Some(new) => {
                    let hunks = self.diff_text(path, old, new)?;
                    delta.files.push(file_delta(path, None, FileStatus::Modified, hunks));
                }
                None => {
                    deleted.insert(path.as_str());
                }
            }
        }
        for path in to.keys() {
            if !from.contains_key(path) {
                added.insert(path.as_str());
            }
        }

        for old_path in deleted.clone() {
            let content = &from[old_path];
            if content.is_empty() {
                continue;
            }
            let Some(new_path) = added.iter().copied().find(|path| &to[*path] == content) else {
                continue;
            };
            debug!(from = old_path, to = new_path, "rename detected");
            added.remove(new_path);
            deleted.remove(old_path);
            delta.files.push(file_delta(
                new_path,
                Some(old_path.to_owned()),
                FileStatus::Renamed,
                Vec::new(),
            ));
        }

        for path in added {
            let hunks = self.diff_text(path, "", &to[path])?;
            delta.files.push(file_delta(path, None, FileStatus::Added, hunks));
        }
        for path in deleted {
            let hunks = self.diff_text(path, &from[path], "")?;
            delta.files.push(file_delta(path, None, FileStatus::Deleted, hunks));
        }

        delta.files.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(delta)
    }

    /// Hunks describing the change from `old` to `new` for a single file.
    ///
    /// # Errors
    ///
    /// Propagates libgit2 diff failures.
    pub fn diff_text(&self, path: &str, old: &str, new: &str) -> Result<Vec<DiffHunk>> {
        let mut opts = git2::DiffOptions::new();
        opts.context_lines(self.options.context_lines);
        let path_ref = Path::new(path);
        let patch = Patch::from_buffers(
            old.as_bytes(),
            Some(path_ref),
            new.as_bytes(),
            Some(path_ref),
            Some(&mut opts),
        )?;

        let mut hunks = Vec::with_capacity(patch.num_hunks());
        for hunk_idx in 0..patch.num_hunks() {
            let (hunk, line_count) = patch.hunk(hunk_idx)?;
            let mut lines = Vec::with_capacity(line_count);
            for line_idx in 0..line_count {
                let line = patch.line_in_hunk(hunk_idx, line_idx)?;
                let kind = match line.origin() {
                    ' ' => DiffLineKind::Context,
                    '+' => DiffLineKind::Addition,
                    '-' => DiffLineKind::Deletion,
                    // end-of-file newline markers
                    _ => continue,
                };
                let content = line.content();
                let newline = content.ends_with(b"\n");
                let body = if newline {
                    &content[..content.len() - 1]
                } else {
                    content
                };
                lines.push(DiffLine {
                    kind,
                    text: String::from_utf8_lossy(body).into_owned(),
                    newline,
                });
            }

            hunks.push(DiffHunk {
                header: DiffRange {
                    base_start: hunk.old_start(),
                    base_lines: hunk.old_lines(),
                    head_start: hunk.new_start(),
                    head_lines: hunk.new_lines(),
                },
                section: section_header(hunk.header()),
                lines,
            });
        }
        Ok(hunks)
    }

    fn collect_tree(&self, root: &Path) -> Result<BTreeMap<String, String>> {
        let mut files = BTreeMap::new();
        if !root.exists() {
            debug!(root = %root.display(), "tree does not exist, treated as empty");
            return Ok(files);
        }

        for entry in walkdir::WalkDir::new(root).sort_by_file_name() {
            let entry = entry?;
            if !entry.file_type().is_file() {
                continue;
            }
            let Some(relative) = relative_slash_path(root, entry.path()) else {
                continue;
            };
            if self.is_excluded(&relative) {
                debug!(path = %relative, "excluded from delta");
                continue;
            }
            let bytes = std::fs::read(entry.path()).map_err(io_error(entry.path()))?;
            if bytes.contains(&0) {
                warn!(path = %relative, "binary file skipped");
                continue;
            }
            let (text, encoding) = decode(bytes);
            if encoding == Encoding::Latin1 {
                debug!(path = %relative, "not UTF-8, read as Latin-1");
            }
            files.insert(relative, normalize_text(&text));
        }
        Ok(files)
    }
}

impl Default for DiffEngine {
    fn default() -> Self {
        Self::new(DiffOptions::default())
    }
}

/// Convert CRLF line endings to LF and strip blanks at end of line.
///
/// The presence of a final newline is preserved.
#[must_use]
pub fn normalize_text(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut lines = text.split('\n').peekable();
    while let Some(line) = lines.next() {
        out.push_str(line.trim_end_matches([' ', '\t', '\r']));
        if lines.peek().is_some() {
            out.push('\n');
        }
    }
    out
}

fn file_delta(
    path: &str,
    old_path: Option<String>,
    status: FileStatus,
    hunks: Vec<DiffHunk>,
) -> FileDelta {
    FileDelta {
        path: path.to_owned(),
        old_path,
        status,
        stats: DiffStats::from_hunks(&hunks),
        hunks,
    }
}

fn section_header(header: &[u8]) -> Option<String> {
    let header = String::from_utf8_lossy(header);
    let rest = header.strip_prefix("@@")?;
    let (_, section) = rest.split_once("@@")?;
    let section = section.trim();
    (!section.is_empty()).then(|| section.to_owned())
}
