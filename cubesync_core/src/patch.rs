//! Unified diff text and file-by-file patch application.
//!
//! Application never aborts on a hunk that does not match: the hunk is
//! written to a `.rej` file next to its target and recorded in the returned
//! [`ConflictReport`], and the remaining hunks and files are still applied.

use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use cubesync_api::{
    Conflict, ConflictReason, ConflictReport, Delta, DiffHunk, DiffLine, DiffLineKind, DiffRange,
    DiffStats, FileDelta, FileStatus,
};
use tracing::{debug, error, warn};

use crate::diff::normalize_text;
use crate::fsutil;
use crate::{Error, Result};

const NO_NEWLINE_MARKER: &str = "\\ No newline at end of file";

/// Render a delta as git-style unified diff text.
#[must_use]
pub fn render(delta: &Delta) -> String {
    let mut out = String::new();
    for file in &delta.files {
        let old = file.source_path();
        let _ = writeln!(out, "diff --git a/{old} b/{}", file.path);
        match file.status {
            FileStatus::Added => {
                out.push_str("new file mode 100644\n");
                if !file.hunks.is_empty() {
                    let _ = writeln!(out, "--- /dev/null\n+++ b/{}", file.path);
                }
            }
            FileStatus::Deleted => {
                out.push_str("deleted file mode 100644\n");
                if !file.hunks.is_empty() {
                    let _ = writeln!(out, "--- a/{old}\n+++ /dev/null");
                }
            }
            FileStatus::Renamed => {
                let _ = writeln!(out, "rename from {old}\nrename to {}", file.path);
                if !file.hunks.is_empty() {
                    let _ = writeln!(out, "--- a/{old}\n+++ b/{}", file.path);
                }
            }
            FileStatus::Modified => {
                let _ = writeln!(out, "--- a/{old}\n+++ b/{}", file.path);
            }
        }
        for hunk in &file.hunks {
            render_hunk(&mut out, hunk);
        }
    }
    out
}

fn render_hunk(out: &mut String, hunk: &DiffHunk) {
    let DiffRange {
        base_start,
        base_lines,
        head_start,
        head_lines,
    } = hunk.header;
    let _ = write!(out, "@@ -{base_start},{base_lines} +{head_start},{head_lines} @@");
    if let Some(section) = &hunk.section {
        let _ = write!(out, " {section}");
    }
    out.push('\n');
    for line in &hunk.lines {
        let prefix = match line.kind {
            DiffLineKind::Context => ' ',
            DiffLineKind::Addition => '+',
            DiffLineKind::Deletion => '-',
        };
        out.push(prefix);
        out.push_str(&line.text);
        out.push('\n');
        if !line.newline {
            out.push_str(NO_NEWLINE_MARKER);
            out.push('\n');
        }
    }
}

/// Parse unified diff text produced by [`render`] or `git diff`.
///
/// The returned delta carries empty tree labels.
///
/// # Errors
///
/// Returns [`Error::MalformedPatch`] when the text cannot be parsed.
pub fn parse(text: &str) -> Result<Delta> {
    let mut delta = Delta::default();
    let mut current: Option<FileDelta> = None;
    let mut lines = text.lines().enumerate().peekable();

    while let Some((idx, line)) = lines.next() {
        let number = idx + 1;
        if let Some(rest) = line.strip_prefix("diff --git ") {
            if let Some(file) = current.take() {
                delta.files.push(finish_file(file));
            }
            let (old, new) = split_git_paths(rest).ok_or_else(|| malformed(number, "bad file header"))?;
            current = Some(FileDelta {
                old_path: (old != new).then(|| old.to_owned()),
                path: new.to_owned(),
                status: if old == new {
                    FileStatus::Modified
                } else {
                    FileStatus::Renamed
                },
                stats: DiffStats::ZERO,
                hunks: Vec::new(),
            });
            continue;
        }

        let Some(file) = current.as_mut() else {
            if line.trim().is_empty() {
                continue;
            }
            return Err(malformed(number, "content before the first file header"));
        };

        if line.starts_with("new file mode") || line == "--- /dev/null" {
            file.status = FileStatus::Added;
        } else if line.starts_with("deleted file mode") || line == "+++ /dev/null" {
            file.status = FileStatus::Deleted;
        } else if let Some(old) = line.strip_prefix("rename from ") {
            file.status = FileStatus::Renamed;
            file.old_path = Some(old.to_owned());
        } else if let Some(new) = line.strip_prefix("rename to ") {
            file.status = FileStatus::Renamed;
            new.clone_into(&mut file.path);
        } else if line.starts_with("@@") {
            let (header, section) = parse_hunk_header(line).ok_or_else(|| malformed(number, "bad hunk header"))?;
            let mut hunk = DiffHunk {
                header,
                section,
                lines: Vec::new(),
            };
            let mut old_left = header.base_lines;
            let mut new_left = header.head_lines;
            while old_left > 0 || new_left > 0 {
                let (idx, body) = lines
                    .next()
                    .ok_or_else(|| malformed(number, "hunk is truncated"))?;
                let (kind, text) = match body.chars().next() {
                    Some(' ') => (DiffLineKind::Context, &body[1..]),
                    None => (DiffLineKind::Context, ""),
                    Some('+') => (DiffLineKind::Addition, &body[1..]),
                    Some('-') => (DiffLineKind::Deletion, &body[1..]),
                    Some('\\') => {
                        mark_no_newline(&mut hunk);
                        continue;
                    }
                    Some(_) => return Err(malformed(idx + 1, "unexpected line inside hunk")),
                };
                let (old_used, new_used) = match kind {
                    DiffLineKind::Context => (1, 1),
                    DiffLineKind::Addition => (0, 1),
                    DiffLineKind::Deletion => (1, 0),
                };
                old_left = old_left
                    .checked_sub(old_used)
                    .ok_or_else(|| malformed(idx + 1, "hunk exceeds its old line count"))?;
                new_left = new_left
                    .checked_sub(new_used)
                    .ok_or_else(|| malformed(idx + 1, "hunk exceeds its new line count"))?;
                hunk.lines.push(DiffLine::new(kind, text));
            }
            if lines.peek().is_some_and(|(_, next)| next.starts_with('\\')) {
                lines.next();
                mark_no_newline(&mut hunk);
            }
            file.hunks.push(hunk);
        } else if line.starts_with("--- ")
            || line.starts_with("+++ ")
            || line.starts_with("index ")
            || line.starts_with("similarity index")
            || line.starts_with("old mode")
            || line.starts_with("new mode")
        {
            // informational headers
        } else {
            return Err(malformed(number, "unexpected line between hunks"));
        }
    }

    if let Some(file) = current.take() {
        delta.files.push(finish_file(file));
    }
    Ok(delta)
}

fn finish_file(mut file: FileDelta) -> FileDelta {
    file.stats = DiffStats::from_hunks(&file.hunks);
    file
}

fn mark_no_newline(hunk: &mut DiffHunk) {
    if let Some(last) = hunk.lines.last_mut() {
        last.newline = false;
    }
}

fn malformed(line: usize, reason: &str) -> Error {
    Error::MalformedPatch {
        line,
        reason: reason.to_owned(),
    }
}

fn split_git_paths(rest: &str) -> Option<(&str, &str)> {
    let rest = rest.strip_prefix("a/")?;
    let (old, new) = rest.split_once(" b/")?;
    Some((old, new))
}

fn parse_hunk_header(line: &str) -> Option<(DiffRange, Option<String>)> {
    let rest = line.strip_prefix("@@ -")?;
    let (ranges, section) = rest.split_once(" @@")?;
    let (old, new) = ranges.split_once(" +")?;
    let (base_start, base_lines) = parse_range(old)?;
    let (head_start, head_lines) = parse_range(new)?;
    let section = section.trim();
    Some((
        DiffRange {
            base_start,
            base_lines,
            head_start,
            head_lines,
        },
        (!section.is_empty()).then(|| section.to_owned()),
    ))
}

fn parse_range(range: &str) -> Option<(u32, u32)> {
    match range.split_once(',') {
        Some((start, count)) => Some((start.parse().ok()?, count.parse().ok()?)),
        None => Some((range.parse().ok()?, 1)),
    }
}

/// Applies deltas onto a directory tree.
#[derive(Debug, Clone)]
pub struct PatchApplier {
    root: PathBuf,
}

impl PatchApplier {
    /// Bind an applier to the tree rooted at `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Root of the target tree.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Apply every file change of `delta`, collecting conflicts instead of
    /// stopping at the first one.
    ///
    /// # Errors
    ///
    /// Returns an error only when the target tree cannot be read or written.
    pub fn apply(&self, delta: &Delta) -> Result<ConflictReport> {
        let mut report = ConflictReport::new();
        for file in &delta.files {
            self.apply_file(file, &mut report)?;
        }
        if report.is_empty() {
            debug!(root = %self.root.display(), files = delta.files.len(), "delta applied cleanly");
        }
        Ok(report)
    }

    fn apply_file(&self, file: &FileDelta, report: &mut ConflictReport) -> Result<()> {
        let target = self.root.join(&file.path);
        match file.status {
            FileStatus::Added => {
                let expected = side_text(&file.hunks, true);
                if target.exists() {
                    let existing = normalize_text(&fsutil::read_to_string(&target)?);
                    if existing != expected {
                        self.reject(file, ConflictReason::AlreadyExists, &file.hunks, report)?;
                    }
                    return Ok(());
                }
                fsutil::write(&target, expected)
            }
            FileStatus::Deleted => {
                if !target.exists() {
                    return Ok(());
                }
                let expected = side_text(&file.hunks, false);
                let existing = normalize_text(&fsutil::read_to_string(&target)?);
                if existing == expected {
                    fsutil::remove_file(&target)
                } else {
                    self.reject(file, ConflictReason::ContentMismatch, &file.hunks, report)
                }
            }
            FileStatus::Renamed => {
                let source = self.root.join(file.source_path());
                if source.exists() && source != target {
                    if target.exists() && !same_text(&source, &target)? {
                        return self.reject(file, ConflictReason::AlreadyExists, &file.hunks, report);
                    }
                    if let Some(parent) = target.parent() {
                        fsutil::create_dir_all(parent)?;
                    }
                    std::fs::rename(&source, &target).map_err(fsutil::io_error(&source))?;
                } else if !target.exists() {
                    return self.reject(file, ConflictReason::MissingFile, &file.hunks, report);
                }
                self.patch_existing(file, &target, report)
            }
            FileStatus::Modified => {
                if !target.exists() {
                    return self.reject(file, ConflictReason::MissingFile, &file.hunks, report);
                }
                self.patch_existing(file, &target, report)
            }
        }
    }

    fn patch_existing(
        &self,
        file: &FileDelta,
        target: &Path,
        report: &mut ConflictReport,
    ) -> Result<()> {
        if file.hunks.is_empty() {
            return Ok(());
        }
        let (original, encoding) = fsutil::read_text(target)?;
        let outcome = apply_hunks(&original, &file.hunks);
        if outcome.text != original {
            let Some(bytes) = encoding.encode(&outcome.text) else {
                return self.reject(file, ConflictReason::Unencodable, &file.hunks, report);
            };
            fsutil::write(target, bytes)?;
        }
        if outcome.rejected.is_empty() {
            return fsutil::remove_file(&reject_path(target));
        }
        let rejected: Vec<DiffHunk> = outcome.rejected.into_iter().cloned().collect();
        self.reject(file, ConflictReason::ContextMismatch, &rejected, report)
    }

    fn reject(
        &self,
        file: &FileDelta,
        reason: ConflictReason,
        hunks: &[DiffHunk],
        report: &mut ConflictReport,
    ) -> Result<()> {
        warn!(path = %file.path, reason = reason.describe(), hunks = hunks.len(), "patch failed");
        let target = self.root.join(&file.path);
        let mut reject_file = None;
        if !hunks.is_empty() {
            let mut text = format!("diff a/{} b/{}\t(rejected hunks)\n", file.source_path(), file.path);
            for hunk in hunks {
                render_hunk(&mut text, hunk);
            }
            fsutil::write(&reject_path(&target), text)?;
            reject_file = Some(format!("{}.rej", file.path));
        }
        report.record(Conflict {
            path: file.path.clone(),
            reason,
            rejected_hunks: u32::try_from(hunks.len()).unwrap_or(u32::MAX),
            line: hunks.first().map(|hunk| hunk.header.base_start),
            reject_file,
        });
        Ok(())
    }
}

fn same_text(a: &Path, b: &Path) -> Result<bool> {
    Ok(normalize_text(&fsutil::read_to_string(a)?) == normalize_text(&fsutil::read_to_string(b)?))
}

fn reject_path(target: &Path) -> PathBuf {
    let mut name = target.as_os_str().to_owned();
    name.push(".rej");
    PathBuf::from(name)
}

/// Full file text on one side of a whole-file change.
fn side_text(hunks: &[DiffHunk], new_side: bool) -> String {
    let skipped = if new_side {
        DiffLineKind::Deletion
    } else {
        DiffLineKind::Addition
    };
    let mut out = String::new();
    for line in hunks
        .iter()
        .flat_map(|hunk| hunk.lines.iter())
        .filter(|line| line.kind != skipped)
    {
        out.push_str(&line.text);
        if line.newline {
            out.push('\n');
        }
    }
    out
}

/// A target line; `text` excludes the line terminator.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Line {
    text: String,
    newline: bool,
    crlf: bool,
}

struct HunkOutcome<'a> {
    text: String,
    rejected: Vec<&'a DiffHunk>,
}

fn apply_hunks<'a>(content: &str, hunks: &'a [DiffHunk]) -> HunkOutcome<'a> {
    let mut lines: Vec<Line> = content
        .split_inclusive('\n')
        .map(|raw| match raw.strip_suffix('\n') {
            Some(text) => Line {
                text: text.strip_suffix('\r').unwrap_or(text).to_owned(),
                newline: true,
                crlf: text.ends_with('\r'),
            },
            None => Line {
                text: raw.to_owned(),
                newline: false,
                crlf: false,
            },
        })
        .collect();
    // added lines follow the dominant line ending of the file
    let terminated = lines.iter().filter(|line| line.newline).count();
    let crlf = lines.iter().filter(|line| line.crlf).count() * 2 > terminated;

    let mut rejected = Vec::new();
    let mut offset: isize = 0;
    for hunk in hunks {
        let old: Vec<&DiffLine> = hunk.old_lines().collect();
        let new: Vec<&DiffLine> = hunk.new_lines().collect();
        let base = hunk_base(hunk);
        let expected = clamp(base + offset, lines.len());

        let applied_at = if !new.is_empty() && !same_side(&old, &new) {
            locate(&lines, &new, expected)
        } else {
            None
        };
        let forward_at = locate(&lines, &old, expected);

        let already_applied = match (applied_at, forward_at) {
            (Some(applied), Some(forward)) => applied.abs_diff(expected) <= forward.abs_diff(expected),
            (Some(_), None) => true,
            _ => false,
        };
        let growth = isize::try_from(new.len()).unwrap_or(0) - isize::try_from(old.len()).unwrap_or(0);

        if already_applied {
            if let Some(position) = applied_at {
                debug!(start = hunk.header.base_start, "hunk already applied");
                offset = as_isize(position) - base + growth;
            }
        } else if let Some(position) = forward_at {
            let replacement = splice_lines(&lines[position..position + old.len()], hunk, crlf);
            lines.splice(position..position + old.len(), replacement);
            offset = as_isize(position) - base + growth;
        } else {
            rejected.push(hunk);
        }
    }

    let mut text = String::with_capacity(content.len());
    for line in &lines {
        text.push_str(&line.text);
        if line.crlf {
            text.push('\r');
        }
        if line.newline {
            text.push('\n');
        }
    }
    HunkOutcome { text, rejected }
}

/// New side of `hunk` over the matched target lines. Context lines keep the
/// target's bytes, added lines take the file's line ending.
fn splice_lines(matched: &[Line], hunk: &DiffHunk, crlf: bool) -> Vec<Line> {
    let mut matched = matched.iter();
    let mut out = Vec::with_capacity(hunk.lines.len());
    for line in &hunk.lines {
        match line.kind {
            DiffLineKind::Context => out.extend(matched.next().cloned()),
            DiffLineKind::Deletion => {
                matched.next();
            }
            DiffLineKind::Addition => out.push(Line {
                text: line.text.clone(),
                newline: line.newline,
                crlf: crlf && line.newline,
            }),
        }
    }
    out
}

/// Zero-based index where the hunk's old side starts.
fn hunk_base(hunk: &DiffHunk) -> isize {
    let start = as_isize(hunk.header.base_start as usize);
    if hunk.header.base_lines == 0 {
        start
    } else {
        start - 1
    }
}

fn as_isize(value: usize) -> isize {
    isize::try_from(value).unwrap_or(isize::MAX)
}

fn clamp(index: isize, len: usize) -> usize {
    usize::try_from(index.max(0)).unwrap_or(0).min(len)
}

fn same_side(old: &[&DiffLine], new: &[&DiffLine]) -> bool {
    old.len() == new.len() && old.iter().zip(new).all(|(a, b)| a.text == b.text)
}

/// Nearest position to `expected` where `wanted` matches, ignoring blanks at
/// end of line.
fn locate(lines: &[Line], wanted: &[&DiffLine], expected: usize) -> Option<usize> {
    if wanted.len() > lines.len() {
        return None;
    }
    let last = lines.len() - wanted.len();
    let matches_at = |position: usize| {
        lines[position..position + wanted.len()]
            .iter()
            .zip(wanted)
            .all(|(have, want)| have.text.trim_end() == want.text.trim_end())
    };
    let expected = expected.min(last);
    for distance in 0..=last {
        if let Some(before) = expected.checked_sub(distance) {
            if matches_at(before) {
                return Some(before);
            }
        }
        let after = expected + distance;
        if distance > 0 && after <= last && matches_at(after) {
            return Some(after);
        }
        if distance > expected && after > last {
            break;
        }
    }
    None
}

/// Write a `git apply`-style log of the conflicting files.
///
/// # Errors
///
/// Returns an error when the log cannot be written.
pub fn write_conflict_log(report: &ConflictReport, path: &Path) -> Result<()> {
    let mut text = String::new();
    for conflict in &report.conflicts {
        let _ = writeln!(
            text,
            "error: patch failed: {}:{}",
            conflict.path,
            conflict.line.unwrap_or(0)
        );
        let _ = writeln!(text, "error: {}: {}", conflict.path, conflict.reason.describe());
        if let Some(reject) = &conflict.reject_file {
            let _ = writeln!(
                text,
                "Rejected {} hunk(s), see {reject}",
                conflict.rejected_hunks
            );
        }
    }
    let _ = writeln!(text, "{} file(s) with conflicts", report.len());
    fsutil::write(path, text)
}

/// Report the conflicting files through the log.
pub fn log_conflicts(report: &ConflictReport, log_path: &Path) {
    if report.is_empty() {
        return;
    }
    let mut listing = String::from("Potential merge conflict:\n");
    for path in report.paths() {
        let _ = writeln!(listing, "               {path}");
    }
    error!(log = %log_path.display(), "{listing}");
}
