//! Filesystem helpers that attach the failing path to every error.

use std::fs;
use std::path::Path;

use crate::{display_path, Error, Result};

pub fn io_error(path: &Path) -> impl FnOnce(std::io::Error) -> Error + '_ {
    move |source| Error::Io {
        path: display_path(path),
        source,
    }
}

/// Character encodings found in vendor trees.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    Utf8,
    /// Older STM32Cube headers carry `©` and `µ` as single Latin-1 bytes.
    Latin1,
}

impl Encoding {
    /// Encode `text` back into bytes, `None` when a character has no
    /// representation in this encoding.
    #[must_use]
    pub fn encode(self, text: &str) -> Option<Vec<u8>> {
        match self {
            Self::Utf8 => Some(text.as_bytes().to_vec()),
            Self::Latin1 => text.chars().map(|c| u8::try_from(c).ok()).collect(),
        }
    }
}

/// Decode file bytes without loss: UTF-8 when valid, Latin-1 otherwise.
#[must_use]
pub fn decode(bytes: Vec<u8>) -> (String, Encoding) {
    match String::from_utf8(bytes) {
        Ok(text) => (text, Encoding::Utf8),
        Err(err) => (
            err.into_bytes().into_iter().map(char::from).collect(),
            Encoding::Latin1,
        ),
    }
}

pub fn read_text(path: &Path) -> Result<(String, Encoding)> {
    fs::read(path).map(decode).map_err(io_error(path))
}

pub fn read_to_string(path: &Path) -> Result<String> {
    read_text(path).map(|(text, _)| text)
}

pub fn write(path: &Path, contents: impl AsRef<[u8]>) -> Result<()> {
    if let Some(parent) = path.parent() {
        create_dir_all(parent)?;
    }
    fs::write(path, contents).map_err(io_error(path))
}

pub fn create_dir_all(path: &Path) -> Result<()> {
    fs::create_dir_all(path).map_err(io_error(path))
}

/// Remove a directory tree, succeeding when it is already gone.
pub fn remove_dir_all(path: &Path) -> Result<()> {
    match fs::remove_dir_all(path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(source) => Err(io_error(path)(source)),
    }
}

pub fn remove_file(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(source) => Err(io_error(path)(source)),
    }
}

/// Recursively copy `src` into `dst`, creating directories as needed.
pub fn copy_dir(src: &Path, dst: &Path) -> Result<()> {
    create_dir_all(dst)?;
    for entry in walkdir::WalkDir::new(src).sort_by_file_name() {
        let entry = entry?;
        let Ok(relative) = entry.path().strip_prefix(src) else {
            continue;
        };
        let target = dst.join(relative);
        if entry.file_type().is_dir() {
            create_dir_all(&target)?;
        } else if entry.file_type().is_file() {
            fs::copy(entry.path(), &target).map_err(io_error(entry.path()))?;
        }
    }
    Ok(())
}

/// Relative path using `/` separators regardless of platform.
pub fn relative_slash_path(root: &Path, path: &Path) -> Option<String> {
    let relative = path.strip_prefix(root).ok()?;
    let parts: Vec<_> = relative
        .components()
        .map(|component| component.as_os_str().to_string_lossy().into_owned())
        .collect();
    Some(parts.join("/"))
}
