//! Extraction of the module file layout from an upstream checkout.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use cubesync_provider_api::RepositoryProvider;
use tracing::{debug, info};

use crate::diff::normalize_text;
use crate::fsutil::{self, relative_slash_path};
use crate::{display_path, Error, Result, Serie};

/// Name of the release notes file at the root of an upstream repository.
pub const UPSTREAM_RELEASE_NOTES: &str = "Release_Notes.html";
/// Name of the release notes file inside a downstream module.
pub const MODULE_RELEASE_NOTES: &str = "release_note.html";

/// A normalized module tree extracted at one upstream revision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleSnapshot {
    /// Revision the snapshot was extracted from.
    pub revision: String,
    /// Directory holding the snapshot.
    pub root: PathBuf,
    /// Relative paths of every extracted file.
    pub files: BTreeSet<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CopyMode {
    Recursive,
    TopLevelFiles,
}

#[derive(Debug, Clone)]
struct LayoutEntry {
    upstream: PathBuf,
    module: &'static str,
    mode: CopyMode,
}

/// Copies the fixed upstream layout of one series into snapshot directories.
#[derive(Debug, Clone)]
pub struct SnapshotBuilder {
    layout: Vec<LayoutEntry>,
}

impl SnapshotBuilder {
    /// Layout for `serie`: CMSIS device headers and templates under `soc/`,
    /// HAL/LL headers and sources under `drivers/`.
    #[must_use]
    pub fn new(serie: &Serie) -> Self {
        let device = Path::new("Drivers")
            .join("CMSIS")
            .join("Device")
            .join("ST")
            .join(serie.upper_xx());
        let driver = Path::new("Drivers").join(format!("{}_HAL_Driver", serie.upper_xx()));
        Self {
            layout: vec![
                LayoutEntry {
                    upstream: device.join("Include"),
                    module: "soc",
                    mode: CopyMode::Recursive,
                },
                LayoutEntry {
                    upstream: device.join("Source").join("Templates"),
                    module: "soc",
                    mode: CopyMode::TopLevelFiles,
                },
                LayoutEntry {
                    upstream: driver.join("Inc"),
                    module: "drivers/include",
                    mode: CopyMode::Recursive,
                },
                LayoutEntry {
                    upstream: driver.join("Src"),
                    module: "drivers/src",
                    mode: CopyMode::TopLevelFiles,
                },
            ],
        }
    }

    /// Force-checkout `revision` and copy the module layout into `dest`.
    ///
    /// `dest` is cleared first, so extracting twice into different
    /// directories never mixes files.
    ///
    /// # Errors
    ///
    /// Returns an error when the checkout fails, a layout directory is
    /// missing, or the copy fails.
    pub fn extract(
        &self,
        provider: &mut dyn RepositoryProvider,
        revision: &str,
        dest: &Path,
    ) -> Result<ModuleSnapshot> {
        info!(revision, dest = %dest.display(), "extracting module snapshot");
        provider.checkout(revision)?;
        self.copy_layout(provider.workdir(), dest)?;

        let mut files = BTreeSet::new();
        for entry in walkdir::WalkDir::new(dest).sort_by_file_name() {
            let entry = entry?;
            if entry.file_type().is_file() {
                if let Some(relative) = relative_slash_path(dest, entry.path()) {
                    files.insert(relative);
                }
            }
        }
        debug!(revision, files = files.len(), "snapshot extracted");

        Ok(ModuleSnapshot {
            revision: revision.to_owned(),
            root: dest.to_path_buf(),
            files,
        })
    }

    fn copy_layout(&self, workdir: &Path, dest: &Path) -> Result<()> {
        fsutil::remove_dir_all(dest)?;
        fsutil::create_dir_all(dest)?;

        for entry in &self.layout {
            let src = workdir.join(&entry.upstream);
            if !src.is_dir() {
                return Err(Error::LayoutNotFound {
                    path: display_path(&src),
                });
            }
            let target = dest.join(entry.module);
            let depth = match entry.mode {
                CopyMode::Recursive => usize::MAX,
                CopyMode::TopLevelFiles => 1,
            };
            for file in walkdir::WalkDir::new(&src).max_depth(depth).sort_by_file_name() {
                let file = file?;
                if !file.file_type().is_file() {
                    continue;
                }
                let Ok(relative) = file.path().strip_prefix(&src) else {
                    continue;
                };
                copy_normalized(file.path(), &target.join(relative))?;
            }
        }

        rename_conf_template(&dest.join("drivers").join("include"))
    }
}

/// Copy a file, normalizing line endings of text content.
fn copy_normalized(src: &Path, dst: &Path) -> Result<()> {
    let bytes = std::fs::read(src).map_err(fsutil::io_error(src))?;
    if bytes.contains(&0) {
        return fsutil::write(dst, bytes);
    }
    fsutil::write(dst, normalize_text(&String::from_utf8_lossy(&bytes)))
}

/// Rename `*_hal_conf_template.h` to `*_hal_conf.h`, replacing any existing
/// file of that name.
fn rename_conf_template(include_dir: &Path) -> Result<()> {
    let Ok(entries) = std::fs::read_dir(include_dir) else {
        return Ok(());
    };
    for entry in entries {
        let entry = entry.map_err(fsutil::io_error(include_dir))?;
        let name = entry.file_name().to_string_lossy().into_owned();
        if !name.ends_with("hal_conf_template.h") {
            continue;
        }
        let renamed = include_dir.join(name.replace("_template", ""));
        fsutil::remove_file(&renamed)?;
        std::fs::rename(entry.path(), &renamed).map_err(fsutil::io_error(&renamed))?;
        debug!(from = %name, "configuration template renamed");
    }
    Ok(())
}

/// Copy the upstream release notes into `module_dir`, normalizing newlines.
///
/// Returns `false` when the upstream checkout carries no release notes.
///
/// # Errors
///
/// Returns an error when the copy fails.
pub fn copy_release_notes(workdir: &Path, module_dir: &Path) -> Result<bool> {
    let src = workdir.join(UPSTREAM_RELEASE_NOTES);
    let dst = module_dir.join(MODULE_RELEASE_NOTES);
    fsutil::remove_file(&dst)?;
    if !src.is_file() {
        return Ok(false);
    }
    copy_normalized(&src, &dst)?;
    Ok(true)
}
