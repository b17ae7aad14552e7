//! Series update: re-applies the downstream delta of a module on top of a
//! newer upstream version.
//!
//! The working module directory is only written once, after every diff and
//! apply step has completed, by swapping in a fully prepared staging copy.

use std::fmt;
use std::path::{Path, PathBuf};

use cubesync_api::ConflictReport;
use cubesync_provider_api::{CommitIntent, Committer, RepositoryProvider, RetryPolicy};
use tracing::{error, info, warn};

use crate::diff::{DiffEngine, DiffOptions};
use crate::manifest::{self, CMAKELISTS, README};
use crate::patch::{self, PatchApplier};
use crate::snapshot::{self, ModuleSnapshot, SnapshotBuilder, MODULE_RELEASE_NOTES};
use crate::version::{find_current_baseline, same_version, select_latest, select_requested};
use crate::{display_path, fsutil, Error, Result, Serie};

/// Inputs of a series update.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Series to update.
    pub serie: Serie,
    /// Root of the downstream HAL repository (holds `stm32cube/`).
    pub hal_root: PathBuf,
    /// Directory for upstream clones and temporary trees.
    pub cache_dir: PathBuf,
    /// Upstream tag to move to; the latest tag when `None`.
    pub version: Option<String>,
    /// Record the result through the committer.
    pub commit: bool,
    /// Keep the upstream clone (reset to a clean checkout) after the run.
    pub no_clean: bool,
    /// Extra delta exclusion globs.
    pub exclude: Vec<String>,
    /// Retry policy for network-bound commands.
    pub retry: RetryPolicy,
}

impl SyncConfig {
    /// Configuration with defaults for every optional setting.
    pub fn new(serie: Serie, hal_root: impl Into<PathBuf>, cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            serie,
            hal_root: hal_root.into(),
            cache_dir: cache_dir.into(),
            version: None,
            commit: false,
            no_clean: false,
            exclude: Vec::new(),
            retry: RetryPolicy::default(),
        }
    }

    /// Downstream module directory, `<hal_root>/stm32cube/stm32f3xx`.
    #[must_use]
    pub fn module_path(&self) -> PathBuf {
        self.hal_root.join("stm32cube").join(self.serie.seriexx())
    }

    /// Location of the upstream clone, `<cache_dir>/STM32CubeF3`.
    #[must_use]
    pub fn upstream_path(&self) -> PathBuf {
        self.cache_dir.join(self.serie.repo_name())
    }

    /// Scratch directory for snapshots and the module patch.
    #[must_use]
    pub fn temp_dir(&self) -> PathBuf {
        self.cache_dir
            .join(format!("temp_{}_update", self.serie.seriexx()))
    }

    /// Conflict log, `<hal_root>/module_stm32f3.log`.
    #[must_use]
    pub fn log_path(&self) -> PathBuf {
        self.hal_root.join(format!("module_{}.log", self.serie.name()))
    }
}

/// Progress of a series update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    /// Nothing done yet.
    Init,
    /// Upstream clone available.
    Cloned,
    /// Current baseline and target versions resolved.
    BaselineExtracted,
    /// Downstream delta computed against the baseline snapshot.
    DeltaComputed,
    /// Target snapshot extracted.
    TargetExtracted,
    /// Delta applied onto the target snapshot.
    PatchApplied,
    /// Module directory replaced.
    Reconciled,
    /// Temporary state removed.
    Cleaned,
    /// Aborted on an unrecoverable error.
    Failed,
}

impl fmt::Display for SyncState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Summary of a completed update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncReport {
    /// Updated series.
    pub serie: String,
    /// Upstream tag the module was based on.
    pub from_version: String,
    /// Upstream tag the module now tracks.
    pub to_version: String,
    /// Upstream commit of `to_version`.
    pub upstream_commit: String,
    /// Downstream commit, when one was recorded.
    pub commit_id: Option<String>,
    /// Files needing manual resolution.
    pub conflicts: ConflictReport,
    /// Conflict log, written only when conflicts exist.
    pub log_path: Option<PathBuf>,
    /// Replaced module directory.
    pub module_path: PathBuf,
}

/// Result of a series update that did not fail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    /// The module was moved to a new upstream version.
    Updated(SyncReport),
    /// The module already tracks the target version; nothing was changed.
    Abandoned {
        /// Version shared by the module and the target.
        version: String,
    },
}

/// Drives one series update against a repository provider.
pub struct SeriesUpdater<P> {
    config: SyncConfig,
    provider: P,
    committer: Option<Box<dyn Committer>>,
    engine: DiffEngine,
    state: SyncState,
}

impl<P: RepositoryProvider> SeriesUpdater<P> {
    /// Create an updater; derived module files are excluded from the delta.
    pub fn new(config: SyncConfig, provider: P) -> Self {
        let mut options = DiffOptions::default();
        for pattern in [README, CMAKELISTS, MODULE_RELEASE_NOTES] {
            options = options.exclude(pattern);
        }
        for pattern in &config.exclude {
            options = options.exclude(pattern.clone());
        }
        Self {
            config,
            provider,
            committer: None,
            engine: DiffEngine::new(options),
            state: SyncState::Init,
        }
    }

    /// Attach the collaborator used when [`SyncConfig::commit`] is set.
    #[must_use]
    pub fn with_committer(mut self, committer: Box<dyn Committer>) -> Self {
        self.committer = Some(committer);
        self
    }

    /// Last state reached.
    #[must_use]
    pub const fn state(&self) -> SyncState {
        self.state
    }

    /// Configuration of this run.
    #[must_use]
    pub const fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Give back the provider, e.g. to inspect it after a run.
    pub fn into_provider(self) -> P {
        self.provider
    }

    /// Run the update to completion. Temporary state is removed whatever the
    /// outcome.
    ///
    /// Conflicts do not fail the run; they are returned in the report and
    /// left as `.rej` files in the module.
    ///
    /// # Errors
    ///
    /// Returns the first unrecoverable error after cleanup.
    pub fn run(&mut self) -> Result<SyncOutcome> {
        let result = self.pipeline();
        self.cleanup();
        match result {
            Ok(outcome) => {
                self.transition(SyncState::Cleaned);
                if matches!(outcome, SyncOutcome::Updated(_)) {
                    info!(serie = %self.config.serie, "done");
                }
                Ok(outcome)
            }
            Err(err) => {
                error!(serie = %self.config.serie, state = %self.state, "update failed: {err}");
                self.state = SyncState::Failed;
                Err(err)
            }
        }
    }

    fn transition(&mut self, next: SyncState) {
        info!(serie = %self.config.serie, from = %self.state, to = %next, "sync state");
        self.state = next;
    }

    fn pipeline(&mut self) -> Result<SyncOutcome> {
        let module_path = self.config.module_path();
        if !module_path.is_dir() {
            return Err(Error::ModuleNotFound {
                path: display_path(&module_path),
            });
        }
        let temp_dir = self.config.temp_dir();
        fsutil::remove_dir_all(&temp_dir)?;
        fsutil::create_dir_all(&temp_dir)?;

        self.provider.ensure()?;
        self.transition(SyncState::Cloned);

        let tags = self.provider.tags()?;
        let readme_path = module_path.join(README);
        let readme = if readme_path.is_file() {
            fsutil::read_to_string(&readme_path)?
        } else {
            String::new()
        };
        let baseline = find_current_baseline(&readme, &display_path(&readme_path), &tags)?;
        let target = match &self.config.version {
            Some(requested) => select_requested(&tags, requested)?,
            None => select_latest(&tags)?,
        };
        info!(
            "Version {baseline} is the original version for {}",
            self.config.serie.seriexx()
        );
        self.transition(SyncState::BaselineExtracted);

        if same_version(&baseline, &target) {
            warn!(version = %target, "Versions are identical: abandoned");
            return Ok(SyncOutcome::Abandoned { version: target });
        }

        let builder = SnapshotBuilder::new(&self.config.serie);
        let base_snapshot = builder.extract(&mut self.provider, &baseline, &temp_dir.join("baseline"))?;
        info!("Building patch from {baseline} to current module");
        let mut delta = self.engine.compute_delta(&base_snapshot.root, &module_path)?;
        delta.from.clone_from(&baseline);
        let patch_path = temp_dir.join("module.patch");
        fsutil::write(&patch_path, patch::render(&delta))?;
        info!(files = delta.files.len(), patch = %patch_path.display(), "downstream delta computed");
        self.transition(SyncState::DeltaComputed);

        let target_snapshot = builder.extract(&mut self.provider, &target, &temp_dir.join("target"))?;
        let upstream_commit = self.provider.head_commit()?;
        snapshot::copy_release_notes(self.provider.workdir(), &target_snapshot.root)?;
        self.transition(SyncState::TargetExtracted);

        info!("Apply zephyr patches to {target}");
        let module_patch = patch::parse(&fsutil::read_to_string(&patch_path)?)?;
        let conflicts = PatchApplier::new(&target_snapshot.root).apply(&module_patch)?;
        self.transition(SyncState::PatchApplied);

        manifest::update_module_manifests(
            &target_snapshot.root,
            &module_path,
            &self.config.serie,
            &target,
            &upstream_commit,
        )?;
        replace_module(&target_snapshot, &module_path)?;
        let log_path = self.config.log_path();
        let log_path = if conflicts.is_empty() {
            fsutil::remove_file(&log_path)?;
            None
        } else {
            patch::write_conflict_log(&conflicts, &log_path)?;
            patch::log_conflicts(&conflicts, &log_path);
            error!(
                "Error when applying patch to zephyr module: see {}",
                log_path.display()
            );
            Some(log_path)
        };
        info!("README file : --> please check that the Patch list is still valid");
        self.transition(SyncState::Reconciled);

        let commit_id = self.commit(&baseline, &target, &module_path)?;

        Ok(SyncOutcome::Updated(SyncReport {
            serie: self.config.serie.name().to_owned(),
            from_version: baseline,
            to_version: target,
            upstream_commit,
            commit_id,
            conflicts,
            log_path,
            module_path,
        }))
    }

    fn commit(&mut self, baseline: &str, target: &str, module_path: &Path) -> Result<Option<String>> {
        if !self.config.commit {
            return Ok(None);
        }
        let Some(committer) = self.committer.as_mut() else {
            warn!("commit requested but no committer configured");
            return Ok(None);
        };
        let intent = CommitIntent {
            serie: self.config.serie.name().to_owned(),
            old_version: baseline.to_owned(),
            new_version: target.to_owned(),
            module_path: module_path.to_path_buf(),
        };
        Ok(Some(committer.commit(&intent)?))
    }

    fn cleanup(&mut self) {
        if let Err(err) = fsutil::remove_dir_all(&self.config.temp_dir()) {
            warn!("failed to remove temporary files: {err}");
        }
        if self.config.no_clean {
            if let Err(err) = self.provider.reset() {
                warn!(provider = self.provider.id(), "failed to reset upstream clone: {err}");
            }
        } else if let Err(err) = fsutil::remove_dir_all(self.provider.workdir()) {
            warn!("failed to remove upstream clone: {err}");
        }
    }
}

impl<P> fmt::Debug for SeriesUpdater<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SeriesUpdater")
            .field("config", &self.config)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

/// Swap `module_path` for the content of `snapshot` through a sibling
/// staging directory.
fn replace_module(snapshot: &ModuleSnapshot, module_path: &Path) -> Result<()> {
    let name = module_path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    let staging = module_path.with_file_name(format!(".{name}.staging"));
    fsutil::remove_dir_all(&staging)?;
    fsutil::copy_dir(&snapshot.root, &staging)?;
    fsutil::remove_dir_all(module_path)?;
    std::fs::rename(&staging, module_path).map_err(fsutil::io_error(module_path))
}
