//! Repository collaborators built on top of libgit2.
//!
//! [`UpstreamRepository`] manages the disposable clone of an STM32Cube
//! repository; [`WorkingRepository`] records updates in the downstream HAL
//! repository.

use std::fmt;
use std::path::{Path, PathBuf};

use cubesync_provider_api::{
    CommitIntent, Committer, ProviderError, ProviderResult, RepositoryCommand, RepositoryProvider,
    RetryPolicy,
};
use git2::build::{CheckoutBuilder, RepoBuilder};
use git2::{
    AutotagOption, ErrorClass, ErrorCode, FetchOptions, IndexAddOption, Repository as GitRepository,
    ResetType, Status, StatusOptions,
};
use tracing::{debug, info, warn};
use wildmatch::WildMatch;

use crate::diff::DEFAULT_EXCLUDES;
use crate::fsutil::relative_slash_path;
use crate::{display_path, Error, Result};

/// Disposable local clone of an upstream repository.
pub struct UpstreamRepository {
    url: String,
    root: PathBuf,
    retry: RetryPolicy,
    inner: Option<GitRepository>,
}

impl UpstreamRepository {
    /// Describe a clone of `url` living at `root`; nothing touches the disk
    /// before [`RepositoryProvider::ensure`].
    pub fn new(url: impl Into<String>, root: impl Into<PathBuf>, retry: RetryPolicy) -> Self {
        Self {
            url: url.into(),
            root: root.into(),
            retry,
            inner: None,
        }
    }

    /// Remote locator.
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }

    fn repo(&self, command: RepositoryCommand) -> ProviderResult<&GitRepository> {
        self.inner
            .as_ref()
            .ok_or_else(|| ProviderError::command(command, "repository not cloned yet"))
    }

    fn clone_fresh(&self) -> ProviderResult<GitRepository> {
        let command = RepositoryCommand::Clone {
            url: self.url.clone(),
        };
        self.retry.run(|attempt| {
            if attempt > 1 {
                warn!(url = %self.url, attempt, "retrying clone");
            }
            if self.root.exists() {
                std::fs::remove_dir_all(&self.root)
                    .map_err(|err| ProviderError::command(command.clone(), err))?;
            }
            let mut fetch = FetchOptions::new();
            fetch.download_tags(AutotagOption::All);
            RepoBuilder::new()
                .fetch_options(fetch)
                .clone(&self.url, &self.root)
                .map_err(|err| ProviderError::command(command.clone(), err))
        })
    }

    fn refresh(&self, repo: &GitRepository) -> ProviderResult<()> {
        clean_untracked(repo, RepositoryCommand::Fetch)?;
        self.retry.run(|attempt| {
            if attempt > 1 {
                warn!(url = %self.url, attempt, "retrying fetch");
            }
            let mut remote = repo
                .find_remote("origin")
                .map_err(|err| ProviderError::command(RepositoryCommand::Fetch, err))?;
            let mut fetch = FetchOptions::new();
            fetch.download_tags(AutotagOption::All);
            remote
                .fetch(
                    &["+refs/heads/*:refs/remotes/origin/*"],
                    Some(&mut fetch),
                    None,
                )
                .map_err(|err| ProviderError::command(RepositoryCommand::Fetch, err))
        })?;

        if let Some(target) = default_remote_branch(repo) {
            debug!(branch = %target, "resetting to remote default branch");
            force_to(repo, &target, RepositoryCommand::Reset)?;
        }
        Ok(())
    }
}

impl RepositoryProvider for UpstreamRepository {
    fn id(&self) -> &'static str {
        "git"
    }

    fn workdir(&self) -> &Path {
        &self.root
    }

    fn ensure(&mut self) -> ProviderResult<()> {
        let repo = match GitRepository::open(&self.root) {
            Ok(repo) => {
                info!(path = %self.root.display(), "updating upstream clone");
                self.refresh(&repo)?;
                repo
            }
            Err(_) => {
                info!(url = %self.url, path = %self.root.display(), "cloning upstream repository");
                self.clone_fresh()?
            }
        };
        self.inner = Some(repo);
        Ok(())
    }

    fn tags(&self) -> ProviderResult<Vec<String>> {
        let repo = self.repo(RepositoryCommand::TagList)?;
        let names = repo
            .tag_names(None)
            .map_err(|err| ProviderError::command(RepositoryCommand::TagList, err))?;
        Ok(names.iter().flatten().map(str::to_owned).collect())
    }

    fn checkout(&mut self, revision: &str) -> ProviderResult<()> {
        let command = RepositoryCommand::Checkout {
            revision: revision.to_owned(),
        };
        let repo = self.repo(command.clone())?;
        force_to(repo, revision, command.clone())?;
        clean_untracked(repo, command)
    }

    fn head_commit(&self) -> ProviderResult<String> {
        let command = RepositoryCommand::RevParse {
            revision: "HEAD".to_owned(),
        };
        let repo = self.repo(command.clone())?;
        repo.head()
            .and_then(|head| head.peel_to_commit())
            .map(|commit| commit.id().to_string())
            .map_err(|err| ProviderError::command(command, err))
    }

    fn reset(&mut self) -> ProviderResult<()> {
        let repo = self.repo(RepositoryCommand::Reset)?;
        force_to(repo, "HEAD", RepositoryCommand::Reset)?;
        clean_untracked(repo, RepositoryCommand::Reset)
    }
}

impl fmt::Debug for UpstreamRepository {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UpstreamRepository")
            .field("url", &self.url)
            .field("root", &self.root)
            .finish_non_exhaustive()
    }
}

fn force_to(repo: &GitRepository, revision: &str, command: RepositoryCommand) -> ProviderResult<()> {
    let object = repo.revparse_single(revision).map_err(|err| {
        if err.code() == ErrorCode::NotFound {
            ProviderError::UnknownRevision {
                revision: revision.to_owned(),
            }
        } else {
            ProviderError::command(command.clone(), err)
        }
    })?;
    let commit = object
        .peel_to_commit()
        .map_err(|err| ProviderError::command(command.clone(), err))?;
    let mut checkout = CheckoutBuilder::new();
    checkout.force();
    // detach first so no branch ref is moved by the reset
    repo.set_head_detached(commit.id())
        .and_then(|()| repo.reset(commit.as_object(), ResetType::Hard, Some(&mut checkout)))
        .map_err(|err| ProviderError::command(command, err))
}

fn clean_untracked(repo: &GitRepository, command: RepositoryCommand) -> ProviderResult<()> {
    let Some(workdir) = repo.workdir() else {
        return Ok(());
    };
    let mut opts = StatusOptions::new();
    opts.include_untracked(true).recurse_untracked_dirs(true);
    let statuses = repo
        .statuses(Some(&mut opts))
        .map_err(|err| ProviderError::command(command.clone(), err))?;
    for entry in statuses.iter() {
        if !entry.status().contains(Status::WT_NEW) {
            continue;
        }
        if let Some(path) = entry.path() {
            let absolute = workdir.join(path);
            std::fs::remove_file(&absolute)
                .map_err(|err| ProviderError::command(command.clone(), err))?;
        }
    }
    Ok(())
}

fn default_remote_branch(repo: &GitRepository) -> Option<String> {
    if let Ok(reference) = repo.find_reference("refs/remotes/origin/HEAD") {
        if let Some(target) = reference.symbolic_target() {
            return Some(target.to_owned());
        }
    }
    ["refs/remotes/origin/master", "refs/remotes/origin/main"]
        .into_iter()
        .find(|name| repo.find_reference(name).is_ok())
        .map(str::to_owned)
}

/// Handle to the downstream repository the synchronized module is committed
/// to.
pub struct WorkingRepository {
    inner: GitRepository,
    root: PathBuf,
}

impl WorkingRepository {
    /// Open a repository from the given filesystem path.
    ///
    /// # Errors
    ///
    /// Returns an error if the path cannot be canonicalized, does not resolve
    /// to a git repository, or resolves to a bare repository.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let original = path.as_ref();
        let canonical = std::fs::canonicalize(original).map_err(|source| Error::Io {
            path: display_path(original),
            source,
        })?;

        let repo = match GitRepository::discover(&canonical) {
            Ok(repo) => repo,
            Err(err)
                if err.class() == ErrorClass::Repository && err.code() == ErrorCode::NotFound =>
            {
                return Err(Error::NotARepository {
                    path: display_path(&canonical),
                })
            }
            Err(err) => return Err(Error::from(err)),
        };

        let root = repo
            .workdir()
            .map(Path::to_path_buf)
            .ok_or_else(|| Error::BareRepository {
                path: display_path(&canonical),
            })?;

        Ok(Self { inner: repo, root })
    }

    /// Returns the absolute path to the repository root.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn pathspec(&self, module_path: &Path) -> String {
        let absolute = std::fs::canonicalize(module_path).unwrap_or_else(|_| module_path.to_path_buf());
        relative_slash_path(&self.root, &absolute)
            .filter(|relative| !relative.is_empty())
            .map_or_else(|| "*".to_owned(), |relative| format!("{relative}/*"))
    }

    fn record(&self, intent: &CommitIntent) -> std::result::Result<String, git2::Error> {
        let artifacts: Vec<WildMatch> = DEFAULT_EXCLUDES.iter().map(|p| WildMatch::new(p)).collect();
        let pathspec = self.pathspec(&intent.module_path);

        let mut index = self.inner.index()?;
        let mut skip_artifacts = |path: &Path, _: &[u8]| -> i32 {
            let name = path.to_string_lossy();
            i32::from(artifacts.iter().any(|pattern| pattern.matches(&name)))
        };
        index.add_all(
            [pathspec.as_str()],
            IndexAddOption::DEFAULT,
            Some(&mut skip_artifacts as &mut git2::IndexMatchedPath),
        )?;
        index.update_all([pathspec.as_str()], None)?;
        index.write()?;

        let tree_id = index.write_tree()?;
        let tree = self.inner.find_tree(tree_id)?;
        let signature = self
            .inner
            .signature()
            .or_else(|_| git2::Signature::now("cubesync", "cubesync@localhost"))?;

        let parents = match self.inner.head() {
            Ok(head) => head
                .peel_to_commit()
                .map_or_else(|_| Vec::new(), |parent| vec![parent]),
            Err(err)
                if matches!(
                    (err.class(), err.code()),
                    (
                        ErrorClass::Reference,
                        ErrorCode::NotFound | ErrorCode::UnbornBranch
                    )
                ) =>
            {
                Vec::new()
            }
            Err(err) => return Err(err),
        };
        let parent_refs: Vec<&git2::Commit> = parents.iter().collect();

        let message = format!(
            "{}\nSigned-off-by: {} <{}>\n",
            intent.message(),
            signature.name().unwrap_or("cubesync"),
            signature.email().unwrap_or("cubesync@localhost")
        );
        let oid = self.inner.commit(
            Some("HEAD"),
            &signature,
            &signature,
            &message,
            &tree,
            &parent_refs,
        )?;
        Ok(oid.to_string())
    }
}

impl Committer for WorkingRepository {
    fn commit(&mut self, intent: &CommitIntent) -> ProviderResult<String> {
        let oid = self
            .record(intent)
            .map_err(|err| ProviderError::command(RepositoryCommand::Commit, err))?;
        info!(commit = %oid, subject = %intent.subject(), "module update committed");
        Ok(oid)
    }
}

impl fmt::Debug for WorkingRepository {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkingRepository")
            .field("root", &self.root)
            .finish_non_exhaustive()
    }
}
