mod types;

use std::path::Path;

pub use types::{
    CommitIntent, ProviderError, ProviderResult, RepositoryCommand, RetryPolicy,
};

/// Upstream repository access needed by the sync engine.
///
/// Implementations own a local working copy that is treated as a disposable
/// cache: every checkout discards local modifications.
pub trait RepositoryProvider {
    /// Stable identifier used for logging.
    fn id(&self) -> &'static str;

    /// Root of the local working copy.
    fn workdir(&self) -> &Path;

    /// Make sure the working copy exists and tracks the latest upstream state.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError`] when cloning or fetching fails after every
    /// retry.
    fn ensure(&mut self) -> ProviderResult<()>;

    /// List every tag of the repository.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError`] when tags cannot be enumerated.
    fn tags(&self) -> ProviderResult<Vec<String>>;

    /// Force the working copy to `revision`, discarding local changes.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError`] when the revision cannot be resolved or
    /// checked out.
    fn checkout(&mut self, revision: &str) -> ProviderResult<()>;

    /// Identifier of the commit currently checked out.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError`] when HEAD cannot be resolved.
    fn head_commit(&self) -> ProviderResult<String>;

    /// Reset the working copy to a clean checkout of its current HEAD.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError`] when the reset fails.
    fn reset(&mut self) -> ProviderResult<()>;
}

/// Records the synchronized module in the downstream repository.
pub trait Committer {
    /// Stage the module changes and create a commit described by `intent`.
    ///
    /// Returns the identifier of the new commit.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError`] when staging or committing fails.
    fn commit(&mut self, intent: &CommitIntent) -> ProviderResult<String>;
}
