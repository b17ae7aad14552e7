//! Core library for keeping a downstream STM32 HAL module in sync with its
//! upstream STM32Cube repository.
//!
//! The crate is layered around two pipelines:
//! - the series update: snapshot extraction, local delta computation and
//!   re-application on a newer upstream version
//! - pinctrl generation from the STM32 pin/IP XML database
//!
//! Both are driven by explicit configuration values; nothing depends on the
//! process working directory.

#![warn(
    clippy::all,
    clippy::cargo,
    clippy::nursery,
    clippy::pedantic,
    missing_docs
)]
#![cfg_attr(
    not(test),
    deny(
        clippy::dbg_macro,
        clippy::expect_used,
        clippy::panic,
        clippy::print_stderr,
        clippy::print_stdout,
        clippy::todo,
        clippy::unwrap_used
    )
)]

/// Tree diffing with whitespace normalization.
pub mod diff;
mod fsutil;
/// Common LL header generation.
pub mod llheaders;
/// README and CMake listing maintenance.
pub mod manifest;
/// Unified diff rendering, parsing and application.
pub mod patch;
/// Pin/IP database extraction and devicetree emission.
pub mod pinctrl;
/// libgit2-backed repository collaborators.
pub mod repository;
/// Series naming.
pub mod serie;
/// Module snapshot extraction.
pub mod snapshot;
/// Series update orchestration.
pub mod sync;
/// Upstream version resolution.
pub mod version;

pub use serie::Serie;

/// Common result type for the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by the core library.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Underlying git operation failed.
    #[error("git error: {source}")]
    Git {
        /// Original libgit2 error.
        #[from]
        source: git2::Error,
    },
    /// Provided path does not correspond to a git repository.
    #[error("path does not reference a git repository: {path}")]
    NotARepository {
        /// Path that failed to resolve to a repository.
        path: String,
    },
    /// Bare repositories are unsupported.
    #[error("repository at {path} is bare and unsupported")]
    BareRepository {
        /// Path of the repository lacking a working tree.
        path: String,
    },
    /// Filesystem interaction failed.
    #[error("failed to access {path}: {source}")]
    Io {
        /// Filesystem path involved in the failed operation.
        path: String,
        /// Source I/O error returned by the standard library.
        #[source]
        source: std::io::Error,
    },
    /// Directory traversal failed.
    #[error("failed to walk directory: {source}")]
    Walk {
        /// Source traversal error.
        #[from]
        source: walkdir::Error,
    },
    /// The series name is not of the `stm32xx` form.
    #[error("invalid series name {serie:?}: expected a name such as stm32f3")]
    InvalidSerie {
        /// Rejected input.
        serie: String,
    },
    /// The downstream module directory does not exist.
    #[error("module directory not found: {path}")]
    ModuleNotFound {
        /// Expected module path.
        path: String,
    },
    /// An upstream directory of the fixed module layout is missing.
    #[error("upstream layout directory not found: {path}")]
    LayoutNotFound {
        /// Missing directory.
        path: String,
    },
    /// The module README does not record any version.
    #[error("no version recorded in {path}")]
    MissingVersion {
        /// README that was inspected.
        path: String,
    },
    /// No upstream tag matches the requested or recorded version.
    #[error("version {version} not found in upstream tags")]
    VersionNotFound {
        /// Version that could not be resolved.
        version: String,
    },
    /// The upstream repository has no parseable version tag.
    #[error("upstream repository has no version tags")]
    NoTags,
    /// Patch text could not be parsed at all.
    #[error("malformed patch at line {line}: {reason}")]
    MalformedPatch {
        /// 1-based line of the patch text.
        line: usize,
        /// What was expected.
        reason: String,
    },
    /// A repository collaborator failed.
    #[error(transparent)]
    Provider {
        /// Source collaborator error.
        #[from]
        source: cubesync_provider_api::ProviderError,
    },
    /// A pinctrl group rule is structurally invalid.
    #[error("invalid group rule {name:?}: {reason}")]
    InvalidGroupRule {
        /// Rule name, empty when missing.
        name: String,
        /// What is wrong with it.
        reason: String,
    },
    /// The pin/IP database layout is absent.
    #[error("pin database folder {path} does not exist")]
    DatabaseNotFound {
        /// Expected folder.
        path: String,
    },
    /// An XML document could not be parsed.
    #[error("failed to parse {path}: {source}")]
    Xml {
        /// Offending document.
        path: String,
        /// Source parse error.
        #[source]
        source: xmltree::ParseError,
    },
    /// A group entry cannot be expressed as a devicetree pinmux.
    #[error("cannot render {signal}: {reason}")]
    Render {
        /// Lowercase signal name.
        signal: String,
        /// What is unsupported.
        reason: String,
    },
    /// A YAML configuration document could not be decoded.
    #[error("invalid configuration {origin}: {source}")]
    Config {
        /// File name or embedded resource name.
        origin: String,
        /// Source decode error.
        #[source]
        source: serde_yaml::Error,
    },
}

pub(crate) fn display_path(path: &std::path::Path) -> String {
    path.to_path_buf()
        .into_os_string()
        .to_string_lossy()
        .into_owned()
}
