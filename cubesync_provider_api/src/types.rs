use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// The set of operations a repository collaborator performs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "command")]
pub enum RepositoryCommand {
    /// Create a local working copy from a remote locator.
    Clone {
        /// Remote locator (URL or path).
        url: String,
    },
    /// Update an existing working copy from its remote.
    Fetch,
    /// Force a revision into the working copy.
    Checkout {
        /// Revision (tag, branch or commit).
        revision: String,
    },
    /// Enumerate tags.
    TagList,
    /// Resolve a revision to a commit identifier.
    RevParse {
        /// Revision expression.
        revision: String,
    },
    /// Discard every local change of the working copy.
    Reset,
    /// Record a commit.
    Commit,
}

impl fmt::Display for RepositoryCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Clone { url } => write!(f, "clone {url}"),
            Self::Fetch => f.write_str("fetch"),
            Self::Checkout { revision } => write!(f, "checkout {revision}"),
            Self::TagList => f.write_str("tag -l"),
            Self::RevParse { revision } => write!(f, "rev-parse {revision}"),
            Self::Reset => f.write_str("reset --hard"),
            Self::Commit => f.write_str("commit"),
        }
    }
}

/// How often network-bound commands are retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total number of attempts, at least one.
    pub attempts: u32,
    /// Pause between attempts.
    pub delay: Duration,
}

impl RetryPolicy {
    /// Construct a policy with explicit values.
    #[must_use]
    pub const fn new(attempts: u32, delay: Duration) -> Self {
        Self { attempts, delay }
    }

    /// A policy that never retries.
    #[must_use]
    pub const fn once() -> Self {
        Self::new(1, Duration::ZERO)
    }

    /// Run `op` until it succeeds or the attempts are exhausted, returning
    /// the last error.
    ///
    /// # Errors
    ///
    /// Returns the error of the final attempt.
    pub fn run<T, E>(&self, mut op: impl FnMut(u32) -> Result<T, E>) -> Result<T, E> {
        let attempts = self.attempts.max(1);
        let mut attempt = 1;
        loop {
            match op(attempt) {
                Ok(value) => return Ok(value),
                Err(err) if attempt >= attempts => return Err(err),
                Err(_) => {
                    attempt += 1;
                    if !self.delay.is_zero() {
                        std::thread::sleep(self.delay);
                    }
                }
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(5, Duration::from_secs(2))
    }
}

/// Structured description of the commit recording a series update.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitIntent {
    /// Lowercase series name, e.g. `stm32f3`.
    pub serie: String,
    /// Version the module was previously based on.
    pub old_version: String,
    /// Version the module now tracks.
    pub new_version: String,
    /// Module directory to stage.
    pub module_path: PathBuf,
}

impl CommitIntent {
    /// Subject line of the commit message.
    #[must_use]
    pub fn subject(&self) -> String {
        format!(
            "stm32cube: update {} to version {}",
            self.serie,
            self.new_version.to_uppercase()
        )
    }

    /// Full commit message, subject and body.
    #[must_use]
    pub fn message(&self) -> String {
        format!(
            "{}\n\nUpdate Cube version for {}xx series\non https://github.com/STMicroelectronics\nfrom version {}\nto version {}\n",
            self.subject(),
            self.serie.to_uppercase(),
            self.old_version,
            self.new_version
        )
    }
}

/// Errors surfaced by repository collaborators.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    /// A command was reported as failed by the underlying tool.
    #[error("`{command}` failed: {message}")]
    CommandFailed {
        /// Command that failed.
        command: RepositoryCommand,
        /// Tool-reported detail.
        message: String,
    },
    /// The requested revision does not exist.
    #[error("unknown revision {revision}")]
    UnknownRevision {
        /// Revision that could not be resolved.
        revision: String,
    },
}

impl ProviderError {
    /// Helper to wrap any displayable failure of `command`.
    #[must_use]
    pub fn command(command: RepositoryCommand, message: impl fmt::Display) -> Self {
        Self::CommandFailed {
            command,
            message: message.to_string(),
        }
    }
}

/// Convenience result alias for provider operations.
pub type ProviderResult<T> = std::result::Result<T, ProviderError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retry_stops_at_first_success() {
        let policy = RetryPolicy::new(3, Duration::ZERO);
        let mut calls = 0;
        let result: Result<u32, &str> = policy.run(|attempt| {
            calls += 1;
            if attempt < 2 {
                Err("transient")
            } else {
                Ok(attempt)
            }
        });
        assert_eq!(result, Ok(2));
        assert_eq!(calls, 2);
    }

    #[test]
    fn retry_returns_last_error() {
        let policy = RetryPolicy::new(2, Duration::ZERO);
        let result: Result<(), String> = policy.run(|attempt| Err(format!("attempt {attempt}")));
        assert_eq!(result, Err("attempt 2".to_string()));
        assert_eq!(RetryPolicy::once().attempts, 1);
    }

    #[test]
    fn commit_message_names_both_versions() {
        let intent = CommitIntent {
            serie: "stm32f3".into(),
            old_version: "v1.11.0".into(),
            new_version: "v1.11.2".into(),
            module_path: PathBuf::from("stm32cube/stm32f3xx"),
        };
        assert_eq!(intent.subject(), "stm32cube: update stm32f3 to version V1.11.2");
        let message = intent.message();
        assert!(message.contains("Update Cube version for STM32F3xx series"));
        assert!(message.contains("from version v1.11.0\nto version v1.11.2"));
    }

    #[test]
    fn commands_display_like_git() {
        let command = RepositoryCommand::Checkout {
            revision: "v1.5.0".into(),
        };
        let err = ProviderError::command(command, "object not found");
        assert_eq!(err.to_string(), "`checkout v1.5.0` failed: object not found");
    }
}
