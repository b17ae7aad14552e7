use std::fmt;
use std::path::Path;
use std::str::FromStr;

use tracing::debug;

use crate::{Error, Result};

const UPSTREAM_BASE_URL: &str = "https://github.com/STMicroelectronics/";

/// A validated STM32 series name such as `stm32f3`.
///
/// Every naming variant used by the upstream repositories and the downstream
/// module layout is derived from it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Serie {
    name: String,
}

impl Serie {
    /// Parse a series name, case-insensitively.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidSerie`] when the name lacks the `stm32` prefix
    /// or carries no alphanumeric family suffix.
    pub fn parse(input: &str) -> Result<Self> {
        let name = input.trim().to_lowercase();
        let valid = name
            .strip_prefix("stm32")
            .is_some_and(|suffix| {
                !suffix.is_empty() && suffix.chars().all(|c| c.is_ascii_alphanumeric())
            });
        if !valid {
            return Err(Error::InvalidSerie {
                serie: input.to_owned(),
            });
        }
        Ok(Self { name })
    }

    /// Series that have a module directory (`stm32*xx`) in `stm32cube_dir`,
    /// sorted by name.
    ///
    /// # Errors
    ///
    /// Returns an error when the directory cannot be listed.
    pub fn discover(stm32cube_dir: &Path) -> Result<Vec<Self>> {
        let mut series = Vec::new();
        for entry in walkdir::WalkDir::new(stm32cube_dir)
            .min_depth(1)
            .max_depth(1)
            .sort_by_file_name()
        {
            let entry = entry?;
            if !entry.file_type().is_dir() {
                continue;
            }
            let Some(stem) = entry.file_name().to_str().and_then(|name| name.strip_suffix("xx")) else {
                continue;
            };
            match Self::parse(stem) {
                Ok(serie) => series.push(serie),
                Err(_) => debug!(dir = stem, "not a series module"),
            }
        }
        Ok(series)
    }

    /// Lowercase name, `stm32f3`.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Downstream module directory name, `stm32f3xx`.
    #[must_use]
    pub fn seriexx(&self) -> String {
        format!("{}xx", self.name)
    }

    /// `STM32F3`.
    #[must_use]
    pub fn upper(&self) -> String {
        self.name.to_uppercase()
    }

    /// `STM32F3xx`, as found in upstream directory names.
    #[must_use]
    pub fn upper_xx(&self) -> String {
        format!("{}xx", self.upper())
    }

    /// Family suffix, `F3`.
    #[must_use]
    pub fn suffix(&self) -> String {
        self.upper()["STM32".len()..].to_owned()
    }

    /// Upstream repository name, `STM32CubeF3`.
    #[must_use]
    pub fn repo_name(&self) -> String {
        format!("STM32Cube{}", self.suffix())
    }

    /// Upstream repository URL.
    #[must_use]
    pub fn repo_url(&self) -> String {
        format!("{UPSTREAM_BASE_URL}{}", self.repo_name())
    }
}

impl fmt::Display for Serie {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

impl FromStr for Serie {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}
