//! Series-independent LL headers: one `stm32_ll_<api>.h` per LL API that
//! includes the header of whichever series is being built.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::OnceLock;

use regex::Regex;
use tracing::{error, info};

use crate::manifest::README;
use crate::{fsutil, Result};

const IGNORED_APIS: &[&str] = &["usb"];

fn version_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"version v?([0-9\.]+)").unwrap_or_else(|_| unreachable!()))
}

fn header_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^stm32[a-z0-9]+_ll_([a-z0-9]+)\.h$").unwrap_or_else(|_| unreachable!())
    })
}

/// What [`generate`] found in the HAL tree.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LlHeaders {
    /// Series directory name to recorded upstream version.
    pub versions: BTreeMap<String, String>,
    /// LL API name to the series providing it, in series order.
    pub apis: BTreeMap<String, Vec<String>>,
}

/// Scan the series modules under `hal_path` (`stm32*` directories).
///
/// Series without a recorded version are logged and skipped.
///
/// # Errors
///
/// Returns an error when a directory cannot be read.
pub fn scan(hal_path: &Path) -> Result<LlHeaders> {
    let mut series_dirs = Vec::new();
    for entry in std::fs::read_dir(hal_path).map_err(fsutil::io_error(hal_path))? {
        let entry = entry.map_err(fsutil::io_error(hal_path))?;
        let name = entry.file_name().to_string_lossy().into_owned();
        if entry.file_type().is_ok_and(|kind| kind.is_dir()) && name.starts_with("stm32") {
            series_dirs.push((name, entry.path()));
        }
    }
    series_dirs.sort();

    let mut found = LlHeaders::default();
    for (series, dir) in series_dirs {
        let readme = dir.join(README);
        let version = if readme.is_file() {
            version_pattern()
                .captures(&fsutil::read_to_string(&readme)?)
                .and_then(|captures| captures.get(1))
                .map(|m| m.as_str().to_owned())
        } else {
            None
        };
        let Some(version) = version else {
            error!("Could not determine version for {series}");
            continue;
        };
        found.versions.insert(series.clone(), version);

        let include = dir.join("drivers").join("include");
        let Ok(entries) = std::fs::read_dir(&include) else {
            continue;
        };
        let mut apis: Vec<String> = entries
            .flatten()
            .filter_map(|entry| {
                let name = entry.file_name().to_string_lossy().into_owned();
                header_pattern()
                    .captures(&name)
                    .and_then(|captures| captures.get(1))
                    .map(|m| m.as_str().to_owned())
            })
            .filter(|api| !IGNORED_APIS.contains(&api.as_str()))
            .collect();
        apis.sort();
        apis.dedup();
        for api in apis {
            found.apis.entry(api).or_default().push(series.clone());
        }
    }
    Ok(found)
}

/// Configuration macro of a series directory: `stm32f0xx` gives
/// `CONFIG_SOC_SERIES_STM32F0X`.
#[must_use]
pub fn series_macro(series: &str) -> String {
    let stem = series.strip_suffix("xx").unwrap_or(series);
    format!("CONFIG_SOC_SERIES_{}X", stem.to_uppercase())
}

/// Text of `stm32_ll_<api>.h`.
#[must_use]
pub fn render_header(api: &str, all_series: &[String]) -> String {
    let mut out = String::new();
    out.push_str("/*\n");
    out.push_str(" * SPDX-License-Identifier: Apache-2.0\n");
    out.push_str(" *\n");
    out.push_str(" * NOTE: Autogenerated file by cubesync llheaders\n");
    out.push_str(" */\n\n");
    let guard = format!("ZEPHYR_HAL_STM32_LL_{}_H_", api.to_uppercase());
    out.push_str(&format!("#ifndef {guard}\n#define {guard}\n\n"));
    for (index, series) in all_series.iter().enumerate() {
        let keyword = if index == 0 { "#if" } else { "#elif" };
        out.push_str(&format!("{keyword} defined({})\n", series_macro(series)));
        out.push_str(&format!("#include <{series}_ll_{api}.h>\n"));
    }
    if !all_series.is_empty() {
        out.push_str("#endif\n");
    }
    out.push_str(&format!("\n#endif /* {guard} */\n"));
    out
}

/// Text of the `README.rst` listing the series versions.
#[must_use]
pub fn render_readme(versions: &BTreeMap<String, String>) -> String {
    let mut out = String::from(
        "STM32 common LL headers\n\
         #######################\n\
         \n\
         Origin:\n   \
         Generated from the STM32Cube HAL of each series\n\
         \n\
         Status:\n",
    );
    for (series, version) in versions {
        out.push_str(&format!("   {series}: version {version}\n"));
    }
    out
}

/// Regenerate the common LL headers of the HAL tree at `hal_path` into
/// `output` (cleared first): `README.rst` and `include/stm32_ll_<api>.h`.
///
/// # Errors
///
/// Returns an error when scanning or writing fails.
pub fn generate(hal_path: &Path, output: &Path) -> Result<LlHeaders> {
    let found = scan(hal_path)?;

    fsutil::remove_dir_all(output)?;
    fsutil::create_dir_all(&output.join("include"))?;
    fsutil::write(&output.join("README.rst"), render_readme(&found.versions))?;
    for (api, all_series) in &found.apis {
        fsutil::write(
            &output.join("include").join(format!("stm32_ll_{api}.h")),
            render_header(api, all_series),
        )?;
    }
    info!(
        series = found.versions.len(),
        headers = found.apis.len(),
        "common LL headers generated"
    );
    Ok(found)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn series_macros() {
        assert_eq!(series_macro("stm32f0xx"), "CONFIG_SOC_SERIES_STM32F0X");
        assert_eq!(series_macro("stm32mp1xx"), "CONFIG_SOC_SERIES_STM32MP1X");
    }

    #[test]
    fn header_dispatches_on_series() {
        let series = vec!["stm32f0xx".to_owned(), "stm32l4xx".to_owned()];
        let text = render_header("tim", &series);
        assert!(text.contains(
            "#if defined(CONFIG_SOC_SERIES_STM32F0X)\n#include <stm32f0xx_ll_tim.h>\n\
             #elif defined(CONFIG_SOC_SERIES_STM32L4X)\n#include <stm32l4xx_ll_tim.h>\n#endif\n"
        ));
        assert!(text.contains("#ifndef ZEPHYR_HAL_STM32_LL_TIM_H_\n"));
    }
}
