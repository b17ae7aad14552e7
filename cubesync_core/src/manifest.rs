//! Maintenance of the derived files of a downstream module: the `README`
//! metadata block and the `CMakeLists.txt` source listing.

use std::path::Path;

use tracing::info;

use crate::fsutil;
use crate::{Result, Serie};

/// Module metadata file.
pub const README: &str = "README";
/// Module build listing.
pub const CMAKELISTS: &str = "CMakeLists.txt";

const RELEASE_NOTE_POINTER: &str = "See release_note.html from STM32Cube";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Header {
    Status,
    Commit,
    Url,
    PatchList,
}

fn classify(line: &str) -> Option<Header> {
    let key = line.trim().trim_end_matches(':').trim_end().to_lowercase();
    match key.as_str() {
        "status" => Some(Header::Status),
        "commit" => Some(Header::Commit),
        "url" => Some(Header::Url),
        "patch list" => Some(Header::PatchList),
        _ => None,
    }
}

/// Rewrite the README metadata for a new upstream version.
///
/// The value line following the `Status`, `Commit` and `URL` headers is
/// replaced; the `Patch List` header gets a re-validation notice. Every other
/// line is kept verbatim.
#[must_use]
pub fn rewrite_readme(text: &str, version: &str, commit: &str, serie: &Serie) -> String {
    let text = normalize_newlines(text);
    let mut out = String::with_capacity(text.len() + 128);
    let mut see_release_note = true;
    let mut lines = text.lines();

    while let Some(line) = lines.next() {
        match classify(line) {
            Some(Header::Status) => {
                out.push_str("Status:\n");
                out.push_str(&format!("   version {version}\n"));
                lines.next();
            }
            Some(Header::Commit) => {
                out.push_str("Commit:\n");
                out.push_str(&format!("   {commit}\n"));
                lines.next();
            }
            Some(Header::Url) => {
                out.push_str("URL:\n");
                out.push_str(&format!("   {}\n", serie.repo_url()));
                lines.next();
            }
            Some(Header::PatchList) => {
                out.push_str("Patch List:\n");
                out.push_str("--> please check that the following list is still valid:\n");
            }
            None => {
                if line.contains(RELEASE_NOTE_POINTER) {
                    see_release_note = false;
                }
                out.push_str(line);
                out.push('\n');
            }
        }
    }

    if see_release_note {
        out.push_str(&format!("\n   {RELEASE_NOTE_POINTER}\n"));
    }
    out
}

/// Build the `CMakeLists.txt` listing of a module.
///
/// `first_line` is the first line of the previous listing (usually a
/// copyright notice), kept when non-empty. `source_files` are file names of
/// `drivers/src`; template sources are skipped.
#[must_use]
pub fn generate_cmakelists(first_line: &str, serie: &Serie, source_files: &[String]) -> String {
    let seriexx = serie.seriexx();
    let mut out = String::new();
    if !first_line.trim().is_empty() {
        out.push_str(first_line.trim_end());
        out.push('\n');
    }
    out.push_str("# Copyright (c) 2020 STMicroelectronics\n");
    out.push_str("#\n");
    out.push_str("# SPDX-License-Identifier: Apache-2.0\n");
    out.push('\n');
    out.push_str(&format!("zephyr_library_sources(soc/system_{seriexx}.c)\n"));
    out.push_str(&format!("zephyr_library_sources(drivers/src/{seriexx}_hal.c)\n"));
    out.push_str(&format!("zephyr_library_sources(drivers/src/{seriexx}_hal_rcc.c)\n"));

    let mut files: Vec<&String> = source_files.iter().collect();
    files.sort();
    for name in files {
        if name.contains("template") {
            continue;
        }
        for (marker, kind) in [("_hal_", "HAL"), ("_ll_", "LL")] {
            if let Some(ip) = ip_name(name, marker) {
                out.push_str(&format!(
                    "zephyr_library_sources_ifdef(CONFIG_USE_STM32_{kind}_{} drivers/src/{name})\n",
                    ip.to_uppercase()
                ));
            }
        }
    }
    out
}

/// Text between the last `marker` and the extension, e.g. `adc_ex` for
/// `stm32f3xx_hal_adc_ex.c`.
fn ip_name<'a>(file_name: &'a str, marker: &str) -> Option<&'a str> {
    let start = file_name.rfind(marker)? + marker.len();
    let rest = &file_name[start..];
    let end = rest.rfind('.')?;
    (end > 0).then(|| &rest[..end])
}

/// Convert CRLF and lone CR line endings to LF.
#[must_use]
pub fn normalize_newlines(text: &str) -> String {
    text.replace("\r\n", "\n").replace('\r', "\n")
}

/// Regenerate `README` and `CMakeLists.txt` inside `module_dir`.
///
/// `previous_dir` holds the current downstream module, whose files provide
/// the free-text README content and the listing's first line.
///
/// # Errors
///
/// Returns an error when reading or writing the files fails.
pub fn update_module_manifests(
    module_dir: &Path,
    previous_dir: &Path,
    serie: &Serie,
    version: &str,
    commit: &str,
) -> Result<()> {
    let readme_src = previous_dir.join(README);
    let readme = if readme_src.is_file() {
        fsutil::read_to_string(&readme_src)?
    } else {
        String::new()
    };
    fsutil::write(
        &module_dir.join(README),
        rewrite_readme(&readme, version, commit, serie),
    )?;

    let cmake_src = previous_dir.join(CMAKELISTS);
    let first_line = if cmake_src.is_file() {
        fsutil::read_to_string(&cmake_src)?
            .lines()
            .next()
            .unwrap_or_default()
            .to_owned()
    } else {
        String::new()
    };

    let mut sources = Vec::new();
    if let Ok(entries) = std::fs::read_dir(module_dir.join("drivers").join("src")) {
        for entry in entries.flatten() {
            if entry.file_type().is_ok_and(|kind| kind.is_file()) {
                sources.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
    }
    info!(sources = sources.len(), "creating a new {CMAKELISTS}");
    fsutil::write(
        &module_dir.join(CMAKELISTS),
        generate_cmakelists(&first_line, serie, &sources),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    const README_TEXT: &str = "Origin:\r\n   ST Microelectronics\r\n\r\nStatus:\r\n   version v1.11.0\r\n\r\nA custom maintainer note that must survive.\r\n\r\nURL:\r\n   https://example.invalid/old\r\n\r\nCommit:\r\n   0123456789abcdef\r\n\r\nPatch List:\r\n   *dos2unix applied\r\n";

    #[test]
    fn readme_rewrite_preserves_unknown_lines() -> crate::Result<()> {
        let serie = Serie::parse("stm32f3")?;
        let rewritten = rewrite_readme(README_TEXT, "v1.11.2", "fedcba9876543210", &serie);

        assert!(rewritten.contains("Status:\n   version v1.11.2\n"));
        assert!(rewritten.contains("Commit:\n   fedcba9876543210\n"));
        assert!(rewritten
            .contains("URL:\n   https://github.com/STMicroelectronics/STM32CubeF3\n"));
        assert!(rewritten.contains("\nA custom maintainer note that must survive.\n"));
        assert!(rewritten.contains(
            "Patch List:\n--> please check that the following list is still valid:\n   *dos2unix applied\n"
        ));
        assert!(!rewritten.contains("v1.11.0"));
        assert!(!rewritten.contains('\r'));
        assert!(rewritten.ends_with("\n   See release_note.html from STM32Cube\n"));
        Ok(())
    }

    #[test]
    fn release_note_pointer_is_added_once() -> crate::Result<()> {
        let serie = Serie::parse("stm32f3")?;
        let once = rewrite_readme(README_TEXT, "v1.11.2", "abc", &serie);
        let twice = rewrite_readme(&once, "v1.11.2", "abc", &serie);
        assert_eq!(twice.matches(RELEASE_NOTE_POINTER).count(), 1);
        Ok(())
    }

    #[test]
    fn cmakelists_lists_hal_and_ll_sources() -> crate::Result<()> {
        let serie = Serie::parse("stm32f3")?;
        let files: Vec<String> = [
            "stm32f3xx_ll_usart.c",
            "stm32f3xx_hal_adc_ex.c",
            "stm32f3xx_hal.c",
            "stm32f3xx_hal_msp_template.c",
            "stm32f3xx_hal_adc.c",
        ]
        .iter()
        .map(|name| (*name).to_owned())
        .collect();

        let text = generate_cmakelists("# Copyright (c) 2019 Linaro\n", &serie, &files);
        let expected = "# Copyright (c) 2019 Linaro\n\
# Copyright (c) 2020 STMicroelectronics\n\
#\n\
# SPDX-License-Identifier: Apache-2.0\n\
\n\
zephyr_library_sources(soc/system_stm32f3xx.c)\n\
zephyr_library_sources(drivers/src/stm32f3xx_hal.c)\n\
zephyr_library_sources(drivers/src/stm32f3xx_hal_rcc.c)\n\
zephyr_library_sources_ifdef(CONFIG_USE_STM32_HAL_ADC drivers/src/stm32f3xx_hal_adc.c)\n\
zephyr_library_sources_ifdef(CONFIG_USE_STM32_HAL_ADC_EX drivers/src/stm32f3xx_hal_adc_ex.c)\n\
zephyr_library_sources_ifdef(CONFIG_USE_STM32_LL_USART drivers/src/stm32f3xx_ll_usart.c)\n";
        assert_eq!(text, expected);
        Ok(())
    }
}
