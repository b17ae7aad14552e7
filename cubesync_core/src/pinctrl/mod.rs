//! Pinctrl devicetree generation from the STM32 pin/IP database.
//!
//! Pipeline: [`extract`] reads AF tables and chip signals, [`group`] sorts
//! the signals into rule-defined groups, [`render`] writes one include per
//! chip. [`generate`] runs all three over a database folder.

use std::path::{Path, PathBuf};

use git2::{DescribeOptions, Repository};
use tracing::{error, info, warn};

use crate::{fsutil, Result};

pub mod extract;
pub mod group;
pub mod render;
pub mod rules;

pub use extract::{extract_alternate_functions, extract_mcu_signals};
pub use group::{group_chip, ChipGroups};
pub use render::{format_mode, format_mode_f1, format_remap, format_remap_name, render_chip};
pub use rules::{FamilyKind, GroupRule, PinctrlConfig, RawGroupRule, RuleSet};

const PINCTRL_ADDRESSES: &[(&str, u32)] = &[
    ("stm32f0", 0x4800_0000),
    ("stm32f1", 0x4001_0800),
    ("stm32f2", 0x4002_0000),
    ("stm32f3", 0x4800_0000),
    ("stm32f4", 0x4002_0000),
    ("stm32f7", 0x4002_0000),
    ("stm32g0", 0x5000_0000),
    ("stm32g4", 0x4800_0000),
    ("stm32h7", 0x5802_0000),
    ("stm32l0", 0x5000_0000),
    ("stm32l1", 0x4002_0000),
    ("stm32l4", 0x4800_0000),
    ("stm32l5", 0x4202_0000),
    ("stm32mp1", 0x5000_2000),
    ("stm32wb", 0x4800_0000),
];

/// Base address of the pin controller of `family`, if the family is
/// supported.
#[must_use]
pub fn family_address(family: &str) -> Option<u32> {
    let family = family.to_lowercase();
    PINCTRL_ADDRESSES
        .iter()
        .find(|(name, _)| *name == family)
        .map(|(_, address)| *address)
}

/// Outcome of a pinctrl generation run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PinctrlSummary {
    /// Database version as described by git, `unknown` outside a repository.
    pub database_version: String,
    /// Written include files.
    pub files: Vec<PathBuf>,
    /// Families without a known pin controller address.
    pub unsupported_families: Vec<String>,
    /// Chips whose include could not be rendered.
    pub skipped_chips: Vec<String>,
}

fn database_version(path: &Path) -> String {
    Repository::discover(path)
        .and_then(|repo| {
            let describe = repo.describe(DescribeOptions::new().describe_tags())?;
            describe.format(None)
        })
        .unwrap_or_else(|_| "unknown".to_owned())
}

fn readme(version: &str) -> String {
    format!(
        "STM32 Pin Control Files\n\
         #######################\n\
         \n\
         Origin:\n   \
         Generated from STM32 Open Pin Data\n   \
         https://github.com/STMicroelectronics/STM32_open_pin_data\n\
         \n\
         Status:\n   \
         Generated from version {version}\n"
    )
}

/// Regenerate every pinctrl include of the database at `db_path` into
/// `out_dir`, which is cleared first.
///
/// Files are written as `st/<family suffix>/<reference>-pinctrl.dtsi`, next
/// to a `README.rst` recording the database version. Unsupported families
/// and chips that fail to render are logged and skipped.
///
/// # Errors
///
/// Returns an error when the database layout is missing or the output
/// cannot be written.
pub fn generate(db_path: &Path, out_dir: &Path, config: &PinctrlConfig) -> Result<PinctrlSummary> {
    let afs = extract_alternate_functions(db_path)?;
    let signals = extract_mcu_signals(db_path, &afs)?;

    fsutil::remove_dir_all(out_dir)?;
    fsutil::create_dir_all(out_dir)?;

    let mut summary = PinctrlSummary {
        database_version: database_version(db_path),
        ..PinctrlSummary::default()
    };
    fsutil::write(&out_dir.join("README.rst"), readme(&summary.database_version))?;

    for (family, chips) in &signals {
        let Some(address) = family_address(family) else {
            error!("Unsupported family: {family}");
            summary.unsupported_families.push(family.clone());
            continue;
        };
        let lower = family.to_lowercase();
        let family_dir = out_dir
            .join("st")
            .join(lower.strip_prefix("stm32").unwrap_or(&lower));
        let rules = config.rules_for(family);

        for chip in chips {
            let groups = group_chip(chip, rules);
            if groups.is_empty() {
                continue;
            }
            let text = match render_chip(&chip.name, family, address, &groups) {
                Ok(text) => text,
                Err(err) => {
                    warn!(chip = %chip.name, "skipping chip: {err}");
                    summary.skipped_chips.push(chip.name.clone());
                    continue;
                }
            };
            let file = family_dir.join(format!("{}-pinctrl.dtsi", chip.name.to_lowercase()));
            fsutil::write(&file, text)?;
            summary.files.push(file);
        }
    }

    info!(
        files = summary.files.len(),
        skipped = summary.skipped_chips.len(),
        version = %summary.database_version,
        "pinctrl files generated"
    );
    Ok(summary)
}
