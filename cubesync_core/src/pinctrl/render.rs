//! Zephyr devicetree emission of grouped pin entries.

use std::sync::OnceLock;

use cubesync_api::{AlternateFunction, GroupEntry, Mode};
use regex::Regex;

use super::group::ChipGroups;
use super::rules::FamilyKind;
use crate::{Error, Result};

fn remap_number_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"_REMAP(\d+)$").unwrap_or_else(|_| unreachable!()))
}

fn unsupported(entry: &GroupEntry, reason: impl Into<String>) -> Error {
    Error::Render {
        signal: entry.signal.clone(),
        reason: reason.into(),
    }
}

/// Pinmux function of an AF-numbered entry: `ANALOG` or `AF<n>`.
///
/// # Errors
///
/// Returns [`Error::Render`] for an alternate entry without AF number and
/// for the input mode.
pub fn format_mode(entry: &GroupEntry) -> Result<String> {
    match (entry.mode, &entry.af) {
        (Mode::Analog, _) => Ok("ANALOG".to_owned()),
        (Mode::Alternate, Some(AlternateFunction::Number(af))) => Ok(format!("AF{af}")),
        (Mode::Alternate, _) => Err(unsupported(entry, "alternate mode without AF number")),
        (Mode::Input, _) => Err(unsupported(entry, "input mode needs remap numbering")),
    }
}

/// Pinmux mode of a remap-numbered entry.
#[must_use]
pub const fn format_mode_f1(mode: Mode) -> &'static str {
    match mode {
        Mode::Analog => "ANALOG",
        Mode::Input => "GPIO_IN",
        Mode::Alternate => "ALTERNATE",
    }
}

/// Remap argument of a remap-numbered entry: the remap token itself, or the
/// numbered form for plain remap indices.
#[must_use]
pub fn format_remap(af: Option<&AlternateFunction>) -> String {
    match af {
        Some(AlternateFunction::Remap(remap)) => remap.clone(),
        None | Some(AlternateFunction::Number(0)) => "NO_REMAP".to_owned(),
        Some(AlternateFunction::Number(1)) => "REMAP_1".to_owned(),
        Some(AlternateFunction::Number(2)) => "REMAP_2".to_owned(),
        Some(AlternateFunction::Number(3)) => "FULL_REMAP".to_owned(),
        Some(AlternateFunction::Number(other)) => format!("REMAP_{other}"),
    }
}

/// Node name suffix of a remap token: `UART1_REMAP2` gives `_remap2`; the
/// default remap (`_REMAP0`) and plain numbers give an empty suffix.
#[must_use]
pub fn format_remap_name(af: Option<&AlternateFunction>) -> String {
    let Some(AlternateFunction::Remap(remap)) = af else {
        return String::new();
    };
    remap_number_pattern()
        .captures(remap)
        .and_then(|captures| captures.get(1))
        .map(|number| number.as_str())
        .filter(|number| !number.trim_start_matches('0').is_empty())
        .map(|number| format!("_remap{number}"))
        .unwrap_or_default()
}

/// Node name of an entry, e.g. `usart1_tx_remap1_pb6`.
#[must_use]
pub fn node_name(entry: &GroupEntry) -> String {
    let mut name = format!(
        "{}{}_p{}{}{}",
        entry.signal,
        format_remap_name(entry.af.as_ref()),
        entry.port,
        entry.pin,
        entry.modifier
    );
    if let Some(variant) = &entry.variant {
        name.push('_');
        name.push_str(variant);
    }
    name
}

fn pinmux(entry: &GroupEntry, kind: FamilyKind) -> Result<String> {
    let port = entry.port.to_ascii_uppercase();
    Ok(match kind {
        FamilyKind::Legacy => format!(
            "STM32F1_PINMUX('{port}', {}, {}, {})",
            entry.pin,
            format_mode_f1(entry.mode),
            format_remap(entry.af.as_ref())
        ),
        FamilyKind::Standard => format!(
            "STM32_PINMUX('{port}', {}, {})",
            entry.pin,
            format_mode(entry)?
        ),
    })
}

/// Render the pinctrl include of one chip.
///
/// # Errors
///
/// Returns [`Error::Render`] when an entry cannot be expressed for the
/// family's pinmux macro.
pub fn render_chip(reference: &str, family: &str, address: u32, groups: &ChipGroups) -> Result<String> {
    let kind = FamilyKind::of(family);
    let binding = match kind {
        FamilyKind::Legacy => "stm32f1-pinctrl.h",
        FamilyKind::Standard => "stm32-pinctrl.h",
    };

    let mut out = String::new();
    out.push_str("/*\n");
    out.push_str(" * NOTE: Autogenerated file by cubesync pinctrl\n");
    out.push_str(&format!(" * for {reference}\n"));
    out.push_str(" *\n");
    out.push_str(" * SPDX-License-Identifier: Apache-2.0\n");
    out.push_str(" */\n\n");
    out.push_str(&format!("#include <dt-bindings/pinctrl/{binding}>\n\n"));
    out.push_str("/ {\n\tsoc {\n");
    out.push_str(&format!("\t\tpinctrl: pin-controller@{address:x} {{\n"));

    for (group, entries) in groups {
        out.push_str(&format!("\n\t\t\t/* {group} */\n\n"));
        for entry in entries {
            let name = node_name(entry);
            out.push_str(&format!("\t\t\t/omit-if-no-ref/ {name}: {name} {{\n"));
            out.push_str(&format!("\t\t\t\tpinmux = <{}>;\n", pinmux(entry, kind)?));
            if let Some(bias) = entry.bias {
                out.push_str(&format!("\t\t\t\tbias-{};\n", bias.as_str()));
            }
            if let Some(drive) = entry.drive {
                out.push_str(&format!("\t\t\t\tdrive-{};\n", drive.as_str()));
            }
            if let Some(slew_rate) = entry.slew_rate {
                out.push_str(&format!("\t\t\t\tslew-rate = \"{}\";\n", slew_rate.as_str()));
            }
            out.push_str("\t\t\t};\n\n");
        }
    }

    out.push_str("\t\t};\n\t};\n};\n");
    Ok(out)
}
