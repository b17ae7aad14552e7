//! Signal and alternate-function extraction from the STM32 pin/IP XML
//! database.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use cubesync_api::{AfTable, AlternateFunction, ChipSignals, PinAf, PinSignals, SignalEntry};
use regex::Regex;
use tracing::{debug, error};
use xmltree::{Element, XMLNode};

use super::rules::FamilyKind;
use crate::{display_path, fsutil, Error, Result};

macro_rules! static_regex {
    ($name:ident, $pattern:expr) => {
        fn $name() -> &'static Regex {
            static PATTERN: OnceLock<Regex> = OnceLock::new();
            PATTERN.get_or_init(|| Regex::new($pattern).unwrap_or_else(|_| unreachable!()))
        }
    };
}

static_regex!(gpio_file_pattern, r"^GPIO-(.+)_Modes\.xml$");
static_regex!(remap_pattern, r"^[A-Z0-9_]+_REMAP\d+");
static_regex!(af_pattern, r"^GPIO_AF(\d+)_[A-Z0-9]+");
static_regex!(pin_pattern, r"^P([A-Z])(\d+)(_C)?");
static_regex!(analog_pattern, r"^(?:ADC(?:\d+)?_IN[NP]?\d+|DAC(?:\d+)?_OUT\d+)$");

/// Locate the `mcu` folder of a database: STM32 Open Pin Data keeps it at
/// the root, a CubeMX installation under `db/`.
///
/// # Errors
///
/// Returns [`Error::DatabaseNotFound`] when neither layout is present.
pub fn database_root(path: &Path) -> Result<PathBuf> {
    [path.join("mcu"), path.join("db").join("mcu")]
        .into_iter()
        .find(|candidate| candidate.is_dir())
        .ok_or_else(|| Error::DatabaseNotFound {
            path: display_path(&path.join("mcu")),
        })
}

fn parse_document(path: &Path) -> Result<Element> {
    let text = fsutil::read_to_string(path)?;
    Element::parse(text.as_bytes()).map_err(|source| Error::Xml {
        path: display_path(path),
        source,
    })
}

fn children<'a>(element: &'a Element, name: &'a str) -> impl Iterator<Item = &'a Element> + 'a {
    element
        .children
        .iter()
        .filter_map(XMLNode::as_element)
        .filter(move |child| child.name == name)
}

fn attribute<'a>(element: &'a Element, name: &str) -> Option<&'a str> {
    element.attributes.get(name).map(String::as_str)
}

fn sorted_files(dir: &Path) -> Result<Vec<(String, PathBuf)>> {
    let mut files = Vec::new();
    for entry in std::fs::read_dir(dir).map_err(fsutil::io_error(dir))? {
        let entry = entry.map_err(fsutil::io_error(dir))?;
        if entry.file_type().is_ok_and(|kind| kind.is_file()) {
            files.push((entry.file_name().to_string_lossy().into_owned(), entry.path()));
        }
    }
    files.sort();
    Ok(files)
}

/// Read every `IP/GPIO-<version>_Modes.xml` file into an AF table.
///
/// Signals without usable AF data are logged and skipped; unreadable files
/// are logged and skipped as a whole.
///
/// # Errors
///
/// Returns [`Error::DatabaseNotFound`] when the `IP` folder is missing.
pub fn extract_alternate_functions(path: &Path) -> Result<AfTable> {
    let ip_dir = database_root(path)?.join("IP");
    if !ip_dir.is_dir() {
        return Err(Error::DatabaseNotFound {
            path: display_path(&ip_dir),
        });
    }

    let mut table = AfTable::new();
    for (file_name, file) in sorted_files(&ip_dir)? {
        let Some(ip) = gpio_file_pattern()
            .captures(&file_name)
            .and_then(|captures| captures.get(1))
            .map(|m| m.as_str().to_owned())
        else {
            continue;
        };
        let root = match parse_document(&file) {
            Ok(root) => root,
            Err(err) => {
                error!("{err}");
                continue;
            }
        };

        let legacy = FamilyKind::of(&ip) == FamilyKind::Legacy;
        let pins = table.entry(ip.clone()).or_default();
        for pin in children(&root, "GPIO_Pin") {
            let Some(pin_name) = attribute(pin, "Name") else {
                continue;
            };
            let signals = pins.entry(pin_name.to_owned()).or_default();
            for signal in children(pin, "PinSignal") {
                let Some(signal_name) = attribute(signal, "Name") else {
                    continue;
                };
                let af = if legacy {
                    remap_tokens(signal, signal_name, &ip)
                } else {
                    af_number(signal, signal_name, &ip)
                };
                if let Some(af) = af {
                    signals.insert(signal_name.to_owned(), af);
                }
            }
        }
        debug!(ip = %ip, pins = pins.len(), "GPIO IP parsed");
    }
    Ok(table)
}

fn remap_tokens(signal: &Element, signal_name: &str, ip: &str) -> Option<PinAf> {
    let mut remaps = Vec::new();
    for block in children(signal, "RemapBlock") {
        let Some(name) = attribute(block, "Name") else {
            continue;
        };
        if remap_pattern().is_match(name) {
            remaps.push(name.to_owned());
        } else {
            error!("Unexpected remap format: {name} (ip: {ip})");
        }
    }
    if remaps.is_empty() {
        error!("Missing remaps for {signal_name} (ip: {ip})");
        return None;
    }
    Some(PinAf::Remaps(remaps))
}

fn af_number(signal: &Element, signal_name: &str, ip: &str) -> Option<PinAf> {
    let Some(value) = children(signal, "SpecificParameter")
        .find_map(|param| children(param, "PossibleValue").next())
        .and_then(Element::get_text)
    else {
        return Some(PinAf::Analog);
    };
    let number = af_pattern()
        .captures(value.trim())
        .and_then(|captures| captures.get(1))
        .and_then(|m| m.as_str().parse::<u8>().ok());
    if number.is_none() {
        error!("Unexpected AF format: {value} (ip: {ip}, signal: {signal_name})");
    }
    number.map(PinAf::Number)
}

/// Resolve the signals of every chip descriptor (`STM32*.xml`), grouped by
/// family (`STM32F0`, ...).
///
/// Chips whose GPIO IP version is absent from `afs`, or whose descriptor
/// cannot be parsed, are logged and skipped.
///
/// # Errors
///
/// Returns [`Error::DatabaseNotFound`] when the `mcu` folder is missing.
pub fn extract_mcu_signals(path: &Path, afs: &AfTable) -> Result<BTreeMap<String, Vec<ChipSignals>>> {
    let mcu_dir = database_root(path)?;
    let mut results: BTreeMap<String, Vec<ChipSignals>> = BTreeMap::new();

    for (file_name, file) in sorted_files(&mcu_dir)? {
        if !file_name.starts_with("STM32") || !file_name.ends_with(".xml") {
            continue;
        }
        let root = match parse_document(&file) {
            Ok(root) => root,
            Err(err) => {
                error!("{err}");
                continue;
            }
        };
        let (Some(family), Some(reference)) = (attribute(&root, "Family"), attribute(&root, "RefName"))
        else {
            error!("Family or reference not specified (mcu: {file_name})");
            continue;
        };
        let family = family.replace('+', "");

        let Some(gpio_version) = children(&root, "IP")
            .find(|ip| attribute(ip, "Name") == Some("GPIO"))
            .and_then(|ip| attribute(ip, "Version"))
        else {
            error!("GPIO IP version not specified (mcu: {file_name})");
            continue;
        };
        let Some(gpio_ip) = afs.get(gpio_version) else {
            error!("GPIO IP version {gpio_version} not available (mcu: {file_name})");
            continue;
        };

        let legacy = FamilyKind::of(&family) == FamilyKind::Legacy;
        let pins = children(&root, "Pin")
            .filter(|pin| attribute(pin, "Type") == Some("I/O"))
            .filter_map(|pin| pin_signals(pin, gpio_ip, legacy))
            .collect();
        results.entry(family).or_default().push(ChipSignals {
            name: reference.to_owned(),
            pins,
        });
    }
    Ok(results)
}

fn pin_signals(
    pin: &Element,
    gpio_ip: &BTreeMap<String, BTreeMap<String, PinAf>>,
    legacy: bool,
) -> Option<PinSignals> {
    let name = attribute(pin, "Name")?;
    let captures = pin_pattern().captures(name)?;
    let port = captures.get(1)?.as_str().chars().next()?.to_ascii_lowercase();
    let number = captures.get(2)?.as_str().parse::<u8>().ok()?;
    let modifier = captures
        .get(3)
        .map(|m| m.as_str().to_lowercase())
        .unwrap_or_default();
    let pin_afs = gpio_ip.get(name)?;

    let no_remap = legacy.then_some(AlternateFunction::Number(0));
    let mut signals = Vec::new();
    for signal in children(pin, "Signal") {
        let Some(signal_name) = attribute(signal, "Name") else {
            continue;
        };
        if signal_name == "GPIO" {
            continue;
        }
        if analog_pattern().is_match(signal_name) {
            signals.push(SignalEntry::new(signal_name, no_remap.clone()));
            continue;
        }
        match pin_afs.get(signal_name) {
            Some(PinAf::Number(af)) => {
                signals.push(SignalEntry::new(signal_name, Some(AlternateFunction::Number(*af))));
            }
            Some(PinAf::Remaps(remaps)) => signals.extend(remaps.iter().map(|remap| {
                SignalEntry::new(signal_name, Some(AlternateFunction::Remap(remap.clone())))
            })),
            Some(PinAf::Analog) | None => {
                signals.push(SignalEntry::new(signal_name, no_remap.clone()));
            }
        }
    }

    Some(PinSignals {
        port,
        pin: number,
        modifier,
        signals,
    })
}
