//! Group rules: which signals end up in which devicetree group, and with
//! which pin attributes.

use std::path::Path;

use cubesync_api::{Bias, Drive, Mode, SlewRate};
use regex::Regex;
use serde::Deserialize;

use crate::{display_path, fsutil, Error, Result};

const EMBEDDED_STANDARD: &str = include_str!("../../config/pinctrl.yaml");
const EMBEDDED_LEGACY: &str = include_str!("../../config/pinctrl-f1.yaml");

/// Pin numbering scheme of a family.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FamilyKind {
    /// Remap-based numbering (`STM32F1`).
    Legacy,
    /// AF index numbering (every other family).
    Standard,
}

impl FamilyKind {
    /// Numbering scheme of a family (`STM32F1`) or of a GPIO IP version
    /// named after one (`STM32F103x8_gpio_v1_0`).
    #[must_use]
    pub fn of(name: &str) -> Self {
        if name.to_ascii_uppercase().contains("STM32F1") {
            Self::Legacy
        } else {
            Self::Standard
        }
    }
}

/// A group rule as written in a configuration document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct RawGroupRule {
    /// Group name, used as a comment header in the output.
    #[serde(default)]
    pub name: Option<String>,
    /// Regular expression searched in signal names.
    #[serde(default, rename = "match")]
    pub pattern: Option<String>,
    /// `analog`, `input` or `alternate`.
    #[serde(default)]
    pub mode: Option<String>,
    /// `disable`, `pull-up` or `pull-down`.
    #[serde(default)]
    pub bias: Option<String>,
    /// `push-pull` or `open-drain`.
    #[serde(default)]
    pub drive: Option<String>,
    /// Family dependent speed setting.
    #[serde(default)]
    pub slew_rate: Option<String>,
    /// Suffix appended to node names, e.g. `sleep`.
    #[serde(default)]
    pub variant: Option<String>,
}

/// A validated group rule.
#[derive(Debug, Clone)]
pub struct GroupRule {
    /// Group name.
    pub name: String,
    /// Compiled signal pattern.
    pub pattern: Regex,
    /// Explicit mode; inferred from the AF when absent.
    pub mode: Option<Mode>,
    /// Optional bias.
    pub bias: Option<Bias>,
    /// Optional driver type.
    pub drive: Option<Drive>,
    /// Optional slew rate.
    pub slew_rate: Option<SlewRate>,
    /// Optional node name variant.
    pub variant: Option<String>,
}

fn parse_choice<T: Copy>(
    value: Option<&str>,
    choices: &[T],
    spelling: fn(T) -> &'static str,
    name: &str,
    field: &str,
) -> Result<Option<T>> {
    let Some(value) = value else {
        return Ok(None);
    };
    choices
        .iter()
        .copied()
        .find(|choice| spelling(*choice) == value)
        .map(Some)
        .ok_or_else(|| invalid(name, format!("invalid {field}: {value}")))
}

fn invalid(name: &str, reason: impl Into<String>) -> Error {
    Error::InvalidGroupRule {
        name: name.to_owned(),
        reason: reason.into(),
    }
}

impl GroupRule {
    /// Check `raw` against the constraints of `kind` and compile it.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidGroupRule`] naming the first violated
    /// constraint.
    pub fn validate(raw: &RawGroupRule, kind: FamilyKind) -> Result<Self> {
        let name = raw
            .name
            .as_deref()
            .filter(|name| !name.is_empty())
            .ok_or_else(|| invalid("", "missing name"))?;
        let pattern = raw
            .pattern
            .as_deref()
            .filter(|pattern| !pattern.is_empty())
            .ok_or_else(|| invalid(name, "missing match"))?;
        let pattern = Regex::new(pattern).map_err(|err| invalid(name, err.to_string()))?;

        let modes: &[Mode] = match kind {
            FamilyKind::Legacy => &[Mode::Analog, Mode::Input, Mode::Alternate],
            FamilyKind::Standard => &[Mode::Analog, Mode::Alternate],
        };
        let mode = parse_choice(raw.mode.as_deref(), modes, Mode::as_str, name, "mode")?;
        if kind == FamilyKind::Legacy && mode.is_none() {
            return Err(invalid(name, "missing mode"));
        }

        let bias = parse_choice(
            raw.bias.as_deref(),
            &[Bias::Disable, Bias::PullUp, Bias::PullDown],
            Bias::as_str,
            name,
            "bias",
        )?;
        if kind == FamilyKind::Legacy
            && mode != Some(Mode::Input)
            && bias.is_some_and(|bias| bias != Bias::Disable)
        {
            return Err(invalid(name, "bias can only be set for input mode"));
        }

        let drive = parse_choice(
            raw.drive.as_deref(),
            &[Drive::PushPull, Drive::OpenDrain],
            Drive::as_str,
            name,
            "drive",
        )?;

        let slew_rates: Vec<SlewRate> = [
            SlewRate::MaxSpeed2Mhz,
            SlewRate::MaxSpeed10Mhz,
            SlewRate::MaxSpeed50Mhz,
            SlewRate::LowSpeed,
            SlewRate::MediumSpeed,
            SlewRate::HighSpeed,
            SlewRate::VeryHighSpeed,
        ]
        .into_iter()
        .filter(|rate| rate.is_legacy() == (kind == FamilyKind::Legacy))
        .collect();
        let slew_rate = parse_choice(
            raw.slew_rate.as_deref(),
            &slew_rates,
            SlewRate::as_str,
            name,
            "slew-rate",
        )?;

        Ok(Self {
            name: name.to_owned(),
            pattern,
            mode,
            bias,
            drive,
            slew_rate,
            variant: raw.variant.clone().filter(|variant| !variant.is_empty()),
        })
    }

    /// Whether the pattern occurs in `signal`.
    #[must_use]
    pub fn matches(&self, signal: &str) -> bool {
        self.pattern.is_match(signal)
    }
}

/// Validated rules of one family kind, in declaration order.
#[derive(Debug, Clone)]
pub struct RuleSet {
    /// Family kind the rules were validated for.
    pub kind: FamilyKind,
    /// Rules in declaration order.
    pub rules: Vec<GroupRule>,
}

impl RuleSet {
    /// Decode and validate a YAML list of rules.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] for undecodable YAML and
    /// [`Error::InvalidGroupRule`] for the first invalid rule.
    pub fn load(yaml: &str, origin: &str, kind: FamilyKind) -> Result<Self> {
        let raw: Vec<RawGroupRule> = serde_yaml::from_str(yaml).map_err(|source| Error::Config {
            origin: origin.to_owned(),
            source,
        })?;
        let rules = raw
            .iter()
            .map(|rule| GroupRule::validate(rule, kind))
            .collect::<Result<_>>()?;
        Ok(Self { kind, rules })
    }
}

/// Rule sets used by pinctrl generation.
#[derive(Debug, Clone)]
pub struct PinctrlConfig {
    /// Rules shared by every AF-numbered family.
    pub standard: RuleSet,
    /// Rules of the remap-numbered family.
    pub legacy: RuleSet,
}

impl PinctrlConfig {
    /// Rules shipped with the crate.
    ///
    /// # Errors
    ///
    /// Returns an error when an embedded document is invalid.
    pub fn embedded() -> Result<Self> {
        Ok(Self {
            standard: RuleSet::load(EMBEDDED_STANDARD, "pinctrl.yaml", FamilyKind::Standard)?,
            legacy: RuleSet::load(EMBEDDED_LEGACY, "pinctrl-f1.yaml", FamilyKind::Legacy)?,
        })
    }

    /// Rules read from user supplied documents.
    ///
    /// # Errors
    ///
    /// Returns an error when a file cannot be read or holds an invalid rule.
    pub fn from_files(standard: &Path, legacy: &Path) -> Result<Self> {
        Ok(Self {
            standard: RuleSet::load(
                &fsutil::read_to_string(standard)?,
                &display_path(standard),
                FamilyKind::Standard,
            )?,
            legacy: RuleSet::load(
                &fsutil::read_to_string(legacy)?,
                &display_path(legacy),
                FamilyKind::Legacy,
            )?,
        })
    }

    /// Rule set applying to `family`.
    #[must_use]
    pub fn rules_for(&self, family: &str) -> &RuleSet {
        match FamilyKind::of(family) {
            FamilyKind::Legacy => &self.legacy,
            FamilyKind::Standard => &self.standard,
        }
    }
}
