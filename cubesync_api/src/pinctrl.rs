use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Alternate-function selector carried by a signal entry.
///
/// Serialized untagged so extracted tables read like the vendor data:
/// `0`, `7` or `"USART1_REMAP1"`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AlternateFunction {
    /// AF number (or remap number 0 on the legacy-numbering family).
    Number(u8),
    /// Named remap token of the legacy-numbering family.
    Remap(String),
}

/// Alternate-function data recorded for one signal of one GPIO IP pin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PinAf {
    /// Single AF index.
    Number(u8),
    /// Every remap configuration reaching the pin, in document order.
    Remaps(Vec<String>),
    /// Signal declared without AF selector.
    Analog,
}

/// `GPIO IP version → pin name → signal name → AF`.
pub type AfTable = BTreeMap<String, BTreeMap<String, BTreeMap<String, PinAf>>>;

/// One signal available on a pin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignalEntry {
    /// Vendor signal name, e.g. `USART1_TX`.
    pub name: String,
    /// AF selector, `None` for analog signals.
    #[serde(default)]
    pub af: Option<AlternateFunction>,
}

impl SignalEntry {
    /// Convenience constructor.
    pub fn new(name: impl Into<String>, af: Option<AlternateFunction>) -> Self {
        Self {
            name: name.into(),
            af,
        }
    }
}

/// Signals of a single I/O pin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PinSignals {
    /// Lowercase port letter (`a`, `b`, ...).
    pub port: char,
    /// Pin number within the port.
    pub pin: u8,
    /// Lowercase pad modifier (`_c`) or empty.
    #[serde(default)]
    pub modifier: String,
    /// Every signal+AF combination, one entry per remap alternative.
    #[serde(default)]
    pub signals: Vec<SignalEntry>,
}

/// All pins of one microcontroller reference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChipSignals {
    /// Reference name, e.g. `STM32F030C6Tx`.
    pub name: String,
    /// I/O pins in document order.
    #[serde(default)]
    pub pins: Vec<PinSignals>,
}

/// Pin operating mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Mode {
    /// Analog function.
    Analog,
    /// Digital input (legacy-numbering family only).
    Input,
    /// Alternate function.
    Alternate,
}

impl Mode {
    /// Configuration spelling.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Analog => "analog",
            Self::Input => "input",
            Self::Alternate => "alternate",
        }
    }
}

/// Pin bias.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Bias {
    /// No pull.
    Disable,
    /// Pull-up.
    PullUp,
    /// Pull-down.
    PullDown,
}

impl Bias {
    /// Configuration spelling.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Disable => "disable",
            Self::PullUp => "pull-up",
            Self::PullDown => "pull-down",
        }
    }
}

/// Output driver type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Drive {
    /// Push-pull output.
    PushPull,
    /// Open-drain output.
    OpenDrain,
}

impl Drive {
    /// Configuration spelling.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::PushPull => "push-pull",
            Self::OpenDrain => "open-drain",
        }
    }
}

/// Output slew rate; the `MaxSpeed*` values belong to the legacy family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SlewRate {
    /// `low-speed`
    #[serde(rename = "low-speed")]
    LowSpeed,
    /// `medium-speed`
    #[serde(rename = "medium-speed")]
    MediumSpeed,
    /// `high-speed`
    #[serde(rename = "high-speed")]
    HighSpeed,
    /// `very-high-speed`
    #[serde(rename = "very-high-speed")]
    VeryHighSpeed,
    /// `max-speed-2mhz`
    #[serde(rename = "max-speed-2mhz")]
    MaxSpeed2Mhz,
    /// `max-speed-10mhz`
    #[serde(rename = "max-speed-10mhz")]
    MaxSpeed10Mhz,
    /// `max-speed-50mhz`
    #[serde(rename = "max-speed-50mhz")]
    MaxSpeed50Mhz,
}

impl SlewRate {
    /// Configuration spelling.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::LowSpeed => "low-speed",
            Self::MediumSpeed => "medium-speed",
            Self::HighSpeed => "high-speed",
            Self::VeryHighSpeed => "very-high-speed",
            Self::MaxSpeed2Mhz => "max-speed-2mhz",
            Self::MaxSpeed10Mhz => "max-speed-10mhz",
            Self::MaxSpeed50Mhz => "max-speed-50mhz",
        }
    }

    /// Whether the value is one of the legacy-family speed limits.
    pub const fn is_legacy(self) -> bool {
        matches!(
            self,
            Self::MaxSpeed2Mhz | Self::MaxSpeed10Mhz | Self::MaxSpeed50Mhz
        )
    }
}

/// A signal entry placed in a peripheral group, carrying the group attributes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupEntry {
    /// Lowercase port letter.
    pub port: char,
    /// Pin number.
    pub pin: u8,
    /// Lowercase pad modifier or empty.
    #[serde(default)]
    pub modifier: String,
    /// Lowercase signal name.
    pub signal: String,
    /// AF selector.
    #[serde(default)]
    pub af: Option<AlternateFunction>,
    /// Resolved mode.
    pub mode: Mode,
    /// Optional bias.
    #[serde(default)]
    pub bias: Option<Bias>,
    /// Optional driver type.
    #[serde(default)]
    pub drive: Option<Drive>,
    /// Optional slew rate.
    #[serde(default, rename = "slew-rate")]
    pub slew_rate: Option<SlewRate>,
    /// Optional node name variant suffix.
    #[serde(default)]
    pub variant: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alternate_function_is_untagged() {
        let json = serde_json::to_string(&vec![
            AlternateFunction::Number(7),
            AlternateFunction::Remap("USART1_REMAP1".into()),
        ])
        .expect("serialize afs");
        assert_eq!(json, r#"[7,"USART1_REMAP1"]"#);

        let decoded: SignalEntry =
            serde_json::from_str(r#"{"name": "ADC1_IN0"}"#).expect("deserialize entry");
        assert_eq!(decoded, SignalEntry::new("ADC1_IN0", None));
    }

    #[test]
    fn attribute_spellings_match_configuration() {
        assert_eq!(
            serde_json::to_string(&SlewRate::MaxSpeed10Mhz).expect("serialize"),
            "\"max-speed-10mhz\""
        );
        assert_eq!(SlewRate::MaxSpeed10Mhz.as_str(), "max-speed-10mhz");
        assert_eq!(
            serde_json::to_string(&Bias::PullDown).expect("serialize"),
            "\"pull-down\""
        );
        assert_eq!(Drive::OpenDrain.as_str(), "open-drain");
        assert_eq!(Mode::Alternate.as_str(), "alternate");
        assert!(SlewRate::MaxSpeed2Mhz.is_legacy());
        assert!(!SlewRate::HighSpeed.is_legacy());
    }
}
