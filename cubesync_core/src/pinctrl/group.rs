//! Sorting of chip signals into the rule-defined devicetree groups.

use std::collections::BTreeMap;

use cubesync_api::{ChipSignals, GroupEntry, Mode, SignalEntry};

use super::rules::{GroupRule, RuleSet};

/// Groups of one chip keyed by group name.
pub type ChipGroups = BTreeMap<String, Vec<GroupEntry>>;

/// Place every signal entry of `chip` into the groups whose rule matches it.
///
/// An entry matching several rules lands in every one of them. Groups are
/// ordered by name; entries by the last character of the signal's first
/// `_`-separated token (the instance number), then port, then pin.
#[must_use]
pub fn group_chip(chip: &ChipSignals, rules: &RuleSet) -> ChipGroups {
    let mut groups = ChipGroups::new();
    for pin in &chip.pins {
        for signal in &pin.signals {
            for rule in rules.rules.iter().filter(|rule| rule.matches(&signal.name)) {
                groups
                    .entry(rule.name.clone())
                    .or_default()
                    .push(entry(pin.port, pin.pin, &pin.modifier, signal, rule));
            }
        }
    }
    for entries in groups.values_mut() {
        entries.sort_by_key(sort_key);
    }
    groups
}

fn entry(port: char, pin: u8, modifier: &str, signal: &SignalEntry, rule: &GroupRule) -> GroupEntry {
    let mode = rule.mode.unwrap_or(if signal.af.is_some() {
        Mode::Alternate
    } else {
        Mode::Analog
    });
    GroupEntry {
        port,
        pin,
        modifier: modifier.to_owned(),
        signal: signal.name.to_lowercase(),
        af: signal.af.clone(),
        mode,
        bias: rule.bias,
        drive: rule.drive,
        slew_rate: rule.slew_rate,
        variant: rule.variant.clone(),
    }
}

fn sort_key(entry: &GroupEntry) -> (Option<char>, char, u8) {
    let instance = entry
        .signal
        .split('_')
        .next()
        .and_then(|token| token.chars().last());
    (instance, entry.port, entry.pin)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pinctrl::rules::FamilyKind;
    use cubesync_api::{AlternateFunction, PinSignals};

    fn pin(port: char, number: u8, signals: &[(&str, Option<u8>)]) -> PinSignals {
        PinSignals {
            port,
            pin: number,
            modifier: String::new(),
            signals: signals
                .iter()
                .map(|(name, af)| SignalEntry::new(*name, af.map(AlternateFunction::Number)))
                .collect(),
        }
    }

    #[test]
    fn entries_follow_instance_port_pin_order() -> crate::Result<()> {
        let rules = RuleSet::load(
            "- name: UART_TX\n  match: \"^US?ART\\\\d+_TX$\"\n- name: ANY_UART\n  match: \"UART\"\n",
            "test",
            FamilyKind::Standard,
        )?;
        let chip = ChipSignals {
            name: "STM32G4TEST".into(),
            pins: vec![
                pin('b', 6, &[("USART2_TX", Some(7))]),
                pin('a', 9, &[("USART1_TX", Some(7)), ("ADC1_IN9", None)]),
                pin('a', 2, &[("USART2_TX", Some(7))]),
                pin('a', 14, &[("USART1_TX", Some(7))]),
            ],
        };

        let groups = group_chip(&chip, &rules);
        assert_eq!(groups.keys().collect::<Vec<_>>(), vec!["ANY_UART", "UART_TX"]);
        let order: Vec<_> = groups["UART_TX"]
            .iter()
            .map(|entry| format!("{}_p{}{}", entry.signal, entry.port, entry.pin))
            .collect();
        assert_eq!(
            order,
            vec!["usart1_tx_pa9", "usart1_tx_pa14", "usart2_tx_pa2", "usart2_tx_pb6"]
        );
        assert!(groups["UART_TX"]
            .iter()
            .all(|entry| entry.mode == Mode::Alternate));
        assert_eq!(groups["ANY_UART"].len(), 4);
        Ok(())
    }

    #[test]
    fn mode_is_inferred_from_af() -> crate::Result<()> {
        let rules = RuleSet::load("- name: ALL\n  match: \".\"\n", "test", FamilyKind::Standard)?;
        let chip = ChipSignals {
            name: "STM32G4TEST".into(),
            pins: vec![pin('a', 0, &[("ADC1_IN1", None), ("TIM2_CH1", Some(1))])],
        };
        let groups = group_chip(&chip, &rules);
        let modes: Vec<_> = groups["ALL"].iter().map(|entry| entry.mode).collect();
        assert_eq!(modes, vec![Mode::Analog, Mode::Alternate]);
        Ok(())
    }
}
