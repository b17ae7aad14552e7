use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use cubesync_api::{AlternateFunction, ChipSignals, PinAf, PinSignals, SignalEntry};
use cubesync_core::pinctrl::{self, PinctrlConfig};
use cubesync_core::Result;
use tempfile::TempDir;

const F0_EXPECTED: &str = concat!(
    "/*\n",
    " * NOTE: Autogenerated file by cubesync pinctrl\n",
    " * for STM32F0TESTDIE\n",
    " *\n",
    " * SPDX-License-Identifier: Apache-2.0\n",
    " */\n",
    "\n",
    "#include <dt-bindings/pinctrl/stm32-pinctrl.h>\n",
    "\n",
    "/ {\n",
    "\tsoc {\n",
    "\t\tpinctrl: pin-controller@48000000 {\n",
    "\n",
    "\t\t\t/* ADC_IN / ADC_INP / ADC_INN */\n",
    "\n",
    "\t\t\t/omit-if-no-ref/ adc1_in0_pa0: adc1_in0_pa0 {\n",
    "\t\t\t\tpinmux = <STM32_PINMUX('A', 0, ANALOG)>;\n",
    "\t\t\t};\n",
    "\n",
    "\n",
    "\t\t\t/* UART_RX / USART_RX / LPUART_RX */\n",
    "\n",
    "\t\t\t/omit-if-no-ref/ uart1_rx_pa0: uart1_rx_pa0 {\n",
    "\t\t\t\tpinmux = <STM32_PINMUX('A', 0, AF1)>;\n",
    "\t\t\t};\n",
    "\n",
    "\n",
    "\t\t\t/* UART_TX / USART_TX / LPUART_TX */\n",
    "\n",
    "\t\t\t/omit-if-no-ref/ uart1_tx_pa0: uart1_tx_pa0 {\n",
    "\t\t\t\tpinmux = <STM32_PINMUX('A', 0, AF0)>;\n",
    "\t\t\t\tbias-pull-up;\n",
    "\t\t\t};\n",
    "\n",
    "\t\t};\n",
    "\t};\n",
    "};\n",
);

fn database() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("data")
        .join("pindata")
}

fn remap(name: &str) -> Option<AlternateFunction> {
    Some(AlternateFunction::Remap(name.to_owned()))
}

#[test]
fn alternate_function_tables_follow_the_ip_numbering() -> Result<()> {
    let afs = pinctrl::extract_alternate_functions(&database())?;
    assert_eq!(
        afs.keys().collect::<Vec<_>>(),
        vec!["STM32F0TESTIP", "STM32F1TESTIP"]
    );
    assert_eq!(
        afs["STM32F0TESTIP"]["PA0"],
        BTreeMap::from([
            ("UART1_RX".to_owned(), PinAf::Number(1)),
            ("UART1_TX".to_owned(), PinAf::Number(0)),
        ])
    );
    assert_eq!(
        afs["STM32F1TESTIP"]["PA0"],
        BTreeMap::from([
            ("UART1_RX".to_owned(), PinAf::Remaps(vec!["UART1_REMAP1".to_owned()])),
            (
                "UART1_TX".to_owned(),
                PinAf::Remaps(vec![
                    "UART1_REMAP0".to_owned(),
                    "UART1_REMAP1".to_owned(),
                    "UART1_REMAP2".to_owned(),
                    "UART1_REMAP3".to_owned(),
                ])
            ),
        ])
    );
    Ok(())
}

#[test]
fn chip_signals_resolve_against_their_gpio_ip() -> Result<()> {
    let db = database();
    let afs = pinctrl::extract_alternate_functions(&db)?;
    let signals = pinctrl::extract_mcu_signals(&db, &afs)?;

    // STM32L0NOGPIO references an IP version absent from the database
    assert_eq!(
        signals.keys().collect::<Vec<_>>(),
        vec!["STM32C0", "STM32F0", "STM32F1"]
    );

    assert_eq!(
        signals["STM32F0"],
        vec![ChipSignals {
            name: "STM32F0TESTDIE".into(),
            pins: vec![PinSignals {
                port: 'a',
                pin: 0,
                modifier: String::new(),
                signals: vec![
                    SignalEntry::new("UART1_TX", Some(AlternateFunction::Number(0))),
                    SignalEntry::new("UART1_RX", Some(AlternateFunction::Number(1))),
                    SignalEntry::new("ADC1_IN0", None),
                ],
            }],
        }]
    );

    assert_eq!(
        signals["STM32F1"],
        vec![ChipSignals {
            name: "STM32F1TESTDIE".into(),
            pins: vec![PinSignals {
                port: 'a',
                pin: 0,
                modifier: String::new(),
                signals: vec![
                    SignalEntry::new("UART1_TX", remap("UART1_REMAP0")),
                    SignalEntry::new("UART1_TX", remap("UART1_REMAP1")),
                    SignalEntry::new("UART1_TX", remap("UART1_REMAP2")),
                    SignalEntry::new("UART1_TX", remap("UART1_REMAP3")),
                    SignalEntry::new("UART1_RX", remap("UART1_REMAP1")),
                    SignalEntry::new("ADC1_IN0", Some(AlternateFunction::Number(0))),
                    SignalEntry::new("I2C2_SCL", Some(AlternateFunction::Number(0))),
                ],
            }],
        }]
    );
    Ok(())
}

#[test]
fn generated_tree_matches_reference_output() -> Result<()> {
    let out = TempDir::new().expect("tempdir");
    let summary = pinctrl::generate(&database(), out.path(), &PinctrlConfig::embedded()?)?;

    assert_eq!(summary.unsupported_families, vec!["STM32C0".to_owned()]);
    assert!(summary.skipped_chips.is_empty());
    assert_eq!(
        summary.files,
        vec![
            out.path().join("st/f0/stm32f0testdie-pinctrl.dtsi"),
            out.path().join("st/f1/stm32f1testdie-pinctrl.dtsi"),
        ]
    );

    let f0 = fs::read_to_string(out.path().join("st/f0/stm32f0testdie-pinctrl.dtsi"))
        .expect("read f0 output");
    assert_eq!(f0, F0_EXPECTED);

    let f1 = fs::read_to_string(out.path().join("st/f1/stm32f1testdie-pinctrl.dtsi"))
        .expect("read f1 output");
    assert!(f1.contains("#include <dt-bindings/pinctrl/stm32f1-pinctrl.h>\n"));
    assert!(f1.contains("\t\tpinctrl: pin-controller@40010800 {\n"));
    assert!(f1.contains(
        "\t\t\t/omit-if-no-ref/ adc1_in0_pa0: adc1_in0_pa0 {\n\
         \t\t\t\tpinmux = <STM32F1_PINMUX('A', 0, ANALOG, NO_REMAP)>;\n\
         \t\t\t};\n"
    ));
    assert!(f1.contains(
        "\t\t\t/omit-if-no-ref/ i2c2_scl_pa0: i2c2_scl_pa0 {\n\
         \t\t\t\tpinmux = <STM32F1_PINMUX('A', 0, ALTERNATE, NO_REMAP)>;\n\
         \t\t\t\tdrive-open-drain;\n\
         \t\t\t};\n"
    ));
    assert!(f1.contains(
        "\t\t\t/omit-if-no-ref/ uart1_rx_remap1_pa0: uart1_rx_remap1_pa0 {\n\
         \t\t\t\tpinmux = <STM32F1_PINMUX('A', 0, GPIO_IN, UART1_REMAP1)>;\n\
         \t\t\t};\n"
    ));
    let tx_nodes: Vec<&str> = f1
        .lines()
        .filter(|line| line.contains("/omit-if-no-ref/ uart1_tx"))
        .collect();
    assert_eq!(
        tx_nodes,
        vec![
            "\t\t\t/omit-if-no-ref/ uart1_tx_pa0: uart1_tx_pa0 {",
            "\t\t\t/omit-if-no-ref/ uart1_tx_remap1_pa0: uart1_tx_remap1_pa0 {",
            "\t\t\t/omit-if-no-ref/ uart1_tx_remap2_pa0: uart1_tx_remap2_pa0 {",
            "\t\t\t/omit-if-no-ref/ uart1_tx_remap3_pa0: uart1_tx_remap3_pa0 {",
        ]
    );
    assert_eq!(f1.matches("slew-rate = \"max-speed-10mhz\";").count(), 4);

    let readme = fs::read_to_string(out.path().join("README.rst")).expect("read readme");
    assert!(readme.starts_with("STM32 Pin Control Files\n"));
    assert!(readme.contains("Generated from version "));
    Ok(())
}

#[test]
fn generation_is_deterministic_and_clears_stale_output() -> Result<()> {
    let config = PinctrlConfig::embedded()?;
    let first = TempDir::new().expect("tempdir");
    let second = TempDir::new().expect("tempdir");
    fs::write(second.path().join("stale.dtsi"), "old\n").expect("write stale file");

    pinctrl::generate(&database(), first.path(), &config)?;
    pinctrl::generate(&database(), second.path(), &config)?;

    assert!(!second.path().join("stale.dtsi").exists());
    assert_eq!(read_tree(first.path()), read_tree(second.path()));
    Ok(())
}

#[test]
fn custom_rules_replace_the_embedded_ones() -> Result<()> {
    let rules = TempDir::new().expect("tempdir");
    let standard = rules.path().join("pinctrl.yaml");
    let legacy = rules.path().join("pinctrl-f1.yaml");
    fs::write(&standard, "- name: UART_TX\n  match: \"^UART\\\\d+_TX$\"\n  variant: sleep\n")
        .expect("write standard rules");
    fs::write(&legacy, "- name: ADC_IN\n  match: \"^ADC\\\\d+_IN\\\\d+$\"\n  mode: analog\n")
        .expect("write legacy rules");

    let config = PinctrlConfig::from_files(&standard, &legacy)?;
    let out = TempDir::new().expect("tempdir");
    pinctrl::generate(&database(), out.path(), &config)?;

    let f0 = fs::read_to_string(out.path().join("st/f0/stm32f0testdie-pinctrl.dtsi"))
        .expect("read f0 output");
    assert!(f0.contains("\t\t\t/* UART_TX */\n"));
    assert!(f0.contains("/omit-if-no-ref/ uart1_tx_pa0_sleep: uart1_tx_pa0_sleep {\n"));
    assert!(!f0.contains("uart1_rx"));
    assert!(!f0.contains("adc1_in0"));

    let f1 = fs::read_to_string(out.path().join("st/f1/stm32f1testdie-pinctrl.dtsi"))
        .expect("read f1 output");
    assert_eq!(f1.matches("/omit-if-no-ref/").count(), 1);
    Ok(())
}

fn read_tree(root: &Path) -> BTreeMap<String, String> {
    walkdir::WalkDir::new(root)
        .into_iter()
        .map(|entry| entry.expect("walk"))
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| {
            let relative = entry
                .path()
                .strip_prefix(root)
                .expect("relative")
                .to_string_lossy()
                .into_owned();
            (relative, fs::read_to_string(entry.path()).expect("read"))
        })
        .collect()
}
