use std::fs;
use std::path::Path;

use cubesync_core::llheaders;
use cubesync_core::Result;
use tempfile::TempDir;

#[test]
fn common_headers_cover_every_series_providing_an_api() -> Result<()> {
    let hal = TempDir::new().expect("tempdir");
    write_file(hal.path(), "stm32f0xx/README", "Status:\n   version v1.11.3\n");
    write_file(hal.path(), "stm32f0xx/drivers/include/stm32f0xx_ll_gpio.h", "");
    write_file(hal.path(), "stm32f0xx/drivers/include/stm32f0xx_ll_usb.h", "");
    write_file(hal.path(), "stm32f0xx/drivers/include/stm32f0xx_hal_gpio.h", "");
    write_file(hal.path(), "stm32l4xx/README", "Status:\n   version 1.17.0\n");
    write_file(hal.path(), "stm32l4xx/drivers/include/stm32l4xx_ll_gpio.h", "");
    write_file(hal.path(), "stm32l4xx/drivers/include/stm32l4xx_ll_lpuart.h", "");
    write_file(hal.path(), "stm32h7xx/drivers/include/stm32h7xx_ll_gpio.h", "");
    write_file(hal.path(), "common_ll/include/stale.h", "");

    let output = hal.path().join("common_ll");
    let found = llheaders::generate(hal.path(), &output)?;

    assert_eq!(
        found.versions.keys().collect::<Vec<_>>(),
        vec!["stm32f0xx", "stm32l4xx"]
    );
    assert_eq!(found.versions["stm32f0xx"], "1.11.3");
    assert_eq!(found.apis.keys().collect::<Vec<_>>(), vec!["gpio", "lpuart"]);
    assert_eq!(found.apis["gpio"], vec!["stm32f0xx", "stm32l4xx"]);

    assert!(!output.join("include/stale.h").exists());
    assert!(!output.join("include/stm32_ll_usb.h").exists());

    let gpio = fs::read_to_string(output.join("include/stm32_ll_gpio.h")).expect("read header");
    assert!(gpio.contains(concat!(
        "#if defined(CONFIG_SOC_SERIES_STM32F0X)\n",
        "#include <stm32f0xx_ll_gpio.h>\n",
        "#elif defined(CONFIG_SOC_SERIES_STM32L4X)\n",
        "#include <stm32l4xx_ll_gpio.h>\n",
        "#endif\n",
    )));
    assert!(!gpio.contains("stm32h7xx"));

    let lpuart = fs::read_to_string(output.join("include/stm32_ll_lpuart.h")).expect("read header");
    assert!(lpuart.contains("#if defined(CONFIG_SOC_SERIES_STM32L4X)\n#include <stm32l4xx_ll_lpuart.h>\n#endif\n"));

    let readme = fs::read_to_string(output.join("README.rst")).expect("read readme");
    assert!(readme.contains("   stm32f0xx: version 1.11.3\n   stm32l4xx: version 1.17.0\n"));
    Ok(())
}

fn write_file(root: &Path, relative: &str, contents: &str) {
    let path = root.join(relative);
    fs::create_dir_all(path.parent().expect("parent")).expect("create dirs");
    fs::write(path, contents).expect("write file");
}
