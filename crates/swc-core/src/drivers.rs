//! Peripheral drivers of the switch complex.
//!
//! Every signal attribute is active low: a cleared CPLD bit reads as `1`.

use crate::peripheral::{AttributeSpec, DependencySpec, PeripheralTemplate};

/// Compatible string of CPLD register-bank nodes.
pub const CPLD_COMPATIBLE: &str = "swc-cpld";
/// Compatible string of SFF serial interface (TWI) nodes.
pub const TWI_COMPATIBLE: &str = "sff-twi";

/// Link from a transceiver cage to its serial interface.
pub const SERIAL_INTERFACE: &str = "serial-interface";

/// SFP+/QSFP+ transceiver cage.
pub const SFF: PeripheralTemplate = PeripheralTemplate {
    driver: "sff-fw",
    compatible: &["sff-sfpp-fw", "sff-qsfpp-fw"],
    class: None,
    dependencies: &[
        DependencySpec::required(SERIAL_INTERFACE).link(SERIAL_INTERFACE),
        DependencySpec::optional("present").attribute(AttributeSpec::status()),
        DependencySpec::optional("tx-fault").attribute(AttributeSpec::status()),
        DependencySpec::optional("tx-enable").attribute(AttributeSpec::control()),
        DependencySpec::optional("rx-los").attribute(AttributeSpec::status()),
        DependencySpec::optional("low-power").attribute(AttributeSpec::control()),
        DependencySpec::optional("reset").attribute(AttributeSpec::control()),
        DependencySpec::optional("module-select").attribute(AttributeSpec::control()),
    ],
};

/// System status LED cluster.
pub const LED: PeripheralTemplate = PeripheralTemplate {
    driver: "swc-led",
    compatible: &["swc-led"],
    class: None,
    dependencies: &[
        DependencySpec::required("leds").link("system-led"),
        DependencySpec::required("diag-green").attribute(AttributeSpec::control()),
        DependencySpec::required("diag-amber").attribute(AttributeSpec::control()),
        DependencySpec::required("loc-blue").attribute(AttributeSpec::control()),
    ],
};

/// Power supply slot.
pub const PSU: PeripheralTemplate = PeripheralTemplate {
    driver: "swc-psu",
    compatible: &["swc-psu"],
    class: Some("psu"),
    dependencies: &[
        DependencySpec::optional("pmbus").link("pmbus"),
        DependencySpec::optional("eeprom").link("psu_eeprom"),
        DependencySpec::required("psu-present").attribute(AttributeSpec::status().named("present")),
        DependencySpec::required("psu-power-good")
            .attribute(AttributeSpec::status().named("power_good")),
        DependencySpec::required("psu-ac-alert")
            .attribute(AttributeSpec::status().named("ac_alert")),
    ],
};

/// All drivers in matching order.
pub const DRIVERS: &[PeripheralTemplate] = &[SFF, LED, PSU];

/// Driver bound to nodes declaring `compatible`.
pub fn template_for(compatible: &str) -> Option<&'static PeripheralTemplate> {
    DRIVERS.iter().find(|template| template.matches(compatible))
}
