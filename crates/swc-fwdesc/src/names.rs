//! Conversions between firmware property names and published attribute names.
//!
//! Firmware properties are dash separated (`diag-green`); published attribute
//! and link names use underscores (`diag_green`).

/// `diag-green` -> `diag_green`.
pub fn property_to_sysfs(property: &str) -> String {
    property.replace('-', "_")
}

/// `diag_green` -> `diag-green`.
pub fn sysfs_to_property(attribute: &str) -> String {
    attribute.replace('_', "-")
}
