pub mod config;
pub mod constants;
pub mod error;
pub mod primitives;
pub mod status;

/// Name of a device as known to the device graph (e.g. `sda`, `vg0-data`).
pub type DeviceName = String;

/// Returns true if the given value is equal to its default value.
/// Useful for #[serde(skip_serializing_if = "is_default")]
pub fn is_default<T: Default + PartialEq>(t: &T) -> bool {
    *t == Default::default()
}
