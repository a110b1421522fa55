//! Built-in signal table profiles.
//!
//! The engine is driven by data; profiles bundle the per-bus tables for one
//! vehicle. One worked-out profile ships with the crate, further profiles
//! register here.

pub mod opel_astra_h;

use crate::signal::SignalTable;

/// One signal table bound to the CAN device it rides on.
pub struct DeviceTable {
    pub device: &'static str,
    pub table: SignalTable,
}

/// A named vehicle profile: one decoding table per bus.
pub struct Profile {
    pub name: &'static str,
    pub buses: Vec<DeviceTable>,
}

/// All profiles shipped with the crate.
pub fn builtin() -> Vec<Profile> {
    vec![opel_astra_h::profile()]
}

/// Look a profile up by name.
pub fn find(name: &str) -> Option<Profile> {
    builtin().into_iter().find(|profile| profile.name == name)
}
