//!Devices that sit on a bus rather than directly on a pin. Each one is enabled with a cargo feature.
//!
//! A bus device is registered in the `DeviceRegistry` under its bus and address, and hands out
//! backends for its channels through `DeviceProvider`, so a `DeviceFactory` can open outputs on it
//! the same way it opens them on bare gpio pins.

pub mod devices;

//internal error helpers
#[cfg(feature = "pca9685")]
mod error;
