//!This library provides iopin devices on the Raspberry Pi GPIO pins. It is a wrapper around the rppal library.
//!
//! The `i2c_bus` function gets an I2C bus instance that can be used to construct devices in `iopin_devices`.

//internal error helpers for rpi gpio
mod error;

//provider for bare gpio pins as pwm and digital outputs
pub mod gpio;

pub use gpio::{pwm_kind, PwmKind, RpiGpio, RpiGpioConfig};
pub use rppal;
use rppal::i2c::I2c;

use iopin_core::DeviceError;

//get i2c bus by id
pub fn i2c_bus(bus: u8) -> Result<I2c, DeviceError> {
    I2c::with_bus(bus).map_err(|err| error::build_error(&format!("error opening i2c bus {}", bus), err))
}
