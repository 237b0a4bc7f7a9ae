//!The seam between devices and whatever actually drives the hardware.
//!
//! Backends are provisioned by a `DeviceProvider` and owned exclusively by one device.

use std::io;

///A duty-cycle channel. Values are normalised to [0, 1].
pub trait PwmBackend: Send {
    fn write(&mut self, value: f64) -> io::Result<()>;

    ///The value the hardware currently reports, not a cached copy.
    fn read(&mut self) -> io::Result<f64>;

    ///Release the channel. Best-effort, never fails.
    fn close(&mut self);
}

///A single digital output line.
pub trait DigitalBackend: Send {
    fn write(&mut self, high: bool) -> io::Result<()>;

    fn read(&mut self) -> io::Result<bool>;

    fn close(&mut self);
}

///Provisions backends for pins on one kind of hardware.
pub trait DeviceProvider: Send + Sync {
    fn name(&self) -> &str;

    ///Prepended to a pin number to form the registry key, e.g. `GPIO` + `18`.
    fn key_prefix(&self) -> &str;

    fn provision_pwm_output(&self, pin: u8, initial_value: f64) -> io::Result<Box<dyn PwmBackend>>;

    fn provision_digital_output(
        &self,
        pin: u8,
        _initial_value: bool,
    ) -> io::Result<Box<dyn DigitalBackend>> {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            format!("{} does not provide digital output on pin {}", self.name(), pin),
        ))
    }

    ///Called once after the registry has closed every device.
    fn shutdown(&self) {}
}
