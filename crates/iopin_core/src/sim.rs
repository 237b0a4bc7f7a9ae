//!In-memory hardware. Every write lands in a journal that can be inspected, and failures can be
//!injected per pin. Used by the tests and by the `Simulated` provider of the `iopin` binary.

use std::{
    collections::HashMap,
    io,
    sync::{Arc, Mutex},
};

use tracing::trace;

use crate::{
    backend::{DeviceProvider, DigitalBackend, PwmBackend},
    device::lock,
};

#[derive(Debug, Default)]
struct SimPinState {
    value: f64,
    writes: Vec<f64>,
    closes: usize,
    closed: bool,
    write_budget: Option<usize>,
    fail_reads: bool,
}

///One simulated pin. Clones share state, so a test can keep a clone to watch the backend it hands
///to a device.
#[derive(Debug, Clone, Default)]
pub struct SimulatedPin {
    state: Arc<Mutex<SimPinState>>,
}

impl SimulatedPin {
    pub fn new(initial_value: f64) -> Self {
        let pin = Self::default();
        lock(&pin.state).value = initial_value;
        pin
    }

    ///Current level as the hardware would report it.
    pub fn value(&self) -> f64 {
        lock(&self.state).value
    }

    ///Every value written since provisioning, in order.
    pub fn writes(&self) -> Vec<f64> {
        lock(&self.state).writes.clone()
    }

    pub fn close_count(&self) -> usize {
        lock(&self.state).closes
    }

    pub fn is_closed(&self) -> bool {
        lock(&self.state).closed
    }

    ///Allow `n` more successful writes, then fail every write after that.
    pub fn fail_writes_after(&self, n: usize) {
        lock(&self.state).write_budget = Some(n);
    }

    pub fn fail_reads(&self, fail: bool) {
        lock(&self.state).fail_reads = fail;
    }

    ///Reopen a pin for a new backend, keeping the journal.
    fn reopen(&self, initial_value: f64) {
        let mut state = lock(&self.state);
        state.closed = false;
        state.value = initial_value;
    }

    fn write(&self, value: f64) -> io::Result<()> {
        let mut state = lock(&self.state);
        if state.closed {
            return Err(io::Error::other("simulated pin is closed"));
        }
        if let Some(remaining) = state.write_budget.as_mut() {
            if *remaining == 0 {
                return Err(io::Error::other("simulated write failure"));
            }
            *remaining -= 1;
        }
        trace!("simulated write {}", value);
        state.value = value;
        state.writes.push(value);
        Ok(())
    }

    fn read(&self) -> io::Result<f64> {
        let state = lock(&self.state);
        if state.fail_reads {
            Err(io::Error::other("simulated read failure"))
        } else if state.closed {
            Err(io::Error::other("simulated pin is closed"))
        } else {
            Ok(state.value)
        }
    }

    fn close(&self) {
        let mut state = lock(&self.state);
        state.closes += 1;
        state.closed = true;
    }

    pub fn pwm_backend(&self) -> SimulatedPwm {
        SimulatedPwm { pin: self.clone() }
    }

    pub fn digital_backend(&self) -> SimulatedDigital {
        SimulatedDigital { pin: self.clone() }
    }
}

pub struct SimulatedPwm {
    pin: SimulatedPin,
}

impl PwmBackend for SimulatedPwm {
    fn write(&mut self, value: f64) -> io::Result<()> {
        self.pin.write(value)
    }

    fn read(&mut self) -> io::Result<f64> {
        self.pin.read()
    }

    fn close(&mut self) {
        self.pin.close()
    }
}

pub struct SimulatedDigital {
    pin: SimulatedPin,
}

impl DigitalBackend for SimulatedDigital {
    fn write(&mut self, high: bool) -> io::Result<()> {
        self.pin.write(if high { 1.0 } else { 0.0 })
    }

    fn read(&mut self) -> io::Result<bool> {
        self.pin.read().map(|value| value > 0.0)
    }

    fn close(&mut self) {
        self.pin.close()
    }
}

///Provider that hands out simulated pins, creating them on first use.
pub struct SimulatedProvider {
    prefix: String,
    pins: Mutex<HashMap<u8, SimulatedPin>>,
}

impl Default for SimulatedProvider {
    fn default() -> Self {
        Self::new("SIM")
    }
}

impl SimulatedProvider {
    pub fn new(prefix: &str) -> Self {
        Self {
            prefix: prefix.to_string(),
            pins: Mutex::new(HashMap::new()),
        }
    }

    pub fn pin(&self, pin: u8) -> SimulatedPin {
        lock(&self.pins).entry(pin).or_default().clone()
    }
}

impl DeviceProvider for SimulatedProvider {
    fn name(&self) -> &str {
        "simulated"
    }

    fn key_prefix(&self) -> &str {
        &self.prefix
    }

    fn provision_pwm_output(&self, pin: u8, initial_value: f64) -> io::Result<Box<dyn PwmBackend>> {
        let sim_pin = self.pin(pin);
        sim_pin.reopen(initial_value);
        Ok(Box::new(sim_pin.pwm_backend()))
    }

    fn provision_digital_output(
        &self,
        pin: u8,
        initial_value: bool,
    ) -> io::Result<Box<dyn DigitalBackend>> {
        let sim_pin = self.pin(pin);
        sim_pin.reopen(if initial_value { 1.0 } else { 0.0 });
        Ok(Box::new(sim_pin.digital_backend()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn journal_and_failure_injection() {
        let pin = SimulatedPin::new(0.25);
        let mut backend = pin.pwm_backend();
        assert_eq!(backend.read().unwrap(), 0.25);

        pin.fail_writes_after(2);
        backend.write(0.5).unwrap();
        backend.write(0.75).unwrap();
        assert!(backend.write(1.0).is_err());
        assert_eq!(pin.writes(), vec![0.5, 0.75]);
        assert_eq!(pin.value(), 0.75);

        pin.fail_reads(true);
        assert!(backend.read().is_err());

        backend.close();
        assert!(pin.is_closed());
        assert_eq!(pin.close_count(), 1);
    }

    #[test]
    fn provider_reuses_pins() {
        let provider = SimulatedProvider::default();
        let mut first = provider.provision_pwm_output(3, 0.0).unwrap();
        first.write(0.5).unwrap();
        first.close();

        let mut second = provider.provision_pwm_output(3, 0.0).unwrap();
        second.write(1.0).unwrap();
        assert_eq!(provider.pin(3).writes(), vec![0.5, 1.0]);
        assert_eq!(provider.key_prefix(), "SIM");
    }
}
