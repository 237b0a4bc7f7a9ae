//!Plain on/off outputs.

use std::{
    any::Any,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex,
    },
};

use tracing::debug;

use crate::{
    backend::DigitalBackend,
    device::{lock, Device},
    error::DeviceError,
    registry::{DeviceRegistry, Registration},
};

struct Line {
    backend: Box<dyn DigitalBackend>,
    released: bool,
}

pub struct DigitalOutputDevice {
    pin: u8,
    line: Mutex<Line>,
    registration: Registration,
    closed: AtomicBool,
}

impl DigitalOutputDevice {
    pub fn open(
        key: String,
        pin: u8,
        backend: Box<dyn DigitalBackend>,
        registry: Arc<DeviceRegistry>,
    ) -> Result<Arc<Self>, DeviceError> {
        let device = Arc::new(Self {
            pin,
            line: Mutex::new(Line {
                backend,
                released: false,
            }),
            registration: Registration::new(registry, key),
            closed: AtomicBool::new(false),
        });
        if let Err(err) = device.registration.register(&device) {
            device.closed.store(true, Ordering::SeqCst);
            let mut line = lock(&device.line);
            line.backend.close();
            line.released = true;
            return Err(err);
        }
        debug!("opened digital output {}", device.key());
        Ok(device)
    }

    pub fn pin(&self) -> u8 {
        self.pin
    }

    fn with_line<T>(
        &self,
        f: impl FnOnce(&mut dyn DigitalBackend) -> std::io::Result<T>,
    ) -> Result<T, DeviceError> {
        let mut line = lock(&self.line);
        if line.released {
            return Err(DeviceError::Closed(self.key().to_string()));
        }
        Ok(f(line.backend.as_mut())?)
    }

    pub fn set(&self, high: bool) -> Result<(), DeviceError> {
        self.with_line(|backend| backend.write(high))
    }

    pub fn on(&self) -> Result<(), DeviceError> {
        self.set(true)
    }

    pub fn off(&self) -> Result<(), DeviceError> {
        self.set(false)
    }

    pub fn toggle(&self) -> Result<(), DeviceError> {
        self.with_line(|backend| {
            let high = backend.read()?;
            backend.write(!high)
        })
    }

    pub fn is_on(&self) -> Result<bool, DeviceError> {
        self.with_line(|backend| backend.read())
    }
}

impl Device for DigitalOutputDevice {
    fn key(&self) -> &str {
        self.registration.key()
    }

    ///Drive the line low, then release it. A failing write is ignored.
    fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        {
            let mut line = lock(&self.line);
            if !line.released {
                if let Err(err) = line.backend.write(false) {
                    debug!("{}: ignoring error driving output low on close: {}", self.key(), err);
                }
                line.backend.close();
                line.released = true;
            }
        }
        self.registration.release();
        debug!("digital output {} closed", self.key());
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}

impl Drop for DigitalOutputDevice {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::SimulatedPin;

    fn open(registry: &Arc<DeviceRegistry>, pin: &SimulatedPin) -> Result<Arc<DigitalOutputDevice>, DeviceError> {
        DigitalOutputDevice::open(
            "GPIO17".to_string(),
            17,
            Box::new(pin.digital_backend()),
            registry.clone(),
        )
    }

    #[test]
    fn on_off_toggle() {
        let registry = Arc::new(DeviceRegistry::new());
        let pin = SimulatedPin::new(0.0);
        let led = open(&registry, &pin).unwrap();

        led.on().unwrap();
        assert!(led.is_on().unwrap());
        led.toggle().unwrap();
        assert!(!led.is_on().unwrap());
        led.toggle().unwrap();
        assert_eq!(pin.writes(), vec![1.0, 0.0, 1.0]);
    }

    #[test]
    fn close_drives_low_once_and_frees_the_key() {
        let registry = Arc::new(DeviceRegistry::new());
        let pin = SimulatedPin::new(0.0);
        let led = open(&registry, &pin).unwrap();
        led.on().unwrap();

        assert!(matches!(open(&registry, &SimulatedPin::new(0.0)), Err(DeviceError::AlreadyOpen(_))));

        led.close();
        led.close();
        assert_eq!(pin.writes(), vec![1.0, 0.0]);
        assert_eq!(pin.close_count(), 1);
        assert!(matches!(led.on(), Err(DeviceError::Closed(_))));
        assert!(open(&registry, &SimulatedPin::new(0.0)).is_ok());
    }
}
