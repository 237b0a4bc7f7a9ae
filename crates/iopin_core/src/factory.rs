//!Front-end that provisions devices from a provider and tracks them in a registry.

use std::sync::Arc;

use tracing::{debug, info};

use crate::{
    backend::DeviceProvider,
    digital::DigitalOutputDevice,
    error::{check_unit_interval, DeviceError},
    pwm::PwmOutputDevice,
    registry::DeviceRegistry,
    scheduler::Scheduler,
};

///Builds devices on one provider's pins.
///
///Several factories may share one registry; their key prefixes keep their pins apart.
pub struct DeviceFactory {
    provider: Arc<dyn DeviceProvider>,
    registry: Arc<DeviceRegistry>,
    scheduler: Scheduler,
}

impl DeviceFactory {
    ///Uses the tokio runtime the caller is running on for background waveforms.
    pub fn new(
        provider: Arc<dyn DeviceProvider>,
        registry: Arc<DeviceRegistry>,
    ) -> Result<Self, DeviceError> {
        Ok(Self::with_scheduler(provider, registry, Scheduler::current()?))
    }

    pub fn with_scheduler(
        provider: Arc<dyn DeviceProvider>,
        registry: Arc<DeviceRegistry>,
        scheduler: Scheduler,
    ) -> Self {
        info!("using device provider {}", provider.name());
        Self {
            provider,
            registry,
            scheduler,
        }
    }

    pub fn registry(&self) -> &Arc<DeviceRegistry> {
        &self.registry
    }

    pub fn pin_key(&self, pin: u8) -> String {
        format!("{}{}", self.provider.key_prefix(), pin)
    }

    //fail before provisioning so an open pin is never reconfigured underneath its owner
    fn check_available(&self, key: &str) -> Result<(), DeviceError> {
        if self.registry.is_shutdown() {
            Err(DeviceError::RegistryShutdown)
        } else if self.registry.is_open(key) {
            Err(DeviceError::AlreadyOpen(key.to_string()))
        } else {
            Ok(())
        }
    }

    pub fn pwm_output(
        &self,
        pin: u8,
        initial_value: f64,
    ) -> Result<Arc<PwmOutputDevice>, DeviceError> {
        let initial_value = check_unit_interval(initial_value)?;
        let key = self.pin_key(pin);
        self.check_available(&key)?;
        debug!("provisioning pwm output {} (initial {})", key, initial_value);
        let backend = self.provider.provision_pwm_output(pin, initial_value)?;
        PwmOutputDevice::open(
            key,
            pin,
            backend,
            self.scheduler.clone(),
            self.registry.clone(),
        )
    }

    ///The PWM output already open on `pin`, if there is one.
    pub fn shared_pwm_output(&self, pin: u8) -> Option<Arc<PwmOutputDevice>> {
        self.registry.lookup_as(&self.pin_key(pin))
    }

    pub fn digital_output(
        &self,
        pin: u8,
        initial_value: bool,
    ) -> Result<Arc<DigitalOutputDevice>, DeviceError> {
        let key = self.pin_key(pin);
        self.check_available(&key)?;
        debug!("provisioning digital output {} (initial {})", key, initial_value);
        let backend = self.provider.provision_digital_output(pin, initial_value)?;
        DigitalOutputDevice::open(key, pin, backend, self.registry.clone())
    }

    ///Close every device in the registry, then let the provider tear down.
    pub fn shutdown(&self) {
        self.registry.shutdown();
        self.provider.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{device::Device, sim::SimulatedProvider};
    use std::time::Duration;

    fn factory() -> (DeviceFactory, Arc<SimulatedProvider>) {
        let provider = Arc::new(SimulatedProvider::new("GPIO"));
        let factory =
            DeviceFactory::new(provider.clone(), Arc::new(DeviceRegistry::new())).unwrap();
        (factory, provider)
    }

    #[tokio::test]
    async fn keys_combine_prefix_and_pin() {
        let (factory, _provider) = factory();
        assert_eq!(factory.pin_key(18), "GPIO18");
        let pwm = factory.pwm_output(18, 0.5).unwrap();
        assert_eq!(pwm.key(), "GPIO18");
        assert_eq!(pwm.value().unwrap(), 0.5);
    }

    #[tokio::test]
    async fn open_pins_are_not_reprovisioned() {
        let (factory, provider) = factory();
        let pwm = factory.pwm_output(12, 0.0).unwrap();
        pwm.set_value(0.4).unwrap();

        assert!(matches!(factory.pwm_output(12, 0.0), Err(DeviceError::AlreadyOpen(_))));
        assert!(matches!(factory.digital_output(12, false), Err(DeviceError::AlreadyOpen(_))));
        assert_eq!(provider.pin(12).value(), 0.4);

        let shared = factory.shared_pwm_output(12).unwrap();
        assert!(Arc::ptr_eq(&shared, &pwm));
        assert!(factory.shared_pwm_output(13).is_none());
    }

    #[tokio::test]
    async fn invalid_initial_value_is_rejected_before_provisioning() {
        let (factory, provider) = factory();
        assert!(matches!(factory.pwm_output(5, 1.5), Err(DeviceError::InvalidArgument(_))));
        assert!(!factory.registry().is_open("GPIO5"));
        assert_eq!(provider.pin(5).close_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_closes_every_kind_of_device() {
        let (factory, provider) = factory();
        let pwm = factory.pwm_output(18, 0.0).unwrap();
        let led = factory.digital_output(17, true).unwrap();
        pwm.fade_in_out(
            Duration::from_millis(100),
            10,
            crate::pwm::Iterations::Forever,
            crate::pwm::ExecutionMode::Background,
        )
        .await
        .unwrap();
        tokio::time::sleep(Duration::from_millis(25)).await;

        factory.shutdown();
        factory.shutdown();

        assert!(pwm.is_closed());
        assert!(led.is_closed());
        assert_eq!(provider.pin(18).close_count(), 1);
        assert_eq!(provider.pin(17).close_count(), 1);
        assert_eq!(provider.pin(18).value(), 0.0);
        assert_eq!(provider.pin(17).value(), 0.0);
        assert!(matches!(factory.pwm_output(19, 0.0), Err(DeviceError::RegistryShutdown)));
    }
}
