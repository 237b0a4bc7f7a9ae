use std::sync::Arc;

use iopin_core::{sim::SimulatedProvider, DeviceError, DeviceProvider, DeviceRegistry};
use serde::Deserialize;

//rpi gpio header
#[cfg(feature = "rpi")]
use iopin_rpi_gpio::{RpiGpio, RpiGpioConfig};

//i2c boards
#[cfg(feature = "devices")]
use iopin_devices::devices::pca9685::{Pca9685Board, Pca9685Config};

///The hardware that the configured outputs' pins belong to.
#[derive(Deserialize, Debug)]
pub enum ProviderConfig {
    //core
    Simulated,

    //iopin_rpi_gpio
    #[cfg(feature = "rpi")]
    Rpi(RpiGpioConfig),

    //iopin_devices
    #[cfg(feature = "devices")]
    Pca9685(Pca9685Config),
}

impl ProviderConfig {
    //boards register themselves, so they need the registry the factory will use
    #[cfg_attr(not(feature = "devices"), allow(unused_variables))]
    pub fn build(&self, registry: &Arc<DeviceRegistry>) -> Result<Arc<dyn DeviceProvider>, DeviceError> {
        match self {
            //core
            Self::Simulated => Ok(Arc::new(SimulatedProvider::default())),

            //rpi
            #[cfg(feature = "rpi")]
            Self::Rpi(rpi_config) => Ok(Arc::new(RpiGpio::try_build(rpi_config)?)),

            //devices
            #[cfg(feature = "devices")]
            Self::Pca9685(pca_config) => {
                let i2c = iopin_rpi_gpio::i2c_bus(pca_config.bus)?;
                let board: Arc<dyn DeviceProvider> =
                    Pca9685Board::open(pca_config, i2c, registry.clone())?;
                Ok(board)
            }
        }
    }
}
