use std::{
    any::Any,
    fmt::Debug,
    io,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex, MutexGuard,
    },
};

use embedded_hal_0::blocking::i2c;
use iopin_core::{Device, DeviceError, DeviceProvider, DeviceRegistry, PwmBackend, Registration};
use pwm_pca9685::{Address, Channel, Pca9685};
use serde::Deserialize;
use tracing::{debug, info};

use crate::error::bus_error;

pub const CHANNEL_COUNT: u8 = 16;

//12 bit counter
const FULL_SCALE: f64 = 4095.0;

fn default_bus() -> u8 {
    1
}

fn default_prescale() -> u8 {
    100
}

//one pwm chip instance
#[derive(Debug, Clone, Deserialize)]
pub struct Pca9685Config {
    #[serde(default = "default_bus")]
    pub bus: u8,
    pub address: u8,
    //sets the output frequency: 25MHz / (4096 * (prescale + 1))
    #[serde(default = "default_prescale")]
    pub prescale: u8,
}

pub fn board_key(bus: u8, address: u8) -> String {
    format!("PCA9685-{}-0x{:02x}", bus, address)
}

///The off count for a duty cycle. The on count is always 0.
pub fn off_count(value: f64) -> u16 {
    (value.clamp(0.0, 1.0) * FULL_SCALE).round() as u16
}

fn pca_error<E: Debug>(context: &str, err: pwm_pca9685::Error<E>) -> io::Error {
    match err {
        pwm_pca9685::Error::I2C(err) => bus_error(context, err),
        pwm_pca9685::Error::InvalidInputData => io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("{}: PCA9685 invalid input data", context),
        ),
    }
}

fn channel(index: u8) -> io::Result<Channel> {
    Channel::try_from(index).map_err(|_| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("PCA9685 has no channel {}", index),
        )
    })
}

//erases the bus type so the board itself is not generic
trait ChipDriver: Send {
    fn write_channel(&mut self, channel: Channel, off: u16) -> io::Result<()>;

    fn sleep(&mut self) -> io::Result<()>;
}

impl<I2C, E> ChipDriver for Pca9685<I2C>
where
    E: Debug,
    I2C: i2c::Write<Error = E> + i2c::WriteRead<Error = E> + Send,
{
    fn write_channel(&mut self, channel: Channel, off: u16) -> io::Result<()> {
        let result = if off == 0 {
            self.set_channel_full_off(channel)
        } else {
            self.set_channel_on_off(channel, 0, off)
        };
        result.map_err(|err| pca_error("error setting PCA9685 channel", err))
    }

    fn sleep(&mut self) -> io::Result<()> {
        Pca9685::disable(self).map_err(|err| pca_error("error disabling PCA9685", err))
    }
}

struct Chip {
    driver: Box<dyn ChipDriver>,
    released: bool,
}

impl Chip {
    fn write(&mut self, index: u8, value: f64) -> io::Result<()> {
        if self.released {
            return Err(io::Error::new(
                io::ErrorKind::NotConnected,
                "PCA9685 board is closed",
            ));
        }
        self.driver.write_channel(channel(index)?, off_count(value))
    }
}

fn lock(chip: &Mutex<Chip>) -> MutexGuard<'_, Chip> {
    match chip.lock() {
        Ok(chip) => chip,
        Err(poisoned) => poisoned.into_inner(),
    }
}

///A connected PCA9685. The board owns its bus address in the registry, and each channel opened
///through it is registered separately under `<board key>-<channel>`.
///
///Use the board as the provider of a `DeviceFactory` to open pwm outputs on its channels.
pub struct Pca9685Board {
    bus: u8,
    address: u8,
    channel_prefix: String,
    chip: Arc<Mutex<Chip>>,
    registry: Arc<DeviceRegistry>,
    registration: Registration,
    closed: AtomicBool,
}

impl Pca9685Board {
    pub fn open<I2C, E>(
        config: &Pca9685Config,
        i2c: I2C,
        registry: Arc<DeviceRegistry>,
    ) -> Result<Arc<Pca9685Board>, DeviceError>
    where
        E: Debug,
        I2C: i2c::Write<Error = E> + i2c::WriteRead<Error = E> + Send + 'static,
    {
        let key = board_key(config.bus, config.address);
        //never reconfigure a chip that another board object is driving
        if registry.is_shutdown() {
            return Err(DeviceError::RegistryShutdown);
        }
        if registry.is_open(&key) {
            return Err(DeviceError::AlreadyOpen(key));
        }

        let mut device = Pca9685::new(i2c, Address::from(config.address))
            .map_err(|err| pca_error("Could not configure PCA9685 Device", err))?;
        device
            .set_prescale(config.prescale)
            .map_err(|err| pca_error("Could not set PCA9685 prescale", err))?;
        device
            .enable()
            .map_err(|err| pca_error("Could not enable PCA9685", err))?;

        let board = Arc::new(Pca9685Board {
            bus: config.bus,
            address: config.address,
            channel_prefix: format!("{}-", key),
            chip: Arc::new(Mutex::new(Chip {
                driver: Box::new(device),
                released: false,
            })),
            registry: registry.clone(),
            registration: Registration::new(registry, key),
            closed: AtomicBool::new(false),
        });
        if let Err(err) = board.registration.register(&board) {
            //lost a race for the key; leave the hardware to its owner
            board.closed.store(true, Ordering::SeqCst);
            lock(&board.chip).released = true;
            return Err(err);
        }
        info!("opened PCA9685 {} on i2c bus {}", board.key(), config.bus);
        Ok(board)
    }

    pub fn bus(&self) -> u8 {
        self.bus
    }

    pub fn address(&self) -> u8 {
        self.address
    }

    pub fn channel_key(&self, index: u8) -> String {
        format!("{}{}", self.channel_prefix, index)
    }
}

impl Device for Pca9685Board {
    fn key(&self) -> &str {
        self.registration.key()
    }

    ///Closes every channel device still open, then switches all outputs off and puts the chip to sleep.
    fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        for index in 0..CHANNEL_COUNT {
            if let Some(device) = self.registry.lookup(&self.channel_key(index)) {
                device.close();
            }
        }
        {
            let mut chip = lock(&self.chip);
            if !chip.released {
                for index in 0..CHANNEL_COUNT {
                    if let Err(err) = chip.write(index, 0.0) {
                        debug!("{}: ignoring error switching channel {} off: {}", self.key(), index, err);
                    }
                }
                if let Err(err) = chip.driver.sleep() {
                    debug!("{}: ignoring error on sleep: {}", self.key(), err);
                }
                chip.released = true;
            }
        }
        self.registration.release();
        info!("PCA9685 {} closed", self.key());
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}

impl Drop for Pca9685Board {
    fn drop(&mut self) {
        self.close();
    }
}

impl DeviceProvider for Pca9685Board {
    fn name(&self) -> &str {
        "pca9685"
    }

    fn key_prefix(&self) -> &str {
        &self.channel_prefix
    }

    fn provision_pwm_output(&self, pin: u8, initial_value: f64) -> io::Result<Box<dyn PwmBackend>> {
        lock(&self.chip).write(pin, initial_value)?;
        debug!("{}: provisioned channel {}", self.key(), pin);
        Ok(Box::new(ChannelOutput {
            chip: self.chip.clone(),
            index: pin,
            value: initial_value,
        }))
    }

    fn shutdown(&self) {
        self.close();
    }
}

struct ChannelOutput {
    chip: Arc<Mutex<Chip>>,
    index: u8,
    //the chip's registers are write-only through this driver
    value: f64,
}

impl PwmBackend for ChannelOutput {
    fn write(&mut self, value: f64) -> io::Result<()> {
        lock(&self.chip).write(self.index, value)?;
        self.value = value;
        Ok(())
    }

    fn read(&mut self) -> io::Result<f64> {
        if lock(&self.chip).released {
            return Err(io::Error::new(
                io::ErrorKind::NotConnected,
                "PCA9685 board is closed",
            ));
        }
        Ok(self.value)
    }

    fn close(&mut self) {
        debug!("PCA9685 channel {} released", self.index);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use iopin_core::DeviceFactory;

    use std::convert::Infallible;

    #[derive(Clone, Default)]
    struct FakeBus {
        writes: Arc<Mutex<Vec<(u8, Vec<u8>)>>>,
    }

    impl FakeBus {
        fn writes(&self) -> Vec<(u8, Vec<u8>)> {
            self.writes.lock().unwrap().clone()
        }
    }

    impl i2c::Write for FakeBus {
        type Error = Infallible;

        fn write(&mut self, address: u8, bytes: &[u8]) -> Result<(), Infallible> {
            self.writes.lock().unwrap().push((address, bytes.to_vec()));
            Ok(())
        }
    }

    impl i2c::WriteRead for FakeBus {
        type Error = Infallible;

        fn write_read(&mut self, address: u8, bytes: &[u8], buffer: &mut [u8]) -> Result<(), Infallible> {
            self.writes.lock().unwrap().push((address, bytes.to_vec()));
            buffer.fill(0);
            Ok(())
        }
    }

    fn config() -> Pca9685Config {
        Pca9685Config {
            bus: 1,
            address: 0x40,
            prescale: 100,
        }
    }

    #[test]
    fn duty_maps_to_twelve_bit_off_count() {
        assert_eq!(off_count(0.0), 0);
        assert_eq!(off_count(0.25), 1024);
        assert_eq!(off_count(0.5), 2048);
        assert_eq!(off_count(1.0), 4095);
        assert_eq!(off_count(1.5), 4095);
    }

    #[test]
    fn board_is_keyed_by_bus_and_address() {
        let registry = Arc::new(DeviceRegistry::new());
        let bus = FakeBus::default();
        let board = Pca9685Board::open(&config(), bus.clone(), registry.clone()).unwrap();
        assert_eq!(board.key(), "PCA9685-1-0x40");
        assert_eq!(board.channel_key(3), "PCA9685-1-0x40-3");
        assert!(registry.is_open("PCA9685-1-0x40"));
        assert!(bus.writes().iter().all(|(address, _)| *address == 0x40));

        let second = FakeBus::default();
        assert!(matches!(
            Pca9685Board::open(&config(), second.clone(), registry.clone()),
            Err(DeviceError::AlreadyOpen(_))
        ));
        assert!(second.writes().is_empty());

        board.close();
        assert!(!registry.is_open("PCA9685-1-0x40"));
        assert!(Pca9685Board::open(&config(), second, registry).is_ok());
    }

    #[tokio::test]
    async fn channels_open_through_a_factory() {
        let registry = Arc::new(DeviceRegistry::new());
        let bus = FakeBus::default();
        let board = Pca9685Board::open(&config(), bus.clone(), registry.clone()).unwrap();
        let factory = DeviceFactory::new(board.clone(), registry.clone()).unwrap();

        let led = factory.pwm_output(3, 0.0).unwrap();
        assert_eq!(led.key(), "PCA9685-1-0x40-3");
        led.set_value(0.5).unwrap();
        assert_eq!(led.value().unwrap(), 0.5);
        //LED3_ON_L
        assert!(bus.writes().iter().any(|(_, bytes)| bytes.first() == Some(&0x12)));

        assert!(matches!(factory.pwm_output(3, 0.0), Err(DeviceError::AlreadyOpen(_))));
        assert!(matches!(factory.pwm_output(16, 0.0), Err(DeviceError::Io(_))));
    }

    #[tokio::test]
    async fn closing_the_board_closes_its_channels() {
        let registry = Arc::new(DeviceRegistry::new());
        let board = Pca9685Board::open(&config(), FakeBus::default(), registry.clone()).unwrap();
        let factory = DeviceFactory::new(board.clone(), registry.clone()).unwrap();
        let first = factory.pwm_output(0, 1.0).unwrap();
        let second = factory.pwm_output(15, 0.3).unwrap();

        board.close();

        assert!(first.is_closed());
        assert!(second.is_closed());
        assert!(registry.keys().is_empty());
        assert!(matches!(first.set_value(0.2), Err(DeviceError::Closed(_))));
        assert!(factory.pwm_output(1, 0.0).is_err());
    }

    #[tokio::test]
    async fn factory_shutdown_closes_board_and_channels() {
        let registry = Arc::new(DeviceRegistry::new());
        let board = Pca9685Board::open(&config(), FakeBus::default(), registry.clone()).unwrap();
        let factory = DeviceFactory::new(board.clone(), registry.clone()).unwrap();
        let led = factory.pwm_output(7, 0.8).unwrap();

        factory.shutdown();

        assert!(board.is_closed());
        assert!(led.is_closed());
        assert!(registry.is_shutdown());
    }
}
