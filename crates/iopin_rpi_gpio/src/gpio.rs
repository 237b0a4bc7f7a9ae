use std::io;

use iopin_core::{DeviceError, DeviceProvider, DigitalBackend, PwmBackend};
use rppal::{
    gpio::OutputPin,
    pwm::{Channel, Polarity, Pwm},
};
use serde::Deserialize;
use tracing::{debug, info};

use crate::error::{build_error, io_error};

fn default_frequency() -> f64 {
    100.0
}

fn default_hardware_pwm() -> bool {
    true
}

//Configuration for the Raspberry Pi provider.
#[derive(Debug, Clone, Deserialize)]
pub struct RpiGpioConfig {
    //PWM frequency used for every pwm output, hardware or software.
    #[serde(default = "default_frequency")]
    pub pwm_frequency_hertz: f64,
    //When false every pwm output uses software PWM, even on pins with a hardware channel.
    #[serde(default = "default_hardware_pwm")]
    pub hardware_pwm: bool,
}

impl Default for RpiGpioConfig {
    fn default() -> Self {
        Self {
            pwm_frequency_hertz: default_frequency(),
            hardware_pwm: default_hardware_pwm(),
        }
    }
}

///How a pwm output is generated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PwmKind {
    Hardware(Channel),
    Software,
}

///BCM 12 and 18 are wired to PWM0, 13 and 19 to PWM1. Every other pin needs software PWM.
pub fn pwm_kind(pin: u8) -> PwmKind {
    match pin {
        12 | 18 => PwmKind::Hardware(Channel::Pwm0),
        13 | 19 => PwmKind::Hardware(Channel::Pwm1),
        _ => PwmKind::Software,
    }
}

///Provider for the Raspberry Pi's own GPIO header.
pub struct RpiGpio {
    gpio: rppal::gpio::Gpio,
    config: RpiGpioConfig,
}

impl RpiGpio {
    pub fn try_build(config: &RpiGpioConfig) -> Result<Self, DeviceError> {
        let gpio = rppal::gpio::Gpio::new().map_err(|err| build_error("error creating gpio", err))?;
        Ok(Self {
            gpio,
            config: config.clone(),
        })
    }

    fn output_pin(&self, pin: u8) -> io::Result<OutputPin> {
        let pin = self
            .gpio
            .get(pin)
            .map_err(|err| io_error(format!("error getting gpio {}", pin), err))?;
        Ok(pin.into_output())
    }
}

impl DeviceProvider for RpiGpio {
    fn name(&self) -> &str {
        "rpi-gpio"
    }

    fn key_prefix(&self) -> &str {
        "GPIO"
    }

    fn provision_pwm_output(&self, pin: u8, initial_value: f64) -> io::Result<Box<dyn PwmBackend>> {
        let frequency = self.config.pwm_frequency_hertz;
        match pwm_kind(pin) {
            PwmKind::Hardware(channel) if self.config.hardware_pwm => {
                info!("gpio {} using hardware pwm channel {:?}", pin, channel);
                let pwm = Pwm::with_frequency(channel, frequency, initial_value, Polarity::Normal, true)
                    .map_err(|err| io_error(format!("error enabling pwm on gpio {}", pin), err))?;
                Ok(Box::new(HardwarePwm { pin, pwm }))
            }
            _ => {
                info!("gpio {} using software pwm at {} Hz", pin, frequency);
                let mut backend = SoftPwm {
                    pin,
                    output: self.output_pin(pin)?,
                    frequency,
                    value: 0.0,
                };
                backend.write(initial_value)?;
                Ok(Box::new(backend))
            }
        }
    }

    fn provision_digital_output(
        &self,
        pin: u8,
        initial_value: bool,
    ) -> io::Result<Box<dyn DigitalBackend>> {
        let mut output = self.output_pin(pin)?;
        if initial_value {
            output.set_high();
        } else {
            output.set_low();
        }
        Ok(Box::new(DigitalOut { pin, output }))
    }
}

//The PWM signal is implemented in software and can be noisy.
struct SoftPwm {
    pin: u8,
    output: OutputPin,
    frequency: f64,
    value: f64,
}

impl PwmBackend for SoftPwm {
    fn write(&mut self, value: f64) -> io::Result<()> {
        self.output
            .set_pwm_frequency(self.frequency, value)
            .map_err(|err| io_error(format!("error setting pwm output on gpio {}", self.pin), err))?;
        self.value = value;
        Ok(())
    }

    //software pwm keeps no readable register; the last duty cycle handed to it is the pin's state
    fn read(&mut self) -> io::Result<f64> {
        Ok(self.value)
    }

    fn close(&mut self) {
        if let Err(err) = self.output.clear_pwm() {
            debug!("error clearing soft pwm on gpio {}: {}", self.pin, err);
        }
        self.output.set_low();
        debug!("soft pwm out on gpio {} shut down", self.pin);
    }
}

struct HardwarePwm {
    pin: u8,
    pwm: Pwm,
}

impl PwmBackend for HardwarePwm {
    fn write(&mut self, value: f64) -> io::Result<()> {
        self.pwm
            .set_duty_cycle(value)
            .map_err(|err| io_error(format!("error setting duty cycle on gpio {}", self.pin), err))
    }

    fn read(&mut self) -> io::Result<f64> {
        self.pwm
            .duty_cycle()
            .map_err(|err| io_error(format!("error reading duty cycle on gpio {}", self.pin), err))
    }

    fn close(&mut self) {
        if let Err(err) = self.pwm.disable() {
            debug!("error disabling pwm on gpio {}: {}", self.pin, err);
        }
        debug!("hardware pwm out on gpio {} shut down", self.pin);
    }
}

struct DigitalOut {
    pin: u8,
    output: OutputPin,
}

impl DigitalBackend for DigitalOut {
    fn write(&mut self, high: bool) -> io::Result<()> {
        if high {
            self.output.set_high();
        } else {
            self.output.set_low();
        }
        Ok(())
    }

    fn read(&mut self) -> io::Result<bool> {
        Ok(self.output.is_set_high())
    }

    fn close(&mut self) {
        self.output.set_low();
        debug!("gpio digital out {} shut down", self.pin);
    }
}
