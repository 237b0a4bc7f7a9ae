//!This is the core library for the iopin project. All other iopin libraries depend on this one.
//!
//! It owns the lifecycle of hardware-bound devices: every device registers its key with a
//! `DeviceRegistry` when opened, so a pin or bus address is never held by two objects, and
//! `DeviceRegistry::shutdown` releases everything that is still open. On top of that sits the PWM
//! waveform engine, which drives a pin's duty cycle through on/off cycles and fades, awaited by the
//! caller or handed to the `Scheduler`.
//!
//! Hardware is reached through the `backend` traits. The `sim` module provides in-memory hardware;
//! `iopin_rpi_gpio` and `iopin_devices` provide the real thing.

pub mod backend;
pub mod device;
pub mod digital;
pub mod error;
pub mod factory;
pub mod pwm;
pub mod registry;
pub mod scheduler;

///In-memory backends and provider
pub mod sim;

pub use backend::{DeviceProvider, DigitalBackend, PwmBackend};
pub use device::Device;
pub use digital::DigitalOutputDevice;
pub use error::DeviceError;
pub use factory::DeviceFactory;
pub use pwm::{
    Completion, ExecutionMode, Iterations, PwmOutputDevice, PwmState, Waveform, WaveformConfig,
    WaveformRequest,
};
pub use registry::{DeviceRegistry, Registration};
pub use scheduler::{Scheduler, TaskHandle};
