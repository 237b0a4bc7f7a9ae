//!Pulse-width-modulated outputs and the waveform engine that drives them.
//!
//! A `PwmOutputDevice` owns one backend channel. Its value can be set directly or driven over time
//! by a waveform (on/off cycling or fading in and out), either awaited by the caller or handed to
//! the `Scheduler`. At most one waveform is active per device: starting a new one, setting a value,
//! stopping or closing all supersede whatever was running first.

mod generator;
pub mod waveform;

use std::{
    any::Any,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex,
    },
};

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::{
    backend::PwmBackend,
    device::{lock, Device},
    error::{check_unit_interval, DeviceError},
    registry::{DeviceRegistry, Registration},
    scheduler::{Scheduler, TaskHandle},
};
use generator::{Channel, Driver, SharedChannel};
pub use waveform::{Completion, ExecutionMode, Iterations, Waveform, WaveformConfig, WaveformRequest};

///Whether a waveform is currently driving the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PwmState {
    Idle,
    Running,
}

#[derive(Default)]
struct Activity {
    token: Option<CancellationToken>,
    worker: Option<TaskHandle>,
}

pub struct PwmOutputDevice {
    pin: u8,
    channel: SharedChannel,
    activity: Mutex<Activity>,
    //held by the driver of the active waveform; acquiring it means the previous one has exited
    generation: Arc<tokio::sync::Mutex<()>>,
    //serialises waveform starts against each other
    start: tokio::sync::Mutex<()>,
    scheduler: Scheduler,
    registration: Registration,
    closed: AtomicBool,
}

impl PwmOutputDevice {
    ///Wrap a provisioned backend and register it under `key`.
    ///
    ///If the key is already taken the backend is released again, without writing to it, and
    ///`AlreadyOpen` is returned.
    pub fn open(
        key: String,
        pin: u8,
        backend: Box<dyn PwmBackend>,
        scheduler: Scheduler,
        registry: Arc<DeviceRegistry>,
    ) -> Result<Arc<Self>, DeviceError> {
        let device = Arc::new(Self {
            pin,
            channel: Arc::new(Mutex::new(Channel {
                backend,
                released: false,
            })),
            activity: Mutex::new(Activity::default()),
            generation: Arc::new(tokio::sync::Mutex::new(())),
            start: tokio::sync::Mutex::new(()),
            scheduler,
            registration: Registration::new(registry, key),
            closed: AtomicBool::new(false),
        });

        if let Err(err) = device.registration.register(&device) {
            device.discard();
            return Err(err);
        }
        debug!("opened pwm output {}", device.key());
        Ok(device)
    }

    pub fn pin(&self) -> u8 {
        self.pin
    }

    pub fn state(&self) -> PwmState {
        match &lock(&self.activity).token {
            Some(token) if !token.is_cancelled() => PwmState::Running,
            _ => PwmState::Idle,
        }
    }

    fn ensure_open(&self) -> Result<(), DeviceError> {
        if self.is_closed() {
            Err(DeviceError::Closed(self.key().to_string()))
        } else {
            Ok(())
        }
    }

    //cancel the active waveform, if any, and hand back its task handle
    fn cancel_current(&self) -> Option<TaskHandle> {
        let mut activity = lock(&self.activity);
        if let Some(token) = activity.token.take() {
            token.cancel();
        }
        activity.worker.take()
    }

    fn write_now(&self, value: f64) -> Result<(), DeviceError> {
        let mut channel = lock(&self.channel);
        if channel.released {
            return Err(DeviceError::Closed(self.key().to_string()));
        }
        channel.backend.write(value)?;
        Ok(())
    }

    ///The value the backend reports right now, even while a waveform is running.
    pub fn value(&self) -> Result<f64, DeviceError> {
        let mut channel = lock(&self.channel);
        if channel.released {
            return Err(DeviceError::Closed(self.key().to_string()));
        }
        Ok(channel.backend.read()?)
    }

    pub fn is_on(&self) -> Result<bool, DeviceError> {
        Ok(self.value()? > 0.0)
    }

    ///Stop any waveform and write `value` once.
    ///
    ///Values outside [0, 1] fail with `InvalidArgument` before anything is cancelled or written.
    pub fn set_value(&self, value: f64) -> Result<(), DeviceError> {
        let value = check_unit_interval(value)?;
        self.ensure_open()?;
        self.cancel_current();
        self.write_now(value)
    }

    pub fn on(&self) -> Result<(), DeviceError> {
        self.set_value(1.0)
    }

    pub fn off(&self) -> Result<(), DeviceError> {
        self.set_value(0.0)
    }

    ///Stop any waveform and write `1 - value`.
    pub fn toggle(&self) -> Result<(), DeviceError> {
        self.ensure_open()?;
        self.cancel_current();
        let mut channel = lock(&self.channel);
        if channel.released {
            return Err(DeviceError::Closed(self.key().to_string()));
        }
        let current = channel.backend.read()?;
        channel.backend.write((1.0 - current).clamp(0.0, 1.0))?;
        Ok(())
    }

    ///Stop the active waveform and wait until it has exited. The output keeps the last value written.
    pub async fn stop(&self) {
        let _start = self.start.lock().await;
        if let Some(worker) = self.cancel_current() {
            worker.join().await;
        }
        let _idle = self.generation.lock().await;
    }

    //supersede whatever is running and claim the generation slot for a new driver
    async fn begin(&self) -> Result<Driver, DeviceError> {
        self.ensure_open()?;
        if let Some(worker) = self.cancel_current() {
            worker.join().await;
        }
        let slot = self.generation.clone().lock_owned().await;

        let token = CancellationToken::new();
        let mut activity = lock(&self.activity);
        //close may have run while we waited; it cancels whatever token it finds, so check under the lock
        self.ensure_open()?;
        activity.token = Some(token.clone());
        Ok(Driver::new(
            self.key().to_string(),
            self.channel.clone(),
            token,
            slot,
        ))
    }

    ///Run a waveform request.
    ///
    ///In the foreground this resolves once the waveform has completed or been cancelled. In the
    ///background it resolves as soon as the waveform has been handed to the scheduler, with
    ///`Completion::Backgrounded`. Either way, any previous waveform on this device has fully
    ///stopped before the first write of the new one.
    pub async fn run(&self, request: WaveformRequest) -> Result<Completion, DeviceError> {
        let waveform = request.waveform;
        waveform.validate()?;

        let start = self.start.lock().await;
        let driver = self.begin().await?;

        match request.mode {
            ExecutionMode::Foreground => {
                drop(start);
                debug!("{}: running {:?}", self.key(), waveform);
                let completion = driver.run(&waveform).await?;
                debug!("{}: waveform finished: {:?}", self.key(), completion);
                Ok(completion)
            }
            ExecutionMode::Background => {
                let worker = self.scheduler.submit(async move {
                    match driver.run(&waveform).await {
                        Ok(completion) => {
                            info!("{}: background waveform finished: {:?}", driver.key(), completion)
                        }
                        Err(err) => {
                            error!("{}: background waveform stopped on error: {}", driver.key(), err)
                        }
                    }
                });
                lock(&self.activity).worker = Some(worker);
                drop(start);
                Ok(Completion::Backgrounded)
            }
        }
    }

    ///Cycle full on / full off.
    pub async fn on_off(
        &self,
        on: std::time::Duration,
        off: std::time::Duration,
        iterations: impl Into<Iterations>,
        mode: ExecutionMode,
    ) -> Result<Completion, DeviceError> {
        let waveform = Waveform::on_off(on, off, iterations)?;
        self.run(WaveformRequest { waveform, mode }).await
    }

    ///Fade from 0 up to 1 over `duration` in `steps` increments, then back down, per iteration.
    pub async fn fade_in_out(
        &self,
        duration: std::time::Duration,
        steps: u32,
        iterations: impl Into<Iterations>,
        mode: ExecutionMode,
    ) -> Result<Completion, DeviceError> {
        let waveform = Waveform::fade(duration, steps, iterations)?;
        self.run(WaveformRequest { waveform, mode }).await
    }

    //release after a failed registration; the pin belongs to someone else so nothing is written
    fn discard(&self) {
        self.closed.store(true, Ordering::SeqCst);
        let mut channel = lock(&self.channel);
        channel.backend.close();
        channel.released = true;
    }
}

impl Device for PwmOutputDevice {
    fn key(&self) -> &str {
        self.registration.key()
    }

    ///Cancel any waveform, drive the output to 0 and release the backend.
    ///
    ///A failure writing the final 0 is swallowed; the backend is released and the key unregistered
    ///regardless. No write from a superseded waveform can reach the backend once this returns.
    fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        debug!("closing pwm output {}", self.key());
        if let Some(worker) = self.cancel_current() {
            info!("{}: interrupting background waveform", self.key());
            worker.interrupt();
        }
        {
            let mut channel = lock(&self.channel);
            if !channel.released {
                if let Err(err) = channel.backend.write(0.0) {
                    debug!("{}: ignoring error zeroing output on close: {}", self.key(), err);
                }
                channel.backend.close();
                channel.released = true;
            }
        }
        self.registration.release();
        debug!("pwm output {} closed", self.key());
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}

impl Drop for PwmOutputDevice {
    fn drop(&mut self) {
        self.close();
    }
}
