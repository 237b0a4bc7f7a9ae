//!The loops that turn a `Waveform` into timed backend writes.

use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use tokio::{sync::OwnedMutexGuard, time::sleep};
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::trace;

use super::waveform::{Completion, Iterations, Waveform};
use crate::{backend::PwmBackend, device::lock, error::DeviceError};

///The backend plus whether it has been released. Every write, from any party, goes through this lock.
pub(crate) struct Channel {
    pub(crate) backend: Box<dyn PwmBackend>,
    pub(crate) released: bool,
}

pub(crate) type SharedChannel = Arc<Mutex<Channel>>;

enum Flow {
    Continue,
    Cancelled,
}

///Drives one waveform on behalf of a device.
///
///Holds the device's generation slot for as long as it lives, so at most one driver exists per
///device. Dropping it cancels its own token, which is what marks the device idle again.
pub(crate) struct Driver {
    key: String,
    channel: SharedChannel,
    token: CancellationToken,
    _done: DropGuard,
    _slot: OwnedMutexGuard<()>,
}

impl Driver {
    pub(crate) fn new(
        key: String,
        channel: SharedChannel,
        token: CancellationToken,
        slot: OwnedMutexGuard<()>,
    ) -> Self {
        Self {
            key,
            channel,
            _done: token.clone().drop_guard(),
            token,
            _slot: slot,
        }
    }

    pub(crate) fn key(&self) -> &str {
        &self.key
    }

    //the token is checked under the channel lock: once a stop has cancelled it, no write from this
    //driver can land after the stopper's own write
    fn write(&self, value: f64) -> Result<Flow, DeviceError> {
        let mut channel = lock(&self.channel);
        if self.token.is_cancelled() || channel.released {
            return Ok(Flow::Cancelled);
        }
        trace!("{} <- {}", self.key, value);
        channel.backend.write(value)?;
        Ok(Flow::Continue)
    }

    async fn hold(&self, duration: Duration) -> Flow {
        tokio::select! {
            _ = self.token.cancelled() => Flow::Cancelled,
            _ = sleep(duration) => Flow::Continue,
        }
    }

    async fn step(&self, value: f64, duration: Duration) -> Result<Flow, DeviceError> {
        if let Flow::Cancelled = self.write(value)? {
            return Ok(Flow::Cancelled);
        }
        Ok(self.hold(duration).await)
    }

    pub(crate) async fn run(&self, waveform: &Waveform) -> Result<Completion, DeviceError> {
        match *waveform {
            Waveform::Set(value) => match self.write(value)? {
                Flow::Continue => Ok(Completion::Completed),
                Flow::Cancelled => Ok(Completion::Cancelled),
            },
            Waveform::OnOff {
                on,
                off,
                iterations,
            } => self.on_off(on, off, iterations).await,
            Waveform::Fade {
                duration,
                steps,
                iterations,
            } => self.fade_in_out(duration, steps, iterations).await,
        }
    }

    async fn on_off(
        &self,
        on: Duration,
        off: Duration,
        iterations: Iterations,
    ) -> Result<Completion, DeviceError> {
        let mut completed = 0u32;
        while iterations.allows(completed) {
            for (value, duration) in [(1.0, on), (0.0, off)] {
                if let Flow::Cancelled = self.step(value, duration).await? {
                    return Ok(Completion::Cancelled);
                }
            }
            completed = completed.saturating_add(1);
        }
        Ok(Completion::Completed)
    }

    //levels come from an integer counter so the ramp hits exactly 0 and 1. The top level is written
    //twice per pass: once closing the ramp up and once opening the ramp down.
    async fn fade_in_out(
        &self,
        duration: Duration,
        steps: u32,
        iterations: Iterations,
    ) -> Result<Completion, DeviceError> {
        let step_duration = duration / steps;
        let mut completed = 0u32;
        while iterations.allows(completed) {
            for level in (0..=steps).chain((0..=steps).rev()) {
                let value = fade_level(level, steps);
                if let Flow::Cancelled = self.step(value, step_duration).await? {
                    return Ok(Completion::Cancelled);
                }
            }
            completed = completed.saturating_add(1);
        }
        Ok(Completion::Completed)
    }
}

fn fade_level(level: u32, steps: u32) -> f64 {
    (level as f64 / steps as f64).clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fade_levels_end_exactly_on_the_rails() {
        for steps in [1, 3, 4, 7, 10, 25, 1000] {
            assert_eq!(fade_level(0, steps), 0.0);
            assert_eq!(fade_level(steps, steps), 1.0);
        }
        assert_eq!(fade_level(1, 4), 0.25);
        assert_eq!(fade_level(3, 4), 0.75);
    }
}
