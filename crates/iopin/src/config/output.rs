use std::sync::Arc;

use iopin_core::{
    Completion, DeviceError, DeviceFactory, PwmOutputDevice, Waveform, WaveformConfig,
    WaveformRequest,
};
use serde::Deserialize;
use tracing::debug;

///One named pwm output and the waveform it plays.
#[derive(Deserialize, Debug)]
pub struct OutputConfig {
    pub pin: u8,
    #[serde(default)]
    pub initial: f64,
    pub waveform: WaveformConfig,
}

impl OutputConfig {
    ///Validates the waveform before any hardware is provisioned.
    pub fn open(&self, factory: &DeviceFactory) -> Result<(Arc<PwmOutputDevice>, Waveform), DeviceError> {
        let waveform = Waveform::try_from(&self.waveform)?;
        let device = factory.pwm_output(self.pin, self.initial)?;
        Ok((device, waveform))
    }

    pub async fn start(
        device: &PwmOutputDevice,
        waveform: Waveform,
    ) -> Result<Completion, DeviceError> {
        debug!("starting {:?} on {}", waveform, device.pin());
        device.run(WaveformRequest::background(waveform)).await
    }
}
