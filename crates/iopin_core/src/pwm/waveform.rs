use std::time::Duration;

use serde::Deserialize;

use crate::error::{check_unit_interval, DeviceError};

///How many times a cyclic waveform repeats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Iterations {
    Count(u32),
    ///Run until cancelled.
    Forever,
}

impl Iterations {
    ///Whether another pass may start after `completed` passes.
    pub fn allows(&self, completed: u32) -> bool {
        match self {
            Iterations::Count(n) => completed < *n,
            Iterations::Forever => true,
        }
    }
}

impl From<u32> for Iterations {
    fn from(n: u32) -> Self {
        Iterations::Count(n)
    }
}

impl From<Option<u32>> for Iterations {
    fn from(n: Option<u32>) -> Self {
        n.map(Iterations::Count).unwrap_or(Iterations::Forever)
    }
}

///The shape of duty-cycle activity to produce on a pin.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Waveform {
    ///One write of a fixed value.
    Set(f64),
    ///Full on for `on`, full off for `off`, per iteration.
    OnOff {
        on: Duration,
        off: Duration,
        iterations: Iterations,
    },
    ///Ramp 0 to 1 in `steps` increments over `duration`, then back down over the same time, per iteration.
    Fade {
        duration: Duration,
        steps: u32,
        iterations: Iterations,
    },
}

impl Waveform {
    pub fn set(value: f64) -> Result<Self, DeviceError> {
        check_unit_interval(value).map(Waveform::Set)
    }

    pub fn on_off(
        on: Duration,
        off: Duration,
        iterations: impl Into<Iterations>,
    ) -> Result<Self, DeviceError> {
        let waveform = Waveform::OnOff {
            on,
            off,
            iterations: iterations.into(),
        };
        waveform.validate()?;
        Ok(waveform)
    }

    pub fn fade(
        duration: Duration,
        steps: u32,
        iterations: impl Into<Iterations>,
    ) -> Result<Self, DeviceError> {
        let waveform = Waveform::Fade {
            duration,
            steps,
            iterations: iterations.into(),
        };
        waveform.validate()?;
        Ok(waveform)
    }

    ///Rejects parameters that could never produce a sensible waveform, before any hardware is touched.
    pub fn validate(&self) -> Result<(), DeviceError> {
        match self {
            Waveform::Set(value) => check_unit_interval(*value).map(|_| ()),
            Waveform::OnOff { on, off, .. } => {
                if on.is_zero() && off.is_zero() {
                    Err(DeviceError::invalid_argument(
                        "on and off durations cannot both be zero",
                    ))
                } else {
                    Ok(())
                }
            }
            Waveform::Fade {
                duration, steps, ..
            } => {
                if *steps == 0 {
                    Err(DeviceError::invalid_argument("fade needs at least one step"))
                } else if duration.is_zero() {
                    Err(DeviceError::invalid_argument("fade duration must be positive"))
                } else {
                    Ok(())
                }
            }
        }
    }
}

///Whether the caller waits for a waveform to finish.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExecutionMode {
    #[default]
    Foreground,
    Background,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WaveformRequest {
    pub waveform: Waveform,
    pub mode: ExecutionMode,
}

impl WaveformRequest {
    pub fn foreground(waveform: Waveform) -> Self {
        Self {
            waveform,
            mode: ExecutionMode::Foreground,
        }
    }

    pub fn background(waveform: Waveform) -> Self {
        Self {
            waveform,
            mode: ExecutionMode::Background,
        }
    }
}

///How a waveform request ended, from the caller's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    ///Ran its full iteration budget.
    Completed,
    ///Stopped early by `stop`, a newer waveform, or close.
    Cancelled,
    ///Handed to the scheduler; still running.
    Backgrounded,
}

//Configuration to describe a waveform in a config file. Durations are in seconds, a missing
//iteration count means forever.
#[derive(Debug, Clone, Deserialize)]
pub enum WaveformConfig {
    Set {
        value: f64,
    },
    OnOff {
        on_secs: f64,
        off_secs: f64,
        iterations: Option<u32>,
    },
    Fade {
        fade_secs: f64,
        steps: u32,
        iterations: Option<u32>,
    },
}

fn secs(name: &str, secs: f64) -> Result<Duration, DeviceError> {
    Duration::try_from_secs_f64(secs).map_err(|err| {
        DeviceError::InvalidArgument(format!(
            "{} must be a non-negative number of seconds, got {}: {}",
            name, secs, err
        ))
    })
}

impl TryFrom<&WaveformConfig> for Waveform {
    type Error = DeviceError;

    fn try_from(cfg: &WaveformConfig) -> Result<Self, Self::Error> {
        match cfg {
            WaveformConfig::Set { value } => Waveform::set(*value),
            WaveformConfig::OnOff {
                on_secs,
                off_secs,
                iterations,
            } => Waveform::on_off(
                secs("on_secs", *on_secs)?,
                secs("off_secs", *off_secs)?,
                *iterations,
            ),
            WaveformConfig::Fade {
                fade_secs,
                steps,
                iterations,
            } => Waveform::fade(secs("fade_secs", *fade_secs)?, *steps, *iterations),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn iteration_budgets() {
        assert!(!Iterations::Count(0).allows(0));
        assert!(Iterations::Count(3).allows(2));
        assert!(!Iterations::Count(3).allows(3));
        assert!(Iterations::Forever.allows(u32::MAX));
        assert_eq!(Iterations::from(None), Iterations::Forever);
        assert_eq!(Iterations::from(Some(2)), Iterations::Count(2));
    }

    #[test]
    fn malformed_parameters_are_rejected() {
        assert!(matches!(Waveform::set(1.5), Err(DeviceError::InvalidArgument(_))));
        assert!(Waveform::on_off(Duration::ZERO, Duration::ZERO, 1).is_err());
        assert!(Waveform::on_off(Duration::ZERO, Duration::from_millis(5), 1).is_ok());
        assert!(Waveform::fade(Duration::from_secs(1), 0, 1).is_err());
        assert!(Waveform::fade(Duration::ZERO, 10, 1).is_err());
    }

    #[test]
    fn config_converts_seconds() {
        let cfg = WaveformConfig::Fade {
            fade_secs: 1.5,
            steps: 30,
            iterations: None,
        };
        assert_eq!(
            Waveform::try_from(&cfg).unwrap(),
            Waveform::Fade {
                duration: Duration::from_millis(1500),
                steps: 30,
                iterations: Iterations::Forever
            }
        );

        let negative = WaveformConfig::OnOff {
            on_secs: -1.0,
            off_secs: 1.0,
            iterations: Some(1),
        };
        assert!(matches!(
            Waveform::try_from(&negative),
            Err(DeviceError::InvalidArgument(_))
        ));

        let nan = WaveformConfig::OnOff {
            on_secs: f64::NAN,
            off_secs: 1.0,
            iterations: Some(1),
        };
        assert!(Waveform::try_from(&nan).is_err());
    }
}
