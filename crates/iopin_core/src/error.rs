//!A mod for the error types
use std::io;

///Common error type for device construction and device operations.
#[derive(Debug, thiserror::Error)]
pub enum DeviceError {
    ///A value, duration or step count was out of range. Nothing was written to hardware.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    ///Another open device is already registered under this key.
    #[error("device {0} is already open")]
    AlreadyOpen(String),

    ///The backend channel failed to read or write.
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),

    ///The device has been closed and its backend released.
    #[error("device {0} is closed")]
    Closed(String),

    ///The registry has been shut down and accepts no new devices.
    #[error("device registry has been shut down")]
    RegistryShutdown,

    ///Background waveforms need a tokio runtime.
    #[error("no tokio runtime available for background work")]
    NoRuntime,

    #[error("unsupported: {0}")]
    Unsupported(String),
}

impl DeviceError {
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        DeviceError::InvalidArgument(msg.into())
    }
}

///Checks that a duty cycle value lies in [0, 1]. NaN is rejected.
pub fn check_unit_interval(value: f64) -> Result<f64, DeviceError> {
    if (0.0..=1.0).contains(&value) {
        Ok(value)
    } else {
        Err(DeviceError::InvalidArgument(format!(
            "value must be 0..1, you requested {}",
            value
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unit_interval_bounds() {
        assert_eq!(check_unit_interval(0.0).unwrap(), 0.0);
        assert_eq!(check_unit_interval(1.0).unwrap(), 1.0);
        assert!(matches!(
            check_unit_interval(-0.01),
            Err(DeviceError::InvalidArgument(_))
        ));
        assert!(matches!(
            check_unit_interval(1.01),
            Err(DeviceError::InvalidArgument(_))
        ));
        assert!(check_unit_interval(f64::NAN).is_err());
    }

    #[test]
    fn io_errors_convert() {
        let err: DeviceError = io::Error::other("bus fault").into();
        assert!(matches!(err, DeviceError::Io(_)));
        assert_eq!(err.to_string(), "i/o error: bus fault");
    }
}
