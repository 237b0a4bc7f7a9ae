use std::io;

use iopin_core::DeviceError;

///Backend failures are reported as `io::Error`, carrying the rppal error message.
pub(crate) fn io_error<E>(context: String, err: E) -> io::Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    io::Error::other(format!("{} - Cause: {}", context, err))
}

pub(crate) fn build_error<E>(context: &str, err: E) -> DeviceError
where
    E: std::error::Error + Send + Sync + 'static,
{
    DeviceError::Io(io_error(context.to_string(), err))
}
