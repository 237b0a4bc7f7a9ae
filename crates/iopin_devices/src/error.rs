use std::{fmt::Debug, io};

//bus errors only implement Debug, so they are carried as text
pub(crate) fn bus_error<E: Debug>(context: &str, err: E) -> io::Error {
    io::Error::other(format!("{}: {:?}", context, err))
}
