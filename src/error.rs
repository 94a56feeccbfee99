use std::{collections::TryReserveError, error, fmt};

// -------------------------------------------------------------------------------------------------

/// Provides an enumeration of all possible errors reported by grainloop.
#[derive(Debug)]
#[allow(clippy::enum_variant_names)]
pub enum Error {
    AllocationError(String),
    ParameterError(String),
    SendError(String),
}

impl error::Error for Error {}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AllocationError(str) => write!(f, "Failed to allocate audio memory: {str}"),
            Self::ParameterError(str) => write!(f, "Invalid parameter: {str}"),
            Self::SendError(str) => write!(f, "Failed to send engine message: {str}"),
        }
    }
}

impl From<TryReserveError> for Error {
    fn from(err: TryReserveError) -> Error {
        Error::AllocationError(err.to_string())
    }
}
