use std::fmt;

/// Typed errors for slot map operations.
///
/// Stale keys are never an error: lookups report them as `None` and erases
/// as `false`, because detecting staleness is what the generation counter is
/// for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// A fixed-capacity map received an insert with no free slot remaining,
    /// or backing storage exhausted its bucket budget.
    CapacityExceeded,
    /// A key's index lies beyond the map's slot table.
    OutOfBounds {
        /// The offending key index.
        index: u32,
        /// The map's capacity at the time of the call.
        capacity: u32,
    },
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::CapacityExceeded => {
                write!(f, "slot map is at max capacity")
            }
            Error::OutOfBounds { index, capacity } => {
                write!(
                    f,
                    "key index {} is outside the slot table of capacity {}",
                    index, capacity
                )
            }
        }
    }
}

impl std::error::Error for Error {}

impl From<petek_vec::Error> for Error {
    fn from(_: petek_vec::Error) -> Self {
        Error::CapacityExceeded
    }
}
