use thiserror::Error;

#[derive(Debug, Error)]
pub enum HwError {
    /// One or more required devices could not be reached at open time.
    #[error("devices unavailable: {}", missing.join(", "))]
    Unavailable { missing: Vec<String> },
    /// Port is present but no wire driver is built for it.
    #[error("no driver for {0}")]
    DriverMissing(String),
    #[error("device timeout")]
    Timeout,
    #[error("protocol error: {0}")]
    Protocol(String),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, HwError>;
