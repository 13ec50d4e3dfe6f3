pub mod configurator;
pub mod error;
pub mod gate;
pub mod listener;
pub mod router;
pub mod simulated;
pub mod supervisor;
pub mod transport;

pub type Result<T> = std::result::Result<T, error::Error>;
