pub mod config;
pub mod error;
pub mod indication;
pub mod request;

pub type Result<T> = core::result::Result<T, error::Error>;
