use thiserror::Error;

#[derive(Debug, Error, Eq, PartialEq)]
pub enum Error {
    #[error("Cannot parse string as a number")]
    ParseError,
    #[error("Value {value} out of range {min}..={max}")]
    OutOfRange { value: u64, min: u32, max: u32 },
    #[error("Input closed before a value was entered")]
    InputClosed,
    #[error("Cannot read config file '{path}': {reason}")]
    ConfigUnreadable { path: String, reason: String },
}
