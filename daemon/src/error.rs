use thiserror::Error;
use tns_common::indication::MessageId;

use crate::transport::TransportError;

#[derive(Debug, Error, Eq, PartialEq)]
pub enum Error {
    #[error("Transport error: {0}")]
    TransportError(#[from] TransportError),
    #[error("Request {msg_id} rejected: result={result}, error=0x{error:x}")]
    Rejected {
        msg_id: MessageId,
        result: u16,
        error: u16,
    },
    #[error("NAS service unavailable: {0}")]
    ServiceUnavailable(TransportError),
    #[error("Sync pulse configuration failed after {0} attempts")]
    RetryExhausted(u8),
}
