use std::time::Duration;

use log::{error, info};
use thiserror::Error;
use tns_common::indication::{IndicationEvent, MessageId};
use tns_common::request::{IndicationRegistration, NasRequest, NasResponse};

use crate::error::Error;

/// Failure reported by the modem transport.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum TransportError {
    #[error("NAS service object not available")]
    ServiceUnavailable,
    #[error("Client init failed: err={0}")]
    InitFailed(i32),
    #[error("No response within {0:?}")]
    Timeout(Duration),
    #[error("Service is down")]
    ServiceDown,
    #[error("Client already released")]
    Released,
    #[error("Transport failure: err={0}")]
    Other(i32),
}

#[derive(Clone, Debug, Error, Eq, PartialEq)]
#[error("Failed to decode indication {msg_id} ({len} bytes): {reason}")]
pub struct DecodeError {
    pub msg_id: MessageId,
    pub len: usize,
    pub reason: String,
}

/// An indication as delivered by the transport, not decoded yet.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RawIndication {
    pub msg_id: MessageId,
    pub payload: Vec<u8>,
}

/// Role of a client connection. The modem delivers sync pulse indications to the client which
/// configures pulse generation, so two independent clients are used.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum ClientRole {
    Nas,
    SyncPulse,
}

impl core::fmt::Display for ClientRole {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Nas => write!(f, "NAS"),
            Self::SyncPulse => write!(f, "Sync Pulse"),
        }
    }
}

pub type ErrorCallback = Box<dyn Fn(TransportError) + Send + Sync>;

/// Decode primitive of the transport.
pub trait IndicationDecoder {
    /// Decodes a raw indication. Message ids without a known payload decode to
    /// [`IndicationEvent::Unhandled`].
    fn decode(&self, raw: &RawIndication) -> Result<IndicationEvent, DecodeError>;
}

/// A client connection to the modem's network access service.
pub trait NasClient: IndicationDecoder + Send + Sync + 'static {
    /// Sends a request and waits up to `timeout` for the response.
    fn send_request(
        &self,
        request: &NasRequest,
        timeout: Duration,
    ) -> impl Future<Output = Result<NasResponse, TransportError>> + Send;

    /// Returns the next indication for this client, `None` once the transport shut down.
    ///
    /// This may block until the modem sends something, there is no way to interrupt the receive
    /// other than dropping the future.
    fn next_indication(&self) -> impl Future<Output = Option<RawIndication>> + Send;

    /// Registers a callback for asynchronous transport errors.
    fn register_error_callback(&self, callback: ErrorCallback) -> Result<(), TransportError>;

    fn release(&self) -> impl Future<Output = Result<(), TransportError>> + Send;
}

/// Hands out client connections.
pub trait ServiceProvider: Send + Sync + 'static {
    type Client: NasClient;

    fn connect(
        &self,
        role: ClientRole,
    ) -> impl Future<Output = Result<Self::Client, TransportError>> + Send;
}

/// Sends a request and checks both the transport result and the modem's result code.
pub async fn exchange<C: NasClient>(
    client: &C,
    request: &NasRequest,
    timeout: Duration,
) -> crate::Result<NasResponse> {
    let msg_id = request.message_id();
    let response = client.send_request(request, timeout).await?;
    if !response.is_success() {
        return Err(Error::Rejected {
            msg_id,
            result: response.result,
            error: response.error,
        });
    }
    Ok(response)
}

/// Registers `client` for the given indications.
pub async fn subscribe<C: NasClient>(
    client: &C,
    registration: IndicationRegistration,
    timeout: Duration,
) -> crate::Result<()> {
    info!("Registering for NAS indications...");
    exchange(client, &NasRequest::IndicationRegister(registration), timeout)
        .await
        .inspect_err(|err| error!("NAS indication register failed: {err}"))?;
    info!("NAS indication registration successful");
    Ok(())
}
