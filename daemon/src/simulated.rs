//! An in-process modem implementing the transport traits.
//!
//! Indication payloads are postcard-encoded value types from `tns_common::indication`. The
//! modem records every request it receives, can be told to reject or drop sync pulse
//! configuration, reports NR5G service after a delay and emits pulse reports while pulse
//! generation is configured.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use log::{debug, info};
use serde::de::DeserializeOwned;
use tns_common::indication::{
    IndicationEvent, IndicationKind, Plmn, ServingSystem, SysInfo, TimeSyncPulseReport,
};
use tns_common::request::{NasRequest, NasResponse, SyncPulseRequest};
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::transport::{
    ClientRole, DecodeError, ErrorCallback, IndicationDecoder, NasClient, RawIndication,
    ServiceProvider, TransportError,
};

/// Milliseconds between the Unix and the GPS epoch.
const GPS_EPOCH_OFFSET_MS: u64 = 315_964_800_000;
const LEAP_SECONDS: u32 = 18;
/// QMI error code used for rejected requests.
const ERR_INTERNAL: u16 = 0x0003;

/// Postcard encoding of indication payloads.
pub struct SimulatedCodec;

impl SimulatedCodec {
    pub fn encode(event: &IndicationEvent) -> Result<RawIndication, postcard::Error> {
        let payload = match event {
            IndicationEvent::ServingSystem(payload) => postcard::to_allocvec(payload)?,
            IndicationEvent::SysInfo(payload) => postcard::to_allocvec(payload)?,
            IndicationEvent::SigInfo(payload) => postcard::to_allocvec(payload)?,
            IndicationEvent::OperatorName(payload) => postcard::to_allocvec(payload)?,
            IndicationEvent::TimeSyncPulseReport(payload) => postcard::to_allocvec(payload)?,
            IndicationEvent::LostFrameSync(payload) => postcard::to_allocvec(payload)?,
            IndicationEvent::Unhandled(_) => Vec::new(),
        };
        Ok(RawIndication {
            msg_id: event.message_id(),
            payload,
        })
    }
}

fn decode_payload<T: DeserializeOwned>(raw: &RawIndication) -> Result<T, DecodeError> {
    postcard::from_bytes(&raw.payload).map_err(|err| DecodeError {
        msg_id: raw.msg_id,
        len: raw.payload.len(),
        reason: err.to_string(),
    })
}

impl IndicationDecoder for SimulatedCodec {
    fn decode(&self, raw: &RawIndication) -> Result<IndicationEvent, DecodeError> {
        let Some(kind) = IndicationKind::from_id(raw.msg_id) else {
            return Ok(IndicationEvent::Unhandled(raw.msg_id));
        };
        Ok(match kind {
            IndicationKind::ServingSystem => IndicationEvent::ServingSystem(decode_payload(raw)?),
            IndicationKind::SysInfo => IndicationEvent::SysInfo(decode_payload(raw)?),
            IndicationKind::SigInfo => IndicationEvent::SigInfo(decode_payload(raw)?),
            IndicationKind::OperatorName => IndicationEvent::OperatorName(decode_payload(raw)?),
            IndicationKind::TimeSyncPulseReport => {
                IndicationEvent::TimeSyncPulseReport(decode_payload(raw)?)
            }
            IndicationKind::LostFrameSync => IndicationEvent::LostFrameSync(decode_payload(raw)?),
        })
    }
}

/// A request as seen by the simulated modem.
#[derive(Clone, Debug, PartialEq)]
pub struct RecordedRequest {
    pub at: Instant,
    pub role: ClientRole,
    pub request: NasRequest,
}

struct Link {
    tx: UnboundedSender<RawIndication>,
    rx: Option<UnboundedReceiver<RawIndication>>,
}

impl Link {
    fn new() -> Self {
        let (tx, rx) = unbounded_channel();
        Self { tx, rx: Some(rx) }
    }
}

#[derive(Default)]
struct Shared {
    links: Mutex<HashMap<ClientRole, Link>>,
    requests: Mutex<Vec<RecordedRequest>>,
    released: Mutex<Vec<ClientRole>>,
    unavailable: Mutex<HashSet<ClientRole>>,
    error_callbacks: Mutex<Vec<(ClientRole, ErrorCallback)>>,
    rejected_configures: AtomicU32,
    dropped_configures: AtomicU32,
    attach_after: Mutex<Option<Duration>>,
    pulse_reports: AtomicBool,
    pulse_generation: Mutex<Option<CancellationToken>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    // Poisoning is ignored, the recorded state stays readable
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl Shared {
    fn push(&self, role: ClientRole, raw: RawIndication) {
        let mut links = lock(&self.links);
        let link = links.entry(role).or_insert_with(Link::new);
        if link.tx.send(raw).is_err() {
            debug!("{role} client is gone, dropping indication");
        }
    }

    fn push_event(&self, role: ClientRole, event: &IndicationEvent) {
        match SimulatedCodec::encode(event) {
            Ok(raw) => self.push(role, raw),
            Err(err) => debug!("Cannot encode {event:?}: {err}"),
        }
    }
}

/// Simulated modem, cloning shares the same modem.
#[derive(Clone, Default)]
pub struct SimulatedModem {
    shared: Arc<Shared>,
}

impl SimulatedModem {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes `connect` fail for `role`.
    pub fn set_unavailable(&self, role: ClientRole) {
        lock(&self.shared.unavailable).insert(role);
    }

    /// The next `count` sync pulse configuration requests get a failure result.
    pub fn reject_configures(&self, count: u32) {
        self.shared.rejected_configures.store(count, Ordering::SeqCst);
    }

    /// The next `count` sync pulse configuration requests time out in the transport.
    pub fn drop_configures(&self, count: u32) {
        self.shared.dropped_configures.store(count, Ordering::SeqCst);
    }

    /// Reports NR5G service `delay` after the NAS client registers for indications.
    pub fn attach_after(&self, delay: Duration) {
        *lock(&self.shared.attach_after) = Some(delay);
    }

    /// Emits pulse reports on the sync pulse stream while pulse generation is configured.
    pub fn emit_pulse_reports(&self, enabled: bool) {
        self.shared.pulse_reports.store(enabled, Ordering::SeqCst);
    }

    pub fn push(&self, role: ClientRole, event: &IndicationEvent) {
        self.shared.push_event(role, event);
    }

    pub fn push_raw(&self, role: ClientRole, raw: RawIndication) {
        self.shared.push(role, raw);
    }

    /// Closes the indication streams, pending receives return `None`.
    pub fn shutdown(&self) {
        lock(&self.shared.links).clear();
    }

    /// Calls the error callbacks registered by `role` clients.
    pub fn report_error(&self, role: ClientRole, err: TransportError) {
        for (callback_role, callback) in lock(&self.shared.error_callbacks).iter() {
            if *callback_role == role {
                callback(err.clone());
            }
        }
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        lock(&self.shared.requests).clone()
    }

    /// Sync pulse generation requests in the order they arrived.
    pub fn sync_pulse_requests(&self) -> Vec<SyncPulseRequest> {
        lock(&self.shared.requests)
            .iter()
            .filter_map(|recorded| match recorded.request {
                NasRequest::SetSyncPulseGen(request) => Some(request),
                _ => None,
            })
            .collect()
    }

    pub fn released(&self) -> Vec<ClientRole> {
        lock(&self.shared.released).clone()
    }

    pub fn is_generating_pulses(&self) -> bool {
        lock(&self.shared.pulse_generation).is_some()
    }
}

impl ServiceProvider for SimulatedModem {
    type Client = SimulatedClient;

    async fn connect(&self, role: ClientRole) -> Result<SimulatedClient, TransportError> {
        if lock(&self.shared.unavailable).contains(&role) {
            return Err(TransportError::ServiceUnavailable);
        }
        let rx = {
            let mut links = lock(&self.shared.links);
            let link = links.entry(role).or_insert_with(Link::new);
            match link.rx.take() {
                Some(rx) => rx,
                None => {
                    // A previous client took the receiver, start a fresh stream
                    let (tx, rx) = unbounded_channel();
                    link.tx = tx;
                    rx
                }
            }
        };
        Ok(SimulatedClient {
            role,
            shared: self.shared.clone(),
            rx: tokio::sync::Mutex::new(rx),
            released: AtomicBool::new(false),
        })
    }
}

pub struct SimulatedClient {
    role: ClientRole,
    shared: Arc<Shared>,
    rx: tokio::sync::Mutex<UnboundedReceiver<RawIndication>>,
    released: AtomicBool,
}

impl SimulatedClient {
    fn take_one(counter: &AtomicU32) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |count| count.checked_sub(1))
            .is_ok()
    }

    fn start_attach(&self) {
        let Some(delay) = *lock(&self.shared.attach_after) else {
            return;
        };
        let shared = self.shared.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            info!("Simulated modem attached to NR5G");
            shared.push_event(
                ClientRole::Nas,
                &IndicationEvent::ServingSystem(ServingSystem {
                    registration_state: 1,
                    cs_attach_state: 2,
                    ps_attach_state: 1,
                    selected_network: 2,
                    radio_if: vec![0x0C],
                    roaming_indicator: Some(1),
                    current_plmn: Some(Plmn {
                        mcc: 999,
                        mnc: 99,
                        description: "Simulated".to_owned(),
                    }),
                    ..Default::default()
                }),
            );
            shared.push_event(
                ClientRole::Nas,
                &IndicationEvent::SysInfo(SysInfo {
                    nr5g_srv_status: Some(2),
                    lte_srv_status: None,
                }),
            );
        });
    }

    fn configure_pulses(&self, request: SyncPulseRequest) {
        let previous = lock(&self.shared.pulse_generation).take();
        if let Some(previous) = previous {
            previous.cancel();
        }
        let report_period = request.report_period.unwrap_or(0);
        if request.is_stop()
            || report_period == 0
            || !self.shared.pulse_reports.load(Ordering::SeqCst)
        {
            return;
        }

        let token = CancellationToken::new();
        *lock(&self.shared.pulse_generation) = Some(token.clone());
        let shared = self.shared.clone();
        tokio::spawn(pulse_reports(shared, request, token));
    }
}

async fn pulse_reports(shared: Arc<Shared>, request: SyncPulseRequest, token: CancellationToken) {
    let period = Duration::from_millis(u64::from(request.report_period.unwrap_or(1)) * 10);
    let mut sfn = match request.start_sfn {
        Some(sfn) if sfn < 1024 => sfn,
        _ => 0,
    };
    let mut interval = tokio::time::interval(period);
    interval.tick().await;
    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            _ = interval.tick() => {}
        }
        let utc_time = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| elapsed.as_millis() as u64)
            .unwrap_or_default();
        let cxo = request.pulse_get_cxo_count == Some(true);
        let report = TimeSyncPulseReport {
            sfn: Some(sfn),
            utc_time: Some(utc_time),
            gps_time: Some(
                utc_time.saturating_sub(GPS_EPOCH_OFFSET_MS) + u64::from(LEAP_SECONDS) * 1000,
            ),
            nta: Some(0),
            nta_offset: Some(0),
            leapseconds: Some(LEAP_SECONDS),
            is_cxo_count_present: Some(cxo),
            cxo_count: cxo.then_some(utc_time.wrapping_mul(19_200)),
        };
        shared.push_event(ClientRole::SyncPulse, &IndicationEvent::TimeSyncPulseReport(report));
        sfn = (sfn + request.report_period.unwrap_or(1)) % 1024;
    }
}

impl IndicationDecoder for SimulatedClient {
    fn decode(&self, raw: &RawIndication) -> Result<IndicationEvent, DecodeError> {
        SimulatedCodec.decode(raw)
    }
}

impl NasClient for SimulatedClient {
    async fn send_request(
        &self,
        request: &NasRequest,
        timeout: Duration,
    ) -> Result<NasResponse, TransportError> {
        if self.released.load(Ordering::SeqCst) {
            return Err(TransportError::Released);
        }
        lock(&self.shared.requests).push(RecordedRequest {
            at: Instant::now(),
            role: self.role,
            request: request.clone(),
        });

        match request {
            NasRequest::IndicationRegister(_) => {
                if self.role == ClientRole::Nas {
                    self.start_attach();
                }
            }
            NasRequest::SetSyncPulseGen(pulse_request) => {
                if !pulse_request.is_stop() {
                    if Self::take_one(&self.shared.dropped_configures) {
                        tokio::time::sleep(timeout).await;
                        return Err(TransportError::Timeout(timeout));
                    }
                    if Self::take_one(&self.shared.rejected_configures) {
                        return Ok(NasResponse::failure(ERR_INTERNAL));
                    }
                }
                self.configure_pulses(*pulse_request);
            }
        }
        Ok(NasResponse::success())
    }

    async fn next_indication(&self) -> Option<RawIndication> {
        self.rx.lock().await.recv().await
    }

    fn register_error_callback(&self, callback: ErrorCallback) -> Result<(), TransportError> {
        lock(&self.shared.error_callbacks).push((self.role, callback));
        Ok(())
    }

    async fn release(&self) -> Result<(), TransportError> {
        if self.released.swap(true, Ordering::SeqCst) {
            return Err(TransportError::Released);
        }
        lock(&self.shared.released).push(self.role);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tns_common::config::SyncPulseConfig;
    use tns_common::indication::{LostFrameSync, MessageId};

    #[test]
    fn test_decode_unknown_and_garbage() {
        let raw = RawIndication {
            msg_id: MessageId(0x0999),
            payload: vec![7],
        };
        assert_eq!(
            SimulatedCodec.decode(&raw),
            Ok(IndicationEvent::Unhandled(MessageId(0x0999)))
        );

        let raw = RawIndication {
            msg_id: MessageId::NR5G_LOST_FRAME_SYNC,
            payload: vec![0x05],
        };
        let err = SimulatedCodec.decode(&raw).unwrap_err();
        assert_eq!(err.msg_id, MessageId::NR5G_LOST_FRAME_SYNC);
        assert_eq!(err.len, 1);

        let event = IndicationEvent::LostFrameSync(LostFrameSync {
            reason_code: Some(3),
        });
        let raw = SimulatedCodec::encode(&event).unwrap();
        assert_eq!(raw.msg_id, MessageId::NR5G_LOST_FRAME_SYNC);
        assert_eq!(SimulatedCodec.decode(&raw), Ok(event));
    }

    #[tokio::test]
    async fn test_requests_and_release() {
        let modem = SimulatedModem::new();
        modem.reject_configures(1);
        let client = modem.connect(ClientRole::SyncPulse).await.unwrap();
        let request = NasRequest::SetSyncPulseGen(SyncPulseRequest::from(
            &SyncPulseConfig::load_defaults(),
        ));
        let timeout = Duration::from_secs(1);

        assert_eq!(
            client.send_request(&request, timeout).await,
            Ok(NasResponse::failure(ERR_INTERNAL))
        );
        assert_eq!(client.send_request(&request, timeout).await, Ok(NasResponse::success()));
        assert_eq!(modem.sync_pulse_requests().len(), 2);

        assert_eq!(client.release().await, Ok(()));
        assert_eq!(client.release().await, Err(TransportError::Released));
        assert_eq!(
            client.send_request(&request, timeout).await,
            Err(TransportError::Released)
        );
        assert_eq!(modem.released(), vec![ClientRole::SyncPulse]);
    }

    #[tokio::test]
    async fn test_unavailable() {
        let modem = SimulatedModem::new();
        modem.set_unavailable(ClientRole::Nas);
        assert!(matches!(
            modem.connect(ClientRole::Nas).await,
            Err(TransportError::ServiceUnavailable)
        ));
        assert!(modem.connect(ClientRole::SyncPulse).await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_pulse_reports() {
        let modem = SimulatedModem::new();
        modem.emit_pulse_reports(true);
        let client = modem.connect(ClientRole::SyncPulse).await.unwrap();
        let config = SyncPulseConfig {
            start_sfn: 1020,
            pulse_get_cxo_count: true,
            ..SyncPulseConfig::load_defaults()
        };
        let request = NasRequest::SetSyncPulseGen(SyncPulseRequest::from(&config));
        client.send_request(&request, Duration::from_secs(1)).await.unwrap();
        assert!(modem.is_generating_pulses());

        let mut sfns = Vec::new();
        for _ in 0..2 {
            let raw = client.next_indication().await.unwrap();
            let IndicationEvent::TimeSyncPulseReport(report) = client.decode(&raw).unwrap() else {
                panic!("Expected a pulse report");
            };
            assert!(report.cxo_count().is_some());
            sfns.push(report.sfn.unwrap());
        }
        assert_eq!(sfns, vec![1020, 6]);

        let stop = NasRequest::SetSyncPulseGen(SyncPulseRequest::stop());
        client.send_request(&stop, Duration::from_secs(1)).await.unwrap();
        assert!(!modem.is_generating_pulses());
    }

    #[tokio::test]
    async fn test_shutdown_closes_streams() {
        let modem = SimulatedModem::new();
        let client = modem.connect(ClientRole::Nas).await.unwrap();
        modem.push(
            ClientRole::Nas,
            &IndicationEvent::SysInfo(SysInfo {
                nr5g_srv_status: Some(2),
                lte_srv_status: None,
            }),
        );
        modem.shutdown();
        assert!(client.next_indication().await.is_some());
        assert!(client.next_indication().await.is_none());
    }
}
