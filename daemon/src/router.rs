use std::sync::Arc;

use log::{debug, error, info};
use tns_common::indication::{
    IndicationEvent, IndicationKind, IndicationStream, LostFrameSync, OperatorName, ServiceStatus,
    ServingSystem, SigInfo, SysInfo, TimeSyncPulseReport, data_capability_name,
    nw_name_source_name, radio_if_name, registration_state_name,
};

use crate::gate::ReadinessGate;
use crate::transport::{IndicationDecoder, RawIndication};

/// Decodes indications and reports them. System info updates the readiness gate.
///
/// Nothing in here fails: undecodable indications are logged and dropped.
pub struct IndicationRouter {
    gate: Arc<ReadinessGate>,
}

impl IndicationRouter {
    pub fn new(gate: Arc<ReadinessGate>) -> Self {
        Self { gate }
    }

    /// Handles one raw indication received on `stream`.
    ///
    /// Both clients share the NAS service, so the sync pulse client also receives ordinary NAS
    /// indications. Indications that don't belong to `stream` are skipped without decoding.
    pub fn route<D: IndicationDecoder + ?Sized>(
        &self,
        stream: IndicationStream,
        raw: &RawIndication,
        decoder: &D,
    ) {
        let msg_id = raw.msg_id;
        match stream {
            IndicationStream::Nas => {
                info!("NAS Indication received: msg_id={msg_id}, len={}", raw.payload.len())
            }
            IndicationStream::SyncPulse => info!(
                "Sync Pulse Indication received: msg_id={msg_id}, len={}",
                raw.payload.len()
            ),
        }

        match IndicationKind::from_id(msg_id) {
            Some(kind) if kind.stream() == stream => {}
            Some(_) => {
                debug!("Ignoring indication {msg_id} on the {stream:?} stream");
                return;
            }
            None => {
                debug!("Unhandled indication: msg_id={msg_id}");
                return;
            }
        }

        match decoder.decode(raw) {
            Ok(event) => self.handle(event),
            Err(err) => error!("{err}"),
        }
    }

    pub fn handle(&self, event: IndicationEvent) {
        match event {
            IndicationEvent::SysInfo(sys_info) => self.sys_info(&sys_info),
            IndicationEvent::ServingSystem(serving_system) => log_serving_system(&serving_system),
            IndicationEvent::SigInfo(sig_info) => log_sig_info(&sig_info),
            IndicationEvent::OperatorName(operator_name) => log_operator_name(&operator_name),
            IndicationEvent::TimeSyncPulseReport(report) => log_pulse_report(&report),
            IndicationEvent::LostFrameSync(lost_sync) => log_lost_frame_sync(&lost_sync),
            IndicationEvent::Unhandled(msg_id) => {
                debug!("Unhandled indication: msg_id={msg_id}")
            }
        }
    }

    fn sys_info(&self, sys_info: &SysInfo) {
        if let Some(lte_status) = sys_info.lte_srv_status {
            info!("[LTE] Service Status: {}", ServiceStatus::from(lte_status));
        }
        // Without the NR5G TLV the modem says nothing about NR5G, leave the gate alone
        let Some(status) = sys_info.nr5g_status() else {
            return;
        };
        info!("[NR5G] Service Status: {status}");
        self.gate.set_ready(status == ServiceStatus::Service);
    }
}

fn log_serving_system(ss: &ServingSystem) {
    info!("=== Serving System Indication ===");
    info!(
        "  Registration State : {} ({})",
        ss.registration_state,
        registration_state_name(ss.registration_state)
    );
    info!("  CS Attach State    : {} (0=Unknown,1=Attached,2=Detached)", ss.cs_attach_state);
    info!("  PS Attach State    : {} (0=Unknown,1=Attached,2=Detached)", ss.ps_attach_state);
    info!("  Selected Network   : {} (0=Unknown,1=3GPP2,2=3GPP)", ss.selected_network);
    for (i, radio_if) in ss.radio_if.iter().enumerate() {
        info!("  Radio IF [{i}]       : 0x{radio_if:02X} ({})", radio_if_name(*radio_if));
    }
    if let Some(roaming) = ss.roaming_indicator {
        info!("  Roaming Indicator  : {roaming} (0=On/Roaming,1=Off/Home)");
    }
    if let Some(plmn) = &ss.current_plmn {
        info!("  PLMN MCC           : {}", plmn.mcc);
        info!("  PLMN MNC           : {}", plmn.mnc);
        info!("  Network Desc       : {}", plmn.description);
    }
    for (i, cap) in ss.data_capabilities.iter().flatten().enumerate() {
        info!("  Data Cap [{i}]       : 0x{cap:02X} ({})", data_capability_name(*cap));
    }
    if let Some(lac) = ss.lac {
        info!("  LAC                : {lac}");
    }
    if let Some(cell_id) = ss.cell_id {
        info!("  Cell ID            : {cell_id} (0x{cell_id:X})");
    }
    if let Some(tac) = ss.tac {
        info!("  TAC (LTE)          : {tac}");
    }
    if let Some(time_zone) = ss.time_zone {
        info!("  Time Zone          : {time_zone} (x15 min)");
    }
    if let Some(source) = ss.nw_name_source {
        info!("  NW Name Source     : {source} ({})", nw_name_source_name(source));
    }
    info!("=================================");
}

fn log_sig_info(sig_info: &SigInfo) {
    if let Some(lte) = sig_info.lte {
        info!("[LTE] RSSI : {}", lte.rssi);
        info!("[LTE] RSRQ : {}", lte.rsrq);
        info!("[LTE] RSRP : {}", lte.rsrp);
        info!("[LTE] SNR  : {}", lte.snr);
    }
    if let Some(nr5g) = sig_info.nr5g {
        info!("[NR5G] RSRP : {}", nr5g.rsrp);
        info!("[NR5G] RSRQ : {}", nr5g.rsrq);
        info!("[NR5G] SNR  : {}", nr5g.snr);
    }
}

fn log_operator_name(operator_name: &OperatorName) {
    if let Some(spn) = &operator_name.spn {
        info!("Operator SPN       : {spn}");
    }
    if let Some(plmn_name) = &operator_name.plmn_name {
        info!("Operator PLMN name : {plmn_name}");
    }
}

fn log_pulse_report(report: &TimeSyncPulseReport) {
    info!("=== NR5G Time Sync Pulse Report ===");
    if let Some(sfn) = report.sfn {
        info!("  SFN            : {sfn}");
    }
    if let Some(utc_time) = report.utc_time {
        info!("  UTC Time       : {utc_time} ms");
    }
    if let Some(utc) = report.utc_datetime() {
        info!("  UTC Time (str) : {} UTC", utc.format("%Y-%m-%d %H:%M:%S%.3f"));
    }
    if let Some(gps_time) = report.gps_time {
        info!("  GPS Time       : {gps_time} ms");
    }
    if let Some(nta) = report.nta {
        info!("  NTA            : {nta} Ts");
    }
    if let Some(nta_offset) = report.nta_offset {
        info!("  NTA Offset     : {nta_offset} Tc");
    }
    if let Some(leapseconds) = report.leapseconds {
        info!("  Leap Seconds   : {leapseconds}");
    }
    if let Some(cxo_count) = report.cxo_count() {
        info!("  CXO Count      : {cxo_count}");
    }
    info!("===================================");
}

fn log_lost_frame_sync(lost_sync: &LostFrameSync) {
    if let (Some(reason), Some(code)) = (lost_sync.reason(), lost_sync.reason_code) {
        error!("NR5G Lost Frame Sync: reason={} ({code})", reason.name());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tns_common::indication::MessageId;

    use crate::simulated::SimulatedCodec;
    use crate::transport::DecodeError;

    fn sys_info(status: u8) -> IndicationEvent {
        IndicationEvent::SysInfo(SysInfo {
            nr5g_srv_status: Some(status),
            lte_srv_status: None,
        })
    }

    #[test]
    fn test_sys_info_transitions() {
        let gate = Arc::new(ReadinessGate::new());
        let router = IndicationRouter::new(gate.clone());
        let mut rx = gate.subscribe();

        router.handle(sys_info(2));
        assert!(gate.is_ready());
        assert!(rx.has_changed().unwrap());
        rx.borrow_and_update();

        router.handle(sys_info(2));
        assert!(!rx.has_changed().unwrap());

        router.handle(sys_info(1));
        assert!(!gate.is_ready());
        assert!(rx.has_changed().unwrap());
        rx.borrow_and_update();

        router.handle(sys_info(0));
        assert!(!rx.has_changed().unwrap());

        router.handle(IndicationEvent::SysInfo(SysInfo::default()));
        assert!(!rx.has_changed().unwrap());
        assert!(!gate.is_ready());
    }

    #[test]
    fn test_unknown_indication() {
        let gate = Arc::new(ReadinessGate::new());
        gate.set_ready(true);
        let router = IndicationRouter::new(gate.clone());
        let rx = gate.subscribe();

        let raw = RawIndication {
            msg_id: MessageId(0x7777),
            payload: vec![1, 2, 3],
        };
        router.route(IndicationStream::Nas, &raw, &SimulatedCodec);
        router.handle(IndicationEvent::Unhandled(MessageId(0x7777)));
        assert!(gate.is_ready());
        assert!(!rx.has_changed().unwrap());
    }

    #[test]
    fn test_route_decodes() {
        let gate = Arc::new(ReadinessGate::new());
        let router = IndicationRouter::new(gate.clone());

        let raw = SimulatedCodec::encode(&sys_info(2)).unwrap();
        // System info on the sync pulse stream is not for us
        router.route(IndicationStream::SyncPulse, &raw, &SimulatedCodec);
        assert!(!gate.is_ready());

        router.route(IndicationStream::Nas, &raw, &SimulatedCodec);
        assert!(gate.is_ready());
    }

    #[test]
    fn test_decode_failure_is_dropped() {
        struct FailingDecoder;

        impl IndicationDecoder for FailingDecoder {
            fn decode(&self, raw: &RawIndication) -> Result<IndicationEvent, DecodeError> {
                Err(DecodeError {
                    msg_id: raw.msg_id,
                    len: raw.payload.len(),
                    reason: "truncated".to_owned(),
                })
            }
        }

        let gate = Arc::new(ReadinessGate::new());
        let router = IndicationRouter::new(gate.clone());
        let raw = RawIndication {
            msg_id: MessageId::SYS_INFO,
            payload: vec![0xff],
        };
        router.route(IndicationStream::Nas, &raw, &FailingDecoder);
        router.route(IndicationStream::Nas, &raw, &SimulatedCodec);
        assert!(!gate.is_ready());
    }

    #[test]
    fn test_pulse_indications() {
        let gate = Arc::new(ReadinessGate::new());
        let router = IndicationRouter::new(gate.clone());
        for event in [
            IndicationEvent::TimeSyncPulseReport(TimeSyncPulseReport {
                sfn: Some(12),
                utc_time: Some(1_735_037_303_250),
                is_cxo_count_present: Some(true),
                cxo_count: Some(123456),
                ..Default::default()
            }),
            IndicationEvent::LostFrameSync(LostFrameSync {
                reason_code: Some(4),
            }),
        ] {
            let raw = SimulatedCodec::encode(&event).unwrap();
            router.route(IndicationStream::SyncPulse, &raw, &SimulatedCodec);
        }
        assert!(!gate.is_ready());
    }
}
