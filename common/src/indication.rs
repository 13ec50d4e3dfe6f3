use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Numeric identifier of a NAS request, response or indication.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, Serialize, Deserialize)]
pub struct MessageId(pub u16);

impl MessageId {
    pub const INDICATION_REGISTER: Self = Self(0x0003);
    pub const SERVING_SYSTEM: Self = Self(0x0024);
    pub const OPERATOR_NAME_DATA: Self = Self(0x003A);
    pub const SYS_INFO: Self = Self(0x004E);
    pub const SIG_INFO: Self = Self(0x0051);
    // The NR5G sync pulse messages are vendor extensions, their ids come from the modem's NAS
    // service definition.
    pub const SET_NR5G_SYNC_PULSE_GEN: Self = Self(0x00F0);
    pub const NR5G_TIME_SYNC_PULSE_REPORT: Self = Self(0x00F1);
    pub const NR5G_LOST_FRAME_SYNC: Self = Self(0x00F2);
}

impl core::fmt::Display for MessageId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "0x{:04X}", self.0)
    }
}

/// The indication streams of the modem.
///
/// Both streams come from the same NAS service. Sync pulse indications are delivered to the
/// client which configured pulse generation, the rest goes to the NAS client.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum IndicationStream {
    Nas,
    SyncPulse,
}

/// Indications this crate knows how to decode.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum IndicationKind {
    ServingSystem,
    SysInfo,
    SigInfo,
    OperatorName,
    TimeSyncPulseReport,
    LostFrameSync,
}

impl IndicationKind {
    pub fn from_id(msg_id: MessageId) -> Option<Self> {
        match msg_id {
            MessageId::SERVING_SYSTEM => Some(Self::ServingSystem),
            MessageId::SYS_INFO => Some(Self::SysInfo),
            MessageId::SIG_INFO => Some(Self::SigInfo),
            MessageId::OPERATOR_NAME_DATA => Some(Self::OperatorName),
            MessageId::NR5G_TIME_SYNC_PULSE_REPORT => Some(Self::TimeSyncPulseReport),
            MessageId::NR5G_LOST_FRAME_SYNC => Some(Self::LostFrameSync),
            _ => None,
        }
    }

    pub fn message_id(&self) -> MessageId {
        match self {
            Self::ServingSystem => MessageId::SERVING_SYSTEM,
            Self::SysInfo => MessageId::SYS_INFO,
            Self::SigInfo => MessageId::SIG_INFO,
            Self::OperatorName => MessageId::OPERATOR_NAME_DATA,
            Self::TimeSyncPulseReport => MessageId::NR5G_TIME_SYNC_PULSE_REPORT,
            Self::LostFrameSync => MessageId::NR5G_LOST_FRAME_SYNC,
        }
    }

    /// The stream on which this indication is handled.
    pub fn stream(&self) -> IndicationStream {
        match self {
            Self::TimeSyncPulseReport | Self::LostFrameSync => IndicationStream::SyncPulse,
            _ => IndicationStream::Nas,
        }
    }
}

/// A decoded indication.
#[derive(Clone, Debug, PartialEq)]
pub enum IndicationEvent {
    ServingSystem(ServingSystem),
    SysInfo(SysInfo),
    SigInfo(SigInfo),
    OperatorName(OperatorName),
    TimeSyncPulseReport(TimeSyncPulseReport),
    LostFrameSync(LostFrameSync),
    Unhandled(MessageId),
}

impl IndicationEvent {
    pub fn message_id(&self) -> MessageId {
        match self {
            Self::ServingSystem(_) => MessageId::SERVING_SYSTEM,
            Self::SysInfo(_) => MessageId::SYS_INFO,
            Self::SigInfo(_) => MessageId::SIG_INFO,
            Self::OperatorName(_) => MessageId::OPERATOR_NAME_DATA,
            Self::TimeSyncPulseReport(_) => MessageId::NR5G_TIME_SYNC_PULSE_REPORT,
            Self::LostFrameSync(_) => MessageId::NR5G_LOST_FRAME_SYNC,
            Self::Unhandled(msg_id) => *msg_id,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Plmn {
    pub mcc: u16,
    pub mnc: u16,
    pub description: String,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ServingSystem {
    pub registration_state: u8,
    /// 0 = unknown, 1 = attached, 2 = detached
    pub cs_attach_state: u8,
    pub ps_attach_state: u8,
    /// 0 = unknown, 1 = 3GPP2, 2 = 3GPP
    pub selected_network: u8,
    pub radio_if: Vec<u8>,
    /// 0 = roaming, 1 = home
    pub roaming_indicator: Option<u8>,
    pub current_plmn: Option<Plmn>,
    pub data_capabilities: Option<Vec<u8>>,
    pub lac: Option<u16>,
    pub cell_id: Option<u32>,
    pub tac: Option<u16>,
    /// Offset from UTC in units of 15 minutes.
    pub time_zone: Option<i8>,
    pub nw_name_source: Option<u8>,
}

pub fn registration_state_name(raw: u8) -> &'static str {
    match raw {
        0 => "NOT_REGISTERED",
        1 => "REGISTERED",
        2 => "NOT_REGISTERED_SEARCHING",
        3 => "REGISTRATION_DENIED",
        4 => "REGISTRATION_UNKNOWN",
        _ => "UNKNOWN",
    }
}

pub fn radio_if_name(raw: u8) -> &'static str {
    match raw {
        0x00 => "NO_SVC",
        0x01 => "CDMA_1X",
        0x02 => "CDMA_1xEVDO",
        0x04 => "GSM",
        0x05 => "UMTS",
        0x08 => "LTE",
        0x09 => "TDSCDMA",
        0x0C => "NR5G",
        _ => "Unknown",
    }
}

pub fn data_capability_name(raw: u8) -> &'static str {
    match raw {
        0x01 => "GPRS",
        0x02 => "EDGE",
        0x03 => "HSDPA",
        0x04 => "HSUPA",
        0x05 => "WCDMA",
        0x06 => "CDMA",
        0x07 => "EVDO_REV_0",
        0x08 => "EVDO_REV_A",
        0x09 => "GSM",
        0x0A => "EVDO_REV_B",
        0x0B => "LTE",
        0x0C => "HSDPA+",
        0x0D => "DC_HSDPA+",
        _ => "Unknown",
    }
}

pub fn nw_name_source_name(raw: u8) -> &'static str {
    match raw {
        0 => "UNKNOWN",
        1 => "OPL_PNN",
        2 => "CPHS_ONS",
        3 => "NITZ",
        4 => "SE13",
        5 => "MCC_MNC",
        6 => "SPN",
        _ => "Unknown",
    }
}

/// Service status reported in the system info indication.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ServiceStatus {
    NoService,
    Limited,
    Service,
    Other(u8),
}

impl From<u8> for ServiceStatus {
    fn from(raw: u8) -> Self {
        match raw {
            0 => Self::NoService,
            1 => Self::Limited,
            2 => Self::Service,
            other => Self::Other(other),
        }
    }
}

impl core::fmt::Display for ServiceStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::NoService => write!(f, "0 (NoSrv)"),
            Self::Limited => write!(f, "1 (Limited)"),
            Self::Service => write!(f, "2 (Srv)"),
            Self::Other(raw) => write!(f, "{raw}"),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SysInfo {
    pub nr5g_srv_status: Option<u8>,
    pub lte_srv_status: Option<u8>,
}

impl SysInfo {
    pub fn nr5g_status(&self) -> Option<ServiceStatus> {
        self.nr5g_srv_status.map(ServiceStatus::from)
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct LteSignal {
    pub rssi: i16,
    pub rsrq: i16,
    pub rsrp: i16,
    pub snr: i16,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Nr5gSignal {
    pub rsrp: i16,
    pub rsrq: i16,
    pub snr: i16,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SigInfo {
    pub lte: Option<LteSignal>,
    pub nr5g: Option<Nr5gSignal>,
}

/// Operator names, already converted from GSM 7-bit/UCS2 by the transport.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct OperatorName {
    pub spn: Option<String>,
    pub plmn_name: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TimeSyncPulseReport {
    pub sfn: Option<u32>,
    /// Milliseconds since the Unix epoch.
    pub utc_time: Option<u64>,
    /// Milliseconds since the GPS epoch.
    pub gps_time: Option<u64>,
    /// Timing advance, in Ts.
    pub nta: Option<i32>,
    /// Timing advance offset, in Tc.
    pub nta_offset: Option<u32>,
    pub leapseconds: Option<u32>,
    pub is_cxo_count_present: Option<bool>,
    pub cxo_count: Option<u64>,
}

impl TimeSyncPulseReport {
    pub fn utc_datetime(&self) -> Option<DateTime<Utc>> {
        self.utc_time
            .and_then(|millis| i64::try_from(millis).ok())
            .and_then(DateTime::from_timestamp_millis)
    }

    /// The CXO count, only when the modem flagged it as present.
    pub fn cxo_count(&self) -> Option<u64> {
        if self.is_cxo_count_present == Some(true) {
            self.cxo_count
        } else {
            None
        }
    }
}

/// Why the modem lost NR5G frame synchronization.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum LostSyncReason {
    /// Radio link failure
    Rlf,
    Handover,
    Reselection,
    /// Out of service
    Oos,
    StaleSib9,
    NoSib9,
    Unknown,
}

impl LostSyncReason {
    pub fn from_code(code: u32) -> Self {
        match code {
            0 => Self::Rlf,
            1 => Self::Handover,
            2 => Self::Reselection,
            3 => Self::Oos,
            4 => Self::StaleSib9,
            5 => Self::NoSib9,
            _ => Self::Unknown,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Rlf => "RLF",
            Self::Handover => "HANDOVER",
            Self::Reselection => "RESELECTION",
            Self::Oos => "OOS",
            Self::StaleSib9 => "STALE_SIB9",
            Self::NoSib9 => "NO_SIB9",
            Self::Unknown => "UNKNOWN",
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct LostFrameSync {
    pub reason_code: Option<u32>,
}

impl LostFrameSync {
    pub fn reason(&self) -> Option<LostSyncReason> {
        self.reason_code.map(LostSyncReason::from_code)
    }
}
