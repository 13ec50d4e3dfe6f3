use serde::{Deserialize, Serialize};

use crate::config::{PulseAlignType, PulseTriggerAction, SyncPulseConfig};
use crate::indication::MessageId;

/// Request to configure NR5G sync pulse generation.
///
/// Only the pulse period is mandatory, a request carrying nothing but `pulse_period = 0` stops
/// pulse generation.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct SyncPulseRequest {
    pub pulse_period: u32,
    pub start_sfn: Option<u32>,
    pub report_period: Option<u32>,
    pub pulse_align_type: Option<PulseAlignType>,
    pub pulse_trigger_action: Option<PulseTriggerAction>,
    pub pulse_get_cxo_count: Option<bool>,
}

impl SyncPulseRequest {
    pub fn stop() -> Self {
        Self::default()
    }

    pub fn is_stop(&self) -> bool {
        self.pulse_period == 0
    }
}

impl From<&SyncPulseConfig> for SyncPulseRequest {
    fn from(config: &SyncPulseConfig) -> Self {
        Self {
            pulse_period: config.pulse_period,
            start_sfn: Some(config.start_sfn),
            report_period: Some(config.report_period),
            pulse_align_type: Some(config.pulse_align_type),
            pulse_trigger_action: Some(config.pulse_trigger_action),
            pulse_get_cxo_count: Some(config.pulse_get_cxo_count),
        }
    }
}

/// Which indications a client subscribes to.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct IndicationRegistration {
    pub sys_info: bool,
    pub sig_info: bool,
    pub serving_system: bool,
    pub operator_name_data: bool,
    pub nr5g_time_sync_pulse_report: bool,
    pub nr5g_lost_frame_sync: bool,
}

impl IndicationRegistration {
    pub fn all() -> Self {
        Self {
            sys_info: true,
            sig_info: true,
            serving_system: true,
            operator_name_data: true,
            nr5g_time_sync_pulse_report: true,
            nr5g_lost_frame_sync: true,
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum NasRequest {
    IndicationRegister(IndicationRegistration),
    SetSyncPulseGen(SyncPulseRequest),
}

impl NasRequest {
    pub fn message_id(&self) -> MessageId {
        match self {
            Self::IndicationRegister(_) => MessageId::INDICATION_REGISTER,
            Self::SetSyncPulseGen(_) => MessageId::SET_NR5G_SYNC_PULSE_GEN,
        }
    }
}

/// Result of a request as reported by the modem. The transport may succeed while the modem
/// rejects the request, both have to be checked.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct NasResponse {
    /// 0 = success, 1 = failure
    pub result: u16,
    pub error: u16,
}

impl NasResponse {
    pub const RESULT_SUCCESS: u16 = 0;
    pub const RESULT_FAILURE: u16 = 1;

    pub fn success() -> Self {
        Self {
            result: Self::RESULT_SUCCESS,
            error: 0,
        }
    }

    pub fn failure(error: u16) -> Self {
        Self {
            result: Self::RESULT_FAILURE,
            error,
        }
    }

    pub fn is_success(&self) -> bool {
        self.result == Self::RESULT_SUCCESS
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_from_config() {
        let config = SyncPulseConfig {
            pulse_period: 20,
            start_sfn: 100,
            report_period: 0,
            pulse_align_type: PulseAlignType::UtcSecondBoundary,
            pulse_trigger_action: PulseTriggerAction::Skip,
            pulse_get_cxo_count: true,
        };
        let request = SyncPulseRequest::from(&config);
        assert_eq!(request.pulse_period, 20);
        assert_eq!(request.start_sfn, Some(100));
        assert_eq!(request.report_period, Some(0));
        assert_eq!(request.pulse_align_type, Some(PulseAlignType::UtcSecondBoundary));
        assert_eq!(request.pulse_trigger_action, Some(PulseTriggerAction::Skip));
        assert_eq!(request.pulse_get_cxo_count, Some(true));
        assert!(!request.is_stop());
    }

    #[test]
    fn test_stop_request() {
        let stop = SyncPulseRequest::stop();
        assert!(stop.is_stop());
        assert_eq!(stop.start_sfn, None);
        assert_eq!(
            NasRequest::SetSyncPulseGen(stop).message_id(),
            MessageId::SET_NR5G_SYNC_PULSE_GEN
        );
    }

    #[test]
    fn test_response() {
        assert!(NasResponse::success().is_success());
        assert!(!NasResponse::failure(0x1A).is_success());
    }
}
