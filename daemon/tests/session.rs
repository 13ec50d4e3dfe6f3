use std::time::Duration;

use tns_common::config::{PulseAlignType, SyncPulseConfig};
use tns_common::request::{IndicationRegistration, NasRequest, SyncPulseRequest};
use tns_daemon::configurator::{ConfiguratorSettings, ConfiguratorState, ExhaustionPolicy};
use tns_daemon::error::Error;
use tns_daemon::simulated::SimulatedModem;
use tns_daemon::supervisor::{SessionReport, Supervisor, SupervisorSettings};
use tns_daemon::transport::{ClientRole, TransportError};
use tokio::sync::oneshot;
use tokio::time::Instant;

const CONFIG: &str = "\
# deployment overrides
pulse_period=20
start_sfn=0x100
report_period=5
pulse_align_type=1
pulse_get_cxo_count=1
";

fn attached_modem() -> SimulatedModem {
    let modem = SimulatedModem::new();
    modem.attach_after(Duration::from_secs(1));
    modem.emit_pulse_reports(true);
    modem
}

async fn wait_for_configure(modem: &SimulatedModem) {
    while modem.sync_pulse_requests().is_empty() {
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
}

#[tokio::test(start_paused = true)]
async fn test_session_end_to_end() {
    let config = SyncPulseConfig::load_overrides(CONFIG.as_bytes(), SyncPulseConfig::default());
    assert_eq!(config.start_sfn, 256);
    assert_eq!(config.pulse_align_type, PulseAlignType::UtcSecondBoundary);

    let modem = attached_modem();
    let supervisor = Supervisor::new(modem.clone(), config, SupervisorSettings::default());
    let (stop_tx, stop_rx) = oneshot::channel::<()>();
    let start = Instant::now();
    let driver = async {
        wait_for_configure(&modem).await;
        assert!(modem.is_generating_pulses());
        tokio::time::sleep(Duration::from_millis(500)).await;
        stop_tx.send(()).unwrap();
    };
    let stop = async {
        let _ = stop_rx.await;
    };

    let (report, ()) = tokio::join!(supervisor.run(stop), driver);
    assert_eq!(
        report,
        Ok(SessionReport {
            configurator_state: ConfiguratorState::Configured,
            stop_requested: true,
            workers_joined: true,
        })
    );

    let requests = modem.requests();
    assert_eq!(requests[0].role, ClientRole::Nas);
    assert_eq!(
        requests[0].request,
        NasRequest::IndicationRegister(IndicationRegistration::all())
    );
    let configure = requests
        .iter()
        .find(|recorded| matches!(recorded.request, NasRequest::SetSyncPulseGen(_)))
        .unwrap();
    assert_eq!(configure.role, ClientRole::SyncPulse);
    assert!(configure.at - start >= Duration::from_secs(1));

    let pulse_requests = modem.sync_pulse_requests();
    assert_eq!(pulse_requests.len(), 2);
    assert_eq!(pulse_requests[0], SyncPulseRequest::from(&config));
    assert_eq!(pulse_requests[0].pulse_period, 20);
    assert_eq!(pulse_requests[0].start_sfn, Some(256));
    assert_eq!(pulse_requests[1].pulse_period, 0);
    assert!(!modem.is_generating_pulses());

    assert_eq!(modem.released(), vec![ClientRole::SyncPulse, ClientRole::Nas]);
}

#[tokio::test(start_paused = true)]
async fn test_service_unavailable() {
    let modem = SimulatedModem::new();
    modem.set_unavailable(ClientRole::SyncPulse);
    let supervisor = Supervisor::new(
        modem.clone(),
        SyncPulseConfig::default(),
        SupervisorSettings::default(),
    );

    let result = supervisor.run(std::future::pending()).await;
    assert_eq!(
        result,
        Err(Error::ServiceUnavailable(TransportError::ServiceUnavailable))
    );
    assert!(modem.requests().is_empty());
    assert_eq!(modem.released(), vec![ClientRole::Nas]);
}

#[tokio::test(start_paused = true)]
async fn test_stop_before_service() {
    let modem = SimulatedModem::new();
    let supervisor = Supervisor::new(
        modem.clone(),
        SyncPulseConfig::default(),
        SupervisorSettings::default(),
    );

    let report = supervisor
        .run(tokio::time::sleep(Duration::from_secs(12)))
        .await
        .unwrap();
    assert_eq!(report.configurator_state, ConfiguratorState::Stopped);
    assert!(report.stop_requested);
    assert!(report.workers_joined);
    // Cleanup stops pulse generation even if it was never configured
    assert_eq!(modem.sync_pulse_requests(), vec![SyncPulseRequest::stop()]);
    assert_eq!(modem.released(), vec![ClientRole::SyncPulse, ClientRole::Nas]);
}

#[tokio::test(start_paused = true)]
async fn test_service_down_ends_session() {
    let modem = attached_modem();
    let supervisor = Supervisor::new(
        modem.clone(),
        SyncPulseConfig::default(),
        SupervisorSettings::default(),
    );
    let driver = async {
        wait_for_configure(&modem).await;
        modem.report_error(ClientRole::Nas, TransportError::Other(-1));
        assert!(!supervisor.cancellation_token().is_cancelled());
        modem.report_error(ClientRole::Nas, TransportError::ServiceDown);
    };

    let (report, ()) = tokio::join!(supervisor.run(std::future::pending()), driver);
    let report = report.unwrap();
    assert_eq!(report.configurator_state, ConfiguratorState::Configured);
    assert!(!report.stop_requested);
    assert!(modem.sync_pulse_requests()[1].is_stop());
    assert_eq!(modem.released(), vec![ClientRole::SyncPulse, ClientRole::Nas]);
}

#[tokio::test(start_paused = true)]
async fn test_degraded_session_keeps_running() {
    let modem = attached_modem();
    modem.reject_configures(3);
    let supervisor = Supervisor::new(
        modem.clone(),
        SyncPulseConfig::default(),
        SupervisorSettings::default(),
    );

    let report = supervisor
        .run(tokio::time::sleep(Duration::from_secs(30)))
        .await
        .unwrap();
    assert_eq!(report.configurator_state, ConfiguratorState::DegradedRunning);
    assert!(report.stop_requested);
    // Three attempts and the stop request
    assert_eq!(modem.sync_pulse_requests().len(), 4);
}

#[tokio::test(start_paused = true)]
async fn test_exhaustion_ends_session() {
    let modem = attached_modem();
    modem.reject_configures(3);
    let settings = SupervisorSettings {
        configurator: ConfiguratorSettings {
            on_exhausted: ExhaustionPolicy::Shutdown,
            ..Default::default()
        },
        ..Default::default()
    };
    let supervisor = Supervisor::new(modem.clone(), SyncPulseConfig::default(), settings);

    let result = supervisor.run(std::future::pending()).await;
    assert_eq!(result, Err(Error::RetryExhausted(3)));
    let pulse_requests = modem.sync_pulse_requests();
    assert_eq!(pulse_requests.len(), 4);
    assert!(pulse_requests[3].is_stop());
    assert_eq!(modem.released(), vec![ClientRole::SyncPulse, ClientRole::Nas]);
}

#[tokio::test(start_paused = true)]
async fn test_respawned_session() {
    let modem = attached_modem();
    for _ in 0..2 {
        let supervisor = Supervisor::new(
            modem.clone(),
            SyncPulseConfig::default(),
            SupervisorSettings::default(),
        );
        let report = supervisor
            .run(tokio::time::sleep(Duration::from_secs(3)))
            .await
            .unwrap();
        assert_eq!(report.configurator_state, ConfiguratorState::Configured);
    }
    let pulse_requests = modem.sync_pulse_requests();
    assert_eq!(pulse_requests.len(), 4);
    assert_eq!(
        pulse_requests.iter().filter(|request| request.is_stop()).count(),
        2
    );
}
