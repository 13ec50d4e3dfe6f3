use std::sync::Arc;
use std::time::Duration;

use log::{error, info, warn};
use tns_common::config::SyncPulseConfig;
use tns_common::request::{NasRequest, SyncPulseRequest};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::gate::{READINESS_POLL_INTERVAL, ReadinessGate};
use crate::transport::{NasClient, exchange};

pub const MAX_CONFIGURE_ATTEMPTS: u8 = 3;
pub const RETRY_BACKOFF: Duration = Duration::from_secs(3);
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(50);

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u8,
    /// Delay between a failed attempt and the next one.
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: MAX_CONFIGURE_ATTEMPTS,
            backoff: RETRY_BACKOFF,
        }
    }
}

/// What to do once every configuration attempt failed.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum ExhaustionPolicy {
    /// Keep listening for indications without sync pulses.
    #[default]
    KeepRunning,
    /// End the session.
    Shutdown,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ConfiguratorSettings {
    pub retry: RetryPolicy,
    pub on_exhausted: ExhaustionPolicy,
    pub poll_interval: Duration,
    pub request_timeout: Duration,
}

impl Default for ConfiguratorSettings {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            on_exhausted: ExhaustionPolicy::default(),
            poll_interval: READINESS_POLL_INTERVAL,
            request_timeout: REQUEST_TIMEOUT,
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ConfiguratorState {
    WaitingForReadiness,
    Configuring { attempt: u8 },
    Configured,
    /// All attempts failed, the session goes on without sync pulses.
    DegradedRunning,
    Stopping,
    Stopped,
}

/// Configures sync pulse generation once NR5G service is available.
///
/// Runs as an explicit state machine, the current state is observable through
/// [`PulseConfigurator::subscribe_state`].
pub struct PulseConfigurator<C: NasClient> {
    client: Arc<C>,
    config: SyncPulseConfig,
    gate: Arc<ReadinessGate>,
    cancel: CancellationToken,
    settings: ConfiguratorSettings,
    state: watch::Sender<ConfiguratorState>,
}

impl<C: NasClient> PulseConfigurator<C> {
    pub fn new(
        client: Arc<C>,
        config: SyncPulseConfig,
        gate: Arc<ReadinessGate>,
        cancel: CancellationToken,
        settings: ConfiguratorSettings,
    ) -> Self {
        let (state, _) = watch::channel(ConfiguratorState::WaitingForReadiness);
        Self {
            client,
            config,
            gate,
            cancel,
            settings,
            state,
        }
    }

    pub fn subscribe_state(&self) -> watch::Receiver<ConfiguratorState> {
        self.state.subscribe()
    }

    pub fn state(&self) -> ConfiguratorState {
        *self.state.borrow()
    }

    /// Drives the state machine until the session is cancelled.
    ///
    /// Returns how configuration ended: `Configured`, `DegradedRunning`, or `Stopped` when
    /// cancelled before configuration finished. Leaves the machine in `Stopping` or `Stopped`,
    /// [`PulseConfigurator::stop`] completes the shutdown.
    pub async fn run(&self) -> ConfiguratorState {
        let mut state = ConfiguratorState::WaitingForReadiness;
        let mut outcome = ConfiguratorState::Stopped;
        info!("Waiting for NR5G service to become available...");
        loop {
            self.state.send_replace(state);
            match state {
                ConfiguratorState::Configured | ConfiguratorState::DegradedRunning => {
                    outcome = state;
                }
                ConfiguratorState::Stopping | ConfiguratorState::Stopped => return outcome,
                _ => {}
            }
            state = self.next_state(state).await;
        }
    }

    /// Runs the actions of `state` and returns the state that follows.
    pub async fn next_state(&self, state: ConfiguratorState) -> ConfiguratorState {
        match state {
            ConfiguratorState::WaitingForReadiness => {
                if self.gate.wait_until_ready(self.settings.poll_interval, &self.cancel).await {
                    info!("NR5G service ready, configuring sync pulse generation");
                    ConfiguratorState::Configuring { attempt: 1 }
                } else {
                    info!("Stopped before NR5G service became available");
                    ConfiguratorState::Stopped
                }
            }
            ConfiguratorState::Configuring { attempt } => self.configure(attempt).await,
            ConfiguratorState::Configured | ConfiguratorState::DegradedRunning => {
                self.cancel.cancelled().await;
                ConfiguratorState::Stopping
            }
            ConfiguratorState::Stopping => {
                let _ = send_stop(&*self.client, self.settings.request_timeout).await;
                ConfiguratorState::Stopped
            }
            ConfiguratorState::Stopped => ConfiguratorState::Stopped,
        }
    }

    async fn configure(&self, attempt: u8) -> ConfiguratorState {
        if self.cancel.is_cancelled() {
            return ConfiguratorState::Stopped;
        }
        let RetryPolicy {
            max_attempts,
            backoff,
        } = self.settings.retry;
        if send_configure(&*self.client, &self.config, self.settings.request_timeout)
            .await
            .is_ok()
        {
            return ConfiguratorState::Configured;
        }

        if attempt >= max_attempts {
            error!("Sync pulse configuration failed after {max_attempts} attempts");
            match self.settings.on_exhausted {
                ExhaustionPolicy::KeepRunning => warn!("Running without sync pulse generation"),
                ExhaustionPolicy::Shutdown => {
                    error!("Ending the session without sync pulse generation");
                    self.cancel.cancel();
                }
            }
            return ConfiguratorState::DegradedRunning;
        }

        warn!(
            "Sync pulse config attempt {attempt}/{max_attempts} failed, retrying in {}s...",
            backoff.as_secs()
        );
        tokio::select! {
            _ = self.cancel.cancelled() => ConfiguratorState::Stopped,
            _ = tokio::time::sleep(backoff) => {
                ConfiguratorState::Configuring { attempt: attempt + 1 }
            }
        }
    }

    /// Asks the modem to stop pulse generation, whatever the current state is.
    ///
    /// Failures are logged only, shutdown goes on regardless.
    pub async fn stop(&self) {
        self.state.send_replace(ConfiguratorState::Stopping);
        let next = self.next_state(ConfiguratorState::Stopping).await;
        self.state.send_replace(next);
    }
}

/// Sends the sync pulse configuration.
pub async fn send_configure<C: NasClient>(
    client: &C,
    config: &SyncPulseConfig,
    timeout: Duration,
) -> crate::Result<()> {
    info!("Setting NR5G sync pulse generation...");
    info!("  pulse_period        = {} (x10ms)", config.pulse_period);
    info!("  start_sfn           = {}", config.start_sfn);
    info!("  report_period       = {} (x10ms)", config.report_period);
    info!(
        "  pulse_align_type    = {} ({})",
        config.pulse_align_type as u8,
        config.pulse_align_type.name()
    );
    info!(
        "  pulse_trigger_action = {} ({})",
        config.pulse_trigger_action as u8,
        config.pulse_trigger_action.name()
    );
    info!("  pulse_get_cxo_count = {}", u8::from(config.pulse_get_cxo_count));

    let request = NasRequest::SetSyncPulseGen(SyncPulseRequest::from(config));
    exchange(client, &request, timeout)
        .await
        .inspect_err(|err| error!("SET_NR5G_SYNC_PULSE_GEN failed: {err}"))?;
    info!("NR5G sync pulse generation configured successfully");
    Ok(())
}

/// Disables sync pulse generation, a request with a zero pulse period.
pub async fn send_stop<C: NasClient>(client: &C, timeout: Duration) -> crate::Result<()> {
    info!("Stopping NR5G sync pulse generation...");
    let request = NasRequest::SetSyncPulseGen(SyncPulseRequest::stop());
    exchange(client, &request, timeout)
        .await
        .inspect_err(|err| error!("Failed to stop sync pulse generation: {err}"))?;
    info!("NR5G sync pulse generation stopped");
    Ok(())
}
