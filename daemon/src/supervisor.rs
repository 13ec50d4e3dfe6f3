use std::io::BufRead;
use std::sync::Arc;
use std::time::Duration;

use log::{error, info, warn};
use tns_common::config::SyncPulseConfig;
use tns_common::request::IndicationRegistration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::configurator::{
    ConfiguratorSettings, ConfiguratorState, ExhaustionPolicy, PulseConfigurator,
};
use crate::error::Error;
use crate::gate::ReadinessGate;
use crate::listener::Listener;
use crate::router::IndicationRouter;
use crate::transport::{ClientRole, NasClient, ServiceProvider, TransportError};

pub const JOIN_TIMEOUT: Duration = Duration::from_secs(10);
/// Delay before a new session when respawning.
pub const RESPAWN_DELAY: Duration = Duration::from_secs(5);

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct SupervisorSettings {
    pub configurator: ConfiguratorSettings,
    pub registration: IndicationRegistration,
    /// How long to wait for both workers after cancellation.
    pub join_timeout: Duration,
}

impl Default for SupervisorSettings {
    fn default() -> Self {
        Self {
            configurator: ConfiguratorSettings::default(),
            registration: IndicationRegistration::all(),
            join_timeout: JOIN_TIMEOUT,
        }
    }
}

/// How a session ended.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct SessionReport {
    /// `Configured`, `DegradedRunning` or `Stopped` if configuration never finished.
    pub configurator_state: ConfiguratorState,
    /// The stop trigger fired, as opposed to the session ending on its own.
    pub stop_requested: bool,
    /// Both workers stopped within the join timeout.
    pub workers_joined: bool,
}

/// Owns one session: both clients, the readiness gate and the two workers.
pub struct Supervisor<P: ServiceProvider> {
    provider: P,
    config: SyncPulseConfig,
    settings: SupervisorSettings,
    cancel: CancellationToken,
}

impl<P: ServiceProvider> Supervisor<P> {
    pub fn new(provider: P, config: SyncPulseConfig, settings: SupervisorSettings) -> Self {
        Self {
            provider,
            config,
            settings,
            cancel: CancellationToken::new(),
        }
    }

    /// Cancelling the token ends the session like the stop trigger does.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Runs a session until `stop` completes or the session is cancelled.
    ///
    /// Cleanup always runs once the clients are acquired: pulse generation is stopped, then the
    /// sync pulse and NAS clients are released in that order.
    pub async fn run(&self, stop: impl Future<Output = ()>) -> crate::Result<SessionReport> {
        let nas = Arc::new(self.connect(ClientRole::Nas).await?);
        let sync_pulse = match self.connect(ClientRole::SyncPulse).await {
            Ok(client) => Arc::new(client),
            Err(err) => {
                release(&*nas, ClientRole::Nas).await;
                return Err(err);
            }
        };

        let gate = Arc::new(ReadinessGate::new());
        let listener = Listener::new(
            nas.clone(),
            sync_pulse.clone(),
            IndicationRouter::new(gate.clone()),
            self.settings.registration,
            self.settings.configurator.request_timeout,
        );
        let configurator = Arc::new(PulseConfigurator::new(
            sync_pulse.clone(),
            self.config,
            gate,
            self.cancel.clone(),
            self.settings.configurator,
        ));

        let mut listener_task = tokio::spawn(listener.run(self.cancel.clone()));
        let mut configurator_task = {
            let configurator = configurator.clone();
            tokio::spawn(async move { configurator.run().await })
        };
        info!("Both workers started");

        let stop_requested = tokio::select! {
            _ = stop => {
                info!("Stop requested, shutting down...");
                true
            }
            _ = self.cancel.cancelled() => {
                warn!("Session ended, shutting down...");
                false
            }
        };
        self.cancel.cancel();

        let deadline = Instant::now() + self.settings.join_timeout;
        let listener_joined =
            join_worker("Indication listener", &mut listener_task, deadline).await;
        let configurator_state =
            join_worker("Sync pulse configurator", &mut configurator_task, deadline).await;

        configurator.stop().await;
        release(&*sync_pulse, ClientRole::SyncPulse).await;
        release(&*nas, ClientRole::Nas).await;
        info!("Session cleanup complete");

        let report = SessionReport {
            configurator_state: configurator_state.unwrap_or(ConfiguratorState::Stopped),
            stop_requested,
            workers_joined: listener_joined.is_some() && configurator_state.is_some(),
        };
        let exhausted = report.configurator_state == ConfiguratorState::DegradedRunning
            && self.settings.configurator.on_exhausted == ExhaustionPolicy::Shutdown;
        if exhausted && !stop_requested {
            return Err(Error::RetryExhausted(
                self.settings.configurator.retry.max_attempts,
            ));
        }
        Ok(report)
    }

    async fn connect(&self, role: ClientRole) -> crate::Result<P::Client> {
        info!("{role} client initialization starting...");
        let client = self.provider.connect(role).await.map_err(|err| {
            error!("{role} client init failed: {err}");
            Error::ServiceUnavailable(err)
        })?;
        info!("{role} client initialized");

        let cancel = self.cancel.clone();
        let callback = Box::new(move |err: TransportError| {
            error!("{role} client error: {err}");
            if err == TransportError::ServiceDown {
                error!("{role} service is down, ending the session");
                cancel.cancel();
            }
        });
        if let Err(err) = client.register_error_callback(callback) {
            warn!("{role} error callback registration failed: {err}");
        }
        Ok(client)
    }
}

async fn release<C: NasClient>(client: &C, role: ClientRole) {
    match client.release().await {
        Ok(()) => info!("{role} client released"),
        Err(err) => error!("{role} client release failed: {err}"),
    }
}

/// Waits for a worker to finish, aborting it once `deadline` passes.
pub async fn join_worker<T>(name: &str, task: &mut JoinHandle<T>, deadline: Instant) -> Option<T> {
    match tokio::time::timeout_at(deadline, &mut *task).await {
        Ok(Ok(value)) => Some(value),
        Ok(Err(err)) => {
            error!("{name} failed: {err}");
            None
        }
        Err(_) => {
            error!("{name} did not stop in time, aborting it");
            task.abort();
            None
        }
    }
}

/// Lines of an input read on a detached thread.
///
/// The reading thread is never joined, so a read blocked on an open terminal or pipe does not
/// keep the runtime from shutting down. One reader serves every session of a respawn loop.
pub struct LineEvents {
    rx: mpsc::UnboundedReceiver<std::io::Result<usize>>,
}

impl LineEvents {
    pub fn spawn<R: BufRead + Send + 'static>(mut input: R) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        std::thread::spawn(move || {
            let mut line = String::new();
            loop {
                line.clear();
                let read = input.read_line(&mut line);
                let done = !matches!(read, Ok(n) if n > 0);
                if tx.send(read).is_err() || done {
                    break;
                }
            }
        });
        Self { rx }
    }

    /// Waits for the next line. Returns immediately once the input is exhausted.
    pub async fn next(&mut self) {
        match self.rx.recv().await {
            Some(Ok(0)) | None => info!("End of input, stopping..."),
            Some(Ok(_)) => info!("ENTER pressed, stopping..."),
            Some(Err(err)) => error!("Cannot read input: {err}, stopping..."),
        }
    }
}

/// Completes on SIGINT or SIGTERM, and on the next line of `enter` if given.
pub async fn wait_for_stop(enter: Option<&mut LineEvents>) {
    let enter = async {
        match enter {
            Some(enter) => enter.next().await,
            None => std::future::pending().await,
        }
    };
    tokio::select! {
        _ = signals() => {}
        _ = enter => {}
    }
}

#[cfg(unix)]
async fn signals() {
    use tokio::signal::unix::{SignalKind, signal};

    let mut terminate = match signal(SignalKind::terminate()) {
        Ok(terminate) => terminate,
        Err(err) => {
            warn!("Cannot listen for SIGTERM: {err}");
            return ctrl_c().await;
        }
    };
    tokio::select! {
        _ = ctrl_c() => {}
        _ = terminate.recv() => info!("SIGTERM received, shutting down..."),
    }
}

#[cfg(not(unix))]
async fn signals() {
    ctrl_c().await
}

async fn ctrl_c() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("SIGINT received, shutting down..."),
        Err(err) => {
            warn!("Cannot listen for SIGINT: {err}");
            std::future::pending().await
        }
    }
}
