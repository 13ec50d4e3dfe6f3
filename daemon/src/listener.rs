use std::sync::Arc;
use std::time::Duration;

use log::{error, info, warn};
use tns_common::indication::IndicationStream;
use tns_common::request::IndicationRegistration;
use tokio_util::sync::CancellationToken;

use crate::router::IndicationRouter;
use crate::transport::{NasClient, subscribe};

/// Receives indications from both clients and feeds them to the router.
pub struct Listener<C: NasClient> {
    nas: Arc<C>,
    sync_pulse: Arc<C>,
    router: IndicationRouter,
    registration: IndicationRegistration,
    request_timeout: Duration,
}

impl<C: NasClient> Listener<C> {
    pub fn new(
        nas: Arc<C>,
        sync_pulse: Arc<C>,
        router: IndicationRouter,
        registration: IndicationRegistration,
        request_timeout: Duration,
    ) -> Self {
        Self {
            nas,
            sync_pulse,
            router,
            registration,
            request_timeout,
        }
    }

    /// Registers for indications, then routes them until `cancel` fires or both streams close.
    ///
    /// A failed registration ends the listener but not the session.
    pub async fn run(self, cancel: CancellationToken) {
        if let Err(err) = subscribe(&*self.nas, self.registration, self.request_timeout).await {
            error!("Indication listener stopped: {err}");
            return;
        }

        info!("Waiting for NAS indications...");
        let mut nas_open = true;
        let mut sync_pulse_open = true;
        while nas_open || sync_pulse_open {
            tokio::select! {
                _ = cancel.cancelled() => break,
                raw = self.nas.next_indication(), if nas_open => match raw {
                    Some(raw) => self.router.route(IndicationStream::Nas, &raw, &*self.nas),
                    None => {
                        warn!("NAS indication stream closed");
                        nas_open = false;
                    }
                },
                raw = self.sync_pulse.next_indication(), if sync_pulse_open => match raw {
                    Some(raw) => {
                        self.router.route(IndicationStream::SyncPulse, &raw, &*self.sync_pulse)
                    }
                    None => {
                        warn!("Sync Pulse indication stream closed");
                        sync_pulse_open = false;
                    }
                },
            }
        }
        info!("Indication listener exited");
    }
}
