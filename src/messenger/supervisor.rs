//! Connection supervisor
//!
//! Owns the transport and everything that must survive a reconnect. Each
//! pass connects, runs the event loop on the new connection and, when the
//! loop gives up, waits `retry_interval` before trying again. Failing to
//! connect and losing an established connection are handled the same way.
//! Only the shutdown signal ends the supervisor.

use std::sync::Arc;

use tokio::sync::watch;
use tracing::{error, info};

use super::ConnectionState;
use super::event_loop::{self, LoopContext};
use crate::transport::Transport;
use crate::utils::error::MessengerError;

/// Resolves once shutdown was requested. A dropped sender counts as a
/// request: nobody is left to ask for it otherwise.
pub(crate) async fn cancelled(shutdown: &mut watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|stop| *stop).await;
}

pub(crate) struct Supervisor {
    pub transport: Arc<dyn Transport>,
    pub state: watch::Sender<ConnectionState>,
    pub ctx: LoopContext,
}

impl Supervisor {
    fn set_state(&self, state: ConnectionState) {
        self.state.send_replace(state);
    }

    pub async fn run(mut self) {
        let mut failures: u32 = 0;

        loop {
            self.set_state(ConnectionState::Connecting);
            info!(attempt = failures + 1, "Connecting to broker");

            let connected = tokio::select! {
                biased;
                _ = cancelled(&mut self.ctx.shutdown) => break,
                connected = self.transport.connect() => connected,
            };

            let outcome = match connected {
                Ok(conn) => {
                    failures = 0;
                    self.set_state(ConnectionState::Running);
                    info!(
                        subscriptions = self.ctx.registry.len(),
                        pending_retries = self.ctx.retry_queue.len(),
                        "Connected to broker"
                    );
                    event_loop::run(conn, &mut self.ctx).await
                }
                Err(e) => Err(e.into()),
            };

            match outcome {
                Ok(()) => break,
                Err(e) => {
                    failures = failures.saturating_add(1);
                    self.set_state(ConnectionState::Disconnected);
                    error!(
                        error = %e,
                        failures,
                        retry_in_ms = self.ctx.config.retry_interval.as_millis() as u64,
                        "Messenger session ended, reconnecting after backoff"
                    );
                }
            }

            tokio::select! {
                biased;
                _ = cancelled(&mut self.ctx.shutdown) => break,
                _ = tokio::time::sleep(self.ctx.config.retry_interval) => {}
            }
        }

        self.set_state(ConnectionState::Closed);
        self.ctx.channels.subscribe.close();
        while let Ok(request) = self.ctx.channels.subscribe.try_recv() {
            let _ = request.sink.try_send(Err(MessengerError::Shutdown));
        }
        let subscriptions = self.ctx.registry.shutdown();
        info!(
            subscriptions,
            dropped_retries = self.ctx.retry_queue.len(),
            "Messenger stopped"
        );
    }
}
