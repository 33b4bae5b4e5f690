use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{error, info, warn};

use super::config::SessionConfig;
use super::session::{Collaborators, SessionLoop};
use crate::config::{Config, EndpointParams};
use crate::error::BridgeError;
use crate::status::StatusSink;

/// Keeps a session alive for as long as `desired_running` stays true.
///
/// Every attempt reloads credentials and instructions, so edits to the prompt
/// file or environment take effect on the next reconnect. Configuration errors
/// and an exhausted finite input end supervision; everything else is retried
/// after a backoff.
pub struct SessionSupervisor {
    collaborators: Collaborators,
    config: Config,
    status: StatusSink,
    session_running: Arc<AtomicBool>,
}

impl SessionSupervisor {
    pub fn new(collaborators: Collaborators, config: Config, status: StatusSink) -> Self {
        Self {
            collaborators,
            config,
            status,
            session_running: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Report liveness through a flag owned by the caller
    pub fn with_session_running(mut self, session_running: Arc<AtomicBool>) -> Self {
        self.session_running = session_running;
        self
    }

    /// True while a session attempt has its audio and connection live
    pub fn session_running(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.session_running)
    }

    pub async fn run(&self, desired_running: Arc<AtomicBool>) -> Result<(), BridgeError> {
        let mut attempts = 0u32;

        while desired_running.load(Ordering::SeqCst) {
            attempts += 1;
            info!("Starting session attempt {}", attempts);
            self.status
                .line("🔄 Starting a new OpenAI Realtime API session...");

            let (endpoint, session) = match self.prepare() {
                Ok(prepared) => prepared,
                Err(e) => {
                    error!("Session configuration failed: {}", e);
                    self.status.line(format!("❌ {}", e));
                    return Err(e);
                }
            };

            let mut session_loop = SessionLoop::new(
                self.collaborators.clone(),
                &self.config,
                self.status.clone(),
                self.session_running(),
            );
            let outcome = session_loop.run(&desired_running, &endpoint, &session).await;

            let backoff = match outcome {
                Ok(_) if !desired_running.load(Ordering::SeqCst) => break,
                Ok(_) => {
                    self.status.line("⚠️ Session ended unexpectedly");
                    self.config.supervisor.error_backoff()
                }
                Err(BridgeError::InputExhausted) => {
                    info!("Input finished, ending supervision");
                    break;
                }
                Err(e @ BridgeError::Config(_)) => {
                    error!("Fatal configuration error: {}", e);
                    self.status.line(format!("❌ {}", e));
                    return Err(e);
                }
                Err(e) if e.is_connection_closed() => {
                    warn!("Connection closed: {}", e);
                    self.status
                        .line(format!("⚠️ WebSocket connection closed: {}", e));
                    self.config.supervisor.closed_backoff()
                }
                Err(e) => {
                    warn!("Session attempt failed: {}", e);
                    self.status.line(format!("❌ Error in session: {}", e));
                    if let Some(hint) = e.hint() {
                        self.status.line(hint);
                    }
                    self.config.supervisor.error_backoff()
                }
            };

            if !desired_running.load(Ordering::SeqCst) {
                break;
            }
            self.status
                .line(format!("🔁 Reconnecting in {}...", describe_delay(backoff)));
            if !self.wait_backoff(&desired_running, backoff).await {
                info!("Stop requested during reconnect backoff");
                break;
            }
        }

        info!("Session supervision finished after {} attempts", attempts);
        Ok(())
    }

    fn prepare(&self) -> Result<(EndpointParams, SessionConfig), BridgeError> {
        let endpoint = self.collaborators.config.load_endpoint_params()?;
        endpoint.validate()?;

        let instructions = self.collaborators.config.load_instructions();
        let session =
            SessionConfig::build(&self.config.session, instructions, endpoint.voice.clone())?;
        Ok((endpoint, session))
    }

    /// Sleep for `delay` in stop-poll slices. Returns false if a stop arrived.
    async fn wait_backoff(&self, desired_running: &AtomicBool, delay: Duration) -> bool {
        let deadline = Instant::now() + delay;
        let poll = self.config.supervisor.stop_poll();

        loop {
            if !desired_running.load(Ordering::SeqCst) {
                return false;
            }
            let now = Instant::now();
            if now >= deadline {
                return true;
            }
            tokio::time::sleep(poll.min(deadline - now)).await;
        }
    }
}

fn describe_delay(delay: Duration) -> String {
    if delay.subsec_millis() == 0 {
        let secs = delay.as_secs();
        if secs == 1 {
            "1 second".to_string()
        } else {
            format!("{} seconds", secs)
        }
    } else {
        format!("{:.1} seconds", delay.as_secs_f64())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_describe_delay() {
        assert_eq!(describe_delay(Duration::from_secs(3)), "3 seconds");
        assert_eq!(describe_delay(Duration::from_secs(1)), "1 second");
        assert_eq!(describe_delay(Duration::from_millis(1500)), "1.5 seconds");
    }
}
