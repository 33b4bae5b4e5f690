//! Start/stop control for the realtime session worker
//!
//! The session runs on a dedicated thread with its own current-thread tokio
//! runtime, so start and stop are plain blocking calls for the console loop, the
//! HTTP handlers and tests.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{error, info, warn};

use crate::config::{Config, ConfigProvider};
use crate::error::BridgeError;
use crate::realtime::check_api_key;
use crate::session::{Collaborators, SessionSupervisor};
use crate::status::StatusSink;

struct Worker {
    handle: JoinHandle<()>,
    done_rx: mpsc::Receiver<()>,
}

impl Worker {
    /// Wait up to `timeout` for the worker to finish. Hands the worker back if it didn't.
    fn reap(self, timeout: Duration) -> Result<(), Worker> {
        match self.done_rx.recv_timeout(timeout) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                if self.handle.join().is_err() {
                    error!("Session worker panicked");
                }
                Ok(())
            }
            Err(RecvTimeoutError::Timeout) => {
                warn!("Session worker did not finish within {:?}", timeout);
                Err(self)
            }
        }
    }
}

pub struct BridgeController {
    collaborators: Collaborators,
    config: Config,
    status: StatusSink,
    /// Between `start` and `stop`. Read without taking the worker lock.
    desired: Arc<AtomicBool>,
    session_running: Arc<AtomicBool>,
    /// At most one worker exists at a time, finished or not
    worker: Mutex<Option<Worker>>,
}

impl BridgeController {
    pub fn new(collaborators: Collaborators, config: Config, status: StatusSink) -> Self {
        Self {
            collaborators,
            config,
            status,
            desired: Arc::new(AtomicBool::new(false)),
            session_running: Arc::new(AtomicBool::new(false)),
            worker: Mutex::new(None),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Option<Worker>> {
        self.worker.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn config_provider(&self) -> Arc<dyn ConfigProvider> {
        Arc::clone(&self.collaborators.config)
    }

    /// Ask the REST API whether the configured key is accepted, reporting
    /// the outcome on the status stream
    pub async fn check_api_key(&self) -> Result<usize, BridgeError> {
        let checked = async {
            let endpoint = self.collaborators.config.load_endpoint_params()?;
            endpoint.validate()?;
            check_api_key(&endpoint, &self.config.transport).await
        }
        .await;

        match &checked {
            Ok(_) => self
                .status
                .line("✅ OpenAI API connection test successful. API key is valid."),
            Err(e) => {
                self.status
                    .line(format!("❌ OpenAI API connection test failed: {}", e));
                if let Some(hint) = e.hint() {
                    self.status.line(hint);
                }
            }
        }
        checked
    }

    /// Whether a session is wanted (between `start` and `stop`)
    pub fn is_running(&self) -> bool {
        self.desired.load(Ordering::SeqCst)
    }

    /// Whether a connection is currently live with audio flowing
    pub fn is_session_active(&self) -> bool {
        self.session_running.load(Ordering::SeqCst)
    }

    /// Start the session worker. Returns false when nothing was started.
    pub fn start(&self) -> bool {
        let mut worker = self.lock();

        if self.desired.load(Ordering::SeqCst) {
            self.status.line("⚠️ Session already running");
            return false;
        }

        let endpoint = match self
            .collaborators
            .config
            .load_endpoint_params()
            .and_then(|endpoint| endpoint.validate().map(|_| endpoint))
        {
            Ok(endpoint) => endpoint,
            Err(e) => {
                warn!("Refusing to start: {}", e);
                self.status.line(format!("⚠️ {}", e));
                return false;
            }
        };
        if endpoint.key_looks_unusual() {
            warn!("OpenAI API key has an unexpected format");
            self.status.line(
                "⚠️ Warning: OpenAI API key format looks unusual. It should start with 'sk-'",
            );
        }

        if let Some(previous) = worker.take() {
            self.status.line("Waiting for the previous session to finish...");
            if let Err(previous) = previous.reap(self.config.supervisor.drain_timeout()) {
                *worker = Some(previous);
                self.status
                    .line("⚠️ Previous session is still shutting down; try again shortly");
                return false;
            }
        }

        self.status.line("🚀 Starting OpenAI session...");
        let supervisor = SessionSupervisor::new(
            self.collaborators.clone(),
            self.config.clone(),
            self.status.clone(),
        )
        .with_session_running(Arc::clone(&self.session_running));
        let (done_tx, done_rx) = mpsc::channel();
        self.desired.store(true, Ordering::SeqCst);

        let spawned = {
            let desired = Arc::clone(&self.desired);
            let status = self.status.clone();
            thread::Builder::new()
                .name("realtime-session".to_string())
                .spawn(move || {
                    run_worker(supervisor, desired, status);
                    let _ = done_tx.send(());
                })
        };

        match spawned {
            Ok(handle) => {
                *worker = Some(Worker { handle, done_rx });
                true
            }
            Err(e) => {
                error!("Failed to spawn session worker: {}", e);
                self.desired.store(false, Ordering::SeqCst);
                self.status
                    .line(format!("❌ Failed to start session worker: {}", e));
                false
            }
        }
    }

    /// Stop the session and wait (bounded) for its resources to be released.
    /// Returns false when there was nothing to stop.
    ///
    /// A worker that misses the drain wait stays owned by the controller; the
    /// next `start` waits for it again and refuses while it is still draining.
    pub fn stop(&self) -> bool {
        let mut worker = self.lock();

        if !self.desired.load(Ordering::SeqCst) {
            self.status.line("⚠️ No active session to stop");
            return false;
        }

        info!("Stopping session");
        self.status.line("🛑 Stopping OpenAI session...");
        self.desired.store(false, Ordering::SeqCst);

        if let Some(current) = worker.take() {
            match current.reap(self.config.supervisor.drain_timeout()) {
                Ok(()) => self
                    .status
                    .line("✅ Session stopped and audio resources cleaned up"),
                Err(current) => {
                    *worker = Some(current);
                    self.status.line(
                        "⚠️ Session is still shutting down; it will finish in the background",
                    );
                }
            }
        }
        true
    }
}

impl Drop for BridgeController {
    fn drop(&mut self) {
        self.desired.store(false, Ordering::SeqCst);
        if let Some(worker) = self.lock().take() {
            let _ = worker.reap(self.config.supervisor.drain_timeout());
        }
    }
}

fn run_worker(supervisor: SessionSupervisor, desired: Arc<AtomicBool>, status: StatusSink) {
    status.line("🔄 Initializing OpenAI session...");

    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("Failed to build session runtime: {}", e);
            status.line(format!("❌ Failed to initialize session runtime: {}", e));
            desired.store(false, Ordering::SeqCst);
            return;
        }
    };

    match runtime.block_on(supervisor.run(Arc::clone(&desired))) {
        Ok(()) => info!("Session worker finished"),
        Err(e) => error!("Session worker ended with error: {}", e),
    }

    // Blocking frame reads are bounded by the device read timeout
    runtime.shutdown_timeout(Duration::from_secs(2));
    desired.store(false, Ordering::SeqCst);
    status.line("Session has stopped.");
}
