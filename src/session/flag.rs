use std::sync::Arc;
use tokio::sync::watch;

/// Cooperative run flag for the tasks of one session
///
/// Starts out running and only ever goes to stopped. Tasks check it at loop
/// boundaries or await [`RunFlag::stopped`] alongside their own work.
#[derive(Debug, Clone)]
pub struct RunFlag {
    tx: Arc<watch::Sender<bool>>,
}

impl RunFlag {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(true);
        Self { tx: Arc::new(tx) }
    }

    pub fn is_running(&self) -> bool {
        *self.tx.borrow()
    }

    pub fn stop(&self) {
        self.tx.send_replace(false);
    }

    /// Resolves once the flag has been stopped
    pub async fn stopped(&self) {
        let mut rx = self.tx.subscribe();
        // The sender lives as long as `self`, so this only returns on stop
        let _ = rx.wait_for(|running| !*running).await;
    }
}

impl Default for RunFlag {
    fn default() -> Self {
        Self::new()
    }
}
