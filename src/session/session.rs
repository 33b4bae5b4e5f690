use chrono::Utc;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

use super::config::SessionConfig;
use super::dispatch::{DispatchAction, EventDispatcher};
use super::flag::RunFlag;
use super::stats::{SessionCounters, SessionStats};
use crate::audio::{open_input, AudioSource, DeviceInfo, InputStream, StreamParams};
use crate::config::{AudioConfig, Config, ConfigProvider, EndpointParams};
use crate::error::BridgeError;
use crate::realtime::{
    establish, Connection, InboundEvent, OutboundMessage, RealtimeReceiver, RealtimeSender,
    Transport,
};
use crate::status::StatusSink;

/// The external pieces a session needs
#[derive(Clone)]
pub struct Collaborators {
    pub config: Arc<dyn ConfigProvider>,
    pub audio: Arc<dyn AudioSource>,
    pub transport: Arc<dyn Transport>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Connecting,
    Active,
    Draining,
    Closed,
}

/// How one of the session's tasks ended
#[derive(Debug)]
enum TaskExit {
    Stopped(&'static str),
    Failed(&'static str, BridgeError),
}

/// One connection's lifetime: connect, run the capture, dispatch and stop-watch
/// tasks together, and tear everything down when the first of them finishes.
pub struct SessionLoop {
    collaborators: Collaborators,
    audio: AudioConfig,
    stop_poll: Duration,
    status: StatusSink,
    session_running: Arc<AtomicBool>,
    state: SessionState,
}

impl SessionLoop {
    pub fn new(
        collaborators: Collaborators,
        config: &Config,
        status: StatusSink,
        session_running: Arc<AtomicBool>,
    ) -> Self {
        Self {
            collaborators,
            audio: config.audio.clone(),
            stop_poll: config.supervisor.stop_poll(),
            status,
            session_running,
            state: SessionState::Idle,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    fn transition(&mut self, next: SessionState) {
        debug!("Session state {:?} -> {:?}", self.state, next);
        self.state = next;
    }

    /// Run one attempt to completion.
    ///
    /// Returns `Ok` when the attempt ended because `desired_running` went false,
    /// and the first task's error otherwise.
    pub async fn run(
        &mut self,
        desired_running: &Arc<AtomicBool>,
        endpoint: &EndpointParams,
        session: &SessionConfig,
    ) -> Result<SessionStats, BridgeError> {
        let attempt_id = Uuid::new_v4().to_string();
        let span = info_span!("session", attempt = %attempt_id);
        self.run_attempt(attempt_id, desired_running, endpoint, session)
            .instrument(span)
            .await
    }

    async fn run_attempt(
        &mut self,
        attempt_id: String,
        desired_running: &Arc<AtomicBool>,
        endpoint: &EndpointParams,
        session: &SessionConfig,
    ) -> Result<SessionStats, BridgeError> {
        self.transition(SessionState::Connecting);

        self.status.line("Checking available audio devices...");
        let devices = self.list_devices().await;
        for device in &devices {
            self.status.line(device.describe());
        }

        self.status.line("🔄 Connecting to OpenAI Realtime API...");
        let handshake = establish(self.collaborators.transport.as_ref(), endpoint, session);
        let outcome = until_unwanted(desired_running, self.stop_poll, handshake).await;
        let connection = match outcome {
            Some(Ok(connection)) => connection,
            Some(Err(e)) => {
                self.transition(SessionState::Closed);
                return Err(e);
            }
            None => {
                // Dropping the handshake future drops any half-open socket
                info!("Stop requested while connecting");
                return Ok(self.abandon(attempt_id));
            }
        };

        if !desired_running.load(Ordering::SeqCst) {
            info!("Stop requested before audio capture opened");
            close_connection(connection.sender.as_ref()).await;
            return Ok(self.abandon(attempt_id));
        }
        self.status.line("✅ Connected to OpenAI Realtime API");

        let mut stream = match self.open_stream(devices).await {
            Ok(stream) => stream,
            Err(e) => {
                close_connection(connection.sender.as_ref()).await;
                self.transition(SessionState::Closed);
                return Err(e);
            }
        };

        if !desired_running.load(Ordering::SeqCst) {
            info!("Stop requested while audio capture was opening");
            if let Err(e) = tokio::task::spawn_blocking(move || stream.close()).await {
                error!("Audio stream close panicked: {}", e);
            }
            close_connection(connection.sender.as_ref()).await;
            return Ok(self.abandon(attempt_id));
        }

        let Connection { sender, receiver } = connection;
        let started_at = Utc::now();
        let counters = SessionCounters::default();
        let running = RunFlag::new();

        self.transition(SessionState::Active);
        self.session_running.store(true, Ordering::SeqCst);
        self.status.line("🎙️ Listening for meeting audio...");

        let mut tasks = JoinSet::new();
        tasks.spawn(capture_forward(
            Capture {
                sender: Arc::clone(&sender),
                running: running.clone(),
                status: self.status.clone(),
                counters: counters.clone(),
                frame_interval: self.audio.frame_interval(),
                error_pause: self.audio.read_error_pause(),
                max_consecutive_errors: self.audio.max_consecutive_read_errors,
            },
            stream,
        ));
        tasks.spawn(receive_dispatch(
            receiver,
            Arc::clone(&sender),
            running.clone(),
            self.status.clone(),
            counters.clone(),
        ));
        tasks.spawn(stop_watch(
            Arc::clone(desired_running),
            running.clone(),
            self.stop_poll,
        ));

        let first = tasks.join_next().await;

        // Whatever finished first, everything else winds down with it
        self.transition(SessionState::Draining);
        running.stop();
        while let Some(rest) = tasks.join_next().await {
            match rest {
                Ok(TaskExit::Stopped(task)) => debug!("{} task stopped", task),
                Ok(TaskExit::Failed(task, e)) => debug!("{} task ended during drain: {}", task, e),
                Err(e) => error!("Session task panicked during drain: {}", e),
            }
        }

        // The capture task closed the audio stream on its way out
        close_connection(sender.as_ref()).await;
        self.session_running.store(false, Ordering::SeqCst);
        self.transition(SessionState::Closed);

        let stats = counters.snapshot(attempt_id, started_at);
        info!(
            "Session ended after {:.1}s: {} frames sent, {} read errors, {} events, {} responses",
            stats.duration_secs,
            stats.frames_sent,
            stats.audio_read_errors,
            stats.events_received,
            stats.responses_completed
        );

        match first {
            Some(Ok(TaskExit::Stopped(task))) => {
                info!("Session stopped by {} task", task);
                Ok(stats)
            }
            Some(Ok(TaskExit::Failed(task, e))) => {
                warn!("Session ended by {} task: {}", task, e);
                Err(e)
            }
            Some(Err(e)) => Err(BridgeError::Transport(format!("session task failed: {e}"))),
            None => Ok(stats),
        }
    }

    /// Close out an attempt that was stopped before it became active
    fn abandon(&mut self, attempt_id: String) -> SessionStats {
        self.transition(SessionState::Closed);
        SessionCounters::default().snapshot(attempt_id, Utc::now())
    }

    async fn list_devices(&self) -> Vec<DeviceInfo> {
        let audio = Arc::clone(&self.collaborators.audio);
        let listed = tokio::task::spawn_blocking(move || audio.list_devices())
            .await
            .unwrap_or_else(|e| Err(BridgeError::AudioDevice(e.to_string())));

        match listed {
            Ok(devices) => devices,
            Err(e) => {
                warn!("Device enumeration failed: {}", e);
                self.status
                    .line(format!("⚠️ Could not list audio devices: {}", e));
                Vec::new()
            }
        }
    }

    async fn open_stream(&self, devices: Vec<DeviceInfo>) -> Result<Box<dyn InputStream>, BridgeError> {
        let audio = Arc::clone(&self.collaborators.audio);
        let preferred = self.audio.preferred_device.clone();
        let params = StreamParams::from(&self.audio);
        let status = self.status.clone();

        tokio::task::spawn_blocking(move || {
            open_input(audio.as_ref(), &devices, &preferred, params, &status)
                .map(|(_, stream)| stream)
        })
        .await
        .map_err(|e| BridgeError::AudioDevice(format!("device open panicked: {e}")))?
    }
}

async fn close_connection(sender: &dyn RealtimeSender) {
    if let Err(e) = sender.close().await {
        warn!("Error closing realtime connection: {}", e);
    }
}

/// Drive `work` to completion unless `desired_running` goes false first,
/// checking every `poll`. Returns `None` if the stop won.
async fn until_unwanted<F: Future>(
    desired_running: &AtomicBool,
    poll: Duration,
    work: F,
) -> Option<F::Output> {
    tokio::pin!(work);
    loop {
        if !desired_running.load(Ordering::SeqCst) {
            return None;
        }
        tokio::select! {
            output = &mut work => return Some(output),
            _ = tokio::time::sleep(poll) => {}
        }
    }
}

/// Sleep unless the flag stops first
async fn pause(running: &RunFlag, duration: Duration) {
    tokio::select! {
        _ = tokio::time::sleep(duration) => {}
        _ = running.stopped() => {}
    }
}

struct Capture {
    sender: Arc<dyn RealtimeSender>,
    running: RunFlag,
    status: StatusSink,
    counters: SessionCounters,
    frame_interval: Duration,
    error_pause: Duration,
    max_consecutive_errors: Option<u32>,
}

async fn capture_forward(ctx: Capture, stream: Box<dyn InputStream>) -> TaskExit {
    info!("Audio capture task started");

    let mut slot = Some(stream);
    let exit = pump_frames(&ctx, &mut slot).await;

    if let Some(mut stream) = slot.take() {
        // Closing a device may join its capture thread
        if let Err(e) = tokio::task::spawn_blocking(move || stream.close()).await {
            error!("Audio stream close panicked: {}", e);
        }
    }

    info!("Audio capture task stopped");
    exit
}

async fn pump_frames(ctx: &Capture, slot: &mut Option<Box<dyn InputStream>>) -> TaskExit {
    let mut consecutive_errors = 0u32;

    while ctx.running.is_running() {
        let Some(mut stream) = slot.take() else {
            return TaskExit::Failed(
                "capture",
                BridgeError::AudioDevice("input stream lost".to_string()),
            );
        };

        let read = tokio::task::spawn_blocking(move || {
            let frame = stream.read_frame();
            (stream, frame)
        })
        .await;
        let frame = match read {
            Ok((stream, frame)) => {
                *slot = Some(stream);
                frame
            }
            Err(e) => {
                return TaskExit::Failed(
                    "capture",
                    BridgeError::AudioDevice(format!("frame read panicked: {e}")),
                )
            }
        };

        match frame {
            Ok(pcm) => {
                consecutive_errors = 0;
                if !ctx.running.is_running() {
                    break;
                }
                if let Err(e) = ctx.sender.send(&OutboundMessage::audio_append(&pcm)).await {
                    return TaskExit::Failed("capture", e);
                }
                SessionCounters::bump(&ctx.counters.frames_sent);
                pause(&ctx.running, ctx.frame_interval).await;
            }
            Err(BridgeError::InputExhausted) => {
                info!("Audio input exhausted");
                ctx.status.line("🏁 Audio input finished");
                return TaskExit::Failed("capture", BridgeError::InputExhausted);
            }
            Err(e) => {
                consecutive_errors += 1;
                SessionCounters::bump(&ctx.counters.audio_read_errors);
                warn!("Audio read failed: {}", e);
                ctx.status.line(format!("Error reading audio: {}", e));

                if let Some(max) = ctx.max_consecutive_errors {
                    if consecutive_errors >= max {
                        return TaskExit::Failed(
                            "capture",
                            BridgeError::AudioDevice(format!(
                                "{consecutive_errors} consecutive read failures, last: {e}"
                            )),
                        );
                    }
                }
                pause(&ctx.running, ctx.error_pause).await;
            }
        }
    }

    TaskExit::Stopped("capture")
}

async fn receive_dispatch(
    mut receiver: Box<dyn RealtimeReceiver>,
    sender: Arc<dyn RealtimeSender>,
    running: RunFlag,
    status: StatusSink,
    counters: SessionCounters,
) -> TaskExit {
    let mut dispatcher = EventDispatcher::new();

    loop {
        let received = tokio::select! {
            biased;
            _ = running.stopped() => return TaskExit::Stopped("dispatch"),
            received = receiver.receive() => received,
        };

        let event = match received {
            Ok(event) => event,
            Err(e) => return TaskExit::Failed("dispatch", e),
        };

        SessionCounters::bump(&counters.events_received);
        if event == InboundEvent::ResponseDone {
            SessionCounters::bump(&counters.responses_completed);
        }

        if dispatcher.apply(event, &status) == DispatchAction::RequestResponse {
            if let Err(e) = sender.send(&OutboundMessage::ResponseCreate).await {
                return TaskExit::Failed("dispatch", e);
            }
        }
    }
}

async fn stop_watch(desired_running: Arc<AtomicBool>, running: RunFlag, poll: Duration) -> TaskExit {
    loop {
        if !desired_running.load(Ordering::SeqCst) {
            info!("Stop requested");
            running.stop();
            return TaskExit::Stopped("stop-watch");
        }

        tokio::select! {
            _ = tokio::time::sleep(poll) => {}
            _ = running.stopped() => return TaskExit::Stopped("stop-watch"),
        }
    }
}
