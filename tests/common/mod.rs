// Shared fakes for the session, supervisor and controller tests
//
// FakeTransport hands out scripted connections and records everything sent on
// them. FakeAudio produces silent frames from a configurable device list.
// FakeConfig serves credentials and a sequence of instruction texts.

#![allow(dead_code)]

use async_trait::async_trait;
use loqa_bridge::config::{ConfigProvider, EndpointParams};
use loqa_bridge::error::{BridgeError, ConnectFailure};
use loqa_bridge::realtime::{Connection, InboundEvent, OutboundMessage, RealtimeReceiver, RealtimeSender, Transport};
use loqa_bridge::audio::{AudioSource, DeviceInfo, InputStream, StreamParams};
use loqa_bridge::Config;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;

pub const TEST_API_KEY: &str = "sk-test-0123456789abcdefghij";

// ============================================================================
// Transport
// ============================================================================

/// One step of a scripted inbound stream
#[derive(Debug, Clone)]
pub enum Step {
    Event(InboundEvent),
    /// Server closes the connection
    Close,
    /// Nothing arrives for this long
    Delay(Duration),
}

/// What the next `connect` call does
#[derive(Debug, Clone)]
pub enum Script {
    Refuse(ConnectFailure),
    /// Deliver these steps, then stay silent until stopped
    Steps(Vec<Step>),
}

#[derive(Debug, Default)]
pub struct TransportLog {
    pub connects: Vec<Instant>,
    /// (connection number, message) in send order
    pub sent: Vec<(usize, OutboundMessage)>,
    pub closes: usize,
}

#[derive(Default)]
pub struct FakeTransport {
    scripts: Mutex<VecDeque<Script>>,
    connect_delays: Mutex<VecDeque<Duration>>,
    in_flight: Arc<AtomicUsize>,
    max_in_flight: Arc<AtomicUsize>,
    log: Arc<Mutex<TransportLog>>,
}

/// Counts a handshake as in flight until it finishes or is dropped
struct InFlight(Arc<AtomicUsize>);

impl Drop for InFlight {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl FakeTransport {
    pub fn new(scripts: Vec<Script>) -> Self {
        Self {
            scripts: Mutex::new(scripts.into()),
            log: Arc::new(Mutex::new(TransportLog::default())),
            ..Default::default()
        }
    }

    /// Each connect takes the next delay before answering; later ones are instant
    pub fn with_connect_delays(self, delays: Vec<Duration>) -> Self {
        *self.connect_delays.lock().unwrap() = delays.into();
        self
    }

    /// Most handshakes that were ever in progress at the same time
    pub fn max_concurrent_connects(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn connect_count(&self) -> usize {
        self.log.lock().unwrap().connects.len()
    }

    pub fn connect_times(&self) -> Vec<Instant> {
        self.log.lock().unwrap().connects.clone()
    }

    pub fn close_count(&self) -> usize {
        self.log.lock().unwrap().closes
    }

    pub fn sent(&self) -> Vec<(usize, OutboundMessage)> {
        self.log.lock().unwrap().sent.clone()
    }

    /// Message kinds sent on one connection, with consecutive audio appends collapsed
    pub fn sent_kinds(&self, connection: usize) -> Vec<&'static str> {
        let mut kinds: Vec<&'static str> = Vec::new();
        for (conn, message) in self.sent() {
            if conn != connection {
                continue;
            }
            let kind = message.kind();
            if kind == "input_audio_buffer.append" && kinds.last() == Some(&kind) {
                continue;
            }
            kinds.push(kind);
        }
        kinds
    }

    pub fn session_updates(&self) -> Vec<serde_json::Value> {
        self.sent()
            .into_iter()
            .filter_map(|(_, message)| match message {
                OutboundMessage::SessionUpdate { session } => serde_json::to_value(session).ok(),
                _ => None,
            })
            .collect()
    }
}

#[async_trait]
impl Transport for FakeTransport {
    async fn connect(&self, _endpoint: &EndpointParams) -> Result<Connection, BridgeError> {
        let now_in_flight = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        let _in_flight = InFlight(Arc::clone(&self.in_flight));
        self.max_in_flight.fetch_max(now_in_flight, Ordering::SeqCst);

        let connection = {
            let mut log = self.log.lock().unwrap();
            log.connects.push(Instant::now());
            log.connects.len() - 1
        };

        let delay = self.connect_delays.lock().unwrap().pop_front();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let script = self
            .scripts
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Script::Steps(Vec::new()));

        match script {
            Script::Refuse(kind) => Err(BridgeError::connect(kind, "scripted refusal")),
            Script::Steps(steps) => Ok(Connection {
                sender: Arc::new(FakeSender {
                    connection,
                    log: Arc::clone(&self.log),
                    closed: AtomicBool::new(false),
                }),
                receiver: Box::new(FakeReceiver {
                    steps: steps.into(),
                    hold_until: None,
                    closed: false,
                }),
            }),
        }
    }
}

struct FakeSender {
    connection: usize,
    log: Arc<Mutex<TransportLog>>,
    closed: AtomicBool,
}

#[async_trait]
impl RealtimeSender for FakeSender {
    async fn send(&self, message: &OutboundMessage) -> Result<(), BridgeError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(BridgeError::ConnectionClosed("closed locally".to_string()));
        }
        self.log
            .lock()
            .unwrap()
            .sent
            .push((self.connection, message.clone()));
        Ok(())
    }

    async fn close(&self) -> Result<(), BridgeError> {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.log.lock().unwrap().closes += 1;
        }
        Ok(())
    }
}

struct FakeReceiver {
    steps: VecDeque<Step>,
    /// Deadline of the current Delay step, kept across cancelled receives
    hold_until: Option<Instant>,
    closed: bool,
}

#[async_trait]
impl RealtimeReceiver for FakeReceiver {
    async fn receive(&mut self) -> Result<InboundEvent, BridgeError> {
        loop {
            if let Some(deadline) = self.hold_until {
                tokio::time::sleep_until(deadline).await;
                self.hold_until = None;
            }
            if self.closed {
                return Err(BridgeError::ConnectionClosed("server closed".to_string()));
            }
            match self.steps.pop_front() {
                Some(Step::Event(event)) => return Ok(event),
                Some(Step::Close) => {
                    self.closed = true;
                    return Err(BridgeError::ConnectionClosed("server closed".to_string()));
                }
                Some(Step::Delay(delay)) => self.hold_until = Some(Instant::now() + delay),
                None => return std::future::pending().await,
            }
        }
    }
}

// ============================================================================
// Audio
// ============================================================================

pub fn input_device(index: usize, name: &str) -> DeviceInfo {
    DeviceInfo {
        index,
        name: name.to_string(),
        max_input_channels: 2,
        max_output_channels: 0,
    }
}

pub fn output_device(index: usize, name: &str) -> DeviceInfo {
    DeviceInfo {
        index,
        name: name.to_string(),
        max_input_channels: 0,
        max_output_channels: 2,
    }
}

pub struct FakeAudio {
    devices: Vec<DeviceInfo>,
    default_index: Option<usize>,
    fail_reads: bool,
    pub opened: Mutex<Vec<usize>>,
    pub closes: Arc<AtomicUsize>,
}

impl FakeAudio {
    pub fn new(devices: Vec<DeviceInfo>, default_index: Option<usize>) -> Self {
        Self {
            devices,
            default_index,
            fail_reads: false,
            opened: Mutex::new(Vec::new()),
            closes: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// A single input device called "Built-in Microphone"
    pub fn microphone() -> Self {
        Self::new(vec![input_device(0, "Built-in Microphone")], Some(0))
    }

    pub fn failing_reads(mut self) -> Self {
        self.fail_reads = true;
        self
    }

    pub fn opened(&self) -> Vec<usize> {
        self.opened.lock().unwrap().clone()
    }

    pub fn close_count(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }
}

impl AudioSource for FakeAudio {
    fn name(&self) -> &str {
        "fake"
    }

    fn list_devices(&self) -> Result<Vec<DeviceInfo>, BridgeError> {
        Ok(self.devices.clone())
    }

    fn default_input_device(&self) -> Result<Option<DeviceInfo>, BridgeError> {
        Ok(self
            .default_index
            .and_then(|index| self.devices.iter().find(|d| d.index == index).cloned()))
    }

    fn open_input_stream(
        &self,
        device_index: usize,
        params: StreamParams,
    ) -> Result<Box<dyn InputStream>, BridgeError> {
        self.opened.lock().unwrap().push(device_index);
        Ok(Box::new(FakeStream {
            frame_bytes: params.frame_bytes(),
            fail_reads: self.fail_reads,
            closes: Arc::clone(&self.closes),
            closed: false,
        }))
    }
}

struct FakeStream {
    frame_bytes: usize,
    fail_reads: bool,
    closes: Arc<AtomicUsize>,
    closed: bool,
}

impl InputStream for FakeStream {
    fn read_frame(&mut self) -> Result<Vec<u8>, BridgeError> {
        if self.fail_reads {
            return Err(BridgeError::AudioRead("input overflowed".to_string()));
        }
        Ok(vec![0u8; self.frame_bytes])
    }

    fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            self.closes.fetch_add(1, Ordering::SeqCst);
        }
    }
}

// ============================================================================
// Config
// ============================================================================

pub struct FakeConfig {
    api_key: Mutex<String>,
    base_url: Mutex<String>,
    instructions: Mutex<VecDeque<String>>,
    last_instructions: Mutex<String>,
    pub instruction_loads: AtomicUsize,
}

impl FakeConfig {
    pub fn new() -> Self {
        Self::with_instructions(vec!["Answer briefly."])
    }

    /// Each load takes the next text; the last one repeats
    pub fn with_instructions(texts: Vec<&str>) -> Self {
        Self {
            api_key: Mutex::new(TEST_API_KEY.to_string()),
            base_url: Mutex::new("wss://realtime.test/v1/realtime".to_string()),
            instructions: Mutex::new(texts.into_iter().map(String::from).collect()),
            last_instructions: Mutex::new(String::new()),
            instruction_loads: AtomicUsize::new(0),
        }
    }

    pub fn set_api_key(&self, key: &str) {
        *self.api_key.lock().unwrap() = key.to_string();
    }

    pub fn set_base_url(&self, url: &str) {
        *self.base_url.lock().unwrap() = url.to_string();
    }
}

impl ConfigProvider for FakeConfig {
    fn load_instructions(&self) -> String {
        self.instruction_loads.fetch_add(1, Ordering::SeqCst);
        let mut last = self.last_instructions.lock().unwrap();
        if let Some(next) = self.instructions.lock().unwrap().pop_front() {
            *last = next;
        }
        last.clone()
    }

    fn load_endpoint_params(&self) -> Result<EndpointParams, BridgeError> {
        Ok(EndpointParams {
            base_url: self.base_url.lock().unwrap().clone(),
            model: "test-model".to_string(),
            voice: "alloy".to_string(),
            api_key: self.api_key.lock().unwrap().clone(),
        })
    }

    /// Saved text wins over anything still queued
    fn save_instructions(&self, text: &str) -> Result<(), BridgeError> {
        self.instructions.lock().unwrap().clear();
        *self.last_instructions.lock().unwrap() = text.to_string();
        Ok(())
    }
}

/// Defaults, with extra drain headroom for slow test machines
pub fn test_config() -> Config {
    let mut config = Config::default();
    config.supervisor.drain_timeout_ms = 2000;
    config
}

pub fn delta(text: &str) -> Step {
    Step::Event(InboundEvent::TextDelta {
        fragment: text.to_string(),
    })
}
