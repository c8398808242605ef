//! # Device Link Module
//!
//! This module turns a byte-oriented serial connection into a reliable,
//! typed, correlated request/response channel. It owns the connection state
//! machine, the pending-command table, liveness probing, reconnection, and
//! the periodic polling tasks; the chunked OTA sub-protocol and the batch
//! executor live in their own submodules and drive the same correlator.
//!
//! ## Wire protocol
//!
//! Frames are newline-terminated UTF-8. Outbound commands are single-line
//! JSON objects (`{"command": "ping"}`); inbound frames are JSON replies
//! tagged by `type`, legacy `NAME:VALUE` variable updates, or raw text.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use devlink::link::{DeviceLink, LinkOptions};
//! use devlink::transport::SerialTransport;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let mut options = LinkOptions::default();
//!     options.transport.port = "/dev/ttyUSB0".to_string();
//!     let link = DeviceLink::new(options, Arc::new(SerialTransport));
//!     if link.connect().await? {
//!         let reply = link.send_command("system_info", None).await?;
//!         println!("{:?}", reply);
//!     }
//!     link.disconnect().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Concurrency
//!
//! One reader task per connection drains the transport and settles pending
//! commands; all shared structures sit behind short-held mutexes that are
//! never kept across an await. Each pending command is settled exactly once
//! (its oneshot enforces that), either by a correlated response, its
//! deadline, or teardown.

pub mod batch;
pub mod classify;
pub mod error;
pub mod framer;
pub mod ota;
mod periodic;
pub mod rate;
pub mod registry;
pub mod response;

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use log::{debug, error, info, warn};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::{broadcast, oneshot};
use tokio::time::MissedTickBehavior;

use crate::logutil::preview;
use crate::recorder::{LogEntry, LogFormat, LogLevel, LogRecorder};
use crate::transport::{Transport, TransportConfig, TransportLink};

use classify::{classify, Classified, VarUpdate};
use error::{LinkError, Result};
use framer::LineFramer;
use ota::OtaSession;
use periodic::Periodic;
use rate::RateLimiter;
use response::Response;

/// Connection lifecycle of one link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    Error,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Reconnecting => "reconnecting",
            ConnectionState::Error => "error",
        };
        f.write_str(s)
    }
}

/// One sample republished by the ADC streaming poller.
#[derive(Debug, Clone, Serialize)]
pub struct AdcSample {
    pub pin: u8,
    pub raw_value: u32,
    pub voltage: f64,
    pub timestamp: DateTime<Utc>,
}

/// Tunables for one link instance. `Config::link_options` builds this from
/// the TOML file; tests build it directly.
#[derive(Debug, Clone)]
pub struct LinkOptions {
    pub transport: TransportConfig,
    /// Default per-command response deadline.
    pub command_timeout: Duration,
    /// WiFi scans walk every channel; they get a longer deadline.
    pub wifi_scan_timeout: Duration,
    pub batch_timeout: Duration,
    /// `ota_finish` includes the device-side checksum pass.
    pub ota_finish_timeout: Duration,
    pub auto_reconnect: bool,
    pub max_reconnect_attempts: u32,
    pub reconnect_base_delay: Duration,
    /// Heartbeat started automatically on connect; zero disables it.
    pub heartbeat_interval: Duration,
    pub rate_limit_enabled: bool,
    pub rate_limit_per_second: usize,
    pub ota_chunk_size: usize,
    pub log_capacity: usize,
}

impl Default for LinkOptions {
    fn default() -> Self {
        Self {
            transport: TransportConfig::default(),
            command_timeout: Duration::from_secs(10),
            wifi_scan_timeout: Duration::from_secs(15),
            batch_timeout: Duration::from_secs(30),
            ota_finish_timeout: Duration::from_secs(30),
            auto_reconnect: true,
            max_reconnect_attempts: 3,
            reconnect_base_delay: Duration::from_millis(2000),
            heartbeat_interval: Duration::from_secs(10),
            rate_limit_enabled: true,
            rate_limit_per_second: 20,
            ota_chunk_size: 256,
            log_capacity: crate::recorder::DEFAULT_LOG_CAP,
        }
    }
}

/// Read-only snapshot returned by [`DeviceLink::get_status`].
#[derive(Debug, Clone, Serialize)]
pub struct LinkStatus {
    pub state: ConnectionState,
    pub port: String,
    pub baud_rate: u32,
    pub pending_commands: usize,
    pub rate_window_load: usize,
    pub last_heartbeat_ms: Option<u64>,
    pub ota_in_progress: bool,
    pub reconnect_attempts: u32,
    pub log_entries: usize,
}

/// An in-flight command awaiting its correlated response.
///
/// `seq` disambiguates replacement: a timed-out caller only removes the
/// table entry if it is still its own (a newer same-name call may have
/// replaced it).
struct Pending {
    seq: u64,
    tx: oneshot::Sender<Result<Response>>,
}

pub(crate) struct Shared {
    pub(crate) opts: LinkOptions,
    transport: Arc<dyn Transport>,
    state: Mutex<ConnectionState>,
    link: Mutex<Option<Box<dyn TransportLink>>>,
    pending: Mutex<HashMap<String, Pending>>,
    seq: AtomicU64,
    rate: Mutex<RateLimiter>,
    pub(crate) ota: Mutex<Option<OtaSession>>,
    recorder: Mutex<LogRecorder>,
    last_heartbeat: Mutex<Option<Instant>>,
    reconnect_attempts: AtomicU32,
    /// Single-flight guard: one failure handler / reconnect supervisor at a
    /// time per link.
    failure_handling: AtomicBool,
    shutdown: AtomicBool,
    /// Reader generation; a stale reader exits when a newer one is spawned.
    generation: AtomicU64,
    raw_tx: broadcast::Sender<String>,
    var_tx: broadcast::Sender<VarUpdate>,
    resp_tx: broadcast::Sender<Response>,
    state_tx: broadcast::Sender<ConnectionState>,
    sample_tx: broadcast::Sender<AdcSample>,
    log_tx: broadcast::Sender<LogEntry>,
    heartbeat: Mutex<Option<Periodic>>,
    heartbeat_every: Mutex<Option<Duration>>,
    stream: Mutex<Option<Periodic>>,
    stream_cfg: Mutex<Option<(u8, Duration)>>,
}

/// A reliable command/response channel to one device.
///
/// Cheap to clone (all clones share one link). Instances are independent:
/// pending commands, rate window, and OTA session are all per-link, so a
/// multi-device application simply owns several `DeviceLink`s (see
/// [`registry::LinkRegistry`]).
#[derive(Clone)]
pub struct DeviceLink {
    shared: Arc<Shared>,
}

impl DeviceLink {
    pub fn new(options: LinkOptions, transport: Arc<dyn Transport>) -> Self {
        let rate = RateLimiter::new(options.rate_limit_per_second, options.rate_limit_enabled);
        let recorder = LogRecorder::new(options.log_capacity);
        let shared = Arc::new(Shared {
            rate: Mutex::new(rate),
            recorder: Mutex::new(recorder),
            opts: options,
            transport,
            state: Mutex::new(ConnectionState::Disconnected),
            link: Mutex::new(None),
            pending: Mutex::new(HashMap::new()),
            seq: AtomicU64::new(0),
            ota: Mutex::new(None),
            last_heartbeat: Mutex::new(None),
            reconnect_attempts: AtomicU32::new(0),
            failure_handling: AtomicBool::new(false),
            shutdown: AtomicBool::new(false),
            generation: AtomicU64::new(0),
            raw_tx: broadcast::channel(256).0,
            var_tx: broadcast::channel(256).0,
            resp_tx: broadcast::channel(256).0,
            state_tx: broadcast::channel(64).0,
            sample_tx: broadcast::channel(256).0,
            log_tx: broadcast::channel(256).0,
            heartbeat: Mutex::new(None),
            heartbeat_every: Mutex::new(None),
            stream: Mutex::new(None),
            stream_cfg: Mutex::new(None),
        });
        Self { shared }
    }

    // ---- lifecycle ----------------------------------------------------

    /// Open the transport and start the read loop.
    ///
    /// Returns `Ok(true)` once connected, `Ok(false)` if the user dismissed
    /// a port-selection dialog (not an error, nothing is logged), `Err`
    /// otherwise with the state left at [`ConnectionState::Error`].
    pub async fn connect(&self) -> Result<bool> {
        let shared = &self.shared;
        {
            let st = *shared.state.lock().unwrap();
            if !matches!(st, ConnectionState::Disconnected | ConnectionState::Error) {
                return Err(LinkError::Protocol(format!("connect() while {}", st)));
            }
        }
        shared.shutdown.store(false, Ordering::SeqCst);
        shared.reconnect_attempts.store(0, Ordering::SeqCst);
        set_state(shared, ConnectionState::Connecting);
        record(
            shared,
            LogLevel::Info,
            "link",
            format!(
                "opening {} at {} baud",
                shared.opts.transport.port, shared.opts.transport.baud_rate
            ),
        );
        match shared.transport.open(&shared.opts.transport) {
            Ok(link) => {
                *shared.link.lock().unwrap() = Some(link);
                set_state(shared, ConnectionState::Connected);
                spawn_reader(shared);
                record(shared, LogLevel::Info, "link", "connected");
                if shared.opts.heartbeat_interval > Duration::ZERO {
                    self.start_heartbeat(shared.opts.heartbeat_interval);
                }
                Ok(true)
            }
            Err(LinkError::UserCancelled) => {
                set_state(shared, ConnectionState::Disconnected);
                Ok(false)
            }
            Err(e) => {
                record(shared, LogLevel::Error, "link", format!("open failed: {}", e));
                set_state(shared, ConnectionState::Error);
                Err(e)
            }
        }
    }

    /// Tear the connection down. Always completes: every step is isolated,
    /// failures are logged and never re-thrown.
    ///
    /// Order: stop periodic tasks, stop the reader, reject every pending
    /// command with [`LinkError::Disconnected`], release the transport.
    pub async fn disconnect(&self) {
        let shared = &self.shared;
        shared.shutdown.store(true, Ordering::SeqCst);
        let _ = shared.heartbeat.lock().unwrap().take();
        *shared.heartbeat_every.lock().unwrap() = None;
        let _ = shared.stream.lock().unwrap().take();
        *shared.stream_cfg.lock().unwrap() = None;
        reject_pending(shared);
        *shared.link.lock().unwrap() = None;
        set_state(shared, ConnectionState::Disconnected);
        record(shared, LogLevel::Info, "link", "disconnected");
    }

    pub fn state(&self) -> ConnectionState {
        *self.shared.state.lock().unwrap()
    }

    // ---- outbound -----------------------------------------------------

    /// Write one raw line to the device (a `\n` is appended). Not rate
    /// limited; only JSON commands count against the window.
    pub fn send_text(&self, text: &str) -> Result<()> {
        if self.state() != ConnectionState::Connected {
            return Err(LinkError::Disconnected);
        }
        self.write_line(text)?;
        record(
            &self.shared,
            LogLevel::Debug,
            "tx",
            preview(text, FRAME_PREVIEW),
        );
        Ok(())
    }

    /// Send a JSON command and await its correlated response, using the
    /// default deadline for that command name.
    ///
    /// At most one call per command name is tracked at a time: a second
    /// concurrent call to the same name replaces the first pending entry,
    /// and the first caller is surfaced a timeout even if its reply later
    /// arrives. Callers issuing the same command concurrently must
    /// serialize themselves (the OTA manager and heartbeat already do).
    pub async fn send_command(&self, command: &str, params: Option<Value>) -> Result<Response> {
        let timeout = self.default_timeout(command);
        self.dispatch(command, params, timeout, true).await
    }

    /// [`send_command`](Self::send_command) with an explicit deadline.
    pub async fn send_command_with_timeout(
        &self,
        command: &str,
        params: Option<Value>,
        timeout: Duration,
    ) -> Result<Response> {
        self.dispatch(command, params, timeout, true).await
    }

    fn default_timeout(&self, command: &str) -> Duration {
        match command {
            "wifi_scan" => self.shared.opts.wifi_scan_timeout,
            "batch" => self.shared.opts.batch_timeout,
            "ota_finish" => self.shared.opts.ota_finish_timeout,
            _ => self.shared.opts.command_timeout,
        }
    }

    /// Core send path shared by every command-shaped operation.
    /// `enforce_limit` is false for trusted bulk traffic (OTA chunks,
    /// batches) which self-serializes instead.
    pub(crate) async fn dispatch(
        &self,
        command: &str,
        params: Option<Value>,
        timeout: Duration,
        enforce_limit: bool,
    ) -> Result<Response> {
        let shared = &self.shared;
        if self.state() != ConnectionState::Connected {
            return Err(LinkError::Disconnected);
        }
        if enforce_limit && !shared.rate.lock().unwrap().check(Instant::now()) {
            record(
                shared,
                LogLevel::Warning,
                "tx",
                format!("'{}' denied by rate limiter", command),
            );
            return Err(LinkError::RateLimited);
        }

        let mut body = match params {
            None => serde_json::Map::new(),
            Some(Value::Object(map)) => map,
            Some(other) => {
                return Err(LinkError::Protocol(format!(
                    "command params must be a JSON object, got {}",
                    other
                )))
            }
        };
        body.insert("command".to_string(), Value::String(command.to_string()));
        let frame = Value::Object(body).to_string();

        let seq = shared.seq.fetch_add(1, Ordering::SeqCst) + 1;
        let (tx, rx) = oneshot::channel();
        {
            let mut pending = shared.pending.lock().unwrap();
            if pending
                .insert(command.to_string(), Pending { seq, tx })
                .is_some()
            {
                debug!("pending '{}' replaced by a newer call", command);
            }
        }

        if let Err(e) = self.write_line(&frame) {
            remove_pending_if(shared, command, seq);
            return Err(e);
        }
        record(shared, LogLevel::Debug, "tx", preview(&frame, FRAME_PREVIEW));

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(settled)) => settled,
            // Sender dropped unsettled: a newer same-name call replaced this
            // entry. Surfaced as a timeout per the keying limitation above.
            Ok(Err(_)) => Err(LinkError::CommandTimeout {
                command: command.to_string(),
                timeout,
            }),
            Err(_) => {
                remove_pending_if(shared, command, seq);
                record(
                    shared,
                    LogLevel::Warning,
                    "tx",
                    format!("'{}' timed out after {:?}", command, timeout),
                );
                Err(LinkError::CommandTimeout {
                    command: command.to_string(),
                    timeout,
                })
            }
        }
    }

    fn write_line(&self, line: &str) -> Result<()> {
        let mut guard = self.shared.link.lock().unwrap();
        let link = guard.as_mut().ok_or(LinkError::Disconnected)?;
        link.write_all(line.as_bytes())?;
        link.write_all(b"\n")?;
        link.flush()?;
        Ok(())
    }

    // ---- heartbeat ----------------------------------------------------

    /// Probe liveness with a `ping` every `every`. A failed round trip is
    /// treated as loss of the stream and engages reconnection.
    pub fn start_heartbeat(&self, every: Duration) {
        *self.shared.heartbeat_every.lock().unwrap() = Some(every);
        start_heartbeat_task(&self.shared, every);
        debug!("heartbeat every {:?}", every);
    }

    pub fn stop_heartbeat(&self) {
        *self.shared.heartbeat_every.lock().unwrap() = None;
        let _ = self.shared.heartbeat.lock().unwrap().take();
    }

    /// Time since the last successful liveness round trip.
    pub fn last_heartbeat_age(&self) -> Option<Duration> {
        self.shared.last_heartbeat.lock().unwrap().map(|t| t.elapsed())
    }

    // ---- streaming poller ---------------------------------------------

    /// Poll `adc_read` for `channel` every `every`, republishing samples on
    /// the sample channel. Individual failed polls are swallowed; only
    /// [`stop_adc_stream`](Self::stop_adc_stream) or disconnection ends the
    /// stream.
    pub fn start_adc_stream(&self, channel: u8, every: Duration) {
        *self.shared.stream_cfg.lock().unwrap() = Some((channel, every));
        start_stream_task(&self.shared, channel, every);
        debug!("adc stream on pin {} every {:?}", channel, every);
    }

    pub fn stop_adc_stream(&self) {
        *self.shared.stream_cfg.lock().unwrap() = None;
        let _ = self.shared.stream.lock().unwrap().take();
    }

    // ---- subscriptions ------------------------------------------------

    /// Every received frame, verbatim, before classification. Dropping the
    /// receiver unsubscribes (true for all `subscribe_*` methods).
    pub fn subscribe_raw(&self) -> broadcast::Receiver<String> {
        self.shared.raw_tx.subscribe()
    }

    /// `NAME:VALUE` variable updates with typed values.
    pub fn subscribe_vars(&self) -> broadcast::Receiver<VarUpdate> {
        self.shared.var_tx.subscribe()
    }

    /// Every structured JSON response, including unconsumed ones.
    pub fn subscribe_responses(&self) -> broadcast::Receiver<Response> {
        self.shared.resp_tx.subscribe()
    }

    /// Connection state transitions.
    pub fn subscribe_states(&self) -> broadcast::Receiver<ConnectionState> {
        self.shared.state_tx.subscribe()
    }

    /// Samples from the ADC streaming poller.
    pub fn subscribe_samples(&self) -> broadcast::Receiver<AdcSample> {
        self.shared.sample_tx.subscribe()
    }

    /// Structured entries appended to the log ring.
    pub fn subscribe_logs(&self) -> broadcast::Receiver<LogEntry> {
        self.shared.log_tx.subscribe()
    }

    // ---- introspection ------------------------------------------------

    /// Point-in-time snapshot; no live references escape the service.
    pub fn get_status(&self) -> LinkStatus {
        let shared = &self.shared;
        LinkStatus {
            state: *shared.state.lock().unwrap(),
            port: shared.opts.transport.port.clone(),
            baud_rate: shared.opts.transport.baud_rate,
            pending_commands: shared.pending.lock().unwrap().len(),
            rate_window_load: shared.rate.lock().unwrap().current_load(),
            last_heartbeat_ms: shared
                .last_heartbeat
                .lock()
                .unwrap()
                .map(|t| t.elapsed().as_millis() as u64),
            ota_in_progress: shared.ota.lock().unwrap().is_some(),
            reconnect_attempts: shared.reconnect_attempts.load(Ordering::SeqCst),
            log_entries: shared.recorder.lock().unwrap().len(),
        }
    }

    /// Render the log ring; pure formatting over a snapshot.
    pub fn export_logs(&self, format: LogFormat) -> String {
        self.shared.recorder.lock().unwrap().export(format)
    }

    /// Most recent `n` log entries, oldest first.
    pub fn recent_logs(&self, n: usize) -> Vec<LogEntry> {
        self.shared.recorder.lock().unwrap().recent(n)
    }

    pub(crate) fn shared(&self) -> &Arc<Shared> {
        &self.shared
    }
}

const FRAME_PREVIEW: usize = 200;

// ---- internal plumbing -------------------------------------------------

fn set_state(shared: &Arc<Shared>, next: ConnectionState) {
    {
        let mut st = shared.state.lock().unwrap();
        if *st != next {
            debug!("state {} -> {}", st, next);
        }
        *st = next;
    }
    let _ = shared.state_tx.send(next);
}

/// Append to the log ring, broadcast the entry, and mirror to the process
/// logger.
pub(crate) fn record(
    shared: &Arc<Shared>,
    level: LogLevel,
    source: &str,
    message: impl Into<String>,
) {
    let message = message.into();
    match level {
        LogLevel::Debug => debug!("[{}] {}", source, message),
        LogLevel::Info => info!("[{}] {}", source, message),
        LogLevel::Warning => warn!("[{}] {}", source, message),
        LogLevel::Error => error!("[{}] {}", source, message),
    }
    let entry = shared
        .recorder
        .lock()
        .unwrap()
        .record(level, source, message);
    let _ = shared.log_tx.send(entry);
}

fn remove_pending_if(shared: &Arc<Shared>, command: &str, seq: u64) {
    let mut pending = shared.pending.lock().unwrap();
    if pending.get(command).map(|p| p.seq) == Some(seq) {
        pending.remove(command);
    }
}

fn reject_pending(shared: &Arc<Shared>) {
    let drained: Vec<(String, Pending)> =
        shared.pending.lock().unwrap().drain().collect();
    for (command, entry) in drained {
        debug!("rejecting pending '{}' (link down)", command);
        let _ = entry.tx.send(Err(LinkError::Disconnected));
    }
}

fn spawn_reader(shared: &Arc<Shared>) {
    let generation = shared.generation.fetch_add(1, Ordering::SeqCst) + 1;
    let s = shared.clone();
    tokio::spawn(run_reader(s, generation));
}

/// The single read loop for one connection: drain bytes, frame them, and
/// route every line. Failures are classified into state transitions here;
/// nothing propagates out of the task.
async fn run_reader(shared: Arc<Shared>, generation: u64) {
    debug!("reader {} starting", generation);
    let mut framer = LineFramer::new();
    let mut buf = [0u8; 1024];
    let mut interval = tokio::time::interval(Duration::from_millis(5));
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        interval.tick().await;
        if shared.shutdown.load(Ordering::SeqCst)
            || shared.generation.load(Ordering::SeqCst) != generation
        {
            break;
        }
        let read = {
            let mut guard = shared.link.lock().unwrap();
            match guard.as_mut() {
                Some(link) => link.read(&mut buf),
                None => break,
            }
        };
        match read {
            Ok(0) => {} // nothing available this tick
            Ok(n) => {
                for line in framer.push(&buf[..n]) {
                    handle_line(&shared, line);
                }
            }
            Err(e)
                if matches!(
                    e.kind(),
                    std::io::ErrorKind::TimedOut
                        | std::io::ErrorKind::WouldBlock
                        | std::io::ErrorKind::Interrupted
                ) => {}
            Err(e) => {
                stream_failure(&shared, &format!("read error: {}", e));
                break;
            }
        }
    }
    debug!("reader {} stopped", generation);
}

/// Route one complete frame: log it, publish it raw, then classify.
fn handle_line(shared: &Arc<Shared>, line: String) {
    record(shared, LogLevel::Debug, "rx", preview(&line, FRAME_PREVIEW));
    let _ = shared.raw_tx.send(line.clone());
    match classify(&line) {
        Classified::Response(resp) => {
            if let Response::Error { message } = resp.as_ref() {
                record(shared, LogLevel::Error, "device", message.clone());
            }
            if let Some(command) = resp.command_name() {
                let entry = shared.pending.lock().unwrap().remove(command);
                match entry {
                    Some(pending) => {
                        let _ = pending.tx.send(Ok((*resp).clone()));
                    }
                    None => {
                        // Late or unsolicited; subscribers still see it below.
                        debug!("unconsumed '{}' response", resp.kind());
                    }
                }
            }
            let _ = shared.resp_tx.send(*resp);
        }
        Classified::Var(update) => {
            let _ = shared.var_tx.send(update);
        }
        Classified::Raw(_) => {} // already published on the raw channel
    }
}

/// First responder for unexpected stream loss (read error or failed
/// heartbeat). Exactly one handler runs per failure; it tears the stream
/// down, fails in-flight commands, and hands off to the reconnection
/// supervisor when enabled.
fn stream_failure(shared: &Arc<Shared>, reason: &str) {
    if shared.shutdown.load(Ordering::SeqCst) {
        return; // expected teardown
    }
    if shared.failure_handling.swap(true, Ordering::SeqCst) {
        return;
    }
    record(shared, LogLevel::Error, "link", format!("stream lost: {}", reason));
    *shared.link.lock().unwrap() = None;
    // Pause periodic work; the desired intervals stay recorded so a
    // successful reconnect restores them.
    let _ = shared.heartbeat.lock().unwrap().take();
    let _ = shared.stream.lock().unwrap().take();
    reject_pending(shared);
    if shared.opts.auto_reconnect && shared.opts.max_reconnect_attempts > 0 {
        let s = shared.clone();
        tokio::spawn(run_reconnect(s));
    } else {
        set_state(shared, ConnectionState::Error);
        shared.failure_handling.store(false, Ordering::SeqCst);
    }
}

/// Reconnection supervisor: linear backoff (`base × attempt`), bounded
/// attempts, then terminal [`ConnectionState::Error`] until an explicit
/// `connect()`.
async fn run_reconnect(shared: Arc<Shared>) {
    let max = shared.opts.max_reconnect_attempts;
    loop {
        if shared.shutdown.load(Ordering::SeqCst) {
            break;
        }
        let attempt = shared.reconnect_attempts.load(Ordering::SeqCst) + 1;
        if attempt > max {
            record(
                &shared,
                LogLevel::Error,
                "reconnect",
                format!("giving up after {} attempts", max),
            );
            set_state(&shared, ConnectionState::Error);
            break;
        }
        shared.reconnect_attempts.store(attempt, Ordering::SeqCst);
        set_state(&shared, ConnectionState::Reconnecting);
        let delay = shared.opts.reconnect_base_delay.saturating_mul(attempt);
        record(
            &shared,
            LogLevel::Info,
            "reconnect",
            format!("attempt {}/{} in {:?}", attempt, max, delay),
        );
        tokio::time::sleep(delay).await;
        if shared.shutdown.load(Ordering::SeqCst) {
            break;
        }
        match shared.transport.open(&shared.opts.transport) {
            Ok(link) => {
                *shared.link.lock().unwrap() = Some(link);
                shared.reconnect_attempts.store(0, Ordering::SeqCst);
                set_state(&shared, ConnectionState::Connected);
                spawn_reader(&shared);
                restore_periodic(&shared);
                record(&shared, LogLevel::Info, "reconnect", "link restored");
                break;
            }
            Err(e) => {
                record(
                    &shared,
                    LogLevel::Warning,
                    "reconnect",
                    format!("attempt {} failed: {}", attempt, e),
                );
            }
        }
    }
    shared.failure_handling.store(false, Ordering::SeqCst);
}

fn restore_periodic(shared: &Arc<Shared>) {
    if let Some(every) = *shared.heartbeat_every.lock().unwrap() {
        start_heartbeat_task(shared, every);
    }
    if let Some((channel, every)) = *shared.stream_cfg.lock().unwrap() {
        start_stream_task(shared, channel, every);
    }
}

fn start_heartbeat_task(shared: &Arc<Shared>, every: Duration) {
    let s = shared.clone();
    let periodic = Periodic::spawn(every, move || {
        let link = DeviceLink { shared: s.clone() };
        async move {
            if link.state() != ConnectionState::Connected {
                return;
            }
            let timeout = link.shared.opts.command_timeout;
            match link.dispatch("ping", None, timeout, true).await {
                Ok(_) => {
                    *link.shared.last_heartbeat.lock().unwrap() = Some(Instant::now());
                }
                // A saturated limiter is not evidence of a dead link.
                Err(LinkError::RateLimited) => {}
                Err(e) => {
                    record(
                        &link.shared,
                        LogLevel::Warning,
                        "heartbeat",
                        format!("liveness probe failed: {}", e),
                    );
                    stream_failure(&link.shared, "heartbeat failed");
                }
            }
        }
    });
    *shared.heartbeat.lock().unwrap() = Some(periodic);
}

fn start_stream_task(shared: &Arc<Shared>, channel: u8, every: Duration) {
    let s = shared.clone();
    let periodic = Periodic::spawn(every, move || {
        let link = DeviceLink { shared: s.clone() };
        async move {
            if link.state() != ConnectionState::Connected {
                return;
            }
            let timeout = link.shared.opts.command_timeout;
            let params = serde_json::json!({ "pin": channel });
            match link.dispatch("adc_read", Some(params), timeout, true).await {
                Ok(Response::AdcRead {
                    pin,
                    raw_value,
                    voltage,
                    ..
                }) => {
                    let _ = link.shared.sample_tx.send(AdcSample {
                        pin,
                        raw_value,
                        voltage,
                        timestamp: Utc::now(),
                    });
                }
                Ok(other) => debug!("adc stream ignoring '{}' reply", other.kind()),
                // One failed poll never stops the stream.
                Err(e) => debug!("adc poll failed: {}", e),
            }
        }
    });
    *shared.stream.lock().unwrap() = Some(periodic);
}
