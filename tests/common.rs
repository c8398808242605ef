#![allow(dead_code)] // shared across test crates; each uses a subset

//! Test fixtures: an in-memory transport and a miniature scripted firmware.
//!
//! `MockTransport` implements the same seam the serial transport does, so the
//! full stack (reader task, framer, classifier, correlator) runs unmodified.
//! Tests script device behavior with a handler closure and can inject bytes,
//! break the stream, or queue open failures for reconnection scenarios.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use devlink::link::error::LinkError;
use devlink::link::{DeviceLink, LinkOptions};
use devlink::transport::{Transport, TransportConfig, TransportLink};

type Handler = Box<dyn FnMut(&str) -> Vec<String> + Send>;

/// Shared state between the transport factory, its open links, and the test.
#[derive(Default)]
pub struct MockNet {
    /// Bytes queued device -> host.
    to_host: Mutex<VecDeque<u8>>,
    /// Complete lines written host -> device.
    written: Mutex<Vec<String>>,
    partial: Mutex<Vec<u8>>,
    handler: Mutex<Option<Handler>>,
    broken: AtomicBool,
    /// Errors to return from upcoming `open` calls, in order.
    open_failures: Mutex<VecDeque<LinkError>>,
    pub opens: AtomicUsize,
}

impl MockNet {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Script the device: `handler` receives each complete line the host
    /// writes and returns response lines to queue back.
    pub fn set_handler(self: &Arc<Self>, handler: impl FnMut(&str) -> Vec<String> + Send + 'static) {
        *self.handler.lock().unwrap() = Some(Box::new(handler));
    }

    /// Queue a device -> host line (newline appended).
    pub fn inject(self: &Arc<Self>, line: &str) {
        let mut q = self.to_host.lock().unwrap();
        q.extend(line.as_bytes());
        q.push_back(b'\n');
    }

    /// Queue raw device -> host bytes with no terminator.
    pub fn inject_bytes(self: &Arc<Self>, bytes: &[u8]) {
        self.to_host.lock().unwrap().extend(bytes);
    }

    /// Make the current stream fail on its next read or write.
    pub fn break_link(self: &Arc<Self>) {
        self.broken.store(true, Ordering::SeqCst);
    }

    /// Make the next `count` open attempts fail.
    pub fn fail_next_opens(self: &Arc<Self>, count: usize) {
        let mut q = self.open_failures.lock().unwrap();
        for _ in 0..count {
            q.push_back(LinkError::PortUnavailable("mock port busy".into()));
        }
    }

    /// Make the next open attempt report user cancellation.
    pub fn cancel_next_open(self: &Arc<Self>) {
        self.open_failures
            .lock()
            .unwrap()
            .push_back(LinkError::UserCancelled);
    }

    /// Lines the host has written so far.
    pub fn written_lines(self: &Arc<Self>) -> Vec<String> {
        self.written.lock().unwrap().clone()
    }

    /// Count of written lines mentioning `needle`.
    pub fn written_count(self: &Arc<Self>, needle: &str) -> usize {
        self.written
            .lock()
            .unwrap()
            .iter()
            .filter(|l| l.contains(needle))
            .count()
    }
}

pub struct MockTransport(pub Arc<MockNet>);

impl Transport for MockTransport {
    fn open(
        &self,
        _config: &TransportConfig,
    ) -> std::result::Result<Box<dyn TransportLink>, LinkError> {
        self.0.opens.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = self.0.open_failures.lock().unwrap().pop_front() {
            return Err(err);
        }
        self.0.broken.store(false, Ordering::SeqCst);
        Ok(Box::new(MockLink(self.0.clone())))
    }
}

struct MockLink(Arc<MockNet>);

impl TransportLink for MockLink {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        if self.0.broken.load(Ordering::SeqCst) {
            return Err(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "mock stream broken",
            ));
        }
        let mut q = self.0.to_host.lock().unwrap();
        let n = buf.len().min(q.len());
        for slot in buf.iter_mut().take(n) {
            *slot = q.pop_front().unwrap();
        }
        Ok(n)
    }

    fn write_all(&mut self, data: &[u8]) -> std::io::Result<()> {
        if self.0.broken.load(Ordering::SeqCst) {
            return Err(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "mock stream broken",
            ));
        }
        let mut partial = self.0.partial.lock().unwrap();
        partial.extend_from_slice(data);
        while let Some(pos) = partial.iter().position(|&b| b == b'\n') {
            let line_bytes: Vec<u8> = partial.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&line_bytes[..line_bytes.len() - 1]).into_owned();
            self.0.written.lock().unwrap().push(line.clone());
            let responses = {
                let mut handler = self.0.handler.lock().unwrap();
                handler.as_mut().map(|h| h(&line)).unwrap_or_default()
            };
            let mut q = self.0.to_host.lock().unwrap();
            for response in responses {
                q.extend(response.as_bytes());
                q.push_back(b'\n');
            }
        }
        Ok(())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

/// A scripted firmware answering like the real MicroPython target. Tracks no
/// cross-command state except the OTA session byte count.
pub fn firmware_handler() -> impl FnMut(&str) -> Vec<String> + Send + 'static {
    let mut ota_received: usize = 0;
    let mut ota_total: usize = 0;
    let mut ota_filename = String::new();
    move |line: &str| {
        let parsed: serde_json::Value = match serde_json::from_str(line) {
            Ok(v) => v,
            Err(_) => return vec![],
        };
        let command = parsed["command"].as_str().unwrap_or_default().to_string();
        match command.as_str() {
            "ping" => vec![r#"{"type":"pong","timestamp":42,"uptime":1000}"#.to_string()],
            "version" => {
                vec![r#"{"type":"version","micropython":"3.4.0","platform":"esp32"}"#.to_string()]
            }
            "system_info" => vec![
                r#"{"type":"system_info","chip_id":"a1b2c3","free_memory":100000,"used_memory":50000,"total_memory":150000,"freq_mhz":240,"uptime_ms":123456}"#
                    .to_string(),
            ],
            "adc_read" => {
                let pin = parsed["pin"].as_u64().unwrap_or(36);
                vec![format!(
                    r#"{{"type":"adc_read","pin":{},"raw_value":{},"voltage":{},"resolution":"12-bit"}}"#,
                    pin,
                    pin * 100,
                    pin as f64 / 10.0
                )]
            }
            "gpio_read" => {
                let pin = parsed["pin"].as_u64().unwrap_or(2);
                vec![format!(
                    r#"{{"type":"gpio_read","pin":{},"value":1,"mode":"input"}}"#,
                    pin
                )]
            }
            "wifi_scan" => vec![
                r#"{"type":"wifi_scan","networks":[{"ssid":"lab","bssid":"aa:bb","channel":6,"rssi":-40,"security":"WPA2-PSK"}],"count":1}"#
                    .to_string(),
            ],
            "batch" => {
                let commands = parsed["commands"].as_array().cloned().unwrap_or_default();
                let mut results = Vec::new();
                let mut errors = Vec::new();
                for (index, sub) in commands.iter().enumerate() {
                    let sub_command = sub["command"].as_str().unwrap_or_default();
                    match sub_command {
                        "adc_read" => {
                            let pin = sub["pin"].as_u64().unwrap_or(36);
                            results.push(serde_json::json!({
                                "index": index,
                                "result": {
                                    "type": "adc_read",
                                    "pin": pin,
                                    "raw_value": pin * 100,
                                    "voltage": pin as f64 / 10.0
                                }
                            }));
                        }
                        "ping" => {
                            results.push(serde_json::json!({
                                "index": index,
                                "result": {"type": "pong", "timestamp": 42, "uptime": 1000}
                            }));
                        }
                        other => {
                            errors.push(serde_json::json!({
                                "index": index,
                                "error": format!("Unknown command: {}", other)
                            }));
                        }
                    }
                }
                let reply = serde_json::json!({
                    "type": "batch_result",
                    "total": commands.len(),
                    "success_count": results.len(),
                    "error_count": errors.len(),
                    "results": results,
                    "errors": errors,
                });
                vec![reply.to_string()]
            }
            "ota_start" => {
                ota_received = 0;
                ota_total = parsed["size"].as_u64().unwrap_or(0) as usize;
                ota_filename = parsed["filename"].as_str().unwrap_or("main.py").to_string();
                vec![format!(
                    r#"{{"type":"ota_ready","filename":"{}","expected_size":{}}}"#,
                    ota_filename, ota_total
                )]
            }
            "ota_chunk" => {
                let len = parsed["data"].as_array().map(|a| a.len()).unwrap_or(0);
                ota_received += len;
                vec![format!(
                    r#"{{"type":"ota_progress","received":{},"total":{},"progress":{:.1}}}"#,
                    ota_received,
                    ota_total,
                    (ota_received as f64 / ota_total.max(1) as f64) * 100.0
                )]
            }
            "ota_finish" => vec![format!(
                r#"{{"type":"ota_complete","filename":"{}","size":{},"reboot_required":{}}}"#,
                ota_filename,
                ota_received,
                ota_filename == "main.py"
            )],
            "ota_abort" => vec![r#"{"type":"ota_aborted","success":true}"#.to_string()],
            other => vec![format!(
                r#"{{"type":"error","message":"Unknown command: {}"}}"#,
                other
            )],
        }
    }
}

/// Options tuned for tests: short deadlines, fast backoff, no automatic
/// heartbeat.
pub fn test_options() -> LinkOptions {
    let mut options = LinkOptions::default();
    options.transport.port = "mock0".to_string();
    options.command_timeout = Duration::from_millis(300);
    options.wifi_scan_timeout = Duration::from_millis(400);
    options.batch_timeout = Duration::from_millis(400);
    options.ota_finish_timeout = Duration::from_millis(400);
    options.reconnect_base_delay = Duration::from_millis(20);
    options.heartbeat_interval = Duration::ZERO;
    options
}

/// Build and connect a link over a fresh mock net with the given options.
pub async fn connected_link_with(options: LinkOptions) -> (DeviceLink, Arc<MockNet>) {
    let net = MockNet::new();
    let link = DeviceLink::new(options, Arc::new(MockTransport(net.clone())));
    assert!(link.connect().await.expect("mock connect"), "connect");
    (link, net)
}

/// Build and connect a link scripted with the standard firmware handler.
pub async fn connected_link() -> (DeviceLink, Arc<MockNet>) {
    let net = MockNet::new();
    net.set_handler(firmware_handler());
    let link = DeviceLink::new(test_options(), Arc::new(MockTransport(net.clone())));
    assert!(link.connect().await.expect("mock connect"), "connect");
    (link, net)
}

/// Wait until `predicate` holds or `deadline` elapses; panics on timeout.
pub async fn wait_for(deadline: Duration, mut predicate: impl FnMut() -> bool) {
    let start = std::time::Instant::now();
    while !predicate() {
        if start.elapsed() > deadline {
            panic!("condition not reached within {:?}", deadline);
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}
