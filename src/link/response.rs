//! Typed device responses.
//!
//! Every structured reply the firmware can emit is one JSON object carrying a
//! `type` discriminant. Rather than passing raw dictionaries around, the link
//! layer models the full set as a closed sum type; anything with an unknown
//! (or missing) `type` lands in [`Response::Unrecognized`] so new firmware
//! fields never break old hosts.

use serde::Deserialize;
use serde_json::Value;

/// One entry reported by an I2C bus scan.
#[derive(Debug, Clone, Deserialize)]
pub struct I2cDevice {
    pub address: u8,
    #[serde(default)]
    pub hex: String,
}

/// Directory or file entry from `file_list`.
#[derive(Debug, Clone, Deserialize)]
pub struct FsEntry {
    pub name: String,
    #[serde(default)]
    pub size: u64,
    #[serde(rename = "type", default)]
    pub kind: String,
}

/// One access point from a WiFi scan.
#[derive(Debug, Clone, Deserialize)]
pub struct WifiNetwork {
    pub ssid: String,
    #[serde(default)]
    pub bssid: String,
    #[serde(default)]
    pub channel: u8,
    pub rssi: i32,
    #[serde(default)]
    pub security: String,
}

/// Indexed success payload inside a `batch_result`.
#[derive(Debug, Clone, Deserialize)]
pub struct BatchItem {
    pub index: usize,
    pub result: Value,
}

/// Indexed failure inside a `batch_result`.
#[derive(Debug, Clone, Deserialize)]
pub struct BatchFailure {
    pub index: usize,
    pub error: String,
}

/// ADC sample payload, shared by `adc_read` replies and batch results.
#[derive(Debug, Clone, Deserialize)]
pub struct AdcReading {
    pub pin: u8,
    pub raw_value: u32,
    pub voltage: f64,
}

/// A structured reply from the device, discriminated by its `type` field.
///
/// Field defaults are deliberately permissive: firmware revisions add and
/// drop payload fields, and a missing field must not reject the frame.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Response {
    Pong {
        #[serde(default)]
        timestamp: u64,
        #[serde(default)]
        uptime: u64,
    },
    Version {
        #[serde(default)]
        micropython: String,
        #[serde(default)]
        platform: String,
        #[serde(default)]
        release: String,
        #[serde(default)]
        machine: String,
    },
    SystemInfo {
        #[serde(default)]
        chip_id: String,
        #[serde(default)]
        free_memory: u64,
        #[serde(default)]
        used_memory: u64,
        #[serde(default)]
        total_memory: u64,
        #[serde(default)]
        freq_mhz: u32,
        #[serde(default)]
        uptime_ms: u64,
    },
    GpioRead {
        pin: u8,
        value: u8,
        #[serde(default)]
        mode: String,
    },
    GpioWrite {
        pin: u8,
        value: u8,
        #[serde(default)]
        success: bool,
    },
    AdcRead {
        pin: u8,
        raw_value: u32,
        voltage: f64,
        #[serde(default)]
        resolution: String,
    },
    I2cScan {
        #[serde(default)]
        devices: Vec<I2cDevice>,
        #[serde(default)]
        count: u32,
    },
    I2cRead {
        address: u8,
        #[serde(default)]
        register: Option<u8>,
        #[serde(default)]
        data: Vec<u8>,
    },
    I2cWrite {
        address: u8,
        #[serde(default)]
        bytes_written: u32,
        #[serde(default)]
        success: bool,
    },
    SpiTransfer {
        #[serde(default)]
        tx_data: Vec<u8>,
        #[serde(default)]
        rx_data: Vec<u8>,
    },
    Reboot {
        #[serde(default)]
        message: String,
    },
    FileList {
        #[serde(default)]
        path: String,
        #[serde(default)]
        directories: Vec<FsEntry>,
        #[serde(default)]
        files: Vec<FsEntry>,
        #[serde(default)]
        total: u32,
    },
    FileRead {
        filename: String,
        #[serde(default)]
        content: String,
        #[serde(default)]
        size: u64,
        #[serde(default)]
        truncated: bool,
    },
    FileWrite {
        filename: String,
        #[serde(default)]
        size: u64,
        #[serde(default)]
        success: bool,
    },
    FileDelete {
        path: String,
        #[serde(default)]
        success: bool,
    },
    FileMkdir {
        path: String,
        #[serde(default)]
        success: bool,
    },
    WifiScan {
        #[serde(default)]
        networks: Vec<WifiNetwork>,
        #[serde(default)]
        count: u32,
    },
    WifiConnect {
        #[serde(default)]
        connected: bool,
        #[serde(default)]
        ssid: String,
        #[serde(default)]
        ip_address: String,
        #[serde(default)]
        gateway: String,
    },
    BatchResult {
        #[serde(default)]
        total: u32,
        #[serde(default)]
        success_count: u32,
        #[serde(default)]
        error_count: u32,
        #[serde(default)]
        results: Vec<BatchItem>,
        #[serde(default)]
        errors: Vec<BatchFailure>,
    },
    OtaReady {
        #[serde(default)]
        filename: String,
        #[serde(default)]
        expected_size: u64,
    },
    OtaProgress {
        #[serde(default)]
        received: u64,
        #[serde(default)]
        total: u64,
        #[serde(default)]
        progress: f64,
    },
    OtaComplete {
        #[serde(default)]
        filename: String,
        #[serde(default)]
        size: u64,
        #[serde(default)]
        reboot_required: bool,
    },
    OtaAborted {
        #[serde(default)]
        success: bool,
    },
    Error {
        #[serde(default)]
        message: String,
    },
    /// Valid JSON object whose `type` is unknown (or absent). Kept verbatim
    /// so subscribers can still inspect it.
    #[serde(skip)]
    Unrecognized { payload: Value },
}

impl Response {
    /// Build a `Response` from an already-parsed JSON object, falling back to
    /// [`Response::Unrecognized`] instead of failing.
    pub fn from_value(value: Value) -> Response {
        match serde_json::from_value::<Response>(value.clone()) {
            Ok(resp) => resp,
            Err(_) => Response::Unrecognized { payload: value },
        }
    }

    /// The `type` discriminant as it appears on the wire, for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Response::Pong { .. } => "pong",
            Response::Version { .. } => "version",
            Response::SystemInfo { .. } => "system_info",
            Response::GpioRead { .. } => "gpio_read",
            Response::GpioWrite { .. } => "gpio_write",
            Response::AdcRead { .. } => "adc_read",
            Response::I2cScan { .. } => "i2c_scan",
            Response::I2cRead { .. } => "i2c_read",
            Response::I2cWrite { .. } => "i2c_write",
            Response::SpiTransfer { .. } => "spi_transfer",
            Response::Reboot { .. } => "reboot",
            Response::FileList { .. } => "file_list",
            Response::FileRead { .. } => "file_read",
            Response::FileWrite { .. } => "file_write",
            Response::FileDelete { .. } => "file_delete",
            Response::FileMkdir { .. } => "file_mkdir",
            Response::WifiScan { .. } => "wifi_scan",
            Response::WifiConnect { .. } => "wifi_connect",
            Response::BatchResult { .. } => "batch_result",
            Response::OtaReady { .. } => "ota_ready",
            Response::OtaProgress { .. } => "ota_progress",
            Response::OtaComplete { .. } => "ota_complete",
            Response::OtaAborted { .. } => "ota_aborted",
            Response::Error { .. } => "error",
            Response::Unrecognized { .. } => "unrecognized",
        }
    }

    /// The command name whose pending entry this response settles.
    ///
    /// This is the fixed response-type to command-name correlation table:
    /// most replies share their command's name; the exceptions are `pong`
    /// (from `ping`), `batch_result` (from `batch`) and the OTA
    /// acknowledgments. `error` and unrecognized frames settle nothing --
    /// the wire carries no hint of which command produced them.
    pub fn command_name(&self) -> Option<&'static str> {
        let name = match self {
            Response::Pong { .. } => "ping",
            Response::BatchResult { .. } => "batch",
            Response::OtaReady { .. } => "ota_start",
            Response::OtaProgress { .. } => "ota_chunk",
            Response::OtaComplete { .. } => "ota_finish",
            Response::OtaAborted { .. } => "ota_abort",
            Response::Error { .. } | Response::Unrecognized { .. } => return None,
            other => other.kind(),
        };
        Some(name)
    }
}
