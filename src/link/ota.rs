//! Chunked OTA file transfer.
//!
//! The device accepts a `start`/`chunk`/`finish` sub-protocol on the normal
//! command channel: `ota_start` announces filename, size, and a checksum
//! computed over the whole payload before anything is sent; each `ota_chunk`
//! carries its byte offset and is acknowledged before the next is written
//! (embedded targets have small RX buffers and no out-of-order reassembly);
//! `ota_finish` makes the device verify the checksum. Any failure triggers a
//! best-effort `ota_abort` so the device can discard its partial file.

use log::debug;
use serde::Serialize;
use serde_json::json;
use sha2::{Digest, Sha256};

use super::error::{LinkError, Result};
use super::record;
use super::response::Response;
use super::DeviceLink;
use crate::recorder::LogLevel;

/// The single in-flight transfer. At most one session exists per link.
#[derive(Debug)]
pub struct OtaSession {
    pub filename: String,
    pub total_size: usize,
    pub checksum: String,
    pub bytes_sent: usize,
}

/// Result of a completed transfer.
#[derive(Debug, Clone, Serialize)]
pub struct OtaOutcome {
    pub filename: String,
    pub size: u64,
    /// True when the device must restart for the new file to take effect.
    pub reboot_required: bool,
}

/// Fractional progress observer, called after each acknowledged chunk with a
/// non-decreasing value ending at 1.0.
pub type ProgressCallback = Box<dyn Fn(f32) + Send + Sync>;

/// Content checksum sent in `ota_start`: truncated SHA-256 hex digest.
pub(crate) fn content_checksum(data: &[u8]) -> String {
    use std::fmt::Write;
    let digest = Sha256::digest(data);
    let mut hex = String::with_capacity(32);
    for byte in digest.iter().take(16) {
        let _ = write!(&mut hex, "{:02x}", byte);
    }
    hex
}

impl DeviceLink {
    /// Upload `content` as `filename` on the device.
    ///
    /// Strictly sequential: each chunk waits for its acknowledgment, so the
    /// transfer self-serializes on the command channel. On any failure an
    /// `ota_abort` is attempted (its own failure is swallowed) before the
    /// original error is returned; the in-progress flag is cleared on every
    /// path, so a failed transfer never wedges the manager.
    pub async fn ota_update(
        &self,
        filename: &str,
        content: &[u8],
        progress: Option<ProgressCallback>,
    ) -> Result<OtaOutcome> {
        {
            let mut session = self.shared().ota.lock().unwrap();
            if session.is_some() {
                return Err(LinkError::Protocol(
                    "an OTA transfer is already in progress".to_string(),
                ));
            }
            *session = Some(OtaSession {
                filename: filename.to_string(),
                total_size: content.len(),
                checksum: content_checksum(content),
                bytes_sent: 0,
            });
        }
        record(
            self.shared(),
            LogLevel::Info,
            "ota",
            format!("starting transfer of {} ({} bytes)", filename, content.len()),
        );

        let result = self.run_transfer(filename, content, progress).await;

        if let Err(ref e) = result {
            record(
                self.shared(),
                LogLevel::Error,
                "ota",
                format!("transfer failed: {}", e),
            );
            // Best effort; the device may already be gone.
            if let Err(abort_err) = self
                .dispatch("ota_abort", None, self.shared().opts.command_timeout, false)
                .await
            {
                debug!("ota abort notification failed: {}", abort_err);
            }
        }
        *self.shared().ota.lock().unwrap() = None;
        result
    }

    async fn run_transfer(
        &self,
        filename: &str,
        content: &[u8],
        progress: Option<ProgressCallback>,
    ) -> Result<OtaOutcome> {
        let opts = &self.shared().opts;
        let checksum = {
            let session = self.shared().ota.lock().unwrap();
            session.as_ref().map(|s| s.checksum.clone()).unwrap_or_default()
        };

        let start = self
            .dispatch(
                "ota_start",
                Some(json!({
                    "filename": filename,
                    "size": content.len(),
                    "checksum": checksum,
                })),
                opts.command_timeout,
                false,
            )
            .await?;
        match start {
            Response::OtaReady { .. } => {}
            other => {
                return Err(LinkError::Protocol(format!(
                    "expected ota_ready, device sent '{}'",
                    other.kind()
                )))
            }
        }

        let chunk_size = opts.ota_chunk_size.max(1);
        let total = content.len();
        for (index, chunk) in content.chunks(chunk_size).enumerate() {
            let offset = index * chunk_size;
            let reply = self
                .dispatch(
                    "ota_chunk",
                    Some(json!({ "offset": offset, "data": chunk })),
                    opts.command_timeout,
                    false,
                )
                .await?;
            match reply {
                Response::OtaProgress { .. } => {}
                other => {
                    return Err(LinkError::Protocol(format!(
                        "expected ota_progress, device sent '{}'",
                        other.kind()
                    )))
                }
            }
            let sent = offset + chunk.len();
            if let Some(session) = self.shared().ota.lock().unwrap().as_mut() {
                session.bytes_sent = sent;
            }
            if let Some(cb) = &progress {
                cb(sent as f32 / total as f32);
            }
        }

        let finish = self
            .dispatch("ota_finish", None, opts.ota_finish_timeout, false)
            .await?;
        match finish {
            Response::OtaComplete {
                filename,
                size,
                reboot_required,
            } => {
                record(
                    self.shared(),
                    LogLevel::Info,
                    "ota",
                    format!(
                        "transfer complete: {} ({} bytes, reboot_required={})",
                        filename, size, reboot_required
                    ),
                );
                Ok(OtaOutcome {
                    filename,
                    size,
                    reboot_required,
                })
            }
            other => Err(LinkError::Protocol(format!(
                "expected ota_complete, device sent '{}'",
                other.kind()
            ))),
        }
    }

    /// Explicitly abort the current transfer. The session is cleared even if
    /// the device never acknowledges.
    pub async fn ota_abort(&self) -> Result<()> {
        let had_session = self.shared().ota.lock().unwrap().take().is_some();
        let sent = self
            .dispatch("ota_abort", None, self.shared().opts.command_timeout, false)
            .await;
        if had_session {
            record(self.shared(), LogLevel::Info, "ota", "transfer aborted");
        }
        sent.map(|_| ())
    }

    pub fn is_ota_in_progress(&self) -> bool {
        self.shared().ota.lock().unwrap().is_some()
    }
}
