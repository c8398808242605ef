//! Batch command execution.
//!
//! A `batch` command carries an ordered list of sub-commands; the device
//! executes them in order and returns one `batch_result` with index-tagged
//! success payloads and failures. Demultiplexing is positional -- results
//! land in a vector slot per input index, never a keyed map that could
//! reorder them.

use serde::Serialize;
use serde_json::{json, Value};

use super::error::{LinkError, Result};
use super::response::{AdcReading, Response};
use super::DeviceLink;

/// One sub-command inside a batch request.
#[derive(Debug, Clone, Serialize)]
pub struct BatchCommand {
    pub command: String,
    #[serde(flatten)]
    pub params: serde_json::Map<String, Value>,
}

impl BatchCommand {
    pub fn new(command: &str) -> Self {
        Self {
            command: command.to_string(),
            params: serde_json::Map::new(),
        }
    }

    /// Attach parameters; non-object values are ignored (commands take
    /// keyword parameters only).
    pub fn with_params(command: &str, params: Value) -> Self {
        let params = match params {
            Value::Object(map) => map,
            _ => serde_json::Map::new(),
        };
        Self {
            command: command.to_string(),
            params,
        }
    }
}

/// Per-index outcome: the raw success payload or the device's error string.
pub type BatchOutcome = std::result::Result<Value, String>;

impl DeviceLink {
    /// Execute `commands` as one aggregate request with the extended batch
    /// deadline. The returned vector has exactly one entry per input, in
    /// input order.
    pub async fn batch_commands(&self, commands: &[BatchCommand]) -> Result<Vec<BatchOutcome>> {
        if commands.is_empty() {
            return Err(LinkError::Protocol("empty batch".to_string()));
        }
        let params = json!({ "commands": commands });
        let timeout = self.shared().opts.batch_timeout;
        let reply = self.dispatch("batch", Some(params), timeout, false).await?;
        let (results, errors) = match reply {
            Response::BatchResult {
                results, errors, ..
            } => (results, errors),
            other => {
                return Err(LinkError::Protocol(format!(
                    "expected batch_result, device sent '{}'",
                    other.kind()
                )))
            }
        };

        let mut outcomes: Vec<BatchOutcome> =
            vec![Err("no result reported".to_string()); commands.len()];
        for item in results {
            if let Some(slot) = outcomes.get_mut(item.index) {
                *slot = Ok(item.result);
            }
        }
        for failure in errors {
            if let Some(slot) = outcomes.get_mut(failure.index) {
                *slot = Err(failure.error);
            }
        }
        Ok(outcomes)
    }

    /// Read several ADC channels in one round trip. Outputs map to `pins`
    /// positionally.
    pub async fn read_adc_channels(
        &self,
        pins: &[u8],
    ) -> Result<Vec<std::result::Result<AdcReading, String>>> {
        let commands: Vec<BatchCommand> = pins
            .iter()
            .map(|pin| BatchCommand::with_params("adc_read", json!({ "pin": pin })))
            .collect();
        let outcomes = self.batch_commands(&commands).await?;
        Ok(outcomes
            .into_iter()
            .map(|outcome| {
                outcome.and_then(|value| {
                    serde_json::from_value::<AdcReading>(value)
                        .map_err(|e| format!("malformed adc payload: {}", e))
                })
            })
            .collect())
    }
}
