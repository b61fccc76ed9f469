//! Typed ComfyUI REST payloads.
//!
//! ComfyUI answers with loosely structured JSON. The types here keep only
//! the fields the orchestrator needs and tolerate everything else.

use std::collections::BTreeMap;

use serde::Deserialize;

use comfybot_core::admission::{GpuDevice, ResourceSnapshot};

// ---------------------------------------------------------------------------
// /prompt
// ---------------------------------------------------------------------------

/// Response returned by `POST /prompt` after queuing a workflow.
#[derive(Debug, Clone, Deserialize)]
pub struct SubmitResponse {
    /// Server-assigned identifier for the queued prompt.
    pub prompt_id: String,
    /// Position in the execution queue.
    #[serde(default)]
    pub number: i64,
    #[serde(default)]
    pub node_errors: serde_json::Value,
}

/// Response returned by `POST /upload/image`.
#[derive(Debug, Clone, Deserialize)]
pub struct UploadResponse {
    pub name: String,
    #[serde(default)]
    pub subfolder: String,
    #[serde(default, rename = "type")]
    pub kind: String,
}

// ---------------------------------------------------------------------------
// /history/{prompt_id}
// ---------------------------------------------------------------------------

/// An image written by an output node.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct OutputImage {
    pub filename: String,
    #[serde(default)]
    pub subfolder: String,
    /// `output` for saved images, `temp` for previews.
    #[serde(default = "default_output_type", rename = "type")]
    pub kind: String,
}

fn default_output_type() -> String {
    "output".to_string()
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct NodeOutput {
    #[serde(default)]
    pub images: Vec<OutputImage>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HistoryStatus {
    #[serde(default)]
    pub status_str: String,
    #[serde(default)]
    pub completed: bool,
    /// `[[event_name, {...}], ...]`
    #[serde(default)]
    pub messages: Vec<(String, serde_json::Value)>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HistoryEntry {
    #[serde(default)]
    pub status: Option<HistoryStatus>,
    #[serde(default)]
    pub outputs: BTreeMap<String, NodeOutput>,
}

/// Where a submitted prompt stands.
#[derive(Debug, Clone, PartialEq)]
pub enum PromptStatus {
    /// Not in history yet: queued or executing.
    InProgress,
    /// Finished; saved output images in node order.
    Completed(Vec<OutputImage>),
    /// The backend reported an execution error.
    Failed(String),
}

/// Interpret a `/history/{prompt_id}` response body.
pub fn parse_history(prompt_id: &str, body: &serde_json::Value) -> Result<PromptStatus, serde_json::Error> {
    let Some(raw) = body.get(prompt_id) else {
        return Ok(PromptStatus::InProgress);
    };
    let entry: HistoryEntry = serde_json::from_value(raw.clone())?;

    if let Some(status) = &entry.status {
        if status.status_str == "error" {
            return Ok(PromptStatus::Failed(execution_error_message(status)));
        }
        if !status.completed && entry.outputs.is_empty() {
            return Ok(PromptStatus::InProgress);
        }
    }

    let images = entry
        .outputs
        .into_values()
        .flat_map(|node| node.images)
        .filter(|img| img.kind == "output")
        .collect();
    Ok(PromptStatus::Completed(images))
}

fn execution_error_message(status: &HistoryStatus) -> String {
    status
        .messages
        .iter()
        .find(|(name, _)| name == "execution_error")
        .and_then(|(_, data)| {
            let message = data.get("exception_message")?.as_str()?.trim();
            let node = data
                .get("node_type")
                .and_then(|v| v.as_str())
                .unwrap_or("unknown node");
            Some(format!("{node}: {message}"))
        })
        .unwrap_or_else(|| "execution error".to_string())
}

// ---------------------------------------------------------------------------
// /queue
// ---------------------------------------------------------------------------

/// Snapshot of `GET /queue`. Each entry is
/// `[number, prompt_id, prompt, extra_data, outputs_to_execute]`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct QueueSnapshot {
    #[serde(default)]
    pub queue_running: Vec<serde_json::Value>,
    #[serde(default)]
    pub queue_pending: Vec<serde_json::Value>,
}

fn entry_prompt_id(entry: &serde_json::Value) -> Option<&str> {
    entry.get(1)?.as_str()
}

impl QueueSnapshot {
    pub fn is_running(&self, prompt_id: &str) -> bool {
        self.queue_running
            .iter()
            .any(|e| entry_prompt_id(e) == Some(prompt_id))
    }

    pub fn is_pending(&self, prompt_id: &str) -> bool {
        self.queue_pending
            .iter()
            .any(|e| entry_prompt_id(e) == Some(prompt_id))
    }

    pub fn depth(&self) -> usize {
        self.queue_running.len() + self.queue_pending.len()
    }
}

// ---------------------------------------------------------------------------
// /system_stats
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct DeviceStats {
    pub name: String,
    #[serde(default, rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub index: Option<i64>,
    #[serde(default)]
    pub vram_total: u64,
    #[serde(default)]
    pub vram_free: u64,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SystemStats {
    #[serde(default)]
    pub system: serde_json::Value,
    #[serde(default)]
    pub devices: Vec<DeviceStats>,
}

impl SystemStats {
    /// GPU devices only; CPU entries carry no VRAM.
    pub fn to_snapshot(&self) -> ResourceSnapshot {
        ResourceSnapshot {
            devices: self
                .devices
                .iter()
                .filter(|d| d.kind != "cpu" && d.vram_total > 0)
                .map(|d| GpuDevice {
                    name: d.name.clone(),
                    vram_total: d.vram_total,
                    vram_free: d.vram_free,
                })
                .collect(),
        }
    }
}
