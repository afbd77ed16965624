//! Client for the external clip-generation service's queue protocol:
//! submit a request tagged with a session hash, then consume the
//! server-sent-event stream keyed by that hash until a terminal event.

use anyhow::{Context, Result, bail};
use rand::Rng;
use rand::distributions::Alphanumeric;
use reqwest::Client;
use tracing::{debug, info};

const ZEROGPU_UUID: &str = "fwmmUsBxWJ9SqpiE-V8r5";

/// Per-attempt correlation token for the shared service: 13 random
/// alphanumeric characters, regenerated on every attempt, never reused.
pub fn session_hash() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(13)
        .map(char::from)
        .collect()
}

/// Events pushed on the generation stream, reduced from the wire `msg` field.
#[derive(Debug, Clone, PartialEq)]
pub enum GenEvent {
    /// Position in the service queue. Informational only.
    Queued { rank: u64, queue_size: u64 },
    Started,
    Generating,
    /// Terminal success; `url` is absent when the payload is malformed.
    Completed { url: Option<String> },
    /// Stream end with no further events.
    Closed,
    /// Malformed or unrecognized event. Skipped, never fatal.
    Ignored,
}

/// Parses one SSE `data:` payload. Non-JSON input maps to `Ignored`.
pub fn parse_event(data: &str) -> GenEvent {
    let value: serde_json::Value = match serde_json::from_str(data) {
        Ok(v) => v,
        Err(_) => return GenEvent::Ignored,
    };

    match value.get("msg").and_then(|m| m.as_str()) {
        Some("estimation") => GenEvent::Queued {
            rank: value.get("rank").and_then(|v| v.as_u64()).unwrap_or(0),
            queue_size: value
                .get("queue_size")
                .and_then(|v| v.as_u64())
                .unwrap_or(0),
        },
        Some("process_starts") => GenEvent::Started,
        Some("process_generating") => GenEvent::Generating,
        Some("process_completed") => GenEvent::Completed {
            url: value
                .pointer("/output/data/0/video/url")
                .and_then(|v| v.as_str())
                .map(str::to_string),
        },
        Some("close_stream") => GenEvent::Closed,
        _ => GenEvent::Ignored,
    }
}

/// Maps one event to a terminal outcome, or `None` to keep consuming.
pub fn event_outcome(event: &GenEvent) -> Option<Result<String>> {
    match event {
        GenEvent::Completed { url: Some(url) } => Some(Ok(url.clone())),
        GenEvent::Completed { url: None } => {
            Some(Err(anyhow::anyhow!("completed event carried no clip URL")))
        }
        GenEvent::Closed => Some(Err(anyhow::anyhow!(
            "event stream closed before a completed event"
        ))),
        _ => None,
    }
}

/// Incremental SSE framing: push raw chunks in, take complete `data:`
/// payloads out. Events are separated by a blank line; chunk boundaries may
/// fall anywhere.
#[derive(Debug, Default)]
pub struct SseBuffer {
    buf: String,
}

impl SseBuffer {
    pub fn push(&mut self, chunk: &str) -> Vec<String> {
        self.buf.push_str(chunk);

        let mut payloads = Vec::new();
        loop {
            let Some(split) = self.buf.find("\n\n") else {
                break;
            };
            let block: String = self.buf.drain(..split + 2).collect();
            let mut data_lines = Vec::new();
            for line in block.lines() {
                if let Some(rest) = line.strip_prefix("data:") {
                    data_lines.push(rest.trim_start().to_string());
                }
            }
            if !data_lines.is_empty() {
                payloads.push(data_lines.join("\n"));
            }
        }
        payloads
    }
}

/// Transport for the generation service. Cheap to clone; concurrent calls
/// with distinct session hashes are independent.
#[derive(Clone)]
pub struct LtxClient {
    client: Client,
    base_url: String,
}

impl LtxClient {
    pub fn new(client: Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into(),
        }
    }

    /// Joins the generation queue for one scene description.
    pub async fn submit(
        &self,
        session_hash: &str,
        prompt: &str,
        model: &str,
        guidance: &str,
        steps: u32,
    ) -> Result<()> {
        let body = serde_json::json!({
            "data": [prompt, model, guidance, steps],
            "event_data": null,
            "fn_index": 1,
            "trigger_id": 10,
            "session_hash": session_hash,
        });

        let url = format!("{}/queue/join?__theme=system", self.base_url);
        let resp = self
            .client
            .post(&url)
            .header("x-zerogpu-uuid", ZEROGPU_UUID)
            .json(&body)
            .send()
            .await
            .context("queue join request failed")?;

        if !resp.status().is_success() {
            bail!("queue join failed: HTTP {}", resp.status().as_u16());
        }
        Ok(())
    }

    /// Consumes the event stream for `session_hash` until a terminal event
    /// and returns the generated clip URL.
    pub async fn await_completion(&self, session_hash: &str) -> Result<String> {
        let url = format!("{}/queue/data?session_hash={}", self.base_url, session_hash);
        let mut resp = self
            .client
            .get(&url)
            .header("Accept", "text/event-stream")
            .send()
            .await
            .context("event stream request failed")?;

        if !resp.status().is_success() {
            bail!("event stream failed: HTTP {}", resp.status().as_u16());
        }

        let mut sse = SseBuffer::default();
        while let Some(chunk) = resp.chunk().await.context("event stream read failed")? {
            for payload in sse.push(&String::from_utf8_lossy(&chunk)) {
                let event = parse_event(&payload);
                match &event {
                    GenEvent::Queued { rank, queue_size } => {
                        info!(session_hash, rank, queue_size, "queued at service");
                    }
                    GenEvent::Started => debug!(session_hash, "generation started"),
                    GenEvent::Generating => debug!(session_hash, "generating frames"),
                    _ => {}
                }
                if let Some(outcome) = event_outcome(&event) {
                    return outcome;
                }
            }
        }

        bail!("event stream ended without a completed event")
    }
}
