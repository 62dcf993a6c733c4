//! Wire protocol over the duplex channel
//!
//! Every feed (sampling, tasks, request rate, liveness ping) speaks small
//! JSON objects. Incoming messages are not tagged with a type field; they
//! are classified by which keys they carry, matching the producer's contract.

use std::collections::HashMap;

use serde::Serialize;
use serde_json::Value;

use crate::types::{Task, Trace};

/// Message sent from the console to the producer.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "action")]
pub enum ClientMessage {
    /// Heartbeat keeping the connection alive.
    KeepAlive,

    /// Ask the producer to end a sampling session.
    #[serde(rename = "stop")]
    Stop {
        #[serde(rename = "samplingId")]
        sampling_id: String,
    },

    /// Liveness probe; the producer answers with `pong`.
    #[serde(rename = "ping")]
    Ping,
}

/// Message received from the producer, across all feeds.
#[derive(Debug, Clone)]
pub enum ServerMessage {
    /// Sampling-session id assignment, sent once right after open.
    SamplingStarted { sampling_id: String },

    /// A batch of flat trace records plus the producer's running maximum
    /// duration observation.
    TraceBatch {
        traces: Vec<Trace>,
        max_duration: u64,
    },

    /// Producer ended the sampling session.
    Stop,

    /// Current requests-per-second sample.
    RequestRate(f64),

    /// Request counts per live sampling session.
    SamplingCounts(HashMap<String, u64>),

    /// Whole-list task snapshot.
    TaskList(Vec<Task>),

    /// Single-task update.
    TaskUpdated(Box<Task>),

    /// Task removal by id.
    TaskRemoved(String),

    /// Answer to a `ping`.
    Pong,
}

impl ServerMessage {
    /// Classify an incoming JSON object by the keys it carries.
    ///
    /// Returns `None` for shapes outside the protocol; malformed payloads of
    /// a recognized shape are also dropped, with a diagnostic.
    pub fn classify(value: &Value) -> Option<ServerMessage> {
        if let Some(id) = value.get("samplingId") {
            return opaque_id(id).map(|sampling_id| ServerMessage::SamplingStarted { sampling_id });
        }

        match value.get("action").and_then(Value::as_str) {
            Some("stop") => return Some(ServerMessage::Stop),
            Some("pong") => return Some(ServerMessage::Pong),
            _ => {}
        }

        if let Some(traces) = value.get("traces") {
            let traces: Vec<Trace> = match serde_json::from_value(traces.clone()) {
                Ok(traces) => traces,
                Err(e) => {
                    tracing::debug!(error = %e, "Dropping malformed trace batch");
                    return None;
                }
            };
            let max_duration = value
                .get("maxDuration")
                .and_then(Value::as_u64)
                .unwrap_or(0);
            return Some(ServerMessage::TraceBatch {
                traces,
                max_duration,
            });
        }

        if let Some(rate) = value.get("reqSec") {
            return rate.as_f64().map(ServerMessage::RequestRate);
        }

        if let Some(counts) = value.get("samplingCount").and_then(Value::as_object) {
            let counts = counts
                .iter()
                .filter_map(|(id, count)| count.as_u64().map(|c| (id.clone(), c)))
                .collect();
            return Some(ServerMessage::SamplingCounts(counts));
        }

        if let Some(tasks) = value.get("tasks") {
            return match serde_json::from_value(tasks.clone()) {
                Ok(tasks) => Some(ServerMessage::TaskList(tasks)),
                Err(e) => {
                    tracing::debug!(error = %e, "Dropping malformed task list");
                    None
                }
            };
        }

        if let Some(task) = value.get("task") {
            return match serde_json::from_value(task.clone()) {
                Ok(task) => Some(ServerMessage::TaskUpdated(Box::new(task))),
                Err(e) => {
                    tracing::debug!(error = %e, "Dropping malformed task update");
                    None
                }
            };
        }

        if let Some(id) = value.get("taskId") {
            return opaque_id(id).map(ServerMessage::TaskRemoved);
        }

        None
    }
}

/// Opaque ids may arrive as JSON strings or numbers.
fn opaque_id(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}
