use crate::link::LinkError;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use tokio::sync::oneshot;
use tracing::debug;
use uuid::Uuid;


/// Final status a producer receives for a message.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MsgStatus {
    /// Delivered to the end of the pipeline
    Done,
    /// No downstream link to hand the message to
    Unroutable,
    /// Handled, but dropped for exceeding a rate limit
    Throttled,
}

impl fmt::Display for MsgStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            MsgStatus::Done => "done",
            MsgStatus::Unroutable => "unroutable",
            MsgStatus::Throttled => "throttled",
        };
        f.write_str(s)
    }
}

/// Receiving half of a message acknowledgment
pub type AckReceiver = oneshot::Receiver<MsgStatus>;

/// Message travelling through the pipeline.
///
/// Carries opaque payload bytes plus a string metadata map that links use
/// for routing decisions (e.g. the throttler's partition key). A message ends
/// either by being handed to a sink or by being acknowledged with a
/// [`MsgStatus`]; both consume it.
#[derive(Debug)]
pub struct Message {
    /// UUIDv7 identifier (time-ordered)
    pub id: Uuid,

    /// When the message entered the pipeline
    pub created_at: DateTime<Utc>,

    meta: HashMap<String, String>,
    payload: Vec<u8>,
    ack_tx: Option<oneshot::Sender<MsgStatus>>,
}

impl Message {
    /// Create a message without an acknowledgment channel
    pub fn new(payload: impl Into<Vec<u8>>) -> Self {
        Self {
            id: Uuid::now_v7(),
            created_at: Utc::now(),
            meta: HashMap::new(),
            payload: payload.into(),
            ack_tx: None,
        }
    }

    /// Create a message whose final status is reported on the returned receiver
    pub fn with_ack(payload: impl Into<Vec<u8>>) -> (Self, AckReceiver) {
        let (tx, rx) = oneshot::channel();
        let mut msg = Self::new(payload);
        msg.ack_tx = Some(tx);
        (msg, rx)
    }

    /// Builder-style metadata setter
    pub fn meta_entry(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.meta.insert(key.into(), value.into());
        self
    }

    /// Look up a metadata field
    pub fn meta(&self, key: &str) -> Option<&str> {
        self.meta.get(key).map(String::as_str)
    }

    pub fn metadata(&self) -> &HashMap<String, String> {
        &self.meta
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn into_payload(self) -> Vec<u8> {
        self.payload
    }

    /// Time spent in the pipeline so far
    pub fn age(&self) -> Duration {
        Utc::now() - self.created_at
    }

    /// Acknowledge the message with `status`.
    ///
    /// Messages created without an ack channel are acknowledged trivially. A
    /// producer that dropped its receiver has stopped listening; that is not a
    /// pipeline fault, so it is logged and reported as success.
    pub fn ack(mut self, status: MsgStatus) -> Result<(), LinkError> {
        if let Some(tx) = self.ack_tx.take() {
            if tx.send(status).is_err() {
                debug!(msg_id = %self.id, %status, "Ack receiver dropped");
            }
        }
        Ok(())
    }

    pub fn ack_done(self) -> Result<(), LinkError> {
        self.ack(MsgStatus::Done)
    }

    /// Acknowledge that the message was dropped for exceeding its rate budget
    pub fn ack_throttled(self) -> Result<(), LinkError> {
        self.ack(MsgStatus::Throttled)
    }

    pub fn ack_unroutable(self) -> Result<(), LinkError> {
        self.ack(MsgStatus::Unroutable)
    }
}

/// Serialized form of a message as read from a JSON-lines feed.
///
/// ```json
/// {"meta": {"tenant": "acme"}, "payload": "hello"}
/// ```
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MessageEnvelope {
    #[serde(default)]
    pub meta: HashMap<String, String>,

    pub payload: String,
}

impl From<MessageEnvelope> for Message {
    fn from(envelope: MessageEnvelope) -> Self {
        let mut msg = Message::new(envelope.payload);
        msg.meta = envelope.meta;
        msg
    }
}
