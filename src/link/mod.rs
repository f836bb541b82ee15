// Pipeline sink contract
//
// A link receives messages and either terminates them (ack) or hands them to
// the next link through its Connector.

use crate::message::Message;
use std::fmt;
use std::sync::{Arc, RwLock};
use tokio::sync::mpsc;
use tracing::warn;


/// Errors a link can return from `recv`
#[derive(Debug, Clone, PartialEq)]
pub enum LinkError {
    /// The link has no downstream link to forward to
    NotConnected { link: String },
    /// The downstream channel's receiver has been dropped
    SinkClosed { link: String },
    /// Failure reported by a downstream link
    Downstream(String),
}

impl fmt::Display for LinkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LinkError::NotConnected { link } => {
                write!(f, "link '{}' has no downstream link", link)
            }
            LinkError::SinkClosed { link } => {
                write!(f, "sink '{}' is closed", link)
            }
            LinkError::Downstream(reason) => write!(f, "downstream failure: {}", reason),
        }
    }
}

impl std::error::Error for LinkError {}

/// A stage of the pipeline.
pub trait Link: Send + Sync {
    /// Link name, used in logs and counter names
    fn name(&self) -> &str;

    /// Handle one inbound message
    fn recv(&self, msg: Message) -> Result<(), LinkError>;
}

/// Forwarding half of a link: holds the next stage, if any.
pub struct Connector {
    owner: String,
    next: RwLock<Option<Arc<dyn Link>>>,
}

impl Connector {
    pub fn new(owner: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            next: RwLock::new(None),
        }
    }

    /// Set (or replace) the downstream link
    pub fn connect_to(&self, next: Arc<dyn Link>) {
        let mut slot = self.next.write().unwrap_or_else(|e| e.into_inner());
        *slot = Some(next);
    }

    pub fn is_connected(&self) -> bool {
        self.next
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .is_some()
    }

    /// Forward `msg` to the downstream link.
    ///
    /// Without a downstream link the message is acked as unroutable and
    /// `LinkError::NotConnected` is returned. Errors from the downstream link
    /// are returned unchanged.
    pub fn send(&self, msg: Message) -> Result<(), LinkError> {
        let next = self
            .next
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone();

        match next {
            Some(link) => link.recv(msg),
            None => {
                warn!(link = %self.owner, msg_id = %msg.id, "No downstream link, dropping message");
                msg.ack_unroutable()?;
                Err(LinkError::NotConnected {
                    link: self.owner.clone(),
                })
            }
        }
    }
}

/// Terminal link that pushes every message into a tokio channel.
///
/// `recv` never awaits: the channel is unbounded, so a slow consumer grows
/// the queue instead of stalling upstream links.
pub struct ChannelSink {
    name: String,
    tx: mpsc::UnboundedSender<Message>,
}

impl ChannelSink {
    /// Create sink and the receiver that drains it
    pub fn new(name: impl Into<String>) -> (Self, mpsc::UnboundedReceiver<Message>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                name: name.into(),
                tx,
            },
            rx,
        )
    }
}

impl Link for ChannelSink {
    fn name(&self) -> &str {
        &self.name
    }

    fn recv(&self, msg: Message) -> Result<(), LinkError> {
        self.tx.send(msg).map_err(|_| LinkError::SinkClosed {
            link: self.name.clone(),
        })
    }
}
