//! Cross-process fanout.
//!
//! Several server processes can share one channel so broadcasts and directed
//! events reach vehicles connected elsewhere. Each process stamps its own
//! origin on what it publishes and ignores envelopes carrying that origin.

use std::sync::Arc;

use futures::stream::BoxStream;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::BroadcastStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use vicinity_core::VehicleId;

use crate::hub::{HubCommand, HubHandle};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "vehicleId", rename_all = "snake_case")]
pub enum FanoutTarget {
    All,
    Vehicle(VehicleId),
}

/// One published event. `payload` is the complete wire frame.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub origin: String,
    pub target: FanoutTarget,
    pub payload: String,
}

#[derive(Debug, thiserror::Error)]
pub enum FanoutError {
    #[error("fanout channel closed")]
    Closed,
}

pub trait FanoutChannel: Send + Sync {
    fn publish(&self, envelope: Envelope) -> Result<(), FanoutError>;

    /// Every envelope published after the call, own ones included.
    fn subscribe(&self) -> BoxStream<'static, Envelope>;
}

/// Channel shared by hubs living in the same process.
pub struct InProcessChannel {
    tx: broadcast::Sender<Envelope>,
}

impl InProcessChannel {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }
}

impl FanoutChannel for InProcessChannel {
    fn publish(&self, envelope: Envelope) -> Result<(), FanoutError> {
        // No subscribers is not an error: nobody else is listening yet.
        let _ = self.tx.send(envelope);
        Ok(())
    }

    fn subscribe(&self) -> BoxStream<'static, Envelope> {
        BroadcastStream::new(self.tx.subscribe())
            .filter_map(|item| async move {
                match item {
                    Ok(envelope) => Some(envelope),
                    Err(BroadcastStreamRecvError::Lagged(n)) => {
                        warn!(skipped = n, "fanout subscriber lagged");
                        None
                    }
                }
            })
            .boxed()
    }
}

/// The hub's view of the fanout: an origin plus an optional channel.
#[derive(Clone)]
pub struct Fanout {
    origin: String,
    channel: Option<Arc<dyn FanoutChannel>>,
}

impl Fanout {
    /// No channel: publishing is a no-op.
    pub fn local_only() -> Self {
        Self {
            origin: String::new(),
            channel: None,
        }
    }

    pub fn new(origin: impl Into<String>, channel: Arc<dyn FanoutChannel>) -> Self {
        Self {
            origin: origin.into(),
            channel: Some(channel),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.channel.is_some()
    }

    pub fn origin(&self) -> &str {
        &self.origin
    }

    /// Returns `true` if the envelope was handed to the channel.
    pub fn publish(&self, target: FanoutTarget, payload: &str) -> bool {
        let Some(channel) = &self.channel else {
            return false;
        };
        let envelope = Envelope {
            origin: self.origin.clone(),
            target,
            payload: payload.to_owned(),
        };
        match channel.publish(envelope) {
            Ok(()) => true,
            Err(e) => {
                warn!(error = %e, "fanout publish failed");
                false
            }
        }
    }

    /// Whether an envelope came from this process.
    pub fn is_own(&self, envelope: &Envelope) -> bool {
        envelope.origin == self.origin
    }

    /// Forward foreign envelopes into the hub until cancelled.
    pub fn spawn_subscriber(&self, hub: HubHandle, cancel: CancellationToken) -> Option<JoinHandle<()>> {
        let channel = self.channel.clone()?;
        let this = self.clone();
        Some(tokio::spawn(async move {
            let mut stream = channel.subscribe();
            info!(origin = %this.origin, "fanout subscriber started");
            loop {
                tokio::select! {
                    () = cancel.cancelled() => break,
                    next = stream.next() => {
                        let Some(envelope) = next else { break };
                        if this.is_own(&envelope) {
                            continue;
                        }
                        if !hub.send(HubCommand::Remote(envelope)).await {
                            debug!("hub gone, stopping fanout subscriber");
                            break;
                        }
                    }
                }
            }
        }))
    }
}
