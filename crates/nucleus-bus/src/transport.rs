//! Message transport seam and the in-process network.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::runtime::Handle;
use tokio::sync::mpsc;

use crate::endpoint::EndpointId;
use crate::error::TransportError;
use crate::handler::MessageHandler;
use crate::message::Message;

/// Outbound half of a transport.
pub trait SendMessages: Send + Sync {
    fn send(&self, to: &EndpointId, message: Message) -> Result<(), TransportError>;
}

impl<F> SendMessages for F
where
    F: Fn(&EndpointId, Message) -> Result<(), TransportError> + Send + Sync,
{
    fn send(&self, to: &EndpointId, message: Message) -> Result<(), TransportError> {
        self(to, message)
    }
}

/// A transport an endpoint can attach its message handler to.
pub trait CommunicationChannel: SendMessages {
    /// Starts delivering messages addressed to `endpoint` into `handler`.
    fn open(&self, endpoint: &EndpointId, handler: Arc<MessageHandler>) -> Result<(), TransportError>;

    /// Stops delivery to `endpoint`. Closing an endpoint that is not open is
    /// a no-op.
    fn close(&self, endpoint: &EndpointId);
}

/// Connects endpoints living in the same process.
///
/// Every message is encoded to CBOR on send and decoded on delivery, so the
/// bytes crossing the network are exactly what a socket transport would
/// carry. Each endpoint has its own delivery task, which keeps messages
/// from one sender in order.
pub struct InProcessNetwork {
    runtime: Handle,
    endpoints: Mutex<HashMap<EndpointId, mpsc::UnboundedSender<Vec<u8>>>>,
}

impl InProcessNetwork {
    pub fn new(runtime: Handle) -> Arc<Self> {
        Arc::new(Self {
            runtime,
            endpoints: Mutex::new(HashMap::new()),
        })
    }

    pub fn is_open(&self, endpoint: &EndpointId) -> bool {
        self.endpoints
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains_key(endpoint)
    }
}

impl SendMessages for InProcessNetwork {
    fn send(&self, to: &EndpointId, message: Message) -> Result<(), TransportError> {
        let bytes = message.encode()?;
        let endpoints = self.endpoints.lock().unwrap_or_else(|e| e.into_inner());
        let inbox = endpoints
            .get(to)
            .ok_or_else(|| TransportError::EndpointNotContactable(to.clone()))?;
        inbox
            .send(bytes)
            .map_err(|_| TransportError::EndpointNotContactable(to.clone()))
    }
}

impl CommunicationChannel for InProcessNetwork {
    fn open(&self, endpoint: &EndpointId, handler: Arc<MessageHandler>) -> Result<(), TransportError> {
        let mut endpoints = self.endpoints.lock().unwrap_or_else(|e| e.into_inner());
        if endpoints.contains_key(endpoint) {
            return Err(TransportError::AlreadyOpen(endpoint.clone()));
        }
        let (tx, mut rx) = mpsc::unbounded_channel::<Vec<u8>>();
        endpoints.insert(endpoint.clone(), tx);

        let endpoint = endpoint.clone();
        self.runtime.spawn(async move {
            while let Some(bytes) = rx.recv().await {
                match Message::decode(&bytes) {
                    Ok(message) => handler.process_message(message),
                    Err(err) => tracing::warn!(%endpoint, "dropping undecodable message: {err}"),
                }
            }
            handler.on_local_channel_closed();
            tracing::debug!(%endpoint, "in-process channel closed");
        });
        Ok(())
    }

    fn close(&self, endpoint: &EndpointId) {
        self.endpoints
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(endpoint);
    }
}
