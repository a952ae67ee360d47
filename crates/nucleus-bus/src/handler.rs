//! Inbound message routing for one endpoint.
//!
//! A message that answers an earlier request is handed to whoever is waiting
//! for it. Anything else goes to the processor registered for its kind, or to
//! the unknown-message processor when there is none.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};

use tokio::sync::oneshot;

use crate::endpoint::EndpointId;
use crate::message::{Message, MessageId, MessageKind};
use crate::processors::MessageProcessAction;

struct PendingResponse {
    endpoint: EndpointId,
    reply: oneshot::Sender<Message>,
}

#[derive(Default)]
pub struct MessageHandler {
    processors: RwLock<HashMap<MessageKind, Arc<dyn MessageProcessAction>>>,
    unknown: RwLock<Option<Arc<dyn MessageProcessAction>>>,
    pending: Mutex<HashMap<MessageId, PendingResponse>>,
}

impl MessageHandler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Routes messages of `action.message_kind()` to `action`. The first
    /// action registered for a kind wins; returns false if one was already
    /// present.
    pub fn act_on_arrival(&self, action: Arc<dyn MessageProcessAction>) -> bool {
        let mut processors = self.processors.write().unwrap_or_else(|e| e.into_inner());
        let kind = action.message_kind();
        if processors.contains_key(&kind) {
            return false;
        }
        processors.insert(kind, action);
        true
    }

    /// Processor for messages no other processor claims.
    pub fn on_unknown_message(&self, action: Arc<dyn MessageProcessAction>) {
        *self.unknown.write().unwrap_or_else(|e| e.into_inner()) = Some(action);
    }

    pub fn handles(&self, kind: MessageKind) -> bool {
        self.processors
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .contains_key(&kind)
    }

    /// Registers interest in the reply to `message_id` sent to `endpoint`.
    /// Must be called before the request goes out so a fast reply is not
    /// missed. The receiver errors if the endpoint signs off or the local
    /// channel closes first.
    pub fn forward_response(
        &self,
        endpoint: EndpointId,
        message_id: MessageId,
    ) -> oneshot::Receiver<Message> {
        let (reply, rx) = oneshot::channel();
        self.pending
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(message_id, PendingResponse { endpoint, reply });
        rx
    }

    /// Drops interest in a reply, typically because the request never left.
    pub fn forget_response(&self, message_id: MessageId) {
        self.pending
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&message_id);
    }

    pub fn pending_responses(&self) -> usize {
        self.pending.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn process_message(&self, message: Message) {
        if message.is_response() {
            let waiting = self
                .pending
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .remove(&message.in_response_to);
            match waiting {
                Some(pending) => {
                    // The caller may have given up; nothing to do then.
                    let _ = pending.reply.send(message);
                }
                None => tracing::debug!(
                    sender = %message.sender,
                    kind = ?message.kind(),
                    "dropping response nobody is waiting for"
                ),
            }
            return;
        }

        let kind = message.kind();
        let signed_off = (kind == MessageKind::EndpointDisconnect).then(|| message.sender.clone());

        let action = self
            .processors
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&kind)
            .cloned();
        match action {
            Some(action) => action.invoke(message),
            None => {
                let unknown = self.unknown.read().unwrap_or_else(|e| e.into_inner()).clone();
                match unknown {
                    Some(unknown) => unknown.invoke(message),
                    None => tracing::warn!(
                        sender = %message.sender,
                        ?kind,
                        "no processor for message"
                    ),
                }
            }
        }

        if let Some(endpoint) = signed_off {
            self.on_endpoint_signed_off(&endpoint);
        }
    }

    /// Cancels every request still waiting on `endpoint`.
    pub fn on_endpoint_signed_off(&self, endpoint: &EndpointId) {
        let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
        let before = pending.len();
        pending.retain(|_, waiting| &waiting.endpoint != endpoint);
        let cancelled = before - pending.len();
        if cancelled > 0 {
            tracing::debug!(%endpoint, cancelled, "cancelled pending responses");
        }
    }

    /// Cancels every pending request.
    pub fn on_local_channel_closed(&self) {
        let drained = {
            let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
            std::mem::take(&mut *pending)
        };
        if !drained.is_empty() {
            tracing::debug!(cancelled = drained.len(), "local channel closed");
        }
    }
}
