use std::sync::Arc;

use super::{MessageProcessAction, reply};
use crate::endpoint::EndpointId;
use crate::message::{Message, MessageBody, MessageKind};
use crate::transport::SendMessages;

/// Tells the sender that its message was not understood.
pub struct UnknownMessageTypeProcessAction {
    local: EndpointId,
    sender: Arc<dyn SendMessages>,
}

impl UnknownMessageTypeProcessAction {
    pub fn new(local: EndpointId, sender: Arc<dyn SendMessages>) -> Self {
        Self { local, sender }
    }
}

impl MessageProcessAction for UnknownMessageTypeProcessAction {
    fn message_kind(&self) -> MessageKind {
        MessageKind::UnknownMessageType
    }

    fn invoke(&self, message: Message) {
        let kind = message.kind();
        tracing::warn!(sender = %message.sender, ?kind, "received message of unhandled type");
        reply(
            &*self.sender,
            &self.local,
            &message,
            MessageBody::UnknownMessageType { kind },
        );
    }
}
