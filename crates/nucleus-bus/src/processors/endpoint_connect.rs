use std::sync::Arc;

use super::MessageProcessAction;
use crate::message::{Message, MessageBody, MessageKind};
use crate::sinks::TrackConnectedEndpoints;

pub struct EndpointConnectProcessAction {
    sinks: Vec<Arc<dyn TrackConnectedEndpoints>>,
}

impl EndpointConnectProcessAction {
    pub fn new(sinks: Vec<Arc<dyn TrackConnectedEndpoints>>) -> Self {
        Self { sinks }
    }
}

impl MessageProcessAction for EndpointConnectProcessAction {
    fn message_kind(&self) -> MessageKind {
        MessageKind::EndpointConnect
    }

    fn invoke(&self, message: Message) {
        if let MessageBody::EndpointConnect { channel, address } = &message.body {
            tracing::info!(endpoint = %message.sender, %channel, %address, "endpoint connected");
            for sink in &self.sinks {
                sink.recently_connected_endpoint(&message.sender, *channel, address);
            }
        }
    }
}

/// Lets every tracker forget an endpoint that signed off. Pending responses
/// from that endpoint are cancelled by the handler itself.
pub struct EndpointDisconnectProcessAction {
    sinks: Vec<Arc<dyn TrackConnectedEndpoints>>,
}

impl EndpointDisconnectProcessAction {
    pub fn new(sinks: Vec<Arc<dyn TrackConnectedEndpoints>>) -> Self {
        Self { sinks }
    }
}

impl MessageProcessAction for EndpointDisconnectProcessAction {
    fn message_kind(&self) -> MessageKind {
        MessageKind::EndpointDisconnect
    }

    fn invoke(&self, message: Message) {
        tracing::info!(endpoint = %message.sender, "endpoint signed off");
        for sink in &self.sinks {
            sink.recently_disconnected_endpoint(&message.sender);
        }
    }
}
