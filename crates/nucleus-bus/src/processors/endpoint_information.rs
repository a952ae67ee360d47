use std::sync::Arc;

use super::{MessageProcessAction, reply};
use crate::command::LocalCommandCollection;
use crate::endpoint::EndpointId;
use crate::message::{Message, MessageBody, MessageKind};
use crate::notification::LocalNotificationCollection;
use crate::transport::SendMessages;

/// Describes everything this endpoint offers: command and notification sets.
pub struct EndpointInformationRequestProcessAction {
    local: EndpointId,
    sender: Arc<dyn SendMessages>,
    commands: Arc<LocalCommandCollection>,
    notifications: Arc<LocalNotificationCollection>,
}

impl EndpointInformationRequestProcessAction {
    pub fn new(
        local: EndpointId,
        sender: Arc<dyn SendMessages>,
        commands: Arc<LocalCommandCollection>,
        notifications: Arc<LocalNotificationCollection>,
    ) -> Self {
        Self {
            local,
            sender,
            commands,
            notifications,
        }
    }
}

impl MessageProcessAction for EndpointInformationRequestProcessAction {
    fn message_kind(&self) -> MessageKind {
        MessageKind::EndpointInformationRequest
    }

    fn invoke(&self, message: Message) {
        let body = MessageBody::EndpointInformationResponse {
            commands: self.commands.registered_types(),
            notifications: self.notifications.registered_types(),
        };
        reply(&*self.sender, &self.local, &message, body);
    }
}
