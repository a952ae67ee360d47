use std::sync::Arc;

use super::{MessageProcessAction, reply};
use crate::command::LocalCommandCollection;
use crate::endpoint::EndpointId;
use crate::message::{Message, MessageBody, MessageKind};
use crate::transport::SendMessages;

/// Tells the requester which command sets this endpoint offers.
pub struct CommandInformationRequestProcessAction {
    local: EndpointId,
    sender: Arc<dyn SendMessages>,
    commands: Arc<LocalCommandCollection>,
}

impl CommandInformationRequestProcessAction {
    pub fn new(
        local: EndpointId,
        sender: Arc<dyn SendMessages>,
        commands: Arc<LocalCommandCollection>,
    ) -> Self {
        Self {
            local,
            sender,
            commands,
        }
    }
}

impl MessageProcessAction for CommandInformationRequestProcessAction {
    fn message_kind(&self) -> MessageKind {
        MessageKind::CommandInformationRequest
    }

    fn invoke(&self, message: Message) {
        let commands = self.commands.registered_types();
        tracing::debug!(requester = %message.sender, count = commands.len(), "answering command information request");
        reply(
            &*self.sender,
            &self.local,
            &message,
            MessageBody::CommandInformationResponse { commands },
        );
    }
}
