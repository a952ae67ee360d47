//! Actions run when a message of a given kind arrives.
//!
//! Processors that answer a request share one delivery contract: the reply
//! is sent once; if that fails the error is logged and a single failure
//! message is sent instead; if that fails too, it is logged and nothing
//! more is attempted.

mod command_information;
mod command_invoked;
mod endpoint_connect;
mod endpoint_information;
mod notifications;
mod registrations;
mod unknown;

pub use command_information::CommandInformationRequestProcessAction;
pub use command_invoked::CommandInvokedProcessAction;
pub use endpoint_connect::{EndpointConnectProcessAction, EndpointDisconnectProcessAction};
pub use endpoint_information::EndpointInformationRequestProcessAction;
pub use notifications::{
    NotificationRaisedProcessAction, RegisterForNotificationProcessAction,
    UnregisterFromNotificationProcessAction,
};
pub use registrations::{NewCommandRegisteredProcessAction, NewNotificationRegisteredProcessAction};
pub use unknown::UnknownMessageTypeProcessAction;

use crate::endpoint::EndpointId;
use crate::message::{Message, MessageBody, MessageKind};
use crate::transport::SendMessages;

pub trait MessageProcessAction: Send + Sync {
    /// Kind of message this action handles.
    fn message_kind(&self) -> MessageKind;

    fn invoke(&self, message: Message);
}

/// Answers `original` with `body`, falling back to a failure message.
pub(crate) fn reply(
    sender: &dyn SendMessages,
    local: &EndpointId,
    original: &Message,
    body: MessageBody,
) {
    let to = &original.sender;
    let kind = body.kind();
    let Err(err) = sender.send(to, Message::response(local.clone(), original, body)) else {
        return;
    };
    tracing::error!(endpoint = %to, ?kind, "failed to send response: {err}");

    if let Err(err) = sender.send(to, Message::response(local.clone(), original, MessageBody::Failure)) {
        tracing::error!(endpoint = %to, "failed to send failure response: {err}");
    }
}
