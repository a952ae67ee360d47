//! Wire-level message envelope and bodies.

use std::fmt;

use nucleus_types::{Id, IdTag};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::ChannelType;
use crate::endpoint::EndpointId;

pub struct MessageTag;

impl IdTag for MessageTag {
    const NAME: &'static str = "MessageId";
}

pub type MessageId = Id<MessageTag, Uuid>;

/// `in_response_to` value of messages that do not answer anything.
pub const NO_MESSAGE: MessageId = Id::new(Uuid::nil());

pub fn next_message_id() -> MessageId {
    MessageId::new(Uuid::new_v4())
}

/// Serialized description of a command or notification set, identified by
/// its stable name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SerializedType {
    pub name: String,
}

impl SerializedType {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Display for SerializedType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SerializedMethodInvocation {
    pub command_set: SerializedType,
    pub member_name: String,
    /// CBOR encoded argument value.
    pub arguments: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SerializedEventRegistration {
    pub notification_set: SerializedType,
    pub event_name: String,
}

impl fmt::Display for SerializedEventRegistration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.notification_set, self.event_name)
    }
}

/// Discriminant of [`MessageBody`], used to route messages to processors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageKind {
    CommandInformationRequest,
    CommandInformationResponse,
    EndpointInformationRequest,
    EndpointInformationResponse,
    CommandInvoked,
    CommandInvokedResponse,
    Success,
    Failure,
    NewCommandRegistered,
    NewNotificationRegistered,
    EndpointConnect,
    EndpointDisconnect,
    RegisterForNotification,
    UnregisterFromNotification,
    NotificationRaised,
    UnknownMessageType,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageBody {
    CommandInformationRequest,
    CommandInformationResponse {
        commands: Vec<SerializedType>,
    },
    EndpointInformationRequest,
    EndpointInformationResponse {
        commands: Vec<SerializedType>,
        notifications: Vec<SerializedType>,
    },
    CommandInvoked {
        invocation: SerializedMethodInvocation,
    },
    /// Reply to an invocation that produced a value; `result` is CBOR.
    CommandInvokedResponse {
        result: Vec<u8>,
    },
    Success,
    Failure,
    NewCommandRegistered {
        command_set: SerializedType,
    },
    NewNotificationRegistered {
        notification_set: SerializedType,
    },
    EndpointConnect {
        channel: ChannelType,
        address: String,
    },
    EndpointDisconnect,
    RegisterForNotification {
        registration: SerializedEventRegistration,
    },
    UnregisterFromNotification {
        registration: SerializedEventRegistration,
    },
    NotificationRaised {
        registration: SerializedEventRegistration,
        arguments: Vec<u8>,
    },
    /// Reply to a message the receiver has no processor for.
    UnknownMessageType {
        kind: MessageKind,
    },
}

impl MessageBody {
    pub fn kind(&self) -> MessageKind {
        match self {
            MessageBody::CommandInformationRequest => MessageKind::CommandInformationRequest,
            MessageBody::CommandInformationResponse { .. } => MessageKind::CommandInformationResponse,
            MessageBody::EndpointInformationRequest => MessageKind::EndpointInformationRequest,
            MessageBody::EndpointInformationResponse { .. } => MessageKind::EndpointInformationResponse,
            MessageBody::CommandInvoked { .. } => MessageKind::CommandInvoked,
            MessageBody::CommandInvokedResponse { .. } => MessageKind::CommandInvokedResponse,
            MessageBody::Success => MessageKind::Success,
            MessageBody::Failure => MessageKind::Failure,
            MessageBody::NewCommandRegistered { .. } => MessageKind::NewCommandRegistered,
            MessageBody::NewNotificationRegistered { .. } => MessageKind::NewNotificationRegistered,
            MessageBody::EndpointConnect { .. } => MessageKind::EndpointConnect,
            MessageBody::EndpointDisconnect => MessageKind::EndpointDisconnect,
            MessageBody::RegisterForNotification { .. } => MessageKind::RegisterForNotification,
            MessageBody::UnregisterFromNotification { .. } => MessageKind::UnregisterFromNotification,
            MessageBody::NotificationRaised { .. } => MessageKind::NotificationRaised,
            MessageBody::UnknownMessageType { .. } => MessageKind::UnknownMessageType,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub sender: EndpointId,
    pub in_response_to: MessageId,
    pub body: MessageBody,
}

impl Message {
    pub fn new(sender: EndpointId, body: MessageBody) -> Self {
        Self {
            id: next_message_id(),
            sender,
            in_response_to: NO_MESSAGE,
            body,
        }
    }

    /// A reply from `sender` to `original`.
    pub fn response(sender: EndpointId, original: &Message, body: MessageBody) -> Self {
        Self {
            id: next_message_id(),
            sender,
            in_response_to: original.id,
            body,
        }
    }

    pub fn kind(&self) -> MessageKind {
        self.body.kind()
    }

    pub fn is_response(&self) -> bool {
        self.in_response_to != NO_MESSAGE
    }

    pub fn encode(&self) -> Result<Vec<u8>, serde_cbor::Error> {
        serde_cbor::to_vec(self)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, serde_cbor::Error> {
        serde_cbor::from_slice(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::endpoint::endpoint_id;

    #[test]
    fn fresh_messages_are_not_responses() {
        let message = Message::new(endpoint_id("a"), MessageBody::CommandInformationRequest);
        assert!(!message.is_response());
        assert_ne!(message.id, NO_MESSAGE);

        let reply = Message::response(endpoint_id("b"), &message, MessageBody::Success);
        assert!(reply.is_response());
        assert_eq!(reply.in_response_to, message.id);
        assert_ne!(reply.id, message.id);
    }

    #[test]
    fn envelope_survives_cbor() {
        let message = Message::new(
            endpoint_id("a"),
            MessageBody::NotificationRaised {
                registration: SerializedEventRegistration {
                    notification_set: SerializedType::new("clock"),
                    event_name: "tick".into(),
                },
                arguments: serde_cbor::to_vec(&42u32).unwrap(),
            },
        );
        let decoded = Message::decode(&message.encode().unwrap()).unwrap();
        assert_eq!(decoded, message);
        assert_eq!(decoded.kind(), MessageKind::NotificationRaised);
    }
}
