use thiserror::Error;

use crate::endpoint::EndpointId;
use crate::message::{MessageKind, SerializedType};

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("endpoint '{0}' cannot be contacted")]
    EndpointNotContactable(EndpointId),
    #[error("channel for endpoint '{0}' is already open")]
    AlreadyOpen(EndpointId),
    #[error("message codec error: {0}")]
    Codec(#[from] serde_cbor::Error),
    #[error("send failed: {0}")]
    Other(String),
}

/// Errors from registering, looking up or addressing command and
/// notification sets.
#[derive(Debug, Error)]
pub enum BusError {
    #[error("command set '{0}' is already registered")]
    DuplicateCommandSet(SerializedType),
    #[error("no command set '{0}' is registered")]
    UnknownCommandSet(SerializedType),
    #[error("command set '{command_set}' has no command '{member}'")]
    UnknownCommand {
        command_set: SerializedType,
        member: String,
    },
    #[error("notification set '{0}' is already registered")]
    DuplicateNotificationSet(SerializedType),
    #[error("no notification set '{0}' is registered")]
    UnknownNotificationSet(SerializedType),
    #[error("notification set '{notification_set}' has no event '{event}'")]
    UnknownEvent {
        notification_set: SerializedType,
        event: String,
    },
    #[error("endpoint '{0}' is not known")]
    UnknownEndpoint(EndpointId),
    #[error("endpoint '{endpoint}' does not offer '{offered}'")]
    CommandNotSupported {
        endpoint: EndpointId,
        offered: SerializedType,
    },
    #[error("argument encoding failed: {0}")]
    Codec(#[from] serde_cbor::Error),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Invocation(#[from] InvocationError),
}

/// Ways a remote request can fail from the caller's point of view.
#[derive(Debug, Error)]
pub enum InvocationError {
    #[error("request could not be sent: {0}")]
    Send(#[from] TransportError),
    #[error("remote endpoint reported a failure")]
    Failed,
    #[error("remote endpoint did not understand the request")]
    NotUnderstood,
    #[error("no response; the endpoint signed off or the channel closed")]
    Cancelled,
    #[error("command belongs to '{found}', proxy is for '{expected}'")]
    CommandSetMismatch {
        expected: SerializedType,
        found: SerializedType,
    },
    #[error("payload codec error: {0}")]
    Codec(#[from] serde_cbor::Error),
    #[error("unexpected {0:?} response")]
    UnexpectedResponse(MessageKind),
}
