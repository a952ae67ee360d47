//! Endpoint-addressed command and notification bus.
//!
//! Each endpoint owns a [`MessageHandler`] that routes inbound messages either
//! to a caller waiting for a response or to the [`MessageProcessAction`]
//! registered for the message kind. Command sets registered locally can be
//! discovered and invoked by other endpoints through a [`CommandSetProxy`];
//! notification sets deliver one-way events to remote subscribers.

pub mod bus;
pub mod command;
pub mod config;
pub mod endpoint;
pub mod error;
pub mod handler;
pub mod hub;
pub mod message;
pub mod notification;
pub mod processors;
pub mod proxy;
pub mod service;
pub mod sinks;
pub mod transport;

pub use bus::EndpointBus;
pub use command::{Command, CommandOutcome, CommandSet, CommandWithResult, LocalCommandCollection};
pub use config::{BusConfig, ChannelType};
pub use endpoint::{EndpointId, NOBODY};
pub use error::{BusError, InvocationError, TransportError};
pub use handler::MessageHandler;
pub use hub::{EndpointDirectory, EndpointInfo, RemoteCommandHub, RemoteNotificationHub};
pub use message::{
    Message, MessageBody, MessageId, MessageKind, NO_MESSAGE, SerializedEventRegistration,
    SerializedMethodInvocation, SerializedType,
};
pub use notification::{LocalNotificationCollection, NotificationEvent, NotificationSet};
pub use processors::MessageProcessAction;
pub use proxy::CommandSetProxy;
pub use service::CommunicationService;
pub use transport::{CommunicationChannel, InProcessNetwork, SendMessages};
