//! One endpoint's view of the bus: local registries, knowledge about remote
//! endpoints and the processors that keep both up to date.

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};

use serde::Serialize;
use tokio::runtime::Handle;

use crate::command::{CommandSet, LocalCommandCollection};
use crate::config::{BusConfig, ChannelType};
use crate::endpoint::EndpointId;
use crate::error::{BusError, InvocationError, TransportError};
use crate::handler::MessageHandler;
use crate::hub::{EndpointDirectory, RemoteCommandHub, RemoteNotificationHub};
use crate::message::{Message, MessageBody, SerializedType};
use crate::notification::{LocalNotificationCollection, NotificationEvent, NotificationSet};
use crate::processors::{
    CommandInformationRequestProcessAction, CommandInvokedProcessAction,
    EndpointConnectProcessAction, EndpointDisconnectProcessAction,
    EndpointInformationRequestProcessAction, NewCommandRegisteredProcessAction,
    NewNotificationRegisteredProcessAction, NotificationRaisedProcessAction,
    RegisterForNotificationProcessAction, UnknownMessageTypeProcessAction,
    UnregisterFromNotificationProcessAction,
};
use crate::proxy::{CommandSetProxy, request};
use crate::sinks::{ReportNewProxies, TrackConnectedEndpoints};
use crate::transport::SendMessages;

/// Tells remote endpoints about local command and notification sets, both
/// when a set is registered and when a new endpoint connects.
struct RegistrationAnnouncer {
    local: EndpointId,
    sender: Arc<dyn SendMessages>,
    commands: Arc<LocalCommandCollection>,
    notifications: Arc<LocalNotificationCollection>,
    enabled: bool,
}

impl RegistrationAnnouncer {
    fn announce(&self, to: &EndpointId, body: MessageBody) {
        if !self.enabled {
            return;
        }
        let kind = body.kind();
        if let Err(err) = self.sender.send(to, Message::new(self.local.clone(), body)) {
            tracing::warn!(endpoint = %to, ?kind, "failed to announce registration: {err}");
        }
    }
}

impl TrackConnectedEndpoints for RegistrationAnnouncer {
    fn recently_connected_endpoint(&self, endpoint: &EndpointId, _channel: ChannelType, _address: &str) {
        for command_set in self.commands.registered_types() {
            self.announce(endpoint, MessageBody::NewCommandRegistered { command_set });
        }
        for notification_set in self.notifications.registered_types() {
            self.announce(endpoint, MessageBody::NewNotificationRegistered { notification_set });
        }
    }
}

pub struct EndpointBus {
    config: BusConfig,
    local: EndpointId,
    sender: Arc<dyn SendMessages>,
    handler: Arc<MessageHandler>,
    commands: Arc<LocalCommandCollection>,
    notifications: Arc<LocalNotificationCollection>,
    remote_commands: Arc<RemoteCommandHub>,
    remote_notifications: Arc<RemoteNotificationHub>,
    endpoints: Arc<EndpointDirectory>,
    /// Endpoints this one announced itself to.
    announced: Mutex<BTreeSet<EndpointId>>,
}

impl EndpointBus {
    /// Creates the bus for the endpoint described by `config`. Commands
    /// invoked by remote callers run on `runtime`.
    pub fn new(config: BusConfig, sender: Arc<dyn SendMessages>, runtime: Handle) -> Self {
        let local = config.endpoint_id();
        Self::with_endpoint_id(local, config, sender, runtime)
    }

    pub fn with_endpoint_id(
        local: EndpointId,
        config: BusConfig,
        sender: Arc<dyn SendMessages>,
        runtime: Handle,
    ) -> Self {
        let handler = Arc::new(MessageHandler::new());
        let commands = Arc::new(LocalCommandCollection::new());
        let notifications = Arc::new(LocalNotificationCollection::new(local.clone(), sender.clone()));
        let remote_commands = Arc::new(RemoteCommandHub::new(local.clone(), sender.clone(), handler.clone()));
        let remote_notifications = Arc::new(RemoteNotificationHub::new(
            local.clone(),
            sender.clone(),
            handler.clone(),
        ));
        let endpoints = Arc::new(EndpointDirectory::new());
        let announcer = Arc::new(RegistrationAnnouncer {
            local: local.clone(),
            sender: sender.clone(),
            commands: commands.clone(),
            notifications: notifications.clone(),
            enabled: config.announce_registrations,
        });

        {
            let announcer = announcer.clone();
            let endpoints = endpoints.clone();
            commands.on_registered(move |command_set| {
                for endpoint in endpoints.known() {
                    announcer.announce(&endpoint, MessageBody::NewCommandRegistered {
                        command_set: command_set.clone(),
                    });
                }
            });
        }
        {
            let announcer = announcer.clone();
            let endpoints = endpoints.clone();
            notifications.on_registered(move |notification_set| {
                for endpoint in endpoints.known() {
                    announcer.announce(&endpoint, MessageBody::NewNotificationRegistered {
                        notification_set: notification_set.clone(),
                    });
                }
            });
        }

        handler.act_on_arrival(Arc::new(CommandInformationRequestProcessAction::new(
            local.clone(),
            sender.clone(),
            commands.clone(),
        )));
        handler.act_on_arrival(Arc::new(EndpointInformationRequestProcessAction::new(
            local.clone(),
            sender.clone(),
            commands.clone(),
            notifications.clone(),
        )));
        handler.act_on_arrival(Arc::new(CommandInvokedProcessAction::new(
            local.clone(),
            sender.clone(),
            commands.clone(),
            runtime,
        )));
        handler.act_on_arrival(Arc::new(NewCommandRegisteredProcessAction::new(
            remote_commands.clone(),
        )));
        handler.act_on_arrival(Arc::new(NewNotificationRegisteredProcessAction::new(
            remote_notifications.clone(),
        )));
        let on_connect: Vec<Arc<dyn TrackConnectedEndpoints>> = vec![endpoints.clone(), announcer];
        handler.act_on_arrival(Arc::new(EndpointConnectProcessAction::new(on_connect)));
        let on_disconnect: Vec<Arc<dyn TrackConnectedEndpoints>> = vec![
            endpoints.clone(),
            remote_commands.clone(),
            remote_notifications.clone(),
            notifications.clone(),
        ];
        handler.act_on_arrival(Arc::new(EndpointDisconnectProcessAction::new(on_disconnect)));
        handler.act_on_arrival(Arc::new(RegisterForNotificationProcessAction::new(
            local.clone(),
            sender.clone(),
            notifications.clone(),
        )));
        handler.act_on_arrival(Arc::new(UnregisterFromNotificationProcessAction::new(
            notifications.clone(),
        )));
        handler.act_on_arrival(Arc::new(NotificationRaisedProcessAction::new(
            remote_notifications.clone(),
        )));
        handler.on_unknown_message(Arc::new(UnknownMessageTypeProcessAction::new(
            local.clone(),
            sender.clone(),
        )));

        tracing::debug!(endpoint = %local, "endpoint bus created");
        Self {
            config,
            local,
            sender,
            handler,
            commands,
            notifications,
            remote_commands,
            remote_notifications,
            endpoints,
            announced: Mutex::new(BTreeSet::new()),
        }
    }

    pub fn local_endpoint(&self) -> &EndpointId {
        &self.local
    }

    pub fn config(&self) -> &BusConfig {
        &self.config
    }

    /// The handler a transport delivers this endpoint's messages to.
    pub fn handler(&self) -> Arc<MessageHandler> {
        self.handler.clone()
    }

    pub fn commands(&self) -> &Arc<LocalCommandCollection> {
        &self.commands
    }

    pub fn notifications(&self) -> &Arc<LocalNotificationCollection> {
        &self.notifications
    }

    pub fn remote_commands(&self) -> &Arc<RemoteCommandHub> {
        &self.remote_commands
    }

    pub fn remote_notifications(&self) -> &Arc<RemoteNotificationHub> {
        &self.remote_notifications
    }

    pub fn endpoints(&self) -> &Arc<EndpointDirectory> {
        &self.endpoints
    }

    pub fn register_commands(&self, set: CommandSet) -> Result<(), BusError> {
        self.commands.register(set)?;
        Ok(())
    }

    pub fn unregister_commands(&self, command_set: &SerializedType) -> Result<(), BusError> {
        self.commands.unregister(command_set)?;
        Ok(())
    }

    pub fn register_notifications(&self, set: NotificationSet) -> Result<(), BusError> {
        self.notifications.register(set)
    }

    pub fn unregister_notifications(&self, notification_set: &SerializedType) -> Result<(), BusError> {
        self.notifications.unregister(notification_set)
    }

    pub fn raise<A: Serialize>(&self, event: &NotificationEvent<A>, args: &A) -> Result<usize, BusError> {
        self.notifications.raise(event, args)
    }

    /// Tells `endpoint` how to reach this one.
    pub fn announce_to(&self, endpoint: &EndpointId) -> Result<(), TransportError> {
        let body = MessageBody::EndpointConnect {
            channel: self.config.channel,
            address: self.config.address.clone(),
        };
        self.sender.send(endpoint, Message::new(self.local.clone(), body))?;
        self.announced
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(endpoint.clone());
        Ok(())
    }

    /// Asks `endpoint` for its command sets.
    pub async fn discover(&self, endpoint: &EndpointId) -> Result<Vec<SerializedType>, InvocationError> {
        self.remote_commands.request_command_information(endpoint).await
    }

    /// Asks `endpoint` for everything it offers and records the answer.
    /// Returns `(command sets, notification sets)`.
    pub async fn endpoint_information(
        &self,
        endpoint: &EndpointId,
    ) -> Result<(Vec<SerializedType>, Vec<SerializedType>), InvocationError> {
        let message = Message::new(self.local.clone(), MessageBody::EndpointInformationRequest);
        let reply = request(&self.handler, &*self.sender, endpoint, message).await?;
        match reply.body {
            MessageBody::EndpointInformationResponse {
                commands,
                notifications,
            } => {
                for command_set in &commands {
                    self.remote_commands
                        .recently_registered_proxy(endpoint, command_set.clone());
                }
                for notification_set in &notifications {
                    self.remote_notifications
                        .recently_registered_proxy(endpoint, notification_set.clone());
                }
                Ok((commands, notifications))
            }
            MessageBody::Failure => Err(InvocationError::Failed),
            MessageBody::UnknownMessageType { .. } => Err(InvocationError::NotUnderstood),
            other => Err(InvocationError::UnexpectedResponse(other.kind())),
        }
    }

    pub fn commands_from(
        &self,
        endpoint: &EndpointId,
        command_set: &SerializedType,
    ) -> Result<CommandSetProxy, BusError> {
        self.remote_commands.commands_for(endpoint, command_set)
    }

    /// Says goodbye to every endpoint that knows about this one and cancels
    /// all pending requests.
    pub fn sign_off(&self) {
        let mut audience: BTreeSet<EndpointId> = self.endpoints.known().into_iter().collect();
        audience.append(&mut self.announced.lock().unwrap_or_else(|e| e.into_inner()));
        for endpoint in audience {
            let message = Message::new(self.local.clone(), MessageBody::EndpointDisconnect);
            if let Err(err) = self.sender.send(&endpoint, message) {
                tracing::debug!(%endpoint, "could not say goodbye: {err}");
            }
        }
        self.handler.on_local_channel_closed();
    }
}
