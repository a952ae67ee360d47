//! What this endpoint knows about other endpoints.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, Mutex, RwLock};

use serde::de::DeserializeOwned;
use tokio::sync::oneshot;

use crate::config::ChannelType;
use crate::endpoint::EndpointId;
use crate::error::{BusError, InvocationError};
use crate::handler::MessageHandler;
use crate::message::{Message, MessageBody, SerializedEventRegistration, SerializedType};
use crate::notification::NotificationEvent;
use crate::proxy::{CommandSetProxy, expect_success, request};
use crate::sinks::{ReceiveNotifications, ReportNewProxies, TrackConnectedEndpoints};
use crate::transport::SendMessages;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointInfo {
    pub channel: ChannelType,
    pub address: String,
}

/// Remote endpoints that announced themselves and have not signed off.
#[derive(Default)]
pub struct EndpointDirectory {
    endpoints: RwLock<BTreeMap<EndpointId, EndpointInfo>>,
}

impl EndpointDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn known(&self) -> Vec<EndpointId> {
        self.endpoints
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .keys()
            .cloned()
            .collect()
    }

    pub fn info(&self, endpoint: &EndpointId) -> Option<EndpointInfo> {
        self.endpoints
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(endpoint)
            .cloned()
    }

    pub fn is_known(&self, endpoint: &EndpointId) -> bool {
        self.endpoints
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .contains_key(endpoint)
    }
}

impl TrackConnectedEndpoints for EndpointDirectory {
    fn recently_connected_endpoint(&self, endpoint: &EndpointId, channel: ChannelType, address: &str) {
        self.endpoints.write().unwrap_or_else(|e| e.into_inner()).insert(
            endpoint.clone(),
            EndpointInfo {
                channel,
                address: address.to_string(),
            },
        );
    }

    fn recently_disconnected_endpoint(&self, endpoint: &EndpointId) {
        self.endpoints
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(endpoint);
    }
}

type Offers = RwLock<HashMap<EndpointId, BTreeSet<SerializedType>>>;

fn record_offer(offers: &Offers, endpoint: &EndpointId, offered: SerializedType) {
    offers
        .write()
        .unwrap_or_else(|e| e.into_inner())
        .entry(endpoint.clone())
        .or_default()
        .insert(offered);
}

fn offers_of(offers: &Offers, endpoint: &EndpointId) -> Option<Vec<SerializedType>> {
    offers
        .read()
        .unwrap_or_else(|e| e.into_inner())
        .get(endpoint)
        .map(|set| set.iter().cloned().collect())
}

/// Command sets offered by remote endpoints, and proxies to call them.
pub struct RemoteCommandHub {
    local: EndpointId,
    sender: Arc<dyn SendMessages>,
    handler: Arc<MessageHandler>,
    offers: Offers,
}

impl RemoteCommandHub {
    pub fn new(local: EndpointId, sender: Arc<dyn SendMessages>, handler: Arc<MessageHandler>) -> Self {
        Self {
            local,
            sender,
            handler,
            offers: RwLock::new(HashMap::new()),
        }
    }

    /// Asks `endpoint` which command sets it offers and remembers the answer.
    pub async fn request_command_information(
        &self,
        endpoint: &EndpointId,
    ) -> Result<Vec<SerializedType>, InvocationError> {
        let message = Message::new(self.local.clone(), MessageBody::CommandInformationRequest);
        let reply = request(&self.handler, &*self.sender, endpoint, message).await?;
        match reply.body {
            MessageBody::CommandInformationResponse { commands } => {
                self.offers
                    .write()
                    .unwrap_or_else(|e| e.into_inner())
                    .insert(endpoint.clone(), commands.iter().cloned().collect());
                Ok(commands)
            }
            MessageBody::Failure => Err(InvocationError::Failed),
            MessageBody::UnknownMessageType { .. } => Err(InvocationError::NotUnderstood),
            other => Err(InvocationError::UnexpectedResponse(other.kind())),
        }
    }

    pub fn has_commands_for(&self, endpoint: &EndpointId) -> bool {
        self.offers
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .contains_key(endpoint)
    }

    pub fn has_command_for(&self, endpoint: &EndpointId, command_set: &SerializedType) -> bool {
        self.offers
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(endpoint)
            .is_some_and(|set| set.contains(command_set))
    }

    pub fn available_commands_for(&self, endpoint: &EndpointId) -> Vec<SerializedType> {
        offers_of(&self.offers, endpoint).unwrap_or_default()
    }

    /// A proxy for `command_set` on `endpoint`, which must have been
    /// discovered first.
    pub fn commands_for(
        &self,
        endpoint: &EndpointId,
        command_set: &SerializedType,
    ) -> Result<CommandSetProxy, BusError> {
        let offered = offers_of(&self.offers, endpoint)
            .ok_or_else(|| BusError::UnknownEndpoint(endpoint.clone()))?;
        if !offered.contains(command_set) {
            return Err(BusError::CommandNotSupported {
                endpoint: endpoint.clone(),
                offered: command_set.clone(),
            });
        }
        Ok(CommandSetProxy::new(
            self.local.clone(),
            endpoint.clone(),
            command_set.clone(),
            self.sender.clone(),
            self.handler.clone(),
        ))
    }
}

impl ReportNewProxies for RemoteCommandHub {
    fn recently_registered_proxy(&self, endpoint: &EndpointId, proxy_type: SerializedType) {
        tracing::debug!(%endpoint, command_set = %proxy_type, "remote command set available");
        record_offer(&self.offers, endpoint, proxy_type);
    }
}

impl TrackConnectedEndpoints for RemoteCommandHub {
    fn recently_connected_endpoint(&self, _endpoint: &EndpointId, _channel: ChannelType, _address: &str) {}

    fn recently_disconnected_endpoint(&self, endpoint: &EndpointId) {
        self.offers
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(endpoint);
    }
}

type Observer = Arc<dyn Fn(&[u8]) + Send + Sync>;
type SubscriptionKey = (EndpointId, SerializedEventRegistration);

/// Local side of one remote subscription. Until the endpoint confirms it,
/// later subscribers are parked in `waiting` and only join `observers` once
/// the confirmation arrives.
#[derive(Default)]
struct Subscription {
    observers: Vec<Observer>,
    confirmed: bool,
    waiting: Vec<(Observer, oneshot::Sender<()>)>,
}

/// Settles a pending subscription as refused unless it was confirmed, so a
/// dropped `subscribe` call does not leave later subscribers parked.
struct PendingSubscription<'a> {
    hub: &'a RemoteNotificationHub,
    key: SubscriptionKey,
    settled: bool,
}

impl PendingSubscription<'_> {
    fn settle(mut self, confirmed: bool) {
        self.settled = true;
        self.hub.settle(&self.key, confirmed);
    }
}

impl Drop for PendingSubscription<'_> {
    fn drop(&mut self) {
        if !self.settled {
            self.hub.settle(&self.key, false);
        }
    }
}

/// Notification sets offered by remote endpoints and local observers of
/// their events.
pub struct RemoteNotificationHub {
    local: EndpointId,
    sender: Arc<dyn SendMessages>,
    handler: Arc<MessageHandler>,
    offers: Offers,
    observers: Mutex<HashMap<SubscriptionKey, Subscription>>,
}

impl RemoteNotificationHub {
    pub fn new(local: EndpointId, sender: Arc<dyn SendMessages>, handler: Arc<MessageHandler>) -> Self {
        Self {
            local,
            sender,
            handler,
            offers: RwLock::new(HashMap::new()),
            observers: Mutex::new(HashMap::new()),
        }
    }

    pub fn available_notifications_for(&self, endpoint: &EndpointId) -> Vec<SerializedType> {
        offers_of(&self.offers, endpoint).unwrap_or_default()
    }

    /// Subscribes to `event` on `endpoint`. `observer` runs for every raise
    /// whose payload decodes as an `A`; the first observer for an event
    /// sends the subscription, later ones share it. A later subscriber only
    /// returns once the shared subscription is confirmed; if it is refused,
    /// the later subscriber tries again on its own.
    pub async fn subscribe<A, F>(
        &self,
        endpoint: &EndpointId,
        event: &NotificationEvent<A>,
        observer: F,
    ) -> Result<(), InvocationError>
    where
        A: DeserializeOwned + 'static,
        F: Fn(A) + Send + Sync + 'static,
    {
        let registration = event.registration();
        let key = (endpoint.clone(), registration.clone());
        let wrapped: Observer = Arc::new(move |bytes: &[u8]| match serde_cbor::from_slice::<A>(bytes) {
            Ok(args) => observer(args),
            Err(err) => tracing::warn!("dropping undecodable notification payload: {err}"),
        });

        loop {
            let parked = {
                let mut subscriptions = self.observers.lock().unwrap_or_else(|e| e.into_inner());
                match subscriptions.get_mut(&key) {
                    Some(sub) if sub.confirmed => {
                        sub.observers.push(wrapped);
                        return Ok(());
                    }
                    Some(sub) => {
                        let (tx, rx) = oneshot::channel();
                        sub.waiting.push((wrapped.clone(), tx));
                        Some(rx)
                    }
                    None => {
                        subscriptions.insert(
                            key.clone(),
                            Subscription {
                                observers: vec![wrapped.clone()],
                                ..Subscription::default()
                            },
                        );
                        None
                    }
                }
            };

            match parked {
                Some(rx) => {
                    if rx.await.is_ok() {
                        return Ok(());
                    }
                    tracing::debug!(%endpoint, %registration, "shared subscription refused, retrying");
                }
                None => return self.register_remotely(endpoint, key).await,
            }
        }
    }

    async fn register_remotely(
        &self,
        endpoint: &EndpointId,
        key: SubscriptionKey,
    ) -> Result<(), InvocationError> {
        let pending = PendingSubscription {
            hub: self,
            key: key.clone(),
            settled: false,
        };
        let message = Message::new(
            self.local.clone(),
            MessageBody::RegisterForNotification { registration: key.1 },
        );
        let result = request(&self.handler, &*self.sender, endpoint, message)
            .await
            .and_then(expect_success);
        pending.settle(result.is_ok());
        result
    }

    fn settle(&self, key: &SubscriptionKey, confirmed: bool) {
        let mut subscriptions = self.observers.lock().unwrap_or_else(|e| e.into_inner());
        if !confirmed {
            // Dropping the parked senders wakes their subscribers.
            subscriptions.remove(key);
            return;
        }
        let Some(sub) = subscriptions.get_mut(key) else {
            return;
        };
        sub.confirmed = true;
        for (observer, parked) in sub.waiting.drain(..) {
            sub.observers.push(observer);
            let _ = parked.send(());
        }
    }

    /// Drops every local observer of `registration` on `endpoint` and tells
    /// the endpoint to stop sending it.
    pub fn unsubscribe(
        &self,
        endpoint: &EndpointId,
        registration: &SerializedEventRegistration,
    ) -> Result<(), InvocationError> {
        let removed = self
            .observers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&(endpoint.clone(), registration.clone()));
        if removed.is_none() {
            return Ok(());
        }
        let message = Message::new(
            self.local.clone(),
            MessageBody::UnregisterFromNotification {
                registration: registration.clone(),
            },
        );
        self.sender.send(endpoint, message)?;
        Ok(())
    }

    pub fn is_subscribed(&self, endpoint: &EndpointId, registration: &SerializedEventRegistration) -> bool {
        self.observers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains_key(&(endpoint.clone(), registration.clone()))
    }
}

impl ReceiveNotifications for RemoteNotificationHub {
    fn notification_raised(
        &self,
        endpoint: &EndpointId,
        registration: &SerializedEventRegistration,
        arguments: &[u8],
    ) {
        // Observers run outside the lock so they may (un)subscribe.
        let observers = self
            .observers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(&(endpoint.clone(), registration.clone()))
            .map(|sub| sub.observers.clone())
            .unwrap_or_default();
        if observers.is_empty() {
            tracing::debug!(%endpoint, %registration, "notification without observers");
        }
        for observer in observers {
            observer(arguments);
        }
    }
}

impl ReportNewProxies for RemoteNotificationHub {
    fn recently_registered_proxy(&self, endpoint: &EndpointId, proxy_type: SerializedType) {
        tracing::debug!(%endpoint, notification_set = %proxy_type, "remote notification set available");
        record_offer(&self.offers, endpoint, proxy_type);
    }
}

impl TrackConnectedEndpoints for RemoteNotificationHub {
    fn recently_connected_endpoint(&self, _endpoint: &EndpointId, _channel: ChannelType, _address: &str) {}

    fn recently_disconnected_endpoint(&self, endpoint: &EndpointId) {
        self.offers
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(endpoint);
        self.observers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .retain(|(from, _), _| from != endpoint);
    }
}
