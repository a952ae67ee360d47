//! Locally raised notifications and their remote subscribers.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::marker::PhantomData;
use std::sync::{Arc, Mutex, RwLock};

use serde::Serialize;

use crate::config::ChannelType;
use crate::endpoint::EndpointId;
use crate::error::BusError;
use crate::message::{Message, MessageBody, SerializedEventRegistration, SerializedType};
use crate::sinks::{SendNotifications, TrackConnectedEndpoints};
use crate::transport::SendMessages;

/// Descriptor of one event in a notification set, carrying an `A`.
pub struct NotificationEvent<A> {
    notification_set: &'static str,
    name: &'static str,
    _args: PhantomData<fn(A)>,
}

impl<A> NotificationEvent<A> {
    pub const fn new(notification_set: &'static str, name: &'static str) -> Self {
        Self {
            notification_set,
            name,
            _args: PhantomData,
        }
    }

    pub fn notification_set(&self) -> SerializedType {
        SerializedType::new(self.notification_set)
    }

    pub fn registration(&self) -> SerializedEventRegistration {
        SerializedEventRegistration {
            notification_set: self.notification_set(),
            event_name: self.name.to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct NotificationSet {
    descriptor: SerializedType,
    events: BTreeSet<String>,
}

impl NotificationSet {
    pub fn new<'a>(name: impl Into<String>, events: impl IntoIterator<Item = &'a str>) -> Self {
        Self {
            descriptor: SerializedType::new(name),
            events: events.into_iter().map(str::to_string).collect(),
        }
    }

    pub fn descriptor(&self) -> &SerializedType {
        &self.descriptor
    }

    pub fn has_event(&self, name: &str) -> bool {
        self.events.contains(name)
    }
}

type RegistrationObserver = Box<dyn Fn(&SerializedType) + Send + Sync>;

/// Notification sets offered by this endpoint and who subscribed to them.
pub struct LocalNotificationCollection {
    local: EndpointId,
    sender: Arc<dyn SendMessages>,
    sets: RwLock<BTreeMap<SerializedType, NotificationSet>>,
    subscribers: Mutex<HashMap<SerializedEventRegistration, BTreeSet<EndpointId>>>,
    on_registered: RwLock<Vec<RegistrationObserver>>,
}

impl LocalNotificationCollection {
    pub fn new(local: EndpointId, sender: Arc<dyn SendMessages>) -> Self {
        Self {
            local,
            sender,
            sets: RwLock::new(BTreeMap::new()),
            subscribers: Mutex::new(HashMap::new()),
            on_registered: RwLock::new(Vec::new()),
        }
    }

    pub fn register(&self, set: NotificationSet) -> Result<(), BusError> {
        let descriptor = set.descriptor.clone();
        {
            let mut sets = self.sets.write().unwrap_or_else(|e| e.into_inner());
            if sets.contains_key(&descriptor) {
                return Err(BusError::DuplicateNotificationSet(descriptor));
            }
            sets.insert(descriptor.clone(), set);
        }
        tracing::debug!(notification_set = %descriptor, "registered notification set");
        for observer in self.on_registered.read().unwrap_or_else(|e| e.into_inner()).iter() {
            observer(&descriptor);
        }
        Ok(())
    }

    /// Removes a set together with all subscriptions to its events.
    pub fn unregister(&self, descriptor: &SerializedType) -> Result<(), BusError> {
        self.sets
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(descriptor)
            .ok_or_else(|| BusError::UnknownNotificationSet(descriptor.clone()))?;
        self.subscribers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .retain(|registration, _| &registration.notification_set != descriptor);
        Ok(())
    }

    pub fn registered_types(&self) -> Vec<SerializedType> {
        self.sets
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .keys()
            .cloned()
            .collect()
    }

    pub fn subscribers_of(&self, registration: &SerializedEventRegistration) -> Vec<EndpointId> {
        self.subscribers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(registration)
            .map(|s| s.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn on_registered(&self, observer: impl Fn(&SerializedType) + Send + Sync + 'static) {
        self.on_registered
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push(Box::new(observer));
    }

    /// Sends `event` to every subscriber and returns how many it reached.
    /// Subscribers that cannot be reached are logged and skipped.
    pub fn raise<A: Serialize>(&self, event: &NotificationEvent<A>, args: &A) -> Result<usize, BusError> {
        let registration = event.registration();
        self.check_known(&registration)?;
        let arguments = serde_cbor::to_vec(args)?;

        let mut delivered = 0;
        for subscriber in self.subscribers_of(&registration) {
            let message = Message::new(
                self.local.clone(),
                MessageBody::NotificationRaised {
                    registration: registration.clone(),
                    arguments: arguments.clone(),
                },
            );
            match self.sender.send(&subscriber, message) {
                Ok(()) => delivered += 1,
                Err(err) => {
                    tracing::warn!(%subscriber, %registration, "failed to deliver notification: {err}")
                }
            }
        }
        Ok(delivered)
    }

    fn check_known(&self, registration: &SerializedEventRegistration) -> Result<(), BusError> {
        let sets = self.sets.read().unwrap_or_else(|e| e.into_inner());
        let set = sets
            .get(&registration.notification_set)
            .ok_or_else(|| BusError::UnknownNotificationSet(registration.notification_set.clone()))?;
        if !set.has_event(&registration.event_name) {
            return Err(BusError::UnknownEvent {
                notification_set: registration.notification_set.clone(),
                event: registration.event_name.clone(),
            });
        }
        Ok(())
    }
}

impl SendNotifications for LocalNotificationCollection {
    fn register_for_notification(
        &self,
        endpoint: &EndpointId,
        registration: &SerializedEventRegistration,
    ) -> Result<(), BusError> {
        self.check_known(registration)?;
        self.subscribers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .entry(registration.clone())
            .or_default()
            .insert(endpoint.clone());
        tracing::debug!(%endpoint, %registration, "endpoint subscribed");
        Ok(())
    }

    fn unregister_from_notification(
        &self,
        endpoint: &EndpointId,
        registration: &SerializedEventRegistration,
    ) {
        let mut subscribers = self.subscribers.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(endpoints) = subscribers.get_mut(registration) {
            endpoints.remove(endpoint);
            if endpoints.is_empty() {
                subscribers.remove(registration);
            }
        }
    }
}

impl TrackConnectedEndpoints for LocalNotificationCollection {
    fn recently_connected_endpoint(&self, _endpoint: &EndpointId, _channel: ChannelType, _address: &str) {}

    fn recently_disconnected_endpoint(&self, endpoint: &EndpointId) {
        let mut subscribers = self.subscribers.lock().unwrap_or_else(|e| e.into_inner());
        for endpoints in subscribers.values_mut() {
            endpoints.remove(endpoint);
        }
        subscribers.retain(|_, endpoints| !endpoints.is_empty());
    }
}
