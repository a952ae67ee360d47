use std::sync::Arc;

use super::{MessageProcessAction, reply};
use crate::endpoint::EndpointId;
use crate::message::{Message, MessageBody, MessageKind};
use crate::sinks::{ReceiveNotifications, SendNotifications};
use crate::transport::SendMessages;

/// Subscribes the sender to a local notification; answers `Success` or,
/// for an unknown set or event, `Failure`.
pub struct RegisterForNotificationProcessAction {
    local: EndpointId,
    sender: Arc<dyn SendMessages>,
    sink: Arc<dyn SendNotifications>,
}

impl RegisterForNotificationProcessAction {
    pub fn new(
        local: EndpointId,
        sender: Arc<dyn SendMessages>,
        sink: Arc<dyn SendNotifications>,
    ) -> Self {
        Self {
            local,
            sender,
            sink,
        }
    }
}

impl MessageProcessAction for RegisterForNotificationProcessAction {
    fn message_kind(&self) -> MessageKind {
        MessageKind::RegisterForNotification
    }

    fn invoke(&self, message: Message) {
        let MessageBody::RegisterForNotification { registration } = &message.body else {
            return;
        };
        let body = match self.sink.register_for_notification(&message.sender, registration) {
            Ok(()) => MessageBody::Success,
            Err(err) => {
                tracing::warn!(endpoint = %message.sender, %registration, "rejected subscription: {err}");
                MessageBody::Failure
            }
        };
        reply(&*self.sender, &self.local, &message, body);
    }
}

pub struct UnregisterFromNotificationProcessAction {
    sink: Arc<dyn SendNotifications>,
}

impl UnregisterFromNotificationProcessAction {
    pub fn new(sink: Arc<dyn SendNotifications>) -> Self {
        Self { sink }
    }
}

impl MessageProcessAction for UnregisterFromNotificationProcessAction {
    fn message_kind(&self) -> MessageKind {
        MessageKind::UnregisterFromNotification
    }

    fn invoke(&self, message: Message) {
        if let MessageBody::UnregisterFromNotification { registration } = &message.body {
            self.sink.unregister_from_notification(&message.sender, registration);
        }
    }
}

pub struct NotificationRaisedProcessAction {
    sink: Arc<dyn ReceiveNotifications>,
}

impl NotificationRaisedProcessAction {
    pub fn new(sink: Arc<dyn ReceiveNotifications>) -> Self {
        Self { sink }
    }
}

impl MessageProcessAction for NotificationRaisedProcessAction {
    fn message_kind(&self) -> MessageKind {
        MessageKind::NotificationRaised
    }

    fn invoke(&self, message: Message) {
        if let MessageBody::NotificationRaised {
            registration,
            arguments,
        } = &message.body
        {
            self.sink
                .notification_raised(&message.sender, registration, arguments);
        }
    }
}
