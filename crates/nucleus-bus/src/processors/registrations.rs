use std::sync::Arc;

use super::MessageProcessAction;
use crate::message::{Message, MessageBody, MessageKind};
use crate::sinks::ReportNewProxies;

/// Forwards a remote endpoint's new command set to the proxy registry.
pub struct NewCommandRegisteredProcessAction {
    sink: Arc<dyn ReportNewProxies>,
}

impl NewCommandRegisteredProcessAction {
    pub fn new(sink: Arc<dyn ReportNewProxies>) -> Self {
        Self { sink }
    }
}

impl MessageProcessAction for NewCommandRegisteredProcessAction {
    fn message_kind(&self) -> MessageKind {
        MessageKind::NewCommandRegistered
    }

    fn invoke(&self, message: Message) {
        if let MessageBody::NewCommandRegistered { command_set } = message.body {
            self.sink.recently_registered_proxy(&message.sender, command_set);
        }
    }
}

/// Forwards a remote endpoint's new notification set to the proxy registry.
pub struct NewNotificationRegisteredProcessAction {
    sink: Arc<dyn ReportNewProxies>,
}

impl NewNotificationRegisteredProcessAction {
    pub fn new(sink: Arc<dyn ReportNewProxies>) -> Self {
        Self { sink }
    }
}

impl MessageProcessAction for NewNotificationRegisteredProcessAction {
    fn message_kind(&self) -> MessageKind {
        MessageKind::NewNotificationRegistered
    }

    fn invoke(&self, message: Message) {
        if let MessageBody::NewNotificationRegistered { notification_set } = message.body {
            self.sink.recently_registered_proxy(&message.sender, notification_set);
        }
    }
}
