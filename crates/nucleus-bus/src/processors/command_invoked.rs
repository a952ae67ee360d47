use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use tokio::runtime::Handle;

use super::{MessageProcessAction, reply};
use crate::command::{CommandOutcome, LocalCommandCollection};
use crate::endpoint::EndpointId;
use crate::error::BusError;
use crate::message::{Message, MessageBody, MessageKind};
use crate::transport::SendMessages;

/// Runs a locally registered command on behalf of a remote caller.
///
/// The command runs on the runtime so the delivery loop is not held up;
/// the reply goes out once it finishes. Commands without a value answer
/// with `Success`, commands with one with `CommandInvokedResponse`, and any
/// failure (unknown set or member, bad arguments, handler error) with
/// `Failure`. A handler that panics is answered with `Failure` as well.
pub struct CommandInvokedProcessAction {
    local: EndpointId,
    sender: Arc<dyn SendMessages>,
    commands: Arc<LocalCommandCollection>,
    runtime: Handle,
}

impl CommandInvokedProcessAction {
    pub fn new(
        local: EndpointId,
        sender: Arc<dyn SendMessages>,
        commands: Arc<LocalCommandCollection>,
        runtime: Handle,
    ) -> Self {
        Self {
            local,
            sender,
            commands,
            runtime,
        }
    }
}

impl MessageProcessAction for CommandInvokedProcessAction {
    fn message_kind(&self) -> MessageKind {
        MessageKind::CommandInvoked
    }

    fn invoke(&self, message: Message) {
        let MessageBody::CommandInvoked { invocation } = &message.body else {
            return;
        };

        let started = self
            .commands
            .commands_for(&invocation.command_set)
            .ok_or_else(|| BusError::UnknownCommandSet(invocation.command_set.clone()))
            .and_then(|set| set.invoke(&invocation.member_name, invocation.arguments.clone()));
        let future = match started {
            Ok(future) => future,
            Err(err) => {
                tracing::error!(
                    caller = %message.sender,
                    command_set = %invocation.command_set,
                    member = %invocation.member_name,
                    "cannot invoke command: {err}"
                );
                reply(&*self.sender, &self.local, &message, MessageBody::Failure);
                return;
            }
        };

        let local = self.local.clone();
        let sender = self.sender.clone();
        self.runtime.spawn(async move {
            let body = match AssertUnwindSafe(future).catch_unwind().await {
                Ok(Ok(CommandOutcome::Completed)) => MessageBody::Success,
                Ok(Ok(CommandOutcome::Value(result))) => {
                    MessageBody::CommandInvokedResponse { result }
                }
                Ok(Err(err)) => {
                    tracing::error!(caller = %message.sender, "command failed: {err:#}");
                    MessageBody::Failure
                }
                Err(panic) => {
                    tracing::error!(
                        caller = %message.sender,
                        "command panicked: {}",
                        panic_message(&*panic)
                    );
                    MessageBody::Failure
                }
            };
            reply(&*sender, &local, &message, body);
        });
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(msg) = panic.downcast_ref::<&'static str>() {
        msg
    } else if let Some(msg) = panic.downcast_ref::<String>() {
        msg
    } else {
        "unknown panic"
    }
}
