//! Caller-side stand-in for a command set living on another endpoint.

use std::sync::Arc;

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::command::{Command, CommandWithResult};
use crate::endpoint::EndpointId;
use crate::error::InvocationError;
use crate::handler::MessageHandler;
use crate::message::{Message, MessageBody, SerializedMethodInvocation, SerializedType};
use crate::transport::SendMessages;

/// Sends `message` to `target` and waits for the reply.
pub(crate) async fn request(
    handler: &MessageHandler,
    sender: &dyn SendMessages,
    target: &EndpointId,
    message: Message,
) -> Result<Message, InvocationError> {
    let id = message.id;
    let waiter = handler.forward_response(target.clone(), id);
    if let Err(err) = sender.send(target, message) {
        handler.forget_response(id);
        return Err(InvocationError::Send(err));
    }
    waiter.await.map_err(|_| InvocationError::Cancelled)
}

/// Maps the reply to a request that expects a bare acknowledgement.
pub(crate) fn expect_success(reply: Message) -> Result<(), InvocationError> {
    match reply.body {
        MessageBody::Success => Ok(()),
        other => Err(unexpected(other)),
    }
}

fn unexpected(body: MessageBody) -> InvocationError {
    match body {
        MessageBody::Failure => InvocationError::Failed,
        MessageBody::UnknownMessageType { .. } => InvocationError::NotUnderstood,
        other => InvocationError::UnexpectedResponse(other.kind()),
    }
}

#[derive(Clone)]
pub struct CommandSetProxy {
    local: EndpointId,
    target: EndpointId,
    command_set: SerializedType,
    sender: Arc<dyn SendMessages>,
    handler: Arc<MessageHandler>,
}

impl std::fmt::Debug for CommandSetProxy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandSetProxy")
            .field("target", &self.target)
            .field("command_set", &self.command_set)
            .finish()
    }
}

impl CommandSetProxy {
    pub fn new(
        local: EndpointId,
        target: EndpointId,
        command_set: SerializedType,
        sender: Arc<dyn SendMessages>,
        handler: Arc<MessageHandler>,
    ) -> Self {
        Self {
            local,
            target,
            command_set,
            sender,
            handler,
        }
    }

    pub fn target(&self) -> &EndpointId {
        &self.target
    }

    pub fn command_set(&self) -> &SerializedType {
        &self.command_set
    }

    /// Runs a command that has no result; resolves once the remote side
    /// reports success or failure.
    pub async fn invoke<A: Serialize>(&self, command: &Command<A>, args: &A) -> Result<(), InvocationError> {
        self.check_set(command.command_set())?;
        let reply = self.send_invocation(command.name(), args).await?;
        expect_success(reply)
    }

    pub async fn invoke_with_result<A, R>(
        &self,
        command: &CommandWithResult<A, R>,
        args: &A,
    ) -> Result<R, InvocationError>
    where
        A: Serialize,
        R: DeserializeOwned,
    {
        self.check_set(command.command_set())?;
        let reply = self.send_invocation(command.name(), args).await?;
        match reply.body {
            MessageBody::CommandInvokedResponse { result } => Ok(serde_cbor::from_slice(&result)?),
            other => Err(unexpected(other)),
        }
    }

    fn check_set(&self, found: SerializedType) -> Result<(), InvocationError> {
        if found != self.command_set {
            return Err(InvocationError::CommandSetMismatch {
                expected: self.command_set.clone(),
                found,
            });
        }
        Ok(())
    }

    async fn send_invocation<A: Serialize>(&self, member: &str, args: &A) -> Result<Message, InvocationError> {
        let invocation = SerializedMethodInvocation {
            command_set: self.command_set.clone(),
            member_name: member.to_string(),
            arguments: serde_cbor::to_vec(args)?,
        };
        let message = Message::new(self.local.clone(), MessageBody::CommandInvoked { invocation });
        tracing::trace!(target_endpoint = %self.target, command_set = %self.command_set, member, "invoking remote command");
        request(&self.handler, &*self.sender, &self.target, message).await
    }
}
