//! Processors driven directly, without a transport in between.

mod common;

use std::sync::Arc;
use std::sync::atomic::Ordering;

use anyhow::anyhow;
use common::{ScriptedSender, count_errors, count_errors_until_dropped, eventually};
use nucleus_bus::command::{CommandSet, CommandWithResult};
use nucleus_bus::endpoint::endpoint_id;
use nucleus_bus::processors::{
    CommandInformationRequestProcessAction, CommandInvokedProcessAction,
    EndpointConnectProcessAction,
    EndpointDisconnectProcessAction, EndpointInformationRequestProcessAction,
    RegisterForNotificationProcessAction, UnknownMessageTypeProcessAction,
};
use nucleus_bus::sinks::TrackConnectedEndpoints;
use nucleus_bus::{
    ChannelType, EndpointDirectory, LocalCommandCollection, LocalNotificationCollection, Message,
    MessageBody, MessageHandler, MessageKind, MessageProcessAction, NotificationEvent,
    NotificationSet, SerializedMethodInvocation, SerializedType,
};
use tokio::runtime::Handle;

const SQUARE: CommandWithResult<i64, i64> = CommandWithResult::new("math", "square");
const SQRT: CommandWithResult<i64, i64> = CommandWithResult::new("math", "sqrt");

fn commands_named(names: &[&str]) -> Arc<LocalCommandCollection> {
    let commands = Arc::new(LocalCommandCollection::new());
    for name in names {
        commands.register(CommandSet::builder(*name).build()).unwrap();
    }
    commands
}

#[test]
fn unknown_message_gets_exactly_one_answer_to_its_sender() {
    let sender = ScriptedSender::reliable();
    let handler = MessageHandler::new();
    handler.on_unknown_message(Arc::new(UnknownMessageTypeProcessAction::new(
        endpoint_id("me"),
        sender.clone(),
    )));

    let stray = Message::new(endpoint_id("caller"), MessageBody::EndpointInformationRequest);
    handler.process_message(stray.clone());

    let sent = sender.sent();
    assert_eq!(sent.len(), 1);
    let (to, reply) = &sent[0];
    assert_eq!(*to, endpoint_id("caller"));
    assert_eq!(reply.in_response_to, stray.id);
    assert_eq!(
        reply.body,
        MessageBody::UnknownMessageType {
            kind: MessageKind::EndpointInformationRequest
        }
    );
}

#[test]
fn command_information_lists_exactly_the_registered_sets() {
    let sender = ScriptedSender::reliable();
    let action = CommandInformationRequestProcessAction::new(
        endpoint_id("me"),
        sender.clone(),
        commands_named(&["b.cmds", "a.cmds"]),
    );

    let request = Message::new(endpoint_id("caller"), MessageBody::CommandInformationRequest);
    let (_, errors) = count_errors(|| action.invoke(request.clone()));
    assert_eq!(errors, 0);

    let sent = sender.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(
        sent[0].1.body,
        MessageBody::CommandInformationResponse {
            commands: vec![SerializedType::new("a.cmds"), SerializedType::new("b.cmds")],
        }
    );
}

#[test]
fn one_failed_send_is_logged_once_and_followed_by_a_failure_message() {
    let sender = ScriptedSender::failing(1);
    let action = CommandInformationRequestProcessAction::new(
        endpoint_id("me"),
        sender.clone(),
        commands_named(&["a.cmds"]),
    );

    let request = Message::new(endpoint_id("caller"), MessageBody::CommandInformationRequest);
    let (_, errors) = count_errors(|| action.invoke(request.clone()));

    assert_eq!(errors, 1);
    assert_eq!(sender.attempts(), 2);
    let sent = sender.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].1.body, MessageBody::Failure);
    assert_eq!(sent[0].1.in_response_to, request.id);
}

#[test]
fn two_failed_sends_are_logged_twice_and_not_retried_again() {
    let sender = ScriptedSender::failing(usize::MAX);
    let action = UnknownMessageTypeProcessAction::new(endpoint_id("me"), sender.clone());

    let stray = Message::new(endpoint_id("caller"), MessageBody::Success);
    let (_, errors) = count_errors(|| action.invoke(stray));

    assert_eq!(errors, 2);
    assert_eq!(sender.attempts(), 2);
    assert!(sender.sent().is_empty());
}

#[test]
fn endpoint_information_covers_commands_and_notifications() {
    let sender = ScriptedSender::reliable();
    let notifications = Arc::new(LocalNotificationCollection::new(endpoint_id("me"), sender.clone()));
    notifications
        .register(NotificationSet::new("clock", ["tick"]))
        .unwrap();
    let action = EndpointInformationRequestProcessAction::new(
        endpoint_id("me"),
        sender.clone(),
        commands_named(&["a.cmds"]),
        notifications,
    );

    action.invoke(Message::new(endpoint_id("caller"), MessageBody::EndpointInformationRequest));

    assert_eq!(
        sender.sent()[0].1.body,
        MessageBody::EndpointInformationResponse {
            commands: vec![SerializedType::new("a.cmds")],
            notifications: vec![SerializedType::new("clock")],
        }
    );
}

#[test]
fn connect_and_disconnect_update_the_directory() {
    let directory = Arc::new(EndpointDirectory::new());
    let trackers: Vec<Arc<dyn TrackConnectedEndpoints>> = vec![directory.clone()];
    let connect = EndpointConnectProcessAction::new(trackers.clone());
    let disconnect = EndpointDisconnectProcessAction::new(trackers);

    connect.invoke(Message::new(
        endpoint_id("peer"),
        MessageBody::EndpointConnect {
            channel: ChannelType::Tcp,
            address: "10.0.0.2:7000".into(),
        },
    ));
    let info = directory.info(&endpoint_id("peer")).unwrap();
    assert_eq!(info.channel, ChannelType::Tcp);
    assert_eq!(info.address, "10.0.0.2:7000");

    disconnect.invoke(Message::new(endpoint_id("peer"), MessageBody::EndpointDisconnect));
    assert!(!directory.is_known(&endpoint_id("peer")));
}

#[test]
fn subscription_requests_are_acknowledged_or_refused() {
    const TICK: NotificationEvent<u64> = NotificationEvent::new("clock", "tick");
    const TOCK: NotificationEvent<u64> = NotificationEvent::new("clock", "tock");

    let sender = ScriptedSender::reliable();
    let notifications = Arc::new(LocalNotificationCollection::new(endpoint_id("me"), sender.clone()));
    notifications
        .register(NotificationSet::new("clock", ["tick"]))
        .unwrap();
    let action =
        RegisterForNotificationProcessAction::new(endpoint_id("me"), sender.clone(), notifications.clone());

    for event in [&TICK, &TOCK] {
        action.invoke(Message::new(
            endpoint_id("caller"),
            MessageBody::RegisterForNotification {
                registration: event.registration(),
            },
        ));
    }

    let bodies: Vec<MessageBody> = sender.sent().into_iter().map(|(_, m)| m.body).collect();
    assert_eq!(bodies, vec![MessageBody::Success, MessageBody::Failure]);
    assert_eq!(
        notifications.subscribers_of(&TICK.registration()),
        vec![endpoint_id("caller")]
    );
}

fn math_action(sender: Arc<ScriptedSender>) -> CommandInvokedProcessAction {
    let commands = Arc::new(LocalCommandCollection::new());
    commands
        .register(
            CommandSet::builder("math")
                .command_with_result(&SQUARE, |x: i64| async move { Ok(x * x) })
                .command_with_result(&SQRT, |x: i64| async move {
                    if x < 0 {
                        return Err(anyhow!("negative input"));
                    }
                    Ok((x as f64).sqrt() as i64)
                })
                .build(),
        )
        .unwrap();
    CommandInvokedProcessAction::new(endpoint_id("me"), sender, commands, Handle::current())
}

fn invocation(command_set: &str, member: &str, argument: i64) -> Message {
    Message::new(
        endpoint_id("caller"),
        MessageBody::CommandInvoked {
            invocation: SerializedMethodInvocation {
                command_set: SerializedType::new(command_set),
                member_name: member.to_string(),
                arguments: serde_cbor::to_vec(&argument).unwrap(),
            },
        },
    )
}

#[tokio::test]
async fn invoked_command_replies_with_its_value() {
    let sender = ScriptedSender::reliable();
    let action = math_action(sender.clone());

    let request = invocation("math", "square", 7);
    action.invoke(request.clone());
    eventually("reply to be sent", || sender.sent().len() == 1).await;

    let (to, reply) = &sender.sent()[0];
    assert_eq!(*to, endpoint_id("caller"));
    assert_eq!(reply.in_response_to, request.id);
    assert_eq!(
        reply.body,
        MessageBody::CommandInvokedResponse {
            result: serde_cbor::to_vec(&49i64).unwrap()
        }
    );
}

#[tokio::test]
async fn invoked_command_falls_back_to_one_failure_when_the_reply_cannot_be_sent() {
    let (guard, errors) = count_errors_until_dropped();
    let sender = ScriptedSender::failing(1);
    let action = math_action(sender.clone());

    let request = invocation("math", "square", 3);
    action.invoke(request.clone());
    eventually("fallback to be sent", || sender.attempts() == 2).await;
    drop(guard);

    assert_eq!(errors.load(Ordering::SeqCst), 1);
    let sent = sender.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].1.body, MessageBody::Failure);
    assert_eq!(sent[0].1.in_response_to, request.id);
}

#[tokio::test]
async fn failing_command_is_answered_with_failure() {
    let sender = ScriptedSender::reliable();
    let action = math_action(sender.clone());

    action.invoke(invocation("math", "sqrt", -4));
    eventually("reply to be sent", || sender.sent().len() == 1).await;
    assert_eq!(sender.sent()[0].1.body, MessageBody::Failure);
}

#[tokio::test]
async fn unknown_set_or_member_is_refused_without_running_anything() {
    let sender = ScriptedSender::failing(1);
    let action = math_action(sender.clone());

    let unknown_set = invocation("physics", "square", 2);
    let (_, errors) = count_errors(|| action.invoke(unknown_set.clone()));
    // One for the refused invocation, one for the failed send.
    assert_eq!(errors, 2);
    assert_eq!(sender.attempts(), 2);

    let unknown_member = invocation("math", "cube", 2);
    let (_, errors) = count_errors(|| action.invoke(unknown_member.clone()));
    assert_eq!(errors, 1);
    assert_eq!(sender.attempts(), 3);

    let replies: Vec<_> = sender
        .sent()
        .into_iter()
        .map(|(_, m)| (m.in_response_to, m.body))
        .collect();
    assert_eq!(
        replies,
        vec![
            (unknown_set.id, MessageBody::Failure),
            (unknown_member.id, MessageBody::Failure),
        ]
    );
}
