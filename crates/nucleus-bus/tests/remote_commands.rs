//! Two endpoints talking over the in-process network.

mod common;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::anyhow;
use common::eventually;
use nucleus_bus::endpoint::endpoint_id;
use nucleus_bus::{
    BusConfig, BusError, Command, CommandSet, CommandWithResult, CommunicationChannel,
    EndpointBus, EndpointId, InProcessNetwork, InvocationError, Message, MessageBody,
    MessageKind, NotificationEvent, NotificationSet, SendMessages, SerializedType,
};
use tokio::runtime::Handle;

const CALC: &str = "calculator";
const ADD: CommandWithResult<(i64, i64), i64> = CommandWithResult::new(CALC, "add");
const DIVIDE: CommandWithResult<(i64, i64), i64> = CommandWithResult::new(CALC, "divide");
const CLEAR: Command<()> = Command::new(CALC, "clear");
const HANG: Command<()> = Command::new(CALC, "hang");
const CRASH: Command<()> = Command::new(CALC, "crash");
const CLEARED: NotificationEvent<u32> = NotificationEvent::new("calculator.events", "cleared");

struct Pair {
    network: Arc<InProcessNetwork>,
    server: EndpointBus,
    client: EndpointBus,
    clears: Arc<Mutex<u32>>,
}

fn endpoint(network: &Arc<InProcessNetwork>, name: &str) -> EndpointBus {
    let bus = EndpointBus::with_endpoint_id(
        endpoint_id(name),
        BusConfig::default().with_endpoint_name(name),
        network.clone(),
        Handle::current(),
    );
    network.open(bus.local_endpoint(), bus.handler()).unwrap();
    bus
}

fn calculator(clears: Arc<Mutex<u32>>) -> CommandSet {
    CommandSet::builder(CALC)
        .command_with_result(&ADD, |(a, b)| async move { Ok(a + b) })
        .command_with_result(&DIVIDE, |(a, b): (i64, i64)| async move {
            a.checked_div(b).ok_or_else(|| anyhow!("division by zero"))
        })
        .command(&CLEAR, move |()| {
            let clears = clears.clone();
            async move {
                *clears.lock().unwrap() += 1;
                Ok(())
            }
        })
        .command(&HANG, |()| async {
            futures::future::pending::<()>().await;
            Ok(())
        })
        .command(&CRASH, |()| async { panic!("calculator crashed") })
        .build()
}

fn pair() -> Pair {
    let network = InProcessNetwork::new(Handle::current());
    let server = endpoint(&network, "server");
    let client = endpoint(&network, "client");
    let clears = Arc::new(Mutex::new(0));
    server.register_commands(calculator(clears.clone())).unwrap();
    Pair {
        network,
        server,
        client,
        clears,
    }
}

fn calc() -> SerializedType {
    SerializedType::new(CALC)
}

#[tokio::test(flavor = "multi_thread")]
async fn discovery_lists_exactly_the_registered_sets() {
    let pair = pair();
    pair.server
        .register_commands(CommandSet::builder("admin").build())
        .unwrap();

    let offered = pair.client.discover(pair.server.local_endpoint()).await.unwrap();
    assert_eq!(offered, vec![SerializedType::new("admin"), calc()]);
    assert!(pair.client.remote_commands().has_command_for(pair.server.local_endpoint(), &calc()));
}

#[tokio::test(flavor = "multi_thread")]
async fn remote_commands_return_values_and_acknowledgements() {
    let pair = pair();
    let server = pair.server.local_endpoint().clone();
    pair.client.discover(&server).await.unwrap();
    let proxy = pair.client.commands_from(&server, &calc()).unwrap();

    assert_eq!(proxy.invoke_with_result(&ADD, &(40, 2)).await.unwrap(), 42);
    proxy.invoke(&CLEAR, &()).await.unwrap();
    assert_eq!(*pair.clears.lock().unwrap(), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn remote_failure_surfaces_as_invocation_failure() {
    let pair = pair();
    let server = pair.server.local_endpoint().clone();
    pair.client.discover(&server).await.unwrap();
    let proxy = pair.client.commands_from(&server, &calc()).unwrap();

    let err = proxy.invoke_with_result(&DIVIDE, &(1, 0)).await.unwrap_err();
    assert!(matches!(err, InvocationError::Failed));

    // The endpoint keeps serving after a failure.
    assert_eq!(proxy.invoke_with_result(&DIVIDE, &(9, 3)).await.unwrap(), 3);
}

#[tokio::test(flavor = "multi_thread")]
async fn panicking_command_is_answered_with_failure() {
    let pair = pair();
    let server = pair.server.local_endpoint().clone();
    pair.client.discover(&server).await.unwrap();
    let proxy = pair.client.commands_from(&server, &calc()).unwrap();

    let result = tokio::time::timeout(Duration::from_secs(5), proxy.invoke(&CRASH, &()))
        .await
        .expect("caller should get an answer");
    assert!(matches!(result, Err(InvocationError::Failed)));
    assert_eq!(pair.client.handler().pending_responses(), 0);

    assert_eq!(proxy.invoke_with_result(&ADD, &(1, 2)).await.unwrap(), 3);
}

#[tokio::test(flavor = "multi_thread")]
async fn proxies_only_exist_for_offered_sets() {
    let pair = pair();
    let server = pair.server.local_endpoint().clone();

    let err = pair.client.commands_from(&server, &calc()).unwrap_err();
    assert!(matches!(err, BusError::UnknownEndpoint(_)));

    pair.client.discover(&server).await.unwrap();
    let err = pair
        .client
        .commands_from(&server, &SerializedType::new("payroll"))
        .unwrap_err();
    assert!(matches!(err, BusError::CommandNotSupported { .. }));
}

#[tokio::test(flavor = "multi_thread")]
async fn unknown_message_is_answered_once() {
    let pair = pair();
    let server = pair.server.local_endpoint().clone();
    let handler = pair.client.handler();

    let stray = Message::new(pair.client.local_endpoint().clone(), MessageBody::Failure);
    let reply = handler.forward_response(server.clone(), stray.id);
    pair.network.send(&server, stray).unwrap();

    let reply = reply.await.unwrap();
    assert_eq!(
        reply.body,
        MessageBody::UnknownMessageType {
            kind: MessageKind::Failure
        }
    );
    assert_eq!(handler.pending_responses(), 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn sign_off_cancels_calls_waiting_on_that_endpoint() {
    let pair = Arc::new(pair());
    let server = pair.server.local_endpoint().clone();
    let client = pair.client.local_endpoint().clone();

    pair.client.announce_to(&server).unwrap();
    eventually("server to learn about client", || pair.server.endpoints().is_known(&client)).await;
    pair.client.discover(&server).await.unwrap();
    let proxy = pair.client.commands_from(&server, &calc()).unwrap();

    let call = tokio::spawn(async move { proxy.invoke(&HANG, &()).await });
    eventually("call to be pending", || pair.client.handler().pending_responses() == 1).await;

    pair.server.sign_off();
    let result = call.await.unwrap();
    assert!(matches!(result, Err(InvocationError::Cancelled)));
    eventually("client to forget server", || {
        !pair.client.remote_commands().has_commands_for(&server)
    })
    .await;
}

#[tokio::test(flavor = "multi_thread")]
async fn closing_the_local_channel_cancels_everything() {
    let pair = pair();
    let server = pair.server.local_endpoint().clone();
    pair.client.discover(&server).await.unwrap();
    let proxy = pair.client.commands_from(&server, &calc()).unwrap();

    let call = tokio::spawn(async move { proxy.invoke(&HANG, &()).await });
    let handler = pair.client.handler();
    eventually("call to be pending", || handler.pending_responses() == 1).await;

    pair.network.close(pair.client.local_endpoint());
    assert!(matches!(call.await.unwrap(), Err(InvocationError::Cancelled)));
}

#[tokio::test(flavor = "multi_thread")]
async fn sending_to_a_missing_endpoint_fails_without_leaking_a_waiter() {
    let pair = pair();
    let err = pair.client.discover(&endpoint_id("nowhere")).await.unwrap_err();
    assert!(matches!(err, InvocationError::Send(_)));
    assert_eq!(pair.client.handler().pending_responses(), 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn connecting_announces_existing_and_new_registrations() {
    let pair = pair();
    let server = pair.server.local_endpoint().clone();
    let client = pair.client.local_endpoint().clone();

    pair.client.announce_to(&server).unwrap();
    eventually("client to hear about calculator", || {
        pair.client.remote_commands().has_command_for(&server, &calc())
    })
    .await;

    pair.server
        .register_commands(CommandSet::builder("admin").build())
        .unwrap();
    eventually("client to hear about admin", || {
        pair.client
            .remote_commands()
            .has_command_for(&server, &SerializedType::new("admin"))
    })
    .await;
    assert!(pair.server.endpoints().is_known(&client));
}

#[tokio::test(flavor = "multi_thread")]
async fn notifications_reach_subscribers_until_they_unsubscribe() {
    let pair = pair();
    let server = pair.server.local_endpoint().clone();
    pair.server
        .register_notifications(NotificationSet::new("calculator.events", ["cleared"]))
        .unwrap();

    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    pair.client
        .remote_notifications()
        .subscribe(&server, &CLEARED, move |count| {
            let _ = tx.send(count);
        })
        .await
        .unwrap();

    assert_eq!(pair.server.raise(&CLEARED, &3).unwrap(), 1);
    assert_eq!(rx.recv().await, Some(3));

    pair.client
        .remote_notifications()
        .unsubscribe(&server, &CLEARED.registration())
        .unwrap();
    let notifications = pair.server.notifications().clone();
    eventually("server to drop the subscription", || {
        notifications.subscribers_of(&CLEARED.registration()).is_empty()
    })
    .await;
    assert_eq!(pair.server.raise(&CLEARED, &4).unwrap(), 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn endpoint_information_records_both_kinds_of_offer() {
    let pair = pair();
    let server: EndpointId = pair.server.local_endpoint().clone();
    pair.server
        .register_notifications(NotificationSet::new("calculator.events", ["cleared"]))
        .unwrap();

    let (commands, notifications) = pair.client.endpoint_information(&server).await.unwrap();
    assert_eq!(commands, vec![calc()]);
    assert_eq!(notifications, vec![SerializedType::new("calculator.events")]);
    assert_eq!(
        pair.client.remote_notifications().available_notifications_for(&server),
        notifications
    );
}
