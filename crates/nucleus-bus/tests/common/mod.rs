#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use nucleus_bus::{EndpointId, Message, SendMessages, TransportError};
use tracing::subscriber::DefaultGuard;
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::layer::{Context, Layer, SubscriberExt};

/// Counts error-level events.
struct ErrorCounter {
    count: Arc<AtomicUsize>,
}

impl<S: Subscriber> Layer<S> for ErrorCounter {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        if *event.metadata().level() == Level::ERROR {
            self.count.fetch_add(1, Ordering::SeqCst);
        }
    }
}

/// Runs `f` on this thread and returns its result with the number of
/// error-level events it logged.
pub fn count_errors<R>(f: impl FnOnce() -> R) -> (R, usize) {
    let count = Arc::new(AtomicUsize::new(0));
    let subscriber = tracing_subscriber::registry().with(ErrorCounter {
        count: count.clone(),
    });
    let result = tracing::subscriber::with_default(subscriber, f);
    (result, count.load(Ordering::SeqCst))
}

/// Counts error-level events on this thread until the guard is dropped.
/// Under a current-thread runtime this includes tasks spawned meanwhile.
pub fn count_errors_until_dropped() -> (DefaultGuard, Arc<AtomicUsize>) {
    let count = Arc::new(AtomicUsize::new(0));
    let subscriber = tracing_subscriber::registry().with(ErrorCounter {
        count: count.clone(),
    });
    (tracing::subscriber::set_default(subscriber), count)
}

/// Sender that fails a set number of times before succeeding and records
/// everything that got through.
#[derive(Default)]
pub struct ScriptedSender {
    failures_left: AtomicUsize,
    attempts: AtomicUsize,
    sent: Mutex<Vec<(EndpointId, Message)>>,
}

impl ScriptedSender {
    pub fn reliable() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn failing(times: usize) -> Arc<Self> {
        Arc::new(Self {
            failures_left: AtomicUsize::new(times),
            ..Self::default()
        })
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    pub fn sent(&self) -> Vec<(EndpointId, Message)> {
        self.sent.lock().unwrap().clone()
    }
}

impl SendMessages for ScriptedSender {
    fn send(&self, to: &EndpointId, message: Message) -> Result<(), TransportError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let failed = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        if failed {
            return Err(TransportError::Other("scripted failure".into()));
        }
        self.sent.lock().unwrap().push((to.clone(), message));
        Ok(())
    }
}

/// Polls `condition` until it holds, failing the test after a few seconds.
pub async fn eventually(what: &str, condition: impl Fn() -> bool) {
    for _ in 0..500 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for {what}");
}
