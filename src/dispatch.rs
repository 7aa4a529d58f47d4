//! # Dispatch Module
//!
//! Fans every ingested event out to registered subscribers.
//!
//! Delivery is synchronous and in registration order: `publish` returns only
//! after every subscriber has been offered the event. A subscriber that
//! returns an error or panics is logged and skipped; the remaining
//! subscribers still receive the event and the ingestion loop never sees
//! the failure.
//!
//! Consumers that must run on another task (rendering, slow archival) should
//! register a [`ChannelSubscriber`], which forwards over a bounded queue.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use tokio::sync::mpsc;
use tracing::{error, warn};

use crate::telemetry::schema::TelemetryRecord;

/// Something the core tells its consumers
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    /// A decoded telemetry frame
    Telemetry(Arc<TelemetryRecord>),
    /// A received line, decoded or not
    Raw(String),
    /// The link came back after being unplugged
    Relinked,
    /// The link was lost; reconnect attempts follow
    Unplugged,
    /// An uplink command was written to the transport
    Sent(String),
    /// Human-readable status line (retry attempts, guard rejections, ...)
    Status(String),
}

/// Downstream consumer of [`Event`]s
pub trait Subscriber: Send + Sync {
    /// Name used in failure logs
    fn name(&self) -> &str;

    /// Handle one event; errors are logged by the dispatcher and otherwise ignored
    fn deliver(&self, event: &Event) -> anyhow::Result<()>;
}

/// Closure-backed subscriber
pub struct FnSubscriber<F> {
    name: String,
    f: F,
}

impl<F> FnSubscriber<F>
where
    F: Fn(&Event) -> anyhow::Result<()> + Send + Sync,
{
    pub fn new(name: impl Into<String>, f: F) -> Self {
        Self { name: name.into(), f }
    }
}

impl<F> Subscriber for FnSubscriber<F>
where
    F: Fn(&Event) -> anyhow::Result<()> + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn deliver(&self, event: &Event) -> anyhow::Result<()> {
        (self.f)(event)
    }
}

/// Forwards events to another task over a bounded queue
///
/// When the queue is full the event is dropped for this consumer only and
/// reported as a delivery failure; ingestion never waits on it.
pub struct ChannelSubscriber {
    name: String,
    tx: mpsc::Sender<Event>,
}

impl ChannelSubscriber {
    /// Create the subscriber and the receiving end of its queue
    pub fn new(name: impl Into<String>, capacity: usize) -> (Self, mpsc::Receiver<Event>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { name: name.into(), tx }, rx)
    }
}

impl Subscriber for ChannelSubscriber {
    fn name(&self) -> &str {
        &self.name
    }

    fn deliver(&self, event: &Event) -> anyhow::Result<()> {
        self.tx.try_send(event.clone()).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => anyhow::anyhow!("queue full, event dropped"),
            mpsc::error::TrySendError::Closed(_) => anyhow::anyhow!("receiver closed"),
        })
    }
}

/// Handle returned by [`Dispatcher::subscribe`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

struct Entry {
    id: SubscriptionId,
    subscriber: Arc<dyn Subscriber>,
    failures: Arc<AtomicU64>,
}

/// Ordered set of subscribers
#[derive(Default)]
pub struct Dispatcher {
    entries: RwLock<Vec<Entry>>,
    next_id: AtomicU64,
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("subscribers", &self.subscriber_names())
            .finish()
    }
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a subscriber at the end of the delivery order
    pub fn subscribe(&self, subscriber: Arc<dyn Subscriber>) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Entry {
                id,
                subscriber,
                failures: Arc::new(AtomicU64::new(0)),
            });
        id
    }

    /// Register a closure
    pub fn subscribe_fn<F>(&self, name: impl Into<String>, f: F) -> SubscriptionId
    where
        F: Fn(&Event) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.subscribe(Arc::new(FnSubscriber::new(name, f)))
    }

    /// Remove a subscriber; returns `false` if it was not registered
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        let before = entries.len();
        entries.retain(|entry| entry.id != id);
        entries.len() != before
    }

    pub fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Subscriber names in delivery order
    pub fn subscriber_names(&self) -> Vec<String> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|entry| entry.subscriber.name().to_string())
            .collect()
    }

    /// Failed deliveries recorded for a subscriber
    pub fn failure_count(&self, id: SubscriptionId) -> Option<u64> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .find(|entry| entry.id == id)
            .map(|entry| entry.failures.load(Ordering::Relaxed))
    }

    /// Offer an event to every subscriber in registration order
    ///
    /// Returns the number of subscribers that failed to handle it.
    pub fn publish(&self, event: &Event) -> usize {
        // Snapshot so subscribers may (un)subscribe from inside deliver()
        let snapshot: Vec<(Arc<dyn Subscriber>, Arc<AtomicU64>)> = self
            .entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|entry| (Arc::clone(&entry.subscriber), Arc::clone(&entry.failures)))
            .collect();

        let mut failed = 0;
        for (subscriber, failures) in snapshot {
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| subscriber.deliver(event)));
            match outcome {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    failed += 1;
                    failures.fetch_add(1, Ordering::Relaxed);
                    warn!("Subscriber '{}' failed: {:#}", subscriber.name(), e);
                }
                Err(payload) => {
                    failed += 1;
                    failures.fetch_add(1, Ordering::Relaxed);
                    let message = payload
                        .downcast_ref::<&str>()
                        .map(|s| s.to_string())
                        .or_else(|| payload.downcast_ref::<String>().cloned())
                        .unwrap_or_else(|| "unknown panic".to_string());
                    error!("Subscriber '{}' panicked: {}", subscriber.name(), message);
                }
            }
        }
        failed
    }
}
