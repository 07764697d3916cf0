//! Notification hub: fan-out of accepted laps to live subscribers.
//!
//! One task owns the subscriber set. Everything else talks to it through a
//! [`HubHandle`], which sends [`HubCommand`]s over an mpsc channel, so the
//! set is never touched from two tasks.
//!
//! Each subscriber gets a private bounded queue drained by its own delivery
//! task. Publishing never waits on a subscriber: a full queue either loses
//! its oldest entry or gets its subscriber disconnected, depending on the
//! [`OverflowPolicy`]. A stalled display therefore cannot hold up other
//! displays or the lap processor.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use relay_core::config::{MAX_QUEUE_CAPACITY, OverflowPolicy};
use relay_core::types::Notification;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};

use crate::ShutdownReceiver;

/// Capacity of the hub's own command queue.
const HUB_INBOX_CAPACITY: usize = 256;

pub type SubscriberId = u64;

/// Messages understood by the hub task.
#[derive(Debug)]
pub enum HubCommand {
    /// Register a fresh queue. No backlog is delivered.
    Subscribe { id: SubscriberId, queue: SubscriberTx },
    /// Remove a subscriber. Unknown ids are ignored.
    Unsubscribe(SubscriberId),
    /// Offer a notification to every current subscriber.
    Publish(Arc<Notification>),
}

/// Sending side of one subscriber's private queue.
#[derive(Debug)]
pub enum SubscriberTx {
    DropOldest(broadcast::Sender<Arc<Notification>>),
    Disconnect(mpsc::Sender<Arc<Notification>>),
}

/// Result of offering a notification to one subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Offer {
    Queued,
    /// Queue full under [`OverflowPolicy::Disconnect`].
    Full,
    /// The subscriber's receiver is gone.
    Gone,
}

impl SubscriberTx {
    fn offer(&self, notif: &Arc<Notification>) -> Offer {
        match self {
            // A broadcast send never blocks; a full ring overwrites its
            // oldest slot and the receiver sees `Lagged`.
            SubscriberTx::DropOldest(tx) => match tx.send(Arc::clone(notif)) {
                Ok(_) => Offer::Queued,
                Err(_) => Offer::Gone,
            },
            SubscriberTx::Disconnect(tx) => match tx.try_send(Arc::clone(notif)) {
                Ok(()) => Offer::Queued,
                Err(mpsc::error::TrySendError::Full(_)) => Offer::Full,
                Err(mpsc::error::TrySendError::Closed(_)) => Offer::Gone,
            },
        }
    }
}

#[derive(Debug)]
enum SubscriberRx {
    DropOldest(broadcast::Receiver<Arc<Notification>>),
    Disconnect(mpsc::Receiver<Arc<Notification>>),
}

/// Receiving side of a subscription, owned by one delivery task.
#[derive(Debug)]
pub struct Subscription {
    id: SubscriberId,
    rx: SubscriberRx,
}

impl Subscription {
    pub fn id(&self) -> SubscriberId {
        self.id
    }

    /// Next notification, or `None` once the hub has dropped this
    /// subscriber (shutdown, unsubscribe, or overflow disconnect).
    pub async fn recv(&mut self) -> Option<Arc<Notification>> {
        match &mut self.rx {
            SubscriberRx::DropOldest(rx) => loop {
                match rx.recv().await {
                    Ok(n) => return Some(n),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!("[hub] subscriber {} fell behind, skipped {skipped} notification(s)", self.id);
                    }
                    Err(broadcast::error::RecvError::Closed) => return None,
                }
            },
            SubscriberRx::Disconnect(rx) => rx.recv().await,
        }
    }
}

/// Cheap, cloneable access to the hub task.
#[derive(Debug, Clone)]
pub struct HubHandle {
    tx: mpsc::Sender<HubCommand>,
    next_id: Arc<AtomicU64>,
    queue_capacity: usize,
    policy: OverflowPolicy,
}

impl HubHandle {
    /// Register a new subscriber.
    ///
    /// Returns `None` if the hub has stopped.
    pub async fn subscribe(&self) -> Option<Subscription> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (queue, rx) = match self.policy {
            OverflowPolicy::DropOldest => {
                let (tx, rx) = broadcast::channel(self.queue_capacity);
                (SubscriberTx::DropOldest(tx), SubscriberRx::DropOldest(rx))
            }
            OverflowPolicy::Disconnect => {
                let (tx, rx) = mpsc::channel(self.queue_capacity);
                (SubscriberTx::Disconnect(tx), SubscriberRx::Disconnect(rx))
            }
        };
        self.tx.send(HubCommand::Subscribe { id, queue }).await.ok()?;
        Some(Subscription { id, rx })
    }

    pub async fn unsubscribe(&self, id: SubscriberId) {
        let _ = self.tx.send(HubCommand::Unsubscribe(id)).await;
    }

    /// Hand a notification to the hub for fan-out.
    ///
    /// Returns `false` if the hub has stopped.
    pub async fn publish(&self, notif: Notification) -> bool {
        self.tx.send(HubCommand::Publish(Arc::new(notif))).await.is_ok()
    }
}

/// The hub task state.
pub struct NotificationHub {
    rx: mpsc::Receiver<HubCommand>,
    subscribers: HashMap<SubscriberId, SubscriberTx>,
    published: u64,
}

/// Create a hub and a handle to it. Run the hub with [`NotificationHub::run`].
pub fn channel(queue_capacity: usize, policy: OverflowPolicy) -> (NotificationHub, HubHandle) {
    let (tx, rx) = mpsc::channel(HUB_INBOX_CAPACITY);
    let hub = NotificationHub {
        rx,
        subscribers: HashMap::new(),
        published: 0,
    };
    let handle = HubHandle {
        tx,
        next_id: Arc::new(AtomicU64::new(1)),
        queue_capacity: queue_capacity.clamp(1, MAX_QUEUE_CAPACITY),
        policy,
    };
    (hub, handle)
}

impl NotificationHub {
    /// Serve commands until shutdown or until every handle is dropped.
    ///
    /// Returning drops every subscriber queue, which ends their delivery
    /// tasks.
    pub async fn run(mut self, mut shutdown: ShutdownReceiver) {
        info!("[hub] ready to publish notifications");
        if *shutdown.borrow() {
            return;
        }
        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    info!("[hub] shutdown signal received");
                    break;
                }
                cmd = self.rx.recv() => match cmd {
                    Some(cmd) => self.handle(cmd),
                    None => {
                        info!("[hub] all handles dropped");
                        break;
                    }
                },
            }
        }
        info!(
            "[hub] stopped after {} notification(s), {} subscriber(s) connected",
            self.published,
            self.subscribers.len()
        );
    }

    fn handle(&mut self, cmd: HubCommand) {
        match cmd {
            HubCommand::Subscribe { id, queue } => {
                self.subscribers.insert(id, queue);
                info!("[hub] subscriber {id} registered ({} total)", self.subscribers.len());
            }
            HubCommand::Unsubscribe(id) => {
                if self.subscribers.remove(&id).is_some() {
                    info!("[hub] subscriber {id} unregistered ({} left)", self.subscribers.len());
                }
            }
            HubCommand::Publish(notif) => {
                self.published += 1;
                let mut dropped = Vec::new();
                for (id, queue) in &self.subscribers {
                    match queue.offer(&notif) {
                        Offer::Queued => {}
                        Offer::Full => {
                            warn!("[hub] subscriber {id} queue full, disconnecting");
                            dropped.push(*id);
                        }
                        Offer::Gone => {
                            debug!("[hub] subscriber {id} went away");
                            dropped.push(*id);
                        }
                    }
                }
                for id in dropped {
                    self.subscribers.remove(&id);
                }
            }
        }
    }
}
