// Feed worker: owns the catalog and applies upstream commands strictly in delivery order.
// After every command it drains child transitions, so parents catch up one turn later.

use crate::catalog::{Catalog, CatalogError, Delivery};
use crate::event::{ChangeEvent, Notification};
use crate::observer::BroadcastObserver;
use crate::resource::{ResourceInit, ResourceSnapshot};
use crate::tally::ResourceKey;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::time::{Duration, interval};

pub enum FeedCommand {
    Event(Value),
    Register {
        init: ResourceInit,
        reply: oneshot::Sender<Result<ResourceSnapshot, CatalogError>>,
    },
    Remove {
        key: ResourceKey,
        reply: oneshot::Sender<bool>,
    },
    Snapshot {
        key: Option<ResourceKey>,
        reply: oneshot::Sender<Vec<ResourceSnapshot>>,
    },
}

#[derive(Debug, thiserror::Error)]
pub enum FeedError {
    #[error(transparent)]
    Catalog(#[from] CatalogError),
    #[error("feed worker is not running")]
    WorkerGone,
}

/// Cloneable sender side used by routes to talk to the worker.
#[derive(Debug, Clone)]
pub struct CatalogHandle {
    tx: mpsc::Sender<FeedCommand>,
}

impl CatalogHandle {
    pub fn new(tx: mpsc::Sender<FeedCommand>) -> Self {
        Self { tx }
    }

    /// Queues a raw upstream event. Validation happens in the worker.
    pub async fn publish(&self, event: Value) -> Result<(), FeedError> {
        self.tx
            .send(FeedCommand::Event(event))
            .await
            .map_err(|_| FeedError::WorkerGone)
    }

    pub async fn register(&self, init: ResourceInit) -> Result<ResourceSnapshot, FeedError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(FeedCommand::Register { init, reply })
            .await
            .map_err(|_| FeedError::WorkerGone)?;
        Ok(rx.await.map_err(|_| FeedError::WorkerGone)??)
    }

    pub async fn remove(&self, key: ResourceKey) -> Result<bool, FeedError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(FeedCommand::Remove { key, reply })
            .await
            .map_err(|_| FeedError::WorkerGone)?;
        rx.await.map_err(|_| FeedError::WorkerGone)
    }

    /// One resource when `key` is given, otherwise all of them.
    pub async fn snapshots(
        &self,
        key: Option<ResourceKey>,
    ) -> Result<Vec<ResourceSnapshot>, FeedError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(FeedCommand::Snapshot { key, reply })
            .await
            .map_err(|_| FeedError::WorkerGone)?;
        rx.await.map_err(|_| FeedError::WorkerGone)
    }
}

/// Registers a resource and attaches the observer that forwards its changes to UI clients.
pub fn register_with_broadcast(
    catalog: &mut Catalog,
    init: ResourceInit,
    notify_tx: &broadcast::Sender<Notification>,
) -> Result<ResourceSnapshot, CatalogError> {
    let key = init.key();
    let resource = catalog.register(init)?;
    resource.subscribe(Arc::new(BroadcastObserver::new(key, notify_tx.clone())));
    Ok(resource.snapshot())
}

/// Counters reported in the periodic stats log.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct FeedStats {
    pub events_applied: u64,
    pub events_ignored: u64,
    pub events_unrouted: u64,
    pub events_malformed: u64,
    pub transitions_applied: u64,
}

/// Catalog, channels, and shutdown for the worker.
pub struct FeedDeps {
    pub catalog: Catalog,
    pub commands_rx: mpsc::Receiver<FeedCommand>,
    pub notify_tx: broadcast::Sender<Notification>,
    pub shutdown_rx: oneshot::Receiver<()>,
}

pub struct FeedConfig {
    pub stats_log_interval_secs: u64,
}

/// Applies one command to the catalog, then runs the follow-up turn for child transitions.
pub fn handle_command(
    catalog: &mut Catalog,
    notify_tx: &broadcast::Sender<Notification>,
    stats: &mut FeedStats,
    command: FeedCommand,
) {
    match command {
        FeedCommand::Event(value) => match ChangeEvent::from_value(value) {
            Ok(event) => match catalog.deliver(&event) {
                Delivery::Applied(_) => stats.events_applied += 1,
                Delivery::Ignored => stats.events_ignored += 1,
                Delivery::Unrouted { .. } => stats.events_unrouted += 1,
            },
            Err(e) => {
                stats.events_malformed += 1;
                tracing::warn!(error = %e, operation = "deliver_event", "malformed event ignored");
            }
        },
        FeedCommand::Register { init, reply } => {
            let result = register_with_broadcast(catalog, init, notify_tx);
            if let Err(e) = &result {
                tracing::warn!(error = %e, operation = "register", "resource registration failed");
            }
            let _ = reply.send(result);
        }
        FeedCommand::Remove { key, reply } => {
            let _ = reply.send(catalog.remove(&key));
        }
        FeedCommand::Snapshot { key, reply } => {
            let snapshots = match key {
                Some(key) => catalog.snapshot(&key).into_iter().collect(),
                None => catalog.snapshots(),
            };
            let _ = reply.send(snapshots);
        }
    }
    stats.transitions_applied += catalog.pump() as u64;
}

pub fn spawn(deps: FeedDeps, config: FeedConfig) -> tokio::task::JoinHandle<()> {
    let FeedDeps {
        mut catalog,
        mut commands_rx,
        notify_tx,
        mut shutdown_rx,
    } = deps;
    let stats_log_interval = Duration::from_secs(config.stats_log_interval_secs);

    tokio::spawn(async move {
        let mut stats_log_tick = interval(stats_log_interval);
        stats_log_tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        let mut stats = FeedStats::default();

        loop {
            tokio::select! {
                command = commands_rx.recv() => {
                    match command {
                        Some(command) => handle_command(&mut catalog, &notify_tx, &mut stats, command),
                        None => break,
                    }
                }
                _ = &mut shutdown_rx => {
                    tracing::debug!("Feed worker shutting down");
                    break;
                }
                _ = stats_log_tick.tick() => {
                    tracing::info!(
                        resources = catalog.len(),
                        members = catalog.members().len(),
                        ws_receivers = notify_tx.receiver_count(),
                        events_applied = stats.events_applied,
                        events_ignored = stats.events_ignored,
                        events_unrouted = stats.events_unrouted,
                        events_malformed = stats.events_malformed,
                        transitions_applied = stats.transitions_applied,
                        "feed stats"
                    );
                }
            }
        }
        catalog.teardown();
    })
}
