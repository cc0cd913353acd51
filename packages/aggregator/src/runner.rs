//! Drives an [`Aggregator`] from a tokio task.
//!
//! One task owns the aggregator and multiplexes four event sources with
//! `tokio::select!`: the one-second heartbeat, commands from the handle,
//! fetch results, and the pending retry deadline. Fetches run in their own
//! spawned tasks so a slow proxy never delays the heartbeat; results come
//! back tagged with their cycle generation and stale ones are dropped by
//! [`Aggregator::complete_cycle`]. Every change is published on a
//! `watch` channel.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use vicalert_feed::{FeedError, IncidentSource};
use vicalert_incident_models::Incident;

use crate::view::IncidentView;
use crate::{Aggregator, CycleOutcome};

/// Heartbeat period for the countdown and pin sweep.
pub const TICK: Duration = Duration::from_secs(1);

/// Capacity of the command channel.
const COMMAND_BUFFER: usize = 16;

type FetchResult = (u64, Result<Vec<Incident>, FeedError>);

/// Requests accepted by a running aggregator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Manual refresh.
    Refresh,
    /// Stop the task.
    Shutdown,
}

/// Handle to an aggregator task started with [`spawn`].
#[derive(Debug)]
pub struct AggregatorHandle {
    commands: mpsc::Sender<Command>,
    views: watch::Receiver<IncidentView>,
    task: JoinHandle<Aggregator>,
}

impl AggregatorHandle {
    /// A receiver for published views.
    #[must_use]
    pub fn views(&self) -> watch::Receiver<IncidentView> {
        self.views.clone()
    }

    /// A sender for commands, for use from other tasks.
    #[must_use]
    pub fn commands(&self) -> mpsc::Sender<Command> {
        self.commands.clone()
    }

    /// Requests a manual refresh.
    pub async fn refresh(&self) {
        if self.commands.send(Command::Refresh).await.is_err() {
            log::debug!("Aggregator task has stopped, refresh ignored");
        }
    }

    /// Stops the task and returns the aggregator.
    ///
    /// # Errors
    ///
    /// Returns the [`tokio::task::JoinError`] if the task panicked.
    pub async fn shutdown(self) -> Result<Aggregator, tokio::task::JoinError> {
        if self.commands.send(Command::Shutdown).await.is_err() {
            log::debug!("Aggregator task has already stopped");
        }
        self.task.await
    }
}

/// Starts `aggregator` on a new task, fetching from `source`.
#[must_use]
pub fn spawn(aggregator: Aggregator, source: Arc<dyn IncidentSource>) -> AggregatorHandle {
    let (commands_tx, commands_rx) = mpsc::channel(COMMAND_BUFFER);
    let (views_tx, views_rx) = watch::channel(aggregator.view());
    let task = tokio::spawn(run(aggregator, source, commands_rx, views_tx));

    AggregatorHandle {
        commands: commands_tx,
        views: views_rx,
        task,
    }
}

/// Runs until [`Command::Shutdown`] or until every command sender is
/// dropped. Returns the aggregator.
pub async fn run(
    mut aggregator: Aggregator,
    source: Arc<dyn IncidentSource>,
    mut commands: mpsc::Receiver<Command>,
    views: watch::Sender<IncidentView>,
) -> Aggregator {
    let (results_tx, mut results_rx) = mpsc::unbounded_channel::<FetchResult>();

    let mut heartbeat = tokio::time::interval_at(Instant::now() + TICK, TICK);
    heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let mut retry_at: Option<Instant> = None;

    if let Some(generation) = aggregator.begin_cycle() {
        spawn_fetch(&source, &results_tx, generation);
    }
    publish(&views, &aggregator);

    loop {
        tokio::select! {
            _ = heartbeat.tick() => {
                if let Some(generation) = aggregator.tick() {
                    retry_at = None;
                    spawn_fetch(&source, &results_tx, generation);
                }
            }
            Some((generation, result)) = results_rx.recv() => {
                match aggregator.complete_cycle(generation, result) {
                    CycleOutcome::RetryScheduled { delay, .. } => {
                        retry_at = Some(Instant::now() + delay);
                    }
                    CycleOutcome::Updated { new_incidents, pinned } => {
                        log::debug!("Cycle {generation}: {new_incidents} new, {pinned} pinned");
                    }
                    CycleOutcome::Superseded | CycleOutcome::Failed => {}
                }
            }
            () = tokio::time::sleep_until(retry_at.unwrap_or_else(Instant::now)), if retry_at.is_some() => {
                retry_at = None;
                if let Some(generation) = aggregator.retry() {
                    spawn_fetch(&source, &results_tx, generation);
                }
            }
            command = commands.recv() => match command {
                Some(Command::Refresh) => {
                    retry_at = None;
                    let generation = aggregator.refresh();
                    spawn_fetch(&source, &results_tx, generation);
                }
                Some(Command::Shutdown) | None => {
                    log::debug!("Aggregator shutting down");
                    break;
                }
            },
        }

        publish(&views, &aggregator);
    }

    aggregator
}

fn spawn_fetch(
    source: &Arc<dyn IncidentSource>,
    results: &mpsc::UnboundedSender<FetchResult>,
    generation: u64,
) {
    let source = Arc::clone(source);
    let results = results.clone();
    tokio::spawn(async move {
        let result = source.fetch_incidents().await;
        if results.send((generation, result)).is_err() {
            log::debug!("Dropping result of cycle {generation}, aggregator stopped");
        }
    });
}

fn publish(views: &watch::Sender<IncidentView>, aggregator: &Aggregator) {
    let next = aggregator.view();
    views.send_if_modified(|current| {
        if *current == next {
            false
        } else {
            *current = next;
            true
        }
    });
}
