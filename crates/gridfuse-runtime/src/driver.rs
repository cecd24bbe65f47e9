//! [`PipelineDriver`] – runs a [`CostmapPipeline`] behind one ordered queue.
//!
//! Every input event enters a single bounded `mpsc` queue, either directly
//! through [`DriverInput::submit`] or from the [`EventBus`] merged input
//! stream when the driver is [attached][PipelineDriver::attach] to a bus.
//! A dedicated blocking worker drains that queue into the pipeline, so
//! events are handled strictly one at a time in arrival order and a slow
//! transform lookup never stalls the async runtime.  Every snapshot goes to
//! the configured [`GridPublisher`].
//!
//! Direct submission applies backpressure and never loses events.  The bus
//! path is a broadcast subscription: events that overflow the bus capacity
//! before the driver reads them are counted in [`DriverStats::dropped`].

use gridfuse_middleware::{EventBus, InputReceiver, Topic};
use gridfuse_types::{Event, EventPayload, GridError, GridSnapshot};
use tokio::sync::broadcast::error::{RecvError, TryRecvError};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::pipeline::{CostmapPipeline, GridPublisher};

const DEFAULT_QUEUE_CAPACITY: usize = 64;

// ─────────────────────────────────────────────────────────────────────────────
// BusPublisher
// ─────────────────────────────────────────────────────────────────────────────

/// Publishes snapshots on [`Topic::Costmap`].
#[derive(Clone)]
pub struct BusPublisher {
    bus: EventBus,
}

impl BusPublisher {
    pub fn new(bus: EventBus) -> Self {
        Self { bus }
    }
}

impl GridPublisher for BusPublisher {
    fn publish(&mut self, snapshot: &GridSnapshot) -> Result<(), GridError> {
        let event = Event::new(
            "gridfuse-runtime::pipeline",
            EventPayload::Costmap(snapshot.clone()),
        );
        // Best-effort publish – no subscribers is not an error.
        if self.bus.publish_to(Topic::Costmap, event).is_err() {
            debug!(snapshot = %snapshot.id, "no costmap subscribers");
        }
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// PipelineDriver
// ─────────────────────────────────────────────────────────────────────────────

/// Counters returned when the driver shuts down.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DriverStats {
    /// Events taken off the queue.
    pub handled: usize,
    /// Snapshots handed to the publisher.
    pub emitted: usize,
    /// Events whose parsing, handling or publishing failed.
    pub failed: usize,
    /// Bus events overwritten before the driver could read them.
    pub dropped: usize,
}

/// Owns the pipeline until [`spawn`][Self::spawn] moves it onto the worker.
pub struct PipelineDriver {
    pipeline: CostmapPipeline,
    publisher: Box<dyn GridPublisher>,
    queue_capacity: usize,
}

impl PipelineDriver {
    pub fn new(pipeline: CostmapPipeline, publisher: Box<dyn GridPublisher>) -> Self {
        Self {
            pipeline,
            publisher,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
        }
    }

    /// Bound on events waiting for the worker; submitters wait once it is
    /// full.
    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity.max(1);
        self
    }

    /// Start the worker.  Events reach it only through
    /// [`DriverHandle::submit`] or [`DriverHandle::input`].
    ///
    /// Must be called from within a Tokio runtime.
    pub fn spawn(self) -> DriverHandle {
        let (tx, rx) = mpsc::channel(self.queue_capacity);
        let worker = self.start_worker(rx);
        info!("pipeline driver started");
        DriverHandle {
            input: DriverInput { tx },
            forwarder: None,
            worker,
        }
    }

    /// Start the worker and feed it from the merged input stream of `bus`.
    ///
    /// The subscription exists when this returns, so events published
    /// afterwards are never missed unless the bus overflows.  Direct
    /// submission stays available alongside the bus.
    pub fn attach(self, bus: &EventBus) -> DriverHandle {
        let inputs = bus.subscribe_inputs();
        let mut handle = self.spawn();
        let (stop_tx, stop_rx) = oneshot::channel();
        let task = tokio::spawn(forward(inputs, handle.input.tx.clone(), stop_rx));
        handle.forwarder = Some(Forwarder {
            stop: stop_tx,
            task,
        });
        handle
    }

    fn start_worker(self, rx: mpsc::Receiver<Event>) -> JoinHandle<DriverStats> {
        let Self {
            mut pipeline,
            mut publisher,
            ..
        } = self;
        tokio::task::spawn_blocking(move || {
            let mut rx = rx;
            let mut stats = DriverStats::default();
            while let Some(event) = rx.blocking_recv() {
                stats.handled += 1;
                match pipeline.handle(&event.payload) {
                    Ok(Some(snapshot)) => match publisher.publish(&snapshot) {
                        Ok(()) => stats.emitted += 1,
                        Err(e) => {
                            stats.failed += 1;
                            warn!(event = %event.id, error = %e, "snapshot publish failed");
                        }
                    },
                    Ok(None) => {}
                    Err(e) => {
                        stats.failed += 1;
                        warn!(event = %event.id, source = %event.source, error = %e, "event handling failed");
                    }
                }
            }
            info!(?stats, "pipeline worker stopped");
            stats
        })
    }
}

/// Copy the merged input stream into the queue until stopped, then move
/// whatever was already published before returning.  Returns the number of
/// events lost to broadcast lag.
async fn forward(
    mut inputs: InputReceiver,
    tx: mpsc::Sender<Event>,
    mut stop: oneshot::Receiver<()>,
) -> usize {
    let mut dropped = 0;
    loop {
        tokio::select! {
            biased;
            received = inputs.recv() => {
                match received {
                    Ok(event) => {
                        if tx.send(event).await.is_err() {
                            return dropped;
                        }
                    }
                    Err(RecvError::Lagged(n)) => {
                        warn!(dropped = n, "pipeline input lagged");
                        dropped += n as usize;
                    }
                    Err(RecvError::Closed) => return dropped,
                }
            }
            _ = &mut stop => break,
        }
    }

    loop {
        match inputs.try_recv() {
            Ok(event) => {
                if tx.send(event).await.is_err() {
                    break;
                }
            }
            Err(TryRecvError::Lagged(n)) => {
                warn!(dropped = n, "pipeline input lagged");
                dropped += n as usize;
            }
            Err(TryRecvError::Empty | TryRecvError::Closed) => break,
        }
    }
    dropped
}

struct Forwarder {
    stop: oneshot::Sender<()>,
    task: JoinHandle<usize>,
}

/// Cloneable entry point into a running driver's queue.
#[derive(Clone)]
pub struct DriverInput {
    tx: mpsc::Sender<Event>,
}

impl DriverInput {
    /// Enqueue `event`, waiting while the queue is full.
    ///
    /// # Errors
    ///
    /// [`GridError::Channel`] once the worker has stopped.
    pub async fn submit(&self, event: Event) -> Result<(), GridError> {
        self.tx
            .send(event)
            .await
            .map_err(|_| GridError::Channel("pipeline worker has stopped".to_string()))
    }
}

/// Handle to a running [`PipelineDriver`].
pub struct DriverHandle {
    input: DriverInput,
    forwarder: Option<Forwarder>,
    worker: JoinHandle<DriverStats>,
}

impl DriverHandle {
    /// A submitter that can be moved into other tasks.  Drop every clone
    /// before [`shutdown`][Self::shutdown], which waits for them.
    pub fn input(&self) -> DriverInput {
        self.input.clone()
    }

    /// Enqueue `event` behind everything submitted or published before it.
    pub async fn submit(&self, event: Event) -> Result<(), GridError> {
        self.input.submit(event).await
    }

    /// Stop taking new bus events, handle everything already submitted or
    /// published, and return the worker's counters.
    ///
    /// # Errors
    ///
    /// [`GridError::Channel`] if the forwarder or the worker panicked.
    pub async fn shutdown(self) -> Result<DriverStats, GridError> {
        let Self {
            input,
            forwarder,
            worker,
        } = self;

        let mut dropped = 0;
        if let Some(forwarder) = forwarder {
            // The forwarder may already have exited on a closed bus.
            let _ = forwarder.stop.send(());
            dropped = forwarder
                .task
                .await
                .map_err(|e| GridError::Channel(format!("pipeline forwarder failed: {e}")))?;
        }
        drop(input);

        let mut stats = worker
            .await
            .map_err(|e| GridError::Channel(format!("pipeline worker failed: {e}")))?;
        stats.dropped = dropped;
        Ok(stats)
    }
}
