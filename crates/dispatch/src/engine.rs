//! The prefetch/dispatch control loop.
//!
//! [`Dispatcher::start`] validates the configuration and spawns one
//! engine task that owns every piece of mutable state: the outstanding
//! counters, the request sequence, the unit arena, the idle timer, and
//! the RNG. Fetch replies and worker signals arrive through an event
//! channel, replenish triggers through a command channel, so every
//! state change is serialized on the engine task. Forwarder tasks are
//! the only other tasks involved and they hold no state beyond a
//! channel sender and a correlation token.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use siphon_core::capacity::CapacityPolicy;
use siphon_core::config::DispatcherConfig;
use siphon_core::error::ConfigError;
use siphon_core::rate::RateStat;
use siphon_remote::{
    BackendError, Coordinate, Dispatch, FetchEvent, FetchReply, FetchRequest, QueueBackend,
    QueueItem, WorkerService, WorkerSignal,
};

use crate::status::DispatcherStatus;
use crate::token::CorrelationToken;
use crate::unit::DispatchUnit;

/// Capacity of the command channel. A full queue is fine: a pending
/// replenish already covers any that would not fit.
const COMMAND_CHANNEL_CAPACITY: usize = 16;

/// Capacity of the event channel feeding the engine task.
const EVENT_CHANNEL_CAPACITY: usize = 256;

// ---------------------------------------------------------------------------
// Dispatcher handle
// ---------------------------------------------------------------------------

/// Handle to a running dispatcher instance.
///
/// The engine itself runs on a spawned task until
/// [`shutdown`](Self::shutdown) is called; the handle only carries the
/// channels needed to observe and nudge it.
#[derive(Debug)]
pub struct Dispatcher {
    commands: mpsc::Sender<Command>,
    status: watch::Receiver<DispatcherStatus>,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl Dispatcher {
    /// Validate the configuration and start the engine task.
    ///
    /// Configuration errors are fatal here; nothing is spawned and no
    /// request is issued when an error is returned.
    pub fn start(
        config: DispatcherConfig,
        backend: Arc<dyn QueueBackend>,
        worker: Arc<dyn WorkerService>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;

        let policy = CapacityPolicy::from_queue_limit(
            config.queue_limit,
            config.min_fetch_slack,
            config.batch_width,
        );
        let (commands_tx, commands_rx) = mpsc::channel(COMMAND_CHANNEL_CAPACITY);
        let (events_tx, events_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let cancel = CancellationToken::new();
        let started_at = Utc::now();
        let (status_tx, status_rx) = watch::channel(DispatcherStatus {
            queue_name: config.queue_name.clone(),
            outstanding: 0,
            fetches_in_flight: 0,
            units_in_flight: 0,
            max_outstanding: policy.max_outstanding(),
            pop_rate: 0.0,
            push_rate: 0.0,
            items_delivered: 0,
            items_dispatched: 0,
            items_dropped: 0,
            worker_errors: 0,
            started_at,
        });

        let engine = Engine {
            config,
            policy,
            backend,
            worker,
            fetches_in_flight: 0,
            units_in_flight: 0,
            request_seq: 0,
            unit_seq: 0,
            units: HashMap::new(),
            rng: StdRng::from_os_rng(),
            pop_rate: RateStat::new(),
            push_rate: RateStat::new(),
            items_delivered: 0,
            items_dispatched: 0,
            items_dropped: 0,
            worker_errors: 0,
            commands_tx: commands_tx.clone(),
            events_tx,
            status_tx,
            started_at,
        };
        let task = tokio::spawn(engine.run(commands_rx, events_rx, cancel.clone()));

        Ok(Self {
            commands: commands_tx,
            status: status_rx,
            cancel,
            task,
        })
    }

    /// Latest published status snapshot.
    pub fn status(&self) -> DispatcherStatus {
        self.status.borrow().clone()
    }

    /// Ask the engine to evaluate capacity and fetch now, without
    /// waiting for the next idle tick.
    pub async fn trigger_replenish(&self) {
        let _ = self.commands.send(Command::Replenish).await;
    }

    /// Stop the idle timer and the engine task. In-flight fetch
    /// requests and dispatch units are not cancelled; their forwarders
    /// notice the dropped event channel and exit on their own.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        let _ = self.task.await;
    }
}

// ---------------------------------------------------------------------------
// Engine internals
// ---------------------------------------------------------------------------

/// External nudge for the engine task.
enum Command {
    Replenish,
}

/// Everything the engine task can observe, serialized on one channel.
enum EngineEvent {
    FetchItem {
        token: Arc<CorrelationToken>,
        reply: FetchReply,
    },
    FetchDone {
        token: Arc<CorrelationToken>,
        error: Option<BackendError>,
    },
    UnitProgress {
        unit_id: u64,
        data: Vec<u8>,
    },
    UnitError {
        unit_id: u64,
        code: i32,
        message: String,
    },
    UnitClosed {
        unit_id: u64,
    },
}

struct Engine {
    config: DispatcherConfig,
    policy: CapacityPolicy,
    backend: Arc<dyn QueueBackend>,
    worker: Arc<dyn WorkerService>,

    /// Fetch requests issued but not yet completed. Together with
    /// `units_in_flight` this forms the outstanding length; the two
    /// are kept separate so the accounting stays auditable, but every
    /// capacity decision uses the sum.
    fetches_in_flight: u64,
    /// Dispatch units not yet closed.
    units_in_flight: u64,

    /// Mints source keys; never reused within the process lifetime.
    request_seq: u64,
    /// Mints unit ids for the arena.
    unit_seq: u64,
    units: HashMap<u64, DispatchUnit>,

    /// Routing-nonce RNG, seeded once at construction.
    rng: StdRng,

    pop_rate: RateStat,
    push_rate: RateStat,
    items_delivered: u64,
    items_dispatched: u64,
    items_dropped: u64,
    worker_errors: u64,

    /// Sender side of the engine's own command channel; success closes
    /// post replenish triggers here instead of recursing.
    commands_tx: mpsc::Sender<Command>,
    events_tx: mpsc::Sender<EngineEvent>,
    status_tx: watch::Sender<DispatcherStatus>,
    started_at: DateTime<Utc>,
}

impl Engine {
    async fn run(
        mut self,
        mut commands: mpsc::Receiver<Command>,
        mut events: mpsc::Receiver<EngineEvent>,
        cancel: CancellationToken,
    ) {
        let period = self.config.idle_interval;
        let mut idle = interval_at(Instant::now() + period, period);
        idle.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tracing::info!(
            queue = %self.config.queue_name,
            max_outstanding = self.policy.max_outstanding(),
            batch_width = self.config.batch_width,
            "dispatcher started",
        );

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = idle.tick() => {
                    tracing::debug!(
                        queue = %self.config.queue_name,
                        outstanding = self.outstanding(),
                        max = self.policy.max_outstanding(),
                        "idle timer fired",
                    );
                    self.replenish().await;
                }
                Some(command) = commands.recv() => match command {
                    Command::Replenish => self.replenish().await,
                },
                Some(event) = events.recv() => self.handle_event(&mut idle, event).await,
            }
            self.publish_status();
        }

        tracing::info!(queue = %self.config.queue_name, "dispatcher stopped");
    }

    /// Outstanding length: the single capacity signal, deliberately
    /// mixing in-flight fetch requests and in-flight dispatch units
    /// into one budget.
    fn outstanding(&self) -> u64 {
        self.fetches_in_flight + self.units_in_flight
    }

    // -- fetch path ---------------------------------------------------------

    /// Issue a batch of fetch requests if enough of the budget is
    /// free. A no-op under the slack threshold, never an error.
    async fn replenish(&mut self) {
        let outstanding = self.outstanding();
        if !self.policy.should_fetch(outstanding) {
            tracing::debug!(
                queue = %self.config.queue_name,
                outstanding,
                max = self.policy.max_outstanding(),
                "replenish skipped, not enough free capacity",
            );
            return;
        }

        let plan = self.policy.batch_plan();
        let event = self.config.pop_event_address();
        let groups = self.config.effective_groups().to_vec();

        for _ in 0..plan.width {
            let source_key = self.request_seq;
            self.request_seq += 1;

            // The nonce only spreads requests across backend shards;
            // item selection does not depend on it.
            let nonce: u64 = self.rng.random();
            let coordinate = Coordinate::derive(&self.config.queue_name, source_key, nonce);
            let token = Arc::new(CorrelationToken::new(
                coordinate,
                source_key,
                plan.items_per_request,
            ));

            // The request is in flight from this point on; the
            // matching decrement happens in on_fetch_done, error or
            // not.
            self.fetches_in_flight += 1;

            let stream = self
                .backend
                .fetch(FetchRequest {
                    coordinate,
                    source_key,
                    event: event.clone(),
                    count: plan.items_per_request,
                    groups: groups.clone(),
                })
                .await;
            self.spawn_fetch_forwarder(token, stream);

            tracing::info!(
                queue = %self.config.queue_name,
                coordinate = %coordinate,
                src_key = source_key,
                requested = plan.items_per_request,
                outstanding = self.outstanding(),
                max = self.policy.max_outstanding(),
                "pop request issued",
            );
        }
    }

    /// Forward one request's reply stream onto the engine's event
    /// channel. The token rides along so replies route back to their
    /// originating request; it is released once the stream ends.
    fn spawn_fetch_forwarder(
        &self,
        token: Arc<CorrelationToken>,
        mut stream: mpsc::Receiver<FetchEvent>,
    ) {
        let events = self.events_tx.clone();
        tokio::spawn(async move {
            while let Some(event) = stream.recv().await {
                match event {
                    FetchEvent::Item(reply) => {
                        let forwarded = events.send(EngineEvent::FetchItem {
                            token: token.clone(),
                            reply,
                        });
                        if forwarded.await.is_err() {
                            // Engine already torn down.
                            return;
                        }
                    }
                    FetchEvent::Done(error) => {
                        let _ = events.send(EngineEvent::FetchDone { token, error }).await;
                        return;
                    }
                }
            }
            // Stream dropped without an explicit completion; the
            // request still has to release its outstanding slot.
            let _ = events
                .send(EngineEvent::FetchDone { token, error: None })
                .await;
        });
    }

    async fn handle_event(&mut self, idle: &mut Interval, event: EngineEvent) {
        match event {
            EngineEvent::FetchItem { token, reply } => {
                self.on_fetch_item(idle, &token, reply).await;
            }
            EngineEvent::FetchDone { token, error } => self.on_fetch_done(&token, error),
            EngineEvent::UnitProgress { unit_id, data } => self.on_unit_progress(unit_id, &data),
            EngineEvent::UnitError {
                unit_id,
                code,
                message,
            } => self.on_unit_error(unit_id, code, &message),
            EngineEvent::UnitClosed { unit_id } => self.on_unit_closed(unit_id),
        }
    }

    /// One delivered item. May fire zero or more times per request; a
    /// request against an empty queue simply completes without any.
    async fn on_fetch_item(
        &mut self,
        idle: &mut Interval,
        token: &CorrelationToken,
        mut reply: FetchReply,
    ) {
        if let Some(error) = reply.error.take() {
            // No compensating decrement: the request's completion will
            // still fire and release the slot.
            tracing::error!(
                queue = %self.config.queue_name,
                coordinate = %token.coordinate,
                src_key = token.source_key,
                code = error.code,
                error = %error.message,
                "fetch reply error",
            );
            return;
        }

        // Only real replies postpone the idle check; errors leave the
        // timer running toward its next tick.
        idle.reset();

        // The backend replaces the request's source key with an
        // internal job id when generating the reply. Restore the
        // original key, or the worker's ack will not route back to the
        // queue instance that produced this item.
        let backend_key = reply.source_key;
        reply.source_key = token.source_key;

        if reply.payload.is_empty() {
            // Queue had nothing for this slot; emptiness is observed
            // here, not through a sentinel.
            tracing::info!(
                queue = %self.config.queue_name,
                coordinate = %token.coordinate,
                src_key = token.source_key,
                "empty reply",
            );
            return;
        }

        self.items_delivered += 1;
        self.pop_rate.update();

        tracing::info!(
            queue = %self.config.queue_name,
            coordinate = %token.coordinate,
            src_key = token.source_key,
            backend_key,
            size = reply.payload.len(),
            "item received",
        );

        self.submit(token, reply.payload).await;
    }

    /// Request completion; fires exactly once per issued request,
    /// error or not. Never triggers replenishment itself: only a
    /// dispatch unit's clean close does.
    fn on_fetch_done(&mut self, token: &CorrelationToken, error: Option<BackendError>) {
        self.fetches_in_flight = self.fetches_in_flight.saturating_sub(1);

        match error {
            Some(error) => tracing::error!(
                queue = %self.config.queue_name,
                coordinate = %token.coordinate,
                src_key = token.source_key,
                requested = token.count,
                error = %error,
                "fetch request completed with error",
            ),
            None => tracing::info!(
                queue = %self.config.queue_name,
                coordinate = %token.coordinate,
                src_key = token.source_key,
                requested = token.count,
                "fetch request completed",
            ),
        }
    }

    // -- dispatch path ------------------------------------------------------

    /// Hand one item to the worker service. On success a dispatch unit
    /// starts occupying an outstanding slot; on synchronous failure
    /// nothing is created and the item is dropped.
    async fn submit(&mut self, token: &CorrelationToken, payload: Vec<u8>) {
        let payload_len = payload.len();
        let dispatch = Dispatch {
            event: self.config.worker_event.clone(),
            timeout: self.config.timeout,
            deadline: self.config.deadline,
            item: QueueItem {
                coordinate: token.coordinate,
                source_key: token.source_key,
                payload,
            },
        };

        match self.worker.submit(dispatch).await {
            Ok(signals) => {
                let unit_id = self.unit_seq;
                self.unit_seq += 1;
                self.units
                    .insert(unit_id, DispatchUnit::new(token.source_key, payload_len));
                self.units_in_flight += 1;
                self.items_dispatched += 1;
                self.push_rate.update();
                self.spawn_unit_forwarder(unit_id, signals);

                tracing::info!(
                    queue = %self.config.queue_name,
                    unit_id,
                    src_key = token.source_key,
                    size = payload_len,
                    outstanding = self.outstanding(),
                    max = self.policy.max_outstanding(),
                    "item dispatched to worker",
                );
            }
            Err(error) => {
                // No unit was created, so there is nothing to account
                // for; the item is not returned to the queue.
                self.items_dropped += 1;
                tracing::error!(
                    queue = %self.config.queue_name,
                    src_key = token.source_key,
                    error = %error,
                    outstanding = self.outstanding(),
                    max = self.policy.max_outstanding(),
                    "worker submit failed, item dropped",
                );
            }
        }
    }

    /// Forward one dispatch's signal stream onto the engine's event
    /// channel, translating a dropped stream into a close so the unit
    /// cannot leak its outstanding slot.
    fn spawn_unit_forwarder(&self, unit_id: u64, mut signals: mpsc::Receiver<WorkerSignal>) {
        let events = self.events_tx.clone();
        tokio::spawn(async move {
            while let Some(signal) = signals.recv().await {
                let event = match signal {
                    WorkerSignal::Progress(data) => EngineEvent::UnitProgress { unit_id, data },
                    WorkerSignal::Error { code, message } => EngineEvent::UnitError {
                        unit_id,
                        code,
                        message,
                    },
                    WorkerSignal::Close => {
                        let _ = events.send(EngineEvent::UnitClosed { unit_id }).await;
                        return;
                    }
                };
                if events.send(event).await.is_err() {
                    return;
                }
            }
            let _ = events.send(EngineEvent::UnitClosed { unit_id }).await;
        });
    }

    /// Acknowledgement/progress data from the worker. Logged, not
    /// interpreted.
    fn on_unit_progress(&self, unit_id: u64, data: &[u8]) {
        tracing::info!(
            queue = %self.config.queue_name,
            unit_id,
            size = data.len(),
            data = %String::from_utf8_lossy(data),
            "progress from worker",
        );
    }

    fn on_unit_error(&mut self, unit_id: u64, code: i32, message: &str) {
        let Some(unit) = self.units.get_mut(&unit_id) else {
            tracing::warn!(
                queue = %self.config.queue_name,
                unit_id,
                "error for unknown dispatch unit",
            );
            return;
        };
        unit.record_error();
        self.worker_errors += 1;

        tracing::error!(
            queue = %self.config.queue_name,
            unit_id,
            src_key = unit.source_key(),
            attempts = unit.attempts(),
            code,
            error = message,
            "worker reported error",
        );
    }

    /// Terminal unit callback. Releases the unit's outstanding slot
    /// and, when the worker reported no errors, posts a replenish onto
    /// the engine's own command channel. Going through the channel
    /// instead of calling replenish directly keeps completion bursts
    /// from recursing into the fetch path.
    fn on_unit_closed(&mut self, unit_id: u64) {
        let Some(unit) = self.units.remove(&unit_id) else {
            tracing::warn!(
                queue = %self.config.queue_name,
                unit_id,
                "close for unknown dispatch unit",
            );
            return;
        };
        self.units_in_flight = self.units_in_flight.saturating_sub(1);

        let unit_src_key = unit.source_key();
        let attempts = unit.attempts();
        let size = unit.payload_len();
        let clean = unit.close();
        tracing::info!(
            queue = %self.config.queue_name,
            unit_id,
            src_key = unit_src_key,
            attempts,
            size,
            outstanding = self.outstanding(),
            max = self.policy.max_outstanding(),
            "dispatch closed",
        );

        if clean {
            // A full command queue already has a replenish pending.
            let _ = self.commands_tx.try_send(Command::Replenish);
        }
    }

    // -- observability ------------------------------------------------------

    fn publish_status(&self) {
        self.status_tx.send_replace(DispatcherStatus {
            queue_name: self.config.queue_name.clone(),
            outstanding: self.outstanding(),
            fetches_in_flight: self.fetches_in_flight,
            units_in_flight: self.units_in_flight,
            max_outstanding: self.policy.max_outstanding(),
            pop_rate: self.pop_rate.rate(),
            push_rate: self.push_rate.rate(),
            items_delivered: self.items_delivered,
            items_dispatched: self.items_dispatched,
            items_dropped: self.items_dropped,
            worker_errors: self.worker_errors,
            started_at: self.started_at,
        });
    }
}
