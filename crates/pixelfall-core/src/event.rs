//! Topic-based event bus.
//!
//! The bus is synchronous and single-threaded. Publishing dispatches to
//! every live subscriber of the event's topic, in priority order (highest
//! first, insertion order breaking ties). Handlers may not touch the bus
//! directly while it is dispatching; instead they receive a [`BusOps`]
//! sink whose subscribe/unsubscribe/publish requests are collected and
//! applied after the current dispatch completes. Events published from
//! inside a handler are therefore delivered breadth-first, never
//! recursively.
//!
//! A handler returning an error is logged and skipped; the remaining
//! subscribers still run. `once` subscriptions are removed after their
//! first invocation.

use crate::bignum::BigNum;
use crate::id::{AchievementId, ProducerId, ResourceId, SubscriptionId, UpgradeId};
use slotmap::SlotMap;
use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};
use std::rc::{Rc, Weak};
use thiserror::Error;

// ---------------------------------------------------------------------------
// Events and topics
// ---------------------------------------------------------------------------

/// Why a resource amount moved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeSource {
    Production,
    Click,
    Spend,
    Grant,
    Offline,
}

/// Why the loop paused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PauseReason {
    Manual,
    Hidden,
}

/// Everything the engine announces on the bus.
#[derive(Debug, Clone, PartialEq)]
pub enum GameEvent {
    ResourceChanged {
        resource: ResourceId,
        previous: BigNum,
        amount: BigNum,
        /// Magnitude of the change; `source` tells the direction
        /// (`Spend` debits, everything else credits).
        delta: BigNum,
        source: ChangeSource,
    },
    ProducerPurchased {
        producer: ProducerId,
        level: u32,
        cost: BigNum,
    },
    UpgradePurchased {
        upgrade: UpgradeId,
        level: u32,
        cost: BigNum,
    },
    PhaseUnlocked {
        phase: u32,
        name: String,
    },
    PhaseEntered {
        previous: u32,
        phase: u32,
        first_time: bool,
    },
    AchievementUnlocked {
        achievement: AchievementId,
        name: String,
        tier: u32,
    },
    GamePaused {
        reason: PauseReason,
        at_ms: u64,
    },
    GameResumed {
        pause_ms: u64,
        at_ms: u64,
    },
    RebirthCompleted {
        rebirth_count: u32,
    },
    SaveCompleted {
        automatic: bool,
    },
}

/// Subscription key: the topic of an event is its variant, payload-free.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    ResourceChanged,
    ProducerPurchased,
    UpgradePurchased,
    PhaseUnlocked,
    PhaseEntered,
    AchievementUnlocked,
    GamePaused,
    GameResumed,
    RebirthCompleted,
    SaveCompleted,
}

impl GameEvent {
    pub fn topic(&self) -> Topic {
        match self {
            GameEvent::ResourceChanged { .. } => Topic::ResourceChanged,
            GameEvent::ProducerPurchased { .. } => Topic::ProducerPurchased,
            GameEvent::UpgradePurchased { .. } => Topic::UpgradePurchased,
            GameEvent::PhaseUnlocked { .. } => Topic::PhaseUnlocked,
            GameEvent::PhaseEntered { .. } => Topic::PhaseEntered,
            GameEvent::AchievementUnlocked { .. } => Topic::AchievementUnlocked,
            GameEvent::GamePaused { .. } => Topic::GamePaused,
            GameEvent::GameResumed { .. } => Topic::GameResumed,
            GameEvent::RebirthCompleted { .. } => Topic::RebirthCompleted,
            GameEvent::SaveCompleted { .. } => Topic::SaveCompleted,
        }
    }
}

/// Error a handler can surface; dispatch logs it and carries on.
#[derive(Debug, Error)]
#[error("event handler failed: {0}")]
pub struct HandlerError(pub String);

pub type Handler = Box<dyn FnMut(&GameEvent, &mut BusOps) -> Result<(), HandlerError>>;

// ---------------------------------------------------------------------------
// Deferred operations
// ---------------------------------------------------------------------------

/// Mutation sink handed to handlers during dispatch. Requests are applied
/// once the dispatch that spawned them finishes.
#[derive(Default)]
pub struct BusOps {
    deferred: Vec<DeferredOp>,
}

enum DeferredOp {
    Subscribe {
        topic: Topic,
        priority: i32,
        once: bool,
        handler: Handler,
    },
    Unsubscribe(SubscriptionId),
    Publish(GameEvent),
}

impl BusOps {
    pub fn subscribe(&mut self, topic: Topic, priority: i32, handler: Handler) {
        self.deferred.push(DeferredOp::Subscribe {
            topic,
            priority,
            once: false,
            handler,
        });
    }

    pub fn subscribe_once(&mut self, topic: Topic, priority: i32, handler: Handler) {
        self.deferred.push(DeferredOp::Subscribe {
            topic,
            priority,
            once: true,
            handler,
        });
    }

    pub fn unsubscribe(&mut self, id: SubscriptionId) {
        self.deferred.push(DeferredOp::Unsubscribe(id));
    }

    pub fn publish(&mut self, event: GameEvent) {
        self.deferred.push(DeferredOp::Publish(event));
    }
}

// ---------------------------------------------------------------------------
// Waiters
// ---------------------------------------------------------------------------

/// Poll outcome for an [`EventWaiter`].
#[derive(Debug, Clone, PartialEq)]
pub enum WaitPoll {
    Pending,
    Ready(GameEvent),
}

#[derive(Debug, Error)]
#[error("timed out waiting for {topic:?}")]
pub struct WaitTimeout {
    pub topic: Topic,
}

struct WaitState {
    resolved: Option<GameEvent>,
    /// Absolute deadline in milliseconds; `None` waits forever.
    deadline_ms: Option<u64>,
}

/// Handle returned by [`EventBus::wait_for`]. Poll it from the host loop;
/// the first matching event resolves it. Dropping the handle cancels the
/// wait.
pub struct EventWaiter {
    topic: Topic,
    state: Rc<RefCell<WaitState>>,
}

impl EventWaiter {
    /// Check the waiter against the current clock. Once `Ready` or timed
    /// out, the waiter is spent.
    pub fn poll(&self, now_ms: u64) -> Result<WaitPoll, WaitTimeout> {
        let mut state = self.state.borrow_mut();
        if let Some(event) = state.resolved.take() {
            return Ok(WaitPoll::Ready(event));
        }
        if let Some(deadline) = state.deadline_ms {
            if now_ms >= deadline {
                return Err(WaitTimeout { topic: self.topic });
            }
        }
        Ok(WaitPoll::Pending)
    }
}

// ---------------------------------------------------------------------------
// Bus
// ---------------------------------------------------------------------------

struct Subscription {
    topic: Topic,
    priority: i32,
    once: bool,
    order: u64,
    handler: Handler,
}

/// Synchronous topic-keyed event bus.
#[derive(Default)]
pub struct EventBus {
    subscriptions: SlotMap<SubscriptionId, Subscription>,
    by_topic: HashMap<Topic, Vec<SubscriptionId>>,
    waiters: HashMap<Topic, Vec<Weak<RefCell<WaitState>>>>,
    next_order: u64,
    /// Emitted-but-undelivered events; drained breadth-first by `publish`.
    queue: VecDeque<GameEvent>,
    dispatching: bool,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a persistent handler. Higher priority runs earlier.
    pub fn subscribe(&mut self, topic: Topic, priority: i32, handler: Handler) -> SubscriptionId {
        self.insert(topic, priority, false, handler)
    }

    /// Register a handler removed after its first invocation.
    pub fn subscribe_once(
        &mut self,
        topic: Topic,
        priority: i32,
        handler: Handler,
    ) -> SubscriptionId {
        self.insert(topic, priority, true, handler)
    }

    fn insert(&mut self, topic: Topic, priority: i32, once: bool, handler: Handler) -> SubscriptionId {
        let order = self.next_order;
        self.next_order += 1;
        let id = self.subscriptions.insert(Subscription {
            topic,
            priority,
            once,
            order,
            handler,
        });
        self.by_topic.entry(topic).or_default().push(id);
        id
    }

    /// Remove a subscription. Unknown or stale ids are ignored.
    pub fn unsubscribe(&mut self, id: SubscriptionId) {
        if let Some(sub) = self.subscriptions.remove(id) {
            if let Some(ids) = self.by_topic.get_mut(&sub.topic) {
                ids.retain(|&other| other != id);
                if ids.is_empty() {
                    self.by_topic.remove(&sub.topic);
                }
            }
        }
    }

    pub fn subscriber_count(&self, topic: Topic) -> usize {
        self.by_topic.get(&topic).map_or(0, Vec::len)
    }

    /// Remove every subscription for `topic`, or everything when `None`.
    pub fn unsubscribe_all(&mut self, topic: Option<Topic>) {
        match topic {
            Some(topic) => {
                if let Some(ids) = self.by_topic.remove(&topic) {
                    for id in ids {
                        self.subscriptions.remove(id);
                    }
                }
            }
            None => {
                self.subscriptions.clear();
                self.by_topic.clear();
            }
        }
    }

    /// Obtain a waiter that resolves on the next event of `topic`.
    /// `timeout_ms` of 0 waits forever; otherwise the deadline is
    /// `now_ms + timeout_ms`.
    pub fn wait_for(&mut self, topic: Topic, timeout_ms: u64, now_ms: u64) -> EventWaiter {
        let state = Rc::new(RefCell::new(WaitState {
            resolved: None,
            deadline_ms: (timeout_ms > 0).then(|| now_ms + timeout_ms),
        }));
        self.waiters
            .entry(topic)
            .or_default()
            .push(Rc::downgrade(&state));
        EventWaiter { topic, state }
    }

    /// Publish an event, dispatching it and everything handlers publish in
    /// turn. Returns the number of handler invocations.
    pub fn publish(&mut self, event: GameEvent) -> usize {
        self.queue.push_back(event);
        if self.dispatching {
            // Already inside publish further up the stack; that frame
            // drains the queue.
            return 0;
        }
        self.dispatching = true;
        let mut invoked = 0;
        while let Some(next) = self.queue.pop_front() {
            invoked += self.dispatch(next);
        }
        self.dispatching = false;
        invoked
    }

    fn dispatch(&mut self, event: GameEvent) -> usize {
        let topic = event.topic();
        self.resolve_waiters(topic, &event);

        let Some(ids) = self.by_topic.get(&topic) else {
            return 0;
        };
        // Snapshot sorted by priority, then registration order. Handlers
        // registered during this dispatch only see later events.
        let mut snapshot: Vec<(i32, u64, SubscriptionId)> = ids
            .iter()
            .filter_map(|&id| {
                self.subscriptions
                    .get(id)
                    .map(|sub| (sub.priority, sub.order, id))
            })
            .collect();
        snapshot.sort_by(|a, b| b.0.cmp(&a.0).then(a.1.cmp(&b.1)));

        let mut ops = BusOps::default();
        let mut invoked = 0;
        let mut spent: Vec<SubscriptionId> = Vec::new();
        for (_, _, id) in snapshot {
            // May have been removed by an earlier deferred op batch or by
            // direct unsubscribe between events.
            let Some(sub) = self.subscriptions.get_mut(id) else {
                continue;
            };
            invoked += 1;
            let once = sub.once;
            if let Err(err) = (sub.handler)(&event, &mut ops) {
                log::warn!("handler for {topic:?} failed: {err}");
            }
            if once {
                spent.push(id);
            }
        }
        for id in spent {
            self.unsubscribe(id);
        }
        self.apply(ops);
        invoked
    }

    fn resolve_waiters(&mut self, topic: Topic, event: &GameEvent) {
        if let Some(waiters) = self.waiters.get_mut(&topic) {
            for weak in waiters.drain(..) {
                if let Some(state) = weak.upgrade() {
                    let mut state = state.borrow_mut();
                    if state.resolved.is_none() {
                        state.resolved = Some(event.clone());
                    }
                }
            }
            self.waiters.remove(&topic);
        }
    }

    fn apply(&mut self, ops: BusOps) {
        for op in ops.deferred {
            match op {
                DeferredOp::Subscribe {
                    topic,
                    priority,
                    once,
                    handler,
                } => {
                    self.insert(topic, priority, once, handler);
                }
                DeferredOp::Unsubscribe(id) => self.unsubscribe(id),
                DeferredOp::Publish(event) => self.queue.push_back(event),
            }
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================
