//! A deterministic runtime that resumes tasks in a fixed, event-ordered sequence.
//!
//! Every suspension on the clock is recorded as an event carrying a trigger time, a
//! priority, and a global insertion sequence. The executor repeatedly pops the earliest
//! event (by time, then priority, then sequence), advances virtual time to it, and polls
//! the task it resumes. Wakes that occur while polling (e.g. a [crate::Resource] being
//! handed to its next holder) are queued and polled, in order, before the next event is
//! popped, so no virtual time passes between them.
//!
//! Execution stops once no events remain or once the next event lies beyond the
//! configured timeout.
//!
//! # Panics
//!
//! If any task panics, the runtime will panic (and shutdown).
//!
//! # Example
//!
//! ```rust
//! use rpfsim_runtime::{deterministic, Clock, Runner, Spawner};
//! use std::time::Duration;
//!
//! let executor = deterministic::Runner::default();
//! executor.start(|context| async move {
//!     println!("Parent started");
//!     let result = context.spawn(|context| async move {
//!         context.sleep(Duration::from_millis(5)).await;
//!         println!("Child started");
//!         "hello"
//!     });
//!     println!("Child result: {:?}", result.await);
//!     println!("Parent exited");
//! });
//! ```

use crate::{hex, Handle, SystemTimeExt, DEFAULT_PRIORITY, METRICS_PREFIX};
use futures::task::{waker, waker_ref, ArcWake};
use prometheus_client::{
    encoding::{text::encode, EncodeLabelSet},
    metrics::{counter::Counter, family::Family, gauge::Gauge},
    registry::{Metric, Registry},
};
use rand::{rngs::StdRng, RngCore, SeedableRng};
use sha2::{Digest, Sha256};
use std::{
    cmp::Ordering,
    collections::{BinaryHeap, VecDeque},
    future::Future,
    mem::take,
    pin::Pin,
    sync::{
        atomic::{AtomicBool, Ordering as AtomicOrdering},
        Arc, Mutex,
    },
    task::{self, Poll, Waker},
    time::{Duration, SystemTime, UNIX_EPOCH},
};
use tracing::{debug, trace};

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
struct Work {
    label: String,
}

#[derive(Debug)]
struct Metrics {
    tasks_spawned: Family<Work, Counter>,
    tasks_running: Family<Work, Gauge>,
    task_polls: Family<Work, Counter>,
    events_processed: Counter,
}

impl Metrics {
    pub fn init(registry: &mut Registry) -> Self {
        let metrics = Self {
            tasks_spawned: Family::default(),
            tasks_running: Family::default(),
            task_polls: Family::default(),
            events_processed: Counter::default(),
        };
        registry.register(
            "tasks_spawned",
            "Total number of tasks spawned",
            metrics.tasks_spawned.clone(),
        );
        registry.register(
            "tasks_running",
            "Number of tasks currently running",
            metrics.tasks_running.clone(),
        );
        registry.register(
            "task_polls",
            "Total number of task polls",
            metrics.task_polls.clone(),
        );
        registry.register(
            "events_processed",
            "Total number of events popped from the event queue",
            metrics.events_processed.clone(),
        );
        metrics
    }
}

/// Track the state of the runtime for determinism auditing.
pub struct Auditor {
    hash: Mutex<Vec<u8>>,
}

impl Default for Auditor {
    fn default() -> Self {
        Self {
            hash: Vec::new().into(),
        }
    }
}

impl Auditor {
    fn process_task(&self, task: u128, label: &str) {
        let mut hash = self.hash.lock().unwrap();
        let mut hasher = Sha256::new();
        hasher.update(&*hash);
        hasher.update(b"process_task");
        hasher.update(task.to_be_bytes());
        hasher.update(label.as_bytes());
        *hash = hasher.finalize().to_vec();
    }

    fn schedule(&self, time: SystemTime, priority: u64, sequence: u64) {
        let mut hash = self.hash.lock().unwrap();
        let mut hasher = Sha256::new();
        hasher.update(&*hash);
        hasher.update(b"schedule");
        hasher.update(time.epoch().as_nanos().to_be_bytes());
        hasher.update(priority.to_be_bytes());
        hasher.update(sequence.to_be_bytes());
        *hash = hasher.finalize().to_vec();
    }

    fn rand(&self, method: String) {
        let mut hash = self.hash.lock().unwrap();
        let mut hasher = Sha256::new();
        hasher.update(&*hash);
        hasher.update(b"rand");
        hasher.update(method.as_bytes());
        *hash = hasher.finalize().to_vec();
    }

    fn register(&self, name: &str, help: &str) {
        let mut hash = self.hash.lock().unwrap();
        let mut hasher = Sha256::new();
        hasher.update(&*hash);
        hasher.update(b"register");
        hasher.update(name.as_bytes());
        hasher.update(help.as_bytes());
        *hash = hasher.finalize().to_vec();
    }

    fn encode(&self) {
        let mut hash = self.hash.lock().unwrap();
        let mut hasher = Sha256::new();
        hasher.update(&*hash);
        hasher.update(b"encode");
        *hash = hasher.finalize().to_vec();
    }

    /// Generate a representation of the current state of the runtime.
    ///
    /// This can be used to ensure that logic running on top
    /// of the runtime is interacting deterministically.
    pub fn state(&self) -> String {
        let hash = self.hash.lock().unwrap().clone();
        hex(&hash)
    }
}

struct Task {
    id: u128,
    label: String,

    tasks: Arc<Tasks>,

    future: Mutex<Pin<Box<dyn Future<Output = ()> + Send + 'static>>>,

    completed: Mutex<bool>,
}

impl ArcWake for Task {
    fn wake_by_ref(arc_self: &Arc<Self>) {
        arc_self.tasks.enqueue(arc_self.clone());
    }
}

struct Tasks {
    counter: Mutex<u128>,
    ready: Mutex<VecDeque<Arc<Task>>>,
}

impl Tasks {
    fn register(
        arc_self: &Arc<Self>,
        label: &str,
        future: Pin<Box<dyn Future<Output = ()> + Send + 'static>>,
    ) -> Arc<Task> {
        let id = {
            let mut l = arc_self.counter.lock().unwrap();
            let old = *l;
            *l = l.checked_add(1).expect("task counter overflow");
            old
        };
        Arc::new(Task {
            id,
            label: label.to_string(),
            future: Mutex::new(future),
            tasks: arc_self.clone(),
            completed: Mutex::new(false),
        })
    }

    fn enqueue(&self, task: Arc<Task>) {
        self.ready.lock().unwrap().push_back(task);
    }

    fn next(&self) -> Option<Arc<Task>> {
        self.ready.lock().unwrap().pop_front()
    }
}

/// A pending resumption on the event queue.
///
/// Events are ordered by `time`, then `priority` (lower is more urgent), then `sequence`
/// (insertion order), so simultaneous events of equal priority resume first-in first-out.
struct Event {
    time: SystemTime,
    priority: u64,
    sequence: u64,
    waker: Waker,

    /// Set just before `waker` is invoked (absent for task start events).
    fired: Option<Arc<AtomicBool>>,
}

impl Event {
    fn key(&self) -> (SystemTime, u64, u64) {
        (self.time, self.priority, self.sequence)
    }
}

impl PartialEq for Event {
    fn eq(&self, other: &Self) -> bool {
        self.key().eq(&other.key())
    }
}

impl Eq for Event {}

impl PartialOrd for Event {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Event {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reverse the ordering for min-heap
        other.key().cmp(&self.key())
    }
}

/// Configuration for the `deterministic` runtime.
#[derive(Clone, Debug)]
pub struct Config {
    /// Seed for the random number generator.
    seed: u64,

    /// Virtual time budget. Events scheduled after this point are discarded.
    timeout: Option<Duration>,
}

impl Config {
    /// Returns a new [Config] with default values.
    pub fn new() -> Self {
        Self {
            seed: 42,
            timeout: None,
        }
    }

    /// See [Config]
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// See [Config]
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new()
    }
}

/// Deterministic runtime that resumes tasks in event order.
pub struct Executor {
    registry: Mutex<Registry>,
    deadline: Option<SystemTime>,
    metrics: Arc<Metrics>,
    auditor: Arc<Auditor>,
    rng: Mutex<StdRng>,
    time: Mutex<SystemTime>,
    tasks: Arc<Tasks>,
    events: Mutex<BinaryHeap<Event>>,
    sequence: Mutex<u64>,
}

impl Executor {
    fn init(cfg: Config) -> Arc<Self> {
        // Create a new registry
        let mut registry = Registry::default();
        let runtime_registry = registry.sub_registry_with_prefix(METRICS_PREFIX);

        // Initialize runtime
        let metrics = Arc::new(Metrics::init(runtime_registry));
        let start_time = UNIX_EPOCH;
        let deadline = cfg
            .timeout
            .map(|timeout| start_time.checked_add(timeout).expect("timeout overflowed"));
        Arc::new(Self {
            registry: Mutex::new(registry),
            deadline,
            metrics,
            auditor: Arc::new(Auditor::default()),
            rng: Mutex::new(StdRng::seed_from_u64(cfg.seed)),
            time: Mutex::new(start_time),
            tasks: Arc::new(Tasks {
                counter: Mutex::new(1), // Reserve 0 for the root task
                ready: Mutex::new(VecDeque::new()),
            }),
            events: Mutex::new(BinaryHeap::new()),
            sequence: Mutex::new(0),
        })
    }

    /// Push an event onto the queue.
    fn schedule(
        &self,
        time: SystemTime,
        priority: u64,
        waker: Waker,
        fired: Option<Arc<AtomicBool>>,
    ) {
        let sequence = {
            let mut l = self.sequence.lock().unwrap();
            let old = *l;
            *l = l.checked_add(1).expect("event sequence overflow");
            old
        };
        self.auditor.schedule(time, priority, sequence);
        trace!(
            at = time.epoch_millis(),
            priority,
            sequence,
            "scheduled event"
        );
        self.events.lock().unwrap().push(Event {
            time,
            priority,
            sequence,
            waker,
            fired,
        });
    }

    /// Drop every pending event (and, with them, any task only reachable from the queue).
    fn discard(&self) -> usize {
        let discarded = take(&mut *self.events.lock().unwrap());
        discarded.len()
    }
}

/// Waker for the *root* future.
///
/// The root future is not stored inside `Tasks`, so waking it only raises a flag that
/// the executor checks each time it looks for runnable work.
struct RootWaker {
    woken: AtomicBool,
}

impl ArcWake for RootWaker {
    fn wake_by_ref(arc_self: &Arc<Self>) {
        arc_self.woken.store(true, AtomicOrdering::SeqCst);
    }
}

/// Implementation of [crate::Runner] for the `deterministic` runtime.
pub struct Runner {
    executor: Arc<Executor>,
}

impl Runner {
    /// Initialize a new `deterministic` runtime with the given configuration.
    pub fn new(cfg: Config) -> Self {
        Self {
            executor: Executor::init(cfg),
        }
    }

    /// Initialize a new `deterministic` runtime with the default configuration
    /// and the provided seed.
    pub fn seeded(seed: u64) -> Self {
        Self::new(Config::default().with_seed(seed))
    }

    /// Initialize a new `deterministic` runtime with the default configuration
    /// but stop after the given amount of virtual time.
    pub fn timed(timeout: Duration) -> Self {
        Self::new(Config::default().with_timeout(Some(timeout)))
    }

    /// Returns the auditor of this runtime (also reachable from any [Context]).
    pub fn auditor(&self) -> Arc<Auditor> {
        self.executor.auditor.clone()
    }
}

impl Default for Runner {
    fn default() -> Self {
        Self::new(Config::default())
    }
}

impl crate::Runner for Runner {
    type Context = Context;

    fn start<F, Fut>(self, f: F) -> Fut::Output
    where
        F: FnOnce(Self::Context) -> Fut,
        Fut: Future,
    {
        // Pin root task to the heap
        let context = Context {
            label: String::new(),
            executor: self.executor.clone(),
        };
        let mut root = Box::pin(f(context));
        let root_waker = Arc::new(RootWaker {
            woken: AtomicBool::new(true),
        });
        let mut output = None;

        // Process events until none remain
        let mut exhausted = false;
        loop {
            // Run everything that is runnable at the current instant
            loop {
                if output.is_none() && root_waker.woken.swap(false, AtomicOrdering::SeqCst) {
                    // Record task for auditing
                    self.executor.auditor.process_task(0, ""); // 0 is reserved for the root task
                    trace!(id = 0, "processing task");

                    // Prepare task for polling
                    let waker = waker_ref(&root_waker);
                    let mut cx = task::Context::from_waker(&waker);

                    // Record task poll
                    self.executor
                        .metrics
                        .task_polls
                        .get_or_create(&Work {
                            label: String::new(),
                        })
                        .inc();
                    if let Poll::Ready(v) = root.as_mut().poll(&mut cx) {
                        trace!(id = 0, "task is complete");
                        output = Some(v);
                    }
                    continue;
                }
                let Some(task) = self.executor.tasks.next() else {
                    break;
                };

                // If task is completed, skip it
                if *task.completed.lock().unwrap() {
                    continue;
                }

                // Record task for auditing
                self.executor.auditor.process_task(task.id, &task.label);
                trace!(id = task.id, "processing task");

                // Prepare task for polling
                let waker = waker_ref(&task);
                let mut cx = task::Context::from_waker(&waker);
                let mut fut = task.future.lock().unwrap();

                // Record task poll
                self.executor
                    .metrics
                    .task_polls
                    .get_or_create(&Work {
                        label: task.label.clone(),
                    })
                    .inc();
                if fut.as_mut().poll(&mut cx).is_pending() {
                    trace!(id = task.id, "task is still pending");
                    continue;
                }

                // Mark task as completed
                *task.completed.lock().unwrap() = true;
                trace!(id = task.id, "task is complete");
            }

            // Pop the earliest event
            let next = self.executor.events.lock().unwrap().pop();
            let Some(event) = next else {
                break;
            };

            // Stop if the event lies beyond our budget
            if let Some(deadline) = self.executor.deadline {
                if event.time > deadline {
                    drop(event);
                    let discarded = self.executor.discard() + 1;
                    debug!(discarded, "time budget exhausted");
                    exhausted = true;
                    break;
                }
            }

            // Advance time
            {
                let mut time = self.executor.time.lock().unwrap();
                assert!(event.time >= *time, "time moved backwards");
                *time = event.time;
            }
            trace!(
                now = event.time.epoch_millis(),
                priority = event.priority,
                sequence = event.sequence,
                "processing event"
            );
            self.executor.metrics.events_processed.inc();

            // Resume the task waiting on the event
            if let Some(fired) = &event.fired {
                fired.store(true, AtomicOrdering::SeqCst);
            }
            event.waker.wake();
        }

        match output {
            Some(v) => v,
            None if exhausted => panic!("runtime timeout"),
            None => panic!("runtime stalled"),
        }
    }
}

/// Implementation of [crate::Spawner], [crate::Clock], and [crate::Metrics] for the
/// `deterministic` runtime.
pub struct Context {
    label: String,
    executor: Arc<Executor>,
}

impl Context {
    /// Returns the auditor of the runtime this context belongs to.
    pub fn auditor(&self) -> Arc<Auditor> {
        self.executor.auditor.clone()
    }
}

impl Clone for Context {
    fn clone(&self) -> Self {
        Self {
            label: self.label.clone(),
            executor: self.executor.clone(),
        }
    }
}

impl crate::Spawner for Context {
    fn spawn<F, Fut, T>(self, f: F) -> Handle<T>
    where
        F: FnOnce(Self) -> Fut + Send + 'static,
        Fut: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        // Get metrics
        let label = self.label.clone();
        let work = Work {
            label: label.clone(),
        };
        self.executor
            .metrics
            .tasks_spawned
            .get_or_create(&work)
            .inc();
        let gauge = self
            .executor
            .metrics
            .tasks_running
            .get_or_create(&work)
            .clone();

        // Set up the task
        let executor = self.executor.clone();
        let future = f(self);
        let (f, handle) = Handle::init(future, gauge);

        // Schedule the first poll at the current instant
        let task = Tasks::register(&executor.tasks, &label, Box::pin(f));
        let now = *executor.time.lock().unwrap();
        executor.schedule(now, DEFAULT_PRIORITY, waker(task), None);
        handle
    }
}

impl crate::Metrics for Context {
    fn with_label(&self, label: &str) -> Self {
        let label = {
            let prefix = self.label.clone();
            if prefix.is_empty() {
                label.to_string()
            } else {
                format!("{}_{}", prefix, label)
            }
        };
        assert!(
            !label.starts_with(METRICS_PREFIX),
            "using runtime label is not allowed"
        );
        Self {
            label,
            executor: self.executor.clone(),
        }
    }

    fn label(&self) -> String {
        self.label.clone()
    }

    fn register<N: Into<String>, H: Into<String>>(&self, name: N, help: H, metric: impl Metric) {
        // Prepare args
        let name = name.into();
        let help = help.into();

        // Register metric
        self.executor.auditor.register(&name, &help);
        let prefixed_name = {
            let prefix = &self.label;
            if prefix.is_empty() {
                name
            } else {
                format!("{}_{}", *prefix, name)
            }
        };
        self.executor
            .registry
            .lock()
            .unwrap()
            .register(prefixed_name, help, metric)
    }

    fn encode(&self) -> String {
        self.executor.auditor.encode();
        let mut buffer = String::new();
        encode(&mut buffer, &self.executor.registry.lock().unwrap()).expect("encoding failed");
        buffer
    }
}

struct Sleeper {
    executor: Arc<Executor>,
    time: SystemTime,
    priority: u64,
    fired: Option<Arc<AtomicBool>>,
}

impl Future for Sleeper {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut task::Context<'_>) -> Poll<Self::Output> {
        if let Some(fired) = &self.fired {
            if fired.load(AtomicOrdering::SeqCst) {
                return Poll::Ready(());
            }
            return Poll::Pending;
        }

        // A deadline that already passed while this future sat unpolled has elapsed
        let current_time = *self.executor.time.lock().unwrap();
        if current_time > self.time {
            return Poll::Ready(());
        }

        // Register the wake-up (even for a zero delay, so that simultaneous work goes first)
        let fired = Arc::new(AtomicBool::new(false));
        self.executor
            .schedule(self.time, self.priority, cx.waker().clone(), Some(fired.clone()));
        self.fired = Some(fired);
        Poll::Pending
    }
}

impl crate::Clock for Context {
    fn current(&self) -> SystemTime {
        *self.executor.time.lock().unwrap()
    }

    fn sleep(&self, duration: Duration) -> impl Future<Output = ()> + Send + 'static {
        self.sleep_prioritized(duration, DEFAULT_PRIORITY)
    }

    fn sleep_prioritized(
        &self,
        duration: Duration,
        priority: u64,
    ) -> impl Future<Output = ()> + Send + 'static {
        let deadline = self
            .current()
            .checked_add(duration)
            .expect("overflow when setting wake time");
        Sleeper {
            executor: self.executor.clone(),
            time: deadline,
            priority,
            fired: None,
        }
    }

    fn sleep_until(&self, deadline: SystemTime) -> impl Future<Output = ()> + Send + 'static {
        assert!(
            deadline >= self.current(),
            "cannot schedule an event in the past"
        );
        Sleeper {
            executor: self.executor.clone(),
            time: deadline,
            priority: DEFAULT_PRIORITY,
            fired: None,
        }
    }
}

impl RngCore for Context {
    fn next_u32(&mut self) -> u32 {
        self.executor.auditor.rand("next_u32".to_string());
        self.executor.rng.lock().unwrap().next_u32()
    }

    fn next_u64(&mut self) -> u64 {
        self.executor.auditor.rand("next_u64".to_string());
        self.executor.rng.lock().unwrap().next_u64()
    }

    fn fill_bytes(&mut self, dest: &mut [u8]) {
        self.executor.auditor.rand("fill_bytes".to_string());
        self.executor.rng.lock().unwrap().fill_bytes(dest)
    }

    fn try_fill_bytes(&mut self, dest: &mut [u8]) -> Result<(), rand::Error> {
        self.executor.auditor.rand("try_fill_bytes".to_string());
        self.executor.rng.lock().unwrap().try_fill_bytes(dest)
    }
}
