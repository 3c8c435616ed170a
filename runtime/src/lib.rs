//! Drive simulated tasks through a deterministic, event-ordered virtual clock.
//!
//! This crate provides the kernel used to simulate networks of cooperating tasks. Every
//! task is a future polled by a single-threaded executor ([deterministic]) that only
//! advances virtual time when no task can make progress at the current instant. Tasks
//! suspend on the [Clock] or on a [Resource] (a single-slot, priority-ordered admission
//! primitive) and are resumed in a fixed order, so any run is reproducible.
//!
//! # Terminology
//!
//! Each runtime is composed of an `Executor` and a `Context`. The `Executor` implements the
//! `Runner` trait and drives execution of a runtime. The `Context` implements any number of the
//! other traits to provide core functionality.

use prometheus_client::registry::Metric;
use std::{
    future::Future,
    time::{Duration, SystemTime},
};
use thiserror::Error;

pub mod deterministic;
mod utils;
pub use utils::*;

/// Prefix for runtime metrics.
const METRICS_PREFIX: &str = "runtime";

/// Priority assigned to events that do not request one.
///
/// Lower values are more urgent.
pub const DEFAULT_PRIORITY: u64 = 0;

/// Errors that can occur when interacting with the runtime.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum Error {
    #[error("closed")]
    Closed,
}

/// Interface that any task scheduler must implement to start
/// running tasks.
pub trait Runner {
    /// Context defines the environment available to tasks.
    /// Example of possible services provided by the context include:
    /// - [Clock] for time-based operations
    /// - [Spawner] for starting new tasks
    /// - [Metrics] for registering counters
    type Context;

    /// Start running a root task.
    ///
    /// The runner keeps executing until no work remains (or a configured budget is
    /// exhausted) and then returns the output of the root task.
    fn start<F, Fut>(self, f: F) -> Fut::Output
    where
        F: FnOnce(Self::Context) -> Fut,
        Fut: Future;
}

/// Interface that any task scheduler must implement to spawn tasks.
pub trait Spawner: Clone + Send + Sync + 'static {
    /// Spawn a task with the current context.
    ///
    /// The task does not run inline: it is scheduled on the event queue at the current
    /// instant and starts after every task scheduled before it. The task keeps running
    /// even if the returned [Handle] is dropped.
    fn spawn<F, Fut, T>(self, f: F) -> Handle<T>
    where
        F: FnOnce(Self) -> Fut + Send + 'static,
        Fut: Future<Output = T> + Send + 'static,
        T: Send + 'static;
}

/// Interface to register and encode metrics.
pub trait Metrics: Clone + Send + Sync + 'static {
    /// Get the current label of the context.
    fn label(&self) -> String;

    /// Create a new instance of `Metrics` with the given label appended to the end
    /// of the current `Metrics` label.
    ///
    /// This is commonly used to create a nested context for `register`.
    ///
    /// It is not permitted for any implementation to use `METRICS_PREFIX` as the start of a
    /// label (reserved for metrics for the runtime).
    fn with_label(&self, label: &str) -> Self;

    /// Register a metric with the runtime.
    ///
    /// Any registered metric will include (as a prefix) the label of the current context.
    fn register<N: Into<String>, H: Into<String>>(&self, name: N, help: H, metric: impl Metric);

    /// Encode all metrics into a buffer.
    fn encode(&self) -> String;
}

/// Interface that any task scheduler must implement to provide
/// time-based operations.
///
/// Time is virtual: it only moves when the scheduler pops the next event.
pub trait Clock: Clone + Send + Sync + 'static {
    /// Returns the current time.
    fn current(&self) -> SystemTime;

    /// Sleep for the given duration.
    fn sleep(&self, duration: Duration) -> impl Future<Output = ()> + Send + 'static;

    /// Sleep for the given duration, resuming before any other task woken at the same
    /// instant with a larger `priority`.
    fn sleep_prioritized(
        &self,
        duration: Duration,
        priority: u64,
    ) -> impl Future<Output = ()> + Send + 'static;

    /// Sleep until the given deadline.
    ///
    /// # Panics
    ///
    /// Panics if `deadline` is earlier than [Clock::current].
    fn sleep_until(&self, deadline: SystemTime) -> impl Future<Output = ()> + Send + 'static;
}
