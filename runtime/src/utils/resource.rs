//! A single-slot admission primitive with priority-ordered waiters.
//!
//! A [Resource] is held by at most one task at a time. Tasks that find it busy wait in a
//! set ordered by `(priority, arrival)`, where lower priorities are admitted first and ties
//! go to whoever asked first. Releasing (dropping the [ResourceGuard]) hands the slot
//! directly to the next waiter, so a task arriving between the release and the waiter's
//! resumption can never jump the queue.

use std::{
    collections::BTreeMap,
    future::Future,
    pin::Pin,
    sync::{Arc, Mutex},
    task::{Context, Poll, Waker},
};

/// Position of a waiter: `(priority, arrival)`.
type Ticket = (u64, u64);

#[derive(Default)]
struct State {
    busy: bool,
    arrivals: u64,
    waiting: BTreeMap<Ticket, Waker>,

    /// Waiter that was handed the slot but has not observed it yet.
    granted: Option<Ticket>,
}

impl State {
    /// Pass the slot to the next waiter (or mark the resource idle).
    fn release(&mut self) -> Option<Waker> {
        match self.waiting.pop_first() {
            Some((ticket, waker)) => {
                self.granted = Some(ticket);
                Some(waker)
            }
            None => {
                self.busy = false;
                None
            }
        }
    }
}

/// Mutual exclusion over a single slot (e.g. a link's transmitter or a router's processor).
#[derive(Clone, Default)]
pub struct Resource {
    state: Arc<Mutex<State>>,
}

impl Resource {
    /// Create an idle resource.
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait until the slot is free and this caller is the most urgent waiter.
    ///
    /// The returned future resolves to a guard that releases the slot when dropped.
    pub fn acquire(&self, priority: u64) -> Acquire {
        Acquire {
            state: self.state.clone(),
            priority,
            ticket: None,
            acquired: false,
        }
    }

    /// Number of current holders (0 or 1).
    pub fn in_use(&self) -> usize {
        usize::from(self.state.lock().unwrap().busy)
    }

    /// Number of tasks waiting for the slot.
    pub fn waiting(&self) -> usize {
        self.state.lock().unwrap().waiting.len()
    }
}

/// Future returned by [Resource::acquire].
pub struct Acquire {
    state: Arc<Mutex<State>>,
    priority: u64,
    ticket: Option<Ticket>,
    acquired: bool,
}

impl Future for Acquire {
    type Output = ResourceGuard;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        let mut state = this.state.lock().unwrap();
        match this.ticket {
            None => {
                if !state.busy {
                    state.busy = true;
                    drop(state);
                    this.acquired = true;
                    return Poll::Ready(ResourceGuard {
                        state: this.state.clone(),
                    });
                }

                // Join the waiting set
                let ticket = (this.priority, state.arrivals);
                state.arrivals = state.arrivals.checked_add(1).expect("arrival overflow");
                state.waiting.insert(ticket, cx.waker().clone());
                this.ticket = Some(ticket);
                Poll::Pending
            }
            Some(ticket) => {
                if state.granted == Some(ticket) {
                    state.granted = None;
                    drop(state);
                    this.acquired = true;
                    return Poll::Ready(ResourceGuard {
                        state: this.state.clone(),
                    });
                }
                if let Some(waker) = state.waiting.get_mut(&ticket) {
                    waker.clone_from(cx.waker());
                }
                Poll::Pending
            }
        }
    }
}

impl Drop for Acquire {
    fn drop(&mut self) {
        if self.acquired {
            return;
        }
        let Some(ticket) = self.ticket else {
            return;
        };
        let next = {
            let mut state = self.state.lock().unwrap();
            if state.granted == Some(ticket) {
                // The slot was already ours, pass it on
                state.granted = None;
                state.release()
            } else {
                state.waiting.remove(&ticket);
                None
            }
        };
        if let Some(waker) = next {
            waker.wake();
        }
    }
}

/// Proof of holding a [Resource]. The slot is released when the guard is dropped.
pub struct ResourceGuard {
    state: Arc<Mutex<State>>,
}

impl Drop for ResourceGuard {
    fn drop(&mut self) {
        let next = self.state.lock().unwrap().release();
        if let Some(waker) = next {
            waker.wake();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{deterministic, Clock, Runner, Spawner};
    use futures::task::noop_waker;
    use std::time::Duration;

    fn poll(acquire: &mut Acquire) -> Poll<ResourceGuard> {
        let waker = noop_waker();
        let mut cx = Context::from_waker(&waker);
        Pin::new(acquire).poll(&mut cx)
    }

    #[test]
    fn test_uncontended() {
        let resource = Resource::new();
        let mut acquire = resource.acquire(7);
        let Poll::Ready(guard) = poll(&mut acquire) else {
            panic!("idle resource should be granted immediately");
        };
        assert_eq!(resource.in_use(), 1);
        drop(guard);
        assert_eq!(resource.in_use(), 0);
    }

    #[test]
    fn test_priority_then_arrival() {
        let resource = Resource::new();
        let mut holder = resource.acquire(0);
        let Poll::Ready(held) = poll(&mut holder) else {
            panic!("idle resource should be granted immediately");
        };

        // Queue waiters out of priority order
        let mut late = resource.acquire(3);
        let mut first = resource.acquire(1);
        let mut second = resource.acquire(1);
        assert!(poll(&mut late).is_pending());
        assert!(poll(&mut first).is_pending());
        assert!(poll(&mut second).is_pending());
        assert_eq!(resource.waiting(), 3);

        // Release hands the slot over in (priority, arrival) order
        drop(held);
        assert_eq!(resource.in_use(), 1);
        assert!(poll(&mut second).is_pending());
        assert!(poll(&mut late).is_pending());
        let Poll::Ready(guard) = poll(&mut first) else {
            panic!("most urgent waiter should be granted");
        };
        drop(guard);
        let Poll::Ready(guard) = poll(&mut second) else {
            panic!("next waiter should be granted");
        };
        drop(guard);
        let Poll::Ready(guard) = poll(&mut late) else {
            panic!("last waiter should be granted");
        };
        drop(guard);
        assert_eq!(resource.in_use(), 0);
        assert_eq!(resource.waiting(), 0);
    }

    #[test]
    fn test_newcomer_cannot_jump_handoff() {
        let resource = Resource::new();
        let mut holder = resource.acquire(5);
        let Poll::Ready(held) = poll(&mut holder) else {
            panic!("idle resource should be granted immediately");
        };
        let mut waiter = resource.acquire(5);
        assert!(poll(&mut waiter).is_pending());
        drop(held);

        // A more urgent newcomer must still wait behind the granted waiter
        let mut newcomer = resource.acquire(0);
        assert!(poll(&mut newcomer).is_pending());
        let Poll::Ready(guard) = poll(&mut waiter) else {
            panic!("granted waiter should resume");
        };
        drop(guard);
        assert!(poll(&mut newcomer).is_ready());
    }

    #[test]
    fn test_dropped_waiter_passes_slot_on() {
        let resource = Resource::new();
        let mut holder = resource.acquire(0);
        let Poll::Ready(held) = poll(&mut holder) else {
            panic!("idle resource should be granted immediately");
        };
        let mut abandoned = resource.acquire(0);
        let mut patient = resource.acquire(1);
        assert!(poll(&mut abandoned).is_pending());
        assert!(poll(&mut patient).is_pending());

        // The slot is handed to `abandoned`, which never collects it
        drop(held);
        drop(abandoned);
        assert!(poll(&mut patient).is_ready());
    }

    #[test]
    fn test_dropped_waiter_leaves_queue() {
        let resource = Resource::new();
        let mut holder = resource.acquire(0);
        let Poll::Ready(held) = poll(&mut holder) else {
            panic!("idle resource should be granted immediately");
        };
        let mut abandoned = resource.acquire(0);
        assert!(poll(&mut abandoned).is_pending());
        drop(abandoned);
        assert_eq!(resource.waiting(), 0);
        drop(held);
        assert_eq!(resource.in_use(), 0);
    }

    #[test]
    fn test_contention_in_runtime() {
        let executor = deterministic::Runner::default();
        let order = executor.start(|context| async move {
            let resource = Resource::new();
            let order = Arc::new(Mutex::new(Vec::new()));
            let mut handles = Vec::new();
            for (name, priority) in [("a", 2), ("b", 9), ("c", 1), ("d", 1)] {
                let resource = resource.clone();
                let order = order.clone();
                handles.push(context.clone().spawn(move |context| async move {
                    let _guard = resource.acquire(priority).await;
                    assert_eq!(resource.in_use(), 1);
                    order.lock().unwrap().push((name, context.current()));
                    context.sleep(Duration::from_millis(10)).await;
                }));
            }
            for handle in handles {
                handle.await.unwrap();
            }
            let order = order.lock().unwrap().clone();
            order
        });

        // `a` is admitted at once, the rest in (priority, arrival) order
        let names: Vec<_> = order.iter().map(|(name, _)| *name).collect();
        assert_eq!(names, vec!["a", "c", "d", "b"]);
        let times: Vec<_> = order
            .iter()
            .map(|(_, time)| time.duration_since(std::time::UNIX_EPOCH).unwrap())
            .collect();
        assert_eq!(
            times,
            vec![
                Duration::ZERO,
                Duration::from_millis(10),
                Duration::from_millis(20),
                Duration::from_millis(30),
            ]
        );
    }
}
