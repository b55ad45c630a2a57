//! Single-threaded cooperative fiber runtime.
//!
//! A fiber is an `async` block pinned into the scheduler and polled only
//! when the scheduler decides: when an awaited event arrives, when a
//! timer expires, after an explicit yield, or when a deferred request is
//! fulfilled.  There are no threads and no wakers doing real work; the
//! ready queue is the wake mechanism, which makes ordering exact:
//! awaits resume FIFO per event, timers fire in deadline order with ties
//! broken by registration order.
//!
//! Suspension points are exactly [`FiberHandle::await_events`],
//! [`FiberHandle::sleep`], [`FiberHandle::yield_now`], and
//! [`FiberHandle::defer_commands`] (plus the timeout-combining
//! [`FiberHandle::await_events_timeout`]).  Code between suspension
//! points runs atomically with respect to every other fiber and handler.

use crate::plugin::CommandMap;
use skald_proto::{Event, EventKind};
use std::cell::RefCell;
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, HashSet, VecDeque};
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context as TaskContext, Poll};
use std::time::Duration;
use tokio::time::Instant;

pub type FiberId = u64;

type LocalFuture = Pin<Box<dyn Future<Output = ()>>>;

enum FiberSlot {
    Idle(LocalFuture),
    /// Placeholder while the future is out of the table being polled.
    Polling,
}

struct AwaitEntry {
    seq: u64,
    fiber: FiberId,
    kinds: Vec<EventKind>,
}

enum TimerPayload {
    /// Wake a sleeping fiber.
    Wake { fiber: FiberId, seq: u64 },
    /// Run a one-shot callback outside any fiber.
    Call(Box<dyn FnOnce()>),
}

struct TimerEntry {
    deadline: Instant,
    seq: u64,
    payload: TimerPayload,
}

impl PartialEq for TimerEntry {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline && self.seq == other.seq
    }
}
impl Eq for TimerEntry {}
impl PartialOrd for TimerEntry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for TimerEntry {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        (self.deadline, self.seq).cmp(&(other.deadline, other.seq))
    }
}

/// A cross-plugin request for the composed command map; serviced by the
/// connection loop between pumps.
pub struct DeferredRequest {
    pub fiber: FiberId,
    pub channel: Option<String>,
}

#[derive(Default)]
struct SchedInner {
    fibers: HashMap<FiberId, FiberSlot>,
    owners: HashMap<FiberId, String>,
    ready: VecDeque<FiberId>,
    awaits: Vec<AwaitEntry>,
    timers: BinaryHeap<Reverse<TimerEntry>>,
    /// One armed sleep per fiber; the seq lets stale heap entries be
    /// recognised after a cancellation.
    armed: HashMap<FiberId, u64>,
    fired: HashSet<FiberId>,
    event_box: HashMap<FiberId, Event>,
    deferred: Vec<DeferredRequest>,
    deferred_box: HashMap<FiberId, CommandMap>,
    next_fiber: FiberId,
    next_seq: u64,
}

impl SchedInner {
    fn alloc_seq(&mut self) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        seq
    }

    fn forget_fiber(&mut self, id: FiberId) {
        self.fibers.remove(&id);
        self.owners.remove(&id);
        self.awaits.retain(|e| e.fiber != id);
        self.armed.remove(&id);
        self.fired.remove(&id);
        self.event_box.remove(&id);
        self.deferred.retain(|d| d.fiber != id);
        self.deferred_box.remove(&id);
        self.ready.retain(|&r| r != id);
    }
}

/// Cheap cloneable handle to the runtime.
#[derive(Clone, Default)]
pub struct Scheduler {
    inner: Rc<RefCell<SchedInner>>,
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.borrow();
        f.debug_struct("Scheduler")
            .field("fibers", &inner.fibers.len())
            .field("ready", &inner.ready.len())
            .field("awaits", &inner.awaits.len())
            .finish_non_exhaustive()
    }
}

impl Scheduler {
    pub fn new() -> Scheduler {
        Scheduler::default()
    }

    /// Spawn a fiber owned by `owner` (a plugin name, used for
    /// cancellation).  The closure receives the fiber's own handle.
    pub fn spawn<F, Fut>(&self, owner: &str, f: F) -> FiberId
    where
        F: FnOnce(FiberHandle) -> Fut,
        Fut: Future<Output = ()> + 'static,
    {
        let id = {
            let mut inner = self.inner.borrow_mut();
            let id = inner.next_fiber;
            inner.next_fiber += 1;
            inner.owners.insert(id, owner.to_owned());
            id
        };
        let handle = FiberHandle {
            id,
            inner: Rc::clone(&self.inner),
        };
        let future: LocalFuture = Box::pin(f(handle));
        let mut inner = self.inner.borrow_mut();
        inner.fibers.insert(id, FiberSlot::Idle(future));
        inner.ready.push_back(id);
        id
    }

    /// Schedule a one-shot callback, not tied to any fiber.
    pub fn delay_call(&self, after: Duration, callback: Box<dyn FnOnce()>) {
        let mut inner = self.inner.borrow_mut();
        let seq = inner.alloc_seq();
        inner.timers.push(Reverse(TimerEntry {
            deadline: Instant::now() + after,
            seq,
            payload: TimerPayload::Call(callback),
        }));
    }

    /// Hand an event to the await table.  The FIFO-oldest fiber awaiting
    /// the event's kind (if any) is resumed with a copy of the event
    /// and removed from the table.
    pub fn deliver(&self, event: &Event) -> bool {
        let mut inner = self.inner.borrow_mut();
        let Some(pos) = inner
            .awaits
            .iter()
            .position(|e| e.kinds.contains(&event.kind))
        else {
            return false;
        };
        let entry = inner.awaits.remove(pos);
        inner.event_box.insert(entry.fiber, event.clone());
        inner.ready.push_back(entry.fiber);
        true
    }

    /// Run expired timers.  Fiber wakeups are queued; callbacks run here,
    /// after the scheduler lock is released.
    pub fn run_due_timers(&self, now: Instant) -> usize {
        let mut callbacks = Vec::new();
        {
            let mut inner = self.inner.borrow_mut();
            while let Some(Reverse(entry)) = inner.timers.peek()
                && entry.deadline <= now
            {
                let Some(Reverse(entry)) = inner.timers.pop() else {
                    break;
                };
                match entry.payload {
                    TimerPayload::Wake { fiber, seq } => {
                        // A stale entry (sleep cancelled or superseded)
                        // wakes nobody.
                        if inner.armed.get(&fiber) == Some(&seq) {
                            inner.armed.remove(&fiber);
                            inner.fired.insert(fiber);
                            inner.ready.push_back(fiber);
                        }
                    }
                    TimerPayload::Call(cb) => callbacks.push(cb),
                }
            }
        }
        let n = callbacks.len();
        for cb in callbacks {
            cb();
        }
        n
    }

    /// Earliest pending timer deadline, for the connection loop's read
    /// timeout.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.inner
            .borrow()
            .timers
            .peek()
            .map(|Reverse(e)| e.deadline)
    }

    /// Poll ready fibers until the queue drains or `budget` polls have
    /// been spent.  Returns the number of polls.
    pub fn pump(&self, budget: usize) -> usize {
        let mut polled = 0;
        while polled < budget {
            let Some(id) = self.inner.borrow_mut().ready.pop_front() else {
                break;
            };
            let mut future = {
                let mut inner = self.inner.borrow_mut();
                match inner.fibers.get_mut(&id) {
                    Some(slot) => match std::mem::replace(slot, FiberSlot::Polling) {
                        FiberSlot::Idle(fut) => fut,
                        FiberSlot::Polling => {
                            // A fiber queued twice in one tick; skip the
                            // duplicate entry.
                            continue;
                        }
                    },
                    // Cancelled while queued.
                    None => continue,
                }
            };
            polled += 1;
            let waker = futures_util::task::noop_waker();
            let mut cx = TaskContext::from_waker(&waker);
            let poll = future.as_mut().poll(&mut cx);
            let mut inner = self.inner.borrow_mut();
            match poll {
                Poll::Ready(()) => {
                    inner.forget_fiber(id);
                }
                Poll::Pending => {
                    // Unless the fiber cancelled itself mid-poll, park the
                    // future again.
                    if let Some(slot) = inner.fibers.get_mut(&id) {
                        *slot = FiberSlot::Idle(future);
                    }
                }
            }
        }
        polled
    }

    pub fn has_ready(&self) -> bool {
        !self.inner.borrow().ready.is_empty()
    }

    pub fn fiber_count(&self) -> usize {
        self.inner.borrow().fibers.len()
    }

    /// Take the deferred command-map requests queued since the last call.
    pub fn take_deferred(&self) -> Vec<DeferredRequest> {
        std::mem::take(&mut self.inner.borrow_mut().deferred)
    }

    /// Resume a deferred fiber with its payload.
    pub fn fulfill_deferred(&self, fiber: FiberId, commands: CommandMap) {
        let mut inner = self.inner.borrow_mut();
        if inner.fibers.contains_key(&fiber) {
            inner.deferred_box.insert(fiber, commands);
            inner.ready.push_back(fiber);
        }
    }

    /// Drop every fiber, await, and timer owned by `owner`.  The fibers'
    /// stacks are freed without running further instructions.
    pub fn cancel_owner(&self, owner: &str) {
        let ids: Vec<FiberId> = {
            let inner = self.inner.borrow();
            inner
                .owners
                .iter()
                .filter(|(_, o)| o.as_str() == owner)
                .map(|(&id, _)| id)
                .collect()
        };
        let mut inner = self.inner.borrow_mut();
        for id in ids {
            inner.forget_fiber(id);
        }
    }

    /// Drop everything; used at disconnect and shutdown.
    pub fn cancel_all(&self) {
        let mut inner = self.inner.borrow_mut();
        *inner = SchedInner::default();
    }
}

/// A fiber's own view of the scheduler: the suspension primitives.
#[derive(Clone)]
pub struct FiberHandle {
    id: FiberId,
    inner: Rc<RefCell<SchedInner>>,
}

impl FiberHandle {
    pub fn id(&self) -> FiberId {
        self.id
    }

    /// Suspend until the dispatcher delivers an event of one of the
    /// given kinds.
    pub fn await_events(&self, kinds: &[EventKind]) -> EventWait {
        EventWait {
            fiber: self.clone(),
            kinds: kinds.to_vec(),
            registered: false,
            deadline: None,
        }
    }

    /// Suspend until an event arrives or `timeout` elapses; `None` on
    /// timeout.  The timer is armed before the await is registered and
    /// disarmed on event receipt.
    pub fn await_events_timeout(&self, kinds: &[EventKind], timeout: Duration) -> EventWait {
        EventWait {
            fiber: self.clone(),
            kinds: kinds.to_vec(),
            registered: false,
            deadline: Some(Instant::now() + timeout),
        }
    }

    /// Remove a previously registered await for the given kinds.
    pub fn unaware(&self, kinds: &[EventKind]) {
        let mut inner = self.inner.borrow_mut();
        for entry in &mut inner.awaits {
            if entry.fiber == self.id {
                entry.kinds.retain(|k| !kinds.contains(k));
            }
        }
        inner.awaits.retain(|e| !e.kinds.is_empty());
    }

    /// Suspend for at least `duration`; resumption is guaranteed no
    /// earlier than the deadline and no later than the deadline plus one
    /// tick.
    pub fn sleep(&self, duration: Duration) -> SleepWait {
        SleepWait {
            fiber: self.clone(),
            deadline: Instant::now() + duration,
            armed: false,
        }
    }

    /// Return control to the scheduler without waiting on anything.
    pub fn yield_now(&self) -> YieldWait {
        YieldWait {
            fiber: self.clone(),
            yielded: false,
        }
    }

    /// Request the composed command map of all plugins (globals plus the
    /// channel-specific ones for `channel`, when given).  The connection
    /// loop services the request and resumes this fiber with the map.
    pub fn defer_commands(&self, channel: Option<String>) -> DeferWait {
        DeferWait {
            fiber: self.clone(),
            channel: Some(channel),
            requested: false,
        }
    }

    fn arm_timer(&self, deadline: Instant) {
        let mut inner = self.inner.borrow_mut();
        let seq = inner.alloc_seq();
        inner.armed.insert(self.id, seq);
        inner.timers.push(Reverse(TimerEntry {
            deadline,
            seq,
            payload: TimerPayload::Wake {
                fiber: self.id,
                seq,
            },
        }));
    }
}

/// Future returned by [`FiberHandle::await_events`].
pub struct EventWait {
    fiber: FiberHandle,
    kinds: Vec<EventKind>,
    registered: bool,
    deadline: Option<Instant>,
}

impl Future for EventWait {
    type Output = Option<Event>;

    fn poll(mut self: Pin<&mut Self>, _cx: &mut TaskContext<'_>) -> Poll<Option<Event>> {
        let this = &mut *self;
        let id = this.fiber.id;
        if !this.registered {
            // Arm the timeout first so a zero-duration timeout still
            // beats a never-arriving event.
            if let Some(deadline) = this.deadline {
                this.fiber.arm_timer(deadline);
            }
            let mut inner = this.fiber.inner.borrow_mut();
            let seq = inner.alloc_seq();
            inner.awaits.push(AwaitEntry {
                seq,
                fiber: id,
                kinds: this.kinds.clone(),
            });
            this.registered = true;
            return Poll::Pending;
        }
        let mut inner = this.fiber.inner.borrow_mut();
        if let Some(event) = inner.event_box.remove(&id) {
            // Disarm the timeout; a race where it already fired must not
            // leak into a later sleep.
            inner.armed.remove(&id);
            inner.fired.remove(&id);
            return Poll::Ready(Some(event));
        }
        if inner.fired.remove(&id) {
            inner.awaits.retain(|e| e.fiber != id);
            return Poll::Ready(None);
        }
        Poll::Pending
    }
}

/// Future returned by [`FiberHandle::sleep`].
pub struct SleepWait {
    fiber: FiberHandle,
    deadline: Instant,
    armed: bool,
}

impl Future for SleepWait {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, _cx: &mut TaskContext<'_>) -> Poll<()> {
        let this = &mut *self;
        if !this.armed {
            this.fiber.arm_timer(this.deadline);
            this.armed = true;
            return Poll::Pending;
        }
        let mut inner = this.fiber.inner.borrow_mut();
        if inner.fired.remove(&this.fiber.id) {
            Poll::Ready(())
        } else {
            Poll::Pending
        }
    }
}

/// Future returned by [`FiberHandle::yield_now`].
pub struct YieldWait {
    fiber: FiberHandle,
    yielded: bool,
}

impl Future for YieldWait {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, _cx: &mut TaskContext<'_>) -> Poll<()> {
        let this = &mut *self;
        if this.yielded {
            Poll::Ready(())
        } else {
            this.yielded = true;
            this.fiber
                .inner
                .borrow_mut()
                .ready
                .push_back(this.fiber.id);
            Poll::Pending
        }
    }
}

/// Future returned by [`FiberHandle::defer_commands`].
pub struct DeferWait {
    fiber: FiberHandle,
    channel: Option<Option<String>>,
    requested: bool,
}

impl Future for DeferWait {
    type Output = CommandMap;

    fn poll(mut self: Pin<&mut Self>, _cx: &mut TaskContext<'_>) -> Poll<CommandMap> {
        let this = &mut *self;
        let id = this.fiber.id;
        if !this.requested {
            let channel = this.channel.take().unwrap_or_default();
            this.fiber
                .inner
                .borrow_mut()
                .deferred
                .push(DeferredRequest { fiber: id, channel });
            this.requested = true;
            return Poll::Pending;
        }
        match this.fiber.inner.borrow_mut().deferred_box.remove(&id) {
            Some(map) => Poll::Ready(map),
            None => Poll::Pending,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(kind: EventKind) -> Event {
        Event {
            kind,
            ..Event::default()
        }
    }

    #[test]
    fn fibers_resume_fifo_per_event() {
        let sched = Scheduler::new();
        let order = Rc::new(RefCell::new(Vec::new()));
        for name in ["first", "second"] {
            let order = Rc::clone(&order);
            sched.spawn("test", move |fib| async move {
                let ev = fib.await_events(&[EventKind::Chan]).await;
                assert!(ev.is_some());
                order.borrow_mut().push(name);
            });
        }
        sched.pump(16);
        assert!(order.borrow().is_empty());

        // One event resumes exactly one fiber, the FIFO-oldest.
        assert!(sched.deliver(&event(EventKind::Chan)));
        sched.pump(16);
        assert_eq!(*order.borrow(), ["first"]);

        assert!(sched.deliver(&event(EventKind::Chan)));
        sched.pump(16);
        assert_eq!(*order.borrow(), ["first", "second"]);

        // Nobody is waiting any more.
        assert!(!sched.deliver(&event(EventKind::Chan)));
        assert_eq!(sched.fiber_count(), 0);
    }

    #[test]
    fn await_matches_any_listed_kind() {
        let sched = Scheduler::new();
        let seen = Rc::new(RefCell::new(None));
        {
            let seen = Rc::clone(&seen);
            sched.spawn("test", move |fib| async move {
                let ev = fib
                    .await_events(&[EventKind::Join, EventKind::Part])
                    .await
                    .unwrap();
                *seen.borrow_mut() = Some(ev.kind);
            });
        }
        sched.pump(16);
        assert!(!sched.deliver(&event(EventKind::Chan)));
        assert!(sched.deliver(&event(EventKind::Part)));
        sched.pump(16);
        assert_eq!(*seen.borrow(), Some(EventKind::Part));
    }

    #[tokio::test(start_paused = true)]
    async fn sleep_resumes_at_deadline_order() {
        let sched = Scheduler::new();
        let order = Rc::new(RefCell::new(Vec::new()));
        for (name, ms) in [("slow", 50u64), ("fast", 10u64)] {
            let order = Rc::clone(&order);
            sched.spawn("test", move |fib| async move {
                fib.sleep(Duration::from_millis(ms)).await;
                order.borrow_mut().push(name);
            });
        }
        sched.pump(16);
        tokio::time::advance(Duration::from_millis(60)).await;
        sched.run_due_timers(Instant::now());
        sched.pump(16);
        assert_eq!(*order.borrow(), ["fast", "slow"]);
    }

    #[tokio::test(start_paused = true)]
    async fn sleep_never_fires_early() {
        let sched = Scheduler::new();
        let done = Rc::new(RefCell::new(false));
        {
            let done = Rc::clone(&done);
            sched.spawn("test", move |fib| async move {
                fib.sleep(Duration::from_secs(5)).await;
                *done.borrow_mut() = true;
            });
        }
        sched.pump(16);
        tokio::time::advance(Duration::from_secs(4)).await;
        sched.run_due_timers(Instant::now());
        sched.pump(16);
        assert!(!*done.borrow());
        tokio::time::advance(Duration::from_secs(1)).await;
        sched.run_due_timers(Instant::now());
        sched.pump(16);
        assert!(*done.borrow());
    }

    #[tokio::test(start_paused = true)]
    async fn await_with_timeout_returns_none() {
        let sched = Scheduler::new();
        let result = Rc::new(RefCell::new(None));
        {
            let result = Rc::clone(&result);
            sched.spawn("test", move |fib| async move {
                let ev = fib
                    .await_events_timeout(&[EventKind::Pong], Duration::from_secs(1))
                    .await;
                *result.borrow_mut() = Some(ev.is_some());
            });
        }
        sched.pump(16);
        tokio::time::advance(Duration::from_secs(2)).await;
        sched.run_due_timers(Instant::now());
        sched.pump(16);
        assert_eq!(*result.borrow(), Some(false));
        // The await entry is gone: delivery finds nobody.
        assert!(!sched.deliver(&event(EventKind::Pong)));
    }

    #[tokio::test(start_paused = true)]
    async fn await_with_timeout_cancels_timer_on_event() {
        let sched = Scheduler::new();
        let result = Rc::new(RefCell::new(None));
        {
            let result = Rc::clone(&result);
            sched.spawn("test", move |fib| async move {
                let ev = fib
                    .await_events_timeout(&[EventKind::Pong], Duration::from_secs(60))
                    .await;
                *result.borrow_mut() = Some(ev.is_some());
                // Keep living so a stale timer could try to wake us.
                fib.await_events(&[EventKind::Quit]).await;
            });
        }
        sched.pump(16);
        assert!(sched.deliver(&event(EventKind::Pong)));
        sched.pump(16);
        assert_eq!(*result.borrow(), Some(true));
        tokio::time::advance(Duration::from_secs(120)).await;
        sched.run_due_timers(Instant::now());
        // The stale timer must not have readied the fiber.
        assert!(!sched.has_ready());
    }

    #[test]
    fn yield_reschedules_once() {
        let sched = Scheduler::new();
        let steps = Rc::new(RefCell::new(0u32));
        {
            let steps = Rc::clone(&steps);
            sched.spawn("test", move |fib| async move {
                *steps.borrow_mut() += 1;
                fib.yield_now().await;
                *steps.borrow_mut() += 1;
            });
        }
        assert_eq!(sched.pump(1), 1);
        assert_eq!(*steps.borrow(), 1);
        sched.pump(16);
        assert_eq!(*steps.borrow(), 2);
        assert_eq!(sched.fiber_count(), 0);
    }

    #[test]
    fn cancel_owner_drops_fibers_and_awaits() {
        let sched = Scheduler::new();
        sched.spawn("doomed", |fib| async move {
            let _ = fib.await_events(&[EventKind::Chan]).await;
            unreachable!("cancelled fiber must not resume");
        });
        sched.spawn("kept", |fib| async move {
            let _ = fib.await_events(&[EventKind::Chan]).await;
        });
        sched.pump(16);
        sched.cancel_owner("doomed");
        assert_eq!(sched.fiber_count(), 1);
        // The kept fiber is now FIFO-oldest and gets the event.
        assert!(sched.deliver(&event(EventKind::Chan)));
        sched.pump(16);
        assert_eq!(sched.fiber_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn delay_call_runs_outside_fibers() {
        let sched = Scheduler::new();
        let hits = Rc::new(RefCell::new(0u32));
        let hits2 = Rc::clone(&hits);
        sched.delay_call(
            Duration::from_millis(10),
            Box::new(move || *hits2.borrow_mut() += 1),
        );
        tokio::time::advance(Duration::from_millis(20)).await;
        assert_eq!(sched.run_due_timers(Instant::now()), 1);
        assert_eq!(*hits.borrow(), 1);
    }

    #[test]
    fn deferred_request_round_trip() {
        let sched = Scheduler::new();
        let got = Rc::new(RefCell::new(None));
        {
            let got = Rc::clone(&got);
            sched.spawn("help", move |fib| async move {
                let map = fib.defer_commands(Some("#hall".to_owned())).await;
                *got.borrow_mut() = Some(map.len());
            });
        }
        sched.pump(16);
        let requests = sched.take_deferred();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].channel.as_deref(), Some("#hall"));
        sched.fulfill_deferred(requests[0].fiber, CommandMap::new());
        sched.pump(16);
        assert_eq!(*got.borrow(), Some(0));
    }
}
