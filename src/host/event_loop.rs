//! The host event loop.
//!
//! The host language is single threaded: every host function, callback and timer runs on
//! the thread that owns the loop. Other threads reach that thread only by posting a
//! [`HostJob`] through a [`HostDispatcher`]; the job runs the next time the loop turns.
//!
//! # Turning the Loop
//!
//! | Call | Returns when |
//! |------|--------------|
//! | [`EventLoop::run_pending`] | queued jobs and due timers have run |
//! | [`EventLoop::run_for`] | the duration elapsed |
//! | [`EventLoop::run_until`] | the predicate holds or the timeout elapsed |
//! | [`EventLoop::run`] | no jobs, no timers and no outstanding operations remain |
//!
//! A job or timer that fails stops the turn; its error is returned from the run call.
//!
//! # Re-entrancy
//!
//! Creating a loop installs a [`reentry`] pump on its thread, so a managed wait issued
//! from host code keeps draining host jobs while it blocks. Errors of jobs run through the
//! pump are held back and returned by the next run call.

use std::{
    cell::{Cell, RefCell},
    collections::{BTreeMap, VecDeque},
    fmt,
    rc::{Rc, Weak},
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc,
    },
    thread::ThreadId,
    time::{Duration, Instant},
};

use crossbeam_channel::{bounded, unbounded, Receiver, RecvTimeoutError, Sender, TryRecvError};
use tracing::{debug, trace, warn};

use crate::{runtime::reentry, Error, Result};

/// Work posted to the host thread
pub type HostJob = Box<dyn FnOnce() -> Result<()> + Send>;

type TimerJob = Box<dyn FnOnce() -> Result<()>>;

/// Upper bound on a single blocking wait inside [`EventLoop::run`], so closing is noticed
const IDLE_SLICE: Duration = Duration::from_millis(50);

thread_local! {
    static CURRENT: RefCell<Option<EventLoop>> = const { RefCell::new(None) };
}

/// Identifies a timer created by [`EventLoop::set_timeout`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerId(u64);

/// Counts an asynchronous operation as outstanding until dropped.
///
/// [`EventLoop::run`] keeps waiting while any guard is alive. Guards travel with the
/// completion job, so a job that is dropped unrun still releases its guard.
pub struct OutstandingGuard {
    counter: Arc<AtomicUsize>,
}

impl Drop for OutstandingGuard {
    fn drop(&mut self) {
        self.counter.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Thread-safe handle for posting work to one host loop
#[derive(Clone)]
pub struct HostDispatcher {
    sender: Sender<HostJob>,
    outstanding: Arc<AtomicUsize>,
    closed: Arc<AtomicBool>,
    thread: ThreadId,
}

impl HostDispatcher {
    /// Queues `job` for the host thread
    ///
    /// # Errors
    /// [`Error::LoopClosed`] when the loop has shut down.
    pub fn post(&self, job: HostJob) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(Error::LoopClosed);
        }
        self.sender.send(job).map_err(|_| Error::LoopClosed)?;
        trace!("posted host job");
        Ok(())
    }

    /// Runs `work` on the host thread and waits for its result.
    ///
    /// Called on the host thread itself, `work` runs immediately.
    ///
    /// # Errors
    /// [`Error::LoopClosed`] when the loop shuts down before running `work`.
    pub fn call<T, F>(&self, work: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce() -> T + Send + 'static,
    {
        if self.is_host_thread() {
            return Ok(work());
        }

        let (reply, result) = bounded(1);
        self.post(Box::new(move || {
            let _ = reply.send(work());
            Ok(())
        }))?;
        result.recv().map_err(|_| Error::LoopClosed)
    }

    /// True when called on the loop's own thread
    #[must_use]
    pub fn is_host_thread(&self) -> bool {
        std::thread::current().id() == self.thread
    }

    /// True once the loop has shut down
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Marks one asynchronous operation as outstanding
    #[must_use]
    pub fn track(&self) -> OutstandingGuard {
        self.outstanding.fetch_add(1, Ordering::AcqRel);
        OutstandingGuard {
            counter: self.outstanding.clone(),
        }
    }
}

impl fmt::Debug for HostDispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostDispatcher")
            .field("thread", &self.thread)
            .field("closed", &self.is_closed())
            .finish()
    }
}

struct LoopInner {
    dispatcher: HostDispatcher,
    receiver: RefCell<Option<Receiver<HostJob>>>,
    timers: RefCell<BTreeMap<(Instant, u64), TimerJob>>,
    next_timer: Cell<u64>,
    deferred: RefCell<VecDeque<Error>>,
}

impl LoopInner {
    fn try_next(&self) -> Option<HostJob> {
        let receiver = self.receiver.borrow();
        match receiver.as_ref()?.try_recv() {
            Ok(job) => Some(job),
            Err(TryRecvError::Empty | TryRecvError::Disconnected) => None,
        }
    }

    fn wait_next(&self, timeout: Duration) -> Option<HostJob> {
        let receiver = self.receiver.borrow();
        match receiver.as_ref()?.recv_timeout(timeout) {
            Ok(job) => Some(job),
            Err(RecvTimeoutError::Timeout | RecvTimeoutError::Disconnected) => None,
        }
    }

    fn take_due_timer(&self, now: Instant) -> Option<TimerJob> {
        let mut timers = self.timers.borrow_mut();
        let key = *timers.keys().next()?;
        if key.0 > now {
            return None;
        }
        timers.remove(&key)
    }

    fn next_deadline(&self) -> Option<Instant> {
        self.timers.borrow().keys().next().map(|(when, _)| *when)
    }

    fn take_deferred(&self) -> Result<()> {
        match self.deferred.borrow_mut().pop_front() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

/// The event loop of one host thread.
///
/// `EventLoop` is a cheap handle; every handle obtained on a thread through
/// [`EventLoop::current`] refers to the same loop. It is not `Send`: work from other threads
/// goes through [`EventLoop::dispatcher`].
///
/// # Example
///
/// ```rust
/// use std::time::Duration;
/// use dotbridge::host::EventLoop;
///
/// let event_loop = EventLoop::current();
/// let dispatcher = event_loop.dispatcher();
///
/// std::thread::spawn(move || {
///     dispatcher.post(Box::new(|| Ok(()))).unwrap();
/// });
///
/// assert!(event_loop.run_until(|| false, Duration::from_millis(50)).is_ok());
/// ```
#[derive(Clone)]
pub struct EventLoop {
    inner: Rc<LoopInner>,
}

impl EventLoop {
    /// The loop of the calling thread, created on first use
    #[must_use]
    pub fn current() -> EventLoop {
        if let Some(existing) = CURRENT.with(|slot| slot.borrow().clone()) {
            return existing;
        }

        let (sender, receiver) = unbounded();
        let event_loop = EventLoop {
            inner: Rc::new(LoopInner {
                dispatcher: HostDispatcher {
                    sender,
                    outstanding: Arc::new(AtomicUsize::new(0)),
                    closed: Arc::new(AtomicBool::new(false)),
                    thread: std::thread::current().id(),
                },
                receiver: RefCell::new(Some(receiver)),
                timers: RefCell::new(BTreeMap::new()),
                next_timer: Cell::new(1),
                deferred: RefCell::new(VecDeque::new()),
            }),
        };

        let weak: Weak<LoopInner> = Rc::downgrade(&event_loop.inner);
        reentry::install(Rc::new(move || {
            let Some(inner) = weak.upgrade() else {
                return false;
            };
            let Some(job) = inner.try_next() else {
                return false;
            };
            if let Err(error) = job() {
                inner.deferred.borrow_mut().push_back(error);
            }
            true
        }));

        debug!("host event loop created");
        CURRENT.with(|slot| *slot.borrow_mut() = Some(event_loop.clone()));
        event_loop
    }

    /// A thread-safe handle for posting work to this loop
    #[must_use]
    pub fn dispatcher(&self) -> HostDispatcher {
        self.inner.dispatcher.clone()
    }

    /// Queues `error` to be returned by the next run call on this loop
    pub(crate) fn defer(&self, error: Error) {
        self.inner.deferred.borrow_mut().push_back(error);
    }

    /// Number of jobs waiting to run
    #[must_use]
    pub fn pending(&self) -> usize {
        self.inner
            .receiver
            .borrow()
            .as_ref()
            .map_or(0, Receiver::len)
    }

    /// Number of asynchronous operations that have not delivered their completion yet
    #[must_use]
    pub fn outstanding(&self) -> usize {
        self.inner.dispatcher.outstanding.load(Ordering::Acquire)
    }

    /// Number of armed timers
    #[must_use]
    pub fn timers(&self) -> usize {
        self.inner.timers.borrow().len()
    }

    /// Runs `callback` once after `delay`, during a later turn of the loop
    pub fn set_timeout<F>(&self, delay: Duration, callback: F) -> TimerId
    where
        F: FnOnce() -> Result<()> + 'static,
    {
        let id = self.inner.next_timer.get();
        self.inner.next_timer.set(id + 1);
        self.inner
            .timers
            .borrow_mut()
            .insert((Instant::now() + delay, id), Box::new(callback));
        trace!(timer = id, ?delay, "timer armed");
        TimerId(id)
    }

    /// Disarms a timer, returning false when it already fired or was cleared
    pub fn clear_timeout(&self, timer: TimerId) -> bool {
        let mut timers = self.inner.timers.borrow_mut();
        let key = timers.keys().find(|(_, id)| *id == timer.0).copied();
        key.and_then(|key| timers.remove(&key)).is_some()
    }

    /// Runs every job queued so far and every due timer
    ///
    /// Returns the number of jobs and timers run.
    ///
    /// # Errors
    /// The first error raised by a job or timer.
    pub fn run_pending(&self) -> Result<usize> {
        self.inner.take_deferred()?;

        let mut ran = 0;
        while let Some(timer) = self.inner.take_due_timer(Instant::now()) {
            ran += 1;
            timer()?;
        }

        let queued = self.pending();
        for _ in 0..queued {
            let Some(job) = self.inner.try_next() else {
                break;
            };
            ran += 1;
            job()?;
        }
        Ok(ran)
    }

    /// Waits up to `timeout` for one job or timer and runs it
    fn turn(&self, timeout: Duration) -> Result<bool> {
        self.inner.take_deferred()?;

        let now = Instant::now();
        if let Some(timer) = self.inner.take_due_timer(now) {
            timer()?;
            return Ok(true);
        }

        let wait = self
            .inner
            .next_deadline()
            .map_or(timeout, |deadline| timeout.min(deadline.saturating_duration_since(now)));
        match self.inner.wait_next(wait) {
            Some(job) => {
                job()?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Turns the loop for `duration`
    ///
    /// Returns the number of jobs and timers run.
    ///
    /// # Errors
    /// The first error raised by a job or timer.
    pub fn run_for(&self, duration: Duration) -> Result<usize> {
        let deadline = Instant::now() + duration;
        let mut ran = self.run_pending()?;
        loop {
            let now = Instant::now();
            if now >= deadline {
                self.inner.take_deferred()?;
                return Ok(ran);
            }
            if self.turn(deadline - now)? {
                ran += 1;
            }
        }
    }

    /// Turns the loop until `done` holds or `timeout` elapses
    ///
    /// Returns whether `done` held.
    ///
    /// # Errors
    /// The first error raised by a job or timer.
    pub fn run_until<F>(&self, mut done: F, timeout: Duration) -> Result<bool>
    where
        F: FnMut() -> bool,
    {
        let deadline = Instant::now() + timeout;
        self.run_pending()?;
        loop {
            if done() {
                self.inner.take_deferred()?;
                return Ok(true);
            }
            let now = Instant::now();
            if now >= deadline {
                self.inner.take_deferred()?;
                return Ok(false);
            }
            self.turn((deadline - now).min(IDLE_SLICE))?;
        }
    }

    /// Turns the loop until it is idle: no queued jobs, no timers and no outstanding
    /// asynchronous operations
    ///
    /// Returns the number of jobs and timers run.
    ///
    /// # Errors
    /// The first error raised by a job or timer.
    pub fn run(&self) -> Result<usize> {
        let mut ran = self.run_pending()?;
        while !self.is_idle() {
            if self.is_closed() {
                return Err(Error::LoopClosed);
            }
            if self.turn(IDLE_SLICE)? {
                ran += 1;
            }
        }
        self.inner.take_deferred()?;
        Ok(ran)
    }

    fn is_idle(&self) -> bool {
        self.pending() == 0 && self.timers() == 0 && self.outstanding() == 0
    }

    /// Shuts the loop down.
    ///
    /// Queued jobs are dropped unrun and later posts fail with [`Error::LoopClosed`]. The
    /// next [`EventLoop::current`] on this thread creates a fresh loop.
    pub fn close(&self) {
        self.inner.dispatcher.closed.store(true, Ordering::Release);
        let dropped = self
            .inner
            .receiver
            .borrow_mut()
            .take()
            .map_or(0, |receiver| receiver.len());
        if dropped > 0 {
            warn!(jobs = dropped, "host event loop closed with pending jobs");
        }
        self.inner.timers.borrow_mut().clear();

        let _ = CURRENT.try_with(|slot| {
            let mut slot = slot.borrow_mut();
            if slot.as_ref().is_some_and(|current| Rc::ptr_eq(&current.inner, &self.inner)) {
                *slot = None;
            }
        });
        reentry::uninstall();
        debug!("host event loop closed");
    }

    /// True once [`EventLoop::close`] was called
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.dispatcher.is_closed()
    }
}

impl fmt::Debug for EventLoop {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventLoop")
            .field("pending", &self.pending())
            .field("timers", &self.timers())
            .field("outstanding", &self.outstanding())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use super::*;

    #[test]
    fn test_jobs_run_on_host_thread() {
        let event_loop = EventLoop::current();
        let dispatcher = event_loop.dispatcher();
        let host = std::thread::current().id();
        let seen = Rc::new(Cell::new(false));

        let worker = std::thread::spawn(move || {
            assert!(!dispatcher.is_host_thread());
            dispatcher.call(move || std::thread::current().id()).unwrap()
        });

        let flag = seen.clone();
        event_loop.set_timeout(Duration::from_millis(1), move || {
            flag.set(true);
            Ok(())
        });
        assert!(event_loop.run_until(|| seen.get(), Duration::from_secs(5)).unwrap());
        event_loop.run_for(Duration::from_millis(20)).unwrap();
        assert_eq!(worker.join().unwrap(), host);
    }

    #[test]
    fn test_job_errors_are_returned() {
        let event_loop = EventLoop::current();
        let dispatcher = event_loop.dispatcher();
        dispatcher
            .post(Box::new(|| Err(Error::HostError("boom".into()))))
            .unwrap();
        assert_eq!(
            event_loop.run_pending(),
            Err(Error::HostError("boom".into()))
        );
        assert_eq!(event_loop.run_pending(), Ok(0));
    }

    #[test]
    fn test_deferred_error_is_returned_once() {
        let event_loop = EventLoop::current();
        let dispatcher = event_loop.dispatcher();
        dispatcher
            .post(Box::new(|| {
                EventLoop::current().defer(Error::HostError("late".into()));
                Ok(())
            }))
            .unwrap();
        assert_eq!(
            event_loop.run_for(Duration::from_millis(20)),
            Err(Error::HostError("late".into()))
        );
        assert_eq!(event_loop.run(), Ok(0));
    }

    #[test]
    fn test_clear_timeout() {
        let event_loop = EventLoop::current();
        let fired = Rc::new(Cell::new(0));
        let counter = fired.clone();
        let timer = event_loop.set_timeout(Duration::ZERO, move || {
            counter.set(counter.get() + 1);
            Ok(())
        });
        assert!(event_loop.clear_timeout(timer));
        assert!(!event_loop.clear_timeout(timer));
        event_loop.run().unwrap();
        assert_eq!(fired.get(), 0);
    }

    #[test]
    fn test_run_waits_for_outstanding_work() {
        let event_loop = EventLoop::current();
        let dispatcher = event_loop.dispatcher();
        let done = Arc::new(AtomicUsize::new(0));

        let guard = dispatcher.track();
        let counter = done.clone();
        std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            let remote = dispatcher.clone();
            remote
                .post(Box::new(move || {
                    drop(guard);
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }))
                .unwrap();
        });

        event_loop.run().unwrap();
        assert_eq!(done.load(Ordering::SeqCst), 1);
        assert_eq!(event_loop.outstanding(), 0);
    }

    #[test]
    fn test_closed_loop_rejects_work() {
        let event_loop = EventLoop::current();
        let dispatcher = event_loop.dispatcher();
        event_loop.close();
        assert!(event_loop.is_closed());
        assert_eq!(dispatcher.post(Box::new(|| Ok(()))), Err(Error::LoopClosed));

        let worker = std::thread::spawn(move || dispatcher.call(|| 1));
        assert_eq!(worker.join().unwrap(), Err(Error::LoopClosed));

        let fresh = EventLoop::current();
        assert!(!fresh.is_closed());
    }
}
