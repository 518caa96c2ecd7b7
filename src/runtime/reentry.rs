//! Blocking waits that keep the host responsive.
//!
//! A managed wait issued from the host thread (for example `Task.Wait()`) may depend on a
//! pool thread that is itself blocked on a host callback. To break that cycle the host loop
//! installs a *pump* on its thread; [`wait_until`] runs pending host work through the pump
//! while it waits. Threads without a pump simply block on the condition variable.

use std::{
    cell::RefCell,
    rc::Rc,
    sync::{Condvar, Mutex},
    time::{Duration, Instant},
};

/// Runs at most one pending host job, returning true if one ran
pub type Pump = Rc<dyn Fn() -> bool>;

thread_local! {
    static PUMP: RefCell<Option<Pump>> = const { RefCell::new(None) };
}

const PUMP_SLICE: Duration = Duration::from_millis(1);
const BLOCK_SLICE: Duration = Duration::from_millis(20);

/// Installs the pump for the current thread, replacing any previous one
pub fn install(pump: Pump) {
    PUMP.with(|slot| *slot.borrow_mut() = Some(pump));
}

/// Removes the current thread's pump
pub fn uninstall() {
    let _ = PUMP.try_with(|slot| slot.borrow_mut().take());
}

/// True when the current thread has a pump installed
#[must_use]
pub fn has_pump() -> bool {
    PUMP.try_with(|slot| slot.borrow().is_some())
        .unwrap_or(false)
}

/// Runs one pending host job on this thread, if there is a pump and a job
pub fn pump_once() -> bool {
    let pump = PUMP
        .try_with(|slot| slot.borrow().clone())
        .ok()
        .flatten();
    pump.is_some_and(|pump| pump())
}

/// Blocks until `done` holds for the guarded state or the timeout elapses, pumping host
/// work while waiting when called on a host thread.
///
/// ## Arguments
/// * `lock`    - Mutex guarding the state
/// * `signal`  - Condition variable notified on state changes
/// * `done`    - Completion predicate
/// * `timeout` - Upper bound on the wait, `None` waits indefinitely
///
/// Returns true if `done` was satisfied.
pub fn wait_until<T, F>(lock: &Mutex<T>, signal: &Condvar, mut done: F, timeout: Option<Duration>) -> bool
where
    F: FnMut(&T) -> bool,
{
    let deadline = timeout.map(|timeout| Instant::now() + timeout);
    let pumping = has_pump();

    loop {
        let guard = lock!(lock);
        if done(&guard) {
            return true;
        }

        let now = Instant::now();
        if deadline.is_some_and(|deadline| now >= deadline) {
            return false;
        }

        let slice = if pumping { PUMP_SLICE } else { BLOCK_SLICE };
        let slice = deadline.map_or(slice, |deadline| slice.min(deadline - now));

        if pumping {
            drop(guard);
            if pump_once() {
                continue;
            }
            let guard = lock!(lock);
            let _ = signal.wait_timeout(guard, slice);
        } else {
            let _ = signal.wait_timeout(guard, slice);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{
        cell::Cell,
        sync::{Arc, Condvar, Mutex},
        time::Duration,
    };

    use super::*;

    #[test]
    fn test_wait_without_pump() {
        let state = Arc::new((Mutex::new(false), Condvar::new()));
        let remote = state.clone();
        std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(10));
            *remote.0.lock().unwrap() = true;
            remote.1.notify_all();
        });

        assert!(wait_until(&state.0, &state.1, |done| *done, Some(Duration::from_secs(5))));
    }

    #[test]
    fn test_wait_times_out() {
        let lock = Mutex::new(false);
        let signal = Condvar::new();
        assert!(!wait_until(&lock, &signal, |done| *done, Some(Duration::from_millis(5))));
    }

    #[test]
    fn test_wait_pumps_host_work() {
        let lock = Arc::new(Mutex::new(0));
        let signal = Condvar::new();
        let pumped = Rc::new(Cell::new(0));

        let counter = pumped.clone();
        let state = lock.clone();
        install(Rc::new(move || {
            counter.set(counter.get() + 1);
            *state.lock().unwrap() += 1;
            true
        }));
        assert!(has_pump());

        assert!(wait_until(&lock, &signal, |n| *n >= 3, Some(Duration::from_secs(5))));
        assert_eq!(pumped.get(), 3);

        uninstall();
        assert!(!has_pump());
        assert!(!pump_once());
    }
}
