use std::fmt;
use std::sync::{Condvar, Mutex};

/// Error returned by [`Semaphore::acquire`] once the pool has been closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolClosed;

impl fmt::Display for PoolClosed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("permit pool closed")
    }
}

impl std::error::Error for PoolClosed {}

struct State {
    free: usize,
    in_flight: usize,
    peak: usize,
    closed: bool,
}

/// Counting permit pool bounding how many chunk copies run at once.
///
/// Permits are acquired before a copy starts and released when its
/// [`Permit`] guard drops, on every exit path. `close()` wakes all
/// blocked waiters and makes further acquisition fail; permits already
/// handed out stay valid until dropped.
pub struct Semaphore {
    state: Mutex<State>,
    available: Condvar,
}

impl Semaphore {
    pub fn new(permits: usize) -> Self {
        Self {
            state: Mutex::new(State {
                free: permits.max(1),
                in_flight: 0,
                peak: 0,
                closed: false,
            }),
            available: Condvar::new(),
        }
    }

    /// Block until a permit is free, or fail if the pool was closed.
    pub fn acquire(&self) -> Result<Permit<'_>, PoolClosed> {
        let mut state = self.state.lock().unwrap();
        loop {
            if state.closed {
                return Err(PoolClosed);
            }
            if state.free > 0 {
                state.free -= 1;
                state.in_flight += 1;
                state.peak = state.peak.max(state.in_flight);
                return Ok(Permit { pool: self });
            }
            state = self.available.wait(state).unwrap();
        }
    }

    /// Wake all waiters and refuse further acquisition.
    pub fn close(&self) {
        self.state.lock().unwrap().closed = true;
        self.available.notify_all();
    }

    /// Highest number of permits held simultaneously so far.
    pub fn peak_in_flight(&self) -> usize {
        self.state.lock().unwrap().peak
    }

    fn release(&self) {
        let mut state = self.state.lock().unwrap();
        state.free += 1;
        state.in_flight -= 1;
        drop(state);
        self.available.notify_one();
    }
}

/// RAII permit handle; releases its slot back to the pool on drop.
pub struct Permit<'a> {
    pool: &'a Semaphore,
}

impl Drop for Permit<'_> {
    fn drop(&mut self) {
        self.pool.release();
    }
}
