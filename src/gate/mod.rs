//! A closable entry gate that counts the threads currently inside it.
//!
//! Workers call [`Gate::enter`] before doing a unit of gated work and hold on to the returned [`Pass`] until the work
//! is done. A control path may [`close`](Gate::close) the gate at any time; from then on new workers are held at the
//! entrance until it is [`open`](Gate::open)ed again, while workers already inside carry on undisturbed.
//!
//! Closing never waits for the workers inside to leave. That makes it safe for a worker that is itself in flight to
//! close the gate it passed through. Waiting for the inside to empty out is a separate, bounded operation,
//! [`Gate::drain`].
//!
//! ```
//! use lockgate::Gate;
//!
//! let gate = Gate::new();
//!
//! let pass = gate.enter().unwrap();
//! assert_eq!(gate.in_flight(), 1);
//!
//! gate.close();
//! assert!(gate.try_enter().is_none());
//!
//! drop(pass);
//! assert_eq!(gate.in_flight(), 0);
//! ```

use crate::error::Error;
use crate::internal::sync::{Monitor, WakerSet};
use log::{debug, trace, warn};
use std::fmt;
use std::sync::{Arc, MutexGuard, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

mod future;

pub use self::future::Entering;

/// Creates new gates with configurable properties.
#[derive(Clone, Debug, Default)]
pub struct GateBuilder {
    name: Option<String>,
    max_close_time: Option<Duration>,
}

impl GateBuilder {
    /// Set a name for the gate, used to tell gates apart in log output.
    pub fn name(&mut self, name: impl Into<String>) -> &mut Self {
        self.name = Some(name.into());
        self
    }

    /// Set the longest time the gate may stay closed before it reopens by itself.
    ///
    /// By default a closed gate stays closed until [`Gate::open`] is called, no matter how long that takes.
    pub fn max_close_time(&mut self, max_close_time: Duration) -> &mut Self {
        self.max_close_time = Some(max_close_time);
        self
    }

    /// Create a new open gate using the current settings.
    pub fn build(&self) -> Gate {
        Gate {
            inner: Arc::new(Inner {
                name: self.name.clone().unwrap_or_else(|| String::from("gate")),
                max_close_time: self.max_close_time,
                state: Monitor::new(State::default()),
            }),
        }
    }
}

/// A closable gate tracking how many workers are currently inside.
///
/// Cloning a gate produces another handle to the same gate.
#[derive(Clone)]
pub struct Gate {
    inner: Arc<Inner>,
}

/// Shared data between all handles of a gate.
struct Inner {
    name: String,
    max_close_time: Option<Duration>,
    state: Monitor<State>,
}

/// Everything protected by the gate's lock. Always read and written as one unit.
#[derive(Default)]
struct State {
    closed: bool,

    /// Number of workers that entered and have not exited yet.
    in_flight: usize,

    /// Number of threads parked on the condition variable waiting for the gate to open.
    parked: usize,

    /// Number of threads waiting for `in_flight` to reach zero.
    draining: usize,

    /// Incremented on every transition to closed, so a stale reopen timer can tell it no longer applies.
    epoch: u64,

    /// Tasks waiting for the gate to open.
    wakers: WakerSet,
}

impl Default for Gate {
    fn default() -> Self {
        Self::new()
    }
}

impl Gate {
    /// Create a new open gate with the default configuration.
    pub fn new() -> Self {
        Self::builder().build()
    }

    /// Get a builder for configuring a new gate.
    pub fn builder() -> GateBuilder {
        GateBuilder::default()
    }

    /// The name this gate uses in log output.
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Returns `true` if new workers are currently being held at the entrance.
    pub fn is_closed(&self) -> bool {
        self.inner.state.lock().closed
    }

    /// Returns the number of workers currently inside the gate.
    ///
    /// This is a snapshot; other threads may enter or exit immediately after it is taken.
    pub fn in_flight(&self) -> usize {
        self.inner.state.lock().in_flight
    }

    /// Returns the number of workers currently held at the entrance, both threads and tasks.
    pub fn waiting(&self) -> usize {
        let state = self.inner.state.lock();
        state.parked + state.wakers.len()
    }

    /// Stop admitting new workers.
    ///
    /// Workers already inside are not affected and this never waits for them, so it may be called from inside the
    /// gate. Returns `false` if the gate was already closed, in which case nothing changes.
    pub fn close(&self) -> bool {
        let epoch = {
            let mut state = self.inner.state.lock();

            if state.closed {
                return false;
            }

            state.closed = true;
            state.epoch = state.epoch.wrapping_add(1);

            debug!("{}: closed with {} in flight", self.inner.name, state.in_flight);

            state.epoch
        };

        if let Some(deadline) = self.reopen_deadline() {
            self.spawn_reopen_timer(epoch, deadline);
        }

        true
    }

    /// Start admitting workers again, waking up every worker held at the entrance.
    ///
    /// Returns `false` if the gate was already open, in which case nothing changes and nobody is woken.
    pub fn open(&self) -> bool {
        let state = self.inner.state.lock();

        if !state.closed {
            return false;
        }

        debug!("{}: opened, releasing {} waiting", self.inner.name, state.parked + state.wakers.len());

        self.inner.release(state);
        true
    }

    /// Enter the gate, blocking the current thread for as long as the gate is closed.
    ///
    /// The returned pass keeps this worker counted as in flight until it is dropped.
    ///
    /// If another thread panics while holding the gate's lock during the wait, this worker gives up with
    /// [`Error::Poisoned`] and is not counted. The gate itself keeps working.
    pub fn enter(&self) -> Result<Pass<'_>, Error> {
        let mut state = self.inner.state.lock_fresh();

        if state.closed {
            state.parked += 1;

            while state.closed {
                state = match self.inner.state.wait(state) {
                    Ok(state) => state,
                    Err(e) => {
                        e.into_inner().parked -= 1;
                        warn!("{}: lock poisoned while waiting to enter", self.inner.name);
                        return Err(Error::Poisoned);
                    }
                };
            }

            state.parked -= 1;
        }

        Ok(self.admit(state))
    }

    /// Enter the gate only if it is open right now, without blocking.
    pub fn try_enter(&self) -> Option<Pass<'_>> {
        let state = self.inner.state.lock();

        if state.closed {
            None
        } else {
            Some(self.admit(state))
        }
    }

    /// Enter the gate, blocking for at most the given duration while it is closed.
    ///
    /// A duration too large to express as a deadline waits without limit, like [`enter`](Gate::enter).
    pub fn enter_timeout(&self, timeout: Duration) -> Result<Pass<'_>, Error> {
        match Instant::now().checked_add(timeout) {
            Some(deadline) => self.enter_deadline(deadline),
            None => self.enter(),
        }
    }

    /// Enter the gate, blocking until at most the given instant while it is closed.
    ///
    /// If the deadline passes first, [`Error::TimedOut`] is returned and the worker is not counted.
    pub fn enter_deadline(&self, deadline: Instant) -> Result<Pass<'_>, Error> {
        let mut state = self.inner.state.lock_fresh();

        if state.closed {
            state.parked += 1;

            while state.closed {
                let now = Instant::now();

                if now >= deadline {
                    state.parked -= 1;
                    trace!("{}: entry timed out", self.inner.name);
                    return Err(Error::TimedOut);
                }

                state = match self.inner.state.wait_timeout(state, deadline - now) {
                    Ok((state, _)) => state,
                    Err(e) => {
                        e.into_inner().0.parked -= 1;
                        warn!("{}: lock poisoned while waiting to enter", self.inner.name);
                        return Err(Error::Poisoned);
                    }
                };
            }

            state.parked -= 1;
        }

        Ok(self.admit(state))
    }

    /// Enter the gate asynchronously.
    ///
    /// The returned future resolves once the gate is open. Dropping it before then abandons the attempt without the
    /// worker ever being counted.
    pub fn enter_async(&self) -> Entering<'_> {
        Entering::new(self)
    }

    /// Wait for every worker currently inside the gate to exit, for at most the given duration.
    ///
    /// Usually called after [`close`](Gate::close) to let the inside empty out. A worker that is itself in flight
    /// counts towards the total, so calling this from inside the gate can only time out.
    pub fn drain(&self, timeout: Duration) -> Result<(), Error> {
        // No deadline when the timeout is too large to express as one.
        let deadline = Instant::now().checked_add(timeout);
        let mut state = self.inner.state.lock_fresh();

        if state.in_flight == 0 {
            return Ok(());
        }

        debug!("{}: draining {} in flight", self.inner.name, state.in_flight);
        state.draining += 1;

        while state.in_flight > 0 {
            let result = match deadline {
                Some(deadline) => {
                    let now = Instant::now();

                    if now >= deadline {
                        state.draining -= 1;
                        debug!("{}: drain timed out with {} in flight", self.inner.name, state.in_flight);
                        return Err(Error::TimedOut);
                    }

                    match self.inner.state.wait_timeout(state, deadline - now) {
                        Ok((state, _)) => Ok(state),
                        Err(e) => Err(e.into_inner().0),
                    }
                }
                None => self.inner.state.wait(state).map_err(PoisonError::into_inner),
            };

            state = match result {
                Ok(state) => state,
                Err(mut state) => {
                    state.draining -= 1;
                    warn!("{}: lock poisoned while draining", self.inner.name);
                    return Err(Error::Poisoned);
                }
            };
        }

        state.draining -= 1;
        Ok(())
    }

    /// Count a worker as in flight. The caller must hold the lock and have seen the gate open.
    fn admit<'a>(&'a self, mut state: MutexGuard<'_, State>) -> Pass<'a> {
        debug_assert!(!state.closed);

        state.in_flight += 1;
        trace!("{}: entered, {} in flight", self.inner.name, state.in_flight);

        Pass {
            gate: self,
        }
    }

    fn exit(&self) {
        let mut state = self.inner.state.lock();

        debug_assert!(state.in_flight > 0, "gate exited more times than entered");
        state.in_flight -= 1;
        trace!("{}: exited, {} in flight", self.inner.name, state.in_flight);

        if state.in_flight == 0 && state.draining > 0 {
            self.inner.state.notify_all();
        }
    }

    /// When a close happening now should be undone by the reopen timer, if at all.
    fn reopen_deadline(&self) -> Option<Instant> {
        let max_close_time = self.inner.max_close_time?;
        let deadline = Instant::now().checked_add(max_close_time);

        if deadline.is_none() {
            debug!(
                "{}: max close time {:?} is unbounded, not starting reopen timer",
                self.inner.name, max_close_time
            );
        }

        deadline
    }

    fn spawn_reopen_timer(&self, epoch: u64, deadline: Instant) {
        let inner = self.inner.clone();

        let spawned = thread::Builder::new()
            .name(format!("{}-reopen", self.inner.name))
            .spawn(move || inner.reopen_at(epoch, deadline));

        // Without the timer the gate simply behaves as if no maximum was configured.
        if let Err(e) = spawned {
            warn!("{}: failed to start reopen timer: {}", self.inner.name, e);
        }
    }
}

impl Inner {
    /// Open the gate and wake everything waiting on it. Consumes the lock so the wakers run after it is released.
    fn release(&self, mut state: MutexGuard<'_, State>) {
        state.closed = false;
        let wakers = state.wakers.take();

        self.state.notify_all();
        drop(state);

        for waker in wakers {
            waker.wake();
        }
    }

    /// Body of the reopen timer started by a close. The deadline is fixed by the close, not by when the timer runs.
    fn reopen_at(&self, epoch: u64, deadline: Instant) {
        let mut state = self.state.lock();

        loop {
            if !state.closed || state.epoch != epoch {
                return;
            }

            let now = Instant::now();

            if now >= deadline {
                break;
            }

            state = match self.state.wait_timeout(state, deadline - now) {
                Ok((state, _)) => state,
                Err(e) => e.into_inner().0,
            };
        }

        warn!(
            "{}: closed for longer than {:?}, reopening with {} waiting",
            self.name,
            self.max_close_time.unwrap_or_default(),
            state.parked + state.wakers.len()
        );

        self.release(state);
    }
}

impl fmt::Debug for Gate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.lock();

        f.debug_struct("Gate")
            .field("name", &self.inner.name)
            .field("closed", &state.closed)
            .field("in_flight", &state.in_flight)
            .finish()
    }
}

/// Proof that a worker is inside a gate.
///
/// The worker stays counted as in flight until the pass is dropped, which happens on every way out of the gated work,
/// including unwinding from a panic.
#[must_use = "the worker exits the gate as soon as the pass is dropped"]
pub struct Pass<'a> {
    gate: &'a Gate,
}

impl<'a> Pass<'a> {
    /// The gate this pass was issued by.
    pub fn gate(&self) -> &'a Gate {
        self.gate
    }

    /// Exit the gate. Equivalent to dropping the pass.
    pub fn exit(self) {}
}

impl Drop for Pass<'_> {
    fn drop(&mut self) {
        self.gate.exit();
    }
}

impl fmt::Debug for Pass<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pass").field("gate", &self.gate.inner.name).finish()
    }
}
