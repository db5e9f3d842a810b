//! Placing a gate inline in a pipeline of stages.
//!
//! A pipeline hands units of work from one stage to the next. A [`Barrier`] is a stage that owns a [`Gate`] and the
//! stage after it: every unit passing through is admitted by the gate before being forwarded, and the gate itself is
//! controlled by [`Signal`]s travelling down the same pipeline.

use crate::error::PassError;
use crate::gate::Gate;
use log::debug;
use std::fmt;

/// A step in a pipeline that accepts units of work.
pub trait Stage<M> {
    /// Value handed back to the caller once the unit has been handled.
    type Output;

    /// Error produced when the unit could not be handled.
    type Error;

    /// Handle one unit of work.
    fn handle(&self, unit: M) -> Result<Self::Output, Self::Error>;
}

impl<M, O, E, F> Stage<M> for F
where
    F: Fn(M) -> Result<O, E>,
{
    type Output = O;
    type Error = E;

    fn handle(&self, unit: M) -> Result<O, E> {
        self(unit)
    }
}

/// Control signals understood by a barrier.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Signal {
    /// Stop admitting new units.
    Close,

    /// Resume admitting units.
    Open,
}

/// Anything that can travel through a pipeline containing a barrier.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Event<M> {
    /// A unit of work, subject to the barrier's gate.
    Message(M),

    /// A control signal for the barrier. Never held back by the gate.
    Signal(Signal),
}

impl<M> From<Signal> for Event<M> {
    fn from(signal: Signal) -> Self {
        Event::Signal(signal)
    }
}

/// A pipeline stage that holds units back while closed.
pub struct Barrier<S> {
    gate: Gate,
    next: S,
}

impl<S> Barrier<S> {
    /// Create a barrier in front of the given stage, using a new open gate.
    pub fn new(next: S) -> Self {
        Self::with_gate(Gate::new(), next)
    }

    /// Create a barrier in front of the given stage, using an existing gate.
    pub fn with_gate(gate: Gate, next: S) -> Self {
        Self {
            gate,
            next,
        }
    }

    /// The gate controlling this barrier, for inspection.
    pub fn gate(&self) -> &Gate {
        &self.gate
    }

    /// The stage units are forwarded to.
    pub fn next(&self) -> &S {
        &self.next
    }

    /// Returns `true` if the barrier is currently holding back new units.
    pub fn is_closed(&self) -> bool {
        self.gate.is_closed()
    }

    /// Returns the number of units currently being handled past this barrier.
    pub fn in_flight(&self) -> usize {
        self.gate.in_flight()
    }

    /// Apply a control signal.
    ///
    /// Safe to call from inside the next stage while it is handling a unit.
    pub fn signal(&self, signal: Signal) {
        let changed = match signal {
            Signal::Close => self.gate.close(),
            Signal::Open => self.gate.open(),
        };

        if !changed {
            debug!("{}: ignoring {:?}, already in that state", self.gate.name(), signal);
        }
    }

    /// Wait for the gate to open, then forward a unit to the next stage and return its result.
    ///
    /// The unit counts as in flight for the whole time the next stage is handling it, and stops counting however
    /// that ends, including by panicking.
    pub fn pass_through<M>(&self, unit: M) -> Result<S::Output, PassError<S::Error>>
    where
        S: Stage<M>,
    {
        let _pass = self.gate.enter()?;
        self.next.handle(unit).map_err(PassError::Stage)
    }

    /// Route an event: messages pass through the gate, signals are applied to it.
    ///
    /// Returns the next stage's output for messages and `None` for signals.
    pub fn handle_event<M>(&self, event: Event<M>) -> Result<Option<S::Output>, PassError<S::Error>>
    where
        S: Stage<M>,
    {
        match event {
            Event::Message(unit) => self.pass_through(unit).map(Some),
            Event::Signal(signal) => {
                self.signal(signal);
                Ok(None)
            }
        }
    }
}

impl<M, S: Stage<M>> Stage<Event<M>> for Barrier<S> {
    type Output = Option<S::Output>;
    type Error = PassError<S::Error>;

    fn handle(&self, event: Event<M>) -> Result<Self::Output, Self::Error> {
        self.handle_event(event)
    }
}

impl<S> fmt::Debug for Barrier<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Barrier").field("gate", &self.gate).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use std::panic::{self, AssertUnwindSafe};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn forwards_result_of_next_stage() {
        let barrier = Barrier::new(|x: u32| Ok::<_, ()>(x * 2));

        assert_eq!(barrier.pass_through(21u32).unwrap(), 42);
        assert_eq!(barrier.in_flight(), 0);
    }

    #[test]
    fn next_stage_error_is_returned_unchanged() {
        let barrier = Barrier::new(|_: ()| Err::<(), _>("boom"));

        match barrier.pass_through(()) {
            Err(PassError::Stage(e)) => assert_eq!(e, "boom"),
            other => panic!("unexpected result: {:?}", other),
        }

        assert_eq!(barrier.in_flight(), 0);
    }

    #[test]
    fn panicking_stage_still_exits() {
        let barrier = Barrier::new(|_: ()| -> Result<(), ()> { panic!("stage failed") });

        let result = panic::catch_unwind(AssertUnwindSafe(|| barrier.pass_through(())));

        assert!(result.is_err());
        assert_eq!(barrier.in_flight(), 0);
    }

    #[test]
    fn counts_unit_as_in_flight_while_handled() {
        let gate = Gate::new();
        let seen = Arc::new(AtomicUsize::new(0));

        let barrier = {
            let gate = gate.clone();
            let seen = seen.clone();
            Barrier::with_gate(gate.clone(), move |_: ()| {
                seen.store(gate.in_flight(), Ordering::SeqCst);
                Ok::<_, ()>(())
            })
        };

        barrier.pass_through(()).unwrap();

        assert_eq!(seen.load(Ordering::SeqCst), 1);
        assert_eq!(gate.in_flight(), 0);
    }

    #[test]
    fn signals_toggle_gate() {
        let barrier = Barrier::new(|_: ()| Ok::<_, ()>(()));

        barrier.signal(Signal::Close);
        barrier.signal(Signal::Close);
        assert!(barrier.is_closed());

        barrier.signal(Signal::Open);
        assert!(!barrier.is_closed());
    }

    #[test]
    fn signal_events_are_never_gated() {
        let barrier = Barrier::new(|x: u8| Ok::<_, ()>(x));

        assert_eq!(barrier.handle(Event::<u8>::Signal(Signal::Close)).unwrap(), None);
        assert!(barrier.is_closed());

        assert_eq!(barrier.handle(Event::<u8>::from(Signal::Open)).unwrap(), None);
        assert_eq!(barrier.handle(Event::Message(7u8)).unwrap(), Some(7));
    }

    #[test]
    fn barriers_compose() {
        let inner = Barrier::new(|x: u8| Ok::<_, ()>(x + 1));
        let outer = Barrier::new(inner);

        assert_eq!(outer.pass_through(Event::Message(1u8)).unwrap(), Some(2));

        outer.pass_through(Event::<u8>::Signal(Signal::Close)).unwrap();
        assert!(outer.next().is_closed());
        assert!(!outer.is_closed());

        assert_eq!(outer.next().gate().enter_timeout(Duration::from_millis(1)).unwrap_err(), Error::TimedOut);
    }
}
