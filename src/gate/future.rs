//! Asynchronous entry into a gate.

use super::{Gate, Pass};
use crate::error::Error;
use futures_core::future::FusedFuture;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

/// Future returned by [`Gate::enter_async`].
///
/// Resolves to a [`Pass`] once the gate is open. Dropping the future while it is still waiting removes it from the
/// gate's wait set; the worker is never counted as in flight.
#[must_use = "futures do nothing unless polled"]
pub struct Entering<'a> {
    gate: &'a Gate,

    /// Slot in the gate's waker set, if this future has registered one.
    key: Option<u64>,

    done: bool,
}

impl<'a> Entering<'a> {
    pub(super) fn new(gate: &'a Gate) -> Self {
        Self {
            gate,
            key: None,
            done: false,
        }
    }
}

impl<'a> Future for Entering<'a> {
    type Output = Result<Pass<'a>, Error>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let gate = self.gate;

        if self.done {
            panic!("`Entering` polled after completion");
        }

        let mut state = match gate.inner.state.lock_clearing() {
            Ok(state) => state,

            // Only a task that was already waiting was interrupted by the panic.
            Err(e) if self.key.is_some() => {
                if let Some(key) = self.key.take() {
                    e.into_inner().wakers.remove(key);
                }
                self.done = true;
                return Poll::Ready(Err(Error::Poisoned));
            }

            Err(e) => e.into_inner(),
        };

        if state.closed {
            let key = state.wakers.register(self.key, cx.waker());
            self.key = Some(key);
            return Poll::Pending;
        }

        // An open gate may still hold our slot if a previous open raced with a re-poll.
        if let Some(key) = self.key.take() {
            state.wakers.remove(key);
        }

        self.done = true;
        Poll::Ready(Ok(gate.admit(state)))
    }
}

impl FusedFuture for Entering<'_> {
    fn is_terminated(&self) -> bool {
        self.done
    }
}

impl Drop for Entering<'_> {
    fn drop(&mut self) {
        if let Some(key) = self.key.take() {
            self.gate.inner.state.lock().wakers.remove(key);
        }
    }
}

impl fmt::Debug for Entering<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Entering")
            .field("gate", &self.gate.inner.name)
            .field("done", &self.done)
            .finish()
    }
}
