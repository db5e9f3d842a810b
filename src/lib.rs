//! A closable entry gate for pipelines, keeping count of the threads currently past it.
//!
//! A [`Gate`] lets a control authority stop the flow of work through a point in a pipeline, hold new arrivals until it
//! is opened again, and observe how many workers are still busy inside. A [`Barrier`](stack::Barrier) wraps a gate as
//! a pipeline stage.
mod error;
pub mod gate;
mod internal;
pub mod stack;

pub use crate::error::{Error, PassError};
pub use crate::gate::{Gate, GateBuilder, Pass};
