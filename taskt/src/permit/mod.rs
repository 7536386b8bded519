//! Server-wide execution gate.
//!
//! The gate holds exactly one slot. `try_acquire` never waits: it either
//! hands out the slot as a [`GatePermit`] or reports that a task is already
//! running. The permit returns the slot when released or dropped, so a
//! slot can only be released by the task that acquired it.

mod gate;

pub use gate::{ExecutionGate, GatePermit};
