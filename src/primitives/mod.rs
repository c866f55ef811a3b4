//! # Concurrency Primitives
//!
//! Distributed semaphore and mutex built purely on [`Machine::send`]: the
//! held-slot count is a machine's state, so the store's commit-tag fencing is
//! the only synchronization involved.
//!
//! [`Machine::send`]: crate::engine::Machine::send

pub mod mutex;
pub mod semaphore;

pub use mutex::{Mutex, MutexGuard};
pub use semaphore::{
    semaphore_schematic, semaphore_schematic_name, PrimitiveEngine, Semaphore, SemaphoreSlot,
    ENTER, EXIT,
};
