//! Concurrent FIFO queues for producer/consumer pipelines
//!
//! - `blocking`: Mutex + condvar guarded MPMC queue with optional bound, timed
//!   `take` and one-way `unblock`
//! - `ring`: Wait-free single-producer single-consumer ring buffer split into
//!   `Producer` / `Consumer` handles
//!
//! Enable the `loom` feature to model-check the ring queue:
//!
//! ```text
//! cargo test -p conveyor-concurrent --features loom --lib
//! ```

pub mod blocking;
pub mod ring;
mod sync;

pub use blocking::BlockingQueue;
pub use ring::{Consumer, Producer, RingQueue};

use thiserror::Error;

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum QueueError {
    #[error("capacity {requested} is below the minimum of {minimum}")]
    InvalidCapacity { requested: usize, minimum: usize },

    #[error("failed to allocate ring storage for {capacity} slots")]
    Allocation { capacity: usize },
}

pub type QueueResult<T> = Result<T, QueueError>;
