//! Job Queue Transport: a durable FIFO with ack/nack, per-message
//! retry counting, and dead-letter routing, backed by Fjall.

mod error;
mod keys;
mod store;

pub use error::{QueueError, Result};
pub use store::{DeadLetterEnvelope, Dequeued, Envelope, FjallQueue, MAX_RETRIES};
