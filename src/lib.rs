pub mod error;

mod durable;
mod ringbuf;

pub use durable::DurableRingBuffer;
pub use error::Error;
pub use error::Result;
pub use ringbuf::Packets;
pub use ringbuf::MAX_BATCH;
