//! Media helpers: audio codec work and the blocking worker pool it runs on.

pub mod codec;
pub mod pool;

pub use codec::{AudioCodec, DecodeError};
pub use pool::{WorkerError, WorkerPool};
