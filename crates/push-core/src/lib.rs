//! Core domain logic for the push service: the ordered message buffer, the
//! in-memory and external-store channel variants, the bucketed registry,
//! the Ketama hash router, and configuration.

pub mod buffer;
pub mod channel;
pub mod config;
pub mod error;
pub mod hash;
pub mod message;
pub mod pool;
pub mod registry;

pub use buffer::OrderedBuffer;
pub use channel::{Channel, ConnId, MessageSink};
pub use config::Config;
pub use error::PushError;
pub use hash::HashRouter;
pub use message::{now_ns, Message};
pub use registry::Registry;
