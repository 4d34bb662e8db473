//! Keeps peer trees convergent: wire commands, the transport seam, the
//! retrying publisher, and the replaying consumer.

pub mod bus;
pub mod command;
pub mod consumer;
pub mod publisher;

pub use bus::{InProcessBus, MessageBus};
pub use command::{Command, Verb};
pub use consumer::{replay, spawn_consumer};
pub use publisher::{PublishOutcome, PublishStatus, Publisher, RETRY_ATTEMPTS, RETRY_DELAY};
