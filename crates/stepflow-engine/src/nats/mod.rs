//! NATS JetStream adapters for the message bus.
//!
//! The engine publishes step and dispatch messages through [`NatsBus`] and
//! consumes submissions, steps and worker responses through [`NatsConsumer`].

pub mod publisher;
pub mod subscriber;

pub use publisher::NatsBus;
pub use subscriber::NatsConsumer;
