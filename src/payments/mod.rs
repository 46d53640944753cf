//! Payment processor integration: inbound signed events, outbound API calls,
//! and the idempotent event processing pipeline.

mod gateway;
pub mod processor;
pub mod signature;
pub mod withdraw;

pub use gateway::PaymentGateway;
pub use processor::{process_event, replay_dead_letter, Ack};
