//! Domain event mechanics: envelopes, the event trait and the in-process bus.
//!
//! Business event types live with their domains; this crate only moves them.

pub mod bus;
pub mod envelope;
pub mod event;
pub mod in_memory_bus;

pub use bus::{EventBus, Subscription};
pub use envelope::EventEnvelope;
pub use event::Event;
pub use in_memory_bus::{InMemoryBusError, InMemoryEventBus};
