use chrono::{DateTime, Utc};

/// A domain event.
///
/// Events are immutable facts published after the state change they describe
/// has committed. The payload must carry every field a subscriber needs so
/// that no subscriber has to read back state that may have moved on.
pub trait Event: Clone + core::fmt::Debug + Send + Sync + 'static {
    /// Stable event type tag (e.g. `"TRANSFER_COMPLETED"`). Subscribers
    /// register against this value.
    fn event_type(&self) -> &'static str;

    /// Schema version for this event type.
    fn version(&self) -> u32;

    /// When the event occurred (business time).
    fn occurred_at(&self) -> DateTime<Utc>;
}
