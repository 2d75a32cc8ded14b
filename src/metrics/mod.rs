//! Metrics emission.

pub mod events;

/// Emit an internal event as a metric.
#[macro_export]
macro_rules! emit {
    ($event:expr) => {
        <_ as $crate::metrics::events::InternalEvent>::emit($event)
    };
}
