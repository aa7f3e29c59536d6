//! Handlers wired into this worker.

mod clicks;
mod email;

use cosmo_nats::{Registry, StartPosition, StreamHandlerOptions};

pub use clicks::ClickCounter;
pub use email::EmailJob;

/// Register every handler this worker runs. Registration happens before the
/// engine starts; the registry is read-only afterwards.
pub fn build_registry() -> Registry {
    let mut registry = Registry::new();

    registry.register_job("EmailJob", || EmailJob);

    registry.register_stream(
        "click_counter",
        ClickCounter::new(),
        StreamHandlerOptions::new("events")
            .with_subjects(vec!["events.clicks.>".to_string()])
            .with_consumer_name("click-counter")
            .with_batch_size(100)
            .with_start_position(StartPosition::First),
    );

    registry
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_has_all_handlers() {
        let registry = build_registry();
        assert!(registry.job_factory("EmailJob").is_some());
        assert!(registry.stream_registrations().contains_key("click_counter"));
    }
}
