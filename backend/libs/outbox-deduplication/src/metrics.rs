use prometheus::{IntCounter, IntGauge, Opts};
use std::time::Duration;
use tracing::warn;

#[derive(Clone)]
pub struct CleanupMetrics {
    pub deleted: IntCounter,
    pub failures: IntCounter,
    pub escalations: IntCounter,
    pub next_delay_ms: IntGauge,
}

impl CleanupMetrics {
    pub fn new(service: &str) -> Self {
        let registry = prometheus::default_registry();

        let deleted = IntCounter::with_opts(
            Opts::new(
                "outbox_cleanup_deleted_total",
                "Total number of expired outbox records removed by the cleaner",
            )
            .const_label("service", service.to_string()),
        )
        .expect("valid metric opts for outbox_cleanup_deleted_total");

        let failures = IntCounter::with_opts(
            Opts::new(
                "outbox_cleanup_failures_total",
                "Total number of failed outbox cleanup attempts",
            )
            .const_label("service", service.to_string()),
        )
        .expect("valid metric opts for outbox_cleanup_failures_total");

        let escalations = IntCounter::with_opts(
            Opts::new(
                "outbox_cleanup_escalations_total",
                "Number of critical errors raised after consecutive cleanup failures",
            )
            .const_label("service", service.to_string()),
        )
        .expect("valid metric opts for outbox_cleanup_escalations_total");

        let next_delay_ms = IntGauge::with_opts(
            Opts::new(
                "outbox_cleanup_next_delay_ms",
                "Delay in milliseconds before the next outbox cleanup",
            )
            .const_label("service", service.to_string()),
        )
        .expect("valid metric opts for outbox_cleanup_next_delay_ms");

        for metric in [
            Box::new(deleted.clone()) as Box<dyn prometheus::core::Collector>,
            Box::new(failures.clone()),
            Box::new(escalations.clone()),
            Box::new(next_delay_ms.clone()),
        ] {
            if let Err(e) = registry.register(metric) {
                warn!("Failed to register outbox cleanup metric: {}", e);
            }
        }

        Self {
            deleted,
            failures,
            escalations,
            next_delay_ms,
        }
    }

    pub(crate) fn observe_delay(&self, delay: Duration) {
        self.next_delay_ms
            .set(i64::try_from(delay.as_millis()).unwrap_or(i64::MAX));
    }
}
