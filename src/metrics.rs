//! Metrics and tracing hooks for the relation engine.
//!
//! With the `metrics` feature a lazily built OpenTelemetry meter exports to a Prometheus
//! registry; scrape it with [`LinkManyMetrics::gather`]. With the `tracing` feature
//! [`tracing_helpers`] provides the spans the engine opens around fill, validate and commit.

#[cfg(feature = "metrics")]
pub use self::otel::{LinkManyMetrics, METRICS};

#[cfg(feature = "metrics")]
mod otel {
    use crate::staging::ChangeKind;
    use once_cell::sync::Lazy;
    use opentelemetry::{
        metrics::{Counter, Histogram, MeterProvider as _},
        KeyValue,
    };
    use opentelemetry_sdk::metrics::SdkMeterProvider;
    use prometheus::{Registry, TextEncoder};
    use std::time::Duration;

    pub static METRICS: Lazy<LinkManyMetrics> = Lazy::new(LinkManyMetrics::init);

    pub struct LinkManyMetrics {
        pub registry: Registry,
        pub provider: SdkMeterProvider,
        pub staged_changes: Counter<u64>,
        pub commits_total: Counter<u64>,
        pub commit_failures: Counter<u64>,
        pub commit_duration: Histogram<f64>,
    }

    impl LinkManyMetrics {
        pub fn init() -> Self {
            let registry = Registry::new();
            let exporter = opentelemetry_prometheus::exporter()
                .with_registry(registry.clone())
                .build()
                .expect("failed to build prometheus exporter");
            let provider = SdkMeterProvider::builder().with_reader(exporter).build();
            let meter = provider.meter("linkmany");

            let staged_changes = meter.u64_counter("linkmany_staged_changes_total")
                .with_description("Related entities staged by fill, by change kind").build();

            let commits_total = meter.u64_counter("linkmany_commits_total")
                .with_description("Relation commits executed").build();

            let commit_failures = meter.u64_counter("linkmany_commit_failures_total")
                .with_description("Relations whose commit failed").build();

            let commit_duration = meter.f64_histogram("linkmany_commit_duration_seconds")
                .with_description("Duration of relation commits").build();

            Self {
                registry,
                provider,
                staged_changes,
                commits_total,
                commit_failures,
                commit_duration,
            }
        }

        pub fn record_staged(&self, relation: &str, kind: ChangeKind, count: usize) {
            if count > 0 {
                self.staged_changes.add(
                    count as u64,
                    &[
                        KeyValue::new("relation", relation.to_string()),
                        KeyValue::new("kind", kind.as_str()),
                    ],
                );
            }
        }

        pub fn record_commit(&self, elapsed: Duration) {
            self.commits_total.add(1, &[]);
            self.commit_duration.record(elapsed.as_secs_f64(), &[]);
        }

        pub fn record_commit_failure(&self, relation: &str) {
            self.commit_failures
                .add(1, &[KeyValue::new("relation", relation.to_string())]);
        }

        /// Prometheus text exposition of everything recorded so far
        pub fn gather(&self) -> Result<String, prometheus::Error> {
            let mut buffer = String::new();
            TextEncoder::new().encode_utf8(&self.registry.gather(), &mut buffer)?;
            Ok(buffer)
        }
    }
}

#[cfg(feature = "tracing")]
pub mod tracing_helpers {
    use tracing::Span;

    pub fn fill_span(model: &str) -> Span {
        tracing::info_span!("linkmany.fill", model = model)
    }

    pub fn validate_span(model: &str) -> Span {
        tracing::info_span!("linkmany.validate", model = model)
    }

    pub fn commit_span(model: &str) -> Span {
        tracing::info_span!("linkmany.commit", model = model)
    }

    pub fn commit_relation_span(relation: &str) -> Span {
        tracing::debug_span!("linkmany.commit_relation", relation = relation)
    }
}
