//! Participant accounting exported as OpenTelemetry metrics.
//!
//! Every [`CooperationPoint`] is a [`ParticipantSource`]. The composition root
//! collects the points it wires and hands them to
//! [`register_participant_gauge`], which reports one observation per active
//! key on every collection cycle.

use std::collections::HashMap;
use std::sync::Arc;

use opentelemetry::metrics::{Meter, ObservableGauge};
use opentelemetry::KeyValue;

use crate::CooperationPoint;

/// Name of the gauge registered by [`register_participant_gauge`].
pub const PARTICIPANTS_GAUGE: &str = "cooperation.participants";

/// Anything that can report per-key participant counts.
pub trait ParticipantSource: Send + Sync {
    /// Scope label attached to every observation from this source.
    fn scope(&self) -> &str;

    /// Participant count per active key label.
    fn thread_count_per_key(&self) -> HashMap<String, usize>;
}

impl<T, E> ParticipantSource for CooperationPoint<T, E>
where
    T: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    fn scope(&self) -> &str {
        self.id().as_str()
    }

    fn thread_count_per_key(&self) -> HashMap<String, usize> {
        CooperationPoint::thread_count_per_key(self)
    }
}

/// Registers an observable gauge reporting the participants of every active
/// key across `sources`, tagged with `scope` and `key` attributes.
///
/// Keys with nothing in flight simply stop being reported.
pub fn register_participant_gauge(
    meter: &Meter,
    sources: Vec<Arc<dyn ParticipantSource>>,
) -> ObservableGauge<u64> {
    meter
        .u64_observable_gauge(PARTICIPANTS_GAUGE)
        .with_description("Participants (leader plus followers) cooperating on each in-flight key")
        .with_unit("{participant}")
        .with_callback(move |observer| {
            for source in &sources {
                for (label, count) in source.thread_count_per_key() {
                    observer.observe(
                        count as u64,
                        &[
                            KeyValue::new("scope", source.scope().to_owned()),
                            KeyValue::new("key", label),
                        ],
                    );
                }
            }
        })
        .build()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::CooperationPointFactory;

    #[test]
    fn points_report_through_the_trait() {
        let point: CooperationPoint<u32, String> = CooperationPointFactory::default()
            .configure()
            .build("metrics-test")
            .unwrap();
        let source: Arc<dyn ParticipantSource> = Arc::new(point);
        assert_eq!(source.scope(), "metrics-test");
        assert!(source.thread_count_per_key().is_empty());
    }

    #[test]
    fn gauge_registers_against_the_global_meter() {
        let point: CooperationPoint<u32, String> = CooperationPointFactory::default()
            .configure()
            .build("metrics-test")
            .unwrap();
        let meter = opentelemetry::global::meter("cooperation-tests");
        let _gauge = register_participant_gauge(&meter, vec![Arc::new(point)]);
    }
}
