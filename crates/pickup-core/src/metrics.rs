//! Business counters.
//!
//! A [`Metrics`] handle keeps in-process totals per counter and label. With
//! the `metrics` feature every increment is also added to the OpenTelemetry
//! counters registered through [`install`]; until then the mirror is a no-op.

use parking_lot::Mutex;
use std::{collections::BTreeMap, sync::Arc};

/// Orders handed to their customer.
pub const ISSUED_ORDERS: &str = "issued_orders_total";
/// Returns created, by a customer or by the expiration sweep.
pub const CREATED_RETURNS: &str = "created_returns_total";

/// `status` label of [`ISSUED_ORDERS`].
pub const ISSUED: &str = "issued";
/// `status` label of [`CREATED_RETURNS`] for customer returns.
pub const CREATED: &str = "created";
/// `status` label of [`CREATED_RETURNS`] for returns made by the sweep.
pub const EXPIRED: &str = "expired";

type Counts = BTreeMap<(&'static str, &'static str), u64>;

#[derive(Clone, Default)]
pub struct Metrics {
    counts: Arc<Mutex<Counts>>,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn order_issued(&self) {
        self.add(ISSUED_ORDERS, ISSUED);
    }

    pub fn return_created(&self, status: &'static str) {
        self.add(CREATED_RETURNS, status);
    }

    /// Current total of `counter` with the given `status` label.
    pub fn count(&self, counter: &str, status: &str) -> u64 {
        self.counts
            .lock()
            .iter()
            .find(|((name, label), _)| *name == counter && *label == status)
            .map_or(0, |(_, total)| *total)
    }

    fn add(&self, counter: &'static str, status: &'static str) {
        *self.counts.lock().entry((counter, status)).or_default() += 1;
        mirror(counter, status);
    }
}

#[cfg(feature = "metrics")]
mod otel {
    use opentelemetry::{
        KeyValue,
        metrics::{Counter, Meter},
    };
    use std::sync::OnceLock;

    static ISSUED_ORDERS: OnceLock<Counter<u64>> = OnceLock::new();
    static CREATED_RETURNS: OnceLock<Counter<u64>> = OnceLock::new();

    /// Registers the counters on `meter`. Later calls are ignored.
    pub fn install(meter: &Meter) {
        let _ = ISSUED_ORDERS.set(
            meter
                .u64_counter(super::ISSUED_ORDERS)
                .with_description("Orders issued to customers")
                .build(),
        );
        let _ = CREATED_RETURNS.set(
            meter
                .u64_counter(super::CREATED_RETURNS)
                .with_description("Returns created")
                .build(),
        );
    }

    pub(super) fn add(counter: &'static str, status: &'static str) {
        let handle = match counter {
            super::ISSUED_ORDERS => &ISSUED_ORDERS,
            super::CREATED_RETURNS => &CREATED_RETURNS,
            _ => return,
        };
        if let Some(counter) = handle.get() {
            counter.add(1, &[KeyValue::new("status", status)]);
        }
    }
}

#[cfg(feature = "metrics")]
pub use otel::install;

#[cfg(feature = "metrics")]
fn mirror(counter: &'static str, status: &'static str) {
    otel::add(counter, status);
}

#[cfg(not(feature = "metrics"))]
fn mirror(_counter: &'static str, _status: &'static str) {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_are_kept_per_label() {
        let metrics = Metrics::new();
        metrics.order_issued();
        metrics.order_issued();
        metrics.clone().return_created(EXPIRED);

        assert_eq!(metrics.count(ISSUED_ORDERS, ISSUED), 2);
        assert_eq!(metrics.count(CREATED_RETURNS, EXPIRED), 1);
        assert_eq!(metrics.count(CREATED_RETURNS, CREATED), 0);
    }
}
