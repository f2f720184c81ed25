//! Forwarders deliver metric increments to a metrics collector.

pub mod statsd;

use crate::error::TransportError;
use crate::metrics::Metric;

pub trait Forwarder {
    /// Sends a single increment. No batching and no retries.
    fn forward_metric(&mut self, metric: &Metric) -> Result<(), TransportError>;
}
