use std::io;
use std::str::FromStr;

use crate::error::{RunError, TransportError};
use crate::forwarders::Forwarder;
use crate::metrics::MetricNaming;
use crate::record::Record;

/// What to do when a metric cannot be delivered.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TransportPolicy {
    /// Stop the pipeline with the transport error.
    Fatal,
    /// Log a warning, drop the metric and carry on.
    Log,
}

impl FromStr for TransportPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<TransportPolicy, String> {
        match s {
            "fatal" => Ok(TransportPolicy::Fatal),
            "log" => Ok(TransportPolicy::Log),
            other => Err(format!("unknown transport error policy {:?}", other)),
        }
    }
}

/// Totals for one run of the pipeline.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Summary {
    pub records: u64,
    pub sent: u64,
    pub dropped: u64,
}

/// Turns records into counter increments and hands them to a forwarder,
/// one send per counter.
pub struct Distributor<F> {
    forwarder: F,
    naming: MetricNaming,
    policy: TransportPolicy,
    summary: Summary,
}

impl<F: Forwarder> Distributor<F> {
    pub fn new(forwarder: F, naming: MetricNaming, policy: TransportPolicy) -> Distributor<F> {
        Distributor {
            forwarder,
            naming,
            policy,
            summary: Summary::default(),
        }
    }

    pub fn summary(&self) -> Summary {
        self.summary
    }

    pub fn into_forwarder(self) -> F {
        self.forwarder
    }

    /// Emits the counters for a single record.
    pub fn record(&mut self, record: &Record) -> Result<(), TransportError> {
        self.summary.records += 1;

        for metric in self.naming.metrics_for(record) {
            match self.forwarder.forward_metric(&metric) {
                Ok(()) => self.summary.sent += 1,
                Err(err) => match self.policy {
                    TransportPolicy::Fatal => return Err(err),
                    TransportPolicy::Log => {
                        tracing::warn!(error = %err, metric = %metric.name, "dropping metric");
                        self.summary.dropped += 1;
                    }
                },
            }
        }

        Ok(())
    }

    /// Pulls records until the source is exhausted (or shut down).
    pub fn run<I>(&mut self, records: I) -> Result<Summary, RunError>
    where
        I: Iterator<Item = io::Result<Record>>,
    {
        for record in records {
            self.record(&record?)?;
        }

        tracing::info!(
            records = self.summary.records,
            sent = self.summary.sent,
            dropped = self.summary.dropped,
            "access log finished"
        );
        Ok(self.summary)
    }
}
