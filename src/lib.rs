//! Tails an nginx access log, turns every line into a record according to
//! its `log_format`, and forwards per-request counters to StatsD.
//!
//! The pipeline is a chain of iterators pulled by the `Distributor`:
//!
//! ```text
//! reader -> pipeline::pre_filter -> pipeline::parse_log -> pipeline::post_filter -> Distributor
//! ```

#[macro_use]
extern crate lazy_static;

pub mod config;
pub mod distributor;
pub mod error;
pub mod forwarders;
pub mod logging;
pub mod metrics;
pub mod parsers;
pub mod pipeline;
pub mod reader;
pub mod record;
pub mod shutdown;

pub use config::{Config, Settings};
pub use distributor::{Distributor, Summary, TransportPolicy};
pub use error::{ConfigError, RunError};

use forwarders::statsd::StatsdForwarder;
use shutdown::Shutdown;

/// Runs the streaming pipeline described by `config` until the source is
/// exhausted or `shutdown` is triggered.
pub fn process_log(config: &Config, shutdown: &Shutdown) -> Result<Summary, RunError> {
    let pattern = config.log_format.compile()?;
    let lines = config.source.open(config.poll_interval, shutdown)?;
    let forwarder = StatsdForwarder::new(&config.statsd_host, config.statsd_port)?;

    let records = pipeline::records(lines, &pattern, config.pre_filter.as_ref(), config.filter.as_ref());
    let mut distributor = Distributor::new(forwarder, config.naming.clone(), config.transport_policy);

    distributor.run(records)
}
