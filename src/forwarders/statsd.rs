//! Fire-and-forget StatsD counters over UDP.
//!
//! See here for the line format: https://github.com/b/statsd_spec#metric-types--formats

use std::io;
use std::net::{SocketAddr, ToSocketAddrs, UdpSocket};

use super::Forwarder;
use crate::error::TransportError;
use crate::metrics::Metric;

/// Sends one datagram per metric to a StatsD server.
pub struct StatsdForwarder {
    socket: UdpSocket,
    target: SocketAddr,
}

impl StatsdForwarder {
    pub fn new(host: &str, port: u16) -> Result<StatsdForwarder, TransportError> {
        let address = format!("{}:{}", host, port);
        let resolve_error = |err| TransportError::Resolve(address.clone(), err);

        let target = (host, port)
            .to_socket_addrs()
            .map_err(resolve_error)?
            .next()
            .ok_or_else(|| resolve_error(io::Error::new(io::ErrorKind::NotFound, "no addresses")))?;

        let bind: SocketAddr = if target.is_ipv4() {
            ([0, 0, 0, 0], 0).into()
        } else {
            ([0u16; 8], 0).into()
        };
        let socket = UdpSocket::bind(bind).map_err(resolve_error)?;

        tracing::info!(target = %target, "sending metrics to statsd");

        Ok(StatsdForwarder { socket, target })
    }

    pub fn target(&self) -> SocketAddr {
        self.target
    }
}

impl Forwarder for StatsdForwarder {
    fn forward_metric(&mut self, metric: &Metric) -> Result<(), TransportError> {
        let line = metric.to_string();

        self.socket
            .send_to(line.as_bytes(), self.target)
            .map(|_| ())
            .map_err(|source| TransportError::Send {
                metric: metric.name.clone(),
                source,
            })
    }
}
