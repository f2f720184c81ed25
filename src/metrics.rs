use std::fmt;

use crate::error::ConfigError;
use crate::record::{Record, Value};

/// Counter increment produced for an accepted record.
#[derive(Clone, Debug, PartialEq)]
pub struct Metric {
    pub name: String,
    pub value: u64,
}

impl Metric {
    pub fn count<S: Into<String>>(name: S) -> Metric {
        Metric {
            name: name.into(),
            value: 1,
        }
    }
}

impl fmt::Display for Metric {
    /// StatsD counter line, e.g. `web01.nginx.qps:1|c`.
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}:{}|c", self.name, self.value)
    }
}

pub const DEFAULT_RESERVED_LABEL: &str = "wechat";
pub const DEFAULT_RESERVED_QPS: &str = "{host}.nginx.qps";
pub const DEFAULT_RESERVED_STATUS: &str = "{host}.nginx.status_code.{status}";
pub const DEFAULT_QPS: &str = "{host}.{vhost}_nginx.qps";
pub const DEFAULT_STATUS: &str = "{host}.{vhost}_nginx.status_code.{status}";

#[derive(Clone, Copy, Debug, PartialEq)]
enum Placeholder {
    Host,
    Vhost,
    Status,
}

#[derive(Clone, Debug, PartialEq)]
enum Part {
    Text(String),
    Field(Placeholder),
}

/// A metric name with `{host}`, `{vhost}` and `{status}` placeholders.
#[derive(Clone, Debug, PartialEq)]
pub struct NameTemplate {
    source: String,
    parts: Vec<Part>,
}

impl NameTemplate {
    pub fn parse(source: &str) -> Result<NameTemplate, ConfigError> {
        let invalid = |reason: &str| ConfigError::MetricTemplate {
            template: source.to_owned(),
            reason: reason.to_owned(),
        };

        let mut parts = vec![];
        let mut rest = source;

        while let Some(start) = rest.find('{') {
            if start > 0 {
                parts.push(Part::Text(rest[..start].to_owned()));
            }
            let end = rest[start..]
                .find('}')
                .map(|i| start + i)
                .ok_or_else(|| invalid("unterminated placeholder"))?;

            let placeholder = match &rest[start + 1..end] {
                "host" => Placeholder::Host,
                "vhost" => Placeholder::Vhost,
                "status" => Placeholder::Status,
                _ => return Err(invalid("unknown placeholder")),
            };
            parts.push(Part::Field(placeholder));
            rest = &rest[end + 1..];
        }
        if !rest.is_empty() {
            parts.push(Part::Text(rest.to_owned()));
        }
        if parts.is_empty() {
            return Err(invalid("empty metric name"));
        }

        Ok(NameTemplate {
            source: source.to_owned(),
            parts,
        })
    }

    fn uses(&self, placeholder: Placeholder) -> bool {
        self.parts.contains(&Part::Field(placeholder))
    }

    fn render(&self, host: &str, vhost: &str, status: Option<&Value>) -> String {
        let mut name = String::new();

        for part in &self.parts {
            match *part {
                Part::Text(ref text) => name.push_str(text),
                Part::Field(Placeholder::Host) => name.push_str(host),
                Part::Field(Placeholder::Vhost) => name.push_str(vhost),
                Part::Field(Placeholder::Status) => {
                    if let Some(status) = status {
                        name.push_str(&status.to_string());
                    }
                }
            }
        }

        name
    }
}

/// QPS and status counter names for one naming convention.
#[derive(Clone, Debug, PartialEq)]
pub struct Convention {
    pub qps: NameTemplate,
    pub status: NameTemplate,
}

impl Convention {
    pub fn new(qps: &str, status: &str) -> Result<Convention, ConfigError> {
        let qps = NameTemplate::parse(qps)?;
        let status = NameTemplate::parse(status)?;

        if !status.uses(Placeholder::Status) {
            return Err(ConfigError::MetricTemplate {
                template: status.source,
                reason: "status metric must contain {status}".to_owned(),
            });
        }

        Ok(Convention { qps, status })
    }
}

/// Builds counter names for records, switching conventions when the vhost
/// label is the reserved one.
#[derive(Clone, Debug, PartialEq)]
pub struct MetricNaming {
    pub host: String,
    pub vhost: String,
    pub reserved_label: String,
    pub reserved: Convention,
    pub standard: Convention,
}

impl MetricNaming {
    /// Naming with the default conventions.
    pub fn new<H: Into<String>, V: Into<String>>(host: H, vhost: V) -> Result<MetricNaming, ConfigError> {
        Ok(MetricNaming {
            host: host.into(),
            vhost: vhost.into(),
            reserved_label: DEFAULT_RESERVED_LABEL.to_owned(),
            reserved: Convention::new(DEFAULT_RESERVED_QPS, DEFAULT_RESERVED_STATUS)?,
            standard: Convention::new(DEFAULT_QPS, DEFAULT_STATUS)?,
        })
    }

    fn convention(&self) -> &Convention {
        if self.vhost == self.reserved_label {
            &self.reserved
        } else {
            &self.standard
        }
    }

    pub fn qps_name(&self) -> String {
        self.convention().qps.render(&self.host, &self.vhost, None)
    }

    pub fn status_name(&self, status: &Value) -> String {
        self.convention().status.render(&self.host, &self.vhost, Some(status))
    }

    /// One QPS counter per record, plus a status counter when the record
    /// has a status.
    pub fn metrics_for(&self, record: &Record) -> Vec<Metric> {
        let mut metrics = vec![Metric::count(self.qps_name())];

        if let Some(status) = record.get("status") {
            metrics.push(Metric::count(self.status_name(status)));
        }

        metrics
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record_with_status(status: i64) -> Record {
        vec![("status".to_owned(), Value::Int(status))].into_iter().collect()
    }

    #[test]
    fn reserved_label_drops_vhost_segment() {
        let naming = MetricNaming::new("web01", "wechat").unwrap();

        assert_eq!(
            naming.metrics_for(&record_with_status(200)),
            vec![
                Metric::count("web01.nginx.qps"),
                Metric::count("web01.nginx.status_code.200"),
            ]
        );
    }

    #[test]
    fn other_labels_appear_verbatim() {
        let naming = MetricNaming::new("web01", "shop").unwrap();

        assert_eq!(
            naming.metrics_for(&record_with_status(502)),
            vec![
                Metric::count("web01.shop_nginx.qps"),
                Metric::count("web01.shop_nginx.status_code.502"),
            ]
        );
    }

    #[test]
    fn records_without_status_only_count_qps() {
        let naming = MetricNaming::new("web01", "shop").unwrap();

        assert_eq!(naming.metrics_for(&Record::new()), vec![Metric::count("web01.shop_nginx.qps")]);
    }

    #[test]
    fn it_formats_statsd_counters() {
        assert_eq!(Metric::count("a.b").to_string(), "a.b:1|c");
    }

    #[test]
    fn it_accepts_custom_conventions() {
        let mut naming = MetricNaming::new("h", "v").unwrap();
        naming.standard = Convention::new("nginx.{vhost}.{host}.requests", "nginx.{vhost}.status.{status}").unwrap();

        assert_eq!(naming.qps_name(), "nginx.v.h.requests");
        assert_eq!(naming.status_name(&Value::Int(301)), "nginx.v.status.301");
    }

    #[test]
    fn it_rejects_bad_templates() {
        assert!(NameTemplate::parse("{host").is_err());
        assert!(NameTemplate::parse("{hostname}.qps").is_err());
        assert!(NameTemplate::parse("").is_err());
        assert!(Convention::new("{host}.qps", "{host}.status").is_err());
    }
}
