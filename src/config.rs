use std::collections::BTreeSet;
use std::fmt::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::distributor::TransportPolicy;
use crate::error::ConfigError;
use crate::metrics::{self, Convention, MetricNaming};
use crate::parsers::filter::Filter;
use crate::parsers::log_format::{LogFormat, LOG_FORMAT_COMBINED, LOG_FORMAT_COMMON};
use crate::parsers::nginx_conf::{detect_config_path, NginxConf};
use crate::reader::Source;

/// Access log selector that reads standard input.
pub const STDIN: &str = "stdin";

/// Options as given on the command line, before anything is resolved.
#[derive(Clone, Debug, PartialEq)]
pub struct Settings {
    pub access_log: Option<String>,
    pub log_format: String,
    pub server_config: Option<PathBuf>,
    pub no_follow: bool,
    pub filter: Option<String>,
    pub pre_filter: Option<String>,
    pub vhost_prefix: String,
    pub host: Option<String>,
    pub statsd_host: String,
    pub statsd_port: u16,
    pub poll_interval: Duration,
    pub transport_policy: TransportPolicy,
    pub reserved_vhost: String,
    pub qps_metric: String,
    pub status_metric: String,
    pub reserved_qps_metric: String,
    pub reserved_status_metric: String,
}

impl Default for Settings {
    fn default() -> Settings {
        Settings {
            access_log: None,
            log_format: "combined".to_owned(),
            server_config: None,
            no_follow: false,
            filter: None,
            pre_filter: None,
            vhost_prefix: metrics::DEFAULT_RESERVED_LABEL.to_owned(),
            host: None,
            statsd_host: "127.0.0.1".to_owned(),
            statsd_port: 8125,
            poll_interval: Duration::from_millis(100),
            transport_policy: TransportPolicy::Fatal,
            reserved_vhost: metrics::DEFAULT_RESERVED_LABEL.to_owned(),
            qps_metric: metrics::DEFAULT_QPS.to_owned(),
            status_metric: metrics::DEFAULT_STATUS.to_owned(),
            reserved_qps_metric: metrics::DEFAULT_RESERVED_QPS.to_owned(),
            reserved_status_metric: metrics::DEFAULT_RESERVED_STATUS.to_owned(),
        }
    }
}

/// Fully resolved, immutable configuration shared by every component.
#[derive(Clone, Debug)]
pub struct Config {
    pub source: Source,
    pub log_format: LogFormat,
    /// The nginx config that was consulted, if any.
    pub server_config: Option<PathBuf>,
    pub pre_filter: Option<Filter>,
    pub filter: Option<Filter>,
    pub naming: MetricNaming,
    pub statsd_host: String,
    pub statsd_port: u16,
    pub poll_interval: Duration,
    pub transport_policy: TransportPolicy,
}

fn is_format_name(format: &str) -> bool {
    !format.is_empty() && format.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

impl Config {
    /// Resolves the access log, its format, the filters and the metric
    /// names. `stdin_is_terminal` decides whether a missing access log
    /// means standard input.
    pub fn resolve(settings: &Settings, stdin_is_terminal: bool) -> Result<Config, ConfigError> {
        let mut server_config = settings.server_config.clone();
        let mut log_format = settings.log_format.clone();

        let mut access_log = settings.access_log.clone();
        if access_log.is_none() && !stdin_is_terminal {
            // assume logs are piped in
            access_log = Some(STDIN.to_owned());
        }

        let access_log = match access_log {
            Some(access_log) => access_log,
            None => {
                let path = server_config.get_or_insert_with(detect_config_path);
                let (access_log, format) = NginxConf::load(&*path)?.detect_log_config()?;
                log_format = format;
                access_log.to_string_lossy().into_owned()
            }
        };

        if is_format_name(&log_format) && log_format != "combined" && log_format != "common" {
            let path = server_config.get_or_insert_with(detect_config_path);
            log_format = NginxConf::load(&*path)?
                .resolve_format(&log_format)
                .ok_or_else(|| ConfigError::UnknownFormatName {
                    path: access_log.clone(),
                    format: log_format.clone(),
                })?;
        }

        tracing::info!(access_log = %access_log, log_format = %log_format, "resolved configuration");

        let source = if access_log == STDIN {
            Source::Stdin
        } else {
            let path = PathBuf::from(&access_log);
            if !path.exists() {
                return Err(ConfigError::MissingAccessLog(path));
            }
            if settings.no_follow {
                Source::File(path)
            } else {
                Source::Follow(path)
            }
        };

        let host = match settings.host {
            Some(ref host) => host.clone(),
            None => nix::unistd::gethostname()
                .map_err(ConfigError::Hostname)?
                .to_string_lossy()
                .into_owned(),
        };

        let naming = MetricNaming {
            host,
            vhost: settings.vhost_prefix.clone(),
            reserved_label: settings.reserved_vhost.clone(),
            reserved: Convention::new(&settings.reserved_qps_metric, &settings.reserved_status_metric)?,
            standard: Convention::new(&settings.qps_metric, &settings.status_metric)?,
        };

        Ok(Config {
            source,
            log_format: LogFormat::parse(&log_format)?,
            server_config,
            pre_filter: settings.pre_filter.as_deref().map(Filter::parse).transpose()?,
            filter: settings.filter.as_deref().map(Filter::parse).transpose()?,
            naming,
            statsd_host: settings.statsd_host.clone(),
            statsd_port: settings.statsd_port,
            poll_interval: settings.poll_interval,
            transport_policy: settings.transport_policy,
        })
    }

    pub fn access_log_display(&self) -> String {
        match self.source.path() {
            Some(path) => path.display().to_string(),
            None => STDIN.to_owned(),
        }
    }

    pub fn variables(&self) -> BTreeSet<&str> {
        self.log_format.variables().collect()
    }

    /// Text printed by the `info` command.
    pub fn info(&self, server_config: &Path) -> String {
        let mut out = String::new();
        let variables: Vec<&str> = self.variables().into_iter().collect();

        let _ = writeln!(out, "nginx configuration file:\n  {}", server_config.display());
        let _ = writeln!(out, "access log file:\n  {}", self.access_log_display());
        let _ = writeln!(out, "access log format:\n  {}", self.format_name());
        let _ = writeln!(out, "available variables:\n  {}", variables.join(", "));

        out
    }

    fn format_name(&self) -> &str {
        match self.log_format.template() {
            LOG_FORMAT_COMBINED => "combined",
            LOG_FORMAT_COMMON => "common",
            template => template,
        }
    }
}
